//! Review gateway implementations

pub mod file_store;
pub mod rest;

pub use file_store::FileReviewStore;
pub use rest::RestReviewGateway;
