//! REST client for the remote review service

use crate::config::GatewayConfig;
use crate::constants::REVIEW_PERMISSION;
use crate::error::{ReviewError, Result};
use crate::workflow::permissions::PermissionGate;
use crate::workflow::traits::ReviewGateway;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode, Url};
use review_types::{PatientId, Review, ReviewId, StepCompletion};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    allowed: bool,
}

pub struct RestReviewGateway {
    base_url: Url,
    api_token: Option<String>,
    http_client: HttpClient,
}

impl RestReviewGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let raw = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ReviewError::Config("gateway.base_url is required for the REST gateway".to_string()))?;
        let base_url = Url::parse(raw)
            .map_err(|e| ReviewError::Config(format!("invalid gateway.base_url '{}': {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ReviewError::Config(format!("gateway.base_url '{}' cannot carry a path", raw)));
        }

        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        Ok(Self {
            base_url,
            api_token: config.api_token.clone().filter(|t| !t.trim().is_empty()),
            http_client,
        })
    }

    /// Base URL with the given path segments appended (each percent-encoded)
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ReviewError::Config(format!("gateway.base_url '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http_client.request(method, url);
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        log::error!("Review service answered {} for {}: {}", status, what, body);
        Err(status_error(status, what, &body))
    }

    async fn review_call(&self, request: RequestBuilder, what: &str) -> Result<Review> {
        let response = self.send(request, what).await?;
        Ok(response.json::<Review>().await?)
    }
}

/// Map a non-success status to the gateway error taxonomy
fn status_error(status: StatusCode, what: &str, body: &str) -> ReviewError {
    let detail = if body.trim().is_empty() {
        what.to_string()
    } else {
        format!("{}: {}", what, body.trim())
    };

    match status {
        StatusCode::NOT_FOUND => ReviewError::NotFound(detail),
        StatusCode::CONFLICT => ReviewError::Conflict(detail),
        StatusCode::FORBIDDEN => ReviewError::PermissionDenied(detail),
        _ => ReviewError::Gateway(format!("{} returned {}", detail, status)),
    }
}

#[async_trait]
impl ReviewGateway for RestReviewGateway {
    async fn create_review(&self, patient_id: &PatientId) -> Result<Review> {
        let url = self.endpoint(&["reviews"])?;
        let request = self
            .request(Method::POST, url)
            .json(&json!({ "patientId": patient_id }));
        self.review_call(request, "create review").await
    }

    async fn load_review(&self, review_id: &ReviewId) -> Result<Review> {
        let url = self.endpoint(&["reviews", review_id.as_str()])?;
        self.review_call(self.request(Method::GET, url), "load review").await
    }

    async fn load_in_progress_review(&self, patient_id: &PatientId) -> Result<Option<Review>> {
        let url = self.endpoint(&["patients", patient_id.as_str(), "reviews", "in-progress"])?;
        let response = self.request(Method::GET, url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<Review>().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                log::error!("Review service answered {} for in-progress lookup: {}", status, body);
                Err(status_error(status, "load in-progress review", &body))
            }
        }
    }

    async fn save_review(&self, review: &Review) -> Result<Review> {
        let url = self.endpoint(&["reviews", review.id.as_str()])?;
        self.review_call(self.request(Method::PUT, url).json(review), "save review")
            .await
    }

    async fn complete_step(&self, review_id: &ReviewId, completion: &StepCompletion) -> Result<Review> {
        let index = completion.step_index.to_string();
        let url = self.endpoint(&["reviews", review_id.as_str(), "steps", &index])?;
        self.review_call(self.request(Method::POST, url).json(completion), "complete step")
            .await
    }

    async fn complete_review(&self, review_id: &ReviewId) -> Result<Review> {
        let url = self.endpoint(&["reviews", review_id.as_str(), "complete"])?;
        self.review_call(self.request(Method::POST, url), "complete review").await
    }

    async fn cancel_review(&self, review_id: &ReviewId) -> Result<Review> {
        let url = self.endpoint(&["reviews", review_id.as_str(), "cancel"])?;
        self.review_call(self.request(Method::POST, url), "cancel review").await
    }
}

#[async_trait]
impl PermissionGate for RestReviewGateway {
    async fn check_permissions(&self) -> Result<bool> {
        let url = self.endpoint(&["permissions", REVIEW_PERMISSION])?;
        let response = self.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::FORBIDDEN {
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, "permission check", &body));
        }

        let answer: PermissionResponse = response.json().await?;
        Ok(answer.allowed)
    }
}
