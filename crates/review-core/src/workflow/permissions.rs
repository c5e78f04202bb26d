//! Permission gate checked before a session may load or create a review

use crate::config::PermissionConfig;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// `Ok(false)` and `Err(_)` both block the session
    async fn check_permissions(&self) -> Result<bool>;
}

/// Allows everything; for local tooling and tests
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn check_permissions(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Allows the configured role if it is one of the allowed roles
pub struct RolePermissionGate {
    role: String,
    allowed_roles: Vec<String>,
}

impl RolePermissionGate {
    pub fn new(config: &PermissionConfig) -> Self {
        Self {
            role: config.role.trim().to_lowercase(),
            allowed_roles: config
                .allowed_roles
                .iter()
                .map(|r| r.trim().to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl PermissionGate for RolePermissionGate {
    async fn check_permissions(&self) -> Result<bool> {
        let allowed = self.allowed_roles.iter().any(|r| *r == self.role);
        if !allowed {
            log::warn!("Role '{}' may not run medication therapy reviews", self.role);
        }
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_role_gate() {
        let config = PermissionConfig {
            role: " Pharmacist ".to_string(),
            allowed_roles: vec!["pharmacist".to_string(), "admin".to_string()],
        };
        assert!(RolePermissionGate::new(&config).check_permissions().await.unwrap());

        let config = PermissionConfig {
            role: "receptionist".to_string(),
            ..PermissionConfig::default()
        };
        assert!(!RolePermissionGate::new(&config).check_permissions().await.unwrap());
    }

    #[tokio::test]
    async fn test_allow_all() {
        assert!(AllowAll.check_permissions().await.unwrap());
    }
}
