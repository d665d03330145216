// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database provisioning contract.
//!
//! Applications that request `postgres: true` get per-app credentials from an
//! external provisioner. Provisioning failures are soft everywhere: the child
//! is started without its PG* environment and the failure is logged.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Database coordinates for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInfo {
    /// Database user.
    pub user: String,
    /// Database password.
    pub pass: String,
    /// Database name.
    pub name: String,
}

/// External per-app database provisioner.
#[async_trait]
pub trait DbProvisioner: Send + Sync {
    /// Credentials for `app_id`, provisioning them on first request.
    async fn get_info(&self, app_id: &str) -> Result<DbInfo>;
}

/// Mock [`DbProvisioner`] for tests.
pub struct MockProvisioner {
    info: Option<DbInfo>,
    requests: Mutex<Vec<String>>,
}

impl MockProvisioner {
    /// Provisioner that always hands out `info`.
    pub fn new(info: DbInfo) -> Self {
        Self {
            info: Some(info),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provisioner that always fails.
    pub fn unavailable() -> Self {
        Self {
            info: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// App ids that asked for credentials, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DbProvisioner for MockProvisioner {
    async fn get_info(&self, app_id: &str) -> Result<DbInfo> {
        self.requests.lock().unwrap().push(app_id.to_string());
        self.info
            .clone()
            .ok_or_else(|| Error::DbUnavailable("mock provisioner is down".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provisioner_hands_out_info() {
        let info = DbInfo {
            user: "app".to_string(),
            pass: "secret".to_string(),
            name: "appdb".to_string(),
        };
        let provisioner = MockProvisioner::new(info.clone());

        assert_eq!(provisioner.get_info("my-app").await.unwrap(), info);
        assert_eq!(provisioner.requests(), vec!["my-app"]);
    }

    #[tokio::test]
    async fn test_mock_provisioner_unavailable() {
        let provisioner = MockProvisioner::unavailable();
        let result = provisioner.get_info("my-app").await;
        assert!(matches!(result, Err(Error::DbUnavailable(_))));
    }
}
