//! Control-plane HTTP implementation of the check store.
//!
//! Earlier deployments served check definitions from a small HTTP
//! endpoint instead of the database. `GET /` returns
//! `{"StatusChecks": [...], "SSLChecks": [...]}`; results are posted
//! back as a JSON batch.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CheckStore, StoreError, WriteSummary};
use crate::checks::{CheckDefinition, CheckResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ChecksDocument {
    #[serde(rename = "StatusChecks", default)]
    status_checks: Vec<CheckDefinition>,

    /// Present on the wire but out of scope for this agent.
    #[serde(rename = "SSLChecks", default)]
    ssl_checks: Vec<serde_json::Value>,
}

pub struct HttpCheckStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCheckStore {
    pub fn new(endpoint: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { client, endpoint: endpoint.trim_end_matches('/').to_string() })
    }

    fn checks_url(&self) -> String {
        format!("{}/", self.endpoint)
    }

    fn results_url(&self) -> String {
        format!("{}/results", self.endpoint)
    }
}

#[async_trait]
impl CheckStore for HttpCheckStore {
    async fn connect(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.checks_url())
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Connection(format!(
                "control plane answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_region_checks(&self, region: &str) -> Result<Vec<CheckDefinition>, StoreError> {
        let response = self
            .client
            .get(self.checks_url())
            .send()
            .await
            .map_err(|e| StoreError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Fetch(format!("control plane answered {}", response.status())));
        }

        let document: ChecksDocument =
            response.json().await.map_err(|e| StoreError::Decode(e.to_string()))?;

        if !document.ssl_checks.is_empty() {
            debug!(count = document.ssl_checks.len(), "ignoring ssl checks from control plane");
        }

        Ok(document
            .status_checks
            .into_iter()
            .filter(|check| check.assigned_to(region))
            .collect())
    }

    async fn write_results(&self, batch: &[CheckResult]) -> Result<WriteSummary, StoreError> {
        let response = self
            .client
            .post(self.results_url())
            .json(batch)
            .send()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Write(format!("control plane answered {}", response.status())));
        }

        Ok(WriteSummary { inserted: batch.len() })
    }

    async fn disconnect(&self) {}
}
