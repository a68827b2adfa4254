//! Check store abstraction.
//!
//! The scheduler only ever talks to a [`CheckStore`]; whether that is
//! the libsql database or the control-plane HTTP endpoint is wiring
//! decided at startup.

pub mod http;
pub mod libsql;
pub mod migrations;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::checks::{CheckDefinition, CheckResult};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("check fetch failed: {0}")]
    Fetch(String),

    #[error("result write failed: {0}")]
    Write(String),

    #[error("malformed record: {0}")]
    Decode(String),
}

/// Summary of one batched result write.
#[derive(Debug, Clone, Copy)]
pub struct WriteSummary {
    pub inserted: usize,
}

impl fmt::Display for WriteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inserted {} results", self.inserted)
    }
}

/// Storage contract consumed by the scheduler. Implementations must be
/// safe for concurrent use from every scheduler task.
#[async_trait]
pub trait CheckStore: Send + Sync {
    /// Verify connectivity and prepare storage (schema setup where
    /// applicable). Called once at startup; failure there is fatal.
    async fn connect(&self) -> Result<(), StoreError>;

    /// Fetch every check definition assigned to `region`.
    async fn fetch_region_checks(&self, region: &str) -> Result<Vec<CheckDefinition>, StoreError>;

    /// Persist one batch of probe results.
    async fn write_results(&self, batch: &[CheckResult]) -> Result<WriteSummary, StoreError>;

    async fn disconnect(&self);
}
