//! libsql-backed check store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool::managed::Object;
use libsql::{Builder, params};
use tracing::debug;

use super::{CheckStore, StoreError, WriteSummary, migrations};
use crate::checks::{CheckDefinition, CheckResult};
use crate::pool::{LibsqlManager, LibsqlPool};

pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Open (or create) the database file at `path` and build the
    /// connection pool around it.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let database = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("open {path}: {e}")))?;

        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Object<LibsqlManager>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Connection(e.to_string()))
    }

    /// Insert or replace a check definition. Used by the seeding
    /// subcommand and tests; the reconciler itself never writes checks.
    pub async fn upsert_check(&self, check: &CheckDefinition) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let regions = serde_json::to_string(&check.regions)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        conn.execute(
            "INSERT INTO status_checks
                (id, url, interval_seconds, http_timeout_seconds, regions, modified_at, serial, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                url = excluded.url,
                interval_seconds = excluded.interval_seconds,
                http_timeout_seconds = excluded.http_timeout_seconds,
                regions = excluded.regions,
                modified_at = excluded.modified_at,
                serial = excluded.serial,
                active = excluded.active",
            params![
                check.id.clone(),
                check.url.clone(),
                check.interval_seconds as i64,
                check.http_timeout_seconds as i64,
                regions,
                check.modified_at.to_rfc3339(),
                check.serial as i64,
                if check.active { 1 } else { 0 },
            ],
        )
        .await
        .map_err(|e| StoreError::Write(e.to_string()))?;

        Ok(())
    }

    /// Most recent results for one check, newest first. Test and
    /// debugging helper, not part of the scheduler contract.
    pub async fn recent_results(
        &self,
        check_id: &str,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT region, check_id, timestamp, response_code, response_info,
                        firstbyte_ms, dns_ms, tls_ms, connect_ms
                 FROM check_results
                 WHERE check_id = ?
                 ORDER BY timestamp DESC
                 LIMIT ?",
                params![check_id, limit as i64],
            )
            .await
            .map_err(|e| StoreError::Fetch(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| StoreError::Fetch(e.to_string()))? {
            let timestamp: String = row.get(2).map_err(|e| StoreError::Decode(e.to_string()))?;
            results.push(CheckResult {
                region: row.get(0).map_err(|e| StoreError::Decode(e.to_string()))?,
                check_id: row.get(1).map_err(|e| StoreError::Decode(e.to_string()))?,
                timestamp: parse_timestamp(&timestamp)?,
                response_code: row.get::<i64>(3).map_err(|e| StoreError::Decode(e.to_string()))?
                    as u16,
                response_info: row.get(4).map_err(|e| StoreError::Decode(e.to_string()))?,
                firstbyte_ms: row.get(5).map_err(|e| StoreError::Decode(e.to_string()))?,
                dns_ms: row.get(6).map_err(|e| StoreError::Decode(e.to_string()))?,
                tls_ms: row.get(7).map_err(|e| StoreError::Decode(e.to_string()))?,
                connect_ms: row.get(8).map_err(|e| StoreError::Decode(e.to_string()))?,
            });
        }

        Ok(results)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {raw:?}: {e}")))
}

#[async_trait]
impl CheckStore for LibsqlStore {
    async fn connect(&self) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        migrations::run_migrations(&conn).await
    }

    async fn fetch_region_checks(&self, region: &str) -> Result<Vec<CheckDefinition>, StoreError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, url, interval_seconds, http_timeout_seconds, regions,
                        modified_at, serial, active
                 FROM status_checks",
                (),
            )
            .await
            .map_err(|e| StoreError::Fetch(e.to_string()))?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| StoreError::Fetch(e.to_string()))? {
            let regions_raw: String = row.get(4).map_err(|e| StoreError::Decode(e.to_string()))?;
            let regions: Vec<String> = serde_json::from_str(&regions_raw)
                .map_err(|e| StoreError::Decode(format!("bad regions {regions_raw:?}: {e}")))?;
            let modified_at: String = row.get(5).map_err(|e| StoreError::Decode(e.to_string()))?;

            let check = CheckDefinition {
                id: row.get(0).map_err(|e| StoreError::Decode(e.to_string()))?,
                url: row.get(1).map_err(|e| StoreError::Decode(e.to_string()))?,
                interval_seconds: row.get::<i64>(2).map_err(|e| StoreError::Decode(e.to_string()))?
                    as u64,
                http_timeout_seconds: row
                    .get::<i64>(3)
                    .map_err(|e| StoreError::Decode(e.to_string()))? as u64,
                regions,
                modified_at: parse_timestamp(&modified_at)?,
                serial: row.get::<i64>(6).map_err(|e| StoreError::Decode(e.to_string()))? as u64,
                active: row.get::<i64>(7).map_err(|e| StoreError::Decode(e.to_string()))? != 0,
            };

            // Region assignment lives in a JSON column, so the filter
            // happens here rather than in SQL.
            if check.assigned_to(region) {
                checks.push(check);
            }
        }

        debug!(region, count = checks.len(), "fetched region checks");
        Ok(checks)
    }

    async fn write_results(&self, batch: &[CheckResult]) -> Result<WriteSummary, StoreError> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(|e| StoreError::Write(e.to_string()))?;

        for result in batch {
            tx.execute(
                "INSERT INTO check_results
                    (region, check_id, timestamp, response_code, response_info,
                     firstbyte_ms, dns_ms, tls_ms, connect_ms, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    result.region.clone(),
                    result.check_id.clone(),
                    result.timestamp.to_rfc3339(),
                    result.response_code as i64,
                    result.response_info.clone(),
                    result.firstbyte_ms,
                    result.dns_ms,
                    result.tls_ms,
                    result.connect_ms,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(WriteSummary { inserted: batch.len() })
    }

    async fn disconnect(&self) {
        self.pool.close();
    }
}
