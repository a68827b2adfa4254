//! Development seeding: load check definitions from a CSV file into the
//! local database.
//!
//! Line format: `id,url,interval_seconds,http_timeout_seconds,regions`
//! where `regions` is a `;`-separated list. Blank lines and lines
//! starting with `#` are skipped.

use std::path::Path;

use anyhow::{Context, bail};
use chrono::Utc;
use tracing::info;

use crate::checks::CheckDefinition;
use crate::store::CheckStore;
use crate::store::libsql::LibsqlStore;

pub async fn seed_checks(db_path: &str, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let store = LibsqlStore::open(db_path).await?;
    store.connect().await?;

    let mut seeded = 0usize;
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let check = parse_line(line)
            .with_context(|| format!("{}:{}", file.display(), number + 1))?;
        store.upsert_check(&check).await?;
        seeded += 1;
    }

    store.disconnect().await;
    info!(seeded, "seeded check definitions");
    Ok(())
}

fn parse_line(line: &str) -> anyhow::Result<CheckDefinition> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [id, url, interval, timeout, regions] = fields.as_slice() else {
        bail!("expected 5 fields, got {}", fields.len());
    };

    if id.is_empty() {
        bail!("empty check id");
    }

    Ok(CheckDefinition {
        id: id.to_string(),
        url: url.to_string(),
        interval_seconds: interval.parse().context("bad interval")?,
        http_timeout_seconds: timeout.parse().context("bad timeout")?,
        regions: regions
            .split(';')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect(),
        modified_at: Utc::now(),
        serial: 1,
        active: true,
    })
}
