use crate::adapters::sqlite::{PurgeReport, SqliteStore};
use crate::utils::error::Result;
use crate::utils::validation;
use chrono::{Duration, Utc};

pub const MAX_STALE_DAYS: u32 = 3650;

/// 清除超過 `stale_days` 天未修改、未啟用也從未發佈的草稿
pub fn purge_stale_drafts(store: &SqliteStore, stale_days: u32) -> Result<PurgeReport> {
    validation::validate_range("stale_draft_days", stale_days, 1, MAX_STALE_DAYS)?;
    let cutoff = Utc::now() - Duration::days(i64::from(stale_days));
    tracing::info!("🧹 Purging drafts last modified before {}", cutoff.to_rfc3339());

    let report = store.purge_stale_drafts(cutoff)?;
    tracing::info!(
        "🧹 Removed {} guidebooks, {} hosts, {} properties",
        report.guidebooks,
        report.hosts,
        report.properties
    );
    Ok(report)
}
