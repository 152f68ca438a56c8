//! CLI command handlers.

pub mod apps;
pub mod audit;

use anyhow::{Context, Result};
use chrono::DateTime;
use keygate_agent::{load_config, FilesystemPolicyEngine};
use keygate_core::{CallerId, EventKind};
use std::path::Path;
use tracing::debug;

/// Open the engine over `data_dir` with the configuration at `config_path`.
pub async fn open_engine(config_path: &Path, data_dir: &Path) -> Result<FilesystemPolicyEngine> {
    let config = load_config(config_path)?;
    let engine = FilesystemPolicyEngine::open(data_dir, config)
        .await
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    debug!(data_dir = %data_dir.display(), "engine opened");
    Ok(engine)
}

pub(crate) fn parse_caller(caller: &str) -> Result<CallerId> {
    CallerId::new(caller).with_context(|| format!("invalid caller id {caller:?}"))
}

pub(crate) fn parse_kind(kind: Option<i64>) -> Result<Option<EventKind>> {
    kind.map(|k| EventKind::try_from(k).context("invalid event kind"))
        .transpose()
}

/// Render a wall-clock millisecond timestamp as UTC.
pub(crate) fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(86_400_000), "1970-01-02 00:00:00 UTC");
    }

    #[test]
    fn kinds_are_range_checked() {
        assert_eq!(parse_kind(None).unwrap(), None);
        assert_eq!(parse_kind(Some(1)).unwrap(), Some(EventKind::new(1)));
        assert!(parse_kind(Some(-3)).is_err());
    }
}
