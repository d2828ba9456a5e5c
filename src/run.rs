//! One full relay pass: ingest, refresh the ledger, dispatch.
//!
//! Everything that can fail for configuration reasons (unknown types,
//! bad options, a missing data directory) fails before the ledger is
//! written, so a broken config never half-updates state.

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::{Config, ConsumerDefinition};
use crate::consumer::ConsumerRegistry;
use crate::dispatch::Dispatcher;
use crate::ledger::Ledger;
use crate::notes;
use crate::runtime::{dispatch_all, RunSummary};

/// How a run ended, short of a fatal error.
#[derive(Debug)]
pub enum RunOutcome {
    /// Dispatch ran; the summary says whether any record failed.
    Completed(RunSummary),
    /// `--consumer` filters matched no enabled consumer.
    NoMatchingConsumers,
}

impl RunOutcome {
    /// Process exit code: 0 clean, 1 when any record failed, 2 when the
    /// filters matched nothing.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Completed(summary) if summary.failed() => 1,
            Self::Completed(_) => 0,
            Self::NoMatchingConsumers => 2,
        }
    }
}

/// Enabled definitions selected by `filters` (case-insensitive names). An
/// empty filter list selects every enabled definition.
pub fn select_consumers<'a>(config: &'a Config, filters: &[String]) -> Vec<&'a ConsumerDefinition> {
    let wanted: Vec<String> = filters.iter().map(|f| f.to_lowercase()).collect();
    config
        .enabled_consumers()
        .filter(|def| wanted.is_empty() || wanted.contains(&def.name.to_lowercase()))
        .collect()
}

/// Validate every enabled consumer type and return the enabled names.
pub fn list_consumers(config: &Config, registry: &ConsumerRegistry) -> Result<Vec<String>> {
    registry.validate(config.enabled_consumers())?;
    Ok(config.enabled_consumers().map(|def| def.name.clone()).collect())
}

/// Execute one pass over the capture directory.
pub async fn run(config: &Config, registry: &ConsumerRegistry, filters: &[String]) -> Result<RunOutcome> {
    registry.validate(config.enabled_consumers())?;

    let selected = select_consumers(config, filters);
    if !filters.is_empty() && selected.is_empty() {
        error!(filters = %filters.join(", "), "no matching consumers");
        return Ok(RunOutcome::NoMatchingConsumers);
    }

    let records = notes::scan_capture_dir(&config.capture_dir)?;
    info!(
        capture_dir = %config.capture_dir.display(),
        records = records.len(),
        "scanned capture directory"
    );

    let mut consumers = registry.build_all(selected, config)?;

    let ledger = Ledger::open(&config.database_path).await?;
    let states = Dispatcher::new(&ledger)
        .refresh(records)
        .await
        .context("Failed to refresh ledger")?;

    let summary = dispatch_all(&ledger, &states, &mut consumers).await;
    ledger.close().await;
    Ok(RunOutcome::Completed(summary?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, IngestError};
    use tempfile::TempDir;

    fn config(tmp: &TempDir, consumers: &str) -> Config {
        let text = format!(
            r#"
[vault]
root = "{root}"
capture_dir = "capture"

[state]
dir = "{root}/state"

[consumers.taskwarrior]
enabled = false
{consumers}
"#,
            root = tmp.path().display(),
        );
        Config::from_toml_str(&text).unwrap()
    }

    #[test]
    fn test_select_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(
            &tmp,
            "[consumers.Inbox]\ntype = \"noop\"\n[consumers.other]\ntype = \"noop\"\n",
        );
        let names: Vec<_> = select_consumers(&cfg, &["INBOX".to_string()])
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["Inbox"]);
        assert_eq!(select_consumers(&cfg, &[]).len(), 2);
    }

    #[test]
    fn test_list_consumers_rejects_unknown_type() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, "[consumers.inbox]\ntype = \"noop\"\n");
        let err = list_consumers(&cfg, &ConsumerRegistry::with_builtins()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownConsumerType { .. })
        ));
    }

    #[tokio::test]
    async fn test_unmatched_filter_exits_two() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, "");
        let outcome = run(&cfg, &ConsumerRegistry::with_builtins(), &["nope".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_missing_capture_dir_is_fatal_before_ledger() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp, "");
        let err = run(&cfg, &ConsumerRegistry::with_builtins(), &[]).await.unwrap_err();
        assert!(err.downcast_ref::<IngestError>().is_some());
        assert!(!cfg.database_path.exists());
    }
}
