//! Change detection and per-consumer pending queries.
//!
//! [`Dispatcher::refresh`] synchronizes the ledger with the current record
//! set and reports how each record changed. Whether a record is pending for
//! a given consumer is decided by the ledger's emission rows, not by the
//! change flags, so a consumer enabled for the first time sees every record.

use anyhow::Result;

use crate::ledger::Ledger;
use crate::models::{ChangeState, Record};

pub struct Dispatcher<'a> {
    ledger: &'a Ledger,
}

impl<'a> Dispatcher<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Upsert every record (in the order given), then prune ledger rows for
    /// records that are no longer present. Returns one state per record,
    /// changed or not.
    pub async fn refresh(&self, records: Vec<Record>) -> Result<Vec<ChangeState>> {
        let mut states = Vec::with_capacity(records.len());
        let mut seen = Vec::with_capacity(records.len());

        for record in records {
            let previous = self.ledger.upsert(&record).await?;
            seen.push(record.key());
            states.push(ChangeState { record, previous });
        }

        self.ledger.prune(&seen).await?;

        let new = states.iter().filter(|s| s.is_new()).count();
        let changed = states.iter().filter(|s| s.changed()).count();
        tracing::info!(total = states.len(), new, changed, "ledger refreshed");

        Ok(states)
    }

    /// States that `consumer` has not settled at their current fingerprint,
    /// in record order.
    pub async fn pending_for_consumer<'s>(
        &self,
        consumer: &str,
        states: &'s [ChangeState],
    ) -> Result<Vec<&'s ChangeState>> {
        let mut pending = Vec::new();
        for state in states {
            let record = &state.record;
            if self
                .ledger
                .needs_emission(consumer, &record.key(), &record.fingerprint)
                .await?
            {
                pending.push(state);
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmissionStatus;
    use crate::notes::record_from_text;
    use serde_json::Value;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn records(items: &[(&str, &str)]) -> Vec<Record> {
        items
            .iter()
            .map(|(p, raw)| record_from_text(&PathBuf::from(p), raw.to_string()))
            .collect()
    }

    async fn settle_all(ledger: &Ledger, consumer: &str, states: &[ChangeState]) {
        for s in states {
            ledger
                .mark_emitted(
                    consumer,
                    &s.record.key(),
                    &s.record.fingerprint,
                    EmissionStatus::Success,
                    &Value::Null,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_refresh_reports_new_and_changed() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open(&tmp.path().join("l.sqlite")).await.unwrap();
        let dispatcher = Dispatcher::new(&ledger);

        let first = dispatcher
            .refresh(records(&[("/c/a.md", "a"), ("/c/b.md", "b")]))
            .await
            .unwrap();
        assert!(first.iter().all(|s| s.is_new() && s.changed()));

        let second = dispatcher
            .refresh(records(&[("/c/a.md", "a"), ("/c/b.md", "b2")]))
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert!(!second[0].is_new() && !second[0].changed());
        assert!(!second[1].is_new() && second[1].changed());
    }

    #[tokio::test]
    async fn test_idempotent_rerun_has_nothing_pending() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open(&tmp.path().join("l.sqlite")).await.unwrap();
        let dispatcher = Dispatcher::new(&ledger);
        let input = [("/c/a.md", "a"), ("/c/b.md", "b")];

        let states = dispatcher.refresh(records(&input)).await.unwrap();
        let pending = dispatcher.pending_for_consumer("tw", &states).await.unwrap();
        assert_eq!(pending.len(), 2);
        settle_all(&ledger, "tw", &states).await;

        let states = dispatcher.refresh(records(&input)).await.unwrap();
        assert!(dispatcher.pending_for_consumer("tw", &states).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_consumer_sees_unchanged_records() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open(&tmp.path().join("l.sqlite")).await.unwrap();
        let dispatcher = Dispatcher::new(&ledger);
        let input = [("/c/a.md", "a"), ("/c/b.md", "b")];

        let states = dispatcher.refresh(records(&input)).await.unwrap();
        settle_all(&ledger, "tw", &states).await;

        let states = dispatcher.refresh(records(&input)).await.unwrap();
        assert!(states.iter().all(|s| !s.changed()));
        let pending = dispatcher.pending_for_consumer("late", &states).await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_record_removed_from_ledger() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open(&tmp.path().join("l.sqlite")).await.unwrap();
        let dispatcher = Dispatcher::new(&ledger);

        let states = dispatcher
            .refresh(records(&[("/c/a.md", "a"), ("/c/b.md", "b")]))
            .await
            .unwrap();
        settle_all(&ledger, "tw", &states).await;
        settle_all(&ledger, "other", &states).await;

        dispatcher.refresh(records(&[("/c/a.md", "a")])).await.unwrap();
        assert!(ledger.note("/c/b.md").await.unwrap().is_none());
        assert!(ledger.emission("tw", "/c/b.md").await.unwrap().is_none());
        assert!(ledger.emission("other", "/c/b.md").await.unwrap().is_none());
        assert_eq!(ledger.note_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rename_is_delete_plus_create() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open(&tmp.path().join("l.sqlite")).await.unwrap();
        let dispatcher = Dispatcher::new(&ledger);

        let states = dispatcher.refresh(records(&[("/c/a.md", "same")])).await.unwrap();
        settle_all(&ledger, "tw", &states).await;

        let states = dispatcher.refresh(records(&[("/c/z.md", "same")])).await.unwrap();
        assert!(states[0].is_new());
        assert_eq!(dispatcher.pending_for_consumer("tw", &states).await.unwrap().len(), 1);
        assert!(ledger.emission("tw", "/c/a.md").await.unwrap().is_none());
    }
}
