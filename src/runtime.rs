//! Consumer dispatch loop.
//!
//! Every consumer gets its own pending set from the ledger and processes it
//! independently: a failing consumer, or a failing record inside one, never
//! stops the others. Settled outcomes are written back to the ledger here,
//! which is the only place emission rows are created.

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::consumer::Consumer;
use crate::dispatch::Dispatcher;
use crate::error::CommandError;
use crate::ledger::Ledger;
use crate::models::{ChangeState, EmissionStatus};

/// Per-consumer outcome counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub success: usize,
    pub skip: usize,
    pub limit: usize,
    pub error: usize,
}

impl Tally {
    fn record(&mut self, status: EmissionStatus) {
        match status {
            EmissionStatus::Success => self.success += 1,
            EmissionStatus::Skip => self.skip += 1,
            EmissionStatus::Limit => self.limit += 1,
            EmissionStatus::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.skip + self.limit + self.error
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// `(consumer name, tally)` in dispatch order.
    pub consumers: Vec<(String, Tally)>,
}

impl RunSummary {
    pub fn tally(&self, consumer: &str) -> Option<&Tally> {
        self.consumers
            .iter()
            .find(|(name, _)| name == consumer)
            .map(|(_, tally)| tally)
    }

    /// Any error outcome makes the whole run a failure.
    pub fn failed(&self) -> bool {
        self.consumers.iter().any(|(_, tally)| tally.error > 0)
    }
}

/// Run every consumer over its pending records.
///
/// Errors returned here are ledger failures, which abort the run. Consumer
/// failures are logged and counted instead.
pub async fn dispatch_all(
    ledger: &Ledger,
    states: &[ChangeState],
    consumers: &mut [Box<dyn Consumer>],
) -> Result<RunSummary> {
    let dispatcher = Dispatcher::new(ledger);
    let mut summary = RunSummary::default();

    for consumer in consumers.iter_mut() {
        let name = consumer.name().to_string();
        let pending = dispatcher.pending_for_consumer(&name, states).await?;
        if pending.is_empty() {
            debug!(consumer = %name, "nothing pending");
            summary.consumers.push((name, Tally::default()));
            continue;
        }

        info!(consumer = %name, pending = pending.len(), "dispatching");
        let mut tally = Tally::default();

        for state in pending {
            if !consumer.relevant(state) {
                continue;
            }
            let record = &state.record;
            let path = record.key();

            match consumer.handle(state, ledger).await {
                Ok(outcome) => {
                    if outcome.status.settles() {
                        ledger
                            .mark_emitted(
                                &name,
                                &path,
                                &record.fingerprint,
                                outcome.status,
                                &outcome.metadata,
                            )
                            .await?;
                    }
                    match outcome.status {
                        EmissionStatus::Error => {
                            error!(consumer = %name, path = %path, message = %outcome.message, "consumer reported error")
                        }
                        EmissionStatus::Limit => {
                            warn!(consumer = %name, path = %path, message = %outcome.message, "deferred")
                        }
                        status => {
                            debug!(consumer = %name, path = %path, %status, message = %outcome.message, "handled")
                        }
                    }
                    tally.record(outcome.status);
                }
                Err(err) => {
                    log_failure(&name, &path, &err);
                    tally.error += 1;
                }
            }
        }

        info!(
            consumer = %name,
            success = tally.success,
            skip = tally.skip,
            limit = tally.limit,
            error = tally.error,
            "consumer finished"
        );
        summary.consumers.push((name, tally));
    }

    Ok(summary)
}

fn log_failure(consumer: &str, path: &str, err: &anyhow::Error) {
    error!(consumer = %consumer, path = %path, error = %format!("{:#}", err), "consumer failed");
    log_command_output(err);
}

/// Log the captured output of a [`CommandError`] anywhere in `err`'s chain.
pub fn log_command_output(err: &anyhow::Error) {
    if let Some(command) = err.chain().find_map(|e| e.downcast_ref::<CommandError>()) {
        if !command.stdout.trim().is_empty() {
            error!(stdout = %command.stdout.trim(), "command stdout");
        }
        if !command.stderr.trim().is_empty() {
            error!(stderr = %command.stderr.trim(), "command stderr");
        }
    }
}
