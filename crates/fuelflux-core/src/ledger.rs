//! Run ledger: one audit row per `(run_id, task_id)`.
//!
//! The ledger is a side channel. A ledger write that fails is logged and
//! otherwise ignored; it never changes what a stage returns.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::StoreError;
use crate::pipeline::StageReport;
use crate::types::{Layer, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageKey {
    pub run_id: String,
    pub workflow_id: String,
    pub task_id: String,
    pub layer: Layer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub records_processed: u64,
    pub records_failed: u64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Opens (or, for a retried task, re-opens) the entry as `running`.
    async fn begin(&self, key: &StageKey, started_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Finalizes the entry. Must succeed even if `begin` never landed.
    async fn finish(
        &self,
        key: &StageKey,
        started_at: DateTime<Utc>,
        outcome: &StageOutcome,
    ) -> Result<(), StoreError>;
}

/// Guard around one stage execution. Dropping it unfinished (panic, early
/// return, cancelled future) still closes the entry as `failed`.
pub struct StageRun {
    ledger: Arc<dyn RunLedger>,
    key: StageKey,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl StageRun {
    pub async fn open(ledger: Arc<dyn RunLedger>, key: StageKey) -> Self {
        let started_at = Utc::now();
        if let Err(err) = ledger.begin(&key, started_at).await {
            warn!(run_id = %key.run_id, task_id = %key.task_id, error = %err, "Failed to open ledger entry");
        }
        Self {
            ledger,
            key,
            started_at,
            finished: false,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn key(&self) -> &StageKey {
        &self.key
    }

    pub async fn complete(mut self, processed: u64, failed: u64) -> StageReport {
        let status = RunStatus::from_counts(processed, failed);
        self.close(StageOutcome {
            records_processed: processed,
            records_failed: failed,
            status,
            error_message: None,
            finished_at: Utc::now(),
        })
        .await;

        StageReport {
            task_id: self.key.task_id.clone(),
            layer: self.key.layer,
            records_processed: processed,
            records_failed: failed,
            status,
            started_at: self.started_at,
        }
    }

    pub async fn fail(mut self, error: &dyn Display, processed: u64, failed: u64) {
        self.close(StageOutcome {
            records_processed: processed,
            records_failed: failed,
            status: RunStatus::Failed,
            error_message: Some(error.to_string()),
            finished_at: Utc::now(),
        })
        .await;
    }

    async fn close(&mut self, outcome: StageOutcome) {
        self.finished = true;
        if let Err(err) = self.ledger.finish(&self.key, self.started_at, &outcome).await {
            warn!(
                run_id = %self.key.run_id,
                task_id = %self.key.task_id,
                status = %outcome.status,
                error = %err,
                "Failed to finalize ledger entry"
            );
        }
    }
}

impl Drop for StageRun {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = StageOutcome {
            records_processed: 0,
            records_failed: 0,
            status: RunStatus::Failed,
            error_message: Some("stage aborted before completion".to_string()),
            finished_at: Utc::now(),
        };
        let ledger = self.ledger.clone();
        let key = self.key.clone();
        let started_at = self.started_at;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = ledger.finish(&key, started_at, &outcome).await {
                        warn!(task_id = %key.task_id, "failed to close aborted ledger entry: {err}");
                    }
                });
            }
            Err(_) => {
                warn!(task_id = %key.task_id, "no runtime available to close aborted ledger entry");
            }
        }
    }
}
