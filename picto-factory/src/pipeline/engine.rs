//! Pipeline engine: cascade orchestration, batch runs, cancellation
//!
//! The engine sequences the three steps for one row (NLU → visual → SVG),
//! short-circuiting on the first non-success, and fans the cascade out
//! over pending rows with a bounded batch. The store lock is released
//! across every generation call, so independent rows interleave freely;
//! a run's outcome is merged against whatever the row looks like when the
//! call returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use picto_factory_sdk::{
    log_batch_complete, log_batch_start, log_batch_stopped, log_progress, log_step_cancelled,
    log_step_complete, log_step_failed, log_step_start, log_warning, GenerationService, RowStatus,
    StepKind, StepStatus,
};
use tokio::sync::{Mutex, Semaphore};

use crate::database::Database;
use crate::error::PipelineError;
use crate::pipeline::cancel::CancelRegistry;
use crate::pipeline::config::GlobalConfig;
use crate::pipeline::executor::{self, StepOutcome};
use crate::pipeline::row::Row;
use crate::pipeline::state;
use crate::pipeline::store::PipelineStore;

/// Options for a batch run over the store.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum rows processed concurrently.
    pub batch_size: usize,
    /// Per-row wall-clock limit; `None` disables the guard.
    pub timeout: Option<Duration>,
    /// Rerun rows that are already completed.
    pub force: bool,
    /// Run a single step instead of the full cascade.
    pub step: Option<StepKind>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            batch_size: 1,
            timeout: Some(Duration::from_secs(90)),
            force: false,
            step: None,
        }
    }
}

/// Summary of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: bool,
}

enum RowRun {
    Completed,
    Failed,
    Skipped,
}

/// Orchestrates step execution over a shared row store.
pub struct PipelineEngine<S> {
    store: Arc<Mutex<PipelineStore>>,
    service: Arc<S>,
    config: GlobalConfig,
    cancellations: CancelRegistry,
    stop_requested: Arc<AtomicBool>,
    persistence: Option<Arc<std::sync::Mutex<Database>>>,
}

impl<S> Clone for PipelineEngine<S> {
    fn clone(&self) -> Self {
        PipelineEngine {
            store: Arc::clone(&self.store),
            service: Arc::clone(&self.service),
            config: self.config.clone(),
            cancellations: self.cancellations.clone(),
            stop_requested: Arc::clone(&self.stop_requested),
            persistence: self.persistence.clone(),
        }
    }
}

impl<S: GenerationService> PipelineEngine<S> {
    pub fn new(store: PipelineStore, service: Arc<S>, config: GlobalConfig) -> Self {
        PipelineEngine {
            store: Arc::new(Mutex::new(store)),
            service,
            config,
            cancellations: CancelRegistry::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            persistence: None,
        }
    }

    /// Persist the whole store through this database after every mutation.
    pub fn with_persistence(mut self, db: Database) -> Self {
        self.persistence = Some(Arc::new(std::sync::Mutex::new(db)));
        self
    }

    pub fn store(&self) -> Arc<Mutex<PipelineStore>> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Run one step for one row: begin, execute with the lock released,
    /// merge the outcome against the current stored row, persist.
    pub async fn run_step(
        &self,
        row_id: &str,
        step: StepKind,
    ) -> Result<StepOutcome, PipelineError> {
        let (snapshot, token) = {
            let mut store = self.store.lock().await;
            let row = store
                .get(row_id)
                .cloned()
                .ok_or_else(|| PipelineError::RowNotFound(row_id.to_string()))?;
            let begun = state::begin_step(&row, step)?;
            store.replace(begun.clone());
            // Registered under the store lock: anyone who observes the
            // step as processing can already route a cancel to it.
            let token = self.cancellations.register(row_id).await;
            (begun, token)
        };
        log_step_start!(row_id, step);
        self.persist().await;

        let outcome =
            executor::run(&snapshot, step, &self.config, self.service.as_ref(), &token).await;

        {
            let mut store = self.store.lock().await;
            // The stored row may have been edited while the call was out;
            // the merge applies to its current value, not the snapshot.
            if let Some(current) = store.get(row_id).cloned() {
                let merged = match &outcome {
                    StepOutcome::Success {
                        fields,
                        duration_seconds,
                    } => state::complete_step(&current, step, fields.clone(), *duration_seconds, &token),
                    StepOutcome::Failure(message) => state::fail_step(&current, step, message),
                    StepOutcome::Cancelled => state::cancel_step(&current, step),
                };
                match merged {
                    Ok(next) => {
                        store.replace(next);
                    }
                    Err(err) => {
                        // The row moved on (e.g. a forced reset); its
                        // stored state wins over the late result.
                        log_warning!("discarding {} result for row {}: {}", step, row_id, err);
                    }
                }
            }
        }
        self.cancellations.remove(row_id).await;

        match &outcome {
            StepOutcome::Success {
                duration_seconds, ..
            } => {
                log_step_complete!(row_id, step, *duration_seconds);
            }
            StepOutcome::Failure(message) => {
                log_step_failed!(row_id, step, message);
            }
            StepOutcome::Cancelled => {
                log_step_cancelled!(row_id, step);
            }
        }
        self.persist().await;
        Ok(outcome)
    }

    /// Run the full cascade for one row, stopping at the first failure or
    /// cancellation. Failed steps are never retried here; retry is a
    /// separate user action that re-invokes the step.
    pub async fn run_cascade(&self, row_id: &str) -> Result<(), PipelineError> {
        for step in StepKind::ALL {
            if !self.run_step(row_id, step).await?.is_success() {
                break;
            }
        }
        Ok(())
    }

    /// Process every pending row, `batch_size` at a time.
    pub async fn process_all(&self, opts: &BatchOptions) -> BatchReport {
        self.stop_requested.store(false, Ordering::SeqCst);

        let is_pending = |row: &Row| match opts.step {
            None => opts.force || row.status != RowStatus::Completed,
            Some(step) => opts.force || row.step_status(step) != StepStatus::Completed,
        };
        let pending: Vec<String> = {
            let store = self.store.lock().await;
            store
                .rows()
                .iter()
                .filter(|row| is_pending(row))
                .map(|row| row.id.clone())
                .collect()
        };

        let total = pending.len();
        log_batch_start!(total, opts.batch_size);

        let sem = Arc::new(Semaphore::new(opts.batch_size.max(1)));
        let mut tasks = FuturesUnordered::new();
        for row_id in pending {
            let sem = Arc::clone(&sem);
            tasks.push(async move {
                let _permit = match sem.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return RowRun::Skipped,
                };
                // Cooperative stop: rows not yet started are skipped.
                if self.stop_requested.load(Ordering::SeqCst) {
                    return RowRun::Skipped;
                }
                self.process_row(&row_id, opts).await
            });
        }

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut done = 0usize;
        while let Some(run) = tasks.next().await {
            match run {
                RowRun::Completed => completed += 1,
                RowRun::Failed => failed += 1,
                RowRun::Skipped => {}
            }
            done += 1;
            log_progress!(done, total, "rows");
        }

        let stopped = self.stop_requested.load(Ordering::SeqCst);
        if stopped {
            log_batch_stopped!(completed);
        } else {
            log_batch_complete!(completed, failed);
        }
        BatchReport {
            total,
            completed,
            failed,
            stopped,
        }
    }

    async fn process_row(&self, row_id: &str, opts: &BatchOptions) -> RowRun {
        let run = self.run_row(row_id, opts.step);
        match opts.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    // The dropped future never merged its outcome; fail
                    // the in-flight step explicitly so the row is not
                    // stuck in processing.
                    self.fail_in_flight(row_id, "TIMEOUT: the model took too long to respond")
                        .await;
                    RowRun::Failed
                }
            },
            None => run.await,
        }
    }

    async fn run_row(&self, row_id: &str, step: Option<StepKind>) -> RowRun {
        match step {
            Some(step) => match self.run_step(row_id, step).await {
                Ok(StepOutcome::Success { .. }) => RowRun::Completed,
                Ok(StepOutcome::Cancelled) => RowRun::Skipped,
                Ok(StepOutcome::Failure(_)) | Err(_) => RowRun::Failed,
            },
            None => match self.run_cascade(row_id).await {
                Err(_) => RowRun::Failed,
                Ok(()) => {
                    let store = self.store.lock().await;
                    match store.get(row_id) {
                        Some(row) if row.status == RowStatus::Completed => RowRun::Completed,
                        Some(row) if row.error.is_some() => RowRun::Failed,
                        _ => RowRun::Skipped,
                    }
                }
            },
        }
    }

    /// Flag the row's in-flight run for cancellation. The flag is
    /// observed after the external call resolves; compute already spent
    /// is not reclaimed.
    pub async fn request_cancel(&self, row_id: &str) -> bool {
        self.cancellations.cancel(row_id).await
    }

    /// Ask a running batch to stop launching new rows.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Flag every in-flight run and stop the batch.
    pub async fn stop_everything(&self) {
        self.request_stop();
        self.cancellations.cancel_all().await;
    }

    /// Emergency escape hatch: any step still marked processing is failed
    /// outright, whether or not its call ever returns.
    pub async fn force_reset(&self) {
        self.stop_everything().await;
        let ids: Vec<String> = {
            let store = self.store.lock().await;
            store
                .rows()
                .iter()
                .filter(|row| row.is_processing())
                .map(|row| row.id.clone())
                .collect()
        };
        for id in ids {
            self.fail_in_flight(&id, "forced reset").await;
        }
    }

    async fn fail_in_flight(&self, row_id: &str, message: &str) {
        self.cancellations.remove(row_id).await;
        {
            let mut store = self.store.lock().await;
            if let Some(row) = store.get(row_id).cloned() {
                let mut current = row;
                for step in StepKind::ALL {
                    if current.step_status(step) == StepStatus::Processing {
                        if let Ok(next) = state::fail_step(&current, step, message) {
                            log_step_failed!(row_id, step, message);
                            current = next;
                        }
                    }
                }
                store.replace(current);
            }
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(db) = &self.persistence else {
            return;
        };
        let rows = {
            let store = self.store.lock().await;
            store.rows().to_vec()
        };
        let result = match db.lock() {
            Ok(guard) => guard.save_rows(&rows),
            Err(_) => return,
        };
        if let Err(err) = result {
            log_warning!("failed to persist rows: {}", err);
        }
    }
}
