//! Bounded-concurrency dispatcher.
//!
//! One task is spawned per request item. A semaphore with `max_concurrent`
//! permits gates the predict call: the permit is taken before the call and
//! dropped when the task ends, whether it succeeded, failed or panicked.
//! Workers send their outcome over a channel to a single collector task,
//! which is the only owner of the [`ResultSet`].

use crate::error::ConfigError;
use crate::predictor::Predictor;
use crate::results::ResultSet;
use crate::types::{Prediction, RequestItem};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, warn};

/// What happened to one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Success(Prediction),
    Failure(ItemFailure),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success(_))
    }
}

/// An item that produced no prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position of the item in the submitted sequence.
    pub index: usize,
    pub id: Option<String>,
    pub reason: String,
}

/// Completed-item counter shared by all workers of one run.
#[derive(Debug)]
pub struct DispatchProgress {
    total: usize,
    interval: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl DispatchProgress {
    pub fn new(total: usize, interval: usize) -> Self {
        Self {
            total,
            interval,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Count one finished item and log every `interval` completions.
    pub fn record(&self, success: bool) -> usize {
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if self.interval > 0 && (done % self.interval == 0 || done == self.total) {
            info!(
                completed = done,
                total = self.total,
                failed = self.failed.load(Ordering::Relaxed),
                "Dispatch progress"
            );
        }
        done
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Successful predictions, in submission order.
    pub results: ResultSet,
    /// Failed items, sorted by index.
    pub failures: Vec<ItemFailure>,
    pub attempted: usize,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.len()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failures.iter().filter_map(|f| f.id.clone()).collect()
    }
}

/// Fans request items out to a [`Predictor`] under a concurrency ceiling.
pub struct Dispatcher {
    predictor: Arc<dyn Predictor>,
    max_concurrent: usize,
    progress_interval: usize,
}

impl Dispatcher {
    /// Create a dispatcher. A ceiling of zero could never make progress and is rejected.
    pub fn new(predictor: Arc<dyn Predictor>, max_concurrent: usize) -> Result<Self, ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                message: "max_concurrent must be at least 1".to_string(),
            });
        }
        Ok(Self {
            predictor,
            max_concurrent,
            progress_interval: 25,
        })
    }

    /// Log progress every `interval` completed items (0 disables).
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Predict every item and collect the outcomes.
    pub async fn run(&self, items: Vec<RequestItem>) -> DispatchReport {
        let progress = Arc::new(DispatchProgress::new(items.len(), self.progress_interval));
        self.run_with_progress(items, progress).await
    }

    /// Like [`Dispatcher::run`], reporting into a caller-owned progress counter.
    pub async fn run_with_progress(
        &self,
        items: Vec<RequestItem>,
        progress: Arc<DispatchProgress>,
    ) -> DispatchReport {
        let start = Instant::now();
        let attempted = items.len();
        let ids: Vec<Option<String>> = items.iter().map(|item| item.id.clone()).collect();

        info!(
            items = attempted,
            max_concurrent = self.max_concurrent,
            "Starting dispatch"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ItemOutcome)>();

        let collector = tokio::spawn(async move {
            let mut results = ResultSet::new();
            let mut failures = Vec::new();
            while let Some((index, outcome)) = rx.recv().await {
                match outcome {
                    ItemOutcome::Success(prediction) => {
                        let id = prediction.id.clone();
                        if let Err(e) = results.insert(prediction) {
                            warn!(index, id = %id, "Dropping second prediction for the same id");
                            failures.push(ItemFailure {
                                index,
                                id: Some(id),
                                reason: e.to_string(),
                            });
                        }
                    }
                    ItemOutcome::Failure(failure) => failures.push(failure),
                }
            }
            (results, failures)
        });

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(attempted);

        for (index, item) in items.into_iter().enumerate() {
            let sem = semaphore.clone();
            let predictor = self.predictor.clone();
            let progress = progress.clone();
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let label = item.label(index);
                let outcome = match sem.acquire_owned().await {
                    Ok(_permit) => match predictor.predict(&item).await {
                        Ok(prediction) => ItemOutcome::Success(prediction),
                        Err(e) => {
                            warn!(item = %label, error = %e, "Prediction failed");
                            ItemOutcome::Failure(ItemFailure {
                                index,
                                id: item.id.clone(),
                                reason: e.to_string(),
                            })
                        }
                    },
                    Err(_) => ItemOutcome::Failure(ItemFailure {
                        index,
                        id: item.id.clone(),
                        reason: "dispatcher semaphore closed".to_string(),
                    }),
                };
                progress.record(outcome.is_success());
                let _ = tx.send((index, outcome));
            });
            handles.push(handle);
        }
        drop(tx);

        let mut panicked = Vec::new();
        for (index, joined) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(e) = joined {
                let reason = panic_reason(e);
                error!(index, reason = %reason, "Prediction task aborted");
                progress.record(false);
                panicked.push(ItemFailure {
                    index,
                    id: ids[index].clone(),
                    reason,
                });
            }
        }

        let (mut results, mut failures) = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                error!(error = %e, "Result collector aborted; counting every item as failed");
                let failures = ids
                    .iter()
                    .enumerate()
                    .map(|(index, id)| ItemFailure {
                        index,
                        id: id.clone(),
                        reason: "result collector aborted".to_string(),
                    })
                    .collect();
                (ResultSet::new(), failures)
            }
        };
        failures.extend(panicked);
        failures.sort_by_key(|f| f.index);
        results.sort_by_order(ids.iter().filter_map(|id| id.as_deref()));

        info!(
            attempted,
            succeeded = results.len(),
            failed = failures.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch finished"
        );

        DispatchReport {
            results,
            failures,
            attempted,
        }
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", msg)
    } else {
        "task panicked".to_string()
    }
}
