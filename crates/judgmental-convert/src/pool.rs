//! Worker pools the batch dispatcher submits conversion units to.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

pub type Unit<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
pub type Completion<T> = Box<dyn FnOnce(T) + Send + 'static>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is closed to new work")]
    Closed,
}

/// Submit / complete-callback / wait-all contract shared by every scheduling
/// strategy.
///
/// Completion callbacks may run in any order and, for parallel pools, on any
/// thread.
#[async_trait]
pub trait WorkerPool<T: Send + 'static>: Send {
    fn is_parallel(&self) -> bool;

    async fn submit(&mut self, unit: Unit<T>, on_complete: Completion<T>) -> Result<(), PoolError>;

    /// Stops accepting work. Already submitted units still run.
    fn close(&mut self);

    /// Waits until every submitted unit has finished. Returns how many units
    /// or callbacks panicked instead of completing.
    async fn join(&mut self) -> usize;
}

/// Runs units concurrently on the tokio runtime, at most `workers` at a time.
#[derive(Debug)]
pub struct ParallelPool {
    tasks: JoinSet<()>,
    permits: Arc<Semaphore>,
    closed: bool,
}

impl ParallelPool {
    pub fn new(workers: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            closed: false,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> WorkerPool<T> for ParallelPool {
    fn is_parallel(&self) -> bool {
        true
    }

    async fn submit(&mut self, unit: Unit<T>, on_complete: Completion<T>) -> Result<(), PoolError> {
        if self.closed {
            return Err(PoolError::Closed);
        }
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let outcome = unit.await;
            on_complete(outcome);
        });
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    async fn join(&mut self) -> usize {
        let mut faulted = 0;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "worker task did not complete");
                faulted += 1;
            }
        }
        faulted
    }
}

/// Runs each unit to completion inside `submit`; `join` has nothing to wait for.
/// A panicking unit or callback is counted as faulted, as with [`ParallelPool`].
#[derive(Debug, Default)]
pub struct InlinePool {
    closed: bool,
    faulted: usize,
}

impl InlinePool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T: Send + 'static> WorkerPool<T> for InlinePool {
    fn is_parallel(&self) -> bool {
        false
    }

    async fn submit(&mut self, unit: Unit<T>, on_complete: Completion<T>) -> Result<(), PoolError> {
        if self.closed {
            return Err(PoolError::Closed);
        }
        let outcome = match AssertUnwindSafe(unit).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("worker unit panicked");
                self.faulted += 1;
                return Ok(());
            }
        };
        if catch_unwind(AssertUnwindSafe(move || on_complete(outcome))).is_err() {
            error!("completion handler panicked");
            self.faulted += 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    async fn join(&mut self) -> usize {
        std::mem::take(&mut self.faulted)
    }
}
