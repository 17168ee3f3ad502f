// Work scheduling for per-file download tasks
//
// Two implementations share the WorkExecutor contract:
// - BoundedPool: tokio tasks, at most `size` running at once
// - InlineExecutor: runs each task to completion inside spawn()
//
// Both leave the same results behind; only timing and log interleaving differ.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Schedules units of work and waits for them
#[async_trait]
pub trait WorkExecutor: Send {
    /// Schedule a task
    async fn spawn(&mut self, task: Task);

    /// Block until every task spawned so far has completed
    async fn join(&mut self);

    /// Short name for logging
    fn name(&self) -> &'static str;
}

pub struct BoundedPool {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl BoundedPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            tasks: JoinSet::new(),
        }
    }
}

#[async_trait]
impl WorkExecutor for BoundedPool {
    async fn spawn(&mut self, task: Task) {
        let semaphore = self.semaphore.clone();
        self.tasks.spawn(async move {
            // The semaphore is owned by the pool and never closed
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            task.await;
        });
    }

    async fn join(&mut self) {
        debug!("Waiting for {} tasks", self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Download task failed: {}", e);
            }
        }
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

/// Runs every task immediately on the caller's task
#[derive(Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkExecutor for InlineExecutor {
    async fn spawn(&mut self, task: Task) {
        task.await;
    }

    async fn join(&mut self) {}

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Factory for creating executors
pub struct ExecutorFactory;

impl ExecutorFactory {
    /// One worker or fewer runs inline, anything above gets a bounded pool
    pub fn create(workers: usize) -> Box<dyn WorkExecutor> {
        if workers <= 1 {
            Box::new(InlineExecutor::new())
        } else {
            Box::new(BoundedPool::new(workers))
        }
    }
}
