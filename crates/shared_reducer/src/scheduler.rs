//! Deferred execution for outgoing flushes.
//!
//! A flush is deferred so that every dispatch made during the current turn
//! lands in a single outgoing message.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::runtime::{Handle, RuntimeFlavor};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks after the current synchronous work has finished.
pub trait Scheduler: Send + Sync {
    /// Queues `task` to run later.
    fn defer(&self, task: Task);
}

/// Defers onto a current-thread tokio runtime.
///
/// The spawned task yields once before running, so it lands behind work the
/// runtime has already queued. Only a current-thread runtime gives a turn
/// boundary: on a multi-thread runtime another worker could pick the task up
/// while the caller is still dispatching, so those runtimes are refused.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Creates a scheduler on the given runtime.
    ///
    /// Fails with [`SyncError::Config`] unless the runtime is
    /// current-thread.
    pub fn new(handle: Handle) -> SyncResult<Self> {
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Ok(Self { handle }),
            flavor => Err(SyncError::Config(format!(
                "a current-thread tokio runtime is required, found {:?}",
                flavor
            ))),
        }
    }

    /// Creates a scheduler on the runtime of the calling context.
    pub fn current() -> SyncResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| SyncError::Config(format!("no tokio runtime available: {e}")))?;
        Self::new(handle)
    }

    /// The runtime tasks are spawned on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        self.handle.spawn(async move {
            tokio::task::yield_now().await;
            task();
        });
    }
}

/// Holds tasks until [`ManualScheduler::run_pending`] is called.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs queued tasks in order, including any they queue, and returns
    /// how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Lock released before running so tasks may defer more work.
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}
