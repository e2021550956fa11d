//! Background task runner for reclaim, compaction and pool refill.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread fed by a channel.
///
/// Tasks run one at a time in submission order. Tasks hold a weak reference
/// to whatever they act on, so a pending task never keeps a stopped journal
/// alive.
#[derive(Debug)]
pub(crate) struct JournalExecutor {
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
}

impl JournalExecutor {
    /// Starts the worker thread.
    pub fn start(name: &str) -> Self {
        let (sender, receiver) = channel::unbounded::<Task>();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in receiver {
                    task();
                }
            });
        match spawned {
            Ok(handle) => Self {
                worker_id: Some(handle.thread().id()),
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(handle)),
            },
            Err(e) => {
                tracing::warn!(error = %e, "could not start journal executor, running tasks inline");
                Self {
                    sender: Mutex::new(None),
                    worker: Mutex::new(None),
                    worker_id: None,
                }
            }
        }
    }

    /// Queues `task`. Returns false if the executor is shut down.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Returns true when called from the worker thread.
    pub fn is_worker(&self) -> bool {
        self.worker_id == Some(thread::current().id())
    }

    /// Stops accepting tasks and waits for queued ones to finish.
    ///
    /// When called from a task on the worker itself, the worker is detached
    /// instead of joined.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if self.is_worker() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("journal executor task panicked");
            }
        }
    }

    /// Blocks until every task queued before this call has run.
    pub fn flush(&self) {
        if self.is_worker() {
            return;
        }
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        if self.execute(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for JournalExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
