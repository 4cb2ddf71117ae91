//! Deferred Task Dispatcher
//!
//! The runtime is single-threaded and cooperative: every notification, push
//! dispatch and bridge completion runs as a task on this queue, strictly
//! after the synchronous operation that scheduled it has returned. Bridges
//! running on other threads hand their completions back by posting here.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct DispatcherInner {
    queue: Mutex<VecDeque<Task>>,
    notify: Notify,
}

/// FIFO "next tick" queue shared by things and collections
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a task to run after the current operation
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.queue.lock().push_back(Box::new(task));
        self.inner.notify.notify_one();
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Run the oldest queued task, if any
    ///
    /// The queue lock is released before the task runs so tasks may post
    /// further tasks.
    pub fn run_one(&self) -> bool {
        let task = self.inner.queue.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drain the queue, including tasks posted while draining
    ///
    /// Returns the number of tasks executed.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.run_one() {
            count += 1;
        }
        count
    }

    /// Drain forever, sleeping until new tasks are posted
    pub async fn run(&self) {
        loop {
            let ran = self.run_until_idle();
            if ran > 0 {
                tracing::trace!("Dispatcher drained {} tasks", ran);
            }
            self.inner.notify.notified().await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}
