//! Single-worker task queue.
//!
//! All operations on one storage run on one named thread, in the order they
//! were enqueued. The worker exclusively owns the state `S`, so tasks need no
//! locking among themselves.
//!
//! A queue accepts tasks from the moment it is created; they are buffered
//! until [`TaskQueue::start`] hands the state to the worker. This lets the
//! owner subscribe to outside notifications before the state is final
//! without losing any of them.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A serial executor owning state `S`.
pub struct TaskQueue<S: Send + 'static> {
    name: String,
    sender: Mutex<Option<Sender<Task<S>>>>,
    /// Present until the worker starts.
    inbox: Mutex<Option<Receiver<Task<S>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> TaskQueue<S> {
    /// Creates a queue that buffers tasks until started.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, inbox) = mpsc::channel();
        Self {
            name: name.into(),
            sender: Mutex::new(Some(sender)),
            inbox: Mutex::new(Some(inbox)),
            worker: Mutex::new(None),
        }
    }

    /// Creates a queue and starts it immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(name: impl Into<String>, state: S) -> CoreResult<Self> {
        let queue = Self::new(name);
        queue.start(state)?;
        Ok(queue)
    }

    /// Starts the worker with `state`. Buffered tasks run first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue was already started or the worker
    /// thread cannot be spawned.
    pub fn start(&self, state: S) -> CoreResult<()> {
        let inbox = self
            .inbox
            .lock()
            .take()
            .ok_or_else(|| CoreError::queue(format!("{} already started", self.name)))?;

        let name = self.name.clone();
        let worker = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(&name, state, inbox))?;
        *self.worker.lock() = Some(worker);
        Ok(())
    }

    /// Returns the worker thread's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a task and returns immediately.
    ///
    /// Returns `false` if the queue is closed; the task is dropped.
    pub fn enqueue<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Enqueues a task and blocks until it has run.
    ///
    /// Every task enqueued before it runs first. Returns `None` if the queue
    /// is closed or the task panicked. Must not be called from a task.
    pub fn sync<R, F>(&self, task: F) -> Option<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        let sent = self.enqueue(move |state| {
            // the caller may have stopped waiting
            let _ = reply.send(task(state));
        });
        if !sent {
            return None;
        }
        result.recv().ok()
    }

    /// Stops accepting tasks, runs everything already enqueued, and joins
    /// the worker.
    pub fn drain_and_close(&self) {
        self.sender.lock().take();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // closed from one of its own tasks; the worker exits on its own
            return;
        }
        if worker.join().is_err() {
            error!(queue = %self.name, "worker thread panicked");
        }
    }

    /// Returns whether the queue still accepts tasks.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl<S: Send + 'static> Drop for TaskQueue<S> {
    fn drop(&mut self) {
        self.drain_and_close();
    }
}

impl<S: Send + 'static> std::fmt::Debug for TaskQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn run<S>(name: &str, mut state: S, inbox: Receiver<Task<S>>) {
    debug!(queue = %name, "worker started");
    for task in inbox {
        if panic::catch_unwind(AssertUnwindSafe(|| task(&mut state))).is_err() {
            error!(queue = %name, "task panicked");
        }
    }
    debug!(queue = %name, "worker stopped");
}
