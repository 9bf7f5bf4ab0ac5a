//! Fixed-size worker pool.
//!
//! Workers are spawned once, named `worker-{id}`, and loop on the shared
//! [`TaskQueue`] until it is closed. Pool creation returns only after every
//! worker has started and is about to wait for its first task.
//!
//! ## Hand-off
//!
//! [`WorkerPool::submit`] takes the producer's slot by `&mut` and runs the
//! copy function on the producer's own thread before anything is queued. The
//! queued task owns the copied value outright, so the producer may overwrite
//! its slot as soon as `submit` returns. The borrow ends with the call, which
//! makes capturing the slot by reference impossible.

use super::queue::{PushError, TaskQueue};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

/// A unit of work: closure plus the argument it owns.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Failure of the producer-side copy step.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Nothing to hand off: the source slot was already emptied.
    #[error("source slot is empty")]
    Empty,
}

/// Failure to get a task onto the queue.
///
/// In every case the argument has been dropped by the time this is returned.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("handoff failed: {0}")]
    Handoff(#[from] HandoffError),
    #[error("worker pool is shut down")]
    Closed,
    #[error("cannot allocate queue slot")]
    Alloc,
}

impl<T> From<PushError<T>> for SubmitError {
    fn from(err: PushError<T>) -> Self {
        match err {
            PushError::Closed(_) => SubmitError::Closed,
            PushError::Alloc(_) => SubmitError::Alloc,
        }
    }
}

struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

/// Fixed set of worker threads sharing one task queue.
pub struct WorkerPool {
    queue: Arc<TaskQueue<Task>>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawn `size` workers over a queue bounded at `queue_capacity`
    /// (0 = unbounded).
    pub fn new(size: usize, queue_capacity: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool needs at least one worker",
            ));
        }

        let queue = Arc::new(TaskQueue::new(queue_capacity));
        let ready = Arc::new(Barrier::new(size + 1));
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let worker_queue = Arc::clone(&queue);
            let ready = Arc::clone(&ready);

            let spawned = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    ready.wait();
                    worker_loop(id, &worker_queue);
                });

            match spawned {
                Ok(handle) => workers.push(Worker { id, handle }),
                Err(e) => {
                    // Workers already spawned are parked on the barrier and
                    // can never be released; abandon them with the process.
                    queue.close();
                    return Err(e);
                }
            }
        }

        ready.wait();
        info!(workers = size, queue_capacity, "Worker pool started");

        Ok(Self { queue, workers })
    }

    /// Hand a value off to the pool.
    ///
    /// `copy` runs synchronously on the calling thread and produces the
    /// value the task will own; `work` later runs on exactly one worker with
    /// that value. When `copy` fails nothing is queued and the error is
    /// returned; the caller keeps whatever is left in `source`.
    pub fn submit<S, A, C, W>(&self, copy: C, work: W, source: &mut S) -> Result<(), SubmitError>
    where
        S: ?Sized,
        C: FnOnce(&mut S) -> Result<A, HandoffError>,
        W: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        let arg = copy(source)?;
        self.execute(move || work(arg))
    }

    /// Queue a self-contained closure.
    pub fn execute<F>(&self, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(f);
        self.queue.submit(task)?;
        Ok(())
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Close the queue, let workers drain it, and join them.
    #[cfg(test)]
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.queue.close();

        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() {
                error!(worker = worker.id, "Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn worker_loop(id: usize, queue: &TaskQueue<Task>) {
    debug!(worker = id, "Worker ready");

    while let Some(task) = queue.take() {
        // A panicking task must not shrink the pool
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(worker = id, "Task panicked");
        }
    }

    debug!(worker = id, "Worker exiting");
}
