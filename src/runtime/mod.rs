//! Threaded runtime for connection handling.
//!
//! Blocking I/O on OS threads:
//! - `TaskQueue`: closable MPMC queue shared by producers and workers
//! - `WorkerPool`: fixed set of worker threads plus the hand-off `submit`
//! - `Connection`: owned client handle with an observable close

mod connection;
mod pool;
mod queue;

pub use connection::{take_handle, Connection};
pub use pool::WorkerPool;
