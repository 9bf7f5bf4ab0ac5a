//! webtime-server: a thread-pooled TCP time server
//!
//! Every connection gets one read, one HTML page with the current local
//! time, and a close.
//!
//! Features:
//! - Single acceptor thread feeding a fixed pool of workers
//! - Listening port from a key/value properties file
//! - Tuning via CLI arguments or TOML file

mod config;
mod properties;
mod response;
mod runtime;
mod server;

use config::Config;
use response::TimePage;
use server::{HandlerContext, Server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!(
        port = config.port,
        workers = config.worker_count(),
        queue_capacity = config.queue_capacity,
        buffer_size = config.buffer_size,
        io_timeout = ?config.io_timeout,
        "Starting webtime-server"
    );

    ignore_sigpipe();

    let context = HandlerContext::new(&config, TimePage);
    let server = match Server::bind(&config, context) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            return Err(e.into());
        }
    };

    server.run()
}

/// Writes to a peer that already hung up must fail with EPIPE instead of
/// killing the process.
fn ignore_sigpipe() {
    // SAFETY: installing SIG_IGN has no handler code to race with.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
