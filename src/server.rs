//! TCP server: listener setup, accept loop, and the per-connection handler.
//!
//! A single acceptor thread owns the listening socket. Every accepted stream
//! lands in one reusable slot and is handed off to the worker pool; a worker
//! reads one request buffer, writes one response, and closes the stream.

use crate::config::Config;
use crate::response::Responder;
use crate::runtime::{take_handle, Connection, WorkerPool};
use chrono::{Local, NaiveDateTime};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Pause before retrying `accept` after running out of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Startup failures. None of these are retried.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to start worker pool: {0}")]
    Pool(#[source] io::Error),
}

/// Everything a worker needs to answer a connection.
///
/// Built once at startup and shared read-only by all workers.
pub struct HandlerContext {
    /// Maximum bytes read from a client.
    pub buffer_size: usize,
    /// Socket read/write timeout; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    pub responder: Box<dyn Responder>,
    /// Source of the time passed to the responder.
    pub clock: fn() -> NaiveDateTime,
}

impl HandlerContext {
    pub fn new(config: &Config, responder: impl Responder) -> Self {
        Self {
            buffer_size: config.buffer_size,
            io_timeout: config.io_timeout,
            responder: Box::new(responder),
            clock: local_now,
        }
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// How a handled connection ended. The handle is closed in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Response fully written.
    Responded { read: usize, written: usize },
    /// Reading the request failed; nothing was written.
    ReadFailed,
    /// Writing the response failed part-way.
    WriteFailed,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    pool: WorkerPool,
    context: Arc<HandlerContext>,
}

impl Server {
    /// Bind the listening socket and start the worker pool.
    pub fn bind(config: &Config, context: HandlerContext) -> Result<Self, ServerError> {
        let listener = create_listener(config.listen_addr(), config.backlog)?;

        let pool = WorkerPool::new(config.worker_count(), config.queue_capacity)
            .map_err(ServerError::Pool)?;

        Ok(Server {
            listener,
            pool,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, handing each to the worker pool.
    pub fn run(&self) -> ! {
        info!(
            address = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            workers = self.pool.size(),
            pid = std::process::id(),
            "Server listening"
        );

        let mut slot: Option<TcpStream>;

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(
                        peer = %peer,
                        fd = Connection::fd(&stream),
                        pending = self.pool.pending(),
                        "Client accepted"
                    );
                    slot = Some(stream);
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    if is_resource_exhaustion(&e) {
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                    continue;
                }
            }

            let context = Arc::clone(&self.context);
            let submitted = self.pool.submit(
                take_handle,
                move |stream: TcpStream| serve(stream, &context),
                &mut slot,
            );

            if let Err(e) = submitted {
                warn!(error = %e, "Dropping connection");
                // A failed copy step leaves the stream in the slot
                drop(slot.take());
            }
        }
    }
}

/// Accept failures that persist until descriptors or memory free up.
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

/// Worker entry point for a real socket.
fn serve(stream: TcpStream, context: &HandlerContext) {
    if let Some(timeout) = context.io_timeout {
        let applied = stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)));
        if let Err(e) = applied {
            warn!(fd = Connection::fd(&stream), error = %e, "Failed to set socket timeout");
        }
    }

    if let Outcome::Responded { read, written } = handle_connection(stream, context) {
        trace!(read, written, "Connection served");
    }
}

/// Read one request, write one response, close the connection.
///
/// The handle is consumed and closed exactly once on every path. Close
/// errors are logged, never returned.
pub fn handle_connection<C: Connection>(mut conn: C, context: &HandlerContext) -> Outcome {
    let fd = conn.fd();
    let mut request = vec![0u8; context.buffer_size];

    let read = match read_request(&mut conn, &mut request) {
        Ok(n) => n,
        Err(e) => {
            warn!(fd, error = %e, "Failed to read from socket");
            close(conn);
            return Outcome::ReadFailed;
        }
    };
    trace!(fd, bytes = read, request = %String::from_utf8_lossy(&request[..read]), "Request");

    let response = context.responder.build_response((context.clock)());

    // write_all retries short writes until done or the socket errors
    if let Err(e) = conn.write_all(&response).and_then(|()| conn.flush()) {
        warn!(fd, error = %e, "Failed to write response");
        close(conn);
        return Outcome::WriteFailed;
    }

    close(conn);
    Outcome::Responded {
        read,
        written: response.len(),
    }
}

/// Single read into `buf`; whatever does not fit is ignored.
fn read_request<C: Connection>(conn: &mut C, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match conn.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn close<C: Connection>(conn: C) {
    let fd = conn.fd();
    let current = thread::current();
    let worker = current.name().unwrap_or("unnamed");

    match conn.close() {
        Ok(()) => debug!(worker, fd, "Socket closed"),
        Err(e) => warn!(worker, fd, error = %e, "Error closing socket"),
    }
}

/// Create the listening socket: IPv4, address reuse, fixed backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ServerError> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(ServerError::Socket)?;

    socket.set_reuse_address(true).map_err(ServerError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket.listen(backlog).map_err(ServerError::Listen)?;

    Ok(socket.into())
}
