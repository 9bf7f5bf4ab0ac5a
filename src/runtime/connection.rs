//! Connection handles.
//!
//! A handle has exactly one owner at a time: the acceptor's slot until the
//! hand-off, then a single worker. [`Connection::close`] consumes the handle,
//! so a second close does not type-check.

use super::pool::HandoffError;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::time::{Duration, Instant};

/// Total time a closing socket waits for the peer to finish sending.
const LINGER_TIMEOUT: Duration = Duration::from_millis(200);

/// Upper bound on bytes discarded while lingering.
const LINGER_MAX_BYTES: usize = 64 * 1024;

/// An accepted client connection.
pub trait Connection: Read + Write + Send + 'static {
    /// Descriptor used to identify the connection in logs.
    fn fd(&self) -> RawFd;

    /// Release the handle, reporting any error from the final close.
    fn close(self) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn fd(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn close(self) -> io::Result<()> {
        // Send FIN after the response, then swallow whatever the client is
        // still sending. Closing with unread input makes the kernel answer
        // with RST, which can discard the response on the client side.
        if self.shutdown(Shutdown::Write).is_ok() {
            drain(&self);
        }

        let fd = self.into_raw_fd();
        // SAFETY: `into_raw_fd` transferred ownership of `fd` to us and
        // nothing else refers to it.
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

// Bounded by LINGER_TIMEOUT overall, not per read: each read only gets the
// time left before the deadline.
fn drain(mut stream: &TcpStream) {
    let deadline = Instant::now() + LINGER_TIMEOUT;
    let mut scratch = [0u8; 4096];
    let mut discarded = 0;

    while discarded < LINGER_MAX_BYTES {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }

        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(n) => discarded += n,
        }
    }
}

/// Hand-off copy step for the acceptor's slot: moves the handle out, leaving
/// the slot empty, so ownership transfers exactly once.
pub fn take_handle<C>(slot: &mut Option<C>) -> Result<C, HandoffError> {
    slot.take().ok_or(HandoffError::Empty)
}
