//! Response payloads.
//!
//! The server never parses requests; every connection gets the same kind of
//! answer, built from the time the worker started handling it.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;

/// Timestamp layout: `YYYY-MM-DD HH:MM:SS`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const HEADER: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/html\r\n\
Connection: close\r\n\
\r\n";

const BODY_OPEN: &[u8] = b"<html><body><h1>The current time is:</h1>";
const BODY_CLOSE: &[u8] = b"</body></html>";

/// Builds the bytes written back to a client.
///
/// Implementations must be pure with respect to `now`; the handler supplies
/// the time so tests can pin it.
pub trait Responder: Send + Sync + 'static {
    fn build_response(&self, now: NaiveDateTime) -> Bytes;
}

/// Minimal HTML page announcing the current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimePage;

impl Responder for TimePage {
    fn build_response(&self, now: NaiveDateTime) -> Bytes {
        let time = now.format(TIME_FORMAT).to_string();

        let mut buf =
            BytesMut::with_capacity(HEADER.len() + BODY_OPEN.len() + time.len() + BODY_CLOSE.len());
        buf.put_slice(HEADER);
        buf.put_slice(BODY_OPEN);
        buf.put_slice(time.as_bytes());
        buf.put_slice(BODY_CLOSE);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_time_page_exact_bytes() {
        let response = TimePage.build_response(at(2024, 8, 19, 9, 5, 3));

        let expected = "HTTP/1.1 200 OK\r\n\
                        Content-Type: text/html\r\n\
                        Connection: close\r\n\
                        \r\n\
                        <html><body><h1>The current time is:</h1>\
                        2024-08-19 09:05:03\
                        </body></html>";
        assert_eq!(&response[..], expected.as_bytes());
    }

    #[test]
    fn test_time_is_zero_padded() {
        let response = TimePage.build_response(at(7, 1, 2, 3, 4, 5));
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.contains("<h1>The current time is:</h1>0007-01-02 03:04:05</body>"));
    }

    #[test]
    fn test_end_of_day() {
        let response = TimePage.build_response(at(1999, 12, 31, 23, 59, 59));
        assert!(response.ends_with(b"1999-12-31 23:59:59</body></html>"));
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }
}
