//! Host-facing decoded events.

use std::fmt;

/// Capacity of [`ErrorMsg`], NUL terminator included. Matches the fixed
/// error region plugins see, so the event can be re-exported over a C
/// boundary without reshaping.
pub const ERROR_MSG_CAP: usize = 96;

/// One decoded (or failed) Kafka message.
#[derive(Debug, Clone)]
pub struct Event {
    /// Originating topic.
    pub topic: String,
    /// Message key bytes, empty when the message had none.
    pub key: Vec<u8>,
    /// Broker timestamp in nanoseconds, 0 when unavailable.
    pub ingest_ns: i64,
    /// Name of the decoder that produced this event, empty when none ran.
    pub decoder: String,
    pub payload: EventPayload,
}

/// Success or failure payload of an [`Event`].
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// Decoded bytes, owned by the event.
    Data(Vec<u8>),
    /// Decode failure description.
    Error(ErrorMsg),
}

impl Event {
    pub fn is_error(&self) -> bool {
        matches!(self.payload, EventPayload::Error(_))
    }

    /// Decoded bytes for Data events.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.payload {
            EventPayload::Data(bytes) => Some(bytes),
            EventPayload::Error(_) => None,
        }
    }

    /// Error message for Error events.
    pub fn error_message(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Data(_) => None,
            EventPayload::Error(msg) => Some(msg.as_str()),
        }
    }
}

/// Fixed-capacity NUL-terminated error message.
///
/// Holds at most [`ERROR_MSG_CAP`]` - 1` bytes of UTF-8; longer input is cut
/// at the last character boundary that fits.
#[derive(Clone, Copy)]
pub struct ErrorMsg {
    buf: [u8; ERROR_MSG_CAP],
}

impl ErrorMsg {
    pub fn new(msg: &str) -> Self {
        let mut end = msg.len().min(ERROR_MSG_CAP - 1);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = [0u8; ERROR_MSG_CAP];
        buf[..end].copy_from_slice(&msg.as_bytes()[..end]);
        Self { buf }
    }

    /// Build from raw plugin bytes; invalid UTF-8 is replaced.
    pub fn from_raw(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::new(s),
            Err(_) => Self::new(&String::from_utf8_lossy(bytes)),
        }
    }

    pub fn as_str(&self) -> &str {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ERROR_MSG_CAP);
        std::str::from_utf8(&self.buf[..end]).unwrap_or("")
    }

    /// The full backing buffer, terminator included.
    pub fn as_bytes(&self) -> &[u8; ERROR_MSG_CAP] {
        &self.buf
    }
}

impl fmt::Debug for ErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorMsg").field(&self.as_str()).finish()
    }
}

impl fmt::Display for ErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for ErrorMsg {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ErrorMsg {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
