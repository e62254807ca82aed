//! C ABI for Tapline decoder plugins.
//!
//! A decoder plugin is a shared object exporting two symbols:
//!
//! - `tapline_decoder_abi_version() -> i32`, compared against
//!   [`DECODER_ABI_VERSION`] before any decode symbol is resolved;
//! - one or more decode functions of type [`DecodeFn`].
//!
//! The host passes a read-only [`Envelope`] describing one Kafka message and
//! a [`DecodeOut`] whose `buf`/`cap` point at a host-owned output buffer.
//! The decoder fills `buf` and sets `len` on success, or reports one of the
//! non-OK kinds. All envelope pointers are views owned by the host and are
//! valid only for the duration of the call; bytes written to `buf` must stay
//! valid until the function returns (the host copies immediately).
//!
//! Return value protocol: `0` means "the result is in `out`", any non-zero
//! value means the plugin itself failed and `out` is not consulted.

#![warn(clippy::all)]

use std::ptr;

use libc::c_char;

/// Current plugin ABI version.
pub const DECODER_ABI_VERSION: i32 = 2;

/// Name of the exported version-check function.
pub const ABI_VERSION_SYMBOL: &str = "tapline_decoder_abi_version";

/// Decode result kinds (`DecodeOut::kind`).
pub const DECODE_OK: i32 = 0;
pub const DECODE_ERR: i32 = 1;
pub const DECODE_NEED_MORE: i32 = 2;
pub const DECODE_SKIP: i32 = 3;

/// Capacity of the error-message region inside [`DecodeOut`], terminator
/// included.
pub const ERR_MSG_CAP: usize = 256;

/// Borrowed byte range. `data` may be null when `len` is 0.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ByteView {
    pub data: *const u8,
    pub len: usize,
}

impl ByteView {
    pub const fn empty() -> Self {
        Self {
            data: ptr::null(),
            len: 0,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// # Safety
    ///
    /// `data` must point at `len` readable bytes that outlive `'a`, or be
    /// null with `len == 0`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.data.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.data, self.len)
        }
    }
}

/// Borrowed string range. Not necessarily NUL-terminated.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct StrView {
    pub data: *const c_char,
    pub len: usize,
}

impl StrView {
    pub const fn empty() -> Self {
        Self {
            data: ptr::null(),
            len: 0,
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self {
            data: s.as_ptr() as *const c_char,
            len: s.len(),
        }
    }

    /// # Safety
    ///
    /// Same contract as [`ByteView::as_slice`].
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.data.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.data as *const u8, self.len)
        }
    }

    /// # Safety
    ///
    /// Same contract as [`ByteView::as_slice`].
    pub unsafe fn as_str<'a>(&self) -> Option<&'a str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }
}

/// Read-only view of one Kafka message, as handed to a decoder.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Envelope {
    pub topic: StrView,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in milliseconds, -1 when unavailable.
    pub timestamp_ms: i64,
    pub key: ByteView,
    pub payload: ByteView,
}

/// Decode output. The host provides `buf`/`cap`; the decoder fills the rest.
///
/// - `DECODE_OK`: `buf[0..len]` holds the decoded bytes (`len <= cap`).
/// - `DECODE_ERR`: `err_msg` holds a NUL-terminated message.
/// - `DECODE_NEED_MORE`: `need` holds the required buffer size.
/// - `DECODE_SKIP`: the message carries nothing for the host.
#[repr(C)]
pub struct DecodeOut {
    pub kind: i32,
    pub buf: *mut u8,
    pub cap: usize,
    pub len: usize,
    pub need: usize,
    pub err_msg: [u8; ERR_MSG_CAP],
}

impl DecodeOut {
    /// A zeroed result pointing at a host-owned output buffer.
    pub fn with_buffer(buf: &mut [u8]) -> Self {
        Self {
            kind: DECODE_OK,
            buf: buf.as_mut_ptr(),
            cap: buf.len(),
            len: 0,
            need: 0,
            err_msg: [0; ERR_MSG_CAP],
        }
    }

    /// Copy `bytes` into the output buffer, or flag `DECODE_NEED_MORE` when
    /// the buffer is too small.
    pub fn set_ok(&mut self, bytes: &[u8]) {
        if bytes.len() > self.cap || (self.buf.is_null() && !bytes.is_empty()) {
            self.kind = DECODE_NEED_MORE;
            self.need = bytes.len();
            self.len = 0;
            return;
        }
        if !bytes.is_empty() {
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.buf, bytes.len()) };
        }
        self.kind = DECODE_OK;
        self.len = bytes.len();
        self.need = 0;
    }

    /// Report `DECODE_ERR` with a truncated, NUL-terminated message.
    pub fn set_error(&mut self, msg: &str) {
        let n = msg.len().min(ERR_MSG_CAP - 1);
        self.err_msg[..n].copy_from_slice(&msg.as_bytes()[..n]);
        self.err_msg[n] = 0;
        self.kind = DECODE_ERR;
        self.len = 0;
    }

    /// The error-message bytes up to (excluding) the terminator.
    pub fn err_msg_bytes(&self) -> &[u8] {
        let end = self
            .err_msg
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ERR_MSG_CAP);
        &self.err_msg[..end]
    }
}

/// Decode entry point exported by plugins.
///
/// Returns 0 when `out` holds the result; non-zero on plugin-internal
/// failure.
pub type DecodeFn = unsafe extern "C" fn(env: *const Envelope, out: *mut DecodeOut) -> i32;

/// Type of the exported ABI-version function.
pub type AbiVersionFn = unsafe extern "C" fn() -> i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ok_copies_into_buffer() {
        let mut buf = [0u8; 8];
        let mut out = DecodeOut::with_buffer(&mut buf);
        out.set_ok(b"abc");
        assert_eq!(out.kind, DECODE_OK);
        assert_eq!(out.len, 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_set_ok_flags_need_more() {
        let mut buf = [0u8; 2];
        let mut out = DecodeOut::with_buffer(&mut buf);
        out.set_ok(b"abcdef");
        assert_eq!(out.kind, DECODE_NEED_MORE);
        assert_eq!(out.need, 6);
        assert_eq!(out.len, 0);
    }

    #[test]
    fn test_set_error_truncates_and_terminates() {
        let mut buf = [0u8; 4];
        let mut out = DecodeOut::with_buffer(&mut buf);
        let long = "x".repeat(2 * ERR_MSG_CAP);
        out.set_error(&long);
        assert_eq!(out.kind, DECODE_ERR);
        assert_eq!(out.err_msg_bytes().len(), ERR_MSG_CAP - 1);
        assert_eq!(out.err_msg[ERR_MSG_CAP - 1], 0);
    }

    #[test]
    fn test_views_round_trip() {
        let payload = b"payload".to_vec();
        let view = ByteView::from_slice(&payload);
        assert_eq!(unsafe { view.as_slice() }, b"payload");

        let topic = "quotes";
        let sv = StrView::from_str(topic);
        assert_eq!(unsafe { sv.as_str() }, Some("quotes"));
        assert_eq!(unsafe { StrView::empty().as_bytes() }, b"");
    }
}
