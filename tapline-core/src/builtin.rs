//! Decoders shipped inside the core, bindable without a shared object.

use tapline_abi::{DecodeOut, Envelope};

/// Name under which [`passthrough_decode`] is registered.
pub const PASSTHROUGH: &str = "passthrough";

/// Copies the message payload through unchanged.
///
/// Reports `DECODE_NEED_MORE` when the caller buffer is smaller than the
/// payload.
///
/// # Safety
///
/// `env` and `out` must satisfy the plugin ABI contract: valid for the
/// duration of the call, with `out.buf` pointing at `out.cap` writable
/// bytes.
pub unsafe extern "C" fn passthrough_decode(env: *const Envelope, out: *mut DecodeOut) -> i32 {
    if env.is_null() || out.is_null() {
        return -1;
    }
    let env = &*env;
    let out = &mut *out;

    out.set_ok(env.payload.as_slice());
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapline_abi::{ByteView, StrView, DECODE_NEED_MORE, DECODE_OK};

    fn envelope(payload: &[u8]) -> Envelope {
        Envelope {
            topic: StrView::from_str("t1"),
            partition: 0,
            offset: 0,
            timestamp_ms: -1,
            key: ByteView::empty(),
            payload: ByteView::from_slice(payload),
        }
    }

    #[test]
    fn test_passthrough_copies_payload() {
        let env = envelope(b"hello");
        let mut buf = [0u8; 16];
        let mut out = DecodeOut::with_buffer(&mut buf);

        let rc = unsafe { passthrough_decode(&env, &mut out) };
        assert_eq!(rc, 0);
        assert_eq!(out.kind, DECODE_OK);
        assert_eq!(&buf[..out.len], b"hello");
    }

    #[test]
    fn test_passthrough_reports_short_buffer() {
        let env = envelope(b"0123456789");
        let mut buf = [0u8; 4];
        let mut out = DecodeOut::with_buffer(&mut buf);

        let rc = unsafe { passthrough_decode(&env, &mut out) };
        assert_eq!(rc, 0);
        assert_eq!(out.kind, DECODE_NEED_MORE);
        assert_eq!(out.need, 10);
    }

    #[test]
    fn test_passthrough_rejects_null_args() {
        let rc = unsafe { passthrough_decode(std::ptr::null(), std::ptr::null_mut()) };
        assert_eq!(rc, -1);
    }
}
