//! Reference decoder plugin: copies the message payload through unchanged.
//!
//! Build as a cdylib and bind with symbol `tapline_passthrough`:
//!
//! ```text
//! core.bind_topic("t1", "target/release/libtapline_passthrough.so", "tapline_passthrough")
//! ```

use tapline_abi::{DecodeOut, Envelope, DECODER_ABI_VERSION};

/// ABI handshake checked by the host before resolving decode symbols.
#[no_mangle]
pub extern "C" fn tapline_decoder_abi_version() -> i32 {
    DECODER_ABI_VERSION
}

/// Payload passthrough decoder.
///
/// # Safety
///
/// Called by the host with pointers satisfying the plugin ABI contract.
#[no_mangle]
pub unsafe extern "C" fn tapline_passthrough(env: *const Envelope, out: *mut DecodeOut) -> i32 {
    if env.is_null() || out.is_null() {
        return -1;
    }
    let env = &*env;
    let out = &mut *out;

    out.set_ok(env.payload.as_slice());
    0
}
