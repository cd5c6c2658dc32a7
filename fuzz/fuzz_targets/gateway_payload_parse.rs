#![no_main]

use discollama_discord_runtime::{decode_gateway_payload, SurfaceError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    match decode_gateway_payload(&raw) {
        Ok(payload) => assert!(!payload.d.to_string().is_empty()),
        Err(SurfaceError::Gateway(message)) => assert!(!message.is_empty()),
        Err(other) => panic!("unexpected gateway decode error variant: {other}"),
    }
});
