#![no_main]

use discollama_ai::{decode_fragment_line, GenerationError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match decode_fragment_line(data) {
        Ok(Some(fragment)) => {
            if fragment.context.is_some() {
                assert!(!String::from_utf8_lossy(data).trim().is_empty());
            }
        }
        Ok(None) => {
            let text = std::str::from_utf8(data).expect("blank lines are valid utf-8");
            assert!(text.trim().is_empty());
        }
        Err(GenerationError::InvalidResponse(message)) => assert!(!message.is_empty()),
        Err(GenerationError::Backend(_)) => {}
        Err(other) => panic!("unexpected decode error variant: {other}"),
    }
});
