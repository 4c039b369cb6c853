//! Fuzz target for channel frame decoding.
//!
//! Arbitrary bytes, with or without a length prefix, must never panic the
//! decoder.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_core::channel::protocol::{decode_frame, read_frame, DEFAULT_MAX_FRAME_SIZE};

fuzz_target!(|data: &[u8]| {
    let _ = decode_frame(data, DEFAULT_MAX_FRAME_SIZE);

    // Same bytes as a length-prefixed stream.
    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(_) => return,
    };
    runtime.block_on(async {
        let mut reader = data;
        while let Ok(Some(_)) = read_frame(&mut reader, 4096).await {}
    });
});
