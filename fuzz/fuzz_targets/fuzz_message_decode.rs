//! Fuzz target for peer message decoding.
//!
//! Decoding arbitrary bytes must never panic, and anything that decodes must
//! survive validation and re-encode to the same message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use murmur_p2p::{Message, MessageLimits};

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        let _ = message.validate(&MessageLimits::default());

        let encoded = message.encode();
        let decoded = Message::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(decoded, message);
    }
});
