//! Fuzz target for inbound frame decoding
//!
//! Feeds arbitrary text through every decoder that sees server input:
//! server messages, client commands and channel identifiers.
//!
//! The decoders should NEVER panic. All invalid inputs return an error.

#![no_main]

use cablecast_proto::{ChannelIdentifier, Frame, ServerMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let frame = Frame::new(text);
    if let Ok(message) = frame.to_message()
        && let Some(identifier) = message.identifier()
    {
        let _ = ChannelIdentifier::parse(identifier);
    }
    let _ = frame.to_command();
    let _ = ServerMessage::from_json(text);
    let _ = ChannelIdentifier::parse(text);
});
