//! Exact wire text of the frames a Rails ActionCable server expects.

use cablecast_proto::{ChannelIdentifier, Command, Frame, Params, ServerMessage};
use serde_json::json;

fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn room() -> ChannelIdentifier {
    ChannelIdentifier::new("ChatChannel", params(json!({ "room_id": "sports-room" }))).unwrap()
}

#[test]
fn subscribe_frame() {
    let frame = Frame::from_command(&Command::subscribe(&room())).unwrap();
    insta::assert_snapshot!(
        frame.as_str(),
        @r#"{"command":"subscribe","identifier":"{\"channel\":\"ChatChannel\",\"room_id\":\"sports-room\"}"}"#
    );
}

#[test]
fn unsubscribe_frame() {
    let frame = Frame::from_command(&Command::unsubscribe(&room())).unwrap();
    insta::assert_snapshot!(
        frame.as_str(),
        @r#"{"command":"unsubscribe","identifier":"{\"channel\":\"ChatChannel\",\"room_id\":\"sports-room\"}"}"#
    );
}

#[test]
fn talk_frame() {
    let body = params(json!({ "name": "Alice", "message": "hi" }));
    let frame = Frame::from_command(&Command::perform(&room(), "talk", &body).unwrap()).unwrap();
    insta::assert_snapshot!(
        frame.as_str(),
        @r#"{"command":"message","identifier":"{\"channel\":\"ChatChannel\",\"room_id\":\"sports-room\"}","data":"{\"action\":\"talk\",\"message\":\"hi\",\"name\":\"Alice\"}"}"#
    );
}

#[test]
fn identifier_keys_are_sorted() {
    let identifier =
        ChannelIdentifier::new("ChatChannel", params(json!({ "zone": 1, "active": true }))).unwrap();
    insta::assert_snapshot!(
        identifier.as_wire(),
        @r#"{"active":true,"channel":"ChatChannel","zone":1}"#
    );
}

#[test]
fn server_frames() {
    let disconnect =
        ServerMessage::Disconnect { reason: Some("unauthorized".into()), reconnect: false };
    insta::assert_snapshot!(
        Frame::from_message(&disconnect).unwrap().as_str(),
        @r#"{"type":"disconnect","reason":"unauthorized","reconnect":false}"#
    );

    let broadcast = ServerMessage::Broadcast {
        identifier: room().as_wire().to_string(),
        message: json!({ "name": "Bob", "message": "yo" }),
    };
    insta::assert_snapshot!(
        Frame::from_message(&broadcast).unwrap().as_str(),
        @r#"{"identifier":"{\"channel\":\"ChatChannel\",\"room_id\":\"sports-room\"}","message":{"message":"yo","name":"Bob"}}"#
    );
}
