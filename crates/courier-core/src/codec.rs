//! Envelope codec
//!
//! Wire format: the compact JSON encoding of a message, then a line holding
//! only `---`.
//!
//! ```text
//! {"id":"<uuid>","method":"ping","parameters":{"init":1700000000000}}
//! ---
//! ```
//!
//! Decoding picks `Request` when the object has a `method` field and
//! `Response` otherwise.

use crate::error::{CourierError, Result};
use crate::message::{Message, Request, Response};
use serde_json::Value;

/// Line terminating each message
pub const SENTINEL: &str = "---";

/// Prefix of the raw line a server sends back when it cannot decode a frame
pub const INVALID_MESSAGE_PREFIX: &str = "Invalid Message:";

/// Serialize a message to its JSON text
pub fn encode(msg: &Message) -> Result<String> {
    serde_json::to_string(msg).map_err(Into::into)
}

/// Serialize a message into a complete wire frame, sentinel included
pub fn encode_frame(msg: &Message) -> Result<String> {
    let mut frame = encode(msg)?;
    frame.push('\n');
    frame.push_str(SENTINEL);
    frame.push('\n');
    Ok(frame)
}

/// Deserialize a message from JSON text
///
/// Every failure is reported as [`CourierError::MalformedMessage`].
pub fn decode(text: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| CourierError::MalformedMessage(format!("Invalid JSON: {}", e)))?;

    let Value::Object(ref object) = value else {
        return Err(CourierError::MalformedMessage(format!(
            "Expected a JSON object, got {}",
            kind_of(&value)
        )));
    };

    if object.contains_key("method") {
        serde_json::from_value::<Request>(value)
            .map(Message::Request)
            .map_err(|e| CourierError::MalformedMessage(format!("Invalid request: {}", e)))
    } else {
        serde_json::from_value::<Response>(value)
            .map(Message::Response)
            .map_err(|e| CourierError::MalformedMessage(format!("Invalid response: {}", e)))
    }
}

/// Text of the notice sent back to a peer whose frame could not be decoded
pub fn invalid_message_notice(err: &CourierError) -> String {
    format!("{} {}", INVALID_MESSAGE_PREFIX, err)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
