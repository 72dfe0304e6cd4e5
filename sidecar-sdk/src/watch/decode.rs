/// Decoding of `{"result": {...}}` push envelopes
use prost::Message;
use serde_json::Value;

use crate::error::{Result, SdkError};
use crate::network::proto;
use crate::types::GameServer;

/// Parse a complete envelope into a snapshot
///
/// The envelope must be a JSON object whose `result` member is an object. Gateway errors
/// (`{"error": {...}}`) are reported as invalid envelopes carrying the error message.
pub fn decode_envelope(bytes: &[u8]) -> Result<GameServer> {
    let mut envelope = match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(envelope) => envelope,
        other => {
            return Err(SdkError::InvalidEnvelope(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    match envelope.remove("result") {
        Some(result @ Value::Object(_)) => Ok(serde_json::from_value(result)?),
        Some(other) => Err(SdkError::InvalidEnvelope(format!(
            "\"result\" is {}, expected an object",
            json_kind(&other)
        ))),
        None => match envelope.get("error") {
            Some(error) => Err(SdkError::InvalidEnvelope(format!(
                "sidecar reported an error: {}",
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
            ))),
            None => Err(SdkError::InvalidEnvelope(
                "missing \"result\" field".to_string(),
            )),
        },
    }
}

/// Decode a bare GameServer object, as returned by `GET /gameserver`
pub fn decode_game_server(bytes: &[u8]) -> Result<GameServer> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode one message of the gRPC watch stream
pub fn decode_proto(bytes: &[u8]) -> Result<GameServer> {
    Ok(proto::GameServer::decode(bytes)?.into())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
