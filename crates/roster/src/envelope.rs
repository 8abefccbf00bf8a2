//! Event envelope decoding.
//!
//! A batch is a JSON array of envelopes `{"signature": "...", "data": {...}}`. Envelopes that
//! fail structural validation are skipped and reported; only a message that is not an array
//! at all fails the batch.

use serde_json::Value;
use thiserror::Error;

/// The whole message could not be decoded; the batch is dropped and not acknowledged.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("batch is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("batch is not an array of envelopes (got {0})")]
    NotABatch(&'static str),
}

/// One decoded event, ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub signature: String,
    pub payload: Value,
    /// Chain position, when the event service includes it.
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
}

/// An envelope that was skipped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEnvelope {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Events in arrival order.
    pub events: Vec<InboundEvent>,
    pub skipped: Vec<SkippedEnvelope>,
}

pub fn decode_batch(text: &str) -> Result<DecodedBatch, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let envelopes = match value {
        Value::Array(items) => items,
        other => return Err(DecodeError::NotABatch(kind(&other))),
    };
    let mut batch = DecodedBatch::default();
    for (index, envelope) in envelopes.into_iter().enumerate() {
        match decode_envelope(envelope) {
            Ok(ev) => batch.events.push(ev),
            Err(reason) => {
                tracing::warn!(index, %reason, "skipping malformed envelope");
                batch.skipped.push(SkippedEnvelope { index, reason });
            }
        }
    }
    Ok(batch)
}

fn decode_envelope(envelope: Value) -> Result<InboundEvent, String> {
    let mut obj = match envelope {
        Value::Object(obj) => obj,
        other => return Err(format!("envelope is {}, expected object", kind(&other))),
    };
    let signature = match obj.remove("signature") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::String(_)) => return Err("empty signature".into()),
        Some(_) => return Err("signature is not a string".into()),
        None => return Err("missing signature".into()),
    };
    let payload = match obj.remove("data") {
        Some(data @ Value::Object(_)) => data,
        Some(_) => return Err("data is not an object".into()),
        None => return Err("missing data".into()),
    };
    let meta = |v: Option<Value>| match v {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Ok(InboundEvent {
        signature,
        payload,
        block_number: meta(obj.remove("blockNumber")),
        transaction_hash: meta(obj.remove("transactionHash")),
    })
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
