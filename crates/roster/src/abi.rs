//! Event schemas emitted by the member registry contract.
//!
//! MemberRegistered event. Decode from the JSON payload the event stream delivers.

use crate::address::Address;
use serde_json::Value;
use thiserror::Error;

/// Signature string the event stream uses to identify MemberRegistered.
pub const MEMBER_REGISTERED_SIGNATURE: &str =
    "MemberRegistered(address,string,string,string,uint256)";

/// An event payload that is missing a required field or has one of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {signature} event: {reason}")]
pub struct MalformedEvent {
    pub signature: String,
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            reason: reason.into(),
        }
    }
}

/// Decoded MemberRegistered payload. Fields map positionally to the event's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRegistered {
    pub member: Address,
    pub name: String,
    pub app2app_destination: String,
    pub doc_exchange_destination: String,
    pub timestamp: u64,
}

impl MemberRegistered {
    pub fn decode(payload: &Value) -> Result<Self, MalformedEvent> {
        let malformed = |reason: String| MalformedEvent::new(MEMBER_REGISTERED_SIGNATURE, reason);
        let member = required_str(payload, "member").map_err(malformed)?;
        let member = Address::parse(member).map_err(|e| malformed(format!("member: {}", e)))?;
        Ok(Self {
            member,
            name: required_str(payload, "name").map_err(malformed)?.to_string(),
            app2app_destination: required_str(payload, "app2appDestination")
                .map_err(malformed)?
                .to_string(),
            doc_exchange_destination: required_str(payload, "docExchangeDestination")
                .map_err(malformed)?
                .to_string(),
            timestamp: parse_uint(payload, "timestamp").map_err(malformed)?,
        })
    }
}

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, String> {
    match payload.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(format!("{} is not a string", field)),
        None => Err(format!("missing {}", field)),
    }
}

/// uint256 values arrive either as JSON numbers or as decimal strings.
fn parse_uint(payload: &Value, field: &str) -> Result<u64, String> {
    match payload.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| format!("{} is not an unsigned integer: {}", field, n)),
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse(),
            }
            .map_err(|e| format!("{}: {}", field, e))
        }
        Some(_) => Err(format!("{} is not a number", field)),
        None => Err(format!("missing {}", field)),
    }
}
