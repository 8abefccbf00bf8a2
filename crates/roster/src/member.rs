//! Member records and the local registration request.

use crate::address::Address;
use serde::{Deserialize, Serialize};

/// A participant of the network, as mirrored locally.
///
/// `owned` marks records registered through this instance and never goes back to false.
/// `confirmed` is false while a local submission is outstanding and true once a ledger event
/// for the address has been reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub address: Address,
    pub name: String,
    pub app2app_destination: String,
    pub doc_exchange_destination: String,
    pub owned: bool,
    pub confirmed: bool,
    /// Seconds since the epoch of the last local submission (or of the ledger event that
    /// created the record).
    pub timestamp: u64,
}

/// Body of `PUT /members`. Every field is optional at the wire level so that a missing
/// field is reported as an invalid member rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMember {
    pub address: Option<String>,
    pub name: Option<String>,
    pub app2app_destination: Option<String>,
    pub doc_exchange_destination: Option<String>,
}

/// A registration request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub address: Address,
    pub name: String,
    pub app2app_destination: String,
    pub doc_exchange_destination: String,
}

impl RegisterMember {
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        app2app_destination: impl Into<String>,
        doc_exchange_destination: impl Into<String>,
    ) -> Self {
        Self {
            address: Some(address.into()),
            name: Some(name.into()),
            app2app_destination: Some(app2app_destination.into()),
            doc_exchange_destination: Some(doc_exchange_destination.into()),
        }
    }

    /// All four fields must be present and non-blank, and the address must parse.
    pub fn validate(&self) -> Option<Registration> {
        fn required(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        }
        let address = Address::parse(&required(&self.address)?).ok()?;
        Some(Registration {
            address,
            name: required(&self.name)?,
            app2app_destination: required(&self.app2app_destination)?,
            doc_exchange_destination: required(&self.doc_exchange_destination)?,
        })
    }
}
