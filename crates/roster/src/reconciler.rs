//! Member reconciliation.
//!
//! Two writers converge on the member store:
//! - local registrations, which mark a record owned and unconfirmed once the gateway accepts
//!   the submission;
//! - MemberRegistered events from the ledger, which mark the record confirmed.
//!
//! Both go through [MemberStore::upsert], so each read-modify-write on an address is atomic.
//! Reconciling an event is idempotent: redelivery leaves the record unchanged.

use crate::abi::{MalformedEvent, MemberRegistered};
use crate::envelope::InboundEvent;
use crate::gateway::{Gateway, GatewayError};
use crate::member::{Member, RegisterMember};
use crate::router::EventHandler;
use crate::store::{MemberStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid member")]
    InvalidMember,
    #[error("gateway submission failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure to apply a single event. The rest of the batch is unaffected.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Malformed(#[from] MalformedEvent),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies local registrations and ledger events to the member store.
pub struct Reconciler {
    store: Arc<dyn MemberStore>,
    gateway: Arc<dyn Gateway>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MemberStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<dyn MemberStore> {
        &self.store
    }

    /// Apply a confirmed MemberRegistered event.
    ///
    /// Existing records get the event's name and destinations and become confirmed; `owned`
    /// and `timestamp` are kept. Unknown addresses are created as not owned, confirmed.
    pub async fn reconcile(&self, event: MemberRegistered) -> Result<Member, StoreError> {
        let address = event.member;
        let member = self
            .store
            .upsert(
                &address,
                Box::new(move |existing| match existing {
                    Some(prev) => Member {
                        name: event.name,
                        app2app_destination: event.app2app_destination,
                        doc_exchange_destination: event.doc_exchange_destination,
                        confirmed: true,
                        ..prev.clone()
                    },
                    None => Member {
                        address: event.member,
                        name: event.name,
                        app2app_destination: event.app2app_destination,
                        doc_exchange_destination: event.doc_exchange_destination,
                        owned: false,
                        confirmed: true,
                        timestamp: event.timestamp,
                    },
                }),
            )
            .await?;
        tracing::info!(address = %address.to_checksum(), owned = member.owned, "member confirmed");
        Ok(member)
    }

    /// Register a member from a local request.
    ///
    /// The registration is submitted to the gateway first; the store only changes once the
    /// gateway has accepted it. The record becomes owned and unconfirmed until the matching
    /// event arrives.
    pub async fn register_locally(&self, request: &RegisterMember) -> Result<Member, RegistrationError> {
        let registration = request.validate().ok_or(RegistrationError::InvalidMember)?;
        self.gateway.register_member(&registration).await?;

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let address = registration.address;
        let member = self
            .store
            .upsert(
                &address,
                Box::new(move |_| Member {
                    address: registration.address,
                    name: registration.name,
                    app2app_destination: registration.app2app_destination,
                    doc_exchange_destination: registration.doc_exchange_destination,
                    owned: true,
                    confirmed: false,
                    timestamp: now,
                }),
            )
            .await?;
        tracing::info!(address = %address.to_checksum(), "member registration submitted");
        Ok(member)
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &InboundEvent) -> Result<(), ReconcileError> {
        let decoded = MemberRegistered::decode(&event.payload)?;
        self.reconcile(decoded).await?;
        Ok(())
    }
}
