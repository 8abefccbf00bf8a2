//! Ledger gateway client: submits member registrations as asynchronous transactions.

use crate::config::GatewayConfig;
use crate::member::Registration;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Submits a registration to the ledger. Success means the transaction was accepted for
/// submission, not that it has been mined.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn register_member(&self, registration: &Registration) -> Result<(), GatewayError>;
}

/// REST gateway in front of the member registry contract.
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn register_url(&self) -> String {
        format!("{}/registerMember", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn register_member(&self, registration: &Registration) -> Result<(), GatewayError> {
        let from = registration.address.to_string();
        let body = json!({
            "name": registration.name,
            "app2appDestination": registration.app2app_destination,
            "docExchangeDestination": registration.doc_exchange_destination,
        });
        let mut req = self
            .client
            .post(self.register_url())
            .query(&[("kld-from", from.as_str()), ("kld-sync", "false")])
            .json(&body);
        if let Some(username) = &self.config.username {
            req = req.basic_auth(username, self.config.password.as_deref());
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(address = %from, "registerMember submitted");
        Ok(())
    }
}
