//! JSON webhook dispatcher: one endpoint per action kind.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::{ActionDispatcher, DispatchError, DispatchOutcome};
use crate::config::DispatchConfig;
use crate::detect::{Action, ActionKind};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct WebhookDispatcher {
    client: Client,
    token: String,
    issue_url: Option<String>,
    alert_url: Option<String>,
    scale_url: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(config: &DispatchConfig, token: &str) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            token: token.to_string(),
            issue_url: config.issue_url.clone(),
            alert_url: config.alert_url.clone(),
            scale_url: config.scale_url.clone(),
        })
    }

    fn endpoint(&self, kind: ActionKind) -> Result<&str, DispatchError> {
        let url = match kind {
            ActionKind::Issue => &self.issue_url,
            ActionKind::Alert => &self.alert_url,
            ActionKind::ScaleRequest => &self.scale_url,
        };
        url.as_deref().ok_or(DispatchError::NoEndpoint(kind))
    }
}

#[async_trait]
impl ActionDispatcher for WebhookDispatcher {
    async fn dispatch(&self, action: &Action) -> Result<DispatchOutcome, DispatchError> {
        let url = self.endpoint(action.kind)?;
        let fingerprint = action.fingerprint();
        debug!(url, fingerprint = %fingerprint, "posting action");

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header(IDEMPOTENCY_HEADER, &fingerprint)
            .json(&action.payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                kind: action.kind,
                status: status.as_u16(),
            });
        }
        info!(kind = %action.kind, target = %action.target, status = status.as_u16(), "action dispatched");
        Ok(DispatchOutcome::Sent)
    }
}
