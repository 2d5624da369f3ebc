//! Batched HTTP delivery of matched events.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use fibr_model::{Event, Webhook, WebhookKind};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::WebhookConfig;
use crate::error::{PipelineError, Result};
use crate::http::build_client;

use super::payload;

/// Hex HMAC-SHA256 of the request body, present when a secret is configured.
pub const SIGNATURE_HEADER: &str = "X-Fibr-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    secret: Option<String>,
    extra_headers: BTreeMap<String, String>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("signed", &self.secret.is_some())
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            secret: config.secret.clone().filter(|secret| !secret.is_empty()),
            extra_headers: config.extra_headers.clone(),
        })
    }

    /// Posts `events` as one message to the webhook url, shaped by the
    /// webhook kind. Only raw deliveries are signed.
    pub async fn deliver(&self, webhook: &Webhook, events: &[Event]) -> Result<()> {
        let body = match webhook.kind {
            WebhookKind::Raw => serde_json::to_vec(events)?,
            WebhookKind::Discord => serde_json::to_vec(&payload::discord(webhook, events))?,
            WebhookKind::Slack => serde_json::to_vec(&payload::slack(webhook, events))?,
        };

        let mut request = self
            .client
            .post(&webhook.url)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in webhook.headers.iter().chain(self.extra_headers.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let (WebhookKind::Raw, Some(secret)) = (webhook.kind, &self.secret) {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if let Err(err) = response.error_for_status_ref() {
            warn!(webhook = %webhook.id, kind = %webhook.kind, status = %status, "webhook rejected delivery");
            return Err(err.into());
        }

        debug!(webhook = %webhook.id, events = events.len(), status = %status, "webhook delivered");
        Ok(())
    }
}

pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| PipelineError::Config(format!("invalid webhook secret: {err}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let first = sign("secret", b"[]").unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, sign("secret", b"[]").unwrap());
        assert_ne!(first, sign("other", b"[]").unwrap());
    }
}
