//! Outbound merchant webhooks: push invoice lifecycle events to configured
//! endpoints so a merchant backend can react without holding a stream open.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::events::{EventHandler, InvoiceEvent};

/// Configuration for webhook retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Timeout for each webhook request in seconds
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            timeout_secs: 30,
        }
    }
}

/// Configuration for a single webhook endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub url: String,
    /// Optional secret for HMAC-SHA256 signature generation
    pub secret: Option<String>,
    /// Event types this endpoint should receive; empty means all
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("events", &self.events)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl WebhookEndpoint {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            secret: None,
            events: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_events(mut self, events: Vec<String>) -> Self {
        self.events = events;
        self
    }

    pub fn should_receive_event(&self, event_type: &str) -> bool {
        self.enabled && (self.events.is_empty() || self.events.iter().any(|e| e == event_type))
    }
}

/// Configuration for the outbound webhook system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            enabled: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Webhook notifier that implements the EventHandler trait
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.retry.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Send webhook notification for an event to all matching endpoints
    pub async fn notify(&self, event: &InvoiceEvent) -> anyhow::Result<()> {
        if !self.config.enabled {
            debug!("Webhook notifications disabled, skipping event");
            return Ok(());
        }

        let event_type = event.event_type();
        let event_id = event.event_id();

        let payload = serde_json::to_string(&serde_json::json!({
            "id": event_id,
            "type": event_type,
            "timestamp": event.timestamp(),
            "data": event,
        }))?;

        let mut tasks = Vec::new();
        for endpoint in &self.config.endpoints {
            if endpoint.should_receive_event(event_type) {
                let client = self.client.clone();
                let endpoint = endpoint.clone();
                let retry = self.config.retry.clone();
                let payload = payload.clone();
                let event_id = event_id.clone();

                tasks.push(tokio::spawn(async move {
                    Self::deliver_webhook(client, endpoint, retry, payload, &event_id).await
                }));
            }
        }

        let mut success_count = 0;
        let mut error_count = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => success_count += 1,
                Ok(Err(e)) => {
                    error_count += 1;
                    error!("Webhook delivery failed: {}", e);
                }
                Err(e) => {
                    error_count += 1;
                    error!("Webhook task panicked: {}", e);
                }
            }
        }

        debug!(
            event_id = %event_id,
            event_type = %event_type,
            success_count = success_count,
            error_count = error_count,
            "Webhook notification processing completed"
        );

        Ok(())
    }

    /// Deliver a webhook to a single endpoint with retry logic
    async fn deliver_webhook(
        client: Client,
        endpoint: WebhookEndpoint,
        retry: RetryConfig,
        payload: String,
        event_id: &str,
    ) -> anyhow::Result<()> {
        let mut delay_ms = retry.initial_delay_ms;

        for attempt in 1..=retry.max_attempts {
            debug!(
                endpoint_id = %endpoint.id,
                event_id = %event_id,
                attempt = attempt,
                max_attempts = retry.max_attempts,
                "Attempting webhook delivery"
            );

            match Self::send_webhook_request(&client, &endpoint, &payload, event_id).await {
                Ok(()) => {
                    info!(
                        endpoint_id = %endpoint.id,
                        event_id = %event_id,
                        attempt = attempt,
                        "Webhook delivered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        endpoint_id = %endpoint.id,
                        event_id = %event_id,
                        attempt = attempt,
                        error = %e,
                        "Webhook delivery attempt failed"
                    );

                    if attempt < retry.max_attempts {
                        sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = ((delay_ms as f64 * retry.backoff_multiplier) as u64)
                            .min(retry.max_delay_ms);
                    }
                }
            }
        }

        error!(
            endpoint_id = %endpoint.id,
            event_id = %event_id,
            attempts = retry.max_attempts,
            "Webhook delivery failed after all retry attempts"
        );

        Err(anyhow::anyhow!(
            "Webhook delivery failed after {} attempts",
            retry.max_attempts
        ))
    }

    async fn send_webhook_request(
        client: &Client,
        endpoint: &WebhookEndpoint,
        payload: &str,
        event_id: &str,
    ) -> anyhow::Result<()> {
        let mut request_builder = client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "spayd-webhook/1.0")
            .header("X-Event-Id", event_id)
            .body(payload.to_string());

        if let Some(secret) = &endpoint.secret {
            let signature = hmac_signature(payload.as_bytes(), secret);
            request_builder = request_builder.header("X-Signature-SHA256", signature);
        }

        let response = request_builder.send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Webhook request failed with status {}: {}", status, body)
        }
    }
}

/// HMAC-SHA256 signature for a webhook payload, `sha256=<hex>`.
pub fn hmac_signature(payload: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of an incoming webhook signature.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[async_trait]
impl EventHandler for WebhookNotifier {
    async fn handle(&self, event: InvoiceEvent) -> anyhow::Result<()> {
        // Delivery must not block event processing; run in the background
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                error!(
                    event_type = %event.event_type(),
                    error = %e,
                    "Failed to send webhook notifications"
                );
            }
        });

        Ok(())
    }

    fn name(&self) -> &str {
        "webhook_notifier"
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Build the notifier as a registrable handler, or `None` when no endpoints
/// are configured.
pub fn notifier_handler(config: &WebhookConfig) -> anyhow::Result<Option<Arc<WebhookNotifier>>> {
    if config.endpoints.is_empty() {
        return Ok(None);
    }
    Ok(Some(Arc::new(WebhookNotifier::new(config.clone())?)))
}
