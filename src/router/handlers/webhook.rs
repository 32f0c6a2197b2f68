//! Inbound provider webhook endpoint.
//!
//! The body is read raw so the HMAC signature can be checked before any
//! parsing. Per-event processing failures are logged and the event dropped;
//! the provider's own redelivery (and the expiry sweep's verify pass) are
//! the recovery paths, so the provider still gets a 200.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::AppError;
use crate::metrics::record_webhook_event;
use crate::state::AppState;
use crate::webhooks::notifier::verify_signature;
use crate::webhooks::ProviderTransactionEvent;

const SIGNATURE_HEADER: &str = "x-signature-sha256";

/// Providers post either a single event or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderEventBatch {
    Many(Vec<ProviderTransactionEvent>),
    One(ProviderTransactionEvent),
}

impl ProviderEventBatch {
    fn into_events(self) -> Vec<ProviderTransactionEvent> {
        match self {
            Self::Many(events) => events,
            Self::One(event) => vec![event],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderWebhookResponse {
    pub received: usize,
    pub settled: usize,
}

#[axum_macros::debug_handler]
pub async fn handle_provider_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProviderWebhookResponse>, AppError> {
    if let Some(secret) = &state.config().webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::authentication_error("Missing webhook signature"))?;

        if !verify_signature(&body, signature, secret) {
            return Err(AppError::authentication_error("Invalid webhook signature"));
        }
    }

    let batch: ProviderEventBatch = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation_error(format!("Unparseable webhook body: {}", e)))?;
    let events = batch.into_events();

    let received = events.len();
    let mut settled = 0;

    for event in &events {
        match state.ingestor().handle(event).await {
            Ok(outcome) => {
                record_webhook_event(outcome.as_str());
                if outcome == crate::webhooks::IngestOutcome::Paid {
                    settled += 1;
                }
            }
            Err(e) => {
                // Dropped, not retried internally; the provider redelivers
                record_webhook_event("error");
                error!(
                    signature = %event.signature,
                    error = %e,
                    "Failed to process provider event"
                );
            }
        }
    }

    info!(received = received, settled = settled, "Processed provider webhook batch");

    Ok(Json(ProviderWebhookResponse { received, settled }))
}
