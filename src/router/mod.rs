use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub mod handlers;

use handlers::{invoice, stream, webhook};

/// Merchant-facing invoice routes; basic auth is layered on in `main`.
pub fn invoice_router() -> Router<AppState> {
    Router::new()
        .route("/", post(invoice::handle_create))
        .route("/:id", get(invoice::handle_get))
        .route("/:id/verify", post(invoice::handle_verify))
        .route("/:id/extend", post(invoice::handle_extend))
        .route("/:id/decline", post(invoice::handle_decline))
        .route("/:id/stream", get(stream::handle_stream))
}

/// Provider-facing webhook routes; authenticated by HMAC signature, not
/// basic auth.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/provider", post(webhook::handle_provider_events))
}
