//! Invoice creation, status query, on-demand verification, extension and
//! decline.

use axum::extract::{Extension, Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::chain::VerificationResult;
use crate::error::AppError;
use crate::invoice::{Invoice, InvoiceMutation, InvoiceStatus};
use crate::metrics::record_verification_check;
use crate::observability::correlation::RequestContext;
use crate::pay::PaymentRequest;
use crate::state::AppState;
use crate::types::unix_now_sec;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub recipient: String,
    /// Omit for a customer-entered ("custom") amount
    pub amount_usd: Option<Decimal>,
    pub reference: String,
    pub label: Option<String>,
    pub message: Option<String>,
    pub memo: Option<String>,
    /// Overrides the configured default validity window
    pub expires_in_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub payment_url: String,
}

#[instrument(
    skip(state, req),
    fields(
        reference = %req.reference,
        amount_usd = ?req.amount_usd,
        invoice_id = tracing::field::Empty,
    )
)]
async fn _create(
    state: &AppState,
    req: CreateInvoiceRequest,
    context: RequestContext,
) -> Result<CreateInvoiceResponse, AppError> {
    let span = tracing::Span::current();

    if let Some(amount) = req.amount_usd {
        if amount <= Decimal::ZERO {
            return Err(AppError::validation_error("amountUsd must be positive")
                .with_context(context));
        }
    }

    let validity_secs = req
        .expires_in_secs
        .unwrap_or(state.config().default_expiry_secs);
    if validity_secs <= 0 {
        return Err(
            AppError::validation_error("expiresInSecs must be positive").with_context(context)
        );
    }

    // Validates recipient and reference as real public keys
    let mut payment_request = PaymentRequest::new(
        &req.recipient,
        &state.config().token_mint,
        req.amount_usd,
        &req.reference,
    )
    .map_err(|e| e.with_context(context))?;

    if let Some(label) = req.label {
        payment_request = payment_request.with_label(label);
    }
    if let Some(message) = req.message {
        payment_request = payment_request.with_message(message);
    }
    if let Some(memo) = req.memo {
        payment_request = payment_request.with_memo(memo);
    }

    let invoice = Invoice::new(
        payment_request.recipient.clone(),
        payment_request.reference.clone(),
        req.amount_usd,
        validity_secs,
    );
    let invoice = state.store().create(invoice).await?;

    span.record("invoice_id", invoice.id.as_str());
    info!(
        invoice_id = %invoice.id,
        expires_at_sec = invoice.expires_at_sec,
        "Invoice created"
    );

    Ok(CreateInvoiceResponse {
        payment_url: payment_request.encode(),
        invoice,
    })
}

#[axum_macros::debug_handler]
pub async fn handle_create(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<Json<CreateInvoiceResponse>, AppError> {
    let response = _create(&state, req, context).await?;
    Ok(Json(response))
}

#[axum_macros::debug_handler]
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No invoice with id {}", id)))?;
    Ok(Json(invoice))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub verification: VerificationResult,
    pub invoice: Invoice,
}

/// The fallback/poll path: one bounded verification pass against the ledger,
/// applying `pending -> paid` on a positive match.
#[axum_macros::debug_handler]
pub async fn handle_verify(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VerifyResponse>, AppError> {
    let invoice = state
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No invoice with id {}", id)))?;

    // Paid and declined invoices have nothing left to verify; an expired
    // one is still checked so an in-window payment can be rescued through
    // the store's tie-break.
    if matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Declined) {
        let verification = VerificationResult::still_pending(0);
        return Ok(Json(VerifyResponse {
            verification,
            invoice,
        }));
    }

    let verification = state.verifier().verify(&invoice).await?;
    record_verification_check(verification.paid);

    let invoice = match verification.clone().into_proof() {
        Some(proof) => state
            .store()
            .update(&invoice.id, InvoiceMutation::MarkPaid(proof))
            .await?
            .into_invoice(),
        None => invoice,
    };

    Ok(Json(VerifyResponse {
        verification,
        invoice,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendResponse {
    pub id: String,
    pub expires_at_sec: i64,
}

#[axum_macros::debug_handler]
pub async fn handle_extend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtendResponse>, AppError> {
    let policy = state.expiry_policy();
    let outcome = state
        .store()
        .update(
            &id,
            InvoiceMutation::ExtendExpiry {
                now_sec: unix_now_sec(),
                window_secs: policy.window_secs,
            },
        )
        .await?;

    let invoice = outcome.into_invoice();
    info!(
        invoice_id = %invoice.id,
        expires_at_sec = invoice.expires_at_sec,
        "Invoice validity window extended"
    );

    Ok(Json(ExtendResponse {
        id: invoice.id.clone(),
        expires_at_sec: invoice.expires_at_sec,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineResponse {
    /// False when the invoice was already terminal and nothing changed
    pub changed: bool,
    #[serde(flatten)]
    pub invoice: Invoice,
}

/// Explicit external decline. Never triggered automatically: a polling
/// timeout must not orphan a late-confirming transaction.
#[axum_macros::debug_handler]
pub async fn handle_decline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeclineResponse>, AppError> {
    let outcome = state
        .store()
        .update(&id, InvoiceMutation::MarkDeclined)
        .await?;

    Ok(Json(DeclineResponse {
        changed: outcome.changed(),
        invoice: outcome.into_invoice(),
    }))
}
