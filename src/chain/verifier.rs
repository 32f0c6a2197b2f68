//! Fallback/poll-path payment verification against the ledger.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::chain::LedgerRpc;
use crate::error::AppError;
use crate::invoice::{Invoice, PaymentProof};
use crate::types::{unix_now_sec, Pubkey};

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Mint payments must arrive in.
    pub token_mint: Pubkey,
    /// Acceptable deviation between the requested and transferred amount,
    /// covering token-decimal rounding.
    pub amount_tolerance: Decimal,
    /// Overall deadline for one verification pass. Exceeding it yields the
    /// still-pending result, never an error.
    pub deadline: Duration,
    /// Cap on candidate signatures fetched per pass.
    pub max_signatures: usize,
}

impl VerifierConfig {
    pub fn new(token_mint: Pubkey) -> Self {
        Self {
            token_mint,
            amount_tolerance: Decimal::new(1, 2),
            deadline: Duration::from_secs(10),
            max_signatures: 10,
        }
    }
}

/// Outcome of one verification pass; ephemeral.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub paid: bool,
    pub signature: Option<String>,
    pub payer: Option<Pubkey>,
    pub matched_amount: Option<Decimal>,
    pub paid_at_sec: Option<i64>,
    pub needs_review: bool,
    /// How many candidate signatures were inspected; diagnostic only.
    pub checked_signatures: usize,
}

impl VerificationResult {
    /// The normal "no authoritative match yet" result.
    pub fn still_pending(checked_signatures: usize) -> Self {
        Self {
            paid: false,
            signature: None,
            payer: None,
            matched_amount: None,
            paid_at_sec: None,
            needs_review: false,
            checked_signatures,
        }
    }

    /// Convert a positive result into the proof the store transition needs.
    pub fn into_proof(self) -> Option<PaymentProof> {
        if !self.paid {
            return None;
        }
        Some(PaymentProof {
            tx_signature: self.signature?,
            payer: self.payer,
            amount: self.matched_amount.unwrap_or(Decimal::ZERO),
            paid_at_sec: self.paid_at_sec.unwrap_or_else(unix_now_sec),
            needs_review: self.needs_review,
        })
    }
}

#[derive(Debug)]
struct CandidateMatch {
    signature: String,
    payer: Option<Pubkey>,
    amount: Decimal,
    paid_at_sec: i64,
}

/// Matches pending invoices against on-chain transfers carrying their
/// reference key. Cheap to call repeatedly: "no match" is the common result.
pub struct ChainVerifier {
    rpc: Arc<dyn LedgerRpc>,
    config: VerifierConfig,
}

impl ChainVerifier {
    pub fn new(rpc: Arc<dyn LedgerRpc>, config: VerifierConfig) -> Self {
        Self { rpc, config }
    }

    pub fn token_mint(&self) -> &Pubkey {
        &self.config.token_mint
    }

    /// Query the ledger for a transaction paying `invoice`.
    ///
    /// An unreachable or slow provider yields the still-pending result so a
    /// status check can never hang past the configured deadline.
    pub async fn verify(&self, invoice: &Invoice) -> Result<VerificationResult, AppError> {
        match timeout(self.config.deadline, self.verify_inner(invoice)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    invoice_id = %invoice.id,
                    deadline_secs = self.config.deadline.as_secs(),
                    "Verification deadline exceeded, treating as still pending"
                );
                Ok(VerificationResult::still_pending(0))
            }
        }
    }

    async fn verify_inner(&self, invoice: &Invoice) -> Result<VerificationResult, AppError> {
        let signatures = self
            .rpc
            .signatures_for_address(&invoice.reference, self.config.max_signatures)
            .await?;

        let mut matches: Vec<CandidateMatch> = Vec::new();
        let mut checked = 0;

        // The provider returns newest first; walk in ledger order so the
        // earliest match wins.
        for info in signatures.iter().rev() {
            if info.err.is_some() {
                debug!(
                    invoice_id = %invoice.id,
                    signature = %info.signature,
                    "Skipping failed transaction"
                );
                continue;
            }
            checked += 1;

            let Some(tx) = self.rpc.transaction(&info.signature).await? else {
                continue;
            };
            if tx.err.is_some() {
                continue;
            }

            let received = tx.token_received(&invoice.recipient, &self.config.token_mint);
            if received <= Decimal::ZERO {
                continue;
            }

            let amount_ok = match invoice.amount_usd {
                Some(expected) => (received - expected).abs() <= self.config.amount_tolerance,
                // Customer-entered amount: any positive transfer matches
                None => true,
            };
            if !amount_ok {
                debug!(
                    invoice_id = %invoice.id,
                    signature = %info.signature,
                    received = %received,
                    expected = ?invoice.amount_usd,
                    "Transfer amount outside tolerance"
                );
                continue;
            }

            matches.push(CandidateMatch {
                signature: info.signature.clone(),
                payer: tx.fee_payer.as_deref().and_then(|p| Pubkey::new(p).ok()),
                amount: received,
                paid_at_sec: tx
                    .block_time
                    .or(info.block_time)
                    .unwrap_or_else(unix_now_sec),
            });
        }

        if matches.is_empty() {
            return Ok(VerificationResult::still_pending(checked));
        }

        let needs_review = matches.len() > 1;
        if needs_review {
            warn!(
                invoice_id = %invoice.id,
                candidates = matches.len(),
                "Multiple matching transactions, flagging for operator review"
            );
        }

        let first = matches.remove(0);
        Ok(VerificationResult {
            paid: true,
            signature: Some(first.signature),
            payer: first.payer,
            matched_amount: Some(first.amount),
            paid_at_sec: Some(first.paid_at_sec),
            needs_review,
            checked_signatures: checked,
        })
    }
}
