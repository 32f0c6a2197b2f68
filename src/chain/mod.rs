//! Read-only JSON-RPC access to the ledger provider.
//!
//! The provider is treated as eventually consistent and occasionally
//! unavailable; callers bound every use with a deadline and treat failures
//! as "no answer yet", never as a payment state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::types::Pubkey;

pub mod verifier;

pub use verifier::{ChainVerifier, VerificationResult, VerifierConfig};

/// One entry from `getSignaturesForAddress`, newest first as returned by the
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    /// Program-level failure recorded on chain; a failed transaction can
    /// never be a payment match.
    #[serde(default)]
    pub err: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: u32,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: TokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmount {
    /// Raw integer amount as a string.
    pub amount: String,
    pub decimals: u32,
}

impl TokenAmount {
    pub fn to_decimal(&self) -> Decimal {
        self.amount
            .parse::<i128>()
            .ok()
            .map(|raw| Decimal::from_i128_with_scale(raw, self.decimals))
            .unwrap_or(Decimal::ZERO)
    }
}

/// The slice of `getTransaction` output the verifier needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub err: Option<Value>,
    /// First signer; with token transfers this is the paying wallet.
    #[serde(default)]
    pub fee_payer: Option<String>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
}

impl TransactionDetail {
    /// Net amount of `mint` received by `owner` in this transaction, from
    /// the pre/post token-balance deltas.
    pub fn token_received(&self, owner: &Pubkey, mint: &Pubkey) -> Decimal {
        let sum = |balances: &[TokenBalance]| {
            balances
                .iter()
                .filter(|b| b.mint == mint.as_str() && b.owner.as_deref() == Some(owner.as_str()))
                .map(|b| b.ui_token_amount.to_decimal())
                .sum::<Decimal>()
        };
        sum(&self.post_token_balances) - sum(&self.pre_token_balances)
    }
}

/// Read-only ledger queries used by the verifier and the health checks.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Signatures of transactions that touched `address`, newest first.
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, AppError>;

    /// Full transaction detail, or `None` if the provider does not know the
    /// signature (yet).
    async fn transaction(&self, signature: &str) -> Result<Option<TransactionDetail>, AppError>;

    /// Provider liveness probe.
    async fn health(&self) -> Result<(), AppError>;
}

/// JSON-RPC 2.0 client against a Solana node provider.
pub struct RpcClient {
    http: Client,
    url: String,
    /// Request ids are a per-client sequence, not a process-wide counter.
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcClient {
    const MAX_ATTEMPTS: u32 = 3;
    const BASE_DELAY: Duration = Duration::from_millis(200);

    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call, retrying transport failures with exponential
    /// backoff. RPC-level errors from the node are not retried.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, AppError> {
        let mut last_err: Option<AppError> = None;

        for attempt in 0..Self::MAX_ATTEMPTS {
            if attempt > 0 {
                // 2^n backoff, same shape as the webhook delivery retry
                let delay = Self::BASE_DELAY * (1 << attempt);
                debug!(
                    method = %method,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying RPC call after delay"
                );
                tokio::time::sleep(delay).await;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            });

            let response = match self.http.post(&self.url).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(method = %method, attempt = attempt + 1, error = %e, "RPC transport error");
                    last_err = Some(AppError::from(e));
                    continue;
                }
            };

            let envelope: RpcResponse = match response.json().await {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(method = %method, attempt = attempt + 1, error = %e, "RPC response decode error");
                    last_err = Some(AppError::from(e));
                    continue;
                }
            };

            if let Some(error) = envelope.error {
                return Err(AppError::upstream_unavailable(format!(
                    "RPC {} failed: {} (code {})",
                    method, error.message, error.code
                )));
            }

            let result = envelope.result.unwrap_or(Value::Null);
            return serde_json::from_value(result).map_err(|e| {
                AppError::upstream_unavailable(format!(
                    "RPC {} returned an unexpected shape: {}",
                    method, e
                ))
                .with_source(e)
            });
        }

        Err(last_err.unwrap_or_else(|| {
            AppError::upstream_unavailable(format!("RPC {} failed with no attempts made", method))
        }))
    }
}

/// Raw `getTransaction` envelope as the node returns it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    slot: u64,
    #[serde(default)]
    block_time: Option<i64>,
    #[serde(default)]
    meta: Option<RpcTransactionMeta>,
    #[serde(default)]
    transaction: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RpcTransactionMeta {
    err: Option<Value>,
    pre_token_balances: Vec<TokenBalance>,
    post_token_balances: Vec<TokenBalance>,
}

impl RpcTransaction {
    fn into_detail(self) -> TransactionDetail {
        // With jsonParsed encoding the account keys are objects; the first
        // one is the fee payer and, for wallet transfers, the payer itself.
        let fee_payer = self
            .transaction
            .as_ref()
            .and_then(|tx| tx.pointer("/message/accountKeys/0/pubkey"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let meta = self.meta.unwrap_or_default();
        TransactionDetail {
            slot: self.slot,
            block_time: self.block_time,
            err: meta.err,
            fee_payer,
            pre_token_balances: meta.pre_token_balances,
            post_token_balances: meta.post_token_balances,
        }
    }
}

#[async_trait]
impl LedgerRpc for RpcClient {
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, AppError> {
        self.call(
            "getSignaturesForAddress",
            json!([address.as_str(), { "limit": limit }]),
        )
        .await
    }

    async fn transaction(&self, signature: &str) -> Result<Option<TransactionDetail>, AppError> {
        let raw: Option<RpcTransaction> = self
            .call(
                "getTransaction",
                json!([signature, {
                    "encoding": "jsonParsed",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0,
                }]),
            )
            .await?;

        Ok(raw.map(RpcTransaction::into_detail))
    }

    async fn health(&self) -> Result<(), AppError> {
        let _: Value = self.call("getHealth", json!([])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(mint: &str, owner: &str, amount: &str, decimals: u32) -> TokenBalance {
        TokenBalance {
            account_index: 1,
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            ui_token_amount: TokenAmount {
                amount: amount.to_string(),
                decimals,
            },
        }
    }

    #[test]
    fn token_amount_scales_by_decimals() {
        let amount = TokenAmount {
            amount: "10000000".to_string(),
            decimals: 6,
        };
        assert_eq!(amount.to_decimal(), Decimal::new(10, 0));

        let garbage = TokenAmount {
            amount: "not-a-number".to_string(),
            decimals: 6,
        };
        assert_eq!(garbage.to_decimal(), Decimal::ZERO);
    }

    #[test]
    fn token_received_is_the_post_minus_pre_delta() {
        let merchant = Pubkey::new(bs58::encode([1u8; 32]).into_string()).unwrap();
        let mint = Pubkey::new(bs58::encode([2u8; 32]).into_string()).unwrap();
        let other = bs58::encode([3u8; 32]).into_string();

        let detail = TransactionDetail {
            slot: 100,
            block_time: Some(1_700_000_000),
            err: None,
            fee_payer: Some(other.clone()),
            pre_token_balances: vec![
                balance(mint.as_str(), merchant.as_str(), "5000000", 6),
                balance(mint.as_str(), &other, "20000000", 6),
            ],
            post_token_balances: vec![
                balance(mint.as_str(), merchant.as_str(), "15000000", 6),
                balance(mint.as_str(), &other, "10000000", 6),
            ],
        };

        assert_eq!(
            detail.token_received(&merchant, &mint),
            Decimal::new(10, 0)
        );

        // A different mint contributes nothing
        let wrong_mint = Pubkey::new(bs58::encode([9u8; 32]).into_string()).unwrap();
        assert_eq!(
            detail.token_received(&merchant, &wrong_mint),
            Decimal::ZERO
        );
    }
}
