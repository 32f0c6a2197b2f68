use std::path::{Path, PathBuf};

use anyhow::Result;
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::webhooks::WebhookConfig;

/// Configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// HTTP server bind IP address
    #[serde(rename = "http-bind-ip", default = "default_bind_ip")]
    pub http_bind_ip: String,

    /// HTTP server bind port
    #[serde(rename = "http-bind-port", default = "default_bind_port")]
    pub http_bind_port: u16,

    /// HTTP Basic Auth password (plain text, optional)
    /// When None, authentication is disabled
    #[serde(rename = "http-password")]
    pub http_password: Option<String>,

    /// JSON-RPC endpoint of the ledger provider
    #[serde(rename = "rpc-url", default = "default_rpc_url")]
    pub rpc_url: String,

    /// Per-request timeout against the ledger provider
    #[serde(rename = "rpc-timeout-secs", default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Mint of the token invoices are settled in (USDC by default)
    #[serde(rename = "token-mint", default = "default_token_mint")]
    pub token_mint: String,

    /// Acceptable deviation between requested and transferred amounts
    #[serde(rename = "amount-tolerance", default = "default_amount_tolerance")]
    pub amount_tolerance: Decimal,

    /// Overall deadline for one verification pass
    #[serde(rename = "verify-deadline-secs", default = "default_verify_deadline_secs")]
    pub verify_deadline_secs: u64,

    /// Cap on candidate signatures fetched per verification pass
    #[serde(rename = "verify-max-signatures", default = "default_verify_max_signatures")]
    pub verify_max_signatures: usize,

    /// Validity window for newly created invoices
    #[serde(rename = "default-expiry-secs", default = "default_expiry_secs")]
    pub default_expiry_secs: i64,

    /// Window added per extension request
    #[serde(rename = "extension-window-secs", default = "default_extension_window_secs")]
    pub extension_window_secs: i64,

    /// How often the expiry sweep runs
    #[serde(rename = "expiry-sweep-interval-secs", default = "default_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,

    /// Hard ceiling on a live status stream, independent of invoice expiry
    #[serde(rename = "stream-ceiling-secs", default = "default_stream_ceiling_secs")]
    pub stream_ceiling_secs: u64,

    /// SSE keep-alive interval
    #[serde(rename = "stream-keepalive-secs", default = "default_stream_keepalive_secs")]
    pub stream_keepalive_secs: u64,

    /// Event bus broadcast capacity
    #[serde(rename = "event-bus-capacity", default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Shared secret the provider signs inbound webhook bodies with;
    /// when None, inbound signatures are not checked
    #[serde(rename = "webhook-secret")]
    pub webhook_secret: Option<String>,

    /// Outbound merchant webhook configuration
    #[serde(rename = "merchant-webhooks", default)]
    pub merchant_webhooks: WebhookConfig,

    /// Data directory for the daemon (contains config and logs)
    #[serde(rename = "data-dir")]
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_ip: default_bind_ip(),
            http_bind_port: default_bind_port(),
            http_password: None,
            rpc_url: default_rpc_url(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            token_mint: default_token_mint(),
            amount_tolerance: default_amount_tolerance(),
            verify_deadline_secs: default_verify_deadline_secs(),
            verify_max_signatures: default_verify_max_signatures(),
            default_expiry_secs: default_expiry_secs(),
            extension_window_secs: default_extension_window_secs(),
            expiry_sweep_interval_secs: default_sweep_interval_secs(),
            stream_ceiling_secs: default_stream_ceiling_secs(),
            stream_keepalive_secs: default_stream_keepalive_secs(),
            event_bus_capacity: default_event_bus_capacity(),
            webhook_secret: None,
            merchant_webhooks: WebhookConfig::default(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file atomically
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;

        // Write to temporary file first, then rename, so the config file is
        // never left partially written
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, contents)?;

        match std::fs::rename(&temp_path, path) {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(e.into())
            }
        }
    }

    /// Get the complete HTTP server address
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_bind_ip, self.http_bind_port)
    }

    /// Check if authentication is enabled
    pub fn is_auth_enabled(&self) -> bool {
        self.http_password.is_some()
    }

    /// Generate a secure random 32-byte hex password
    pub fn generate_password() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Load or create configuration file with automatic password generation.
    /// Uses atomic file operations to prevent password loss on crash.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let path = path.as_ref();
        let mut password_generated = false;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut config = if path.exists() {
            match Self::load_from_file(path) {
                Ok(cfg) => cfg,
                Err(_) => {
                    // If config file is corrupted, recreate it
                    let cfg = Self::default();
                    cfg.save_to_file(path)?;
                    cfg
                }
            }
        } else {
            let config = Self::default();
            config.save_to_file(path)?;
            config
        };

        if config.http_password.is_none() {
            let generated_password = Self::generate_password();
            config.http_password = Some(generated_password);
            password_generated = true;

            config.save_to_file(path)?;
        }

        Ok((config, password_generated))
    }
}

// Default value functions
fn default_bind_ip() -> String {
    // Use 0.0.0.0 in containerized environments to allow external connections
    if std::env::var("DOCKER_CONTAINER").is_ok()
        || std::env::var("SPAYD_ADDR").is_ok()
        || std::path::Path::new("/.dockerenv").exists()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
    {
        "0.0.0.0".to_string()
    } else {
        "127.0.0.1".to_string()
    }
}

fn default_bind_port() -> u16 {
    7080
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_token_mint() -> String {
    // USDC on mainnet
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string()
}

fn default_amount_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_verify_deadline_secs() -> u64 {
    10
}

fn default_verify_max_signatures() -> usize {
    10
}

fn default_expiry_secs() -> i64 {
    300
}

fn default_extension_window_secs() -> i64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_stream_ceiling_secs() -> u64 {
    15 * 60
}

fn default_stream_keepalive_secs() -> u64 {
    15
}

fn default_event_bus_capacity() -> usize {
    1024
}
