pub mod ingest;
pub mod notifier;

pub use ingest::{IngestOutcome, ProviderTransactionEvent, WebhookIngestor};
pub use notifier::{RetryConfig, WebhookConfig, WebhookEndpoint, WebhookNotifier};
