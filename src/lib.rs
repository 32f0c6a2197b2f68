// Library exports for the daemon binary, integration tests and embedders
pub mod auth;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod invoice;
pub mod metrics;
pub mod observability;
pub mod pay;
pub mod router;
pub mod services;
pub mod state;
pub mod types;
pub mod webhooks;
