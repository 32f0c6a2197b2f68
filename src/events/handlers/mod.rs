pub mod logging;
pub mod metrics;

pub use logging::LoggingEventHandler;
pub use metrics::MetricsEventHandler;
