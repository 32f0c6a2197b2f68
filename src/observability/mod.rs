pub mod correlation;
pub mod logging;

pub use correlation::{request_id_middleware, RequestContext};
pub use logging::{init_logging, LoggingConfig};
