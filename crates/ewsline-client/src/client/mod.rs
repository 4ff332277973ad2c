//! Request execution.

mod builder;
mod config;
mod core;

pub use builder::ServiceClientBuilder;
pub use config::{ClientConfig, LOG_PAYLOADS_ENV_VAR};
pub use self::core::ServiceClient;
