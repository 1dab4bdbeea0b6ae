//! Controller configuration
//!
//! A single configuration record loaded once at startup and passed to all
//! services by value. No environment variables are required: every option
//! has a default, and the hosting layer may map `ARTZAIN_*` variables onto
//! the record.

mod dto;
mod error;
mod loader;
mod validator;

pub use dto::{
    CanaryDefaults, ControllerConfigDto, ExecutorConfig, HealthWeightsConfig, LoggingConfig,
    NatsConfig, PriceTableConfig, RollbackDefaults,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::validate_controller_config;
