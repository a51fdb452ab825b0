/// Tracing subscriber setup.
pub mod telemetry;
/// TOML-based configuration with reload support.
pub mod toml_config;

pub use telemetry::init_tracing;
pub use toml_config::{HypatiaConfig, HypatiaConfigManager};
