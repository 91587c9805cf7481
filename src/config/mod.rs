//! Router Configuration System
//!
//! Configuration is an explicit value: load it once and pass the relevant
//! section into the filters, queries and loggers that need it.
//!
//! # Configuration Sources
//!
//! In order of precedence:
//! 1. Environment variables prefixed with `DAQ_ROUTER_`
//! 2. TOML configuration file
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use daq_router::config::RouterConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RouterConfig::load_from("config/router.toml")?;
//!     println!("Log level: {}", config.application.log_level);
//!     println!("Dark flag: {}", config.correlation.dark_flag);
//!     Ok(())
//! }
//! ```

pub mod router_config;

pub use router_config::{
    ApplicationConfig, ConfigError, CorrelationConfig, LogFormat, RouterConfig, TransportConfig, ENV_PREFIX,
};
