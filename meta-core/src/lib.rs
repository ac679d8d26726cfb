//! Foundational types shared across the v2e `meta` orchestration core:
//! the tagged error type, the `Urn` identifier, environment-variable
//! configuration, and `tracing` setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod urn;

pub use config::{Config, ConfigError, LogFormat};
pub use error::{CoreError, CoreResult};
pub use urn::Urn;
