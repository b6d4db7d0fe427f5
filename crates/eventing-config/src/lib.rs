//! # Eventing Config
//!
//! Configuration management for the eventing job system: TOML loading with
//! `${VAR}` substitution, typed schema, and validation.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
