//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("store.url must not be empty")]
    MissingStoreUrl,
    #[error("broker.url must not be empty")]
    MissingBrokerUrl,
    #[error("tls.cert_path does not exist: {0}")]
    TlsCertNotFound(String),
    #[error("tls.key_path does not exist: {0}")]
    TlsKeyNotFound(String),
    #[error("channels.max_members must be at least 2, got {0}")]
    InvalidMaxMembers(usize),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.store.url.is_empty() {
        errors.push(ValidationError::MissingStoreUrl);
    }
    if config.broker.url.is_empty() {
        errors.push(ValidationError::MissingBrokerUrl);
    }

    if let Some(ref tls) = config.tls {
        if !Path::new(&tls.cert_path).exists() {
            errors.push(ValidationError::TlsCertNotFound(tls.cert_path.clone()));
        }
        if !Path::new(&tls.key_path).exists() {
            errors.push(ValidationError::TlsKeyNotFound(tls.key_path.clone()));
        }
    }

    if config.channels.max_members < 2 {
        errors.push(ValidationError::InvalidMaxMembers(config.channels.max_members));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
