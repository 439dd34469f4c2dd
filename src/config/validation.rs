//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("listen.tls.cert_path does not exist: {0}")]
    TlsCertNotFound(String),
    #[error("listen.tls.key_path does not exist: {0}")]
    TlsKeyNotFound(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("http.address must differ from listen.address ({0})")]
    AddressCollision(String),
    #[error("presence.reconcile_interval_secs must be greater than 0")]
    ZeroReconcileInterval,
    #[error("limits.{0} must be greater than 0")]
    ZeroLimit(&'static str),
    #[error("uploads.allowed_extensions is not a valid pattern: {0}")]
    InvalidUploadPattern(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.trim().is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    if let Some(ref tls) = config.listen.tls {
        if !Path::new(&tls.cert_path).exists() {
            errors.push(ValidationError::TlsCertNotFound(tls.cert_path.clone()));
        }
        if !Path::new(&tls.key_path).exists() {
            errors.push(ValidationError::TlsKeyNotFound(tls.key_path.clone()));
        }
    }

    if let Some(ref http) = config.http
        && http.address == config.listen.address
        && http.address.port() != 0
    {
        errors.push(ValidationError::AddressCollision(http.address.to_string()));
    }

    if config.database.path != ":memory:" {
        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(
                config.database.path.clone(),
            ));
        }
    }

    if config.presence.reconcile_interval_secs == 0 {
        errors.push(ValidationError::ZeroReconcileInterval);
    }

    let limits = &config.limits;
    for (name, value) in [
        ("max_message_length", limits.max_message_length),
        ("send_queue", limits.send_queue),
        ("actor_mailbox_capacity", limits.actor_mailbox_capacity),
        ("max_page_size", limits.max_page_size as usize),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }

    if let Err(e) = crate::security::UploadPolicy::from_config(&config.uploads) {
        errors.push(ValidationError::InvalidUploadPattern(e.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
