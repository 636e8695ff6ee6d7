// ABOUTME: Unified error handling system with standard error codes for the integration engine
// ABOUTME: Provides AppError, ErrorCode, and the AppResult alias used by every component
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::models::Provider;
use thiserror::Error;

/// Result alias used across the engine
pub type AppResult<T> = Result<T, AppError>;

/// Machine-readable error codes for the integration engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Provider id not present in the integration catalog
    UnknownProvider,
    /// Caller tried to sync a connection that is not in a syncable state
    IntegrationNotActive,
    /// A sync is already in flight for this connection
    SyncInProgress,
    /// External OAuth/token exchange step failed
    AuthExchangeFailed,
    /// Provider data fetch failed (transient, absorbed into retry bookkeeping)
    ProviderFetchFailed,
    /// Operation is invalid for the connection's current lifecycle state
    InvalidConnectionState,
    /// Requested resource does not exist
    ResourceNotFound,
    /// Input failed validation
    ValidationError,
    /// Configuration is missing or malformed
    ConfigError,
    /// Database operation failed
    DatabaseError,
    /// Unexpected internal failure
    InternalError,
}

impl ErrorCode {
    /// Stable string form used in logs and sync attempt error entries
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownProvider => "unknown_provider",
            Self::IntegrationNotActive => "integration_not_active",
            Self::SyncInProgress => "sync_in_progress",
            Self::AuthExchangeFailed => "auth_exchange_failed",
            Self::ProviderFetchFailed => "provider_fetch_failed",
            Self::InvalidConnectionState => "invalid_connection_state",
            Self::ResourceNotFound => "resource_not_found",
            Self::ValidationError => "validation_error",
            Self::ConfigError => "config_error",
            Self::DatabaseError => "database_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified application error carrying a code and human-readable message
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
}

impl AppError {
    /// Create an error with an explicit code
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Catalog miss for a provider id
    #[must_use]
    pub fn unknown_provider(provider: &str) -> Self {
        Self::new(
            ErrorCode::UnknownProvider,
            format!("provider '{provider}' is not registered in the integration catalog"),
        )
    }

    /// Caller tried to sync a non-syncable connection
    #[must_use]
    pub fn not_active(provider: Provider, detail: &str) -> Self {
        Self::new(
            ErrorCode::IntegrationNotActive,
            format!("connection for provider '{provider}' cannot be synced: {detail}"),
        )
    }

    /// A sync attempt is already open for this connection
    #[must_use]
    pub fn sync_in_progress(connection_id: &str) -> Self {
        Self::new(
            ErrorCode::SyncInProgress,
            format!("a sync attempt is already in flight for connection {connection_id}"),
        )
    }

    /// OAuth/token exchange failure
    #[must_use]
    pub fn auth_exchange(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthExchangeFailed, message)
    }

    /// Missing resource
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, message)
    }

    /// Validation failure
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Configuration failure
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Database failure
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Unexpected internal failure
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(format!("database operation failed: {err}"))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        Self::database(format!("invalid UUID in stored data: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::database(format!("invalid JSON in stored data: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_code_and_message() {
        let err = AppError::unknown_provider("polar");
        assert_eq!(err.code, ErrorCode::UnknownProvider);
        assert!(err.to_string().starts_with("unknown_provider: "));
        assert!(err.to_string().contains("polar"));
    }
}
