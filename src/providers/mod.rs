// ABOUTME: Provider client boundary - the pluggable capability that fetches external data
// ABOUTME: ProviderClient trait, distinct provider error classes, and the client registry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

//! # Provider Boundary
//!
//! One [`ProviderClient`] implementation exists per provider and translates
//! that provider's wire format into generic [`RawDataPoint`]s. The
//! implementations themselves (HTTP calls, payload parsing) live outside this
//! engine; the orchestrator only sees this trait.

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::{Connection, DateRange, DataType, HealthValue, Provider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// One normalized data point as returned by a provider client
#[derive(Debug, Clone)]
pub struct RawDataPoint {
    /// Measurement category the client claims this point belongs to
    pub data_type: DataType,
    /// When the measurement was taken
    pub recorded_at: DateTime<Utc>,
    /// Typed payload; must match `data_type` to pass validation
    pub value: HealthValue,
    /// Unit string as reported by the provider
    pub unit: String,
}

/// Failure classes a provider client must distinguish.
///
/// Rate-limit and auth-expiry surface distinctly from generic failures so the
/// retry-threshold policy can route auth failures to re-authorization instead
/// of silent retries.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider rejected the request for exceeding a rate limit
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    /// Provider rejected the stored credentials
    #[error("provider authorization expired: {0}")]
    AuthExpired(String),
    /// Transport-level failure (DNS, TLS, connection reset, 5xx)
    #[error("provider request failed: {0}")]
    Network(String),
    /// Response arrived but could not be parsed into data points
    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),
}

impl ProviderError {
    /// Stable code recorded in sync attempt error entries
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::AuthExpired(_) => "auth_expired",
            Self::Network(_) => "network_error",
            Self::MalformedPayload(_) => "malformed_payload",
        }
    }
}

/// Pluggable data-fetch capability, one implementation per provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch data points for the connection over the given window.
    ///
    /// This is the only network-bound step of a sync; the orchestrator wraps
    /// it in a hard deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] classifying the failure.
    async fn fetch(
        &self,
        connection: &Connection,
        range: DateRange,
    ) -> Result<Vec<RawDataPoint>, ProviderError>;
}

/// Registry mapping providers to their client implementations.
///
/// Injected into the orchestrator; tests register scripted mocks.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the client for a provider
    pub fn register(&mut self, provider: Provider, client: Arc<dyn ProviderClient>) {
        self.clients.insert(provider, client);
    }

    /// Look up the client for a provider.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` when no client is registered.
    pub fn get(&self, provider: Provider) -> AppResult<Arc<dyn ProviderClient>> {
        self.clients.get(&provider).cloned().ok_or_else(|| {
            AppError::new(
                ErrorCode::UnknownProvider,
                format!("no provider client registered for '{provider}'"),
            )
        })
    }

    /// Whether a client is registered for the provider
    #[must_use]
    pub fn is_supported(&self, provider: Provider) -> bool {
        self.clients.contains_key(&provider)
    }

    /// Providers with a registered client
    #[must_use]
    pub fn supported_providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.clients.keys().copied().collect();
        providers.sort();
        providers
    }
}
