// ABOUTME: Environment-based engine configuration management
// ABOUTME: Sync policy knobs, database URL, and per-provider OAuth client credentials
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::errors::{AppError, AppResult};
use crate::models::Provider;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// OAuth client credentials for one provider
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    /// Client id issued by the provider
    pub client_id: String,
    /// Client secret issued by the provider
    pub client_secret: String,
}

/// Engine configuration, loaded once from the environment.
///
/// Environment-only configuration, no config files. Every knob has a default
/// so a bare environment still boots.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database connection string (`VITALSYNC_DATABASE_URL`)
    pub database_url: String,
    /// Consecutive sync failures before a connection drops to `error`
    /// (`VITALSYNC_SYNC_RETRY_THRESHOLD`)
    pub retry_threshold: u32,
    /// Hard deadline for one provider fetch (`VITALSYNC_SYNC_TIMEOUT_SECS`)
    pub sync_timeout: Duration,
    /// Days of history covered by the initial sync (`VITALSYNC_INITIAL_SYNC_DAYS`)
    pub initial_sync_days: u32,
    /// Base URL used to build OAuth callback redirects (`VITALSYNC_OAUTH_REDIRECT_BASE`)
    pub oauth_redirect_base: String,
    /// How long an issued authorization state stays redeemable
    /// (`VITALSYNC_AUTH_STATE_TTL_SECS`)
    pub auth_state_ttl: Duration,
    /// Per-provider OAuth client credentials
    /// (`VITALSYNC_<PROVIDER>_CLIENT_ID` / `VITALSYNC_<PROVIDER>_CLIENT_SECRET`)
    pub oauth_clients: HashMap<Provider, OAuthCredentials>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            retry_threshold: 3,
            sync_timeout: Duration::from_secs(120),
            initial_sync_days: 30,
            oauth_redirect_base: "http://localhost:8080".to_owned(),
            auth_state_ttl: Duration::from_secs(600),
            oauth_clients: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a set variable fails to parse; unset
    /// variables fall back to defaults.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let mut oauth_clients = HashMap::new();
        for provider in Provider::ALL {
            let prefix = provider.as_str().to_uppercase();
            let id_var = format!("VITALSYNC_{prefix}_CLIENT_ID");
            let secret_var = format!("VITALSYNC_{prefix}_CLIENT_SECRET");
            if let (Ok(client_id), Ok(client_secret)) = (env::var(&id_var), env::var(&secret_var)) {
                oauth_clients.insert(
                    provider,
                    OAuthCredentials {
                        client_id,
                        client_secret,
                    },
                );
            }
        }

        Ok(Self {
            database_url: env::var("VITALSYNC_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            retry_threshold: parse_env("VITALSYNC_SYNC_RETRY_THRESHOLD", defaults.retry_threshold)?,
            sync_timeout: Duration::from_secs(parse_env(
                "VITALSYNC_SYNC_TIMEOUT_SECS",
                defaults.sync_timeout.as_secs(),
            )?),
            initial_sync_days: parse_env("VITALSYNC_INITIAL_SYNC_DAYS", defaults.initial_sync_days)?,
            oauth_redirect_base: env::var("VITALSYNC_OAUTH_REDIRECT_BASE")
                .unwrap_or(defaults.oauth_redirect_base),
            auth_state_ttl: Duration::from_secs(parse_env(
                "VITALSYNC_AUTH_STATE_TTL_SECS",
                defaults.auth_state_ttl.as_secs(),
            )?),
            oauth_clients,
        })
    }

    /// OAuth client credentials for a provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when no credentials are configured for the
    /// provider.
    pub fn oauth_credentials(&self, provider: Provider) -> AppResult<&OAuthCredentials> {
        self.oauth_clients.get(&provider).ok_or_else(|| {
            AppError::config(format!(
                "no OAuth client credentials configured for provider '{provider}' \
                 (set VITALSYNC_{}_CLIENT_ID / VITALSYNC_{}_CLIENT_SECRET)",
                provider.as_str().to_uppercase(),
                provider.as_str().to_uppercase()
            ))
        })
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> AppResult<T> {
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::config(format!("invalid value for {var}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_threshold, 3);
        assert_eq!(config.initial_sync_days, 30);
        assert!(config.oauth_clients.is_empty());
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let config = EngineConfig::default();
        let err = config.oauth_credentials(Provider::Oura).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ConfigError);
        assert!(err.message.contains("VITALSYNC_OURA_CLIENT_ID"));
    }
}
