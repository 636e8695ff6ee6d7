// ABOUTME: OAuth/auth coordinator - builds authorization requests and finalizes grants
// ABOUTME: Branches per auth type; actual token exchange sits behind the TokenExchanger trait
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::catalog::IntegrationCatalog;
use crate::config::EngineConfig;
use crate::database::connections::ConnectionCredentials;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{AuthType, Provider};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Result of an external credential exchange
#[derive(Debug, Clone)]
pub struct TokenExchange {
    /// Provider access token
    pub access_token: String,
    /// Provider refresh token, when issued
    pub refresh_token: Option<String>,
    /// Access token expiry, when reported
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes the user actually granted
    pub granted_scopes: Vec<String>,
}

/// External token-exchange capability (the real HTTP exchange lives outside
/// this engine)
#[async_trait::async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code for provider credentials.
    ///
    /// # Errors
    ///
    /// Returns `AuthExchangeFailed` when the external exchange is rejected.
    async fn exchange(&self, provider: Provider, code: &str) -> AppResult<TokenExchange>;
}

/// What the user presents to finalize a connection; one variant per auth type
#[derive(Debug, Clone)]
pub enum AuthGrant {
    /// OAuth2 authorization-code flow result
    OAuth2 {
        /// Authorization code returned by the provider
        code: String,
        /// State issued by [`AuthCoordinator::begin_authorization`]
        state: String,
    },
    /// User-supplied API key
    ApiKey {
        /// The key itself
        key: String,
    },
    /// Native on-device integration handshake
    Native {
        /// Opaque device identifier from the companion app
        device_identifier: String,
    },
}

/// How the caller must proceed after initiating a connection.
///
/// Two completion contracts under one operation: OAuth2 providers hand back a
/// redirect, api-key/native providers complete without one. Callers branch on
/// the variant.
#[derive(Debug, Clone)]
pub enum ConnectAction {
    /// Send the user to the provider's authorization page
    Authorize {
        /// Full authorization URL including client id, scopes, and state
        authorization_url: String,
        /// State the callback must return
        state: String,
    },
    /// No redirect needed; call `complete` directly with the matching grant
    NoRedirect {
        /// Provider being connected
        provider: Provider,
        /// Which grant variant `complete` expects
        auth_type: AuthType,
    },
}

/// Builds authorization requests and turns grants into storable credentials
pub struct AuthCoordinator {
    catalog: Arc<IntegrationCatalog>,
    database: Database,
    config: Arc<EngineConfig>,
    exchanger: Arc<dyn TokenExchanger>,
}

impl AuthCoordinator {
    /// Wire up the coordinator
    #[must_use]
    pub fn new(
        catalog: Arc<IntegrationCatalog>,
        database: Database,
        config: Arc<EngineConfig>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Self {
        Self {
            catalog,
            database,
            config,
            exchanger,
        }
    }

    /// Start the connection flow for a provider.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` on a catalog miss, `ConfigError` when an
    /// OAuth2 provider has no configured client credentials, or a database
    /// error if the state cannot be persisted.
    pub async fn begin_authorization(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<ConnectAction> {
        let definition = self.catalog.get(provider)?;

        match definition.auth_type {
            AuthType::OAuth2 => {
                let credentials = self.config.oauth_credentials(provider)?;
                let authorize_url = definition.authorize_url.ok_or_else(|| {
                    AppError::config(format!(
                        "provider '{provider}' uses oauth2 but has no authorize URL in the catalog"
                    ))
                })?;

                let state = build_state(user_id);
                let ttl = Duration::seconds(
                    i64::try_from(self.config.auth_state_ttl.as_secs()).unwrap_or(600),
                );
                self.database
                    .store_auth_state(&state, user_id, provider, Utc::now() + ttl)
                    .await?;

                let redirect_uri = format!(
                    "{}/api/oauth/callback/{}",
                    self.config.oauth_redirect_base,
                    provider.as_str()
                );
                let scope = definition.required_scopes.join(" ");
                let url = Url::parse_with_params(
                    authorize_url,
                    &[
                        ("client_id", credentials.client_id.as_str()),
                        ("redirect_uri", redirect_uri.as_str()),
                        ("response_type", "code"),
                        ("scope", scope.as_str()),
                        ("state", state.as_str()),
                    ],
                )
                .map_err(|e| AppError::config(format!("invalid authorize URL: {e}")))?;

                info!(user_id = %user_id, provider = %provider, "issued authorization URL");
                Ok(ConnectAction::Authorize {
                    authorization_url: url.into(),
                    state,
                })
            }
            auth_type @ (AuthType::ApiKey | AuthType::Native) => {
                debug!(user_id = %user_id, provider = %provider, "no redirect needed");
                Ok(ConnectAction::NoRedirect {
                    provider,
                    auth_type,
                })
            }
        }
    }

    /// Turn a grant into storable connection credentials.
    ///
    /// Branches on the provider's auth type; a grant variant that does not
    /// match it is rejected rather than coerced.
    ///
    /// # Errors
    ///
    /// Returns `AuthExchangeFailed` when the grant does not match the
    /// provider's auth type, the state cannot be redeemed, or the external
    /// exchange fails.
    pub async fn finalize(
        &self,
        user_id: Uuid,
        provider: Provider,
        grant: AuthGrant,
    ) -> AppResult<TokenExchange> {
        let definition = self.catalog.get(provider)?;

        match (definition.auth_type, grant) {
            (AuthType::OAuth2, AuthGrant::OAuth2 { code, state }) => {
                self.database
                    .redeem_auth_state(&state, user_id, provider)
                    .await?;
                let exchange = self.exchanger.exchange(provider, &code).await?;
                info!(user_id = %user_id, provider = %provider, "token exchange succeeded");
                Ok(exchange)
            }
            (AuthType::ApiKey, AuthGrant::ApiKey { key }) => Ok(TokenExchange {
                access_token: key,
                refresh_token: None,
                expires_at: None,
                granted_scopes: Vec::new(),
            }),
            (AuthType::Native, AuthGrant::Native { device_identifier }) => Ok(TokenExchange {
                access_token: device_identifier,
                refresh_token: None,
                expires_at: None,
                granted_scopes: Vec::new(),
            }),
            (expected, _) => Err(AppError::auth_exchange(format!(
                "grant does not match provider '{provider}' auth type '{}'",
                expected.as_str()
            ))),
        }
    }
}

impl TokenExchange {
    /// Borrow as credentials for the connection upsert
    #[must_use]
    pub fn as_credentials(&self) -> ConnectionCredentials<'_> {
        ConnectionCredentials {
            access_token: &self.access_token,
            refresh_token: self.refresh_token.as_deref(),
            token_expiry: self.expires_at,
            granted_scopes: &self.granted_scopes,
        }
    }
}

/// CSRF state: `user_id:nonce`
fn build_state(user_id: Uuid) -> String {
    format!("{user_id}:{}", Uuid::new_v4())
}
