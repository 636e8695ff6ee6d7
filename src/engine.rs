// ABOUTME: Integration engine facade wiring catalog, auth, connections, sync, and resolution
// ABOUTME: The single entry point callers (and tests) construct and talk to
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::catalog::{IntegrationCatalog, IntegrationDefinition};
use crate::config::EngineConfig;
use crate::connections::ConnectionManager;
use crate::database::Database;
use crate::errors::AppResult;
use crate::events::{EventSink, LoggingEventSink};
use crate::golden::GoldenSourceResolver;
use crate::models::{
    Connection, ConnectionStatus, DataType, DateRange, GoldenSourceConfig, HealthDataRecord,
    Provider, SyncAttempt,
};
use crate::oauth::{AuthCoordinator, AuthGrant, ConnectAction, TokenExchanger};
use crate::providers::ProviderRegistry;
use crate::sync::{SyncOptions, SyncOrchestrator};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// The assembled integration engine.
///
/// Composes the catalog, auth coordinator, connection manager, sync
/// orchestrator, and golden-source resolver over one shared database pool.
/// Each component is also usable on its own; this facade provides the
/// cross-component flows (notably connect-then-initial-sync) and is what a
/// serving layer embeds.
pub struct IntegrationEngine {
    catalog: Arc<IntegrationCatalog>,
    database: Database,
    auth: AuthCoordinator,
    connections: Arc<ConnectionManager>,
    sync: SyncOrchestrator,
    golden: GoldenSourceResolver,
}

/// Builder collecting the engine's injected capabilities
pub struct IntegrationEngineBuilder {
    config: Arc<EngineConfig>,
    catalog: Option<IntegrationCatalog>,
    registry: ProviderRegistry,
    exchanger: Option<Arc<dyn TokenExchanger>>,
    events: Option<Arc<dyn EventSink>>,
}

impl IntegrationEngine {
    /// Start building an engine from configuration
    #[must_use]
    pub fn builder(config: EngineConfig) -> IntegrationEngineBuilder {
        IntegrationEngineBuilder {
            config: Arc::new(config),
            catalog: None,
            registry: ProviderRegistry::new(),
            exchanger: None,
            events: None,
        }
    }

    /// All provider definitions in the catalog
    #[must_use]
    pub fn list_integrations(&self) -> &[IntegrationDefinition] {
        self.catalog.list_definitions()
    }

    /// Start connecting a provider for a user.
    ///
    /// OAuth2 providers return [`ConnectAction::Authorize`] with a redirect
    /// URL; api-key and native providers return [`ConnectAction::NoRedirect`]
    /// and the caller proceeds straight to [`Self::complete_connection`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider`, `ConfigError`, or a database error.
    pub async fn initiate_connection(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<ConnectAction> {
        self.auth.begin_authorization(user_id, provider).await
    }

    /// Finish connecting a provider: exchange the grant, register the
    /// connection as pending, and trigger the initial sync, which moves it to
    /// active once the attempt is scheduled.
    ///
    /// The initial sync outcome does not gate the connection: a failed first
    /// fetch leaves an active connection with a logged failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `AuthExchangeFailed` when the grant is rejected,
    /// `UnknownProvider` on a catalog miss, or a database error.
    pub async fn complete_connection(
        &self,
        user_id: Uuid,
        provider: Provider,
        grant: AuthGrant,
    ) -> AppResult<Connection> {
        let exchange = self.auth.finalize(user_id, provider, grant).await?;
        self.connections
            .register_pending(user_id, provider, &exchange.as_credentials())
            .await?;

        // Fetch failures are already absorbed into the attempt log; only
        // claim conflicts and infrastructure errors surface here.
        self.sync
            .trigger_sync(user_id, provider, SyncOptions::initial())
            .await?;

        self.connections
            .list_connections(user_id)
            .await?
            .into_iter()
            .find(|c| c.provider == provider)
            .ok_or_else(|| {
                crate::errors::AppError::not_found(format!(
                    "no connection found for provider '{provider}' after registration"
                ))
            })
    }

    /// Trigger a sync for one connection
    ///
    /// # Errors
    ///
    /// Returns `IntegrationNotActive`, `SyncInProgress`, `UnknownProvider`,
    /// `ResourceNotFound`, or a database error.
    pub async fn trigger_sync(
        &self,
        user_id: Uuid,
        provider: Provider,
        options: SyncOptions,
    ) -> AppResult<SyncAttempt> {
        self.sync.trigger_sync(user_id, provider, options).await
    }

    /// Enable or pause a connection
    ///
    /// # Errors
    ///
    /// Returns `InvalidConnectionState` for disconnected connections,
    /// `ResourceNotFound`, or a database error.
    pub async fn set_enabled(
        &self,
        user_id: Uuid,
        provider: Provider,
        enabled: bool,
    ) -> AppResult<Connection> {
        self.connections.set_enabled(user_id, provider, enabled).await
    }

    /// Disconnect a provider (idempotent)
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` or a database error.
    pub async fn disconnect(&self, user_id: Uuid, provider: Provider) -> AppResult<Connection> {
        self.connections.disconnect(user_id, provider).await
    }

    /// Declare the data types a provider is the user's primary source for
    ///
    /// # Errors
    ///
    /// Returns `ValidationError`, `ResourceNotFound`, or a database error.
    pub async fn set_primary_data_types(
        &self,
        user_id: Uuid,
        provider: Provider,
        data_types: BTreeSet<DataType>,
    ) -> AppResult<Connection> {
        self.connections
            .set_primary_data_types(user_id, provider, data_types)
            .await
    }

    /// All connections for a user
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn list_connections(&self, user_id: Uuid) -> AppResult<Vec<Connection>> {
        self.connections.list_connections(user_id).await
    }

    /// Status of one connection, `None` when the user never connected it
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` or a database error.
    pub async fn get_connection_status(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<Option<ConnectionStatus>> {
        self.connections.get_connection_status(user_id, provider).await
    }

    /// Current golden-source ranking across all data types
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn golden_source_config(&self, user_id: Uuid) -> AppResult<GoldenSourceConfig> {
        self.golden.resolve(user_id).await
    }

    /// Golden source for one data type
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn golden_source_for(
        &self,
        user_id: Uuid,
        data_type: DataType,
    ) -> AppResult<Option<Provider>> {
        self.golden.resolve_one(user_id, data_type).await
    }

    /// Stored records for one user and data type, oldest first.
    ///
    /// Records carry no foreign key to a connection beyond the provider, so
    /// data ingested before a disconnect stays readable afterwards.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn get_health_records(
        &self,
        user_id: Uuid,
        data_type: DataType,
        range: Option<DateRange>,
    ) -> AppResult<Vec<HealthDataRecord>> {
        self.database.get_health_records(user_id, data_type, range).await
    }

    /// Recent sync attempts for a connection, newest first
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn list_recent_sync_attempts(
        &self,
        connection_id: &str,
        limit: u32,
    ) -> AppResult<Vec<SyncAttempt>> {
        self.sync.list_recent_sync_attempts(connection_id, limit).await
    }

    /// Close sync attempts orphaned past the deadline
    ///
    /// # Errors
    ///
    /// Returns a database error if the sweep fails.
    pub async fn sweep_stale_attempts(&self) -> AppResult<u32> {
        self.sync.sweep_stale_attempts().await
    }
}

impl IntegrationEngineBuilder {
    /// Substitute a catalog (tests use a reduced one)
    #[must_use]
    pub fn with_catalog(mut self, catalog: IntegrationCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Register a provider client
    #[must_use]
    pub fn with_provider_client(
        mut self,
        provider: Provider,
        client: Arc<dyn crate::providers::ProviderClient>,
    ) -> Self {
        self.registry.register(provider, client);
        self
    }

    /// Set the token exchanger used to finalize OAuth2 grants
    #[must_use]
    pub fn with_token_exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Substitute the event sink (defaults to structured logging)
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the database and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when no token exchanger was provided, a catalog
    /// `ValidationError`, or a database error.
    pub async fn build(self, encryption_key: Vec<u8>) -> AppResult<IntegrationEngine> {
        let catalog = Arc::new(self.catalog.map_or_else(IntegrationCatalog::builtin, Ok)?);
        let exchanger = self.exchanger.ok_or_else(|| {
            crate::errors::AppError::config("engine requires a token exchanger")
        })?;
        let events: Arc<dyn EventSink> = self
            .events
            .unwrap_or_else(|| Arc::new(LoggingEventSink));

        let database = Database::new(&self.config.database_url, encryption_key).await?;

        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&catalog),
            database.clone(),
            Arc::clone(&events),
        ));
        let auth = AuthCoordinator::new(
            Arc::clone(&catalog),
            database.clone(),
            Arc::clone(&self.config),
            exchanger,
        );
        let sync = SyncOrchestrator::new(
            Arc::clone(&catalog),
            database.clone(),
            Arc::clone(&connections),
            Arc::new(self.registry),
            Arc::clone(&self.config),
            Arc::clone(&events),
        );
        let golden = GoldenSourceResolver::new(Arc::clone(&catalog), database.clone());

        Ok(IntegrationEngine {
            catalog,
            database,
            auth,
            connections,
            sync,
            golden,
        })
    }
}
