// ABOUTME: Connection manager owning the per-(user, provider) lifecycle state machine
// ABOUTME: Registration, enable/pause mirroring, idempotent disconnect, and query surface
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::catalog::IntegrationCatalog;
use crate::database::connections::ConnectionCredentials;
use crate::database::Database;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::events::{ConnectionStatusEvent, EventSink};
use crate::models::{Connection, ConnectionStatus, DataType, Provider};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Owns connection rows and enforces the lifecycle state machine.
///
/// `pending -> active <-> paused`, `active -> error`, `error -> active` on the
/// next successful sync, any non-terminal state `-> disconnected`. Rows are
/// never hard-deleted; reconnecting re-enters `pending` on the same row.
pub struct ConnectionManager {
    catalog: Arc<IntegrationCatalog>,
    database: Database,
    events: Arc<dyn EventSink>,
}

impl ConnectionManager {
    /// Wire up the manager
    #[must_use]
    pub fn new(
        catalog: Arc<IntegrationCatalog>,
        database: Database,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog,
            database,
            events,
        }
    }

    /// Upsert a connection into `pending` after a successful credential
    /// exchange.
    ///
    /// A previously disconnected row is reused: this starts a new logical
    /// lifecycle while preserving sync/record history.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` on a catalog miss or a database error.
    pub async fn register_pending(
        &self,
        user_id: Uuid,
        provider: Provider,
        credentials: &ConnectionCredentials<'_>,
    ) -> AppResult<Connection> {
        self.catalog.get(provider)?;

        let previous = self
            .database
            .get_connection(user_id, provider)
            .await?
            .map(|c| c.status);

        let connection = self
            .database
            .upsert_connection_pending(user_id, provider, credentials)
            .await?;

        info!(user_id = %user_id, provider = %provider, "connection registered as pending");
        self.emit_status(user_id, provider, previous, ConnectionStatus::Pending);
        Ok(connection)
    }

    /// Transition a pending connection to active once its first sync attempt
    /// has been recorded.
    ///
    /// Scheduling, not completion, is what exits `pending`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when no row exists or a database error.
    pub async fn activate_scheduled(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<Connection> {
        let connection = self.database.get_connection_required(user_id, provider).await?;
        if connection.status != ConnectionStatus::Pending {
            return Ok(connection);
        }

        self.database
            .update_connection_state(user_id, provider, ConnectionStatus::Active, true)
            .await?;
        self.emit_status(
            user_id,
            provider,
            Some(ConnectionStatus::Pending),
            ConnectionStatus::Active,
        );
        self.database.get_connection_required(user_id, provider).await
    }

    /// Toggle the user enable flag, mirroring it into active/paused status.
    ///
    /// Disabling does not clear tokens; the transition is reversible.
    /// Pending and error connections keep their status and only record the
    /// flag; they leave those states through their own transitions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConnectionState` for a disconnected connection,
    /// `ResourceNotFound` when no row exists, or a database error.
    pub async fn set_enabled(
        &self,
        user_id: Uuid,
        provider: Provider,
        enabled: bool,
    ) -> AppResult<Connection> {
        self.catalog.get(provider)?;
        let connection = self.database.get_connection_required(user_id, provider).await?;

        if connection.status == ConnectionStatus::Disconnected {
            return Err(AppError::new(
                ErrorCode::InvalidConnectionState,
                format!("connection for '{provider}' is disconnected; re-authorize instead"),
            ));
        }

        // Pending and error connections only record the flag. Pending exits
        // via initial-sync scheduling; error exits via the next successful
        // sync, which also resets the retry counter. Flipping error straight
        // to active here would leave the counter at the threshold and
        // re-demote on the first transient failure.
        let new_status = if matches!(
            connection.status,
            ConnectionStatus::Pending | ConnectionStatus::Error
        ) {
            connection.status
        } else if enabled {
            ConnectionStatus::Active
        } else {
            ConnectionStatus::Paused
        };

        self.database
            .update_connection_state(user_id, provider, new_status, enabled)
            .await?;

        if new_status != connection.status {
            self.emit_status(user_id, provider, Some(connection.status), new_status);
        }
        self.database.get_connection_required(user_id, provider).await
    }

    /// Disconnect a provider: terminal for this lifecycle, tokens cleared.
    ///
    /// Idempotent: disconnecting an already-disconnected connection is a
    /// no-op success.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when no row exists or a database error.
    pub async fn disconnect(&self, user_id: Uuid, provider: Provider) -> AppResult<Connection> {
        self.catalog.get(provider)?;
        let connection = self.database.get_connection_required(user_id, provider).await?;

        if connection.status == ConnectionStatus::Disconnected {
            return Ok(connection);
        }

        self.database
            .disconnect_connection(user_id, provider, Utc::now())
            .await?;
        info!(user_id = %user_id, provider = %provider, "connection disconnected");
        self.emit_status(
            user_id,
            provider,
            Some(connection.status),
            ConnectionStatus::Disconnected,
        );
        self.database.get_connection_required(user_id, provider).await
    }

    /// Declare (or clear) the data types this provider is primary for.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when a type is not produced by the provider,
    /// `ResourceNotFound` when no row exists, or a database error.
    pub async fn set_primary_data_types(
        &self,
        user_id: Uuid,
        provider: Provider,
        data_types: BTreeSet<DataType>,
    ) -> AppResult<Connection> {
        let definition = self.catalog.get(provider)?;
        for data_type in &data_types {
            if !definition.data_types.contains(data_type) {
                return Err(AppError::validation(format!(
                    "provider '{provider}' does not produce data type '{data_type}'"
                )));
            }
        }

        self.database.get_connection_required(user_id, provider).await?;
        self.database
            .set_primary_data_types(user_id, provider, &data_types)
            .await?;
        self.database.get_connection_required(user_id, provider).await
    }

    /// All connections for a user
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn list_connections(&self, user_id: Uuid) -> AppResult<Vec<Connection>> {
        self.database.list_connections(user_id).await
    }

    /// Current status for one (user, provider), `None` when never connected
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` on a catalog miss or a database error.
    pub async fn get_connection_status(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<Option<ConnectionStatus>> {
        self.catalog.get(provider)?;
        Ok(self
            .database
            .get_connection(user_id, provider)
            .await?
            .map(|c| c.status))
    }

    fn emit_status(
        &self,
        user_id: Uuid,
        provider: Provider,
        previous: Option<ConnectionStatus>,
        current: ConnectionStatus,
    ) {
        self.events.connection_status_changed(&ConnectionStatusEvent {
            user_id,
            provider,
            previous,
            current,
            at: Utc::now(),
        });
    }
}
