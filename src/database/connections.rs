// ABOUTME: Database operations for per-(user, provider) connection rows
// ABOUTME: Upsert on re-authorization, lifecycle updates, and sync bookkeeping writes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use super::{parse_ts, parse_ts_opt, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Connection, ConnectionStatus, DataType, InitialSyncProgress, Provider, SyncStatus,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Credentials persisted when a connection is (re-)authorized
pub struct ConnectionCredentials<'a> {
    /// Provider access token (plaintext; encrypted at rest)
    pub access_token: &'a str,
    /// Optional refresh token (plaintext; encrypted at rest)
    pub refresh_token: Option<&'a str>,
    /// Access token expiry, when the provider reports one
    pub token_expiry: Option<DateTime<Utc>>,
    /// Scopes the user actually granted
    pub granted_scopes: &'a [String],
}

fn token_aad(user_id: Uuid, provider: Provider) -> String {
    format!("{user_id}|{}|connections", provider.as_str())
}

impl Database {
    /// Upsert a connection into `pending` on (re-)authorization.
    ///
    /// A re-authorization of a previously disconnected (user, provider) reuses
    /// the same row: tokens and scopes are replaced, the lifecycle fields are
    /// reset, and history (sync attempts, health records) is preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the database write fails.
    pub async fn upsert_connection_pending(
        &self,
        user_id: Uuid,
        provider: Provider,
        credentials: &ConnectionCredentials<'_>,
    ) -> AppResult<Connection> {
        let aad = token_aad(user_id, provider);
        let access_token = self.encrypt_token(credentials.access_token, &aad)?;
        let refresh_token = credentials
            .refresh_token
            .map(|rt| self.encrypt_token(rt, &aad))
            .transpose()?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let scopes = serde_json::to_string(credentials.granted_scopes)?;

        sqlx::query(
            r"
            INSERT INTO connections (
                id, user_id, provider, access_token, refresh_token, token_expiry,
                granted_scopes, status, is_enabled, connected_at,
                sync_retry_count, initial_sync_complete, primary_for_data_types
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 1, ?, 0, 0, '[]')
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expiry = excluded.token_expiry,
                granted_scopes = excluded.granted_scopes,
                status = 'pending',
                is_enabled = 1,
                connected_at = excluded.connected_at,
                disconnected_at = NULL,
                sync_retry_count = 0,
                initial_sync_complete = 0,
                initial_sync_progress = NULL
            ",
        )
        .bind(&id)
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .bind(&access_token)
        .bind(refresh_token.as_deref())
        .bind(credentials.token_expiry.map(|t| t.to_rfc3339()))
        .bind(&scopes)
        .bind(&now)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to upsert connection: {e}")))?;

        self.get_connection_required(user_id, provider).await
    }

    /// Get a connection row, if one exists
    ///
    /// # Errors
    ///
    /// Returns an error if the query or token decryption fails.
    pub async fn get_connection(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<Option<Connection>> {
        let row = sqlx::query("SELECT * FROM connections WHERE user_id = ? AND provider = ?")
            .bind(user_id.to_string())
            .bind(provider.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to query connection: {e}")))?;

        row.map(|r| self.row_to_connection(&r)).transpose()
    }

    /// Get a connection row, failing when absent
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when no row exists for (user, provider).
    pub async fn get_connection_required(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<Connection> {
        self.get_connection(user_id, provider).await?.ok_or_else(|| {
            AppError::not_found(format!(
                "no connection found for user {user_id} and provider '{provider}'"
            ))
        })
    }

    /// All connection rows for a user, most recently connected first
    ///
    /// # Errors
    ///
    /// Returns an error if the query or token decryption fails.
    pub async fn list_connections(&self, user_id: Uuid) -> AppResult<Vec<Connection>> {
        let rows = sqlx::query(
            "SELECT * FROM connections WHERE user_id = ? ORDER BY connected_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list connections: {e}")))?;

        rows.iter().map(|r| self.row_to_connection(r)).collect()
    }

    /// Update lifecycle status (and mirror of the enable flag)
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn update_connection_state(
        &self,
        user_id: Uuid,
        provider: Provider,
        status: ConnectionStatus,
        is_enabled: bool,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE connections SET status = ?, is_enabled = ? WHERE user_id = ? AND provider = ?",
        )
        .bind(status.as_str())
        .bind(i32::from(is_enabled))
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to update connection state: {e}")))?;
        Ok(())
    }

    /// Terminal disconnect: clear both tokens, stamp `disconnected_at`
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn disconnect_connection(
        &self,
        user_id: Uuid,
        provider: Provider,
        disconnected_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            UPDATE connections
            SET status = 'disconnected',
                disconnected_at = ?,
                access_token = NULL,
                refresh_token = NULL,
                token_expiry = NULL,
                next_sync_at = NULL
            WHERE user_id = ? AND provider = ?
            ",
        )
        .bind(disconnected_at.to_rfc3339())
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to disconnect connection: {e}")))?;
        Ok(())
    }

    /// Persist the sync-health fields after an attempt closes.
    ///
    /// Writes last sync time/outcome, the consecutive-failure counter, the
    /// advisory next-poll time, status, and initial-sync progress from the
    /// in-memory connection the orchestrator updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn update_sync_state(&self, connection: &Connection) -> AppResult<()> {
        let progress = connection
            .initial_sync_progress
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r"
            UPDATE connections
            SET status = ?,
                last_sync_at = ?,
                last_sync_status = ?,
                sync_retry_count = ?,
                next_sync_at = ?,
                initial_sync_complete = ?,
                initial_sync_progress = ?
            WHERE id = ?
            ",
        )
        .bind(connection.status.as_str())
        .bind(connection.last_sync_at.map(|t| t.to_rfc3339()))
        .bind(connection.last_sync_status.map(SyncStatus::as_str))
        .bind(i64::from(connection.sync_retry_count))
        .bind(connection.next_sync_at.map(|t| t.to_rfc3339()))
        .bind(i32::from(connection.initial_sync_complete))
        .bind(progress)
        .bind(&connection.id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to update sync state: {e}")))?;
        Ok(())
    }

    /// Replace the user's primary-source declarations for this connection
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn set_primary_data_types(
        &self,
        user_id: Uuid,
        provider: Provider,
        data_types: &BTreeSet<DataType>,
    ) -> AppResult<()> {
        let encoded = serde_json::to_string(data_types)?;
        sqlx::query(
            "UPDATE connections SET primary_for_data_types = ? WHERE user_id = ? AND provider = ?",
        )
        .bind(&encoded)
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to set primary data types: {e}")))?;
        Ok(())
    }

    fn row_to_connection(&self, row: &SqliteRow) -> AppResult<Connection> {
        let user_id_str: String = row.get("user_id");
        let user_id = Uuid::parse_str(&user_id_str)?;

        let provider_str: String = row.get("provider");
        let provider = Provider::from_str_value(&provider_str).ok_or_else(|| {
            AppError::database(format!("stored connection references unknown provider '{provider_str}'"))
        })?;

        let status_str: String = row.get("status");
        let status = ConnectionStatus::from_str_value(&status_str).ok_or_else(|| {
            AppError::database(format!("stored connection has unknown status '{status_str}'"))
        })?;

        let aad = token_aad(user_id, provider);
        let access_token = row
            .get::<Option<String>, _>("access_token")
            .map(|t| self.decrypt_token(&t, &aad))
            .transpose()?;
        let refresh_token = row
            .get::<Option<String>, _>("refresh_token")
            .map(|t| self.decrypt_token(&t, &aad))
            .transpose()?;

        let granted_scopes: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("granted_scopes"))?;
        let primary_for_data_types: BTreeSet<DataType> =
            serde_json::from_str(&row.get::<String, _>("primary_for_data_types"))?;
        let initial_sync_progress: Option<InitialSyncProgress> = row
            .get::<Option<String>, _>("initial_sync_progress")
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let last_sync_status = row
            .get::<Option<String>, _>("last_sync_status")
            .as_deref()
            .map(|s| {
                SyncStatus::from_str_value(s).ok_or_else(|| {
                    AppError::database(format!("stored connection has unknown sync status '{s}'"))
                })
            })
            .transpose()?;

        Ok(Connection {
            id: row.get("id"),
            user_id,
            provider,
            access_token,
            refresh_token,
            token_expiry: parse_ts_opt(row.get("token_expiry"))?,
            granted_scopes,
            status,
            is_enabled: row.get::<i64, _>("is_enabled") != 0,
            connected_at: parse_ts(&row.get::<String, _>("connected_at"))?,
            disconnected_at: parse_ts_opt(row.get("disconnected_at"))?,
            last_sync_at: parse_ts_opt(row.get("last_sync_at"))?,
            last_sync_status,
            sync_retry_count: u32::try_from(row.get::<i64, _>("sync_retry_count")).unwrap_or(0),
            next_sync_at: parse_ts_opt(row.get("next_sync_at"))?,
            initial_sync_complete: row.get::<i64, _>("initial_sync_complete") != 0,
            initial_sync_progress,
            primary_for_data_types,
        })
    }
}
