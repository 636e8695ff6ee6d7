// ABOUTME: Sync orchestrator - triggers provider fetches with claim, deadline, and retry policy
// ABOUTME: Absorbs fetch failures into the attempt log instead of propagating them to callers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::catalog::IntegrationCatalog;
use crate::config::EngineConfig;
use crate::connections::ConnectionManager;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::events::{ConnectionStatusEvent, EventSink, SyncCompletedEvent};
use crate::models::{
    Connection, ConnectionStatus, DateRange, HealthDataRecord, InitialSyncProgress, Provider,
    SyncAttempt, SyncErrorEntry, SyncStatus, SyncType,
};
use crate::providers::{ProviderRegistry, RawDataPoint};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Options for one sync trigger
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// What kind of sync this is
    pub sync_type: SyncType,
    /// Explicit window override; defaults are derived from the sync type
    pub date_range: Option<DateRange>,
}

impl SyncOptions {
    /// Initial sync over the configured window
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            sync_type: SyncType::Initial,
            date_range: None,
        }
    }

    /// User-requested sync
    #[must_use]
    pub const fn manual() -> Self {
        Self {
            sync_type: SyncType::Manual,
            date_range: None,
        }
    }

    /// Scheduler-requested sync
    #[must_use]
    pub const fn scheduled() -> Self {
        Self {
            sync_type: SyncType::Scheduled,
            date_range: None,
        }
    }
}

/// Removes the in-process claim when a trigger finishes, on every exit path
struct InFlightGuard<'a> {
    map: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Triggers syncs for one connection at a time and keeps the health fields
/// (retry counter, last/next sync, status) consistent with the attempt log.
pub struct SyncOrchestrator {
    catalog: Arc<IntegrationCatalog>,
    database: Database,
    connections: Arc<ConnectionManager>,
    registry: Arc<ProviderRegistry>,
    config: Arc<EngineConfig>,
    events: Arc<dyn EventSink>,
    in_flight: DashMap<String, ()>,
}

impl SyncOrchestrator {
    /// Wire up the orchestrator
    #[must_use]
    pub fn new(
        catalog: Arc<IntegrationCatalog>,
        database: Database,
        connections: Arc<ConnectionManager>,
        registry: Arc<ProviderRegistry>,
        config: Arc<EngineConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog,
            database,
            connections,
            registry,
            config,
            events,
            in_flight: DashMap::new(),
        }
    }

    /// Trigger one sync for a (user, provider) connection.
    ///
    /// Fetch failures are absorbed: the caller always gets a `SyncAttempt`
    /// back (possibly failed), never a bare fetch error, so scheduling logic
    /// can always log the attempt. Errors are returned only when no attempt
    /// was opened at all: unknown provider, missing row, non-syncable state,
    /// or a concurrent sync already holding the claim.
    ///
    /// # Errors
    ///
    /// `UnknownProvider`, `ResourceNotFound`, `IntegrationNotActive`,
    /// `SyncInProgress`, or a database error.
    pub async fn trigger_sync(
        &self,
        user_id: Uuid,
        provider: Provider,
        options: SyncOptions,
    ) -> AppResult<SyncAttempt> {
        let sync_frequency_minutes = self.catalog.get(provider)?.sync_frequency_minutes;
        let mut connection = self.database.get_connection_required(user_id, provider).await?;

        let initial_path =
            options.sync_type == SyncType::Initial && connection.status == ConnectionStatus::Pending;
        Self::check_syncable(&connection, initial_path)?;

        // In-process claim; the open-attempt insert below is the
        // cross-process equivalent.
        if self.in_flight.insert(connection.id.clone(), ()).is_some() {
            return Err(AppError::sync_in_progress(&connection.id));
        }
        let _guard = InFlightGuard {
            map: &self.in_flight,
            key: connection.id.clone(),
        };

        let range = options.date_range.unwrap_or_else(|| self.default_range(&connection, options.sync_type));
        let mut attempt = self
            .database
            .open_sync_attempt(&connection.id, options.sync_type, Some(range))
            .await?;

        // Scheduling, not completion, exits pending: the attempt row exists,
        // so the connection becomes active before the fetch runs.
        if initial_path {
            connection = self.connections.activate_scheduled(user_id, provider).await?;
            connection.initial_sync_progress = Some(InitialSyncProgress {
                total_days: self.config.initial_sync_days,
                synced_days: 0,
                started_at: attempt.started_at,
            });
        }

        let fetched = match self.registry.get(provider) {
            Ok(client) => {
                match tokio::time::timeout(
                    self.config.sync_timeout,
                    client.fetch(&connection, range),
                )
                .await
                {
                    Err(_elapsed) => Err((
                        "timeout".to_owned(),
                        "provider fetch exceeded the sync deadline".to_owned(),
                    )),
                    Ok(Err(provider_err)) => {
                        Err((provider_err.code().to_owned(), provider_err.to_string()))
                    }
                    Ok(Ok(points)) => Ok(points),
                }
            }
            Err(e) => Err(("no_client".to_owned(), e.to_string())),
        };

        match fetched {
            Ok(points) => {
                self.complete_success(
                    &mut connection,
                    &mut attempt,
                    sync_frequency_minutes,
                    options.sync_type,
                    points,
                )
                .await?;
            }
            Err((code, message)) => {
                self.complete_failure(&mut connection, &mut attempt, &code, &message)
                    .await?;
            }
        }

        self.events.sync_attempt_completed(&SyncCompletedEvent {
            user_id,
            provider,
            attempt_id: attempt.id.clone(),
            sync_type: attempt.sync_type,
            status: attempt.status.unwrap_or(SyncStatus::Failed),
            records_processed: attempt.records_processed,
            at: attempt.completed_at.unwrap_or_else(Utc::now),
        });

        Ok(attempt)
    }

    /// Close attempts left open past the configured deadline.
    ///
    /// An orphaned "started, never completed" attempt would hold the claim
    /// forever; callers run this periodically (or at startup) to bound it.
    ///
    /// # Errors
    ///
    /// Returns a database error if the sweep fails.
    pub async fn sweep_stale_attempts(&self) -> AppResult<u32> {
        let deadline =
            Duration::seconds(i64::try_from(self.config.sync_timeout.as_secs()).unwrap_or(120));
        self.database.sweep_stale_attempts(Utc::now() - deadline).await
    }

    /// Recent attempts for a connection, newest first
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn list_recent_sync_attempts(
        &self,
        connection_id: &str,
        limit: u32,
    ) -> AppResult<Vec<SyncAttempt>> {
        self.database.list_recent_sync_attempts(connection_id, limit).await
    }

    fn check_syncable(connection: &Connection, initial_path: bool) -> AppResult<()> {
        if initial_path {
            return Ok(());
        }
        if !connection.is_enabled {
            return Err(AppError::not_active(connection.provider, "connection is disabled"));
        }
        match connection.status {
            // Error connections stay syncable so a manual retry can recover
            // them back to active.
            ConnectionStatus::Active | ConnectionStatus::Error => Ok(()),
            status @ (ConnectionStatus::Pending
            | ConnectionStatus::Paused
            | ConnectionStatus::Disconnected) => Err(AppError::not_active(
                connection.provider,
                &format!("connection status is '{status}'"),
            )),
        }
    }

    fn default_range(&self, connection: &Connection, sync_type: SyncType) -> DateRange {
        let now = Utc::now();
        let start = match sync_type {
            SyncType::Initial => now - Duration::days(i64::from(self.config.initial_sync_days)),
            SyncType::Manual | SyncType::Scheduled => connection
                .last_sync_at
                .unwrap_or_else(|| now - Duration::days(1)),
        };
        DateRange { start, end: now }
    }

    async fn complete_success(
        &self,
        connection: &mut Connection,
        attempt: &mut SyncAttempt,
        sync_frequency_minutes: u32,
        sync_type: SyncType,
        points: Vec<RawDataPoint>,
    ) -> AppResult<()> {
        let now = Utc::now();
        attempt.records_processed = u32::try_from(points.len()).unwrap_or(u32::MAX);

        // A point whose payload variant disagrees with its declared data type
        // is dropped, counted as skipped, and logged on the attempt.
        let mut records = Vec::with_capacity(points.len());
        let mut invalid = 0u32;
        for point in points {
            if point.value.data_type() == point.data_type {
                records.push(HealthDataRecord {
                    user_id: connection.user_id,
                    provider: connection.provider,
                    data_type: point.data_type,
                    recorded_at: point.recorded_at,
                    value: point.value,
                    unit: point.unit,
                });
            } else {
                invalid += 1;
                attempt.errors.push(SyncErrorEntry {
                    code: "validation_failed".to_owned(),
                    message: format!(
                        "payload shape does not match declared data type '{}'",
                        point.data_type
                    ),
                    timestamp: now,
                });
            }
        }

        if records.is_empty() && invalid > 0 {
            // Nothing ingestible at all: treat like a malformed-payload fetch.
            return self
                .complete_failure(
                    connection,
                    attempt,
                    "validation_failed",
                    "every data point failed validation",
                )
                .await;
        }

        let outcome = self.database.upsert_health_records(&records).await?;
        attempt.records_created = outcome.created;
        attempt.records_updated = outcome.updated;
        attempt.records_skipped = outcome.skipped + invalid;
        attempt.completed_at = Some(now);
        attempt.status = Some(if invalid == 0 {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        });

        let previous_status = connection.status;
        connection.status = ConnectionStatus::Active;
        connection.sync_retry_count = 0;
        connection.last_sync_at = Some(now);
        connection.last_sync_status = attempt.status;
        connection.next_sync_at = if sync_frequency_minutes > 0 {
            Some(now + Duration::minutes(i64::from(sync_frequency_minutes)))
        } else {
            None
        };
        if sync_type == SyncType::Initial {
            connection.initial_sync_complete = true;
            if let Some(progress) = connection.initial_sync_progress.as_mut() {
                progress.synced_days = progress.total_days;
            }
        }

        self.database.close_sync_attempt(attempt).await?;
        self.database.update_sync_state(connection).await?;

        if previous_status == ConnectionStatus::Error {
            info!(
                user_id = %connection.user_id,
                provider = %connection.provider,
                "connection recovered from error after successful sync"
            );
            self.events.connection_status_changed(&ConnectionStatusEvent {
                user_id: connection.user_id,
                provider: connection.provider,
                previous: Some(ConnectionStatus::Error),
                current: ConnectionStatus::Active,
                at: now,
            });
        }
        Ok(())
    }

    async fn complete_failure(
        &self,
        connection: &mut Connection,
        attempt: &mut SyncAttempt,
        code: &str,
        message: &str,
    ) -> AppResult<()> {
        let now = Utc::now();
        attempt.completed_at = Some(now);
        attempt.status = Some(SyncStatus::Failed);
        attempt.errors.push(SyncErrorEntry {
            code: code.to_owned(),
            message: message.to_owned(),
            timestamp: now,
        });

        connection.sync_retry_count += 1;
        connection.last_sync_status = Some(SyncStatus::Failed);

        // A single transient blip must not flap the connection; only the
        // consecutive-failure threshold demotes it to error.
        let previous_status = connection.status;
        if connection.sync_retry_count >= self.config.retry_threshold
            && connection.status == ConnectionStatus::Active
        {
            connection.status = ConnectionStatus::Error;
            warn!(
                user_id = %connection.user_id,
                provider = %connection.provider,
                retries = connection.sync_retry_count,
                "retry threshold reached, connection demoted to error"
            );
        } else {
            warn!(
                user_id = %connection.user_id,
                provider = %connection.provider,
                retries = connection.sync_retry_count,
                code,
                "sync attempt failed"
            );
        }

        self.database.close_sync_attempt(attempt).await?;
        self.database.update_sync_state(connection).await?;

        if connection.status != previous_status {
            self.events.connection_status_changed(&ConnectionStatusEvent {
                user_id: connection.user_id,
                provider: connection.provider,
                previous: Some(previous_status),
                current: connection.status,
                at: now,
            });
        }
        Ok(())
    }
}
