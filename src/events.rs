// ABOUTME: Outbound event contracts consumed by notification and achievement subsystems
// ABOUTME: The engine only emits; delivery is a black box behind the EventSink trait
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::models::{ConnectionStatus, Provider, SyncStatus, SyncType};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Emitted whenever a connection changes lifecycle state
#[derive(Debug, Clone)]
pub struct ConnectionStatusEvent {
    /// Owning user
    pub user_id: Uuid,
    /// Affected provider
    pub provider: Provider,
    /// State before the transition, when known
    pub previous: Option<ConnectionStatus>,
    /// State after the transition
    pub current: ConnectionStatus,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Emitted whenever a sync attempt reaches a terminal status
#[derive(Debug, Clone)]
pub struct SyncCompletedEvent {
    /// Owning user
    pub user_id: Uuid,
    /// Synced provider
    pub provider: Provider,
    /// Attempt row id, for correlation with the attempt log
    pub attempt_id: String,
    /// What triggered the attempt
    pub sync_type: SyncType,
    /// Terminal outcome
    pub status: SyncStatus,
    /// Data points the provider returned
    pub records_processed: u32,
    /// When the attempt closed
    pub at: DateTime<Utc>,
}

/// Outbound event consumer boundary.
///
/// Implementations must be cheap and non-blocking; anything slow belongs on
/// the consumer's side of the boundary.
pub trait EventSink: Send + Sync {
    /// A connection transitioned between lifecycle states
    fn connection_status_changed(&self, event: &ConnectionStatusEvent);

    /// A sync attempt closed
    fn sync_attempt_completed(&self, event: &SyncCompletedEvent);
}

/// Default sink: structured log records, nothing else
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn connection_status_changed(&self, event: &ConnectionStatusEvent) {
        info!(
            user_id = %event.user_id,
            provider = %event.provider,
            previous = ?event.previous.map(ConnectionStatus::as_str),
            current = %event.current,
            "connection status changed"
        );
    }

    fn sync_attempt_completed(&self, event: &SyncCompletedEvent) {
        info!(
            user_id = %event.user_id,
            provider = %event.provider,
            attempt_id = %event.attempt_id,
            sync_type = event.sync_type.as_str(),
            status = %event.status,
            records = event.records_processed,
            "sync attempt completed"
        );
    }
}
