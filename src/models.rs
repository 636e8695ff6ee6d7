// ABOUTME: Common data models for the health-data integration engine
// ABOUTME: Providers, data types, connection lifecycle, sync attempts, and health records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// External data providers supported by the engine.
///
/// A closed enum rather than a free-form string: every provider referenced
/// anywhere in the model must exist in the integration catalog, and the type
/// system enforces half of that invariant for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Oura ring (sleep, HRV, readiness)
    Oura,
    /// WHOOP strap (recovery, sleep, strain)
    Whoop,
    /// Fitbit trackers and scales
    Fitbit,
    /// Garmin watches and Connect platform
    Garmin,
    /// Withings scales and sleep mats
    Withings,
    /// Apple Health (native on-device aggregation, push-driven)
    AppleHealth,
    /// Cronometer nutrition tracking
    Cronometer,
}

impl Provider {
    /// All providers, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Oura,
        Self::Whoop,
        Self::Fitbit,
        Self::Garmin,
        Self::Withings,
        Self::AppleHealth,
        Self::Cronometer,
    ];

    /// Stable string id used in storage and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oura => "oura",
            Self::Whoop => "whoop",
            Self::Fitbit => "fitbit",
            Self::Garmin => "garmin",
            Self::Withings => "withings",
            Self::AppleHealth => "apple_health",
            Self::Cronometer => "cronometer",
        }
    }

    /// Parse a stored string id back into a provider
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of physiological/activity measurements
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Heart rate samples (bpm)
    HeartRate,
    /// Heart rate variability (RMSSD)
    Hrv,
    /// Sleep sessions
    Sleep,
    /// Step counts
    Steps,
    /// Energy expenditure
    Calories,
    /// Body weight
    Weight,
    /// Workout sessions
    Workout,
    /// Nutrition/macro intake
    Nutrition,
}

impl DataType {
    /// All data types, in declaration order
    pub const ALL: [Self; 8] = [
        Self::HeartRate,
        Self::Hrv,
        Self::Sleep,
        Self::Steps,
        Self::Calories,
        Self::Weight,
        Self::Workout,
        Self::Nutrition,
    ];

    /// Stable string id used in storage and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeartRate => "heart_rate",
            Self::Hrv => "hrv",
            Self::Sleep => "sleep",
            Self::Steps => "steps",
            Self::Calories => "calories",
            Self::Weight => "weight",
            Self::Workout => "workout",
            Self::Nutrition => "nutrition",
        }
    }

    /// Parse a stored string id back into a data type
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == value)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider authenticates its users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Standard OAuth 2.0 authorization-code flow
    OAuth2,
    /// User-supplied API key, no redirect
    ApiKey,
    /// Native on-device integration, no credential exchange
    Native,
}

impl AuthType {
    /// Stable string id used in storage and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OAuth2 => "oauth2",
            Self::ApiKey => "api_key",
            Self::Native => "native",
        }
    }
}

/// Connection lifecycle states.
///
/// `pending -> active <-> paused`, `active -> error`, `error -> active` on the
/// next successful sync, and any non-terminal state `-> disconnected`.
/// Disconnection is terminal for the lifecycle but the row is reused when the
/// user re-authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Authorized but first sync not yet scheduled
    Pending,
    /// Healthy and eligible for sync and golden-source selection
    Active,
    /// User-disabled, tokens retained (reversible)
    Paused,
    /// Persistent sync failures, needs re-authorization
    Error,
    /// Tokens cleared; row retained for audit history
    Disconnected,
}

impl ConnectionStatus {
    /// Stable string id used in storage and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }

    /// Parse a stored string id back into a status
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// First sync after authorization, covers the initial window
    Initial,
    /// User-requested
    Manual,
    /// Triggered by the external scheduler
    Scheduled,
}

impl SyncType {
    /// Stable string id used in storage and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }

    /// Parse a stored string id back into a sync type
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "initial" => Some(Self::Initial),
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

/// Terminal outcome of a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// All fetched data points ingested
    Success,
    /// Some data points failed validation
    Partial,
    /// Fetch failed, timed out, or every data point was invalid
    Failed,
}

impl SyncStatus {
    /// Stable string id used in storage and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored string id back into a sync status
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress tracker for the initial sync window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSyncProgress {
    /// Total days in the initial sync window
    pub total_days: u32,
    /// Days ingested so far
    pub synced_days: u32,
    /// When the initial sync began
    pub started_at: DateTime<Utc>,
}

/// Structured error entry recorded on a sync attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorEntry {
    /// Stable error code (e.g. `timeout`, `rate_limited`, `auth_expired`)
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// When the error occurred
    pub timestamp: DateTime<Utc>,
}

/// Per-(user, provider) connection record, the unit of the lifecycle state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Row id
    pub id: String,
    /// Owning user
    pub user_id: Uuid,
    /// Provider this connection authorizes
    pub provider: Provider,
    /// Access credential; cleared on disconnect
    pub access_token: Option<String>,
    /// Refresh credential; cleared on disconnect
    pub refresh_token: Option<String>,
    /// Access token expiry, when the provider reports one
    pub token_expiry: Option<DateTime<Utc>>,
    /// Scopes the user actually granted
    pub granted_scopes: Vec<String>,
    /// Lifecycle state
    pub status: ConnectionStatus,
    /// User enable flag, mirrored into active/paused status
    pub is_enabled: bool,
    /// When the current lifecycle was authorized
    pub connected_at: DateTime<Utc>,
    /// When the connection was disconnected, if ever
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Last successful sync completion time
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent sync attempt
    pub last_sync_status: Option<SyncStatus>,
    /// Consecutive failed sync attempts since the last success
    pub sync_retry_count: u32,
    /// Advisory next-poll time consumed by the external scheduler
    pub next_sync_at: Option<DateTime<Utc>>,
    /// Whether the initial sync window has been fully ingested
    pub initial_sync_complete: bool,
    /// Progress through the initial sync window, while in flight
    pub initial_sync_progress: Option<InitialSyncProgress>,
    /// Data types for which the user declared this provider primary
    pub primary_for_data_types: BTreeSet<DataType>,
}

impl Connection {
    /// Whether this connection may be chosen as a golden source or sync target
    #[must_use]
    pub const fn is_sync_eligible(&self) -> bool {
        self.is_enabled && matches!(self.status, ConnectionStatus::Active)
    }
}

/// One execution of data retrieval from a provider, logged regardless of outcome.
///
/// Append-only: immutable once `completed_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAttempt {
    /// Row id
    pub id: String,
    /// Connection this attempt ran against
    pub connection_id: String,
    /// What triggered the attempt
    pub sync_type: SyncType,
    /// When the attempt opened
    pub started_at: DateTime<Utc>,
    /// When the attempt closed; `None` while in flight
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal outcome; `None` while in flight
    pub status: Option<SyncStatus>,
    /// Data points returned by the provider
    pub records_processed: u32,
    /// New records written
    pub records_created: u32,
    /// Existing records overwritten with changed values
    pub records_updated: u32,
    /// Duplicates with identical values, plus points that failed validation
    pub records_skipped: u32,
    /// Structured errors accumulated during the attempt
    pub errors: Vec<SyncErrorEntry>,
    /// Start of the fetched window
    pub date_range_start: Option<DateTime<Utc>>,
    /// End of the fetched window
    pub date_range_end: Option<DateTime<Utc>>,
}

/// Inclusive time window for a data fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
}

/// Typed measurement payload, discriminated by data type.
///
/// Stored as JSON at the persistence boundary; the variant tag gives
/// compile-time coverage of per-type shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthValue {
    /// Heart rate sample
    HeartRate {
        /// Beats per minute
        bpm: f64,
    },
    /// Heart rate variability sample
    Hrv {
        /// RMSSD in milliseconds
        rmssd_ms: f64,
    },
    /// Sleep session summary
    Sleep {
        /// Total sleep duration
        duration_minutes: u32,
        /// Sleep efficiency percentage, when reported
        efficiency: Option<f64>,
        /// Deep sleep duration, when staged
        deep_minutes: Option<u32>,
        /// REM sleep duration, when staged
        rem_minutes: Option<u32>,
    },
    /// Step count over an interval
    Steps {
        /// Number of steps
        count: u64,
    },
    /// Energy expenditure over an interval
    Calories {
        /// Kilocalories burned
        kcal: f64,
    },
    /// Body weight measurement
    Weight {
        /// Weight in kilograms
        kg: f64,
    },
    /// Workout session summary
    Workout {
        /// Activity name (provider vocabulary, passed through)
        activity: String,
        /// Session duration
        duration_minutes: u32,
        /// Distance covered, when applicable
        distance_meters: Option<f64>,
    },
    /// Nutrition intake summary
    Nutrition {
        /// Kilocalories consumed
        kcal: f64,
        /// Protein grams, when logged
        protein_g: Option<f64>,
        /// Carbohydrate grams, when logged
        carbs_g: Option<f64>,
        /// Fat grams, when logged
        fat_g: Option<f64>,
    },
}

impl HealthValue {
    /// The data type this payload shape belongs to
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::HeartRate { .. } => DataType::HeartRate,
            Self::Hrv { .. } => DataType::Hrv,
            Self::Sleep { .. } => DataType::Sleep,
            Self::Steps { .. } => DataType::Steps,
            Self::Calories { .. } => DataType::Calories,
            Self::Weight { .. } => DataType::Weight,
            Self::Workout { .. } => DataType::Workout,
            Self::Nutrition { .. } => DataType::Nutrition,
        }
    }
}

/// Normalized ingested data point.
///
/// Identity key is (`user_id`, `provider`, `data_type`, `recorded_at`);
/// re-ingesting the same key is an idempotent upsert. Records carry no foreign
/// key to a connection beyond `provider`, so they outlive a disconnection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDataRecord {
    /// Owning user
    pub user_id: Uuid,
    /// Provider that reported the measurement
    pub provider: Provider,
    /// Measurement category
    pub data_type: DataType,
    /// When the measurement was taken
    pub recorded_at: DateTime<Utc>,
    /// Typed measurement payload
    pub value: HealthValue,
    /// Unit string as reported by the provider
    pub unit: String,
}

/// Derived golden-source ranking: data type to ordered eligible providers.
///
/// Recomputed on demand, never persisted.
pub type GoldenSourceConfig = BTreeMap<DataType, Vec<Provider>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_string_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(Provider::from_str_value(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::from_str_value("polar"), None);
    }

    #[test]
    fn health_value_matches_its_data_type() {
        let value = HealthValue::Sleep {
            duration_minutes: 432,
            efficiency: Some(0.91),
            deep_minutes: Some(78),
            rem_minutes: Some(102),
        };
        assert_eq!(value.data_type(), DataType::Sleep);

        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"type\":\"sleep\""));
        let back: HealthValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn disconnected_connection_is_not_sync_eligible() {
        let conn = Connection {
            id: "c1".to_owned(),
            user_id: Uuid::new_v4(),
            provider: Provider::Oura,
            access_token: None,
            refresh_token: None,
            token_expiry: None,
            granted_scopes: vec![],
            status: ConnectionStatus::Disconnected,
            is_enabled: true,
            connected_at: Utc::now(),
            disconnected_at: Some(Utc::now()),
            last_sync_at: None,
            last_sync_status: None,
            sync_retry_count: 0,
            next_sync_at: None,
            initial_sync_complete: false,
            initial_sync_progress: None,
            primary_for_data_types: BTreeSet::new(),
        };
        assert!(!conn.is_sync_eligible());
    }
}
