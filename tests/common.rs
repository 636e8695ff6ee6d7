// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Scripted provider clients, a static token exchanger, and engine builders
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]
#![allow(dead_code, clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Shared test utilities for `vitalsync`
//!
//! Provides common engine setup to reduce duplication across integration
//! tests: a scripted provider client, a no-network token exchanger, and an
//! event sink that records what the engine emitted.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration as StdDuration;
use uuid::Uuid;
use vitalsync::config::{EngineConfig, OAuthCredentials};
use vitalsync::engine::IntegrationEngine;
use vitalsync::errors::AppResult;
use vitalsync::events::{ConnectionStatusEvent, EventSink, SyncCompletedEvent};
use vitalsync::models::{Connection, DataType, DateRange, HealthValue, Provider};
use vitalsync::oauth::{AuthGrant, ConnectAction, TokenExchange, TokenExchanger};
use vitalsync::providers::{ProviderClient, ProviderError, RawDataPoint};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

/// Engine configuration for tests: in-memory database, short deadlines, and
/// OAuth client credentials for every provider so authorization flows work
/// without any environment setup.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig {
        sync_timeout: StdDuration::from_secs(5),
        ..EngineConfig::default()
    };
    for provider in Provider::ALL {
        config.oauth_clients.insert(
            provider,
            OAuthCredentials {
                client_id: format!("test_{provider}_client_id"),
                client_secret: format!("test_{provider}_client_secret"),
            },
        );
    }
    config
}

/// Build an engine over a fresh in-memory database with the given provider
/// clients registered and a recording event sink attached.
pub async fn build_engine(
    config: EngineConfig,
    clients: Vec<(Provider, Arc<dyn ProviderClient>)>,
) -> (IntegrationEngine, Arc<RecordingEventSink>) {
    init_test_logging();
    let events = Arc::new(RecordingEventSink::default());
    let mut builder = IntegrationEngine::builder(config)
        .with_token_exchanger(Arc::new(StaticExchanger))
        .with_event_sink(Arc::clone(&events) as Arc<dyn EventSink>);
    for (provider, client) in clients {
        builder = builder.with_provider_client(provider, client);
    }
    let engine = builder
        .build(vitalsync::database::generate_encryption_key().unwrap())
        .await
        .unwrap();
    (engine, events)
}

/// Engine with defaults and no provider clients registered
pub async fn build_default_engine() -> (IntegrationEngine, Arc<RecordingEventSink>) {
    build_engine(test_config(), Vec::new()).await
}

/// Run the full connect flow for any provider, branching on its auth type the
/// way a real caller would.
pub async fn connect(
    engine: &IntegrationEngine,
    user_id: Uuid,
    provider: Provider,
) -> AppResult<Connection> {
    let grant = match engine.initiate_connection(user_id, provider).await? {
        ConnectAction::Authorize { state, .. } => AuthGrant::OAuth2 {
            code: "test-authorization-code".to_owned(),
            state,
        },
        ConnectAction::NoRedirect { auth_type, .. } => match auth_type {
            vitalsync::models::AuthType::ApiKey => AuthGrant::ApiKey {
                key: "test-api-key".to_owned(),
            },
            vitalsync::models::AuthType::Native | vitalsync::models::AuthType::OAuth2 => {
                AuthGrant::Native {
                    device_identifier: "test-device".to_owned(),
                }
            }
        },
    };
    engine.complete_connection(user_id, provider, grant).await
}

/// Token exchanger that accepts any code without touching the network
pub struct StaticExchanger;

#[async_trait]
impl TokenExchanger for StaticExchanger {
    async fn exchange(&self, _provider: Provider, code: &str) -> AppResult<TokenExchange> {
        Ok(TokenExchange {
            access_token: format!("access-for-{code}"),
            refresh_token: Some("test-refresh-token".to_owned()),
            expires_at: Some(Utc::now() + Duration::hours(8)),
            granted_scopes: vec!["test-scope".to_owned()],
        })
    }
}

/// Provider client that replays a queue of scripted fetch outcomes.
///
/// Once the script is exhausted, further fetches return an empty success.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<Vec<RawDataPoint>, ProviderError>>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<Vec<RawDataPoint>, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
        })
    }

    /// Client whose every fetch succeeds with the same points
    pub fn always(points: Vec<RawDataPoint>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::from([Ok(points)])),
        })
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    async fn fetch(
        &self,
        _connection: &Connection,
        _range: DateRange,
    ) -> Result<Vec<RawDataPoint>, ProviderError> {
        let mut script = self.script.lock().unwrap();
        if script.len() == 1 {
            // Keep replaying the last step so `always` keeps its promise.
            return match script.front().unwrap() {
                Ok(points) => Ok(points.clone()),
                Err(e) => Err(ProviderError::Network(e.to_string())),
            };
        }
        script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Provider client that never answers within any reasonable deadline
pub struct StalledClient;

#[async_trait]
impl ProviderClient for StalledClient {
    async fn fetch(
        &self,
        _connection: &Connection,
        _range: DateRange,
    ) -> Result<Vec<RawDataPoint>, ProviderError> {
        tokio::time::sleep(StdDuration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Event sink that records everything the engine emits
#[derive(Default)]
pub struct RecordingEventSink {
    pub status_events: Mutex<Vec<ConnectionStatusEvent>>,
    pub sync_events: Mutex<Vec<SyncCompletedEvent>>,
}

impl EventSink for RecordingEventSink {
    fn connection_status_changed(&self, event: &ConnectionStatusEvent) {
        self.status_events.lock().unwrap().push(event.clone());
    }

    fn sync_attempt_completed(&self, event: &SyncCompletedEvent) {
        self.sync_events.lock().unwrap().push(event.clone());
    }
}

pub fn sleep_point(recorded_at: DateTime<Utc>) -> RawDataPoint {
    RawDataPoint {
        data_type: DataType::Sleep,
        recorded_at,
        value: HealthValue::Sleep {
            duration_minutes: 432,
            efficiency: Some(0.91),
            deep_minutes: Some(78),
            rem_minutes: Some(102),
        },
        unit: "minutes".to_owned(),
    }
}

pub fn steps_point(recorded_at: DateTime<Utc>, count: u64) -> RawDataPoint {
    RawDataPoint {
        data_type: DataType::Steps,
        recorded_at,
        value: HealthValue::Steps { count },
        unit: "steps".to_owned(),
    }
}

/// A point whose payload shape disagrees with its declared data type
pub fn mismatched_point(recorded_at: DateTime<Utc>) -> RawDataPoint {
    RawDataPoint {
        data_type: DataType::Sleep,
        recorded_at,
        value: HealthValue::Steps { count: 9000 },
        unit: "steps".to_owned(),
    }
}
