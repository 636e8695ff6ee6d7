// ABOUTME: Integration tests for sync orchestration - ingestion accounting, retries, claims
// ABOUTME: Covers idempotent re-ingestion, failure demotion, recovery, timeouts, and sweeps
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{
    build_engine, connect, mismatched_point, sleep_point, steps_point, test_config,
    ScriptedClient, StalledClient,
};
use std::sync::Arc;
use uuid::Uuid;
use vitalsync::database::{generate_encryption_key, Database};
use vitalsync::database::connections::ConnectionCredentials;
use vitalsync::errors::ErrorCode;
use vitalsync::models::{
    ConnectionStatus, DataType, DateRange, HealthValue, Provider, SyncStatus, SyncType,
};
use vitalsync::providers::{ProviderClient, ProviderError};
use vitalsync::sync::SyncOptions;

fn client(
    script: Vec<Result<Vec<vitalsync::providers::RawDataPoint>, ProviderError>>,
) -> Arc<dyn ProviderClient> {
    ScriptedClient::new(script)
}

#[tokio::test]
async fn successful_sync_creates_records_and_reingestion_skips_them() {
    let t1 = Utc.with_ymd_and_hms(2026, 8, 29, 7, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 8, 29, 8, 0, 0).unwrap();
    let points = vec![steps_point(t1, 4200), steps_point(t2, 5100)];

    let (engine, _events) = build_engine(
        test_config(),
        vec![(Provider::Garmin, ScriptedClient::always(points))],
    )
    .await;
    let user_id = Uuid::new_v4();
    let connection = connect(&engine, user_id, Provider::Garmin).await.unwrap();

    // The initial sync ran during connect and created both records.
    let attempts = engine
        .list_recent_sync_attempts(&connection.id, 10)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    let initial = &attempts[0];
    assert_eq!(initial.sync_type, SyncType::Initial);
    assert_eq!(initial.status, Some(SyncStatus::Success));
    assert_eq!(initial.records_created, 2);
    assert_eq!(initial.records_skipped, 0);
    assert!(connection.initial_sync_complete);
    assert!(connection.last_sync_at.is_some());
    // Garmin polls on a cadence, so the scheduler gets an advisory next time.
    assert!(connection.next_sync_at.is_some());

    // Same points again: identical values are skipped, nothing rewritten.
    let manual = engine
        .trigger_sync(user_id, Provider::Garmin, SyncOptions::manual())
        .await
        .unwrap();
    assert_eq!(manual.status, Some(SyncStatus::Success));
    assert_eq!(manual.records_created, 0);
    assert_eq!(manual.records_updated, 0);
    assert_eq!(manual.records_skipped, 2);
}

#[tokio::test]
async fn changed_values_count_as_updated() {
    let t1 = Utc.with_ymd_and_hms(2026, 8, 29, 7, 0, 0).unwrap();
    let script = client(vec![
        Ok(vec![steps_point(t1, 4200)]),
        Ok(vec![steps_point(t1, 4650)]),
    ]);

    let (engine, _events) =
        build_engine(test_config(), vec![(Provider::Garmin, script)]).await;
    let user_id = Uuid::new_v4();
    connect(&engine, user_id, Provider::Garmin).await.unwrap();

    // The provider revised the day's total; same identity key, new value.
    let manual = engine
        .trigger_sync(user_id, Provider::Garmin, SyncOptions::manual())
        .await
        .unwrap();
    assert_eq!(manual.records_created, 0);
    assert_eq!(manual.records_updated, 1);
    assert_eq!(manual.records_skipped, 0);
}

#[tokio::test]
async fn fetch_failure_is_absorbed_into_the_attempt_log() {
    let script = client(vec![
        Ok(Vec::new()),
        Err(ProviderError::RateLimited("429 from provider".to_owned())),
        Ok(Vec::new()),
    ]);
    let (engine, _events) =
        build_engine(test_config(), vec![(Provider::Oura, script)]).await;
    let user_id = Uuid::new_v4();
    let connection = connect(&engine, user_id, Provider::Oura).await.unwrap();
    let last_sync_at = connection.last_sync_at;

    // The failure comes back as a failed attempt, not an error.
    let failed = engine
        .trigger_sync(user_id, Provider::Oura, SyncOptions::manual())
        .await
        .unwrap();
    assert_eq!(failed.status, Some(SyncStatus::Failed));
    assert_eq!(failed.errors.len(), 1);
    assert_eq!(failed.errors[0].code, "rate_limited");

    let connections = engine.list_connections(user_id).await.unwrap();
    let connection = connections
        .iter()
        .find(|c| c.provider == Provider::Oura)
        .unwrap();
    assert_eq!(connection.sync_retry_count, 1);
    assert_eq!(connection.status, ConnectionStatus::Active);
    assert_eq!(connection.last_sync_status, Some(SyncStatus::Failed));
    // last_sync_at marks the last success only.
    assert_eq!(connection.last_sync_at, last_sync_at);

    // A success resets the consecutive-failure counter.
    engine
        .trigger_sync(user_id, Provider::Oura, SyncOptions::manual())
        .await
        .unwrap();
    let connections = engine.list_connections(user_id).await.unwrap();
    let connection = connections
        .iter()
        .find(|c| c.provider == Provider::Oura)
        .unwrap();
    assert_eq!(connection.sync_retry_count, 0);
    assert_eq!(connection.last_sync_status, Some(SyncStatus::Success));
}

#[tokio::test]
async fn consecutive_failures_demote_to_error_and_a_success_recovers() {
    let script = client(vec![
        Ok(Vec::new()),
        Err(ProviderError::Network("connection reset".to_owned())),
        Err(ProviderError::Network("connection reset".to_owned())),
        Err(ProviderError::Network("connection reset".to_owned())),
        Ok(Vec::new()),
    ]);
    let (engine, events) =
        build_engine(test_config(), vec![(Provider::Whoop, script)]).await;
    let user_id = Uuid::new_v4();
    connect(&engine, user_id, Provider::Whoop).await.unwrap();

    for expected_retries in 1..=3u32 {
        engine
            .trigger_sync(user_id, Provider::Whoop, SyncOptions::scheduled())
            .await
            .unwrap();
        let status = engine
            .get_connection_status(user_id, Provider::Whoop)
            .await
            .unwrap()
            .unwrap();
        if expected_retries < 3 {
            assert_eq!(status, ConnectionStatus::Active);
        } else {
            assert_eq!(status, ConnectionStatus::Error);
        }
    }

    let demotion_seen = events
        .status_events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.current == ConnectionStatus::Error);
    assert!(demotion_seen, "demotion to error must emit a status event");

    // An error connection stays manually syncable; success restores active.
    engine
        .trigger_sync(user_id, Provider::Whoop, SyncOptions::manual())
        .await
        .unwrap();
    let status = engine
        .get_connection_status(user_id, Provider::Whoop)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, ConnectionStatus::Active);

    let connections = engine.list_connections(user_id).await.unwrap();
    assert_eq!(connections[0].sync_retry_count, 0);
}

#[tokio::test]
async fn mismatched_payload_yields_partial_and_counts_skipped() {
    let t1 = Utc.with_ymd_and_hms(2026, 8, 29, 7, 0, 0).unwrap();
    let script = client(vec![
        Ok(Vec::new()),
        Ok(vec![sleep_point(t1), mismatched_point(t1 + Duration::hours(1))]),
    ]);
    let (engine, _events) =
        build_engine(test_config(), vec![(Provider::Oura, script)]).await;
    let user_id = Uuid::new_v4();
    connect(&engine, user_id, Provider::Oura).await.unwrap();

    let attempt = engine
        .trigger_sync(user_id, Provider::Oura, SyncOptions::manual())
        .await
        .unwrap();
    assert_eq!(attempt.status, Some(SyncStatus::Partial));
    assert_eq!(attempt.records_created, 1);
    assert_eq!(attempt.records_skipped, 1);
    assert_eq!(attempt.errors.len(), 1);
    assert_eq!(attempt.errors[0].code, "validation_failed");
}

#[tokio::test]
async fn entirely_invalid_payload_fails_the_attempt() {
    let t1 = Utc.with_ymd_and_hms(2026, 8, 29, 7, 0, 0).unwrap();
    let script = client(vec![Ok(Vec::new()), Ok(vec![mismatched_point(t1)])]);
    let (engine, _events) =
        build_engine(test_config(), vec![(Provider::Oura, script)]).await;
    let user_id = Uuid::new_v4();
    connect(&engine, user_id, Provider::Oura).await.unwrap();

    let attempt = engine
        .trigger_sync(user_id, Provider::Oura, SyncOptions::manual())
        .await
        .unwrap();
    assert_eq!(attempt.status, Some(SyncStatus::Failed));

    let connections = engine.list_connections(user_id).await.unwrap();
    assert_eq!(connections[0].sync_retry_count, 1);
}

#[tokio::test]
async fn fetch_exceeding_the_deadline_times_out() {
    let mut config = test_config();
    config.sync_timeout = std::time::Duration::from_millis(50);

    let (engine, _events) = build_engine(
        config,
        vec![(Provider::Fitbit, Arc::new(StalledClient) as Arc<dyn ProviderClient>)],
    )
    .await;
    let user_id = Uuid::new_v4();
    let connection = connect(&engine, user_id, Provider::Fitbit).await.unwrap();

    // The initial sync itself hit the deadline; the connection is still
    // active with a failed attempt on record.
    assert_eq!(connection.status, ConnectionStatus::Active);
    let attempts = engine
        .list_recent_sync_attempts(&connection.id, 10)
        .await
        .unwrap();
    assert_eq!(attempts[0].status, Some(SyncStatus::Failed));
    assert_eq!(attempts[0].errors[0].code, "timeout");
}

#[tokio::test]
async fn provider_without_a_registered_client_fails_the_attempt() {
    let (engine, _events) = build_engine(test_config(), Vec::new()).await;
    let user_id = Uuid::new_v4();
    let connection = connect(&engine, user_id, Provider::Withings).await.unwrap();

    assert_eq!(connection.status, ConnectionStatus::Active);
    assert!(!connection.initial_sync_complete);
    let attempts = engine
        .list_recent_sync_attempts(&connection.id, 10)
        .await
        .unwrap();
    assert_eq!(attempts[0].status, Some(SyncStatus::Failed));
    assert_eq!(attempts[0].errors[0].code, "no_client");
}

#[tokio::test]
async fn push_driven_provider_gets_no_next_sync_time() {
    let t1 = Utc.with_ymd_and_hms(2026, 8, 29, 7, 0, 0).unwrap();
    let (engine, _events) = build_engine(
        test_config(),
        vec![(
            Provider::AppleHealth,
            ScriptedClient::always(vec![steps_point(t1, 3000)]),
        )],
    )
    .await;
    let user_id = Uuid::new_v4();
    let connection = connect(&engine, user_id, Provider::AppleHealth)
        .await
        .unwrap();

    assert_eq!(connection.status, ConnectionStatus::Active);
    // Apple Health is push-driven; polling it makes no sense.
    assert_eq!(connection.next_sync_at, None);
}

#[tokio::test]
async fn ingested_records_remain_readable_after_disconnect() {
    let t1 = Utc.with_ymd_and_hms(2026, 8, 29, 7, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 8, 29, 9, 0, 0).unwrap();
    let points = vec![steps_point(t2, 5100), steps_point(t1, 4200)];

    let (engine, _events) = build_engine(
        test_config(),
        vec![(Provider::Garmin, ScriptedClient::always(points))],
    )
    .await;
    let user_id = Uuid::new_v4();
    connect(&engine, user_id, Provider::Garmin).await.unwrap();

    let connection = engine.disconnect(user_id, Provider::Garmin).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Disconnected);

    // Records belong to the user, not the connection lifecycle.
    let records = engine
        .get_health_records(user_id, DataType::Steps, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.provider == Provider::Garmin));
    // Oldest first, with the typed payload intact.
    assert_eq!(records[0].recorded_at, t1);
    assert_eq!(records[0].value, HealthValue::Steps { count: 4200 });
    assert_eq!(records[1].recorded_at, t2);
    assert_eq!(records[1].value, HealthValue::Steps { count: 5100 });

    // A range narrows the read without touching what is stored.
    let range = DateRange {
        start: t2 - Duration::minutes(30),
        end: t2 + Duration::minutes(30),
    };
    let windowed = engine
        .get_health_records(user_id, DataType::Steps, Some(range))
        .await
        .unwrap();
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].recorded_at, t2);
}

#[tokio::test]
async fn re_enabling_an_error_connection_keeps_error_until_a_sync_succeeds() {
    let script = client(vec![
        Ok(Vec::new()),
        Err(ProviderError::Network("connection reset".to_owned())),
        Err(ProviderError::Network("connection reset".to_owned())),
        Err(ProviderError::Network("connection reset".to_owned())),
        Ok(Vec::new()),
    ]);
    let (engine, _events) =
        build_engine(test_config(), vec![(Provider::Whoop, script)]).await;
    let user_id = Uuid::new_v4();
    connect(&engine, user_id, Provider::Whoop).await.unwrap();

    for _ in 0..3 {
        engine
            .trigger_sync(user_id, Provider::Whoop, SyncOptions::scheduled())
            .await
            .unwrap();
    }
    let status = engine
        .get_connection_status(user_id, Provider::Whoop)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, ConnectionStatus::Error);

    // Disabling records the flag; the error status is not overwritten.
    let connection = engine
        .set_enabled(user_id, Provider::Whoop, false)
        .await
        .unwrap();
    assert_eq!(connection.status, ConnectionStatus::Error);
    assert!(!connection.is_enabled);
    let err = engine
        .trigger_sync(user_id, Provider::Whoop, SyncOptions::manual())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IntegrationNotActive);

    // Re-enabling does not short-circuit to active: the retry counter is
    // still at the threshold, and only a successful sync clears both.
    let connection = engine
        .set_enabled(user_id, Provider::Whoop, true)
        .await
        .unwrap();
    assert_eq!(connection.status, ConnectionStatus::Error);
    assert!(connection.is_enabled);
    assert_eq!(connection.sync_retry_count, 3);

    let attempt = engine
        .trigger_sync(user_id, Provider::Whoop, SyncOptions::manual())
        .await
        .unwrap();
    assert_eq!(attempt.status, Some(SyncStatus::Success));
    let connections = engine.list_connections(user_id).await.unwrap();
    assert_eq!(connections[0].status, ConnectionStatus::Active);
    assert_eq!(connections[0].sync_retry_count, 0);
}

#[tokio::test]
async fn open_attempt_claim_rejects_a_second_sync_and_sweep_releases_it() {
    let database = Database::new("sqlite::memory:", generate_encryption_key().unwrap())
        .await
        .unwrap();
    let user_id = Uuid::new_v4();
    let credentials = ConnectionCredentials {
        access_token: "token",
        refresh_token: None,
        token_expiry: None,
        granted_scopes: &[],
    };
    let connection = database
        .upsert_connection_pending(user_id, Provider::Oura, &credentials)
        .await
        .unwrap();

    let range = DateRange {
        start: Utc::now() - Duration::days(1),
        end: Utc::now(),
    };
    database
        .open_sync_attempt(&connection.id, SyncType::Manual, Some(range))
        .await
        .unwrap();

    // The partial unique index admits at most one open attempt.
    let err = database
        .open_sync_attempt(&connection.id, SyncType::Manual, Some(range))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SyncInProgress);

    // Sweeping with a future cutoff closes the orphan and frees the claim.
    let swept = database
        .sweep_stale_attempts(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(swept, 1);

    database
        .open_sync_attempt(&connection.id, SyncType::Manual, Some(range))
        .await
        .unwrap();

    let attempts = database
        .list_recent_sync_attempts(&connection.id, 10)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    let swept_attempt = attempts.iter().find(|a| a.completed_at.is_some()).unwrap();
    assert_eq!(swept_attempt.status, Some(SyncStatus::Failed));
    assert_eq!(swept_attempt.errors[0].code, "timeout");
}
