// ABOUTME: Core database management with inline migrations for SQLite storage
// ABOUTME: Connection pool, token encryption at rest, and shared row helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

/// Authorization state persistence for the OAuth CSRF handshake
pub mod auth_states;
/// Connection row CRUD and lifecycle bookkeeping
pub mod connections;
/// Normalized health record store with idempotent upserts
pub mod health_records;
/// Append-only sync attempt log
pub mod sync_attempts;

pub use health_records::UpsertOutcome;

use crate::errors::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Generate a fresh 32-byte encryption key for token storage
///
/// # Errors
///
/// Returns an error if the system random source fails.
pub fn generate_encryption_key() -> AppResult<Vec<u8>> {
    let mut key = vec![0u8; 32];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| AppError::internal("failed to generate encryption key"))?;
    Ok(key)
}

/// Database connection pool with token encryption support
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    encryption_key: Arc<[u8; 32]>,
}

impl Database {
    /// Open (or create) the database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the pool cannot be created,
    /// the encryption key is not exactly 32 bytes, or migrations fail.
    pub async fn new(database_url: &str, encryption_key: Vec<u8>) -> AppResult<Self> {
        let key: [u8; 32] = encryption_key
            .try_into()
            .map_err(|_| AppError::config("encryption key must be exactly 32 bytes"))?;

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("invalid database URL: {e}")))?
            .create_if_missing(true);

        // Every pooled connection to an in-memory database sees a separate
        // database, so :memory: must be pinned to one long-lived connection.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Self {
            pool,
            encryption_key: Arc::new(key),
        };
        db.migrate().await?;
        info!("database ready at {}", database_url);
        Ok(db)
    }

    /// Underlying pool, for query builders in the sibling modules
    pub(crate) const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                token_expiry TEXT,
                granted_scopes TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                connected_at TEXT NOT NULL,
                disconnected_at TEXT,
                last_sync_at TEXT,
                last_sync_status TEXT,
                sync_retry_count INTEGER NOT NULL DEFAULT 0,
                next_sync_at TEXT,
                initial_sync_complete INTEGER NOT NULL DEFAULT 0,
                initial_sync_progress TEXT,
                primary_for_data_types TEXT NOT NULL DEFAULT '[]',
                UNIQUE(user_id, provider)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_attempts (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL REFERENCES connections(id),
                sync_type TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT,
                records_processed INTEGER NOT NULL DEFAULT 0,
                records_created INTEGER NOT NULL DEFAULT 0,
                records_updated INTEGER NOT NULL DEFAULT 0,
                records_skipped INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                date_range_start TEXT,
                date_range_end TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // At most one open attempt per connection: the partial unique index is
        // the conditional claim that serializes concurrent sync triggers.
        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_attempts_open
            ON sync_attempts(connection_id) WHERE completed_at IS NULL
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_sync_attempts_recent
            ON sync_attempts(connection_id, started_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS health_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                data_type TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                value TEXT NOT NULL,
                unit TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, provider, data_type, recorded_at)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS auth_states (
                state TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Encrypt a provider token with AES-256-GCM.
    ///
    /// The AAD context binds the ciphertext to its owning user/provider/table
    /// so a token copied between rows fails to decrypt.
    pub(crate) fn encrypt_token(&self, plaintext: &str, aad_context: &str) -> AppResult<String> {
        let unbound = UnboundKey::new(&AES_256_GCM, self.encryption_key.as_ref())
            .map_err(|_| AppError::internal("failed to initialize encryption key"))?;
        let key = LessSafeKey::new(unbound);

        let mut nonce_bytes = [0u8; 12];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::internal("failed to generate encryption nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::from(aad_context.as_bytes()), &mut in_out)
            .map_err(|_| AppError::internal("token encryption failed"))?;

        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&in_out);
        Ok(STANDARD.encode(payload))
    }

    /// Decrypt a provider token stored by [`Self::encrypt_token`].
    pub(crate) fn decrypt_token(&self, encoded: &str, aad_context: &str) -> AppResult<String> {
        let payload = STANDARD
            .decode(encoded)
            .map_err(|_| AppError::internal("stored token is not valid base64"))?;
        if payload.len() < 12 {
            return Err(AppError::internal("stored token payload is truncated"));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(12);

        let unbound = UnboundKey::new(&AES_256_GCM, self.encryption_key.as_ref())
            .map_err(|_| AppError::internal("failed to initialize encryption key"))?;
        let key = LessSafeKey::new(unbound);

        let nonce_arr: [u8; 12] = nonce_bytes
            .try_into()
            .map_err(|_| AppError::internal("stored token nonce is malformed"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_arr);

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::from(aad_context.as_bytes()), &mut in_out)
            .map_err(|_| {
                AppError::internal("token decryption failed (tampered data or AAD mismatch)")
            })?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| AppError::internal("decrypted token is not valid UTF-8"))
    }
}

/// Parse a stored RFC 3339 timestamp
pub(crate) fn parse_ts(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("invalid stored timestamp '{raw}': {e}")))
}

/// Parse an optional stored RFC 3339 timestamp
pub(crate) fn parse_ts_opt(raw: Option<String>) -> AppResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}
