// ABOUTME: Server-side authorization state storage for CSRF protection
// ABOUTME: States are issued with a TTL and redeemable exactly once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::Provider;
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    /// Persist an issued authorization state
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn store_auth_state(
        &self,
        state: &str,
        user_id: Uuid,
        provider: Provider,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO auth_states (state, user_id, provider, created_at, expires_at, used)
            VALUES (?, ?, ?, ?, ?, 0)
            ",
        )
        .bind(state)
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to store auth state: {e}")))?;
        Ok(())
    }

    /// Redeem an authorization state exactly once.
    ///
    /// The conditional update is the redemption: a state that is unknown,
    /// expired, already used, or bound to a different user/provider affects
    /// zero rows and the exchange is rejected.
    ///
    /// # Errors
    ///
    /// Returns `AuthExchangeFailed` when the state cannot be redeemed.
    pub async fn redeem_auth_state(
        &self,
        state: &str,
        user_id: Uuid,
        provider: Provider,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE auth_states
            SET used = 1
            WHERE state = ? AND user_id = ? AND provider = ? AND used = 0 AND expires_at > ?
            ",
        )
        .bind(state)
        .bind(user_id.to_string())
        .bind(provider.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to redeem auth state: {e}")))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(AppError::auth_exchange(
                "authorization state is unknown, expired, or already used",
            ))
        }
    }
}
