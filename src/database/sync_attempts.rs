// ABOUTME: Append-only sync attempt log with a conditional open-attempt claim
// ABOUTME: Open, close, list, and sweep operations for sync observability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use super::{parse_ts, parse_ts_opt, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{DateRange, SyncAttempt, SyncErrorEntry, SyncStatus, SyncType};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

impl Database {
    /// Open a new sync attempt for a connection.
    ///
    /// The insert doubles as the cross-process claim: a partial unique index
    /// allows at most one open attempt per connection, so a concurrent second
    /// trigger fails with `SyncInProgress` and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` when another attempt is already open for this
    /// connection, or a database error otherwise.
    pub async fn open_sync_attempt(
        &self,
        connection_id: &str,
        sync_type: SyncType,
        date_range: Option<DateRange>,
    ) -> AppResult<SyncAttempt> {
        let attempt = SyncAttempt {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.to_owned(),
            sync_type,
            started_at: Utc::now(),
            completed_at: None,
            status: None,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_skipped: 0,
            errors: Vec::new(),
            date_range_start: date_range.map(|r| r.start),
            date_range_end: date_range.map(|r| r.end),
        };

        let result = sqlx::query(
            r"
            INSERT INTO sync_attempts (
                id, connection_id, sync_type, started_at, date_range_start, date_range_end
            ) VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&attempt.id)
        .bind(connection_id)
        .bind(sync_type.as_str())
        .bind(attempt.started_at.to_rfc3339())
        .bind(attempt.date_range_start.map(|t| t.to_rfc3339()))
        .bind(attempt.date_range_end.map(|t| t.to_rfc3339()))
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(attempt),
            Err(e) => {
                let unique_violation = e
                    .as_database_error()
                    .is_some_and(|db_err| db_err.is_unique_violation());
                if unique_violation {
                    Err(AppError::sync_in_progress(connection_id))
                } else {
                    Err(AppError::database(format!("failed to open sync attempt: {e}")))
                }
            }
        }
    }

    /// Close a sync attempt with its terminal outcome.
    ///
    /// The `completed_at IS NULL` guard makes closed attempts immutable: a
    /// second close is a silent no-op rather than an overwrite.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the attempt carries no terminal status,
    /// or a database error if the write fails.
    pub async fn close_sync_attempt(&self, attempt: &SyncAttempt) -> AppResult<()> {
        let status = attempt.status.ok_or_else(|| {
            AppError::validation("cannot close a sync attempt without a terminal status")
        })?;
        let completed_at = attempt.completed_at.unwrap_or_else(Utc::now);
        let errors = serde_json::to_string(&attempt.errors)?;

        sqlx::query(
            r"
            UPDATE sync_attempts
            SET completed_at = ?,
                status = ?,
                records_processed = ?,
                records_created = ?,
                records_updated = ?,
                records_skipped = ?,
                errors = ?
            WHERE id = ? AND completed_at IS NULL
            ",
        )
        .bind(completed_at.to_rfc3339())
        .bind(status.as_str())
        .bind(i64::from(attempt.records_processed))
        .bind(i64::from(attempt.records_created))
        .bind(i64::from(attempt.records_updated))
        .bind(i64::from(attempt.records_skipped))
        .bind(&errors)
        .bind(&attempt.id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to close sync attempt: {e}")))?;
        Ok(())
    }

    /// Most recent sync attempts for a connection, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_recent_sync_attempts(
        &self,
        connection_id: &str,
        limit: u32,
    ) -> AppResult<Vec<SyncAttempt>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM sync_attempts
            WHERE connection_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            ",
        )
        .bind(connection_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to list sync attempts: {e}")))?;

        rows.iter().map(row_to_sync_attempt).collect()
    }

    /// Close orphaned attempts that have been open past the deadline.
    ///
    /// An attempt left open (process crash mid-sync) would block the claim
    /// forever; the sweep closes it as failed with a `timeout` error entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn sweep_stale_attempts(&self, cutoff: DateTime<Utc>) -> AppResult<u32> {
        let now = Utc::now();
        let entry = vec![SyncErrorEntry {
            code: "timeout".to_owned(),
            message: "attempt swept after exceeding the sync deadline".to_owned(),
            timestamp: now,
        }];
        let errors = serde_json::to_string(&entry)?;

        let result = sqlx::query(
            r"
            UPDATE sync_attempts
            SET completed_at = ?, status = 'failed', errors = ?
            WHERE completed_at IS NULL AND started_at < ?
            ",
        )
        .bind(now.to_rfc3339())
        .bind(&errors)
        .bind(cutoff.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("failed to sweep stale attempts: {e}")))?;

        let swept = u32::try_from(result.rows_affected()).unwrap_or(u32::MAX);
        if swept > 0 {
            warn!("swept {swept} stale sync attempt(s) left open past the deadline");
        }
        Ok(swept)
    }
}

fn row_to_sync_attempt(row: &SqliteRow) -> AppResult<SyncAttempt> {
    let sync_type_str: String = row.get("sync_type");
    let sync_type = SyncType::from_str_value(&sync_type_str).ok_or_else(|| {
        AppError::database(format!("stored attempt has unknown sync type '{sync_type_str}'"))
    })?;

    let status = row
        .get::<Option<String>, _>("status")
        .as_deref()
        .map(|s| {
            SyncStatus::from_str_value(s).ok_or_else(|| {
                AppError::database(format!("stored attempt has unknown status '{s}'"))
            })
        })
        .transpose()?;

    let errors: Vec<SyncErrorEntry> = serde_json::from_str(&row.get::<String, _>("errors"))?;

    Ok(SyncAttempt {
        id: row.get("id"),
        connection_id: row.get("connection_id"),
        sync_type,
        started_at: parse_ts(&row.get::<String, _>("started_at"))?,
        completed_at: parse_ts_opt(row.get("completed_at"))?,
        status,
        records_processed: u32::try_from(row.get::<i64, _>("records_processed")).unwrap_or(0),
        records_created: u32::try_from(row.get::<i64, _>("records_created")).unwrap_or(0),
        records_updated: u32::try_from(row.get::<i64, _>("records_updated")).unwrap_or(0),
        records_skipped: u32::try_from(row.get::<i64, _>("records_skipped")).unwrap_or(0),
        errors,
        date_range_start: parse_ts_opt(row.get("date_range_start"))?,
        date_range_end: parse_ts_opt(row.get("date_range_end"))?,
    })
}
