// ABOUTME: Normalized health record store keyed by (user, provider, data type, recorded-at)
// ABOUTME: Idempotent upserts with created/updated/skipped accounting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use super::{parse_ts, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{DataType, DateRange, HealthDataRecord, HealthValue, Provider};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Accounting for one batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// New rows written
    pub created: u32,
    /// Existing rows overwritten with changed value/unit
    pub updated: u32,
    /// Duplicates whose value and unit were already identical
    pub skipped: u32,
}

impl Database {
    /// Upsert a batch of health records.
    ///
    /// Re-ingesting an identity key overwrites `value`/`unit` rather than
    /// duplicating, so re-running a sync over the same window is safe. A
    /// duplicate with an identical payload counts as skipped. The natural key
    /// is the concurrency boundary: concurrent writers for different keys
    /// need no coordination.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or a database operation fails.
    pub async fn upsert_health_records(
        &self,
        records: &[HealthDataRecord],
    ) -> AppResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();

        for record in records {
            let value_json = serde_json::to_string(&record.value)?;
            let recorded_at = record.recorded_at.to_rfc3339();

            let existing = sqlx::query(
                r"
                SELECT value, unit FROM health_records
                WHERE user_id = ? AND provider = ? AND data_type = ? AND recorded_at = ?
                ",
            )
            .bind(record.user_id.to_string())
            .bind(record.provider.as_str())
            .bind(record.data_type.as_str())
            .bind(&recorded_at)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("failed to query health record: {e}")))?;

            match existing {
                None => {
                    let now = Utc::now().to_rfc3339();
                    sqlx::query(
                        r"
                        INSERT INTO health_records (
                            id, user_id, provider, data_type, recorded_at,
                            value, unit, created_at, updated_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(user_id, provider, data_type, recorded_at) DO UPDATE SET
                            value = excluded.value,
                            unit = excluded.unit,
                            updated_at = excluded.updated_at
                        ",
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(record.user_id.to_string())
                    .bind(record.provider.as_str())
                    .bind(record.data_type.as_str())
                    .bind(&recorded_at)
                    .bind(&value_json)
                    .bind(&record.unit)
                    .bind(&now)
                    .bind(&now)
                    .execute(self.pool())
                    .await
                    .map_err(|e| {
                        AppError::database(format!("failed to insert health record: {e}"))
                    })?;
                    outcome.created += 1;
                }
                Some(row) => {
                    let stored_value: String = row.get("value");
                    let stored_unit: String = row.get("unit");
                    if stored_value == value_json && stored_unit == record.unit {
                        outcome.skipped += 1;
                    } else {
                        sqlx::query(
                            r"
                            UPDATE health_records
                            SET value = ?, unit = ?, updated_at = ?
                            WHERE user_id = ? AND provider = ? AND data_type = ? AND recorded_at = ?
                            ",
                        )
                        .bind(&value_json)
                        .bind(&record.unit)
                        .bind(Utc::now().to_rfc3339())
                        .bind(record.user_id.to_string())
                        .bind(record.provider.as_str())
                        .bind(record.data_type.as_str())
                        .bind(&recorded_at)
                        .execute(self.pool())
                        .await
                        .map_err(|e| {
                            AppError::database(format!("failed to update health record: {e}"))
                        })?;
                        outcome.updated += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Read back stored records for one user and data type, oldest first.
    ///
    /// Downstream consumers (analytics, dashboards) read through this; the
    /// engine itself only writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or stored data is malformed.
    pub async fn get_health_records(
        &self,
        user_id: Uuid,
        data_type: DataType,
        range: Option<DateRange>,
    ) -> AppResult<Vec<HealthDataRecord>> {
        let rows = if let Some(range) = range {
            sqlx::query(
                r"
                SELECT * FROM health_records
                WHERE user_id = ? AND data_type = ? AND recorded_at >= ? AND recorded_at <= ?
                ORDER BY recorded_at ASC
                ",
            )
            .bind(user_id.to_string())
            .bind(data_type.as_str())
            .bind(range.start.to_rfc3339())
            .bind(range.end.to_rfc3339())
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query(
                r"
                SELECT * FROM health_records
                WHERE user_id = ? AND data_type = ?
                ORDER BY recorded_at ASC
                ",
            )
            .bind(user_id.to_string())
            .bind(data_type.as_str())
            .fetch_all(self.pool())
            .await
        }
        .map_err(|e| AppError::database(format!("failed to query health records: {e}")))?;

        rows.iter().map(row_to_health_record).collect()
    }
}

fn row_to_health_record(row: &SqliteRow) -> AppResult<HealthDataRecord> {
    let user_id = Uuid::parse_str(&row.get::<String, _>("user_id"))?;

    let provider_str: String = row.get("provider");
    let provider = Provider::from_str_value(&provider_str).ok_or_else(|| {
        AppError::database(format!("stored record references unknown provider '{provider_str}'"))
    })?;

    let data_type_str: String = row.get("data_type");
    let data_type = DataType::from_str_value(&data_type_str).ok_or_else(|| {
        AppError::database(format!("stored record has unknown data type '{data_type_str}'"))
    })?;

    let value: HealthValue = serde_json::from_str(&row.get::<String, _>("value"))?;

    Ok(HealthDataRecord {
        user_id,
        provider,
        data_type,
        recorded_at: parse_ts(&row.get::<String, _>("recorded_at"))?,
        value,
        unit: row.get("unit"),
    })
}
