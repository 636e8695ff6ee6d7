// ABOUTME: Golden-source resolver - ranks eligible providers per data type for a user
// ABOUTME: Pure recompute over current connection state, never cached or persisted

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::catalog::IntegrationCatalog;
use crate::database::Database;
use crate::errors::AppResult;
use crate::models::{Connection, DataType, GoldenSourceConfig, Provider};
use std::sync::Arc;

/// Answers "which provider's data should be believed for data type X".
///
/// The ranking is derived on every call from the catalog's static priority
/// table filtered to the user's currently eligible connections, with the
/// user's primary-override declarations promoted to the front. Nothing is
/// stored, so a disconnect or pause is reflected on the very next call with
/// no invalidation step.
pub struct GoldenSourceResolver {
    catalog: Arc<IntegrationCatalog>,
    database: Database,
}

impl GoldenSourceResolver {
    /// Wire up the resolver
    #[must_use]
    pub fn new(catalog: Arc<IntegrationCatalog>, database: Database) -> Self {
        Self { catalog, database }
    }

    /// Full golden-source ranking for a user, one entry per data type with at
    /// least one eligible provider.
    ///
    /// # Errors
    ///
    /// Returns a database error if the connection query fails.
    pub async fn resolve(&self, user_id: uuid::Uuid) -> AppResult<GoldenSourceConfig> {
        let connections = self.database.list_connections(user_id).await?;
        let mut config = GoldenSourceConfig::new();
        for data_type in DataType::ALL {
            let ranked = self.rank(data_type, &connections);
            if !ranked.is_empty() {
                config.insert(data_type, ranked);
            }
        }
        Ok(config)
    }

    /// Golden source for one data type: the head of the ranking, or `None`
    /// when the user has no eligible provider for it.
    ///
    /// # Errors
    ///
    /// Returns a database error if the connection query fails.
    pub async fn resolve_one(
        &self,
        user_id: uuid::Uuid,
        data_type: DataType,
    ) -> AppResult<Option<Provider>> {
        let connections = self.database.list_connections(user_id).await?;
        Ok(self.rank(data_type, &connections).first().copied())
    }

    fn rank(&self, data_type: DataType, connections: &[Connection]) -> Vec<Provider> {
        let eligible: Vec<&Connection> = connections
            .iter()
            .filter(|c| c.is_sync_eligible())
            .collect();

        // Static catalog order filtered to eligible connections, then the
        // user's primary overrides promoted to the front. Promotion preserves
        // the static relative order among the overrides themselves.
        let base: Vec<Provider> = self
            .catalog
            .priority_for(data_type)
            .into_iter()
            .filter(|p| eligible.iter().any(|c| c.provider == *p))
            .collect();

        let (primary, rest): (Vec<Provider>, Vec<Provider>) =
            base.into_iter().partition(|p| {
                eligible.iter().any(|c| {
                    c.provider == *p && c.primary_for_data_types.contains(&data_type)
                })
            });

        let mut ranked = primary;
        ranked.extend(rest);
        ranked
    }
}
