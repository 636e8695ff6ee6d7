// ABOUTME: Static integration catalog describing every supported provider
// ABOUTME: Capabilities, auth type, sync cadence, scopes, and the golden-source priority table
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use crate::errors::{AppError, AppResult};
use crate::models::{AuthType, DataType, Provider};
use std::collections::{BTreeMap, BTreeSet};

/// Static description of one supported provider.
///
/// Immutable, loaded at process start. Every `Provider` referenced anywhere
/// else in the model must have a definition here.
#[derive(Debug, Clone)]
pub struct IntegrationDefinition {
    /// Provider id
    pub provider: Provider,
    /// Human-readable name for logs and UIs
    pub display_name: &'static str,
    /// Priority hint; lower is preferred when golden-source ranks tie
    pub tier: u8,
    /// Data types this provider produces
    pub data_types: BTreeSet<DataType>,
    /// Polling cadence in minutes; 0 means push/webhook-driven, never polled
    pub sync_frequency_minutes: u32,
    /// How users authorize this provider
    pub auth_type: AuthType,
    /// OAuth scopes the authorization request must ask for
    pub required_scopes: Vec<&'static str>,
    /// Authorization endpoint, for OAuth2 providers only
    pub authorize_url: Option<&'static str>,
}

/// Read-only registry of provider definitions plus the golden-source rank table.
///
/// Explicitly injected into every component rather than held as a global, so
/// tests can substitute a smaller catalog. Thread-safe by construction.
#[derive(Debug)]
pub struct IntegrationCatalog {
    definitions: Vec<IntegrationDefinition>,
    priority: BTreeMap<DataType, Vec<Provider>>,
}

impl IntegrationCatalog {
    /// Build a catalog from definitions and a per-data-type rank table.
    ///
    /// The rank table lists, for each data type, the providers considered most
    /// trustworthy for that type in order. Providers that produce the type but
    /// are absent from the table are appended ordered by tier, then name.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if a provider is defined twice, declares no
    /// data types, or a rank-table entry references a provider that is missing
    /// from the catalog or does not produce that data type.
    pub fn new(
        definitions: Vec<IntegrationDefinition>,
        ranks: BTreeMap<DataType, Vec<Provider>>,
    ) -> AppResult<Self> {
        let mut seen = BTreeSet::new();
        for def in &definitions {
            if !seen.insert(def.provider) {
                return Err(AppError::validation(format!(
                    "provider '{}' defined more than once in catalog",
                    def.provider
                )));
            }
            if def.data_types.is_empty() {
                return Err(AppError::validation(format!(
                    "provider '{}' declares no data types",
                    def.provider
                )));
            }
        }

        let mut priority = BTreeMap::new();
        for data_type in DataType::ALL {
            let ranked = ranks.get(&data_type).cloned().unwrap_or_default();
            for provider in &ranked {
                let def = definitions
                    .iter()
                    .find(|d| d.provider == *provider)
                    .ok_or_else(|| {
                        AppError::validation(format!(
                            "rank table for '{data_type}' references undefined provider '{provider}'"
                        ))
                    })?;
                if !def.data_types.contains(&data_type) {
                    return Err(AppError::validation(format!(
                        "rank table lists '{provider}' for '{data_type}' but the provider does not produce it"
                    )));
                }
            }

            // Unranked producers go after the ranked ones, by tier then name.
            let mut remainder: Vec<&IntegrationDefinition> = definitions
                .iter()
                .filter(|d| d.data_types.contains(&data_type) && !ranked.contains(&d.provider))
                .collect();
            remainder.sort_by_key(|d| (d.tier, d.provider.as_str()));

            let mut full = ranked;
            full.extend(remainder.into_iter().map(|d| d.provider));
            if !full.is_empty() {
                priority.insert(data_type, full);
            }
        }

        Ok(Self {
            definitions,
            priority,
        })
    }

    /// The built-in production catalog
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the built-in tables are inconsistent
    /// (a defect caught at process start, not at request time).
    pub fn builtin() -> AppResult<Self> {
        Self::new(builtin_definitions(), builtin_ranks())
    }

    /// All definitions
    #[must_use]
    pub fn list_definitions(&self) -> &[IntegrationDefinition] {
        &self.definitions
    }

    /// Look up one provider's definition.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` on a miss. Callers must fail fast rather than
    /// guess default metadata.
    pub fn get(&self, provider: Provider) -> AppResult<&IntegrationDefinition> {
        self.definitions
            .iter()
            .find(|d| d.provider == provider)
            .ok_or_else(|| AppError::unknown_provider(provider.as_str()))
    }

    /// Static golden-source priority list for a data type.
    ///
    /// Ordered most-trusted first; empty when no catalog provider produces
    /// the type.
    #[must_use]
    pub fn priority_for(&self, data_type: DataType) -> Vec<Provider> {
        self.priority.get(&data_type).cloned().unwrap_or_default()
    }
}

fn data_types(types: &[DataType]) -> BTreeSet<DataType> {
    types.iter().copied().collect()
}

fn builtin_definitions() -> Vec<IntegrationDefinition> {
    vec![
        IntegrationDefinition {
            provider: Provider::Oura,
            display_name: "Oura Ring",
            tier: 1,
            data_types: data_types(&[
                DataType::Sleep,
                DataType::Hrv,
                DataType::HeartRate,
                DataType::Steps,
            ]),
            sync_frequency_minutes: 60,
            auth_type: AuthType::OAuth2,
            required_scopes: vec!["daily", "heartrate", "personal"],
            authorize_url: Some("https://cloud.ouraring.com/oauth/authorize"),
        },
        IntegrationDefinition {
            provider: Provider::Whoop,
            display_name: "WHOOP",
            tier: 1,
            data_types: data_types(&[
                DataType::Sleep,
                DataType::Hrv,
                DataType::HeartRate,
                DataType::Workout,
                DataType::Calories,
            ]),
            sync_frequency_minutes: 60,
            auth_type: AuthType::OAuth2,
            required_scopes: vec!["read:recovery", "read:sleep", "read:workout"],
            authorize_url: Some("https://api.prod.whoop.com/oauth/oauth2/auth"),
        },
        IntegrationDefinition {
            provider: Provider::Fitbit,
            display_name: "Fitbit",
            tier: 2,
            data_types: data_types(&[
                DataType::Sleep,
                DataType::HeartRate,
                DataType::Steps,
                DataType::Calories,
                DataType::Weight,
                DataType::Workout,
            ]),
            sync_frequency_minutes: 30,
            auth_type: AuthType::OAuth2,
            required_scopes: vec!["activity", "heartrate", "sleep", "weight"],
            authorize_url: Some("https://www.fitbit.com/oauth2/authorize"),
        },
        IntegrationDefinition {
            provider: Provider::Garmin,
            display_name: "Garmin Connect",
            tier: 1,
            data_types: data_types(&[
                DataType::HeartRate,
                DataType::Hrv,
                DataType::Sleep,
                DataType::Steps,
                DataType::Calories,
                DataType::Weight,
                DataType::Workout,
            ]),
            sync_frequency_minutes: 30,
            auth_type: AuthType::OAuth2,
            required_scopes: vec!["wellness:read", "activity:read"],
            authorize_url: Some("https://connect.garmin.com/oauthConfirm"),
        },
        IntegrationDefinition {
            provider: Provider::Withings,
            display_name: "Withings",
            tier: 2,
            data_types: data_types(&[
                DataType::Weight,
                DataType::Sleep,
                DataType::Steps,
                DataType::HeartRate,
            ]),
            sync_frequency_minutes: 360,
            auth_type: AuthType::OAuth2,
            required_scopes: vec!["user.metrics", "user.activity"],
            authorize_url: Some("https://account.withings.com/oauth2_user/authorize2"),
        },
        IntegrationDefinition {
            provider: Provider::AppleHealth,
            display_name: "Apple Health",
            tier: 3,
            data_types: data_types(&[
                DataType::HeartRate,
                DataType::Hrv,
                DataType::Sleep,
                DataType::Steps,
                DataType::Calories,
                DataType::Weight,
                DataType::Workout,
                DataType::Nutrition,
            ]),
            // Push-driven via the companion app; never polled.
            sync_frequency_minutes: 0,
            auth_type: AuthType::Native,
            required_scopes: vec![],
            authorize_url: None,
        },
        IntegrationDefinition {
            provider: Provider::Cronometer,
            display_name: "Cronometer",
            tier: 2,
            data_types: data_types(&[DataType::Nutrition, DataType::Weight, DataType::Calories]),
            sync_frequency_minutes: 1440,
            auth_type: AuthType::ApiKey,
            required_scopes: vec![],
            authorize_url: None,
        },
    ]
}

/// Golden-source rank table: per data type, dedicated sensors outrank
/// aggregators. Apple Health sits last for everything it mirrors because it
/// re-reports other sources' data.
fn builtin_ranks() -> BTreeMap<DataType, Vec<Provider>> {
    BTreeMap::from([
        (
            DataType::Sleep,
            vec![
                Provider::Oura,
                Provider::Whoop,
                Provider::Fitbit,
                Provider::Garmin,
                Provider::Withings,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::Hrv,
            vec![
                Provider::Oura,
                Provider::Whoop,
                Provider::Garmin,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::HeartRate,
            vec![
                Provider::Garmin,
                Provider::Whoop,
                Provider::Oura,
                Provider::Fitbit,
                Provider::Withings,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::Steps,
            vec![
                Provider::Garmin,
                Provider::Fitbit,
                Provider::Oura,
                Provider::Withings,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::Calories,
            vec![
                Provider::Garmin,
                Provider::Fitbit,
                Provider::Whoop,
                Provider::Cronometer,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::Weight,
            vec![
                Provider::Withings,
                Provider::Garmin,
                Provider::Fitbit,
                Provider::Cronometer,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::Workout,
            vec![
                Provider::Garmin,
                Provider::Whoop,
                Provider::Fitbit,
                Provider::AppleHealth,
            ],
        ),
        (
            DataType::Nutrition,
            vec![Provider::Cronometer, Provider::AppleHealth],
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_consistent() {
        let catalog = IntegrationCatalog::builtin().unwrap();
        for provider in Provider::ALL {
            assert!(catalog.get(provider).is_ok(), "missing {provider}");
        }
        assert_eq!(catalog.list_definitions().len(), Provider::ALL.len());
    }

    #[test]
    fn every_declared_data_type_has_a_priority_list() {
        let catalog = IntegrationCatalog::builtin().unwrap();
        for def in catalog.list_definitions() {
            for data_type in &def.data_types {
                let ranked = catalog.priority_for(*data_type);
                assert!(
                    ranked.contains(&def.provider),
                    "{} missing from '{data_type}' priority list",
                    def.provider
                );
            }
        }
    }

    #[test]
    fn sleep_priority_prefers_oura_over_apple_health() {
        let catalog = IntegrationCatalog::builtin().unwrap();
        let ranked = catalog.priority_for(DataType::Sleep);
        let oura = ranked.iter().position(|p| *p == Provider::Oura).unwrap();
        let apple = ranked
            .iter()
            .position(|p| *p == Provider::AppleHealth)
            .unwrap();
        assert!(oura < apple);
        assert_eq!(ranked[0], Provider::Oura);
    }

    #[test]
    fn rank_table_entry_must_produce_the_type() {
        let defs = vec![IntegrationDefinition {
            provider: Provider::Oura,
            display_name: "Oura Ring",
            tier: 1,
            data_types: data_types(&[DataType::Sleep]),
            sync_frequency_minutes: 60,
            auth_type: AuthType::OAuth2,
            required_scopes: vec![],
            authorize_url: None,
        }];
        let ranks = BTreeMap::from([(DataType::Weight, vec![Provider::Oura])]);
        let err = IntegrationCatalog::new(defs, ranks).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ValidationError);
    }
}
