// ABOUTME: Main library entry point for the Vitalsync health-data integration engine
// ABOUTME: Connects wearable/nutrition providers, syncs their data, and ranks golden sources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

// deny(unsafe_code): zero-tolerance unsafe policy; nothing in this engine
// needs raw pointers or FFI.
#![deny(unsafe_code)]

//! # Vitalsync Integration Engine
//!
//! The integration layer of a health-coaching platform: connects users'
//! wearable and nutrition accounts (Oura, WHOOP, Fitbit, Garmin, Withings,
//! Apple Health, Cronometer), pulls their data on a cadence, normalizes it
//! into one store, and answers "which provider should be believed for data
//! type X" per user.
//!
//! ## Architecture
//!
//! - **Catalog**: static registry of supported providers and their
//!   capabilities, auth types, and golden-source priority ranks
//! - **Auth coordinator**: builds OAuth2 authorization requests and finalizes
//!   grants (OAuth2 code, API key, or native handshake)
//! - **Connection manager**: per-(user, provider) lifecycle state machine
//!   (`pending -> active <-> paused`, `active -> error`, terminal
//!   `disconnected`)
//! - **Sync orchestrator**: triggers provider fetches under a hard deadline
//!   with at-most-one-in-flight claims and consecutive-failure demotion
//! - **Health record store**: idempotent upserts keyed on
//!   (user, provider, data type, recorded-at)
//! - **Golden-source resolver**: pure per-call ranking of eligible providers,
//!   user primary overrides first
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use vitalsync::config::EngineConfig;
//! use vitalsync::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = EngineConfig::from_env()?;
//!     println!(
//!         "engine configured: retry threshold {}, initial window {} days",
//!         config.retry_threshold, config.initial_sync_days
//!     );
//!     Ok(())
//! }
//! ```

/// Static integration catalog of supported providers
pub mod catalog;

/// Environment-based engine configuration
pub mod config;

/// Connection lifecycle state machine
pub mod connections;

/// SQLite persistence with token encryption at rest
pub mod database;

/// Integration engine facade wiring all components
pub mod engine;

/// Unified error handling with standard error codes
pub mod errors;

/// Outbound event contracts for downstream subsystems
pub mod events;

/// Golden-source resolution per user and data type
pub mod golden;

/// Structured logging initialization
pub mod logging;

/// Common data models for connections, syncs, and health records
pub mod models;

/// OAuth/auth coordination for provider connections
pub mod oauth;

/// Provider client boundary and registry
pub mod providers;

/// Sync orchestration with claims, deadlines, and retry policy
pub mod sync;

pub use engine::{IntegrationEngine, IntegrationEngineBuilder};
pub use errors::{AppError, AppResult, ErrorCode};
