// ABOUTME: Production logging setup with env-filtered structured output
// ABOUTME: Installs a tracing subscriber with optional JSON formatting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Vitalsync Health

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Level comes from `RUST_LOG` (default `vitalsync=info`); set
/// `VITALSYNC_LOG_FORMAT=json` for structured JSON output. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vitalsync=info"));

    let json = std::env::var("VITALSYNC_LOG_FORMAT")
        .is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}
