// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod cleanup;
mod database;
mod telemetry;

pub use self::{
    cleanup::{CleanupConfig, CleanupTablesConfig},
    database::{DatabaseConfig, PgSslMode},
    telemetry::{ExporterKind, MetricsConfig, SentryConfig, TelemetryConfig, TracingConfig},
};
use crate::util::{ConfigurationError, ConfigurationSection};

/// Application configuration root
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Configuration of the cleanup of stale rows
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Configuration related to sending monitoring data
    #[serde(default, skip_serializing_if = "TelemetryConfig::is_default")]
    pub telemetry: TelemetryConfig,
}

impl ConfigurationSection for RootConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        self.database.validate(figment)?;
        self.cleanup.validate(figment)?;
        self.telemetry.validate(figment)?;

        Ok(())
    }
}

impl RootConfig {
    /// Configuration used in tests
    #[must_use]
    pub fn test() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cleanup: CleanupConfig {
                interval: std::time::Duration::from_secs(1),
                ..CleanupConfig::default()
            },
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Env, Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_config_with_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    database:
                      uri: postgresql://localhost/auth
                    cleanup:
                      enabled: false
                ",
            )?;
            jail.set_env("AUTHGC_CLEANUP_TIMEOUT", "3");

            let figment = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .merge(Env::prefixed("AUTHGC_").split("_"));
            let config = RootConfig::extract(&figment).map_err(|e| e.to_string())?;

            assert_eq!(config.database.uri.as_deref(), Some("postgresql://localhost/auth"));
            assert!(!config.cleanup.enabled);
            assert_eq!(config.cleanup.timeout, std::time::Duration::from_secs(3));
            assert_eq!(config.cleanup.interval, std::time::Duration::from_secs(10));

            Ok(())
        });
    }

    #[test]
    fn empty_config_is_valid() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "{}")?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = RootConfig::extract(&figment).map_err(|e| e.to_string())?;

            assert_eq!(config.database.uri.as_deref(), Some("postgresql://"));
            assert!(config.cleanup.enabled);

            Ok(())
        });
    }
}
