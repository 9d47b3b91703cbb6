// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::serde_as;

use crate::{ConfigurationError, ConfigurationSection};

fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_true(value: &bool) -> bool {
    *value
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_refresh_tokens_table() -> String {
    "refresh_tokens".to_owned()
}

fn default_sessions_table() -> String {
    "sessions".to_owned()
}

fn default_relay_states_table() -> String {
    "saml_relay_states".to_owned()
}

fn default_flow_states_table() -> String {
    "flow_state".to_owned()
}

fn schema_qualified_table_example() -> &'static str {
    "auth.sessions"
}

/// Physical names of the tables to clean up
///
/// Each name can be qualified with a schema, like `auth.sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CleanupTablesConfig {
    /// Table holding the session refresh tokens
    #[serde(default = "default_refresh_tokens_table")]
    pub refresh_tokens: String,

    /// Table holding the sessions
    #[serde(default = "default_sessions_table")]
    #[schemars(example = "schema_qualified_table_example")]
    pub sessions: String,

    /// Table holding the relay states of external identity logins
    #[serde(default = "default_relay_states_table")]
    pub relay_states: String,

    /// Table holding the flow states of local multi-step logins
    #[serde(default = "default_flow_states_table")]
    pub flow_states: String,
}

impl Default for CleanupTablesConfig {
    fn default() -> Self {
        Self {
            refresh_tokens: default_refresh_tokens_table(),
            sessions: default_sessions_table(),
            relay_states: default_relay_states_table(),
            flow_states: default_flow_states_table(),
        }
    }
}

impl CleanupTablesConfig {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("refresh_tokens", self.refresh_tokens.as_str()),
            ("sessions", self.sessions.as_str()),
            ("relay_states", self.relay_states.as_str()),
            ("flow_states", self.flow_states.as_str()),
        ]
        .into_iter()
    }
}

/// Configuration of the cleanup of stale rows
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CleanupConfig {
    /// Whether the worker should periodically clean up stale rows. Defaults to
    /// `true`.
    #[serde(default = "default_true", skip_serializing_if = "is_default_true")]
    pub enabled: bool,

    /// Time between two cleanup invocations of the worker, in seconds. Each
    /// invocation runs a single cleanup statement. Defaults to 10 seconds.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: Duration,

    /// Maximum time a single cleanup invocation may take, in seconds. The
    /// transaction is rolled back when it is exceeded. Defaults to 10 seconds.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,

    /// Physical names of the tables to clean up
    #[serde(default, skip_serializing_if = "CleanupTablesConfig::is_default")]
    pub tables: CleanupTablesConfig,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval: default_interval(),
            timeout: default_timeout(),
            tables: CleanupTablesConfig::default(),
        }
    }
}

impl ConfigurationSection for CleanupConfig {
    const PATH: Option<&'static str> = Some("cleanup");

    fn validate(&self, _figment: &figment::Figment) -> Result<(), ConfigurationError> {
        if self.interval.is_zero() {
            return Err(figment::error::Error::custom("The interval must not be zero")
                .with_path("interval")
                .into());
        }

        if self.timeout.is_zero() {
            return Err(figment::error::Error::custom("The timeout must not be zero")
                .with_path("timeout")
                .into());
        }

        for (key, table) in self.tables.iter() {
            if table.split('.').any(str::is_empty) {
                return Err(
                    figment::error::Error::custom(format!("Invalid table name {table:?}"))
                        .with_path("tables")
                        .with_path(key)
                        .into(),
                );
            }
        }

        Ok(())
    }
}
