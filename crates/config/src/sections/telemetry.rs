// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::serde_as;
use url::Url;

use crate::{ConfigurationError, ConfigurationSection};

fn half() -> f64 {
    0.5
}

#[allow(clippy::unnecessary_wraps)]
fn local_collector() -> Option<String> {
    Some("http://localhost:4318".to_owned())
}

fn default_export_interval() -> Duration {
    Duration::from_secs(60)
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_export_interval(interval: &Duration) -> bool {
    *interval == default_export_interval()
}

fn check_sample_rate(path: &str, sample_rate: Option<f64>) -> Result<(), ConfigurationError> {
    match sample_rate {
        Some(rate) if !(0.0..=1.0).contains(&rate) => Err(figment::error::Error::custom(
            format!("{path} must be between 0.0 and 1.0, got {rate}"),
        )
        .with_path(path)
        .into()),
        _ => Ok(()),
    }
}

/// Where to send traces or metrics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Keep everything in-process
    #[default]
    None,

    /// Print to the standard output, for local debugging
    Stdout,

    /// Push to a collector speaking OTLP over HTTP
    Otlp,
}

/// Trace export
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct TracingConfig {
    /// Where to send the traces. Nothing is exported by default.
    #[serde(default)]
    pub exporter: ExporterKind,

    /// Collector endpoint, when exporting with `otlp`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(url, default = "local_collector")]
    pub endpoint: Option<Url>,

    /// Fraction of the root spans to keep, between `0.0` and `1.0`. All of
    /// them are kept when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(example = "half", range(min = 0.0, max = 1.0))]
    pub sample_rate: Option<f64>,
}

/// Metrics export
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct MetricsConfig {
    /// Where to send the metrics. Nothing is exported by default.
    #[serde(default)]
    pub exporter: ExporterKind,

    /// Collector endpoint, when exporting with `otlp`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(url, default = "local_collector")]
    pub endpoint: Option<Url>,

    /// Seconds between two metric exports. Defaults to 60.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(
        default = "default_export_interval",
        skip_serializing_if = "is_default_export_interval"
    )]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub export_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            exporter: ExporterKind::None,
            endpoint: None,
            export_interval: default_export_interval(),
        }
    }
}

/// Error reporting to Sentry
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SentryConfig {
    /// DSN of the Sentry project. Reporting is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(url)]
    pub dsn: Option<String>,

    /// Environment attached to the reported events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Fraction of the events to report, between `0.0` and `1.0`. All of them
    /// are reported when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0.0, max = 1.0))]
    pub sample_rate: Option<f32>,
}

/// Observability of the process: traces, metrics and error reporting
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct TelemetryConfig {
    /// Trace export
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Metrics export
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Error reporting to Sentry
    #[serde(default)]
    pub sentry: SentryConfig,
}

impl TelemetryConfig {
    pub(crate) fn is_default(&self) -> bool {
        self.tracing.exporter == ExporterKind::None
            && self.tracing.endpoint.is_none()
            && self.tracing.sample_rate.is_none()
            && self.metrics.exporter == ExporterKind::None
            && self.metrics.endpoint.is_none()
            && is_default_export_interval(&self.metrics.export_interval)
            && self.sentry.dsn.is_none()
            && self.sentry.environment.is_none()
            && self.sentry.sample_rate.is_none()
    }
}

impl ConfigurationSection for TelemetryConfig {
    const PATH: Option<&'static str> = Some("telemetry");

    fn validate(&self, _figment: &figment::Figment) -> Result<(), ConfigurationError> {
        check_sample_rate("tracing.sample_rate", self.tracing.sample_rate)?;
        check_sample_rate("sentry.sample_rate", self.sentry.sample_rate.map(f64::from))?;

        if self.metrics.export_interval.is_zero() {
            return Err(
                figment::error::Error::custom("metrics export interval must not be zero")
                    .with_path("metrics.export_interval")
                    .into(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;
    use crate::ConfigurationSectionExt;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    telemetry:
                      tracing:
                        exporter: otlp
                        endpoint: https://collector.example.com:4318
                        sample_rate: 0.25
                      metrics:
                        exporter: stdout
                        export_interval: 15
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = TelemetryConfig::extract(&figment).map_err(|e| e.to_string())?;

            assert_eq!(config.tracing.exporter, ExporterKind::Otlp);
            assert_eq!(
                config.tracing.endpoint.as_ref().map(Url::as_str),
                Some("https://collector.example.com:4318/")
            );
            assert_eq!(config.tracing.sample_rate, Some(0.25));
            assert_eq!(config.metrics.exporter, ExporterKind::Stdout);
            assert_eq!(config.metrics.export_interval, Duration::from_secs(15));
            assert!(config.sentry.dsn.is_none());
            assert!(!config.is_default());

            Ok(())
        });
    }

    #[test]
    fn missing_section_is_default() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "{}")?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config =
                TelemetryConfig::extract_or_default(&figment).map_err(|e| e.to_string())?;

            assert!(config.is_default());
            assert_eq!(config.metrics.export_interval, Duration::from_secs(60));

            Ok(())
        });
    }

    #[test]
    fn reject_invalid_sample_rate() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    telemetry:
                      tracing:
                        sample_rate: 2.0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = TelemetryConfig::extract(&figment).unwrap_err();
            assert!(error.to_string().contains("tracing.sample_rate"));

            Ok(())
        });
    }
}
