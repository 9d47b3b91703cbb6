// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use authgc_storage::CleanupKind;
use opentelemetry::{
    Key, KeyValue,
    metrics::{Counter, Meter},
};

use crate::{METER, cleaner::CleanupError};

const KIND: Key = Key::from_static_str("cleanup.kind");
const STATUS: Key = Key::from_static_str("cleanup.status");

/// Receives the outcome of every cleanup invocation
pub trait CleanupReporter: Send + Sync {
    /// Called after a cleanup transaction was committed
    fn report_success(&self, kind: CleanupKind, affected_rows: usize);

    /// Called after a cleanup invocation failed. Nothing was persisted.
    fn report_failure(&self, kind: CleanupKind, error: &CleanupError);
}

/// A [`CleanupReporter`] which records OpenTelemetry metrics
#[derive(Clone)]
pub struct MetricsReporter {
    affected_rows: Counter<u64>,
    runs: Counter<u64>,
}

impl MetricsReporter {
    /// Create the reporter, registering its instruments on the global meter
    /// provider
    #[must_use]
    pub fn new() -> Self {
        Self::with_meter(&METER)
    }

    /// Create the reporter, registering its instruments on the given meter
    #[must_use]
    pub fn with_meter(meter: &Meter) -> Self {
        let affected_rows = meter
            .u64_counter("authgc.cleanup.affected_rows")
            .with_description("Number of rows deleted or revoked by the cleanup")
            .with_unit("{row}")
            .build();

        let runs = meter
            .u64_counter("authgc.cleanup.runs")
            .with_description("Number of cleanup invocations")
            .with_unit("{run}")
            .build();

        // Record zero on every series so that the metrics are initialized
        for kind in CleanupKind::ALL {
            affected_rows.add(0, &[KeyValue::new(KIND, kind.as_str())]);
            for status in ["success", "failure"] {
                runs.add(
                    0,
                    &[
                        KeyValue::new(KIND, kind.as_str()),
                        KeyValue::new(STATUS, status),
                    ],
                );
            }
        }

        Self {
            affected_rows,
            runs,
        }
    }
}

impl Default for MetricsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupReporter for MetricsReporter {
    fn report_success(&self, kind: CleanupKind, affected_rows: usize) {
        let affected_rows = u64::try_from(affected_rows).unwrap_or(u64::MAX);
        self.affected_rows
            .add(affected_rows, &[KeyValue::new(KIND, kind.as_str())]);
        self.runs.add(
            1,
            &[
                KeyValue::new(KIND, kind.as_str()),
                KeyValue::new(STATUS, "success"),
            ],
        );
    }

    fn report_failure(&self, kind: CleanupKind, _error: &CleanupError) {
        self.runs.add(
            1,
            &[
                KeyValue::new(KIND, kind.as_str()),
                KeyValue::new(STATUS, "failure"),
            ],
        );
    }
}
