// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Rotating cleanup of stale rows
//!
//! Every call to [`Cleaner::run`] executes exactly one of the cleanup
//! statements, picked in round-robin order by a shared [`RotationCursor`], in
//! its own transaction. Each call is cheap and bounded, which makes it
//! suitable for piggy-backing on request handlers with
//! [`Cleaner::run_best_effort`], as well as for the periodic
//! [`CleanupWorker`].

use std::{sync::LazyLock, time::Duration};

use authgc_storage::RepositoryFactory;
use opentelemetry::metrics::Meter;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

mod cleaner;
mod cursor;
mod reporter;
mod worker;

pub use self::{
    cleaner::{Cleaner, CleanupError},
    cursor::RotationCursor,
    reporter::{CleanupReporter, MetricsReporter},
    worker::CleanupWorker,
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = opentelemetry::InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});

/// Initialise the periodic cleanup worker and spawn it on the given task
/// tracker.
///
/// The worker stops once the cancellation token is cancelled.
///
/// # Panics
///
/// Panics if `interval` is zero.
pub fn init_and_run(
    repository_factory: impl RepositoryFactory + 'static,
    cleaner: Cleaner,
    interval: Duration,
    cancellation_token: CancellationToken,
    task_tracker: &TaskTracker,
) {
    let worker = CleanupWorker::new(cleaner, repository_factory, interval);
    task_tracker.spawn(worker.run(cancellation_token));
}
