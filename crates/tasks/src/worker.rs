// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use authgc_storage::{BoxRepositoryFactory, RepositoryFactory};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cleaner::{Cleaner, CleanupError};

/// Periodically runs the [`Cleaner`] until cancelled
pub struct CleanupWorker {
    cleaner: Cleaner,
    repository_factory: BoxRepositoryFactory,
    interval: Duration,
}

impl CleanupWorker {
    /// Create a new worker, running one cleanup invocation every `interval`
    #[must_use]
    pub fn new(
        cleaner: Cleaner,
        repository_factory: impl RepositoryFactory + 'static,
        interval: Duration,
    ) -> Self {
        Self {
            cleaner,
            repository_factory: Box::new(repository_factory),
            interval,
        }
    }

    /// Run the worker until the cancellation token is cancelled.
    ///
    /// Failed invocations are logged, and the worker carries on with the next
    /// statement on the next tick.
    ///
    /// # Panics
    ///
    /// Panics if the interval is zero.
    pub async fn run(self, cancellation_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // Don't try to catch up after a slow invocation
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.interval, "Starting the cleanup worker");

        loop {
            tokio::select! {
                biased;

                () = cancellation_token.cancelled() => break,
                _ = interval.tick() => {},
            }

            let res = self
                .cleaner
                .run_with_cancellation(&*self.repository_factory, &cancellation_token)
                .await;

            match res {
                Ok(0) => tracing::debug!("Nothing to clean up"),
                Ok(affected_rows) => tracing::info!(affected_rows, "Cleaned up stale rows"),
                Err(CleanupError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        "Failed to clean up stale rows"
                    );
                }
            }
        }

        tracing::debug!("Shutting down the cleanup worker");
    }
}
