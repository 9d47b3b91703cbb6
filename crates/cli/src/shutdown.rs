// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long tasks get to finish after the first signal
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// A helper to manage graceful shutdowns of long-running commands
///
/// The first SIGTERM or SIGINT cancels the shutdown token: tasks tracked by
/// the [`TaskTracker`] are expected to stop what they are doing and return. A
/// second signal, or the grace period running out, makes [`Self::run`] return
/// without waiting for them any longer.
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    sigterm: Signal,
    sigint: Signal,
    grace_period: Duration,
}

impl ShutdownManager {
    /// Create a new shutdown manager, installing the signal handlers
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers could not be installed
    pub fn new() -> Result<Self, std::io::Error> {
        let sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
        let sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;

        Ok(Self {
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            sigterm,
            sigint,
            grace_period: DEFAULT_GRACE_PERIOD,
        })
    }

    /// Set how long tasks get to finish once a shutdown was requested
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Get a reference to the task tracker
    #[must_use]
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Get a cancellation token that can be used to react to a shutdown
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run until all the tracked tasks are done, or until we gave up waiting
    /// for them
    pub async fn run(self) {
        let Self {
            shutdown_token,
            task_tracker,
            mut sigterm,
            mut sigint,
            grace_period,
        } = self;

        let signal = wait_for_signal(&mut sigterm, &mut sigint).await;
        tracing::info!(signal, "Shutdown signal received, shutting down");

        shutdown_token.cancel();
        task_tracker.close();

        tokio::select! {
            signal = wait_for_signal(&mut sigterm, &mut sigint) => {
                tracing::warn!(signal, "Second shutdown signal received, abort");
            },
            () = tokio::time::sleep(grace_period) => {
                tracing::warn!(?grace_period, "Shutdown grace period reached, abort");
            },
            () = task_tracker.wait() => {
                tracing::info!("All tasks are done, exiting");
                return;
            },
        }

        tracing::error!(
            remaining = task_tracker.len(),
            "Some tasks did not stop in time, exiting anyway"
        );
    }
}

/// Wait for either SIGTERM or SIGINT, returning the name of the signal
async fn wait_for_signal(sigterm: &mut Signal, sigint: &mut Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}
