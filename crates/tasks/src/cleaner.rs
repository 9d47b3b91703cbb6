// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{sync::Arc, time::Duration};

use authgc_storage::{CleanupKind, RepositoryAccess, RepositoryError, RepositoryFactory};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::{
    cursor::RotationCursor,
    reporter::{CleanupReporter, MetricsReporter},
};

/// An error which happened during a cleanup invocation
///
/// Whatever the variant, the transaction was rolled back and no row was
/// changed.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The storage backend failed to open, run or commit the transaction
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The invocation was cancelled before it completed
    #[error("Cleanup was cancelled")]
    Cancelled,

    /// The invocation did not complete before its deadline
    #[error("Cleanup timed out after {after:?}")]
    TimedOut {
        /// The deadline which was hit
        after: Duration,
    },
}

/// Runs the cleanup statements, one per invocation, in round-robin order
///
/// Clones share the same [`RotationCursor`], so that concurrent invocations
/// through any of them are spread over the statements.
#[derive(Clone)]
pub struct Cleaner {
    cursor: Arc<RotationCursor>,
    reporter: Arc<dyn CleanupReporter>,
    timeout: Option<Duration>,
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner")
            .field("cursor", &self.cursor)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Cleaner {
    /// Create a new [`Cleaner`], starting at the first statement, reporting to
    /// OpenTelemetry metrics and without deadline
    #[must_use]
    pub fn new() -> Self {
        Self {
            cursor: Arc::new(RotationCursor::default()),
            reporter: Arc::new(MetricsReporter::new()),
            timeout: None,
        }
    }

    /// Use the given rotation cursor
    #[must_use]
    pub fn with_cursor(mut self, cursor: RotationCursor) -> Self {
        self.cursor = Arc::new(cursor);
        self
    }

    /// Report the outcome of invocations to the given reporter
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn CleanupReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Abort invocations which take longer than the given duration to open
    /// their transaction and run their statement. The commit is not subject to
    /// the deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run the next cleanup statement in its own transaction, returning the
    /// number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction could not be started, if the
    /// statement or the commit failed, or if the deadline was hit. The
    /// transaction is rolled back in all cases.
    pub async fn run(&self, store: &dyn RepositoryFactory) -> Result<usize, CleanupError> {
        self.run_until(store, std::future::pending()).await
    }

    /// Same as [`Cleaner::run`], but aborts the invocation as soon as the
    /// cancellation token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError::Cancelled`] if the token was cancelled before
    /// the invocation completed, and the same errors as [`Cleaner::run`]
    /// otherwise.
    pub async fn run_with_cancellation(
        &self,
        store: &dyn RepositoryFactory,
        cancellation_token: &CancellationToken,
    ) -> Result<usize, CleanupError> {
        self.run_until(store, cancellation_token.cancelled()).await
    }

    /// Same as [`Cleaner::run`], but logs failures instead of returning them.
    ///
    /// This is meant for running a cleanup on the side of another operation,
    /// which must not fail because of it. Returns 0 on failure.
    pub async fn run_best_effort(&self, store: &dyn RepositoryFactory) -> usize {
        match self.run(store).await {
            Ok(affected_rows) => affected_rows,
            Err(e) => {
                tracing::warn!(
                    error = &e as &dyn std::error::Error,
                    "Failed to clean up stale rows"
                );
                0
            }
        }
    }

    // Failures are recorded on the span, never logged here
    #[tracing::instrument(
        name = "database-cleanup",
        skip_all,
        fields(
            cleanup.kind,
            cleanup.affected_rows,
            cleanup.error,
            otel.status_code,
        ),
    )]
    async fn run_until(
        &self,
        store: &dyn RepositoryFactory,
        cancelled: impl Future<Output = ()> + Send,
    ) -> Result<usize, CleanupError> {
        let kind = self.cursor.next_kind();
        let span = Span::current();
        span.record("cleanup.kind", kind.as_str());

        let deadline = async {
            match self.timeout {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    CleanupError::TimedOut { after }
                }
                None => std::future::pending().await,
            }
        };

        let interrupted = async {
            tokio::select! {
                biased;

                () = cancelled => CleanupError::Cancelled,
                error = deadline => error,
            }
        };

        let res = execute(store, kind, interrupted).await;

        match &res {
            Ok(affected_rows) => {
                span.record("cleanup.affected_rows", affected_rows);
                self.reporter.report_success(kind, *affected_rows);
            }
            Err(e) => {
                span.record("cleanup.error", tracing::field::display(e));
                span.record("otel.status_code", "ERROR");
                self.reporter.report_failure(kind, e);
            }
        }

        res
    }
}

/// Run the statement for `kind` in its own transaction.
///
/// `interrupted` aborts the invocation while the transaction is being opened
/// or the statement is running. The commit is never interrupted: once it is
/// sent, its outcome is the outcome of the invocation.
async fn execute(
    store: &dyn RepositoryFactory,
    kind: CleanupKind,
    interrupted: impl Future<Output = CleanupError>,
) -> Result<usize, CleanupError> {
    let mut interrupted = std::pin::pin!(interrupted);

    let mut repo = tokio::select! {
        biased;

        error = &mut interrupted => return Err(error),
        repo = store.create() => repo?,
    };

    let mut cleanup = repo.cleanup();
    // Dropping the repository on interruption rolls back the transaction
    let res = tokio::select! {
        biased;

        error = &mut interrupted => return Err(error),
        res = cleanup.run(kind) => res,
    };
    drop(cleanup);

    let affected_rows = match res {
        Ok(affected_rows) => affected_rows,
        Err(e) => {
            // Release the locks held by the failed statement
            if let Err(rollback_error) = repo.cancel().await {
                tracing::warn!(
                    error = &rollback_error as &dyn std::error::Error,
                    "Failed to roll back the cleanup transaction"
                );
            }
            return Err(e.into());
        }
    };

    repo.save().await?;
    Ok(affected_rows)
}
