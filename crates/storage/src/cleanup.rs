// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repositories to purge stale artifacts from the storage backend.
//!
//! Each [`CleanupKind`] identifies one class of stale rows, with a fixed aging
//! threshold and a cap on the number of rows touched by a single run. Runs are
//! meant to be small and frequent: callers rotate through
//! [`CleanupKind::ALL`], one kind per invocation.

use std::time::Duration;

use async_trait::async_trait;

use crate::MapErr;

const HOUR: u64 = 60 * 60;

/// A class of stale artifacts which can be cleaned up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupKind {
    /// Refresh tokens which were revoked more than a day ago. They are
    /// deleted.
    RevokedRefreshTokens,

    /// Refresh tokens which are not revoked yet, but whose session ended more
    /// than a day ago. They are marked as revoked, so that they later get
    /// deleted as [`CleanupKind::RevokedRefreshTokens`].
    DeadSessionRefreshTokens,

    /// Sessions which ended more than three days ago. They are deleted.
    ExpiredSessions,

    /// Relay states of external identity logins started more than a day ago.
    StaleRelayStates,

    /// Flow states of local multi-step logins started more than a day ago.
    StaleFlowStates,
}

impl CleanupKind {
    /// All the kinds of cleanup, in the order they should be rotated through.
    ///
    /// Token revocation comes before session deletion, so that tokens of a
    /// dead session get a chance to be revoked before the session goes away.
    pub const ALL: [Self; 5] = [
        Self::RevokedRefreshTokens,
        Self::DeadSessionRefreshTokens,
        Self::ExpiredSessions,
        Self::StaleRelayStates,
        Self::StaleFlowStates,
    ];

    /// The maximum number of rows a single run of this cleanup may affect
    #[must_use]
    pub const fn limit(self) -> usize {
        match self {
            // Deleting a session cascades to its refresh tokens, keep those batches small
            Self::ExpiredSessions => 10,
            Self::RevokedRefreshTokens
            | Self::DeadSessionRefreshTokens
            | Self::StaleRelayStates
            | Self::StaleFlowStates => 100,
        }
    }

    /// How old a row has to be before it is eligible for this cleanup
    #[must_use]
    pub const fn max_age(self) -> Duration {
        match self {
            // Must stay above the refresh token thresholds
            Self::ExpiredSessions => Duration::from_secs(72 * HOUR),
            Self::RevokedRefreshTokens
            | Self::DeadSessionRefreshTokens
            | Self::StaleRelayStates
            | Self::StaleFlowStates => Duration::from_secs(24 * HOUR),
        }
    }

    /// A short, stable name for this cleanup, used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RevokedRefreshTokens => "revoked_refresh_tokens",
            Self::DeadSessionRefreshTokens => "dead_session_refresh_tokens",
            Self::ExpiredSessions => "expired_sessions",
            Self::StaleRelayStates => "stale_relay_states",
            Self::StaleFlowStates => "stale_flow_states",
        }
    }
}

impl std::fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`CleanupRepository`] helps purging stale artifacts from the storage
/// backend.
#[async_trait]
pub trait CleanupRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Run one bounded cleanup pass for the given kind of artifacts
    ///
    /// Rows currently locked by another transaction are skipped instead of
    /// waited on, so this never blocks on concurrent work.
    ///
    /// Returns the number of rows deleted or updated, which is at most
    /// [`CleanupKind::limit`].
    ///
    /// # Parameters
    ///
    /// * `kind`: The kind of artifacts to clean up
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn run(&mut self, kind: CleanupKind) -> Result<usize, Self::Error>;
}

#[async_trait]
impl<R: CleanupRepository + ?Sized> CleanupRepository for Box<R> {
    type Error = R::Error;

    async fn run(&mut self, kind: CleanupKind) -> Result<usize, Self::Error> {
        (**self).run(kind).await
    }
}

#[async_trait]
impl<R, F, E> CleanupRepository for MapErr<R, F>
where
    R: CleanupRepository,
    F: FnMut(R::Error) -> E + Send + Sync,
{
    type Error = E;

    async fn run(&mut self, kind: CleanupKind) -> Result<usize, Self::Error> {
        self.inner.run(kind).await.map_err(&mut self.mapper)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_rotation_order() {
        assert_eq!(
            CleanupKind::ALL,
            [
                CleanupKind::RevokedRefreshTokens,
                CleanupKind::DeadSessionRefreshTokens,
                CleanupKind::ExpiredSessions,
                CleanupKind::StaleRelayStates,
                CleanupKind::StaleFlowStates,
            ]
        );

        let names: HashSet<_> = CleanupKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), CleanupKind::ALL.len());
    }

    #[test]
    fn test_sessions_outlive_their_tokens() {
        let session = CleanupKind::ExpiredSessions.max_age();
        assert_eq!(session, Duration::from_secs(72 * 60 * 60));
        assert!(session > CleanupKind::DeadSessionRefreshTokens.max_age());
        assert!(session > CleanupKind::RevokedRefreshTokens.max_age());
    }

    #[test]
    fn test_limits() {
        assert_eq!(CleanupKind::ExpiredSessions.limit(), 10);
        for kind in CleanupKind::ALL {
            assert!(kind.limit() <= 100, "{kind} has a limit over 100");
        }
    }
}
