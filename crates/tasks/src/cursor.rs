// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::atomic::{AtomicU64, Ordering};

use authgc_storage::CleanupKind;

/// Shared round-robin cursor over the cleanup statements
///
/// Every call to [`RotationCursor::next`] observes a distinct value of the
/// underlying counter, so concurrent callers are spread over the statements.
/// The cursor is not shared across processes.
#[derive(Debug, Default)]
pub struct RotationCursor {
    position: AtomicU64,
}

impl RotationCursor {
    /// Create a new cursor, starting at the given position
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            position: AtomicU64::new(seed),
        }
    }

    /// Advance the cursor, returning the index of the statement to run
    pub fn next(&self) -> usize {
        const LEN: u64 = CleanupKind::ALL.len() as u64;

        // No other memory access depends on the counter
        let position = self.position.fetch_add(1, Ordering::Relaxed);

        // The remainder is always smaller than the length of the rotation
        usize::try_from(position % LEN).unwrap_or_default()
    }

    /// Advance the cursor, returning the kind of cleanup to run
    pub fn next_kind(&self) -> CleanupKind {
        CleanupKind::ALL[self.next()]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_rotation_order() {
        let cursor = RotationCursor::default();
        let indices: Vec<usize> = (0..6).map(|_| cursor.next()).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn test_rotation_kinds() {
        let cursor = RotationCursor::new(0);
        assert_eq!(cursor.next_kind(), CleanupKind::RevokedRefreshTokens);
        assert_eq!(cursor.next_kind(), CleanupKind::DeadSessionRefreshTokens);
        assert_eq!(cursor.next_kind(), CleanupKind::ExpiredSessions);
        assert_eq!(cursor.next_kind(), CleanupKind::StaleRelayStates);
        assert_eq!(cursor.next_kind(), CleanupKind::StaleFlowStates);
        assert_eq!(cursor.next_kind(), CleanupKind::RevokedRefreshTokens);
    }

    #[test]
    fn test_seeded_cursor() {
        let cursor = RotationCursor::new(4);
        assert_eq!(cursor.next(), 4);
        assert_eq!(cursor.next(), 0);

        let cursor = RotationCursor::new(12);
        assert_eq!(cursor.next(), 2);
    }

    #[test]
    fn test_concurrent_calls_are_spread() {
        let cursor = Arc::new(RotationCursor::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                std::thread::spawn(move || {
                    let mut per_index = [0; CleanupKind::ALL.len()];
                    for _ in 0..125 {
                        per_index[cursor.next()] += 1;
                    }
                    per_index
                })
            })
            .collect();

        // Every call saw a distinct position, so each statement got exactly its
        // share, whatever the interleaving
        let mut per_index = [0; CleanupKind::ALL.len()];
        for handle in handles {
            for (total, count) in per_index.iter_mut().zip(handle.join().unwrap()) {
                *total += count;
            }
        }
        assert_eq!(per_index, [200; CleanupKind::ALL.len()]);
        assert_eq!(cursor.position.load(Ordering::Relaxed), 1000);
    }
}
