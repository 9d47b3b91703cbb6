// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`CleanupRepository`], and the registry of SQL statements it runs.

use async_trait::async_trait;
use authgc_storage::{CleanupKind, CleanupRepository};
use opentelemetry_semantic_conventions::attribute::DB_QUERY_TEXT;
use sqlx::PgConnection;
use tracing::Span;

use crate::{
    DatabaseError,
    tables::{TableNames, quote_identifier},
};

/// A self-contained SQL statement cleaning up one [`CleanupKind`]
///
/// The statement takes no parameter: the table names, the aging predicate and
/// the row cap are all part of the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupStatement {
    kind: CleanupKind,
    sql: String,
}

impl CleanupStatement {
    fn new(kind: CleanupKind, tables: &TableNames) -> Self {
        let limit = kind.limit();
        let interval = format!("interval '{} hours'", kind.max_age().as_secs() / 3600);

        let sql = match kind {
            CleanupKind::RevokedRefreshTokens => {
                let refresh_tokens = quote_identifier(&tables.refresh_tokens);
                format!(
                    "DELETE FROM {refresh_tokens} WHERE id IN (SELECT id FROM {refresh_tokens} WHERE revoked IS true AND updated_at < now() - {interval} LIMIT {limit} FOR UPDATE SKIP LOCKED);"
                )
            }

            CleanupKind::DeadSessionRefreshTokens => {
                let refresh_tokens = quote_identifier(&tables.refresh_tokens);
                let sessions = quote_identifier(&tables.sessions);
                format!(
                    "UPDATE {refresh_tokens} SET revoked = true, updated_at = now() WHERE id IN (SELECT {refresh_tokens}.id FROM {refresh_tokens} JOIN {sessions} ON {refresh_tokens}.session_id = {sessions}.id WHERE {sessions}.not_after < now() - {interval} AND {refresh_tokens}.revoked IS false LIMIT {limit} FOR UPDATE SKIP LOCKED);"
                )
            }

            CleanupKind::ExpiredSessions => {
                let sessions = quote_identifier(&tables.sessions);
                format!(
                    "DELETE FROM {sessions} WHERE id IN (SELECT id FROM {sessions} WHERE not_after < now() - {interval} LIMIT {limit} FOR UPDATE SKIP LOCKED);"
                )
            }

            CleanupKind::StaleRelayStates | CleanupKind::StaleFlowStates => {
                let table = if kind == CleanupKind::StaleRelayStates {
                    quote_identifier(&tables.relay_states)
                } else {
                    quote_identifier(&tables.flow_states)
                };
                format!(
                    "DELETE FROM {table} WHERE id IN (SELECT id FROM {table} WHERE created_at < now() - {interval} LIMIT {limit} FOR UPDATE SKIP LOCKED);"
                )
            }
        };

        Self { kind, sql }
    }

    /// The kind of artifacts this statement cleans up
    #[must_use]
    pub fn kind(&self) -> CleanupKind {
        self.kind
    }

    /// The SQL text of the statement
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The maximum number of rows this statement affects
    #[must_use]
    pub fn limit(&self) -> usize {
        self.kind.limit()
    }
}

/// The ordered, immutable registry of [`CleanupStatement`]s
///
/// There is exactly one statement per [`CleanupKind`], in the order of
/// [`CleanupKind::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupStatements {
    statements: [CleanupStatement; CleanupKind::ALL.len()],
}

impl CleanupStatements {
    /// Build the registry for the given physical table names
    #[must_use]
    pub fn new(tables: &TableNames) -> Self {
        let statements = CleanupKind::ALL.map(|kind| CleanupStatement::new(kind, tables));
        Self { statements }
    }

    /// Get the statement cleaning up the given kind of artifacts
    #[must_use]
    pub fn get(&self, kind: CleanupKind) -> &CleanupStatement {
        // `CleanupKind::ALL` lists the variants in declaration order
        &self.statements[kind as usize]
    }

    /// Iterate over the statements, in rotation order
    pub fn iter(&self) -> impl Iterator<Item = &CleanupStatement> {
        self.statements.iter()
    }

    /// Number of statements in the registry
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the registry is empty, which it never is
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl Default for CleanupStatements {
    fn default() -> Self {
        Self::new(&TableNames::default())
    }
}

/// An implementation of [`CleanupRepository`] for a PostgreSQL connection
pub struct PgCleanupRepository<'c> {
    conn: &'c mut PgConnection,
    statements: &'c CleanupStatements,
}

impl<'c> PgCleanupRepository<'c> {
    /// Create a new [`PgCleanupRepository`] from an active PostgreSQL
    /// connection and the statements registry.
    #[must_use]
    pub fn new(conn: &'c mut PgConnection, statements: &'c CleanupStatements) -> Self {
        Self { conn, statements }
    }
}

#[async_trait]
impl CleanupRepository for PgCleanupRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.cleanup.run",
        skip_all,
        fields(
            db.query.text,
            cleanup.kind = %kind,
        ),
        err,
    )]
    async fn run(&mut self, kind: CleanupKind) -> Result<usize, Self::Error> {
        let statement = self.statements.get(kind);
        Span::current().record(DB_QUERY_TEXT, statement.sql());

        let res = sqlx::query(statement.sql())
            .execute(&mut *self.conn)
            .await?;

        res.rows_affected()
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use authgc_storage::{CleanupKind, CleanupRepository};
    use sqlx::{PgConnection, PgPool};
    use uuid::Uuid;

    use super::{CleanupStatements, PgCleanupRepository};
    use crate::TableNames;

    async fn insert_session(conn: &mut PgConnection, ended_hours_ago: Option<i32>) -> Uuid {
        sqlx::query_scalar(
            "INSERT INTO sessions (not_after) VALUES (now() - make_interval(hours => $1)) RETURNING id",
        )
        .bind(ended_hours_ago)
        .fetch_one(conn)
        .await
        .unwrap()
    }

    async fn insert_refresh_tokens(
        conn: &mut PgConnection,
        session_id: Uuid,
        revoked: bool,
        updated_hours_ago: i32,
        count: i32,
    ) {
        sqlx::query(
            r"
                INSERT INTO refresh_tokens (token, session_id, revoked, updated_at)
                SELECT gen_random_uuid()::text, $1, $2, now() - make_interval(hours => $3)
                FROM generate_series(1, $4)
            ",
        )
        .bind(session_id)
        .bind(revoked)
        .bind(updated_hours_ago)
        .bind(count)
        .execute(conn)
        .await
        .unwrap();
    }

    async fn count(conn: &mut PgConnection, query: &str) -> i64 {
        sqlx::query_scalar(query).fetch_one(conn).await.unwrap()
    }

    #[test]
    fn test_statements_text() {
        let statements = CleanupStatements::default();
        assert_eq!(statements.len(), 5);
        assert!(!statements.is_empty());

        let kinds: Vec<_> = statements.iter().map(super::CleanupStatement::kind).collect();
        assert_eq!(kinds, CleanupKind::ALL);
        for kind in CleanupKind::ALL {
            assert_eq!(statements.get(kind).kind(), kind);
        }

        assert_eq!(
            statements.get(CleanupKind::RevokedRefreshTokens).sql(),
            r#"DELETE FROM "refresh_tokens" WHERE id IN (SELECT id FROM "refresh_tokens" WHERE revoked IS true AND updated_at < now() - interval '24 hours' LIMIT 100 FOR UPDATE SKIP LOCKED);"#,
        );
        assert_eq!(
            statements.get(CleanupKind::DeadSessionRefreshTokens).sql(),
            r#"UPDATE "refresh_tokens" SET revoked = true, updated_at = now() WHERE id IN (SELECT "refresh_tokens".id FROM "refresh_tokens" JOIN "sessions" ON "refresh_tokens".session_id = "sessions".id WHERE "sessions".not_after < now() - interval '24 hours' AND "refresh_tokens".revoked IS false LIMIT 100 FOR UPDATE SKIP LOCKED);"#,
        );
        assert_eq!(
            statements.get(CleanupKind::ExpiredSessions).sql(),
            r#"DELETE FROM "sessions" WHERE id IN (SELECT id FROM "sessions" WHERE not_after < now() - interval '72 hours' LIMIT 10 FOR UPDATE SKIP LOCKED);"#,
        );
        assert_eq!(
            statements.get(CleanupKind::StaleRelayStates).sql(),
            r#"DELETE FROM "saml_relay_states" WHERE id IN (SELECT id FROM "saml_relay_states" WHERE created_at < now() - interval '24 hours' LIMIT 100 FOR UPDATE SKIP LOCKED);"#,
        );
        assert_eq!(
            statements.get(CleanupKind::StaleFlowStates).sql(),
            r#"DELETE FROM "flow_state" WHERE id IN (SELECT id FROM "flow_state" WHERE created_at < now() - interval '24 hours' LIMIT 100 FOR UPDATE SKIP LOCKED);"#,
        );
    }

    #[test]
    fn test_statements_use_configured_tables() {
        let tables = TableNames {
            refresh_tokens: "auth.refresh_tokens".to_owned(),
            sessions: "auth.sessions".to_owned(),
            relay_states: "auth.saml_relay_states".to_owned(),
            flow_states: "auth.flow_state".to_owned(),
        };
        let statements = CleanupStatements::new(&tables);

        let sql = statements.get(CleanupKind::DeadSessionRefreshTokens).sql();
        assert!(sql.starts_with(r#"UPDATE "auth"."refresh_tokens" SET"#));
        assert!(sql.contains(r#"JOIN "auth"."sessions" ON "auth"."refresh_tokens".session_id = "auth"."sessions".id"#));

        for statement in statements.iter() {
            assert!(statement.sql().contains(r#""auth"."#));
            assert!(statement.sql().ends_with("FOR UPDATE SKIP LOCKED);"));
            assert!(
                statement
                    .sql()
                    .contains(&format!("LIMIT {} ", statement.limit()))
            );
        }
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn test_noop_on_empty_database(pool: PgPool) {
        let statements = CleanupStatements::default();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = PgCleanupRepository::new(&mut conn, &statements);

        for kind in CleanupKind::ALL {
            assert_eq!(repo.run(kind).await.unwrap(), 0, "{kind} touched rows");
        }
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn test_revoked_refresh_tokens(pool: PgPool) {
        let statements = CleanupStatements::default();
        let mut conn = pool.acquire().await.unwrap();

        let session = insert_session(&mut conn, None).await;
        // Eligible: revoked more than a day ago
        insert_refresh_tokens(&mut conn, session, true, 25, 150).await;
        // Not eligible: revoked recently, or not revoked at all
        insert_refresh_tokens(&mut conn, session, true, 1, 5).await;
        insert_refresh_tokens(&mut conn, session, false, 48, 5).await;

        let mut repo = PgCleanupRepository::new(&mut conn, &statements);
        // Capped at 100 rows per run
        assert_eq!(repo.run(CleanupKind::RevokedRefreshTokens).await.unwrap(), 100);
        assert_eq!(repo.run(CleanupKind::RevokedRefreshTokens).await.unwrap(), 50);
        assert_eq!(repo.run(CleanupKind::RevokedRefreshTokens).await.unwrap(), 0);

        let remaining = count(&mut conn, "SELECT COUNT(*) FROM refresh_tokens").await;
        assert_eq!(remaining, 10);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn test_dead_session_refresh_tokens(pool: PgPool) {
        let statements = CleanupStatements::default();
        let mut conn = pool.acquire().await.unwrap();

        let dead = insert_session(&mut conn, Some(30)).await;
        let alive = insert_session(&mut conn, Some(1)).await;
        let forever = insert_session(&mut conn, None).await;
        insert_refresh_tokens(&mut conn, dead, false, 40, 2).await;
        insert_refresh_tokens(&mut conn, alive, false, 40, 1).await;
        insert_refresh_tokens(&mut conn, forever, false, 40, 1).await;

        let mut repo = PgCleanupRepository::new(&mut conn, &statements);
        assert_eq!(
            repo.run(CleanupKind::DeadSessionRefreshTokens).await.unwrap(),
            2
        );
        // Already revoked tokens are not touched again
        assert_eq!(
            repo.run(CleanupKind::DeadSessionRefreshTokens).await.unwrap(),
            0
        );
        // They were revoked just now, so they are not deleted yet
        assert_eq!(
            repo.run(CleanupKind::RevokedRefreshTokens).await.unwrap(),
            0
        );

        let revoked = count(
            &mut conn,
            "SELECT COUNT(*) FROM refresh_tokens WHERE revoked AND updated_at > now() - interval '1 minute'",
        )
        .await;
        assert_eq!(revoked, 2);

        let sessions = count(&mut conn, "SELECT COUNT(*) FROM sessions").await;
        assert_eq!(sessions, 3);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn test_expired_sessions(pool: PgPool) {
        let statements = CleanupStatements::default();
        let mut conn = pool.acquire().await.unwrap();

        for _ in 0..15 {
            let session = insert_session(&mut conn, Some(73)).await;
            insert_refresh_tokens(&mut conn, session, true, 1, 1).await;
        }
        // Dead, but not for long enough
        insert_session(&mut conn, Some(50)).await;
        insert_session(&mut conn, None).await;

        let mut repo = PgCleanupRepository::new(&mut conn, &statements);
        // Capped at 10 rows per run
        assert_eq!(repo.run(CleanupKind::ExpiredSessions).await.unwrap(), 10);
        assert_eq!(repo.run(CleanupKind::ExpiredSessions).await.unwrap(), 5);
        assert_eq!(repo.run(CleanupKind::ExpiredSessions).await.unwrap(), 0);

        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM sessions").await, 2);
        // Refresh tokens went away with their session
        assert_eq!(
            count(&mut conn, "SELECT COUNT(*) FROM refresh_tokens").await,
            0
        );
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn test_relay_and_flow_states(pool: PgPool) {
        let statements = CleanupStatements::default();
        let mut conn = pool.acquire().await.unwrap();

        sqlx::raw_sql(
            r"
                INSERT INTO saml_relay_states (request_id, created_at)
                SELECT 'request-' || i, now() - make_interval(hours => i * 10)
                FROM generate_series(1, 5) AS i;

                INSERT INTO flow_state (auth_code, provider_type, created_at)
                SELECT 'code-' || i, 'email', now() - make_interval(hours => i * 10)
                FROM generate_series(1, 4) AS i;
            ",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        let mut repo = PgCleanupRepository::new(&mut conn, &statements);
        // 30h, 40h and 50h old
        assert_eq!(repo.run(CleanupKind::StaleRelayStates).await.unwrap(), 3);
        // 30h and 40h old
        assert_eq!(repo.run(CleanupKind::StaleFlowStates).await.unwrap(), 2);

        assert_eq!(
            count(&mut conn, "SELECT COUNT(*) FROM saml_relay_states").await,
            2
        );
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM flow_state").await, 2);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    async fn test_skips_locked_rows(pool: PgPool) {
        let statements = CleanupStatements::default();

        sqlx::query(
            r"
                INSERT INTO flow_state (auth_code, provider_type, created_at)
                SELECT 'code-' || i, 'email', now() - interval '2 days'
                FROM generate_series(1, 3) AS i
            ",
        )
        .execute(&pool)
        .await
        .unwrap();

        // Another transaction holds a lock on two of the stale rows
        let mut locker = pool.begin().await.unwrap();
        let locked: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM flow_state ORDER BY auth_code LIMIT 2 FOR UPDATE",
        )
        .fetch_all(&mut *locker)
        .await
        .unwrap();
        assert_eq!(locked.len(), 2);

        // The cleanup does not wait for them, and only deletes the free row
        let mut txn = pool.begin().await.unwrap();
        let mut repo = PgCleanupRepository::new(&mut txn, &statements);
        let affected = tokio::time::timeout(
            Duration::from_secs(10),
            repo.run(CleanupKind::StaleFlowStates),
        )
        .await
        .expect("cleanup blocked on locked rows")
        .unwrap();
        assert_eq!(affected, 1);
        txn.commit().await.unwrap();

        // Once the lock is released, the remaining rows get cleaned up
        locker.rollback().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = PgCleanupRepository::new(&mut conn, &statements);
        assert_eq!(repo.run(CleanupKind::StaleFlowStates).await.unwrap(), 2);
    }
}
