// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use async_trait::async_trait;
use authgc_storage::{
    BoxRepository, CleanupRepository, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction,
};
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::Instrument;

use crate::{
    DatabaseError, TableNames,
    cleanup::{CleanupStatements, PgCleanupRepository},
    telemetry::DB_CLIENT_CONNECTION_CREATE_TIME,
};

/// An implementation of the [`RepositoryFactory`] trait backed by a PostgreSQL
/// connection pool.
#[derive(Clone)]
pub struct PgRepositoryFactory {
    pool: PgPool,
    statements: Arc<CleanupStatements>,
}

impl PgRepositoryFactory {
    /// Create a new [`PgRepositoryFactory`] from a PostgreSQL connection pool,
    /// using the default table names.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statements: Arc::default(),
        }
    }

    /// Use the given physical table names in the cleanup statements
    #[must_use]
    pub fn with_tables(mut self, tables: &TableNames) -> Self {
        self.statements = Arc::new(CleanupStatements::new(tables));
        self
    }

    /// Get the cleanup statements registry used by the repositories
    #[must_use]
    pub fn statements(&self) -> &CleanupStatements {
        &self.statements
    }
}

#[async_trait]
impl RepositoryFactory for PgRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let start = std::time::Instant::now();
        let repo = PgRepository::from_pool(&self.pool, self.statements.clone())
            .await
            .map_err(RepositoryError::from_error)?
            .boxed();

        DB_CLIENT_CONNECTION_CREATE_TIME.record(start.elapsed().as_secs_f64(), &[]);

        Ok(repo)
    }
}

/// An implementation of the [`Repository`] trait backed by a PostgreSQL
/// transaction.
pub struct PgRepository<C = Transaction<'static, Postgres>> {
    conn: C,
    statements: Arc<CleanupStatements>,
}

impl PgRepository {
    /// Create a new [`PgRepository`] from a PostgreSQL connection pool,
    /// starting a transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] if the transaction could not be started.
    pub async fn from_pool(
        pool: &PgPool,
        statements: Arc<CleanupStatements>,
    ) -> Result<Self, DatabaseError> {
        let txn = pool.begin().instrument(tracing::info_span!("db.begin")).await?;
        Ok(Self::from_conn(txn, statements))
    }

    /// Transform the repository into a type-erased [`BoxRepository`]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl<C> PgRepository<C> {
    /// Create a new [`PgRepository`] from an existing PostgreSQL connection
    /// with a transaction
    pub fn from_conn(conn: C, statements: Arc<CleanupStatements>) -> Self {
        PgRepository { conn, statements }
    }
}

impl Repository<DatabaseError> for PgRepository {}

impl RepositoryTransaction for PgRepository {
    type Error = DatabaseError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let span = tracing::info_span!("db.save");
        self.conn
            .commit()
            .map_err(DatabaseError::from)
            .instrument(span)
            .boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let span = tracing::info_span!("db.cancel");
        self.conn
            .rollback()
            .map_err(DatabaseError::from)
            .instrument(span)
            .boxed()
    }
}

impl<C> RepositoryAccess for PgRepository<C>
where
    C: AsMut<PgConnection> + Send,
{
    type Error = DatabaseError;

    fn cleanup<'c>(&'c mut self) -> Box<dyn CleanupRepository<Error = Self::Error> + 'c> {
        Box::new(PgCleanupRepository::new(
            self.conn.as_mut(),
            &self.statements,
        ))
    }
}
