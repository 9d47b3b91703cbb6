// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use thiserror::Error;

use crate::cleanup::CleanupRepository;

/// A [`RepositoryFactory`] is a factory that can create a [`BoxRepository`]
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Create a new [`BoxRepository`], starting a new transaction
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the repository could not be created, for
    /// example because no connection could be acquired from the pool in time
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A type-erased [`RepositoryFactory`]
pub type BoxRepositoryFactory = Box<dyn RepositoryFactory + Send + Sync + 'static>;

/// A [`Repository`] helps interacting with the underlying storage backend.
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
}

/// An opaque, type-erased error
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RepositoryError {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Construct a [`RepositoryError`] from any error kind
    pub fn from_error<E>(value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(value),
        }
    }
}

/// Wraps a repository, mapping its errors with the given function
pub struct MapErr<R, F> {
    pub(crate) inner: R,
    pub(crate) mapper: F,
}

impl<R, F> MapErr<R, F> {
    /// Wrap `inner`, mapping its errors with `mapper`
    #[must_use]
    pub fn new(inner: R, mapper: F) -> Self {
        Self { inner, mapper }
    }
}

/// A type-erased [`Repository`]
pub type BoxRepository = Box<dyn Repository<RepositoryError> + Send + Sync + 'static>;

/// A [`RepositoryTransaction`] can be saved or cancelled, after a series
/// of operations.
pub trait RepositoryTransaction {
    /// The error type used by the [`Self::save`] and [`Self::cancel`] functions
    type Error;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to commit the
    /// transaction.
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to rollback
    /// the transaction.
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Access the various repositories the backend implements.
///
/// All the methods return a boxed trait object, which can be used to access a
/// particular repository. The lifetime of the returned object is bound to the
/// lifetime of the whole repository, so that only one mutable reference to the
/// repository is used at a time.
pub trait RepositoryAccess: Send {
    /// The backend-specific error type used by each repository.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a [`CleanupRepository`]
    fn cleanup<'c>(&'c mut self) -> Box<dyn CleanupRepository<Error = Self::Error> + 'c>;
}

impl<R, F, E1, E2> Repository<E2> for MapErr<R, F>
where
    R: Repository<E1> + RepositoryAccess<Error = E1> + RepositoryTransaction<Error = E1>,
    F: FnMut(E1) -> E2 + Send + Sync + 'static,
    E1: std::error::Error + Send + Sync + 'static,
    E2: std::error::Error + Send + Sync + 'static,
{
}

impl<R, F, E> RepositoryTransaction for MapErr<R, F>
where
    R: RepositoryTransaction,
    R::Error: 'static,
    F: FnMut(R::Error) -> E + Send + Sync + 'static,
    E: std::error::Error,
{
    type Error = E;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        Box::new(self.inner).save().map_err(self.mapper).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        Box::new(self.inner).cancel().map_err(self.mapper).boxed()
    }
}

impl<R, F, E> RepositoryAccess for MapErr<R, F>
where
    R: RepositoryAccess,
    F: FnMut(R::Error) -> E + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn cleanup<'c>(&'c mut self) -> Box<dyn CleanupRepository<Error = Self::Error> + 'c> {
        Box::new(MapErr::new(self.inner.cleanup(), &mut self.mapper))
    }
}

impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
    type Error = R::Error;

    fn cleanup<'c>(&'c mut self) -> Box<dyn CleanupRepository<Error = Self::Error> + 'c> {
        (**self).cleanup()
    }
}
