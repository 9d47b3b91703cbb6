// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Interactions with the storage backend
//!
//! This crate provides a set of traits that can be implemented to interact with
//! the storage backend. Those traits are called repositories and are grouped by
//! the type of data they manage.
//!
//! Each of those repositories can be accessed via the [`RepositoryAccess`]
//! trait. This trait can be wrapped in a [`BoxRepository`] to allow using it
//! without caring about the underlying storage backend, and without carrying
//! around the generic type parameter.
//!
//! A repository is always bound to a single transaction: changes made through
//! it are only persisted once [`RepositoryTransaction::save`] is called, and
//! dropping it (or calling [`RepositoryTransaction::cancel`]) rolls everything
//! back.
//!
//! The only repository so far is the [`CleanupRepository`], which purges
//! stale rows. Backends implement it, and expose it through
//! [`RepositoryAccess::cleanup`].

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod cleanup;
pub(crate) mod repository;

pub use self::{
    cleanup::{CleanupKind, CleanupRepository},
    repository::{
        BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess,
        RepositoryError, RepositoryFactory, RepositoryTransaction,
    },
};
