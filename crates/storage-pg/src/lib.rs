// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage traits for a PostgreSQL database
//!
//! This backend uses [`sqlx`] to interact with the database. The tables it
//! operates on are owned by the authentication service; the migrations shipped
//! in this crate recreate them for development and tests.
//!
//! # Table names
//!
//! The physical name of each table is resolved at startup through
//! [`TableNames`], and baked into the [`CleanupStatements`] registry. Because of
//! this, the cleanup statements can't be checked at compile time by the
//! [`sqlx::query!`] macros, and are executed as plain SQL text.
//!
//! # Cleanup statements
//!
//! Every statement selects its candidate rows with `FOR UPDATE SKIP LOCKED`:
//! rows locked by any other in-flight transaction are left alone instead of
//! being waited on. Two concurrent runs of the same statement therefore never
//! touch the same row, and a run never blocks regular traffic.

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use sqlx::migrate::Migrator;

pub mod cleanup;
mod errors;
pub(crate) mod repository;
mod tables;
pub(crate) mod telemetry;

pub use self::{
    cleanup::{CleanupStatement, CleanupStatements, PgCleanupRepository},
    errors::DatabaseError,
    repository::{PgRepository, PgRepositoryFactory},
    tables::TableNames,
};

/// Embedded migrations, allowing them to run on startup
pub static MIGRATOR: Migrator = sqlx::migrate!();
