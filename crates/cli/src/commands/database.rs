// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use authgc_config::{ConfigurationSectionExt, DatabaseConfig};
use authgc_storage_pg::MIGRATOR;
use clap::Parser;
use figment::Figment;
use tracing::{Instrument, info_span};

use crate::util::database_connection_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Create the tables this tool cleans up, for development and testing
    Migrate,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let Subcommand::Migrate = self.subcommand;

        let span = info_span!("cli.database.migrate");
        let config =
            DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let mut conn = database_connection_from_config(&config)
            .instrument(span.clone())
            .await?;

        // Run pending migrations
        MIGRATOR
            .run(&mut conn)
            .instrument(info_span!(parent: &span, "db.migrate"))
            .await
            .context("could not run migrations")?;

        tracing::info!(parent: &span, "Database is up to date");

        Ok(ExitCode::SUCCESS)
    }
}
