// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use authgc_config::{CleanupConfig, ConfigurationSectionExt, DatabaseConfig};
use authgc_storage::CleanupKind;
use clap::Parser;
use figment::Figment;
use tracing::{Instrument, info, info_span};

use crate::util::{cleaner_from_config, database_pool_from_config, repository_factory_from_config};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Number of cleanup invocations to run. Defaults to one per statement.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    rounds: Option<u16>,
}

impl Options {
    pub(super) fn rounds(&self) -> usize {
        self.rounds.map_or(CleanupKind::ALL.len(), usize::from)
    }

    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.cleanup");
        let database_config =
            DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let cleanup_config =
            CleanupConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let pool = database_pool_from_config(&database_config)
            .instrument(span.clone())
            .await?;
        let repository_factory = repository_factory_from_config(pool.clone(), &cleanup_config);
        let cleaner = cleaner_from_config(&cleanup_config);

        let rounds = self.rounds();
        let mut total: usize = 0;
        let mut failures: usize = 0;

        for round in 1..=rounds {
            match cleaner
                .run(&repository_factory)
                .instrument(span.clone())
                .await
            {
                Ok(affected_rows) => {
                    info!(parent: &span, round, affected_rows, "Cleanup invocation done");
                    total += affected_rows;
                }
                Err(e) => {
                    tracing::error!(
                        parent: &span,
                        round,
                        error = &e as &dyn std::error::Error,
                        "Cleanup invocation failed"
                    );
                    failures += 1;
                }
            }
        }

        pool.close().await;

        info!(parent: &span, rounds, failures, total, "Cleanup finished");

        if failures > 0 {
            Ok(ExitCode::FAILURE)
        } else {
            Ok(ExitCode::SUCCESS)
        }
    }
}
