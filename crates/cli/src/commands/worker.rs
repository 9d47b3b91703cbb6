// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use authgc_config::{ConfigurationSection, RootConfig};
use clap::Parser;
use figment::Figment;
use tracing::{info, info_span};

use crate::{
    shutdown::ShutdownManager,
    util::{cleaner_from_config, database_pool_from_config, repository_factory_from_config},
};

#[derive(Parser, Debug, Default)]
pub(super) struct Options {}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.worker.init").entered();
        let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        if !config.cleanup.enabled {
            tracing::warn!("Cleanup is disabled in the configuration, not starting the worker");
            return Ok(ExitCode::SUCCESS);
        }

        // An in-flight invocation gets as long as its deadline to roll back
        let shutdown = ShutdownManager::new()?.with_grace_period(config.cleanup.timeout);

        // Connect to the database
        info!("Connecting to the database");
        let pool = database_pool_from_config(&config.database).await?;

        let repository_factory = repository_factory_from_config(pool.clone(), &config.cleanup);
        let cleaner = cleaner_from_config(&config.cleanup);

        authgc_tasks::init_and_run(
            repository_factory,
            cleaner,
            config.cleanup.interval,
            shutdown.shutdown_token(),
            shutdown.task_tracker(),
        );
        span.exit();

        shutdown.run().await;

        pool.close().await;

        Ok(ExitCode::SUCCESS)
    }
}
