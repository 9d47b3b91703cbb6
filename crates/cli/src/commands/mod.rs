// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};

mod cleanup;
mod config;
mod database;
mod worker;

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Manage the database
    Database(self::database::Options),

    /// Run a fixed number of cleanup invocations, then exit
    Cleanup(self::cleanup::Options),

    /// Periodically clean up stale rows until stopped
    Worker(self::worker::Options),
}

#[derive(Parser, Debug)]
#[command(version = crate::VERSION)]
pub struct Options {
    /// Path to the configuration file
    #[arg(short, long, global = true, action = ArgAction::Append)]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        match self.subcommand {
            S::Config(c) => Box::pin(c.run(figment)).await,
            S::Database(c) => Box::pin(c.run(figment)).await,
            S::Cleanup(c) => Box::pin(c.run(figment)).await,
            S::Worker(c) => Box::pin(c.run(figment)).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration loaded
    pub fn figment(&self) -> Figment {
        let configs = if self.config.is_empty() {
            // Read the AUTHGC_CONFIG environment variable
            std::env::var("AUTHGC_CONFIG")
                // Default to "config.yaml"
                .unwrap_or_else(|_| "config.yaml".to_owned())
                // Split the file list on `:`
                .split(':')
                .map(Utf8PathBuf::from)
                .collect()
        } else {
            self.config.clone()
        };

        let base = Figment::new().merge(Env::prefixed("AUTHGC_").split("_"));

        configs
            .into_iter()
            .fold(base, |f, path| f.admerge(Yaml::file(path)))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_global_config_flags() {
        let options = Options::try_parse_from([
            "authgc",
            "worker",
            "--config",
            "base.yaml",
            "-c",
            "override.yaml",
        ])
        .unwrap();

        assert_eq!(
            options.config,
            vec![
                Utf8PathBuf::from("base.yaml"),
                Utf8PathBuf::from("override.yaml")
            ]
        );
        assert!(matches!(options.subcommand, Subcommand::Worker(_)));
    }

    #[test]
    fn parse_cleanup_rounds() {
        let options = Options::try_parse_from(["authgc", "cleanup", "--rounds", "3"]).unwrap();
        let Subcommand::Cleanup(cleanup) = options.subcommand else {
            panic!("expected the cleanup subcommand");
        };
        assert_eq!(cleanup.rounds(), 3);

        let options = Options::try_parse_from(["authgc", "cleanup"]).unwrap();
        let Subcommand::Cleanup(cleanup) = options.subcommand else {
            panic!("expected the cleanup subcommand");
        };
        assert_eq!(cleanup.rounds(), authgc_storage::CleanupKind::ALL.len());
    }

    #[test]
    fn reject_unknown_subcommand() {
        assert!(Options::try_parse_from(["authgc", "server"]).is_err());
    }

    #[test]
    fn figment_merges_files_in_order() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "base.yaml",
                r"
                    cleanup:
                      interval: 30
                      timeout: 5
                ",
            )?;
            jail.create_file(
                "override.yaml",
                r"
                    cleanup:
                      timeout: 7
                ",
            )?;

            let options = Options::try_parse_from([
                "authgc",
                "config",
                "check",
                "-c",
                "base.yaml",
                "-c",
                "override.yaml",
            ])
            .map_err(|e| e.to_string())?;

            let figment = options.figment();
            let interval: u64 = figment.extract_inner("cleanup.interval")?;
            let timeout: u64 = figment.extract_inner("cleanup.timeout")?;
            assert_eq!(interval, 30);
            assert_eq!(timeout, 7);

            Ok(())
        });
    }
}
