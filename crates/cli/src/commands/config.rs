// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use authgc_config::{ConfigurationSection, RootConfig};
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use schemars::schema_for;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span};

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Dump the current config as YAML
    Dump {
        /// The path to the config file to dump
        ///
        /// If not specified, the config will be written to stdout
        #[clap(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Check a config file
    Check,

    /// Print the JSON schema of the configuration file
    Schema,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as SC;
        match self.subcommand {
            SC::Dump { output } => {
                let _span = info_span!("cli.config.dump").entered();

                let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
                let config = render_config(&config)?;

                if let Some(output) = output {
                    info!("Writing configuration to {output:?}");
                    let mut file = tokio::fs::File::create(&output)
                        .await
                        .with_context(|| format!("could not create {output}"))?;
                    file.write_all(config.as_bytes()).await?;
                } else {
                    info!("Writing configuration to standard output");
                    tokio::io::stdout().write_all(config.as_bytes()).await?;
                }
            }

            SC::Check => {
                let _span = info_span!("cli.config.check").entered();

                let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
                info!(
                    cleanup.enabled = config.cleanup.enabled,
                    cleanup.interval = ?config.cleanup.interval,
                    "Configuration file looks good"
                );
            }

            SC::Schema => {
                let schema = schema_for!(RootConfig);
                let mut schema = serde_json::to_string_pretty(&schema)?;
                schema.push('\n');
                tokio::io::stdout().write_all(schema.as_bytes()).await?;
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}

fn render_config(config: &RootConfig) -> anyhow::Result<String> {
    serde_yaml::to_string(config).context("could not serialize the configuration")
}

#[cfg(test)]
mod tests {
    use figment::{
        Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn dumped_config_loads_back() {
        let config = RootConfig::test();
        let rendered = render_config(&config).unwrap();

        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", &rendered)?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let loaded = RootConfig::extract(&figment).map_err(|e| e.to_string())?;

            assert_eq!(loaded.cleanup.interval, config.cleanup.interval);
            assert_eq!(loaded.cleanup.timeout, config.cleanup.timeout);
            assert_eq!(loaded.cleanup.tables, config.cleanup.tables);
            assert_eq!(loaded.database.uri, config.database.uri);

            Ok(())
        });
    }

    #[test]
    fn schema_describes_sections() {
        let schema = serde_json::to_value(schema_for!(RootConfig)).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("database"));
        assert!(properties.contains_key("cleanup"));
        assert!(properties.contains_key("telemetry"));
    }
}
