// `snapfeed config` — show or initialize the client configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;
use snapfeed_client::config::{global_config_path, ClientConfig, ConfigError};

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (file plus environment overrides)
    Show {
        /// Force JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Write a default config file
    Init {
        /// Write here instead of ~/.snapfeed/config.toml.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Serialize)]
struct InitResult {
    path: PathBuf,
}

pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    match args.action {
        ConfigAction::Show { json } => {
            let format = OutputFormat::detect(json);
            let config = ClientConfig::load();
            output::print_output(format, &config, render_toml)?;
        }
        ConfigAction::Init { path, force } => {
            let format = OutputFormat::detect(false);
            let path = match path {
                Some(path) => path,
                None => global_config_path().ok_or(ConfigError::NoHomeDir)?,
            };
            if let Err(error) = init_at(&path, force) {
                output::print_anyhow_error(format, &error);
                return Err(error);
            }
            output::print_output(format, &InitResult { path }, |result| {
                format!("Wrote default config to {}", result.path.display())
            })?;
        }
    }
    Ok(())
}

fn init_at(path: &Path, force: bool) -> anyhow::Result<()> {
    anyhow::ensure!(
        force || !path.exists(),
        "{} already exists; pass --force to overwrite",
        path.display()
    );
    ClientConfig::default()
        .save_to(path)
        .with_context(|| format!("writing {}", path.display()))
}

fn render_toml(config: &ClientConfig) -> String {
    toml::to_string_pretty(config)
        .unwrap_or_else(|error| format!("# config could not be rendered: {error}"))
        .trim_end()
        .to_string()
}
