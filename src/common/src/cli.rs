use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that only inspect the configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments
    ///
    /// `RUST_LOG` wins over the flags when it is set.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("promplan Configuration:");
            println!("=======================");
            println!("Data source URL: {}", config.datasource.url);
            println!("Scrape interval: {}", config.datasource.scrape_interval);
            println!("HTTP method: {}", config.datasource.http_method);
            println!("Timeout: {:?}", config.datasource.timeout);
            if let Some(params) = &config.datasource.custom_query_parameters {
                println!("Custom query parameters: {params}");
            }
            println!(
                "Execution mode: {}",
                if config.execution.parallel {
                    "parallel"
                } else {
                    "sequential"
                }
            );
            println!(
                "Concurrent query count: {}",
                config.execution.concurrency_limit()
            );
            println!("Exemplar sampler: {:?}", config.exemplars.sampler);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.datasource.url.is_empty() {
            anyhow::bail!("Data source URL cannot be empty");
        }

        let method = config.datasource.http_method.to_ascii_uppercase();
        if method != "POST" && method != "GET" {
            anyhow::bail!(
                "Unsupported HTTP method '{}', expected POST or GET",
                config.datasource.http_method
            );
        }

        if config.datasource.timeout.is_zero() {
            anyhow::bail!("Data source timeout must be greater than zero");
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle the configuration-only commands
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
