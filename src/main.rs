use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use querier::query::model::FROM_ALERT_HEADER;
use querier::{ExecutionCoordinator, QueryBatch, ReqwestTransport};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "promplan")]
#[command(about = "promplan - plan and run Prometheus data source queries")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: PromplanCommands,
}

#[derive(Subcommand)]
enum PromplanCommands {
    /// Run a batch of queries and print the responses as JSON
    Query {
        #[arg(long, help = "Query batch JSON file, stdin when omitted")]
        file: Option<PathBuf>,

        #[arg(long, help = "Treat the batch as an alert evaluation")]
        from_alert: bool,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let (file, from_alert) = match &cli.command {
        PromplanCommands::Common(common_cmd) => {
            return utils::handle_common_command(common_cmd, &config);
        }
        PromplanCommands::Query { file, from_alert } => (file, *from_alert),
    };

    let mut batch = read_batch(file.as_ref())?;
    if from_alert {
        batch
            .headers
            .insert(FROM_ALERT_HEADER.to_string(), "true".to_string());
    }

    let transport = ReqwestTransport::from_config(&config.datasource)
        .context("Failed to create backend transport")?;
    let coordinator = ExecutionCoordinator::from_config(transport, &config);

    log::info!(
        "Running {} queries against {}",
        batch.queries.len(),
        config.datasource.url
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling queries");
            ctrl_c.cancel();
        }
    });

    let response = coordinator.execute(&batch, &cancel).await;

    let failed = response
        .results
        .values()
        .filter(|result| result.error.is_some())
        .count();
    if failed > 0 {
        log::warn!("{failed} of {} queries failed", response.results.len());
    }

    let json =
        serde_json::to_string_pretty(&response).context("Failed to serialize query response")?;
    println!("{json}");

    Ok(())
}

fn read_batch(file: Option<&PathBuf>) -> Result<QueryBatch> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query batch from {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read query batch from stdin")?;
            raw
        }
    };

    serde_json::from_str(&raw).context("Failed to parse query batch")
}
