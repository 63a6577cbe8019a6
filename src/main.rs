use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use copyright_sync::{
    cli::{Cli, Commands},
    config::Settings,
    export::export_all,
    info_time,
    process::{process_site, sync_keywords},
    publish::DryRunPublisher,
    record::DatasetStore,
    request::Fetcher,
    Result,
};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,copyright_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let start_time = Local::now();

    match run(cli).await {
        Ok(()) => {
            info_time!(start_time, "Full program time:");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::from_env()?;
    cli.apply(&mut settings);
    settings.validate()?;

    match cli.command {
        Commands::Run { no_publish } => {
            let fetcher = Fetcher::new(&settings.endpoint, settings.retry)?;
            if no_publish {
                process_site(&settings, fetcher, &DryRunPublisher).await
            } else {
                process_site(&settings, fetcher, &settings.git_publisher()).await
            }
        }
        Commands::Sync => {
            let fetcher = Fetcher::new(&settings.endpoint, settings.retry)?;
            sync_keywords(&settings, fetcher).await.map(|_| ())
        }
        Commands::Export => {
            let store = DatasetStore::new(&settings.data_dir);
            export_all(&store, &settings.keywords).await.map(|_| ())
        }
    }
}
