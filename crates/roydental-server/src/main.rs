use anyhow::Context;
use clap::Parser;

use roydental_server::cli::{Cli, Commands};
use roydental_server::config::loader::load_config;
use roydental_server::{Services, commands, observability};

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    observability::init_tracing();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    observability::apply_logging_level(&cfg.logging.level);
    tracing::debug!(path = ?cli.config, "Configuration loaded");

    let services = Services::init(&cfg).await?;
    let outcome = match &cli.command {
        Commands::Migrate => commands::migrate(&services).await,
        Commands::Check => commands::check(&services).await,
        Commands::Get { entity, id, parent } => {
            commands::get(&services, *entity, id, parent.as_deref()).await
        }
        Commands::List { entity } => commands::list(&services, *entity).await,
        Commands::Chart { patient_id } => commands::chart(&services, patient_id).await,
        Commands::PurgePatient { patient_id } => {
            commands::purge_patient(&services, patient_id).await
        }
    };
    services.close().await;

    let output = outcome?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to render output")?
    );
    Ok(())
}
