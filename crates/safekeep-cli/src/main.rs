mod cli;
mod config;
mod prompt;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::{eyre::bail, Result};
use safekeep_core::{BackendInfo, HealthSnapshot, RobustFacade};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => run_storage_command(command, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("safekeep {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_storage_command(command: cli::Command, config: &config::Config) -> Result<()> {
    let storage = storage::storage_from_config(config)?;
    let responder = prompt::spawn_terminal_responder(storage.manual.clone(), storage.prompts);
    let result = execute(command, &storage.facade).await;
    responder.abort();
    result
}

async fn execute(command: cli::Command, facade: &RobustFacade) -> Result<()> {
    match command {
        cli::Command::Get { key } => match facade.get(&key).await {
            Some(value) => println!("{value}"),
            None => bail!("no value available for \"{key}\""),
        },
        cli::Command::Set { key, value } => {
            let value = match value {
                Some(value) => value,
                None => read_value_from_stdin().await?,
            };
            if !facade.set(&key, &value).await {
                bail!("could not store \"{key}\": {}", describe_failure(&facade.health()));
            }
            println!("Stored \"{key}\" ({})", facade.health().active_tier);
        }
        cli::Command::Remove { key } => {
            if facade.remove(&key).await {
                println!("Removed \"{key}\"");
            } else {
                println!("\"{key}\" was not stored");
            }
        }
        cli::Command::Contains { key } => println!("{}", facade.contains(&key).await),
        cli::Command::Health => print_health(&facade.perform_health_check().await),
        cli::Command::Backends => print_backends(&facade.list_backend_info().await),
        cli::Command::Failover => match facade.force_failover().await {
            Ok(tier) => println!("Now serving from {tier}"),
            Err(err) => bail!("failover refused: {err}"),
        },
        cli::Command::Version | cli::Command::Config(_) => {}
    }
    Ok(())
}

async fn read_value_from_stdin() -> Result<String> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        bail!("no value provided on stdin");
    }
    Ok(value)
}

fn describe_failure(health: &HealthSnapshot) -> String {
    health
        .last_error
        .clone()
        .unwrap_or_else(|| "no backend accepted the write".to_string())
}

fn print_health(health: &HealthSnapshot) {
    println!("Healthy: {}", health.is_healthy);
    println!("Active tier: {}", health.active_tier);
    println!("Consecutive failures: {}", health.consecutive_failures);
    match health.last_success_at {
        Some(at) => println!("Last success: {}", at.to_rfc3339()),
        None => println!("Last success: never"),
    }
    if let Some(error) = &health.last_error {
        println!("Last error: {error}");
    }
}

fn print_backends(backends: &[BackendInfo]) {
    for info in backends {
        let marker = if info.active { "*" } else { " " };
        println!(
            "{marker} {:<16} {:<20} available={:<5} healthy={:<5} failures={}",
            info.name,
            info.tier.label(),
            info.available,
            info.passes_health_check,
            info.failure_count
        );
    }
}
