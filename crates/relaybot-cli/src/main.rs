mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use relaybot_config::RelayConfig;
use relaybot_cron::{CronScheduler, CronStore};
use relaybot_gateway::Gateway;
use relaybot_runner::{JobQueue, PassthroughPrompt, ProcessRunner};
use relaybot_types::Destination;

use console::ConsoleChannel;

#[derive(Parser)]
#[command(name = "relaybot", about = "Chat relay for an external reasoning process")]
struct Cli {
    /// Config file (defaults to ~/.relaybot/config.json5)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot with the console channel attached
    Serve,
    /// Manage scheduled prompts
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
    /// Check configuration and data files
    Health,
}

#[derive(Subcommand)]
enum CronAction {
    /// List all cron jobs
    List,
    /// Add a cron job
    Add {
        /// Cron expression (five or six fields)
        schedule: String,
        /// Prompt sent on every trigger
        prompt: String,
        /// Channel type that receives the output
        #[arg(long, default_value = console::CHANNEL_TYPE)]
        channel: String,
        /// Chat id that receives the output
        #[arg(long, default_value = console::CHAT_ID)]
        chat: String,
    },
    /// Remove a cron job by id or id prefix
    Remove { id: String },
    /// Enable or disable a cron job by id or id prefix
    Toggle { id: String },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RelayConfig> {
    let config = match path {
        Some(path) => relaybot_config::load_config_from(path),
        None => relaybot_config::load_config(),
    };
    config.context("Failed to load config")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Serve => rt.block_on(serve(config)),
        Commands::Cron { action } => rt.block_on(cron(config, action)),
        Commands::Health => health(&config),
    }
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let mut gateway = Gateway::new(config)?;
    gateway.register_channel(Arc::new(ConsoleChannel::stdin())).await;
    gateway.start().await?;

    println!("relaybot ready. Type a message, or !help for commands. Ctrl+C to quit.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown requested");
    gateway.shutdown().await;
    Ok(())
}

/// Cron management against the store. A running `serve` picks the changes
/// up on its next start.
async fn cron(config: RelayConfig, action: CronAction) -> anyhow::Result<()> {
    let store = CronStore::new(config.cron_store_path()?);
    let runner = Arc::new(ProcessRunner::new(config.runner.clone()));
    let scheduler = CronScheduler::new(store, JobQueue::new(runner), Arc::new(PassthroughPrompt));

    match action {
        CronAction::List => {
            let jobs = scheduler.list().await?;
            if jobs.is_empty() {
                println!("No cron jobs registered.");
            }
            for job in jobs {
                println!(
                    "{} {} [{}] {} -> {}",
                    if job.enabled { "ON " } else { "OFF" },
                    job.short_id(),
                    job.destination(),
                    job.schedule,
                    job.prompt
                );
            }
        }
        CronAction::Add {
            schedule,
            prompt,
            channel,
            chat,
        } => {
            let job = scheduler
                .add(&schedule, &prompt, &Destination::new(channel, chat))
                .await?;
            println!("Cron job added: {} ({})", job.short_id(), job.schedule);
        }
        CronAction::Remove { id } => {
            if scheduler.remove(&id).await? {
                println!("Cron job removed: {id}");
            } else {
                println!("Not found: {id}");
            }
        }
        CronAction::Toggle { id } => match scheduler.toggle(&id).await? {
            Some(job) => println!(
                "Cron job {}: {}",
                if job.enabled { "enabled" } else { "disabled" },
                job.short_id()
            ),
            None => println!("Not found: {id}"),
        },
    }

    scheduler.stop_all().await;
    Ok(())
}

fn health(config: &RelayConfig) -> anyhow::Result<()> {
    let data_dir = config.resolve_data_dir()?;
    let store_path = config.cron_store_path()?;
    let jobs = CronStore::new(&store_path).load();

    println!("relaybot is healthy");
    println!(
        "  command: {} {}",
        config.runner.command,
        config.runner.args.join(" ")
    );
    println!("  timeout: {}ms", config.runner.timeout_ms);
    println!("  data dir: {}", data_dir.display());
    println!(
        "  history db: {}",
        if data_dir.join("relaybot.db").exists() { "present" } else { "not created yet" }
    );
    match jobs {
        Ok(jobs) => println!(
            "  cron jobs: {} ({} enabled)",
            jobs.len(),
            jobs.iter().filter(|j| j.enabled).count()
        ),
        Err(e) => println!("  cron store: {e}"),
    }
    println!(
        "  safety gate: {}",
        if config.safety.enabled { "on" } else { "off" }
    );
    Ok(())
}
