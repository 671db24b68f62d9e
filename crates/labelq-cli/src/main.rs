//! CLI for the label extraction pipeline.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, LevelFilter};

use commands::{config, consume, enqueue, extract, publish, status, sweep, work};

/// Label extraction pipeline - read shipping, return and product labels into structured fields
#[derive(Parser)]
#[command(name = "labelq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process tasks from the task store
    Work(work::WorkArgs),

    /// Process tasks from a broker queue
    Consume(consume::ConsumeArgs),

    /// Add documents to the task store
    Enqueue(enqueue::EnqueueArgs),

    /// Publish documents to the broker
    Publish(publish::PublishArgs),

    /// Show task counts per status
    Status(status::StatusArgs),

    /// Requeue tasks whose lease expired
    Sweep(sweep::SweepArgs),

    /// Print the text extracted from a document
    Extract(extract::ExtractArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let default_directive: Directive = LevelFilter::from_level(level).into();

    // An explicit -v wins over the environment.
    let from_env = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|value| !value.trim().is_empty());
    let filter = match from_env {
        Some(directives) if verbose == 0 => EnvFilter::builder()
            .with_default_directive(default_directive)
            .parse_lossy(directives),
        _ => EnvFilter::default().add_directive(default_directive),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Settings from .env count as environment overrides.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Work(args) => work::run(args, config_path).await,
        Commands::Consume(args) => consume::run(args, config_path).await,
        Commands::Enqueue(args) => enqueue::run(args, config_path).await,
        Commands::Publish(args) => publish::run(args, config_path).await,
        Commands::Status(args) => status::run(args, config_path).await,
        Commands::Sweep(args) => sweep::run(args, config_path).await,
        Commands::Extract(args) => extract::run(args, config_path).await,
        Commands::Config(args) => config::run(args, config_path).await,
    }
}
