use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{Command, CommandError, Commands, State};
use gator::config::Config;
use gator::db::Database;
use gator::fetcher::Fetcher;

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "A command-line RSS aggregator")]
struct Cli {
    /// Config file to use instead of ~/.gatorconfig.json
    #[arg(long, env = "GATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Command to run: login, register, users, reset or agg
    command: String,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output stays on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CommandError>() {
                Some(cmd_err) if cmd_err.is_user_conflict() => eprintln!("{}", cmd_err),
                _ => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.config {
        Some(path) => Config::read_from(path),
        None => Config::read(),
    }
    .context("failed to read config")?;
    debug!("Loaded db_url: {}", config.db_url);

    let db = Database::new(&config.db_url)
        .await
        .context("failed to connect to db")?;
    db.initialize().await.context("failed to initialize db")?;
    info!("Database initialized");

    let mut state = State {
        config,
        store: Box::new(db),
        fetcher: Fetcher::new()?,
    };

    let commands = Commands::with_defaults();
    commands
        .run(&mut state, Command::new(cli.command, cli.args))
        .await?;

    Ok(())
}
