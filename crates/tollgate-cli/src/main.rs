//! Tollgate CLI entrypoint.

use clap::Parser;
use console::style;
use std::num::NonZeroUsize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod sink;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};
use handlers::RunArgs;

/// Exit code for a trigger or configuration that could not be evaluated.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(author, version, about = "Tollgate CI trigger and gating engine", long_about = None)]
struct Cli {
    /// Log output format (overrides the config file)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn dispatch(command: Commands, config: &CliConfig) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { path } => handlers::init(&path).await?,
        Commands::Validate { path } => handlers::validate(&path).await?,
        Commands::Run {
            config: pipeline,
            trigger,
            event_name,
            max_parallel,
            report,
        } => {
            let args = RunArgs {
                config: pipeline,
                trigger,
                event_name: event_name.map(|e| e.as_str().to_string()),
                max_parallel: max_parallel.map(NonZeroUsize::get),
                report,
            };
            let status = handlers::run(config, args).await?;
            return Ok(ExitCode::from(status.exit_code() as u8));
        }
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();
    init_tracing(cli.log_format.unwrap_or(config.log_format));

    match dispatch(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            ExitCode::from(EXIT_REJECTED)
        }
    }
}
