//! Yarnweave CLI - plays scripted dialogue in the terminal
//!
//! This CLI provides a `yarnweave` command that runs dialogue programs through
//! the async dialogue runner with console presentation views.

mod commands;
mod views;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Yarnweave CLI - terminal dialogue player
#[derive(Parser, Debug)]
#[command(name = "yarnweave", author, version, about = "Play and check Yarnweave dialogue scripts")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a dialogue script
    ///
    /// Lines are printed to stdout. Press Enter to advance and type an option
    /// number to choose.
    Run {
        /// Path to the JSON script
        script: PathBuf,

        /// Node to start at (defaults to the configured start node)
        #[arg(long)]
        start: Option<String>,

        /// Runner configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// String table (JSON object of line id to text)
        #[arg(long)]
        strings: Option<PathBuf>,

        /// Advance lines without waiting for Enter
        #[arg(long)]
        auto: bool,

        /// Option numbers to choose, in order, before reading stdin (e.g. 2,1)
        #[arg(long, value_delimiter = ',')]
        choose: Vec<usize>,
    },

    /// Validate a dialogue script without running it
    Check {
        /// Path to the JSON script
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run { script, start, config, strings, auto, choose } => {
            commands::run::execute(commands::run::RunOptions {
                script,
                start,
                config,
                strings,
                auto,
                choose,
            })
            .await
        }
        Command::Check { script } => commands::check::execute(&script),
    }
}
