//! Overdub CLI
//!
//! Command-line interface for the Overdub audio core.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use overdub::cli::commands;
use overdub::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Overdub v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "building default configuration".to_string(),
    })?;

    match cli.command {
        Some(cmd) => handle_command(cmd, config),
        None => {
            println!("Overdub v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: overdub::EngineConfig) -> anyhow::Result<()> {
    match cmd {
        Commands::Click {
            bpm,
            duration,
            output,
        } => commands::click(config, bpm, duration, &output)
            .with_context(|| format!("rendering click track to {}", output.display())),
        Commands::Mix { base, take, output } => commands::mix(&config, &base, &take, &output)
            .with_context(|| format!("mixing {} over {}", take.display(), base.display())),
        Commands::Classify { file } => commands::classify_file(&file)
            .with_context(|| format!("reading {}", file.display())),
        Commands::Waveform { file, bars } => commands::waveform(&config, &file, bars)
            .with_context(|| format!("reading {}", file.display())),
        Commands::Upload {
            file,
            store,
            title,
            author,
            description,
            bpm,
        } => commands::upload(&file, &store, title, author, description, bpm)
            .with_context(|| format!("uploading {}", file.display())),
        Commands::List { store } => commands::list(&store)
            .with_context(|| format!("listing {}", store.display())),
        Commands::InitConfig { path } => commands::init_config(&path)
            .with_context(|| format!("writing {}", path.display())),
    }
}
