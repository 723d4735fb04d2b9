mod app;
mod commands;

use clap::Parser;
use color_eyre::Result;
use nomad::config::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nomad")]
#[command(about = "Browse digital nomad cities and remote jobs from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/nomad/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding config and NOMAD_API_URL
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override base URL if specified on command line
  if let Some(url) = args.api_url {
    config.api.base_url = url;
    config.validate()?;
  }

  // Keep the guard so the file writer flushes on exit
  let _log_guard = nomad::logging::init(&config.logging)?;

  let mut app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
