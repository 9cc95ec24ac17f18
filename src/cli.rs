// CLI module - command-line argument parsing and handlers
//
// Provides subcommands for configuration management:
// - config --show: Display effective configuration
// - config --reset: Regenerate config file with defaults
// - config --path: Show config file path

use crate::config::{ServerConfig, VERSION};
use clap::{Parser, Subcommand};

/// bilan ingest server - unified event store for AI telemetry
#[derive(Parser)]
#[command(name = "bilan-server")]
#[command(version = VERSION)]
#[command(about = "Ingest server for the bilan telemetry pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> bool {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { show, reset, path }) => {
            if path {
                handle_config_path();
            } else if show {
                handle_config_show();
            } else if reset {
                handle_config_reset();
            } else {
                println!("Usage: bilan-server config [--show|--reset|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --path    Show config file path");
            }
            true
        }
        None => false,
    }
}

fn handle_config_path() {
    match ServerConfig::config_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Could not determine config path"),
    }
}

fn handle_config_show() {
    let config = ServerConfig::from_env();
    println!("# Effective configuration (env > file > defaults)");
    print!("{}", config.to_toml());
}

fn handle_config_reset() {
    let config = ServerConfig::default();
    match config.save() {
        Ok(()) => {
            if let Some(path) = ServerConfig::config_path() {
                println!("Config reset to defaults: {}", path.display());
            }
        }
        Err(e) => eprintln!("Failed to reset config: {}", e),
    }
}
