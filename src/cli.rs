// CLI module - command-line argument parsing
//
// The default invocation runs the proxy; `config show` prints the effective
// configuration after file and environment merging, which is the fastest way
// to debug "why is it binding there".

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, VERSION};

/// API-translation proxy: OpenAI and Anthropic surfaces over the cloudcode
/// upstream
#[derive(Parser)]
#[command(name = "agproxy")]
#[command(version = VERSION)]
#[command(about = "OpenAI/Anthropic-compatible proxy over the cloudcode upstream", long_about = None)]
pub struct Cli {
    /// Path to the YAML config file (default: ./config.yaml, optional)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the proxy server (default)
    Run,
    /// Configuration helpers
    Config {
        /// Print the effective configuration and exit
        #[arg(long)]
        show: bool,
    },
}

/// Handle non-server subcommands. Returns true when the invocation is done
/// and the server should not start.
pub fn handle_cli(cli: &Cli, config: &Config) -> bool {
    match &cli.command {
        Some(Commands::Config { show }) => {
            if *show {
                match serde_yaml::to_string(config) {
                    Ok(rendered) => print!("{rendered}"),
                    Err(e) => eprintln!("cannot render config: {e}"),
                }
            } else {
                println!("usage: agproxy config --show");
            }
            true
        }
        Some(Commands::Run) | None => false,
    }
}
