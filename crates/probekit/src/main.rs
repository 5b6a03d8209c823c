//! probekit: command-line front end for the Bus Auditor and Zigbee Auditor.

use std::path::PathBuf;

use clap::Parser;
use probekit_lib::poll::CancelToken;

mod cli;

#[derive(Parser)]
#[command(
    name = "probekit",
    version,
    about = "Bus discovery and 802.15.4 radio tooling for Bus Auditor and Zigbee Auditor probes"
)]
struct Args {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load configuration from this file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: cli::Command,
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    // Ctrl+C aborts whatever poll loop is running.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            log::warn!("could not install Ctrl+C handler: {e}");
        }
    }

    let ctx = cli::Context {
        json: args.json,
        config_path: args.config,
        cancel,
    };
    if let Err(e) = cli::run(args.command, &ctx) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
