//! # vmlight
//!
//! Deploys lightweight VM instances from disk images and manages their
//! lifecycle on a single Xen host.
//!
//! ## Usage
//! ```bash
//! vmlight deploy --name web1 --image debian-12 --ip 10.10.10.5 --ssh-key alice
//! vmlight vm --list
//! vmlight vm --delete 1
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;
mod config;
mod output;
mod preflight;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.log_json {
        vmlight_common::init_logging_json(&cli.log_level)?;
    } else {
        vmlight_common::init_logging(&cli.log_level)?;
    }

    let config = config::load(cli.config.as_deref())?;
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        instances_dir = %config.general.instances_dir.display(),
        "Configuration loaded"
    );

    let ctx = commands::Context::new(config, cli.backend);
    match cli.command {
        Command::Deploy(args) => commands::deploy::execute(args, &ctx).await,
        Command::Image(args) => commands::image::execute(args, &ctx),
        Command::SshKeys(args) => commands::ssh_keys::execute(args, &ctx),
        Command::Vm(args) => commands::vm::execute(args, &ctx).await,
    }
}
