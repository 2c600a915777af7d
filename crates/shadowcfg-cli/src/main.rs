mod abi;
mod config;
mod overlay;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::{Command, Config};

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    match &config.command {
        Command::Overlay(overlay) => overlay::run(overlay),
        Command::Abi(abi) => abi::run(abi),
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log filter {level:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // stdout carries command output; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
