#![doc = include_str!("../README.md")]

mod cli;

use std::io::{self, Write};

use clap::Parser;
use cli::command::execute;
use cli::config::{CliArgs, CliConfig, StoreLocation};
use cli::telemetry::init_telemetry;
use seqblock::{BlockAllocator, FileStore, MemoryStore};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry(config.log_json)?;
    log_startup_info(&config);

    let mut out = io::stdout().lock();
    match &config.store {
        StoreLocation::Memory => {
            let allocator = BlockAllocator::new(MemoryStore::new(), config.allocator.clone());
            execute(&allocator, &config.command, &mut out)?;
        }
        StoreLocation::File(path) => {
            let store = FileStore::new(path).with_lock_timeout(config.lock_timeout);
            let allocator = BlockAllocator::new(store, config.allocator.clone());
            execute(&allocator, &config.command, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn log_startup_info(config: &CliConfig) {
    if cfg!(debug_assertions) {
        tracing::debug!("Running with full config: {:#?}", config);
    } else {
        tracing::debug!(
            store = ?config.store,
            collection = %config.allocator.collection_name,
            "Running command"
        );
    }
}
