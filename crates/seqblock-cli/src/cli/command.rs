use std::io::Write;

use anyhow::Context;
use seqblock::{Block, BlockAllocator, CounterStore, FileStore};
use serde_json::json;

use crate::cli::config::Command;

/// Store-specific housekeeping reachable from the command line.
pub trait StoreMaintenance {
    /// Removes a lock left behind by a crashed client. Returns `false` when
    /// the store has no such lock.
    fn clear_stale_lock(&self) -> anyhow::Result<bool>;
}

impl StoreMaintenance for seqblock::MemoryStore {
    fn clear_stale_lock(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
}

impl StoreMaintenance for FileStore {
    fn clear_stale_lock(&self) -> anyhow::Result<bool> {
        let existed = self.lock_path().exists();
        if let Some(pid) = self.lock_owner() {
            tracing::warn!(pid, "clearing lock recorded by process {pid}");
        }
        self.clear_lock()
            .with_context(|| format!("failed to clear {}", self.lock_path().display()))?;
        Ok(existed)
    }
}

/// Runs `command` against `allocator`, writing one JSON value per line to
/// `out`.
pub fn execute<S, W>(allocator: &BlockAllocator<S>, command: &Command, out: &mut W) -> anyhow::Result<()>
where
    S: CounterStore + StoreMaintenance,
    W: Write,
{
    match command {
        Command::Alloc { name, size, repeat } => {
            for _ in 0..*repeat {
                let block = allocator
                    .allocate(name, *size)
                    .with_context(|| format!("failed to reserve {size} ids for `{name}`"))?;
                tracing::info!(name = %name, first = ?block.first(), len = block.len(), "reserved block");
                writeln!(out, "{}", block_json(name, &block))?;
            }
        }
        Command::Peek { name } => {
            let value = allocator
                .peek(name)
                .with_context(|| format!("failed to read counter `{name}`"))?;
            writeln!(out, "{}", json!({ "name": name, "value": value }))?;
        }
        Command::Unlock => {
            let cleared = allocator.store().clear_stale_lock()?;
            if cleared {
                tracing::warn!("removed stale lock");
            }
            writeln!(out, "{}", json!({ "cleared": cleared }))?;
        }
    }
    Ok(())
}

fn block_json(name: &str, block: &Block) -> serde_json::Value {
    json!({
        "name": name,
        "first": block.first(),
        "last": block.last(),
        "size": block.len(),
    })
}
