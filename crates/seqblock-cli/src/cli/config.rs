use std::{path::PathBuf, time::Duration};

use anyhow::bail;
use clap::{Parser, Subcommand};
use seqblock::{AllocatorConfig, FileStore};

/// Store argument value that selects a throwaway in-process store.
pub const MEMORY_STORE: &str = ":memory:";

/// Command-line configuration for the `seqblock` binary.
///
/// Every store and allocator setting can also be supplied through an
/// environment variable or a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seqblock",
    version,
    about = "Reserve contiguous blocks of i64 identifiers from a shared counter store"
)]
pub struct CliArgs {
    /// Path of the JSON counter file shared by every client, or `:memory:`
    /// for a store that lives only as long as this process.
    ///
    /// Environment variable: `SEQBLOCK_STORE`
    #[arg(long, env = "SEQBLOCK_STORE", default_value_t = String::from("seqblock.json"))]
    pub store: String,

    /// Collection holding the counter documents.
    ///
    /// Environment variable: `SEQBLOCK_COLLECTION`
    #[arg(long, env = "SEQBLOCK_COLLECTION", default_value_t = String::from(AllocatorConfig::DEFAULT_COLLECTION_NAME))]
    pub collection: String,

    /// First identifier handed out by a counter that does not exist yet.
    ///
    /// Environment variable: `SEQBLOCK_INITIAL_VALUE`
    #[arg(long, env = "SEQBLOCK_INITIAL_VALUE", default_value_t = AllocatorConfig::DEFAULT_INITIAL_VALUE, allow_negative_numbers = true)]
    pub initial_value: i64,

    /// Fail instead of creating the collection when it is missing.
    ///
    /// Environment variable: `SEQBLOCK_REQUIRE_EXISTING_COLLECTION`
    #[arg(long, env = "SEQBLOCK_REQUIRE_EXISTING_COLLECTION", default_value_t = false)]
    pub require_existing_collection: bool,

    /// Compare-and-swap attempts per allocation before giving up.
    ///
    /// Environment variable: `SEQBLOCK_MAX_CAS_ATTEMPTS`
    #[arg(long, env = "SEQBLOCK_MAX_CAS_ATTEMPTS", default_value_t = AllocatorConfig::DEFAULT_MAX_CAS_ATTEMPTS)]
    pub max_cas_attempts: u32,

    /// How long to wait for the counter file lock, in milliseconds.
    ///
    /// Environment variable: `SEQBLOCK_LOCK_TIMEOUT_MS`
    #[arg(long, env = "SEQBLOCK_LOCK_TIMEOUT_MS", default_value_t = FileStore::DEFAULT_LOCK_TIMEOUT.as_millis() as u64)]
    pub lock_timeout_ms: u64,

    /// Emit logs as JSON lines instead of human-readable text.
    ///
    /// Environment variable: `SEQBLOCK_LOG_JSON`
    #[arg(long, env = "SEQBLOCK_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reserve blocks of identifiers and print each one as a JSON object.
    Alloc {
        /// Counter name.
        name: String,
        /// Identifiers per block. `0` prints an empty block without
        /// contacting the store.
        #[arg(short, long, default_value_t = 1)]
        size: u64,
        /// Number of blocks to reserve.
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,
    },
    /// Print the highest identifier handed out so far, or `null`.
    Peek {
        /// Counter name.
        name: String,
    },
    /// Remove the counter file lock left behind by a crashed process.
    Unlock,
}

impl Command {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Alloc { name, .. } | Self::Peek { name } => Some(name.as_str()),
            Self::Unlock => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub store: StoreLocation,
    pub allocator: AllocatorConfig,
    pub lock_timeout: Duration,
    pub log_json: bool,
    pub command: Command,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.store.is_empty() {
            bail!("SEQBLOCK_STORE must not be empty");
        }
        if args.collection.is_empty() {
            bail!("SEQBLOCK_COLLECTION must not be empty");
        }
        if args.max_cas_attempts == 0 {
            bail!("SEQBLOCK_MAX_CAS_ATTEMPTS must be greater than 0");
        }
        if args.command.name().is_some_and(str::is_empty) {
            bail!("counter name must not be empty");
        }
        if let Command::Alloc { repeat: 0, .. } = args.command {
            bail!("--repeat must be greater than 0");
        }

        let store = if args.store == MEMORY_STORE {
            StoreLocation::Memory
        } else {
            StoreLocation::File(PathBuf::from(args.store))
        };

        let allocator = AllocatorConfig::default()
            .with_collection_name(args.collection)
            .with_initial_value(args.initial_value)
            .with_require_existing_collection(args.require_existing_collection)
            .with_max_cas_attempts(args.max_cas_attempts);

        Ok(Self {
            store,
            allocator,
            lock_timeout: Duration::from_millis(args.lock_timeout_ms),
            log_json: args.log_json,
            command: args.command,
        })
    }
}
