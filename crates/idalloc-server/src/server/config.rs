use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use idalloc::{EngineConfig, config as defaults};

/// Which adapters back the engine.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Redis cache tier plus a SQLite durable store. Several processes may
    /// share one Redis only if they also share one `DATABASE_PATH`; separate
    /// database files split the durable history, and recovery after a cache
    /// loss would restore from whichever local row happens to be newest.
    Redis,
    /// In-process adapters. State is lost on exit; single process only.
    Memory,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Runtime configuration for the `idalloc-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. The
/// defaults suit a single deployment sharing one Redis.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "idalloc-server",
    version,
    about = "An HTTP service handing out unique, increasing IDs per service"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Adapters backing the engine.
    ///
    /// Environment variable: `STORAGE`
    #[arg(long, env = "STORAGE", value_enum, default_value_t = Storage::Redis)]
    pub storage: Storage,

    /// Redis connection URL for the cache tier.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL", default_value_t = String::from("redis://127.0.0.1:6379"))]
    pub redis_url: String,

    /// SQLite database file for the durable store. `:memory:` keeps it in
    /// process. Every instance sharing a Redis must point at the same file.
    ///
    /// Environment variable: `DATABASE_PATH`
    #[arg(long, env = "DATABASE_PATH", default_value_t = String::from("idalloc.db"))]
    pub database_path: String,

    /// Namespace prepended to every cache key.
    ///
    /// Environment variable: `KEY_PREFIX`
    #[arg(long, env = "KEY_PREFIX", default_value_t = String::from(defaults::DEFAULT_KEY_PREFIX))]
    pub key_prefix: String,

    /// Number of IDs reserved from the cache tier at a time.
    ///
    /// Larger batches mean fewer round trips but more IDs skipped when a
    /// process restarts.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = defaults::DEFAULT_BATCH_SIZE)]
    pub batch_size: i64,

    /// Write the counter through to the durable store every N reservations.
    ///
    /// Environment variable: `WRITE_EVERY_N`
    #[arg(long, env = "WRITE_EVERY_N", default_value_t = defaults::DEFAULT_WRITE_EVERY_N)]
    pub write_every_n: i64,

    /// Check the counter against the durable store every N reservations.
    ///
    /// Environment variable: `RECOVER_EVERY_N`
    #[arg(long, env = "RECOVER_EVERY_N", default_value_t = defaults::DEFAULT_RECOVER_EVERY_N)]
    pub recover_every_n: i64,

    /// Capacity of the synchronization queue. A full queue slows down new
    /// reservations.
    ///
    /// Environment variable: `SYNC_CHANNEL_SIZE`
    #[arg(long, env = "SYNC_CHANNEL_SIZE", default_value_t = defaults::DEFAULT_SYNC_CHANNEL_SIZE)]
    pub sync_channel_size: usize,

    /// Number of synchronization workers.
    ///
    /// Environment variable: `SYNC_WORKERS`
    #[arg(long, env = "SYNC_WORKERS", default_value_t = defaults::DEFAULT_SYNC_WORKERS)]
    pub sync_workers: usize,

    /// Maximum IDs per request.
    ///
    /// Environment variable: `MAX_ALLOC_COUNT`
    #[arg(long, env = "MAX_ALLOC_COUNT", default_value_t = defaults::DEFAULT_MAX_ALLOC_COUNT)]
    pub max_alloc_count: i64,

    /// How long a request waits for a pre-fetched segment, in milliseconds.
    ///
    /// Environment variable: `REFILL_WAIT_MS`
    #[arg(long, env = "REFILL_WAIT_MS", default_value_t = 5_000)]
    pub refill_wait_ms: u64,

    /// Deadline for every cache and database call, in milliseconds.
    ///
    /// Environment variable: `IO_TIMEOUT_MS`
    #[arg(long, env = "IO_TIMEOUT_MS", default_value_t = 3_000)]
    pub io_timeout_ms: u64,

    /// Lifetime of the write-through lock, in milliseconds.
    ///
    /// Environment variable: `LOCK_TTL_MS`
    #[arg(long, env = "LOCK_TTL_MS", default_value_t = 5_000)]
    pub lock_ttl_ms: u64,

    /// Seconds each shutdown phase may take before it is abandoned.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 20)]
    pub shutdown_timeout: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub storage: Storage,
    pub redis_url: String,
    pub database_path: String,
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_alloc_count < 1 {
            bail!("MAX_ALLOC_COUNT must be at least 1");
        }
        if args.batch_size < args.max_alloc_count {
            bail!(
                "BATCH_SIZE ({}) must not be smaller than MAX_ALLOC_COUNT ({})",
                args.batch_size,
                args.max_alloc_count
            );
        }
        if args.write_every_n < 1 || args.recover_every_n < 1 {
            bail!("WRITE_EVERY_N and RECOVER_EVERY_N must be at least 1");
        }
        if args.sync_workers == 0 {
            bail!("SYNC_WORKERS must be greater than 0");
        }
        if args.sync_channel_size == 0 {
            bail!("SYNC_CHANNEL_SIZE must be greater than 0");
        }
        if args.refill_wait_ms == 0 || args.io_timeout_ms == 0 || args.lock_ttl_ms == 0 {
            bail!("REFILL_WAIT_MS, IO_TIMEOUT_MS and LOCK_TTL_MS must be greater than 0");
        }
        if args.storage == Storage::Redis && args.redis_url.trim().is_empty() {
            bail!("REDIS_URL is required when STORAGE=redis");
        }

        let engine = EngineConfig {
            batch_size: args.batch_size,
            write_every_n: args.write_every_n,
            recover_every_n: args.recover_every_n,
            sync_channel_size: args.sync_channel_size,
            sync_workers: args.sync_workers,
            max_alloc_count: args.max_alloc_count,
            refill_wait: Duration::from_millis(args.refill_wait_ms),
            io_timeout: Duration::from_millis(args.io_timeout_ms),
            lock_ttl: Duration::from_millis(args.lock_ttl_ms),
            key_prefix: args.key_prefix,
            ..EngineConfig::default()
        };
        engine.validate()?;

        Ok(Self {
            server_addr: args.server_addr,
            storage: args.storage,
            redis_url: args.redis_url,
            database_path: args.database_path,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            log_format: args.log_format,
            engine,
        })
    }
}
