use anyhow::{Context, Result};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub database_url: String,
    /// Keep existing data instead of starting with a fresh store.
    pub continue_chat: bool,
    /// Seconds between sweep passes over the index.
    pub check_interval_secs: u64,
    /// Seconds an upload may stall before the sweep evicts it.
    pub upload_timeout_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Minimal chat relay with a content-addressed message store")]
pub struct Args {
    /// Port to bind to (overrides CHATRELAY_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind the server to 0.0.0.0 instead of loopback
    #[arg(short, long)]
    pub share: bool,

    /// Keep the existing data directory instead of wiping it at startup
    #[arg(short, long)]
    pub continue_chat: bool,

    /// Directory where message payloads and the index live (overrides CHATRELAY_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Database URL (overrides CHATRELAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds between stalled-upload sweep passes (overrides CHATRELAY_CHECK_INTERVAL)
    #[arg(short = 'i', long)]
    pub check_interval: Option<u64>,

    /// Seconds before a stalled upload is evicted (overrides CHATRELAY_UPLOAD_TIMEOUT)
    #[arg(long)]
    pub upload_timeout: Option<u64>,
}

/// Read an optional integer environment variable with a default.
fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CHATRELAY_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let env_port = match env::var("CHATRELAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CHATRELAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 11451,
            Err(err) => return Err(err).context("reading CHATRELAY_PORT"),
        };
        let env_data = env::var("CHATRELAY_DATA_DIR").unwrap_or_else(|_| "./tfc_data".into());
        let env_check = env_u64("CHATRELAY_CHECK_INTERVAL", 60)?;
        let env_timeout = env_u64("CHATRELAY_UPLOAD_TIMEOUT", 4 * 60)?;

        // --- Merge ---
        let data_dir = args.data_dir.unwrap_or(env_data);
        let env_db = env::var("CHATRELAY_DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/relay.db", data_dir));

        let cfg = Self {
            host: if args.share { "0.0.0.0".into() } else { env_host },
            port: args.port.unwrap_or(env_port),
            data_dir,
            database_url: args.database_url.unwrap_or(env_db),
            continue_chat: args.continue_chat,
            check_interval_secs: args.check_interval.unwrap_or(env_check),
            upload_timeout_secs: args.upload_timeout.unwrap_or(env_timeout),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Root directory for payload blobs.
    pub fn blob_dir(&self) -> String {
        format!("{}/blobs", self.data_dir)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}
