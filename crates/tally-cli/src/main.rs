//! Tally CLI - metrics server and reporting agent
//!
//! Usage:
//!   tally server                Accept and store metrics
//!   tally agent                 Collect runtime metrics and report them
//!   tally keygen                Write an RSA key pair for payload encryption
//!
//! Settings come from flags or environment variables, then an optional TOML
//! file (`--config` / `CONFIG`), then built-in defaults.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tally_agent::{HttpDelivery, Reporter, RuntimeCollector};
use tally_core::{AgentConfig, ServerConfig};
use tally_ingress::{generate_key_pair, EgressEncoder, Encryptor, Signer};
use tally_server::{bind, build_pipeline, open_persister, serve, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about = "Metrics collection server and agent")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the metrics server
    Server(ServerArgs),

    /// Run the reporting agent
    Agent(AgentArgs),

    /// Generate an RSA key pair (private.pem / public.pem)
    Keygen {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Modulus size in bits
        #[arg(short, long, default_value = "2048")]
        bits: usize,
    },
}

#[derive(Args, Debug, Default)]
struct ServerArgs {
    /// TOML configuration file
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between snapshot saves; 0 saves on every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file path
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Database location; takes precedence over the snapshot file
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Restore the last snapshot on startup (true/false)
    #[arg(short, long, env = "RESTORE")]
    restore: Option<bool>,

    /// Shared secret for sample integrity codes
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// PEM private key for inbound decryption
    #[arg(long, env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Reject unsigned samples when a key is set
    #[arg(long, env = "REQUIRE_SIGNATURES")]
    require_signatures: Option<bool>,
}

impl ServerArgs {
    fn resolve(self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load_or_default(self.config.as_deref())
            .context("Failed to load server configuration")?;

        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(interval) = self.store_interval {
            config.store_interval_secs = interval;
        }
        if let Some(path) = self.file_storage_path {
            config.file_storage_path = Some(path);
        }
        if let Some(dsn) = self.database_dsn {
            config.database_dsn = Some(dsn);
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if let Some(key) = self.key {
            config.key = Some(key);
        }
        if let Some(path) = self.crypto_key {
            config.crypto_key = Some(path);
        }
        if let Some(require) = self.require_signatures {
            config.require_signatures = require;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Default)]
struct AgentArgs {
    /// TOML configuration file
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Server address (host:port)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between reports
    #[arg(short, long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Seconds between runtime polls
    #[arg(short, long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Shared secret for sample integrity codes
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// PEM public key for outbound encryption
    #[arg(long, env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Concurrent outbound requests per report
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<usize>,
}

impl AgentArgs {
    fn resolve(self) -> Result<AgentConfig> {
        let mut config = AgentConfig::load_or_default(self.config.as_deref())
            .context("Failed to load agent configuration")?;

        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(interval) = self.report_interval {
            config.report_interval_secs = interval;
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval_secs = interval;
        }
        if let Some(key) = self.key {
            config.key = Some(key);
        }
        if let Some(path) = self.crypto_key {
            config.crypto_key = Some(path);
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit = limit;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        token.cancel();
    });
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = args.resolve()?;
    let pipeline = build_pipeline(&config).context("Failed to configure ingress")?;
    let persister = open_persister(&config)
        .await
        .context("Failed to open metric storage")?;

    let listener = match bind(&config.address).await {
        Ok(listener) => listener,
        Err(e) => {
            if let Err(close_err) = persister.shutdown().await {
                warn!("Failed to close storage: {}", close_err);
            }
            return Err(e).with_context(|| format!("Failed to bind {}", config.address));
        }
    };

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    if config.is_synchronous() {
        info!("Saving on every update");
    }
    let ticker = persister.start_durability_ticker(config.store_interval(), shutdown.clone());

    let served = serve(listener, AppState::new(persister.clone(), pipeline), shutdown.clone()).await;
    shutdown.cancel();

    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            warn!("Durability ticker failed: {}", e);
        }
    }
    persister.shutdown().await.context("Failed to close storage")?;
    served?;
    Ok(())
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let config = args.resolve()?;

    let signer = config.key.as_deref().filter(|k| !k.is_empty()).map(Signer::new);
    let encryptor = config
        .crypto_key
        .as_ref()
        .map(Encryptor::load)
        .transpose()
        .context("Failed to load public key")?;
    let delivery = HttpDelivery::new(&config.base_url(), EgressEncoder::new(signer, encryptor))?;
    info!("Reporting to {}", delivery.url());

    let reporter = Arc::new(Reporter::new(
        &config,
        Arc::new(RuntimeCollector::new()),
        Arc::new(delivery),
    ));

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    reporter.run(shutdown).await;
    Ok(())
}

fn keygen(out_dir: PathBuf, bits: usize) -> Result<()> {
    let (encryptor, decryptor) = generate_key_pair(bits)?;
    std::fs::create_dir_all(&out_dir)?;

    let private = out_dir.join("private.pem");
    let public = out_dir.join("public.pem");
    std::fs::write(&private, decryptor.to_pem()?)
        .with_context(|| format!("Failed to write {}", private.display()))?;
    std::fs::write(&public, encryptor.to_pem()?)
        .with_context(|| format!("Failed to write {}", public.display()))?;

    println!("Wrote {} and {}", private.display(), public.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Agent(args) => run_agent(args).await,
        Commands::Keygen { out_dir, bits } => keygen(out_dir, bits),
    }
}
