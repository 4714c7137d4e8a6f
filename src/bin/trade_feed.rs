//! Trade feed binary.
//!
//! `download` backfills a historical block range, `listen` follows the
//! chain head live. Either way, one record per trade goes to the
//! configured sink and a human-readable line to the log.

use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};

use alloy::{
    primitives::Address,
    providers::{ProviderBuilder, WsConnect},
    rpc::client::RpcClient,
};
use clap::{Parser, Subcommand, ValueEnum};
use polymarket_feed::{
    Chain,
    client::RateLimitedClient,
    feed,
    fetch::BlockFetcher,
    output::{self, OutputError, TradeWriter},
    types::{RetryPolicy, WalletFilter},
};
use tracing::{error, info};
use url::Url;

/// Environment configuration (connection details).
#[derive(Debug, serde::Deserialize)]
struct EnvConfig {
    /// Polygon WebSocket endpoint, e.g. wss://polygon-mainnet.g.alchemy.com/v2/KEY
    polygon_wss_url: String,
}

impl EnvConfig {
    fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// HTTP endpoint derived from the WS one by scheme swap.
    fn http_url(&self) -> String {
        self.polygon_wss_url
            .replacen("wss://", "https://", 1)
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Format {
    #[default]
    Csv,
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(name = "trade_feed")]
#[command(about = "Stream Polymarket trades from Polygon")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Per-attempt RPC timeout in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Total attempts per RPC call
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[arg(long, default_value = "500")]
    backoff_ms: u64,

    /// Request-rate ceiling per second
    #[arg(long, default_value = "50")]
    max_rps: u32,

    /// File with one wallet address per line (# for comments); omit to
    /// track all wallets
    #[arg(long)]
    wallets: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backfill a historical block range
    Download {
        /// First block of the range (default: end - last)
        #[arg(long)]
        start: Option<u64>,

        /// Last block of the range (default: current head)
        #[arg(long)]
        end: Option<u64>,

        /// Number of blocks to backfill when --start is omitted
        #[arg(long, default_value = "1000")]
        last: u64,

        /// Output file
        #[arg(long, default_value = "trades.csv")]
        out: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: Format,
    },
    /// Follow the chain head live
    Listen {
        /// Output file; omit to log trades only
        #[arg(long)]
        out: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: Format,
    },
}

fn load_wallets(path: &Path) -> Result<WalletFilter, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let mut wallets = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let address: Address = line
            .parse()
            .map_err(|e| format!("invalid address {line:?}: {e}"))?;
        wallets.push(address);
    }
    Ok(WalletFilter::tracked(wallets))
}

fn open_writer(path: &Path, format: Format) -> Result<TradeWriter, OutputError> {
    match format {
        Format::Csv => TradeWriter::csv(path),
        Format::Jsonl => TradeWriter::jsonl(path),
    }
}

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    let args = Args::parse();

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let policy = RetryPolicy {
        timeout: Duration::from_millis(args.timeout_ms),
        max_attempts: args.max_attempts,
        backoff: Duration::from_millis(args.backoff_ms),
        max_requests_per_second: args.max_rps,
    };

    let filter = match &args.wallets {
        Some(path) => match load_wallets(path) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("Invalid wallet list: {}", e);
                exit(1);
            }
        },
        None => WalletFilter::all(),
    };
    if filter.is_tracking_all() {
        info!("Tracking ALL Polymarket trades");
    }

    let chain = Chain::polygon();

    let result = match args.command {
        Command::Download {
            start,
            end,
            last,
            out,
            format,
        } => run_download(&env_config, chain, policy, filter, start, end, last, &out, format).await,
        Command::Listen { out, format } => {
            run_listen(&env_config, chain, policy, filter, out.as_deref(), format).await
        }
    };

    if let Err(e) = result {
        error!(%e, "Run aborted");
        exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_download(
    env_config: &EnvConfig,
    chain: Chain,
    policy: RetryPolicy,
    filter: WalletFilter,
    start: Option<u64>,
    end: Option<u64>,
    last: u64,
    out: &Path,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let http_url: Url = env_config.http_url().parse()?;
    let client = RateLimitedClient::new(RpcClient::builder().http(http_url), policy);

    // Resolve bounds against the head when not given explicitly.
    let fetcher = BlockFetcher::new(client.clone());
    let end = match end {
        Some(end) => end,
        None => fetcher.head_number().await?,
    };
    let start = start.unwrap_or_else(|| end.saturating_sub(last));

    let mut writer = open_writer(out, format)?;
    info!(start, end, out = %out.display(), "Downloading trades");

    let (mut rx, handle) = feed::download(chain, client, filter, start, end);
    let mut count = 0u64;
    while let Some(trade) = rx.recv().await {
        output::write_stdout(&trade);
        writer.write(&trade)?;
        count += 1;
    }
    handle.await??;

    info!(count, "Download complete");
    Ok(())
}

async fn run_listen(
    env_config: &EnvConfig,
    chain: Chain,
    policy: RetryPolicy,
    filter: WalletFilter,
    out: Option<&Path>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws_url = Url::parse(&env_config.polygon_wss_url)?;
    let http_url: Url = env_config.http_url().parse()?;

    let ws_client = RpcClient::builder()
        .ws(WsConnect::new(ws_url.as_str()))
        .await?;
    // Heads queue here while a slow block is still decoding.
    ws_client.set_channel_size(1024);
    let provider = ProviderBuilder::new().connect_client(ws_client);

    let client = RateLimitedClient::new(RpcClient::builder().http(http_url), policy);
    let mut writer = match out {
        Some(path) => Some(open_writer(path, format)?),
        None => None,
    };

    info!("Listening for trades");
    let (mut rx, handle) = feed::listen(chain, provider, client, filter);
    while let Some(trade) = rx.recv().await {
        output::write_stdout(&trade);
        if let Some(writer) = writer.as_mut() {
            writer.write(&trade)?;
        }
    }
    handle.await??;

    Ok(())
}
