//! Feed orchestration: backfill and live runs.
//!
//! Both entry points follow the same shape: spawn the run on a background
//! task, hand back a [`TradeReceiver`] plus the task handle. Trades arrive
//! one at a time, in ascending block order and ascending log-index order
//! within a block, and the run holds no buffered history beyond the
//! channel.
//!
//! # Example
//!
//! ```ignore
//! let (mut rx, handle) = feed::download(chain, client, filter, start, end);
//!
//! while let Some(trade) = rx.recv().await {
//!     println!("{} {} {} @ {}", trade.wallet, trade.side, trade.tokens, trade.price);
//! }
//!
//! // Surface a fatal error, if any
//! handle.await??;
//! ```

use alloy::providers::Provider;
use futures::{StreamExt, pin_mut};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    Chain,
    client::RateLimitedClient,
    decode::TradeDecoder,
    error::FeedError,
    fetch::BlockFetcher,
    subscribe::LiveSubscriber,
    types::{Trade, WalletFilter},
};

/// Default channel buffer size.
const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Receiver for decoded trades.
///
/// Dropping it cancels the producing run cooperatively at its next
/// emission; the client and limiter stay valid for a subsequent run.
pub struct TradeReceiver {
    inner: mpsc::Receiver<Trade>,
}

impl TradeReceiver {
    fn new(inner: mpsc::Receiver<Trade>) -> Self {
        Self { inner }
    }

    /// Receives the next trade, or `None` once the run has ended.
    pub async fn recv(&mut self) -> Option<Trade> {
        self.inner.recv().await
    }
}

/// Backfills the closed block range `[start, end]`.
///
/// The run either completes the whole range or aborts at the first fatal
/// error, which the handle reports. There is no implied "completed up to
/// N": a caller that wants resumability records the last block it saw.
pub fn download(
    chain: Chain,
    client: RateLimitedClient,
    filter: WalletFilter,
    start: u64,
    end: u64,
) -> (
    TradeReceiver,
    tokio::task::JoinHandle<Result<(), FeedError>>,
) {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
    let handle = tokio::spawn(run_download(chain, client, filter, start, end, tx));
    (TradeReceiver::new(rx), handle)
}

async fn run_download(
    chain: Chain,
    client: RateLimitedClient,
    filter: WalletFilter,
    start: u64,
    end: u64,
    tx: mpsc::Sender<Trade>,
) -> Result<(), FeedError> {
    info!(start, end, "starting backfill");
    let fetcher = BlockFetcher::new(client);
    let mut decoder = TradeDecoder::new(chain, filter);

    let total = end.saturating_sub(start).saturating_add(1);
    let blocks = fetcher.fetch_range(start, end);
    pin_mut!(blocks);

    let mut blocks_done = 0u64;
    while let Some(result) = blocks.next().await {
        let (block, receipts) = result?;
        for trade in decoder.decode(&block, &receipts) {
            if tx.send(trade).await.is_err() {
                // Receiver dropped, graceful shutdown.
                return Ok(());
            }
        }
        blocks_done += 1;
        if blocks_done % 500 == 0 {
            info!(blocks_done, total, "backfill progress");
        }
    }

    info!(start, end, stats = ?decoder.stats(), "backfill complete");
    Ok(())
}

/// Follows the chain head over `ws_provider`'s streaming connection.
///
/// Every notification is fetched and decoded, and its trades emitted,
/// before the next notification is taken; pending notifications queue in
/// the subscription channel, never dropped or reordered. Connection loss
/// ends the run with [`FeedError::SubscriptionClosed`].
pub fn listen<P>(
    chain: Chain,
    ws_provider: P,
    client: RateLimitedClient,
    filter: WalletFilter,
) -> (
    TradeReceiver,
    tokio::task::JoinHandle<Result<(), FeedError>>,
)
where
    P: Provider + 'static,
{
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
    let handle = tokio::spawn(run_listen(chain, ws_provider, client, filter, tx));
    (TradeReceiver::new(rx), handle)
}

async fn run_listen<P: Provider>(
    chain: Chain,
    ws_provider: P,
    client: RateLimitedClient,
    filter: WalletFilter,
    tx: mpsc::Sender<Trade>,
) -> Result<(), FeedError> {
    let subscriber = LiveSubscriber::new(ws_provider);
    let fetcher = BlockFetcher::new(client);
    let mut decoder = TradeDecoder::new(chain, filter);

    let heads = subscriber.subscribe().await?;
    info!("subscribed to new heads");
    pin_mut!(heads);

    while let Some(block) = heads.next().await {
        // The notification already carries the header data; only the
        // receipts are fetched per block.
        let receipts = fetcher.fetch_receipts(block.number()).await?;
        debug!(
            block = block.number(),
            receipts = receipts.len(),
            "processing block"
        );
        for trade in decoder.decode(&block, &receipts) {
            if tx.send(trade).await.is_err() {
                return Ok(());
            }
        }
    }

    // The subscription never ends of its own accord.
    Err(FeedError::SubscriptionClosed)
}
