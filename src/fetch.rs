//! Block and receipt fetching.

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::U64,
    rpc::types::{Block, TransactionReceipt},
};
use futures::{Stream, StreamExt, stream};

use crate::{client::RateLimitedClient, error::FeedError, types::BlockRef};

/// Resolves block numbers and ranges to header data plus transaction
/// receipts, through the rate-limited client.
#[derive(Clone)]
pub struct BlockFetcher {
    client: RateLimitedClient,
}

impl BlockFetcher {
    pub fn new(client: RateLimitedClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    /// Current head block number, for callers resolving "last N blocks"
    /// into an explicit range.
    pub async fn head_number(&self) -> Result<u64, FeedError> {
        let number: U64 = self.client.call_noparams("eth_blockNumber").await?;
        Ok(number.to())
    }

    /// Fetches one block's header data and all of its receipts.
    pub async fn fetch_block(
        &self,
        number: u64,
    ) -> Result<(BlockRef, Vec<TransactionReceipt>), FeedError> {
        let block: Option<Block> = self
            .client
            .call(
                "eth_getBlockByNumber",
                (BlockNumberOrTag::Number(number), false),
            )
            .await?;
        let Some(block) = block else {
            return Err(FeedError::BlockNotFound { number });
        };

        let block_ref = BlockRef::new(block.header.number, block.header.timestamp);
        let receipts = self.fetch_receipts(number).await?;
        Ok((block_ref, receipts))
    }

    /// Fetches only the receipts. Live mode takes header data from the
    /// subscription notification and skips the header round-trip.
    pub async fn fetch_receipts(&self, number: u64) -> Result<Vec<TransactionReceipt>, FeedError> {
        let receipts: Option<Vec<TransactionReceipt>> = self
            .client
            .call("eth_getBlockReceipts", (BlockId::number(number),))
            .await?;
        receipts.ok_or(FeedError::BlockNotFound { number })
    }

    /// Streams `(BlockRef, receipts)` over the closed range, inclusive of
    /// both bounds. A `start > end` range is empty, not an error.
    ///
    /// Fetches are pipelined up to the limiter's per-second budget, but
    /// completions are reassembled in submission order before emission, so
    /// output order never depends on network timing: ascending block
    /// number, receipts in node order.
    pub fn fetch_range(
        &self,
        start: u64,
        end: u64,
    ) -> impl Stream<Item = Result<(BlockRef, Vec<TransactionReceipt>), FeedError>> + '_ {
        let concurrency = self.client.policy().max_requests_per_second.max(1) as usize;
        stream::iter(start..=end)
            .map(move |number| self.fetch_block(number))
            .buffered(concurrency)
    }
}
