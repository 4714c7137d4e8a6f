//! Live new-head subscription.

use alloy::providers::Provider;
use futures::{Stream, StreamExt};

use crate::{error::FeedError, types::BlockRef};

/// Owns the streaming connection and surfaces new heads as [`BlockRef`]s.
///
/// The subscription is non-restartable: once the underlying connection
/// drops, the stream ends and the run fails with
/// [`FeedError::SubscriptionClosed`]. Reconnect policy belongs to an
/// external supervisor, not here.
pub struct LiveSubscriber<P> {
    provider: P,
}

impl<P: Provider> LiveSubscriber<P> {
    /// Takes exclusive ownership of the pubsub-capable provider; nothing
    /// else may write to the connection.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Subscribes to `newHeads` and returns the notification stream.
    ///
    /// Notifications that arrive while a previous block is still being
    /// processed queue in the subscription channel, in arrival order;
    /// size the channel via the client's channel-size setting if blocks
    /// outpace processing.
    pub async fn subscribe(&self) -> Result<impl Stream<Item = BlockRef>, FeedError> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;
        Ok(subscription
            .into_stream()
            .map(|header| BlockRef::new(header.number, header.timestamp)))
    }
}
