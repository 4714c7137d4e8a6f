use std::{collections::HashSet, fmt::Display, time::Duration};

use alloy::primitives::{Address, TxHash, U256};
use fastnum::UD64;
use serde::{Serialize, Serializer};

/// Instant in chain history a block's data is anchored to.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord, Hash, Default)]
pub struct BlockRef {
    number: u64,
    timestamp: u64,
}

impl BlockRef {
    pub fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Block timestamp, unix seconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Trade direction from the reported wallet's perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[display("BUY")]
    Buy,
    #[display("SELL")]
    Sell,
}

/// A reconstructed trade.
///
/// The only entity that escapes the core: handed to the sink as soon as it
/// is built and never mutated afterwards. `total_usdc` equals
/// `tokens * price` up to rounding, and `price` lies in `(0, 1]`.
///
/// Field order is stable so CSV/JSON Lines writers need no knowledge of
/// decoding internals.
#[derive(Clone, Debug, Serialize)]
pub struct Trade {
    pub block_number: u64,
    pub timestamp: u64,
    pub tx_hash: TxHash,
    pub wallet: Address,
    #[serde(serialize_with = "u256_decimal")]
    pub token_id: U256,
    pub side: Side,
    #[serde(serialize_with = "display")]
    pub tokens: UD64,
    #[serde(serialize_with = "display")]
    pub price: UD64,
    #[serde(serialize_with = "display")]
    pub total_usdc: UD64,
}

/// Token IDs are conventionally written in decimal, not the 0x-hex serde
/// would produce for a U256.
fn u256_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Set of tracked wallet addresses, or the match-all sentinel.
///
/// Addresses are normalized by parsing into [`Address`], so matching is
/// checksum-agnostic. Read-only for the lifetime of a run.
#[derive(Clone, Debug, Default)]
pub struct WalletFilter {
    wallets: Option<HashSet<Address>>,
}

impl WalletFilter {
    /// Track every wallet.
    pub fn all() -> Self {
        Self { wallets: None }
    }

    /// Track only the given wallets. An empty iterator means track all,
    /// mirroring an empty wallet-list file.
    pub fn tracked<I: IntoIterator<Item = Address>>(wallets: I) -> Self {
        let set: HashSet<_> = wallets.into_iter().collect();
        Self {
            wallets: (!set.is_empty()).then_some(set),
        }
    }

    pub fn is_tracking_all(&self) -> bool {
        self.wallets.is_none()
    }

    pub fn matches(&self, wallet: Address) -> bool {
        self.wallets.as_ref().is_none_or(|w| w.contains(&wallet))
    }
}

/// Request pacing and retry configuration, immutable for a single run.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Bound on every individual attempt. A node that rate-limits by
    /// hanging is indistinguishable from a broken one, so this is the sole
    /// failure-detection mechanism and is never extended adaptively.
    pub timeout: Duration,

    /// Total attempts per logical call, first try included.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    pub backoff: Duration,

    /// Ceiling on attempts started in any rolling one-second window.
    pub max_requests_per_second: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            max_requests_per_second: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use fastnum::udec64;

    use super::*;

    #[test]
    fn test_wallet_filter_tracked() {
        let a = address!("0x1111111111111111111111111111111111111111");
        let b = address!("0x2222222222222222222222222222222222222222");

        let filter = WalletFilter::tracked([a]);
        assert!(!filter.is_tracking_all());
        assert!(filter.matches(a));
        assert!(!filter.matches(b));
    }

    #[test]
    fn test_wallet_filter_empty_means_all() {
        let filter = WalletFilter::tracked([]);
        assert!(filter.is_tracking_all());
        assert!(filter.matches(address!("0x3333333333333333333333333333333333333333")));
    }

    #[test]
    fn test_trade_serializes_with_stable_fields() {
        let trade = Trade {
            block_number: 82889791,
            timestamp: 1700000000,
            tx_hash: TxHash::ZERO,
            wallet: address!("0x1111111111111111111111111111111111111111"),
            token_id: U256::from(12345u64),
            side: Side::Buy,
            tokens: udec64!(50),
            price: udec64!(0.93),
            total_usdc: udec64!(46.5),
        };

        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["block_number"], 82889791);
        assert_eq!(json["token_id"], "12345");
        assert_eq!(json["side"], "BUY");
        assert_eq!(json["price"], "0.93");
        assert_eq!(json["total_usdc"], "46.5");
    }
}
