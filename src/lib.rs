//! Polymarket trade feed.
//!
//! # Overview
//!
//! Reconstructs a normalized stream of Polymarket trades from raw Polygon
//! blocks, either retrospectively over a bounded block range or live from a
//! `newHeads` subscription.
//!
//! Use [`feed::download`] to backfill a historical range, or
//! [`feed::listen`] to follow the chain head. Both hand trades to a
//! [`feed::TradeReceiver`] one at a time, in ascending block order and
//! ascending log-index order within a block.
//!
//! All node access goes through [`client::RateLimitedClient`], which paces
//! outbound requests, bounds every attempt with a timeout, and retries
//! transient failures in place. A call that exhausts its attempt budget is
//! fatal to the whole run.
//!
//! See `./tests` for an end-to-end backfill example against a mocked
//! transport.

pub mod abi;
pub mod client;
pub mod decode;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod num;
pub mod output;
pub mod subscribe;
pub mod types;

use alloy::primitives::{Address, address};

/// Chain the protocol is deployed on.
#[derive(Clone, Debug)]
pub struct Chain {
    chain_id: u64,
    collateral_token: Address,
    conditional_tokens: Address,
    exchanges: Vec<Address>,
    collateral_decimals: u8,
    outcome_decimals: u8,
}

impl Chain {
    /// Polymarket on Polygon mainnet.
    pub fn polygon() -> Self {
        Self {
            chain_id: 137,
            // USDC (PoS)
            collateral_token: address!("0x2791bca1f2de4661ed88a30c99a7a9449aa84174"),
            // Gnosis Conditional Tokens Framework (outcome tokens, ERC-1155)
            conditional_tokens: address!("0x4d97dcd97ec945f40cf65f87097ace5ea0476045"),
            exchanges: vec![
                // CTF Exchange
                address!("0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e"),
                // NegRisk CTF Exchange
                address!("0xc5d563a36ae78145c45a50134d48a1215220f80a"),
                // NegRisk Operator
                address!("0x56c79347e95530c01a2fc76e732f9566da16e113"),
            ],
            collateral_decimals: 6,
            outcome_decimals: 6,
        }
    }

    pub fn custom(
        chain_id: u64,
        collateral_token: Address,
        conditional_tokens: Address,
        exchanges: Vec<Address>,
        collateral_decimals: u8,
        outcome_decimals: u8,
    ) -> Self {
        Self {
            chain_id,
            collateral_token,
            conditional_tokens,
            exchanges,
            collateral_decimals,
            outcome_decimals,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn collateral_token(&self) -> Address {
        self.collateral_token
    }

    pub fn conditional_tokens(&self) -> Address {
        self.conditional_tokens
    }

    /// Settlement contracts whose presence in a transaction's logs marks it
    /// as a protocol trade.
    pub fn exchanges(&self) -> &[Address] {
        &self.exchanges
    }

    pub fn is_exchange(&self, address: Address) -> bool {
        self.exchanges.contains(&address)
    }

    /// True for any contract owned by the protocol itself, as opposed to a
    /// user wallet.
    pub fn is_protocol_contract(&self, address: Address) -> bool {
        address == self.conditional_tokens
            || address == self.collateral_token
            || self.is_exchange(address)
    }

    pub fn collateral_decimals(&self) -> u8 {
        self.collateral_decimals
    }

    pub fn outcome_decimals(&self) -> u8 {
        self.outcome_decimals
    }
}
