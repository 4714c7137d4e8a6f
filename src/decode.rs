//! Trade reconstruction from receipt logs.
//!
//! A Polymarket fill settles atomically inside one transaction: the
//! exchange emits its fill event, the Conditional Tokens contract moves
//! outcome tokens, and USDC moves between the same counterparties. The
//! decoder scans each receipt's logs in index order, pairs every
//! outcome-token leg with its collateral leg, and emits one [`Trade`] per
//! matched pair.
//!
//! Pure logic, no async and no I/O.

use alloy::{
    primitives::{Address, U256},
    rpc::types::TransactionReceipt,
    sol_types::SolEvent,
};
use fastnum::UD64;
use tracing::debug;

use crate::{
    Chain,
    abi::{ctf, erc20},
    num::Converter,
    types::{BlockRef, Side, Trade, WalletFilter},
};

/// Outcome-token movement scanned out of a receipt, in log-index order.
struct OutcomeLeg {
    from: Address,
    to: Address,
    token_id: U256,
    value: U256,
}

/// Collateral movement scanned out of a receipt.
struct CollateralLeg {
    from: Address,
    to: Address,
    value: U256,
    consumed: bool,
}

/// Skip counters. Diagnostics only: none of these are errors, a block is
/// full of events that are not trades.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Transactions skipped because they reverted.
    pub reverted_txs: u64,
    /// Transactions without a settlement-contract log.
    pub non_protocol_txs: u64,
    /// Zero-quantity outcome transfers.
    pub zero_quantity: u64,
    /// Outcome legs with no matching collateral leg.
    pub unpaired: u64,
    /// Pairs whose derived price fell outside (0, 1].
    pub bad_price: u64,
    /// Pairs touching no tracked wallet, or protocol-internal moves under
    /// match-all.
    pub filtered: u64,
    /// Raw amounts too large to normalize.
    pub overflow: u64,
}

/// Decodes raw receipts into [`Trade`]s for one chain and wallet set.
pub struct TradeDecoder {
    chain: Chain,
    filter: WalletFilter,
    outcome_converter: Converter,
    collateral_converter: Converter,
    stats: DecodeStats,
}

impl TradeDecoder {
    pub fn new(chain: Chain, filter: WalletFilter) -> Self {
        let outcome_converter = Converter::new(chain.outcome_decimals());
        let collateral_converter = Converter::new(chain.collateral_decimals());
        Self {
            chain,
            filter,
            outcome_converter,
            collateral_converter,
            stats: DecodeStats::default(),
        }
    }

    /// Running skip counters for this decoder's lifetime.
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decodes every receipt of one block.
    ///
    /// Receipt order and, within a receipt, log-index order are preserved
    /// end to end; the pairing below leans on that ordering.
    pub fn decode(&mut self, block: &BlockRef, receipts: &[TransactionReceipt]) -> Vec<Trade> {
        let mut trades = Vec::new();
        for receipt in receipts {
            self.decode_receipt(block, receipt, &mut trades);
        }
        if !trades.is_empty() {
            debug!(
                block = block.number(),
                trades = trades.len(),
                "decoded block"
            );
        }
        trades
    }

    fn decode_receipt(
        &mut self,
        block: &BlockRef,
        receipt: &TransactionReceipt,
        out: &mut Vec<Trade>,
    ) {
        if !receipt.status() {
            self.stats.reverted_txs += 1;
            return;
        }

        let logs = receipt.inner.logs();

        // Only transactions that touched a settlement contract qualify;
        // outcome tokens and USDC move for plenty of non-trade reasons.
        if !logs.iter().any(|l| self.chain.is_exchange(l.address())) {
            self.stats.non_protocol_txs += 1;
            return;
        }

        let mut outcome_legs: Vec<OutcomeLeg> = Vec::new();
        let mut collateral_legs: Vec<CollateralLeg> = Vec::new();

        for log in logs {
            let address = log.address();
            if address == self.chain.conditional_tokens() {
                if log.topic0() == Some(&ctf::TransferSingle::SIGNATURE_HASH) {
                    if let Ok(ev) = ctf::TransferSingle::decode_log(&log.inner) {
                        outcome_legs.push(OutcomeLeg {
                            from: ev.data.from,
                            to: ev.data.to,
                            token_id: ev.data.id,
                            value: ev.data.value,
                        });
                    }
                } else if log.topic0() == Some(&ctf::TransferBatch::SIGNATURE_HASH) {
                    if let Ok(ev) = ctf::TransferBatch::decode_log(&log.inner) {
                        // A batch fill is several outcome legs between the
                        // same counterparties, one per (id, value) pair.
                        for (id, value) in ev.data.ids.iter().zip(ev.data.values.iter()) {
                            outcome_legs.push(OutcomeLeg {
                                from: ev.data.from,
                                to: ev.data.to,
                                token_id: *id,
                                value: *value,
                            });
                        }
                    }
                }
            } else if address == self.chain.collateral_token()
                && log.topic0() == Some(&erc20::Transfer::SIGNATURE_HASH)
            {
                if let Ok(ev) = erc20::Transfer::decode_log(&log.inner) {
                    collateral_legs.push(CollateralLeg {
                        from: ev.data.from,
                        to: ev.data.to,
                        value: ev.data.value,
                        consumed: false,
                    });
                }
            }
            // Everything else: unrelated contracts, unrecognized
            // signatures, malformed payloads. Expected, skipped.
        }

        for leg in outcome_legs {
            if leg.value.is_zero() {
                self.stats.zero_quantity += 1;
                debug!(tx = %receipt.transaction_hash, "skipping zero-quantity outcome transfer");
                continue;
            }

            // First unconsumed collateral leg with a shared counterparty:
            // the buyer pays, or the seller gets paid. Counterparty
            // matching rather than adjacency, since operator fee transfers
            // can interleave between the two legs of a fill.
            let Some(collateral) = collateral_legs
                .iter_mut()
                .find(|c| !c.consumed && (c.from == leg.to || c.to == leg.from))
            else {
                self.stats.unpaired += 1;
                continue;
            };
            collateral.consumed = true;
            let collateral_value = collateral.value;

            let (Some(tokens), Some(total_usdc)) = (
                self.outcome_converter.from_unsigned::<1>(leg.value),
                self.collateral_converter.from_unsigned::<1>(collateral_value),
            ) else {
                self.stats.overflow += 1;
                continue;
            };

            let price: UD64 = total_usdc / tokens;
            if price.is_zero() || price > UD64::ONE {
                self.stats.bad_price += 1;
                debug!(tx = %receipt.transaction_hash, %price, "skipping pair priced outside (0, 1]");
                continue;
            }

            let Some((wallet, side)) = self.classify(&leg) else {
                self.stats.filtered += 1;
                continue;
            };

            out.push(Trade {
                block_number: block.number(),
                timestamp: block.timestamp(),
                tx_hash: receipt.transaction_hash,
                wallet,
                token_id: leg.token_id,
                side,
                tokens,
                price,
                total_usdc,
            });
        }
    }

    /// Picks the reported wallet and side for a matched pair.
    ///
    /// The outcome recipient bought, the sender sold. With a filter the
    /// recipient wins when both counterparties are tracked. Under
    /// match-all the recipient is reported unless it is a protocol
    /// contract (settlement routes one leg through the exchange), in
    /// which case the sender is, with side SELL.
    fn classify(&self, leg: &OutcomeLeg) -> Option<(Address, Side)> {
        if self.filter.is_tracking_all() {
            if !self.chain.is_protocol_contract(leg.to) {
                return Some((leg.to, Side::Buy));
            }
            if !self.chain.is_protocol_contract(leg.from) {
                return Some((leg.from, Side::Sell));
            }
            // Both ends protocol-owned, e.g. a split or merge.
            return None;
        }
        if self.filter.matches(leg.to) {
            return Some((leg.to, Side::Buy));
        }
        if self.filter.matches(leg.from) {
            return Some((leg.from, Side::Sell));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        consensus::{Eip658Value, Receipt, ReceiptEnvelope, ReceiptWithBloom},
        primitives::{Address, Bloom, B256, LogData, TxHash, U256, address},
        rpc::types::Log,
    };
    use fastnum::udec64;

    use super::*;
    use crate::abi::exchange;

    const WALLET: Address = address!("0x1111111111111111111111111111111111111111");
    const OTHER: Address = address!("0x2222222222222222222222222222222222222222");
    const MAKER: Address = address!("0x3333333333333333333333333333333333333333");

    fn block_ref() -> BlockRef {
        BlockRef::new(82889791, 1700000000)
    }

    fn log(address: Address, data: LogData) -> Log {
        Log {
            inner: alloy::primitives::Log { address, data },
            block_hash: None,
            block_number: None,
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: None,
            removed: false,
        }
    }

    fn receipt(tx: u64, success: bool, logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            inner: ReceiptEnvelope::Legacy(ReceiptWithBloom {
                receipt: Receipt {
                    status: Eip658Value::Eip658(success),
                    cumulative_gas_used: 0,
                    logs,
                },
                logs_bloom: Bloom::ZERO,
            }),
            transaction_hash: TxHash::with_last_byte(tx as u8),
            transaction_index: Some(0),
            block_hash: None,
            block_number: Some(82889791),
            gas_used: 0,
            effective_gas_price: 0,
            blob_gas_used: None,
            blob_gas_price: None,
            from: Address::ZERO,
            to: None,
            contract_address: None,
        }
    }

    /// An `OrderFilled` on the CTF Exchange, marking the transaction as a
    /// protocol settlement.
    fn exchange_marker(chain: &Chain) -> Log {
        log(
            chain.exchanges()[0],
            exchange::OrderFilled {
                orderHash: B256::ZERO,
                maker: MAKER,
                taker: WALLET,
                makerAssetId: U256::ZERO,
                takerAssetId: U256::from(777u64),
                makerAmountFilled: U256::from(46_500_000u64),
                takerAmountFilled: U256::from(50_000_000u64),
                fee: U256::ZERO,
            }
            .encode_log_data(),
        )
    }

    fn outcome_transfer(chain: &Chain, from: Address, to: Address, id: u64, value: u64) -> Log {
        log(
            chain.conditional_tokens(),
            ctf::TransferSingle {
                operator: chain.exchanges()[0],
                from,
                to,
                id: U256::from(id),
                value: U256::from(value),
            }
            .encode_log_data(),
        )
    }

    fn usdc_transfer(chain: &Chain, from: Address, to: Address, value: u64) -> Log {
        log(
            chain.collateral_token(),
            erc20::Transfer {
                from,
                to,
                value: U256::from(value),
            }
            .encode_log_data(),
        )
    }

    #[test]
    fn test_buy_trade_reconstruction() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        // 50.0 outcome tokens to the tracked wallet, 46.5 USDC from it.
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, MAKER, WALLET, 777, 50_000_000),
                usdc_transfer(&chain, WALLET, exchange_addr, 46_500_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        let trades = decoder.decode(&block_ref(), &receipts);

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.block_number, 82889791);
        assert_eq!(trade.wallet, WALLET);
        assert_eq!(trade.token_id, U256::from(777u64));
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.tokens, udec64!(50));
        assert_eq!(trade.price, udec64!(0.93));
        assert_eq!(trade.total_usdc, udec64!(46.5));
    }

    #[test]
    fn test_sell_trade_reconstruction() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, WALLET, MAKER, 777, 20_000_000),
                usdc_transfer(&chain, exchange_addr, WALLET, 9_000_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        let trades = decoder.decode(&block_ref(), &receipts);

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[0].wallet, WALLET);
        assert_eq!(trades[0].tokens, udec64!(20));
        assert_eq!(trades[0].price, udec64!(0.45));
    }

    #[test]
    fn test_wallet_filter_excludes_other_wallets() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let receipts = vec![
            receipt(
                1,
                true,
                vec![
                    exchange_marker(&chain),
                    outcome_transfer(&chain, MAKER, WALLET, 777, 50_000_000),
                    usdc_transfer(&chain, WALLET, exchange_addr, 46_500_000),
                ],
            ),
            receipt(
                2,
                true,
                vec![
                    exchange_marker(&chain),
                    outcome_transfer(&chain, MAKER, OTHER, 888, 10_000_000),
                    usdc_transfer(&chain, OTHER, exchange_addr, 5_000_000),
                ],
            ),
        ];

        let mut decoder = TradeDecoder::new(chain.clone(), WalletFilter::tracked([WALLET]));
        let trades = decoder.decode(&block_ref(), &receipts);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].wallet, WALLET);
        assert_eq!(decoder.stats().filtered, 1);

        let mut all = TradeDecoder::new(chain, WalletFilter::all());
        let trades = all.decode(&block_ref(), &receipts);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].wallet, WALLET);
        assert_eq!(trades[1].wallet, OTHER);
    }

    #[test]
    fn test_match_all_reports_seller_when_recipient_is_protocol() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, WALLET, exchange_addr, 777, 20_000_000),
                usdc_transfer(&chain, exchange_addr, WALLET, 9_000_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::all());
        let trades = decoder.decode(&block_ref(), &receipts);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].wallet, WALLET);
        assert_eq!(trades[0].side, Side::Sell);
    }

    #[test]
    fn test_unrelated_transfer_produces_nothing() {
        let chain = Chain::polygon();
        // An ERC-20 transfer on a foreign contract, no settlement log.
        let foreign = address!("0x9999999999999999999999999999999999999999");
        let receipts = vec![receipt(
            1,
            true,
            vec![log(
                foreign,
                erc20::Transfer {
                    from: WALLET,
                    to: OTHER,
                    value: U256::from(1_000_000u64),
                }
                .encode_log_data(),
            )],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::all());
        let trades = decoder.decode(&block_ref(), &receipts);
        assert!(trades.is_empty());
        assert_eq!(decoder.stats().non_protocol_txs, 1);
    }

    #[test]
    fn test_foreign_transfer_inside_protocol_tx_is_skipped() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let foreign = address!("0x9999999999999999999999999999999999999999");
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                // Same shape as a collateral leg, wrong contract.
                log(
                    foreign,
                    erc20::Transfer {
                        from: WALLET,
                        to: OTHER,
                        value: U256::from(123u64),
                    }
                    .encode_log_data(),
                ),
                outcome_transfer(&chain, MAKER, WALLET, 777, 50_000_000),
                usdc_transfer(&chain, WALLET, exchange_addr, 46_500_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        let trades = decoder.decode(&block_ref(), &receipts);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].total_usdc, udec64!(46.5));
    }

    #[test]
    fn test_reverted_transaction_skipped() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let receipts = vec![receipt(
            1,
            false,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, MAKER, WALLET, 777, 50_000_000),
                usdc_transfer(&chain, WALLET, exchange_addr, 46_500_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        assert!(decoder.decode(&block_ref(), &receipts).is_empty());
        assert_eq!(decoder.stats().reverted_txs, 1);
    }

    #[test]
    fn test_zero_quantity_transfer_skipped_not_error() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, MAKER, WALLET, 777, 0),
                usdc_transfer(&chain, WALLET, exchange_addr, 46_500_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        assert!(decoder.decode(&block_ref(), &receipts).is_empty());
        assert_eq!(decoder.stats().zero_quantity, 1);
    }

    #[test]
    fn test_batch_fill_emits_one_trade_per_pair() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let batch = log(
            chain.conditional_tokens(),
            ctf::TransferBatch {
                operator: exchange_addr,
                from: MAKER,
                to: WALLET,
                ids: vec![U256::from(1u64), U256::from(2u64)],
                values: vec![U256::from(10_000_000u64), U256::from(30_000_000u64)],
            }
            .encode_log_data(),
        );
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                batch,
                usdc_transfer(&chain, WALLET, exchange_addr, 4_000_000),
                usdc_transfer(&chain, WALLET, exchange_addr, 15_000_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        let trades = decoder.decode(&block_ref(), &receipts);

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].token_id, U256::from(1u64));
        assert_eq!(trades[0].tokens, udec64!(10));
        assert_eq!(trades[0].price, udec64!(0.4));
        assert_eq!(trades[1].token_id, U256::from(2u64));
        assert_eq!(trades[1].tokens, udec64!(30));
        assert_eq!(trades[1].price, udec64!(0.5));
    }

    #[test]
    fn test_price_outside_unit_interval_skipped() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        // 50 tokens against 60 USDC prices at 1.2, impossible for a
        // binary outcome share.
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, MAKER, WALLET, 777, 50_000_000),
                usdc_transfer(&chain, WALLET, exchange_addr, 60_000_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        assert!(decoder.decode(&block_ref(), &receipts).is_empty());
        assert_eq!(decoder.stats().bad_price, 1);
    }

    #[test]
    fn test_unpaired_outcome_leg_skipped() {
        let chain = Chain::polygon();
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, MAKER, WALLET, 777, 50_000_000),
                // Collateral moved between unrelated parties only.
                usdc_transfer(&chain, OTHER, MAKER, 46_500_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        assert!(decoder.decode(&block_ref(), &receipts).is_empty());
        assert_eq!(decoder.stats().unpaired, 1);
    }

    #[test]
    fn test_emitted_trades_respect_price_size_invariant() {
        let chain = Chain::polygon();
        let exchange_addr = chain.exchanges()[0];
        let receipts = vec![receipt(
            1,
            true,
            vec![
                exchange_marker(&chain),
                outcome_transfer(&chain, MAKER, WALLET, 777, 3_000_000),
                usdc_transfer(&chain, WALLET, exchange_addr, 1_000_000),
            ],
        )];

        let mut decoder = TradeDecoder::new(chain, WalletFilter::tracked([WALLET]));
        let trades = decoder.decode(&block_ref(), &receipts);
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];

        assert!(trade.price > UD64::ZERO && trade.price <= UD64::ONE);
        let product = trade.tokens * trade.price;
        let diff = if product > trade.total_usdc {
            product - trade.total_usdc
        } else {
            trade.total_usdc - product
        };
        assert!(diff < udec64!(0.000001));
    }
}
