//! Pure fee and limit computation over already-fetched pair tables.
//!
//! The submarine formula applies the percentage to the amount net of the miner
//! fee because the service deducts its fee from what it pays out; reverse and
//! chain swaps pay the percentage on the gross send amount with the miner fee
//! on top. The asymmetry mirrors how the legs are actually paid out and must
//! not be unified.

use crate::api::types::{ChainFees, Pairs, ReverseFees, SubmarineFees};
use crate::asset::{Asset, is_confidential_address};
use crate::swap::SwapKind;

/// Extra miner fee when the receive side is the confidential ledger but the
/// destination address is unconfidential: the service must add a confidential
/// OP_RETURN change output with one sat inside.
pub const UNCONFIDENTIAL_EXTRA_SATS: u64 = 5;

fn ceil(value: f64) -> u64 {
    value.ceil().max(0.0) as u64
}

fn floor(value: f64) -> u64 {
    value.floor().max(0.0) as u64
}

/// Send amount required for a desired receive amount.
pub fn send_amount(receive: u64, percentage: f64, miner_fee: u64, kind: SwapKind) -> u64 {
    match kind {
        SwapKind::Submarine => {
            ceil(receive as f64 * (1.0 + percentage / 100.0)) + miner_fee
        }
        SwapKind::Reverse | SwapKind::Chain => {
            ceil((receive + miner_fee) as f64 / (1.0 - percentage / 100.0))
        }
    }
}

/// Receive amount resulting from a given send amount. Clamped at zero.
pub fn receive_amount(send: u64, percentage: f64, miner_fee: u64, kind: SwapKind) -> u64 {
    match kind {
        SwapKind::Submarine => {
            let net = send.saturating_sub(miner_fee);
            floor(net as f64 / (1.0 + percentage / 100.0))
        }
        SwapKind::Reverse | SwapKind::Chain => {
            let service_fee = ceil(send as f64 * percentage / 100.0);
            send.saturating_sub(service_fee).saturating_sub(miner_fee)
        }
    }
}

/// Service fee charged on a given send amount.
pub fn fee_on_send(send: u64, percentage: f64, miner_fee: u64, kind: SwapKind) -> u64 {
    match kind {
        SwapKind::Submarine => send
            .saturating_sub(receive_amount(send, percentage, miner_fee, kind))
            .saturating_sub(miner_fee),
        SwapKind::Reverse | SwapKind::Chain => ceil(send as f64 * percentage / 100.0),
    }
}

/// Converts a raw pair limit into the send-side amount the user must compare
/// against. Submarine limits are denominated receive-side and have to be
/// grossed up through the fee formula; reverse and chain limits pass through.
pub fn effective_limit(raw: u64, percentage: f64, miner_fee: u64, kind: SwapKind) -> u64 {
    match kind {
        SwapKind::Submarine => send_amount(raw, percentage, miner_fee, kind),
        SwapKind::Reverse | SwapKind::Chain => raw,
    }
}

/// The confidential-ledger surcharge for a concrete destination.
pub fn unconfidential_extra(asset_receive: Asset, destination: &str) -> u64 {
    if asset_receive.is_confidential_ledger() && !is_confidential_address(destination) {
        UNCONFIDENTIAL_EXTRA_SATS
    } else {
        0
    }
}

pub fn submarine_miner_fee(fees: &SubmarineFees) -> u64 {
    fees.miner_fees
}

pub fn reverse_miner_fee(fees: &ReverseFees, extra: u64) -> u64 {
    fees.miner_fees.claim + fees.miner_fees.lockup + extra
}

/// The user pays the server's lockup plus their own claim; their lockup fee is
/// paid out of band when funding.
pub fn chain_miner_fee(fees: &ChainFees, extra: u64) -> u64 {
    fees.miner_fees.server + fees.miner_fees.user.claim + extra
}

// Submarine pairs settle the lightning leg in BTC, so the lightning side of a
// pair key is the bitcoin symbol.
fn pair_key(asset: Asset) -> &'static str {
    match asset {
        Asset::Lightning => Asset::Btc.as_str(),
        other => other.as_str(),
    }
}

/// Looks up the fee/limit entry for a concrete pair. `None` means the backend
/// does not serve this pair, which is distinct from the backend being offline.
pub fn resolve_pair<'a, P>(
    table: &'a std::collections::HashMap<String, std::collections::HashMap<String, P>>,
    asset_send: Asset,
    asset_receive: Asset,
) -> Option<&'a P> {
    table.get(pair_key(asset_send))?.get(pair_key(asset_receive))
}

/// Fees saved by a direct chain swap compared to chaining a submarine and a
/// reverse swap (the "optimized route" hint). Negative when the direct route
/// is more expensive.
pub fn chain_route_saved_fees(
    pairs: &Pairs,
    asset_send: Asset,
    send: u64,
    extra: u64,
) -> Option<i64> {
    let submarine = resolve_pair(&pairs.submarine, asset_send, Asset::Lightning)?;
    let reverse = resolve_pair(&pairs.reverse, Asset::Lightning, Asset::Lbtc)?;
    let chain = resolve_pair(&pairs.chain, asset_send, Asset::Lbtc)?;

    let submarine_total = fee_on_send(
        send,
        submarine.fees.percentage,
        submarine_miner_fee(&submarine.fees),
        SwapKind::Submarine,
    ) + submarine_miner_fee(&submarine.fees);

    let reverse_miner = reverse_miner_fee(&reverse.fees, extra);
    let reverse_total =
        fee_on_send(send, reverse.fees.percentage, reverse_miner, SwapKind::Reverse) + reverse_miner;

    let chain_miner = chain_miner_fee(&chain.fees, extra);
    let chain_total =
        fee_on_send(send, chain.fees.percentage, chain_miner, SwapKind::Chain) + chain_miner;

    Some((submarine_total + reverse_total) as i64 - chain_total as i64)
}
