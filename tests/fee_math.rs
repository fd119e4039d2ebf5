use std::collections::HashMap;

use ln_chain_swap::api::types::{
    ChainFees, ChainMinerFees, ChainPair, ChainUserMinerFees, PairLimits, Pairs, ReverseFees,
    ReverseMinerFees, ReversePair, SubmarineFees, SubmarinePair,
};
use ln_chain_swap::asset::Asset;
use ln_chain_swap::fees::{
    self, UNCONFIDENTIAL_EXTRA_SATS, chain_route_saved_fees, effective_limit, fee_on_send,
    receive_amount, resolve_pair, send_amount, unconfidential_extra,
};
use ln_chain_swap::swap::SwapKind;

const SUBMARINE_FEES: SubmarineFees = SubmarineFees {
    percentage: 0.1,
    miner_fees: 300,
};

const REVERSE_FEES: ReverseFees = ReverseFees {
    percentage: 0.25,
    miner_fees: ReverseMinerFees {
        lockup: 200,
        claim: 100,
    },
};

const CHAIN_FEES: ChainFees = ChainFees {
    percentage: 0.3,
    miner_fees: ChainMinerFees {
        server: 500,
        user: ChainUserMinerFees {
            claim: 200,
            lockup: 400,
        },
    },
};

#[test]
fn submarine_percentage_applies_to_the_net_amount() {
    // send = ceil(receive * 1.001) + miner
    let send = send_amount(500_500, 0.1, 300, SwapKind::Submarine);
    assert_eq!(send, 501_301);

    assert_eq!(receive_amount(send, 0.1, 300, SwapKind::Submarine), 500_500);
    assert_eq!(fee_on_send(send, 0.1, 300, SwapKind::Submarine), 501);
}

#[test]
fn reverse_percentage_applies_to_the_gross_amount() {
    let miner = fees::reverse_miner_fee(&REVERSE_FEES, 0);
    assert_eq!(miner, 300);

    assert_eq!(receive_amount(1_000_000, 0.25, miner, SwapKind::Reverse), 997_200);
    assert_eq!(fee_on_send(1_000_000, 0.25, miner, SwapKind::Reverse), 2_500);

    // receive = (send - fee) with the percentage grossed up on the way back
    assert_eq!(send_amount(1_000, 50.0, 0, SwapKind::Reverse), 2_000);
    assert_eq!(send_amount(900, 50.0, 100, SwapKind::Reverse), 2_000);
}

#[test]
fn chain_miner_fee_excludes_own_lockup() {
    // The user lockup fee is paid when funding, not out of the swap amount.
    assert_eq!(fees::chain_miner_fee(&CHAIN_FEES, 0), 700);
    assert_eq!(fees::chain_miner_fee(&CHAIN_FEES, 5), 705);
}

#[test]
fn submarine_limits_are_grossed_up_and_others_pass_through() {
    assert_eq!(effective_limit(1_001, 0.1, 300, SwapKind::Submarine), 1_303);
    assert_eq!(effective_limit(1_000, 0.25, 300, SwapKind::Reverse), 1_000);
    assert_eq!(effective_limit(1_000, 0.3, 700, SwapKind::Chain), 1_000);
}

#[test]
fn unconfidential_destination_pays_the_surcharge() {
    assert_eq!(
        unconfidential_extra(Asset::Lbtc, "ex1qar0srrr7xfkvy5l643"),
        UNCONFIDENTIAL_EXTRA_SATS
    );
    assert_eq!(
        unconfidential_extra(Asset::Lbtc, "lq1qqw5ur50rnvcx33vmlj0uwuysx6gy2rzxff3dx4wy"),
        0
    );
    assert_eq!(unconfidential_extra(Asset::Btc, "bc1qanything"), 0);
}

fn limits() -> PairLimits {
    PairLimits {
        minimal: 1_000,
        maximal: 10_000_000,
        maximal_zero_conf: 100_000,
    }
}

fn sample_pairs() -> Pairs {
    let mut submarine = HashMap::new();
    submarine.insert(
        "BTC".to_string(),
        HashMap::from([(
            "BTC".to_string(),
            SubmarinePair {
                hash: "h1".to_string(),
                rate: 1.0,
                limits: limits(),
                fees: SUBMARINE_FEES,
            },
        )]),
    );

    let mut reverse = HashMap::new();
    reverse.insert(
        "BTC".to_string(),
        HashMap::from([(
            "L-BTC".to_string(),
            ReversePair {
                hash: "h2".to_string(),
                rate: 1.0,
                limits: limits(),
                fees: REVERSE_FEES,
            },
        )]),
    );

    let mut chain = HashMap::new();
    chain.insert(
        "BTC".to_string(),
        HashMap::from([(
            "L-BTC".to_string(),
            ChainPair {
                hash: "h3".to_string(),
                rate: 1.0,
                limits: limits(),
                fees: CHAIN_FEES,
            },
        )]),
    );

    Pairs {
        submarine,
        reverse,
        chain,
    }
}

#[test]
fn lightning_legs_resolve_under_the_bitcoin_symbol() {
    let pairs = sample_pairs();
    assert!(resolve_pair(&pairs.submarine, Asset::Btc, Asset::Lightning).is_some());
    assert!(resolve_pair(&pairs.reverse, Asset::Lightning, Asset::Lbtc).is_some());
    assert!(resolve_pair(&pairs.chain, Asset::Btc, Asset::Lbtc).is_some());
    assert!(resolve_pair(&pairs.chain, Asset::Lbtc, Asset::Btc).is_none());
}

#[test]
fn direct_chain_route_saves_both_swaps_fees() {
    let pairs = sample_pairs();
    let saved = chain_route_saved_fees(&pairs, Asset::Btc, 1_000_000, 0)
        .expect("all pairs available");

    // submarine: fee 999 + miner 300; reverse: fee 2500 + miner 300;
    // chain: fee 3000 + miner 700.
    assert_eq!(saved, (999 + 300 + 2_500 + 300) - (3_000 + 700));

    let mut missing = sample_pairs();
    missing.chain.clear();
    assert!(chain_route_saved_fees(&missing, Asset::Btc, 1_000_000, 0).is_none());
}
