//! Refund discovery.
//!
//! Two sources of refundable funds: stored submarine and chain swaps that
//! failed before the server settled, and contract-ledger lockups found by
//! scanning the swap contract's event log for a refund address.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ApiClient, BackendRegistry};
use crate::swap::{Swap, SwapKind, SwapStatus};

/// Statuses that are refundable without asking the server again.
fn known_failed(status: &SwapStatus) -> bool {
    matches!(
        status,
        SwapStatus::InvoiceFailedToPay | SwapStatus::TransactionLockupFailed
    )
}

/// Stored swaps that could hold refundable funds. Reverse swaps never do, and
/// a recorded refund transaction means the money already moved.
pub fn refund_candidates(swaps: &[Swap]) -> Vec<&Swap> {
    swaps
        .iter()
        .filter(|swap| swap.kind() != SwapKind::Reverse && swap.base().refund_tx.is_none())
        .collect()
}

/// Checks one candidate against the server. `swap.expired` alone is not
/// enough: without a lockup transaction there was never anything to refund.
pub async fn check_refundable(api: &ApiClient, swap: &Swap) -> Result<bool> {
    if known_failed(swap.status()) {
        return Ok(true);
    }
    if *swap.status() == SwapStatus::TransactionClaimed {
        return Ok(false);
    }

    let event = api
        .get_swap_status(swap.id())
        .await
        .with_context(|| format!("query status of swap {}", swap.id()))?;
    let status = SwapStatus::parse(&event.status);
    if !status.is_failed() {
        return Ok(false);
    }
    if status == SwapStatus::SwapExpired {
        return Ok(api
            .get_lockup_transaction(swap.id(), swap.kind())
            .await
            .is_ok());
    }
    Ok(true)
}

/// Filters stored swaps down to the ones that are actually refundable right
/// now. A backend that cannot be reached drops its swaps from the result with
/// a warning; they show up again on the next pass.
pub async fn discover_refundable(registry: &BackendRegistry, swaps: &[Swap]) -> Vec<Swap> {
    let mut refundable = Vec::new();
    for swap in refund_candidates(swaps) {
        let api = match registry.client(swap.backend()) {
            Ok(api) => api,
            Err(e) => {
                warn!(swap = swap.id(), error = %e, "backend lookup failed");
                continue;
            }
        };
        match check_refundable(api, swap).await {
            Ok(true) => refundable.push(swap.clone()),
            Ok(false) => debug!(swap = swap.id(), "not refundable"),
            Err(e) => warn!(swap = swap.id(), error = %e, "refund check failed"),
        }
    }
    refundable
}

/// One lockup recorded in the swap contract's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractLockup {
    pub preimage_hash: String,
    pub amount: u64,
    pub claim_address: String,
    pub refund_address: String,
    pub timelock: u64,
    pub transaction_hash: String,
}

impl ContractLockup {
    /// Deterministic key over the fields that identify the lockup in the
    /// contract, used to ask whether it is still unspent.
    pub fn key(&self) -> String {
        let mut data = Vec::new();
        for field in [
            self.preimage_hash.as_str(),
            &self.amount.to_string(),
            &self.claim_address,
            &self.refund_address,
            &self.timelock.to_string(),
        ] {
            data.extend_from_slice(field.as_bytes());
            data.push(0);
        }
        hex::encode(sha256::Hash::hash(&data).to_byte_array())
    }
}

/// Read access to the contract ledger. Implemented by the RPC component that
/// owns the node connection.
#[async_trait]
pub trait ContractLogProvider: Send + Sync {
    async fn tip_height(&self) -> Result<u64>;
    /// Lockup events emitted between the two heights, inclusive.
    async fn lockups_in_range(&self, from: u64, to: u64) -> Result<Vec<ContractLockup>>;
    /// Whether the lockup identified by [`ContractLockup::key`] is unspent.
    async fn still_locked(&self, key: &str) -> Result<bool>;
}

/// Scan progress plus the refundable lockups found in the latest window.
#[derive(Debug, Clone)]
pub struct ScanUpdate {
    /// Fraction of the scannable range covered so far; the last update is
    /// always exactly 1.0.
    pub progress: f64,
    pub lockups: Vec<ContractLockup>,
}

/// Blocks queried per log request. Public nodes reject larger ranges.
pub const SCAN_WINDOW_BLOCKS: u64 = 2_000;

/// Scans the contract log newest-first for still-locked funds refundable to
/// `refund_address`. Updates stream out per window; setting `abort` stops the
/// scan at the next window boundary without a further update.
pub fn scan_refundable_lockups(
    provider: Arc<dyn ContractLogProvider>,
    refund_address: String,
    deploy_height: u64,
    abort: Arc<AtomicBool>,
) -> mpsc::Receiver<ScanUpdate> {
    let (sender, receiver) = mpsc::channel(1);
    tokio::spawn(async move {
        if let Err(e) = run_scan(provider, refund_address, deploy_height, abort, sender).await {
            warn!(error = %e, "contract log scan failed");
        }
    });
    receiver
}

async fn run_scan(
    provider: Arc<dyn ContractLogProvider>,
    refund_address: String,
    deploy_height: u64,
    abort: Arc<AtomicBool>,
    sender: mpsc::Sender<ScanUpdate>,
) -> Result<()> {
    let tip = provider.tip_height().await?;
    if tip < deploy_height {
        sender
            .send(ScanUpdate {
                progress: 1.0,
                lockups: Vec::new(),
            })
            .await
            .ok();
        return Ok(());
    }

    let total = (tip - deploy_height + 1) as f64;
    let mut to = tip;

    loop {
        if abort.load(Ordering::SeqCst) {
            debug!("contract log scan aborted");
            return Ok(());
        }

        let from = to.saturating_sub(SCAN_WINDOW_BLOCKS - 1).max(deploy_height);
        let mut lockups = Vec::new();
        for lockup in provider.lockups_in_range(from, to).await? {
            if lockup.refund_address != refund_address {
                continue;
            }
            if provider.still_locked(&lockup.key()).await? {
                lockups.push(lockup);
            }
        }

        let done = from == deploy_height;
        let progress = if done {
            1.0
        } else {
            (((tip - from + 1) as f64) / total).min(1.0)
        };
        if sender.send(ScanUpdate { progress, lockups }).await.is_err() {
            return Ok(());
        }
        if done {
            return Ok(());
        }
        to = from - 1;
    }
}
