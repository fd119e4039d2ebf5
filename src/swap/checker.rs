//! Reacts to server status updates for tracked swaps.
//!
//! `decide` is a pure reducer from (swap, status event) to a list of actions;
//! `SwapChecker` executes those actions against the backend, the signer and
//! the store. Keeping the two apart means every transition rule is testable
//! without any network.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::BackendRegistry;
use crate::api::types::StatusEvent;
use crate::cooperative;
use crate::error::{ProtocolError, Rejection, classify_rejection};
use crate::signer::SwapSigner;
use crate::swap::store::{SwapStore, update_swap_status};
use crate::swap::{ScriptVersion, Swap, SwapKind, SwapStatus};
use crate::ws::SwapEventHandler;

/// Where the lockup transaction for a claim comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimSource {
    /// Carried inline in the status event.
    Event,
    /// Fetched from the reverse swap transaction endpoint; `invoice.settled`
    /// events do not carry the transaction.
    ReverseLookup,
    /// Fetched as the server lockup of a chain swap.
    ChainServerLockLookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Remember the lockup transaction id of a contract-ledger send.
    RecordLockup(String),
    /// Countersign the server's claim of its chain-swap leg.
    AssistServerClaim,
    /// Build and broadcast our own claim transaction.
    Claim(ClaimSource),
    /// Countersign the server's submarine claim.
    SignSubmarineClaim,
}

/// The transition table. Order matters only in that recording the lockup
/// happens before anything that could fail.
pub fn decide(swap: &Swap, event: &StatusEvent) -> Vec<Action> {
    let status = SwapStatus::parse(&event.status);
    let mut actions = Vec::new();

    if swap.asset_send().is_contract_ledger()
        && status == SwapStatus::TransactionMempool
        && let Some(transaction) = &event.transaction
    {
        actions.push(Action::RecordLockup(transaction.id.clone()));
    }

    if swap.kind() == SwapKind::Chain
        && swap.asset_send().is_cooperative_claimable()
        && status == SwapStatus::TransactionClaimPending
    {
        actions.push(Action::AssistServerClaim);
    }

    if swap.base().claim_tx.is_none()
        && swap.base().version == ScriptVersion::Taproot
        && swap.relevant_asset().is_utxo_based()
    {
        let source = match (swap.kind(), &status) {
            (
                SwapKind::Reverse,
                SwapStatus::TransactionConfirmed | SwapStatus::TransactionMempool,
            ) => event.transaction.as_ref().map(|_| ClaimSource::Event),
            (SwapKind::Reverse, SwapStatus::InvoiceSettled) => Some(ClaimSource::ReverseLookup),
            (
                SwapKind::Chain,
                SwapStatus::TransactionServerMempool | SwapStatus::TransactionServerConfirmed,
            ) => event.transaction.as_ref().map(|_| ClaimSource::Event),
            (SwapKind::Chain, SwapStatus::TransactionClaimed) => {
                Some(ClaimSource::ChainServerLockLookup)
            }
            _ => None,
        };
        if let Some(source) = source {
            actions.push(Action::Claim(source));
        }
    }

    if swap.kind() == SwapKind::Submarine && status == SwapStatus::TransactionClaimPending {
        actions.push(Action::SignSubmarineClaim);
    }

    actions
}

/// Builds, signs and broadcasts claim transactions. The wallet owning the
/// destination addresses implements this; the checker only decides when to
/// call it.
#[async_trait]
pub trait ClaimTxBuilder: Send + Sync {
    /// Returns the broadcast claim transaction id.
    async fn claim(&self, swap: &Swap, lockup_tx_hex: &str) -> Result<String>;
}

/// Receives human-facing failure notices. The embedding application decides
/// where they surface.
#[async_trait]
pub trait SwapNotifier: Send + Sync {
    async fn notify_failure(&self, swap_id: &str, message: &str);
}

/// A settled swap whose claim transaction is still ours to make. Submarine
/// lockups are claimed by the server, so `transaction.claimed` ends those; for
/// chain swaps it means the server swept its leg and ours is still open.
fn awaiting_claim(swap: &Swap) -> bool {
    if swap.base().claim_tx.is_some() {
        return false;
    }
    match swap.status() {
        SwapStatus::InvoiceSettled => true,
        SwapStatus::TransactionClaimed => swap.kind() == SwapKind::Chain,
        _ => false,
    }
}

pub struct SwapChecker {
    registry: Arc<BackendRegistry>,
    signer: Arc<dyn SwapSigner>,
    store: Arc<dyn SwapStore>,
    builder: Option<Arc<dyn ClaimTxBuilder>>,
    notifier: Option<Arc<dyn SwapNotifier>>,
}

impl SwapChecker {
    pub fn new(
        registry: Arc<BackendRegistry>,
        signer: Arc<dyn SwapSigner>,
        store: Arc<dyn SwapStore>,
        builder: Option<Arc<dyn ClaimTxBuilder>>,
    ) -> Self {
        Self {
            registry,
            signer,
            store,
            builder,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SwapNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Swaps that still need status updates after a restart: everything
    /// non-final, plus settled swaps we have not claimed yet.
    pub fn pending_swaps(&self) -> Result<Vec<Swap>> {
        let swaps = self.store.list().context("list swaps")?;
        Ok(swaps
            .into_iter()
            .filter(|swap| !swap.status().is_final() || awaiting_claim(swap))
            .collect())
    }

    pub async fn handle_event(&self, event: &StatusEvent) -> Result<()> {
        let Some(mut swap) = self.store.get(&event.id)? else {
            debug!(swap = %event.id, "status update for unknown swap");
            return Ok(());
        };

        let status = SwapStatus::parse(&event.status);
        debug!(swap = swap.id(), status = %status, "status update");
        if let Some(reason) = &event.failure_reason {
            debug!(swap = swap.id(), reason = %reason, "server reported failure reason");
        }

        for action in decide(&swap, event) {
            match action {
                Action::RecordLockup(txid) => {
                    if swap.base().lockup_tx.is_none() {
                        swap.base_mut().lockup_tx = Some(txid);
                        self.store.set(&swap)?;
                    }
                }
                Action::AssistServerClaim => self.assist_server_claim(&swap).await,
                Action::Claim(source) => {
                    if let Err(e) = self.run_claim(&mut swap, event, source).await {
                        warn!(swap = swap.id(), error = %e, "claim attempt failed");
                        self.report_failure(swap.id(), &e).await;
                    }
                }
                Action::SignSubmarineClaim => self.sign_submarine_claim(&swap).await,
            }
        }

        if update_swap_status(self.store.as_ref(), &event.id, &status)? {
            info!(swap = %event.id, status = %status, "swap reached final status");
        }
        Ok(())
    }

    // The server can always fall back to its script path after the timeout,
    // so a failure here costs it fees but never funds. Logged, not propagated.
    async fn assist_server_claim(&self, swap: &Swap) {
        let Swap::Chain(chain) = swap else { return };
        if chain.base.claim_tx.is_none() {
            warn!(
                swap = swap.id(),
                "not helping server claim: own claim transaction missing"
            );
            return;
        }

        let api = match self.registry.client(swap.backend()) {
            Ok(api) => api,
            Err(e) => {
                warn!(swap = swap.id(), error = %e, "backend lookup failed");
                return;
            }
        };
        if let Err(e) = cooperative::assist_chain_claim(api, self.signer.as_ref(), chain).await {
            warn!(swap = swap.id(), error = %e, "helping server claim failed");
        }
    }

    async fn sign_submarine_claim(&self, swap: &Swap) {
        let Swap::Submarine(submarine) = swap else {
            return;
        };

        let api = match self.registry.client(swap.backend()) {
            Ok(api) => api,
            Err(e) => {
                warn!(swap = swap.id(), error = %e, "backend lookup failed");
                return;
            }
        };
        if let Err(e) =
            cooperative::sign_submarine_claim(api, self.signer.as_ref(), submarine).await
        {
            if is_not_eligible(&e) {
                debug!(swap = swap.id(), "swap not eligible for a cooperative claim");
            } else {
                warn!(swap = swap.id(), error = %e, "cooperative submarine claim failed");
                self.report_failure(swap.id(), &e).await;
            }
        }
    }

    async fn run_claim(
        &self,
        swap: &mut Swap,
        event: &StatusEvent,
        source: ClaimSource,
    ) -> Result<()> {
        let Some(builder) = &self.builder else {
            warn!(swap = swap.id(), "no claim transaction builder configured");
            return Ok(());
        };

        let api = self.registry.client(swap.backend())?;
        let lockup_hex = match source {
            ClaimSource::Event => match event.transaction.as_ref().and_then(|t| t.hex.clone()) {
                Some(hex) => hex,
                None => self.fetch_lockup_hex(swap).await?,
            },
            ClaimSource::ReverseLookup => api.get_reverse_transaction(swap.id()).await?.hex,
            ClaimSource::ChainServerLockLookup => {
                let txs = api.get_chain_swap_transactions(swap.id()).await?;
                txs.server_lock
                    .transaction
                    .hex
                    .context("server lockup transaction has no hex")?
            }
        };

        let txid = builder.claim(swap, &lockup_hex).await?;
        swap.set_claim_tx(txid.clone())?;
        self.store.set(swap)?;
        info!(swap = swap.id(), claim_tx = %txid, "claimed swap");
        Ok(())
    }

    // Server rejections already carry the extracted message; everything else
    // is surfaced with its full error chain.
    async fn report_failure(&self, swap_id: &str, error: &anyhow::Error) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let message = match error.downcast_ref::<ProtocolError>() {
            Some(ProtocolError::Rejection(message)) => message.clone(),
            _ => error.to_string(),
        };
        notifier.notify_failure(swap_id, &message).await;
    }

    async fn fetch_lockup_hex(&self, swap: &Swap) -> Result<String> {
        let api = self.registry.client(swap.backend())?;
        match swap.kind() {
            SwapKind::Reverse => Ok(api.get_reverse_transaction(swap.id()).await?.hex),
            SwapKind::Chain => {
                let txs = api.get_chain_swap_transactions(swap.id()).await?;
                txs.server_lock
                    .transaction
                    .hex
                    .context("server lockup transaction has no hex")
            }
            SwapKind::Submarine => anyhow::bail!("submarine swaps are not claimed by us"),
        }
    }
}

fn is_not_eligible(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ProtocolError>(),
        Some(ProtocolError::Rejection(message))
            if classify_rejection(message) == Rejection::NotEligibleForCooperativeClaim
    )
}

#[async_trait]
impl SwapEventHandler for SwapChecker {
    async fn on_status(&self, event: &StatusEvent) -> Result<()> {
        self.handle_event(event).await
    }
}
