//! Broadcast coordination.
//!
//! A claim or refund transaction goes to every available channel at once: the
//! swap's own backend, a public explorer when one is configured for the asset,
//! and the primary backend when the swap is pinned to an alternate and the
//! asset is the confidential ledger (the primary relays those faster than the
//! public network). All attempts run to completion; the result reported is the
//! first success in preference order, or the first error when all fail.

use anyhow::{Result, anyhow};
use futures::future::join_all;

use crate::api::BackendRegistry;
use crate::asset::Asset;
use crate::config::Config;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastChannel {
    Backend(usize),
    Explorer(String),
}

/// The fixed preference order for one transaction.
pub fn channel_order(config: &Config, backend: usize, asset: Asset) -> Vec<BroadcastChannel> {
    let mut channels = vec![BroadcastChannel::Backend(backend)];
    if let Some(url) = config.explorer_broadcast_urls.get(&asset) {
        channels.push(BroadcastChannel::Explorer(url.clone()));
    }
    if asset == Asset::Lbtc && backend > 0 {
        channels.push(BroadcastChannel::Backend(0));
    }
    channels
}

/// First success in order; otherwise the first error in order.
pub fn select_outcome(results: Vec<Result<String>>) -> Result<String> {
    let mut first_error = None;
    for result in results {
        match result {
            Ok(txid) => return Ok(txid),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    Err(first_error.unwrap_or_else(|| anyhow!("no broadcast channels configured")))
}

pub async fn broadcast_transaction(
    registry: &BackendRegistry,
    config: &Config,
    backend: usize,
    asset: Asset,
    transaction_hex: &str,
) -> Result<String> {
    let channels = channel_order(config, backend, asset);
    let attempts = channels.into_iter().map(|channel| async move {
        match channel {
            BroadcastChannel::Backend(index) => {
                let client = registry.client(index)?;
                Ok(client
                    .broadcast_transaction(asset.as_str(), transaction_hex)
                    .await?
                    .id)
            }
            BroadcastChannel::Explorer(url) => explorer_broadcast(&url, transaction_hex).await,
        }
    });
    select_outcome(join_all(attempts).await)
}

// Esplora-style endpoint: raw hex in the body, txid back as plain text.
async fn explorer_broadcast(url: &str, transaction_hex: &str) -> Result<String> {
    let response = reqwest::Client::new()
        .post(url)
        .body(transaction_hex.to_string())
        .send()
        .await
        .map_err(|e| ProtocolError::Transport(e.to_string()))?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ProtocolError::Rejection(body.trim().to_string()).into());
    }
    Ok(body.trim().to_string())
}
