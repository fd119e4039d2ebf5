pub mod checker;
pub mod status;
pub mod store;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
pub use status::SwapStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapKind {
    Submarine,
    Reverse,
    Chain,
}

/// Lockup script flavor. Legacy swaps are spent via plain script paths only;
/// taproot swaps additionally support cooperative 2-of-2 key-path spends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptVersion {
    Legacy,
    Taproot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTreeLeaf {
    pub output: String,
    pub version: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTree {
    pub claim_leaf: SwapTreeLeaf,
    pub refund_leaf: SwapTreeLeaf,
}

/// Fields every swap kind shares. Key material is referenced by derivation
/// index only; the signer collaborator owns the secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapBase {
    pub id: String,
    /// Index into the backend registry; fixed for the swap's lifetime.
    pub backend: usize,
    pub version: ScriptVersion,
    pub asset_send: Asset,
    pub asset_receive: Asset,
    pub status: SwapStatus,
    pub key_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockup_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_tx: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarineSwap {
    #[serde(flatten)]
    pub base: SwapBase,
    pub invoice: String,
    pub lockup_address: String,
    pub expected_amount: u64,
    /// Server's claim public key, our counter-party in the 2-of-2.
    pub claim_public_key: String,
    pub timeout_block_height: u32,
    pub swap_tree: SwapTree,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseSwap {
    #[serde(flatten)]
    pub base: SwapBase,
    pub invoice: String,
    pub preimage: String,
    pub onchain_amount: u64,
    pub lockup_address: String,
    pub claim_address: String,
    /// Server's refund public key, our counter-party in the 2-of-2.
    pub refund_public_key: String,
    pub timeout_block_height: u32,
    pub swap_tree: SwapTree,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

/// One leg of a chain swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapLeg {
    pub lockup_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_address: Option<String>,
    pub amount: u64,
    pub timeout_block_height: u32,
    pub server_public_key: String,
    pub swap_tree: SwapTree,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwap {
    #[serde(flatten)]
    pub base: SwapBase,
    pub preimage: String,
    /// The leg we fund.
    pub lockup_details: ChainSwapLeg,
    /// The leg we claim.
    pub claim_details: ChainSwapLeg,
}

/// The central entity: a tagged record with kind-specific fields, matched
/// exhaustively at every consumption site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Swap {
    Submarine(SubmarineSwap),
    Reverse(ReverseSwap),
    Chain(ChainSwap),
}

impl Swap {
    pub fn base(&self) -> &SwapBase {
        match self {
            Swap::Submarine(s) => &s.base,
            Swap::Reverse(s) => &s.base,
            Swap::Chain(s) => &s.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut SwapBase {
        match self {
            Swap::Submarine(s) => &mut s.base,
            Swap::Reverse(s) => &mut s.base,
            Swap::Chain(s) => &mut s.base,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn kind(&self) -> SwapKind {
        match self {
            Swap::Submarine(_) => SwapKind::Submarine,
            Swap::Reverse(_) => SwapKind::Reverse,
            Swap::Chain(_) => SwapKind::Chain,
        }
    }

    pub fn backend(&self) -> usize {
        self.base().backend
    }

    pub fn status(&self) -> &SwapStatus {
        &self.base().status
    }

    pub fn asset_send(&self) -> Asset {
        self.base().asset_send
    }

    pub fn asset_receive(&self) -> Asset {
        self.base().asset_receive
    }

    /// The on-chain asset this engine watches for the swap: the one we sign
    /// for, which is the send side for submarine swaps and the receive side
    /// otherwise.
    pub fn relevant_asset(&self) -> Asset {
        match self {
            Swap::Submarine(s) => s.base.asset_send,
            Swap::Reverse(s) => s.base.asset_receive,
            Swap::Chain(s) => s.base.asset_receive,
        }
    }

    /// Records our claim transaction. Set at most once.
    pub fn set_claim_tx(&mut self, txid: String) -> Result<()> {
        let base = self.base_mut();
        anyhow::ensure!(
            base.claim_tx.is_none(),
            "claim transaction for {} already recorded",
            base.id
        );
        base.claim_tx = Some(txid);
        Ok(())
    }

    /// Records our refund transaction. Set at most once.
    pub fn set_refund_tx(&mut self, txid: String) -> Result<()> {
        let base = self.base_mut();
        anyhow::ensure!(
            base.refund_tx.is_none(),
            "refund transaction for {} already recorded",
            base.id
        );
        base.refund_tx = Some(txid);
        Ok(())
    }

    /// The timeout height after which the unilateral refund path opens.
    pub fn timeout_block_height(&self) -> Result<u32> {
        match self {
            Swap::Submarine(s) => Ok(s.timeout_block_height),
            Swap::Chain(s) => Ok(s.lockup_details.timeout_block_height),
            Swap::Reverse(_) => {
                anyhow::bail!("reverse swaps have no payer-side refund timeout")
            }
        }
    }
}


/// Validates an exported refund record before any network or signing attempt.
pub fn validate_refund_record(value: &serde_json::Value) -> Result<Swap> {
    let invalid = |msg: String| crate::error::ProtocolError::Validation(msg);

    let Some(object) = value.as_object() else {
        return Err(invalid("refund data is not an object".to_string()).into());
    };
    for key in ["id", "kind", "assetSend", "assetReceive", "keyIndex"] {
        if !object.contains_key(key) {
            return Err(invalid(format!("refund data is missing `{key}`")).into());
        }
    }

    let swap: Swap = serde_json::from_value(value.clone())
        .map_err(|e| invalid(format!("refund data does not describe a swap: {e}")))?;
    if swap.kind() == SwapKind::Reverse {
        return Err(invalid("reverse swaps cannot be refunded by the payer".to_string()).into());
    }
    Ok(swap)
}
