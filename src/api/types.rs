use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fee and limit tables, keyed by send asset then receive asset.
pub type PairMap<P> = HashMap<String, HashMap<String, P>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairs {
    pub submarine: PairMap<SubmarinePair>,
    pub reverse: PairMap<ReversePair>,
    pub chain: PairMap<ChainPair>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairLimits {
    pub minimal: u64,
    pub maximal: u64,
    #[serde(default)]
    pub maximal_zero_conf: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarinePair {
    pub hash: String,
    pub rate: f64,
    pub limits: PairLimits,
    pub fees: SubmarineFees,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarineFees {
    pub percentage: f64,
    /// Flat miner fee; the lockup is paid by the user directly.
    pub miner_fees: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversePair {
    pub hash: String,
    pub rate: f64,
    pub limits: PairLimits,
    pub fees: ReverseFees,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseFees {
    pub percentage: f64,
    pub miner_fees: ReverseMinerFees,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseMinerFees {
    pub lockup: u64,
    pub claim: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPair {
    pub hash: String,
    pub rate: f64,
    pub limits: PairLimits,
    pub fees: ChainFees,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainFees {
    pub percentage: f64,
    pub miner_fees: ChainMinerFees,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMinerFees {
    pub server: u64,
    pub user: ChainUserMinerFees,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainUserMinerFees {
    pub claim: u64,
    pub lockup: u64,
}

/// One status update for a swap, either from the realtime channel or the
/// polling endpoint. Superseded by the next event for the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(default)]
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_conf_rejected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<StatusTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransaction {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSignatureResponse {
    pub pub_nonce: String,
    pub partial_signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSignatureRequest {
    pub pub_nonce: String,
    pub partial_signature: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarineClaimDetails {
    pub pub_nonce: String,
    pub preimage: String,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimDetails {
    pub pub_nonce: String,
    pub public_key: String,
    pub transaction_hash: String,
}

/// Counter-signing request embedded in a chain-swap claim exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimToSign {
    pub pub_nonce: String,
    pub transaction: String,
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockupTransaction {
    pub id: String,
    pub hex: String,
    pub timeout_block_height: u32,
    #[serde(default)]
    pub timeout_eta: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapTransaction {
    pub transaction: StatusTransaction,
    pub timeout: ChainSwapTimeout,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapTimeout {
    pub block_height: u32,
    #[serde(default)]
    pub eta: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapTransactions {
    pub user_lock: ChainSwapTransaction,
    pub server_lock: ChainSwapTransaction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResponse {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EipSignature {
    pub signature: String,
}
