pub mod types;

use anyhow::{Context as _, Result};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::Config;
use crate::error::{ProtocolError, format_error_body};
use crate::swap::SwapKind;
use types::*;

/// REST client for one swap-service backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    backend: usize,
    cooperative_disabled: bool,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, backend: usize, cooperative_disabled: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backend,
            cooperative_disabled,
        }
    }

    pub fn backend(&self) -> usize {
        self.backend
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn ensure_cooperative(&self) -> Result<()> {
        if self.cooperative_disabled {
            return Err(ProtocolError::CooperativeDisabled.into());
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        Self::decode(response).await.with_context(|| format!("GET {path}"))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        Self::decode(response).await.with_context(|| format!("POST {path}"))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.context("decode response body");
        }

        // Error bodies carry the rejection reason the state machine pattern
        // matches on, so surface the extracted message verbatim.
        let body: serde_json::Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!(format!("http status {status}")));
        Err(ProtocolError::Rejection(format_error_body(&body)).into())
    }

    /// Fetches the fee/limit tables for all three swap kinds in parallel.
    pub async fn get_pairs(&self) -> Result<Pairs> {
        let (submarine, reverse, chain) = tokio::try_join!(
            self.get::<PairMap<SubmarinePair>>("/v2/swap/submarine"),
            self.get::<PairMap<ReversePair>>("/v2/swap/reverse"),
            self.get::<PairMap<ChainPair>>("/v2/swap/chain"),
        )?;
        Ok(Pairs {
            submarine,
            reverse,
            chain,
        })
    }

    /// Poll fallback for a swap's current status.
    pub async fn get_swap_status(&self, id: &str) -> Result<StatusEvent> {
        let mut event: StatusEvent = self.get(&format!("/v2/swap/{id}")).await?;
        event.id = id.to_string();
        Ok(event)
    }

    pub async fn get_reverse_transaction(&self, id: &str) -> Result<LockupTransaction> {
        self.get(&format!("/v2/swap/reverse/{id}/transaction")).await
    }

    pub async fn get_chain_swap_transactions(&self, id: &str) -> Result<ChainSwapTransactions> {
        self.get(&format!("/v2/swap/chain/{id}/transactions")).await
    }

    /// Lockup transaction of the leg the user funded.
    pub async fn get_lockup_transaction(
        &self,
        id: &str,
        kind: SwapKind,
    ) -> Result<LockupTransaction> {
        match kind {
            SwapKind::Submarine => self.get(&format!("/v2/swap/submarine/{id}/transaction")).await,
            SwapKind::Chain => {
                let txs = self.get_chain_swap_transactions(id).await?;
                Ok(LockupTransaction {
                    id: txs.user_lock.transaction.id,
                    hex: txs.user_lock.transaction.hex.unwrap_or_default(),
                    timeout_block_height: txs.user_lock.timeout.block_height,
                    timeout_eta: txs.user_lock.timeout.eta,
                })
            }
            SwapKind::Reverse => {
                anyhow::bail!("reverse swaps have no user lockup transaction")
            }
        }
    }

    pub async fn get_submarine_claim_details(&self, id: &str) -> Result<SubmarineClaimDetails> {
        self.ensure_cooperative()?;
        self.get(&format!("/v2/swap/submarine/{id}/claim")).await
    }

    pub async fn post_submarine_claim_details(
        &self,
        id: &str,
        pub_nonce: &str,
        partial_signature: &str,
    ) -> Result<()> {
        self.ensure_cooperative()?;
        let _: serde_json::Value = self
            .post(
                &format!("/v2/swap/submarine/{id}/claim"),
                &PartialSignatureRequest {
                    pub_nonce: pub_nonce.to_string(),
                    partial_signature: partial_signature.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn get_chain_claim_details(&self, id: &str) -> Result<ChainClaimDetails> {
        self.ensure_cooperative()?;
        self.get(&format!("/v2/swap/chain/{id}/claim")).await
    }

    /// Submits our signature for the server's chain-swap claim and optionally
    /// asks the server to counter-sign our own claim in the same exchange.
    pub async fn post_chain_claim_details(
        &self,
        id: &str,
        preimage: Option<&str>,
        signature: &PartialSignatureRequest,
        to_sign: Option<&ChainClaimToSign>,
    ) -> Result<Option<PartialSignatureResponse>> {
        self.ensure_cooperative()?;
        let body = json!({
            "preimage": preimage,
            "signature": signature,
            "toSign": to_sign,
        });
        let value: serde_json::Value =
            self.post(&format!("/v2/swap/chain/{id}/claim"), &body).await?;
        if to_sign.is_none() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_value(value).context("decode chain claim partial signature")?,
        ))
    }

    /// Requests a partial refund signature for a submarine or chain swap.
    pub async fn get_partial_refund_signature(
        &self,
        id: &str,
        kind: SwapKind,
        pub_nonce: &str,
        transaction_hex: &str,
        index: u32,
    ) -> Result<PartialSignatureResponse> {
        self.ensure_cooperative()?;
        let endpoint = match kind {
            SwapKind::Submarine => "submarine",
            SwapKind::Chain => "chain",
            SwapKind::Reverse => anyhow::bail!("reverse swaps are not refunded by the payer"),
        };
        self.post(
            &format!("/v2/swap/{endpoint}/{id}/refund"),
            &json!({
                "index": index,
                "pubNonce": pub_nonce,
                "transaction": transaction_hex,
            }),
        )
        .await
    }

    pub async fn get_partial_reverse_claim_signature(
        &self,
        id: &str,
        preimage_hex: &str,
        pub_nonce: &str,
        transaction_hex: &str,
        index: u32,
    ) -> Result<PartialSignatureResponse> {
        self.ensure_cooperative()?;
        self.post(
            &format!("/v2/swap/reverse/{id}/claim"),
            &json!({
                "index": index,
                "preimage": preimage_hex,
                "pubNonce": pub_nonce,
                "transaction": transaction_hex,
            }),
        )
        .await
    }

    /// EIP-style refund signature for contract-ledger swaps; requested with an
    /// empty body on the same refund endpoint.
    pub async fn get_eip_refund_signature(&self, id: &str, kind: SwapKind) -> Result<EipSignature> {
        self.ensure_cooperative()?;
        let endpoint = match kind {
            SwapKind::Submarine => "submarine",
            SwapKind::Chain => "chain",
            SwapKind::Reverse => anyhow::bail!("reverse swaps are not refunded by the payer"),
        };
        self.get(&format!("/v2/swap/{endpoint}/{id}/refund")).await
    }

    pub async fn broadcast_transaction(
        &self,
        asset: &str,
        transaction_hex: &str,
    ) -> Result<BroadcastResponse> {
        self.post(
            &format!("/v2/chain/{asset}/transaction"),
            &json!({ "hex": transaction_hex }),
        )
        .await
    }
}

/// Ordered set of swap-service backends. Index 0 is the primary.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    clients: Vec<ApiClient>,
}

impl BackendRegistry {
    pub fn from_config(config: &Config) -> Self {
        let clients = config
            .backends
            .iter()
            .enumerate()
            .map(|(i, b)| ApiClient::new(b.api_url.clone(), i, config.cooperative_disabled))
            .collect();
        Self { clients }
    }

    pub fn client(&self, backend: usize) -> Result<&ApiClient> {
        self.clients
            .get(backend)
            .with_context(|| format!("backend index {backend} out of range"))
    }

    pub fn primary(&self) -> &ApiClient {
        &self.clients[0]
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Fetches pair tables from every backend in parallel. A backend whose
    /// fetch fails maps to `None` (offline), which is distinct from a backend
    /// that has no entry for a given pair.
    pub async fn get_all_pairs(&self) -> Vec<Option<Pairs>> {
        let fetches = self.clients.iter().map(|client| async move {
            match client.get_pairs().await {
                Ok(pairs) => Some(pairs),
                Err(e) => {
                    tracing::warn!(backend = client.backend(), error = %e, "pair fetch failed");
                    None
                }
            }
        });
        join_all(fetches).await
    }
}
