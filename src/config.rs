use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::asset::Asset;

/// One swap-service endpoint. Index 0 is the primary backend; the rest are
/// alternates a swap can be pinned to for its entire lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub alias: String,
    /// Base URL for REST calls, e.g. `https://api.swaps.example`.
    pub api_url: String,
    /// Optional websocket endpoint tried whenever the one derived from
    /// `api_url` is unreachable.
    pub ws_fallback_url: Option<String>,
}

impl BackendConfig {
    /// Realtime status endpoint derived from the REST base URL.
    pub fn ws_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/v2/ws")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Block height the swap contract was deployed at; refund log scans start
    /// there.
    pub deploy_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backends: Vec<BackendConfig>,

    /// Disables the API endpoints that create cooperative signatures for claim
    /// and refund transactions. Should only be set for testing.
    #[serde(default)]
    pub cooperative_disabled: bool,

    /// Public block explorer broadcast endpoints, keyed by asset.
    #[serde(default)]
    pub explorer_broadcast_urls: std::collections::HashMap<Asset, String>,

    /// Contract-ledger parameters, present when RBTC swaps are enabled.
    pub contract: Option<ContractConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        anyhow::ensure!(!config.backends.is_empty(), "config has no backends");
        Ok(config)
    }

    /// Clamps a persisted backend index that is out of bounds (e.g. after a
    /// backend was removed from the registry) back to the primary.
    pub fn sanitize_backend_index(&self, index: usize) -> usize {
        if index >= self.backends.len() { 0 } else { index }
    }

    pub fn backend(&self, index: usize) -> Result<&BackendConfig> {
        self.backends
            .get(index)
            .with_context(|| format!("backend index {index} out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_backends() -> Config {
        Config {
            backends: vec![
                BackendConfig {
                    alias: "primary".into(),
                    api_url: "http://127.0.0.1:9001".into(),
                    ws_fallback_url: None,
                },
                BackendConfig {
                    alias: "alt".into(),
                    api_url: "http://127.0.0.1:9002".into(),
                    ws_fallback_url: Some("ws://127.0.0.1:9003".into()),
                },
            ],
            cooperative_disabled: false,
            explorer_broadcast_urls: Default::default(),
            contract: None,
        }
    }

    #[test]
    fn backend_index_sanitized() {
        let config = two_backends();
        assert_eq!(config.sanitize_backend_index(1), 1);
        assert_eq!(config.sanitize_backend_index(2), 0);
    }
}
