use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Assets and ledgers a swap leg can settle on. `Lightning` only ever appears
/// as one side of a pair, never as an on-chain leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "L-BTC")]
    Lbtc,
    #[serde(rename = "RBTC")]
    Rbtc,
    #[serde(rename = "LN")]
    Lightning,
}

impl Asset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Lbtc => "L-BTC",
            Asset::Rbtc => "RBTC",
            Asset::Lightning => "LN",
        }
    }

    /// UTXO-based ledgers are the ones this engine claims and refunds itself.
    pub fn is_utxo_based(&self) -> bool {
        matches!(self, Asset::Btc | Asset::Lbtc)
    }

    /// Contract-ledger assets are claimed by an external signer component; the
    /// state machine only records their lockup transactions.
    pub fn is_contract_ledger(&self) -> bool {
        matches!(self, Asset::Rbtc)
    }

    /// The confidential ledger enforces a minimum relay fee and supports
    /// blinded addresses.
    pub fn is_confidential_ledger(&self) -> bool {
        matches!(self, Asset::Lbtc)
    }

    /// Assets for which we help the server claim its chain-swap leg.
    pub fn is_cooperative_claimable(&self) -> bool {
        matches!(self, Asset::Btc | Asset::Lbtc)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Asset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC" => Ok(Asset::Btc),
            "L-BTC" => Ok(Asset::Lbtc),
            "RBTC" => Ok(Asset::Rbtc),
            "LN" => Ok(Asset::Lightning),
            other => anyhow::bail!("unknown asset: {other}"),
        }
    }
}

// Blech32 human-readable parts of confidential Liquid addresses. Unconfidential
// bech32 addresses use "ex"/"tex"/"ert" instead and are noticeably shorter.
const CONFIDENTIAL_HRPS: [&str; 3] = ["lq1", "tlq1", "el1"];

/// Whether a Liquid address carries a blinding key. Only the encoding prefix is
/// inspected; full address validation is the wallet collaborator's job.
pub fn is_confidential_address(address: &str) -> bool {
    let lower = address.to_lowercase();
    CONFIDENTIAL_HRPS.iter().any(|hrp| lower.starts_with(hrp))
}
