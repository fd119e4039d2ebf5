use anyhow::{Context as _, Result};
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};

/// Signer collaborator. Derives per-swap keys by index and never exposes more
/// secret material than a single signing operation requires.
pub trait SwapSigner: Send + Sync {
    /// Key for the swap's 2-of-2 (claim key for reverse/chain, refund key for
    /// submarine/chain lockups).
    fn derive_keypair(&self, index: u32) -> Result<Keypair>;
}

/// Software signer over a BIP32 root key. The wallet hands this engine one in
/// production; tests construct it from a fixed seed.
pub struct SoftwareSigner {
    xprv: Xpriv,
    secp: Secp256k1<bitcoin::secp256k1::All>,
}

impl SoftwareSigner {
    pub fn new(xprv: Xpriv) -> Self {
        Self {
            xprv,
            secp: Secp256k1::new(),
        }
    }

    pub fn from_seed(network: bitcoin::Network, seed: &[u8]) -> Result<Self> {
        let xprv = Xpriv::new_master(network, seed).context("derive master key")?;
        Ok(Self::new(xprv))
    }

    fn derive_secret_key(&self, index: u32) -> Result<SecretKey> {
        let child = ChildNumber::from_normal_idx(index).context("invalid derivation index")?;
        let path = DerivationPath::from(vec![child]);
        let xprv = self
            .xprv
            .derive_priv(&self.secp, &path)
            .context("derive xprv")?;
        Ok(xprv.private_key)
    }
}

impl SwapSigner for SoftwareSigner {
    fn derive_keypair(&self, index: u32) -> Result<Keypair> {
        let secret = self.derive_secret_key(index)?;
        Ok(Keypair::from_secret_key(&self.secp, &secret))
    }
}
