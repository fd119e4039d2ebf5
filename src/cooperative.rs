//! Cooperative MuSig2 signing with the swap service.
//!
//! Taproot swaps carry a 2-of-2 aggregate of our key and the server's in the
//! key path. Claims and refunds normally spend through it: both sides exchange
//! public nonces, each produces a partial signature over the transaction
//! digest, and the aggregate is a single Schnorr signature. The script-path
//! leaves stay as the unilateral fallback.

use std::str::FromStr as _;

use anyhow::{Context as _, Result, anyhow};
use bitcoin::ScriptBuf;
use bitcoin::hashes::{Hash as _, sha256};
use secp256k1::rand;
use bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash, TapTweakHash};
use lightning_invoice::Bolt11Invoice;
use secp256k1::musig::{
    AggregatedNonce, KeyAggCache, PartialSignature, PublicNonce, SecretNonce, Session,
    SessionSecretRand, new_nonce_pair,
};
use secp256k1::{Keypair, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::api::ApiClient;
use crate::api::types::{ChainClaimToSign, PartialSignatureRequest};
use crate::signer::SwapSigner;
use crate::swap::{ChainSwap, ReverseSwap, SubmarineSwap, Swap, SwapTree, SwapTreeLeaf};

fn invoice_payment_hash(invoice: &str) -> Result<[u8; 32]> {
    let invoice = Bolt11Invoice::from_str(invoice)
        .map_err(|e| anyhow!("parse BOLT11 invoice: {e:?}"))?;
    Ok(invoice.payment_hash().to_byte_array())
}

fn parse_public_key(hex_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_key).context("decode public key hex")?;
    PublicKey::from_slice(&bytes).context("parse public key")
}

fn parse_digest(hex_digest: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_digest).context("decode digest hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("transaction digest must be 32 bytes"))
}

fn parse_public_nonce(hex_nonce: &str) -> Result<PublicNonce> {
    let bytes = hex::decode(hex_nonce).context("decode public nonce hex")?;
    let bytes: [u8; 66] = bytes
        .try_into()
        .map_err(|_| anyhow!("public nonce must be 66 bytes"))?;
    PublicNonce::from_byte_array(&bytes).map_err(|e| anyhow!("parse public nonce: {e}"))
}

fn parse_partial_signature(hex_sig: &str) -> Result<PartialSignature> {
    let bytes = hex::decode(hex_sig).context("decode partial signature hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("partial signature must be 32 bytes"))?;
    PartialSignature::from_byte_array(&bytes).map_err(|e| anyhow!("parse partial signature: {e}"))
}

fn leaf_hash(leaf: &SwapTreeLeaf) -> Result<TapNodeHash> {
    let script = ScriptBuf::from_hex(&leaf.output).context("decode swap tree leaf script")?;
    let version = LeafVersion::from_consensus(leaf.version)
        .map_err(|e| anyhow!("swap tree leaf version: {e}"))?;
    Ok(TapNodeHash::from(TapLeafHash::from_script(&script, version)))
}

/// The taproot tweak committing the aggregate key to the swap tree, applied to
/// the key aggregation so key-path signatures spend the actual output key.
pub fn swap_tree_tweak(internal_key: &secp256k1::XOnlyPublicKey, tree: &SwapTree) -> Result<Scalar> {
    let root = TapNodeHash::from_node_hashes(leaf_hash(&tree.claim_leaf)?, leaf_hash(&tree.refund_leaf)?);
    let internal = bitcoin::XOnlyPublicKey::from_slice(&internal_key.serialize())
        .context("convert aggregate key")?;
    let tweak = TapTweakHash::from_key_and_tweak(internal, Some(root));
    Scalar::from_be_bytes(tweak.to_byte_array()).map_err(|_| anyhow!("taproot tweak out of range"))
}

/// One two-party signing session over a single transaction digest. Nonces are
/// generated once at construction and the session is consumed by signing, so a
/// secret nonce can never be reused.
pub struct MusigSession {
    secp: Secp256k1<secp256k1::All>,
    keypair: Keypair,
    their_public_key: PublicKey,
    cache: KeyAggCache,
    sec_nonce: SecretNonce,
    pub_nonce: PublicNonce,
    digest: [u8; 32],
}

impl MusigSession {
    /// Keys aggregate in wire order: ours first, the server's second.
    pub fn new(
        our_keypair: &bitcoin::secp256k1::Keypair,
        their_public_key: &str,
        tree: Option<&SwapTree>,
        digest: [u8; 32],
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret =
            SecretKey::from_byte_array(our_keypair.secret_bytes()).context("convert signing key")?;
        let keypair = Keypair::from_secret_key(&secret);
        let our_public_key = keypair.public_key();
        let their_public_key = parse_public_key(their_public_key)?;

        let mut cache = KeyAggCache::new(&[&our_public_key, &their_public_key]);
        if let Some(tree) = tree {
            let tweak = swap_tree_tweak(&cache.agg_pk(), tree)?;
            cache
                .pubkey_xonly_tweak_add(&tweak)
                .map_err(|e| anyhow!("apply taproot tweak: {e}"))?;
        }

        let session_rand = SessionSecretRand::from_rng(&mut rand::thread_rng());
        let (sec_nonce, pub_nonce) = new_nonce_pair(
            session_rand,
            Some(&cache),
            Some(keypair.secret_key()),
            our_public_key,
            Some(&digest),
            None,
        );

        Ok(Self {
            secp,
            keypair,
            their_public_key,
            cache,
            sec_nonce,
            pub_nonce,
            digest,
        })
    }

    pub fn pub_nonce_hex(&self) -> String {
        hex::encode(self.pub_nonce.serialize())
    }

    /// Our half of a signature over the counterparty's transaction. The
    /// counterparty aggregates; we only hand out nonce and partial.
    pub fn partial_sign(self, their_pub_nonce: &str) -> Result<PartialSignatureRequest> {
        let our_nonce_hex = self.pub_nonce_hex();
        let their_nonce = parse_public_nonce(their_pub_nonce)?;
        let agg_nonce = AggregatedNonce::new(&[&self.pub_nonce, &their_nonce]);
        let session = Session::new(&self.cache, agg_nonce, &self.digest);
        let partial = session.partial_sign(self.sec_nonce, &self.keypair, &self.cache);
        Ok(PartialSignatureRequest {
            pub_nonce: our_nonce_hex,
            partial_signature: hex::encode(partial.serialize()),
        })
    }

    /// Completes a signature over our own transaction: verifies the server's
    /// partial, adds ours, and returns the aggregate Schnorr signature.
    pub fn complete(self, their_pub_nonce: &str, their_partial: &str) -> Result<[u8; 64]> {
        let their_nonce = parse_public_nonce(their_pub_nonce)?;
        let their_partial = parse_partial_signature(their_partial)?;

        let agg_nonce = AggregatedNonce::new(&[&self.pub_nonce, &their_nonce]);
        let session = Session::new(&self.cache, agg_nonce, &self.digest);

        anyhow::ensure!(
            session.partial_verify(
                &self.cache,
                &their_partial,
                &their_nonce,
                self.their_public_key,
            ),
            "counterparty partial signature does not verify"
        );

        let our_partial = session.partial_sign(self.sec_nonce, &self.keypair, &self.cache);
        let aggregated = session.partial_sig_agg(&[&our_partial, &their_partial]);
        anyhow::ensure!(
            aggregated
                .verify(&self.cache.agg_pk(), &self.digest)
                .is_ok(),
            "aggregated signature does not verify"
        );
        Ok(*aggregated.assume_valid().as_byte_array())
    }
}

/// Countersigns the server's claim of a submarine lockup after it revealed the
/// preimage, letting it sweep via key path. The preimage is checked against
/// the invoice payment hash before anything is signed.
pub async fn sign_submarine_claim(
    api: &ApiClient,
    signer: &dyn SwapSigner,
    swap: &SubmarineSwap,
) -> Result<()> {
    let details = api.get_submarine_claim_details(&swap.base.id).await?;

    let preimage = hex::decode(&details.preimage).context("decode preimage hex")?;
    let preimage_hash = sha256::Hash::hash(&preimage).to_byte_array();
    let payment_hash = invoice_payment_hash(&swap.invoice)?;
    anyhow::ensure!(
        preimage_hash == payment_hash,
        "preimage does not match invoice payment hash"
    );

    let keypair = signer.derive_keypair(swap.base.key_index)?;
    let session = MusigSession::new(
        &keypair,
        &swap.claim_public_key,
        Some(&swap.swap_tree),
        parse_digest(&details.transaction_hash)?,
    )?;
    let signature = session.partial_sign(&details.pub_nonce)?;
    api.post_submarine_claim_details(
        &swap.base.id,
        &signature.pub_nonce,
        &signature.partial_signature,
    )
    .await
}

/// Gives the server our partial signature for its claim of a chain swap
/// without asking for anything back.
pub async fn assist_chain_claim(
    api: &ApiClient,
    signer: &dyn SwapSigner,
    swap: &ChainSwap,
) -> Result<()> {
    let details = api.get_chain_claim_details(&swap.base.id).await?;
    let keypair = signer.derive_keypair(swap.base.key_index)?;
    let session = MusigSession::new(
        &keypair,
        &details.public_key,
        Some(&swap.lockup_details.swap_tree),
        parse_digest(&details.transaction_hash)?,
    )?;
    let signature = session.partial_sign(&details.pub_nonce)?;
    api.post_chain_claim_details(&swap.base.id, Some(&swap.preimage), &signature, None)
        .await?;
    Ok(())
}

/// Full chain-swap claim exchange: we sign the server's claim and it
/// countersigns ours in the same round trip.
pub async fn sign_chain_claim(
    api: &ApiClient,
    signer: &dyn SwapSigner,
    swap: &ChainSwap,
    claim_tx_hex: &str,
    digest: [u8; 32],
    input_index: u32,
) -> Result<[u8; 64]> {
    let details = api.get_chain_claim_details(&swap.base.id).await?;
    let keypair = signer.derive_keypair(swap.base.key_index)?;

    let their_session = MusigSession::new(
        &keypair,
        &details.public_key,
        Some(&swap.lockup_details.swap_tree),
        parse_digest(&details.transaction_hash)?,
    )?;
    let for_server = their_session.partial_sign(&details.pub_nonce)?;

    let our_session = MusigSession::new(
        &keypair,
        &swap.claim_details.server_public_key,
        Some(&swap.claim_details.swap_tree),
        digest,
    )?;
    let to_sign = ChainClaimToSign {
        pub_nonce: our_session.pub_nonce_hex(),
        transaction: claim_tx_hex.to_string(),
        index: input_index,
    };
    let response = api
        .post_chain_claim_details(&swap.base.id, Some(&swap.preimage), &for_server, Some(&to_sign))
        .await?
        .context("server returned no partial signature")?;
    our_session.complete(&response.pub_nonce, &response.partial_signature)
}

/// Key-path signature for a reverse swap claim transaction.
pub async fn sign_reverse_claim(
    api: &ApiClient,
    signer: &dyn SwapSigner,
    swap: &ReverseSwap,
    claim_tx_hex: &str,
    digest: [u8; 32],
    input_index: u32,
) -> Result<[u8; 64]> {
    let keypair = signer.derive_keypair(swap.base.key_index)?;
    let session = MusigSession::new(
        &keypair,
        &swap.refund_public_key,
        Some(&swap.swap_tree),
        digest,
    )?;
    let response = api
        .get_partial_reverse_claim_signature(
            &swap.base.id,
            &swap.preimage,
            &session.pub_nonce_hex(),
            claim_tx_hex,
            input_index,
        )
        .await?;
    session.complete(&response.pub_nonce, &response.partial_signature)
}

/// Key-path signature for a submarine or chain refund transaction.
pub async fn sign_refund(
    api: &ApiClient,
    signer: &dyn SwapSigner,
    swap: &Swap,
    refund_tx_hex: &str,
    digest: [u8; 32],
    input_index: u32,
) -> Result<[u8; 64]> {
    let (their_key, tree) = match swap {
        Swap::Submarine(s) => (s.claim_public_key.as_str(), &s.swap_tree),
        Swap::Chain(s) => (
            s.lockup_details.server_public_key.as_str(),
            &s.lockup_details.swap_tree,
        ),
        Swap::Reverse(_) => anyhow::bail!("reverse swaps are not refunded by the payer"),
    };
    let keypair = signer.derive_keypair(swap.base().key_index)?;
    let session = MusigSession::new(&keypair, their_key, Some(tree), digest)?;
    let response = api
        .get_partial_refund_signature(
            swap.id(),
            swap.kind(),
            &session.pub_nonce_hex(),
            refund_tx_hex,
            input_index,
        )
        .await?;
    session.complete(&response.pub_nonce, &response.partial_signature)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundPath {
    /// Before the timeout only the 2-of-2 key path can spend.
    Cooperative,
    /// Past the timeout the refund leaf spends unilaterally; no server
    /// round trip is needed or attempted.
    Unilateral,
}

pub fn refund_path(swap: &Swap, current_height: u32) -> Result<RefundPath> {
    let timeout = swap.timeout_block_height()?;
    Ok(if current_height >= timeout {
        RefundPath::Unilateral
    } else {
        RefundPath::Cooperative
    })
}

/// How the refund transaction gets its witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundSignature {
    /// Aggregate key-path signature from the cooperative exchange.
    Cooperative([u8; 64]),
    /// Past the timeout the refund leaf spends with our key alone; the
    /// transaction builder signs the script path itself.
    Unilateral,
}

/// Obtains the signature for a refund transaction at the current chain tip.
/// Once the timeout has passed the server is never contacted.
pub async fn refund_signature(
    api: &ApiClient,
    signer: &dyn SwapSigner,
    swap: &Swap,
    current_height: u32,
    refund_tx_hex: &str,
    digest: [u8; 32],
    input_index: u32,
) -> Result<RefundSignature> {
    match refund_path(swap, current_height)? {
        RefundPath::Unilateral => Ok(RefundSignature::Unilateral),
        RefundPath::Cooperative => {
            let signature =
                sign_refund(api, signer, swap, refund_tx_hex, digest, input_index).await?;
            Ok(RefundSignature::Cooperative(signature))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::SwapTreeLeaf;

    fn keypair(byte: u8) -> bitcoin::secp256k1::Keypair {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let secret = bitcoin::secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        bitcoin::secp256k1::Keypair::from_secret_key(&secp, &secret)
    }

    fn sample_tree() -> SwapTree {
        SwapTree {
            claim_leaf: SwapTreeLeaf {
                output: "51".to_string(),
                version: 192,
            },
            refund_leaf: SwapTreeLeaf {
                output: "52".to_string(),
                version: 192,
            },
        }
    }

    // Plays the server side with the raw musig primitives, using the same
    // key order the session uses.
    struct Counterparty {
        secp: Secp256k1<secp256k1::All>,
        keypair: Keypair,
        cache: KeyAggCache,
        sec_nonce: SecretNonce,
        pub_nonce: PublicNonce,
        digest: [u8; 32],
    }

    impl Counterparty {
        fn new(
            server: &bitcoin::secp256k1::Keypair,
            client_pub: PublicKey,
            tree: Option<&SwapTree>,
            digest: [u8; 32],
        ) -> Self {
            let secp = Secp256k1::new();
            let secret = SecretKey::from_byte_array(server.secret_bytes()).unwrap();
            let keypair = Keypair::from_secret_key(&secret);
            let mut cache = KeyAggCache::new(&[&client_pub, &keypair.public_key()]);
            if let Some(tree) = tree {
                let tweak = swap_tree_tweak(&cache.agg_pk(), tree).unwrap();
                cache.pubkey_xonly_tweak_add(&tweak).unwrap();
            }
            let (sec_nonce, pub_nonce) = new_nonce_pair(
                SessionSecretRand::from_rng(&mut rand::thread_rng()),
                Some(&cache),
                Some(keypair.secret_key()),
                keypair.public_key(),
                Some(&digest),
                None,
            );
            Self {
                secp,
                keypair,
                cache,
                sec_nonce,
                pub_nonce,
                digest,
            }
        }

        fn partial_sign(self, client_nonce_hex: &str) -> (String, String) {
            let client_nonce = parse_public_nonce(client_nonce_hex).unwrap();
            let agg_nonce = AggregatedNonce::new(&[&client_nonce, &self.pub_nonce]);
            let session = Session::new(&self.cache, agg_nonce, &self.digest);
            let partial = session.partial_sign(self.sec_nonce, &self.keypair, &self.cache);
            (
                hex::encode(self.pub_nonce.serialize()),
                hex::encode(partial.serialize()),
            )
        }
    }

    #[test]
    fn two_party_signature_completes() {
        let client = keypair(3);
        let server = keypair(4);
        let server_pub_hex = hex::encode(server.public_key().serialize());
        let digest = [9u8; 32];

        let session = MusigSession::new(&client, &server_pub_hex, None, digest).unwrap();
        let client_pub = PublicKey::from_slice(&client.public_key().serialize()).unwrap();

        let counterparty = Counterparty::new(&server, client_pub, None, digest);
        let (server_nonce, server_partial) = counterparty.partial_sign(&session.pub_nonce_hex());

        let signature = session.complete(&server_nonce, &server_partial).unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn tweaked_session_signs_for_the_output_key() {
        let client = keypair(5);
        let server = keypair(6);
        let server_pub_hex = hex::encode(server.public_key().serialize());
        let tree = sample_tree();
        let digest = [7u8; 32];

        let session =
            MusigSession::new(&client, &server_pub_hex, Some(&tree), digest).unwrap();
        let client_pub = PublicKey::from_slice(&client.public_key().serialize()).unwrap();

        let counterparty = Counterparty::new(&server, client_pub, Some(&tree), digest);
        let (server_nonce, server_partial) = counterparty.partial_sign(&session.pub_nonce_hex());
        assert!(session.complete(&server_nonce, &server_partial).is_ok());
    }

    #[test]
    fn rejects_garbage_nonce() {
        let client = keypair(8);
        let server = keypair(9);
        let server_pub_hex = hex::encode(server.public_key().serialize());

        let session = MusigSession::new(&client, &server_pub_hex, None, [1u8; 32]).unwrap();
        assert!(session.partial_sign("beef").is_err());
    }

    #[test]
    fn refund_path_flips_at_timeout() {
        let swap = crate::swap::tests_support::sample_submarine(120);
        assert_eq!(refund_path(&swap, 119).unwrap(), RefundPath::Cooperative);
        assert_eq!(refund_path(&swap, 120).unwrap(), RefundPath::Unilateral);
    }

    #[test]
    fn extracts_the_payment_hash_from_an_invoice() {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let key = bitcoin::secp256k1::SecretKey::from_slice(&[11u8; 32]).unwrap();
        let payment_hash = sha256::Hash::hash(&[1u8; 32]);

        let invoice = lightning_invoice::InvoiceBuilder::new(lightning_invoice::Currency::Regtest)
            .description("swap".to_string())
            .payment_hash(payment_hash)
            .payment_secret(lightning_invoice::PaymentSecret([42u8; 32]))
            .duration_since_epoch(std::time::Duration::from_secs(1_700_000_000))
            .min_final_cltv_expiry_delta(80)
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &key))
            .unwrap();

        assert_eq!(
            invoice_payment_hash(&invoice.to_string()).unwrap(),
            payment_hash.to_byte_array()
        );
        assert!(invoice_payment_hash("lnbc1garbage").is_err());
    }
}
