// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2020-2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The boundary between the channel state machine and whatever holds the
//! node's private key material. The state machine never sees a secret key
//! directly; it asks a [`Signer`] to sign a sighash and gets back a
//! signature, which lets the same state machine run against a local
//! in-process key, a hardware wallet, or a remote signing daemon.

use bitcoin::util::sighash::SighashCache;
use bitcoin::{Script, Transaction};
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;

use crate::ids::ChannelId;

/// Errors a [`Signer`] implementation may return. Distinct from
/// [`crate::error::ChannelError::SignerError`], which is what these get
/// wrapped into once they reach the state machine.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SignerError {
    /// signer has no key material for channel {0}
    UnknownChannel(ChannelId),

    /// signer refused the request: {0}
    Refused(String),
}

/// Signs transactions on behalf of one channel. Implementations are
/// expected to re-derive the requested private key from the channel's
/// `KeySource` rather than have it handed to them.
pub trait Signer {
    /// Signs the commitment transaction input, a P2WSH spend of the
    /// 2-of-2 funding script.
    fn sign_commitment(
        &self,
        channel_id: ChannelId,
        tx: &Transaction,
        funding_script: &Script,
        funding_value_sat: u64,
    ) -> Result<Signature, SignerError>;

    /// Signs an HTLC-timeout or HTLC-success transaction input, a P2WSH
    /// spend of an offered/received-HTLC script.
    fn sign_htlc_tx(
        &self,
        channel_id: ChannelId,
        tx: &Transaction,
        htlc_script: &Script,
        htlc_value_sat: u64,
        per_commitment_point: PublicKey,
    ) -> Result<Signature, SignerError>;

    /// Reveals the per-commitment secret at `index`, used in
    /// `revoke_and_ack`. Implementations should refuse to reveal a secret
    /// for a commitment still in use as the current one.
    fn release_commitment_secret(
        &self,
        channel_id: ChannelId,
        index: u64,
    ) -> Result<[u8; 32], SignerError>;

    /// Produces the per-commitment point two commitments ahead of `index`,
    /// as required when sending `revoke_and_ack` (BOLT-2: the point
    /// revealed must be for `index + 2`, not `index + 1`).
    fn next_per_commitment_point(
        &self,
        channel_id: ChannelId,
        index: u64,
    ) -> Result<PublicKey, SignerError>;

    /// Signs a transaction claiming a CSV-delayed output owned by us: our
    /// `to_local` output, or the output of an HTLC-timeout/HTLC-success
    /// transaction we broadcast ourselves. The signer re-derives the
    /// delayed-payment privkey by tweaking its basepoint with
    /// `per_commitment_point`.
    fn sign_delayed_claim(
        &self,
        channel_id: ChannelId,
        tx: &Transaction,
        input_index: usize,
        witness_script: &Script,
        value_sat: u64,
        per_commitment_point: PublicKey,
    ) -> Result<Signature, SignerError>;

    /// Signs a penalty (a.k.a. "justice") transaction spending an output of
    /// a revoked commitment via the revocation key path: our own
    /// `to_local`, the counterparty's `to_local`, an HTLC output, or a
    /// CSV-delayed HTLC-timeout/HTLC-success output they published on top
    /// of it. The signer re-derives the revocation privkey from its own
    /// revocation basepoint secret and the counterparty's leaked
    /// per-commitment secret; it never leaves the signer.
    fn sign_penalty_claim(
        &self,
        channel_id: ChannelId,
        tx: &Transaction,
        input_index: usize,
        witness_script: &Script,
        value_sat: u64,
        revoked_per_commitment_secret: [u8; 32],
    ) -> Result<Signature, SignerError>;

    /// Signs a transaction claiming an `option_static_remotekey` /
    /// `option_anchors` `to_remote` output. Unlike [`Signer::sign_delayed_claim`]
    /// this key is never tweaked by a per-commitment point, which is the
    /// entire point of the static variant: we can claim it without tracking
    /// the counterparty's revealed per-commitment data.
    fn sign_static_remote_claim(
        &self,
        channel_id: ChannelId,
        tx: &Transaction,
        input_index: usize,
        witness_script: &Script,
        value_sat: u64,
    ) -> Result<Signature, SignerError>;

    /// Signs a transaction claiming an `option_anchors` CPFP-anchor output
    /// via the immediate key path. Like [`Signer::sign_static_remote_claim`]
    /// this signs with the bare funding privkey, untweaked by any
    /// per-commitment point.
    fn sign_anchor_claim(
        &self,
        channel_id: ChannelId,
        tx: &Transaction,
        input_index: usize,
        witness_script: &Script,
        value_sat: u64,
    ) -> Result<Signature, SignerError>;
}

/// Verifies a signature against a P2WSH sighash, given the script and the
/// public key expected to have produced it. Verification needs no secret
/// material, so unlike signing it is not an opaque [`Signer`] operation —
/// any caller holding the peer's pubkey can perform it directly.
pub fn verify_witness_signature<C: secp256k1::Verification>(
    secp: &secp256k1::Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    witness_script: &Script,
    value_sat: u64,
    pubkey: PublicKey,
    signature: Signature,
) -> Result<(), secp256k1::Error> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .segwit_signature_hash(
            input_index,
            witness_script,
            value_sat,
            bitcoin::EcdsaSighashType::All,
        )
        .expect("input_index is always within the transaction's inputs");
    let message = secp256k1::Message::from_slice(&sighash[..])
        .expect("sighash is always 32 bytes");
    secp.verify_ecdsa(&message, &signature, &pubkey)
}
