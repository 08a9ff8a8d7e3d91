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

//! Closing & Penalty Logic: recognizing which commitment (ours, theirs, or a
//! revoked one) the funding output was spent by, and building the claim or
//! penalty transactions needed to recover every output we are entitled to.
//!
//! Every builder here takes the relevant slice of [`Commitments`] and keys by
//! value/reference and returns a plain [`Vec<Effect>`] for the caller to
//! publish and watch; nothing in this module performs I/O or blocks waiting
//! for a confirmation. Multi-stage claims (the second-stage HTLC transaction
//! confirming before its own CSV-delayed output can be swept, or the
//! counterparty publishing a second-stage transaction on top of a revoked
//! commitment) are separate entry points the caller invokes again once the
//! triggering confirmation or watch event arrives.

use bitcoin::{EcdsaSighashType, OutPoint, Script, Transaction, TxIn, TxOut};
use secp256k1::ecdsa::Signature;
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};

use amplify::Wrapper;

use crate::commitment::{scripts, Commitments, HtlcInfo};
use crate::error::ChannelError;
use crate::fsm::{ConfirmationTarget, Effect};
use crate::ids::{HashLock, HashPreimage};
use crate::keys::shachain::ShachainConsumer;
use crate::keys::{self, derive_pubkey, derive_revocation_pubkey, LocalKeyset, RemoteKeyset};
use crate::signer::Signer;

/// Approximate weight of a one-input-one-output transaction sweeping a
/// CSV-delayed `to_local` or HTLC-second-stage output.
const DELAYED_CLAIM_TX_WEIGHT: u64 = 483;

/// Approximate weight of a one-input-one-output penalty transaction spending
/// via the revocation key path.
const PENALTY_CLAIM_TX_WEIGHT: u64 = 483;

/// Approximate weight of a one-input-one-output transaction claiming an
/// `option_static_remotekey`/anchor `to_remote` output.
const STATIC_REMOTE_CLAIM_TX_WEIGHT: u64 = 270;

/// Approximate weight of a one-input-one-output transaction directly
/// claiming an HTLC output off a counterparty's broadcast commitment,
/// without a second-stage transaction.
const DIRECT_HTLC_CLAIM_TX_WEIGHT: u64 = 327;

/// Approximate weight of a one-input-one-output transaction claiming an
/// `option_anchors` CPFP-anchor output via the immediate key path (a single
/// signature, no delay or revocation branch).
const ANCHOR_CLAIM_TX_WEIGHT: u64 = 222;

fn claim_fee(weight: u64, feerate_per_kw: u32) -> u64 {
    weight * feerate_per_kw as u64 / 1000
}

fn der_sig(sig: Signature) -> Vec<u8> {
    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(EcdsaSighashType::All.to_u32() as u8);
    bytes
}

fn preimage_bytes(preimage: HashPreimage) -> Vec<u8> {
    preimage.as_inner().as_inner().to_vec()
}

fn map_signer_err(e: crate::signer::SignerError) -> ChannelError {
    ChannelError::SignerError(e.to_string())
}

/// What a transaction spending the funding output turned out to be.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FundingSpend {
    /// Our own most recently signed commitment.
    LocalCommit,
    /// The remote's current commitment, i.e. the last one it has fully
    /// revoked its predecessor for.
    RemoteCommit,
    /// The remote's *next* commitment: one we have sent a `commit_sig` for
    /// but the remote has not yet revoked its current commitment in favor
    /// of, so both are still live and either may appear on-chain.
    RemoteCommitNext,
    /// A commitment we no longer hold directly but can recognize from its
    /// obscured commitment number, and for which we hold (or can derive) the
    /// revealed per-commitment secret.
    Revoked { commitment_number: u64 },
    /// Matches none of the above; most likely an unrelated spend of the
    /// funding output, such as a splice.
    Unrecognized,
}

/// Classifies a transaction that spent the channel's funding output.
pub fn classify_funding_spend(
    commitments: &Commitments,
    shachain: &ShachainConsumer,
    obscuring_factor: u64,
    tx: &Transaction,
) -> FundingSpend {
    let txid = tx.txid();
    if txid == commitments.local_commit.commitment.tx.txid() {
        return FundingSpend::LocalCommit;
    }
    if txid == commitments.remote_commit.commitment.tx.txid() {
        return FundingSpend::RemoteCommit;
    }
    if let Some(pending) = commitments.remote_next_commit_info.pending_commitment() {
        if txid == pending.tx.txid() {
            return FundingSpend::RemoteCommitNext;
        }
    }

    let sequence = tx.input.first().map(|input| input.sequence).unwrap_or(0);
    let commitment_number =
        keys::reconstruct_commitment_number(tx.lock_time, sequence, obscuring_factor);
    if shachain.get(commitment_number).is_some() {
        FundingSpend::Revoked { commitment_number }
    } else {
        FundingSpend::Unrecognized
    }
}

/// Builds a one-input-one-output transaction spending `outpoint` (worth
/// `input_value_sat`) into `sweep_scriptpubkey`, net of an estimated fee at
/// `feerate_per_kw`. Returns `None` if the output would be dust.
fn build_claim_tx(
    outpoint: OutPoint,
    input_value_sat: u64,
    sequence: u32,
    lock_time: u32,
    weight: u64,
    feerate_per_kw: u32,
    dust_limit_sat: u64,
    sweep_scriptpubkey: &Script,
) -> Option<Transaction> {
    let fee = claim_fee(weight, feerate_per_kw);
    let value = input_value_sat.saturating_sub(fee);
    if value <= dust_limit_sat {
        return None;
    }
    Some(Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: Script::new(),
            sequence,
            witness: Vec::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: sweep_scriptpubkey.clone(),
        }],
    })
}

fn find_output(tx: &Transaction, script_pubkey: &Script) -> Option<(u32, u64)> {
    tx.output
        .iter()
        .enumerate()
        .find(|(_, out)| &out.script_pubkey == script_pubkey)
        .map(|(index, out)| (index as u32, out.value))
}

/// Publishes our own commitment transaction and every claim reachable from
/// it without further negotiation: the CSV-delayed `to_local` output, the
/// anchor (if negotiated), and the second-stage HTLC-timeout/HTLC-success
/// transactions for HTLCs we can already settle (we always hold both
/// signatures for our own HTLC transactions; a received HTLC additionally
/// needs its preimage, supplied by `preimage_for`).
///
/// Third-stage sweeps of a confirmed HTLC transaction's own CSV-delayed
/// output are not built here: the caller invokes
/// [`claim_delayed_second_stage_output`] again once that transaction
/// confirms.
#[allow(clippy::too_many_arguments)]
pub fn local_force_close<C: Verification>(
    secp: &Secp256k1<C>,
    signer: &impl Signer,
    commitments: &Commitments,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    feerate_per_kw: u32,
    dust_limit_sat: u64,
    sweep_scriptpubkey: &Script,
    preimage_for: impl Fn(HashLock) -> Option<HashPreimage>,
) -> Result<Vec<Effect>, ChannelError> {
    let channel_id = commitments.params.channel_id;
    let commitment = &commitments.local_commit.commitment;
    let per_commitment_point = commitments.local_per_commitment_point;
    let to_self_delay = commitments.params.local_params.to_self_delay;

    let mut effects = vec![
        Effect::PublishTx {
            tx: commitment.tx.clone(),
            target: ConfirmationTarget::Medium,
        },
        Effect::WatchTxConfirmed(commitment.tx.txid()),
    ];

    let revocationpubkey =
        derive_revocation_pubkey(secp, remote.revocation_basepoint, per_commitment_point);
    let delayedpubkey =
        derive_pubkey(secp, local.delayed_payment_basepoint.key, per_commitment_point);
    let to_local_script =
        scripts::to_local_script(revocationpubkey, delayedpubkey, to_self_delay).to_v0_p2wsh();

    if let Some((index, value)) = find_output(&commitment.tx, &to_local_script) {
        let outpoint = OutPoint::new(commitment.tx.txid(), index);
        if let Some(mut claim_tx) = build_claim_tx(
            outpoint,
            value,
            to_self_delay as u32,
            0,
            DELAYED_CLAIM_TX_WEIGHT,
            feerate_per_kw,
            dust_limit_sat,
            sweep_scriptpubkey,
        ) {
            let sig = signer
                .sign_delayed_claim(
                    channel_id,
                    &claim_tx,
                    0,
                    &scripts::to_local_script(revocationpubkey, delayedpubkey, to_self_delay),
                    value,
                    per_commitment_point,
                )
                .map_err(map_signer_err)?;
            claim_tx.input[0].witness = vec![der_sig(sig), Vec::new()];
            effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
            effects.push(Effect::PublishTx {
                tx: claim_tx,
                target: ConfirmationTarget::Low,
            });
        }
    }

    if commitments.anchor_outputs {
        let anchor_script = scripts::anchor_script(local.funding_pubkey.key).to_v0_p2wsh();
        if let Some((index, value)) = find_output(&commitment.tx, &anchor_script) {
            let outpoint = OutPoint::new(commitment.tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                0,
                0,
                ANCHOR_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let witness_script = scripts::anchor_script(local.funding_pubkey.key);
                let sig = signer
                    .sign_anchor_claim(channel_id, &claim_tx, 0, &witness_script, value)
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig)];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::Low,
                });
            }
        }
    }

    let owner_htlcpubkey = derive_pubkey(secp, local.htlc_basepoint.key, per_commitment_point);
    let counterparty_htlcpubkey =
        derive_pubkey(secp, remote.htlc_basepoint, per_commitment_point);

    for (index_in_list, (htlc, htlc_tx)) in commitment.htlc_txs.iter().enumerate() {
        let remote_sig = match commitments.local_commit.htlc_sigs.get(index_in_list) {
            Some(sig) => *sig,
            None => continue,
        };

        let htlc_script = if htlc.offered_by_owner {
            scripts::offered_htlc_script(
                revocationpubkey,
                owner_htlcpubkey,
                counterparty_htlcpubkey,
                htlc.payment_hash,
            )
        } else {
            scripts::received_htlc_script(
                revocationpubkey,
                owner_htlcpubkey,
                counterparty_htlcpubkey,
                htlc.cltv_expiry,
                htlc.payment_hash,
            )
        };

        let preimage = if htlc.offered_by_owner {
            None
        } else {
            match preimage_for(htlc.payment_hash) {
                Some(preimage) => Some(preimage),
                None => continue,
            }
        };

        let our_sig = signer
            .sign_htlc_tx(
                channel_id,
                htlc_tx,
                &htlc_script,
                htlc.amount_msat / 1000,
                per_commitment_point,
            )
            .map_err(map_signer_err)?;

        let mut signed_tx = htlc_tx.clone();
        signed_tx.input[0].witness = match preimage {
            Some(preimage) => vec![
                Vec::new(),
                der_sig(remote_sig),
                der_sig(our_sig),
                preimage_bytes(preimage),
            ],
            None => vec![Vec::new(), der_sig(remote_sig), der_sig(our_sig), Vec::new()],
        };

        let target = if htlc.offered_by_owner {
            ConfirmationTarget::Absolute(htlc.cltv_expiry)
        } else {
            ConfirmationTarget::High
        };
        effects.push(Effect::WatchTxConfirmed(signed_tx.txid()));
        effects.push(Effect::PublishTx {
            tx: signed_tx,
            target,
        });
    }

    Ok(effects)
}

/// Sweeps the CSV-delayed output of one of our own second-stage HTLC
/// transactions, once it has confirmed and `to_self_delay` has passed.
#[allow(clippy::too_many_arguments)]
pub fn claim_delayed_second_stage_output<C: Verification>(
    secp: &Secp256k1<C>,
    signer: &impl Signer,
    commitments: &Commitments,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    confirmed_htlc_tx: &Transaction,
    feerate_per_kw: u32,
    dust_limit_sat: u64,
    sweep_scriptpubkey: &Script,
) -> Result<Vec<Effect>, ChannelError> {
    let channel_id = commitments.params.channel_id;
    let per_commitment_point = commitments.local_per_commitment_point;
    let to_self_delay = commitments.params.local_params.to_self_delay;

    let revocationpubkey =
        derive_revocation_pubkey(secp, remote.revocation_basepoint, per_commitment_point);
    let delayedpubkey =
        derive_pubkey(secp, local.delayed_payment_basepoint.key, per_commitment_point);
    let witness_script = scripts::htlc_second_stage_script(revocationpubkey, delayedpubkey, to_self_delay);

    let value = confirmed_htlc_tx
        .output
        .first()
        .map(|out| out.value)
        .ok_or(ChannelError::UnrecognizedSpendingTransaction)?;
    let outpoint = OutPoint::new(confirmed_htlc_tx.txid(), 0);

    let mut effects = Vec::new();
    if let Some(mut claim_tx) = build_claim_tx(
        outpoint,
        value,
        to_self_delay as u32,
        0,
        DELAYED_CLAIM_TX_WEIGHT,
        feerate_per_kw,
        dust_limit_sat,
        sweep_scriptpubkey,
    ) {
        let sig = signer
            .sign_delayed_claim(channel_id, &claim_tx, 0, &witness_script, value, per_commitment_point)
            .map_err(map_signer_err)?;
        claim_tx.input[0].witness = vec![der_sig(sig), Vec::new()];
        effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
        effects.push(Effect::PublishTx {
            tx: claim_tx,
            target: ConfirmationTarget::Low,
        });
    }
    Ok(effects)
}

/// Claims everything reachable without a CSV wait off the remote's broadcast
/// commitment: our `to_remote` output (a dedicated claim transaction only
/// when `static_remotekey`/anchors delay it by one block; otherwise it is
/// already a plain wallet UTXO and needs no transaction built here), any
/// HTLC we hold the preimage for, and any HTLC we offered that has passed
/// its `cltv_expiry`.
///
/// Takes the specific remote commitment to claim against rather than always
/// reading `commitments.remote_commit`, since the remote may broadcast
/// either its current commitment or, while we're waiting on a
/// `revoke_and_ack`, the pending next one
/// ([`RemoteNextCommitInfo::pending_commitment`](crate::commitment::RemoteNextCommitInfo::pending_commitment));
/// the claim logic is identical either way, keyed off the per-commitment
/// point that produced the broadcast commitment.
#[allow(clippy::too_many_arguments)]
pub fn remote_force_close<C: Verification>(
    secp: &Secp256k1<C>,
    signer: &impl Signer,
    commitments: &Commitments,
    commitment: &crate::commitment::Commitment,
    remote_per_commitment_point: PublicKey,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    current_height: u32,
    feerate_per_kw: u32,
    dust_limit_sat: u64,
    sweep_scriptpubkey: &Script,
    preimage_for: impl Fn(HashLock) -> Option<HashPreimage>,
) -> Result<Vec<Effect>, ChannelError> {
    let channel_id = commitments.params.channel_id;

    let mut effects = Vec::new();

    if commitments.static_remotekey {
        let to_remote_script =
            scripts::to_remote_script_v2(local.payment_basepoint.key).to_v0_p2wsh();
        if let Some((index, value)) = find_output(&commitment.tx, &to_remote_script) {
            let outpoint = OutPoint::new(commitment.tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                1,
                0,
                STATIC_REMOTE_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let witness_script = scripts::to_remote_script_v2(local.payment_basepoint.key);
                let sig = signer
                    .sign_static_remote_claim(channel_id, &claim_tx, 0, &witness_script, value)
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig)];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::Low,
                });
            }
        }
    }

    if commitments.anchor_outputs {
        let anchor_script = scripts::anchor_script(local.funding_pubkey.key).to_v0_p2wsh();
        if let Some((index, value)) = find_output(&commitment.tx, &anchor_script) {
            let outpoint = OutPoint::new(commitment.tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                0,
                0,
                ANCHOR_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let witness_script = scripts::anchor_script(local.funding_pubkey.key);
                let sig = signer
                    .sign_anchor_claim(channel_id, &claim_tx, 0, &witness_script, value)
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig)];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::Low,
                });
            }
        }
    }

    let owner_htlcpubkey = derive_pubkey(secp, remote.htlc_basepoint, remote_per_commitment_point);
    let counterparty_htlcpubkey =
        derive_pubkey(secp, local.htlc_basepoint.key, remote_per_commitment_point);
    let revocationpubkey =
        derive_revocation_pubkey(secp, local.revocation_basepoint.key, remote_per_commitment_point);

    for htlc in &commitment.spec.htlcs {
        if htlc.offered_by_owner {
            let Some(preimage) = preimage_for(htlc.payment_hash) else {
                continue;
            };
            let script = scripts::offered_htlc_script(
                revocationpubkey,
                owner_htlcpubkey,
                counterparty_htlcpubkey,
                htlc.payment_hash,
            )
            .to_v0_p2wsh();
            let Some((index, value)) = find_output(&commitment.tx, &script) else {
                continue;
            };
            let witness_script = scripts::offered_htlc_script(
                revocationpubkey,
                owner_htlcpubkey,
                counterparty_htlcpubkey,
                htlc.payment_hash,
            );
            let outpoint = OutPoint::new(commitment.tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                0,
                0,
                DIRECT_HTLC_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let sig = signer
                    .sign_htlc_tx(
                        channel_id,
                        &claim_tx,
                        &witness_script,
                        value,
                        remote_per_commitment_point,
                    )
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig), preimage_bytes(preimage)];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::High,
                });
            }
        } else if current_height >= htlc.cltv_expiry {
            let script = scripts::received_htlc_script(
                revocationpubkey,
                owner_htlcpubkey,
                counterparty_htlcpubkey,
                htlc.cltv_expiry,
                htlc.payment_hash,
            )
            .to_v0_p2wsh();
            let Some((index, value)) = find_output(&commitment.tx, &script) else {
                continue;
            };
            let witness_script = scripts::received_htlc_script(
                revocationpubkey,
                owner_htlcpubkey,
                counterparty_htlcpubkey,
                htlc.cltv_expiry,
                htlc.payment_hash,
            );
            let outpoint = OutPoint::new(commitment.tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                0,
                htlc.cltv_expiry,
                DIRECT_HTLC_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let sig = signer
                    .sign_htlc_tx(
                        channel_id,
                        &claim_tx,
                        &witness_script,
                        value,
                        remote_per_commitment_point,
                    )
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig), Vec::new()];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::Absolute(htlc.cltv_expiry),
                });
            }
        }
    }

    Ok(effects)
}

/// Punishes a revoked commitment the counterparty just broadcast: our own
/// `to_remote`-equivalent output (handled identically to
/// [`remote_force_close`]'s), their `to_local` output via the main penalty,
/// and one HTLC penalty per HTLC output reconstructed from `revoked_htlcs`
/// (sourced by the caller from persisted per-commitment HTLC history, since
/// the live [`Commitments`] model retains no history past the current
/// commitment).
#[allow(clippy::too_many_arguments)]
pub fn revoked_commit_penalty<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    signer: &impl Signer,
    commitments: &Commitments,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    revoked_tx: &Transaction,
    revoked_htlcs: &[HtlcInfo],
    revealed_per_commitment_secret: [u8; 32],
    feerate_per_kw: u32,
    dust_limit_sat: u64,
    sweep_scriptpubkey: &Script,
) -> Result<Vec<Effect>, ChannelError> {
    let channel_id = commitments.params.channel_id;
    let secret_key = SecretKey::from_slice(&revealed_per_commitment_secret)
        .map_err(|_| ChannelError::UnrecognizedSpendingTransaction)?;
    let per_commitment_point = PublicKey::from_secret_key(secp, &secret_key);
    let to_self_delay = commitments.params.remote_params.to_self_delay;

    let mut effects = Vec::new();

    if commitments.static_remotekey {
        let to_remote_script =
            scripts::to_remote_script_v2(local.payment_basepoint.key).to_v0_p2wsh();
        if let Some((index, value)) = find_output(revoked_tx, &to_remote_script) {
            let outpoint = OutPoint::new(revoked_tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                1,
                0,
                STATIC_REMOTE_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let witness_script = scripts::to_remote_script_v2(local.payment_basepoint.key);
                let sig = signer
                    .sign_static_remote_claim(channel_id, &claim_tx, 0, &witness_script, value)
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig)];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::Low,
                });
            }
        }
    }

    if commitments.anchor_outputs {
        let anchor_script = scripts::anchor_script(local.funding_pubkey.key).to_v0_p2wsh();
        if let Some((index, value)) = find_output(revoked_tx, &anchor_script) {
            let outpoint = OutPoint::new(revoked_tx.txid(), index);
            if let Some(mut claim_tx) = build_claim_tx(
                outpoint,
                value,
                0,
                0,
                ANCHOR_CLAIM_TX_WEIGHT,
                feerate_per_kw,
                dust_limit_sat,
                sweep_scriptpubkey,
            ) {
                let witness_script = scripts::anchor_script(local.funding_pubkey.key);
                let sig = signer
                    .sign_anchor_claim(channel_id, &claim_tx, 0, &witness_script, value)
                    .map_err(map_signer_err)?;
                claim_tx.input[0].witness = vec![der_sig(sig)];
                effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
                effects.push(Effect::PublishTx {
                    tx: claim_tx,
                    target: ConfirmationTarget::Low,
                });
            }
        }
    }

    let revocationpubkey =
        derive_revocation_pubkey(secp, local.revocation_basepoint.key, per_commitment_point);
    let their_delayedpubkey =
        derive_pubkey(secp, remote.delayed_payment_basepoint, per_commitment_point);
    let to_local_script =
        scripts::to_local_script(revocationpubkey, their_delayedpubkey, to_self_delay).to_v0_p2wsh();

    if let Some((index, value)) = find_output(revoked_tx, &to_local_script) {
        let outpoint = OutPoint::new(revoked_tx.txid(), index);
        if let Some(mut claim_tx) = build_claim_tx(
            outpoint,
            value,
            0xFFFF_FFFE,
            0,
            PENALTY_CLAIM_TX_WEIGHT,
            feerate_per_kw,
            dust_limit_sat,
            sweep_scriptpubkey,
        ) {
            let witness_script =
                scripts::to_local_script(revocationpubkey, their_delayedpubkey, to_self_delay);
            let sig = signer
                .sign_penalty_claim(
                    channel_id,
                    &claim_tx,
                    0,
                    &witness_script,
                    value,
                    revealed_per_commitment_secret,
                )
                .map_err(map_signer_err)?;
            claim_tx.input[0].witness = vec![der_sig(sig), vec![1]];
            effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
            effects.push(Effect::PublishTx {
                tx: claim_tx,
                target: ConfirmationTarget::High,
            });
        }
    }

    let their_htlcpubkey = derive_pubkey(secp, remote.htlc_basepoint, per_commitment_point);
    let our_htlcpubkey = derive_pubkey(secp, local.htlc_basepoint.key, per_commitment_point);

    for htlc in revoked_htlcs {
        let script = if htlc.offered_by_owner {
            scripts::offered_htlc_script(
                revocationpubkey,
                their_htlcpubkey,
                our_htlcpubkey,
                htlc.payment_hash,
            )
        } else {
            scripts::received_htlc_script(
                revocationpubkey,
                their_htlcpubkey,
                our_htlcpubkey,
                htlc.cltv_expiry,
                htlc.payment_hash,
            )
        };
        let p2wsh = script.to_v0_p2wsh();
        let Some((index, value)) = find_output(revoked_tx, &p2wsh) else {
            continue;
        };
        let outpoint = OutPoint::new(revoked_tx.txid(), index);
        if let Some(mut claim_tx) = build_claim_tx(
            outpoint,
            value,
            0xFFFF_FFFE,
            0,
            PENALTY_CLAIM_TX_WEIGHT,
            feerate_per_kw,
            dust_limit_sat,
            sweep_scriptpubkey,
        ) {
            let sig = signer
                .sign_penalty_claim(
                    channel_id,
                    &claim_tx,
                    0,
                    &script,
                    value,
                    revealed_per_commitment_secret,
                )
                .map_err(map_signer_err)?;
            claim_tx.input[0].witness =
                vec![der_sig(sig), revocationpubkey.serialize().to_vec()];
            effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
            effects.push(Effect::PublishTx {
                tx: claim_tx,
                target: ConfirmationTarget::High,
            });
        }
    }

    Ok(effects)
}

/// Punishes a CSV-delayed HTLC-timeout/HTLC-success transaction the
/// counterparty published on top of a revoked commitment, by spending its
/// own output via the revocation key before `to_self_delay` lets them sweep
/// it themselves.
#[allow(clippy::too_many_arguments)]
pub fn claim_htlc_delayed_penalty<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    signer: &impl Signer,
    commitments: &Commitments,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    published_htlc_tx: &Transaction,
    revealed_per_commitment_secret: [u8; 32],
    feerate_per_kw: u32,
    dust_limit_sat: u64,
    sweep_scriptpubkey: &Script,
) -> Result<Vec<Effect>, ChannelError> {
    let channel_id = commitments.params.channel_id;
    let secret_key = SecretKey::from_slice(&revealed_per_commitment_secret)
        .map_err(|_| ChannelError::UnrecognizedSpendingTransaction)?;
    let per_commitment_point = PublicKey::from_secret_key(secp, &secret_key);
    let to_self_delay = commitments.params.remote_params.to_self_delay;

    let revocationpubkey =
        derive_revocation_pubkey(secp, local.revocation_basepoint.key, per_commitment_point);
    let their_delayedpubkey =
        derive_pubkey(secp, remote.delayed_payment_basepoint, per_commitment_point);
    let witness_script =
        scripts::htlc_second_stage_script(revocationpubkey, their_delayedpubkey, to_self_delay);

    let value = published_htlc_tx
        .output
        .first()
        .map(|out| out.value)
        .ok_or(ChannelError::UnrecognizedSpendingTransaction)?;
    let outpoint = OutPoint::new(published_htlc_tx.txid(), 0);

    let mut effects = Vec::new();
    if let Some(mut claim_tx) = build_claim_tx(
        outpoint,
        value,
        0xFFFF_FFFE,
        0,
        PENALTY_CLAIM_TX_WEIGHT,
        feerate_per_kw,
        dust_limit_sat,
        sweep_scriptpubkey,
    ) {
        let sig = signer
            .sign_penalty_claim(
                channel_id,
                &claim_tx,
                0,
                &witness_script,
                value,
                revealed_per_commitment_secret,
            )
            .map_err(map_signer_err)?;
        claim_tx.input[0].witness = vec![der_sig(sig), vec![1]];
        effects.push(Effect::WatchTxConfirmed(claim_tx.txid()));
        effects.push(Effect::PublishTx {
            tx: claim_tx,
            target: ConfirmationTarget::High,
        });
    }
    Ok(effects)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commitment::{
        ChannelParams, Commitment, CommitmentSpec, LocalCommit, RemoteCommit,
        RemoteNextCommitInfo,
    };
    use crate::config::PeerParams;
    use crate::ids::{ChannelId, Direction};
    use amplify::DumbDefault;

    fn empty_commitment(index: u64, txid_byte: u8) -> Commitment {
        Commitment {
            index,
            spec: CommitmentSpec::new(0, 0, 0),
            tx: Transaction {
                version: 2,
                lock_time: 0,
                input: vec![TxIn {
                    previous_output: OutPoint::null(),
                    script_sig: Script::new(),
                    sequence: 0,
                    witness: vec![vec![txid_byte]],
                }],
                output: vec![],
            },
            htlc_txs: vec![],
        }
    }

    fn commitments() -> Commitments {
        Commitments {
            params: ChannelParams {
                channel_id: ChannelId::dumb_default(),
                channel_capacity_sat: 1_000_000,
                direction: Direction::Outbound,
                local_params: PeerParams::default(),
                remote_params: PeerParams::default(),
            },
            local_commit: LocalCommit {
                commitment: empty_commitment(5, 1),
                commit_sig: dumb_signature(),
                htlc_sigs: vec![],
            },
            remote_commit: RemoteCommit {
                commitment: empty_commitment(3, 2),
                remote_per_commitment_point: dumb_pubkey!(),
            },
            remote_next_commit_info: RemoteNextCommitInfo::Ready {
                next_per_commitment_point: dumb_pubkey!(),
            },
            local_per_commitment_point: dumb_pubkey!(),
            static_remotekey: false,
            anchor_outputs: false,
            zero_fee_htlc_tx: false,
        }
    }

    fn dumb_signature() -> Signature {
        let secp = Secp256k1::new();
        let msg = secp256k1::Message::from_slice(&[1u8; 32]).unwrap();
        secp.sign_ecdsa(&msg, &secp256k1::ONE_KEY)
    }

    #[test]
    fn recognizes_our_own_commitment() {
        let commitments = commitments();
        let shachain = ShachainConsumer::new();
        let tx = commitments.local_commit.commitment.tx.clone();
        assert_eq!(
            classify_funding_spend(&commitments, &shachain, 0, &tx),
            FundingSpend::LocalCommit
        );
    }

    #[test]
    fn recognizes_remote_commitment() {
        let commitments = commitments();
        let shachain = ShachainConsumer::new();
        let tx = commitments.remote_commit.commitment.tx.clone();
        assert_eq!(
            classify_funding_spend(&commitments, &shachain, 0, &tx),
            FundingSpend::RemoteCommit
        );
    }

    #[test]
    fn recognizes_revoked_commitment_from_shachain() {
        let commitments = commitments();
        let obscuring_factor = 0x2bb038521914u64;
        let commitment_number = 1u64;
        let obscured = keys::obscure_commitment_number(commitment_number, obscuring_factor);
        let lower_24 = (obscured & 0x00FF_FFFF) as u32;
        let upper_24 = ((obscured >> 24) & 0x00FF_FFFF) as u32;
        let lock_time = (0x20u32 << 24) | lower_24;
        let sequence = (0x80u32 << 24) | upper_24;

        let mut shachain = ShachainConsumer::new();
        shachain.insert(commitment_number, [7u8; 32]).unwrap();

        let revoked_tx = Transaction {
            version: 2,
            lock_time,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence,
                witness: Vec::new(),
            }],
            output: vec![],
        };

        assert_eq!(
            classify_funding_spend(&commitments, &shachain, obscuring_factor, &revoked_tx),
            FundingSpend::Revoked { commitment_number }
        );
    }

    #[test]
    fn unrecognized_spend_when_no_match() {
        let commitments = commitments();
        let shachain = ShachainConsumer::new();
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: 0,
                witness: Vec::new(),
            }],
            output: vec![],
        };
        assert_eq!(
            classify_funding_spend(&commitments, &shachain, 0, &tx),
            FundingSpend::Unrecognized
        );
    }

    #[test]
    fn claim_tx_skips_dust_output() {
        let built = build_claim_tx(
            OutPoint::null(),
            500,
            3,
            0,
            DELAYED_CLAIM_TX_WEIGHT,
            10_000,
            546,
            &Script::new(),
        );
        assert!(built.is_none());
    }

    #[test]
    fn claim_tx_pays_value_net_of_fee() {
        let built = build_claim_tx(
            OutPoint::null(),
            1_000_000,
            3,
            0,
            DELAYED_CLAIM_TX_WEIGHT,
            10_000,
            546,
            &Script::new(),
        )
        .unwrap();
        let fee = claim_fee(DELAYED_CLAIM_TX_WEIGHT, 10_000);
        assert_eq!(built.output[0].value, 1_000_000 - fee);
        assert_eq!(built.input[0].sequence, 3);
    }
}
