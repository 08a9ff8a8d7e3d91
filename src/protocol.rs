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

//! The Update Protocol: the four-message negotiation
//! (propose → `commit_sig` → `revoke_and_ack` → cross-sign) that turns
//! proposed [`Update`]s into a pair of mutually-signed commitments.
//!
//! Every operation here is a pure function taking the current [`Commitments`]
//! and [`UpdateState`] by mutable reference and either mutating them in place
//! or returning a [`ChannelError`]; none of them perform I/O. The caller
//! (the channel actor in [`crate::fsm`]) is responsible for persisting the
//! result before handing the returned message to the transport.

use bitcoin::{OutPoint, TxOut};
use secp256k1::{PublicKey, Secp256k1, Signing, Verification};

use crate::commitment::{
    ChangeLog, Commitment, CommitmentSpec, Commitments, HtlcInfo, LocalCommit,
    RemoteCommit, RemoteNextCommitInfo, Update,
};
use crate::commitment::{scripts, tx};
use crate::error::ChannelError;
use crate::ids::HashPreimage;
use crate::keys::{derive_pubkey, derive_revocation_pubkey, LocalKeyset, RemoteKeyset};
use crate::messages;
use crate::signer::Signer;

/// The two per-direction proposal queues plus the monotonic HTLC id
/// counters that gate [`add_local_proposal`]/[`add_remote_proposal`].
#[derive(Clone, Default, Debug)]
pub struct UpdateState {
    pub local_log: ChangeLog,
    pub remote_log: ChangeLog,
    pub local_next_htlc_id: u64,
    pub remote_next_htlc_id: u64,
}

impl UpdateState {
    pub fn new() -> Self {
        UpdateState::default()
    }
}

/// Applies a single update to one side's [`CommitmentSpec`]. `proposed_by_owner`
/// only matters for `AddHtlc`: it decides which balance the new HTLC's value
/// is taken from and whether the resulting [`HtlcInfo`] is recorded as
/// offered by the owner of `spec` or offered to them. `Fulfill`/`Fail`
/// updates are always sent by the non-offering side, so their effect on
/// balances is determined entirely by the existing HTLC's own
/// `offered_by_owner` flag.
fn apply_update(
    spec: &mut CommitmentSpec,
    update: &Update,
    proposed_by_owner: bool,
) -> Result<(), ChannelError> {
    match update {
        Update::AddHtlc {
            htlc_id,
            amount_msat,
            payment_hash,
            cltv_expiry,
        } => {
            if proposed_by_owner {
                spec.to_local_msat = spec
                    .to_local_msat
                    .checked_sub(*amount_msat)
                    .ok_or(ChannelError::OutOfOrder(
                        "AddHtlc would underflow the owner's balance",
                    ))?;
            } else {
                spec.to_remote_msat = spec
                    .to_remote_msat
                    .checked_sub(*amount_msat)
                    .ok_or(ChannelError::OutOfOrder(
                        "AddHtlc would underflow the counterparty's balance",
                    ))?;
            }
            spec.htlcs.push(HtlcInfo {
                htlc_id: *htlc_id,
                amount_msat: *amount_msat,
                payment_hash: *payment_hash,
                cltv_expiry: *cltv_expiry,
                offered_by_owner: proposed_by_owner,
            });
        }

        Update::FulfillHtlc { htlc_id, .. } => {
            let pos = spec
                .htlcs
                .iter()
                .position(|h| h.htlc_id == *htlc_id)
                .ok_or(ChannelError::OutOfOrder(
                    "FulfillHtlc references an unknown htlc_id",
                ))?;
            let htlc = spec.htlcs.remove(pos);
            if htlc.offered_by_owner {
                spec.to_remote_msat += htlc.amount_msat;
            } else {
                spec.to_local_msat += htlc.amount_msat;
            }
        }

        Update::FailHtlc { htlc_id, .. }
        | Update::FailMalformedHtlc { htlc_id, .. } => {
            let pos = spec
                .htlcs
                .iter()
                .position(|h| h.htlc_id == *htlc_id)
                .ok_or(ChannelError::OutOfOrder(
                    "FailHtlc references an unknown htlc_id",
                ))?;
            let htlc = spec.htlcs.remove(pos);
            if htlc.offered_by_owner {
                spec.to_local_msat += htlc.amount_msat;
            } else {
                spec.to_remote_msat += htlc.amount_msat;
            }
        }

        Update::FeeUpdate { feerate_per_kw } => {
            spec.feerate_per_kw = *feerate_per_kw;
        }
    }
    Ok(())
}

/// Projects a new [`CommitmentSpec`] by applying `owner_log` (updates
/// proposed by the owner of `base`) and then `counterparty_log` (updates
/// proposed by the other side) on top of `base`. Exposed to [`crate::fsm`]
/// so commands can be validated against the balance/HTLC set they would
/// produce before being appended to either change log.
pub(crate) fn project_spec(
    base: &CommitmentSpec,
    owner_log: &[Update],
    counterparty_log: &[Update],
) -> Result<CommitmentSpec, ChannelError> {
    let mut spec = base.clone();
    for update in owner_log {
        apply_update(&mut spec, update, true)?;
    }
    for update in counterparty_log {
        apply_update(&mut spec, update, false)?;
    }
    Ok(spec)
}

/// Appends an update to the local proposal queue. Assigns the next HTLC id
/// for `AddHtlc` proposals; the caller is expected to have already run
/// [`crate::invariants`] against the projected post-state before calling
/// this.
pub fn add_local_proposal(
    state: &mut UpdateState,
    make_update: impl FnOnce(u64) -> Update,
) -> u64 {
    let htlc_id = state.local_next_htlc_id;
    let update = make_update(htlc_id);
    if matches!(update, Update::AddHtlc { .. }) {
        state.local_next_htlc_id += 1;
    }
    state.local_log.push(update);
    htlc_id
}

/// Appends an update received from the peer to the remote proposal queue.
/// `AddHtlc` ids are required to equal the next expected id; any other
/// value is a fatal protocol violation (BOLT-2 requires strictly
/// monotonic, gapless allocation).
pub fn add_remote_proposal(
    state: &mut UpdateState,
    update: Update,
) -> Result<(), ChannelError> {
    if let Update::AddHtlc { htlc_id, .. } = &update {
        if *htlc_id != state.remote_next_htlc_id {
            return Err(ChannelError::OutOfOrder(
                "peer proposed an htlc_id other than the expected next one",
            ));
        }
        state.remote_next_htlc_id += 1;
    }
    state.remote_log.push(update);
    Ok(())
}

/// Everything needed to build one side's `to_local`/HTLC output scripts for
/// a commitment at a given per-commitment point: the revocation basepoint
/// belongs to whoever does *not* own the commitment (the party who would
/// punish it), the delayed-payment and HTLC basepoints belong to whoever
/// does.
struct CommitmentKeys {
    revocationpubkey: PublicKey,
    delayedpubkey: PublicKey,
    owner_htlcpubkey: PublicKey,
    counterparty_htlcpubkey: PublicKey,
    counterparty_payment_pubkey: PublicKey,
}

fn remote_commitment_keys<C: Verification>(
    secp: &Secp256k1<C>,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    remote_per_commitment_point: PublicKey,
) -> CommitmentKeys {
    CommitmentKeys {
        revocationpubkey: derive_revocation_pubkey(
            secp,
            local.revocation_basepoint.key,
            remote_per_commitment_point,
        ),
        delayedpubkey: derive_pubkey(
            secp,
            remote.delayed_payment_basepoint,
            remote_per_commitment_point,
        ),
        owner_htlcpubkey: derive_pubkey(
            secp,
            remote.htlc_basepoint,
            remote_per_commitment_point,
        ),
        counterparty_htlcpubkey: derive_pubkey(
            secp,
            local.htlc_basepoint.key,
            remote_per_commitment_point,
        ),
        counterparty_payment_pubkey: if local.static_remotekey {
            local.payment_basepoint.key
        } else {
            derive_pubkey(secp, local.payment_basepoint.key, remote_per_commitment_point)
        },
    }
}

fn local_commitment_keys<C: Verification>(
    secp: &Secp256k1<C>,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    local_per_commitment_point: PublicKey,
) -> CommitmentKeys {
    CommitmentKeys {
        revocationpubkey: derive_revocation_pubkey(
            secp,
            remote.revocation_basepoint,
            local_per_commitment_point,
        ),
        delayedpubkey: derive_pubkey(
            secp,
            local.delayed_payment_basepoint.key,
            local_per_commitment_point,
        ),
        owner_htlcpubkey: derive_pubkey(
            secp,
            local.htlc_basepoint.key,
            local_per_commitment_point,
        ),
        counterparty_htlcpubkey: derive_pubkey(
            secp,
            remote.htlc_basepoint,
            local_per_commitment_point,
        ),
        counterparty_payment_pubkey: if local.static_remotekey {
            remote.payment_basepoint
        } else {
            derive_pubkey(secp, remote.payment_basepoint, local_per_commitment_point)
        },
    }
}

/// Builds the unsigned commitment transaction plus its second-stage HTLC
/// transactions for one side, given the keys appropriate to that side's
/// per-commitment point. `local_funding_pubkey`/`remote_funding_pubkey` are
/// relative to whichever side's commitment this is (the `to_local` output's
/// anchor is keyed to `local_funding_pubkey`), not absolute to our own node
/// — callers building the remote's commitment must pass them swapped.
#[allow(clippy::too_many_arguments)]
fn build_commitment(
    index: u64,
    spec: CommitmentSpec,
    dust_limit_sat: u64,
    obscuring_factor: u64,
    funding_outpoint: OutPoint,
    to_self_delay: u16,
    static_remotekey: bool,
    anchor_outputs: bool,
    zero_fee_htlc_tx: bool,
    local_funding_pubkey: PublicKey,
    remote_funding_pubkey: PublicKey,
    keys: &CommitmentKeys,
) -> Commitment {
    let untrimmed: Vec<HtlcInfo> = spec
        .untrimmed_htlcs(dust_limit_sat)
        .into_iter()
        .copied()
        .collect();

    let htlc_outputs: Vec<(HtlcInfo, TxOut)> = untrimmed
        .iter()
        .map(|htlc| {
            let script = if htlc.offered_by_owner {
                scripts::offered_htlc_script(
                    keys.revocationpubkey,
                    keys.owner_htlcpubkey,
                    keys.counterparty_htlcpubkey,
                    htlc.payment_hash,
                )
            } else {
                scripts::received_htlc_script(
                    keys.revocationpubkey,
                    keys.owner_htlcpubkey,
                    keys.counterparty_htlcpubkey,
                    htlc.cltv_expiry,
                    htlc.payment_hash,
                )
            };
            (
                *htlc,
                TxOut {
                    value: htlc.amount_msat / 1000,
                    script_pubkey: script.to_v0_p2wsh(),
                },
            )
        })
        .collect();

    let (tx, htlc_output_indices) = tx::build_commitment_tx(
        &spec,
        dust_limit_sat,
        index,
        obscuring_factor,
        funding_outpoint,
        keys.revocationpubkey,
        keys.delayedpubkey,
        to_self_delay,
        keys.counterparty_payment_pubkey,
        static_remotekey,
        anchor_outputs,
        local_funding_pubkey,
        remote_funding_pubkey,
        htlc_outputs,
    );

    let commitment_txid = tx.txid();
    let htlc_txs = htlc_output_indices
        .into_iter()
        .map(|(htlc, output_index)| {
            let htlc_tx = tx::build_htlc_tx(
                commitment_txid,
                output_index,
                &htlc,
                htlc.amount_msat / 1000,
                spec.feerate_per_kw,
                keys.revocationpubkey,
                keys.delayedpubkey,
                to_self_delay,
                zero_fee_htlc_tx,
            );
            (htlc, htlc_tx)
        })
        .collect();

    Commitment {
        index,
        spec,
        tx,
        htlc_txs,
    }
}

/// `sendCommit`: folds every pending proposal into a fresh remote
/// commitment one index ahead of the last one we signed, signs it and each
/// of its untrimmed HTLC outputs, and moves `remote_next_commit_info` to
/// `Waiting`. A no-op (returns `Ok(None)`) if we are already waiting on a
/// `revoke_and_ack`, since BOLT-2 forbids two `commit_sig`s in a row.
#[allow(clippy::too_many_arguments)]
pub fn send_commit<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    commitments: &mut Commitments,
    state: &mut UpdateState,
    signer: &impl Signer,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    funding_outpoint: OutPoint,
    dust_limit_sat: u64,
    obscuring_factor: u64,
) -> Result<Option<messages::CommitSig>, ChannelError> {
    if commitments.remote_next_commit_info.is_waiting() {
        return Ok(None);
    }
    if state.local_log.is_empty() && state.remote_log.is_empty() {
        return Err(ChannelError::NothingToSign);
    }

    let remote_per_commitment_point = commitments
        .remote_next_commit_info
        .next_point()
        .expect("checked not waiting above, so Ready with a point");

    let new_spec = project_spec(
        &commitments.remote_commit.commitment.spec,
        state.remote_log.proposals(),
        state.local_log.proposals(),
    )?;
    let new_index = commitments.remote_commit.commitment.index + 1;

    let keys = remote_commitment_keys(secp, local, remote, remote_per_commitment_point);
    let commitment = build_commitment(
        new_index,
        new_spec,
        dust_limit_sat,
        obscuring_factor,
        funding_outpoint,
        commitments.params.remote_params.to_self_delay,
        commitments.static_remotekey,
        commitments.anchor_outputs,
        commitments.zero_fee_htlc_tx,
        remote.funding_pubkey,
        local.funding_pubkey.key,
        &keys,
    );

    let funding_script =
        scripts::funding_script(local.funding_pubkey.key, remote.funding_pubkey);
    let commit_sig = signer
        .sign_commitment(
            commitments.params.channel_id,
            &commitment.tx,
            &funding_script,
            commitments.params.channel_capacity_sat,
        )
        .map_err(|e| ChannelError::SignerError(e.to_string()))?;

    let mut htlc_sigs = Vec::with_capacity(commitment.htlc_txs.len());
    for (htlc, htlc_tx) in &commitment.htlc_txs {
        let htlc_script = if htlc.offered_by_owner {
            scripts::offered_htlc_script(
                keys.revocationpubkey,
                keys.owner_htlcpubkey,
                keys.counterparty_htlcpubkey,
                htlc.payment_hash,
            )
        } else {
            scripts::received_htlc_script(
                keys.revocationpubkey,
                keys.owner_htlcpubkey,
                keys.counterparty_htlcpubkey,
                htlc.cltv_expiry,
                htlc.payment_hash,
            )
        };
        let sig = signer
            .sign_htlc_tx(
                commitments.params.channel_id,
                htlc_tx,
                &htlc_script,
                htlc.amount_msat / 1000,
                remote_per_commitment_point,
            )
            .map_err(|e| ChannelError::SignerError(e.to_string()))?;
        htlc_sigs.push(sig);
    }

    let message = messages::CommitSig {
        channel_id: commitments.params.channel_id,
        signature: commit_sig,
        htlc_signatures: htlc_sigs.clone(),
    };

    // `remote_commit` stays pointed at the old, still-revocable commitment
    // until `receive_revocation` rotates it in: the remote has not yet
    // given up the ability to broadcast it.
    commitments.remote_next_commit_info = RemoteNextCommitInfo::Waiting {
        pending_commitment: commitment,
        pending_remote_per_commitment_point: remote_per_commitment_point,
        sent_commit_sig: commit_sig,
        sent_htlc_sigs: htlc_sigs,
    };

    Ok(Some(message))
}

/// `receiveCommit`: verifies the peer's `commit_sig` and per-HTLC
/// signatures against a freshly-built local commitment one index ahead of
/// our current one, advances `local_commit`, and returns the
/// `revoke_and_ack` for our *previous* local commitment.
#[allow(clippy::too_many_arguments)]
pub fn receive_commit<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    commitments: &mut Commitments,
    state: &mut UpdateState,
    signer: &impl Signer,
    local: &LocalKeyset,
    remote: &RemoteKeyset,
    funding_outpoint: OutPoint,
    dust_limit_sat: u64,
    obscuring_factor: u64,
    msg: &messages::CommitSig,
) -> Result<messages::RevokeAndAck, ChannelError> {
    let new_spec = project_spec(
        &commitments.local_commit.commitment.spec,
        state.local_log.proposals(),
        state.remote_log.proposals(),
    )?;
    let new_index = commitments.local_commit.commitment.index + 1;

    let keys =
        local_commitment_keys(secp, local, remote, commitments.local_per_commitment_point);
    let commitment = build_commitment(
        new_index,
        new_spec,
        dust_limit_sat,
        obscuring_factor,
        funding_outpoint,
        commitments.params.local_params.to_self_delay,
        commitments.static_remotekey,
        commitments.anchor_outputs,
        commitments.zero_fee_htlc_tx,
        local.funding_pubkey.key,
        remote.funding_pubkey,
        &keys,
    );

    let expected = commitment.htlc_txs.len();
    if msg.htlc_signatures.len() != expected {
        return Err(ChannelError::HtlcSignatureCountMismatch {
            offered: msg.htlc_signatures.len(),
            expected,
        });
    }

    let funding_script =
        scripts::funding_script(local.funding_pubkey.key, remote.funding_pubkey);
    crate::signer::verify_witness_signature(
        secp,
        &commitment.tx,
        0,
        &funding_script,
        commitments.params.channel_capacity_sat,
        remote.funding_pubkey,
        msg.signature,
    )
    .map_err(|_| ChannelError::InvalidCommitSignature)?;

    for ((htlc, htlc_tx), sig) in commitment.htlc_txs.iter().zip(&msg.htlc_signatures) {
        let htlc_script = if htlc.offered_by_owner {
            scripts::offered_htlc_script(
                keys.revocationpubkey,
                keys.owner_htlcpubkey,
                keys.counterparty_htlcpubkey,
                htlc.payment_hash,
            )
        } else {
            scripts::received_htlc_script(
                keys.revocationpubkey,
                keys.owner_htlcpubkey,
                keys.counterparty_htlcpubkey,
                htlc.cltv_expiry,
                htlc.payment_hash,
            )
        };
        crate::signer::verify_witness_signature(
            secp,
            htlc_tx,
            0,
            &htlc_script,
            htlc.amount_msat / 1000,
            keys.counterparty_htlcpubkey,
            *sig,
        )
        .map_err(|_| ChannelError::InvalidHtlcSignature {
            htlc_id: htlc.htlc_id,
        })?;
    }

    let per_commitment_secret = signer
        .release_commitment_secret(
            commitments.params.channel_id,
            commitments.local_commit.commitment.index,
        )
        .map_err(|e| ChannelError::SignerError(e.to_string()))?;
    let next_per_commitment_point = signer
        .next_per_commitment_point(
            commitments.params.channel_id,
            commitments.local_commit.commitment.index + 2,
        )
        .map_err(|e| ChannelError::SignerError(e.to_string()))?;

    let revoke = messages::RevokeAndAck {
        channel_id: commitments.params.channel_id,
        per_commitment_secret,
        next_per_commitment_point,
    };

    commitments.local_commit = LocalCommit {
        commitment,
        commit_sig: msg.signature,
        htlc_sigs: msg.htlc_signatures.clone(),
    };
    commitments.local_per_commitment_point = next_per_commitment_point;

    Ok(revoke)
}

/// `receiveRevocation`: checks the revealed secret against the
/// previously-advertised per-commitment point, rotates `remote_commit` to
/// the commitment we most recently sent a `commit_sig` for, and drains the
/// proposal queues that are now folded into both signed commitments.
pub fn receive_revocation<C: Verification>(
    secp: &Secp256k1<C>,
    commitments: &mut Commitments,
    state: &mut UpdateState,
    remote: &RemoteKeyset,
    msg: &messages::RevokeAndAck,
) -> Result<(), ChannelError> {
    let (pending_commitment, pending_remote_per_commitment_point) =
        match &commitments.remote_next_commit_info {
            RemoteNextCommitInfo::Waiting {
                pending_commitment,
                pending_remote_per_commitment_point,
                ..
            } => (pending_commitment.clone(), *pending_remote_per_commitment_point),
            RemoteNextCommitInfo::Ready { .. } => {
                return Err(ChannelError::SpuriousRevocation)
            }
        };

    let revealed_secret =
        secp256k1::SecretKey::from_slice(&msg.per_commitment_secret)
            .map_err(|_| ChannelError::InvalidRevocationSecret)?;
    let revealed_point = PublicKey::from_secret_key(secp, &revealed_secret);
    if revealed_point != commitments.remote_commit.remote_per_commitment_point {
        return Err(ChannelError::InvalidRevocationSecret);
    }
    let _ = remote;

    // The remote has now given up its ability to broadcast the old
    // commitment; rotate the pending one in as the new current one.
    commitments.remote_commit = RemoteCommit {
        commitment: pending_commitment,
        remote_per_commitment_point: pending_remote_per_commitment_point,
    };
    commitments.remote_next_commit_info = RemoteNextCommitInfo::Ready {
        next_per_commitment_point: msg.next_per_commitment_point,
    };

    state.local_log.drain();
    state.remote_log.drain();

    Ok(())
}

/// Builds the `UpdateFulfillHtlc` proposal for settling an incoming HTLC we
/// hold the preimage for, verifying the preimage against its hash-lock
/// before constructing the update.
pub fn prepare_fulfill(
    spec: &CommitmentSpec,
    htlc_id: u64,
    payment_preimage: HashPreimage,
) -> Result<Update, ChannelError> {
    let htlc = spec
        .htlcs
        .iter()
        .find(|h| h.htlc_id == htlc_id)
        .ok_or(ChannelError::OutOfOrder("fulfill references unknown htlc_id"))?;
    if payment_preimage.hash() != htlc.payment_hash {
        return Err(ChannelError::Invariant(
            crate::error::InvariantError::PreimageMismatch { htlc_id },
        ));
    }
    Ok(Update::FulfillHtlc {
        htlc_id,
        payment_preimage,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::HashLock;
    use amplify::DumbDefault;

    fn htlc_update(id: u64, amount_msat: u64) -> Update {
        Update::AddHtlc {
            htlc_id: id,
            amount_msat,
            payment_hash: HashLock::dumb_default(),
            cltv_expiry: 500_144,
        }
    }

    #[test]
    fn apply_add_moves_balance_from_proposer() {
        let mut spec = CommitmentSpec::new(800_000_000, 200_000_000, 10_000);
        apply_update(&mut spec, &htlc_update(0, 50_000_000), true).unwrap();
        assert_eq!(spec.to_local_msat, 750_000_000);
        assert_eq!(spec.htlcs.len(), 1);
        assert!(spec.htlcs[0].offered_by_owner);
    }

    #[test]
    fn apply_fulfill_pays_the_non_offering_side() {
        let mut spec = CommitmentSpec::new(750_000_000, 200_000_000, 10_000);
        spec.htlcs.push(HtlcInfo {
            htlc_id: 0,
            amount_msat: 50_000_000,
            payment_hash: HashLock::dumb_default(),
            cltv_expiry: 500_144,
            offered_by_owner: true,
        });
        let preimage = crate::ids::HashPreimage::dumb_default();
        apply_update(
            &mut spec,
            &Update::FulfillHtlc {
                htlc_id: 0,
                payment_preimage: preimage,
            },
            false,
        )
        .unwrap();
        assert!(spec.htlcs.is_empty());
        assert_eq!(spec.to_remote_msat, 250_000_000);
    }

    #[test]
    fn add_local_proposal_allocates_sequential_ids() {
        let mut state = UpdateState::new();
        let id0 = add_local_proposal(&mut state, |id| htlc_update(id, 1000));
        let id1 = add_local_proposal(&mut state, |id| htlc_update(id, 2000));
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);
        assert_eq!(state.local_next_htlc_id, 2);
        assert_eq!(state.local_log.proposals().len(), 2);
    }

    #[test]
    fn add_remote_proposal_rejects_out_of_order_id() {
        let mut state = UpdateState::new();
        let err = add_remote_proposal(&mut state, htlc_update(5, 1000)).unwrap_err();
        assert!(matches!(err, ChannelError::OutOfOrder(_)));
    }

    #[test]
    fn add_remote_proposal_accepts_expected_id() {
        let mut state = UpdateState::new();
        add_remote_proposal(&mut state, htlc_update(0, 1000)).unwrap();
        assert_eq!(state.remote_next_htlc_id, 1);
    }
}
