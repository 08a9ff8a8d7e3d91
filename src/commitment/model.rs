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

//! Commitment-side data model: the spec (balances + HTLC set) of a single
//! commitment transaction, and the `local`/`remote`/`next` triple the
//! channel tracks at all times.

use bitcoin::Transaction;
use secp256k1::{ecdsa::Signature, PublicKey};

use crate::config::PeerParams;
use crate::ids::{ChannelId, Direction, HashLock};

/// An outstanding HTLC as it appears on a commitment transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct HtlcInfo {
    pub htlc_id: u64,
    pub amount_msat: u64,
    pub payment_hash: HashLock,
    pub cltv_expiry: u32,
    /// Whether this HTLC was offered by the owner of the commitment it
    /// appears on (true) or offered to them (false).
    pub offered_by_owner: bool,
}

impl HtlcInfo {
    /// True if, at `feerate_per_kw`, this HTLC's value does not cover the
    /// cost of its own second-stage (HTLC-timeout/success) transaction and
    /// so it is trimmed from the commitment entirely.
    pub fn is_trimmed(&self, dust_limit_sat: u64, feerate_per_kw: u32) -> bool {
        let weight = if self.offered_by_owner {
            htlc_timeout_weight()
        } else {
            htlc_success_weight()
        };
        let htlc_tx_fee = weight * feerate_per_kw as u64 / 1000;
        self.amount_msat / 1000 < dust_limit_sat + htlc_tx_fee
    }
}

/// Weight of an HTLC-timeout transaction, per BOLT-3.
pub const fn htlc_timeout_weight() -> u64 {
    663
}

/// Weight of an HTLC-success transaction, per BOLT-3.
pub const fn htlc_success_weight() -> u64 {
    703
}

/// The full set of balances and outstanding HTLCs that determine one side's
/// commitment transaction at a point in time.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CommitmentSpec {
    pub to_local_msat: u64,
    pub to_remote_msat: u64,
    pub feerate_per_kw: u32,
    pub htlcs: Vec<HtlcInfo>,
}

impl CommitmentSpec {
    pub fn new(
        to_local_msat: u64,
        to_remote_msat: u64,
        feerate_per_kw: u32,
    ) -> Self {
        CommitmentSpec {
            to_local_msat,
            to_remote_msat,
            feerate_per_kw,
            htlcs: Vec::new(),
        }
    }

    /// HTLCs retained after trimming dust-valued entries, which pay into
    /// the transaction's fee instead of getting their own output.
    pub fn untrimmed_htlcs(&self, dust_limit_sat: u64) -> Vec<&HtlcInfo> {
        self.htlcs
            .iter()
            .filter(|h| !h.is_trimmed(dust_limit_sat, self.feerate_per_kw))
            .collect()
    }

    /// Sum, in msat, of all dust-valued (trimmed) HTLCs — the quantity the
    /// dust-exposure invariant caps.
    pub fn dust_exposure_msat(&self, dust_limit_sat: u64) -> u64 {
        self.htlcs
            .iter()
            .filter(|h| h.is_trimmed(dust_limit_sat, self.feerate_per_kw))
            .map(|h| h.amount_msat)
            .sum()
    }

    /// Base weight of the commitment transaction before HTLC outputs:
    /// `724 + 172 * untrimmed_htlc_count`, per BOLT-3. Anchor formats add
    /// `2 * ANCHOR_OUTPUT_VALUE_SAT` on top, paid by the funder alongside
    /// the weight-based fee rather than out of the anchor outputs'
    /// themselves (each anchor is a fixed-value output, not fee-funded).
    pub fn base_fee_sat(&self, dust_limit_sat: u64, anchor_outputs: bool) -> u64 {
        let htlc_count = self.untrimmed_htlcs(dust_limit_sat).len() as u64;
        let weight = 724 + 172 * htlc_count;
        let weight_fee = weight * self.feerate_per_kw as u64 / 1000;
        if anchor_outputs {
            weight_fee + 2 * super::scripts::ANCHOR_OUTPUT_VALUE_SAT
        } else {
            weight_fee
        }
    }
}

/// Parameters fixed for the lifetime of the channel: funding outpoint,
/// amounts, and both sides' negotiated peer parameters.
#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelParams {
    pub channel_id: ChannelId,
    pub channel_capacity_sat: u64,
    pub direction: Direction,
    pub local_params: PeerParams,
    pub remote_params: PeerParams,
}

/// A fully-specified commitment: the balances/HTLCs it pays out, and the
/// unsigned transaction built from them.
#[derive(Clone, Debug)]
pub struct Commitment {
    pub index: u64,
    pub spec: CommitmentSpec,
    pub tx: Transaction,
    pub htlc_txs: Vec<(HtlcInfo, Transaction)>,
}

/// The local commitment we have most recently signed (or are about to),
/// together with the signatures the remote peer sent for it.
#[derive(Clone, Debug)]
pub struct LocalCommit {
    pub commitment: Commitment,
    pub commit_sig: Signature,
    pub htlc_sigs: Vec<Signature>,
}

/// The remote commitment we have most recently signed on their behalf.
#[derive(Clone, Debug)]
pub struct RemoteCommit {
    pub commitment: Commitment,
    pub remote_per_commitment_point: PublicKey,
}

/// What we know about the remote's *next* commitment: either we've sent a
/// `commit_sig` for it and are waiting on their `revoke_and_ack`, in which
/// case we keep the pending commitment itself (it is still unrevoked and
/// may yet be the one the remote broadcasts), or we are caught up and
/// already know the point to use for the next proposal.
///
/// Modeled as a sum type rather than nested `Option`s: the two branches
/// carry different, mutually exclusive data and "waiting with no pending
/// commitment" / "ready with no sent signature" are not states that can
/// coexist. `Commitments::remote_commit` is deliberately NOT replaced by
/// the pending commitment until `receive_revocation` rotates it in: until
/// then the old commitment is still the one the remote can revoke-punish
/// us with, and still the one we must recognize if they broadcast it.
#[derive(Clone, Debug)]
pub enum RemoteNextCommitInfo {
    Waiting {
        pending_commitment: Commitment,
        pending_remote_per_commitment_point: PublicKey,
        sent_commit_sig: Signature,
        sent_htlc_sigs: Vec<Signature>,
    },
    Ready {
        next_per_commitment_point: PublicKey,
    },
}

impl RemoteNextCommitInfo {
    pub fn is_waiting(&self) -> bool {
        matches!(self, RemoteNextCommitInfo::Waiting { .. })
    }

    pub fn next_point(&self) -> Option<PublicKey> {
        match self {
            RemoteNextCommitInfo::Ready {
                next_per_commitment_point,
            } => Some(*next_per_commitment_point),
            RemoteNextCommitInfo::Waiting { .. } => None,
        }
    }

    /// The commitment we've sent a `commit_sig` for but the remote hasn't
    /// revoked its predecessor yet, if any.
    pub fn pending_commitment(&self) -> Option<&Commitment> {
        match self {
            RemoteNextCommitInfo::Waiting {
                pending_commitment, ..
            } => Some(pending_commitment),
            RemoteNextCommitInfo::Ready { .. } => None,
        }
    }
}

/// The three commitments the channel must always be able to account for:
/// our current local commitment, the remote's current (last-revoked-to-us)
/// commitment, and — while `remote_next_commit_info` is `Waiting` — the
/// remote's pending next commitment, which it holds alongside the current
/// one until it reveals the revocation secret for it.
#[derive(Clone, Debug)]
pub struct Commitments {
    pub params: ChannelParams,
    pub local_commit: LocalCommit,
    pub remote_commit: RemoteCommit,
    pub remote_next_commit_info: RemoteNextCommitInfo,
    pub local_per_commitment_point: PublicKey,
    /// `to_remote` pays the bare payment basepoint rather than a
    /// per-commitment tweaked key (`option_static_remotekey` /
    /// `option_anchors`).
    pub static_remotekey: bool,
    /// `option_anchors`: the commitment transaction carries two fixed-value
    /// CPFP-anchor outputs, and the funder's fee accounting includes their
    /// cost. Implies `static_remotekey`.
    pub anchor_outputs: bool,
    /// `option_anchors_zero_fee_htlc_tx`: second-stage HTLC transactions pay
    /// zero fee of their own (fee-bumped entirely via the commitment's
    /// anchor outputs instead), so they can be pre-signed and held without
    /// ever needing re-signing as the feerate moves. Implies
    /// `anchor_outputs`.
    pub zero_fee_htlc_tx: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    fn htlc(amount_msat: u64, offered_by_owner: bool) -> HtlcInfo {
        use amplify::DumbDefault;
        HtlcInfo {
            htlc_id: 0,
            amount_msat,
            payment_hash: HashLock::dumb_default(),
            cltv_expiry: 500_000,
            offered_by_owner,
        }
    }

    #[test]
    fn dust_htlc_is_trimmed() {
        let dust_limit = 546;
        let feerate = 10_000;
        let small = htlc(500_000, true);
        assert!(small.is_trimmed(dust_limit, feerate));
        let large = htlc(5_000_000, true);
        assert!(!large.is_trimmed(dust_limit, feerate));
    }

    #[test]
    fn dust_exposure_sums_only_trimmed_htlcs() {
        let mut spec = CommitmentSpec::new(800_000_000, 200_000_000, 10_000);
        spec.htlcs.push(htlc(500_000, true));
        spec.htlcs.push(htlc(5_000_000, true));
        assert_eq!(spec.dust_exposure_msat(546), 500_000);
    }
}
