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

//! The three-tier error taxonomy used across the channel state machine:
//! [`InvariantError`] (tier 1, recoverable, returned to the caller that
//! proposed an invalid update), [`ChannelError`] (tier 2, a peer protocol
//! violation that renders the channel unusable), and [`Advisory`] (tier 3, a
//! degraded-but-non-fatal condition that is logged rather than returned as an
//! `Err`).

use crate::ids::ChannelId;

/// Tier 1: rejection of a single proposed update. The channel remains usable;
/// the caller (local policy engine or the peer, depending on who proposed the
/// update) is informed so it can retry or abandon the proposal.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum InvariantError {
    /// proposing this update would leave the proposer with insufficient
    /// funds: missing {missing} sat to cover the reserve of {reserve} sat
    /// and fees of {fees} sat
    InsufficientFunds {
        missing: u64,
        reserve: u64,
        fees: u64,
    },

    /// accepting this HTLC would bring the dust-valued HTLC exposure on the
    /// local commitment to {resulting_exposure_msat} msat, exceeding the
    /// configured cap of {cap_sat} sat
    LocalDustHtlcExposureTooHigh {
        channel_id: ChannelId,
        cap_sat: u64,
        resulting_exposure_msat: u64,
    },

    /// accepting this HTLC would bring the dust-valued HTLC exposure on the
    /// remote commitment to {resulting_exposure_msat} msat, exceeding the
    /// configured cap of {cap_sat} sat
    RemoteDustHtlcExposureTooHigh {
        channel_id: ChannelId,
        cap_sat: u64,
        resulting_exposure_msat: u64,
    },

    /// proposed HTLC amount {amount_msat} msat is below the remote's
    /// advertised htlc_minimum_msat of {htlc_minimum_msat} msat
    HtlcValueTooSmall {
        amount_msat: u64,
        htlc_minimum_msat: u64,
    },

    /// proposed HTLC amount {amount_msat} msat exceeds the channel's
    /// max_htlc_value_in_flight_msat of {limit_msat} msat once combined
    /// with the {in_flight_msat} msat already in flight
    HtlcValueTooHigh {
        amount_msat: u64,
        in_flight_msat: u64,
        limit_msat: u64,
    },

    /// accepting this HTLC would bring the number of offered HTLCs to
    /// {count}, exceeding the negotiated max_accepted_htlcs of {limit}
    TooManyHtlcs { count: u16, limit: u16 },

    /// HTLC cltv_expiry {cltv_expiry} is below the minimum final expiry
    /// delta required by the receiving node
    ExpiryTooSoon { cltv_expiry: u32 },

    /// HTLC cltv_expiry {cltv_expiry} exceeds the maximum delta the local
    /// policy is willing to accept ({max_cltv_expiry})
    ExpiryTooFar {
        cltv_expiry: u32,
        max_cltv_expiry: u32,
    },

    /// proposed feerate {proposed_sat_per_kw} sat/kw deviates from the last
    /// agreed feerate of {last_sat_per_kw} sat/kw by more than the
    /// configured tolerance
    FeerateOutOfTolerance {
        proposed_sat_per_kw: u32,
        last_sat_per_kw: u32,
    },

    /// update references an unknown HTLC id {htlc_id}
    UnknownHtlcId { htlc_id: u64 },

    /// update references HTLC id {htlc_id} which has already been resolved
    HtlcAlreadyResolved { htlc_id: u64 },

    /// the payment hash in the fulfillment does not match the HTLC's
    /// hash-lock
    PreimageMismatch { htlc_id: u64 },
}

/// Tier 2: a peer protocol violation or an internally detected
/// inconsistency that the channel cannot recover from; the channel must be
/// unilaterally closed.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ChannelError {
    /// invariant violated in a way that cannot be merely rejected because it
    /// was already committed to: {0}
    #[from]
    #[display(inner)]
    Invariant(InvariantError),

    /// error re-establishing the channel: {0}
    #[from]
    #[display(inner)]
    Reestablish(ReestablishError),

    /// channel is in phase {current:?}, which does not permit the requested
    /// operation (requires one of {required:?})
    PhaseMismatch {
        current: crate::fsm::ChannelPhase,
        required: &'static [&'static str],
    },

    /// peer sent a commit_sig that does not verify against the local
    /// commitment transaction it was supposed to sign
    InvalidCommitSignature,

    /// peer sent a commit_sig together with {offered} HTLC signatures, but
    /// the local commitment transaction being signed has {expected}
    /// outstanding HTLCs
    HtlcSignatureCountMismatch { offered: usize, expected: usize },

    /// peer sent an HTLC signature that does not verify against the
    /// corresponding HTLC transaction
    InvalidHtlcSignature { htlc_id: u64 },

    /// peer sent a revoke_and_ack whose per_commitment_secret does not hash
    /// to the previously advertised per_commitment_point
    InvalidRevocationSecret,

    /// peer attempted to revoke a commitment it had never signed
    SpuriousRevocation,

    /// the funding transaction output does not match the channel's expected
    /// 2-of-2 multisig script
    FundingScriptMismatch,

    /// peer violated message ordering: {0}
    OutOfOrder(&'static str),

    /// the channel funding output was spent by a transaction that does not
    /// match any commitment we know about; cannot construct a penalty
    /// transaction
    UnrecognizedSpendingTransaction,

    /// signer refused to produce a signature for this channel: {0}
    SignerError(String),

    /// sendCommit was called with no pending local or remote proposals to
    /// sign
    NothingToSign,

    /// an AddHtlc command was rejected: {error}
    AddHtlcRejected {
        error: InvariantError,
        channel_update: crate::messages::ChannelUpdate,
    },

    /// {0}
    #[from]
    #[display(inner)]
    Policy(crate::config::PolicyError),
}

/// Errors during the `channel_reestablish` synchronization handshake.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ReestablishError {
    /// requested to re-establish a channel that has no permanent channel_id
    /// assigned yet, meaning the funding transaction was never confirmed
    NoPermanentId,

    /// local channel id {local} does not match the one provided by the
    /// remote peer ({remote}) during reestablishment
    ChannelIdMismatch { remote: ChannelId, local: ChannelId },

    /// peer's next_commitment_number {remote_next} is behind our own
    /// records (we are at commitment {local_next}); peer appears to have
    /// lost state
    PeerBehind { remote_next: u64, local_next: u64 },

    /// peer's next_commitment_number {remote_next} is ahead of what we
    /// expect ({local_next} + 1); we appear to have lost state and must
    /// not continue, per BOLT-2, without requiring the peer's proof of
    /// last per-commitment secret
    PeerAhead { remote_next: u64, local_next: u64 },

    /// peer's your_last_per_commitment_secret does not match the secret we
    /// actually revealed for that commitment index; peer is misbehaving or
    /// we are talking to the wrong channel
    LastSecretMismatch,
}

/// Tier 3: a condition worth logging because it indicates degraded
/// operation, but that does not by itself invalidate the channel or reject
/// an update. Advisories are produced alongside normal `Ok` results, not
/// returned as an `Err`.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display(doc_comments)]
pub enum Advisory {
    /// dust-valued HTLC exposure on the {side} commitment reached
    /// {exposure_msat} msat, which is above {warn_threshold_sat} sat of the
    /// configured {cap_sat} sat cap; still accepted but approaching the
    /// limit
    ApproachingDustExposureCap {
        side: &'static str,
        exposure_msat: u64,
        warn_threshold_sat: u64,
        cap_sat: u64,
    },

    /// feerate has not been updated in {blocks_since_update} blocks; the
    /// commitment transaction may not confirm promptly if force-closed now
    StaleFeerate { blocks_since_update: u32 },

    /// peer has been offline for {seconds} seconds; HTLCs with
    /// cltv_expiry within {fulfill_safety_before_timeout} blocks of expiry
    /// may need a unilateral close to avoid on-chain timeout races
    PeerOfflineNearHtlcExpiry {
        seconds: u64,
        fulfill_safety_before_timeout: u32,
    },

    /// funding output was spent by transaction {txid}, which matches none of
    /// our known commitments or a reconstructible revoked index; ignoring
    /// it, as it is most likely an unrelated spend such as a splice
    UnrecognizedFundingSpend { txid: bitcoin::Txid },
}
