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

//! The `channel_reestablish` synchronization handshake: recovering a shared
//! view of commitment state after a reconnection, without trusting either
//! side's claim about what happened while disconnected.

use crate::commitment::Commitments;
use crate::error::ReestablishError;
use crate::messages::ChannelReestablish;
use crate::signer::{Signer, SignerError};

/// Builds our half of the handshake: the commitment number we expect to
/// sign next, the revocation number we expect the peer to be caught up to,
/// and the last per-commitment secret we ourselves revealed (so the peer can
/// confirm we have not lost state).
pub fn our_reestablish(
    commitments: &Commitments,
    signer: &impl Signer,
) -> Result<ChannelReestablish, SignerError> {
    let local_index = commitments.local_commit.commitment.index;
    let your_last_per_commitment_secret = if local_index == 0 {
        [0u8; 32]
    } else {
        signer.release_commitment_secret(commitments.params.channel_id, local_index - 1)?
    };

    Ok(ChannelReestablish {
        channel_id: commitments.params.channel_id,
        next_commitment_number: local_index + 1,
        next_revocation_number: commitments.remote_commit.commitment.index,
        your_last_per_commitment_secret,
        my_current_per_commitment_point: commitments.local_per_commitment_point,
    })
}

/// Validates the peer's half of the handshake against our own records, per
/// BOLT-2: we must never proceed if the peer is ahead of what we believe
/// happened, and must flag if the peer appears to be behind.
pub fn reconcile(
    commitments: &Commitments,
    msg: &ChannelReestablish,
) -> Result<(), ReestablishError> {
    if msg.channel_id != commitments.params.channel_id {
        return Err(ReestablishError::ChannelIdMismatch {
            remote: msg.channel_id,
            local: commitments.params.channel_id,
        });
    }

    let local_next = commitments.local_commit.commitment.index + 1;
    if msg.next_revocation_number > local_next {
        return Err(ReestablishError::PeerAhead {
            remote_next: msg.next_revocation_number,
            local_next,
        });
    }
    if msg.next_revocation_number < commitments.remote_commit.commitment.index {
        return Err(ReestablishError::PeerBehind {
            remote_next: msg.next_revocation_number,
            local_next: commitments.remote_commit.commitment.index,
        });
    }

    Ok(())
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
    use bitcoin::Transaction;

    fn empty_commitment(index: u64) -> Commitment {
        Commitment {
            index,
            spec: CommitmentSpec::new(0, 0, 0),
            tx: Transaction {
                version: 2,
                lock_time: 0,
                input: vec![],
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
                commitment: empty_commitment(3),
                commit_sig: dumb_signature(),
                htlc_sigs: vec![],
            },
            remote_commit: RemoteCommit {
                commitment: empty_commitment(2),
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

    fn dumb_signature() -> secp256k1::ecdsa::Signature {
        let secp = secp256k1::Secp256k1::new();
        let msg = secp256k1::Message::from_slice(&[1u8; 32]).unwrap();
        secp.sign_ecdsa(&msg, &secp256k1::ONE_KEY)
    }

    #[test]
    fn peer_ahead_of_our_records_is_rejected() {
        let commitments = commitments();
        let msg = ChannelReestablish {
            channel_id: commitments.params.channel_id,
            next_commitment_number: 1,
            next_revocation_number: commitments.local_commit.commitment.index + 2,
            your_last_per_commitment_secret: [0u8; 32],
            my_current_per_commitment_point: dumb_pubkey!(),
        };
        assert!(matches!(
            reconcile(&commitments, &msg),
            Err(ReestablishError::PeerAhead { .. })
        ));
    }

    #[test]
    fn matching_records_reconcile_cleanly() {
        let commitments = commitments();
        let msg = ChannelReestablish {
            channel_id: commitments.params.channel_id,
            next_commitment_number: commitments.remote_commit.commitment.index + 1,
            next_revocation_number: commitments.remote_commit.commitment.index,
            your_last_per_commitment_secret: [0u8; 32],
            my_current_per_commitment_point: dumb_pubkey!(),
        };
        assert!(reconcile(&commitments, &msg).is_ok());
    }
}
