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

//! The channel finite-state machine: a closed set of phases
//! (NORMAL/SHUTDOWN/NEGOTIATING/CLOSING/OFFLINE/SYNCING), the commands and
//! wire messages each phase accepts, and the pure
//! `(ChannelActor, Event) -> Vec<Effect>` dispatch that drives a channel
//! without performing any I/O itself.

pub mod reestablish;

use std::collections::HashMap;

use bitcoin::{OutPoint, Transaction};
use secp256k1::{Secp256k1, Signing, Verification};

use crate::closing;
use crate::commitment::{Commitments, RemoteNextCommitInfo, Update};
use crate::config::ChannelConfig;
use crate::error::{Advisory, ChannelError, InvariantError};
use crate::ids::{ChannelId, HashLock, HashPreimage};
use crate::invariants;
use crate::keys::shachain::ShachainConsumer;
use crate::keys::{LocalKeyset, RemoteKeyset};
use crate::messages::{self, PeerMessage};
use crate::protocol::{self, UpdateState};
use crate::signer::Signer;

/// Channel lifecycle once past funding: the phases this crate's state
/// machine actually gates commands and messages on. Opening negotiation
/// (INIT/PROPOSED/ACCEPTED/... up to funding lock-in) is a collaborator's
/// concern and produces a [`ChannelActor`] already in `Normal`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum ChannelPhase {
    /// channel open for HTLC traffic in both directions
    #[display("NORMAL")]
    Normal,

    /// a mutual close has been initiated; no new HTLCs accepted, existing
    /// ones are being drained
    #[display("SHUTDOWN")]
    Shutdown,

    /// both change logs are drained; exchanging `closing_signed` to agree
    /// a mutual-close fee
    #[display("NEGOTIATING-{round}")]
    Negotiating { round: usize },

    /// a commitment (ours, theirs, or a revoked one) has hit the chain;
    /// claim/penalty transactions are being tracked to confirmation
    #[display("CLOSING")]
    Closing,

    /// peer connection lost; signed state is retained, unsigned local
    /// proposals have been failed back upstream
    #[display("OFFLINE")]
    Offline,

    /// peer reconnected; exchanging `channel_reestablish` before
    /// returning to `Normal`
    #[display("SYNCING")]
    Syncing,
}

impl ChannelPhase {
    fn name(self) -> &'static str {
        match self {
            ChannelPhase::Normal => "NORMAL",
            ChannelPhase::Shutdown => "SHUTDOWN",
            ChannelPhase::Negotiating { .. } => "NEGOTIATING",
            ChannelPhase::Closing => "CLOSING",
            ChannelPhase::Offline => "OFFLINE",
            ChannelPhase::Syncing => "SYNCING",
        }
    }
}

/// A command issued to the channel by a local collaborator (relayer, API,
/// timers) as opposed to a message arriving from the peer.
#[derive(Clone, Debug)]
pub enum Command {
    AddHtlc {
        amount_msat: u64,
        payment_hash: HashLock,
        cltv_expiry: u32,
        onion_routing_packet: messages::OnionPacket,
    },
    FulfillHtlc {
        htlc_id: u64,
        payment_preimage: HashPreimage,
    },
    FailHtlc {
        htlc_id: u64,
        reason: Vec<u8>,
    },
    FailMalformedHtlc {
        htlc_id: u64,
        sha256_of_onion: HashLock,
        failure_code: u16,
    },
    UpdateFee {
        feerate_per_kw: u32,
    },
    Sign,
    Close {
        scriptpubkey: bitcoin::Script,
    },
    ForceClose,
}

/// Everything the actor's dispatch function can be handed: a local command,
/// an inbound peer message, or a notification about the outside world.
#[derive(Clone, Debug)]
pub enum Event {
    Command(Command),
    PeerMessage(PeerMessage),
    CurrentBlockHeight(u32),
    CurrentFeerates { feerate_per_kw: u32 },
    PeerDisconnected,
    PeerReconnected,
    WatchFundingSpent(Transaction),
}

/// Target confirmation priority for a transaction submitted to the
/// publisher: either a specific block height (an HTLC's cltv_expiry) or a
/// generic priority tier.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConfirmationTarget {
    Absolute(u32),
    Low,
    Medium,
    High,
}

/// A side effect the caller must carry out and, for anything that produces
/// further input, feed the result back in as an [`Event`]. The dispatch
/// function itself never performs any of these.
#[derive(Clone, Debug)]
pub enum Effect {
    SendMessage(PeerMessage),
    Persist,
    PublishTx {
        tx: Transaction,
        target: ConfirmationTarget,
    },
    WatchTxConfirmed(bitcoin::Txid),
    WatchOutputSpent(OutPoint),
    NotifyHtlcForwarded { htlc_id: u64 },
    NotifyChannelDown,
    Log(Advisory),
    /// a revoked commitment was just observed on-chain at `commitment_number`;
    /// the historical HTLC set for that commitment is not retained in memory
    /// and must be fetched from persisted storage before a penalty
    /// transaction can be built (see [`crate::closing::revoked_commit_penalty`]).
    FetchRevokedCommitmentHtlcs { commitment_number: u64 },
}

/// The full state of one channel actor: its phase, its cross-signed and
/// pending commitment data, and the ambient values (chain height, feerate)
/// it needs to evaluate invariants and HTLC-expiry races.
pub struct ChannelActor {
    pub phase: ChannelPhase,
    pub commitments: Commitments,
    pub update_state: UpdateState,
    pub config: ChannelConfig,
    pub local_keys: LocalKeyset,
    pub remote_keys: RemoteKeyset,
    pub funding_outpoint: OutPoint,
    pub dust_limit_sat: u64,
    pub obscuring_factor: u64,
    pub current_height: u32,
    pub current_feerate_per_kw: u32,
    /// Secrets the remote has revealed for its own superseded commitments,
    /// used to recognize and punish a revoked commitment broadcast on-chain.
    pub shachain: ShachainConsumer,
    /// Preimages already learned, whether or not the in-channel fulfillment
    /// update has been cross-signed yet. Kept around so a force-close can
    /// still build an HTLC-success claim immediately.
    pub known_preimages: HashMap<HashLock, HashPreimage>,
}

impl ChannelActor {
    pub fn channel_id(&self) -> ChannelId {
        self.commitments.params.channel_id
    }

    /// Builds the `channel_update` snapshot for the channel's current state,
    /// bucketing `htlc_maximum_msat` off the local commitment's current
    /// `to_local_msat` rather than a value fixed at channel open.
    pub fn current_channel_update(&self) -> messages::ChannelUpdate {
        let available_to_local_msat = self.commitments.local_commit.commitment.spec.to_local_msat;
        messages::ChannelUpdate {
            channel_id: self.channel_id(),
            disabled: !matches!(self.phase, ChannelPhase::Normal),
            cltv_expiry_delta: self.config.cltv_expiry_delta,
            htlc_minimum_msat: self.commitments.params.local_params.htlc_minimum_msat,
            htlc_maximum_msat: self
                .config
                .htlc_maximum_msat_for_balance(available_to_local_msat),
            fee_base_msat: self.config.forwarding_fee_base_msat,
            fee_proportional_millionths: self.config.forwarding_fee_proportional_millionths,
        }
    }

    fn require_phase(
        &self,
        allowed: &'static [&'static str],
    ) -> Result<(), ChannelError> {
        if allowed.contains(&self.phase.name()) {
            Ok(())
        } else {
            Err(ChannelError::PhaseMismatch {
                current: self.phase,
                required: allowed,
            })
        }
    }

    /// Drives the actor with one [`Event`], returning the effects the
    /// caller must execute. A command/message rejected for phase or
    /// invariant reasons returns `Err` without mutating any state.
    pub fn handle<C: Signing + Verification>(
        &mut self,
        secp: &Secp256k1<C>,
        signer: &impl Signer,
        event: Event,
    ) -> Result<Vec<Effect>, ChannelError> {
        match event {
            Event::Command(command) => self.handle_command(secp, signer, command),
            Event::PeerMessage(message) => self.handle_peer_message(secp, signer, message),
            Event::CurrentBlockHeight(height) => {
                self.current_height = height;
                self.check_htlc_expiry_races(secp, signer)
            }
            Event::CurrentFeerates { feerate_per_kw } => {
                self.current_feerate_per_kw = feerate_per_kw;
                Ok(Vec::new())
            }
            Event::PeerDisconnected => {
                self.phase = ChannelPhase::Offline;
                Ok(Vec::new())
            }
            Event::PeerReconnected => {
                self.phase = ChannelPhase::Syncing;
                let reestablish =
                    reestablish::our_reestablish(&self.commitments, signer)
                        .map_err(|e| ChannelError::SignerError(e.to_string()))?;
                Ok(vec![Effect::SendMessage(PeerMessage::ChannelReestablish(
                    reestablish,
                ))])
            }
            Event::WatchFundingSpent(tx) => {
                self.phase = ChannelPhase::Closing;
                let txid = tx.txid();
                match closing::classify_funding_spend(
                    &self.commitments,
                    &self.shachain,
                    self.obscuring_factor,
                    &tx,
                ) {
                    closing::FundingSpend::LocalCommit => {
                        Ok(vec![Effect::WatchTxConfirmed(txid)])
                    }
                    closing::FundingSpend::RemoteCommit => {
                        let mut effects = vec![Effect::WatchTxConfirmed(txid)];
                        if let Some(sweep_scriptpubkey) =
                            self.local_keys.shutdown_scriptpubkey.clone()
                        {
                            let known_preimages = &self.known_preimages;
                            effects.extend(closing::remote_force_close(
                                secp,
                                signer,
                                &self.commitments,
                                &self.commitments.remote_commit.commitment,
                                self.commitments.remote_commit.remote_per_commitment_point,
                                &self.local_keys,
                                &self.remote_keys,
                                self.current_height,
                                self.current_feerate_per_kw,
                                self.dust_limit_sat,
                                &sweep_scriptpubkey,
                                |hash| known_preimages.get(&hash).copied(),
                            )?);
                        }
                        Ok(effects)
                    }
                    closing::FundingSpend::RemoteCommitNext => {
                        let mut effects = vec![Effect::WatchTxConfirmed(txid)];
                        if let (Some(sweep_scriptpubkey), RemoteNextCommitInfo::Waiting {
                            pending_commitment,
                            pending_remote_per_commitment_point,
                            ..
                        }) = (
                            self.local_keys.shutdown_scriptpubkey.clone(),
                            &self.commitments.remote_next_commit_info,
                        ) {
                            let known_preimages = &self.known_preimages;
                            effects.extend(closing::remote_force_close(
                                secp,
                                signer,
                                &self.commitments,
                                pending_commitment,
                                *pending_remote_per_commitment_point,
                                &self.local_keys,
                                &self.remote_keys,
                                self.current_height,
                                self.current_feerate_per_kw,
                                self.dust_limit_sat,
                                &sweep_scriptpubkey,
                                |hash| known_preimages.get(&hash).copied(),
                            )?);
                        }
                        Ok(effects)
                    }
                    closing::FundingSpend::Revoked { commitment_number } => Ok(vec![
                        Effect::WatchTxConfirmed(txid),
                        Effect::FetchRevokedCommitmentHtlcs { commitment_number },
                    ]),
                    closing::FundingSpend::Unrecognized => Ok(vec![
                        Effect::WatchTxConfirmed(txid),
                        Effect::Log(Advisory::UnrecognizedFundingSpend { txid }),
                    ]),
                }
            }
        }
    }

    fn handle_command<C: Signing + Verification>(
        &mut self,
        secp: &Secp256k1<C>,
        signer: &impl Signer,
        command: Command,
    ) -> Result<Vec<Effect>, ChannelError> {
        match command {
            Command::AddHtlc {
                amount_msat,
                payment_hash,
                cltv_expiry,
                onion_routing_packet,
            } => {
                self.require_phase(&["NORMAL"])?;
                let pending = Update::AddHtlc {
                    htlc_id: self.update_state.local_next_htlc_id,
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                };
                // Checked against remote's advertised limits, since this
                // HTLC is offered to them and will appear on their
                // commitment.
                let remote_spec_after =
                    remote_spec_if_local_adds(self, pending.clone())?;
                let reject = |error: InvariantError| ChannelError::AddHtlcRejected {
                    error,
                    channel_update: self.current_channel_update(),
                };
                invariants::validate_add_htlc(
                    self.channel_id(),
                    &remote_spec_after,
                    self.commitments.params.remote_params.dust_limit_satoshis,
                    &self.commitments.params.remote_params,
                    &self.config,
                    amount_msat,
                    cltv_expiry,
                    self.current_height,
                    false,
                )
                .map_err(reject)?;
                // Checked against our own balance, since we are the one
                // paying for this HTLC (and its share of commitment fees,
                // if we are the funder).
                let local_spec_after = local_spec_if_local_adds(self, pending)?;
                // Either commitment's dust exposure can independently
                // breach its own cap; the call above only checked the
                // remote's.
                invariants::check_dust_exposure(
                    self.channel_id(),
                    &local_spec_after,
                    self.commitments.params.local_params.dust_limit_satoshis,
                    self.config.max_dust_htlc_exposure_msat,
                    true,
                )
                .map_err(reject)?;
                invariants::validate_reserve_and_fees(
                    &local_spec_after,
                    self.commitments.params.local_params.dust_limit_satoshis,
                    self.commitments.params.local_params.channel_reserve_satoshis,
                    self.commitments.params.direction.local_is_funder(),
                    self.commitments.anchor_outputs,
                )
                .map_err(reject)?;

                let htlc_id = protocol::add_local_proposal(
                    &mut self.update_state,
                    |htlc_id| Update::AddHtlc {
                        htlc_id,
                        amount_msat,
                        payment_hash,
                        cltv_expiry,
                    },
                );
                Ok(vec![Effect::SendMessage(PeerMessage::UpdateAddHtlc(
                    messages::UpdateAddHtlc {
                        channel_id: self.channel_id(),
                        htlc_id,
                        amount_msat,
                        payment_hash,
                        cltv_expiry,
                        onion_routing_packet,
                    },
                ))])
            }

            Command::FulfillHtlc {
                htlc_id,
                payment_preimage,
            } => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                let update = protocol::prepare_fulfill(
                    &self.commitments.local_commit.commitment.spec,
                    htlc_id,
                    payment_preimage,
                )?;
                protocol::add_local_proposal(&mut self.update_state, |_| update.clone());
                self.known_preimages
                    .insert(payment_preimage.hash(), payment_preimage);
                Ok(vec![Effect::SendMessage(PeerMessage::UpdateFulfillHtlc(
                    messages::UpdateFulfillHtlc {
                        channel_id: self.channel_id(),
                        htlc_id,
                        payment_preimage,
                    },
                ))])
            }

            Command::FailHtlc { htlc_id, reason } => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                protocol::add_local_proposal(&mut self.update_state, |_| {
                    Update::FailHtlc {
                        htlc_id,
                        reason: reason.clone(),
                    }
                });
                Ok(vec![Effect::SendMessage(PeerMessage::UpdateFailHtlc(
                    messages::UpdateFailHtlc {
                        channel_id: self.channel_id(),
                        htlc_id,
                        reason,
                    },
                ))])
            }

            Command::FailMalformedHtlc {
                htlc_id,
                sha256_of_onion,
                failure_code,
            } => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                protocol::add_local_proposal(&mut self.update_state, |_| {
                    Update::FailMalformedHtlc {
                        htlc_id,
                        sha256_of_onion,
                        failure_code,
                    }
                });
                Ok(vec![Effect::SendMessage(PeerMessage::UpdateFailMalformedHtlc(
                    messages::UpdateFailMalformedHtlc {
                        channel_id: self.channel_id(),
                        htlc_id,
                        sha256_of_onion,
                        failure_code,
                    },
                ))])
            }

            Command::UpdateFee { feerate_per_kw } => {
                self.require_phase(&["NORMAL"])?;
                if !self.commitments.params.direction.local_is_funder() {
                    return Err(ChannelError::OutOfOrder(
                        "only the channel funder may send update_fee",
                    ));
                }
                invariants::validate_feerate_update(
                    &self.config,
                    self.commitments.local_commit.commitment.spec.feerate_per_kw,
                    feerate_per_kw,
                )
                .map_err(ChannelError::Invariant)?;
                protocol::add_local_proposal(&mut self.update_state, |_| Update::FeeUpdate {
                    feerate_per_kw,
                });
                Ok(vec![Effect::SendMessage(PeerMessage::UpdateFee(
                    messages::UpdateFee {
                        channel_id: self.channel_id(),
                        feerate_per_kw,
                    },
                ))])
            }

            Command::Sign => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                let sent = protocol::send_commit(
                    secp,
                    &mut self.commitments,
                    &mut self.update_state,
                    signer,
                    &self.local_keys,
                    &self.remote_keys,
                    self.funding_outpoint,
                    self.dust_limit_sat,
                    self.obscuring_factor,
                )?;
                Ok(match sent {
                    Some(commit_sig) => vec![
                        Effect::Persist,
                        Effect::SendMessage(PeerMessage::CommitSig(commit_sig)),
                    ],
                    None => Vec::new(),
                })
            }

            Command::Close { scriptpubkey } => {
                self.require_phase(&["NORMAL"])?;
                if !self.update_state.local_log.is_empty() {
                    return Err(ChannelError::OutOfOrder(
                        "cannot begin a mutual close with unsigned local changes pending",
                    ));
                }
                if !self.update_state.remote_log.is_empty() {
                    return Err(ChannelError::OutOfOrder(
                        "cannot begin a mutual close with unsigned remote changes pending",
                    ));
                }
                self.phase = ChannelPhase::Shutdown;
                Ok(vec![Effect::SendMessage(PeerMessage::Shutdown(
                    messages::Shutdown {
                        channel_id: self.channel_id(),
                        scriptpubkey,
                    },
                ))])
            }

            Command::ForceClose => self.force_close(secp, signer),
        }
    }

    fn handle_peer_message<C: Signing + Verification>(
        &mut self,
        secp: &Secp256k1<C>,
        signer: &impl Signer,
        message: PeerMessage,
    ) -> Result<Vec<Effect>, ChannelError> {
        match message {
            PeerMessage::UpdateAddHtlc(msg) => {
                self.require_phase(&["NORMAL"])?;
                let pending = Update::AddHtlc {
                    htlc_id: msg.htlc_id,
                    amount_msat: msg.amount_msat,
                    payment_hash: msg.payment_hash,
                    cltv_expiry: msg.cltv_expiry,
                };
                // Checked against our own advertised limits, since this
                // HTLC is offered to us and will appear on our commitment.
                let local_spec_after =
                    local_spec_if_remote_adds(self, pending.clone())?;
                invariants::validate_add_htlc(
                    self.channel_id(),
                    &local_spec_after,
                    self.commitments.params.local_params.dust_limit_satoshis,
                    &self.commitments.params.local_params,
                    &self.config,
                    msg.amount_msat,
                    msg.cltv_expiry,
                    self.current_height,
                    true,
                )
                .map_err(ChannelError::Invariant)?;
                // Checked against the peer's own balance, since they are
                // the one paying for this HTLC.
                let remote_spec_after =
                    remote_spec_if_remote_adds(self, pending)?;
                // Either commitment's dust exposure can independently
                // breach its own cap; the call above only checked the
                // local one.
                invariants::check_dust_exposure(
                    self.channel_id(),
                    &remote_spec_after,
                    self.commitments.params.remote_params.dust_limit_satoshis,
                    self.config.max_dust_htlc_exposure_msat,
                    false,
                )
                .map_err(ChannelError::Invariant)?;
                invariants::validate_reserve_and_fees(
                    &remote_spec_after,
                    self.commitments.params.remote_params.dust_limit_satoshis,
                    self.commitments.params.remote_params.channel_reserve_satoshis,
                    !self.commitments.params.direction.local_is_funder(),
                    self.commitments.anchor_outputs,
                )
                .map_err(ChannelError::Invariant)?;

                protocol::add_remote_proposal(&mut self.update_state, pending)?;
                Ok(Vec::new())
            }

            PeerMessage::UpdateFulfillHtlc(msg) => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                let htlc = self
                    .commitments
                    .local_commit
                    .commitment
                    .spec
                    .htlcs
                    .iter()
                    .find(|h| h.htlc_id == msg.htlc_id)
                    .ok_or(ChannelError::OutOfOrder(
                        "peer fulfilled an unknown htlc_id",
                    ))?;
                if msg.payment_preimage.hash() != htlc.payment_hash {
                    return Err(ChannelError::Invariant(InvariantError::PreimageMismatch {
                        htlc_id: msg.htlc_id,
                    }));
                }
                protocol::add_remote_proposal(
                    &mut self.update_state,
                    Update::FulfillHtlc {
                        htlc_id: msg.htlc_id,
                        payment_preimage: msg.payment_preimage,
                    },
                )?;
                self.known_preimages
                    .insert(msg.payment_preimage.hash(), msg.payment_preimage);
                Ok(Vec::new())
            }

            PeerMessage::UpdateFailHtlc(msg) => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                protocol::add_remote_proposal(
                    &mut self.update_state,
                    Update::FailHtlc {
                        htlc_id: msg.htlc_id,
                        reason: msg.reason,
                    },
                )?;
                Ok(Vec::new())
            }

            PeerMessage::UpdateFailMalformedHtlc(msg) => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                protocol::add_remote_proposal(
                    &mut self.update_state,
                    Update::FailMalformedHtlc {
                        htlc_id: msg.htlc_id,
                        sha256_of_onion: msg.sha256_of_onion,
                        failure_code: msg.failure_code,
                    },
                )?;
                Ok(Vec::new())
            }

            PeerMessage::UpdateFee(msg) => {
                self.require_phase(&["NORMAL"])?;
                if self.commitments.params.direction.local_is_funder() {
                    return Err(ChannelError::OutOfOrder(
                        "peer is not the funder and may not send update_fee",
                    ));
                }
                invariants::validate_feerate_update(
                    &self.config,
                    self.commitments.local_commit.commitment.spec.feerate_per_kw,
                    msg.feerate_per_kw,
                )
                .map_err(ChannelError::Invariant)?;
                protocol::add_remote_proposal(
                    &mut self.update_state,
                    Update::FeeUpdate {
                        feerate_per_kw: msg.feerate_per_kw,
                    },
                )?;
                Ok(Vec::new())
            }

            PeerMessage::CommitSig(msg) => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                let revoke = protocol::receive_commit(
                    secp,
                    &mut self.commitments,
                    &mut self.update_state,
                    signer,
                    &self.local_keys,
                    &self.remote_keys,
                    self.funding_outpoint,
                    self.dust_limit_sat,
                    self.obscuring_factor,
                    &msg,
                )?;
                Ok(vec![
                    Effect::Persist,
                    Effect::SendMessage(PeerMessage::RevokeAndAck(revoke)),
                ])
            }

            PeerMessage::RevokeAndAck(msg) => {
                self.require_phase(&["NORMAL", "SHUTDOWN"])?;
                let revoked_index = self.commitments.remote_commit.commitment.index;
                let previously_locked_in: std::collections::HashSet<u64> = self
                    .commitments
                    .remote_commit
                    .commitment
                    .spec
                    .htlcs
                    .iter()
                    .filter(|h| h.offered_by_owner)
                    .map(|h| h.htlc_id)
                    .collect();
                protocol::receive_revocation(
                    secp,
                    &mut self.commitments,
                    &mut self.update_state,
                    &self.remote_keys,
                    &msg,
                )?;
                let _ = self.shachain.insert(revoked_index, msg.per_commitment_secret);
                let mut effects = vec![Effect::Persist];
                // An HTLC the peer offered is irrevocably committed on both
                // sides only once their revocation confirms it on our view
                // of their commitment too; that is the right moment to hand
                // it off for forwarding, and it only happens once per id.
                effects.extend(
                    self.commitments
                        .remote_commit
                        .commitment
                        .spec
                        .htlcs
                        .iter()
                        .filter(|h| h.offered_by_owner && !previously_locked_in.contains(&h.htlc_id))
                        .map(|h| Effect::NotifyHtlcForwarded { htlc_id: h.htlc_id }),
                );
                Ok(effects)
            }

            PeerMessage::Shutdown(msg) => {
                self.require_phase(&["NORMAL"])?;
                self.phase = ChannelPhase::Shutdown;
                let _ = msg;
                Ok(Vec::new())
            }

            PeerMessage::ChannelReestablish(msg) => {
                self.require_phase(&["SYNCING", "OFFLINE"])?;
                reestablish::reconcile(&self.commitments, &msg)?;
                self.phase = ChannelPhase::Normal;
                Ok(Vec::new())
            }

            PeerMessage::ChannelReady(_) | PeerMessage::AnnouncementSignatures(_) => {
                Ok(Vec::new())
            }

            PeerMessage::ClosingSigned(_) => {
                self.require_phase(&["NEGOTIATING"])?;
                Ok(Vec::new())
            }

            PeerMessage::Error(_) => self.force_close(secp, signer),
            PeerMessage::Warning(_) => Ok(Vec::new()),
        }
    }

    /// Publishes our own commitment transaction and, where a sweep
    /// destination is configured, every claim reachable from it without
    /// further negotiation (see [`closing::local_force_close`]).
    fn force_close<C: Signing + Verification>(
        &mut self,
        secp: &Secp256k1<C>,
        signer: &impl Signer,
    ) -> Result<Vec<Effect>, ChannelError> {
        self.phase = ChannelPhase::Closing;
        let mut effects = match self.local_keys.shutdown_scriptpubkey.clone() {
            Some(sweep_scriptpubkey) => {
                let known_preimages = &self.known_preimages;
                closing::local_force_close(
                    secp,
                    signer,
                    &self.commitments,
                    &self.local_keys,
                    &self.remote_keys,
                    self.current_feerate_per_kw,
                    self.dust_limit_sat,
                    &sweep_scriptpubkey,
                    |hash| known_preimages.get(&hash).copied(),
                )?
            }
            None => vec![
                Effect::PublishTx {
                    tx: self.commitments.local_commit.commitment.tx.clone(),
                    target: ConfirmationTarget::Medium,
                },
                Effect::WatchTxConfirmed(self.commitments.local_commit.commitment.tx.txid()),
            ],
        };
        effects.push(Effect::NotifyChannelDown);
        Ok(effects)
    }

    /// Force-closes if any fulfilled-but-unrevoked incoming HTLC is within
    /// `fulfill_safety_before_timeout_blocks` of its `cltv_expiry`, so we
    /// never lose the race to claim it on-chain.
    fn check_htlc_expiry_races<C: Signing + Verification>(
        &mut self,
        secp: &Secp256k1<C>,
        signer: &impl Signer,
    ) -> Result<Vec<Effect>, ChannelError> {
        let deadline_reached = self
            .commitments
            .local_commit
            .commitment
            .spec
            .htlcs
            .iter()
            .any(|htlc| {
                !htlc.offered_by_owner
                    && self.current_height + self.config.fulfill_safety_before_timeout_blocks
                        >= htlc.cltv_expiry
            });
        if deadline_reached {
            self.force_close(secp, signer)
        } else {
            Ok(Vec::new())
        }
    }
}

type Spec = crate::commitment::CommitmentSpec;

/// Four ways a pending `AddHtlc` can be projected onto one of the two
/// commitments, depending on who is proposing it and whose balance the
/// resulting spec needs to expose in `to_local_msat`:
///
/// - [`local_spec_if_local_adds`]: our own balance, for checking our reserve
///   when we are the proposer.
/// - [`remote_spec_if_local_adds`]: the peer's commitment, for checking
///   their advertised HTLC limits against an HTLC we are about to offer.
/// - [`local_spec_if_remote_adds`]: our own commitment, for checking our
///   advertised HTLC limits against an HTLC the peer just offered.
/// - [`remote_spec_if_remote_adds`]: the peer's balance, for checking their
///   reserve when they are the proposer.
fn local_spec_if_local_adds(actor: &ChannelActor, update: Update) -> Result<Spec, ChannelError> {
    let mut local_log = actor.update_state.local_log.proposals().to_vec();
    local_log.push(update);
    let remote_log = actor.update_state.remote_log.proposals();
    protocol::project_spec(&actor.commitments.local_commit.commitment.spec, &local_log, remote_log)
}

fn remote_spec_if_local_adds(actor: &ChannelActor, update: Update) -> Result<Spec, ChannelError> {
    let remote_log = actor.update_state.remote_log.proposals();
    let mut local_log = actor.update_state.local_log.proposals().to_vec();
    local_log.push(update);
    protocol::project_spec(&actor.commitments.remote_commit.commitment.spec, remote_log, &local_log)
}

fn local_spec_if_remote_adds(actor: &ChannelActor, update: Update) -> Result<Spec, ChannelError> {
    let local_log = actor.update_state.local_log.proposals();
    let mut remote_log = actor.update_state.remote_log.proposals().to_vec();
    remote_log.push(update);
    protocol::project_spec(&actor.commitments.local_commit.commitment.spec, local_log, &remote_log)
}

fn remote_spec_if_remote_adds(actor: &ChannelActor, update: Update) -> Result<Spec, ChannelError> {
    let mut remote_log = actor.update_state.remote_log.proposals().to_vec();
    remote_log.push(update);
    let local_log = actor.update_state.local_log.proposals();
    protocol::project_spec(&actor.commitments.remote_commit.commitment.spec, &remote_log, local_log)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commitment::{
        ChannelParams, Commitment, CommitmentSpec, LocalCommit, RemoteCommit,
    };
    use crate::config::PeerParams;
    use crate::ids::{ChannelId, Direction};
    use crate::keys::{derive_privkey, derive_revocation_privkey, obscuring_factor, LocalPubkey};
    use crate::signer::SignerError;
    use amplify::{DumbDefault, Slice32};
    use bitcoin::hashes::{sha256, Hash, HashEngine};
    use bitcoin::util::bip32::KeySource;
    use bitcoin::Script;
    use secp256k1::ecdsa::Signature;
    use secp256k1::SecretKey;

    struct DumbSigner;

    fn dumb_signature() -> Signature {
        let secp = Secp256k1::new();
        let msg = secp256k1::Message::from_slice(&[3u8; 32]).unwrap();
        secp.sign_ecdsa(&msg, &secp256k1::ONE_KEY)
    }

    impl Signer for DumbSigner {
        fn sign_commitment(
            &self,
            _channel_id: ChannelId,
            _tx: &Transaction,
            _funding_script: &Script,
            _funding_value_sat: u64,
        ) -> Result<Signature, SignerError> {
            Ok(dumb_signature())
        }

        fn sign_htlc_tx(
            &self,
            _channel_id: ChannelId,
            _tx: &Transaction,
            _htlc_script: &Script,
            _htlc_value_sat: u64,
            _per_commitment_point: secp256k1::PublicKey,
        ) -> Result<Signature, SignerError> {
            Ok(dumb_signature())
        }

        fn release_commitment_secret(
            &self,
            _channel_id: ChannelId,
            _index: u64,
        ) -> Result<[u8; 32], SignerError> {
            Ok([0u8; 32])
        }

        fn next_per_commitment_point(
            &self,
            _channel_id: ChannelId,
            _index: u64,
        ) -> Result<secp256k1::PublicKey, SignerError> {
            Ok(dumb_pubkey!())
        }

        fn sign_delayed_claim(
            &self,
            _channel_id: ChannelId,
            _tx: &Transaction,
            _input_index: usize,
            _witness_script: &Script,
            _value_sat: u64,
            _per_commitment_point: secp256k1::PublicKey,
        ) -> Result<Signature, SignerError> {
            Ok(dumb_signature())
        }

        fn sign_penalty_claim(
            &self,
            _channel_id: ChannelId,
            _tx: &Transaction,
            _input_index: usize,
            _witness_script: &Script,
            _value_sat: u64,
            _revoked_per_commitment_secret: [u8; 32],
        ) -> Result<Signature, SignerError> {
            Ok(dumb_signature())
        }

        fn sign_static_remote_claim(
            &self,
            _channel_id: ChannelId,
            _tx: &Transaction,
            _input_index: usize,
            _witness_script: &Script,
            _value_sat: u64,
        ) -> Result<Signature, SignerError> {
            Ok(dumb_signature())
        }

        fn sign_anchor_claim(
            &self,
            _channel_id: ChannelId,
            _tx: &Transaction,
            _input_index: usize,
            _witness_script: &Script,
            _value_sat: u64,
        ) -> Result<Signature, SignerError> {
            Ok(dumb_signature())
        }
    }

    fn empty_commitment(index: u64) -> Commitment {
        Commitment {
            index,
            spec: CommitmentSpec::new(0, 0, 0),
            tx: Transaction {
                version: 2,
                lock_time: 0,
                input: vec![bitcoin::TxIn {
                    previous_output: OutPoint::null(),
                    script_sig: Script::new(),
                    sequence: 0,
                    witness: vec![vec![index as u8]],
                }],
                output: vec![],
            },
            htlc_txs: vec![],
        }
    }

    fn actor() -> ChannelActor {
        ChannelActor {
            phase: ChannelPhase::Normal,
            commitments: Commitments {
                params: ChannelParams {
                    channel_id: ChannelId::dumb_default(),
                    channel_capacity_sat: 1_000_000,
                    direction: Direction::Outbound,
                    local_params: PeerParams::default(),
                    remote_params: PeerParams::default(),
                },
                local_commit: LocalCommit {
                    commitment: empty_commitment(5),
                    commit_sig: dumb_signature(),
                    htlc_sigs: vec![],
                },
                remote_commit: RemoteCommit {
                    commitment: empty_commitment(3),
                    remote_per_commitment_point: dumb_pubkey!(),
                },
                remote_next_commit_info: RemoteNextCommitInfo::Ready {
                    next_per_commitment_point: dumb_pubkey!(),
                },
                local_per_commitment_point: dumb_pubkey!(),
                static_remotekey: false,
                anchor_outputs: false,
                zero_fee_htlc_tx: false,
            },
            update_state: UpdateState::default(),
            config: ChannelConfig::default(),
            local_keys: LocalKeyset::dumb_default(),
            remote_keys: RemoteKeyset::dumb_default(),
            funding_outpoint: OutPoint::null(),
            dust_limit_sat: 546,
            obscuring_factor: 0,
            current_height: 100,
            current_feerate_per_kw: 10_000,
            shachain: ShachainConsumer::new(),
            known_preimages: HashMap::new(),
        }
    }

    #[test]
    fn rejects_commands_outside_their_phase() {
        let secp = Secp256k1::new();
        let signer = DumbSigner;
        let mut a = actor();
        a.phase = ChannelPhase::Closing;
        let result = a.handle(
            &secp,
            &signer,
            Event::Command(Command::AddHtlc {
                amount_msat: 1_000,
                payment_hash: HashLock::dumb_default(),
                cltv_expiry: 500,
                onion_routing_packet: messages::OnionPacket(Vec::new()),
            }),
        );
        assert!(matches!(result, Err(ChannelError::PhaseMismatch { .. })));
    }

    #[test]
    fn force_close_without_sweep_destination_publishes_bare_commitment() {
        let secp = Secp256k1::new();
        let signer = DumbSigner;
        let mut a = actor();
        let effects = a.handle(&secp, &signer, Event::Command(Command::ForceClose)).unwrap();
        assert_eq!(a.phase, ChannelPhase::Closing);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::PublishTx { .. })));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::NotifyChannelDown)));
    }

    #[test]
    fn watch_funding_spent_recognizes_local_commit() {
        let secp = Secp256k1::new();
        let signer = DumbSigner;
        let mut a = actor();
        let tx = a.commitments.local_commit.commitment.tx.clone();
        let effects = a.handle(&secp, &signer, Event::WatchFundingSpent(tx)).unwrap();
        assert_eq!(a.phase, ChannelPhase::Closing);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::WatchTxConfirmed(_)));
    }

    #[test]
    fn watch_funding_spent_logs_advisory_when_unrecognized() {
        let secp = Secp256k1::new();
        let signer = DumbSigner;
        let mut a = actor();
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![bitcoin::TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: 0,
                witness: vec![vec![0xFF]],
            }],
            output: vec![],
        };
        let effects = a.handle(&secp, &signer, Event::WatchFundingSpent(tx)).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Log(Advisory::UnrecognizedFundingSpend { .. }))));
    }

    #[test]
    fn block_height_triggers_force_close_near_htlc_expiry() {
        let secp = Secp256k1::new();
        let signer = DumbSigner;
        let mut a = actor();
        a.commitments
            .local_commit
            .commitment
            .spec
            .htlcs
            .push(crate::commitment::HtlcInfo {
                htlc_id: 1,
                amount_msat: 100_000,
                payment_hash: HashLock::dumb_default(),
                cltv_expiry: 105,
                offered_by_owner: false,
            });
        let effects = a
            .handle(&secp, &signer, Event::CurrentBlockHeight(100))
            .unwrap();
        assert_eq!(a.phase, ChannelPhase::Closing);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::NotifyChannelDown)));
    }

    #[test]
    fn block_height_does_not_force_close_when_no_htlc_near_expiry() {
        let secp = Secp256k1::new();
        let signer = DumbSigner;
        let mut a = actor();
        let effects = a
            .handle(&secp, &signer, Event::CurrentBlockHeight(50))
            .unwrap();
        assert_eq!(a.phase, ChannelPhase::Normal);
        assert!(effects.is_empty());
    }

    // The fixtures below drive two real `ChannelActor`s against each other
    // end to end, with real (if deterministic) keys, so that signatures
    // verify and on-chain scripts actually match. `DumbSigner` above is
    // fine for unit tests that never cross an actor boundary, but these
    // scenario tests need both sides to derive consistent key material.

    fn sk(tag: u8) -> SecretKey {
        let tag = if tag == 0 { 0xFF } else { tag };
        SecretKey::from_slice(&[tag; 32]).expect("repeated non-zero byte is a valid key")
    }

    struct TestSigner {
        node_tag: u8,
        funding_sk: SecretKey,
        revocation_basepoint_sk: SecretKey,
        payment_basepoint_sk: SecretKey,
        delayed_payment_basepoint_sk: SecretKey,
        htlc_basepoint_sk: SecretKey,
    }

    impl TestSigner {
        fn new(node_tag: u8) -> Self {
            TestSigner {
                node_tag,
                funding_sk: sk(node_tag.wrapping_add(1)),
                revocation_basepoint_sk: sk(node_tag.wrapping_add(2)),
                payment_basepoint_sk: sk(node_tag.wrapping_add(3)),
                delayed_payment_basepoint_sk: sk(node_tag.wrapping_add(4)),
                htlc_basepoint_sk: sk(node_tag.wrapping_add(5)),
            }
        }

        fn commitment_secret(&self, index: u64) -> [u8; 32] {
            let mut engine = sha256::Hash::engine();
            engine.input(&[self.node_tag]);
            engine.input(b"per-commitment-secret");
            engine.input(&index.to_be_bytes());
            sha256::Hash::from_engine(engine).into_inner()
        }

        fn commitment_point<C: Signing>(
            &self,
            secp: &Secp256k1<C>,
            index: u64,
        ) -> secp256k1::PublicKey {
            let secret = SecretKey::from_slice(&self.commitment_secret(index)).unwrap();
            secp256k1::PublicKey::from_secret_key(secp, &secret)
        }

        fn sign_witness(
            &self,
            tx: &Transaction,
            input_index: usize,
            witness_script: &Script,
            value_sat: u64,
            privkey: SecretKey,
        ) -> Signature {
            let secp = Secp256k1::new();
            let mut cache = bitcoin::util::sighash::SighashCache::new(tx);
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
            secp.sign_ecdsa(&message, &privkey)
        }
    }

    impl Signer for TestSigner {
        fn sign_commitment(
            &self,
            _channel_id: ChannelId,
            tx: &Transaction,
            funding_script: &Script,
            funding_value_sat: u64,
        ) -> Result<Signature, SignerError> {
            Ok(self.sign_witness(tx, 0, funding_script, funding_value_sat, self.funding_sk))
        }

        fn sign_htlc_tx(
            &self,
            _channel_id: ChannelId,
            tx: &Transaction,
            htlc_script: &Script,
            htlc_value_sat: u64,
            per_commitment_point: secp256k1::PublicKey,
        ) -> Result<Signature, SignerError> {
            let secp = Secp256k1::new();
            let privkey = derive_privkey(&secp, self.htlc_basepoint_sk, per_commitment_point);
            Ok(self.sign_witness(tx, 0, htlc_script, htlc_value_sat, privkey))
        }

        fn release_commitment_secret(
            &self,
            _channel_id: ChannelId,
            index: u64,
        ) -> Result<[u8; 32], SignerError> {
            Ok(self.commitment_secret(index))
        }

        fn next_per_commitment_point(
            &self,
            _channel_id: ChannelId,
            index: u64,
        ) -> Result<secp256k1::PublicKey, SignerError> {
            let secp = Secp256k1::new();
            Ok(self.commitment_point(&secp, index))
        }

        fn sign_delayed_claim(
            &self,
            _channel_id: ChannelId,
            tx: &Transaction,
            input_index: usize,
            witness_script: &Script,
            value_sat: u64,
            per_commitment_point: secp256k1::PublicKey,
        ) -> Result<Signature, SignerError> {
            let secp = Secp256k1::new();
            let privkey =
                derive_privkey(&secp, self.delayed_payment_basepoint_sk, per_commitment_point);
            Ok(self.sign_witness(tx, input_index, witness_script, value_sat, privkey))
        }

        fn sign_penalty_claim(
            &self,
            _channel_id: ChannelId,
            tx: &Transaction,
            input_index: usize,
            witness_script: &Script,
            value_sat: u64,
            revoked_per_commitment_secret: [u8; 32],
        ) -> Result<Signature, SignerError> {
            let secp = Secp256k1::new();
            let per_commitment_secret = SecretKey::from_slice(&revoked_per_commitment_secret)
                .map_err(|e| SignerError::Refused(e.to_string()))?;
            let privkey = derive_revocation_privkey(
                &secp,
                self.revocation_basepoint_sk,
                per_commitment_secret,
            );
            Ok(self.sign_witness(tx, input_index, witness_script, value_sat, privkey))
        }

        fn sign_static_remote_claim(
            &self,
            _channel_id: ChannelId,
            tx: &Transaction,
            input_index: usize,
            witness_script: &Script,
            value_sat: u64,
        ) -> Result<Signature, SignerError> {
            Ok(self.sign_witness(tx, input_index, witness_script, value_sat, self.payment_basepoint_sk))
        }

        fn sign_anchor_claim(
            &self,
            _channel_id: ChannelId,
            tx: &Transaction,
            input_index: usize,
            witness_script: &Script,
            value_sat: u64,
        ) -> Result<Signature, SignerError> {
            Ok(self.sign_witness(tx, input_index, witness_script, value_sat, self.funding_sk))
        }
    }

    fn genesis_commitment(index: u64, spec: CommitmentSpec) -> Commitment {
        Commitment {
            index,
            spec,
            tx: Transaction {
                version: 2,
                lock_time: 0,
                input: vec![bitcoin::TxIn {
                    previous_output: OutPoint::null(),
                    script_sig: Script::new(),
                    sequence: 0,
                    witness: vec![vec![index as u8]],
                }],
                output: vec![],
            },
            htlc_txs: vec![],
        }
    }

    fn local_keyset<C: Signing>(
        secp: &Secp256k1<C>,
        signer: &TestSigner,
        first_per_commitment_point: secp256k1::PublicKey,
    ) -> LocalKeyset {
        let key = |sk: SecretKey| LocalPubkey {
            key: secp256k1::PublicKey::from_secret_key(secp, &sk),
            source: KeySource::default(),
        };
        LocalKeyset {
            funding_pubkey: key(signer.funding_sk),
            revocation_basepoint: key(signer.revocation_basepoint_sk),
            payment_basepoint: key(signer.payment_basepoint_sk),
            delayed_payment_basepoint: key(signer.delayed_payment_basepoint_sk),
            htlc_basepoint: key(signer.htlc_basepoint_sk),
            first_per_commitment_point: LocalPubkey {
                key: first_per_commitment_point,
                source: KeySource::default(),
            },
            first_per_commitment_secret: None,
            shutdown_scriptpubkey: None,
            static_remotekey: false,
        }
    }

    fn remote_keyset<C: Signing>(
        secp: &Secp256k1<C>,
        signer: &TestSigner,
        first_per_commitment_point: secp256k1::PublicKey,
    ) -> RemoteKeyset {
        let pubkey = |sk: SecretKey| secp256k1::PublicKey::from_secret_key(secp, &sk);
        RemoteKeyset {
            funding_pubkey: pubkey(signer.funding_sk),
            revocation_basepoint: pubkey(signer.revocation_basepoint_sk),
            payment_basepoint: pubkey(signer.payment_basepoint_sk),
            delayed_payment_basepoint: pubkey(signer.delayed_payment_basepoint_sk),
            htlc_basepoint: pubkey(signer.htlc_basepoint_sk),
            first_per_commitment_point,
            static_remotekey: false,
        }
    }

    /// Builds Alice (outbound/funder) and Bob (inbound) as a pair of
    /// `ChannelActor`s sharing one funding outpoint and channel id, each
    /// with real, mutually-consistent key material so that signatures one
    /// side produces verify on the other.
    #[allow(clippy::too_many_arguments)]
    fn two_channel_actors<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        alice_params: PeerParams,
        bob_params: PeerParams,
        config: ChannelConfig,
        dust_limit_sat: u64,
        channel_capacity_sat: u64,
        alice_to_local_msat: u64,
        feerate_per_kw: u32,
    ) -> (ChannelActor, TestSigner, ChannelActor, TestSigner) {
        let alice_signer = TestSigner::new(0xA0);
        let bob_signer = TestSigner::new(0xB0);

        let alice_point0 = alice_signer.commitment_point(secp, 0);
        let alice_point1 = alice_signer.commitment_point(secp, 1);
        let bob_point0 = bob_signer.commitment_point(secp, 0);
        let bob_point1 = bob_signer.commitment_point(secp, 1);

        let alice_local_keys = local_keyset(secp, &alice_signer, alice_point0);
        let bob_local_keys = local_keyset(secp, &bob_signer, bob_point0);
        let alice_remote_keys = remote_keyset(secp, &bob_signer, bob_point0);
        let bob_remote_keys = remote_keyset(secp, &alice_signer, alice_point0);

        let funding_outpoint = OutPoint::null();
        let channel_id = ChannelId::with(funding_outpoint);
        let obscuring = obscuring_factor(
            true,
            alice_local_keys.payment_basepoint.key,
            alice_remote_keys.payment_basepoint,
        );

        let bob_to_local_msat = channel_capacity_sat * 1000 - alice_to_local_msat;
        let alice_spec = CommitmentSpec::new(alice_to_local_msat, bob_to_local_msat, feerate_per_kw);
        let bob_spec = CommitmentSpec::new(bob_to_local_msat, alice_to_local_msat, feerate_per_kw);

        let alice = ChannelActor {
            phase: ChannelPhase::Normal,
            commitments: Commitments {
                params: ChannelParams {
                    channel_id,
                    channel_capacity_sat,
                    direction: Direction::Outbound,
                    local_params: alice_params,
                    remote_params: bob_params,
                },
                local_commit: LocalCommit {
                    commitment: genesis_commitment(0, alice_spec.clone()),
                    commit_sig: dumb_signature(),
                    htlc_sigs: vec![],
                },
                remote_commit: RemoteCommit {
                    commitment: genesis_commitment(0, bob_spec.clone()),
                    remote_per_commitment_point: bob_point0,
                },
                remote_next_commit_info: RemoteNextCommitInfo::Ready {
                    next_per_commitment_point: bob_point1,
                },
                local_per_commitment_point: alice_point0,
                static_remotekey: false,
                anchor_outputs: false,
                zero_fee_htlc_tx: false,
            },
            update_state: UpdateState::default(),
            config: config.clone(),
            local_keys: alice_local_keys,
            remote_keys: alice_remote_keys,
            funding_outpoint,
            dust_limit_sat,
            obscuring_factor: obscuring,
            current_height: 100,
            current_feerate_per_kw: feerate_per_kw,
            shachain: ShachainConsumer::new(),
            known_preimages: HashMap::new(),
        };

        let bob = ChannelActor {
            phase: ChannelPhase::Normal,
            commitments: Commitments {
                params: ChannelParams {
                    channel_id,
                    channel_capacity_sat,
                    direction: Direction::Inbound,
                    local_params: bob_params,
                    remote_params: alice_params,
                },
                local_commit: LocalCommit {
                    commitment: genesis_commitment(0, bob_spec),
                    commit_sig: dumb_signature(),
                    htlc_sigs: vec![],
                },
                remote_commit: RemoteCommit {
                    commitment: genesis_commitment(0, alice_spec),
                    remote_per_commitment_point: alice_point0,
                },
                remote_next_commit_info: RemoteNextCommitInfo::Ready {
                    next_per_commitment_point: alice_point1,
                },
                local_per_commitment_point: bob_point0,
                static_remotekey: false,
                anchor_outputs: false,
                zero_fee_htlc_tx: false,
            },
            update_state: UpdateState::default(),
            config,
            local_keys: bob_local_keys,
            remote_keys: bob_remote_keys,
            funding_outpoint,
            dust_limit_sat,
            obscuring_factor: obscuring,
            current_height: 100,
            current_feerate_per_kw: feerate_per_kw,
            shachain: ShachainConsumer::new(),
            known_preimages: HashMap::new(),
        };

        (alice, alice_signer, bob, bob_signer)
    }

    fn sent_message(effects: &[Effect]) -> PeerMessage {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::SendMessage(m) => Some(m.clone()),
                _ => None,
            })
            .expect("expected a SendMessage effect")
    }

    /// Drives one full two-sided signing round to completion: `initiator`
    /// signs, `responder` countersigns and revokes, `initiator` revokes
    /// back. Both actors' `local_commit.index` advance by exactly one.
    fn settle_round<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        initiator: &mut ChannelActor,
        initiator_signer: &TestSigner,
        responder: &mut ChannelActor,
        responder_signer: &TestSigner,
    ) -> (Vec<Effect>, Vec<Effect>) {
        let effects = initiator
            .handle(secp, initiator_signer, Event::Command(Command::Sign))
            .unwrap();
        let commit_sig_1 = match sent_message(&effects) {
            PeerMessage::CommitSig(m) => m,
            _ => panic!("expected CommitSig from initiator"),
        };

        let effects = responder
            .handle(secp, responder_signer, Event::PeerMessage(PeerMessage::CommitSig(commit_sig_1)))
            .unwrap();
        let revoke_1 = match sent_message(&effects) {
            PeerMessage::RevokeAndAck(m) => m,
            _ => panic!("expected RevokeAndAck from responder"),
        };

        let effects = responder
            .handle(secp, responder_signer, Event::Command(Command::Sign))
            .unwrap();
        let commit_sig_2 = match sent_message(&effects) {
            PeerMessage::CommitSig(m) => m,
            _ => panic!("expected CommitSig from responder"),
        };

        let mut initiator_effects = initiator
            .handle(secp, initiator_signer, Event::PeerMessage(PeerMessage::CommitSig(commit_sig_2)))
            .unwrap();
        let revoke_2 = match sent_message(&initiator_effects) {
            PeerMessage::RevokeAndAck(m) => m,
            _ => panic!("expected RevokeAndAck from initiator"),
        };

        initiator_effects.extend(
            initiator
                .handle(secp, initiator_signer, Event::PeerMessage(PeerMessage::RevokeAndAck(revoke_1)))
                .unwrap(),
        );
        let responder_effects = responder
            .handle(secp, responder_signer, Event::PeerMessage(PeerMessage::RevokeAndAck(revoke_2)))
            .unwrap();

        (initiator_effects, responder_effects)
    }

    fn add_htlc(
        secp: &Secp256k1<secp256k1::All>,
        sender: &mut ChannelActor,
        sender_signer: &TestSigner,
        receiver: &mut ChannelActor,
        receiver_signer: &TestSigner,
        amount_msat: u64,
        payment_hash: HashLock,
        cltv_expiry: u32,
    ) {
        let effects = sender
            .handle(
                secp,
                sender_signer,
                Event::Command(Command::AddHtlc {
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                    onion_routing_packet: messages::OnionPacket(Vec::new()),
                }),
            )
            .unwrap();
        let add = match sent_message(&effects) {
            PeerMessage::UpdateAddHtlc(m) => m,
            _ => panic!("expected UpdateAddHtlc"),
        };
        receiver
            .handle(secp, receiver_signer, Event::PeerMessage(PeerMessage::UpdateAddHtlc(add)))
            .unwrap();
    }

    #[test]
    fn s1_htlc_add_then_fulfill_settles_both_balances() {
        let secp = Secp256k1::new();
        let (mut alice, alice_signer, mut bob, bob_signer) = two_channel_actors(
            &secp,
            PeerParams::default(),
            PeerParams::default(),
            ChannelConfig::default(),
            546,
            10_000_000,
            5_000_000_000,
            10_000,
        );

        let preimage: HashPreimage = Slice32::from_inner([7u8; 32]).into();
        let payment_hash = preimage.hash();
        add_htlc(
            &secp,
            &mut alice,
            &alice_signer,
            &mut bob,
            &bob_signer,
            50_000_000,
            payment_hash,
            500,
        );
        settle_round(&secp, &mut alice, &alice_signer, &mut bob, &bob_signer);

        assert_eq!(alice.commitments.local_commit.commitment.index, 1);
        assert_eq!(bob.commitments.local_commit.commitment.index, 1);
        assert_eq!(
            alice.commitments.local_commit.commitment.spec.to_local_msat,
            4_950_000_000
        );
        assert_eq!(
            bob.commitments.local_commit.commitment.spec.to_remote_msat,
            4_950_000_000
        );
        assert_eq!(bob.commitments.local_commit.commitment.spec.htlcs.len(), 1);

        let effects = bob
            .handle(
                &secp,
                &bob_signer,
                Event::Command(Command::FulfillHtlc {
                    htlc_id: 0,
                    payment_preimage: preimage,
                }),
            )
            .unwrap();
        let fulfill = match sent_message(&effects) {
            PeerMessage::UpdateFulfillHtlc(m) => m,
            _ => panic!("expected UpdateFulfillHtlc"),
        };
        alice
            .handle(&secp, &alice_signer, Event::PeerMessage(PeerMessage::UpdateFulfillHtlc(fulfill)))
            .unwrap();
        settle_round(&secp, &mut bob, &bob_signer, &mut alice, &alice_signer);

        assert_eq!(alice.commitments.local_commit.commitment.index, 2);
        assert_eq!(bob.commitments.local_commit.commitment.index, 2);
        assert_eq!(
            alice.commitments.local_commit.commitment.spec.to_local_msat,
            4_950_000_000
        );
        assert_eq!(
            alice.commitments.local_commit.commitment.spec.to_remote_msat,
            5_050_000_000
        );
        assert_eq!(
            bob.commitments.local_commit.commitment.spec.to_local_msat,
            5_050_000_000
        );
        assert_eq!(
            bob.commitments.local_commit.commitment.spec.to_remote_msat,
            4_950_000_000
        );
        assert!(alice.commitments.local_commit.commitment.spec.htlcs.is_empty());
        assert!(bob.commitments.local_commit.commitment.spec.htlcs.is_empty());
    }

    #[test]
    fn s2_add_htlc_rejected_when_it_would_breach_the_channel_reserve() {
        let secp = Secp256k1::new();
        let peer_params = PeerParams { channel_reserve_satoshis: 20_000, ..PeerParams::default() };
        let (mut alice, alice_signer, _bob, _bob_signer) = two_channel_actors(
            &secp,
            peer_params,
            peer_params,
            ChannelConfig::default(),
            546,
            10_000_000,
            800_000_000,
            10_000,
        );

        let result = alice.handle(
            &secp,
            &alice_signer,
            Event::Command(Command::AddHtlc {
                amount_msat: 790_000_000,
                payment_hash: HashLock::dumb_default(),
                cltv_expiry: 500,
                onion_routing_packet: messages::OnionPacket(Vec::new()),
            }),
        );

        match result {
            Err(ChannelError::AddHtlcRejected {
                error:
                    InvariantError::InsufficientFunds {
                        missing,
                        reserve,
                        fees,
                        ..
                    },
                ..
            }) => {
                assert_eq!(missing, 18_960);
                assert_eq!(reserve, 20_000);
                assert_eq!(fees, 8_960);
            }
            _ => panic!("expected AddHtlcRejected(InsufficientFunds)"),
        }
        assert!(alice.commitments.local_commit.commitment.spec.htlcs.is_empty());
    }

    #[test]
    fn s3_dust_exposure_cap_is_enforced_independently_per_side() {
        let secp = Secp256k1::new();
        let mut a = actor();
        a.config.max_dust_htlc_exposure_msat = 25_000_000;
        a.commitments.params.local_params.dust_limit_satoshis = 2000;
        a.commitments.params.remote_params.dust_limit_satoshis = 300;
        a.commitments.local_commit.commitment.spec =
            CommitmentSpec::new(50_000_000_000, 50_000_000_000, 10_000);
        a.commitments.remote_commit.commitment.spec =
            CommitmentSpec::new(50_000_000_000, 50_000_000_000, 10_000);

        let signer = DumbSigner;

        for amount_sat in [500u64, 1_250, 8_250] {
            a.handle(
                &secp,
                &signer,
                Event::Command(Command::AddHtlc {
                    amount_msat: amount_sat * 1000,
                    payment_hash: HashLock::dumb_default(),
                    cltv_expiry: 500,
                    onion_routing_packet: messages::OnionPacket(Vec::new()),
                }),
            )
            .unwrap();
        }

        for (i, amount_sat) in [300u64, 6_000, 8_200].into_iter().enumerate() {
            protocol::add_remote_proposal(
                &mut a.update_state,
                Update::AddHtlc {
                    htlc_id: i as u64,
                    amount_msat: amount_sat * 1000,
                    payment_hash: HashLock::dumb_default(),
                    cltv_expiry: 500,
                },
            )
            .unwrap();
        }

        let result = a.handle(
            &secp,
            &signer,
            Event::Command(Command::AddHtlc {
                amount_msat: 501_000,
                payment_hash: HashLock::dumb_default(),
                cltv_expiry: 500,
                onion_routing_packet: messages::OnionPacket(Vec::new()),
            }),
        );

        match result {
            Err(ChannelError::AddHtlcRejected {
                error:
                    InvariantError::LocalDustHtlcExposureTooHigh {
                        cap_sat,
                        resulting_exposure_msat,
                        ..
                    },
                ..
            }) => {
                assert_eq!(cap_sat, 25_000);
                assert_eq!(resulting_exposure_msat, 25_001_000);
            }
            _ => panic!("expected AddHtlcRejected(LocalDustHtlcExposureTooHigh)"),
        }
    }

    #[test]
    fn s4_revoked_commitment_broadcast_is_punished_for_every_htlc_and_the_main_output() {
        let secp = Secp256k1::new();
        let (mut alice, alice_signer, mut bob, bob_signer) = two_channel_actors(
            &secp,
            PeerParams::default(),
            PeerParams::default(),
            ChannelConfig::default(),
            546,
            10_000_000,
            6_000_000_000,
            1_000,
        );

        for (amount_msat, cltv_expiry) in [
            (2_000_000u64, 500u32),
            (3_000_000, 510),
            (1_500_000, 520),
            (2_500_000, 530),
        ] {
            add_htlc(
                &secp,
                &mut alice,
                &alice_signer,
                &mut bob,
                &bob_signer,
                amount_msat,
                HashLock::dumb_default(),
                cltv_expiry,
            );
        }
        settle_round(&secp, &mut alice, &alice_signer, &mut bob, &bob_signer);
        assert_eq!(alice.commitments.local_commit.commitment.index, 1);
        assert_eq!(alice.commitments.local_commit.commitment.spec.htlcs.len(), 4);

        // This is now Alice's revoked commitment: its own point (point 0,
        // the genesis `local_per_commitment_point`) was revealed to Bob as
        // part of the revoke_and_ack she just sent above.
        let revoked_tx = alice.commitments.local_commit.commitment.tx.clone();
        let revoked_htlcs = alice.commitments.local_commit.commitment.spec.htlcs.clone();
        let revealed_secret = alice_signer.commitment_secret(0);

        // One further round moves Alice on to index 2, making the captured
        // commitment provably stale.
        add_htlc(
            &secp,
            &mut alice,
            &alice_signer,
            &mut bob,
            &bob_signer,
            100_000,
            HashLock::dumb_default(),
            540,
        );
        settle_round(&secp, &mut alice, &alice_signer, &mut bob, &bob_signer);
        assert_eq!(alice.commitments.local_commit.commitment.index, 2);

        let sweep_script = Script::new();
        let effects = closing::revoked_commit_penalty(
            &secp,
            &bob_signer,
            &bob.commitments,
            &bob.local_keys,
            &bob.remote_keys,
            &revoked_tx,
            &revoked_htlcs,
            revealed_secret,
            1_000,
            546,
            &sweep_script,
        )
        .unwrap();

        let publish_count = effects
            .iter()
            .filter(|e| matches!(e, Effect::PublishTx { .. }))
            .count();
        let watch_count = effects
            .iter()
            .filter(|e| matches!(e, Effect::WatchTxConfirmed(_)))
            .count();
        assert_eq!(publish_count, 5);
        assert_eq!(watch_count, 5);

        let mut spent_outpoints = std::collections::HashSet::new();
        for effect in &effects {
            if let Effect::PublishTx { tx, .. } = effect {
                assert_eq!(tx.input.len(), 1);
                spent_outpoints.insert(tx.input[0].previous_output);
            }
        }
        assert_eq!(spent_outpoints.len(), 5);
    }

    #[test]
    fn s5_current_block_height_near_htlc_expiry_forces_close() {
        let secp = Secp256k1::new();
        let (mut alice, alice_signer, mut bob, bob_signer) = two_channel_actors(
            &secp,
            PeerParams::default(),
            PeerParams::default(),
            ChannelConfig::default(),
            546,
            10_000_000,
            5_000_000_000,
            10_000,
        );

        add_htlc(
            &secp,
            &mut alice,
            &alice_signer,
            &mut bob,
            &bob_signer,
            50_000_000,
            HashLock::dumb_default(),
            150,
        );
        settle_round(&secp, &mut alice, &alice_signer, &mut bob, &bob_signer);
        assert_eq!(bob.commitments.local_commit.commitment.spec.htlcs.len(), 1);

        let effects = bob
            .handle(&secp, &bob_signer, Event::CurrentBlockHeight(140))
            .unwrap();
        assert_eq!(bob.phase, ChannelPhase::Closing);
        assert!(effects.iter().any(|e| matches!(e, Effect::NotifyChannelDown)));
        assert!(effects.iter().any(|e| matches!(e, Effect::PublishTx { .. })));
    }

    #[test]
    fn s6_reestablish_after_a_dropped_revoke_and_ack_converges_both_sides() {
        let secp = Secp256k1::new();
        let (mut alice, alice_signer, mut bob, bob_signer) = two_channel_actors(
            &secp,
            PeerParams::default(),
            PeerParams::default(),
            ChannelConfig::default(),
            546,
            10_000_000,
            5_000_000_000,
            10_000,
        );

        add_htlc(
            &secp,
            &mut alice,
            &alice_signer,
            &mut bob,
            &bob_signer,
            10_000_000,
            HashLock::dumb_default(),
            500,
        );
        settle_round(&secp, &mut alice, &alice_signer, &mut bob, &bob_signer);
        assert_eq!(alice.commitments.local_commit.commitment.index, 1);
        assert_eq!(bob.commitments.local_commit.commitment.index, 1);

        // Alice proposes a second htlc and signs; Bob receives it and signs
        // back, but his revoke_and_ack never reaches Alice (dropped link).
        add_htlc(
            &secp,
            &mut alice,
            &alice_signer,
            &mut bob,
            &bob_signer,
            5_000_000,
            HashLock::dumb_default(),
            500,
        );
        let effects = alice
            .handle(&secp, &alice_signer, Event::Command(Command::Sign))
            .unwrap();
        let commit_sig_2 = match sent_message(&effects) {
            PeerMessage::CommitSig(m) => m,
            _ => panic!("expected CommitSig"),
        };
        let effects = bob
            .handle(&secp, &bob_signer, Event::PeerMessage(PeerMessage::CommitSig(commit_sig_2)))
            .unwrap();
        let dropped_revoke = match sent_message(&effects) {
            PeerMessage::RevokeAndAck(m) => m,
            _ => panic!("expected RevokeAndAck"),
        };

        assert_eq!(alice.commitments.local_commit.commitment.index, 1);
        assert_eq!(bob.commitments.local_commit.commitment.index, 2);

        alice.handle(&secp, &alice_signer, Event::PeerDisconnected).unwrap();
        bob.handle(&secp, &bob_signer, Event::PeerDisconnected).unwrap();
        let alice_effects = alice.handle(&secp, &alice_signer, Event::PeerReconnected).unwrap();
        let bob_effects = bob.handle(&secp, &bob_signer, Event::PeerReconnected).unwrap();
        let alice_reestablish = match sent_message(&alice_effects) {
            PeerMessage::ChannelReestablish(m) => m,
            _ => panic!("expected ChannelReestablish"),
        };
        let bob_reestablish = match sent_message(&bob_effects) {
            PeerMessage::ChannelReestablish(m) => m,
            _ => panic!("expected ChannelReestablish"),
        };

        assert_eq!(alice_reestablish.next_commitment_number, 2);
        assert_eq!(bob_reestablish.next_commitment_number, 3);
        assert_eq!(bob_reestablish.next_commitment_number, alice_reestablish.next_commitment_number + 1);

        bob.handle(&secp, &bob_signer, Event::PeerMessage(PeerMessage::ChannelReestablish(alice_reestablish)))
            .unwrap();
        alice
            .handle(&secp, &alice_signer, Event::PeerMessage(PeerMessage::ChannelReestablish(bob_reestablish)))
            .unwrap();
        assert_eq!(alice.phase, ChannelPhase::Normal);
        assert_eq!(bob.phase, ChannelPhase::Normal);

        // The dropped revoke_and_ack is finally retransmitted.
        alice
            .handle(&secp, &alice_signer, Event::PeerMessage(PeerMessage::RevokeAndAck(dropped_revoke)))
            .unwrap();

        assert_eq!(bob.commitments.local_commit.commitment.index, 2);
        assert_eq!(alice.commitments.remote_commit.commitment.index, 2);
    }
}
