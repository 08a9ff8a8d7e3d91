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

//! Peer messages the channel state machine consumes and produces. These are
//! plain data carriers: parsing bytes off the wire and routing them to the
//! right channel actor is a concern of the transport layer that embeds this
//! crate, not of the state machine itself. Encoding uses the same
//! `strict_encoding` codec as persistence (see [`crate::fsm`]).

use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;

use crate::ids::{ChannelId, HashLock, HashPreimage};

/// An opaque onion-routing payload. Construction and peeling belong to the
/// routing layer; the channel only needs to carry it opaquely and forward
/// it as accompanying data on `update_add_htlc`.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct OnionPacket(pub Vec<u8>);

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct UpdateAddHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub amount_msat: u64,
    pub payment_hash: HashLock,
    pub cltv_expiry: u32,
    pub onion_routing_packet: OnionPacket,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct UpdateFulfillHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub payment_preimage: HashPreimage,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct UpdateFailHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub reason: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct UpdateFailMalformedHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub sha256_of_onion: HashLock,
    pub failure_code: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct UpdateFee {
    pub channel_id: ChannelId,
    pub feerate_per_kw: u32,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct CommitSig {
    pub channel_id: ChannelId,
    pub signature: Signature,
    pub htlc_signatures: Vec<Signature>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct RevokeAndAck {
    pub channel_id: ChannelId,
    pub per_commitment_secret: [u8; 32],
    pub next_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct Shutdown {
    pub channel_id: ChannelId,
    pub scriptpubkey: bitcoin::Script,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct ClosingSigned {
    pub channel_id: ChannelId,
    pub fee_satoshis: u64,
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct ErrorMessage {
    pub channel_id: ChannelId,
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct Warning {
    pub channel_id: ChannelId,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct ChannelReestablish {
    pub channel_id: ChannelId,
    pub next_commitment_number: u64,
    pub next_revocation_number: u64,
    pub your_last_per_commitment_secret: [u8; 32],
    pub my_current_per_commitment_point: PublicKey,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct ChannelReady {
    pub channel_id: ChannelId,
    pub next_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct AnnouncementSignatures {
    pub channel_id: ChannelId,
    pub short_channel_id: u64,
    pub node_signature: Signature,
    pub bitcoin_signature: Signature,
}

/// A snapshot of the routing-relevant policy this channel currently
/// advertises: the values that would go out in a BOLT-7 `channel_update`
/// gossip message, minus the timestamp/signature fields that belong to the
/// gossip layer rather than the channel state machine. Returned alongside a
/// Tier-1 `AddHtlc` rejection so the caller can re-route around whichever
/// limit was hit, and recomputed fresh on every rejection since usable
/// balance (and so `htlc_maximum_msat`) changes with every settled HTLC.
#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    /// Set once the channel is OFFLINE or CLOSING; routing must skip it.
    pub disabled: bool,
    pub cltv_expiry_delta: u16,
    pub htlc_minimum_msat: u64,
    /// Bucketed from current usable balance via
    /// [`crate::config::ChannelConfig::balance_thresholds`], not a fixed
    /// channel-open-time constant.
    pub htlc_maximum_msat: u64,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
}

/// Any message the channel state machine may receive from the peer. A
/// single enum so that transport code has one type to route on.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
pub enum PeerMessage {
    UpdateAddHtlc(UpdateAddHtlc),
    UpdateFulfillHtlc(UpdateFulfillHtlc),
    UpdateFailHtlc(UpdateFailHtlc),
    UpdateFailMalformedHtlc(UpdateFailMalformedHtlc),
    UpdateFee(UpdateFee),
    CommitSig(CommitSig),
    RevokeAndAck(RevokeAndAck),
    Shutdown(Shutdown),
    ClosingSigned(ClosingSigned),
    ChannelReestablish(ChannelReestablish),
    ChannelReady(ChannelReady),
    AnnouncementSignatures(AnnouncementSignatures),
    Error(ErrorMessage),
    Warning(Warning),
}
