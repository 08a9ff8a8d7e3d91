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

//! Channel, HTLC and payment identifiers.

use std::fmt::{self, Display, Formatter};

use amplify::{DumbDefault, Slice32, Wrapper};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::OutPoint;

/// 32-byte identifier derived from the funding outpoint: `SHA256(txid || vout)`
/// with the funding vout XORed into the last two bytes of the txid, per BOLT
/// #2. Stable for the lifetime of the channel once the funding transaction is
/// known.
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From
)]
#[derive(StrictEncode, StrictDecode)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct ChannelId(Slice32);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl ChannelId {
    /// Derives a channel id from the funding outpoint.
    pub fn with(funding_outpoint: OutPoint) -> Self {
        let mut data = funding_outpoint.txid.as_hash().into_inner();
        let vout = funding_outpoint.vout.to_be_bytes();
        data[30] ^= vout[0];
        data[31] ^= vout[1];
        ChannelId(Slice32::from_inner(data))
    }
}

impl DumbDefault for ChannelId {
    fn dumb_default() -> Self {
        ChannelId(Slice32::default())
    }
}

/// Temporary channel id used from `open_channel`/`accept_channel` until the
/// funding transaction (and thus the final [`ChannelId`]) is known. Unlike
/// [`ChannelId`] this has no required derivation and may be random.
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From
)]
#[derive(StrictEncode, StrictDecode)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct TempChannelId(Slice32);

impl Display for TempChannelId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl TempChannelId {
    pub fn random() -> Self {
        use bitcoin::secp256k1::rand::{self, RngCore};
        let mut data = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut data);
        TempChannelId(Slice32::from_inner(data))
    }
}

impl DumbDefault for TempChannelId {
    fn dumb_default() -> Self {
        TempChannelId(Slice32::default())
    }
}

/// A channel may be addressed by its temporary id before the funding
/// transaction is known, and by its final id afterwards. The two are never
/// simultaneously meaningful, so this is a sum type rather than two optional
/// fields.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum ActiveChannelId {
    #[display(inner)]
    Temporary(TempChannelId),

    #[display(inner)]
    Final(ChannelId),
}

impl ActiveChannelId {
    pub fn channel_id(self) -> Option<ChannelId> {
        match self {
            ActiveChannelId::Final(id) => Some(id),
            ActiveChannelId::Temporary(_) => None,
        }
    }

    pub fn temp_channel_id(self) -> Option<TempChannelId> {
        match self {
            ActiveChannelId::Temporary(id) => Some(id),
            ActiveChannelId::Final(_) => None,
        }
    }

    pub fn random() -> Self {
        ActiveChannelId::Temporary(TempChannelId::random())
    }

    pub fn with_funding(funding_outpoint: OutPoint) -> Self {
        ActiveChannelId::Final(ChannelId::with(funding_outpoint))
    }
}

impl From<TempChannelId> for ActiveChannelId {
    fn from(id: TempChannelId) -> Self {
        ActiveChannelId::Temporary(id)
    }
}

impl From<ChannelId> for ActiveChannelId {
    fn from(id: ChannelId) -> Self {
        ActiveChannelId::Final(id)
    }
}

/// Direction of a channel relative to the local node: who proposed opening
/// it. This also determines who pays commit-tx fees (the funder).
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum Direction {
    /// Inbound channel accepted by the local node (remote sent
    /// `open_channel`). The remote is the funder.
    #[display("inbound")]
    Inbound,

    /// Outbound channel proposed by the local node (local sent
    /// `open_channel`). The local node is the funder.
    #[display("outbound")]
    Outbound,
}

impl Direction {
    #[inline]
    pub fn is_inbound(self) -> bool {
        self == Direction::Inbound
    }

    #[inline]
    pub fn is_outbound(self) -> bool {
        self == Direction::Outbound
    }

    /// True if the local side is the channel funder (pays commit-tx fees).
    #[inline]
    pub fn local_is_funder(self) -> bool {
        self.is_outbound()
    }
}

/// 32-byte SHA256 payment hash that an HTLC is locked to.
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From
)]
#[derive(StrictEncode, StrictDecode)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct HashLock(Slice32);

impl Display for HashLock {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl DumbDefault for HashLock {
    fn dumb_default() -> Self {
        HashLock(Slice32::default())
    }
}

/// 32-byte preimage redeeming a [`HashLock`]. `SHA256(preimage) ==
/// corresponding HashLock`.
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From
)]
#[derive(StrictEncode, StrictDecode)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct HashPreimage(Slice32);

impl HashPreimage {
    pub fn hash(self) -> HashLock {
        let hash = sha256::Hash::hash(self.0.as_inner());
        HashLock(Slice32::from_inner(hash.into_inner()))
    }
}

impl Display for HashPreimage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl DumbDefault for HashPreimage {
    fn dumb_default() -> Self {
        HashPreimage(Slice32::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn preimage_hash_roundtrip() {
        let preimage = HashPreimage(Slice32::from_inner([7u8; 32]));
        let hash = preimage.hash();
        let expected = sha256::Hash::hash(&[7u8; 32]);
        assert_eq!(hash.0.into_inner(), expected.into_inner());
    }

    #[test]
    fn channel_id_derivation_is_stable() {
        let txid = bitcoin::Txid::from_slice(&[3u8; 32]).unwrap();
        let outpoint = OutPoint::new(txid, 1);
        let id1 = ChannelId::with(outpoint);
        let id2 = ChannelId::with(outpoint);
        assert_eq!(id1, id2);
        assert_ne!(id1, ChannelId::with(OutPoint::new(txid, 2)));
    }
}
