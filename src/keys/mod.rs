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

//! Per-channel key material: BIP32-derived basepoints, the BOLT-3
//! per-commitment pubkey/revocation-pubkey tweak math, and the obscured
//! commitment number.

pub mod shachain;

use std::collections::BTreeMap;

use amplify::DumbDefault;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::util::bip32::{ChildNumber, ExtendedPrivKey, KeySource};
use bitcoin::Script;
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};

/// A public key together with the derivation path that produced it, so a
/// signer (hardware or remote) can be told how to re-derive the matching
/// private key without this process ever holding it.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LocalPubkey {
    pub key: PublicKey,
    pub source: KeySource,
}

impl LocalPubkey {
    #[inline]
    pub fn to_bip32_derivation_map(&self) -> BTreeMap<PublicKey, KeySource> {
        bmap! { self.key => self.source.clone() }
    }
}

impl DumbDefault for LocalPubkey {
    fn dumb_default() -> Self {
        LocalPubkey {
            key: dumb_pubkey!(),
            source: KeySource::default(),
        }
    }
}

/// Basepoints and first per-commitment point owned by the local node, plus
/// the secret of that first per-commitment point (needed to prove, via
/// `revoke_and_ack`, that we are the only one who could have derived it).
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LocalKeyset {
    pub funding_pubkey: LocalPubkey,
    pub revocation_basepoint: LocalPubkey,
    pub payment_basepoint: LocalPubkey,
    pub delayed_payment_basepoint: LocalPubkey,
    pub htlc_basepoint: LocalPubkey,
    pub first_per_commitment_point: LocalPubkey,
    pub first_per_commitment_secret: Option<SecretKey>,
    pub shutdown_scriptpubkey: Option<Script>,
    /// Set when `option_static_remotekey` or `option_anchors` was
    /// negotiated: our `to_remote` output then pays the counterparty's bare
    /// payment basepoint rather than a per-commitment-tweaked key.
    pub static_remotekey: bool,
}

impl DumbDefault for LocalKeyset {
    fn dumb_default() -> Self {
        Self {
            funding_pubkey: DumbDefault::dumb_default(),
            revocation_basepoint: DumbDefault::dumb_default(),
            payment_basepoint: DumbDefault::dumb_default(),
            delayed_payment_basepoint: DumbDefault::dumb_default(),
            htlc_basepoint: DumbDefault::dumb_default(),
            first_per_commitment_secret: None,
            first_per_commitment_point: DumbDefault::dumb_default(),
            shutdown_scriptpubkey: None,
            static_remotekey: false,
        }
    }
}

impl LocalKeyset {
    /// Derives the full keyset from a channel-level extended private key
    /// using hardened child indices `0..=5`, matching the derivation scheme
    /// advertised by the node at channel open.
    pub fn with<C: Signing>(
        secp: &Secp256k1<C>,
        channel_source: KeySource,
        channel_xpriv: ExtendedPrivKey,
        shutdown_scriptpubkey: Option<Script>,
    ) -> Self {
        let fingerprint = channel_source.0;

        let derive = |index: u32| {
            let child = ChildNumber::from_hardened_idx(index)
                .expect("index <= 5 is always a valid hardened index");
            let path = [child];
            let xpriv = channel_xpriv
                .derive_priv(secp, &path)
                .expect("negligible probability of derivation failure");
            let derivation_path = channel_source.1.clone().extend(&path[..]);
            let pubkey = PublicKey::from_secret_key(secp, &xpriv.private_key);
            (
                xpriv.private_key,
                LocalPubkey {
                    key: pubkey,
                    source: (fingerprint, derivation_path),
                },
            )
        };

        let (_, funding_pubkey) = derive(0);
        let (_, payment_basepoint) = derive(1);
        let (_, delayed_payment_basepoint) = derive(2);
        let (_, revocation_basepoint) = derive(3);
        let (first_secret, first_per_commitment_point) = derive(4);
        let (_, htlc_basepoint) = derive(5);

        Self {
            funding_pubkey,
            revocation_basepoint,
            payment_basepoint,
            delayed_payment_basepoint,
            htlc_basepoint,
            first_per_commitment_point,
            first_per_commitment_secret: Some(first_secret),
            shutdown_scriptpubkey,
            static_remotekey: false,
        }
    }
}

/// Basepoints advertised by the remote peer in `open_channel` /
/// `accept_channel`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct RemoteKeyset {
    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_basepoint: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
    pub first_per_commitment_point: PublicKey,
    pub static_remotekey: bool,
}

impl DumbDefault for RemoteKeyset {
    fn dumb_default() -> Self {
        Self {
            funding_pubkey: dumb_pubkey!(),
            revocation_basepoint: dumb_pubkey!(),
            payment_basepoint: dumb_pubkey!(),
            delayed_payment_basepoint: dumb_pubkey!(),
            htlc_basepoint: dumb_pubkey!(),
            first_per_commitment_point: dumb_pubkey!(),
            static_remotekey: false,
        }
    }
}

/// `pubkey = basepoint + SHA256(per_commitment_point || basepoint) * G`
///
/// Used identically by BOLT-3 to derive `localkey`, `remotekey` and the
/// per-commitment HTLC pubkey from their respective basepoints; only the
/// basepoint argument differs.
pub fn derive_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    basepoint: PublicKey,
    per_commitment_point: PublicKey,
) -> PublicKey {
    let tweak = tweak_hash(per_commitment_point, basepoint);
    let mut pubkey = basepoint;
    pubkey
        .add_exp_assign(secp, tweak.as_ref())
        .expect("negligible probability of invalid tweak");
    pubkey
}

/// Private-key counterpart of [`derive_pubkey`], used by a signer holding
/// the basepoint secret.
pub fn derive_privkey<C: Signing>(
    secp: &Secp256k1<C>,
    basepoint_secret: SecretKey,
    per_commitment_point: PublicKey,
) -> SecretKey {
    let basepoint = PublicKey::from_secret_key(secp, &basepoint_secret);
    let tweak = tweak_hash(per_commitment_point, basepoint);
    let mut privkey = basepoint_secret;
    privkey
        .add_assign(tweak.as_ref())
        .expect("negligible probability of invalid tweak");
    privkey
}

/// `revocationpubkey = revocation_basepoint * SHA256(revocation_basepoint ||
/// per_commitment_point) + per_commitment_point *
/// SHA256(per_commitment_point || revocation_basepoint)`
pub fn derive_revocation_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    revocation_basepoint: PublicKey,
    per_commitment_point: PublicKey,
) -> PublicKey {
    let basepoint_tweak =
        tweak_hash(revocation_basepoint, per_commitment_point);
    let mut tweaked_basepoint = revocation_basepoint;
    tweaked_basepoint
        .mul_assign(secp, basepoint_tweak.as_ref())
        .expect("negligible probability of invalid tweak");

    let point_tweak = tweak_hash(per_commitment_point, revocation_basepoint);
    let mut tweaked_point = per_commitment_point;
    tweaked_point
        .mul_assign(secp, point_tweak.as_ref())
        .expect("negligible probability of invalid tweak");

    tweaked_basepoint
        .combine(&tweaked_point)
        .expect("negligible probability of point cancellation")
}

/// Private-key counterpart of [`derive_revocation_pubkey`], computable only
/// once the old per-commitment secret has been revealed by its owner.
pub fn derive_revocation_privkey<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    revocation_basepoint_secret: SecretKey,
    per_commitment_secret: SecretKey,
) -> SecretKey {
    let revocation_basepoint =
        PublicKey::from_secret_key(secp, &revocation_basepoint_secret);
    let per_commitment_point =
        PublicKey::from_secret_key(secp, &per_commitment_secret);

    let basepoint_tweak =
        tweak_hash(revocation_basepoint, per_commitment_point);
    let mut part1 = revocation_basepoint_secret;
    part1
        .mul_assign(basepoint_tweak.as_ref())
        .expect("negligible probability of invalid tweak");

    let point_tweak = tweak_hash(per_commitment_point, revocation_basepoint);
    let mut part2 = per_commitment_secret;
    part2
        .mul_assign(point_tweak.as_ref())
        .expect("negligible probability of invalid tweak");

    (part1 + part2).expect("negligible probability of scalar cancellation")
}

fn tweak_hash(first: PublicKey, second: PublicKey) -> sha256::Hash {
    let mut engine = sha256::Hash::engine();
    engine.input(&first.serialize());
    engine.input(&second.serialize());
    sha256::Hash::from_engine(engine)
}

pub(crate) const LOWER_48_BITS: u64 = 0x00_00_FF_FF_FF_FF_FF_FF;

/// `obscuring_factor = SHA256(lesser_payment_basepoint ||
/// greater_payment_basepoint)[24..]`, ordered by channel direction: the
/// opener's basepoint always comes first, matching BOLT-3's "if node_id_1
/// is the initiator" rule.
pub fn obscuring_factor(
    local_is_opener: bool,
    local_payment_basepoint: PublicKey,
    remote_payment_basepoint: PublicKey,
) -> u64 {
    let mut engine = sha256::Hash::engine();
    if local_is_opener {
        engine.input(&local_payment_basepoint.serialize());
        engine.input(&remote_payment_basepoint.serialize());
    } else {
        engine.input(&remote_payment_basepoint.serialize());
        engine.input(&local_payment_basepoint.serialize());
    }
    let hash = sha256::Hash::from_engine(engine);

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash[24..]);
    u64::from_be_bytes(buf) & LOWER_48_BITS
}

/// Applies the per-BOLT-3 XOR obscuring to a raw commitment number, used to
/// encode it across the commitment transaction's locktime and sequence
/// fields without revealing the channel's update count to onlookers.
pub fn obscure_commitment_number(
    commitment_number: u64,
    obscuring_factor: u64,
) -> u64 {
    (commitment_number & LOWER_48_BITS) ^ (obscuring_factor & LOWER_48_BITS)
}

/// Inverse of the locktime/sequence encoding in
/// [`crate::commitment::tx::build_commitment_tx`]: recombines the upper and
/// lower 24 bits of the obscured commitment number from a broadcast
/// transaction's fields, then un-obscures it. Used to recognize a revoked
/// commitment transaction seen on-chain.
pub fn reconstruct_commitment_number(
    lock_time: u32,
    sequence: u32,
    obscuring_factor: u64,
) -> u64 {
    let lower_24 = u64::from(lock_time & 0x00FF_FFFF);
    let upper_24 = u64::from(sequence & 0x00FF_FFFF);
    let obscured = (upper_24 << 24) | lower_24;
    obscured ^ (obscuring_factor & LOWER_48_BITS)
}

/// `724 * feerate_per_kw / 1000`: the weight, in vbytes-equivalent, BOLT-3
/// assigns to the base commitment transaction before any HTLC outputs.
pub fn commitment_fee(feerate_per_kw: u32) -> u64 {
    724 * feerate_per_kw as u64 / 1000
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn pk(hex: &str) -> PublicKey {
        PublicKey::from_str(hex).unwrap()
    }

    #[test]
    fn localkey_derivation_matches_bolt3_vector() {
        let secp = Secp256k1::new();
        let base_point = pk(
            "036d6caac248af96f6afa7f904f550253a0f3ef3f5aa2fe6838a95b216691468e2",
        );
        let per_commitment_point = pk(
            "025f7117a78150fe2ef97db7cfc83bd57b2e2c0d0dd25eaf467a4a1c2a45ce1486",
        );
        let expected = pk(
            "0235f2dbfaa89b57ec7b055afe29849ef7ddfeb1cefdb9ebdc43f5494984db29e5",
        );
        assert_eq!(
            derive_pubkey(&secp, base_point, per_commitment_point),
            expected
        );
    }

    #[test]
    fn revocationkey_derivation_matches_bolt3_vector() {
        let secp = Secp256k1::new();
        let base_point = pk(
            "036d6caac248af96f6afa7f904f550253a0f3ef3f5aa2fe6838a95b216691468e2",
        );
        let per_commitment_point = pk(
            "025f7117a78150fe2ef97db7cfc83bd57b2e2c0d0dd25eaf467a4a1c2a45ce1486",
        );
        let expected = pk(
            "02916e326636d19c33f13e8c0c3a03dd157f332f3e99c317c141dd865eb01f8ff0",
        );
        assert_eq!(
            derive_revocation_pubkey(&secp, base_point, per_commitment_point),
            expected
        );
    }

    #[test]
    fn commitment_fee_matches_bolt3_formula() {
        assert_eq!(commitment_fee(15000), 724 * 15000 / 1000);
    }

    #[test]
    fn commitment_number_round_trips_through_locktime_and_sequence() {
        let obscuring_factor = 0x2bb038521914u64;
        let commitment_number = 42u64;
        let obscured = obscure_commitment_number(commitment_number, obscuring_factor);
        let lower_24 = (obscured & 0x00FF_FFFF) as u32;
        let upper_24 = ((obscured >> 24) & 0x00FF_FFFF) as u32;
        let lock_time = (0x20u32 << 24) | lower_24;
        let sequence = (0x80u32 << 24) | upper_24;

        assert_eq!(
            reconstruct_commitment_number(lock_time, sequence, obscuring_factor),
            commitment_number
        );
    }
}
