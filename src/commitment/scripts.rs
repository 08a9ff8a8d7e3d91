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

//! BOLT-3 output scripts: funding multisig, `to_local`, `to_remote` (legacy
//! and static-remotekey/anchor variants), and the two HTLC scripts.

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::Builder;
use bitcoin::{PublicKey, Script};
use secp256k1::PublicKey as SecpPublicKey;

use crate::ids::HashLock;

fn lex_order(mut a: PublicKey, mut b: PublicKey) -> (PublicKey, PublicKey) {
    if a.inner.serialize() > b.inner.serialize() {
        std::mem::swap(&mut a, &mut b);
    }
    (a, b)
}

/// 2-of-2 funding multisig script, with pubkeys in lexicographic order per
/// BOLT-3.
pub fn funding_script(pubkey1: SecpPublicKey, pubkey2: SecpPublicKey) -> Script {
    let (pk1, pk2) = lex_order(PublicKey::new(pubkey1), PublicKey::new(pubkey2));
    Builder::new()
        .push_int(2)
        .push_key(&pk1)
        .push_key(&pk2)
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// `to_local` output script: immediately spendable by the revocation key,
/// or by the owner after `to_self_delay` confirmations.
pub fn to_local_script(
    revocationpubkey: SecpPublicKey,
    local_delayedpubkey: SecpPublicKey,
    to_self_delay: u16,
) -> Script {
    Builder::new()
        .push_opcode(OP_IF)
        .push_key(&PublicKey::new(revocationpubkey))
        .push_opcode(OP_ELSE)
        .push_int(to_self_delay as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(&PublicKey::new(local_delayedpubkey))
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Legacy `to_remote` output: a plain P2WPKH paying the remote's
/// per-commitment-tweaked payment pubkey.
pub fn to_remote_script_v1(remote_pubkey: SecpPublicKey) -> Script {
    Script::new_v0_p2wpkh(&PublicKey::new(remote_pubkey).wpubkey_hash().expect(
        "pubkey passed through PublicKey::new is always compressed",
    ))
}

/// `option_anchors` / `option_static_remotekey` `to_remote` output: pays the
/// bare remote payment basepoint, delayed by one block so it cannot be
/// spent in the same block as a broadcast commitment (anti-pinning).
pub fn to_remote_script_v2(remote_pubkey: SecpPublicKey) -> Script {
    Builder::new()
        .push_key(&PublicKey::new(remote_pubkey))
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(1)
        .push_opcode(OP_CSV)
        .into_script()
}

/// Value of each of the two `option_anchors` CPFP-anchor outputs, per
/// BOLT-3: fixed regardless of feerate, since their only purpose is to give
/// either party a dust-cheap output to attach a fee-bumping child to.
pub const ANCHOR_OUTPUT_VALUE_SAT: u64 = 330;

/// `option_anchors` anchor output: spendable immediately by the keyed
/// funding pubkey (whichever side the anchor belongs to), or by anyone after
/// 16 confirmations so an unclaimed anchor does not become permanently
/// unspendable dust once CPFP is no longer needed.
pub fn anchor_script(funding_pubkey: SecpPublicKey) -> Script {
    Builder::new()
        .push_key(&PublicKey::new(funding_pubkey))
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_IFDUP)
        .push_opcode(OP_NOTIF)
        .push_int(16)
        .push_opcode(OP_CSV)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// HTLC output offered by the local node (we paid, remote may claim with the
/// preimage or we reclaim after `cltv_expiry`... no: offered HTLCs have no
/// own expiry in the script, they are claimed via HTLC-timeout tx).
pub fn offered_htlc_script(
    revocationpubkey: SecpPublicKey,
    local_htlcpubkey: SecpPublicKey,
    remote_htlcpubkey: SecpPublicKey,
    payment_hash: HashLock,
) -> Script {
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&PublicKey::new(revocationpubkey).pubkey_hash())
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_key(&PublicKey::new(remote_htlcpubkey))
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_NOTIF)
        .push_opcode(OP_DROP)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_key(&PublicKey::new(local_htlcpubkey))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_HASH160)
        .push_slice(payment_hash.as_ref())
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// HTLC output received by the local node: claimable with the preimage
/// before `cltv_expiry`, or by the offerer after.
pub fn received_htlc_script(
    revocationpubkey: SecpPublicKey,
    local_htlcpubkey: SecpPublicKey,
    remote_htlcpubkey: SecpPublicKey,
    cltv_expiry: u32,
    payment_hash: HashLock,
) -> Script {
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&PublicKey::new(revocationpubkey).pubkey_hash())
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_key(&PublicKey::new(remote_htlcpubkey))
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(payment_hash.as_ref())
        .push_opcode(OP_EQUALVERIFY)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_key(&PublicKey::new(local_htlcpubkey))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_DROP)
        .push_int(cltv_expiry as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Output script of an HTLC-success/HTLC-timeout transaction: identical
/// shape to [`to_local_script`], spendable by revocation immediately or by
/// the owner after `to_self_delay`.
pub fn htlc_second_stage_script(
    revocationpubkey: SecpPublicKey,
    local_delayedpubkey: SecpPublicKey,
    to_self_delay: u16,
) -> Script {
    to_local_script(revocationpubkey, local_delayedpubkey, to_self_delay)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;

    use super::*;

    #[test]
    fn funding_script_matches_bolt3_vector() {
        let pk1 = SecpPublicKey::from_str(
            "023da092f6980e58d2c037173180e9a465476026ee50f96695963e8efe436f54eb",
        )
        .unwrap();
        let pk2 = SecpPublicKey::from_str(
            "030e9f7b623d2ccc7c9bd44d66d5ce21ce504c0acf6385a132cec6d3c39fa711c15",
        )
        .unwrap();
        let script = funding_script(pk1, pk2);
        let expected: Vec<u8> = Vec::from_hex(
            "5221023da092f6980e58d2c037173180e9a465476026ee50f96695963e8\
             efe436f54eb21030e9f7b623d2ccc7c9bd44d66d5ce21ce504c0acf6385\
             a132cec6d3c39fa711c152ae",
        )
        .unwrap();
        assert_eq!(script.as_bytes(), expected.as_slice());
    }
}
