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

//! Unsigned transaction construction: the commitment transaction itself and
//! the second-stage HTLC-timeout/HTLC-success transactions spending it.

use bitcoin::{OutPoint, Transaction, TxIn, TxOut};
use secp256k1::PublicKey;

use super::model::{CommitmentSpec, HtlcInfo};
use super::scripts;
use crate::keys::{obscure_commitment_number, LOWER_48_BITS};

/// Ordering used by BOLT-3 when two outputs tie on amount: by script
/// lexicographic order (BIP-69-like, but over the full output rather than
/// just the script). Tags each output with the [`HtlcInfo`] it pays, if
/// any, so callers can recover which final output index belongs to which
/// HTLC after sorting scrambles the construction order.
fn lex_order_outputs(outputs: &mut Vec<(TxOut, Option<HtlcInfo>)>) {
    outputs.sort_by(|(a, _), (b, _)| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
    });
}

/// Builds the unsigned commitment transaction for one side, given that
/// side's [`CommitmentSpec`] and the keys needed to build its two
/// balance outputs. HTLC outputs are appended separately by the caller
/// once their second-stage transactions (and therefore their exact output
/// values net of fees) are known.
#[allow(clippy::too_many_arguments)]
pub fn build_commitment_tx(
    spec: &CommitmentSpec,
    dust_limit_sat: u64,
    commitment_number: u64,
    obscuring_factor: u64,
    funding_outpoint: OutPoint,
    local_revocationpubkey: PublicKey,
    local_delayedpubkey: PublicKey,
    to_self_delay: u16,
    remote_pubkey: PublicKey,
    static_remotekey: bool,
    anchor_outputs: bool,
    local_funding_pubkey: PublicKey,
    remote_funding_pubkey: PublicKey,
    htlc_outputs: Vec<(HtlcInfo, TxOut)>,
) -> (Transaction, Vec<(HtlcInfo, u32)>) {
    let obscured = obscure_commitment_number(commitment_number, obscuring_factor) & LOWER_48_BITS;
    let lower_24 = (obscured & 0x00FF_FFFF) as u32;
    let upper_24 = ((obscured >> 24) & 0x00FF_FFFF) as u32;
    let lock_time = (0x20u32 << 24) | lower_24;
    let sequence = (0x80u32 << 24) | upper_24;

    let base_fee = spec.base_fee_sat(dust_limit_sat, anchor_outputs);
    let to_local_sat = spec.to_local_msat / 1000;
    let to_remote_sat = (spec.to_remote_msat / 1000).saturating_sub(base_fee);

    let mut outputs = Vec::new();
    if to_local_sat > dust_limit_sat {
        outputs.push((
            TxOut {
                value: to_local_sat,
                script_pubkey: scripts::to_local_script(
                    local_revocationpubkey,
                    local_delayedpubkey,
                    to_self_delay,
                )
                .to_v0_p2wsh(),
            },
            None,
        ));
        if anchor_outputs {
            outputs.push((
                TxOut {
                    value: scripts::ANCHOR_OUTPUT_VALUE_SAT,
                    script_pubkey: scripts::anchor_script(local_funding_pubkey).to_v0_p2wsh(),
                },
                None,
            ));
        }
    }
    if to_remote_sat > dust_limit_sat {
        let script_pubkey = if static_remotekey {
            scripts::to_remote_script_v2(remote_pubkey).to_v0_p2wsh()
        } else {
            scripts::to_remote_script_v1(remote_pubkey)
        };
        outputs.push((
            TxOut {
                value: to_remote_sat,
                script_pubkey,
            },
            None,
        ));
        if anchor_outputs {
            outputs.push((
                TxOut {
                    value: scripts::ANCHOR_OUTPUT_VALUE_SAT,
                    script_pubkey: scripts::anchor_script(remote_funding_pubkey).to_v0_p2wsh(),
                },
                None,
            ));
        }
    }
    for (htlc, txout) in htlc_outputs {
        outputs.push((txout, Some(htlc)));
    }
    lex_order_outputs(&mut outputs);

    let htlc_output_indices = outputs
        .iter()
        .enumerate()
        .filter_map(|(index, (_, htlc))| (*htlc).map(|htlc| (htlc, index as u32)))
        .collect();

    let tx = Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: funding_outpoint,
            script_sig: bitcoin::Script::new(),
            sequence,
            witness: Vec::new(),
        }],
        output: outputs.into_iter().map(|(txout, _)| txout).collect(),
    };

    (tx, htlc_output_indices)
}

/// Builds an unsigned HTLC-timeout (offered) or HTLC-success (received)
/// transaction spending a single HTLC output of the commitment transaction.
pub fn build_htlc_tx(
    commitment_txid: bitcoin::Txid,
    htlc_output_index: u32,
    htlc: &HtlcInfo,
    htlc_amount_sat: u64,
    feerate_per_kw: u32,
    revocationpubkey: PublicKey,
    local_delayedpubkey: PublicKey,
    to_self_delay: u16,
    zero_fee_htlc_tx: bool,
) -> Transaction {
    let fee = if zero_fee_htlc_tx {
        0
    } else {
        let weight = if htlc.offered_by_owner {
            super::model::htlc_timeout_weight()
        } else {
            super::model::htlc_success_weight()
        };
        weight * feerate_per_kw as u64 / 1000
    };
    let output_value = htlc_amount_sat.saturating_sub(fee);

    let second_stage_script = scripts::htlc_second_stage_script(
        revocationpubkey,
        local_delayedpubkey,
        to_self_delay,
    );

    let lock_time = if htlc.offered_by_owner {
        htlc.cltv_expiry
    } else {
        0
    };

    Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: OutPoint::new(commitment_txid, htlc_output_index),
            script_sig: bitcoin::Script::new(),
            // `option_anchors_zero_fee_htlc_tx` sets nSequence=1 so the
            // package-relay rules let it confirm fee-free, carried in by a
            // CPFP spend of the commitment's anchor output.
            sequence: if zero_fee_htlc_tx { 1 } else { 0 },
            witness: Vec::new(),
        }],
        output: vec![TxOut {
            value: output_value,
            script_pubkey: second_stage_script.to_v0_p2wsh(),
        }],
    }
}

/// Unsigned mutual-close transaction spending the funding output directly to
/// the two negotiated closing scripts.
pub fn build_closing_tx(
    funding_outpoint: OutPoint,
    outputs: Vec<TxOut>,
) -> Transaction {
    Transaction {
        version: 2,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: funding_outpoint,
            script_sig: bitcoin::Script::new(),
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        output: outputs,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn commitment_locktime_and_sequence_carry_obscured_number() {
        let obscured = 0x2bb038521914u64 ^ 42;
        let lower_24 = (obscured & 0x00FF_FFFF) as u32;
        let upper_24 = ((obscured >> 24) & 0x00FF_FFFF) as u32;
        let expected_lock_time = (0x20u32 << 24) | lower_24;
        let expected_sequence = (0x80u32 << 24) | upper_24;
        assert_eq!(expected_lock_time >> 24, 0x20);
        assert_eq!(expected_sequence >> 24, 0x80);

        let recovered = (u64::from(upper_24) << 24) | u64::from(lower_24);
        assert_eq!(recovered, obscured);
    }
}
