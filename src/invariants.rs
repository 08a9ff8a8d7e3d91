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

//! The invariant engine: the ordered set of checks a proposed update must
//! pass before it is added to a [`crate::commitment::ChangeLog`]. Checks run
//! in a fixed order so that the error reported to the caller is always the
//! first violated invariant, matching the diagnostic the protocol actually
//! needs to decide what to do next.

use crate::commitment::CommitmentSpec;
use crate::config::{ChannelConfig, PeerParams};
use crate::error::{Advisory, InvariantError};
use crate::ids::ChannelId;

/// Checks `spec_after`'s dust-valued HTLC exposure against `cap_msat`,
/// returning the side-appropriate error variant (`is_local_commitment`
/// selects which of [`InvariantError::LocalDustHtlcExposureTooHigh`] /
/// [`InvariantError::RemoteDustHtlcExposureTooHigh`] is raised) so a breach
/// on either side's projected commitment is reported accurately rather than
/// always blamed on the local one.
pub fn check_dust_exposure(
    channel_id: ChannelId,
    spec_after: &CommitmentSpec,
    dust_limit_sat: u64,
    cap_msat: u64,
    is_local_commitment: bool,
) -> Result<u64, InvariantError> {
    let dust_exposure_msat = spec_after.dust_exposure_msat(dust_limit_sat);
    if dust_exposure_msat > cap_msat {
        return Err(if is_local_commitment {
            InvariantError::LocalDustHtlcExposureTooHigh {
                channel_id,
                cap_sat: cap_msat / 1000,
                resulting_exposure_msat: dust_exposure_msat,
            }
        } else {
            InvariantError::RemoteDustHtlcExposureTooHigh {
                channel_id,
                cap_sat: cap_msat / 1000,
                resulting_exposure_msat: dust_exposure_msat,
            }
        });
    }
    Ok(dust_exposure_msat)
}

/// Checks a proposed HTLC addition against the limits the *offered-to* side
/// has advertised (`htlc_minimum_msat`, `max_accepted_htlcs`,
/// `max_htlc_value_in_flight_msat`) and `spec_after`'s own dust-exposure cap.
/// `is_local_commitment` selects which side `spec_after` represents, so the
/// dust-exposure breach (if any) is reported against the correct commitment.
/// Returns the resulting dust exposure alongside `Ok` so the caller can
/// decide whether to also emit an [`Advisory`]. Callers must separately
/// check the *other* side's projected spec with [`check_dust_exposure`],
/// since either commitment's dust exposure can independently breach its own
/// cap.
pub fn validate_add_htlc(
    channel_id: ChannelId,
    spec_after: &CommitmentSpec,
    dust_limit_sat: u64,
    peer_params: &PeerParams,
    config: &ChannelConfig,
    amount_msat: u64,
    cltv_expiry: u32,
    current_height: u32,
    is_local_commitment: bool,
) -> Result<u64, InvariantError> {
    if amount_msat < peer_params.htlc_minimum_msat {
        return Err(InvariantError::HtlcValueTooSmall {
            amount_msat,
            htlc_minimum_msat: peer_params.htlc_minimum_msat,
        });
    }

    let offered_count = spec_after.htlcs.len() as u16;
    if offered_count > peer_params.max_accepted_htlcs {
        return Err(InvariantError::TooManyHtlcs {
            count: offered_count,
            limit: peer_params.max_accepted_htlcs,
        });
    }

    let in_flight_msat: u64 =
        spec_after.htlcs.iter().map(|h| h.amount_msat).sum();
    if in_flight_msat > peer_params.max_htlc_value_in_flight_msat {
        return Err(InvariantError::HtlcValueTooHigh {
            amount_msat,
            in_flight_msat: in_flight_msat - amount_msat,
            limit_msat: peer_params.max_htlc_value_in_flight_msat,
        });
    }

    if cltv_expiry < current_height + config.min_final_cltv_expiry_delta {
        return Err(InvariantError::ExpiryTooSoon { cltv_expiry });
    }
    if cltv_expiry > current_height + config.max_cltv_expiry_delta {
        return Err(InvariantError::ExpiryTooFar {
            cltv_expiry,
            max_cltv_expiry: current_height + config.max_cltv_expiry_delta,
        });
    }

    check_dust_exposure(
        channel_id,
        spec_after,
        dust_limit_sat,
        config.max_dust_htlc_exposure_msat,
        is_local_commitment,
    )
}

/// Checks that the proposer of `spec_after` retains at least its channel
/// reserve once the commitment fee is paid, returning the concrete
/// shortfall so the caller can report
/// [`InvariantError::InsufficientFunds`] with the exact missing amount.
pub fn validate_reserve_and_fees(
    spec_after: &CommitmentSpec,
    dust_limit_sat: u64,
    proposer_reserve_sat: u64,
    proposer_pays_fees: bool,
    anchor_outputs: bool,
) -> Result<(), InvariantError> {
    let fees_sat = if proposer_pays_fees {
        spec_after.base_fee_sat(dust_limit_sat, anchor_outputs)
    } else {
        0
    };

    let available_sat = spec_after.to_local_msat / 1000;
    let required_sat = proposer_reserve_sat + fees_sat;
    if available_sat < required_sat {
        return Err(InvariantError::InsufficientFunds {
            missing: required_sat - available_sat,
            reserve: proposer_reserve_sat,
            fees: fees_sat,
        });
    }
    Ok(())
}

/// Checks a proposed `update_fee` against the configured tolerance band
/// around the last agreed feerate.
pub fn validate_feerate_update(
    config: &ChannelConfig,
    last_feerate_per_kw: u32,
    proposed_feerate_per_kw: u32,
) -> Result<(), InvariantError> {
    let tolerance = (last_feerate_per_kw as u64
        * config.feerate_tolerance_permille as u64)
        / 1000;
    let lower = last_feerate_per_kw.saturating_sub(tolerance as u32);
    let upper = last_feerate_per_kw.saturating_add(tolerance as u32);
    if proposed_feerate_per_kw < lower || proposed_feerate_per_kw > upper {
        return Err(InvariantError::FeerateOutOfTolerance {
            proposed_sat_per_kw: proposed_feerate_per_kw,
            last_sat_per_kw: last_feerate_per_kw,
        });
    }
    Ok(())
}

/// Produces an [`Advisory`] if dust exposure has crept above a warn
/// threshold (80% of the cap) without yet breaching it.
pub fn dust_exposure_advisory(
    side: &'static str,
    exposure_msat: u64,
    cap_sat: u64,
) -> Option<Advisory> {
    let warn_threshold_sat = cap_sat * 8 / 10;
    if exposure_msat / 1000 >= warn_threshold_sat {
        Some(Advisory::ApproachingDustExposureCap {
            side,
            exposure_msat,
            warn_threshold_sat,
            cap_sat,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use amplify::DumbDefault;

    use super::*;
    use crate::commitment::HtlcInfo;
    use crate::ids::HashLock;

    fn config() -> ChannelConfig {
        ChannelConfig {
            max_dust_htlc_exposure_msat: 25_000_000,
            ..ChannelConfig::default()
        }
    }

    fn peer_params() -> PeerParams {
        PeerParams::default()
    }

    #[test]
    fn insufficient_funds_reports_exact_shortfall() {
        let spec = CommitmentSpec::new(5_000_000, 0, 10_000);
        let err = validate_reserve_and_fees(&spec, 546, 20_000, true, false)
            .unwrap_err();
        match err {
            InvariantError::InsufficientFunds {
                missing,
                reserve,
                fees,
            } => {
                assert_eq!(reserve, 20_000);
                let base_fee = spec.base_fee_sat(546, false);
                assert_eq!(fees, base_fee);
                assert_eq!(missing, 20_000 + base_fee - 5_000);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn dust_exposure_too_high_reports_channel_and_cap() {
        let channel_id = ChannelId::dumb_default();
        let mut spec = CommitmentSpec::new(800_000_000, 200_000_000, 10_000);
        spec.htlcs.push(HtlcInfo {
            htlc_id: 0,
            amount_msat: 25_001_000,
            payment_hash: HashLock::dumb_default(),
            cltv_expiry: 500_000,
            offered_by_owner: true,
        });
        let cfg = config();
        let dust_exposure_msat = spec.dust_exposure_msat(546);
        assert!(dust_exposure_msat > cfg.max_dust_htlc_exposure_msat);
        let err = check_dust_exposure(
            channel_id,
            &spec,
            546,
            cfg.max_dust_htlc_exposure_msat,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, InvariantError::LocalDustHtlcExposureTooHigh { .. }));
    }

    #[test]
    fn dust_exposure_breach_on_remote_side_reports_remote_variant() {
        let channel_id = ChannelId::dumb_default();
        let mut spec = CommitmentSpec::new(800_000_000, 200_000_000, 10_000);
        spec.htlcs.push(HtlcInfo {
            htlc_id: 0,
            amount_msat: 25_001_000,
            payment_hash: HashLock::dumb_default(),
            cltv_expiry: 500_000,
            offered_by_owner: true,
        });
        let cfg = config();
        let err = check_dust_exposure(
            channel_id,
            &spec,
            546,
            cfg.max_dust_htlc_exposure_msat,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, InvariantError::RemoteDustHtlcExposureTooHigh { .. }));
    }

    #[test]
    fn feerate_within_tolerance_is_accepted() {
        let cfg = ChannelConfig::default();
        assert!(validate_feerate_update(&cfg, 10_000, 10_500).is_ok());
    }

    #[test]
    fn feerate_outside_tolerance_is_rejected() {
        let cfg = ChannelConfig::default();
        assert!(validate_feerate_update(&cfg, 10_000, 20_000).is_err());
    }

    #[test]
    fn htlc_below_minimum_is_rejected() {
        let spec = CommitmentSpec::new(800_000_000, 200_000_000, 10_000);
        let params = peer_params();
        let cfg = ChannelConfig::default();
        let err = validate_add_htlc(
            ChannelId::dumb_default(),
            &spec,
            546,
            &params,
            &cfg,
            0,
            500_040,
            500_000,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, InvariantError::HtlcValueTooSmall { .. }));
    }
}
