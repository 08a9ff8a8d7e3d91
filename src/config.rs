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

//! Channel policy and configuration: the thresholds consulted by the
//! invariant engine and by peer-parameter negotiation at channel open.

use std::ops::Range;

/// Limit for the maximum number of HTLCs accepted towards some node.
pub const BOLT3_MAX_ACCEPTED_HTLC_LIMIT: u16 = 483;

/// BOLT-3 protocol-minimum dust limit.
pub const BOLT3_DUST_LIMIT: u64 = 354;

/// Errors produced while validating peer-proposed channel parameters against
/// local policy at channel-open time.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Error, StrictEncode,
    StrictDecode
)]
#[display(doc_comments)]
pub enum PolicyError {
    /// proposed `to_self_delay` value {proposed} is unreasonably large and
    /// exceeds the node policy limit of {allowed_maximum}
    ToSelfDelayUnreasonablyLarge { proposed: u16, allowed_maximum: u16 },

    /// proposed limit for maximum accepted HTLCs {0} exceeds the BOLT-3
    /// requirement to be below 483
    MaxAcceptedHtlcLimitExceeded(u16),

    /// proposed feerate {proposed} sat/kw is outside of the local node's fee
    /// policy range ({lowest_accepted}..{highest_accepted} sat/kw)
    FeeRateUnreasonable {
        proposed: u32,
        lowest_accepted: u32,
        highest_accepted: u32,
    },

    /// proposed channel reserve {reserve} sat is less than the dust limit
    /// {dust_limit} sat
    ChannelReserveLessDust { reserve: u64, dust_limit: u64 },

    /// dust limit {0} sat is less than the protocol minimum of 354 sat
    DustLimitTooSmall(u64),

    /// offered channel funding of {proposed} sat is smaller than the
    /// {required_minimum} sat required by local policy
    ChannelFundingTooSmall {
        proposed: u64,
        required_minimum: u64,
    },

    /// HTLC minimum {proposed} msat exceeds local policy's allowed maximum
    /// of {allowed_maximum} msat
    HtlcMinimumTooLarge { proposed: u64, allowed_maximum: u64 },

    /// proposed max_htlc_value_in_flight_msat of {proposed} is smaller than
    /// the {required_minimum} required by local policy
    HtlcInFlightMaximumTooSmall {
        proposed: u64,
        required_minimum: u64,
    },

    /// requested channel reserve {proposed} sat exceeds local policy's
    /// allowed maximum of {allowed_maximum} sat
    ChannelReserveTooLarge { proposed: u64, allowed_maximum: u64 },

    /// proposed max_accepted_htlcs of {proposed} is smaller than the
    /// {required_minimum} required by local policy
    MaxAcceptedHtlcsTooSmall {
        proposed: u16,
        required_minimum: u16,
    },

    /// proposed dust limit {proposed} sat exceeds local policy's allowed
    /// maximum of {allowed_maximum} sat
    DustLimitTooLarge { proposed: u64, allowed_maximum: u64 },

    /// requested minimum depth of {proposed} exceeds local policy's allowed
    /// maximum of {allowed_maximum}
    UnreasonableMinDepth { proposed: u32, allowed_maximum: u32 },

    /// counterparty's channel_reserve_satoshis ({channel_reserve}) is less
    /// than our dust_limit_satoshis ({dust_limit})
    LocalDustExceedsRemoteReserve {
        channel_reserve: u64,
        dust_limit: u64,
    },

    /// our channel_reserve_satoshis ({channel_reserve}) is less than the
    /// counterparty's dust_limit_satoshis ({dust_limit})
    RemoteDustExceedsLocalReserve {
        channel_reserve: u64,
        dust_limit: u64,
    },
}

/// Local node policy used to validate channel parameters proposed by a
/// remote peer at channel-open time. A default policy is provided by
/// [`Policy::default`]; a node may instead select one of the
/// interoperability presets or supply a fully custom policy.
#[derive(Clone, Eq, PartialEq, Hash, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Policy {
    /// Upper bound on an acceptable `to_self_delay`, in blocks.
    pub to_self_delay_max: u16,

    /// Range of acceptable commitment feerates, in sat/kw.
    pub feerate_per_kw_range: Range<u32>,

    /// Minimum funding transaction confirmation depth required of a
    /// remote-proposed channel.
    pub minimum_depth: u32,

    /// Maximum confirmation depth this node will accept being required by a
    /// remote peer for a channel it opens.
    pub maximum_depth: Option<u32>,

    /// Minimum funding amount this node will open a channel for.
    pub funding_satoshis_min: Option<u64>,

    /// Maximum acceptable value for a remote peer's htlc_minimum_msat.
    pub htlc_minimum_msat_max: Option<u64>,

    /// Minimum acceptable value for a remote peer's
    /// max_htlc_value_in_flight_msat.
    pub max_htlc_value_in_flight_msat_min: Option<u64>,

    /// Absolute cap on the channel reserve a remote peer may require of us.
    pub channel_reserve_satoshis_max_abs: Option<u64>,

    /// Cap, as a percentage of channel funding, on the reserve a remote peer
    /// may require of us.
    pub channel_reserve_satoshis_max_percent: Option<u8>,

    /// Minimum acceptable value for a remote peer's max_accepted_htlcs.
    pub max_accepted_htlcs_min: Option<u16>,

    /// Maximum acceptable value for a remote peer's dust_limit_satoshis.
    pub dust_limit_satoshis_max: Option<u64>,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            to_self_delay_max: 250,
            feerate_per_kw_range: 1..500,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(10000),
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            channel_reserve_satoshis_max_percent: Some(10),
            dust_limit_satoshis_max: Some(1000),
        }
    }
}

impl Policy {
    /// Policy preset matching c-lightning's defaults.
    pub fn with_clightning_defaults() -> Policy {
        Policy {
            to_self_delay_max: 14 * 24 * 6,
            feerate_per_kw_range: 1..1000,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(10000),
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            channel_reserve_satoshis_max_percent: Some(10),
            dust_limit_satoshis_max: Some(546),
        }
    }

    /// Policy preset matching LND's defaults.
    pub fn with_lnd_defaults() -> Policy {
        Policy {
            to_self_delay_max: 14 * 24 * 6,
            feerate_per_kw_range: 1..1000,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(20000),
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            channel_reserve_satoshis_max_percent: Some(1),
            dust_limit_satoshis_max: Some(546),
        }
    }

    /// Policy preset matching Eclair's defaults.
    pub fn with_eclair_defaults() -> Policy {
        Policy {
            to_self_delay_max: 14 * 24 * 6,
            feerate_per_kw_range: 1..1000,
            minimum_depth: 3,
            maximum_depth: Some(6),
            funding_satoshis_min: Some(100000),
            htlc_minimum_msat_max: None,
            max_htlc_value_in_flight_msat_min: Some(10000),
            max_accepted_htlcs_min: Some(10),
            channel_reserve_satoshis_max_abs: None,
            channel_reserve_satoshis_max_percent: Some(5),
            dust_limit_satoshis_max: Some(546),
        }
    }

    /// Checks peer-proposed parameters against the policy regardless of
    /// which BOLT-2 message they arrived in.
    pub fn validate_peer_params(
        &self,
        params: PeerParams,
    ) -> Result<(), PolicyError> {
        if params.to_self_delay > self.to_self_delay_max {
            return Err(PolicyError::ToSelfDelayUnreasonablyLarge {
                proposed: params.to_self_delay,
                allowed_maximum: self.to_self_delay_max,
            });
        }

        if params.max_accepted_htlcs > BOLT3_MAX_ACCEPTED_HTLC_LIMIT {
            return Err(PolicyError::MaxAcceptedHtlcLimitExceeded(
                params.max_accepted_htlcs,
            ));
        }

        if params.dust_limit_satoshis > params.channel_reserve_satoshis {
            return Err(PolicyError::ChannelReserveLessDust {
                reserve: params.channel_reserve_satoshis,
                dust_limit: params.dust_limit_satoshis,
            });
        }

        if params.dust_limit_satoshis < BOLT3_DUST_LIMIT {
            return Err(PolicyError::DustLimitTooSmall(
                params.dust_limit_satoshis,
            ));
        }

        if let Some(limit) = self.htlc_minimum_msat_max {
            if params.htlc_minimum_msat > limit {
                return Err(PolicyError::HtlcMinimumTooLarge {
                    proposed: params.htlc_minimum_msat,
                    allowed_maximum: limit,
                });
            }
        }

        if let Some(limit) = self.max_htlc_value_in_flight_msat_min {
            if params.max_htlc_value_in_flight_msat < limit {
                return Err(PolicyError::HtlcInFlightMaximumTooSmall {
                    proposed: params.max_htlc_value_in_flight_msat,
                    required_minimum: limit,
                });
            }
        }

        if let Some(limit) = self.channel_reserve_satoshis_max_abs {
            if params.channel_reserve_satoshis > limit {
                return Err(PolicyError::ChannelReserveTooLarge {
                    proposed: params.channel_reserve_satoshis,
                    allowed_maximum: limit,
                });
            }
        }

        if let Some(limit) = self.max_accepted_htlcs_min {
            if params.max_accepted_htlcs < limit {
                return Err(PolicyError::MaxAcceptedHtlcsTooSmall {
                    proposed: params.max_accepted_htlcs,
                    required_minimum: limit,
                });
            }
        }

        if let Some(limit) = self.dust_limit_satoshis_max {
            if params.dust_limit_satoshis > limit {
                return Err(PolicyError::DustLimitTooLarge {
                    proposed: params.dust_limit_satoshis,
                    allowed_maximum: limit,
                });
            }
        }

        Ok(())
    }

    /// Validates a remote peer's proposal to open a channel towards us.
    pub fn validate_inbound(
        &self,
        funding_satoshis: u64,
        feerate_per_kw: u32,
        params: PeerParams,
    ) -> Result<PeerParams, PolicyError> {
        if !self.feerate_per_kw_range.contains(&feerate_per_kw) {
            return Err(PolicyError::FeeRateUnreasonable {
                proposed: feerate_per_kw,
                lowest_accepted: self.feerate_per_kw_range.start,
                highest_accepted: self.feerate_per_kw_range.end,
            });
        }

        if let Some(limit) = self.funding_satoshis_min {
            if funding_satoshis < limit {
                return Err(PolicyError::ChannelFundingTooSmall {
                    proposed: funding_satoshis,
                    required_minimum: limit,
                });
            }
        }

        if let Some(percents) = self.channel_reserve_satoshis_max_percent {
            let limit = funding_satoshis as f64 * (percents as f64 / 100.);
            let limit = limit as u64;
            if params.channel_reserve_satoshis > limit {
                return Err(PolicyError::ChannelReserveTooLarge {
                    proposed: params.channel_reserve_satoshis,
                    allowed_maximum: limit,
                });
            }
        }

        self.validate_peer_params(params)?;
        Ok(params)
    }

    /// Confirms that parameters requested by a remote peer responding to
    /// our own channel-open proposal still satisfy our policy.
    pub fn confirm_outbound(
        &self,
        our_params: PeerParams,
        remote_minimum_depth: u32,
        remote_params: PeerParams,
    ) -> Result<PeerParams, PolicyError> {
        if let Some(limit) = self.maximum_depth {
            if remote_minimum_depth > limit {
                return Err(PolicyError::UnreasonableMinDepth {
                    proposed: remote_minimum_depth,
                    allowed_maximum: limit,
                });
            }
        }

        if remote_params.channel_reserve_satoshis
            < our_params.dust_limit_satoshis
        {
            return Err(PolicyError::LocalDustExceedsRemoteReserve {
                channel_reserve: remote_params.channel_reserve_satoshis,
                dust_limit: our_params.dust_limit_satoshis,
            });
        }

        if our_params.channel_reserve_satoshis
            < remote_params.dust_limit_satoshis
        {
            return Err(PolicyError::RemoteDustExceedsLocalReserve {
                channel_reserve: our_params.channel_reserve_satoshis,
                dust_limit: remote_params.dust_limit_satoshis,
            });
        }

        self.validate_peer_params(remote_params)?;
        Ok(remote_params)
    }
}

/// Parameters common to both sides of the channel, negotiated once at open.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CommonParams {
    pub minimum_depth: u32,
    pub feerate_per_kw: u32,
    pub announce_channel: bool,
}

impl Default for CommonParams {
    fn default() -> Self {
        CommonParams {
            minimum_depth: 3,
            feerate_per_kw: 256,
            announce_channel: true,
        }
    }
}

/// Parameters requested by one side of the channel from the other; applies
/// asymmetrically and is used when constructing the other side's
/// transactions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PeerParams {
    pub dust_limit_satoshis: u64,
    pub to_self_delay: u16,
    pub htlc_minimum_msat: u64,
    pub max_htlc_value_in_flight_msat: u64,
    pub channel_reserve_satoshis: u64,
    pub max_accepted_htlcs: u16,
}

impl Default for PeerParams {
    fn default() -> Self {
        PeerParams {
            dust_limit_satoshis: BOLT3_DUST_LIMIT,
            to_self_delay: 3,
            htlc_minimum_msat: 1,
            max_htlc_value_in_flight_msat: 1_000_000_000,
            channel_reserve_satoshis: 10000,
            max_accepted_htlcs: BOLT3_MAX_ACCEPTED_HTLC_LIMIT,
        }
    }
}

/// Thresholds consulted by the invariant engine while the channel is open,
/// as distinct from the one-time peer-parameter negotiation above. All
/// dust-exposure and feerate-tolerance checks in
/// [`crate::invariants`] are driven from this structure.
#[derive(Clone, PartialEq, Eq, Debug, Hash, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelConfig {
    /// Cap, in satoshis, on the total value of dust-valued (below the
    /// counterparty's dust limit) HTLCs outstanding on either commitment.
    pub max_dust_htlc_exposure_msat: u64,

    /// Feerate, in sat/kw, used purely to classify an HTLC as dust for the
    /// exposure cap above; independent of the commitment's own feerate.
    pub dust_exposure_feerate_per_kw: u32,

    /// Maximum fraction, expressed in parts-per-thousand, that a proposed
    /// feerate update may deviate from the last agreed feerate before it is
    /// rejected as out of tolerance.
    pub feerate_tolerance_permille: u32,

    /// Minimum number of blocks of margin required between the current
    /// chain height and an HTLC's cltv_expiry before the HTLC may be
    /// accepted as a final hop.
    pub min_final_cltv_expiry_delta: u32,

    /// Maximum cltv_expiry_delta the local node will accept for a
    /// forwarded or offered HTLC.
    pub max_cltv_expiry_delta: u32,

    /// Number of blocks, counted back from an HTLC's cltv_expiry, at which
    /// the channel must force-close to safely claim or time out the HTLC
    /// on-chain rather than risk losing the race to the counterparty.
    pub fulfill_safety_before_timeout_blocks: u32,

    /// `cltv_expiry_delta` this channel advertises in its `channel_update`.
    pub cltv_expiry_delta: u16,

    /// Base and proportional forwarding fee advertised in this channel's
    /// `channel_update`.
    pub forwarding_fee_base_msat: u32,
    pub forwarding_fee_proportional_millionths: u32,

    /// Policy-level bucketing of the advertised `htlc_maximum_msat` against
    /// current usable local balance, sorted ascending by floor. The
    /// advertised maximum is that of the highest-floor entry the current
    /// balance still clears, so routing nodes are not told a maximum the
    /// channel could not actually forward. Not a single hardcoded constant
    /// because a node's forwarding policy (how conservative to be as
    /// balance drains) is a local operational choice, not a protocol
    /// constant.
    pub balance_thresholds: Vec<BalanceThreshold>,
}

/// One bucket of [`ChannelConfig::balance_thresholds`]: once usable local
/// balance reaches `floor_msat`, the channel may advertise `htlc_maximum_msat`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct BalanceThreshold {
    pub floor_msat: u64,
    pub htlc_maximum_msat: u64,
}

impl ChannelConfig {
    /// The `htlc_maximum_msat` to advertise given `available_to_local_msat`
    /// of currently usable local balance: the `htlc_maximum_msat` of the
    /// highest-floor entry in `balance_thresholds` whose floor the balance
    /// still clears, or 0 if it clears none of them.
    pub fn htlc_maximum_msat_for_balance(&self, available_to_local_msat: u64) -> u64 {
        self.balance_thresholds
            .iter()
            .filter(|t| available_to_local_msat >= t.floor_msat)
            .map(|t| t.htlc_maximum_msat)
            .max()
            .unwrap_or(0)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_dust_htlc_exposure_msat: 5_000_000,
            dust_exposure_feerate_per_kw: 10_000,
            feerate_tolerance_permille: 200,
            min_final_cltv_expiry_delta: 18,
            max_cltv_expiry_delta: 2016,
            fulfill_safety_before_timeout_blocks: 10,
            cltv_expiry_delta: 40,
            forwarding_fee_base_msat: 1000,
            forwarding_fee_proportional_millionths: 1,
            balance_thresholds: vec![
                BalanceThreshold { floor_msat: 0, htlc_maximum_msat: 0 },
                BalanceThreshold { floor_msat: 10_000_000, htlc_maximum_msat: 1_000_000 },
                BalanceThreshold { floor_msat: 100_000_000, htlc_maximum_msat: 10_000_000 },
                BalanceThreshold { floor_msat: 1_000_000_000, htlc_maximum_msat: 100_000_000 },
            ],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn get_peer_params() -> PeerParams {
        PeerParams {
            to_self_delay: 250,
            max_accepted_htlcs: BOLT3_MAX_ACCEPTED_HTLC_LIMIT,
            channel_reserve_satoshis: 10000,
            max_htlc_value_in_flight_msat: 10000,
            dust_limit_satoshis: BOLT3_DUST_LIMIT,
            htlc_minimum_msat: 10,
        }
    }

    #[test]
    fn to_self_delay_too_large() {
        let policy = Policy::default();
        let mut params = get_peer_params();
        params.to_self_delay = policy.to_self_delay_max + 1;

        assert_eq!(
            policy.validate_peer_params(params),
            Err(PolicyError::ToSelfDelayUnreasonablyLarge {
                proposed: params.to_self_delay,
                allowed_maximum: policy.to_self_delay_max,
            })
        );
    }

    #[test]
    fn max_accepted_htlc_limit_exceeded() {
        let policy = Policy::default();
        let mut params = get_peer_params();
        params.max_accepted_htlcs = BOLT3_MAX_ACCEPTED_HTLC_LIMIT + 1;

        assert_eq!(
            policy.validate_peer_params(params),
            Err(PolicyError::MaxAcceptedHtlcLimitExceeded(
                params.max_accepted_htlcs
            ))
        );
    }

    #[test]
    fn channel_reserve_less_than_dust_limit() {
        let policy = Policy::default();
        let mut params = get_peer_params();
        params.channel_reserve_satoshis = params.dust_limit_satoshis - 1;

        assert_eq!(
            policy.validate_peer_params(params),
            Err(PolicyError::ChannelReserveLessDust {
                dust_limit: params.dust_limit_satoshis,
                reserve: params.channel_reserve_satoshis,
            })
        );
    }

    #[test]
    fn dust_limit_too_small() {
        let policy = Policy::default();
        let mut params = get_peer_params();
        params.dust_limit_satoshis = BOLT3_DUST_LIMIT - 1;

        assert_eq!(
            policy.validate_peer_params(params),
            Err(PolicyError::DustLimitTooSmall(params.dust_limit_satoshis))
        );
    }

    #[test]
    fn htlc_maximum_bucketed_by_available_balance() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.htlc_maximum_msat_for_balance(5_000_000), 0);
        assert_eq!(cfg.htlc_maximum_msat_for_balance(10_000_000), 1_000_000);
        assert_eq!(cfg.htlc_maximum_msat_for_balance(50_000_000), 1_000_000);
        assert_eq!(cfg.htlc_maximum_msat_for_balance(2_000_000_000), 100_000_000);
    }

    #[test]
    fn channel_reserve_too_large_percent() {
        let policy = Policy::default();
        let funding_satoshis = 20000u64;
        let params = get_peer_params();
        let percents = policy.channel_reserve_satoshis_max_percent.unwrap();
        let allowed_maximum =
            (funding_satoshis as f64 * (percents as f64 / 100.)) as u64;

        assert_eq!(
            policy.validate_inbound(funding_satoshis, 1, params),
            Err(PolicyError::ChannelReserveTooLarge {
                proposed: params.channel_reserve_satoshis,
                allowed_maximum,
            })
        );
    }
}
