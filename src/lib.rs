// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2019-2024 by
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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate amplify_derive;
#[macro_use]
extern crate strict_encoding;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_with;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;

macro_rules! dumb_pubkey {
    () => {
        secp256k1::PublicKey::from_secret_key(
            secp256k1::SECP256K1,
            &secp256k1::ONE_KEY,
        )
    };
}

pub mod closing;
pub mod commitment;
pub mod config;
pub mod error;
pub mod fsm;
pub mod ids;
pub mod invariants;
pub mod keys;
pub mod messages;
pub mod protocol;
pub mod signer;

pub use commitment::{
    ChannelParams, Commitment, Commitments, HtlcInfo, LocalCommit,
    RemoteCommit, RemoteNextCommitInfo,
};
pub use config::ChannelConfig;
pub use error::{ChannelError, InvariantError, ReestablishError};
pub use fsm::{ChannelActor, ChannelPhase, Command, Effect, Event};
pub use ids::{ChannelId, Direction};
