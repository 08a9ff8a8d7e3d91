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

//! The Commitment Model: BOLT-3 transaction construction plus the change
//! log of updates not yet folded into a signed commitment.

pub mod changelog;
pub mod model;
pub mod scripts;
pub mod tx;

pub use changelog::{ChangeLog, Update};
pub use model::{
    ChannelParams, Commitment, Commitments, CommitmentSpec, HtlcInfo,
    LocalCommit, RemoteCommit, RemoteNextCommitInfo,
};
