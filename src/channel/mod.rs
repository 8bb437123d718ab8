// LNP Node: node running lightning network protocol and generalized lightning
// channels.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! BOLT-2 channel with BOLT-3 transactions

mod actions;
mod automata;
pub mod closing;
mod commands;
pub mod commitments;
mod error;
mod events;
pub mod htlc;
pub mod keys;
pub mod messages;
mod params;
pub mod scripts;
mod state;
pub mod transactions;

pub use actions::{BlockchainAction, ChannelAction, CmdResult, HtlcFailure, StorageAction};
pub use closing::{
    LocalCommitPublished, PublishedCommit, RemoteCommitPublished, RevokedCommitPublished,
};
pub use commands::{
    CmdAddHtlc, CmdFailHtlc, CmdFailMalformedHtlc, CmdFulfillHtlc, CmdUpdateFee, Command,
};
pub use commitments::{Commitments, LocalCommit, RemoteCommit, RemoteNextCommitInfo};
pub use error::ChannelError;
pub use events::{ChannelEvent, Watch, WatchEvent, WatchTag};
pub use htlc::{CommitmentSpec, Direction, HtlcInfo};
pub use keys::{Keyset, LocalKeyset};
pub use messages::{ChannelId, Messages};
pub use params::{LocalParams, OnChainFeerates, RemoteParams, StaticParams};
pub use state::{Channel, ChannelState, Closing, InitFundee, InitFunder};
