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

//! Lightning channel core: BOLT-2 channel state machine, BOLT-3 commitment
//! ledger with its commit/revoke protocol, close resolver and a funding-source
//! wallet actor.
//!
//! The state machine is a pure function: each [`channel::ChannelEvent`] fed
//! into [`channel::Channel::process`] produces a new channel value and a list
//! of [`channel::ChannelAction`] effects which must be executed by the caller.

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    // unused_imports,
    // dead_code
    // missing_docs,
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod automata;
pub mod channel;
mod config;
pub mod constants;
mod error;
mod log_style;
pub mod wallet;

pub use config::{Config, ConfigError};
pub use error::Error;
pub use log_style::LogStyle;

use bitcoin::secp256k1::{All, Secp256k1};

lazy_static! {
    /// Global secp256k1 context with signing and verification capabilities
    pub static ref SECP256K1: Secp256k1<All> = Secp256k1::new();
}
