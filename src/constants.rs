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

pub const LNP_CONFIG: &str = "{data_dir}/lnp-channel.toml";
pub const LNP_DATA_DIR: &str = "~/.lnp_node";
pub const ELECTRUM_URL: &str = "ssl://electrum.blockstream.info:60002";

/// Maximum number of HTLCs a BOLT-3 commitment may carry per direction
pub const MAX_ACCEPTED_HTLC_LIMIT: u16 = 483;
/// Largest CSV delay we accept from the remote peer
pub const MAX_TO_SELF_DELAY: u16 = 2016;
/// Max funding amount without `option_support_large_channel`
pub const MAX_FUNDING_SAT: u64 = 16_777_215;

pub const DEFAULT_DUST_LIMIT_SAT: u64 = 546;
pub const DEFAULT_TO_SELF_DELAY: u16 = 144;
pub const DEFAULT_MIN_DEPTH: u32 = 3;
pub const DEFAULT_MAX_MIN_DEPTH: u32 = 144;
pub const DEFAULT_HTLC_MINIMUM_MSAT: u64 = 1_000;
pub const DEFAULT_MAX_HTLC_VALUE_IN_FLIGHT_MSAT: u64 = 5_000_000_000;
pub const DEFAULT_MAX_ACCEPTED_HTLCS: u16 = 30;
/// Channel reserve as a fraction of the funding amount
pub const DEFAULT_RESERVE_TO_FUNDING_RATIO: f64 = 0.01;
pub const DEFAULT_MIN_FUNDING_SAT: u64 = 100_000;
pub const DEFAULT_MAX_CLTV_EXPIRY_DELTA: u32 = 2016;
pub const DEFAULT_MIN_FEERATE_PER_KW: u32 = 253;
pub const DEFAULT_MAX_CLOSING_NEGOTIATION_ROUNDS: u16 = 20;
pub const DEFAULT_WALLET_MIN_CONFIRMATIONS: u32 = 6;
/// Seconds between polls of the electrum server for address status changes
pub const WALLET_POLL_INTERVAL_SECS: u64 = 10;
/// Capacity of the wallet worker command queue
pub const WALLET_MAILBOX_CAPACITY: usize = 64;
