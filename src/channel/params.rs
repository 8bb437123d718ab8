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

use bitcoin::secp256k1::PublicKey;
use bitcoin::Script;

use super::keys::{Keyset, LocalKeyset};
use super::messages::{AcceptChannel, OpenChannel};
use crate::Config;

/// Channel parameters set by the local node
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct LocalParams {
    pub node_id: PublicKey,
    pub keys: LocalKeyset,
    /// Threshold below which outputs of our commitment are omitted
    pub dust_limit_sat: u64,
    /// Maximum value of HTLCs the remote may have in flight towards us
    pub max_htlc_value_in_flight_msat: u64,
    /// Reserve the remote peer must keep in the channel
    pub channel_reserve_sat: u64,
    /// Minimum HTLC value we accept
    pub htlc_minimum_msat: u64,
    /// CSV delay imposed on the remote peer outputs
    pub to_self_delay: u16,
    /// Maximum number of HTLCs the remote may offer us
    pub max_accepted_htlcs: u16,
    pub is_funder: bool,
    pub default_final_script_pubkey: Script,
}

/// Channel parameters announced by the remote peer
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct RemoteParams {
    pub node_id: PublicKey,
    pub dust_limit_sat: u64,
    pub max_htlc_value_in_flight_msat: u64,
    /// Reserve we must keep in the channel
    pub channel_reserve_sat: u64,
    pub htlc_minimum_msat: u64,
    /// CSV delay imposed on our outputs
    pub to_self_delay: u16,
    pub max_accepted_htlcs: u16,
    pub keys: Keyset,
}

impl RemoteParams {
    pub fn with_open_channel(node_id: PublicKey, open: &OpenChannel) -> RemoteParams {
        RemoteParams {
            node_id,
            dust_limit_sat: open.dust_limit_satoshis,
            max_htlc_value_in_flight_msat: open.max_htlc_value_in_flight_msat,
            channel_reserve_sat: open.channel_reserve_satoshis,
            htlc_minimum_msat: open.htlc_minimum_msat,
            to_self_delay: open.to_self_delay,
            max_accepted_htlcs: open.max_accepted_htlcs,
            keys: Keyset {
                funding_pubkey: open.funding_pubkey,
                revocation_basepoint: open.revocation_basepoint,
                payment_basepoint: open.payment_point,
                delayed_payment_basepoint: open.delayed_payment_basepoint,
                htlc_basepoint: open.htlc_basepoint,
            },
        }
    }

    pub fn with_accept_channel(node_id: PublicKey, accept: &AcceptChannel) -> RemoteParams {
        RemoteParams {
            node_id,
            dust_limit_sat: accept.dust_limit_satoshis,
            max_htlc_value_in_flight_msat: accept.max_htlc_value_in_flight_msat,
            channel_reserve_sat: accept.channel_reserve_satoshis,
            htlc_minimum_msat: accept.htlc_minimum_msat,
            to_self_delay: accept.to_self_delay,
            max_accepted_htlcs: accept.max_accepted_htlcs,
            keys: Keyset {
                funding_pubkey: accept.funding_pubkey,
                revocation_basepoint: accept.revocation_basepoint,
                payment_basepoint: accept.payment_point,
                delayed_payment_basepoint: accept.delayed_payment_basepoint,
                htlc_basepoint: accept.htlc_basepoint,
            },
        }
    }
}

/// On-chain fee rates used for transactions the channel builds by itself
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("mutual_close={mutual_close_feerate}, claim_main={claim_main_feerate}, fast={fast_feerate}")]
pub struct OnChainFeerates {
    pub mutual_close_feerate: u32,
    pub claim_main_feerate: u32,
    pub fast_feerate: u32,
}

impl Default for OnChainFeerates {
    fn default() -> Self {
        OnChainFeerates { mutual_close_feerate: 2500, claim_main_feerate: 2500, fast_feerate: 5000 }
    }
}

/// Parameters which never change during the channel lifetime
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct StaticParams {
    pub config: Config,
    pub remote_node_id: PublicKey,
}
