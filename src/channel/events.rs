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

use std::fmt::{self, Display, Formatter};

use bitcoin::{OutPoint, Transaction, Txid};

use super::commands::Command;
use super::htlc::HtlcInfo;
use super::messages::Messages;
use super::params::OnChainFeerates;
use super::state::{ChannelState, InitFundee, InitFunder};

/// Reason the channel asked for a blockchain watch; echoed back in the
/// matching [`WatchEvent`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum WatchTag {
    /// funding transaction reached the required depth
    #[display("funding-depth-ok")]
    FundingDepthOk,

    /// funding output was spent
    #[display("funding-spent")]
    FundingSpent,

    /// output of a published commitment or HTLC transaction was spent
    #[display("output-spent")]
    OutputSpent,

    /// closing, claim or penalty transaction was confirmed
    #[display("tx-confirmed")]
    TxConfirmed,
}

/// Blockchain watch request
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum Watch {
    #[display("confirmed({txid}, depth {min_depth}, {tag})")]
    Confirmed { txid: Txid, min_depth: u32, tag: WatchTag },

    #[display("spent({outpoint}, {tag})")]
    Spent { outpoint: OutPoint, tag: WatchTag },
}

/// Notification reported by the blockchain watcher
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum WatchEvent {
    Confirmed { tag: WatchTag, tx: Transaction, block_height: u32, tx_index: u32 },

    Spent { tag: WatchTag, tx: Transaction },
}

impl Display for WatchEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::Confirmed { tag, tx, block_height, .. } => {
                write!(f, "{} {} at height {}", tag, tx.txid(), block_height)
            }
            WatchEvent::Spent { tag, tx } => write!(f, "{} by {}", tag, tx.txid()),
        }
    }
}

/// Event processed by the channel state machine
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum ChannelEvent {
    /// Open a new channel as a funder
    InitFunder(InitFunder),

    /// Wait for a channel proposal from the remote peer
    InitFundee(InitFundee),

    /// Restore channel from the persisted state
    Restore(Box<ChannelState>),

    MessageReceived(Messages),

    ExecuteCommand(Command),

    WatchReceived(WatchEvent),

    /// Response to [`super::BlockchainAction::MakeFundingTx`]
    MakeFundingTxResponse { funding_tx: Transaction, output_index: u32, fee_sat: u64 },

    /// Response to [`super::StorageAction::GetHtlcInfos`]
    GetHtlcInfosResponse { revoked_commit_txid: Txid, htlc_infos: Vec<HtlcInfo> },

    NewBlock(u32),

    SetOnChainFeerates(OnChainFeerates),

    CheckHtlcTimeout,

    Connected,

    Disconnected,
}

impl Display for ChannelEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChannelEvent::InitFunder(init) => write!(f, "init_funder({} sat)", init.funding_sat),
            ChannelEvent::InitFundee(_) => f.write_str("init_fundee"),
            ChannelEvent::Restore(state) => write!(f, "restore({})", state),
            ChannelEvent::MessageReceived(msg) => write!(f, "message({})", msg),
            ChannelEvent::ExecuteCommand(cmd) => write!(f, "command({})", cmd),
            ChannelEvent::WatchReceived(event) => write!(f, "watch({})", event),
            ChannelEvent::MakeFundingTxResponse { funding_tx, output_index, .. } => {
                write!(f, "funding_tx({}:{})", funding_tx.txid(), output_index)
            }
            ChannelEvent::GetHtlcInfosResponse { revoked_commit_txid, htlc_infos } => {
                write!(f, "htlc_infos({}, {} items)", revoked_commit_txid, htlc_infos.len())
            }
            ChannelEvent::NewBlock(height) => write!(f, "new_block({})", height),
            ChannelEvent::SetOnChainFeerates(feerates) => write!(f, "feerates({})", feerates),
            ChannelEvent::CheckHtlcTimeout => f.write_str("check_htlc_timeout"),
            ChannelEvent::Connected => f.write_str("connected"),
            ChannelEvent::Disconnected => f.write_str("disconnected"),
        }
    }
}
