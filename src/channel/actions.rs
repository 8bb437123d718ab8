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

//! Side effects requested by the channel state machine. The channel never
//! performs them itself: an executor does and reports results back as
//! [`super::ChannelEvent`]s.

use std::fmt::{self, Display, Formatter};

use bitcoin::{Script, Transaction, Txid};

use super::commands::Command;
use super::error::ChannelError;
use super::events::Watch;
use super::htlc::HtlcInfo;
use super::messages::{ChannelId, Messages, UpdateAddHtlc, UpdateFailHtlc, UpdateFailMalformedHtlc};
use super::state::ChannelState;

#[derive(Clone, PartialEq, Eq, Debug, Display, From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum ChannelAction {
    #[display("send({0})")]
    #[from]
    SendMessage(Messages),

    #[display(inner)]
    #[from]
    Blockchain(BlockchainAction),

    #[display(inner)]
    #[from]
    Storage(StorageAction),

    /// Incoming HTLC became irrevocably committed and can be relayed
    #[display("process_incoming_htlc({0})")]
    ProcessIncomingHtlc(UpdateAddHtlc),

    #[display(inner)]
    #[from]
    ProcessCmdRes(CmdResult),
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum BlockchainAction {
    /// Ask funding wallet to build a transaction paying `amount_sat` to the
    /// 2-of-2 funding script
    MakeFundingTx { script_pubkey: Script, amount_sat: u64, feerate_per_kw: u32 },

    SendWatch(Watch),

    PublishTx(Transaction),
}

impl Display for BlockchainAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainAction::MakeFundingTx { amount_sat, feerate_per_kw, .. } => {
                write!(f, "make_funding_tx({} sat, {} sat/kw)", amount_sat, feerate_per_kw)
            }
            BlockchainAction::SendWatch(watch) => write!(f, "watch({})", watch),
            BlockchainAction::PublishTx(tx) => write!(f, "publish({})", tx.txid()),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum StorageAction {
    #[display("store_state({0})")]
    StoreState(Box<ChannelState>),

    /// HTLCs of a remote commitment, needed to punish it after revocation
    #[display("store_htlc_infos({channel_id}, #{commitment_number})")]
    StoreHtlcInfos { channel_id: ChannelId, commitment_number: u64, htlc_infos: Vec<HtlcInfo> },

    #[display("get_htlc_infos({revoked_commit_txid}, #{commitment_number})")]
    GetHtlcInfos { revoked_commit_txid: Txid, commitment_number: u64 },
}

/// Reason an outgoing HTLC was failed
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum HtlcFailure {
    #[display("remote failure")]
    RemoteFail(UpdateFailHtlc),

    #[display("remote malformed failure")]
    RemoteFailMalformed(UpdateFailMalformedHtlc),

    /// HTLC was not signed before the peer disconnected
    #[display("disconnected before signing")]
    Disconnected,
}

/// Result of command execution or of an outgoing HTLC resolution
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum CmdResult {
    #[display("not_executed({command}): {error}")]
    NotExecuted { command: Command, error: ChannelError },

    /// Channel proposal rejected before anything was sent to the peer
    #[display("init_failed({temporary_channel_id}): {error}")]
    InitFailed { temporary_channel_id: ChannelId, error: ChannelError },

    #[display("add_settled_fulfill({htlc})")]
    AddSettledFulfill { htlc: UpdateAddHtlc, payment_preimage: [u8; 32] },

    #[display("add_settled_fail({htlc}, {failure})")]
    AddSettledFail { htlc: UpdateAddHtlc, failure: HtlcFailure },
}

impl ChannelAction {
    #[inline]
    pub fn send(message: impl Into<Messages>) -> ChannelAction {
        ChannelAction::SendMessage(message.into())
    }

    #[inline]
    pub fn publish(tx: Transaction) -> ChannelAction {
        BlockchainAction::PublishTx(tx).into()
    }

    #[inline]
    pub fn watch(watch: Watch) -> ChannelAction { BlockchainAction::SendWatch(watch).into() }

    #[inline]
    pub fn store_state(state: &ChannelState) -> ChannelAction {
        StorageAction::StoreState(Box::new(state.clone())).into()
    }

    #[inline]
    pub fn not_executed(command: Command, error: ChannelError) -> ChannelAction {
        CmdResult::NotExecuted { command, error }.into()
    }

    /// Message sent to the peer, if this is a [`ChannelAction::SendMessage`]
    pub fn message(&self) -> Option<&Messages> {
        match self {
            ChannelAction::SendMessage(msg) => Some(msg),
            _ => None,
        }
    }

    /// Transaction published, if this is a [`BlockchainAction::PublishTx`]
    pub fn published_tx(&self) -> Option<&Transaction> {
        match self {
            ChannelAction::Blockchain(BlockchainAction::PublishTx(tx)) => Some(tx),
            _ => None,
        }
    }
}
