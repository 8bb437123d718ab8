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
use bitcoin::Transaction;

use super::closing::{
    ClosingTxProposed, LocalCommitPublished, PublishedCommit, RemoteCommitPublished,
    RevokedCommitPublished,
};
use super::commitments::{Commitments, RemoteCommit};
use super::htlc::CommitmentSpec;
use super::messages::{
    AcceptChannel, ChannelId, FundingCreated, FundingLocked, OpenChannel, Shutdown,
};
use super::params::{LocalParams, OnChainFeerates, RemoteParams, StaticParams};
use super::transactions::FundingSpendTx;

/// Request to open a channel as the funder
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct InitFunder {
    pub temporary_channel_id: ChannelId,
    pub funding_sat: u64,
    pub push_msat: u64,
    /// Fee rate of the commitment transactions
    pub initial_feerate_per_kw: u32,
    /// Fee rate of the funding transaction
    pub funding_tx_feerate_per_kw: u32,
    pub local_params: LocalParams,
    pub channel_flags: u8,
}

/// Request to accept a channel proposed by the remote peer
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct InitFundee {
    pub temporary_channel_id: ChannelId,
    pub local_params: LocalParams,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitForAcceptChannel {
    pub init_funder: InitFunder,
    pub last_sent: OpenChannel,
}

/// Funder waits for its wallet to build the funding transaction
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitForFundingInternal {
    pub temporary_channel_id: ChannelId,
    pub local_params: LocalParams,
    pub remote_params: RemoteParams,
    pub funding_sat: u64,
    pub push_msat: u64,
    pub initial_feerate_per_kw: u32,
    pub remote_first_per_commitment_point: PublicKey,
    pub channel_flags: u8,
    pub minimum_depth: u32,
    pub last_sent: OpenChannel,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitForFundingCreated {
    pub temporary_channel_id: ChannelId,
    pub local_params: LocalParams,
    pub remote_params: RemoteParams,
    pub funding_sat: u64,
    pub push_msat: u64,
    pub initial_feerate_per_kw: u32,
    pub remote_first_per_commitment_point: PublicKey,
    pub channel_flags: u8,
    pub last_sent: AcceptChannel,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitForFundingSigned {
    pub channel_id: ChannelId,
    pub local_params: LocalParams,
    pub remote_params: RemoteParams,
    pub funding_tx: Transaction,
    pub funding_tx_fee_sat: u64,
    pub local_spec: CommitmentSpec,
    pub local_commit_tx: FundingSpendTx,
    pub remote_commit: RemoteCommit,
    pub channel_flags: u8,
    pub minimum_depth: u32,
    pub last_sent: FundingCreated,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitForFundingConfirmed {
    pub commitments: Commitments,
    /// Known only to the funder
    pub funding_tx: Option<Transaction>,
    pub waiting_since: u32,
    /// `funding_locked` which the peer sent before our funding depth was
    /// reached
    pub deferred: Option<FundingLocked>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitForFundingLocked {
    pub commitments: Commitments,
    pub last_sent: FundingLocked,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ShuttingDown {
    pub commitments: Commitments,
    pub local_shutdown: Shutdown,
    pub remote_shutdown: Option<Shutdown>,
    /// Our `shutdown` is held back while outgoing HTLCs wait to be signed
    pub local_shutdown_sent: bool,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct Negotiating {
    pub commitments: Commitments,
    pub local_shutdown: Shutdown,
    pub remote_shutdown: Shutdown,
    /// Our proposals, one per negotiation round
    pub closing_txs_proposed: Vec<ClosingTxProposed>,
    /// Closing transaction signed by both parties which we may publish
    pub best_unpublished_closing_tx: Option<Transaction>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct Closing {
    pub commitments: Commitments,
    pub funding_tx: Option<Transaction>,
    pub waiting_since: u32,
    pub mutual_close_proposed: Vec<Transaction>,
    pub mutual_close_published: Vec<Transaction>,
    pub local_commit_published: Option<LocalCommitPublished>,
    pub remote_commit_published: Option<RemoteCommitPublished>,
    pub next_remote_commit_published: Option<RemoteCommitPublished>,
    pub revoked_commit_published: Vec<RevokedCommitPublished>,
}

impl Closing {
    pub fn with(commitments: Commitments, waiting_since: u32) -> Closing {
        Closing {
            commitments,
            funding_tx: None,
            waiting_since,
            mutual_close_proposed: vec![],
            mutual_close_published: vec![],
            local_commit_published: None,
            remote_commit_published: None,
            next_remote_commit_published: None,
            revoked_commit_published: vec![],
        }
    }

    /// Whether any of the published commitments or a mutual close transaction
    /// is irrevocably resolved
    pub fn is_closed(&self) -> bool {
        self.local_commit_published.as_ref().map(PublishedCommit::is_done).unwrap_or_default()
            || self.remote_commit_published.as_ref().map(PublishedCommit::is_done).unwrap_or_default()
            || self
                .next_remote_commit_published
                .as_ref()
                .map(PublishedCommit::is_done)
                .unwrap_or_default()
            || self.revoked_commit_published.iter().any(PublishedCommit::is_done)
    }
}

/// Channel lifecycle state with the data specific to it
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum ChannelState {
    #[display("WAIT_FOR_INIT")]
    WaitForInit,

    #[display("WAIT_FOR_OPEN_CHANNEL")]
    WaitForOpenChannel(InitFundee),

    #[display("WAIT_FOR_ACCEPT_CHANNEL")]
    WaitForAcceptChannel(WaitForAcceptChannel),

    #[display("WAIT_FOR_FUNDING_INTERNAL")]
    WaitForFundingInternal(WaitForFundingInternal),

    #[display("WAIT_FOR_FUNDING_CREATED")]
    WaitForFundingCreated(WaitForFundingCreated),

    #[display("WAIT_FOR_FUNDING_SIGNED")]
    WaitForFundingSigned(WaitForFundingSigned),

    #[display("WAIT_FOR_FUNDING_CONFIRMED")]
    WaitForFundingConfirmed(WaitForFundingConfirmed),

    #[display("WAIT_FOR_FUNDING_LOCKED")]
    WaitForFundingLocked(WaitForFundingLocked),

    #[display("NORMAL")]
    Normal(Commitments),

    #[display("SHUTDOWN")]
    ShuttingDown(ShuttingDown),

    #[display("NEGOTIATING")]
    Negotiating(Negotiating),

    #[display("CLOSING")]
    Closing(Closing),

    #[display("CLOSED")]
    Closed(Closing),

    /// Peer connection is lost; wraps the state to return to
    #[display("OFFLINE({0})")]
    Offline(Box<ChannelState>),

    /// Waiting for the peer `channel_reestablish`
    #[display("SYNCING({0})")]
    Syncing(Box<ChannelState>),

    #[display("ABORTED")]
    Aborted,

    /// The peer proved it has a newer state than ours; publishing our
    /// commitment would be penalized
    #[display("ERR_INFORMATION_LEAK")]
    ErrorInformationLeak(Commitments),
}

impl Default for ChannelState {
    fn default() -> Self { ChannelState::WaitForInit }
}

impl ChannelState {
    pub fn commitments(&self) -> Option<&Commitments> {
        match self {
            ChannelState::WaitForFundingConfirmed(data) => Some(&data.commitments),
            ChannelState::WaitForFundingLocked(data) => Some(&data.commitments),
            ChannelState::Normal(commitments) => Some(commitments),
            ChannelState::ShuttingDown(data) => Some(&data.commitments),
            ChannelState::Negotiating(data) => Some(&data.commitments),
            ChannelState::Closing(data) | ChannelState::Closed(data) => Some(&data.commitments),
            ChannelState::ErrorInformationLeak(commitments) => Some(commitments),
            ChannelState::Offline(state) | ChannelState::Syncing(state) => state.commitments(),
            ChannelState::WaitForInit
            | ChannelState::WaitForOpenChannel(_)
            | ChannelState::WaitForAcceptChannel(_)
            | ChannelState::WaitForFundingInternal(_)
            | ChannelState::WaitForFundingCreated(_)
            | ChannelState::WaitForFundingSigned(_)
            | ChannelState::Aborted => None,
        }
    }

    /// Final channel id once the funding outpoint is known, temporary id
    /// before that
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            ChannelState::WaitForOpenChannel(init) => Some(init.temporary_channel_id),
            ChannelState::WaitForAcceptChannel(data) => {
                Some(data.init_funder.temporary_channel_id)
            }
            ChannelState::WaitForFundingInternal(data) => Some(data.temporary_channel_id),
            ChannelState::WaitForFundingCreated(data) => Some(data.temporary_channel_id),
            ChannelState::WaitForFundingSigned(data) => Some(data.channel_id),
            state => state.commitments().map(|commitments| commitments.channel_id),
        }
    }

    /// Whether the funding transaction was signed by both parties, i.e. the
    /// channel has something to protect on-chain
    #[inline]
    pub fn is_funded(&self) -> bool { self.commitments().is_some() }

    /// State unwrapped from [`ChannelState::Offline`] or
    /// [`ChannelState::Syncing`]
    pub fn inner(&self) -> &ChannelState {
        match self {
            ChannelState::Offline(state) | ChannelState::Syncing(state) => state.inner(),
            state => state,
        }
    }
}

/// Lightning channel: its immutable parameters, the blockchain data it
/// depends on and the current state
#[derive(Clone, PartialEq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{state}")]
pub struct Channel {
    pub static_params: StaticParams,
    pub current_tip: u32,
    pub current_feerates: OnChainFeerates,
    pub state: ChannelState,
}

impl Channel {
    pub fn new(
        static_params: StaticParams,
        current_tip: u32,
        current_feerates: OnChainFeerates,
    ) -> Channel {
        Channel { static_params, current_tip, current_feerates, state: ChannelState::WaitForInit }
    }

    #[inline]
    pub fn channel_id(&self) -> Option<ChannelId> { self.state.channel_id() }

    #[inline]
    pub fn commitments(&self) -> Option<&Commitments> { self.state.commitments() }

    /// Same channel moved to a new state
    #[inline]
    pub(crate) fn with_state(&self, state: ChannelState) -> Channel {
        Channel { state, ..self.clone() }
    }
}
