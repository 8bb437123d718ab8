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

//! Channel state transitions. Every state has its own handler module; the
//! functions here dispatch events to them and implement the transitions
//! shared by several states (force close, aborting, funding spend detection).

mod funding;
mod negotiating;
mod normal;
mod offline;
mod resolver;

use super::actions::ChannelAction;
use super::closing::{claim_current_local_commit_outputs, LocalCommitPublished, PublishedCommit};
use super::commands::Command;
use super::commitments::Commitments;
use super::error::ChannelError;
use super::events::{ChannelEvent, Watch, WatchEvent, WatchTag};
use super::messages::{self, ChannelId};
use super::state::{Channel, ChannelState, Closing};
use crate::automata::StateMachine;
use crate::LogStyle;

/// Message sent to the peer when the user force-closes the channel
const FORCED_CLOSE: &str = "forced local commitment";

/// New channel state with the effects requested by the transition
pub(crate) type Transition = (ChannelState, Vec<ChannelAction>);

impl StateMachine for Channel {
    type Event = ChannelEvent;
    type Action = ChannelAction;

    #[inline]
    fn process(&self, event: ChannelEvent) -> (Channel, Vec<ChannelAction>) {
        Channel::process(self, event)
    }
}

impl Channel {
    /// Processes a single event. The channel itself is never modified: the
    /// updated channel is returned together with the effects the caller has
    /// to execute.
    pub fn process(&self, event: ChannelEvent) -> (Channel, Vec<ChannelAction>) {
        let channel_id = self.channel_id().unwrap_or_default();
        debug!("Channel {} received {} event in {} state", channel_id, event, self.state);

        let mut channel = self.clone();
        match &event {
            ChannelEvent::NewBlock(height) => channel.current_tip = *height,
            ChannelEvent::SetOnChainFeerates(feerates) => channel.current_feerates = *feerates,
            _ => {}
        }

        let (state, actions) = channel.transition(event);
        if state.to_string() != self.state.to_string() {
            info!(
                "Channel {} switched to {} state",
                state.channel_id().unwrap_or(channel_id).promoter(),
                state.promo()
            );
        }
        for action in &actions {
            trace!("Channel {} requests {}", channel_id, action);
        }
        channel.state = state;
        (channel, actions)
    }

    fn transition(&self, event: ChannelEvent) -> Transition {
        match &self.state {
            ChannelState::WaitForInit
            | ChannelState::WaitForOpenChannel(_)
            | ChannelState::WaitForAcceptChannel(_)
            | ChannelState::WaitForFundingInternal(_)
            | ChannelState::WaitForFundingCreated(_)
            | ChannelState::WaitForFundingSigned(_) => funding::process_opening(self, event),
            ChannelState::WaitForFundingConfirmed(_) | ChannelState::WaitForFundingLocked(_) => {
                funding::process_funded(self, event)
            }
            ChannelState::Normal(_) | ChannelState::ShuttingDown(_) => normal::process(self, event),
            ChannelState::Negotiating(_) => negotiating::process(self, event),
            ChannelState::Closing(_) => resolver::process(self, event),
            ChannelState::Offline(_) | ChannelState::Syncing(_) => offline::process(self, event),
            ChannelState::Closed(_)
            | ChannelState::Aborted
            | ChannelState::ErrorInformationLeak(_) => self.process_terminal(event),
        }
    }

    fn process_terminal(&self, event: ChannelEvent) -> Transition {
        match event {
            ChannelEvent::ExecuteCommand(cmd) => {
                let err = ChannelError::ChannelUnavailable(self.id());
                self.reject(cmd, err)
            }
            ChannelEvent::WatchReceived(WatchEvent::Spent {
                tag: WatchTag::FundingSpent,
                tx,
            }) if matches!(self.state, ChannelState::ErrorInformationLeak(_)) => {
                resolver::funding_spent(self, tx)
            }
            event => self.ignore(event),
        }
    }

    /// Channel id for error reporting
    #[inline]
    pub(crate) fn id(&self) -> ChannelId { self.channel_id().unwrap_or_default() }

    #[inline]
    pub(crate) fn unchanged(&self) -> Transition { (self.state.clone(), vec![]) }

    /// Command which can't be executed: the state is kept as is
    pub(crate) fn reject(&self, command: Command, error: ChannelError) -> Transition {
        warn!("Channel {} can't execute {}: {}", self.id(), command, error.err_details());
        (self.state.clone(), vec![ChannelAction::not_executed(command, error)])
    }

    pub(crate) fn ignore(&self, event: ChannelEvent) -> Transition {
        warn!("Channel {} ignores unexpected {} event in {} state", self.id(), event, self.state);
        self.unchanged()
    }

    /// Ends the channel before it was funded
    pub(crate) fn abort(&self, error: Option<ChannelError>) -> Transition {
        let mut actions = vec![];
        if let Some(err) = error {
            error!("{} {}: {}", "Aborting channel".err(), self.id(), err.err_details());
            actions.push(ChannelAction::send(messages::Error::with(self.id(), err)));
        } else {
            info!("Channel {} is aborted", self.id());
        }
        (ChannelState::Aborted, actions)
    }

    /// Closing data to extend: either the existing one or a new one for the
    /// current commitments
    pub(crate) fn closing_data(&self) -> Option<Closing> {
        let inner = self.state.inner();
        match inner {
            ChannelState::Closing(closing) => Some(closing.clone()),
            ChannelState::WaitForFundingConfirmed(data) => {
                let mut closing = Closing::with(data.commitments.clone(), self.current_tip);
                closing.funding_tx = data.funding_tx.clone();
                Some(closing)
            }
            ChannelState::Negotiating(data) => {
                let mut closing = Closing::with(data.commitments.clone(), self.current_tip);
                closing.mutual_close_proposed = data
                    .closing_txs_proposed
                    .iter()
                    .map(|proposed| proposed.unsigned_tx.tx.clone())
                    .collect();
                Some(closing)
            }
            state => {
                state.commitments().map(|c| Closing::with(c.clone(), self.current_tip))
            }
        }
    }

    /// Publishes our commitment and moves to the closing state. `send_error`
    /// is false when the peer is unreachable or it already failed the channel.
    pub(crate) fn force_close(&self, error: Option<ChannelError>, send_error: bool) -> Transition {
        let mut closing = match self.closing_data() {
            Some(closing) => closing,
            None => return self.abort(error.filter(|_| send_error)),
        };
        let channel_id = closing.commitments.channel_id;
        match &error {
            Some(err) => error!(
                "{} {} due to {}",
                "Force-closing channel".err(),
                channel_id,
                err.err_details()
            ),
            None => info!("{} {}", "Force-closing channel".promo(), channel_id),
        }

        let mut actions = vec![];
        if let (Some(err), true) = (&error, send_error) {
            actions.push(ChannelAction::send(messages::Error::with(channel_id, err)));
        }
        if closing.local_commit_published.is_some() {
            debug!("Local commitment of channel {} is already published", channel_id);
            return (ChannelState::Closing(closing), actions);
        }
        let local_commit_published =
            match claim_current_local_commit_outputs(&closing.commitments, &self.current_feerates) {
                Ok(published) => published,
                Err(err) => {
                    error!(
                        "{} {}; publishing the bare commitment",
                        "Unable to claim local commitment outputs:".err(),
                        err.err_details()
                    );
                    LocalCommitPublished::unclaimed(closing.commitments.signed_local_commit_tx())
                }
            };
        trace!("Local commitment: {:#?}", local_commit_published.commit_tx);
        actions.extend(
            local_commit_published.publish_actions(self.static_params.config.min_depth_blocks),
        );
        closing.local_commit_published = Some(local_commit_published);
        let state = ChannelState::Closing(closing);
        actions.push(ChannelAction::store_state(&state));
        (state, actions)
    }

    /// Force close requested by the user. The peer is notified unless it is
    /// disconnected.
    pub(crate) fn local_force_close(&self) -> Transition {
        let offline = matches!(self.state, ChannelState::Offline(_) | ChannelState::Syncing(_));
        let (state, mut actions) = self.force_close(None, false);
        if !offline && state.is_funded() {
            actions.insert(0, ChannelAction::send(messages::Error::with(self.id(), FORCED_CLOSE)));
        }
        (state, actions)
    }

    /// Protocol violation by the peer: the channel is failed sending `error`
    pub(crate) fn fail(&self, error: ChannelError) -> Transition {
        if self.state.inner().is_funded() {
            self.force_close(Some(error), true)
        } else {
            self.abort(Some(error))
        }
    }

    /// Peer failed the channel
    pub(crate) fn remote_error(&self, error: messages::Error) -> Transition {
        let err = ChannelError::RemoteError(self.id(), error.message);
        if self.state.inner().is_funded() {
            self.force_close(Some(err), false)
        } else {
            self.abort(None)
        }
    }

    /// Force-closes if some offered HTLC has expired
    pub(crate) fn check_htlc_timeout(&self) -> Transition {
        let timed_out = self
            .state
            .commitments()
            .map(|c| c.has_timed_out_outgoing_htlcs(self.current_tip))
            .unwrap_or_default();
        if !timed_out {
            return self.unchanged();
        }
        let offline = matches!(self.state, ChannelState::Offline(_) | ChannelState::Syncing(_));
        self.force_close(Some(ChannelError::HtlcsTimedOut(self.id())), !offline)
    }
}

/// Requests to watch the funding output and its depth
pub(crate) fn funding_watches(
    commitments: &Commitments,
    min_depth: u32,
) -> Vec<ChannelAction> {
    let outpoint = commitments.commit_input.outpoint;
    vec![
        ChannelAction::watch(Watch::Spent { outpoint, tag: WatchTag::FundingSpent }),
        ChannelAction::watch(Watch::Confirmed {
            txid: outpoint.txid,
            min_depth,
            tag: WatchTag::FundingDepthOk,
        }),
    ]
}

/// Appends `StoreState` for the new state
#[inline]
pub(crate) fn stored(state: ChannelState, mut actions: Vec<ChannelAction>) -> Transition {
    actions.push(ChannelAction::store_state(&state));
    (state, actions)
}
