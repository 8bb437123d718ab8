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

//! Peer disconnection and channel re-establishment

use super::{funding, normal, resolver, stored, Transition};
use crate::channel::actions::{ChannelAction, CmdResult, HtlcFailure};
use crate::channel::commands::Command;
use crate::channel::commitments::{Commitments, RemoteNextCommitInfo};
use crate::channel::error::ChannelError;
use crate::channel::events::{ChannelEvent, WatchEvent, WatchTag};
use crate::channel::messages::{self, ChannelReestablish, FundingLocked, Messages};
use crate::channel::state::{Channel, ChannelState};
use crate::LogStyle;

/// Moves a funded channel offline. Changes which were not signed are lost
/// together with the connection; issuers of the dropped outgoing HTLCs are
/// notified.
pub(super) fn go_offline(channel: &Channel) -> Transition {
    let state = &channel.state;
    info!("Channel {} peer is {}", channel.id(), "disconnected".err());
    let commitments = match state {
        ChannelState::Normal(commitments) => commitments,
        ChannelState::ShuttingDown(data) => &data.commitments,
        _ => return (ChannelState::Offline(Box::new(state.clone())), vec![]),
    };
    let (commitments, dropped) = commitments.discard_unsigned_changes();
    let actions = dropped
        .into_iter()
        .map(|htlc| {
            debug!("Failing unsigned HTLC #{} back to its issuer", htlc.id);
            ChannelAction::from(CmdResult::AddSettledFail {
                htlc,
                failure: HtlcFailure::Disconnected,
            })
        })
        .collect::<Vec<_>>();
    let inner = normal::with_commitments(state, commitments);
    (ChannelState::Offline(Box::new(inner)), actions)
}

pub(super) fn process(channel: &Channel, event: ChannelEvent) -> Transition {
    let (inner, syncing) = match &channel.state {
        ChannelState::Offline(inner) => (inner.as_ref(), false),
        ChannelState::Syncing(inner) => (inner.as_ref(), true),
        _ => return channel.ignore(event),
    };
    let commitments = match inner.commitments() {
        Some(commitments) => commitments,
        None => return channel.ignore(event),
    };
    match event {
        ChannelEvent::Connected if !syncing => reconnect(channel, inner, commitments),
        ChannelEvent::MessageReceived(Messages::ChannelReestablish(msg)) if syncing => {
            reestablish(channel, inner, commitments, msg)
        }
        ChannelEvent::MessageReceived(Messages::Error(err)) if syncing => {
            channel.remote_error(err)
        }
        ChannelEvent::Disconnected if syncing => {
            (ChannelState::Offline(Box::new(inner.clone())), vec![])
        }
        ChannelEvent::ExecuteCommand(Command::ForceClose) => channel.local_force_close(),
        ChannelEvent::ExecuteCommand(Command::Sign) => {
            debug!("Channel {} is offline; signing is postponed", commitments.channel_id);
            channel.unchanged()
        }
        ChannelEvent::ExecuteCommand(cmd) => {
            channel.reject(cmd, ChannelError::ChannelUnavailable(commitments.channel_id))
        }
        ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::FundingSpent, tx }) => {
            resolver::funding_spent(channel, tx)
        }
        event @ ChannelEvent::WatchReceived(WatchEvent::Confirmed {
            tag: WatchTag::FundingDepthOk,
            ..
        }) => funding_depth_ok(channel, inner, syncing, event),
        ChannelEvent::NewBlock(_) | ChannelEvent::CheckHtlcTimeout => channel.check_htlc_timeout(),
        ChannelEvent::SetOnChainFeerates(_) | ChannelEvent::Disconnected => channel.unchanged(),
        event => channel.ignore(event),
    }
}

/// Funding depth reached while the peer is away: `funding_locked` will be
/// sent on re-establishment
fn funding_depth_ok(
    channel: &Channel,
    inner: &ChannelState,
    syncing: bool,
    event: ChannelEvent,
) -> Transition {
    if !matches!(inner, ChannelState::WaitForFundingConfirmed(_)) {
        return channel.unchanged();
    }
    let (inner, actions) = funding::process_funded(&channel.with_state(inner.clone()), event);
    let actions =
        actions.into_iter().filter(|action| action.message().is_none()).collect::<Vec<_>>();
    let inner = Box::new(inner);
    let state = if syncing { ChannelState::Syncing(inner) } else { ChannelState::Offline(inner) };
    (state, actions)
}

fn reconnect(channel: &Channel, inner: &ChannelState, commitments: &Commitments) -> Transition {
    let keys = &commitments.local_params.keys;
    let my_current_per_commitment_point =
        match keys.per_commitment_point(commitments.local_commit.index) {
            Ok(point) => point,
            Err(err) => {
                error!("{} {}", "Unable to derive commitment point:".err(), err.err_details());
                return channel.unchanged();
            }
        };
    let remote_index = commitments.remote_commit.index;
    let your_last_per_commitment_secret = remote_index
        .checked_sub(1)
        .and_then(|index| commitments.remote_per_commitment_secrets.secret_for_commitment(index))
        .unwrap_or([0u8; 32]);
    let reestablish = ChannelReestablish {
        channel_id: commitments.channel_id,
        next_commitment_number: commitments.local_commit.index + 1,
        next_revocation_number: remote_index,
        your_last_per_commitment_secret,
        my_current_per_commitment_point,
    };
    info!("Channel {} peer is {}; synchronizing", commitments.channel_id, "connected".promo());
    (ChannelState::Syncing(Box::new(inner.clone())), vec![ChannelAction::send(reestablish)])
}

/// Retransmits whatever the peer has missed and returns to the state which
/// preceded the disconnection
fn reestablish(
    channel: &Channel,
    inner: &ChannelState,
    commitments: &Commitments,
    msg: ChannelReestablish,
) -> Transition {
    let channel_id = commitments.channel_id;
    let local_index = commitments.local_commit.index;
    if msg.next_revocation_number > local_index {
        error!(
            "{} {} knows revocation #{} while our commitment is #{}",
            "Peer of channel".err(),
            channel_id,
            msg.next_revocation_number,
            local_index
        );
        let error = messages::Error::with(channel_id, "peer has a newer commitment than ours");
        return stored(
            ChannelState::ErrorInformationLeak(commitments.clone()),
            vec![ChannelAction::send(error)],
        );
    }

    let mut actions = vec![];
    match inner {
        ChannelState::WaitForFundingLocked(data) => {
            actions.push(ChannelAction::send(data.last_sent.clone()))
        }
        ChannelState::Normal(_) if local_index == 0 && msg.next_commitment_number == 1 => {
            match commitments.local_params.keys.per_commitment_point(1) {
                Ok(next_per_commitment_point) => {
                    let funding_locked = FundingLocked { channel_id, next_per_commitment_point };
                    actions.push(ChannelAction::send(funding_locked))
                }
                Err(err) => error!("{} {}", "Unable to derive commitment point:".err(), err),
            }
        }
        _ => {}
    }

    let revocation = if local_index == msg.next_revocation_number + 1 {
        match commitments.last_revocation() {
            Ok(revocation) => Some(ChannelAction::send(revocation)),
            Err(err) => return channel.fail(err),
        }
    } else {
        None
    };

    let mut commit_first = false;
    let mut commit = vec![];
    if let RemoteNextCommitInfo::WaitingForRevocation(waiting) =
        &commitments.remote_next_commit_info
    {
        if waiting.next_remote_commit.index == msg.next_commitment_number {
            debug!("Channel {} peer missed our commitment signature; resending it", channel_id);
            commit.extend(
                commitments.local_changes.signed.iter().cloned().map(|change| {
                    ChannelAction::SendMessage(Messages::from(change))
                }),
            );
            commit.push(ChannelAction::send(waiting.sent.clone()));
            commit_first = waiting.sent_after_local_commit_index < local_index;
        }
    }
    if commit_first {
        actions.extend(commit);
        actions.extend(revocation);
    } else {
        actions.extend(revocation);
        actions.extend(commit);
    }

    match inner {
        ChannelState::ShuttingDown(data) if data.local_shutdown_sent => {
            actions.push(ChannelAction::send(data.local_shutdown.clone()))
        }
        ChannelState::Negotiating(data) => {
            actions.push(ChannelAction::send(data.local_shutdown.clone()));
            if let Some(proposed) = data.closing_txs_proposed.last() {
                actions.push(ChannelAction::send(proposed.local_closing_signed.clone()));
            }
        }
        _ => {}
    }

    let state = match inner {
        ChannelState::Normal(_) | ChannelState::ShuttingDown(_)
            if commitments.local_has_changes() =>
        {
            match normal::sign(commitments.clone(), &mut actions) {
                Ok(next) => normal::with_commitments(inner, next),
                Err(err) => return channel.fail(err),
            }
        }
        _ => inner.clone(),
    };
    let state = normal::release_shutdown(state, &mut actions);
    info!("Channel {} is {}", channel_id.promoter(), "synchronized".ended());
    stored(state, actions)
}
