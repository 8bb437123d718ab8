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

//! Operational channel: HTLC updates, cross-signing and the shutdown
//! exchange. `SHUTDOWN` state behaves as `NORMAL` except that no new HTLCs
//! may be added.

use super::{offline, resolver, stored, Transition};
use crate::channel::actions::{ChannelAction, StorageAction};
use crate::channel::closing::{first_closing_fee, make_closing_tx, ClosingTxProposed};
use crate::channel::commands::Command;
use crate::channel::commitments::Commitments;
use crate::channel::error::ChannelError;
use crate::channel::events::{ChannelEvent, WatchEvent, WatchTag};
use crate::channel::messages::{Messages, Shutdown};
use crate::channel::state::{
    Channel, ChannelState, Negotiating, ShuttingDown, WaitForFundingLocked,
};
use crate::LogStyle;

pub(super) fn process(channel: &Channel, event: ChannelEvent) -> Transition {
    let commitments = match channel.state.commitments() {
        Some(commitments) => commitments,
        None => return channel.ignore(event),
    };
    match event {
        ChannelEvent::ExecuteCommand(cmd) => process_command(channel, commitments, cmd),
        ChannelEvent::MessageReceived(msg) => process_message(channel, commitments, msg),
        ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::FundingSpent, tx }) => {
            resolver::funding_spent(channel, tx)
        }
        ChannelEvent::NewBlock(_) | ChannelEvent::CheckHtlcTimeout => channel.check_htlc_timeout(),
        ChannelEvent::Disconnected => offline::go_offline(channel),
        ChannelEvent::SetOnChainFeerates(_)
        | ChannelEvent::WatchReceived(WatchEvent::Confirmed {
            tag: WatchTag::FundingDepthOk, ..
        }) => channel.unchanged(),
        event => channel.ignore(event),
    }
}

/// Same state with updated commitments
pub(super) fn with_commitments(state: &ChannelState, commitments: Commitments) -> ChannelState {
    match state {
        ChannelState::ShuttingDown(data) => {
            ChannelState::ShuttingDown(ShuttingDown { commitments, ..data.clone() })
        }
        ChannelState::Negotiating(data) => {
            ChannelState::Negotiating(Negotiating { commitments, ..data.clone() })
        }
        ChannelState::WaitForFundingLocked(data) => {
            ChannelState::WaitForFundingLocked(WaitForFundingLocked { commitments, ..data.clone() })
        }
        _ => ChannelState::Normal(commitments),
    }
}

/// Signs pending changes, if there are any and the peer has revoked our
/// previous signature
pub(super) fn sign(
    commitments: Commitments,
    actions: &mut Vec<ChannelAction>,
) -> Result<Commitments, ChannelError> {
    match commitments.send_commit()? {
        None => Ok(commitments),
        Some((next, commit_sig, htlc_infos)) => {
            debug!(
                "Channel {} signs remote commitment #{} with {} HTLCs",
                next.channel_id,
                next.latest_remote_commit().index,
                htlc_infos.len()
            );
            actions.push(ChannelAction::send(commit_sig));
            actions.push(
                StorageAction::StoreHtlcInfos {
                    channel_id: next.channel_id,
                    commitment_number: next.latest_remote_commit().index,
                    htlc_infos,
                }
                .into(),
            );
            Ok(next)
        }
    }
}

fn process_command(channel: &Channel, commitments: &Commitments, cmd: Command) -> Transition {
    let config = &channel.static_params.config;
    let is_normal = matches!(channel.state, ChannelState::Normal(_));
    let result = match &cmd {
        Command::AddHtlc(add) if is_normal => commitments
            .send_add(add, channel.current_tip, config)
            .map(|(next, msg)| (next, Messages::from(msg))),
        Command::AddHtlc(_) => Err(ChannelError::ChannelUnavailable(commitments.channel_id)),
        Command::FulfillHtlc(fulfill) => {
            commitments.send_fulfill(fulfill).map(|(next, msg)| (next, Messages::from(msg)))
        }
        Command::FailHtlc(fail) => {
            commitments.send_fail(fail).map(|(next, msg)| (next, Messages::from(msg)))
        }
        Command::FailMalformedHtlc(fail) => {
            commitments.send_fail_malformed(fail).map(|(next, msg)| (next, Messages::from(msg)))
        }
        Command::UpdateFee(fee) => {
            commitments.send_fee(fee, config).map(|(next, msg)| (next, Messages::from(msg)))
        }
        Command::Sign => {
            let mut actions = vec![];
            return match sign(commitments.clone(), &mut actions) {
                Ok(_) if actions.is_empty() => {
                    debug!("Channel {} has nothing to sign", commitments.channel_id);
                    channel.unchanged()
                }
                Ok(next) => stored(with_commitments(&channel.state, next), actions),
                Err(err) => channel.reject(cmd, err),
            };
        }
        Command::Close(script) => return close(channel, commitments, cmd.clone(), script.clone()),
        Command::ForceClose => return channel.local_force_close(),
    };
    match result {
        Ok((next, msg)) => {
            debug!("Channel {} executed {}", commitments.channel_id, cmd);
            (with_commitments(&channel.state, next), vec![ChannelAction::SendMessage(msg)])
        }
        Err(err) => channel.reject(cmd, err),
    }
}

fn close(
    channel: &Channel,
    commitments: &Commitments,
    cmd: Command,
    script: Option<bitcoin::Script>,
) -> Transition {
    let channel_id = commitments.channel_id;
    if !matches!(channel.state, ChannelState::Normal(_)) {
        return channel.reject(cmd, ChannelError::ClosingAlreadyInProgress(channel_id));
    }
    if commitments.local_has_unsigned_outgoing_htlcs() {
        return channel.reject(cmd, ChannelError::CannotCloseWithUnsignedOutgoingHtlcs(channel_id));
    }
    let script_pubkey =
        script.unwrap_or_else(|| commitments.local_params.default_final_script_pubkey.clone());
    let local_shutdown = Shutdown { channel_id, script_pubkey };
    info!("{} {}", "Closing channel".promo(), channel_id.promoter());
    let actions = vec![ChannelAction::send(local_shutdown.clone())];
    let state = ChannelState::ShuttingDown(ShuttingDown {
        commitments: commitments.clone(),
        local_shutdown,
        remote_shutdown: None,
        local_shutdown_sent: true,
    });
    stored(state, actions)
}

fn process_message(channel: &Channel, commitments: &Commitments, msg: Messages) -> Transition {
    let config = &channel.static_params.config;
    let is_normal = matches!(channel.state, ChannelState::Normal(_));
    let result = match &msg {
        Messages::UpdateAddHtlc(add) if is_normal => {
            commitments.receive_add(add, channel.current_tip, config)
        }
        Messages::UpdateFulfillHtlc(fulfill) => commitments.receive_fulfill(fulfill),
        Messages::UpdateFailHtlc(fail) => commitments.receive_fail(fail),
        Messages::UpdateFailMalformedHtlc(fail) => commitments.receive_fail_malformed(fail),
        Messages::UpdateFee(fee) => commitments.receive_fee(fee, config),
        Messages::CommitSig(commit_sig) => {
            return match commitments.receive_commit(commit_sig) {
                Ok((next, revocation)) => {
                    let actions = vec![ChannelAction::send(revocation)];
                    sign_and_proceed(channel, next, actions)
                }
                Err(err) => channel.fail(err),
            };
        }
        Messages::RevokeAndAck(revocation) => {
            return match commitments.receive_revocation(revocation) {
                Ok((next, actions)) => sign_and_proceed(channel, next, actions),
                Err(err) => channel.fail(err),
            };
        }
        Messages::Shutdown(shutdown) => return remote_shutdown(channel, commitments, shutdown),
        Messages::Error(err) => return channel.remote_error(err.clone()),
        Messages::FundingLocked(_) => {
            debug!("Channel {} ignores repeated {}", commitments.channel_id, msg);
            return channel.unchanged();
        }
        _ => return channel.ignore(ChannelEvent::MessageReceived(msg)),
    };
    match result {
        Ok(next) => (with_commitments(&channel.state, next), vec![]),
        Err(err) => channel.fail(err),
    }
}

/// Completes a cross-signing step: signs what is left to sign, persists the
/// commitments and starts the fee negotiation if the shutdown is complete
fn sign_and_proceed(
    channel: &Channel,
    commitments: Commitments,
    mut actions: Vec<ChannelAction>,
) -> Transition {
    let signed = if commitments.local_has_changes() {
        sign(commitments.clone(), &mut actions)
    } else {
        Ok(commitments.clone())
    };
    proceed_signed(channel, commitments, signed, actions)
}

/// Channel which can't sign its pending changes is failed with the latest
/// commitments it holds
fn proceed_signed(
    channel: &Channel,
    commitments: Commitments,
    signed: Result<Commitments, ChannelError>,
    actions: Vec<ChannelAction>,
) -> Transition {
    match signed {
        Ok(next) => maybe_negotiate(channel, with_commitments(&channel.state, next), actions),
        Err(err) => {
            error!("{} {}", "Unable to sign pending changes:".err(), err.err_details());
            channel.with_state(with_commitments(&channel.state, commitments)).fail(err)
        }
    }
}

fn remote_shutdown(channel: &Channel, commitments: &Commitments, shutdown: &Shutdown) -> Transition {
    let channel_id = commitments.channel_id;
    match &channel.state {
        ChannelState::Normal(_) => {
            if commitments.remote_has_unsigned_outgoing_htlcs() {
                return channel.fail(ChannelError::CannotCloseWithUnsignedOutgoingHtlcs(channel_id));
            }
            info!("{} {}", "Peer closes channel".promo(), channel_id.promoter());
            let mut actions = vec![];
            // changes proposed before the shutdown still have to be signed
            let commitments = match sign(commitments.clone(), &mut actions) {
                Ok(next) => next,
                Err(err) => return channel.fail(err),
            };
            let local_shutdown = Shutdown {
                channel_id,
                script_pubkey: commitments.local_params.default_final_script_pubkey.clone(),
            };
            let state = ChannelState::ShuttingDown(ShuttingDown {
                commitments,
                local_shutdown,
                remote_shutdown: Some(shutdown.clone()),
                local_shutdown_sent: false,
            });
            maybe_negotiate(channel, state, actions)
        }
        ChannelState::ShuttingDown(data) if data.remote_shutdown.is_none() => {
            let state = ChannelState::ShuttingDown(ShuttingDown {
                remote_shutdown: Some(shutdown.clone()),
                ..data.clone()
            });
            maybe_negotiate(channel, state, vec![])
        }
        _ => channel.ignore(ChannelEvent::MessageReceived(shutdown.clone().into())),
    }
}

/// Sends our held `shutdown` once no outgoing HTLC is left unsigned
pub(super) fn release_shutdown(
    state: ChannelState,
    actions: &mut Vec<ChannelAction>,
) -> ChannelState {
    match state {
        ChannelState::ShuttingDown(data)
            if !data.local_shutdown_sent
                && !data.commitments.local_has_unsigned_outgoing_htlcs() =>
        {
            actions.push(ChannelAction::send(data.local_shutdown.clone()));
            ChannelState::ShuttingDown(ShuttingDown { local_shutdown_sent: true, ..data })
        }
        ChannelState::ShuttingDown(data) if !data.local_shutdown_sent => {
            debug!(
                "Channel {} holds its shutdown until outgoing HTLCs are signed",
                data.commitments.channel_id
            );
            ChannelState::ShuttingDown(data)
        }
        state => state,
    }
}

/// Moves to the fee negotiation once both parties sent `shutdown` and the
/// commitments hold no HTLCs. The funder makes the first proposal.
fn maybe_negotiate(
    channel: &Channel,
    state: ChannelState,
    mut actions: Vec<ChannelAction>,
) -> Transition {
    let state = release_shutdown(state, &mut actions);
    let data = match &state {
        ChannelState::ShuttingDown(data) => data,
        _ => return stored(state, actions),
    };
    let remote_shutdown = match &data.remote_shutdown {
        Some(shutdown) => shutdown,
        None => return stored(state, actions),
    };
    let commitments = &data.commitments;
    if !commitments.has_no_pending_htlcs()
        || commitments.local_has_changes()
        || commitments.remote_has_changes()
        || commitments.is_waiting_for_revocation()
    {
        return stored(state, actions);
    }

    info!("Channel {} starts closing fee {}", commitments.channel_id, "negotiation".promo());
    let mut closing_txs_proposed = vec![];
    if commitments.is_funder() {
        let fee_sat = first_closing_fee(&channel.current_feerates);
        let (unsigned_tx, local_closing_signed) = make_closing_tx(
            commitments,
            &data.local_shutdown.script_pubkey,
            &remote_shutdown.script_pubkey,
            fee_sat,
        );
        debug!("Proposing closing fee of {} sat", fee_sat);
        actions.push(ChannelAction::send(local_closing_signed.clone()));
        closing_txs_proposed.push(ClosingTxProposed { unsigned_tx, local_closing_signed });
    }
    let state = ChannelState::Negotiating(Negotiating {
        commitments: commitments.clone(),
        local_shutdown: data.local_shutdown.clone(),
        remote_shutdown: remote_shutdown.clone(),
        closing_txs_proposed,
        best_unpublished_closing_tx: None,
    });
    stored(state, actions)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::commitments::test::commitments_pair;
    use crate::channel::params::{OnChainFeerates, StaticParams};
    use crate::Config;

    fn normal_channel(commitments: &Commitments) -> Channel {
        let static_params = StaticParams {
            config: Config::default(),
            remote_node_id: commitments.remote_params.node_id,
        };
        Channel::new(static_params, 400_000, OnChainFeerates::default())
            .with_state(ChannelState::Normal(commitments.clone()))
    }

    #[test]
    fn signing_failure_fails_channel() {
        let (alice, _) = commitments_pair();
        let channel = normal_channel(&alice);
        let err = ChannelError::Crypto(alice.channel_id, "invalid remote point".to_string());
        let (state, actions) = proceed_signed(&channel, alice.clone(), Err(err), vec![]);

        match &state {
            ChannelState::Closing(closing) => {
                let local = closing.local_commit_published.as_ref().expect("local commit");
                assert_eq!(local.commit_tx, alice.signed_local_commit_tx());
            }
            state => panic!("channel is in {}", state),
        }
        assert!(actions
            .iter()
            .any(|action| matches!(action.message(), Some(Messages::Error(_)))));
        assert!(actions
            .iter()
            .any(|action| action.published_tx() == Some(&alice.signed_local_commit_tx())));
        assert_eq!(actions.last(), Some(&ChannelAction::store_state(&state)));
    }

    #[test]
    fn signed_changes_are_stored() {
        let (alice, _) = commitments_pair();
        let channel = normal_channel(&alice);
        let (state, actions) = proceed_signed(&channel, alice.clone(), Ok(alice.clone()), vec![]);
        assert_eq!(state, ChannelState::Normal(alice));
        assert_eq!(actions, vec![ChannelAction::store_state(&state)]);
    }
}
