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

use bitcoin::Transaction;

use super::{offline, resolver, stored, Transition};
use crate::channel::actions::ChannelAction;
use crate::channel::closing::{
    check_closing_signature, closing_fee_bounds, first_closing_fee, make_closing_tx,
    next_closing_fee, ClosingTxProposed,
};
use crate::channel::commands::Command;
use crate::channel::error::ChannelError;
use crate::channel::events::{ChannelEvent, Watch, WatchEvent, WatchTag};
use crate::channel::messages::{ClosingSigned, Messages};
use crate::channel::state::{Channel, ChannelState, Closing, Negotiating};
use crate::LogStyle;

pub(super) fn process(channel: &Channel, event: ChannelEvent) -> Transition {
    let data = match &channel.state {
        ChannelState::Negotiating(data) => data,
        _ => return channel.ignore(event),
    };
    match event {
        ChannelEvent::MessageReceived(Messages::ClosingSigned(msg)) => {
            closing_signed(channel, data, msg)
        }
        ChannelEvent::MessageReceived(Messages::Error(err)) => match &data.best_unpublished_closing_tx
        {
            Some(tx) => {
                warn!("Peer failed the channel during negotiation: {}", err.message);
                mutual_close(channel, data, tx.clone(), vec![])
            }
            None => channel.remote_error(err),
        },
        ChannelEvent::ExecuteCommand(Command::ForceClose) => channel.local_force_close(),
        ChannelEvent::ExecuteCommand(cmd @ Command::Close(_)) => {
            channel.reject(cmd, ChannelError::ClosingAlreadyInProgress(data.commitments.channel_id))
        }
        ChannelEvent::ExecuteCommand(cmd) => {
            channel.reject(cmd, ChannelError::ChannelUnavailable(data.commitments.channel_id))
        }
        ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::FundingSpent, tx }) => {
            resolver::funding_spent(channel, tx)
        }
        ChannelEvent::Disconnected => offline::go_offline(channel),
        ChannelEvent::NewBlock(_)
        | ChannelEvent::CheckHtlcTimeout
        | ChannelEvent::SetOnChainFeerates(_) => channel.unchanged(),
        event => channel.ignore(event),
    }
}

fn closing_signed(channel: &Channel, data: &Negotiating, remote: ClosingSigned) -> Transition {
    let commitments = &data.commitments;
    let channel_id = commitments.channel_id;
    let local_script = &data.local_shutdown.script_pubkey;
    let remote_script = &data.remote_shutdown.script_pubkey;
    let (signed_tx, local_closing_signed) =
        match check_closing_signature(commitments, local_script, remote_script, &remote) {
            Ok(checked) => checked,
            Err(err) => return channel.fail(err),
        };
    let remote_fee = remote.fee_satoshis;
    debug!("Channel {} peer proposes closing fee of {} sat", channel_id, remote_fee);

    let last_local_fee =
        data.closing_txs_proposed.last().map(|proposed| proposed.local_closing_signed.fee_satoshis);
    if last_local_fee == Some(remote_fee) {
        return mutual_close(channel, data, signed_tx, vec![]);
    }

    let config = &channel.static_params.config;
    let accept = vec![ChannelAction::send(local_closing_signed)];
    if data.closing_txs_proposed.len() >= config.max_closing_negotiation_rounds as usize {
        let (min_fee, max_fee) = closing_fee_bounds(config, &channel.current_feerates);
        return if (min_fee..=max_fee).contains(&remote_fee) {
            debug!("Negotiation rounds are exhausted; accepting fee of {} sat", remote_fee);
            mutual_close(channel, data, signed_tx, accept)
        } else {
            channel.fail(ChannelError::InvalidCloseFee(channel_id, remote_fee))
        };
    }

    let local_fee = last_local_fee.unwrap_or_else(|| first_closing_fee(&channel.current_feerates));
    let next_fee = next_closing_fee(local_fee, remote_fee);
    if local_fee == remote_fee || next_fee == remote_fee {
        return mutual_close(channel, data, signed_tx, accept);
    }

    let (unsigned_tx, local_closing_signed) =
        make_closing_tx(commitments, local_script, remote_script, next_fee);
    debug!("Proposing closing fee of {} sat", next_fee);
    let mut next = data.clone();
    next.closing_txs_proposed
        .push(ClosingTxProposed { unsigned_tx, local_closing_signed: local_closing_signed.clone() });
    next.best_unpublished_closing_tx = Some(signed_tx);
    stored(ChannelState::Negotiating(next), vec![ChannelAction::send(local_closing_signed)])
}

/// Publishes the closing transaction signed by both parties
fn mutual_close(
    channel: &Channel,
    data: &Negotiating,
    closing_tx: Transaction,
    mut actions: Vec<ChannelAction>,
) -> Transition {
    let txid = closing_tx.txid();
    info!(
        "{} {} with transaction {}",
        "Mutually closing channel".ended(),
        data.commitments.channel_id.ender(),
        txid
    );
    trace!("Closing transaction: {:#?}", closing_tx);

    let mut closing = Closing::with(data.commitments.clone(), channel.current_tip);
    closing.mutual_close_proposed =
        data.closing_txs_proposed.iter().map(|proposed| proposed.unsigned_tx.tx.clone()).collect();
    closing.mutual_close_published = vec![closing_tx.clone()];
    actions.push(ChannelAction::publish(closing_tx));
    actions.push(ChannelAction::watch(Watch::Confirmed {
        txid,
        min_depth: channel.static_params.config.min_depth_blocks,
        tag: WatchTag::TxConfirmed,
    }));
    stored(ChannelState::Closing(closing), actions)
}
