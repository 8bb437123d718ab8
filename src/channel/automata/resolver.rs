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

//! Resolution of the funding output spend: classification of the spending
//! transaction, claims of our outputs and penalties, and tracking of their
//! confirmations until the channel is closed.

use bitcoin::{Transaction, Txid};

use super::{normal, stored, Transition};
use crate::channel::actions::{ChannelAction, CmdResult, StorageAction};
use crate::channel::closing::{
    claim_current_local_commit_outputs, claim_local_htlc_delayed_output,
    claim_remote_commit_outputs, claim_revoked_htlc_outputs, claim_revoked_htlc_tx_output,
    claim_revoked_remote_commit_outputs, extract_preimages, LocalCommitPublished, PublishedCommit,
    RemoteCommitPublished, RevokedCommitPublished,
};
use crate::channel::commands::Command;
use crate::channel::commitments::{Commitments, RemoteNextCommitInfo};
use crate::channel::error::ChannelError;
use crate::channel::events::{ChannelEvent, Watch, WatchEvent, WatchTag};
use crate::channel::htlc::HtlcInfo;
use crate::channel::messages::{self, Messages};
use crate::channel::state::{Channel, ChannelState, Closing};
use crate::channel::transactions::{ClaimTx, SpendingTx};
use crate::LogStyle;

/// `CLOSING` state
pub(super) fn process(channel: &Channel, event: ChannelEvent) -> Transition {
    let closing = match &channel.state {
        ChannelState::Closing(closing) => closing,
        _ => return channel.ignore(event),
    };
    let channel_id = closing.commitments.channel_id;
    match event {
        ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::FundingSpent, tx }) => {
            funding_spent(channel, tx)
        }
        ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::OutputSpent, tx }) => {
            output_spent(channel, closing, tx)
        }
        ChannelEvent::WatchReceived(WatchEvent::Confirmed {
            tag: WatchTag::TxConfirmed, tx, ..
        }) => tx_confirmed(channel, closing, tx),
        ChannelEvent::GetHtlcInfosResponse { revoked_commit_txid, htlc_infos } => {
            htlc_infos_received(channel, closing, revoked_commit_txid, htlc_infos)
        }
        ChannelEvent::ExecuteCommand(Command::ForceClose)
            if closing.local_commit_published.is_none() =>
        {
            channel.force_close(None, false)
        }
        ChannelEvent::ExecuteCommand(cmd @ Command::ForceClose)
        | ChannelEvent::ExecuteCommand(cmd @ Command::Close(_)) => {
            channel.reject(cmd, ChannelError::ClosingAlreadyInProgress(channel_id))
        }
        ChannelEvent::ExecuteCommand(cmd) => {
            channel.reject(cmd, ChannelError::ChannelUnavailable(channel_id))
        }
        ChannelEvent::MessageReceived(Messages::Error(err)) => {
            debug!("Channel {} is already closing; ignoring {}", channel_id, err);
            channel.unchanged()
        }
        ChannelEvent::NewBlock(_)
        | ChannelEvent::CheckHtlcTimeout
        | ChannelEvent::SetOnChainFeerates(_)
        | ChannelEvent::Connected
        | ChannelEvent::Disconnected
        | ChannelEvent::WatchReceived(WatchEvent::Confirmed {
            tag: WatchTag::FundingDepthOk, ..
        }) => channel.unchanged(),
        event => channel.ignore(event),
    }
}

fn is_published(commit: Option<&impl PublishedCommit>, txid: Txid) -> bool {
    commit.map(|commit| commit.commit_tx().txid() == txid).unwrap_or_default()
}

/// Classifies the transaction spending the funding output and builds the
/// transactions recovering our funds from it
pub(super) fn funding_spent(channel: &Channel, tx: Transaction) -> Transition {
    let mut closing = match channel.closing_data() {
        Some(closing) => closing,
        None => return channel.ignore(ChannelEvent::WatchReceived(WatchEvent::Spent {
            tag: WatchTag::FundingSpent,
            tx,
        })),
    };
    let txid = tx.txid();
    let min_depth = channel.static_params.config.min_depth_blocks;
    let feerates = &channel.current_feerates;
    let commitments = closing.commitments.clone();
    let channel_id = commitments.channel_id;
    trace!("Funding output of channel {} is spent by {:#?}", channel_id, tx);

    let already_known = closing.mutual_close_published.iter().any(|tx| tx.txid() == txid)
        || is_published(closing.local_commit_published.as_ref(), txid)
        || is_published(closing.remote_commit_published.as_ref(), txid)
        || is_published(closing.next_remote_commit_published.as_ref(), txid)
        || closing.revoked_commit_published.iter().any(|r| r.commit_tx.txid() == txid);
    if already_known {
        debug!("Spending transaction {} of channel {} is already known", txid, channel_id);
        return channel.unchanged();
    }

    let mut actions = vec![];
    if closing.mutual_close_proposed.iter().any(|proposed| proposed.txid() == txid) {
        info!("Channel {} is {} by {}", channel_id, "mutually closed".ended(), txid);
        actions.push(ChannelAction::watch(Watch::Confirmed {
            txid,
            min_depth,
            tag: WatchTag::TxConfirmed,
        }));
        closing.mutual_close_published.push(tx);
    } else if txid == commitments.local_commit.commit_tx.txid() {
        info!("Channel {} is closed by our commitment {}", channel_id, txid);
        let published = claim_current_local_commit_outputs(&commitments, feerates)
            .unwrap_or_else(|err| {
                failed_claim(&err);
                LocalCommitPublished::unclaimed(tx)
            });
        actions.extend(published.publish_actions(min_depth));
        closing.local_commit_published = Some(published);
    } else if txid == commitments.remote_commit.txid {
        warn!("Channel {} is closed by the current remote commitment {}", channel_id, txid);
        let published =
            claim_remote_commit_outputs(&commitments, &commitments.remote_commit, &tx, feerates)
                .unwrap_or_else(|err| {
                    failed_claim(&err);
                    RemoteCommitPublished::unclaimed(tx)
                });
        actions.extend(published.publish_actions(min_depth));
        closing.remote_commit_published = Some(published);
    } else if let Some(next_remote_commit) = match &commitments.remote_next_commit_info {
        RemoteNextCommitInfo::WaitingForRevocation(waiting)
            if waiting.next_remote_commit.txid == txid =>
        {
            Some(&waiting.next_remote_commit)
        }
        _ => None,
    } {
        warn!("Channel {} is closed by the next remote commitment {}", channel_id, txid);
        let published = claim_remote_commit_outputs(&commitments, next_remote_commit, &tx, feerates)
            .unwrap_or_else(|err| {
                failed_claim(&err);
                RemoteCommitPublished::unclaimed(tx)
            });
        actions.extend(published.publish_actions(min_depth));
        closing.next_remote_commit_published = Some(published);
    } else {
        match claim_revoked_remote_commit_outputs(&commitments, &tx, feerates) {
            Ok(Some(revoked)) => {
                error!(
                    "{} {} published revoked commitment #{} in {}",
                    "Peer of channel".err(),
                    channel_id,
                    revoked.commitment_number,
                    txid
                );
                actions.extend(revoked.publish_actions(min_depth));
                actions.push(
                    StorageAction::GetHtlcInfos {
                        revoked_commit_txid: txid,
                        commitment_number: revoked.commitment_number,
                    }
                    .into(),
                );
                actions.push(ChannelAction::send(messages::Error::with(
                    channel_id,
                    format!("funding output is spent by revoked commitment {}", txid),
                )));
                closing.revoked_commit_published.push(revoked);
            }
            Ok(None) => {
                error!(
                    "{} {} by unknown transaction {}; our commitment must not be published",
                    "Funding output is spent in channel".err(),
                    channel_id,
                    txid
                );
                let error = messages::Error::with(
                    channel_id,
                    format!("funding output is spent by unknown transaction {}", txid),
                );
                return stored(
                    ChannelState::ErrorInformationLeak(commitments),
                    vec![ChannelAction::send(error)],
                );
            }
            Err(err) => {
                failed_claim(&err);
                let revoked = RevokedCommitPublished::unclaimed(&commitments, tx);
                actions.extend(revoked.publish_actions(min_depth));
                closing.revoked_commit_published.push(revoked);
            }
        }
    }
    stored(ChannelState::Closing(closing), actions)
}

/// Spending transaction whose outputs can't be claimed is still recorded and
/// watched until it is buried
fn failed_claim(err: &ChannelError) {
    error!("{} {}", "Unable to claim channel outputs:".err(), err.err_details());
}

/// Some output of a published commitment or of a second-stage transaction is
/// spent: the spending transaction is tracked until it is buried, preimages
/// revealed by the peer are reported and penalties for revoked second-stage
/// transactions are published
fn output_spent(channel: &Channel, closing: &Closing, tx: Transaction) -> Transition {
    let commitments = &closing.commitments;
    let mut actions = vec![ChannelAction::watch(Watch::Confirmed {
        txid: tx.txid(),
        min_depth: channel.static_params.config.min_depth_blocks,
        tag: WatchTag::TxConfirmed,
    })];

    for (htlc, payment_preimage) in extract_preimages(commitments, &tx) {
        info!("Peer revealed preimage of HTLC #{} on-chain", htlc.id);
        actions.push(CmdResult::AddSettledFulfill { htlc, payment_preimage }.into());
    }

    let mut next = closing.clone();
    let mut penalties = vec![];
    for revoked in &mut next.revoked_commit_published {
        match claim_revoked_htlc_tx_output(commitments, revoked, &tx, &channel.current_feerates) {
            Ok(Some(penalty)) => {
                warn!("Peer published revoked HTLC transaction {}; punishing it", tx.txid());
                penalties.push(penalty.clone());
                revoked.claim_htlc_delayed_penalty_txs.push(penalty);
            }
            Ok(None) => {}
            Err(err) => error!("{} {}", "Unable to build penalty:".err(), err.err_details()),
        }
    }
    if penalties.is_empty() {
        return (channel.state.clone(), actions);
    }
    actions.extend(penalties.into_iter().flat_map(publish_claim));
    stored(ChannelState::Closing(next), actions)
}

/// Publishes the claim and requests notification of its confirmation
fn publish_claim(claim: ClaimTx) -> Vec<ChannelAction> {
    vec![
        ChannelAction::watch(Watch::Spent {
            outpoint: claim.spent_outpoint(),
            tag: WatchTag::OutputSpent,
        }),
        ChannelAction::publish(claim.tx),
    ]
}

fn tx_confirmed(channel: &Channel, closing: &Closing, tx: Transaction) -> Transition {
    let txid = tx.txid();
    let channel_id = closing.commitments.channel_id;
    if closing.mutual_close_published.iter().any(|published| published.txid() == txid) {
        info!("{} {}", "Mutual close is confirmed for channel".ended(), channel_id.ender());
        return stored(ChannelState::Closed(closing.clone()), vec![]);
    }

    let mut next = closing.clone();
    let mut actions = vec![];
    let mut updated = false;
    if let Some(local) = &mut next.local_commit_published {
        updated |= local.update_irrevocably_spent(&tx);
        match claim_local_htlc_delayed_output(
            &next.commitments,
            local,
            &tx,
            &channel.current_feerates,
        ) {
            Ok(Some(claim)) => {
                debug!("HTLC transaction {} is confirmed; claiming its output", txid);
                local.claim_htlc_delayed_txs.push(claim.clone());
                actions.extend(publish_claim(claim));
                updated = true;
            }
            Ok(None) => {}
            Err(err) => error!("{} {}", "Unable to claim HTLC output:".err(), err.err_details()),
        }
    }
    if let Some(remote) = &mut next.remote_commit_published {
        updated |= remote.update_irrevocably_spent(&tx);
    }
    if let Some(remote) = &mut next.next_remote_commit_published {
        updated |= remote.update_irrevocably_spent(&tx);
    }
    for revoked in &mut next.revoked_commit_published {
        updated |= revoked.update_irrevocably_spent(&tx);
    }
    if !updated {
        debug!("Confirmed transaction {} is not relevant to channel {}", txid, channel_id);
        return channel.unchanged();
    }

    if next.is_closed() {
        info!("{} {}", "Channel is closed:".ended(), channel_id.ender());
        stored(ChannelState::Closed(next), actions)
    } else {
        stored(ChannelState::Closing(next), actions)
    }
}

fn htlc_infos_received(
    channel: &Channel,
    closing: &Closing,
    revoked_commit_txid: Txid,
    htlc_infos: Vec<HtlcInfo>,
) -> Transition {
    let mut next = closing.clone();
    let revoked = match next
        .revoked_commit_published
        .iter_mut()
        .find(|revoked| revoked.commit_tx.txid() == revoked_commit_txid)
    {
        Some(revoked) => revoked,
        None => {
            warn!("HTLC data received for unknown commitment {}", revoked_commit_txid);
            return channel.unchanged();
        }
    };
    let penalties = match claim_revoked_htlc_outputs(
        &closing.commitments,
        revoked,
        &htlc_infos,
        &channel.current_feerates,
    ) {
        Ok(penalties) => penalties,
        Err(err) => {
            failed_claim(&err);
            return channel.unchanged();
        }
    };
    if penalties.is_empty() {
        return channel.unchanged();
    }
    info!(
        "Publishing {} HTLC penalties for revoked commitment {}",
        penalties.len(),
        revoked_commit_txid
    );
    revoked.htlc_penalty_txs.extend(penalties.iter().cloned());
    let actions = penalties.into_iter().flat_map(publish_claim).collect();
    stored(ChannelState::Closing(next), actions)
}

/// Resumes a channel from its persisted state. Transactions of a closing
/// channel are published and watched again; operational channels wait for
/// the peer connection.
pub(super) fn restore(channel: &Channel, state: ChannelState) -> Transition {
    let min_depth = channel.static_params.config.min_depth_blocks;
    let funding_watch = |commitments: &Commitments| {
        ChannelAction::watch(Watch::Spent {
            outpoint: commitments.commit_input.outpoint,
            tag: WatchTag::FundingSpent,
        })
    };
    info!("Restoring channel in {} state", state.promo());
    match state {
        ChannelState::Offline(inner) | ChannelState::Syncing(inner) => restore(channel, *inner),
        ChannelState::Closing(closing) => {
            let mut actions = vec![funding_watch(&closing.commitments)];
            for tx in &closing.mutual_close_published {
                actions.push(ChannelAction::publish(tx.clone()));
                actions.push(ChannelAction::watch(Watch::Confirmed {
                    txid: tx.txid(),
                    min_depth,
                    tag: WatchTag::TxConfirmed,
                }));
            }
            if let Some(published) = &closing.local_commit_published {
                actions.extend(published.publish_actions(min_depth));
            }
            if let Some(published) = &closing.remote_commit_published {
                actions.extend(published.publish_actions(min_depth));
            }
            if let Some(published) = &closing.next_remote_commit_published {
                actions.extend(published.publish_actions(min_depth));
            }
            for published in &closing.revoked_commit_published {
                actions.extend(published.publish_actions(min_depth));
            }
            (ChannelState::Closing(closing), actions)
        }
        ChannelState::WaitForFundingConfirmed(data) => {
            let mut actions = vec![funding_watch(&data.commitments)];
            actions.push(ChannelAction::watch(Watch::Confirmed {
                txid: data.commitments.commit_input.outpoint.txid,
                min_depth,
                tag: WatchTag::FundingDepthOk,
            }));
            if let Some(funding_tx) = &data.funding_tx {
                actions.push(ChannelAction::publish(funding_tx.clone()));
            }
            (ChannelState::Offline(Box::new(ChannelState::WaitForFundingConfirmed(data))), actions)
        }
        ChannelState::ErrorInformationLeak(commitments) => {
            let actions = vec![funding_watch(&commitments)];
            (ChannelState::ErrorInformationLeak(commitments), actions)
        }
        state @ ChannelState::Closed(_) | state @ ChannelState::Aborted => (state, vec![]),
        state => match state.commitments() {
            Some(commitments) => {
                let (commitments, _) = commitments.discard_unsigned_changes();
                let actions = vec![funding_watch(&commitments)];
                let inner = normal::with_commitments(&state, commitments);
                (ChannelState::Offline(Box::new(inner)), actions)
            }
            None => {
                warn!("Channel was not funded before the restart; aborting it");
                (ChannelState::Aborted, vec![])
            }
        },
    }
}
