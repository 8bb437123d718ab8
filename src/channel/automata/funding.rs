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

//! Channel opening: from the `open_channel`/`accept_channel` exchange up to
//! the funding transaction reaching the required depth.

use bitcoin::{OutPoint, Transaction};

use super::{funding_watches, offline, resolver, stored, Transition};
use crate::channel::actions::{BlockchainAction, ChannelAction, CmdResult};
use crate::channel::commands::Command;
use crate::channel::commitments::{
    first_commit_specs, make_local_txs, make_remote_txs, Commitments, LocalCommit, RemoteCommit,
    RemoteNextCommitInfo,
};
use crate::channel::error::ChannelError;
use crate::channel::events::{ChannelEvent, WatchEvent, WatchTag};
use crate::channel::messages::{
    AcceptChannel, ChannelId, FundingCreated, FundingLocked, FundingSigned, Messages, OpenChannel,
};
use crate::channel::params::RemoteParams;
use crate::channel::state::{
    Channel, ChannelState, InitFundee, InitFunder, WaitForAcceptChannel, WaitForFundingConfirmed,
    WaitForFundingCreated, WaitForFundingInternal, WaitForFundingLocked, WaitForFundingSigned,
};
use crate::channel::transactions::{funding_output, InputInfo, SpendingTx};
use crate::constants::MAX_ACCEPTED_HTLC_LIMIT;
use crate::LogStyle;

/// States preceding the signature of the funding transaction
pub(super) fn process_opening(channel: &Channel, event: ChannelEvent) -> Transition {
    match (&channel.state, event) {
        (ChannelState::WaitForInit, ChannelEvent::InitFunder(init)) => init_funder(init),
        (ChannelState::WaitForInit, ChannelEvent::InitFundee(init)) => {
            debug!("Waiting for a channel proposal with id {}", init.temporary_channel_id);
            (ChannelState::WaitForOpenChannel(init), vec![])
        }
        (ChannelState::WaitForInit, ChannelEvent::Restore(state)) => {
            resolver::restore(channel, *state)
        }

        (
            ChannelState::WaitForOpenChannel(init),
            ChannelEvent::MessageReceived(Messages::OpenChannel(open)),
        ) => accept_channel(channel, init, open),
        (
            ChannelState::WaitForAcceptChannel(data),
            ChannelEvent::MessageReceived(Messages::AcceptChannel(accept)),
        ) => make_funding_tx(channel, data, accept),
        (
            ChannelState::WaitForFundingInternal(data),
            ChannelEvent::MakeFundingTxResponse { funding_tx, output_index, fee_sat },
        ) => funding_created(channel, data, funding_tx, output_index, fee_sat),
        (
            ChannelState::WaitForFundingCreated(data),
            ChannelEvent::MessageReceived(Messages::FundingCreated(msg)),
        ) => funding_signed(channel, data, msg),
        (
            ChannelState::WaitForFundingSigned(data),
            ChannelEvent::MessageReceived(Messages::FundingSigned(msg)),
        ) => funding_signature_received(channel, data, msg),

        (_, ChannelEvent::NewBlock(_))
        | (_, ChannelEvent::SetOnChainFeerates(_))
        | (_, ChannelEvent::CheckHtlcTimeout) => channel.unchanged(),
        (ChannelState::WaitForInit, ChannelEvent::ExecuteCommand(cmd)) => {
            channel.reject(cmd, ChannelError::ChannelUnavailable(channel.id()))
        }
        (ChannelState::WaitForInit, event) => channel.ignore(event),
        (_, ChannelEvent::MessageReceived(Messages::Error(err))) => {
            error!("{} {}", "Peer failed the channel:".err(), err.message.err_details());
            channel.abort(None)
        }
        (_, ChannelEvent::ExecuteCommand(cmd @ Command::Close(_)))
        | (_, ChannelEvent::ExecuteCommand(cmd @ Command::ForceClose)) => {
            info!("Channel {} is cancelled by {}", channel.id(), cmd);
            channel.abort(None)
        }
        (_, ChannelEvent::ExecuteCommand(cmd)) => {
            channel.reject(cmd, ChannelError::ChannelUnavailable(channel.id()))
        }
        (_, ChannelEvent::Disconnected) => channel.abort(None),
        (_, event) => channel.ignore(event),
    }
}

/// Funder's own proposal can't be built: no peer message is sent and the
/// failure is reported back to the caller
fn init_failed(temporary_channel_id: ChannelId, error: ChannelError) -> Transition {
    error!("{} {}: {}", "Unable to open channel".err(), temporary_channel_id, error.err_details());
    let result = CmdResult::InitFailed { temporary_channel_id, error };
    (ChannelState::Aborted, vec![result.into()])
}

fn init_funder(init: InitFunder) -> Transition {
    let temporary_channel_id = init.temporary_channel_id;
    let funding_msat = init.funding_sat.saturating_mul(1000);
    if init.push_msat > funding_msat {
        let err = ChannelError::InvalidPushAmount {
            channel_id: temporary_channel_id,
            push_msat: init.push_msat,
            funding_msat,
        };
        return init_failed(temporary_channel_id, err);
    }
    let keys = &init.local_params.keys;
    let first_per_commitment_point = match keys.per_commitment_point(0) {
        Ok(point) => point,
        Err(err) => {
            let err = ChannelError::Crypto(temporary_channel_id, err.to_string());
            return init_failed(temporary_channel_id, err);
        }
    };
    let public = keys.to_public();
    let local_params = &init.local_params;
    let open = OpenChannel {
        temporary_channel_id: init.temporary_channel_id,
        funding_satoshis: init.funding_sat,
        push_msat: init.push_msat,
        dust_limit_satoshis: local_params.dust_limit_sat,
        max_htlc_value_in_flight_msat: local_params.max_htlc_value_in_flight_msat,
        channel_reserve_satoshis: local_params.channel_reserve_sat,
        htlc_minimum_msat: local_params.htlc_minimum_msat,
        feerate_per_kw: init.initial_feerate_per_kw,
        to_self_delay: local_params.to_self_delay,
        max_accepted_htlcs: local_params.max_accepted_htlcs,
        funding_pubkey: public.funding_pubkey,
        revocation_basepoint: public.revocation_basepoint,
        payment_point: public.payment_basepoint,
        delayed_payment_basepoint: public.delayed_payment_basepoint,
        htlc_basepoint: public.htlc_basepoint,
        first_per_commitment_point,
        channel_flags: init.channel_flags,
    };
    info!(
        "{} {} for {} sat",
        "Proposing channel".promo(),
        init.temporary_channel_id.promoter(),
        init.funding_sat.promoter()
    );
    let actions = vec![ChannelAction::send(open.clone())];
    let state =
        ChannelState::WaitForAcceptChannel(WaitForAcceptChannel { init_funder: init, last_sent: open });
    (state, actions)
}

/// Fundee checks of the channel proposal
fn validate_open_channel(channel: &Channel, open: &OpenChannel) -> Result<(), ChannelError> {
    let config = &channel.static_params.config;
    let channel_id = open.temporary_channel_id;
    if open.funding_satoshis < config.min_funding_sat
        || open.funding_satoshis > config.max_funding_sat
    {
        return Err(ChannelError::InvalidFundingAmount {
            channel_id,
            minimum: config.min_funding_sat,
            maximum: config.max_funding_sat,
            actual: open.funding_satoshis,
        });
    }
    if open.push_msat > open.funding_satoshis * 1000 {
        return Err(ChannelError::InvalidPushAmount {
            channel_id,
            push_msat: open.push_msat,
            funding_msat: open.funding_satoshis * 1000,
        });
    }
    if open.to_self_delay > config.max_to_self_delay {
        return Err(ChannelError::ToSelfDelayTooHigh {
            channel_id,
            maximum: config.max_to_self_delay,
            actual: open.to_self_delay,
        });
    }
    if open.max_accepted_htlcs > MAX_ACCEPTED_HTLC_LIMIT {
        return Err(ChannelError::InvalidMaxAcceptedHtlcs {
            channel_id,
            maximum: MAX_ACCEPTED_HTLC_LIMIT,
            actual: open.max_accepted_htlcs,
        });
    }
    if open.feerate_per_kw < config.min_feerate_per_kw {
        return Err(ChannelError::FeerateTooSmall {
            channel_id,
            minimum: config.min_feerate_per_kw,
            actual: open.feerate_per_kw,
        });
    }
    let reserve_sat = config.channel_reserve_sat(open.funding_satoshis);
    if open.dust_limit_satoshis > reserve_sat {
        return Err(ChannelError::DustLimitTooLarge {
            channel_id,
            dust_limit_sat: open.dust_limit_satoshis,
            reserve_sat,
        });
    }
    Ok(())
}

fn accept_channel(channel: &Channel, init: &InitFundee, open: OpenChannel) -> Transition {
    debug!("Channel {} received {} proposal", init.temporary_channel_id, open);
    if let Err(err) = validate_open_channel(channel, &open) {
        let abort_channel = channel.with_state(ChannelState::WaitForOpenChannel(InitFundee {
            temporary_channel_id: open.temporary_channel_id,
            ..init.clone()
        }));
        return abort_channel.abort(Some(err));
    }

    let config = &channel.static_params.config;
    let mut local_params = init.local_params.clone();
    local_params.channel_reserve_sat = config.channel_reserve_sat(open.funding_satoshis);
    let keys = &local_params.keys;
    let first_per_commitment_point = match keys.per_commitment_point(0) {
        Ok(point) => point,
        Err(err) => {
            let err = ChannelError::Crypto(open.temporary_channel_id, err.to_string());
            return channel.abort(Some(err));
        }
    };
    let public = keys.to_public();
    let accept = AcceptChannel {
        temporary_channel_id: open.temporary_channel_id,
        dust_limit_satoshis: local_params.dust_limit_sat,
        max_htlc_value_in_flight_msat: local_params.max_htlc_value_in_flight_msat,
        channel_reserve_satoshis: local_params.channel_reserve_sat,
        htlc_minimum_msat: local_params.htlc_minimum_msat,
        minimum_depth: config.min_depth_blocks,
        to_self_delay: local_params.to_self_delay,
        max_accepted_htlcs: local_params.max_accepted_htlcs,
        funding_pubkey: public.funding_pubkey,
        revocation_basepoint: public.revocation_basepoint,
        payment_point: public.payment_basepoint,
        delayed_payment_basepoint: public.delayed_payment_basepoint,
        htlc_basepoint: public.htlc_basepoint,
        first_per_commitment_point,
    };
    let remote_params =
        RemoteParams::with_open_channel(channel.static_params.remote_node_id, &open);
    info!(
        "{} {} for {} sat",
        "Accepting channel".promo(),
        open.temporary_channel_id.promoter(),
        open.funding_satoshis.promoter()
    );
    let actions = vec![ChannelAction::send(accept.clone())];
    let state = ChannelState::WaitForFundingCreated(WaitForFundingCreated {
        temporary_channel_id: open.temporary_channel_id,
        local_params,
        remote_params,
        funding_sat: open.funding_satoshis,
        push_msat: open.push_msat,
        initial_feerate_per_kw: open.feerate_per_kw,
        remote_first_per_commitment_point: open.first_per_commitment_point,
        channel_flags: open.channel_flags,
        last_sent: accept,
    });
    (state, actions)
}

/// Funder checks of the fundee parameters
fn validate_accept_channel(
    channel: &Channel,
    data: &WaitForAcceptChannel,
    accept: &AcceptChannel,
) -> Result<(), ChannelError> {
    let config = &channel.static_params.config;
    let channel_id = data.init_funder.temporary_channel_id;
    if accept.minimum_depth > config.max_min_depth_blocks {
        return Err(ChannelError::MinimumDepthTooHigh {
            channel_id,
            maximum: config.max_min_depth_blocks,
            actual: accept.minimum_depth,
        });
    }
    if accept.to_self_delay > config.max_to_self_delay {
        return Err(ChannelError::ToSelfDelayTooHigh {
            channel_id,
            maximum: config.max_to_self_delay,
            actual: accept.to_self_delay,
        });
    }
    if accept.max_accepted_htlcs > MAX_ACCEPTED_HTLC_LIMIT {
        return Err(ChannelError::InvalidMaxAcceptedHtlcs {
            channel_id,
            maximum: MAX_ACCEPTED_HTLC_LIMIT,
            actual: accept.max_accepted_htlcs,
        });
    }
    let reserve_sat = data.init_funder.local_params.channel_reserve_sat;
    if accept.dust_limit_satoshis > reserve_sat {
        return Err(ChannelError::DustLimitTooLarge {
            channel_id,
            dust_limit_sat: accept.dust_limit_satoshis,
            reserve_sat,
        });
    }
    Ok(())
}

fn make_funding_tx(
    channel: &Channel,
    data: &WaitForAcceptChannel,
    accept: AcceptChannel,
) -> Transition {
    if let Err(err) = validate_accept_channel(channel, data, &accept) {
        return channel.abort(Some(err));
    }
    let init = &data.init_funder;
    let remote_params =
        RemoteParams::with_accept_channel(channel.static_params.remote_node_id, &accept);
    let (funding_txout, _) = funding_output(
        &init.local_params.keys.to_public().funding_pubkey,
        &remote_params.keys.funding_pubkey,
        init.funding_sat,
    );
    debug!(
        "Channel {} accepted by the peer; requesting funding transaction",
        init.temporary_channel_id
    );
    let actions = vec![BlockchainAction::MakeFundingTx {
        script_pubkey: funding_txout.script_pubkey,
        amount_sat: init.funding_sat,
        feerate_per_kw: init.funding_tx_feerate_per_kw,
    }
    .into()];
    let state = ChannelState::WaitForFundingInternal(WaitForFundingInternal {
        temporary_channel_id: init.temporary_channel_id,
        local_params: init.local_params.clone(),
        remote_params,
        funding_sat: init.funding_sat,
        push_msat: init.push_msat,
        initial_feerate_per_kw: init.initial_feerate_per_kw,
        remote_first_per_commitment_point: accept.first_per_commitment_point,
        channel_flags: init.channel_flags,
        minimum_depth: accept.minimum_depth,
        last_sent: data.last_sent.clone(),
    });
    (state, actions)
}

fn funding_created(
    channel: &Channel,
    data: &WaitForFundingInternal,
    funding_tx: Transaction,
    output_index: u32,
    fee_sat: u64,
) -> Transition {
    let local_params = &data.local_params;
    let remote_params = &data.remote_params;
    let (txout, redeem_script) = funding_output(
        &local_params.keys.to_public().funding_pubkey,
        &remote_params.keys.funding_pubkey,
        data.funding_sat,
    );
    if funding_tx.output.get(output_index as usize) != Some(&txout) {
        error!(
            "{} {}:{}",
            "Funding transaction does not pay to the channel:".err(),
            funding_tx.txid(),
            output_index
        );
        return channel.abort(None);
    }
    trace!("Funding transaction: {:#?}", funding_tx);

    let funding_txid = funding_tx.txid();
    let commit_input =
        InputInfo { outpoint: OutPoint::new(funding_txid, output_index), txout, redeem_script };
    let funding_output_index = match u16::try_from(output_index) {
        Ok(index) => index,
        Err(_) => {
            error!(
                "{} {}:{}",
                "Funding output index does not fit channel id:".err(),
                funding_txid,
                output_index
            );
            return channel.abort(None);
        }
    };
    let channel_id = ChannelId::with(funding_txid, funding_output_index);
    let specs = first_commit_specs(
        channel_id,
        true,
        data.funding_sat,
        data.push_msat,
        data.initial_feerate_per_kw,
    );
    let (local_spec, remote_spec) = match specs {
        Ok(specs) => specs,
        Err(err) => return channel.abort(Some(err)),
    };
    let remote_point = data.remote_first_per_commitment_point;
    let txs = make_local_txs(local_params, remote_params, &commit_input, 0, &local_spec)
        .and_then(|local| {
            make_remote_txs(
                local_params,
                remote_params,
                &commit_input,
                0,
                &remote_spec,
                &remote_point,
            )
            .map(|remote| (local, remote))
        });
    let (local_txs, remote_txs) = match txs {
        Ok(txs) => txs,
        Err(err) => return channel.abort(Some(ChannelError::Crypto(channel_id, err.to_string()))),
    };

    let signature = remote_txs.commit_tx.sign(&local_params.keys.funding_secret);
    let funding_created = FundingCreated {
        temporary_channel_id: data.temporary_channel_id,
        funding_txid,
        funding_output_index,
        signature,
    };
    info!(
        "Channel {} is funded by {}; sending {}",
        channel_id.promoter(),
        funding_txid.promoter(),
        "funding_created".promo()
    );
    let actions = vec![ChannelAction::send(funding_created.clone())];
    let state = ChannelState::WaitForFundingSigned(WaitForFundingSigned {
        channel_id,
        local_params: local_params.clone(),
        remote_params: remote_params.clone(),
        funding_tx,
        funding_tx_fee_sat: fee_sat,
        local_spec,
        local_commit_tx: local_txs.commit_tx,
        remote_commit: RemoteCommit {
            index: 0,
            spec: remote_spec,
            txid: remote_txs.commit_tx.txid(),
            remote_per_commitment_point: remote_point,
        },
        channel_flags: data.channel_flags,
        minimum_depth: data.minimum_depth,
        last_sent: funding_created,
    });
    (state, actions)
}

fn funding_signed(
    channel: &Channel,
    data: &WaitForFundingCreated,
    msg: FundingCreated,
) -> Transition {
    let local_params = &data.local_params;
    let remote_params = &data.remote_params;
    let (txout, redeem_script) = funding_output(
        &local_params.keys.to_public().funding_pubkey,
        &remote_params.keys.funding_pubkey,
        data.funding_sat,
    );
    let commit_input = InputInfo {
        outpoint: OutPoint::new(msg.funding_txid, msg.funding_output_index as u32),
        txout,
        redeem_script,
    };
    let channel_id = ChannelId::with(msg.funding_txid, msg.funding_output_index);
    let specs = first_commit_specs(
        channel_id,
        false,
        data.funding_sat,
        data.push_msat,
        data.initial_feerate_per_kw,
    );
    let (local_spec, remote_spec) = match specs {
        Ok(specs) => specs,
        Err(err) => return channel.abort(Some(err)),
    };
    let remote_point = data.remote_first_per_commitment_point;
    let txs = make_local_txs(local_params, remote_params, &commit_input, 0, &local_spec)
        .and_then(|local| {
            make_remote_txs(
                local_params,
                remote_params,
                &commit_input,
                0,
                &remote_spec,
                &remote_point,
            )
            .map(|remote| (local, remote))
        });
    let (local_txs, remote_txs) = match txs {
        Ok(txs) => txs,
        Err(err) => return channel.abort(Some(ChannelError::Crypto(channel_id, err.to_string()))),
    };

    if !local_txs.commit_tx.check_sig(&msg.signature, &remote_params.keys.funding_pubkey) {
        let err = ChannelError::InvalidCommitmentSignature(channel_id, local_txs.commit_tx.txid());
        return channel.abort(Some(err));
    }

    let signature = remote_txs.commit_tx.sign(&local_params.keys.funding_secret);
    let remote_commit = RemoteCommit {
        index: 0,
        spec: remote_spec,
        txid: remote_txs.commit_tx.txid(),
        remote_per_commitment_point: remote_point,
    };
    let local_commit = LocalCommit {
        index: 0,
        spec: local_spec,
        commit_tx: local_txs.commit_tx,
        remote_sig: msg.signature,
        htlc_txs_and_sigs: vec![],
    };
    let commitments = Commitments::new(
        channel_id,
        local_params.clone(),
        remote_params.clone(),
        data.channel_flags,
        commit_input,
        local_commit,
        remote_commit,
    );
    info!(
        "{} {}; waiting for funding transaction {} to confirm",
        "Channel is signed".ended(),
        channel_id.ender(),
        msg.funding_txid
    );

    let mut actions = vec![ChannelAction::send(FundingSigned { channel_id, signature })];
    actions.extend(funding_watches(&commitments, channel.static_params.config.min_depth_blocks));
    let state = ChannelState::WaitForFundingConfirmed(WaitForFundingConfirmed {
        commitments,
        funding_tx: None,
        waiting_since: channel.current_tip,
        deferred: None,
    });
    stored(state, actions)
}

fn funding_signature_received(
    channel: &Channel,
    data: &WaitForFundingSigned,
    msg: FundingSigned,
) -> Transition {
    let commit_tx = &data.local_commit_tx;
    if !commit_tx.check_sig(&msg.signature, &data.remote_params.keys.funding_pubkey) {
        let err = ChannelError::InvalidCommitmentSignature(data.channel_id, commit_tx.txid());
        return channel.abort(Some(err));
    }

    let local_commit = LocalCommit {
        index: 0,
        spec: data.local_spec.clone(),
        commit_tx: commit_tx.clone(),
        remote_sig: msg.signature,
        htlc_txs_and_sigs: vec![],
    };
    let commitments = Commitments::new(
        data.channel_id,
        data.local_params.clone(),
        data.remote_params.clone(),
        data.channel_flags,
        commit_tx.input.clone(),
        local_commit,
        data.remote_commit.clone(),
    );
    info!(
        "{} {}; publishing funding transaction {}",
        "Channel is signed".ended(),
        data.channel_id.ender(),
        data.funding_tx.txid()
    );

    let state = ChannelState::WaitForFundingConfirmed(WaitForFundingConfirmed {
        commitments,
        funding_tx: Some(data.funding_tx.clone()),
        waiting_since: channel.current_tip,
        deferred: None,
    });
    let mut actions = vec![
        ChannelAction::store_state(&state),
        ChannelAction::publish(data.funding_tx.clone()),
    ];
    if let Some(commitments) = state.commitments() {
        actions.extend(funding_watches(commitments, data.minimum_depth));
    }
    (state, actions)
}

/// Funding transaction is signed but the channel is not operational yet
pub(super) fn process_funded(channel: &Channel, event: ChannelEvent) -> Transition {
    match (&channel.state, event) {
        (
            ChannelState::WaitForFundingConfirmed(data),
            ChannelEvent::WatchReceived(WatchEvent::Confirmed {
                tag: WatchTag::FundingDepthOk,
                block_height,
                ..
            }),
        ) => funding_depth_ok(data, block_height),
        (
            ChannelState::WaitForFundingConfirmed(data),
            ChannelEvent::MessageReceived(Messages::FundingLocked(msg)),
        ) => {
            debug!("Channel {} received early {}; deferring it", data.commitments.channel_id, msg);
            let state = ChannelState::WaitForFundingConfirmed(WaitForFundingConfirmed {
                deferred: Some(msg),
                ..data.clone()
            });
            (state, vec![])
        }
        (
            ChannelState::WaitForFundingLocked(data),
            ChannelEvent::MessageReceived(Messages::FundingLocked(msg)),
        ) => {
            let commitments = channel_ready(&data.commitments, &msg);
            stored(ChannelState::Normal(commitments), vec![])
        }
        (_, ChannelEvent::MessageReceived(Messages::Error(err))) => channel.remote_error(err),
        (_, ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::FundingSpent, tx })) => {
            resolver::funding_spent(channel, tx)
        }
        (_, ChannelEvent::ExecuteCommand(Command::ForceClose)) => channel.local_force_close(),
        (_, ChannelEvent::ExecuteCommand(cmd)) => {
            channel.reject(cmd, ChannelError::ChannelUnavailable(channel.id()))
        }
        (_, ChannelEvent::Disconnected) => offline::go_offline(channel),
        (_, ChannelEvent::NewBlock(_))
        | (_, ChannelEvent::SetOnChainFeerates(_))
        | (_, ChannelEvent::CheckHtlcTimeout)
        | (_, ChannelEvent::WatchReceived(WatchEvent::Confirmed { .. })) => channel.unchanged(),
        (_, event) => channel.ignore(event),
    }
}

fn funding_depth_ok(data: &WaitForFundingConfirmed, block_height: u32) -> Transition {
    let commitments = &data.commitments;
    let channel_id = commitments.channel_id;
    let next_per_commitment_point = match commitments.local_params.keys.per_commitment_point(1) {
        Ok(point) => point,
        Err(err) => {
            error!("{} {}", "Unable to derive commitment point:".err(), err.err_details());
            return (ChannelState::WaitForFundingConfirmed(data.clone()), vec![]);
        }
    };
    info!(
        "Funding transaction of channel {} is confirmed at height {}",
        channel_id.promoter(),
        block_height
    );
    let funding_locked = FundingLocked { channel_id, next_per_commitment_point };
    let actions = vec![ChannelAction::send(funding_locked.clone())];
    let state = match &data.deferred {
        Some(remote_locked) => ChannelState::Normal(channel_ready(commitments, remote_locked)),
        None => ChannelState::WaitForFundingLocked(WaitForFundingLocked {
            commitments: commitments.clone(),
            last_sent: funding_locked,
        }),
    };
    stored(state, actions)
}

/// Commitments of the channel which both parties consider open
fn channel_ready(commitments: &Commitments, remote_locked: &FundingLocked) -> Commitments {
    info!("{} {}", "Channel is operational:".ended(), commitments.channel_id.ender());
    Commitments {
        remote_next_commit_info: RemoteNextCommitInfo::NextPoint(
            remote_locked.next_per_commitment_point,
        ),
        ..commitments.clone()
    }
}
