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

mod common;

use bitcoin::{Script, TxOut};
use common::*;
use lnp_channel::channel::messages::FundingSigned;
use lnp_channel::channel::{
    BlockchainAction, ChannelAction, ChannelError, ChannelEvent, ChannelState, CmdResult,
    Command, InitFunder, Messages, StorageAction,
};

#[test]
fn channel_opens() {
    let pair = normal_pair();
    let alice = pair.alice.commitments().expect("funded");
    let bob = pair.bob.commitments().expect("funded");

    assert_eq!(alice.channel_id, bob.channel_id);
    assert!(alice.is_funder());
    assert!(!bob.is_funder());
    assert_eq!(alice.commit_input.outpoint.txid, pair.funding_tx.txid());
    assert_eq!(alice.capacity_sat(), FUNDING_SAT);

    assert_eq!(bob.local_commit.spec.to_local_msat, PUSH_MSAT);
    assert_eq!(bob.local_commit.spec.to_remote_msat, FUNDING_SAT * 1000 - PUSH_MSAT);
    assert_eq!(alice.local_commit.spec.to_local_msat, bob.local_commit.spec.to_remote_msat);
    assert_eq!(alice.remote_commit.txid, bob.local_commit.commit_tx.tx.txid());
    assert_eq!(bob.remote_commit.txid, alice.local_commit.commit_tx.tx.txid());
}

#[test]
fn funder_publishes_funding_tx() {
    let mut opening = opening();
    let (funding_tx, actions) = opening.fund();
    assert!(matches!(opening.alice.state, ChannelState::WaitForFundingSigned(_)));
    assert!(matches!(sent(&actions).as_slice(), [Messages::FundingCreated(_)]));

    let bob_actions = receive(&mut opening.bob, sent(&actions).remove(0));
    assert!(matches!(opening.bob.state, ChannelState::WaitForFundingConfirmed(_)));
    assert!(stores_state(&bob_actions));
    assert!(published(&bob_actions).is_empty());

    let alice_actions = receive(&mut opening.alice, sent(&bob_actions).remove(0));
    assert!(matches!(opening.alice.state, ChannelState::WaitForFundingConfirmed(_)));
    assert!(matches!(
        alice_actions.first(),
        Some(ChannelAction::Storage(StorageAction::StoreState(_)))
    ));
    assert_eq!(published(&alice_actions), vec![funding_tx]);
}

#[test]
fn invalid_funding_signature_aborts() {
    let mut opening = opening();
    let (_, actions) = opening.fund();
    let funding_created = match sent(&actions).remove(0) {
        Messages::FundingCreated(msg) => msg,
        msg => panic!("unexpected message {}", msg),
    };
    let channel_id = opening.alice.channel_id().expect("channel id");

    // alice signature over bob's commitment is not valid for her own one
    let forged = FundingSigned { channel_id, signature: funding_created.signature };
    let actions = receive(&mut opening.alice, forged);
    assert_eq!(opening.alice.state, ChannelState::Aborted);
    assert!(sends_error(&actions));
    assert!(published(&actions).is_empty());
}

#[test]
fn invalid_funding_created_signature_aborts() {
    let mut opening = opening();
    let (_, actions) = opening.fund();
    let mut funding_created = match sent(&actions).remove(0) {
        Messages::FundingCreated(msg) => msg,
        msg => panic!("unexpected message {}", msg),
    };
    // signature commits to the other funding output
    funding_created.funding_output_index = 1;
    let actions = receive(&mut opening.bob, funding_created);
    assert_eq!(opening.bob.state, ChannelState::Aborted);
    assert!(sends_error(&actions));
}

#[test]
fn cancel_before_funding_is_signed() {
    for cmd in [Command::Close(None), Command::ForceClose] {
        let mut opening = opening();
        opening.fund();
        assert!(matches!(opening.alice.state, ChannelState::WaitForFundingSigned(_)));
        let actions = command(&mut opening.alice, cmd);
        assert_eq!(opening.alice.state, ChannelState::Aborted);
        assert!(!sends_error(&actions));
        assert!(published(&actions).is_empty());
    }
}

#[test]
fn disconnection_before_funding_aborts() {
    let mut opening = opening();
    let actions = step(&mut opening.alice, ChannelEvent::Disconnected);
    assert!(actions.is_empty());
    assert_eq!(opening.alice.state, ChannelState::Aborted);
}

#[test]
fn peer_error_aborts_opening() {
    let mut opening = opening();
    let channel_id = opening.bob.channel_id().expect("temporary id");
    let error = lnp_channel::channel::messages::Error::with(channel_id, "go away");
    let actions = receive(&mut opening.bob, error);
    assert_eq!(opening.bob.state, ChannelState::Aborted);
    assert!(actions.is_empty());
}

#[test]
fn excessive_push_amount_is_rejected() {
    init_logger();
    let mut alice = new_channel(2);
    let mut bob = new_channel(1);
    let actions = step(&mut alice, ChannelEvent::InitFunder(init_funder()));
    let mut open = match sent(&actions).remove(0) {
        Messages::OpenChannel(open) => open,
        msg => panic!("unexpected message {}", msg),
    };
    open.push_msat = FUNDING_SAT * 1000 + 1;
    step(&mut bob, ChannelEvent::InitFundee(init_fundee()));
    let actions = receive(&mut bob, open);
    assert_eq!(bob.state, ChannelState::Aborted);
    assert!(sends_error(&actions));
}

#[test]
fn funder_push_above_funding_is_rejected() {
    init_logger();
    let mut alice = new_channel(2);
    let init = InitFunder { push_msat: FUNDING_SAT * 1000 + 1, ..init_funder() };
    let temporary_channel_id = init.temporary_channel_id;
    let actions = step(&mut alice, ChannelEvent::InitFunder(init));
    assert_eq!(alice.state, ChannelState::Aborted);
    assert!(sent(&actions).is_empty());
    assert_eq!(actions, vec![ChannelAction::from(CmdResult::InitFailed {
        temporary_channel_id,
        error: ChannelError::InvalidPushAmount {
            channel_id: temporary_channel_id,
            push_msat: FUNDING_SAT * 1000 + 1,
            funding_msat: FUNDING_SAT * 1000,
        },
    })]);
}

#[test]
fn funder_pushing_whole_funding_proceeds() {
    init_logger();
    let mut alice = new_channel(2);
    let init = InitFunder { push_msat: FUNDING_SAT * 1000, ..init_funder() };
    let actions = step(&mut alice, ChannelEvent::InitFunder(init));
    assert!(matches!(alice.state, ChannelState::WaitForAcceptChannel(_)));
    assert!(matches!(sent(&actions).as_slice(), [Messages::OpenChannel(_)]));
}

#[test]
fn funding_output_index_beyond_channel_id_range_aborts() {
    let mut opening = opening();
    let funding_out = match &opening.make_funding_tx {
        BlockchainAction::MakeFundingTx { script_pubkey, amount_sat, .. } => {
            TxOut { value: *amount_sat, script_pubkey: script_pubkey.clone() }
        }
        action => panic!("unexpected action {:?}", action),
    };
    let output_index = u16::MAX as u32 + 1;
    let mut tx = funding_tx(Script::new(), 0);
    tx.output = vec![TxOut::default(); output_index as usize];
    tx.output.push(funding_out);

    let actions = step(&mut opening.alice, ChannelEvent::MakeFundingTxResponse {
        funding_tx: tx,
        output_index,
        fee_sat: 1_000,
    });
    assert_eq!(opening.alice.state, ChannelState::Aborted);
    assert!(sent(&actions).is_empty());
    assert!(published(&actions).is_empty());
}

#[test]
fn htlc_commands_need_operational_channel() {
    let mut opening = opening();
    let (_, actions) = opening.fund();
    exchange(&mut opening.alice, &mut opening.bob, actions);
    assert!(matches!(opening.alice.state, ChannelState::WaitForFundingConfirmed(_)));

    let before = opening.alice.state.clone();
    let channel_id = opening.alice.channel_id().expect("channel id");
    let cmd = Command::from(add_cmd(10_000_000, preimage(1), START_HEIGHT + 144));
    let actions = command(&mut opening.alice, cmd.clone());
    assert_eq!(opening.alice.state, before);
    assert_eq!(not_executed(&actions), vec![CmdResult::NotExecuted {
        command: cmd,
        error: ChannelError::ChannelUnavailable(channel_id),
    }]);

    let actions = command(&mut opening.alice, Command::Sign);
    assert_eq!(opening.alice.state, before);
    assert_eq!(not_executed(&actions).len(), 1);
}

#[test]
fn early_funding_locked_is_deferred() {
    let mut opening = opening();
    let (funding_tx, actions) = opening.fund();
    let (alice, bob) = (&mut opening.alice, &mut opening.bob);
    exchange(alice, bob, actions);

    let bob_locked = step(bob, depth_ok(&funding_tx));
    assert!(receive(alice, sent(&bob_locked).remove(0)).is_empty());
    match &alice.state {
        ChannelState::WaitForFundingConfirmed(data) => assert!(data.deferred.is_some()),
        state => panic!("alice is in {}", state),
    }

    let alice_locked = step(alice, depth_ok(&funding_tx));
    assert!(matches!(alice.state, ChannelState::Normal(_)));
    assert!(stores_state(&alice_locked));
    assert!(matches!(sent(&alice_locked).as_slice(), [Messages::FundingLocked(_)]));

    exchange(alice, bob, alice_locked);
    assert!(matches!(bob.state, ChannelState::Normal(_)));
}

#[test]
fn restored_channel_waits_for_funding() {
    let mut opening = opening();
    let (funding_tx, actions) = opening.fund();
    exchange(&mut opening.alice, &mut opening.bob, actions);

    let mut restored = new_channel(2);
    let saved = Box::new(opening.alice.state.clone());
    let actions = step(&mut restored, ChannelEvent::Restore(saved));
    match &restored.state {
        ChannelState::Offline(inner) => {
            assert!(matches!(**inner, ChannelState::WaitForFundingConfirmed(_)))
        }
        state => panic!("restored channel is in {}", state),
    }
    assert_eq!(published(&actions), vec![funding_tx]);
    assert!(sent(&actions).is_empty());
}
