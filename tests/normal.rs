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

use bitcoin::hashes::{sha256, Hash};
use common::*;
use lnp_channel::automata::StateMachine;
use lnp_channel::channel::{
    ChannelAction, ChannelError, ChannelEvent, ChannelState, CmdFailHtlc, CmdFailMalformedHtlc,
    CmdResult, CmdUpdateFee, Command, Direction, HtlcFailure, Messages, RemoteNextCommitInfo,
    StorageAction,
};

fn not_executed_with(error: ChannelError, cmd: impl Into<Command>) -> Vec<CmdResult> {
    vec![CmdResult::NotExecuted { command: cmd.into(), error }]
}

#[test]
fn sign_revoke_round_trip() {
    let mut pair = normal_pair();
    let id = pair.alice_adds(10_000_000, preimage(1));
    let alice = pair.alice.commitments().expect("funded");
    assert_eq!(alice.local_changes.proposed.len(), 1);
    assert!(matches!(alice.remote_next_commit_info, RemoteNextCommitInfo::NextPoint(_)));

    let actions = command(&mut pair.alice, Command::Sign);
    let commit_sig = sent(&actions);
    assert!(matches!(commit_sig.as_slice(), [Messages::CommitSig(_)]));
    assert!(stores_state(&actions));
    assert!(actions.iter().any(|action| matches!(
        action,
        ChannelAction::Storage(StorageAction::StoreHtlcInfos { commitment_number: 1, .. })
    )));
    let alice = pair.alice.commitments().expect("funded");
    assert!(alice.is_waiting_for_revocation());
    assert!(alice.local_changes.proposed.is_empty());
    assert_eq!(alice.local_changes.signed.len(), 1);

    let bob_replies = sent(&receive(&mut pair.bob, commit_sig[0].clone()));
    assert!(matches!(bob_replies.as_slice(), [Messages::RevokeAndAck(_), Messages::CommitSig(_)]));

    assert!(sent(&receive(&mut pair.alice, bob_replies[0].clone())).is_empty());
    let alice = pair.alice.commitments().expect("funded");
    assert!(matches!(alice.remote_next_commit_info, RemoteNextCommitInfo::NextPoint(_)));
    assert!(alice.local_changes.signed.is_empty());
    assert_eq!(alice.local_changes.acked.len(), 1);
    assert_eq!(alice.remote_commit.index, 1);

    let alice_replies = sent(&receive(&mut pair.alice, bob_replies[1].clone()));
    assert!(matches!(alice_replies.as_slice(), [Messages::RevokeAndAck(_)]));
    let alice = pair.alice.commitments().expect("funded");
    assert!(alice.local_changes.acked.is_empty());
    assert_eq!(alice.local_commit.index, 1);
    assert!(alice.local_commit.spec.find_htlc(Direction::Offered, id).is_some());

    let bob_actions = receive(&mut pair.bob, alice_replies[0].clone());
    assert!(bob_actions
        .iter()
        .any(|action| matches!(action, ChannelAction::ProcessIncomingHtlc(add) if add.id == id)));
    let bob = pair.bob.commitments().expect("funded");
    assert!(!bob.local_has_changes());
    assert!(!bob.remote_has_changes());
    assert!(!bob.is_waiting_for_revocation());
}

#[test]
fn nothing_to_sign() {
    let mut pair = normal_pair();
    let before = pair.alice.state.clone();
    assert!(command(&mut pair.alice, Command::Sign).is_empty());
    assert_eq!(pair.alice.state, before);

    // a second signature waits for the revocation of the first one
    pair.alice_adds(10_000_000, preimage(1));
    command(&mut pair.alice, Command::Sign);
    pair.alice_adds(10_000_000, preimage(2));
    let before = pair.alice.state.clone();
    assert!(command(&mut pair.alice, Command::Sign).is_empty());
    assert_eq!(pair.alice.state, before);
}

#[test]
fn settling_unknown_htlc() {
    let mut pair = normal_pair();
    let channel_id = pair.bob.channel_id().expect("channel id");
    let before = pair.bob.state.clone();

    let fulfill = fulfill_cmd(42, preimage(1));
    let actions = command(&mut pair.bob, fulfill.clone());
    assert_eq!(
        not_executed(&actions),
        not_executed_with(ChannelError::UnknownHtlcId(channel_id, 42), fulfill)
    );
    assert_eq!(pair.bob.state, before);

    let fail = CmdFailHtlc { id: 42, reason: vec![0u8; 16] };
    let actions = command(&mut pair.bob, fail.clone());
    assert_eq!(
        not_executed(&actions),
        not_executed_with(ChannelError::UnknownHtlcId(channel_id, 42), fail)
    );
    assert_eq!(pair.bob.state, before);

    // HTLC which is not cross-signed yet can't be settled either
    let id = pair.alice_adds(10_000_000, preimage(1));
    let before = pair.bob.state.clone();
    let fulfill = fulfill_cmd(id, preimage(1));
    let actions = command(&mut pair.bob, fulfill.clone());
    assert_eq!(
        not_executed(&actions),
        not_executed_with(ChannelError::UnknownHtlcId(channel_id, id), fulfill)
    );
    assert_eq!(pair.bob.state, before);
}

#[test]
fn malformed_failure_code() {
    let mut pair = normal_pair();
    let id = pair.alice_adds(10_000_000, preimage(1));
    pair.alice_signs();
    let channel_id = pair.bob.channel_id().expect("channel id");
    let before = pair.bob.state.clone();

    let cmd = CmdFailMalformedHtlc {
        id,
        sha256_of_onion: sha256::Hash::hash(b"onion"),
        failure_code: 0x1234,
    };
    let actions = command(&mut pair.bob, cmd.clone());
    assert_eq!(
        not_executed(&actions),
        not_executed_with(ChannelError::InvalidFailureCode(channel_id, 0x1234), cmd)
    );
    assert_eq!(pair.bob.state, before);

    let cmd = CmdFailMalformedHtlc {
        id,
        sha256_of_onion: sha256::Hash::hash(b"onion"),
        failure_code: 0x8000 | 0x4000 | 5,
    };
    let actions = command(&mut pair.bob, cmd);
    assert!(matches!(sent(&actions).as_slice(), [Messages::UpdateFailMalformedHtlc(_)]));
    receive(&mut pair.alice, sent(&actions).remove(0));
    let (alice_actions, _) = pair.bob_signs();
    assert!(alice_actions.iter().any(|action| matches!(
        action,
        ChannelAction::ProcessCmdRes(CmdResult::AddSettledFail {
            failure: HtlcFailure::RemoteFailMalformed(_),
            ..
        })
    )));
}

#[test]
fn add_htlc_checks() {
    let mut pair = normal_pair();
    let channel_id = pair.alice.channel_id().expect("channel id");
    let before = pair.alice.state.clone();

    let cmd = add_cmd(10_000_000, preimage(1), START_HEIGHT);
    let actions = command(&mut pair.alice, cmd.clone());
    let error =
        ChannelError::ExpiryTooSmall { channel_id, actual: START_HEIGHT, block_height: START_HEIGHT };
    assert_eq!(not_executed(&actions), not_executed_with(error, cmd));

    let cmd = add_cmd(10_000_000, preimage(1), START_HEIGHT + 2017);
    let actions = command(&mut pair.alice, cmd.clone());
    let error = ChannelError::ExpiryTooBig {
        channel_id,
        maximum: START_HEIGHT + 2016,
        actual: START_HEIGHT + 2017,
    };
    assert_eq!(not_executed(&actions), not_executed_with(error, cmd));

    let cmd = add_cmd(999, preimage(1), START_HEIGHT + 144);
    let actions = command(&mut pair.alice, cmd.clone());
    let error = ChannelError::HtlcValueTooSmall { channel_id, minimum: 1_000, actual: 999 };
    assert_eq!(not_executed(&actions), not_executed_with(error, cmd));

    let cmd = add_cmd(FUNDING_SAT * 1000, preimage(1), START_HEIGHT + 144);
    let actions = command(&mut pair.alice, cmd);
    assert!(matches!(not_executed(&actions).as_slice(), [CmdResult::NotExecuted {
        error: ChannelError::InsufficientFunds { .. },
        ..
    }]));
    assert_eq!(pair.alice.state, before);
}

#[test]
fn incoming_htlc_expiry_is_checked() {
    let mut pair = normal_pair();
    let channel_id = pair.bob.channel_id().expect("channel id");
    let commit_tx = pair.bob.commitments().expect("funded").signed_local_commit_tx();
    step(&mut pair.bob, ChannelEvent::NewBlock(START_HEIGHT + 200));

    let actions = command(&mut pair.alice, add_cmd(10_000_000, preimage(1), START_HEIGHT + 144));
    let add = sent(&actions).remove(0);
    let actions = receive(&mut pair.bob, add);
    assert!(sends_error(&actions));
    assert!(published(&actions).contains(&commit_tx));
    match &pair.bob.state {
        ChannelState::Closing(closing) => {
            assert!(!closing.commitments.remote_has_changes());
            assert!(closing.local_commit_published.is_some());
        }
        state => panic!("bob is in {}", state),
    }
    let error = ChannelError::ExpiryTooSmall {
        channel_id,
        actual: START_HEIGHT + 144,
        block_height: START_HEIGHT + 200,
    };
    assert!(sent(&actions).iter().any(|msg| matches!(
        msg,
        Messages::Error(err) if err.message == error.to_string()
    )));
}

#[test]
fn commitment_with_htlcs_in_both_directions() {
    let mut pair = normal_pair();
    let alice_id = pair.alice_adds(50_000_000, preimage(1));
    let bob_id = pair.bob_adds(50_000_000, preimage(2));
    let (alice_actions, bob_actions) = pair.alice_signs();

    assert!(alice_actions
        .iter()
        .any(|action| matches!(action, ChannelAction::ProcessIncomingHtlc(add) if add.id == bob_id)));
    assert!(bob_actions
        .iter()
        .any(|action| matches!(action, ChannelAction::ProcessIncomingHtlc(add) if add.id == alice_id)));

    for channel in [&pair.alice, &pair.bob] {
        let commitments = channel.commitments().expect("funded");
        assert_eq!(commitments.local_commit.spec.htlcs.len(), 2);
        assert_eq!(commitments.remote_commit.spec.htlcs.len(), 2);
        // two main outputs, two anchors and two HTLCs
        assert_eq!(commitments.local_commit.commit_tx.tx.output.len(), 6);
        assert_eq!(commitments.local_commit.htlc_txs_and_sigs.len(), 2);
        assert!(!commitments.local_has_changes());
        assert!(!commitments.remote_has_changes());
    }
}

#[test]
fn fulfilled_htlc_is_settled() {
    let mut pair = normal_pair();
    let amount_msat = 30_000_000;
    let id = pair.alice_adds(amount_msat, preimage(3));
    let (_, bob_actions) = pair.alice_signs();
    assert!(bob_actions.iter().any(|action| matches!(action, ChannelAction::ProcessIncomingHtlc(_))));

    let actions = command(&mut pair.bob, fulfill_cmd(id, preimage(3)));
    assert!(matches!(sent(&actions).as_slice(), [Messages::UpdateFulfillHtlc(_)]));
    assert!(receive(&mut pair.alice, sent(&actions).remove(0)).is_empty());

    // fulfilled twice
    let before = pair.bob.state.clone();
    let actions = command(&mut pair.bob, fulfill_cmd(id, preimage(3)));
    assert_eq!(not_executed(&actions).len(), 1);
    assert_eq!(pair.bob.state, before);

    let (alice_actions, _) = pair.bob_signs();
    let settled = alice_actions
        .iter()
        .filter_map(|action| match action {
            ChannelAction::ProcessCmdRes(CmdResult::AddSettledFulfill {
                htlc,
                payment_preimage,
            }) => Some((htlc.id, *payment_preimage)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(settled, vec![(id, preimage(3))]);

    let alice = pair.alice.commitments().expect("funded");
    let bob = pair.bob.commitments().expect("funded");
    assert!(alice.has_no_pending_htlcs());
    assert!(bob.has_no_pending_htlcs());
    assert_eq!(bob.local_commit.spec.to_local_msat, PUSH_MSAT + amount_msat);
    assert_eq!(alice.local_commit.spec.to_remote_msat, PUSH_MSAT + amount_msat);
}

#[test]
fn failed_htlc_is_settled() {
    let mut pair = normal_pair();
    let id = pair.alice_adds(30_000_000, preimage(4));
    pair.alice_signs();

    let actions = command(&mut pair.bob, CmdFailHtlc { id, reason: vec![0xAA; 32] });
    receive(&mut pair.alice, sent(&actions).remove(0));
    let (alice_actions, _) = pair.bob_signs();
    assert!(alice_actions.iter().any(|action| matches!(
        action,
        ChannelAction::ProcessCmdRes(CmdResult::AddSettledFail {
            htlc,
            failure: HtlcFailure::RemoteFail(_),
        }) if htlc.id == id
    )));
    let alice = pair.alice.commitments().expect("funded");
    assert!(alice.has_no_pending_htlcs());
    assert_eq!(alice.local_commit.spec.to_remote_msat, PUSH_MSAT);
}

#[test]
fn fee_update() {
    let mut pair = normal_pair();
    let channel_id = pair.bob.channel_id().expect("channel id");

    let cmd = CmdUpdateFee { feerate_per_kw: 5_000 };
    let actions = command(&mut pair.bob, cmd);
    assert_eq!(
        not_executed(&actions),
        not_executed_with(ChannelError::FundeeCannotSendUpdateFee(channel_id), cmd)
    );

    let actions = command(&mut pair.alice, cmd);
    assert!(matches!(sent(&actions).as_slice(), [Messages::UpdateFee(_)]));
    assert!(receive(&mut pair.bob, sent(&actions).remove(0)).is_empty());
    pair.alice_signs();
    assert_eq!(pair.alice.commitments().expect("funded").local_commit.spec.feerate_per_kw, 5_000);
    assert_eq!(pair.bob.commitments().expect("funded").local_commit.spec.feerate_per_kw, 5_000);
}

#[test]
fn new_block_without_expired_htlcs() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    pair.alice_signs();
    let before = pair.alice.state.clone();

    let (alice, actions) = pair.alice.process_all(vec![
        ChannelEvent::NewBlock(START_HEIGHT + 1),
        ChannelEvent::NewBlock(START_HEIGHT + 143),
    ]);
    assert!(actions.is_empty());
    assert_eq!(alice.state, before);
    assert_eq!(alice.current_tip, START_HEIGHT + 143);
}

#[test]
fn expired_htlc_forces_close() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    pair.alice_signs();
    let commit_tx = pair.alice.commitments().expect("funded").signed_local_commit_tx();

    let actions = step(&mut pair.alice, ChannelEvent::NewBlock(START_HEIGHT + 144));
    assert!(sends_error(&actions));
    assert!(stores_state(&actions));
    assert!(published(&actions).contains(&commit_tx));
    match &pair.alice.state {
        ChannelState::Closing(closing) => {
            let local = closing.local_commit_published.as_ref().expect("local commit");
            assert_eq!(local.commit_tx, commit_tx);
            assert_eq!(local.htlc_timeout_txs.len(), 1);
            assert!(local.htlc_success_txs.is_empty());
            assert!(local.claim_main_delayed_output_tx.is_some());
        }
        state => panic!("alice is in {}", state),
    }

    // bob sees an incoming HTLC only, which never times out for him
    let before = pair.bob.state.clone();
    assert!(step(&mut pair.bob, ChannelEvent::NewBlock(START_HEIGHT + 144)).is_empty());
    assert_eq!(pair.bob.state, before);
}

#[test]
fn reconnection_restores_normal_state() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    pair.alice_signs();
    let unsigned = pair.alice_adds(20_000_000, preimage(2));

    let actions = step(&mut pair.alice, ChannelEvent::Disconnected);
    assert!(actions.iter().any(|action| matches!(
        action,
        ChannelAction::ProcessCmdRes(CmdResult::AddSettledFail {
            htlc,
            failure: HtlcFailure::Disconnected,
        }) if htlc.id == unsigned
    )));
    assert!(step(&mut pair.bob, ChannelEvent::Disconnected).is_empty());
    assert!(matches!(pair.alice.state, ChannelState::Offline(_)));
    assert!(matches!(pair.bob.state, ChannelState::Offline(_)));

    // offline channel postpones signing and rejects updates
    assert!(command(&mut pair.alice, Command::Sign).is_empty());
    let actions = command(&mut pair.alice, add_cmd(10_000, preimage(5), START_HEIGHT + 144));
    assert_eq!(not_executed(&actions).len(), 1);

    let alice_reestablish = step(&mut pair.alice, ChannelEvent::Connected);
    let bob_reestablish = step(&mut pair.bob, ChannelEvent::Connected);
    assert!(matches!(pair.alice.state, ChannelState::Syncing(_)));
    assert!(matches!(sent(&alice_reestablish).as_slice(), [Messages::ChannelReestablish(_)]));
    exchange(&mut pair.alice, &mut pair.bob, alice_reestablish);
    exchange(&mut pair.bob, &mut pair.alice, bob_reestablish);

    assert!(matches!(pair.alice.state, ChannelState::Normal(_)), "alice is in {}", pair.alice.state);
    assert!(matches!(pair.bob.state, ChannelState::Normal(_)), "bob is in {}", pair.bob.state);
    let alice = pair.alice.commitments().expect("funded");
    let bob = pair.bob.commitments().expect("funded");
    assert!(alice.local_changes.proposed.is_empty());
    assert!(bob.remote_changes.proposed.is_empty());
    assert_eq!(alice.local_commit.index, bob.remote_commit.index);
    assert_eq!(alice.remote_commit.index, bob.local_commit.index);

    // channel is usable again
    pair.alice_adds(20_000_000, preimage(2));
    pair.alice_signs();
    assert_eq!(pair.bob.commitments().expect("funded").local_commit.spec.htlcs.len(), 2);
}

#[cfg(feature = "serde")]
#[test]
fn persisted_state_restores() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    pair.alice_signs();

    let stored = serde_json::to_string(&pair.alice.state).expect("serializable state");
    let saved: ChannelState = serde_json::from_str(&stored).expect("deserializable state");
    assert_eq!(saved, pair.alice.state);

    let mut restored = new_channel(2);
    let actions = step(&mut restored, ChannelEvent::Restore(Box::new(saved)));
    assert!(sent(&actions).is_empty());
    match &restored.state {
        ChannelState::Offline(inner) => assert_eq!(**inner, pair.alice.state),
        state => panic!("restored channel is in {}", state),
    }
}
