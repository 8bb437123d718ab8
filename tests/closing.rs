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

use bitcoin::{OutPoint, Script, Transaction};
use common::*;
use lnp_channel::channel::transactions::ClaimTx;
use lnp_channel::channel::{
    ChannelAction, ChannelError, ChannelEvent, ChannelState, Closing, CmdResult, Command,
    Messages, StorageAction, Watch, WatchTag,
};

fn closing_of(channel: &lnp_channel::channel::Channel) -> &Closing {
    match &channel.state {
        ChannelState::Closing(closing) => closing,
        state => panic!("channel is in {}", state),
    }
}

fn spending_funding(funding: &Transaction) -> Transaction {
    let mut tx = funding_tx(Script::new(), 990_000);
    tx.input[0].previous_output = OutPoint::new(funding.txid(), 0);
    tx
}

#[test]
fn local_force_close() {
    let mut pair = normal_pair();
    let commit_tx = pair.alice.commitments().expect("funded").signed_local_commit_tx();

    let actions = command(&mut pair.alice, Command::ForceClose);
    match actions.first().and_then(ChannelAction::message) {
        Some(Messages::Error(err)) => assert_eq!(err.message, "forced local commitment"),
        _ => panic!("force close must notify the peer first: {:?}", actions),
    }
    assert!(stores_state(&actions));
    let txs = published(&actions);
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0], commit_tx);

    let local = closing_of(&pair.alice).local_commit_published.clone().expect("local commit");
    assert_eq!(local.commit_tx, commit_tx);
    let claim_main = local.claim_main_delayed_output_tx.expect("main output claim").tx;
    assert_eq!(claim_main.input[0].previous_output.txid, commit_tx.txid());
    assert_eq!(txs[1], claim_main);

    let channel_id = pair.alice.channel_id().expect("channel id");
    let actions = command(&mut pair.alice, Command::ForceClose);
    assert_eq!(not_executed(&actions), vec![CmdResult::NotExecuted {
        command: Command::ForceClose,
        error: ChannelError::ClosingAlreadyInProgress(channel_id),
    }]);

    // the funding spend reported by the watcher is our own commitment
    let before = pair.alice.state.clone();
    assert!(step(&mut pair.alice, funding_spent(commit_tx.clone())).is_empty());
    assert_eq!(pair.alice.state, before);

    let actions = step(&mut pair.alice, confirmed(&commit_tx));
    assert!(stores_state(&actions));
    assert!(matches!(pair.alice.state, ChannelState::Closing(_)));
    let actions = step(&mut pair.alice, confirmed(&claim_main));
    assert!(stores_state(&actions));
    let state = &pair.alice.state;
    assert!(matches!(state, ChannelState::Closed(_)), "alice is in {}", state);

    // the peer learns about the closing from the blockchain
    let actions = step(&mut pair.bob, funding_spent(commit_tx));
    assert!(stores_state(&actions));
    let remote = closing_of(&pair.bob).remote_commit_published.as_ref().expect("remote commit");
    assert!(remote.claim_main_output_tx.is_some());
    assert!(remote.claim_htlc_success_txs.is_empty());
    assert!(remote.claim_htlc_timeout_txs.is_empty());
}

#[test]
fn remote_publishes_current_commitment() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    pair.alice_signs();
    let bob_commit = pair.bob.commitments().expect("funded").signed_local_commit_tx();
    assert_eq!(pair.alice.commitments().expect("funded").remote_commit.txid, bob_commit.txid());

    let actions = step(&mut pair.alice, funding_spent(bob_commit.clone()));
    assert!(stores_state(&actions));
    let closing = closing_of(&pair.alice);
    assert!(closing.next_remote_commit_published.is_none());
    let remote = closing.remote_commit_published.as_ref().expect("remote commit");
    assert_eq!(remote.commit_tx, bob_commit);
    assert!(remote.claim_main_output_tx.is_some());
    assert_eq!(remote.claim_htlc_timeout_txs.len(), 1);
    assert!(remote.claim_htlc_success_txs.is_empty());
    let txs = published(&actions);
    assert_eq!(txs.len(), 2);
    assert!(txs.iter().all(|tx| tx.input[0].previous_output.txid == bob_commit.txid()));
}

#[test]
fn remote_commitment_with_htlcs_in_both_directions() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    let bob_id = pair.bob_adds(30_000_000, preimage(2));
    pair.alice_signs();
    // alice learns the preimage of bob's HTLC, but bob never signs it away
    let actions = command(&mut pair.alice, fulfill_cmd(bob_id, preimage(2)));
    assert!(matches!(sent(&actions).as_slice(), [Messages::UpdateFulfillHtlc(_)]));

    let bob_commit = pair.bob.commitments().expect("funded").signed_local_commit_tx();
    // two main outputs, two anchors and two HTLCs
    assert_eq!(bob_commit.output.len(), 6);
    let actions = step(&mut pair.alice, funding_spent(bob_commit.clone()));
    assert!(stores_state(&actions));

    let remote = closing_of(&pair.alice).remote_commit_published.clone().expect("remote commit");
    assert_eq!(remote.commit_tx, bob_commit);
    let claimed_value = |claims: &[ClaimTx]| {
        claims
            .iter()
            .map(|claim| bob_commit.output[claim.tx.input[0].previous_output.vout as usize].value)
            .collect::<Vec<_>>()
    };
    assert_eq!(claimed_value(&remote.claim_htlc_success_txs), vec![30_000]);
    assert_eq!(claimed_value(&remote.claim_htlc_timeout_txs), vec![10_000]);
    let claim_main = remote.claim_main_output_tx.clone().expect("main output claim");

    let claims = remote
        .claim_htlc_success_txs
        .iter()
        .chain(&remote.claim_htlc_timeout_txs)
        .chain(Some(&claim_main))
        .collect::<Vec<_>>();
    let txs = published(&actions);
    assert_eq!(txs.len(), claims.len());
    for claim in claims {
        assert!(txs.contains(&claim.tx));
        let outpoint = claim.tx.input[0].previous_output;
        assert_eq!(outpoint.txid, bob_commit.txid());
        let watch = ChannelAction::watch(Watch::Spent { outpoint, tag: WatchTag::OutputSpent });
        assert!(actions.contains(&watch), "claimed {} is not watched", outpoint);
    }
    assert!(actions.contains(&ChannelAction::watch(Watch::Confirmed {
        txid: bob_commit.txid(),
        min_depth: config().min_depth_blocks,
        tag: WatchTag::TxConfirmed,
    })));
}

#[test]
fn remote_publishes_next_commitment() {
    let mut pair = normal_pair();
    pair.alice_adds(10_000_000, preimage(1));
    let commit_sig = sent(&command(&mut pair.alice, Command::Sign));
    assert!(matches!(commit_sig.as_slice(), [Messages::CommitSig(_)]));
    // revocation and signature of bob never reach alice
    receive(&mut pair.bob, commit_sig[0].clone());
    assert_eq!(pair.bob.commitments().expect("funded").local_commit.index, 1);
    let bob_commit = pair.bob.commitments().expect("funded").signed_local_commit_tx();
    let alice = pair.alice.commitments().expect("funded");
    assert!(alice.is_waiting_for_revocation());
    assert_ne!(alice.remote_commit.txid, bob_commit.txid());

    let actions = step(&mut pair.alice, funding_spent(bob_commit.clone()));
    assert!(stores_state(&actions));
    let closing = closing_of(&pair.alice);
    assert!(closing.remote_commit_published.is_none());
    let next = closing.next_remote_commit_published.as_ref().expect("next remote commit");
    assert_eq!(next.commit_tx, bob_commit);
    assert!(next.claim_main_output_tx.is_some());
    assert_eq!(next.claim_htlc_timeout_txs.len(), 1);
    assert!(next.claim_htlc_success_txs.is_empty());
}

#[test]
fn remote_publishes_revoked_commitment() {
    let mut pair = normal_pair();
    let id = pair.alice_adds(10_000_000, preimage(1));
    let (alice_actions, _) = pair.alice_signs();
    let htlc_infos = alice_actions
        .iter()
        .find_map(|action| match action {
            ChannelAction::Storage(StorageAction::StoreHtlcInfos {
                commitment_number: 1,
                htlc_infos,
                ..
            }) => Some(htlc_infos.clone()),
            _ => None,
        })
        .expect("HTLC data of the remote commitment");
    assert_eq!(htlc_infos.len(), 1);
    let revoked_tx = pair.bob.commitments().expect("funded").signed_local_commit_tx();

    // bob moves to the next commitment, revoking the one with the HTLC
    let actions = command(&mut pair.bob, fulfill_cmd(id, preimage(1)));
    receive(&mut pair.alice, sent(&actions).remove(0));
    pair.bob_signs();
    assert_eq!(pair.alice.commitments().expect("funded").remote_commit.index, 2);

    let actions = step(&mut pair.alice, funding_spent(revoked_tx.clone()));
    assert!(stores_state(&actions));
    assert!(sends_error(&actions));
    let get_htlc_infos = StorageAction::GetHtlcInfos {
        revoked_commit_txid: revoked_tx.txid(),
        commitment_number: 1,
    };
    assert!(actions.contains(&ChannelAction::Storage(get_htlc_infos)));

    let closing = closing_of(&pair.alice);
    assert_eq!(closing.revoked_commit_published.len(), 1);
    let revoked = &closing.revoked_commit_published[0];
    assert_eq!(revoked.commitment_number, 1);
    assert!(revoked.main_penalty_tx.is_some());
    assert!(revoked.claim_main_output_tx.is_some());
    assert!(revoked.htlc_penalty_txs.is_empty());
    let main_penalty = revoked.main_penalty_tx.clone().expect("main penalty").tx;
    assert!(published(&actions).contains(&main_penalty));

    let actions = step(&mut pair.alice, ChannelEvent::GetHtlcInfosResponse {
        revoked_commit_txid: revoked_tx.txid(),
        htlc_infos,
    });
    assert!(stores_state(&actions));
    let revoked = &closing_of(&pair.alice).revoked_commit_published[0];
    assert_eq!(revoked.htlc_penalty_txs.len(), 1);
    assert_eq!(published(&actions), vec![revoked.htlc_penalty_txs[0].tx.clone()]);

    // the same spend reported twice changes nothing
    let before = pair.alice.state.clone();
    assert!(step(&mut pair.alice, funding_spent(revoked_tx)).is_empty());
    assert_eq!(pair.alice.state, before);
}

#[test]
fn unknown_funding_spend() {
    let mut pair = normal_pair();
    let tx = spending_funding(&pair.funding_tx);
    let actions = step(&mut pair.alice, funding_spent(tx));
    assert!(matches!(pair.alice.state, ChannelState::ErrorInformationLeak(_)));
    assert!(sends_error(&actions));
    assert!(stores_state(&actions));
    assert!(published(&actions).is_empty());

    let actions = command(&mut pair.alice, Command::ForceClose);
    assert_eq!(not_executed(&actions).len(), 1);
    assert!(published(&actions).is_empty());
}

#[test]
fn peer_error_forces_close() {
    let mut pair = normal_pair();
    let channel_id = pair.bob.channel_id().expect("channel id");
    let error = lnp_channel::channel::messages::Error::with(channel_id, "internal error");
    let actions = receive(&mut pair.bob, error);
    assert!(!sends_error(&actions));
    let local = closing_of(&pair.bob).local_commit_published.as_ref().expect("local commit");
    assert!(published(&actions).contains(&local.commit_tx));
}

#[test]
fn restored_closing_channel_republishes() {
    let mut pair = normal_pair();
    command(&mut pair.alice, Command::ForceClose);
    let saved = pair.alice.state.clone();
    let expected = closing_of(&pair.alice).local_commit_published.clone().expect("local commit");

    let mut restored = new_channel(2);
    let actions = step(&mut restored, ChannelEvent::Restore(Box::new(saved.clone())));
    assert_eq!(restored.state, saved);
    let txs = published(&actions);
    assert!(txs.contains(&expected.commit_tx));
    assert!(sent(&actions).is_empty());
}
