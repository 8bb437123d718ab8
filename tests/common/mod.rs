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

//! Two channel instances of alice (funder) and bob (fundee) talking to each
//! other through the effects they produce

#![allow(dead_code)]

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Network, OutPoint, Script, Transaction, TxIn, TxOut, Txid, Witness};
use lnp_channel::channel::{
    BlockchainAction, Channel, ChannelAction, ChannelEvent, ChannelId, ChannelState, CmdAddHtlc,
    CmdFulfillHtlc, CmdResult, Command, InitFundee, InitFunder, LocalKeyset, Messages,
    OnChainFeerates, StaticParams, StorageAction, WatchEvent, WatchTag,
};
use lnp_channel::{Config, SECP256K1};

pub const FUNDING_SAT: u64 = 1_000_000;
pub const PUSH_MSAT: u64 = 200_000_000;
pub const FEERATE_PER_KW: u32 = 2500;
pub const START_HEIGHT: u32 = 400_000;
pub const TEMPORARY_CHANNEL_ID: [u8; 32] = [0x42; 32];

pub fn init_logger() { let _ = env_logger::builder().is_test(true).try_init(); }

pub fn config() -> Config { Config { network: Network::Regtest, ..Config::default() } }

pub fn keys(seed: u8) -> LocalKeyset {
    LocalKeyset::with_seed(&[seed; 32], 0).expect("valid channel keys")
}

pub fn node_id(seed: u8) -> PublicKey {
    PublicKey::from_secret_key(&*SECP256K1, &keys(seed).funding_secret)
}

/// Closing script of the party with the given seed
pub fn final_script(seed: u8) -> Script {
    let pubkey = bitcoin::PublicKey::new(node_id(seed));
    Script::new_v0_p2wpkh(&pubkey.wpubkey_hash().expect("compressed key"))
}

pub fn new_channel(remote_seed: u8) -> Channel {
    let static_params = StaticParams { config: config(), remote_node_id: node_id(remote_seed) };
    Channel::new(static_params, START_HEIGHT, OnChainFeerates::default())
}

pub fn init_funder() -> InitFunder {
    let config = config();
    InitFunder {
        temporary_channel_id: ChannelId::from(TEMPORARY_CHANNEL_ID),
        funding_sat: FUNDING_SAT,
        push_msat: PUSH_MSAT,
        initial_feerate_per_kw: FEERATE_PER_KW,
        funding_tx_feerate_per_kw: FEERATE_PER_KW,
        local_params: config.local_params(node_id(1), keys(1), true, FUNDING_SAT, final_script(1)),
        channel_flags: 1,
    }
}

pub fn init_fundee() -> InitFundee {
    InitFundee {
        temporary_channel_id: ChannelId::from(TEMPORARY_CHANNEL_ID),
        local_params: config().local_params(node_id(2), keys(2), false, FUNDING_SAT, final_script(2)),
    }
}

/// Applies event to the channel, returning the requested effects
pub fn step(channel: &mut Channel, event: ChannelEvent) -> Vec<ChannelAction> {
    let (next, actions) = channel.process(event);
    *channel = next;
    actions
}

pub fn command(channel: &mut Channel, cmd: impl Into<Command>) -> Vec<ChannelAction> {
    step(channel, ChannelEvent::ExecuteCommand(cmd.into()))
}

pub fn receive(channel: &mut Channel, msg: impl Into<Messages>) -> Vec<ChannelAction> {
    step(channel, ChannelEvent::MessageReceived(msg.into()))
}

pub fn sent(actions: &[ChannelAction]) -> Vec<Messages> {
    actions.iter().filter_map(ChannelAction::message).cloned().collect()
}

pub fn published(actions: &[ChannelAction]) -> Vec<Transaction> {
    actions.iter().filter_map(ChannelAction::published_tx).cloned().collect()
}

pub fn stores_state(actions: &[ChannelAction]) -> bool {
    actions
        .iter()
        .any(|action| matches!(action, ChannelAction::Storage(StorageAction::StoreState(_))))
}

pub fn sends_error(actions: &[ChannelAction]) -> bool {
    sent(actions).iter().any(|msg| matches!(msg, Messages::Error(_)))
}

pub fn not_executed(actions: &[ChannelAction]) -> Vec<CmdResult> {
    actions
        .iter()
        .filter_map(|action| match action {
            ChannelAction::ProcessCmdRes(res @ CmdResult::NotExecuted { .. }) => Some(res.clone()),
            _ => None,
        })
        .collect()
}

/// Delivers messages from `from` to `to` and back until both parties have
/// nothing more to say. Returns effects produced by each party.
pub fn exchange(
    from: &mut Channel,
    to: &mut Channel,
    actions: Vec<ChannelAction>,
) -> (Vec<ChannelAction>, Vec<ChannelAction>) {
    let mut from_actions = actions;
    let mut to_actions = vec![];
    let mut pending = sent(&from_actions);
    let mut towards_to = true;
    let mut rounds = 0;
    while !pending.is_empty() {
        rounds += 1;
        assert!(rounds < 100, "message exchange does not terminate");
        let (receiver, log) =
            if towards_to { (&mut *to, &mut to_actions) } else { (&mut *from, &mut from_actions) };
        let mut replies = vec![];
        for msg in pending {
            let actions = receive(receiver, msg);
            replies.extend(sent(&actions));
            log.extend(actions);
        }
        pending = replies;
        towards_to = !towards_to;
    }
    (from_actions, to_actions)
}

/// Transaction paying the channel funding amount to the given script; its
/// input is irrelevant for the channel
pub fn funding_tx(script_pubkey: Script, amount_sat: u64) -> Transaction {
    Transaction {
        version: 2,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::hash(b"wallet utxo"), 0),
            script_sig: Script::new(),
            sequence: 0xFFFF_FFFF,
            witness: Witness::new(),
        }],
        output: vec![TxOut { value: amount_sat, script_pubkey }],
    }
}

pub fn depth_ok(funding_tx: &Transaction) -> ChannelEvent {
    ChannelEvent::WatchReceived(WatchEvent::Confirmed {
        tag: WatchTag::FundingDepthOk,
        tx: funding_tx.clone(),
        block_height: START_HEIGHT + 3,
        tx_index: 1,
    })
}

pub fn funding_spent(tx: Transaction) -> ChannelEvent {
    ChannelEvent::WatchReceived(WatchEvent::Spent { tag: WatchTag::FundingSpent, tx })
}

pub fn confirmed(tx: &Transaction) -> ChannelEvent {
    ChannelEvent::WatchReceived(WatchEvent::Confirmed {
        tag: WatchTag::TxConfirmed,
        tx: tx.clone(),
        block_height: START_HEIGHT + 10,
        tx_index: 0,
    })
}

/// Alice and bob after both sent `open_channel`/`accept_channel`; alice waits
/// for her wallet to build the funding transaction
pub struct Opening {
    pub alice: Channel,
    pub bob: Channel,
    pub make_funding_tx: BlockchainAction,
}

pub fn opening() -> Opening {
    init_logger();
    let mut alice = new_channel(2);
    let mut bob = new_channel(1);
    let open = step(&mut alice, ChannelEvent::InitFunder(init_funder()));
    assert!(step(&mut bob, ChannelEvent::InitFundee(init_fundee())).is_empty());
    let (alice_actions, _) = exchange(&mut alice, &mut bob, open);
    let make_funding_tx = alice_actions
        .into_iter()
        .find_map(|action| match action {
            ChannelAction::Blockchain(action @ BlockchainAction::MakeFundingTx { .. }) => {
                Some(action)
            }
            _ => None,
        })
        .expect("funding transaction request");
    Opening { alice, bob, make_funding_tx }
}

impl Opening {
    /// Builds funding transaction as the wallet would; alice sends
    /// `funding_created`
    pub fn fund(&mut self) -> (Transaction, Vec<ChannelAction>) {
        let tx = match &self.make_funding_tx {
            BlockchainAction::MakeFundingTx { script_pubkey, amount_sat, .. } => {
                funding_tx(script_pubkey.clone(), *amount_sat)
            }
            _ => unreachable!(),
        };
        let actions = step(&mut self.alice, ChannelEvent::MakeFundingTxResponse {
            funding_tx: tx.clone(),
            output_index: 0,
            fee_sat: 1_000,
        });
        (tx, actions)
    }
}

/// Channel in `NORMAL` state on both sides
pub struct Pair {
    pub alice: Channel,
    pub bob: Channel,
    pub funding_tx: Transaction,
}

pub fn normal_pair() -> Pair {
    let mut opening = opening();
    let (funding_tx, actions) = opening.fund();
    let (alice, bob) = (&mut opening.alice, &mut opening.bob);
    exchange(alice, bob, actions);
    assert!(matches!(alice.state, ChannelState::WaitForFundingConfirmed(_)));
    assert!(matches!(bob.state, ChannelState::WaitForFundingConfirmed(_)));

    let alice_locked = step(alice, depth_ok(&funding_tx));
    let bob_locked = step(bob, depth_ok(&funding_tx));
    assert!(matches!(bob.state, ChannelState::WaitForFundingLocked(_)));
    exchange(alice, bob, alice_locked);
    exchange(bob, alice, bob_locked);
    assert!(matches!(alice.state, ChannelState::Normal(_)), "alice is in {}", alice.state);
    assert!(matches!(bob.state, ChannelState::Normal(_)), "bob is in {}", bob.state);
    Pair { alice: opening.alice, bob: opening.bob, funding_tx }
}

pub fn preimage(n: u8) -> [u8; 32] { [n; 32] }

pub fn add_cmd(amount_msat: u64, preimage: [u8; 32], cltv_expiry: u32) -> CmdAddHtlc {
    CmdAddHtlc {
        amount_msat,
        payment_hash: sha256::Hash::hash(&preimage),
        cltv_expiry,
        onion_routing_packet: vec![0u8; 32],
    }
}

pub fn fulfill_cmd(id: u64, preimage: [u8; 32]) -> CmdFulfillHtlc {
    CmdFulfillHtlc { id, payment_preimage: preimage }
}

impl Pair {
    /// Offers HTLC from alice to bob without signing it; returns its id
    pub fn alice_adds(&mut self, amount_msat: u64, preimage: [u8; 32]) -> u64 {
        let cmd = add_cmd(amount_msat, preimage, START_HEIGHT + 144);
        add(&mut self.alice, &mut self.bob, cmd)
    }

    pub fn bob_adds(&mut self, amount_msat: u64, preimage: [u8; 32]) -> u64 {
        let cmd = add_cmd(amount_msat, preimage, START_HEIGHT + 144);
        add(&mut self.bob, &mut self.alice, cmd)
    }

    /// Alice signs and both parties exchange signatures and revocations
    /// until nothing is left to sign
    pub fn alice_signs(&mut self) -> (Vec<ChannelAction>, Vec<ChannelAction>) {
        let actions = command(&mut self.alice, Command::Sign);
        exchange(&mut self.alice, &mut self.bob, actions)
    }

    /// Bob signs and both parties cross-sign until nothing is left; effects
    /// are returned as (alice, bob)
    pub fn bob_signs(&mut self) -> (Vec<ChannelAction>, Vec<ChannelAction>) {
        let actions = command(&mut self.bob, Command::Sign);
        let (bob, alice) = exchange(&mut self.bob, &mut self.alice, actions);
        (alice, bob)
    }
}

/// Offers HTLC and delivers `update_add_htlc` to the peer
pub fn add(from: &mut Channel, to: &mut Channel, cmd: CmdAddHtlc) -> u64 {
    let actions = command(from, cmd);
    let msgs = sent(&actions);
    let id = match msgs.as_slice() {
        [Messages::UpdateAddHtlc(add)] => add.id,
        _ => panic!("unexpected effects of add command: {:?}", actions),
    };
    for msg in msgs {
        assert!(receive(to, msg).is_empty());
    }
    id
}
