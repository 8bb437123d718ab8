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

//! Funding-source wallet: watches a set of addresses through an electrum
//! server and publishes snapshots of their unspent outputs.

#[cfg(feature = "electrum")]
mod electrum;
mod worker;

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{OutPoint, Transaction, Txid};

#[cfg(feature = "electrum")]
pub use electrum::ElectrumBackend;
pub use worker::{ElectrumApi, MiniWallet};

/// Errors of the funding-source wallet
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
#[non_exhaustive]
pub enum WalletError {
    /// wallet worker thread has terminated
    WorkerTerminated,

    /// unable to start wallet worker thread: {0}
    WorkerStart(String),

    /// address {0} is invalid or belongs to a different network
    InvalidAddress(String),

    /// electrum server error: {0}
    Electrum(String),
}

/// Unspent output reported by the electrum server for one of the watched
/// addresses
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[display("{txid}:{output_index}")]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct UnspentItem {
    pub txid: Txid,
    pub output_index: u32,
    pub value_sat: u64,
    /// Zero for unconfirmed outputs
    pub block_height: u32,
}

impl UnspentItem {
    #[inline]
    pub fn outpoint(&self) -> OutPoint { OutPoint::new(self.txid, self.output_index) }
}

/// Spendable output together with the transaction which created it
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Utxo {
    pub previous_tx: Transaction,
    pub output_index: u32,
    pub block_height: u32,
}

impl Utxo {
    #[inline]
    pub fn outpoint(&self) -> OutPoint { OutPoint::new(self.previous_tx.txid(), self.output_index) }

    pub fn amount_sat(&self) -> u64 {
        self.previous_tx.output.get(self.output_index as usize).map(|out| out.value).unwrap_or(0)
    }
}

/// Wallet snapshot. Electrum reports parent transactions separately from the
/// outpoints, so a snapshot may reference transactions it does not know yet.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct WalletState {
    pub addresses: BTreeMap<String, Vec<UnspentItem>>,
    pub parent_txs: BTreeMap<Txid, Transaction>,
}

impl WalletState {
    /// Checks that parent transactions are known for every unspent output
    pub fn consistent(&self) -> bool {
        self.unspent_items().all(|item| self.parent_txs.contains_key(&item.txid))
    }

    fn unspent_items(&self) -> impl Iterator<Item = &UnspentItem> {
        self.addresses.values().flatten()
    }

    /// Outputs with known parent transactions
    pub fn utxos(&self) -> Vec<Utxo> {
        self.unspent_items()
            .filter_map(|item| {
                self.parent_txs.get(&item.txid).map(|tx| Utxo {
                    previous_tx: tx.clone(),
                    output_index: item.output_index,
                    block_height: item.block_height,
                })
            })
            .collect()
    }

    pub fn total_balance(&self) -> u64 { balance(&self.utxos()) }

    /// Removes outputs already reserved by other funding attempts
    pub fn without_reserved_utxos(&self, reserved: &BTreeSet<OutPoint>) -> WalletState {
        let addresses = self
            .addresses
            .iter()
            .map(|(address, items)| {
                let items = items
                    .iter()
                    .filter(|item| !reserved.contains(&item.outpoint()))
                    .copied()
                    .collect();
                (address.clone(), items)
            })
            .collect();
        WalletState { addresses, parent_txs: self.parent_txs.clone() }
    }

    /// Splits outputs by their confirmation depth. Outputs are deeply confirmed
    /// once they have at least `min_confirmations` blocks on top of the block
    /// including them, one more than the peer requires.
    pub fn with_confirmations(
        &self,
        current_height: u32,
        min_confirmations: u32,
    ) -> WalletWithConfirmations {
        let mut tiers = WalletWithConfirmations::default();
        for utxo in self.utxos() {
            if utxo.block_height == 0 {
                tiers.unconfirmed.push(utxo)
            } else if utxo.block_height + min_confirmations > current_height {
                tiers.weakly_confirmed.push(utxo)
            } else {
                tiers.deeply_confirmed.push(utxo)
            }
        }
        tiers
    }
}

/// Wallet outputs split into confirmation tiers
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct WalletWithConfirmations {
    /// Must not be used yet
    pub unconfirmed: Vec<Utxo>,
    /// Confirmed, but not deep enough for channel funding
    pub weakly_confirmed: Vec<Utxo>,
    /// Usable for channel funding
    pub deeply_confirmed: Vec<Utxo>,
}

impl WalletWithConfirmations {
    pub fn all(&self) -> Vec<Utxo> {
        self.unconfirmed
            .iter()
            .chain(&self.weakly_confirmed)
            .chain(&self.deeply_confirmed)
            .cloned()
            .collect()
    }
}

/// Sum of output amounts, in satoshis
pub fn balance(utxos: &[Utxo]) -> u64 { utxos.iter().map(Utxo::amount_sat).sum() }

#[cfg(test)]
pub(crate) mod test {
    use bitcoin::{Script, TxOut};

    use super::*;

    pub(crate) fn parent_tx(marker: u32, values: &[u64]) -> Transaction {
        Transaction {
            version: 2,
            lock_time: marker,
            input: vec![],
            output: values
                .iter()
                .map(|value| TxOut { value: *value, script_pubkey: Script::new() })
                .collect(),
        }
    }

    fn item(tx: &Transaction, output_index: u32, block_height: u32) -> UnspentItem {
        UnspentItem {
            txid: tx.txid(),
            output_index,
            value_sat: tx.output[output_index as usize].value,
            block_height,
        }
    }

    fn wallet() -> (WalletState, Vec<Transaction>) {
        let txs =
            vec![parent_tx(1, &[10_000, 20_000]), parent_tx(2, &[30_000]), parent_tx(3, &[40_000])];
        let addresses = bmap! {
            s!("addr1") => vec![item(&txs[0], 0, 0), item(&txs[0], 1, 100)],
            s!("addr2") => vec![item(&txs[1], 0, 103), item(&txs[2], 0, 107)]
        };
        let parent_txs = txs.iter().map(|tx| (tx.txid(), tx.clone())).collect();
        (WalletState { addresses, parent_txs }, txs)
    }

    #[test]
    fn balance_and_consistency() {
        let (mut wallet, txs) = wallet();
        assert!(wallet.consistent());
        assert_eq!(wallet.utxos().len(), 4);
        assert_eq!(wallet.total_balance(), 100_000);

        wallet.parent_txs.remove(&txs[2].txid());
        assert!(!wallet.consistent());
        assert_eq!(wallet.utxos().len(), 3);
        assert_eq!(wallet.total_balance(), 60_000);
    }

    #[test]
    fn confirmation_tiers() {
        let (wallet, _) = wallet();
        let tiers = wallet.with_confirmations(108, 6);
        assert_eq!(balance(&tiers.unconfirmed), 10_000);
        assert_eq!(balance(&tiers.weakly_confirmed), 70_000);
        assert_eq!(balance(&tiers.deeply_confirmed), 20_000);
        assert_eq!(tiers.all().len(), 4);

        let tiers = wallet.with_confirmations(120, 6);
        assert!(tiers.weakly_confirmed.is_empty());
        assert_eq!(balance(&tiers.deeply_confirmed), 90_000);
    }

    #[test]
    fn reserved_utxos() {
        let (wallet, txs) = wallet();
        let reserved = bset! { OutPoint::new(txs[0].txid(), 1), OutPoint::new(txs[1].txid(), 0) };
        let available = wallet.without_reserved_utxos(&reserved);
        assert_eq!(available.total_balance(), 50_000);
        assert_eq!(available.addresses.len(), 2);
        assert_eq!(available.parent_txs, wallet.parent_txs);
    }
}
