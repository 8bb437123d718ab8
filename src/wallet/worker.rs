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

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{mpsc, Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitcoin::{Address, Network, Script, Transaction, Txid};

use super::{UnspentItem, WalletError, WalletState};
use crate::constants::WALLET_MAILBOX_CAPACITY;
use crate::LogStyle;

/// Subset of electrum protocol used by the wallet
pub trait ElectrumApi: Send + 'static {
    /// Subscribes to status changes of the script. Returns whether the script
    /// has any history.
    fn subscribe(&self, script: &Script) -> Result<bool, WalletError>;

    /// Checks whether status of a subscribed script has changed since the
    /// last call
    fn poll(&self, script: &Script) -> Result<bool, WalletError>;

    fn list_unspent(&self, script: &Script) -> Result<Vec<UnspentItem>, WalletError>;

    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, WalletError>;
}

enum WalletCmd {
    Connected,
    Notification(Script),
    AddAddress(String, Script),
    Poll,
    Terminate,
}

/// Wallet actor watching a set of addresses. Commands from any number of
/// producers are queued and applied by a single worker thread in arrival
/// order; the worker publishes a new [`WalletState`] snapshot after each of
/// them.
pub struct MiniWallet {
    network: Network,
    state: Arc<RwLock<WalletState>>,
    tx: mpsc::SyncSender<WalletCmd>,
    worker_thread: Option<JoinHandle<()>>,
}

impl MiniWallet {
    /// Starts wallet worker. If `poll_interval` is given, a pacemaker thread
    /// periodically asks the worker to poll the server for status changes.
    pub fn with(
        client: impl ElectrumApi,
        network: Network,
        sender: mpsc::Sender<WalletState>,
        poll_interval: Option<Duration>,
    ) -> Result<Self, WalletError> {
        let state = Arc::new(RwLock::new(WalletState::default()));
        let (tx, rx) = mpsc::sync_channel::<WalletCmd>(WALLET_MAILBOX_CAPACITY);
        let processor =
            WalletProcessor { client, scripts: empty!(), state: state.clone(), sender, rx };
        let worker_thread = thread::Builder::new()
            .name(s!("wallet_worker"))
            .spawn(move || processor.run())
            .map_err(|err| WalletError::WorkerStart(err.to_string()))?;

        if let Some(interval) = poll_interval {
            let sender = tx.clone();
            thread::Builder::new()
                .name(s!("wallet_pacemaker"))
                .spawn(move || loop {
                    thread::sleep(interval);
                    if sender.send(WalletCmd::Poll).is_err() {
                        break;
                    }
                })
                .map_err(|err| WalletError::WorkerStart(err.to_string()))?;
        }

        Ok(MiniWallet { network, state, tx, worker_thread: Some(worker_thread) })
    }

    fn cmd(&self, cmd: WalletCmd) -> Result<(), WalletError> {
        self.tx.send(cmd).map_err(|_| WalletError::WorkerTerminated)
    }

    /// Starts watching the address
    pub fn add_address(&self, address: &str) -> Result<(), WalletError> {
        let script = match Address::from_str(address) {
            Ok(addr) if addr.network == self.network => addr.script_pubkey(),
            _ => return Err(WalletError::InvalidAddress(address.to_owned())),
        };
        self.cmd(WalletCmd::AddAddress(address.to_owned(), script))
    }

    /// Reports (re)established server connection; all addresses get
    /// resubscribed
    #[inline]
    pub fn connected(&self) -> Result<(), WalletError> { self.cmd(WalletCmd::Connected) }

    /// Reports status change notification for a watched script
    #[inline]
    pub fn notify(&self, script: Script) -> Result<(), WalletError> {
        self.cmd(WalletCmd::Notification(script))
    }

    /// Latest published snapshot
    pub fn state(&self) -> WalletState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stops the worker after it processes all queued commands
    pub fn stop(mut self) -> Result<(), WalletError> {
        self.cmd(WalletCmd::Terminate)?;
        if let Some(worker) = self.worker_thread.take() {
            worker.join().map_err(|_| WalletError::WorkerTerminated)?;
        }
        Ok(())
    }
}

impl Drop for MiniWallet {
    fn drop(&mut self) { let _ = self.tx.try_send(WalletCmd::Terminate); }
}

struct WalletProcessor<C: ElectrumApi> {
    client: C,
    scripts: BTreeMap<Script, String>,
    state: Arc<RwLock<WalletState>>,
    sender: mpsc::Sender<WalletState>,
    rx: mpsc::Receiver<WalletCmd>,
}

impl<C: ElectrumApi> WalletProcessor<C> {
    pub fn run(mut self) {
        loop {
            match self.rx.recv() {
                Ok(WalletCmd::Terminate) | Err(_) => break,
                Ok(cmd) => {
                    if let Err(err) = self.process(cmd) {
                        error!("{} {}", "Wallet update failed:".err(), err.err_details());
                    }
                    let snapshot = self.snapshot();
                    if self.sender.send(snapshot).is_err() {
                        debug!("Wallet snapshot receiver is gone");
                    }
                }
            }
        }
        debug!("Wallet worker {}", "terminated".ended());
    }

    fn process(&mut self, cmd: WalletCmd) -> Result<(), WalletError> {
        match cmd {
            WalletCmd::Connected => {
                info!(
                    "Electrum {}; resubscribing {} address(es)",
                    "connected".promo(),
                    self.scripts.len()
                );
                let scripts = self.scripts.keys().cloned().collect::<Vec<_>>();
                for script in scripts {
                    self.subscribe(&script)?;
                }
            }
            WalletCmd::Notification(script) => self.update(&script)?,
            WalletCmd::AddAddress(address, script) => {
                info!("{} address {}", "Watching".promo(), address.addr());
                self.scripts.insert(script.clone(), address);
                self.subscribe(&script)?;
            }
            WalletCmd::Poll => {
                let scripts = self.scripts.keys().cloned().collect::<Vec<_>>();
                for script in scripts {
                    if self.client.poll(&script)? {
                        self.update(&script)?;
                    }
                }
            }
            WalletCmd::Terminate => {}
        }
        Ok(())
    }

    fn subscribe(&mut self, script: &Script) -> Result<(), WalletError> {
        if self.client.subscribe(script)? {
            self.update(script)?;
        }
        Ok(())
    }

    /// Requests unspent outputs of the script together with parent
    /// transactions of the outputs not seen before
    fn update(&mut self, script: &Script) -> Result<(), WalletError> {
        let address = match self.scripts.get(script) {
            Some(address) => address.clone(),
            None => return Ok(()),
        };
        let mut next = self.snapshot();
        let unspents = self.client.list_unspent(script)?;
        let known = next.addresses.get(&address).cloned().unwrap_or_default();
        for item in unspents.iter().filter(|item| !known.contains(item)) {
            if next.parent_txs.contains_key(&item.txid) {
                continue;
            }
            let tx = self.client.get_transaction(&item.txid)?;
            debug!("Received parent transaction {}", item.txid);
            next.parent_txs.insert(item.txid, tx);
        }
        for item in &unspents {
            trace!("Unspent output {} of {} sat", item, item.value_sat.amount());
        }
        next.addresses.insert(address.clone(), unspents);
        info!(
            "Address {} has {} unspent output(s); wallet balance is {} sat",
            address.addr(),
            next.addresses.get(&address).map(Vec::len).unwrap_or_default(),
            next.total_balance().amount()
        );
        match self.state.write() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }

    fn snapshot(&self) -> WalletState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
