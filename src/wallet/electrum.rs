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

use bitcoin::{Script, Transaction, Txid};
use electrum_client::{Client as ElectrumClient, ElectrumApi as _};

use super::{ElectrumApi, UnspentItem, WalletError};

/// Wallet backend connected to an electrum server
pub struct ElectrumBackend {
    client: ElectrumClient,
}

impl ElectrumBackend {
    pub fn connect(electrum_url: &str) -> Result<Self, WalletError> {
        let config = electrum_client::ConfigBuilder::new()
            .timeout(Some(5))
            .map_err(electrum_error)?
            .build();
        let client = ElectrumClient::from_config(electrum_url, config).map_err(electrum_error)?;
        info!("Connected to electrum server {}", electrum_url);
        Ok(ElectrumBackend { client })
    }
}

fn electrum_error(err: electrum_client::Error) -> WalletError {
    WalletError::Electrum(err.to_string())
}

impl ElectrumApi for ElectrumBackend {
    fn subscribe(&self, script: &Script) -> Result<bool, WalletError> {
        match self.client.script_subscribe(script) {
            Ok(status) => Ok(status.is_some()),
            // Subscriptions survive within a single client connection
            Err(electrum_client::Error::AlreadySubscribed(_)) => Ok(true),
            Err(err) => Err(electrum_error(err)),
        }
    }

    fn poll(&self, script: &Script) -> Result<bool, WalletError> {
        self.client.script_pop(script).map(|status| status.is_some()).map_err(electrum_error)
    }

    fn list_unspent(&self, script: &Script) -> Result<Vec<UnspentItem>, WalletError> {
        let unspents = self.client.script_list_unspent(script).map_err(electrum_error)?;
        Ok(unspents
            .into_iter()
            .map(|res| UnspentItem {
                txid: res.tx_hash,
                output_index: res.tx_pos as u32,
                value_sat: res.value,
                block_height: res.height as u32,
            })
            .collect())
    }

    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, WalletError> {
        self.client.transaction_get(txid).map_err(electrum_error)
    }
}
