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

use std::convert::TryFrom;
use std::io;

use bitcoin::hashes::hex::{FromHex, ToHex};
use lnp_channel::channel::keys::{build_commitment_secret, secret_index};
#[cfg(feature = "electrum")]
use lnp_channel::wallet::{balance, ElectrumBackend, MiniWallet, WalletError, WalletState};
use lnp_channel::{Config, ConfigError, LogStyle};

use crate::opts::{Command, Opts};

#[derive(Debug, Display, From, Error)]
#[display(doc_comments)]
pub enum Error {
    /// I/O error: {0}
    #[from]
    Io(io::Error),

    /// {0}
    #[from]
    Config(ConfigError),

    /// {0}
    #[cfg(feature = "electrum")]
    #[from]
    Wallet(WalletError),

    /// unable to serialize configuration: {0}
    #[from]
    Toml(toml::ser::Error),

    /// per-commitment seed must be a 32-byte hex string
    InvalidSeed,
}

impl Command {
    pub fn exec(self, opts: &Opts, config: &Config) -> Result<(), Error> {
        debug!("Performing {:?}: {}", self, self);
        match self {
            Command::Config { save } => {
                println!("{}", toml::to_string_pretty(config)?);
                if save {
                    let path = opts.config_path();
                    if let Some(dir) = path.parent() {
                        std::fs::create_dir_all(dir)?;
                    }
                    config.save(&path)?;
                    println!("Configuration saved to {}", path.display().to_string().ended());
                }
            }

            #[cfg(feature = "electrum")]
            Command::Watch { electrum_url, height, addresses } => {
                watch(config, electrum_url, height, addresses)?
            }

            Command::CommitmentSecret { seed, commitment_number } => {
                let seed = Vec::<u8>::from_hex(&seed).map_err(|_| Error::InvalidSeed)?;
                let seed = <[u8; 32]>::try_from(seed.as_slice()).map_err(|_| Error::InvalidSeed)?;
                let index = secret_index(commitment_number);
                let secret = build_commitment_secret(&seed, index);
                println!("index:  {:#x}", index);
                println!("secret: {}", secret.to_hex().promo());
            }
        }
        Ok(())
    }
}

#[cfg(feature = "electrum")]
fn watch(
    config: &Config,
    electrum_url: Option<String>,
    height: Option<u32>,
    addresses: Vec<String>,
) -> Result<(), Error> {
    use std::sync::mpsc;
    use std::time::Duration;

    use lnp_channel::constants::WALLET_POLL_INTERVAL_SECS;

    let electrum_url = electrum_url.unwrap_or_else(|| config.electrum_url.clone());
    let backend = ElectrumBackend::connect(&electrum_url)?;
    let (sender, updates) = mpsc::channel();
    let interval = Duration::from_secs(WALLET_POLL_INTERVAL_SECS);
    let wallet = MiniWallet::with(backend, config.network, sender, Some(interval))?;
    for address in &addresses {
        wallet.add_address(address)?;
    }
    wallet.connected()?;

    for snapshot in updates {
        report(&snapshot, height, config.wallet_min_confirmations);
    }
    Ok(())
}

#[cfg(feature = "electrum")]
fn report(snapshot: &WalletState, height: Option<u32>, min_confirmations: u32) {
    for (address, items) in &snapshot.addresses {
        println!("{}:", address.addr());
        for item in items {
            println!("\t{}\t{} sat\theight {}", item, item.value_sat.amount(), item.block_height);
        }
    }
    if !snapshot.consistent() {
        println!("{}", "some parent transactions are not known yet".action());
    }
    match height {
        Some(height) => {
            let tiers = snapshot.with_confirmations(height, min_confirmations);
            println!(
                "unconfirmed: {} sat, weakly confirmed: {} sat, deeply confirmed: {} sat",
                balance(&tiers.unconfirmed).amount(),
                balance(&tiers.weakly_confirmed).amount(),
                balance(&tiers.deeply_confirmed).amount()
            );
        }
        None => println!("balance: {} sat", snapshot.total_balance().amount()),
    }
}
