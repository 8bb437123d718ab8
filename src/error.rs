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

use bitcoin::secp256k1;

use crate::channel::ChannelError;
use crate::wallet::WalletError;
use crate::ConfigError;

#[derive(Debug, Display, From, Error)]
#[display(doc_comments)]
#[non_exhaustive]
pub enum Error {
    /// channel error: {0}
    #[from]
    Channel(ChannelError),

    /// configuration error: {0}
    #[from]
    Config(ConfigError),

    /// funding wallet error: {0}
    #[from]
    Wallet(WalletError),

    /// secp256k1 error: {0}
    #[from]
    Secp256k1(secp256k1::Error),
}

impl Error {
    /// Returns unique error number sent to the client alongside text message
    /// to help run client-side diagnostics
    pub fn errno(&self) -> u16 {
        match self {
            Error::Channel(err) => err.errno(),
            Error::Config(_) => 6001,
            Error::Wallet(_) => 7001,
            Error::Secp256k1(_) => 5002,
        }
    }
}
