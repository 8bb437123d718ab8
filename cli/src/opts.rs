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

use std::path::PathBuf;

use clap::ValueHint;
use lnp_channel::constants::{LNP_CONFIG, LNP_DATA_DIR};
use lnp_channel::{Config, ConfigError};

/// Command-line tool for working with LNP channels
#[derive(Parser, Clone, PartialEq, Eq, Debug)]
#[clap(name = "lnp-channel-cli", bin_name = "lnp-channel-cli", author, version)]
pub struct Opts {
    /// Data directory path.
    ///
    /// Directory containing default configuration file
    #[clap(
        short,
        long,
        global = true,
        default_value = LNP_DATA_DIR,
        env = "LNP_CHANNEL_DATA_DIR",
        value_hint = ValueHint::DirPath
    )]
    pub data_dir: String,

    /// Path to the configuration file.
    ///
    /// Defaults to `lnp-channel.toml` inside the data directory; files with
    /// `.yaml` or `.yml` extension are parsed as YAML.
    #[clap(
        short,
        long,
        global = true,
        env = "LNP_CHANNEL_CONFIG",
        value_hint = ValueHint::FilePath
    )]
    pub config: Option<String>,

    /// Set verbosity level.
    ///
    /// Can be used multiple times to increase verbosity.
    #[clap(short, long, global = true, parse(from_occurrences))]
    pub verbose: u8,

    /// Command to execute
    #[clap(subcommand)]
    pub command: Command,
}

impl Opts {
    pub fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(path) => PathBuf::from(shellexpand::tilde(path).to_string()),
            None => {
                let data_dir = PathBuf::from(shellexpand::tilde(&self.data_dir).to_string());
                PathBuf::from(Config::process_dir(LNP_CONFIG, &data_dir))
            }
        }
    }

    /// Reads configuration file; if there is none, default configuration is
    /// used
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            info!("No configuration file at {}; using defaults", path.display());
            return Ok(Config::default());
        }
        Config::load(path)
    }
}

/// Command-line commands:
#[derive(Subcommand, Clone, PartialEq, Eq, Debug, Display)]
pub enum Command {
    /// Print effective channel configuration
    #[display("config")]
    Config {
        /// Save the configuration to the configuration file
        #[clap(long)]
        save: bool,
    },

    /// Watch funding wallet addresses and report their unspent outputs
    #[cfg(feature = "electrum")]
    #[display("watch")]
    Watch {
        /// Electrum server to connect to, overriding configuration
        #[clap(short, long, env = "LNP_CHANNEL_ELECTRUM_URL")]
        electrum_url: Option<String>,

        /// Current block height used to split outputs by their confirmation
        /// depth
        #[clap(long)]
        height: Option<u32>,

        /// Addresses to watch
        #[clap(required = true)]
        addresses: Vec<String>,
    },

    /// Compute per-commitment secret for a given commitment number
    #[display("commitment-secret<{commitment_number}>")]
    CommitmentSecret {
        /// Hex-encoded 32-byte per-commitment seed
        seed: String,

        /// Commitment number, starting from zero
        commitment_number: u64,
    },
}
