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

#![allow(clippy::needless_borrow)] // due to a bug in `display(Debug)`

use std::io;
use std::path::Path;

use bitcoin::secp256k1::PublicKey;
use bitcoin::{Network, Script};

use crate::channel::{LocalKeyset, LocalParams};
use crate::constants::*;

/// Node-wide channel policy: parameters we announce to the peers and limits we
/// enforce on the parameters they announce. Loaded from a TOML or YAML
/// configuration file; missing fields take their default values.
#[derive(Clone, PartialEq, Debug, Display)]
#[display(Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", default, rename_all = "kebab-case")
)]
pub struct Config {
    /// Bitcoin network the channels operate on
    pub network: Network,

    /// URL for the electrum server connection used by the funding wallet
    pub electrum_url: String,

    /// Dust limit for our commitment transactions
    pub dust_limit_sat: u64,

    /// CSV delay we require from the remote peer
    pub to_self_delay: u16,

    /// Largest CSV delay we accept for our own outputs
    pub max_to_self_delay: u16,

    /// Number of confirmations before the channel is considered open
    pub min_depth_blocks: u32,

    /// Largest `minimum_depth` we accept from the fundee
    pub max_min_depth_blocks: u32,

    /// Minimum HTLC value we accept
    pub htlc_minimum_msat: u64,

    /// Maximum value of HTLCs in flight towards us
    pub max_htlc_value_in_flight_msat: u64,

    /// Maximum number of HTLCs the peer may offer us
    pub max_accepted_htlcs: u16,

    /// Channel reserve as a fraction of the funding amount
    pub reserve_to_funding_ratio: f64,

    pub min_funding_sat: u64,
    pub max_funding_sat: u64,

    /// Maximum distance between the current block and HTLC expiry
    pub max_cltv_expiry_delta: u32,

    pub min_feerate_per_kw: u32,

    /// After this number of `closing_signed` rounds the remote fee is either
    /// accepted or the channel is force-closed
    pub max_closing_negotiation_rounds: u16,

    /// Confirmations required for a wallet output to be deeply confirmed
    pub wallet_min_confirmations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Bitcoin,
            electrum_url: ELECTRUM_URL.to_owned(),
            dust_limit_sat: DEFAULT_DUST_LIMIT_SAT,
            to_self_delay: DEFAULT_TO_SELF_DELAY,
            max_to_self_delay: MAX_TO_SELF_DELAY,
            min_depth_blocks: DEFAULT_MIN_DEPTH,
            max_min_depth_blocks: DEFAULT_MAX_MIN_DEPTH,
            htlc_minimum_msat: DEFAULT_HTLC_MINIMUM_MSAT,
            max_htlc_value_in_flight_msat: DEFAULT_MAX_HTLC_VALUE_IN_FLIGHT_MSAT,
            max_accepted_htlcs: DEFAULT_MAX_ACCEPTED_HTLCS,
            reserve_to_funding_ratio: DEFAULT_RESERVE_TO_FUNDING_RATIO,
            min_funding_sat: DEFAULT_MIN_FUNDING_SAT,
            max_funding_sat: MAX_FUNDING_SAT,
            max_cltv_expiry_delta: DEFAULT_MAX_CLTV_EXPIRY_DELTA,
            min_feerate_per_kw: DEFAULT_MIN_FEERATE_PER_KW,
            max_closing_negotiation_rounds: DEFAULT_MAX_CLOSING_NEGOTIATION_ROUNDS,
            wallet_min_confirmations: DEFAULT_WALLET_MIN_CONFIRMATIONS,
        }
    }
}

/// Errors loading or saving configuration
#[derive(Debug, Display, From, Error)]
#[display(doc_comments)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error accessing configuration file: {0}
    #[from]
    Io(io::Error),

    /// unable to parse TOML configuration: {0}
    #[cfg(feature = "serde")]
    #[from]
    TomlDecode(toml::de::Error),

    /// unable to serialize configuration as TOML: {0}
    #[cfg(feature = "serde")]
    #[from]
    TomlEncode(toml::ser::Error),

    /// unable to parse YAML configuration: {0}
    #[cfg(feature = "serde")]
    #[from]
    Yaml(serde_yaml::Error),

    /// channel reserve ratio {0} must be within [0; 1) range
    InvalidReserveRatio(f64),

    /// dust limit {0} sat is below the protocol minimum of 354 sat
    DustLimitTooSmall(u64),
}

impl Config {
    /// Reserve the remote party must keep in a channel of the given capacity;
    /// never below our dust limit.
    pub fn channel_reserve_sat(&self, funding_sat: u64) -> u64 {
        ((funding_sat as f64 * self.reserve_to_funding_ratio) as u64).max(self.dust_limit_sat)
    }

    /// Checks parameters which are not representable by the type system
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.reserve_to_funding_ratio) {
            return Err(ConfigError::InvalidReserveRatio(self.reserve_to_funding_ratio));
        }
        if self.dust_limit_sat < 354 {
            return Err(ConfigError::DustLimitTooSmall(self.dust_limit_sat));
        }
        Ok(())
    }

    /// Constructs local channel parameters for a channel with the given
    /// funding amount
    pub fn local_params(
        &self,
        node_id: PublicKey,
        keys: LocalKeyset,
        is_funder: bool,
        funding_sat: u64,
        default_final_script_pubkey: Script,
    ) -> LocalParams {
        LocalParams {
            node_id,
            keys,
            dust_limit_sat: self.dust_limit_sat,
            max_htlc_value_in_flight_msat: self.max_htlc_value_in_flight_msat,
            channel_reserve_sat: self.channel_reserve_sat(funding_sat),
            htlc_minimum_msat: self.htlc_minimum_msat,
            to_self_delay: self.to_self_delay,
            max_accepted_htlcs: self.max_accepted_htlcs,
            is_funder,
            default_final_script_pubkey,
        }
    }

    /// Reads configuration file, using YAML parser for `.yaml`/`.yml` files
    /// and TOML for everything else
    #[cfg(feature = "serde")]
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data)?,
            _ => toml::from_str(&data)?,
        };
        config.validate()?;
        debug!("Configuration loaded from {}: {}", path.display(), config);
        Ok(config)
    }

    #[cfg(feature = "serde")]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let data = toml::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Expands `{data_dir}` placeholder in a path template
    pub fn process_dir(template: &str, data_dir: &Path) -> String {
        template.replace("{data_dir}", &data_dir.display().to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserve_never_below_dust() {
        let config = Config::default();
        assert_eq!(config.channel_reserve_sat(1_000_000), 10_000);
        assert_eq!(config.channel_reserve_sat(20_000), config.dust_limit_sat);
    }

    #[test]
    fn validation() {
        assert!(Config::default().validate().is_ok());
        let config = Config { reserve_to_funding_ratio: 1.5, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidReserveRatio(_))));
        let config = Config { dust_limit_sat: 100, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::DustLimitTooSmall(100))));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn toml_and_yaml_parsing() {
        let config: Config =
            toml::from_str("network = \"testnet\"\nmin-depth-blocks = 6\n").unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.min_depth_blocks, 6);
        assert_eq!(config.to_self_delay, DEFAULT_TO_SELF_DELAY);

        let config: Config =
            serde_yaml::from_str("network: regtest\nmax-accepted-htlcs: 10\n").unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.max_accepted_htlcs, 10);

        let encoded = toml::to_string_pretty(&Config::default()).unwrap();
        let decoded: Config = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, Config::default());
    }

    #[test]
    fn data_dir_template() {
        assert_eq!(
            Config::process_dir(LNP_CONFIG, Path::new("/tmp/lnp")),
            "/tmp/lnp/lnp-channel.toml"
        );
    }
}
