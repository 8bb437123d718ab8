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

use bitcoin::hashes::sha256;
use bitcoin::Script;

/// Request to offer a new HTLC to the remote peer
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{amount_msat} msat for {payment_hash} expiring at {cltv_expiry}")]
pub struct CmdAddHtlc {
    pub amount_msat: u64,
    pub payment_hash: sha256::Hash,
    pub cltv_expiry: u32,
    pub onion_routing_packet: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("htlc #{id}")]
pub struct CmdFulfillHtlc {
    pub id: u64,
    pub payment_preimage: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("htlc #{id}")]
pub struct CmdFailHtlc {
    pub id: u64,
    /// Encrypted failure onion returned to the payer
    pub reason: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("htlc #{id} with code {failure_code}")]
pub struct CmdFailMalformedHtlc {
    pub id: u64,
    pub sha256_of_onion: sha256::Hash,
    pub failure_code: u16,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{feerate_per_kw} sat/kw")]
pub struct CmdUpdateFee {
    pub feerate_per_kw: u32,
}

/// Local commands executed by the channel
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum Command {
    #[display("add_htlc({0})")]
    #[from]
    AddHtlc(CmdAddHtlc),

    #[display("fulfill_htlc({0})")]
    #[from]
    FulfillHtlc(CmdFulfillHtlc),

    #[display("fail_htlc({0})")]
    #[from]
    FailHtlc(CmdFailHtlc),

    #[display("fail_malformed_htlc({0})")]
    #[from]
    FailMalformedHtlc(CmdFailMalformedHtlc),

    #[display("update_fee({0})")]
    #[from]
    UpdateFee(CmdUpdateFee),

    /// Sign all pending changes
    #[display("sign")]
    Sign,

    /// Start cooperative close, optionally overriding the default closing
    /// script
    #[display("close")]
    Close(Option<Script>),

    /// Publish our commitment transaction
    #[display("force_close")]
    ForceClose,
}

impl Command {
    /// Commands operating HTLCs, which are accepted only by active channels
    pub fn is_htlc_command(&self) -> bool {
        matches!(
            self,
            Command::AddHtlc(_)
                | Command::FulfillHtlc(_)
                | Command::FailHtlc(_)
                | Command::FailMalformedHtlc(_)
                | Command::UpdateFee(_)
        )
    }
}
