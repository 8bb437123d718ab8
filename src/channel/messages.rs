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

//! Decoded BOLT-2 channel messages. Wire encoding is performed by the transport
//! layer; the channel state machine consumes and produces these values.

use std::fmt::{self, Display, Formatter};

use bitcoin::hashes::hex::ToHex;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Script, Txid};

/// Lightning channel identifier: either temporary (random, used before the
/// funding outpoint is known) or final (derived from the funding outpoint).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ChannelId([u8; 32]);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{}..{}", self.0[..4].to_hex(), self.0[28..].to_hex())
        } else {
            f.write_str(&self.0.to_hex())
        }
    }
}

impl From<[u8; 32]> for ChannelId {
    fn from(bytes: [u8; 32]) -> Self { ChannelId(bytes) }
}

impl ChannelId {
    /// Final channel id: funding txid with the funding output index XOR-ed
    /// into its last two bytes.
    pub fn with(funding_txid: Txid, funding_output_index: u16) -> ChannelId {
        let mut slice = funding_txid.into_inner();
        let vout = funding_output_index.to_be_bytes();
        slice[30] ^= vout[0];
        slice[31] ^= vout[1];
        ChannelId(slice)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("open_channel({temporary_channel_id}, {funding_satoshis}, {push_msat}, ...)")]
pub struct OpenChannel {
    /// A temporary channel ID, until the funding outpoint is announced
    pub temporary_channel_id: ChannelId,

    /// The channel value
    pub funding_satoshis: u64,

    /// The amount to push to the counter-party as part of the open, in
    /// millisatoshi
    pub push_msat: u64,

    /// The threshold below which outputs on transactions broadcast by sender
    /// will be omitted
    pub dust_limit_satoshis: u64,

    /// The maximum inbound HTLC value in flight towards sender, in
    /// millisatoshi
    pub max_htlc_value_in_flight_msat: u64,

    /// The minimum value unencumbered by HTLCs for the counterparty to keep
    /// in the channel
    pub channel_reserve_satoshis: u64,

    /// The minimum HTLC size incoming to sender, in milli-satoshi
    pub htlc_minimum_msat: u64,

    /// The fee rate per 1000-weight of sender generated transactions, until
    /// updated by update_fee
    pub feerate_per_kw: u32,

    /// The number of blocks which the counterparty will have to wait to claim
    /// on-chain funds if they broadcast a commitment transaction
    pub to_self_delay: u16,

    /// The maximum number of inbound HTLCs towards sender
    pub max_accepted_htlcs: u16,

    /// The sender's key controlling the funding transaction
    pub funding_pubkey: PublicKey,

    /// Used to derive a revocation key for transactions broadcast by
    /// counterparty
    pub revocation_basepoint: PublicKey,

    /// A payment key to sender for transactions broadcast by counterparty
    pub payment_point: PublicKey,

    /// Used to derive a payment key to sender for transactions broadcast by
    /// sender
    pub delayed_payment_basepoint: PublicKey,

    /// Used to derive an HTLC payment key to sender
    pub htlc_basepoint: PublicKey,

    /// The first to-be-broadcast-by-sender transaction's per commitment point
    pub first_per_commitment_point: PublicKey,

    /// Channel flags
    pub channel_flags: u8,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("accept_channel({temporary_channel_id}, ...)")]
pub struct AcceptChannel {
    /// A temporary channel ID, until the funding outpoint is announced
    pub temporary_channel_id: ChannelId,

    /// The threshold below which outputs on transactions broadcast by sender
    /// will be omitted
    pub dust_limit_satoshis: u64,

    /// The maximum inbound HTLC value in flight towards sender, in
    /// milli-satoshi
    pub max_htlc_value_in_flight_msat: u64,

    /// The minimum value unencumbered by HTLCs for the counterparty to keep in
    /// the channel
    pub channel_reserve_satoshis: u64,

    /// The minimum HTLC size incoming to sender, in milli-satoshi
    pub htlc_minimum_msat: u64,

    /// Minimum depth of the funding transaction before the channel is
    /// considered open
    pub minimum_depth: u32,

    /// The number of blocks which the counterparty will have to wait to claim
    /// on-chain funds if they broadcast a commitment transaction
    pub to_self_delay: u16,

    /// The maximum number of inbound HTLCs towards sender
    pub max_accepted_htlcs: u16,

    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_point: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,

    /// The first to-be-broadcast-by-sender transaction's per commitment point
    pub first_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("funding_created({temporary_channel_id}, {funding_txid}:{funding_output_index}, ...)")]
pub struct FundingCreated {
    /// A temporary channel ID, until the funding is established
    pub temporary_channel_id: ChannelId,

    /// The funding transaction ID
    pub funding_txid: Txid,

    /// The specific output index funding this channel
    pub funding_output_index: u16,

    /// The signature of the channel initiator (funder) on the funding
    /// transaction
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("funding_signed({channel_id}, ...)")]
pub struct FundingSigned {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The signature of the channel acceptor on the initiator's first
    /// commitment transaction
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("funding_locked({channel_id}, {next_per_commitment_point})")]
pub struct FundingLocked {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The per-commitment point of the second commitment transaction
    pub next_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("update_add_htlc({channel_id}, {id}, {amount_msat}, {payment_hash}, ...)")]
pub struct UpdateAddHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub id: u64,

    /// The HTLC value in milli-satoshi
    pub amount_msat: u64,

    /// The payment hash, the pre-image of which controls HTLC redemption
    pub payment_hash: sha256::Hash,

    /// The expiry height of the HTLC
    pub cltv_expiry: u32,

    /// An onion packet with an obfuscated list of hops
    pub onion_routing_packet: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("update_fulfill_htlc({channel_id}, {id}, ...)")]
pub struct UpdateFulfillHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub id: u64,

    /// The pre-image of the payment hash, allowing HTLC redemption
    pub payment_preimage: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("update_fail_htlc({channel_id}, {id}, ...)")]
pub struct UpdateFailHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub id: u64,

    /// The reason field is an opaque encrypted blob for the benefit of the
    /// original HTLC initiator
    pub reason: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("update_fail_malformed_htlc({channel_id}, {id}, {failure_code})")]
pub struct UpdateFailMalformedHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub id: u64,

    /// SHA256 hash of onion data
    pub sha256_of_onion: sha256::Hash,

    /// The failure code
    pub failure_code: u16,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("update_fee({channel_id}, {feerate_per_kw})")]
pub struct UpdateFee {
    /// The channel ID
    pub channel_id: ChannelId,

    /// Fee rate per 1000-weight of the transaction
    pub feerate_per_kw: u32,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("commitment_signed({channel_id}, {signature}, ...)")]
pub struct CommitSig {
    /// The channel ID
    pub channel_id: ChannelId,

    /// A signature on the commitment transaction
    pub signature: Signature,

    /// Signatures on the HTLC transactions, ordered by the commitment
    /// transaction output index
    pub htlc_signatures: Vec<Signature>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("revoke_and_ack({channel_id}, {next_per_commitment_point}, ...)")]
pub struct RevokeAndAck {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The secret corresponding to the per-commitment point
    pub per_commitment_secret: [u8; 32],

    /// The next sender-broadcast commitment transaction's per-commitment point
    pub next_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("shutdown({channel_id}, ...)")]
pub struct Shutdown {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The destination of this peer's funds on closing.
    pub script_pubkey: Script,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("closing_signed({channel_id}, {fee_satoshis}, ...)")]
pub struct ClosingSigned {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The proposed total fee for the closing transaction
    pub fee_satoshis: u64,

    /// A signature for the closing transaction
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display(
    "channel_reestablish({channel_id}, {next_commitment_number}, \
     {next_revocation_number}, ...)"
)]
pub struct ChannelReestablish {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The next commitment number for the sender
    pub next_commitment_number: u64,

    /// The next commitment number for the recipient
    pub next_revocation_number: u64,

    /// Proof that the sending node knows the latest per-commitment secret of
    /// the recipient
    pub your_last_per_commitment_secret: [u8; 32],

    /// The sender's per-commitment point for their current commitment
    /// transaction
    pub my_current_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("error({channel_id}, {message})")]
pub struct Error {
    /// The channel ID; all zeros refers to all channels
    pub channel_id: ChannelId,

    /// Human-readable error description
    pub message: String,
}

impl Error {
    pub fn with(channel_id: ChannelId, message: impl ToString) -> Error {
        Error { channel_id, message: message.to_string() }
    }
}

/// Channel messages exchanged between the peers
#[derive(Clone, PartialEq, Eq, Debug, Display, From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display(inner)]
pub enum Messages {
    #[from]
    OpenChannel(OpenChannel),
    #[from]
    AcceptChannel(AcceptChannel),
    #[from]
    FundingCreated(FundingCreated),
    #[from]
    FundingSigned(FundingSigned),
    #[from]
    FundingLocked(FundingLocked),
    #[from]
    UpdateAddHtlc(UpdateAddHtlc),
    #[from]
    UpdateFulfillHtlc(UpdateFulfillHtlc),
    #[from]
    UpdateFailHtlc(UpdateFailHtlc),
    #[from]
    UpdateFailMalformedHtlc(UpdateFailMalformedHtlc),
    #[from]
    UpdateFee(UpdateFee),
    #[from]
    CommitSig(CommitSig),
    #[from]
    RevokeAndAck(RevokeAndAck),
    #[from]
    Shutdown(Shutdown),
    #[from]
    ClosingSigned(ClosingSigned),
    #[from]
    ChannelReestablish(ChannelReestablish),
    #[from]
    Error(Error),
}

/// Channel state update proposed by one of the peers, pending cross-signing
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display(inner)]
pub enum UpdateMessage {
    #[from]
    AddHtlc(UpdateAddHtlc),
    #[from]
    FulfillHtlc(UpdateFulfillHtlc),
    #[from]
    FailHtlc(UpdateFailHtlc),
    #[from]
    FailMalformedHtlc(UpdateFailMalformedHtlc),
    #[from]
    Fee(UpdateFee),
}

impl From<UpdateMessage> for Messages {
    fn from(update: UpdateMessage) -> Self {
        match update {
            UpdateMessage::AddHtlc(msg) => Messages::UpdateAddHtlc(msg),
            UpdateMessage::FulfillHtlc(msg) => Messages::UpdateFulfillHtlc(msg),
            UpdateMessage::FailHtlc(msg) => Messages::UpdateFailHtlc(msg),
            UpdateMessage::FailMalformedHtlc(msg) => Messages::UpdateFailMalformedHtlc(msg),
            UpdateMessage::Fee(msg) => Messages::UpdateFee(msg),
        }
    }
}

impl UpdateMessage {
    /// Id of the HTLC which this update settles, if any
    pub fn settled_htlc_id(&self) -> Option<u64> {
        match self {
            UpdateMessage::FulfillHtlc(msg) => Some(msg.id),
            UpdateMessage::FailHtlc(msg) => Some(msg.id),
            UpdateMessage::FailMalformedHtlc(msg) => Some(msg.id),
            UpdateMessage::AddHtlc(_) | UpdateMessage::Fee(_) => None,
        }
    }
}
