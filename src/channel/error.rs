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

use bitcoin::Txid;

use super::messages::ChannelId;

/// Errors of channel operations: rejected local commands and protocol
/// violations by the remote peer
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display(doc_comments)]
pub enum ChannelError {
    /// channel {0} is unavailable for the requested operation
    ChannelUnavailable(ChannelId),

    /// channel {0} has no HTLC with id {1} which can be settled
    UnknownHtlcId(ChannelId, u64),

    /// failure code {1} used for a malformed HTLC in channel {0} does not
    /// have BADONION bit set
    InvalidFailureCode(ChannelId, u16),

    /// HTLC value {actual} msat in channel {channel_id} is below the minimum of
    /// {minimum} msat
    HtlcValueTooSmall { channel_id: ChannelId, minimum: u64, actual: u64 },

    /// HTLC expiry {actual} in channel {channel_id} is too close to the
    /// current block height {block_height}
    ExpiryTooSmall { channel_id: ChannelId, actual: u32, block_height: u32 },

    /// HTLC expiry {actual} in channel {channel_id} is too far in the future;
    /// maximum is {maximum}
    ExpiryTooBig { channel_id: ChannelId, maximum: u32, actual: u32 },

    /// in-flight HTLC value {actual} msat in channel {channel_id} exceeds
    /// the maximum of {maximum} msat
    HtlcValueTooHighInFlight { channel_id: ChannelId, maximum: u64, actual: u64 },

    /// too many HTLCs accepted in channel {channel_id}; maximum is {maximum}
    TooManyAcceptedHtlcs { channel_id: ChannelId, maximum: u16 },

    /// insufficient funds in channel {channel_id} to send {amount_msat} msat:
    /// missing {missing_sat} sat (reserve {reserve_sat} sat, fees {fees_sat} sat)
    InsufficientFunds {
        channel_id: ChannelId,
        amount_msat: u64,
        missing_sat: u64,
        reserve_sat: u64,
        fees_sat: u64,
    },

    /// funder in channel {channel_id} can't afford commitment fees: missing
    /// {missing_sat} sat (reserve {reserve_sat} sat, fees {fees_sat} sat)
    CannotAffordFees { channel_id: ChannelId, missing_sat: u64, reserve_sat: u64, fees_sat: u64 },

    /// preimage does not match payment hash of HTLC {1} in channel {0}
    InvalidHtlcPreimage(ChannelId, u64),

    /// channel {0} can't be closed while outgoing HTLCs are not signed
    CannotCloseWithUnsignedOutgoingHtlcs(ChannelId),

    /// closing of channel {0} is already in progress
    ClosingAlreadyInProgress(ChannelId),

    /// fee rate {actual} sat/kw for channel {channel_id} is below the minimum
    /// of {minimum} sat/kw
    FeerateTooSmall { channel_id: ChannelId, minimum: u32, actual: u32 },

    /// only the funder of channel {0} may update commitment fee
    FundeeCannotSendUpdateFee(ChannelId),

    /// unexpected HTLC id {actual} in channel {channel_id}; expected {expected}
    UnexpectedHtlcId { channel_id: ChannelId, expected: u64, actual: u64 },

    /// invalid commitment signature for transaction {1} in channel {0}
    InvalidCommitmentSignature(ChannelId, Txid),

    /// invalid HTLC signature for transaction {1} in channel {0}
    InvalidHtlcSignature(ChannelId, Txid),

    /// channel {channel_id} received {actual} HTLC signatures while {expected}
    /// were expected
    HtlcSigCountMismatch { channel_id: ChannelId, expected: usize, actual: usize },

    /// revocation secret in channel {0} does not match the per-commitment point
    InvalidRevocation(ChannelId),

    /// unexpected revocation in channel {0}: no signature is waiting for it
    UnexpectedRevocation(ChannelId),

    /// channel {0} received a signature while there are no changes to sign
    CannotSignWithoutChanges(ChannelId),

    /// invalid signature for closing transaction {1} in channel {0}
    InvalidCloseSignature(ChannelId, Txid),

    /// remote closing fee {1} sat in channel {0} is outside of acceptable
    /// bounds
    InvalidCloseFee(ChannelId, u64),

    /// push amount {push_msat} msat for channel {channel_id} exceeds the
    /// funding amount {funding_msat} msat
    InvalidPushAmount { channel_id: ChannelId, push_msat: u64, funding_msat: u64 },

    /// funding amount {actual} sat for channel {channel_id} is outside of
    /// [{minimum}, {maximum}] sat range
    InvalidFundingAmount { channel_id: ChannelId, minimum: u64, maximum: u64, actual: u64 },

    /// to_self_delay {actual} requested for channel {channel_id} exceeds the
    /// maximum of {maximum} blocks
    ToSelfDelayTooHigh { channel_id: ChannelId, maximum: u16, actual: u16 },

    /// dust limit {dust_limit_sat} sat in channel {channel_id} is above the
    /// channel reserve {reserve_sat} sat
    DustLimitTooLarge { channel_id: ChannelId, dust_limit_sat: u64, reserve_sat: u64 },

    /// maximum of accepted HTLCs {actual} for channel {channel_id} exceeds the
    /// protocol limit of {maximum}
    InvalidMaxAcceptedHtlcs { channel_id: ChannelId, maximum: u16, actual: u16 },

    /// minimum funding depth {actual} for channel {channel_id} exceeds our
    /// maximum of {maximum} blocks
    MinimumDepthTooHigh { channel_id: ChannelId, maximum: u32, actual: u32 },

    /// offered HTLCs of channel {0} timed out
    HtlcsTimedOut(ChannelId),

    /// remote peer reported error for channel {0}: {1}
    RemoteError(ChannelId, String),

    /// channel {0} failed with an internal cryptographic error: {1}
    Crypto(ChannelId, String),
}

impl ChannelError {
    /// Returns unique error number sent to the client alongside text message
    /// to help run client-side diagnostics
    pub fn errno(&self) -> u16 {
        match self {
            ChannelError::ChannelUnavailable(_) => 1001,
            ChannelError::UnknownHtlcId(_, _) => 1002,
            ChannelError::InvalidFailureCode(_, _) => 1003,
            ChannelError::HtlcValueTooSmall { .. } => 1004,
            ChannelError::ExpiryTooSmall { .. } => 1005,
            ChannelError::ExpiryTooBig { .. } => 1006,
            ChannelError::HtlcValueTooHighInFlight { .. } => 1007,
            ChannelError::TooManyAcceptedHtlcs { .. } => 1008,
            ChannelError::InsufficientFunds { .. } => 1009,
            ChannelError::CannotAffordFees { .. } => 1010,
            ChannelError::InvalidHtlcPreimage(_, _) => 1011,
            ChannelError::CannotCloseWithUnsignedOutgoingHtlcs(_) => 1012,
            ChannelError::ClosingAlreadyInProgress(_) => 1013,
            ChannelError::FeerateTooSmall { .. } => 1014,
            ChannelError::FundeeCannotSendUpdateFee(_) => 1015,
            ChannelError::UnexpectedHtlcId { .. } => 2001,
            ChannelError::InvalidCommitmentSignature(_, _) => 2002,
            ChannelError::InvalidHtlcSignature(_, _) => 2003,
            ChannelError::HtlcSigCountMismatch { .. } => 2004,
            ChannelError::InvalidRevocation(_) => 2005,
            ChannelError::UnexpectedRevocation(_) => 2006,
            ChannelError::CannotSignWithoutChanges(_) => 2007,
            ChannelError::InvalidCloseSignature(_, _) => 2008,
            ChannelError::InvalidCloseFee(_, _) => 2009,
            ChannelError::InvalidPushAmount { .. } => 3001,
            ChannelError::InvalidFundingAmount { .. } => 3002,
            ChannelError::ToSelfDelayTooHigh { .. } => 3003,
            ChannelError::DustLimitTooLarge { .. } => 3004,
            ChannelError::InvalidMaxAcceptedHtlcs { .. } => 3005,
            ChannelError::MinimumDepthTooHigh { .. } => 3006,
            ChannelError::HtlcsTimedOut(_) => 4001,
            ChannelError::RemoteError(_, _) => 4002,
            ChannelError::Crypto(_, _) => 5001,
        }
    }

    /// Whether the error is a protocol violation by the remote peer, which
    /// makes the channel unusable
    pub fn is_protocol_violation(&self) -> bool { (2000..4000).contains(&self.errno()) }
}
