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

//! Commitment ledger: both commitment views, pending change logs and the
//! commit/revoke cross-signing procedure.

use std::collections::BTreeMap;
use std::mem;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{self, PublicKey, SecretKey};
use bitcoin::Txid;

use super::actions::{ChannelAction, CmdResult, HtlcFailure};
use super::commands::{
    CmdAddHtlc, CmdFailHtlc, CmdFailMalformedHtlc, CmdFulfillHtlc, CmdUpdateFee,
};
use super::error::ChannelError;
use super::htlc::{CommitmentSpec, Direction, HtlcInfo};
use super::keys::{derive_privkey, secret_index, CommitmentSecrets};
use super::messages::{
    ChannelId, CommitSig, RevokeAndAck, UpdateAddHtlc, UpdateFailHtlc, UpdateFailMalformedHtlc,
    UpdateFee, UpdateFulfillHtlc, UpdateMessage,
};
use super::params::{LocalParams, RemoteParams};
use super::transactions::{
    commit_tx_fee_with_anchors_sat, make_commit_tx, make_htlc_txs, obscuring_factor,
    CommitOutput, CommitParams, CommitmentKeys, FundingSpendTx, HtlcTx, InputInfo, SpendingTx,
};
use crate::{Config, SECP256K1};

/// Flag of the failure codes related to a malformed onion
pub const BADONION: u16 = 0x8000;

/// Second-stage HTLC transaction of our commitment with both signatures
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct HtlcTxAndSigs {
    pub htlc_tx: HtlcTx,
    pub local_sig: Signature,
    pub remote_sig: Signature,
}

/// Our current commitment, signed by the remote peer
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct LocalCommit {
    pub index: u64,
    pub spec: CommitmentSpec,
    pub commit_tx: FundingSpendTx,
    pub remote_sig: Signature,
    pub htlc_txs_and_sigs: Vec<HtlcTxAndSigs>,
}

/// Remote peer commitment signed by us. Its `spec` is seen from the remote
/// side: `to_local_msat` is the remote balance.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct RemoteCommit {
    pub index: u64,
    pub spec: CommitmentSpec,
    pub txid: Txid,
    pub remote_per_commitment_point: PublicKey,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct LocalChanges {
    /// Sent to the peer, not yet covered by our signature
    pub proposed: Vec<UpdateMessage>,
    /// Covered by the signature we are waiting a revocation for
    pub signed: Vec<UpdateMessage>,
    /// Revoked by the peer, not yet included in our commitment
    pub acked: Vec<UpdateMessage>,
}

impl LocalChanges {
    pub fn all(&self) -> impl Iterator<Item = &UpdateMessage> {
        self.proposed.iter().chain(&self.signed).chain(&self.acked)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct RemoteChanges {
    /// Received from the peer, not yet covered by its signature
    pub proposed: Vec<UpdateMessage>,
    /// Included in our commitment, not yet signed by us for the peer
    pub acked: Vec<UpdateMessage>,
    /// Signed by us, waiting for the peer revocation
    pub signed: Vec<UpdateMessage>,
}

impl RemoteChanges {
    pub fn all(&self) -> impl Iterator<Item = &UpdateMessage> {
        self.proposed.iter().chain(&self.acked).chain(&self.signed)
    }
}

/// Signature sent to the peer which was not yet revoked
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WaitingForRevocation {
    pub next_remote_commit: RemoteCommit,
    pub sent: CommitSig,
    /// Our commitment index at the moment the signature was sent; defines
    /// retransmission order on reconnection
    pub sent_after_local_commit_index: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum RemoteNextCommitInfo {
    WaitingForRevocation(WaitingForRevocation),

    /// Point for the next remote commitment, received with the last
    /// revocation
    NextPoint(PublicKey),
}

/// Commitment transaction of some party together with its outputs and
/// second-stage HTLC transactions
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitTxs {
    pub keys: CommitmentKeys,
    pub commit_tx: FundingSpendTx,
    pub outputs: Vec<CommitOutput>,
    pub htlc_txs: Vec<HtlcTx>,
}

/// Commitment number obscuring factor; uses the funder payment basepoint first
pub fn channel_obscuring_factor(local_params: &LocalParams, remote_params: &RemoteParams) -> u64 {
    let local = local_params.keys.to_public().payment_basepoint;
    let remote = remote_params.keys.payment_basepoint;
    if local_params.is_funder {
        obscuring_factor(&local, &remote)
    } else {
        obscuring_factor(&remote, &local)
    }
}

/// Builds our commitment transaction with the given number
pub fn make_local_txs(
    local_params: &LocalParams,
    remote_params: &RemoteParams,
    commit_input: &InputInfo,
    index: u64,
    spec: &CommitmentSpec,
) -> Result<CommitTxs, secp256k1::Error> {
    let point = local_params.keys.per_commitment_point(index)?;
    let keys = CommitmentKeys::derive(&point, &local_params.keys.to_public(), &remote_params.keys)?;
    let (commit_tx, outputs) = make_commit_tx(&CommitParams {
        commit_input,
        commitment_number: index,
        obscuring_factor: channel_obscuring_factor(local_params, remote_params),
        to_self_delay: remote_params.to_self_delay,
        dust_limit_sat: local_params.dust_limit_sat,
        holder_is_funder: local_params.is_funder,
        keys: &keys,
        spec,
    });
    let htlc_txs = make_htlc_txs(
        &commit_tx.tx,
        &outputs,
        remote_params.to_self_delay,
        &keys,
        spec.feerate_per_kw,
    );
    Ok(CommitTxs { keys, commit_tx, outputs, htlc_txs })
}

/// Builds the remote commitment transaction with the given number
pub fn make_remote_txs(
    local_params: &LocalParams,
    remote_params: &RemoteParams,
    commit_input: &InputInfo,
    index: u64,
    spec: &CommitmentSpec,
    remote_per_commitment_point: &PublicKey,
) -> Result<CommitTxs, secp256k1::Error> {
    let keys = CommitmentKeys::derive(
        remote_per_commitment_point,
        &remote_params.keys,
        &local_params.keys.to_public(),
    )?;
    let (commit_tx, outputs) = make_commit_tx(&CommitParams {
        commit_input,
        commitment_number: index,
        obscuring_factor: channel_obscuring_factor(local_params, remote_params),
        to_self_delay: local_params.to_self_delay,
        dust_limit_sat: remote_params.dust_limit_sat,
        holder_is_funder: !local_params.is_funder,
        keys: &keys,
        spec,
    });
    let htlc_txs = make_htlc_txs(
        &commit_tx.tx,
        &outputs,
        local_params.to_self_delay,
        &keys,
        spec.feerate_per_kw,
    );
    Ok(CommitTxs { keys, commit_tx, outputs, htlc_txs })
}

/// Initial balances of both commitments as `(local_spec, remote_spec)`
pub fn first_commit_specs(
    channel_id: ChannelId,
    is_funder: bool,
    funding_sat: u64,
    push_msat: u64,
    feerate_per_kw: u32,
) -> Result<(CommitmentSpec, CommitmentSpec), ChannelError> {
    let funding_msat = funding_sat.saturating_mul(1000);
    let funder_msat = funding_msat.checked_sub(push_msat).ok_or(
        ChannelError::InvalidPushAmount { channel_id, push_msat, funding_msat },
    )?;
    let (to_local, to_remote) =
        if is_funder { (funder_msat, push_msat) } else { (push_msat, funder_msat) };
    Ok((
        CommitmentSpec::new(to_local, to_remote, feerate_per_kw),
        CommitmentSpec::new(to_remote, to_local, feerate_per_kw),
    ))
}

/// Both commitment views of an operational channel
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct Commitments {
    pub channel_id: ChannelId,
    pub local_params: LocalParams,
    pub remote_params: RemoteParams,
    pub channel_flags: u8,
    pub local_commit: LocalCommit,
    pub remote_commit: RemoteCommit,
    pub local_changes: LocalChanges,
    pub remote_changes: RemoteChanges,
    pub local_next_htlc_id: u64,
    pub remote_next_htlc_id: u64,
    pub remote_next_commit_info: RemoteNextCommitInfo,
    pub commit_input: InputInfo,
    pub remote_per_commitment_secrets: CommitmentSecrets,
}

impl Commitments {
    /// Constructs commitments right after the first commitments were signed.
    /// Until `funding_locked` is received the next remote point is set to the
    /// first one.
    pub fn new(
        channel_id: ChannelId,
        local_params: LocalParams,
        remote_params: RemoteParams,
        channel_flags: u8,
        commit_input: InputInfo,
        local_commit: LocalCommit,
        remote_commit: RemoteCommit,
    ) -> Commitments {
        let first_point = remote_commit.remote_per_commitment_point;
        Commitments {
            channel_id,
            local_params,
            remote_params,
            channel_flags,
            local_commit,
            remote_commit,
            local_changes: none!(),
            remote_changes: none!(),
            local_next_htlc_id: 0,
            remote_next_htlc_id: 0,
            remote_next_commit_info: RemoteNextCommitInfo::NextPoint(first_point),
            commit_input,
            remote_per_commitment_secrets: CommitmentSecrets::new(),
        }
    }

    #[inline]
    fn crypto_err(&self, err: secp256k1::Error) -> ChannelError {
        ChannelError::Crypto(self.channel_id, err.to_string())
    }

    #[inline]
    pub fn is_funder(&self) -> bool { self.local_params.is_funder }

    pub fn capacity_sat(&self) -> u64 { self.commit_input.txout.value }

    /// Remote commitment which the peer will hold after its next revocation
    pub fn latest_remote_commit(&self) -> &RemoteCommit {
        match &self.remote_next_commit_info {
            RemoteNextCommitInfo::WaitingForRevocation(waiting) => &waiting.next_remote_commit,
            RemoteNextCommitInfo::NextPoint(_) => &self.remote_commit,
        }
    }

    #[inline]
    pub fn is_waiting_for_revocation(&self) -> bool {
        matches!(self.remote_next_commit_info, RemoteNextCommitInfo::WaitingForRevocation(_))
    }

    /// Whether we have something to sign
    pub fn local_has_changes(&self) -> bool {
        !self.remote_changes.acked.is_empty() || !self.local_changes.proposed.is_empty()
    }

    /// Whether the peer has something to sign
    pub fn remote_has_changes(&self) -> bool {
        !self.local_changes.acked.is_empty() || !self.remote_changes.proposed.is_empty()
    }

    pub fn local_has_unsigned_outgoing_htlcs(&self) -> bool {
        self.local_changes.proposed.iter().any(|c| matches!(c, UpdateMessage::AddHtlc(_)))
    }

    pub fn remote_has_unsigned_outgoing_htlcs(&self) -> bool {
        self.remote_changes.proposed.iter().any(|c| matches!(c, UpdateMessage::AddHtlc(_)))
    }

    pub fn has_no_pending_htlcs(&self) -> bool {
        self.local_commit.spec.htlcs.is_empty() && self.latest_remote_commit().spec.htlcs.is_empty()
    }

    /// Whether some HTLC offered by us has expired in any of the commitments
    /// which may get confirmed
    pub fn has_timed_out_outgoing_htlcs(&self, block_height: u32) -> bool {
        let expired = |htlc: &UpdateAddHtlc| htlc.cltv_expiry <= block_height;
        self.local_commit.spec.offered().any(expired)
            || self.remote_commit.spec.received().any(expired)
            || match &self.remote_next_commit_info {
                RemoteNextCommitInfo::WaitingForRevocation(waiting) => {
                    waiting.next_remote_commit.spec.received().any(expired)
                }
                RemoteNextCommitInfo::NextPoint(_) => false,
            }
    }

    /// Preimages of the HTLCs we have fulfilled, by HTLC id
    pub fn known_preimages(&self) -> BTreeMap<u64, [u8; 32]> {
        self.local_changes
            .all()
            .filter_map(|change| match change {
                UpdateMessage::FulfillHtlc(fulfill) => Some((fulfill.id, fulfill.payment_preimage)),
                _ => None,
            })
            .collect()
    }

    pub fn make_local_txs(&self, index: u64, spec: &CommitmentSpec) -> Result<CommitTxs, ChannelError> {
        make_local_txs(&self.local_params, &self.remote_params, &self.commit_input, index, spec)
            .map_err(|err| self.crypto_err(err))
    }

    pub fn make_remote_txs(
        &self,
        index: u64,
        spec: &CommitmentSpec,
        remote_per_commitment_point: &PublicKey,
    ) -> Result<CommitTxs, ChannelError> {
        make_remote_txs(
            &self.local_params,
            &self.remote_params,
            &self.commit_input,
            index,
            spec,
            remote_per_commitment_point,
        )
        .map_err(|err| self.crypto_err(err))
    }

    /// Our commitment transaction with both signatures
    pub fn signed_local_commit_tx(&self) -> bitcoin::Transaction {
        let keys = &self.local_params.keys;
        let commit = &self.local_commit.commit_tx;
        let local_sig = commit.sign(&keys.funding_secret);
        commit.signed(
            &keys.to_public().funding_pubkey,
            &local_sig,
            &self.remote_params.keys.funding_pubkey,
            &self.local_commit.remote_sig,
        )
    }

    fn incoming_htlc_cross_signed(&self, id: u64) -> Option<&UpdateAddHtlc> {
        self.latest_remote_commit().spec.find_htlc(Direction::Offered, id)?;
        self.local_commit.spec.find_htlc(Direction::Received, id)
    }

    fn outgoing_htlc_cross_signed(&self, id: u64) -> Option<&UpdateAddHtlc> {
        self.latest_remote_commit().spec.find_htlc(Direction::Received, id)?;
        self.local_commit.spec.find_htlc(Direction::Offered, id)
    }

    /// Incoming HTLC which we may settle: cross-signed and not being settled
    /// yet
    fn settleable_incoming_htlc(&self, id: u64) -> Result<&UpdateAddHtlc, ChannelError> {
        let already_settled = self.local_changes.all().any(|c| c.settled_htlc_id() == Some(id));
        match self.incoming_htlc_cross_signed(id) {
            Some(htlc) if !already_settled => Ok(htlc),
            _ => Err(ChannelError::UnknownHtlcId(self.channel_id, id)),
        }
    }

    fn settleable_outgoing_htlc(&self, id: u64) -> Result<&UpdateAddHtlc, ChannelError> {
        let already_settled = self.remote_changes.all().any(|c| c.settled_htlc_id() == Some(id));
        match self.outgoing_htlc_cross_signed(id) {
            Some(htlc) if !already_settled => Ok(htlc),
            _ => Err(ChannelError::UnknownHtlcId(self.channel_id, id)),
        }
    }

    pub fn send_add(
        &self,
        cmd: &CmdAddHtlc,
        block_height: u32,
        config: &Config,
    ) -> Result<(Commitments, UpdateAddHtlc), ChannelError> {
        let channel_id = self.channel_id;
        if cmd.cltv_expiry <= block_height {
            return Err(ChannelError::ExpiryTooSmall {
                channel_id,
                actual: cmd.cltv_expiry,
                block_height,
            });
        }
        let max_expiry = block_height + config.max_cltv_expiry_delta;
        if cmd.cltv_expiry > max_expiry {
            return Err(ChannelError::ExpiryTooBig {
                channel_id,
                maximum: max_expiry,
                actual: cmd.cltv_expiry,
            });
        }
        let minimum = self.remote_params.htlc_minimum_msat.max(1);
        if cmd.amount_msat < minimum {
            return Err(ChannelError::HtlcValueTooSmall {
                channel_id,
                minimum,
                actual: cmd.amount_msat,
            });
        }

        let add = UpdateAddHtlc {
            channel_id,
            id: self.local_next_htlc_id,
            amount_msat: cmd.amount_msat,
            payment_hash: cmd.payment_hash,
            cltv_expiry: cmd.cltv_expiry,
            onion_routing_packet: cmd.onion_routing_packet.clone(),
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(add.clone().into());
        next.local_next_htlc_id += 1;

        // the peer must be able to accept the HTLC in its next commitment
        let reduced = next
            .latest_remote_commit()
            .spec
            .reduce(&next.remote_changes.acked, &next.local_changes.proposed);
        let in_flight = reduced.received().map(|htlc| htlc.amount_msat).sum::<u64>();
        if in_flight > self.remote_params.max_htlc_value_in_flight_msat {
            return Err(ChannelError::HtlcValueTooHighInFlight {
                channel_id,
                maximum: self.remote_params.max_htlc_value_in_flight_msat,
                actual: in_flight,
            });
        }
        if reduced.received().count() > self.remote_params.max_accepted_htlcs as usize {
            return Err(ChannelError::TooManyAcceptedHtlcs {
                channel_id,
                maximum: self.remote_params.max_accepted_htlcs,
            });
        }
        let fees_sat = if self.is_funder() {
            commit_tx_fee_with_anchors_sat(self.remote_params.dust_limit_sat, &reduced)
        } else {
            0
        };
        let reserve_sat = self.remote_params.channel_reserve_sat;
        let available = (reduced.to_remote_msat / 1000) as i64;
        let missing = available - reserve_sat as i64 - fees_sat as i64;
        if missing < 0 {
            return Err(ChannelError::InsufficientFunds {
                channel_id,
                amount_msat: cmd.amount_msat,
                missing_sat: (-missing) as u64,
                reserve_sat,
                fees_sat,
            });
        }
        Ok((next, add))
    }

    pub fn receive_add(
        &self,
        add: &UpdateAddHtlc,
        block_height: u32,
        config: &Config,
    ) -> Result<Commitments, ChannelError> {
        let channel_id = self.channel_id;
        if add.id != self.remote_next_htlc_id {
            return Err(ChannelError::UnexpectedHtlcId {
                channel_id,
                expected: self.remote_next_htlc_id,
                actual: add.id,
            });
        }
        if add.cltv_expiry <= block_height {
            return Err(ChannelError::ExpiryTooSmall {
                channel_id,
                actual: add.cltv_expiry,
                block_height,
            });
        }
        let max_expiry = block_height.saturating_add(config.max_cltv_expiry_delta);
        if add.cltv_expiry > max_expiry {
            return Err(ChannelError::ExpiryTooBig {
                channel_id,
                maximum: max_expiry,
                actual: add.cltv_expiry,
            });
        }
        let minimum = self.local_params.htlc_minimum_msat.max(1);
        if add.amount_msat < minimum {
            return Err(ChannelError::HtlcValueTooSmall {
                channel_id,
                minimum,
                actual: add.amount_msat,
            });
        }

        let mut next = self.clone();
        next.remote_changes.proposed.push(add.clone().into());
        next.remote_next_htlc_id += 1;

        let reduced =
            next.local_commit.spec.reduce(&next.local_changes.acked, &next.remote_changes.proposed);
        let in_flight = reduced.received().map(|htlc| htlc.amount_msat).sum::<u64>();
        if in_flight > self.local_params.max_htlc_value_in_flight_msat {
            return Err(ChannelError::HtlcValueTooHighInFlight {
                channel_id,
                maximum: self.local_params.max_htlc_value_in_flight_msat,
                actual: in_flight,
            });
        }
        if reduced.received().count() > self.local_params.max_accepted_htlcs as usize {
            return Err(ChannelError::TooManyAcceptedHtlcs {
                channel_id,
                maximum: self.local_params.max_accepted_htlcs,
            });
        }
        let fees_sat = if self.is_funder() {
            0
        } else {
            commit_tx_fee_with_anchors_sat(self.local_params.dust_limit_sat, &reduced)
        };
        let reserve_sat = self.local_params.channel_reserve_sat;
        let available = (reduced.to_remote_msat / 1000) as i64;
        let missing = available - reserve_sat as i64 - fees_sat as i64;
        if missing < 0 {
            return Err(ChannelError::InsufficientFunds {
                channel_id,
                amount_msat: add.amount_msat,
                missing_sat: (-missing) as u64,
                reserve_sat,
                fees_sat,
            });
        }
        Ok(next)
    }

    pub fn send_fulfill(
        &self,
        cmd: &CmdFulfillHtlc,
    ) -> Result<(Commitments, UpdateFulfillHtlc), ChannelError> {
        let htlc = self.settleable_incoming_htlc(cmd.id)?;
        if sha256::Hash::hash(&cmd.payment_preimage) != htlc.payment_hash {
            return Err(ChannelError::InvalidHtlcPreimage(self.channel_id, cmd.id));
        }
        let fulfill = UpdateFulfillHtlc {
            channel_id: self.channel_id,
            id: cmd.id,
            payment_preimage: cmd.payment_preimage,
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(fulfill.clone().into());
        Ok((next, fulfill))
    }

    pub fn receive_fulfill(&self, fulfill: &UpdateFulfillHtlc) -> Result<Commitments, ChannelError> {
        let htlc = self.settleable_outgoing_htlc(fulfill.id)?;
        if sha256::Hash::hash(&fulfill.payment_preimage) != htlc.payment_hash {
            return Err(ChannelError::InvalidHtlcPreimage(self.channel_id, fulfill.id));
        }
        let mut next = self.clone();
        next.remote_changes.proposed.push(fulfill.clone().into());
        Ok(next)
    }

    pub fn send_fail(&self, cmd: &CmdFailHtlc) -> Result<(Commitments, UpdateFailHtlc), ChannelError> {
        self.settleable_incoming_htlc(cmd.id)?;
        let fail =
            UpdateFailHtlc { channel_id: self.channel_id, id: cmd.id, reason: cmd.reason.clone() };
        let mut next = self.clone();
        next.local_changes.proposed.push(fail.clone().into());
        Ok((next, fail))
    }

    pub fn receive_fail(&self, fail: &UpdateFailHtlc) -> Result<Commitments, ChannelError> {
        self.settleable_outgoing_htlc(fail.id)?;
        let mut next = self.clone();
        next.remote_changes.proposed.push(fail.clone().into());
        Ok(next)
    }

    pub fn send_fail_malformed(
        &self,
        cmd: &CmdFailMalformedHtlc,
    ) -> Result<(Commitments, UpdateFailMalformedHtlc), ChannelError> {
        if cmd.failure_code & BADONION == 0 {
            return Err(ChannelError::InvalidFailureCode(self.channel_id, cmd.failure_code));
        }
        self.settleable_incoming_htlc(cmd.id)?;
        let fail = UpdateFailMalformedHtlc {
            channel_id: self.channel_id,
            id: cmd.id,
            sha256_of_onion: cmd.sha256_of_onion,
            failure_code: cmd.failure_code,
        };
        let mut next = self.clone();
        next.local_changes.proposed.push(fail.clone().into());
        Ok((next, fail))
    }

    pub fn receive_fail_malformed(
        &self,
        fail: &UpdateFailMalformedHtlc,
    ) -> Result<Commitments, ChannelError> {
        if fail.failure_code & BADONION == 0 {
            return Err(ChannelError::InvalidFailureCode(self.channel_id, fail.failure_code));
        }
        self.settleable_outgoing_htlc(fail.id)?;
        let mut next = self.clone();
        next.remote_changes.proposed.push(fail.clone().into());
        Ok(next)
    }

    pub fn send_fee(
        &self,
        cmd: &CmdUpdateFee,
        config: &Config,
    ) -> Result<(Commitments, UpdateFee), ChannelError> {
        let channel_id = self.channel_id;
        if !self.is_funder() {
            return Err(ChannelError::FundeeCannotSendUpdateFee(channel_id));
        }
        if cmd.feerate_per_kw < config.min_feerate_per_kw {
            return Err(ChannelError::FeerateTooSmall {
                channel_id,
                minimum: config.min_feerate_per_kw,
                actual: cmd.feerate_per_kw,
            });
        }
        let fee = UpdateFee { channel_id, feerate_per_kw: cmd.feerate_per_kw };
        let mut next = self.clone();
        // a new fee update replaces the ones not signed yet
        next.local_changes.proposed.retain(|change| !matches!(change, UpdateMessage::Fee(_)));
        next.local_changes.proposed.push(fee.clone().into());

        let reduced = next
            .latest_remote_commit()
            .spec
            .reduce(&next.remote_changes.acked, &next.local_changes.proposed);
        let fees_sat = commit_tx_fee_with_anchors_sat(self.remote_params.dust_limit_sat, &reduced);
        let reserve_sat = self.remote_params.channel_reserve_sat;
        let missing =
            (reduced.to_remote_msat / 1000) as i64 - reserve_sat as i64 - fees_sat as i64;
        if missing < 0 {
            return Err(ChannelError::CannotAffordFees {
                channel_id,
                missing_sat: (-missing) as u64,
                reserve_sat,
                fees_sat,
            });
        }
        Ok((next, fee))
    }

    pub fn receive_fee(&self, fee: &UpdateFee, config: &Config) -> Result<Commitments, ChannelError> {
        let channel_id = self.channel_id;
        if self.is_funder() {
            return Err(ChannelError::FundeeCannotSendUpdateFee(channel_id));
        }
        if fee.feerate_per_kw < config.min_feerate_per_kw {
            return Err(ChannelError::FeerateTooSmall {
                channel_id,
                minimum: config.min_feerate_per_kw,
                actual: fee.feerate_per_kw,
            });
        }
        let mut next = self.clone();
        next.remote_changes.proposed.retain(|change| !matches!(change, UpdateMessage::Fee(_)));
        next.remote_changes.proposed.push(fee.clone().into());

        let reduced =
            next.local_commit.spec.reduce(&next.local_changes.acked, &next.remote_changes.proposed);
        let fees_sat = commit_tx_fee_with_anchors_sat(self.local_params.dust_limit_sat, &reduced);
        let reserve_sat = self.local_params.channel_reserve_sat;
        let missing =
            (reduced.to_remote_msat / 1000) as i64 - reserve_sat as i64 - fees_sat as i64;
        if missing < 0 {
            return Err(ChannelError::CannotAffordFees {
                channel_id,
                missing_sat: (-missing) as u64,
                reserve_sat,
                fees_sat,
            });
        }
        Ok(next)
    }

    /// Signs the next remote commitment. Returns `None` if there is nothing to
    /// sign or if a previous signature is still waiting for revocation.
    pub fn send_commit(
        &self,
    ) -> Result<Option<(Commitments, CommitSig, Vec<HtlcInfo>)>, ChannelError> {
        let remote_point = match &self.remote_next_commit_info {
            RemoteNextCommitInfo::NextPoint(point) => *point,
            RemoteNextCommitInfo::WaitingForRevocation(_) => return Ok(None),
        };
        if !self.local_has_changes() {
            return Ok(None);
        }

        let spec =
            self.remote_commit.spec.reduce(&self.remote_changes.acked, &self.local_changes.proposed);
        let index = self.remote_commit.index + 1;
        let txs = self.make_remote_txs(index, &spec, &remote_point)?;

        let keys = &self.local_params.keys;
        let signature = txs.commit_tx.sign(&keys.funding_secret);
        let htlc_key =
            derive_privkey(&keys.htlc_base_secret, &remote_point).map_err(|e| self.crypto_err(e))?;
        let htlc_signatures = txs.htlc_txs.iter().map(|tx| tx.sign(&htlc_key)).collect();
        let commit_sig = CommitSig { channel_id: self.channel_id, signature, htlc_signatures };

        let htlc_infos = spec
            .htlcs
            .iter()
            .map(|htlc| HtlcInfo {
                payment_hash: htlc.add.payment_hash,
                cltv_expiry: htlc.add.cltv_expiry,
            })
            .collect();

        let mut next = self.clone();
        next.remote_next_commit_info = RemoteNextCommitInfo::WaitingForRevocation(WaitingForRevocation {
            next_remote_commit: RemoteCommit {
                index,
                spec,
                txid: txs.commit_tx.txid(),
                remote_per_commitment_point: remote_point,
            },
            sent: commit_sig.clone(),
            sent_after_local_commit_index: self.local_commit.index,
        });
        next.local_changes.signed = mem::take(&mut next.local_changes.proposed);
        next.remote_changes.signed = mem::take(&mut next.remote_changes.acked);
        Ok(Some((next, commit_sig, htlc_infos)))
    }

    pub fn receive_commit(&self, msg: &CommitSig) -> Result<(Commitments, RevokeAndAck), ChannelError> {
        let channel_id = self.channel_id;
        if !self.remote_has_changes() {
            return Err(ChannelError::CannotSignWithoutChanges(channel_id));
        }

        let spec =
            self.local_commit.spec.reduce(&self.local_changes.acked, &self.remote_changes.proposed);
        let index = self.local_commit.index + 1;
        let txs = self.make_local_txs(index, &spec)?;

        if !txs.commit_tx.check_sig(&msg.signature, &self.remote_params.keys.funding_pubkey) {
            return Err(ChannelError::InvalidCommitmentSignature(channel_id, txs.commit_tx.txid()));
        }
        if msg.htlc_signatures.len() != txs.htlc_txs.len() {
            return Err(ChannelError::HtlcSigCountMismatch {
                channel_id,
                expected: txs.htlc_txs.len(),
                actual: msg.htlc_signatures.len(),
            });
        }
        let keys = &self.local_params.keys;
        let local_htlc_key = derive_privkey(&keys.htlc_base_secret, &txs.keys.per_commitment_point)
            .map_err(|e| self.crypto_err(e))?;
        let mut htlc_txs_and_sigs = Vec::with_capacity(txs.htlc_txs.len());
        for (htlc_tx, remote_sig) in txs.htlc_txs.into_iter().zip(&msg.htlc_signatures) {
            if !htlc_tx.check_sig(remote_sig, &txs.keys.counterparty_htlc_key) {
                return Err(ChannelError::InvalidHtlcSignature(channel_id, htlc_tx.txid()));
            }
            let local_sig = htlc_tx.sign(&local_htlc_key);
            htlc_txs_and_sigs.push(HtlcTxAndSigs { htlc_tx, local_sig, remote_sig: *remote_sig });
        }

        let revocation = RevokeAndAck {
            channel_id,
            per_commitment_secret: keys.per_commitment_secret(self.local_commit.index),
            next_per_commitment_point: keys
                .per_commitment_point(self.local_commit.index + 2)
                .map_err(|e| self.crypto_err(e))?,
        };

        let mut next = self.clone();
        next.local_commit = LocalCommit {
            index,
            spec,
            commit_tx: txs.commit_tx,
            remote_sig: msg.signature,
            htlc_txs_and_sigs,
        };
        next.local_changes.acked.clear();
        let proposed = mem::take(&mut next.remote_changes.proposed);
        next.remote_changes.acked.extend(proposed);
        Ok((next, revocation))
    }

    /// Revocation which we would have sent for our current commitment; used
    /// for retransmission on reconnection
    pub fn last_revocation(&self) -> Result<RevokeAndAck, ChannelError> {
        let keys = &self.local_params.keys;
        let index = self.local_commit.index;
        Ok(RevokeAndAck {
            channel_id: self.channel_id,
            per_commitment_secret: keys.per_commitment_secret(index.saturating_sub(1)),
            next_per_commitment_point: keys
                .per_commitment_point(index + 1)
                .map_err(|e| self.crypto_err(e))?,
        })
    }

    /// Processes the peer revocation. Returns updated commitments and the
    /// notifications about HTLCs which became irrevocably committed or
    /// resolved.
    pub fn receive_revocation(
        &self,
        msg: &RevokeAndAck,
    ) -> Result<(Commitments, Vec<ChannelAction>), ChannelError> {
        let channel_id = self.channel_id;
        let waiting = match &self.remote_next_commit_info {
            RemoteNextCommitInfo::WaitingForRevocation(waiting) => waiting,
            RemoteNextCommitInfo::NextPoint(_) => {
                return Err(ChannelError::UnexpectedRevocation(channel_id))
            }
        };
        let secret = SecretKey::from_slice(&msg.per_commitment_secret)
            .map_err(|_| ChannelError::InvalidRevocation(channel_id))?;
        if PublicKey::from_secret_key(&*SECP256K1, &secret)
            != self.remote_commit.remote_per_commitment_point
        {
            return Err(ChannelError::InvalidRevocation(channel_id));
        }

        let mut next = self.clone();
        next.remote_per_commitment_secrets
            .provide_secret(secret_index(self.remote_commit.index), msg.per_commitment_secret)
            .map_err(|_| ChannelError::InvalidRevocation(channel_id))?;

        let mut actions = vec![];
        let outgoing = |id: u64| self.remote_commit.spec.find_htlc(Direction::Received, id).cloned();
        for change in &self.remote_changes.signed {
            match change {
                UpdateMessage::AddHtlc(add) => {
                    actions.push(ChannelAction::ProcessIncomingHtlc(add.clone()))
                }
                UpdateMessage::FulfillHtlc(fulfill) => {
                    if let Some(htlc) = outgoing(fulfill.id) {
                        actions.push(
                            CmdResult::AddSettledFulfill {
                                htlc,
                                payment_preimage: fulfill.payment_preimage,
                            }
                            .into(),
                        );
                    }
                }
                UpdateMessage::FailHtlc(fail) => {
                    if let Some(htlc) = outgoing(fail.id) {
                        let failure = HtlcFailure::RemoteFail(fail.clone());
                        actions.push(CmdResult::AddSettledFail { htlc, failure }.into());
                    }
                }
                UpdateMessage::FailMalformedHtlc(fail) => {
                    if let Some(htlc) = outgoing(fail.id) {
                        let failure = HtlcFailure::RemoteFailMalformed(fail.clone());
                        actions.push(CmdResult::AddSettledFail { htlc, failure }.into());
                    }
                }
                UpdateMessage::Fee(_) => {}
            }
        }

        next.remote_commit = waiting.next_remote_commit.clone();
        next.remote_next_commit_info =
            RemoteNextCommitInfo::NextPoint(msg.next_per_commitment_point);
        let signed = mem::take(&mut next.local_changes.signed);
        next.local_changes.acked.extend(signed);
        next.remote_changes.signed.clear();
        Ok((next, actions))
    }

    /// Drops changes which were not signed yet, as required on disconnection.
    /// Returns the dropped outgoing HTLCs.
    pub fn discard_unsigned_changes(&self) -> (Commitments, Vec<UpdateAddHtlc>) {
        let mut next = self.clone();
        let local = mem::take(&mut next.local_changes.proposed);
        let remote = mem::take(&mut next.remote_changes.proposed);
        let dropped = local
            .into_iter()
            .filter_map(|change| match change {
                UpdateMessage::AddHtlc(add) => Some(add),
                _ => None,
            })
            .collect::<Vec<_>>();
        let remote_adds =
            remote.iter().filter(|change| matches!(change, UpdateMessage::AddHtlc(_))).count();
        next.local_next_htlc_id -= dropped.len() as u64;
        next.remote_next_htlc_id -= remote_adds as u64;
        (next, dropped)
    }
}
