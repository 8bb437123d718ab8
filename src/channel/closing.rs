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

//! Close resolver: claim and penalty transactions for every published
//! commitment, tracking of their on-chain resolution, and the cooperative
//! closing transaction with its fee negotiation.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{OutPoint, Script, Transaction, Txid};

use super::actions::ChannelAction;
use super::commitments::{channel_obscuring_factor, Commitments, RemoteCommit};
use super::error::ChannelError;
use super::events::{Watch, WatchTag};
use super::htlc::{Direction, HtlcInfo};
use super::keys::{derive_privkey, revocation_privkey};
use super::messages::{ClosingSigned, UpdateAddHtlc};
use super::params::OnChainFeerates;
use super::scripts;
use super::transactions::{
    closing_fee_sat, decode_commitment_number, find_output, make_claim_tx, ClaimKind, ClaimTx,
    CommitmentKeys, FundingSpendTx, HtlcTxKind, SpendingTx, CLAIM_DELAYED_WEIGHT,
    CLAIM_HTLC_SUCCESS_WEIGHT, CLAIM_HTLC_TIMEOUT_WEIGHT, CLAIM_REMOTE_DELAYED_WEIGHT,
    HTLC_PENALTY_WEIGHT, MAIN_PENALTY_WEIGHT,
};
use crate::{Config, SECP256K1};

const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// Common bookkeeping of a commitment transaction found on-chain together with
/// the transactions we use to recover funds from it
pub trait PublishedCommit {
    fn commit_tx(&self) -> &Transaction;

    /// Transactions spending the commitment outputs, or outputs of its
    /// second-stage transactions
    fn claim_txs(&self) -> Vec<&Transaction>;

    fn irrevocably_spent(&self) -> &BTreeMap<OutPoint, Txid>;

    fn irrevocably_spent_mut(&mut self) -> &mut BTreeMap<OutPoint, Txid>;

    /// Transactions we have to broadcast
    fn txs_to_publish(&self) -> Vec<Transaction> {
        self.claim_txs().into_iter().cloned().collect()
    }

    fn is_commit_confirmed(&self) -> bool {
        self.commit_tx()
            .input
            .iter()
            .all(|input| self.irrevocably_spent().contains_key(&input.previous_output))
    }

    /// Whether the commitment and every output we claim are buried
    fn is_done(&self) -> bool {
        self.is_commit_confirmed()
            && self.claim_txs().iter().all(|tx| {
                tx.input
                    .iter()
                    .all(|input| self.irrevocably_spent().contains_key(&input.previous_output))
            })
    }

    /// Records outputs spent by a confirmed transaction, if they are relevant
    /// to this commitment. Returns whether anything was recorded.
    fn update_irrevocably_spent(&mut self, tx: &Transaction) -> bool {
        let relevant = std::iter::once(self.commit_tx())
            .chain(self.claim_txs())
            .flat_map(|tx| tx.input.iter().map(|input| input.previous_output))
            .collect::<BTreeSet<_>>();
        let txid = tx.txid();
        let spent = tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .filter(|outpoint| relevant.contains(outpoint))
            .collect::<Vec<_>>();
        for outpoint in &spent {
            self.irrevocably_spent_mut().insert(*outpoint, txid);
        }
        !spent.is_empty()
    }

    /// Broadcasts and watches required to resolve the commitment
    fn publish_actions(&self, min_depth: u32) -> Vec<ChannelAction> {
        let mut actions =
            self.txs_to_publish().into_iter().map(ChannelAction::publish).collect::<Vec<_>>();
        actions.push(ChannelAction::watch(Watch::Confirmed {
            txid: self.commit_tx().txid(),
            min_depth,
            tag: WatchTag::TxConfirmed,
        }));
        let commit_txid = self.commit_tx().txid();
        let claimed = self
            .claim_txs()
            .into_iter()
            .flat_map(|tx| tx.input.iter().map(|input| input.previous_output))
            .filter(|outpoint| outpoint.txid == commit_txid)
            .collect::<BTreeSet<_>>();
        actions.extend(claimed.into_iter().map(|outpoint| {
            ChannelAction::watch(Watch::Spent { outpoint, tag: WatchTag::OutputSpent })
        }));
        actions
    }
}

/// Our own commitment published by us
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct LocalCommitPublished {
    pub commit_tx: Transaction,
    pub claim_main_delayed_output_tx: Option<ClaimTx>,
    pub htlc_success_txs: Vec<Transaction>,
    pub htlc_timeout_txs: Vec<Transaction>,
    /// Third-stage claims of confirmed HTLC transactions
    pub claim_htlc_delayed_txs: Vec<ClaimTx>,
    pub irrevocably_spent: BTreeMap<OutPoint, Txid>,
}

impl LocalCommitPublished {
    /// Our commitment tracked without claims, when its outputs can't be
    /// claimed
    pub fn unclaimed(commit_tx: Transaction) -> LocalCommitPublished {
        LocalCommitPublished {
            commit_tx,
            claim_main_delayed_output_tx: None,
            htlc_success_txs: vec![],
            htlc_timeout_txs: vec![],
            claim_htlc_delayed_txs: vec![],
            irrevocably_spent: empty!(),
        }
    }
}

impl PublishedCommit for LocalCommitPublished {
    fn commit_tx(&self) -> &Transaction { &self.commit_tx }

    fn claim_txs(&self) -> Vec<&Transaction> {
        self.claim_main_delayed_output_tx
            .iter()
            .map(|claim| &claim.tx)
            .chain(&self.htlc_success_txs)
            .chain(&self.htlc_timeout_txs)
            .chain(self.claim_htlc_delayed_txs.iter().map(|claim| &claim.tx))
            .collect()
    }

    fn irrevocably_spent(&self) -> &BTreeMap<OutPoint, Txid> { &self.irrevocably_spent }

    fn irrevocably_spent_mut(&mut self) -> &mut BTreeMap<OutPoint, Txid> {
        &mut self.irrevocably_spent
    }

    fn txs_to_publish(&self) -> Vec<Transaction> {
        let mut txs = vec![self.commit_tx.clone()];
        txs.extend(self.claim_txs().into_iter().cloned());
        txs
    }
}

/// Current or next remote commitment published by the peer
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct RemoteCommitPublished {
    pub commit_tx: Transaction,
    pub claim_main_output_tx: Option<ClaimTx>,
    pub claim_htlc_success_txs: Vec<ClaimTx>,
    pub claim_htlc_timeout_txs: Vec<ClaimTx>,
    pub irrevocably_spent: BTreeMap<OutPoint, Txid>,
}

impl RemoteCommitPublished {
    pub fn unclaimed(commit_tx: Transaction) -> RemoteCommitPublished {
        RemoteCommitPublished {
            commit_tx,
            claim_main_output_tx: None,
            claim_htlc_success_txs: vec![],
            claim_htlc_timeout_txs: vec![],
            irrevocably_spent: empty!(),
        }
    }
}

impl PublishedCommit for RemoteCommitPublished {
    fn commit_tx(&self) -> &Transaction { &self.commit_tx }

    fn claim_txs(&self) -> Vec<&Transaction> {
        self.claim_main_output_tx
            .iter()
            .chain(&self.claim_htlc_success_txs)
            .chain(&self.claim_htlc_timeout_txs)
            .map(|claim| &claim.tx)
            .collect()
    }

    fn irrevocably_spent(&self) -> &BTreeMap<OutPoint, Txid> { &self.irrevocably_spent }

    fn irrevocably_spent_mut(&mut self) -> &mut BTreeMap<OutPoint, Txid> {
        &mut self.irrevocably_spent
    }
}

/// Revoked remote commitment published by the peer
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct RevokedCommitPublished {
    pub commit_tx: Transaction,
    pub commitment_number: u64,
    pub claim_main_output_tx: Option<ClaimTx>,
    pub main_penalty_tx: Option<ClaimTx>,
    pub htlc_penalty_txs: Vec<ClaimTx>,
    /// Penalties for second-stage transactions the peer published from the
    /// revoked commitment
    pub claim_htlc_delayed_penalty_txs: Vec<ClaimTx>,
    pub irrevocably_spent: BTreeMap<OutPoint, Txid>,
}

impl RevokedCommitPublished {
    pub fn unclaimed(commitments: &Commitments, commit_tx: Transaction) -> RevokedCommitPublished {
        let obscuring_factor =
            channel_obscuring_factor(&commitments.local_params, &commitments.remote_params);
        let commitment_number =
            decode_commitment_number(&commit_tx, obscuring_factor).unwrap_or_default();
        RevokedCommitPublished {
            commit_tx,
            commitment_number,
            claim_main_output_tx: None,
            main_penalty_tx: None,
            htlc_penalty_txs: vec![],
            claim_htlc_delayed_penalty_txs: vec![],
            irrevocably_spent: empty!(),
        }
    }
}

impl PublishedCommit for RevokedCommitPublished {
    fn commit_tx(&self) -> &Transaction { &self.commit_tx }

    fn claim_txs(&self) -> Vec<&Transaction> {
        self.claim_main_output_tx
            .iter()
            .chain(&self.main_penalty_tx)
            .chain(&self.htlc_penalty_txs)
            .chain(&self.claim_htlc_delayed_penalty_txs)
            .map(|claim| &claim.tx)
            .collect()
    }

    fn irrevocably_spent(&self) -> &BTreeMap<OutPoint, Txid> { &self.irrevocably_spent }

    fn irrevocably_spent_mut(&mut self) -> &mut BTreeMap<OutPoint, Txid> {
        &mut self.irrevocably_spent
    }
}

/// Mutual close transaction we proposed together with our signature
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ClosingTxProposed {
    pub unsigned_tx: FundingSpendTx,
    pub local_closing_signed: ClosingSigned,
}

fn crypto_err(commitments: &Commitments) -> impl Fn(bitcoin::secp256k1::Error) -> ChannelError {
    let channel_id = commitments.channel_id;
    move |err| ChannelError::Crypto(channel_id, err.to_string())
}

/// Builds and signs all transactions spending our current commitment
pub fn claim_current_local_commit_outputs(
    commitments: &Commitments,
    feerates: &OnChainFeerates,
) -> Result<LocalCommitPublished, ChannelError> {
    let local = &commitments.local_params;
    let remote = &commitments.remote_params;
    let commit_tx = commitments.signed_local_commit_tx();
    let index = commitments.local_commit.index;
    let point = local.keys.per_commitment_point(index).map_err(crypto_err(commitments))?;
    let keys = CommitmentKeys::derive(&point, &local.keys.to_public(), &remote.keys)
        .map_err(crypto_err(commitments))?;
    let delayed_key = derive_privkey(&local.keys.delayed_payment_base_secret, &point)
        .map_err(crypto_err(commitments))?;

    let claim_main_delayed_output_tx =
        find_output(&commit_tx, &keys.to_local_script(remote.to_self_delay), &[])
            .and_then(|input| {
                make_claim_tx(
                    ClaimKind::LocalDelayed,
                    input,
                    remote.to_self_delay as u32,
                    0,
                    &local.default_final_script_pubkey,
                    CLAIM_DELAYED_WEIGHT,
                    feerates.claim_main_feerate,
                    local.dust_limit_sat,
                )
            })
            .map(|claim| claim.signed(&delayed_key))
            .ok();

    let preimages = commitments.known_preimages();
    let mut htlc_success_txs = vec![];
    let mut htlc_timeout_txs = vec![];
    for item in &commitments.local_commit.htlc_txs_and_sigs {
        let htlc_tx = &item.htlc_tx;
        match htlc_tx.kind {
            HtlcTxKind::Timeout => {
                htlc_timeout_txs.push(htlc_tx.signed(&item.local_sig, &item.remote_sig, None))
            }
            HtlcTxKind::Success => {
                // without the preimage the output is left to the peer timeout
                if let Some(preimage) = preimages.get(&htlc_tx.htlc_id) {
                    htlc_success_txs.push(htlc_tx.signed(
                        &item.local_sig,
                        &item.remote_sig,
                        Some(*preimage),
                    ))
                }
            }
        }
    }

    Ok(LocalCommitPublished {
        commit_tx,
        claim_main_delayed_output_tx,
        htlc_success_txs,
        htlc_timeout_txs,
        claim_htlc_delayed_txs: vec![],
        irrevocably_spent: empty!(),
    })
}

/// Builds the claim of the delayed output of our confirmed HTLC transaction
pub fn claim_local_htlc_delayed_output(
    commitments: &Commitments,
    local_commit_published: &LocalCommitPublished,
    htlc_tx: &Transaction,
    feerates: &OnChainFeerates,
) -> Result<Option<ClaimTx>, ChannelError> {
    let txid = htlc_tx.txid();
    let is_ours = local_commit_published
        .htlc_success_txs
        .iter()
        .chain(&local_commit_published.htlc_timeout_txs)
        .any(|tx| tx.txid() == txid);
    let already_claimed = local_commit_published
        .claim_htlc_delayed_txs
        .iter()
        .any(|claim| claim.spent_outpoint().txid == txid);
    if !is_ours || already_claimed {
        return Ok(None);
    }

    let local = &commitments.local_params;
    let remote = &commitments.remote_params;
    let point = local
        .keys
        .per_commitment_point(commitments.local_commit.index)
        .map_err(crypto_err(commitments))?;
    let keys = CommitmentKeys::derive(&point, &local.keys.to_public(), &remote.keys)
        .map_err(crypto_err(commitments))?;
    let delayed_key = derive_privkey(&local.keys.delayed_payment_base_secret, &point)
        .map_err(crypto_err(commitments))?;
    let claim = find_output(htlc_tx, &keys.to_local_script(remote.to_self_delay), &[])
        .and_then(|input| {
            make_claim_tx(
                ClaimKind::LocalDelayed,
                input,
                remote.to_self_delay as u32,
                0,
                &local.default_final_script_pubkey,
                CLAIM_DELAYED_WEIGHT,
                feerates.claim_main_feerate,
                local.dust_limit_sat,
            )
        })
        .map(|claim| claim.signed(&delayed_key))
        .ok();
    Ok(claim)
}

/// Claim of our `to_remote` output in a remote commitment
fn claim_remote_main_output(
    commitments: &Commitments,
    keys: &CommitmentKeys,
    commit_tx: &Transaction,
    feerates: &OnChainFeerates,
) -> Option<ClaimTx> {
    let local = &commitments.local_params;
    let script = scripts::to_remote_delayed(&keys.counterparty_payment_key);
    find_output(commit_tx, &script, &[])
        .and_then(|input| {
            make_claim_tx(
                ClaimKind::RemoteMain,
                input,
                1,
                0,
                &local.default_final_script_pubkey,
                CLAIM_REMOTE_DELAYED_WEIGHT,
                feerates.claim_main_feerate,
                local.dust_limit_sat,
            )
        })
        .map(|claim| claim.signed(&local.keys.payment_base_secret))
        .ok()
}

/// Builds and signs the claims of our outputs in a current or next remote
/// commitment
pub fn claim_remote_commit_outputs(
    commitments: &Commitments,
    remote_commit: &RemoteCommit,
    commit_tx: &Transaction,
    feerates: &OnChainFeerates,
) -> Result<RemoteCommitPublished, ChannelError> {
    let local = &commitments.local_params;
    let point = &remote_commit.remote_per_commitment_point;
    let keys =
        CommitmentKeys::derive(point, &commitments.remote_params.keys, &local.keys.to_public())
            .map_err(crypto_err(commitments))?;
    let htlc_key =
        derive_privkey(&local.keys.htlc_base_secret, point).map_err(crypto_err(commitments))?;

    let claim_main_output_tx = claim_remote_main_output(commitments, &keys, commit_tx, feerates);

    let preimages = commitments.known_preimages();
    let mut used = vec![];
    let mut claim_htlc_success_txs = vec![];
    let mut claim_htlc_timeout_txs = vec![];
    for htlc in &remote_commit.spec.htlcs {
        let script = keys.htlc_script(htlc);
        let input = match find_output(commit_tx, &script, &used) {
            Ok(input) => input,
            // trimmed
            Err(_) => continue,
        };
        used.push(input.outpoint);
        // direction is relative to the peer, the owner of the commitment
        let claim = match htlc.direction {
            Direction::Received => make_claim_tx(
                ClaimKind::HtlcTimeout,
                input,
                1,
                htlc.add.cltv_expiry,
                &local.default_final_script_pubkey,
                CLAIM_HTLC_TIMEOUT_WEIGHT,
                feerates.fast_feerate,
                local.dust_limit_sat,
            )
            .map(|claim| (false, claim)),
            Direction::Offered => match preimages.get(&htlc.add.id) {
                Some(preimage) => make_claim_tx(
                    ClaimKind::HtlcSuccess { preimage: *preimage },
                    input,
                    1,
                    0,
                    &local.default_final_script_pubkey,
                    CLAIM_HTLC_SUCCESS_WEIGHT,
                    feerates.fast_feerate,
                    local.dust_limit_sat,
                )
                .map(|claim| (true, claim)),
                None => continue,
            },
        };
        match claim {
            Ok((true, claim)) => claim_htlc_success_txs.push(claim.signed(&htlc_key)),
            Ok((false, claim)) => claim_htlc_timeout_txs.push(claim.signed(&htlc_key)),
            Err(err) => debug!("HTLC #{} output is not claimed: {}", htlc.add.id, err),
        }
    }

    Ok(RemoteCommitPublished {
        commit_tx: commit_tx.clone(),
        claim_main_output_tx,
        claim_htlc_success_txs,
        claim_htlc_timeout_txs,
        irrevocably_spent: empty!(),
    })
}

/// Keys of a revoked remote commitment together with the revocation private
/// key
fn revoked_keys(
    commitments: &Commitments,
    commitment_number: u64,
) -> Result<Option<(CommitmentKeys, SecretKey)>, ChannelError> {
    let secret = match commitments
        .remote_per_commitment_secrets
        .secret_for_commitment(commitment_number)
    {
        Some(secret) => secret,
        None => return Ok(None),
    };
    let local = &commitments.local_params;
    let secret = SecretKey::from_slice(&secret).map_err(crypto_err(commitments))?;
    let point = PublicKey::from_secret_key(&*SECP256K1, &secret);
    let keys =
        CommitmentKeys::derive(&point, &commitments.remote_params.keys, &local.keys.to_public())
            .map_err(crypto_err(commitments))?;
    let revocation_key = revocation_privkey(&local.keys.revocation_base_secret, &secret)
        .map_err(crypto_err(commitments))?;
    Ok(Some((keys, revocation_key)))
}

/// Detects whether the transaction is a revoked remote commitment and, if so,
/// builds the main claim and the main penalty. HTLC penalties require HTLC
/// data from storage and are built by [`claim_revoked_htlc_outputs`].
pub fn claim_revoked_remote_commit_outputs(
    commitments: &Commitments,
    commit_tx: &Transaction,
    feerates: &OnChainFeerates,
) -> Result<Option<RevokedCommitPublished>, ChannelError> {
    let obscuring_factor =
        channel_obscuring_factor(&commitments.local_params, &commitments.remote_params);
    let commitment_number = match decode_commitment_number(commit_tx, obscuring_factor) {
        Some(number) if number < commitments.remote_commit.index => number,
        _ => return Ok(None),
    };
    let (keys, revocation_key) = match revoked_keys(commitments, commitment_number)? {
        Some(keys) => keys,
        None => return Ok(None),
    };
    let local = &commitments.local_params;

    let claim_main_output_tx = claim_remote_main_output(commitments, &keys, commit_tx, feerates);
    let main_penalty_tx = find_output(commit_tx, &keys.to_local_script(local.to_self_delay), &[])
        .and_then(|input| {
            make_claim_tx(
                ClaimKind::MainPenalty,
                input,
                SEQUENCE_FINAL,
                0,
                &local.default_final_script_pubkey,
                MAIN_PENALTY_WEIGHT,
                feerates.fast_feerate,
                local.dust_limit_sat,
            )
        })
        .map(|claim| claim.signed(&revocation_key))
        .ok();

    Ok(Some(RevokedCommitPublished {
        commit_tx: commit_tx.clone(),
        commitment_number,
        claim_main_output_tx,
        main_penalty_tx,
        htlc_penalty_txs: vec![],
        claim_htlc_delayed_penalty_txs: vec![],
        irrevocably_spent: empty!(),
    }))
}

/// Builds penalties for HTLC outputs of a revoked commitment. Every HTLC may
/// have been offered or received by the peer, so both scripts are tried.
pub fn claim_revoked_htlc_outputs(
    commitments: &Commitments,
    revoked: &RevokedCommitPublished,
    htlc_infos: &[HtlcInfo],
    feerates: &OnChainFeerates,
) -> Result<Vec<ClaimTx>, ChannelError> {
    let (keys, revocation_key) = match revoked_keys(commitments, revoked.commitment_number)? {
        Some(keys) => keys,
        None => return Ok(vec![]),
    };
    let local = &commitments.local_params;
    let mut used = revoked
        .htlc_penalty_txs
        .iter()
        .map(ClaimTx::spent_outpoint)
        .collect::<Vec<_>>();
    let mut penalties = vec![];
    for info in htlc_infos {
        let offered = scripts::htlc_offered(
            &keys.holder_htlc_key,
            &keys.counterparty_htlc_key,
            &keys.revocation_key,
            &info.payment_hash,
        );
        let received = scripts::htlc_received(
            &keys.holder_htlc_key,
            &keys.counterparty_htlc_key,
            &keys.revocation_key,
            &info.payment_hash,
            info.cltv_expiry,
        );
        for script in [offered, received] {
            let input = match find_output(&revoked.commit_tx, &script, &used) {
                Ok(input) => input,
                Err(_) => continue,
            };
            used.push(input.outpoint);
            match make_claim_tx(
                ClaimKind::HtlcPenalty { revocation_pubkey: keys.revocation_key },
                input,
                SEQUENCE_FINAL,
                0,
                &local.default_final_script_pubkey,
                HTLC_PENALTY_WEIGHT,
                feerates.fast_feerate,
                local.dust_limit_sat,
            ) {
                Ok(penalty) => penalties.push(penalty.signed(&revocation_key)),
                Err(err) => debug!("Revoked HTLC output is not claimed: {}", err),
            }
        }
    }
    Ok(penalties)
}

/// Builds the penalty for the output of a second-stage HTLC transaction
/// which the peer published from a revoked commitment
pub fn claim_revoked_htlc_tx_output(
    commitments: &Commitments,
    revoked: &RevokedCommitPublished,
    htlc_tx: &Transaction,
    feerates: &OnChainFeerates,
) -> Result<Option<ClaimTx>, ChannelError> {
    let commit_txid = revoked.commit_tx.txid();
    let spends_revoked = htlc_tx.input.iter().any(|input| input.previous_output.txid == commit_txid);
    let ours = revoked.claim_txs().iter().any(|tx| tx.txid() == htlc_tx.txid());
    if !spends_revoked || ours {
        return Ok(None);
    }
    let (keys, revocation_key) = match revoked_keys(commitments, revoked.commitment_number)? {
        Some(keys) => keys,
        None => return Ok(None),
    };
    let local = &commitments.local_params;
    let claim = find_output(htlc_tx, &keys.to_local_script(local.to_self_delay), &[])
        .and_then(|input| {
            make_claim_tx(
                ClaimKind::MainPenalty,
                input,
                SEQUENCE_FINAL,
                0,
                &local.default_final_script_pubkey,
                MAIN_PENALTY_WEIGHT,
                feerates.fast_feerate,
                local.dust_limit_sat,
            )
        })
        .map(|claim| claim.signed(&revocation_key))
        .ok();
    Ok(claim)
}

/// Outgoing HTLCs which the peer claimed on-chain revealing the preimage
pub fn extract_preimages(
    commitments: &Commitments,
    tx: &Transaction,
) -> Vec<(UpdateAddHtlc, [u8; 32])> {
    let mut outgoing = commitments
        .local_commit
        .spec
        .offered()
        .chain(commitments.remote_commit.spec.received())
        .map(|htlc| (htlc.id, htlc.clone()))
        .collect::<BTreeMap<_, _>>();
    outgoing.extend(
        commitments
            .latest_remote_commit()
            .spec
            .received()
            .map(|htlc| (htlc.id, htlc.clone())),
    );

    let mut found = BTreeMap::new();
    for input in &tx.input {
        for item in input.witness.iter().filter(|item| item.len() == 32) {
            let hash = sha256::Hash::hash(item);
            for htlc in outgoing.values().filter(|htlc| htlc.payment_hash == hash) {
                let mut preimage = [0u8; 32];
                preimage.copy_from_slice(item);
                found.entry(htlc.id).or_insert_with(|| (htlc.clone(), preimage));
            }
        }
    }
    found.into_values().collect()
}

/// Acceptable range of the closing fee proposed by the peer
pub fn closing_fee_bounds(config: &Config, feerates: &OnChainFeerates) -> (u64, u64) {
    (
        closing_fee_sat(config.min_feerate_per_kw),
        2 * closing_fee_sat(feerates.mutual_close_feerate),
    )
}

#[inline]
pub fn first_closing_fee(feerates: &OnChainFeerates) -> u64 {
    closing_fee_sat(feerates.mutual_close_feerate)
}

/// Next fee proposal; converges to the peer proposal in a few rounds
#[inline]
pub fn next_closing_fee(local_fee_sat: u64, remote_fee_sat: u64) -> u64 {
    ((local_fee_sat + remote_fee_sat) / 4) * 2
}

/// Builds the mutual close transaction with the given fee and signs it
pub fn make_closing_tx(
    commitments: &Commitments,
    local_script: &Script,
    remote_script: &Script,
    fee_sat: u64,
) -> (FundingSpendTx, ClosingSigned) {
    let dust_limit_sat =
        commitments.local_params.dust_limit_sat.max(commitments.remote_params.dust_limit_sat);
    let tx = super::transactions::make_closing_tx(
        &commitments.commit_input,
        local_script,
        remote_script,
        commitments.is_funder(),
        dust_limit_sat,
        fee_sat,
        &commitments.local_commit.spec,
    );
    let signature = tx.sign(&commitments.local_params.keys.funding_secret);
    let closing_signed =
        ClosingSigned { channel_id: commitments.channel_id, fee_satoshis: fee_sat, signature };
    (tx, closing_signed)
}

/// Verifies the peer signature of a mutual close transaction with the fee it
/// proposed. Returns the fully signed transaction.
pub fn check_closing_signature(
    commitments: &Commitments,
    local_script: &Script,
    remote_script: &Script,
    remote_closing_signed: &ClosingSigned,
) -> Result<(Transaction, ClosingSigned), ChannelError> {
    let (tx, local_closing_signed) =
        make_closing_tx(commitments, local_script, remote_script, remote_closing_signed.fee_satoshis);
    let remote_funding_pubkey = &commitments.remote_params.keys.funding_pubkey;
    if !tx.check_sig(&remote_closing_signed.signature, remote_funding_pubkey) {
        return Err(ChannelError::InvalidCloseSignature(commitments.channel_id, tx.txid()));
    }
    let signed = tx.signed(
        &commitments.local_params.keys.to_public().funding_pubkey,
        &local_closing_signed.signature,
        remote_funding_pubkey,
        &remote_closing_signed.signature,
    );
    Ok((signed, local_closing_signed))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::commitments::test::commitments_pair;

    #[test]
    fn closing_fee_converges() {
        let mut local = 5_000u64;
        let remote = 1_000u64;
        let mut rounds = 0;
        while local != remote && next_closing_fee(local, remote) != remote {
            local = next_closing_fee(local, remote);
            rounds += 1;
            assert!(rounds < 20, "fee negotiation does not converge");
        }
        assert!(local >= remote);
    }

    #[test]
    fn next_fee_is_even() {
        assert_eq!(next_closing_fee(1680, 840), 1260);
        assert_eq!(next_closing_fee(1001, 1000), 1000);
        assert_eq!(next_closing_fee(3, 0), 0);
    }

    #[test]
    fn fee_bounds() {
        let config = Config::default();
        let feerates = OnChainFeerates::default();
        let (min, max) = closing_fee_bounds(&config, &feerates);
        assert_eq!(min, 672 * 253 / 1000);
        assert_eq!(max, 2 * 1680);
        assert_eq!(first_closing_fee(&feerates), 1680);
    }

    #[test]
    fn unclaimed_commitment_is_tracked_until_buried() {
        let (alice, _) = commitments_pair();
        let commit_tx = alice.signed_local_commit_tx();
        let mut published = LocalCommitPublished::unclaimed(commit_tx.clone());
        assert_eq!(published.publish_actions(3), vec![
            ChannelAction::publish(commit_tx.clone()),
            ChannelAction::watch(Watch::Confirmed {
                txid: commit_tx.txid(),
                min_depth: 3,
                tag: WatchTag::TxConfirmed,
            }),
        ]);
        assert!(!published.is_done());
        assert!(published.update_irrevocably_spent(&commit_tx));
        assert!(published.is_done());
    }

    #[test]
    fn unclaimed_remote_commitments() {
        let (alice, bob) = commitments_pair();
        let commit_tx = bob.signed_local_commit_tx();
        let watch = ChannelAction::watch(Watch::Confirmed {
            txid: commit_tx.txid(),
            min_depth: 3,
            tag: WatchTag::TxConfirmed,
        });

        let remote = RemoteCommitPublished::unclaimed(commit_tx.clone());
        assert_eq!(remote.publish_actions(3), vec![watch.clone()]);

        let revoked = RevokedCommitPublished::unclaimed(&alice, commit_tx);
        assert_eq!(revoked.commitment_number, 0);
        assert_eq!(revoked.publish_actions(3), vec![watch]);
    }
}
