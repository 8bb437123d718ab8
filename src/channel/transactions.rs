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

//! BOLT-3 transaction construction: commitment, second-stage HTLC, claim,
//! penalty and mutual closing transactions.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{self, Message, PublicKey, SecretKey};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, OutPoint, Script, Transaction, TxIn, TxOut, Txid, Witness};

use super::htlc::{CommitmentSpec, DirectedHtlc, Direction};
use super::keys::{derive_pubkey, revocation_pubkey, Keyset};
use super::scripts;
use crate::SECP256K1;

pub const ANCHOR_AMOUNT_SAT: u64 = 330;
pub const COMMIT_WEIGHT: u64 = 1124;
pub const HTLC_OUTPUT_WEIGHT: u64 = 172;
pub const HTLC_TIMEOUT_WEIGHT: u64 = 666;
pub const HTLC_SUCCESS_WEIGHT: u64 = 706;
pub const CLAIM_REMOTE_DELAYED_WEIGHT: u64 = 507;
pub const CLAIM_HTLC_SUCCESS_WEIGHT: u64 = 571;
pub const CLAIM_HTLC_TIMEOUT_WEIGHT: u64 = 545;
pub const CLAIM_DELAYED_WEIGHT: u64 = 483;
pub const MAIN_PENALTY_WEIGHT: u64 = 484;
pub const HTLC_PENALTY_WEIGHT: u64 = 578;
pub const CLOSING_WEIGHT: u64 = 672;

#[inline]
pub fn weight_to_fee(weight: u64, feerate_per_kw: u32) -> u64 {
    weight * feerate_per_kw as u64 / 1000
}

/// Errors building claim transactions
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum TxError {
    /// output value {0} sat is too small to pay the claim fee above the dust limit
    AmountBelowDustLimit(u64),

    /// transaction {0} has no output with the expected script
    OutputNotFound(Txid),
}

/// The output spent by a single-input channel transaction
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct InputInfo {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub redeem_script: Script,
}

/// Channel transactions spend a single P2WSH output; signing and signature
/// checks are done against that output.
pub trait SpendingTx {
    fn input_info(&self) -> &InputInfo;

    fn transaction(&self) -> &Transaction;

    fn txid(&self) -> Txid { self.transaction().txid() }

    fn sighash(&self) -> Message {
        let input = self.input_info();
        let sighash = SighashCache::new(self.transaction())
            .segwit_signature_hash(
                0,
                &input.redeem_script,
                input.txout.value,
                EcdsaSighashType::All,
            )
            .expect("channel transactions always have a single input");
        Message::from_slice(&sighash[..]).expect("sighash is always 32 bytes")
    }

    fn sign(&self, key: &SecretKey) -> Signature { SECP256K1.sign_ecdsa(&self.sighash(), key) }

    fn check_sig(&self, sig: &Signature, pubkey: &PublicKey) -> bool {
        SECP256K1.verify_ecdsa(&self.sighash(), sig, pubkey).is_ok()
    }
}

/// Transaction spending the funding output: commitment or closing transaction
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct FundingSpendTx {
    pub input: InputInfo,
    pub tx: Transaction,
}

impl SpendingTx for FundingSpendTx {
    fn input_info(&self) -> &InputInfo { &self.input }
    fn transaction(&self) -> &Transaction { &self.tx }
}

impl FundingSpendTx {
    /// Adds 2-of-2 multisig witness, ordering signatures as the funding script
    /// orders its keys.
    pub fn signed(
        &self,
        local_funding_pubkey: &PublicKey,
        local_sig: &Signature,
        remote_funding_pubkey: &PublicKey,
        remote_sig: &Signature,
    ) -> Transaction {
        let (first, second) =
            if local_funding_pubkey.serialize()[..] <= remote_funding_pubkey.serialize()[..] {
                (local_sig, remote_sig)
            } else {
                (remote_sig, local_sig)
            };
        let mut tx = self.tx.clone();
        tx.input[0].witness = Witness::from_vec(vec![
            vec![],
            witness_sig(first),
            witness_sig(second),
            self.input.redeem_script.to_bytes(),
        ]);
        tx
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum HtlcTxKind {
    #[display("htlc-success")]
    Success,

    #[display("htlc-timeout")]
    Timeout,
}

/// Second-stage transaction spending an HTLC output of our own commitment
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct HtlcTx {
    pub kind: HtlcTxKind,
    pub htlc_id: u64,
    pub payment_hash: sha256::Hash,
    pub input: InputInfo,
    pub tx: Transaction,
}

impl SpendingTx for HtlcTx {
    fn input_info(&self) -> &InputInfo { &self.input }
    fn transaction(&self) -> &Transaction { &self.tx }
}

impl HtlcTx {
    /// Builds the witness co-signed by both parties. `preimage` is required
    /// for HTLC-success transactions.
    pub fn signed(
        &self,
        local_sig: &Signature,
        remote_sig: &Signature,
        preimage: Option<[u8; 32]>,
    ) -> Transaction {
        let redeem = self.input.redeem_script.to_bytes();
        let branch = match (self.kind, preimage) {
            (HtlcTxKind::Success, Some(preimage)) => preimage.to_vec(),
            _ => vec![],
        };
        let mut tx = self.tx.clone();
        tx.input[0].witness = Witness::from_vec(vec![
            vec![],
            witness_sig(remote_sig),
            witness_sig(local_sig),
            branch,
            redeem,
        ]);
        tx
    }
}

/// How a claim transaction spends its input
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum ClaimKind {
    /// our `to_remote` output in the remote commitment
    #[display("claim-remote-main")]
    RemoteMain,

    /// delayed output of our commitment or of our second-stage HTLC transaction
    #[display("claim-delayed")]
    LocalDelayed,

    /// revoked `to_local` output or revoked second-stage HTLC output
    #[display("main-penalty")]
    MainPenalty,

    /// HTLC output in the remote commitment, claimed with the preimage
    #[display("claim-htlc-success")]
    HtlcSuccess { preimage: [u8; 32] },

    /// HTLC output in the remote commitment, claimed after its expiry
    #[display("claim-htlc-timeout")]
    HtlcTimeout,

    /// HTLC output in a revoked commitment
    #[display("htlc-penalty")]
    HtlcPenalty { revocation_pubkey: PublicKey },
}

/// Single-signature claim or penalty transaction
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ClaimTx {
    pub kind: ClaimKind,
    pub input: InputInfo,
    pub tx: Transaction,
}

impl SpendingTx for ClaimTx {
    fn input_info(&self) -> &InputInfo { &self.input }
    fn transaction(&self) -> &Transaction { &self.tx }
}

impl ClaimTx {
    /// Signs the claim and fills in the witness
    pub fn signed(mut self, key: &SecretKey) -> ClaimTx {
        let sig = witness_sig(&self.sign(key));
        let redeem = self.input.redeem_script.to_bytes();
        let stack = match self.kind {
            ClaimKind::RemoteMain => vec![sig, redeem],
            ClaimKind::LocalDelayed | ClaimKind::HtlcTimeout => vec![sig, vec![], redeem],
            ClaimKind::MainPenalty => vec![sig, vec![1], redeem],
            ClaimKind::HtlcSuccess { preimage } => vec![sig, preimage.to_vec(), redeem],
            ClaimKind::HtlcPenalty { revocation_pubkey } => {
                vec![sig, revocation_pubkey.serialize().to_vec(), redeem]
            }
        };
        self.tx.input[0].witness = Witness::from_vec(stack);
        self
    }

    #[inline]
    pub fn spent_outpoint(&self) -> OutPoint { self.input.outpoint }
}

/// Serializes signature for a witness stack, appending `SIGHASH_ALL`
pub fn witness_sig(sig: &Signature) -> Vec<u8> {
    let mut data = sig.serialize_der().to_vec();
    data.push(EcdsaSighashType::All as u8);
    data
}

/// Keys used by a commitment transaction of a given holder and commitment
/// number.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CommitmentKeys {
    pub per_commitment_point: PublicKey,
    pub revocation_key: PublicKey,
    pub holder_delayed_key: PublicKey,
    pub holder_htlc_key: PublicKey,
    pub counterparty_htlc_key: PublicKey,
    /// `option_static_remotekey`: the counterparty payment basepoint itself
    pub counterparty_payment_key: PublicKey,
    pub holder_funding_key: PublicKey,
    pub counterparty_funding_key: PublicKey,
}

impl CommitmentKeys {
    pub fn derive(
        per_commitment_point: &PublicKey,
        holder: &Keyset,
        counterparty: &Keyset,
    ) -> Result<CommitmentKeys, secp256k1::Error> {
        Ok(CommitmentKeys {
            per_commitment_point: *per_commitment_point,
            revocation_key: revocation_pubkey(
                &counterparty.revocation_basepoint,
                per_commitment_point,
            )?,
            holder_delayed_key: derive_pubkey(
                &holder.delayed_payment_basepoint,
                per_commitment_point,
            )?,
            holder_htlc_key: derive_pubkey(&holder.htlc_basepoint, per_commitment_point)?,
            counterparty_htlc_key: derive_pubkey(
                &counterparty.htlc_basepoint,
                per_commitment_point,
            )?,
            counterparty_payment_key: counterparty.payment_basepoint,
            holder_funding_key: holder.funding_pubkey,
            counterparty_funding_key: counterparty.funding_pubkey,
        })
    }

    pub fn htlc_script(&self, htlc: &DirectedHtlc) -> Script {
        match htlc.direction {
            Direction::Offered => scripts::htlc_offered(
                &self.holder_htlc_key,
                &self.counterparty_htlc_key,
                &self.revocation_key,
                &htlc.add.payment_hash,
            ),
            Direction::Received => scripts::htlc_received(
                &self.holder_htlc_key,
                &self.counterparty_htlc_key,
                &self.revocation_key,
                &htlc.add.payment_hash,
                htlc.add.cltv_expiry,
            ),
        }
    }

    pub fn to_local_script(&self, to_self_delay: u16) -> Script {
        scripts::revokeable(&self.revocation_key, to_self_delay, &self.holder_delayed_key)
    }
}

/// Lower 48 bits of `SHA256(funder_payment_basepoint || fundee_payment_basepoint)`
pub fn obscuring_factor(
    funder_payment_basepoint: &PublicKey,
    fundee_payment_basepoint: &PublicKey,
) -> u64 {
    let mut engine = sha256::Hash::engine();
    engine.input(&funder_payment_basepoint.serialize());
    engine.input(&fundee_payment_basepoint.serialize());
    let hash = sha256::Hash::from_engine(engine).into_inner();
    hash[26..].iter().fold(0u64, |acc, byte| (acc << 8) | *byte as u64)
}

/// Returns `(lock_time, sequence)` encoding the obscured commitment number
pub fn encode_commitment_number(commitment_number: u64, obscuring_factor: u64) -> (u32, u32) {
    let obscured = (commitment_number ^ obscuring_factor) & 0xFFFF_FFFF_FFFF;
    let lock_time = (0x20 << 24) | (obscured & 0xFF_FFFF) as u32;
    let sequence = (0x80 << 24) | ((obscured >> 24) & 0xFF_FFFF) as u32;
    (lock_time, sequence)
}

/// Recovers the commitment number from a commitment transaction
pub fn decode_commitment_number(tx: &Transaction, obscuring_factor: u64) -> Option<u64> {
    let input = tx.input.first()?;
    let obscured =
        ((input.sequence as u64 & 0xFF_FFFF) << 24) | (tx.lock_time as u64 & 0xFF_FFFF);
    Some(obscured ^ obscuring_factor)
}

pub fn htlc_is_trimmed(
    direction: Direction,
    amount_msat: u64,
    dust_limit_sat: u64,
    feerate_per_kw: u32,
) -> bool {
    let weight = match direction {
        Direction::Offered => HTLC_TIMEOUT_WEIGHT,
        Direction::Received => HTLC_SUCCESS_WEIGHT,
    };
    amount_msat / 1000 < dust_limit_sat + weight_to_fee(weight, feerate_per_kw)
}

pub fn untrimmed_htlcs<'spec>(
    spec: &'spec CommitmentSpec,
    dust_limit_sat: u64,
) -> impl Iterator<Item = &'spec DirectedHtlc> {
    spec.htlcs.iter().filter(move |htlc| {
        !htlc_is_trimmed(htlc.direction, htlc.add.amount_msat, dust_limit_sat, spec.feerate_per_kw)
    })
}

/// Commitment fee in satoshis, not including anchor outputs
pub fn commit_tx_fee_sat(dust_limit_sat: u64, spec: &CommitmentSpec) -> u64 {
    let htlcs = untrimmed_htlcs(spec, dust_limit_sat).count() as u64;
    weight_to_fee(COMMIT_WEIGHT + HTLC_OUTPUT_WEIGHT * htlcs, spec.feerate_per_kw)
}

/// Everything the funder pays on top of its balance: commitment fee plus both
/// anchors.
pub fn commit_tx_fee_with_anchors_sat(dust_limit_sat: u64, spec: &CommitmentSpec) -> u64 {
    commit_tx_fee_sat(dust_limit_sat, spec) + 2 * ANCHOR_AMOUNT_SAT
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CommitOutputKind {
    ToLocal,
    ToRemote,
    LocalAnchor,
    RemoteAnchor,
    Htlc(DirectedHtlc),
}

/// Commitment output with the script needed to spend it; kept in the same
/// order as the transaction outputs.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitOutput {
    pub kind: CommitOutputKind,
    pub txout: TxOut,
    pub redeem_script: Script,
}

/// Parameters of a commitment transaction owned by `holder`
pub struct CommitParams<'a> {
    pub commit_input: &'a InputInfo,
    pub commitment_number: u64,
    pub obscuring_factor: u64,
    /// CSV delay imposed on the holder's outputs
    pub to_self_delay: u16,
    /// Holder's dust limit
    pub dust_limit_sat: u64,
    pub holder_is_funder: bool,
    pub keys: &'a CommitmentKeys,
    pub spec: &'a CommitmentSpec,
}

pub fn make_commit_tx(params: &CommitParams) -> (FundingSpendTx, Vec<CommitOutput>) {
    let spec = params.spec;
    let keys = params.keys;
    let dust_limit = params.dust_limit_sat;
    let fee = commit_tx_fee_with_anchors_sat(dust_limit, spec);

    let (to_local_sat, to_remote_sat) = if params.holder_is_funder {
        ((spec.to_local_msat / 1000).saturating_sub(fee), spec.to_remote_msat / 1000)
    } else {
        (spec.to_local_msat / 1000, (spec.to_remote_msat / 1000).saturating_sub(fee))
    };

    let mut outputs = Vec::with_capacity(spec.htlcs.len() + 4);
    let mut push = |kind: CommitOutputKind, value: u64, redeem_script: Script| {
        let txout = TxOut { value, script_pubkey: redeem_script.to_v0_p2wsh() };
        outputs.push(CommitOutput { kind, txout, redeem_script });
    };

    let has_to_local = to_local_sat >= dust_limit;
    let has_to_remote = to_remote_sat >= dust_limit;
    if has_to_local {
        push(CommitOutputKind::ToLocal, to_local_sat, keys.to_local_script(params.to_self_delay));
    }
    if has_to_remote {
        push(
            CommitOutputKind::ToRemote,
            to_remote_sat,
            scripts::to_remote_delayed(&keys.counterparty_payment_key),
        );
    }
    let htlcs = untrimmed_htlcs(spec, dust_limit).cloned().collect::<Vec<_>>();
    for htlc in &htlcs {
        let script = keys.htlc_script(htlc);
        push(CommitOutputKind::Htlc(htlc.clone()), htlc.add.amount_msat / 1000, script);
    }
    if has_to_local || !htlcs.is_empty() {
        push(
            CommitOutputKind::LocalAnchor,
            ANCHOR_AMOUNT_SAT,
            scripts::anchor(&keys.holder_funding_key),
        );
    }
    if has_to_remote || !htlcs.is_empty() {
        push(
            CommitOutputKind::RemoteAnchor,
            ANCHOR_AMOUNT_SAT,
            scripts::anchor(&keys.counterparty_funding_key),
        );
    }

    // BIP-69 with CLTV as the tie-breaker for otherwise identical HTLC outputs
    outputs.sort_by(|a, b| {
        let cltv = |o: &CommitOutput| match &o.kind {
            CommitOutputKind::Htlc(htlc) => htlc.add.cltv_expiry,
            _ => 0,
        };
        (a.txout.value, a.txout.script_pubkey.as_bytes(), cltv(a)).cmp(&(
            b.txout.value,
            b.txout.script_pubkey.as_bytes(),
            cltv(b),
        ))
    });

    let (lock_time, sequence) =
        encode_commitment_number(params.commitment_number, params.obscuring_factor);
    let tx = Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: params.commit_input.outpoint,
            script_sig: Script::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: outputs.iter().map(|o| o.txout.clone()).collect(),
    };
    (FundingSpendTx { input: params.commit_input.clone(), tx }, outputs)
}

/// Second-stage HTLC transactions of a commitment, ordered by the spent
/// commitment output index.
pub fn make_htlc_txs(
    commit_tx: &Transaction,
    outputs: &[CommitOutput],
    to_self_delay: u16,
    keys: &CommitmentKeys,
    feerate_per_kw: u32,
) -> Vec<HtlcTx> {
    let txid = commit_tx.txid();
    let delayed_script = keys.to_local_script(to_self_delay).to_v0_p2wsh();
    outputs
        .iter()
        .enumerate()
        .filter_map(|(vout, output)| {
            let htlc = match &output.kind {
                CommitOutputKind::Htlc(htlc) => htlc,
                _ => return None,
            };
            let (kind, weight, lock_time) = match htlc.direction {
                Direction::Offered => {
                    (HtlcTxKind::Timeout, HTLC_TIMEOUT_WEIGHT, htlc.add.cltv_expiry)
                }
                Direction::Received => (HtlcTxKind::Success, HTLC_SUCCESS_WEIGHT, 0),
            };
            let input = InputInfo {
                outpoint: OutPoint::new(txid, vout as u32),
                txout: output.txout.clone(),
                redeem_script: output.redeem_script.clone(),
            };
            let value = output.txout.value.saturating_sub(weight_to_fee(weight, feerate_per_kw));
            let tx = Transaction {
                version: 2,
                lock_time,
                input: vec![TxIn {
                    previous_output: input.outpoint,
                    script_sig: Script::new(),
                    sequence: 1,
                    witness: Witness::new(),
                }],
                output: vec![TxOut { value, script_pubkey: delayed_script.clone() }],
            };
            Some(HtlcTx { kind, htlc_id: htlc.add.id, payment_hash: htlc.add.payment_hash, input, tx })
        })
        .collect()
}

/// Finds the first output of `tx` paying to P2WSH of `redeem_script` which is
/// not listed in `exclude`.
pub fn find_output(
    tx: &Transaction,
    redeem_script: &Script,
    exclude: &[OutPoint],
) -> Result<InputInfo, TxError> {
    let script_pubkey = redeem_script.to_v0_p2wsh();
    let txid = tx.txid();
    tx.output
        .iter()
        .enumerate()
        .map(|(vout, txout)| (OutPoint::new(txid, vout as u32), txout))
        .find(|(outpoint, txout)| {
            txout.script_pubkey == script_pubkey && !exclude.contains(outpoint)
        })
        .map(|(outpoint, txout)| InputInfo {
            outpoint,
            txout: txout.clone(),
            redeem_script: redeem_script.clone(),
        })
        .ok_or(TxError::OutputNotFound(txid))
}

/// Builds an unsigned transaction sweeping `input` to `destination`
pub fn make_claim_tx(
    kind: ClaimKind,
    input: InputInfo,
    sequence: u32,
    lock_time: u32,
    destination: &Script,
    weight: u64,
    feerate_per_kw: u32,
    dust_limit_sat: u64,
) -> Result<ClaimTx, TxError> {
    let fee = weight_to_fee(weight, feerate_per_kw);
    let value = input.txout.value;
    if value < fee + dust_limit_sat {
        return Err(TxError::AmountBelowDustLimit(value));
    }
    let tx = Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: input.outpoint,
            script_sig: Script::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut { value: value - fee, script_pubkey: destination.clone() }],
    };
    Ok(ClaimTx { kind, input, tx })
}

/// Mutual close transaction; outputs below the dust limit are omitted
pub fn make_closing_tx(
    commit_input: &InputInfo,
    local_script: &Script,
    remote_script: &Script,
    local_is_funder: bool,
    dust_limit_sat: u64,
    fee_sat: u64,
    spec: &CommitmentSpec,
) -> FundingSpendTx {
    let (to_local, to_remote) = if local_is_funder {
        ((spec.to_local_msat / 1000).saturating_sub(fee_sat), spec.to_remote_msat / 1000)
    } else {
        (spec.to_local_msat / 1000, (spec.to_remote_msat / 1000).saturating_sub(fee_sat))
    };
    let mut output = Vec::with_capacity(2);
    if to_local >= dust_limit_sat {
        output.push(TxOut { value: to_local, script_pubkey: local_script.clone() });
    }
    if to_remote >= dust_limit_sat {
        output.push(TxOut { value: to_remote, script_pubkey: remote_script.clone() });
    }
    output.sort_by(|a, b| {
        (a.value, a.script_pubkey.as_bytes()).cmp(&(b.value, b.script_pubkey.as_bytes()))
    });
    let tx = Transaction {
        version: 2,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: commit_input.outpoint,
            script_sig: Script::new(),
            sequence: 0xFFFF_FFFF,
            witness: Witness::new(),
        }],
        output,
    };
    FundingSpendTx { input: commit_input.clone(), tx }
}

#[inline]
pub fn closing_fee_sat(feerate_per_kw: u32) -> u64 { weight_to_fee(CLOSING_WEIGHT, feerate_per_kw) }

/// Funding output paying to the 2-of-2 multisig of both funding keys
pub fn funding_output(
    local_funding_pubkey: &PublicKey,
    remote_funding_pubkey: &PublicKey,
    funding_sat: u64,
) -> (TxOut, Script) {
    let redeem_script = scripts::funding(local_funding_pubkey, remote_funding_pubkey);
    (TxOut { value: funding_sat, script_pubkey: redeem_script.to_v0_p2wsh() }, redeem_script)
}
