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

use std::collections::BTreeSet;

use bitcoin::hashes::sha256;

use super::messages::{UpdateAddHtlc, UpdateMessage};

/// HTLC direction relative to the owner of a commitment transaction
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum Direction {
    /// HTLC offered by the commitment owner
    #[display("offered")]
    Offered,

    /// HTLC received by the commitment owner
    #[display("received")]
    Received,
}

impl Direction {
    #[inline]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Offered => Direction::Received,
            Direction::Received => Direction::Offered,
        }
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{direction} {add}")]
pub struct DirectedHtlc {
    pub direction: Direction,
    pub add: UpdateAddHtlc,
}

impl DirectedHtlc {
    #[inline]
    pub fn offered(add: UpdateAddHtlc) -> DirectedHtlc {
        DirectedHtlc { direction: Direction::Offered, add }
    }

    #[inline]
    pub fn received(add: UpdateAddHtlc) -> DirectedHtlc {
        DirectedHtlc { direction: Direction::Received, add }
    }

    /// The same HTLC seen from the other party commitment
    #[inline]
    pub fn opposite(&self) -> DirectedHtlc {
        DirectedHtlc { direction: self.direction.opposite(), add: self.add.clone() }
    }
}

/// Balances and in-flight HTLCs of a single commitment transaction
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct CommitmentSpec {
    pub htlcs: BTreeSet<DirectedHtlc>,
    pub feerate_per_kw: u32,
    pub to_local_msat: u64,
    pub to_remote_msat: u64,
}

impl CommitmentSpec {
    pub fn new(to_local_msat: u64, to_remote_msat: u64, feerate_per_kw: u32) -> CommitmentSpec {
        CommitmentSpec { htlcs: empty!(), feerate_per_kw, to_local_msat, to_remote_msat }
    }

    pub fn find_htlc(&self, direction: Direction, id: u64) -> Option<&UpdateAddHtlc> {
        self.htlcs.iter().find(|h| h.direction == direction && h.add.id == id).map(|h| &h.add)
    }

    pub fn offered(&self) -> impl Iterator<Item = &UpdateAddHtlc> {
        self.htlcs.iter().filter(|h| h.direction == Direction::Offered).map(|h| &h.add)
    }

    pub fn received(&self) -> impl Iterator<Item = &UpdateAddHtlc> {
        self.htlcs.iter().filter(|h| h.direction == Direction::Received).map(|h| &h.add)
    }

    pub fn total_funds_msat(&self) -> u64 {
        self.to_local_msat
            + self.to_remote_msat
            + self.htlcs.iter().map(|h| h.add.amount_msat).sum::<u64>()
    }

    /// Applies changes proposed by the commitment owner (`local_changes`) and
    /// by its counterparty (`remote_changes`). Adds are applied before
    /// settlements so that a settlement in the same batch finds its HTLC.
    pub fn reduce(
        &self,
        local_changes: &[UpdateMessage],
        remote_changes: &[UpdateMessage],
    ) -> CommitmentSpec {
        let mut spec = self.clone();
        for change in local_changes {
            if let UpdateMessage::AddHtlc(add) = change {
                spec.add_htlc(Direction::Offered, add);
            }
        }
        for change in remote_changes {
            if let UpdateMessage::AddHtlc(add) = change {
                spec.add_htlc(Direction::Received, add);
            }
        }
        for change in local_changes {
            match change {
                UpdateMessage::FulfillHtlc(msg) => spec.fulfill_htlc(Direction::Received, msg.id),
                UpdateMessage::FailHtlc(msg) => spec.fail_htlc(Direction::Received, msg.id),
                UpdateMessage::FailMalformedHtlc(msg) => {
                    spec.fail_htlc(Direction::Received, msg.id)
                }
                _ => {}
            }
        }
        for change in remote_changes {
            match change {
                UpdateMessage::FulfillHtlc(msg) => spec.fulfill_htlc(Direction::Offered, msg.id),
                UpdateMessage::FailHtlc(msg) => spec.fail_htlc(Direction::Offered, msg.id),
                UpdateMessage::FailMalformedHtlc(msg) => spec.fail_htlc(Direction::Offered, msg.id),
                _ => {}
            }
        }
        let fee_update = local_changes
            .iter()
            .chain(remote_changes)
            .filter_map(|change| match change {
                UpdateMessage::Fee(fee) => Some(fee.feerate_per_kw),
                _ => None,
            })
            .last();
        if let Some(feerate_per_kw) = fee_update {
            spec.feerate_per_kw = feerate_per_kw;
        }
        spec
    }

    // Balance saturates at zero: an unaffordable HTLC shows up as a reserve
    // violation of the reduced spec.
    fn add_htlc(&mut self, direction: Direction, add: &UpdateAddHtlc) {
        match direction {
            Direction::Offered => {
                self.to_local_msat = self.to_local_msat.saturating_sub(add.amount_msat)
            }
            Direction::Received => {
                self.to_remote_msat = self.to_remote_msat.saturating_sub(add.amount_msat)
            }
        }
        self.htlcs.insert(DirectedHtlc { direction, add: add.clone() });
    }

    fn take_htlc(&mut self, direction: Direction, id: u64) -> Option<UpdateAddHtlc> {
        let htlc = self.htlcs.iter().find(|h| h.direction == direction && h.add.id == id)?.clone();
        self.htlcs.remove(&htlc);
        Some(htlc.add)
    }

    fn fulfill_htlc(&mut self, direction: Direction, id: u64) {
        if let Some(add) = self.take_htlc(direction, id) {
            // the HTLC value goes to the party which received it
            match direction {
                Direction::Offered => self.to_remote_msat += add.amount_msat,
                Direction::Received => self.to_local_msat += add.amount_msat,
            }
        }
    }

    fn fail_htlc(&mut self, direction: Direction, id: u64) {
        if let Some(add) = self.take_htlc(direction, id) {
            match direction {
                Direction::Offered => self.to_local_msat += add.amount_msat,
                Direction::Received => self.to_remote_msat += add.amount_msat,
            }
        }
    }
}

/// Minimal HTLC data needed to rebuild HTLC output scripts of a revoked
/// remote commitment; persisted through `StoreHtlcInfos`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
#[display("{payment_hash}@{cltv_expiry}")]
pub struct HtlcInfo {
    pub payment_hash: sha256::Hash,
    pub cltv_expiry: u32,
}
