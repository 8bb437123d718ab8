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

//! BOLT-3 witness scripts for `option_anchors` channels.

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::{hash160, ripemd160, sha256, Hash};
use bitcoin::secp256k1::PublicKey;
use bitcoin::Script;

/// 2-of-2 multisig locking the funding output; keys are sorted
/// lexicographically by their compressed serialization.
pub fn funding(pubkey1: &PublicKey, pubkey2: &PublicKey) -> Script {
    let (first, second) = if pubkey1.serialize()[..] <= pubkey2.serialize()[..] {
        (pubkey1, pubkey2)
    } else {
        (pubkey2, pubkey1)
    };
    Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_slice(&first.serialize())
        .push_slice(&second.serialize())
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Script of `to_local` output and of the second-stage HTLC transaction
/// outputs: spendable by the revocation key, or by the delayed key after
/// `to_self_delay` blocks.
pub fn revokeable(
    revocation_pubkey: &PublicKey,
    to_self_delay: u16,
    delayed_pubkey: &PublicKey,
) -> Script {
    Builder::new()
        .push_opcode(OP_IF)
        .push_slice(&revocation_pubkey.serialize())
        .push_opcode(OP_ELSE)
        .push_int(to_self_delay as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_slice(&delayed_pubkey.serialize())
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// `to_remote` output script with the anchor one-block CSV lock
pub fn to_remote_delayed(payment_pubkey: &PublicKey) -> Script {
    Builder::new()
        .push_slice(&payment_pubkey.serialize())
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(1)
        .push_opcode(OP_CSV)
        .into_script()
}

/// Anchor output: spendable by the funding key, or by anyone after 16 blocks
pub fn anchor(funding_pubkey: &PublicKey) -> Script {
    Builder::new()
        .push_slice(&funding_pubkey.serialize())
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_IFDUP)
        .push_opcode(OP_NOTIF)
        .push_int(16)
        .push_opcode(OP_CSV)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Script of an HTLC output offered by the commitment owner
pub fn htlc_offered(
    local_htlc_pubkey: &PublicKey,
    remote_htlc_pubkey: &PublicKey,
    revocation_pubkey: &PublicKey,
    payment_hash: &sha256::Hash,
) -> Script {
    let payment_hash160 = ripemd160::Hash::hash(&payment_hash[..]);
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&hash160::Hash::hash(&revocation_pubkey.serialize())[..])
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_slice(&remote_htlc_pubkey.serialize())
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_NOTIF)
        .push_opcode(OP_DROP)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_slice(&local_htlc_pubkey.serialize())
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_HASH160)
        .push_slice(&payment_hash160[..])
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_int(1)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Script of an HTLC output received by the commitment owner
pub fn htlc_received(
    local_htlc_pubkey: &PublicKey,
    remote_htlc_pubkey: &PublicKey,
    revocation_pubkey: &PublicKey,
    payment_hash: &sha256::Hash,
    cltv_expiry: u32,
) -> Script {
    let payment_hash160 = ripemd160::Hash::hash(&payment_hash[..]);
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&hash160::Hash::hash(&revocation_pubkey.serialize())[..])
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_slice(&remote_htlc_pubkey.serialize())
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(&payment_hash160[..])
        .push_opcode(OP_EQUALVERIFY)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_slice(&local_htlc_pubkey.serialize())
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_DROP)
        .push_int(cltv_expiry as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_int(1)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_ENDIF)
        .into_script()
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::SecretKey;

    use super::*;
    use crate::SECP256K1;

    fn pubkey(byte: u8) -> PublicKey {
        PublicKey::from_secret_key(&*SECP256K1, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    #[test]
    fn funding_script_is_key_order_independent() {
        let (a, b) = (pubkey(1), pubkey(2));
        assert_eq!(funding(&a, &b), funding(&b, &a));
        assert_eq!(funding(&a, &b).len(), 71);
    }

    #[test]
    fn htlc_script_sizes() {
        let hash = sha256::Hash::hash(&[42u8; 32]);
        let offered = htlc_offered(&pubkey(1), &pubkey(2), &pubkey(3), &hash);
        let received = htlc_received(&pubkey(1), &pubkey(2), &pubkey(3), &hash, 500_000);
        // BOLT-3 anchor variants are three bytes longer than the legacy ones
        assert_eq!(offered.len(), 136);
        assert_eq!(received.len(), 142);
        assert_eq!(to_remote_delayed(&pubkey(4)).len(), 37);
        assert_eq!(anchor(&pubkey(5)).len(), 40);
    }
}
