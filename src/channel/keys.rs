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

//! BOLT-3 key material: channel basepoints, per-commitment key derivation,
//! per-commitment secret generation and the compact storage of the secrets
//! revealed by the remote peer.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{self, PublicKey, SecretKey};

use crate::SECP256K1;

/// Highest per-commitment secret index; commitment number `n` uses secret
/// `MAX_SECRET_INDEX - n`.
pub const MAX_SECRET_INDEX: u64 = 0xFFFF_FFFF_FFFF;

/// Converts commitment number into the BOLT-3 per-commitment secret index
#[inline]
pub fn secret_index(commitment_number: u64) -> u64 { MAX_SECRET_INDEX - commitment_number }

/// Set of public basepoints announced by a channel party in `open_channel` or
/// `accept_channel`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct Keyset {
    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_basepoint: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
}

/// Secret keys of the local channel party together with the seed of the
/// per-commitment secret chain.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct LocalKeyset {
    pub funding_secret: SecretKey,
    pub revocation_base_secret: SecretKey,
    pub payment_base_secret: SecretKey,
    pub delayed_payment_base_secret: SecretKey,
    pub htlc_base_secret: SecretKey,
    pub shachain_seed: [u8; 32],
}

impl LocalKeyset {
    /// Deterministically derives channel keys from a node seed and a channel
    /// key path.
    pub fn with_seed(seed: &[u8; 32], channel_keypath: u64) -> Result<LocalKeyset, secp256k1::Error> {
        let derive = |tag: &[u8]| -> [u8; 32] {
            let mut engine = sha256::Hash::engine();
            engine.input(seed);
            engine.input(&channel_keypath.to_be_bytes());
            engine.input(tag);
            sha256::Hash::from_engine(engine).into_inner()
        };
        Ok(LocalKeyset {
            funding_secret: SecretKey::from_slice(&derive(b"funding"))?,
            revocation_base_secret: SecretKey::from_slice(&derive(b"revocation"))?,
            payment_base_secret: SecretKey::from_slice(&derive(b"payment"))?,
            delayed_payment_base_secret: SecretKey::from_slice(&derive(b"delayed_payment"))?,
            htlc_base_secret: SecretKey::from_slice(&derive(b"htlc"))?,
            shachain_seed: derive(b"shachain"),
        })
    }

    pub fn to_public(&self) -> Keyset {
        let pk = |sk: &SecretKey| PublicKey::from_secret_key(&*SECP256K1, sk);
        Keyset {
            funding_pubkey: pk(&self.funding_secret),
            revocation_basepoint: pk(&self.revocation_base_secret),
            payment_basepoint: pk(&self.payment_base_secret),
            delayed_payment_basepoint: pk(&self.delayed_payment_base_secret),
            htlc_basepoint: pk(&self.htlc_base_secret),
        }
    }

    /// Per-commitment secret for the commitment number `n`
    pub fn per_commitment_secret(&self, commitment_number: u64) -> [u8; 32] {
        build_commitment_secret(&self.shachain_seed, secret_index(commitment_number))
    }

    pub fn per_commitment_point(
        &self,
        commitment_number: u64,
    ) -> Result<PublicKey, secp256k1::Error> {
        let secret = SecretKey::from_slice(&self.per_commitment_secret(commitment_number))?;
        Ok(PublicKey::from_secret_key(&*SECP256K1, &secret))
    }
}

/// Generates per-commitment secret with the given index from a seed
pub fn build_commitment_secret(seed: &[u8; 32], idx: u64) -> [u8; 32] {
    derive_secret(*seed, 48, idx)
}

fn derive_secret(secret: [u8; 32], bits: u8, idx: u64) -> [u8; 32] {
    let mut res = secret;
    for i in 0..bits {
        let bitpos = bits - 1 - i;
        if idx & (1 << bitpos) == (1 << bitpos) {
            res[(bitpos / 8) as usize] ^= 1 << (bitpos & 7);
            res = sha256::Hash::hash(&res).into_inner();
        }
    }
    res
}

/// `basepoint + SHA256(per_commitment_point || basepoint) * G`
pub fn derive_pubkey(
    basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> Result<PublicKey, secp256k1::Error> {
    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let tweak = sha256::Hash::from_engine(engine).into_inner();

    let tweak_point = PublicKey::from_secret_key(&*SECP256K1, &SecretKey::from_slice(&tweak)?);
    basepoint.combine(&tweak_point)
}

/// `basepoint_secret + SHA256(per_commitment_point || basepoint)`
pub fn derive_privkey(
    base_secret: &SecretKey,
    per_commitment_point: &PublicKey,
) -> Result<SecretKey, secp256k1::Error> {
    let basepoint = PublicKey::from_secret_key(&*SECP256K1, base_secret);
    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let tweak = sha256::Hash::from_engine(engine).into_inner();

    let mut key = *base_secret;
    key.add_assign(&tweak)?;
    Ok(key)
}

fn revocation_tweaks(
    revocation_basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> ([u8; 32], [u8; 32]) {
    let mut engine = sha256::Hash::engine();
    engine.input(&revocation_basepoint.serialize());
    engine.input(&per_commitment_point.serialize());
    let basepoint_tweak = sha256::Hash::from_engine(engine).into_inner();

    let mut engine = sha256::Hash::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&revocation_basepoint.serialize());
    let point_tweak = sha256::Hash::from_engine(engine).into_inner();

    (basepoint_tweak, point_tweak)
}

/// Revocation public key, computable by both parties
pub fn revocation_pubkey(
    revocation_basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> Result<PublicKey, secp256k1::Error> {
    let (basepoint_tweak, point_tweak) =
        revocation_tweaks(revocation_basepoint, per_commitment_point);

    let mut part_a = *revocation_basepoint;
    part_a.mul_assign(&*SECP256K1, &basepoint_tweak)?;
    let mut part_b = *per_commitment_point;
    part_b.mul_assign(&*SECP256K1, &point_tweak)?;
    part_a.combine(&part_b)
}

/// Revocation private key; requires the counterparty per-commitment secret,
/// i.e. it is known only after the commitment has been revoked.
pub fn revocation_privkey(
    revocation_base_secret: &SecretKey,
    per_commitment_secret: &SecretKey,
) -> Result<SecretKey, secp256k1::Error> {
    let revocation_basepoint = PublicKey::from_secret_key(&*SECP256K1, revocation_base_secret);
    let per_commitment_point = PublicKey::from_secret_key(&*SECP256K1, per_commitment_secret);
    let (basepoint_tweak, point_tweak) =
        revocation_tweaks(&revocation_basepoint, &per_commitment_point);

    let mut part_a = *revocation_base_secret;
    part_a.mul_assign(&basepoint_tweak)?;
    let mut part_b = *per_commitment_secret;
    part_b.mul_assign(&point_tweak)?;
    part_a.add_assign(&part_b[..])?;
    Ok(part_a)
}

/// Error inserting a per-commitment secret which does not derive the secrets
/// received before.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display("per-commitment secret #{0} is inconsistent with previously received secrets")]
pub struct InconsistentSecret(pub u64);

/// BOLT-3 compact storage of the per-commitment secrets revealed by the remote
/// party: 49 slots are enough to derive any of up to 2^48 received secrets.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct CommitmentSecrets {
    old_secrets: Vec<([u8; 32], u64)>,
}

impl Default for CommitmentSecrets {
    fn default() -> Self { CommitmentSecrets { old_secrets: vec![([0u8; 32], 1 << 48); 49] } }
}

impl CommitmentSecrets {
    pub fn new() -> Self { Self::default() }

    #[inline]
    fn place_secret(idx: u64) -> u8 {
        for i in 0..48 {
            if idx & (1 << i) == (1 << i) {
                return i;
            }
        }
        48
    }

    /// Lowest secret index received so far, `2^48` if none
    pub fn min_seen_secret(&self) -> u64 {
        self.old_secrets.iter().map(|(_, idx)| *idx).min().unwrap_or(1 << 48)
    }

    pub fn provide_secret(&mut self, idx: u64, secret: [u8; 32]) -> Result<(), InconsistentSecret> {
        let pos = Self::place_secret(idx);
        for i in 0..pos {
            let (old_secret, old_idx) = self.old_secrets[i as usize];
            if derive_secret(secret, pos, old_idx) != old_secret {
                return Err(InconsistentSecret(idx));
            }
        }
        if self.min_seen_secret() <= idx {
            return Ok(());
        }
        self.old_secrets[pos as usize] = (secret, idx);
        Ok(())
    }

    pub fn get_secret(&self, idx: u64) -> Option<[u8; 32]> {
        self.old_secrets.iter().enumerate().find_map(|(i, (secret, secret_idx))| {
            if idx & !((1u64 << i) - 1) == *secret_idx {
                Some(derive_secret(*secret, i as u8, idx))
            } else {
                None
            }
        })
    }

    /// Per-commitment secret for the remote commitment number, if revealed
    #[inline]
    pub fn secret_for_commitment(&self, commitment_number: u64) -> Option<[u8; 32]> {
        if commitment_number > MAX_SECRET_INDEX {
            return None;
        }
        self.get_secret(secret_index(commitment_number))
    }
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::hex::FromHex;

    use super::*;

    fn bytes32(hex: &str) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&Vec::<u8>::from_hex(hex).unwrap());
        buf
    }

    #[test]
    fn secret_generation_vectors() {
        let zero = [0u8; 32];
        let ones = [0xFFu8; 32];
        assert_eq!(
            build_commitment_secret(&zero, 281474976710655),
            bytes32("02a40c85b6f28da08dfdbe0926c53fab2de6d28c10301f8f7c4073d5e42e3148")
        );
        assert_eq!(
            build_commitment_secret(&ones, 281474976710655),
            bytes32("7cc854b54e3e0dcdb010d7a3fee464a9687be6e8db3be6854c475621e007a5dc")
        );
        assert_eq!(
            build_commitment_secret(&ones, 0xaaaaaaaaaaa),
            bytes32("56f4008fb007ca9acf0e15b054d5c9fd12ee06cea347914ddbaed70d1c13a528")
        );
        assert_eq!(
            build_commitment_secret(&ones, 0x555555555555),
            bytes32("9015daaeb06dba4ccc05b91b2f73bd54405f2be9f217fbacd3c5ac2e62327d31")
        );
        assert_eq!(
            build_commitment_secret(&[0x01u8; 32], 1),
            bytes32("915c75942a26bb3a433a8ce2cb0427c29ec6c1775cfc78328b57f6ba7bfeaa9c")
        );
    }

    #[test]
    fn secret_storage_correct_sequence() {
        let secrets = [
            "7cc854b54e3e0dcdb010d7a3fee464a9687be6e8db3be6854c475621e007a5dc",
            "c7518c8ae4660ed02894df8976fa1a3659c1a8b4b5bec0c4b872abeba4cb8964",
            "2273e227a5b7449b6e70f1fb4652864038b1cbf9cd7c043a7d6456b7fc275ad8",
            "27cddaa5624534cb6cb9d7da077cf2b22ab21e9b506fd4998a51d54502e99116",
            "c65716add7aa98ba7acb236352d665cab17345fe45b55fb879ff80e6bd0c41dd",
            "969660042a28f32d9be17344e09374b379962d03db1574df5a8a5a47e19ce3f2",
            "a5a64476122ca0925fb344bdc1854c1c0a59fc614298e50a33e331980a220f32",
            "05cde6323d949933f7f7b78776bcc1ea6d9b31447732e3802e1f7ac44b650e17",
        ];
        let mut storage = CommitmentSecrets::new();
        for (no, hex) in secrets.iter().enumerate() {
            let idx = MAX_SECRET_INDEX - no as u64;
            storage.provide_secret(idx, bytes32(hex)).unwrap();
            for (prev_no, prev_hex) in secrets[..=no].iter().enumerate() {
                let prev_idx = MAX_SECRET_INDEX - prev_no as u64;
                assert_eq!(storage.get_secret(prev_idx), Some(bytes32(prev_hex)));
                assert_eq!(storage.secret_for_commitment(prev_no as u64), Some(bytes32(prev_hex)));
            }
            assert_eq!(storage.min_seen_secret(), idx);
            assert_eq!(storage.get_secret(idx - 1), None);
        }
    }

    #[test]
    fn secret_storage_rejects_inconsistent_secret() {
        let mut storage = CommitmentSecrets::new();
        storage
            .provide_secret(
                281474976710655,
                bytes32("02a40c85b6f28da08dfdbe0926c53fab2de6d28c10301f8f7c4073d5e42e3148"),
            )
            .unwrap();
        assert_eq!(
            storage.provide_secret(
                281474976710654,
                bytes32("c7518c8ae4660ed02894df8976fa1a3659c1a8b4b5bec0c4b872abeba4cb8964"),
            ),
            Err(InconsistentSecret(281474976710654))
        );
    }

    #[test]
    fn key_derivation_vectors() {
        let base_secret = SecretKey::from_slice(&bytes32(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        ))
        .unwrap();
        let per_commitment_secret = SecretKey::from_slice(&bytes32(
            "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100",
        ))
        .unwrap();
        let basepoint = PublicKey::from_secret_key(&*SECP256K1, &base_secret);
        let per_commitment_point = PublicKey::from_secret_key(&*SECP256K1, &per_commitment_secret);
        assert_eq!(
            basepoint.to_string(),
            "036d6caac248af96f6afa7f904f550253a0f3ef3f5aa2fe6838a95b216691468e2"
        );
        assert_eq!(
            per_commitment_point.to_string(),
            "025f7117a78150fe2ef97db7cfc83bd57b2e2c0d0dd25eaf467a4a1c2a45ce1486"
        );

        let local_pubkey = derive_pubkey(&basepoint, &per_commitment_point).unwrap();
        let local_privkey = derive_privkey(&base_secret, &per_commitment_point).unwrap();
        assert_eq!(
            local_pubkey.to_string(),
            "0235f2dbfaa89b57ec7b055afe29849ef7ddfeb1cefdb9ebdc43f5494984db29e5"
        );
        assert_eq!(PublicKey::from_secret_key(&*SECP256K1, &local_privkey), local_pubkey);

        let revocation_pub = revocation_pubkey(&basepoint, &per_commitment_point).unwrap();
        let revocation_priv = revocation_privkey(&base_secret, &per_commitment_secret).unwrap();
        assert_eq!(
            revocation_pub.to_string(),
            "02916e326636d19c33f13e8c0c3a03dd157f332f3e99c317c141dd865eb01f8ff0"
        );
        assert_eq!(PublicKey::from_secret_key(&*SECP256K1, &revocation_priv), revocation_pub);
    }

    #[test]
    fn keyset_points_match_secrets() {
        let keys = LocalKeyset::with_seed(&[7u8; 32], 0).unwrap();
        let other = LocalKeyset::with_seed(&[7u8; 32], 1).unwrap();
        assert_ne!(keys.to_public(), other.to_public());
        let secret = SecretKey::from_slice(&keys.per_commitment_secret(5)).unwrap();
        assert_eq!(
            PublicKey::from_secret_key(&*SECP256K1, &secret),
            keys.per_commitment_point(5).unwrap()
        );
    }
}
