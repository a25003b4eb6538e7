use std::fmt;

use chrono::{SubsecRound, Utc};
use log::{debug, warn};
use pgp::composed::{PlainSessionKey, SignedPublicKey, SignedSecretKey};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::{
    PublicKeyEncryptedSessionKey, Signature, SignatureConfig, SignatureType, Subpacket,
    SubpacketData,
};
use pgp::types::{EskType, KeyDetails, KeyId, KeyVersion, Password, SecretKeyTrait};
use zeroize::Zeroizing;

use crate::errors::{Error, KeyPurpose, Result};
use crate::keys::{
    key_id_hex, scoring, secret_keys_of, KeyRingWithPreference, PublicKeyRef, SecretKeyRef,
};

/// A secret key ring and the passphrase that unlocks it.
#[derive(Clone)]
pub struct SecretKeyRing {
    key: SignedSecretKey,
    passphrase: Zeroizing<String>,
}

impl fmt::Debug for SecretKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyRing")
            .field("key", &key_id_hex(&self.key.primary_key.key_id()))
            .finish_non_exhaustive()
    }
}

impl SecretKeyRing {
    pub fn new(key: SignedSecretKey, passphrase: impl Into<String>) -> Self {
        SecretKeyRing {
            key,
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    pub fn secret_key(&self) -> &SignedSecretKey {
        &self.key
    }

    pub fn keys(&self) -> Vec<SecretKeyRef<'_>> {
        secret_keys_of(&self.key)
    }

    /// Hands out `key` together with what is needed to unlock it.
    ///
    /// rPGP unlocks secret key material on use, so a wrong passphrase shows up
    /// as [`Error::KeyExtraction`] from the operation using the key.
    pub fn extract<'a>(&'a self, key: SecretKeyRef<'a>) -> PrivateKey<'a> {
        PrivateKey {
            ring: &self.key,
            key,
            passphrase: &self.passphrase,
        }
    }
}

/// A secret key ready for decryption or signing.
pub struct PrivateKey<'a> {
    ring: &'a SignedSecretKey,
    key: SecretKeyRef<'a>,
    passphrase: &'a Zeroizing<String>,
}

impl fmt::Debug for PrivateKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &key_id_hex(&self.key_id()))
            .finish_non_exhaustive()
    }
}

impl<'a> PrivateKey<'a> {
    pub fn key_id(&self) -> KeyId {
        self.key.key_id()
    }

    /// The secret ring the key belongs to.
    pub fn ring(&self) -> &'a SignedSecretKey {
        self.ring
    }

    pub fn key(&self) -> SecretKeyRef<'a> {
        self.key
    }

    pub fn password(&self) -> Password {
        Password::from(self.passphrase.as_str())
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        match self.key {
            SecretKeyRef::Primary(k) => k.primary_key.algorithm(),
            SecretKeyRef::Subkey(k) => k.key.algorithm(),
        }
    }

    /// Only version 4 keys are used for signing.
    pub(crate) fn ensure_signing_version(&self) -> Result<()> {
        let version = match self.key {
            SecretKeyRef::Primary(k) => k.primary_key.version(),
            SecretKeyRef::Subkey(k) => k.key.version(),
        };
        if version != KeyVersion::V4 {
            return Err(Error::Message {
                message: format!("signing with {version:?} keys is not supported"),
            });
        }
        Ok(())
    }

    /// Unlocks the key and issues a v4 signature of type `typ` over `data`.
    ///
    /// The issuer fingerprint and the creation time are hashed, the issuer
    /// key id is not.
    pub(crate) fn sign(
        &self,
        typ: SignatureType,
        hash: HashAlgorithm,
        data: &[u8],
    ) -> pgp::errors::Result<Signature> {
        let password = self.password();
        match self.key {
            SecretKeyRef::Primary(k) => sign_v4(&k.primary_key, &password, typ, hash, data),
            SecretKeyRef::Subkey(k) => sign_v4(&k.key, &password, typ, hash, data),
        }
    }

    /// Unlocks the key and recovers the session key from `pkesk`.
    pub(crate) fn decrypt_session_key(
        &self,
        pkesk: &PublicKeyEncryptedSessionKey,
    ) -> pgp::errors::Result<PlainSessionKey> {
        let typ = match pkesk {
            PublicKeyEncryptedSessionKey::V6 { .. } => EskType::V6,
            _ => EskType::V3_4,
        };
        let values = pkesk.values()?;
        let password = self.password();
        match self.key {
            SecretKeyRef::Primary(k) => k.decrypt_session_key(&password, values, typ)?,
            SecretKeyRef::Subkey(k) => k.decrypt_session_key(&password, values, typ)?,
        }
    }
}

fn sign_v4(
    key: &impl SecretKeyTrait,
    password: &Password,
    typ: SignatureType,
    hash: HashAlgorithm,
    data: &[u8],
) -> pgp::errors::Result<Signature> {
    let mut config = SignatureConfig::v4(typ, key.algorithm(), hash);
    config.hashed_subpackets = vec![
        Subpacket::regular(SubpacketData::IssuerFingerprint(key.fingerprint()))?,
        Subpacket::regular(SubpacketData::SignatureCreationTime(
            Utc::now().trunc_subsecs(0),
        ))?,
    ];
    config.unhashed_subpackets = vec![Subpacket::regular(SubpacketData::Issuer(key.key_id()))?];
    config.sign(key, password, data)
}

/// All keys taking part in one operation.
///
/// Public rings are recipients when encrypting and candidates when verifying.
/// Secret rings are used for decryption and signing.
#[derive(Debug, Clone, Default)]
pub struct EncryptionKeyMaterial {
    public_rings: Vec<KeyRingWithPreference>,
    secret_rings: Vec<SecretKeyRing>,
}

impl EncryptionKeyMaterial {
    pub fn new(
        public_keys: impl IntoIterator<Item = SignedPublicKey>,
        secret_keys: impl IntoIterator<Item = SecretKeyRing>,
    ) -> Self {
        EncryptionKeyMaterial {
            public_rings: public_keys
                .into_iter()
                .map(KeyRingWithPreference::new)
                .collect(),
            secret_rings: secret_keys.into_iter().collect(),
        }
    }

    /// Recipients only.
    pub fn for_encryption(public_keys: impl IntoIterator<Item = SignedPublicKey>) -> Self {
        Self::new(public_keys, None)
    }

    /// Verification candidates only.
    pub fn for_verification(public_keys: impl IntoIterator<Item = SignedPublicKey>) -> Self {
        Self::new(public_keys, None)
    }

    pub fn for_decryption(secret_key: SignedSecretKey, passphrase: impl Into<String>) -> Self {
        Self::new(None, Some(SecretKeyRing::new(secret_key, passphrase)))
    }

    /// A secret key for signing; its public half is registered for verification.
    pub fn for_signing(secret_key: SignedSecretKey, passphrase: impl Into<String>) -> Self {
        let public = SignedPublicKey::from(secret_key.clone());
        Self::new(Some(public), Some(SecretKeyRing::new(secret_key, passphrase)))
    }

    pub fn add_public_key(&mut self, key: SignedPublicKey) -> &mut Self {
        self.public_rings.push(KeyRingWithPreference::new(key));
        self
    }

    pub fn add_secret_key(
        &mut self,
        key: SignedSecretKey,
        passphrase: impl Into<String>,
    ) -> &mut Self {
        self.secret_rings.push(SecretKeyRing::new(key, passphrase));
        self
    }

    pub fn public_rings(&self) -> &[KeyRingWithPreference] {
        &self.public_rings
    }

    pub fn public_rings_mut(&mut self) -> &mut [KeyRingWithPreference] {
        &mut self.public_rings
    }

    pub fn secret_rings(&self) -> &[SecretKeyRing] {
        &self.secret_rings
    }

    pub(crate) fn require(&self, purpose: KeyPurpose) -> Result<()> {
        let present = match purpose {
            KeyPurpose::Encryption | KeyPurpose::Verification => !self.public_rings.is_empty(),
            KeyPurpose::Decryption | KeyPurpose::Signing => !self.secret_rings.is_empty(),
        };
        if present {
            Ok(())
        } else {
            Err(Error::KeyMaterialMissing { purpose })
        }
    }

    /// Pins, in every ring that has it, the key with one of `key_ids` as
    /// encryption key. Returns how many rings were changed.
    pub fn use_preferred_keys(&mut self, key_ids: &[KeyId]) -> usize {
        let mut changed = 0;
        for ring in &mut self.public_rings {
            if key_ids.iter().any(|id| ring.use_preferred_key(id)) {
                changed += 1;
            }
        }
        changed
    }

    /// The effective encryption key of every ring.
    pub fn encryption_keys(&self) -> Result<Vec<PublicKeyRef<'_>>> {
        self.require(KeyPurpose::Encryption)?;
        self.public_rings
            .iter()
            .map(KeyRingWithPreference::encryption_key)
            .collect()
    }

    /// Every key of every public ring, in ring order.
    pub fn verification_candidates(&self) -> Vec<PublicKeyRef<'_>> {
        self.public_rings
            .iter()
            .flat_map(KeyRingWithPreference::keys)
            .collect()
    }

    /// Best verification key of the first ring.
    pub fn first_verification_key(&self) -> Result<PublicKeyRef<'_>> {
        let ring = self
            .public_rings
            .first()
            .ok_or(Error::KeyMaterialMissing {
                purpose: KeyPurpose::Verification,
            })?;
        if self.public_rings.len() > 1 {
            warn!(
                "{} verification key rings configured, using only the first one",
                self.public_rings.len()
            );
        }
        ring.verification_key()
    }

    /// Best signing key across all secret rings.
    pub fn signing_key(&self) -> Result<PrivateKey<'_>> {
        self.require(KeyPurpose::Signing)?;

        let candidates: Vec<(&SecretKeyRing, SecretKeyRef<'_>)> = self
            .secret_rings
            .iter()
            .flat_map(|ring| ring.keys().into_iter().map(move |key| (ring, key)))
            .collect();
        let keys: Vec<SecretKeyRef<'_>> = candidates.iter().map(|(_, key)| *key).collect();

        let index = scoring::signing_key_index(&keys).ok_or(Error::NoSigningKey)?;
        let (ring, key) = candidates[index];
        debug!("signing with {}", key_id_hex(&key.key_id()));
        Ok(ring.extract(key))
    }

    /// The secret key addressed by `key_id`, matching either the key's own id
    /// or the issuer of one of its self-signatures.
    pub fn find_secret_key(&self, key_id: &KeyId) -> Option<PrivateKey<'_>> {
        self.secret_rings.iter().find_map(|ring| {
            ring.keys()
                .into_iter()
                .find(|key| key.matches(key_id))
                .map(|key| ring.extract(key))
        })
    }
}

/// First candidate that is `key_id` or carries a self-signature issued by it.
pub fn find_public_key<'a>(
    key_id: &KeyId,
    candidates: &[PublicKeyRef<'a>],
) -> Option<PublicKeyRef<'a>> {
    candidates.iter().copied().find(|key| key.matches(key_id))
}

/// [`find_public_key`] over every key of every ring.
pub fn find_public_key_in_key_rings<'a>(
    key_id: &KeyId,
    rings: &'a [KeyRingWithPreference],
) -> Option<PublicKeyRef<'a>> {
    rings
        .iter()
        .find_map(|ring| find_public_key(key_id, &ring.keys()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::keys::test_keys;
    use crate::keys::KeyCapabilities;

    #[test]
    fn requirements() {
        let material = EncryptionKeyMaterial::default();
        for purpose in [
            KeyPurpose::Encryption,
            KeyPurpose::Decryption,
            KeyPurpose::Signing,
            KeyPurpose::Verification,
        ] {
            let err = material.require(purpose).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::KeyMaterialMissing);
        }
        assert!(matches!(
            material.encryption_keys(),
            Err(Error::KeyMaterialMissing {
                purpose: KeyPurpose::Encryption
            })
        ));
        assert!(material.signing_key().is_err());
        assert!(material.first_verification_key().is_err());
    }

    #[test]
    fn finds_secret_keys() {
        let _ = pretty_env_logger::try_init();

        let alice = test_keys::generate(20, "alice", Some("secret"));
        let bob = test_keys::generate(21, "bob", None);
        let alice_sub = alice.secret_subkeys[0].key.key_id();
        let bob_sub = bob.secret_subkeys[0].key.key_id();

        let mut material = EncryptionKeyMaterial::for_decryption(alice.clone(), "secret");
        assert!(material.find_secret_key(&bob_sub).is_none());

        material.add_secret_key(bob.clone(), "");
        let found = material.find_secret_key(&alice_sub).unwrap();
        assert_eq!(found.key_id(), alice_sub);
        assert_eq!(found.ring().primary_key.key_id(), alice.primary_key.key_id());

        let found = material.find_secret_key(&bob_sub).unwrap();
        assert_eq!(found.key_id(), bob_sub);
    }

    #[test]
    fn signing_key_is_the_primary() {
        let alice = test_keys::generate(22, "alice", None);
        let material = EncryptionKeyMaterial::for_signing(alice.clone(), "");
        let key = material.signing_key().unwrap();
        assert_eq!(key.key_id(), alice.primary_key.key_id());
        assert!(key.key().is_master_key());

        // public half registered for verification
        assert_eq!(
            material.first_verification_key().unwrap().key_id(),
            alice.primary_key.key_id()
        );
    }

    #[test]
    fn finds_public_keys() {
        let alice = SignedPublicKey::from(test_keys::generate(23, "alice", None));
        let bob = SignedPublicKey::from(test_keys::generate(24, "bob", None));
        let carol = SignedPublicKey::from(test_keys::generate(25, "carol", None));

        let material = EncryptionKeyMaterial::for_verification([alice.clone(), bob.clone()]);
        let candidates = material.verification_candidates();
        assert_eq!(candidates.len(), 4);

        let bob_id = bob.primary_key.key_id();
        let found = find_public_key(&bob_id, &candidates).unwrap();
        assert_eq!(found.key_id(), bob_id);
        assert!(found.is_master_key());

        let bob_sub = bob.public_subkeys[0].key.key_id();
        let found = find_public_key_in_key_rings(&bob_sub, material.public_rings()).unwrap();
        assert_eq!(found.key_id(), bob_sub);

        assert!(find_public_key(&carol.primary_key.key_id(), &candidates).is_none());
    }

    #[test]
    fn preferred_recipients() {
        let alice = SignedPublicKey::from(test_keys::generate(26, "alice", None));
        let bob = SignedPublicKey::from(test_keys::generate(27, "bob", None));
        let mut material = EncryptionKeyMaterial::for_encryption([alice.clone(), bob]);

        let pinned = alice.primary_key.key_id();
        assert_eq!(material.use_preferred_keys(&[pinned.clone()]), 1);

        let keys = material.encryption_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key_id(), pinned);
        assert!(!keys[1].is_master_key());
    }
}
