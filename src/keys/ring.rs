use std::sync::{Arc, OnceLock};

use log::debug;
use pgp::composed::SignedPublicKey;
use pgp::types::{KeyDetails, KeyId};

use crate::errors::{Error, Result};
use crate::keys::{key_id_hex, public_keys_of, scoring, PublicKeyRef};

/// A public key ring together with an optional pinned encryption key.
///
/// Without a pinned key the ring's best encryption key is used. That key is
/// computed on first use and cached for the lifetime of the value.
#[derive(Debug, Clone)]
pub struct KeyRingWithPreference {
    ring: Arc<SignedPublicKey>,
    /// Index into [`Self::keys`].
    preferred: Option<usize>,
    default_encryption: OnceLock<Option<usize>>,
}

impl KeyRingWithPreference {
    pub fn new(ring: impl Into<Arc<SignedPublicKey>>) -> Self {
        KeyRingWithPreference {
            ring: ring.into(),
            preferred: None,
            default_encryption: OnceLock::new(),
        }
    }

    pub fn public_key(&self) -> &SignedPublicKey {
        &self.ring
    }

    /// Key id of the primary key, identifies the ring.
    pub fn id(&self) -> KeyId {
        self.ring.primary_key.key_id()
    }

    /// Primary key first, then the subkeys in ring order.
    pub fn keys(&self) -> Vec<PublicKeyRef<'_>> {
        public_keys_of(&self.ring)
    }

    pub fn key_ids(&self) -> Vec<KeyId> {
        self.keys().iter().map(PublicKeyRef::key_id).collect()
    }

    /// Pins the key with `key_id` as encryption key.
    ///
    /// Returns `false`, leaving the ring untouched, if no key of this ring has
    /// that id.
    pub fn use_preferred_key(&mut self, key_id: &KeyId) -> bool {
        match self.keys().iter().position(|k| k.key_id() == *key_id) {
            Some(index) => {
                debug!(
                    "ring {}: pinning encryption key {}",
                    key_id_hex(&self.id()),
                    key_id_hex(key_id)
                );
                self.preferred = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn clear_preferred_key(&mut self) {
        self.preferred = None;
    }

    pub fn preferred_encryption_key(&self) -> Option<PublicKeyRef<'_>> {
        self.preferred.and_then(|i| self.keys().get(i).copied())
    }

    /// Best scoring encryption key of the ring.
    pub fn default_encryption_key(&self) -> Result<PublicKeyRef<'_>> {
        let keys = self.keys();
        let index = *self.default_encryption.get_or_init(|| {
            let index = scoring::encryption_key_index(&keys);
            if let Some(i) = index {
                debug!(
                    "ring {}: default encryption key {}",
                    key_id_hex(&self.id()),
                    keys[i]
                );
            }
            index
        });

        index
            .and_then(|i| keys.get(i).copied())
            .ok_or_else(|| Error::NoEncryptionKey {
                ring: key_id_hex(&self.id()),
            })
    }

    /// The pinned key if there is one, the default encryption key otherwise.
    pub fn encryption_key(&self) -> Result<PublicKeyRef<'_>> {
        match self.preferred_encryption_key() {
            Some(key) => Ok(key),
            None => self.default_encryption_key(),
        }
    }

    /// Best scoring verification key of the ring.
    pub fn verification_key(&self) -> Result<PublicKeyRef<'_>> {
        scoring::select_verification_key(&self.keys()).ok_or_else(|| Error::NoVerificationKey {
            ring: key_id_hex(&self.id()),
        })
    }

    pub fn master_key(&self) -> Result<PublicKeyRef<'_>> {
        scoring::master_key(&self.keys())
    }
}

impl From<SignedPublicKey> for KeyRingWithPreference {
    fn from(key: SignedPublicKey) -> Self {
        KeyRingWithPreference::new(key)
    }
}
