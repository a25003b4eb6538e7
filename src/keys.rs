//! Key rings, key selection and the key material handed to every operation.

use std::fmt;

use pgp::composed::{
    Message, SignedPublicKey, SignedPublicSubKey, SignedSecretKey, SignedSecretSubKey,
    StandaloneSignature,
};
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::Signature;
use pgp::types::{Fingerprint, KeyDetails, KeyId};

mod load;
mod material;
mod ring;
pub mod scoring;

pub use self::load::{
    read_public_key_file, read_public_keys, read_secret_key_file, read_secret_keys,
};
pub use self::material::{
    find_public_key, find_public_key_in_key_rings, EncryptionKeyMaterial, PrivateKey,
    SecretKeyRing,
};
pub use self::ring::KeyRingWithPreference;

/// Hex encoded key id, for logs and error messages.
pub fn key_id_hex(id: &KeyId) -> String {
    hex::encode(id)
}

/// Capability flags declared by the self-signatures of a key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub certify: bool,
    pub sign: bool,
    pub encrypt_comms: bool,
    pub encrypt_storage: bool,
}

impl Capabilities {
    fn from_signatures<'a>(signatures: impl IntoIterator<Item = &'a Signature>) -> Self {
        signatures
            .into_iter()
            .fold(Capabilities::default(), |mut caps, sig| {
                let flags = sig.key_flags();
                caps.certify |= flags.certify();
                caps.sign |= flags.sign();
                caps.encrypt_comms |= flags.encrypt_comms();
                caps.encrypt_storage |= flags.encrypt_storage();
                caps
            })
    }
}

/// What the scoring policy needs to know about a key.
pub trait KeyCapabilities {
    /// The primary key of its ring.
    fn is_master_key(&self) -> bool;

    /// The key algorithm can encrypt.
    fn is_encryption_key(&self) -> bool;

    /// The key algorithm can sign.
    fn is_signing_key(&self) -> bool;

    fn capabilities(&self) -> Capabilities;
}

/// A single key of a public key ring.
#[derive(Debug, Clone, Copy)]
pub enum PublicKeyRef<'a> {
    Primary(&'a SignedPublicKey),
    Subkey(&'a SignedPublicSubKey),
}

impl<'a> PublicKeyRef<'a> {
    pub fn key_id(&self) -> KeyId {
        match self {
            PublicKeyRef::Primary(k) => k.primary_key.key_id(),
            PublicKeyRef::Subkey(k) => k.key.key_id(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            PublicKeyRef::Primary(k) => k.primary_key.fingerprint(),
            PublicKeyRef::Subkey(k) => k.key.fingerprint(),
        }
    }

    /// Self-signatures: user certifications and direct signatures for the
    /// primary key, binding signatures for a subkey.
    pub fn signatures(&self) -> Vec<&'a Signature> {
        match self {
            PublicKeyRef::Primary(k) => k
                .details
                .users
                .iter()
                .flat_map(|u| u.signatures.iter())
                .chain(k.details.direct_signatures.iter())
                .collect(),
            PublicKeyRef::Subkey(k) => k.signatures.iter().collect(),
        }
    }

    /// Issuer key ids of all self-signatures.
    pub fn signature_issuers(&self) -> Vec<KeyId> {
        issuers(self.signatures())
    }

    /// `key_id` is this key or issued one of its self-signatures.
    pub fn matches(&self, key_id: &KeyId) -> bool {
        self.key_id() == *key_id || self.signature_issuers().iter().any(|id| id == key_id)
    }

    /// Checks the signature of a fully read message against this key.
    pub(crate) fn verify_message(&self, msg: &Message<'_>) -> pgp::errors::Result<()> {
        match self {
            PublicKeyRef::Primary(k) => msg.verify(&k.primary_key).map(|_| ()),
            PublicKeyRef::Subkey(k) => msg.verify(&k.key).map(|_| ()),
        }
    }

    pub(crate) fn verify_standalone(
        &self,
        signature: &StandaloneSignature,
        content: &[u8],
    ) -> pgp::errors::Result<()> {
        match self {
            PublicKeyRef::Primary(k) => signature.verify(&k.primary_key, content),
            PublicKeyRef::Subkey(k) => signature.verify(&k.key, content),
        }
    }
}

impl KeyCapabilities for PublicKeyRef<'_> {
    fn is_master_key(&self) -> bool {
        matches!(self, PublicKeyRef::Primary(_))
    }

    fn is_encryption_key(&self) -> bool {
        match self {
            PublicKeyRef::Primary(k) => can_encrypt(k.primary_key.algorithm()),
            PublicKeyRef::Subkey(k) => can_encrypt(k.key.algorithm()),
        }
    }

    fn is_signing_key(&self) -> bool {
        match self {
            PublicKeyRef::Primary(k) => can_sign(k.primary_key.algorithm()),
            PublicKeyRef::Subkey(k) => can_sign(k.key.algorithm()),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::from_signatures(self.signatures())
    }
}

impl fmt::Display for PublicKeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_master_key() { "primary" } else { "subkey" };
        write!(f, "{} {}", kind, key_id_hex(&self.key_id()))
    }
}

/// A single key of a secret key ring.
#[derive(Debug, Clone, Copy)]
pub enum SecretKeyRef<'a> {
    Primary(&'a SignedSecretKey),
    Subkey(&'a SignedSecretSubKey),
}

impl<'a> SecretKeyRef<'a> {
    pub fn key_id(&self) -> KeyId {
        match self {
            SecretKeyRef::Primary(k) => k.primary_key.key_id(),
            SecretKeyRef::Subkey(k) => k.key.key_id(),
        }
    }

    pub fn signatures(&self) -> Vec<&'a Signature> {
        match self {
            SecretKeyRef::Primary(k) => k
                .details
                .users
                .iter()
                .flat_map(|u| u.signatures.iter())
                .chain(k.details.direct_signatures.iter())
                .collect(),
            SecretKeyRef::Subkey(k) => k.signatures.iter().collect(),
        }
    }

    pub fn signature_issuers(&self) -> Vec<KeyId> {
        issuers(self.signatures())
    }

    pub fn matches(&self, key_id: &KeyId) -> bool {
        self.key_id() == *key_id || self.signature_issuers().iter().any(|id| id == key_id)
    }
}

impl KeyCapabilities for SecretKeyRef<'_> {
    fn is_master_key(&self) -> bool {
        matches!(self, SecretKeyRef::Primary(_))
    }

    fn is_encryption_key(&self) -> bool {
        match self {
            SecretKeyRef::Primary(k) => can_encrypt(k.primary_key.algorithm()),
            SecretKeyRef::Subkey(k) => can_encrypt(k.key.algorithm()),
        }
    }

    fn is_signing_key(&self) -> bool {
        match self {
            SecretKeyRef::Primary(k) => can_sign(k.primary_key.algorithm()),
            SecretKeyRef::Subkey(k) => can_sign(k.key.algorithm()),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::from_signatures(self.signatures())
    }
}

fn can_sign(algorithm: PublicKeyAlgorithm) -> bool {
    use PublicKeyAlgorithm::*;
    matches!(
        algorithm,
        RSA | RSASign | Elgamal | DSA | ECDSA | EdDSALegacy | Ed25519 | Ed448
    )
}

fn can_encrypt(algorithm: PublicKeyAlgorithm) -> bool {
    use PublicKeyAlgorithm::*;
    matches!(
        algorithm,
        RSA | RSAEncrypt | ECDH | DiffieHellman | Elgamal | ElgamalEncrypt | X25519 | X448
    )
}

fn issuers(signatures: Vec<&Signature>) -> Vec<KeyId> {
    signatures
        .into_iter()
        .flat_map(|sig| sig.issuer())
        .cloned()
        .collect()
}

/// All keys of a public ring, primary first.
pub fn public_keys_of(ring: &SignedPublicKey) -> Vec<PublicKeyRef<'_>> {
    std::iter::once(PublicKeyRef::Primary(ring))
        .chain(ring.public_subkeys.iter().map(PublicKeyRef::Subkey))
        .collect()
}

/// All keys of a secret ring, primary first.
pub fn secret_keys_of(ring: &SignedSecretKey) -> Vec<SecretKeyRef<'_>> {
    std::iter::once(SecretKeyRef::Primary(ring))
        .chain(ring.secret_subkeys.iter().map(SecretKeyRef::Subkey))
        .collect()
}
