#![allow(dead_code)]

use pgp::composed::{
    KeyType, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey, SubkeyParamsBuilder,
};
use pgp::crypto::ecc_curve::ECCCurve;
use pgp::types::Password;
use pgp_facade::{EncryptionKeyMaterial, Pgp};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Someone with an Ed25519 signing primary key and a Curve25519 encryption
/// subkey.
pub struct Party {
    pub secret: SignedSecretKey,
    pub public: SignedPublicKey,
    pub passphrase: String,
}

impl Party {
    pub fn new(seed: u64, user_id: &str) -> Self {
        Self::with_passphrase(seed, user_id, "")
    }

    pub fn with_passphrase(seed: u64, user_id: &str, passphrase: &str) -> Self {
        let secret = generate(seed, user_id, passphrase);
        Party {
            public: SignedPublicKey::from(secret.clone()),
            secret,
            passphrase: passphrase.to_string(),
        }
    }

    /// Key id of the encryption subkey.
    pub fn encryption_key_id(&self) -> pgp::types::KeyId {
        use pgp::types::KeyDetails;
        self.public.public_subkeys[0].key.key_id()
    }
}

pub fn generate(seed: u64, user_id: &str, passphrase: &str) -> SignedSecretKey {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let passphrase = (!passphrase.is_empty()).then(|| passphrase.to_string());

    let mut encryption = SubkeyParamsBuilder::default();
    encryption
        .key_type(KeyType::ECDH(ECCCurve::Curve25519))
        .can_encrypt(true)
        .passphrase(passphrase.clone());

    let mut params = SecretKeyParamsBuilder::default();
    params
        .key_type(KeyType::Ed25519Legacy)
        .can_certify(true)
        .can_sign(true)
        .primary_user_id(user_id.into())
        .passphrase(passphrase.clone())
        .subkeys(vec![encryption.build().unwrap()]);

    let password = passphrase
        .as_deref()
        .map(Password::from)
        .unwrap_or_else(Password::empty);
    params
        .build()
        .unwrap()
        .generate(&mut rng)
        .unwrap()
        .sign(&mut rng, &password)
        .unwrap()
}

/// `from` signs and encrypts to every party in `to`.
pub fn sender(from: &Party, to: &[&Party]) -> Pgp {
    let mut keys = EncryptionKeyMaterial::for_encryption(to.iter().map(|p| p.public.clone()));
    keys.add_secret_key(from.secret.clone(), from.passphrase.as_str());
    Pgp::with_keys(keys)
}

/// `to` decrypts and checks signatures made by `from`.
pub fn receiver(to: &Party, from: &Party) -> Pgp {
    let mut keys = EncryptionKeyMaterial::for_decryption(to.secret.clone(), to.passphrase.as_str());
    keys.add_public_key(from.public.clone());
    Pgp::with_keys(keys)
}
