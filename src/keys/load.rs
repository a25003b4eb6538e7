use std::io::Read;
use std::path::Path;

use log::debug;
use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};

use crate::errors::{Error, Result};
use crate::io::{open_input, sniff_armor};

/// Parses public keys, ASCII armored (one or more) or binary (a single key).
pub fn read_public_keys<R: Read>(input: R) -> Result<Vec<SignedPublicKey>> {
    read_keys(input)
}

/// Parses secret keys, ASCII armored (one or more) or binary (a single key).
pub fn read_secret_keys<R: Read>(input: R) -> Result<Vec<SignedSecretKey>> {
    read_keys(input)
}

pub fn read_public_key_file(path: impl AsRef<Path>) -> Result<Vec<SignedPublicKey>> {
    read_public_keys(open_input(path.as_ref())?)
}

pub fn read_secret_key_file(path: impl AsRef<Path>) -> Result<Vec<SignedSecretKey>> {
    read_secret_keys(open_input(path.as_ref())?)
}

fn read_keys<K: Deserializable, R: Read>(input: R) -> Result<Vec<K>> {
    let (armored, reader) = sniff_armor(input)?;
    let keys = if armored {
        let (keys, _headers) = K::from_armor_many(reader)?;
        keys.collect::<pgp::errors::Result<Vec<_>>>()?
    } else {
        vec![K::from_bytes(reader)?]
    };
    debug!("read {} keys (armored: {})", keys.len(), armored);

    if keys.is_empty() {
        return Err(Error::InvalidInput {
            message: "no keys found".to_string(),
        });
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pgp::ser::Serialize;
    use pgp::types::KeyDetails;

    use super::*;
    use crate::keys::test_keys;

    #[test]
    fn armored_and_binary() {
        let _ = pretty_env_logger::try_init();

        let secret = test_keys::generate(30, "dave", None);
        let public = SignedPublicKey::from(secret.clone());

        let armored = public.to_armored_string(Default::default()).unwrap();
        let keys = read_public_keys(Cursor::new(armored.as_bytes())).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].primary_key.key_id(), public.primary_key.key_id());

        let binary = public.to_bytes().unwrap();
        let keys = read_public_keys(Cursor::new(binary)).unwrap();
        assert_eq!(keys[0].primary_key.key_id(), public.primary_key.key_id());

        let armored = secret.to_armored_string(Default::default()).unwrap();
        let keys = read_secret_keys(Cursor::new(armored.into_bytes())).unwrap();
        assert_eq!(keys[0].secret_subkeys.len(), 1);
    }

    #[test]
    fn key_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.asc");
        let public = SignedPublicKey::from(test_keys::generate(31, "erin", None));
        std::fs::write(&path, public.to_armored_string(Default::default()).unwrap()).unwrap();

        let keys = read_public_key_file(&path).unwrap();
        assert_eq!(keys.len(), 1);

        assert!(matches!(
            read_secret_key_file(dir.path().join("missing.asc")),
            Err(Error::InputFileMissing { .. })
        ));
    }

    #[test]
    fn garbage() {
        assert!(read_public_keys(Cursor::new(b"not a key".to_vec())).is_err());
    }
}
