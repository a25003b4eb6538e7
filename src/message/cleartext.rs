//! Cleartext signature framework.
//!
//! The signed text stays readable, followed by an armored signature. rPGP
//! handles the frame, dash escaping and line break normalization. Trailing
//! spaces and tabs are stripped from every line before the text is hashed.

use std::io::{Read, Write};

use log::{debug, warn};
use pgp::armor::Headers;
use pgp::composed::{ArmorOptions, CleartextSignedMessage, StandaloneSignature};
use pgp::crypto::hash::HashAlgorithm;
use pgp::line_writer::LineBreak;
use pgp::normalize_lines::NormalizedReader;
use pgp::packet::SignatureType;

use crate::errors::{Error, Result};
use crate::keys::{key_id_hex, PrivateKey, PublicKeyRef};
use crate::normalize_lines::strip_trailing_whitespace;

/// Writes `text` clear-signed by `signer`.
///
/// Line breaks are written as `\n`, whatever the input used.
pub fn sign<W: Write>(
    text: &str,
    signer: &PrivateKey<'_>,
    hash: HashAlgorithm,
    headers: Option<&Headers>,
    mut out: W,
) -> Result<()> {
    signer.ensure_signing_version()?;

    let mut unix = String::with_capacity(text.len());
    NormalizedReader::new(text.as_bytes(), LineBreak::Lf).read_to_string(&mut unix)?;

    let message = CleartextSignedMessage::new_many(&unix, |normalized| {
        let canonical = strip_trailing_whitespace(normalized);
        Ok(vec![signer.sign(SignatureType::Text, hash, canonical.as_bytes())?])
    })
    .map_err(|source| Error::KeyExtraction {
        key_id: key_id_hex(&signer.key_id()),
        source,
    })?;
    debug!("clear-signed {} bytes with {:?}", unix.len(), signer);

    message.to_armored_writer(&mut out, ArmorOptions::from(headers))?;
    out.flush()?;
    Ok(())
}

/// A parsed clear-signed message.
#[derive(Debug, Clone)]
pub struct ClearSigned {
    message: CleartextSignedMessage,
    headers: Headers,
}

impl ClearSigned {
    pub fn parse(input: &str) -> Result<Self> {
        let (message, headers) =
            CleartextSignedMessage::from_string(input).map_err(|err| Error::InvalidCleartext {
                message: err.to_string(),
            })?;
        Ok(ClearSigned { message, headers })
    }

    /// Hash algorithms named by the signatures.
    pub fn hash_algorithms(&self) -> Vec<HashAlgorithm> {
        self.signatures()
            .iter()
            .filter_map(|sig| sig.signature.hash_alg())
            .collect()
    }

    /// Armor headers of the signature block.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn signatures(&self) -> &[StandaloneSignature] {
        self.message.signatures()
    }

    /// The signed text, dash escapes removed and line breaks kept.
    pub fn text(&self) -> String {
        self.message
            .text()
            .split_inclusive('\n')
            .map(|line| line.strip_prefix("- ").unwrap_or(line))
            .collect()
    }

    /// The form the signatures were computed over.
    pub fn canonical_text(&self) -> String {
        self.message.signed_text()
    }

    /// Whether one of the signatures was made by `key`.
    pub fn verify(&self, key: PublicKeyRef<'_>) -> bool {
        let content = self.canonical_text();
        for signature in self.signatures() {
            match key.verify_standalone(signature, content.as_bytes()) {
                Ok(()) => {
                    debug!("clear signature by {} verified", key);
                    return true;
                }
                Err(err) => warn!("clear signature does not verify with {}: {}", key, err),
            }
        }
        false
    }
}
