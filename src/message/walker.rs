//! The decrypt / verify state machine.
//!
//! A parsed message is a chain of layers. The walker peels them one at a
//! time: encrypted data is only accepted as the outermost layer, compressed
//! data may follow anywhere below it, and the chain ends in signed or literal
//! data whose content is copied to the output.
//!
//! ```text
//! Start ── encrypted ──> Decrypted ── compressed ──> Decompressed
//!   │                        │                           │
//!   └──── compressed ────────┼───────────────────────────┘
//!                            v
//!                 signed | one-pass signed | literal  (terminal)
//! ```

use std::io::{self, Read, Write};

use log::{debug, warn};
use pgp::composed::{Edata, Esk, Message, PlainSessionKey, TheRing};
use pgp::packet::{OnePassSignature, OpsVersionSpecific, Signature};
use pgp::types::KeyId;

use crate::errors::{Error, KeyPurpose, Result};
use crate::keys::{find_public_key, key_id_hex, EncryptionKeyMaterial, PublicKeyRef};
use crate::message::{literal_file_name, Layer};

/// Deepest accepted nesting of layers.
pub const MAX_DEPTH: usize = 8;

const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Which layers are accepted and how signatures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// The message must be encrypted. Signatures are not checked.
    Decrypt,
    /// The message must be encrypted and signed by one of the configured
    /// public keys.
    DecryptAndVerify,
    /// Decrypts if the message is encrypted, then checks the signature.
    VerifyEncrypted,
    /// Checks the signature of a message that must not be encrypted.
    VerifySigned,
}

impl WalkMode {
    fn requires_encryption(self) -> bool {
        matches!(self, WalkMode::Decrypt | WalkMode::DecryptAndVerify)
    }

    fn may_decrypt(self) -> bool {
        self != WalkMode::VerifySigned
    }

    fn checks_signature(self) -> bool {
        self != WalkMode::Decrypt
    }

    /// A missing or bad signature is an error rather than a `false` verdict.
    fn signature_required(self) -> bool {
        self == WalkMode::DecryptAndVerify
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Decrypted,
    Decompressed,
}

/// What was found while walking a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Walk {
    pub encrypted: bool,
    pub integrity_protected: bool,
    pub signed: bool,
    /// The signature was made by a configured key and matches the content.
    pub verified: bool,
    /// Number of content bytes written to the output.
    pub bytes: u64,
    /// File name of the literal data packet.
    pub file_name: Option<String>,
}

pub struct MessageWalker<'k> {
    mode: WalkMode,
    keys: &'k EncryptionKeyMaterial,
}

impl<'k> MessageWalker<'k> {
    pub fn new(mode: WalkMode, keys: &'k EncryptionKeyMaterial) -> Self {
        MessageWalker { mode, keys }
    }

    /// Walks `msg` and writes its content to `sink`.
    ///
    /// Output is streamed. The signer is looked up before any content is
    /// written, but a signature by a known key that does not match the
    /// content is only detected once the content has been copied.
    pub fn walk<W: Write + ?Sized>(&self, msg: Message<'_>, sink: &mut W) -> Result<Walk> {
        let mut msg = msg;
        let mut state = State::Start;
        let mut walk = Walk::default();

        for depth in 0..MAX_DEPTH {
            let layer = Layer::of(&msg);
            debug!("{:?}: {} at depth {}", state, layer, depth);

            match (state, layer) {
                (State::Start, Layer::Encrypted) => {
                    if !self.mode.may_decrypt() {
                        return Err(Error::EncryptedInput);
                    }
                    walk.encrypted = true;
                    walk.integrity_protected = is_integrity_protected(&msg);
                    msg = self.decrypt(msg)?;
                    state = State::Decrypted;
                }
                (State::Start, _) if self.mode.requires_encryption() => {
                    return Err(Error::UnknownFormat);
                }
                (_, Layer::Encrypted) => return Err(Error::NotSimpleMessage),
                (_, Layer::Compressed) => {
                    msg = msg
                        .decompress()
                        .map_err(payload_error(walk.integrity_protected))?;
                    state = State::Decompressed;
                }
                (_, Layer::Signed | Layer::OnePassSigned) => {
                    walk.signed = true;
                    self.read_signed(msg, sink, &mut walk)?;
                    return Ok(walk);
                }
                (_, Layer::Literal) => {
                    if self.mode.signature_required() {
                        return Err(Error::NotSigned);
                    }
                    walk.bytes = copy_content(&mut msg, sink, walk.integrity_protected)?;
                    walk.file_name = literal_file_name(&msg);
                    return Ok(walk);
                }
            }
        }

        Err(Error::NotSimpleMessage)
    }

    fn decrypt<'a>(&self, msg: Message<'a>) -> Result<Message<'a>> {
        self.keys.require(KeyPurpose::Decryption)?;
        let session_key = recover_session_key(&msg, self.keys)?.ok_or(Error::SecretKeyNotFound)?;
        open_payload(msg, session_key)
    }

    fn read_signed<W: Write + ?Sized>(
        &self,
        mut msg: Message<'_>,
        sink: &mut W,
        walk: &mut Walk,
    ) -> Result<()> {
        let checks = self.mode.checks_signature();

        // Both a prefix signature and a one-pass signature packet name the
        // issuer before the content.
        let signer = if checks { self.resolve_signer(&msg) } else { None };
        if checks && signer.is_none() {
            if self.mode.signature_required() {
                return Err(Error::VerificationFailed);
            }
            debug!("signature was not issued by a configured key");
        }

        walk.bytes = copy_content(&mut msg, sink, walk.integrity_protected)?;
        walk.file_name = literal_file_name(&msg);
        let Some(key) = signer else {
            return Ok(());
        };

        walk.verified = match key.verify_message(&msg) {
            Ok(()) => {
                debug!("signature by {} verified", key);
                true
            }
            Err(err) => {
                warn!("signature by {} does not verify: {}", key, err);
                false
            }
        };

        if !walk.verified && self.mode.signature_required() {
            return Err(Error::VerificationFailed);
        }
        Ok(())
    }

    /// The configured public key that issued the signature of `msg`.
    fn resolve_signer(&self, msg: &Message<'_>) -> Option<PublicKeyRef<'k>> {
        let candidates = self.keys.verification_candidates();
        match msg {
            Message::Signed { reader, .. } => issuer_of(reader.signature(), &candidates),
            Message::SignedOnePass {
                one_pass_signature, ..
            } => one_pass_issuer(one_pass_signature, &candidates),
            _ => None,
        }
    }
}

fn issuer_of<'k>(
    signature: &Signature,
    candidates: &[PublicKeyRef<'k>],
) -> Option<PublicKeyRef<'k>> {
    signature
        .issuer()
        .into_iter()
        .find_map(|id| find_public_key(id, candidates))
}

fn one_pass_issuer<'k>(
    ops: &OnePassSignature,
    candidates: &[PublicKeyRef<'k>],
) -> Option<PublicKeyRef<'k>> {
    match ops.version_specific() {
        OpsVersionSpecific::V3 { key_id } => find_public_key(key_id, candidates),
        OpsVersionSpecific::V6 { fingerprint, .. } => candidates
            .iter()
            .copied()
            .find(|key| key.fingerprint().as_bytes() == &fingerprint[..]),
        OpsVersionSpecific::Unknown { version, .. } => {
            debug!("one-pass signature of unknown version {}", version);
            None
        }
    }
}

pub(crate) fn is_integrity_protected(msg: &Message<'_>) -> bool {
    matches!(
        msg,
        Message::Encrypted {
            edata: Edata::SymEncryptedProtectedData { .. },
            ..
        }
    )
}

/// Key ids of the public key encrypted session keys, in packet order and
/// without duplicates. Empty if `msg` is not encrypted.
pub(crate) fn recipients(msg: &Message<'_>) -> Vec<KeyId> {
    let Message::Encrypted { esk, .. } = msg else {
        return Vec::new();
    };

    let mut ids: Vec<KeyId> = Vec::new();
    for esk in esk {
        let Esk::PublicKeyEncryptedSessionKey(pkesk) = esk else {
            continue;
        };
        match pkesk.id() {
            Ok(id) if !ids.contains(id) => ids.push(id.clone()),
            Ok(_) => {}
            Err(err) => debug!("skipping session key without key id: {}", err),
        }
    }
    ids
}

/// Recovers the session key with the first configured secret key that
/// matches a recipient, in packet order.
///
/// `None` when no configured key matches. Unlocking the key or decrypting
/// the session key packet fails with [`Error::KeyExtraction`].
pub(crate) fn recover_session_key(
    msg: &Message<'_>,
    keys: &EncryptionKeyMaterial,
) -> Result<Option<PlainSessionKey>> {
    let Message::Encrypted { esk, .. } = msg else {
        return Ok(None);
    };

    for esk in esk {
        let Esk::PublicKeyEncryptedSessionKey(pkesk) = esk else {
            continue;
        };
        let Some(key) = pkesk.id().ok().and_then(|id| keys.find_secret_key(id)) else {
            continue;
        };
        let key_id = key_id_hex(&key.key_id());
        debug!("decrypting session key with {}", key_id);
        let session_key = key
            .decrypt_session_key(pkesk)
            .map_err(|source| Error::KeyExtraction { key_id, source })?;
        return Ok(Some(session_key));
    }
    Ok(None)
}

/// Decrypts the payload of an encrypted message with a recovered session key.
///
/// Unprotected (SED) payloads are only opened because they carry no
/// modification detection code to fail.
pub(crate) fn open_payload(msg: Message<'_>, session_key: PlainSessionKey) -> Result<Message<'_>> {
    let protected = is_integrity_protected(&msg);
    if !protected {
        warn!("message is not integrity protected");
    }
    let ring = TheRing {
        session_keys: vec![session_key],
        allow_legacy: !protected,
        ..Default::default()
    };
    let (msg, _) = msg
        .decrypt_the_ring(ring, true)
        .map_err(payload_error(protected))?;
    Ok(msg)
}

/// Below an integrity protected layer every failure means the payload was
/// modified, so it is reported as [`Error::IntegrityCheckFailed`].
pub(crate) fn payload_error<E>(integrity_protected: bool) -> impl FnOnce(E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    Error: From<E>,
{
    move |err| {
        if integrity_protected {
            Error::IntegrityCheckFailed {
                source: Box::new(err),
            }
        } else {
            Error::from(err)
        }
    }
}

/// Copies the content of `msg` to `sink`.
///
/// Reading an integrity protected payload fails when its modification
/// detection code does not match. Such read errors are reported as
/// [`Error::IntegrityCheckFailed`].
pub(crate) fn copy_content<W: Write + ?Sized>(
    msg: &mut Message<'_>,
    sink: &mut W,
    integrity_protected: bool,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match msg.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(payload_error(integrity_protected)(err)),
        };
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
    sink.flush()?;
    Ok(total)
}
