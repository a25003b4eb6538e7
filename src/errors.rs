use std::path::PathBuf;

use snafu::{Backtrace, Snafu};

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// What a set of keys is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum KeyPurpose {
    #[display("encryption")]
    Encryption,
    #[display("decryption")]
    Decryption,
    #[display("signing")]
    Signing,
    #[display("verification")]
    Verification,
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing argument, input not at offset 0, input file does not exist.
    InputValidation,
    /// No keys configured for the requested operation.
    KeyMaterialMissing,
    /// Keys are configured, but none of them fits.
    KeyNotFound,
    /// The input does not have the expected packet structure.
    Format,
    /// Missing or invalid signature.
    Verification,
    /// The modification detection code did not match.
    Integrity,
    /// Everything else, mostly I/O and codec failures.
    Other,
}

/// Error types
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid input: {message}"))]
    InvalidInput { message: String },
    #[snafu(display("input stream must be positioned at offset 0, found {position}"))]
    InputNotAtStart { position: u64 },
    #[snafu(display("input file does not exist: {}", path.display()))]
    InputFileMissing { path: PathBuf },
    #[snafu(display("Input is encrypted. Decrypt the input first."))]
    EncryptedInput,
    #[snafu(display("no {purpose} keys configured"))]
    KeyMaterialMissing { purpose: KeyPurpose },
    #[snafu(display("no configured secret key matches the encrypted message"))]
    SecretKeyNotFound,
    #[snafu(display("no usable encryption key in key ring {ring}"))]
    NoEncryptionKey { ring: String },
    #[snafu(display("no usable verification key in key ring {ring}"))]
    NoVerificationKey { ring: String },
    #[snafu(display("no usable signing key"))]
    NoSigningKey,
    #[snafu(display("key ring has no master key"))]
    NoMasterKey,
    #[snafu(display("key ring has {count} master keys"))]
    AmbiguousMasterKey { count: usize },
    #[snafu(display("failed to extract private key {key_id}"))]
    KeyExtraction {
        key_id: String,
        source: pgp::errors::Error,
    },
    #[snafu(display("Failed to detect encrypted content format."))]
    UnknownFormat,
    #[snafu(display("Message is not a simple encrypted file."))]
    NotSimpleMessage,
    #[snafu(display("invalid clear-signed message: {message}"))]
    InvalidCleartext { message: String },
    #[snafu(display("File was not signed."))]
    NotSigned,
    #[snafu(display("Failed to verify file."))]
    VerificationFailed,
    /// Reading or decrypting an integrity protected payload failed.
    #[snafu(display("Message failed integrity check."))]
    IntegrityCheckFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(transparent)]
    Pgp { source: pgp::errors::Error },
    #[snafu(transparent)]
    IO {
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(transparent)]
    Utf8 { source: std::string::FromUtf8Error },
    #[snafu(display("{message}"))]
    Message { message: String },
    #[cfg(feature = "tokio")]
    #[snafu(transparent)]
    Join { source: tokio::task::JoinError },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput { .. }
            | Error::InputNotAtStart { .. }
            | Error::InputFileMissing { .. }
            | Error::EncryptedInput => ErrorKind::InputValidation,
            Error::KeyMaterialMissing { .. } => ErrorKind::KeyMaterialMissing,
            Error::SecretKeyNotFound
            | Error::NoEncryptionKey { .. }
            | Error::NoVerificationKey { .. }
            | Error::NoSigningKey
            | Error::NoMasterKey
            | Error::AmbiguousMasterKey { .. }
            | Error::KeyExtraction { .. } => ErrorKind::KeyNotFound,
            Error::UnknownFormat | Error::NotSimpleMessage | Error::InvalidCleartext { .. } => {
                ErrorKind::Format
            }
            Error::NotSigned | Error::VerificationFailed => ErrorKind::Verification,
            Error::IntegrityCheckFailed { .. } => ErrorKind::Integrity,
            _ => ErrorKind::Other,
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error::Message { message: err }
    }
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(err: derive_builder::UninitializedFieldError) -> Error {
        Error::Message {
            message: err.to_string(),
        }
    }
}
