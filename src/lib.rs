//! # pgp-facade
//!
//! Encrypt, sign, decrypt and verify OpenPGP messages with a handful of
//! calls. Packet handling and cryptography come from [rPGP](https://docs.rs/pgp);
//! this crate decides which keys to use and in which order the layers of a
//! message are written and checked.
//!
//! ```no_run
//! use pgp_facade::{read_public_key_file, EncryptionKeyMaterial, OutputOptions, Pgp};
//!
//! # fn main() -> pgp_facade::errors::Result<()> {
//! let recipients = read_public_key_file("bob.asc")?;
//! let pgp = Pgp::with_keys(EncryptionKeyMaterial::for_encryption(recipients));
//! let armored = pgp.encrypt_armored_string("hello bob", &OutputOptions::default())?;
//! println!("{armored}");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]
#![deny(unused_must_use, unused_extern_crates, unused_import_braces)]

pub mod config;
pub mod errors;
pub mod facade;
mod io;
pub mod keys;
pub mod message;
pub mod normalize_lines;
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub mod nonblocking;

pub use self::config::{
    Compression, FileType, OutputOptions, OutputOptionsBuilder, PgpConfig, PgpConfigBuilder,
    DEFAULT_FILE_NAME,
};
pub use self::errors::{Error, ErrorKind, KeyPurpose};
pub use self::facade::{Pgp, VerificationResult};
pub use self::keys::{
    read_public_key_file, read_public_keys, read_secret_key_file, read_secret_keys,
    EncryptionKeyMaterial, KeyRingWithPreference,
};
pub use self::message::Inspection;
#[cfg(feature = "tokio")]
pub use self::nonblocking::AsyncPgp;
