//! Options shared by every operation of a [`Pgp`](crate::Pgp) value, and the
//! per call options of the operations that write OpenPGP data.

use std::collections::BTreeMap;

use derive_builder::Builder;
use pgp::armor;
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::DataMode;
use pgp::types::CompressionAlgorithm;

/// File name embedded into literal data when the input is not a file.
pub const DEFAULT_FILE_NAME: &str = "name";

/// Compression layer applied before signing and encryption.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Uncompressed,
    Zip,
    #[default]
    ZLib,
    BZip2,
}

impl Compression {
    /// `None` means no compressed data packet is written at all.
    pub fn algorithm(self) -> Option<CompressionAlgorithm> {
        match self {
            Compression::Uncompressed => None,
            Compression::Zip => Some(CompressionAlgorithm::ZIP),
            Compression::ZLib => Some(CompressionAlgorithm::ZLIB),
            Compression::BZip2 => Some(CompressionAlgorithm::BZip2),
        }
    }
}

/// Format octet of the literal data packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    #[default]
    Binary,
    Text,
    UTF8,
}

impl From<FileType> for DataMode {
    fn from(value: FileType) -> Self {
        match value {
            FileType::Binary => DataMode::Binary,
            FileType::Text => DataMode::Text,
            FileType::UTF8 => DataMode::Utf8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(build_fn(error = "crate::errors::Error"))]
pub struct PgpConfig {
    #[builder(default)]
    compression: Compression,
    #[builder(default = "SymmetricKeyAlgorithm::AES256")]
    symmetric_algorithm: SymmetricKeyAlgorithm,
    #[builder(default = "HashAlgorithm::Sha256")]
    hash_algorithm: HashAlgorithm,
    #[builder(default)]
    file_type: FileType,
}

impl Default for PgpConfig {
    fn default() -> Self {
        PgpConfig {
            compression: Compression::default(),
            symmetric_algorithm: SymmetricKeyAlgorithm::AES256,
            hash_algorithm: HashAlgorithm::Sha256,
            file_type: FileType::default(),
        }
    }
}

impl PgpConfig {
    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn symmetric_algorithm(&self) -> SymmetricKeyAlgorithm {
        self.symmetric_algorithm
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }
}

/// Options of a single encrypt, sign or clear-sign call.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(build_fn(validate = "Self::validate", error = "crate::errors::Error"))]
pub struct OutputOptions {
    /// ASCII armor instead of binary packets.
    #[builder(default = "true")]
    armor: bool,
    /// Attach a modification detection code to the encrypted data.
    #[builder(default = "true")]
    with_integrity_check: bool,
    /// Name stored in the literal data packet.
    #[builder(default, setter(into, strip_option))]
    name: Option<String>,
    /// Armor header lines, e.g. `Comment`.
    #[builder(default)]
    headers: BTreeMap<String, String>,
}

impl OutputOptionsBuilder {
    /// Adds a single armor header line.
    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let Some(headers) = &self.headers else {
            return Ok(());
        };
        for (key, value) in headers {
            if key.is_empty() || key.contains([':', '\r', '\n']) {
                return Err(format!("invalid armor header key {key:?}"));
            }
            if value.contains(['\r', '\n']) {
                return Err(format!("armor header {key} must be a single line"));
            }
        }
        Ok(())
    }
}

impl Default for OutputOptions {
    fn default() -> Self {
        OutputOptions {
            armor: true,
            with_integrity_check: true,
            name: None,
            headers: BTreeMap::new(),
        }
    }
}

impl OutputOptions {
    pub fn builder() -> OutputOptionsBuilder {
        OutputOptionsBuilder::default()
    }

    pub fn armor(&self) -> bool {
        self.armor
    }

    pub fn with_integrity_check(&self) -> bool {
        self.with_integrity_check
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Same options, but always armored. Used by the string shaped operations.
    pub(crate) fn armored(&self) -> Self {
        OutputOptions {
            armor: true,
            ..self.clone()
        }
    }

    /// The embedded file name, falling back to `fallback`.
    pub(crate) fn file_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }

    /// Headers in the shape the armor writer expects, `None` if there are none.
    pub(crate) fn armor_headers(&self) -> Option<armor::Headers> {
        if self.headers.is_empty() {
            return None;
        }
        Some(
            self.headers
                .iter()
                .map(|(k, v)| (k.clone(), vec![v.clone()]))
                .collect(),
        )
    }
}
