//! Writing messages: literal data, optionally signed, compressed and
//! encrypted, binary or ASCII armored.
//!
//! The layers are written as fixed length packets, so the content is held in
//! memory while the message is composed.

use std::io::{self, Read, Write};

use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, warn};
use pgp::armor::{self, BlockType};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{
    CompressedData, DataMode, LiteralData, OnePassSignature, PacketHeader, PacketTrait,
    PublicKeyEncryptedSessionKey, SignatureType, SymEncryptedProtectedData,
};
use pgp::ser::Serialize;
use pgp::types::{CompressionAlgorithm, Tag};
use rand::{CryptoRng, Rng};

use crate::config::{FileType, OutputOptions, PgpConfig};
use crate::errors::{Error, Result};
use crate::keys::{key_id_hex, PrivateKey, PublicKeyRef};

/// Everything needed to write one message.
pub struct Plan<'a> {
    pub config: &'a PgpConfig,
    pub options: &'a OutputOptions,
    /// Stored in the literal data packet.
    pub file_name: &'a str,
    /// Encryption keys, one per recipient. Empty for signed-only output.
    pub recipients: Vec<PublicKeyRef<'a>>,
    pub signer: Option<PrivateKey<'a>>,
    /// Modification time stored in the literal data packet, now if `None`.
    pub modified: Option<DateTime<Utc>>,
}

impl Plan<'_> {
    pub fn write<R: Read, W: Write>(self, input: R, mut output: W) -> Result<()> {
        let mut rng = rand::thread_rng();

        let modified = self.modified.unwrap_or_else(Utc::now);
        let literal = literal_data(self.file_name, self.config.file_type(), modified, input)?;
        debug!(
            "literal data {:?}, {} bytes, {:?}",
            self.file_name,
            literal.data().len(),
            self.config.file_type()
        );

        let mut packets = Vec::new();
        match &self.signer {
            Some(signer) => self.sign(signer, &literal, &mut packets)?,
            None => literal.to_writer_with_header(&mut packets)?,
        }
        drop(literal);

        if let Some(algorithm) = self.config.compression().algorithm() {
            packets = compress(algorithm, &packets)?;
        }

        if !self.recipients.is_empty() {
            if !self.options.with_integrity_check() {
                warn!("integrity protection cannot be disabled, writing a protected message");
            }
            packets = self.encrypt(&mut rng, &packets)?;
        }

        if self.options.armor() {
            let headers = self.options.armor_headers();
            armor::write(
                &RawPackets(&packets),
                BlockType::Message,
                &mut output,
                headers.as_ref(),
                true,
            )?;
        } else {
            output.write_all(&packets)?;
        }
        output.flush()?;
        Ok(())
    }

    /// One-pass signature, literal data, signature.
    fn sign(
        &self,
        signer: &PrivateKey<'_>,
        literal: &LiteralData,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        signer.ensure_signing_version()?;
        let typ = match self.config.file_type() {
            FileType::Binary => SignatureType::Binary,
            FileType::Text | FileType::UTF8 => SignatureType::Text,
        };
        let hash = self.config.hash_algorithm();
        debug!("signing with {:?} using {} ({:?})", signer, hash, typ);

        let signature = signer
            .sign(typ, hash, literal.data())
            .map_err(|source| Error::KeyExtraction {
                key_id: key_id_hex(&signer.key_id()),
                source,
            })?;
        let ops = OnePassSignature::v3(typ, hash, signer.algorithm(), signer.key_id());
        ops.to_writer_with_header(out)?;
        literal.to_writer_with_header(out)?;
        signature.to_writer_with_header(out)?;
        Ok(())
    }

    /// A session key encrypted to every recipient, then the SEIPD v1 payload.
    fn encrypt<G: CryptoRng + Rng>(&self, rng: &mut G, plaintext: &[u8]) -> Result<Vec<u8>> {
        let algorithm = self.config.symmetric_algorithm();
        let session_key = algorithm.new_session_key(&mut *rng);

        let mut out = Vec::new();
        for key in &self.recipients {
            debug!("encrypting to {}", key);
            let pkesk = session_key_packet(&mut *rng, &session_key, algorithm, key)?;
            pkesk.to_writer_with_header(&mut out)?;
        }
        let edata = SymEncryptedProtectedData::encrypt_seipdv1(
            &mut *rng,
            algorithm,
            &session_key,
            plaintext,
        )?;
        edata.to_writer_with_header(&mut out)?;
        Ok(out)
    }
}

/// Packets that are already serialized, handed to the armor writer as is.
struct RawPackets<'a>(&'a [u8]);

impl Serialize for RawPackets<'_> {
    fn to_writer<W: io::Write>(&self, writer: &mut W) -> pgp::errors::Result<()> {
        writer.write_all(self.0)?;
        Ok(())
    }

    fn write_len(&self) -> usize {
        self.0.len()
    }
}

/// Builds the literal data packet.
///
/// rPGP only creates literal packets stamped with the current time and an
/// empty or caller supplied name in binary or UTF-8 format. The body is
/// written here so that the format octet, the name and the modification time
/// all come from the caller. Line endings are kept as they are, text
/// signatures normalize them while hashing.
fn literal_data<R: Read>(
    file_name: &str,
    file_type: FileType,
    modified: DateTime<Utc>,
    mut input: R,
) -> Result<LiteralData> {
    let name = file_name.as_bytes();
    let name_len = u8::try_from(name.len()).map_err(|_| Error::InvalidInput {
        message: format!("file name {file_name:?} is longer than 255 bytes"),
    })?;
    let created = u32::try_from(modified.trunc_subsecs(0).timestamp()).map_err(|_| {
        Error::InvalidInput {
            message: format!("modification time {modified} cannot be stored"),
        }
    })?;

    let mut body = Vec::with_capacity(6 + name.len());
    body.push(u8::from(DataMode::from(file_type)));
    body.push(name_len);
    body.extend_from_slice(name);
    body.extend_from_slice(&created.to_be_bytes());
    input.read_to_end(&mut body)?;

    let len = u32::try_from(body.len()).map_err(|_| Error::InvalidInput {
        message: "input does not fit into a single literal data packet".to_string(),
    })?;
    let header = PacketHeader::new_fixed(Tag::LiteralData, len);
    Ok(LiteralData::try_from_reader(header, &body[..])?)
}

fn session_key_packet<G: CryptoRng + Rng>(
    rng: &mut G,
    session_key: &[u8],
    algorithm: SymmetricKeyAlgorithm,
    key: &PublicKeyRef<'_>,
) -> Result<PublicKeyEncryptedSessionKey> {
    let pkesk = match key {
        PublicKeyRef::Primary(k) => PublicKeyEncryptedSessionKey::from_session_key_v3(
            rng,
            session_key,
            algorithm,
            &k.primary_key,
        ),
        PublicKeyRef::Subkey(k) => {
            PublicKeyEncryptedSessionKey::from_session_key_v3(rng, session_key, algorithm, &k.key)
        }
    }?;
    Ok(pkesk)
}

/// Wraps `packets` into a compressed data packet.
fn compress(algorithm: CompressionAlgorithm, packets: &[u8]) -> Result<Vec<u8>> {
    let mut body = vec![u8::from(algorithm)];
    match algorithm {
        CompressionAlgorithm::ZIP => {
            let mut encoder =
                flate2::write::DeflateEncoder::new(&mut body, flate2::Compression::default());
            encoder.write_all(packets)?;
            encoder.finish()?;
        }
        CompressionAlgorithm::ZLIB => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(&mut body, flate2::Compression::default());
            encoder.write_all(packets)?;
            encoder.finish()?;
        }
        CompressionAlgorithm::BZip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(&mut body, bzip2::Compression::default());
            encoder.write_all(packets)?;
            encoder.finish()?;
        }
        other => {
            return Err(Error::Message {
                message: format!("unsupported compression algorithm {other:?}"),
            })
        }
    }
    debug!(
        "compressed {} bytes to {} with {:?}",
        packets.len(),
        body.len(),
        algorithm
    );

    let len = u32::try_from(body.len()).map_err(|_| Error::InvalidInput {
        message: "compressed data does not fit into a single packet".to_string(),
    })?;
    let header = PacketHeader::new_fixed(Tag::CompressedData, len);
    let packet = CompressedData::try_from_reader(header, &body[..])?;
    let mut out = Vec::with_capacity(body.len() + 6);
    packet.to_writer_with_header(&mut out)?;
    Ok(out)
}
