use std::io;

use chrono::{DateTime, Utc};
use log::debug;
use pgp::armor::Headers;

use crate::errors::{Error, Result};
use crate::keys::EncryptionKeyMaterial;
use crate::message::walker::{
    copy_content, is_integrity_protected, open_payload, payload_error, recover_session_key,
    MAX_DEPTH,
};
use crate::message::{literal_file_name, Layer, Parsed};

/// Structure of a message.
///
/// Layers below the encryption are only visible when one of the configured
/// secret keys can decrypt the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub is_armored: bool,
    pub is_encrypted: bool,
    pub is_integrity_protected: bool,
    pub is_compressed: bool,
    pub is_signed: bool,
    pub headers: Headers,
    /// File name of the literal data packet.
    pub file_name: Option<String>,
    pub modification_time: Option<DateTime<Utc>>,
}

pub fn inspect(parsed: Parsed<'_>, keys: &EncryptionKeyMaterial) -> Result<Inspection> {
    let Parsed {
        mut message,
        armored,
        headers,
    } = parsed;
    let mut inspection = Inspection {
        is_armored: armored,
        headers,
        ..Default::default()
    };

    for _ in 0..MAX_DEPTH {
        match Layer::of(&message) {
            Layer::Encrypted => {
                if inspection.is_encrypted {
                    return Err(Error::NotSimpleMessage);
                }
                inspection.is_encrypted = true;
                inspection.is_integrity_protected = is_integrity_protected(&message);

                let Some(session_key) = recover_session_key(&message, keys)? else {
                    debug!("no secret key for the message, stopping at the encryption layer");
                    return Ok(inspection);
                };
                message = open_payload(message, session_key)?;
            }
            Layer::Compressed => {
                inspection.is_compressed = true;
                message = message
                    .decompress()
                    .map_err(payload_error(inspection.is_integrity_protected))?;
            }
            layer @ (Layer::Signed | Layer::OnePassSigned | Layer::Literal) => {
                inspection.is_signed = layer != Layer::Literal;
                // the literal header of a one-pass signed message is only
                // known once its packets have been read
                copy_content(
                    &mut message,
                    &mut io::sink(),
                    inspection.is_integrity_protected,
                )?;
                inspection.file_name = literal_file_name(&message);
                inspection.modification_time = message
                    .literal_data_header()
                    .map(|header| header.created());
                return Ok(inspection);
            }
        }
    }

    Err(Error::NotSimpleMessage)
}
