//! Reading and writing OpenPGP messages.
//!
//! Decryption and verification walk the nested packet layers of a parsed
//! message ([`walker`]). Encryption and signing run the linear
//! literal → signature → compression → encryption → armor chain ([`compose`]).

use std::fmt::Debug;
use std::io::{BufRead, Read};

use log::debug;
use pgp::composed::Message;

use crate::errors::{Error, Result};
use crate::io::sniff_armor;

pub mod cleartext;
pub mod compose;
pub mod inspect;
pub mod walker;

pub use self::inspect::Inspection;
pub use self::walker::{Walk, WalkMode};

/// Kind of the outermost layer of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Layer {
    #[display("encrypted data")]
    Encrypted,
    #[display("compressed data")]
    Compressed,
    #[display("one-pass signed data")]
    OnePassSigned,
    #[display("signed data")]
    Signed,
    #[display("literal data")]
    Literal,
}

impl Layer {
    pub fn of(msg: &Message<'_>) -> Self {
        match msg {
            Message::Encrypted { .. } => Layer::Encrypted,
            Message::Compressed { .. } => Layer::Compressed,
            Message::SignedOnePass { .. } => Layer::OnePassSigned,
            Message::Signed { .. } => Layer::Signed,
            Message::Literal { .. } => Layer::Literal,
        }
    }
}

/// A parsed message and the armor headers it came with.
pub struct Parsed<'a> {
    pub message: Message<'a>,
    pub armored: bool,
    pub headers: pgp::armor::Headers,
}

/// Parses armored or binary input, detected from its first bytes.
pub fn parse<'a, R: Read + Debug + Send + 'a>(input: R) -> Result<Parsed<'a>> {
    let (armored, reader) = sniff_armor(input)?;
    parse_sniffed(armored, reader)
}

fn parse_sniffed<'a, R>(armored: bool, reader: R) -> Result<Parsed<'a>>
where
    R: BufRead + Debug + Send + 'a,
{
    if armored {
        let (message, headers) = Message::from_armor(reader).map_err(unknown_format)?;
        Ok(Parsed {
            message,
            armored,
            headers,
        })
    } else {
        Ok(Parsed {
            message: Message::from_bytes(reader).map_err(unknown_format)?,
            armored,
            headers: Default::default(),
        })
    }
}

/// File name of the literal data packet, once the message has been read.
pub(crate) fn literal_file_name(msg: &Message<'_>) -> Option<String> {
    msg.literal_data_header()
        .map(|header| String::from_utf8_lossy(header.file_name()).into_owned())
}

fn unknown_format(err: pgp::errors::Error) -> Error {
    debug!("failed to parse message: {err}");
    Error::UnknownFormat
}
