//! Input plumbing shared by all operations: offset checks, file opening and
//! armor detection.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek};
use std::path::Path;

use log::debug;

use crate::errors::{Error, Result};

const ARMOR_PREFIX: &[u8] = b"-----BEGIN PGP";

/// How many bytes are looked at to decide whether the input is armored.
const SNIFF_LEN: usize = 256;

/// Fails unless `input` is positioned at offset 0.
pub(crate) fn ensure_at_start<S: Seek + ?Sized>(input: &mut S) -> Result<()> {
    let position = input.stream_position()?;
    if position != 0 {
        return Err(Error::InputNotAtStart { position });
    }
    Ok(())
}

/// Opens an existing file for reading.
pub(crate) fn open_input(path: &Path) -> Result<File> {
    if !path.is_file() {
        return Err(Error::InputFileMissing {
            path: path.to_path_buf(),
        });
    }
    Ok(File::open(path)?)
}

/// File name to embed for `path`, falling back to `fallback`.
pub(crate) fn file_name_of<'a>(path: &'a Path, fallback: &'a str) -> &'a str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(fallback)
}

/// The input with the sniffed prefix put back in front of it.
pub(crate) type Sniffed<R> = BufReader<io::Chain<Cursor<Vec<u8>>, R>>;

/// Reads the beginning of `input` to find out whether it is ASCII armored.
///
/// Leading whitespace is skipped before looking for `-----BEGIN PGP`.
pub(crate) fn sniff_armor<R: Read>(mut input: R) -> io::Result<(bool, Sniffed<R>)> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut input).take(SNIFF_LEN as u64).read_to_end(&mut head)?;

    let armored = is_armored(&head);
    debug!("sniffed {} bytes, armored: {}", head.len(), armored);

    Ok((armored, BufReader::new(Cursor::new(head).chain(input))))
}

fn is_armored(head: &[u8]) -> bool {
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    head[start..].starts_with(ARMOR_PREFIX)
}

/// Reads everything from a `BufRead` into a string.
pub(crate) fn read_to_string<R: BufRead>(mut input: R) -> Result<String> {
    let mut buf = Vec::new();
    input.read_to_end(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}
