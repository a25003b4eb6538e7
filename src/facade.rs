//! The operation surface: encrypt, sign, decrypt and verify over files,
//! seekable streams and armored strings.
//!
//! Every operation checks the key material it needs first, then the input,
//! and only then touches the output.

use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use pgp::types::KeyId;

use crate::config::{OutputOptions, PgpConfig, DEFAULT_FILE_NAME};
use crate::errors::{Error, KeyPurpose, Result};
use crate::io::{ensure_at_start, file_name_of, open_input, read_to_string};
use crate::keys::EncryptionKeyMaterial;
use crate::message::cleartext::{self, ClearSigned};
use crate::message::compose::Plan;
use crate::message::walker::{recipients, MessageWalker};
use crate::message::{inspect, parse, Inspection, Layer, Walk, WalkMode};

/// Outcome of a verify-and-read operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    verified: bool,
    content: String,
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Encrypt,
    Sign,
    EncryptAndSign,
}

impl Protection {
    fn encrypts(self) -> bool {
        self != Protection::Sign
    }

    fn signs(self) -> bool {
        self != Protection::Encrypt
    }
}

/// Keys and configuration for a series of operations.
#[derive(Debug, Clone, Default)]
pub struct Pgp {
    keys: EncryptionKeyMaterial,
    config: PgpConfig,
}

impl Pgp {
    pub fn new(keys: EncryptionKeyMaterial, config: PgpConfig) -> Self {
        Pgp { keys, config }
    }

    pub fn with_keys(keys: EncryptionKeyMaterial) -> Self {
        Pgp::new(keys, PgpConfig::default())
    }

    pub fn keys(&self) -> &EncryptionKeyMaterial {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut EncryptionKeyMaterial {
        &mut self.keys
    }

    pub fn config(&self) -> &PgpConfig {
        &self.config
    }

    // encrypt

    pub fn encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &OutputOptions,
    ) -> Result<()> {
        self.protect_file(Protection::Encrypt, input.as_ref(), output.as_ref(), options)
    }

    pub fn encrypt_stream<R: Read + Seek, W: Write>(
        &self,
        input: R,
        output: W,
        options: &OutputOptions,
    ) -> Result<()> {
        self.protect_stream(Protection::Encrypt, input, output, options)
    }

    pub fn encrypt_armored_string(&self, input: &str, options: &OutputOptions) -> Result<String> {
        self.protect_string(Protection::Encrypt, input, options)
    }

    // encrypt and sign

    pub fn encrypt_and_sign_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &OutputOptions,
    ) -> Result<()> {
        self.protect_file(
            Protection::EncryptAndSign,
            input.as_ref(),
            output.as_ref(),
            options,
        )
    }

    pub fn encrypt_and_sign_stream<R: Read + Seek, W: Write>(
        &self,
        input: R,
        output: W,
        options: &OutputOptions,
    ) -> Result<()> {
        self.protect_stream(Protection::EncryptAndSign, input, output, options)
    }

    pub fn encrypt_and_sign_armored_string(
        &self,
        input: &str,
        options: &OutputOptions,
    ) -> Result<String> {
        self.protect_string(Protection::EncryptAndSign, input, options)
    }

    // sign

    pub fn sign_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &OutputOptions,
    ) -> Result<()> {
        self.protect_file(Protection::Sign, input.as_ref(), output.as_ref(), options)
    }

    pub fn sign_stream<R: Read + Seek, W: Write>(
        &self,
        input: R,
        output: W,
        options: &OutputOptions,
    ) -> Result<()> {
        self.protect_stream(Protection::Sign, input, output, options)
    }

    pub fn sign_armored_string(&self, input: &str, options: &OutputOptions) -> Result<String> {
        self.protect_string(Protection::Sign, input, options)
    }

    // clear sign

    /// Clear-signs a text file. Only the armor headers of `options` apply.
    pub fn clear_sign_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &OutputOptions,
    ) -> Result<()> {
        self.keys.require(KeyPurpose::Signing)?;
        let input = open_input(input.as_ref())?;
        let output = BufWriter::new(File::create(output.as_ref())?);
        self.clear_sign(input, output, options)
    }

    pub fn clear_sign_stream<R: Read + Seek, W: Write>(
        &self,
        mut input: R,
        output: W,
        options: &OutputOptions,
    ) -> Result<()> {
        self.keys.require(KeyPurpose::Signing)?;
        ensure_at_start(&mut input)?;
        self.clear_sign(input, output, options)
    }

    pub fn clear_sign_armored_string(
        &self,
        input: &str,
        options: &OutputOptions,
    ) -> Result<String> {
        let mut out = Vec::new();
        self.clear_sign_stream(Cursor::new(input.as_bytes()), &mut out, options)?;
        Ok(String::from_utf8(out)?)
    }

    // decrypt

    pub fn decrypt_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        self.walk_file(WalkMode::Decrypt, input.as_ref(), output.as_ref())
            .map(|_| ())
    }

    pub fn decrypt_stream<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: Read + Seek + Debug + Send,
        W: Write,
    {
        self.walk_stream(WalkMode::Decrypt, input, output).map(|_| ())
    }

    pub fn decrypt_armored_string(&self, input: &str) -> Result<String> {
        self.walk_string(WalkMode::Decrypt, input)
    }

    // decrypt and verify

    /// Decrypts a message that must be signed by one of the configured public
    /// keys.
    ///
    /// The signer is looked up before any content is written, so a message
    /// from an unknown signer leaves the output file empty. A bad signature
    /// is only detected after the content has been written.
    pub fn decrypt_and_verify_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<()> {
        self.walk_file(WalkMode::DecryptAndVerify, input.as_ref(), output.as_ref())
            .map(|_| ())
    }

    pub fn decrypt_and_verify_stream<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: Read + Seek + Debug + Send,
        W: Write,
    {
        self.walk_stream(WalkMode::DecryptAndVerify, input, output)
            .map(|_| ())
    }

    pub fn decrypt_and_verify_armored_string(&self, input: &str) -> Result<String> {
        self.walk_string(WalkMode::DecryptAndVerify, input)
    }

    // verify

    /// Checks the signature of a signed, possibly encrypted, message.
    ///
    /// With `throw_if_encrypted` an encrypted message is rejected with
    /// [`Error::EncryptedInput`], otherwise it is decrypted first.
    /// Unsigned messages and unknown or bad signatures yield `Ok(false)`.
    pub fn verify_file(&self, input: impl AsRef<Path>, throw_if_encrypted: bool) -> Result<bool> {
        self.keys.require(KeyPurpose::Verification)?;
        let input = open_input(input.as_ref())?;
        Ok(self.verify_buffered(input, throw_if_encrypted)?.0.verified)
    }

    pub fn verify_stream<R>(&self, mut input: R, throw_if_encrypted: bool) -> Result<bool>
    where
        R: Read + Seek + Debug + Send,
    {
        self.keys.require(KeyPurpose::Verification)?;
        ensure_at_start(&mut input)?;
        Ok(self.verify_buffered(input, throw_if_encrypted)?.0.verified)
    }

    pub fn verify_armored_string(&self, input: &str, throw_if_encrypted: bool) -> Result<bool> {
        self.verify_stream(Cursor::new(input.as_bytes()), throw_if_encrypted)
    }

    // verify and read

    pub fn verify_and_read_file(
        &self,
        input: impl AsRef<Path>,
        throw_if_encrypted: bool,
    ) -> Result<VerificationResult> {
        self.keys.require(KeyPurpose::Verification)?;
        let input = open_input(input.as_ref())?;
        self.verify_and_read(input, throw_if_encrypted)
    }

    pub fn verify_and_read_stream<R: Read + Seek + Debug + Send>(
        &self,
        mut input: R,
        throw_if_encrypted: bool,
    ) -> Result<VerificationResult> {
        self.keys.require(KeyPurpose::Verification)?;
        ensure_at_start(&mut input)?;
        self.verify_and_read(input, throw_if_encrypted)
    }

    pub fn verify_and_read_armored_string(
        &self,
        input: &str,
        throw_if_encrypted: bool,
    ) -> Result<VerificationResult> {
        self.verify_and_read_stream(Cursor::new(input.as_bytes()), throw_if_encrypted)
    }

    // verify clear

    /// Checks a clear-signed message against the first configured
    /// verification key.
    pub fn verify_clear_file(&self, input: impl AsRef<Path>) -> Result<bool> {
        Ok(self.verify_clear_and_read_file(input)?.verified)
    }

    pub fn verify_clear_stream<R: Read + Seek>(&self, input: R) -> Result<bool> {
        Ok(self.verify_clear_and_read_stream(input)?.verified)
    }

    pub fn verify_clear_armored_string(&self, input: &str) -> Result<bool> {
        Ok(self.verify_clear_and_read_armored_string(input)?.verified)
    }

    pub fn verify_clear_and_read_file(
        &self,
        input: impl AsRef<Path>,
    ) -> Result<VerificationResult> {
        self.keys.require(KeyPurpose::Verification)?;
        let input = open_input(input.as_ref())?;
        self.verify_clear(input)
    }

    pub fn verify_clear_and_read_stream<R: Read + Seek>(
        &self,
        mut input: R,
    ) -> Result<VerificationResult> {
        self.keys.require(KeyPurpose::Verification)?;
        ensure_at_start(&mut input)?;
        self.verify_clear(input)
    }

    pub fn verify_clear_and_read_armored_string(
        &self,
        input: &str,
    ) -> Result<VerificationResult> {
        self.verify_clear_and_read_stream(Cursor::new(input.as_bytes()))
    }

    // inspect

    pub fn inspect_file(&self, input: impl AsRef<Path>) -> Result<Inspection> {
        inspect::inspect(parse(open_input(input.as_ref())?)?, &self.keys)
    }

    pub fn inspect_stream<R>(&self, mut input: R) -> Result<Inspection>
    where
        R: Read + Seek + Debug + Send,
    {
        ensure_at_start(&mut input)?;
        inspect::inspect(parse(input)?, &self.keys)
    }

    pub fn inspect_armored_string(&self, input: &str) -> Result<Inspection> {
        self.inspect_stream(Cursor::new(input.as_bytes()))
    }

    // recipients

    /// Key ids the message is encrypted to, without decrypting it.
    pub fn get_recipients_file(&self, input: impl AsRef<Path>) -> Result<Vec<KeyId>> {
        get_recipients(open_input(input.as_ref())?)
    }

    pub fn get_recipients_stream<R>(&self, mut input: R) -> Result<Vec<KeyId>>
    where
        R: Read + Seek + Debug + Send,
    {
        ensure_at_start(&mut input)?;
        get_recipients(input)
    }

    pub fn get_recipients_armored_string(&self, input: &str) -> Result<Vec<KeyId>> {
        self.get_recipients_stream(Cursor::new(input.as_bytes()))
    }

    fn require_for(&self, protection: Protection) -> Result<()> {
        if protection.encrypts() {
            self.keys.require(KeyPurpose::Encryption)?;
        }
        if protection.signs() {
            self.keys.require(KeyPurpose::Signing)?;
        }
        Ok(())
    }

    fn protect_file(
        &self,
        protection: Protection,
        input: &Path,
        output: &Path,
        options: &OutputOptions,
    ) -> Result<()> {
        self.require_for(protection)?;
        let reader = open_input(input)?;
        let modified = reader.metadata()?.modified().ok().map(DateTime::<Utc>::from);
        let writer = BufWriter::new(File::create(output)?);
        let name = options.file_name(file_name_of(input, DEFAULT_FILE_NAME));
        self.protect(protection, reader, writer, options, name, modified)
    }

    fn protect_stream<R: Read + Seek, W: Write>(
        &self,
        protection: Protection,
        mut input: R,
        output: W,
        options: &OutputOptions,
    ) -> Result<()> {
        self.require_for(protection)?;
        ensure_at_start(&mut input)?;
        self.protect(
            protection,
            input,
            output,
            options,
            options.file_name(DEFAULT_FILE_NAME),
            None,
        )
    }

    fn protect_string(
        &self,
        protection: Protection,
        input: &str,
        options: &OutputOptions,
    ) -> Result<String> {
        let mut out = Vec::new();
        self.protect_stream(
            protection,
            Cursor::new(input.as_bytes()),
            &mut out,
            &options.armored(),
        )?;
        Ok(String::from_utf8(out)?)
    }

    fn protect<R: Read, W: Write>(
        &self,
        protection: Protection,
        input: R,
        output: W,
        options: &OutputOptions,
        file_name: &str,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        debug!("{:?} {:?} (armor: {})", protection, file_name, options.armor());
        let plan = Plan {
            config: &self.config,
            options,
            file_name,
            recipients: if protection.encrypts() {
                self.keys.encryption_keys()?
            } else {
                Vec::new()
            },
            signer: if protection.signs() {
                Some(self.keys.signing_key()?)
            } else {
                None
            },
            modified,
        };
        plan.write(input, output)
    }

    fn clear_sign<R: Read, W: Write>(
        &self,
        input: R,
        output: W,
        options: &OutputOptions,
    ) -> Result<()> {
        let text = read_to_string(BufReader::new(input))?;
        let signer = self.keys.signing_key()?;
        let headers = options.armor_headers();
        cleartext::sign(
            &text,
            &signer,
            self.config.hash_algorithm(),
            headers.as_ref(),
            output,
        )
    }

    fn require_for_walk(&self, mode: WalkMode) -> Result<()> {
        match mode {
            WalkMode::Decrypt => self.keys.require(KeyPurpose::Decryption),
            WalkMode::DecryptAndVerify => {
                self.keys.require(KeyPurpose::Decryption)?;
                self.keys.require(KeyPurpose::Verification)
            }
            WalkMode::VerifyEncrypted | WalkMode::VerifySigned => {
                self.keys.require(KeyPurpose::Verification)
            }
        }
    }

    fn walk_file(&self, mode: WalkMode, input: &Path, output: &Path) -> Result<Walk> {
        self.require_for_walk(mode)?;
        let reader = open_input(input)?;
        let writer = BufWriter::new(File::create(output)?);
        self.walk(mode, reader, writer)
    }

    fn walk_stream<R: Read + Seek + Debug + Send, W: Write>(
        &self,
        mode: WalkMode,
        mut input: R,
        output: W,
    ) -> Result<Walk> {
        self.require_for_walk(mode)?;
        ensure_at_start(&mut input)?;
        self.walk(mode, input, output)
    }

    fn walk_string(&self, mode: WalkMode, input: &str) -> Result<String> {
        let mut out = Vec::new();
        self.walk_stream(mode, Cursor::new(input.as_bytes()), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    fn walk<R, W>(&self, mode: WalkMode, input: R, mut output: W) -> Result<Walk>
    where
        R: Read + Debug + Send,
        W: Write,
    {
        debug!("{:?}", mode);
        let parsed = parse(input)?;
        let walk = MessageWalker::new(mode, &self.keys).walk(parsed.message, &mut output)?;
        debug!("{:?} done: {:?}", mode, walk);
        Ok(walk)
    }

    /// Walks a message in one of the verify modes, collecting its content.
    fn verify_buffered<R>(&self, input: R, throw_if_encrypted: bool) -> Result<(Walk, Vec<u8>)>
    where
        R: Read + Debug + Send,
    {
        let mode = if throw_if_encrypted {
            WalkMode::VerifySigned
        } else {
            WalkMode::VerifyEncrypted
        };
        let mut content = Vec::new();
        let walk = self.walk(mode, input, &mut content)?;
        Ok((walk, content))
    }

    fn verify_and_read<R>(&self, input: R, throw_if_encrypted: bool) -> Result<VerificationResult>
    where
        R: Read + Debug + Send,
    {
        let (walk, content) = self.verify_buffered(input, throw_if_encrypted)?;
        Ok(VerificationResult {
            verified: walk.verified,
            content: String::from_utf8(content)?,
        })
    }

    fn verify_clear<R: Read>(&self, input: R) -> Result<VerificationResult> {
        let text = read_to_string(BufReader::new(input))?;
        let message = ClearSigned::parse(&text)?;
        let key = self.keys.first_verification_key()?;
        Ok(VerificationResult {
            verified: message.verify(key),
            content: message.text(),
        })
    }
}

fn get_recipients<R: Read + Debug + Send>(input: R) -> Result<Vec<KeyId>> {
    let parsed = parse(input)?;
    if Layer::of(&parsed.message) != Layer::Encrypted {
        return Err(Error::UnknownFormat);
    }
    Ok(recipients(&parsed.message))
}
