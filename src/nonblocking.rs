//! Awaitable operations for tokio runtimes.
//!
//! Each call runs the blocking operation of [`Pgp`] on the blocking thread
//! pool. Stream variants pass the input to it in chunks as they arrive and
//! forward the output in chunks as it is produced, through bounded channels.

use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use pgp::types::KeyId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::config::OutputOptions;
use crate::errors::Result;
use crate::facade::{Pgp, VerificationResult};
use crate::message::Inspection;

const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks in flight per direction.
const CHANNEL_DEPTH: usize = 4;

/// Encrypting and signing operations, all shaped `(input, output, options)`.
macro_rules! protect_ops {
    ($($file:ident, $stream:ident, $string:ident;)*) => {$(
        pub async fn $file(
            &self,
            input: impl Into<PathBuf>,
            output: impl Into<PathBuf>,
            options: OutputOptions,
        ) -> Result<()> {
            let (input, output) = (input.into(), output.into());
            self.run(move |pgp| pgp.$file(&input, &output, &options)).await
        }

        pub async fn $stream<R, W>(
            &self,
            input: R,
            output: W,
            options: OutputOptions,
        ) -> Result<()>
        where
            R: AsyncRead + Unpin,
            W: AsyncWrite + Unpin,
        {
            self.stream_through(input, output, move |pgp, input, output| {
                pgp.$stream(input, output, &options)
            })
            .await
        }

        pub async fn $string(
            &self,
            input: impl Into<String>,
            options: OutputOptions,
        ) -> Result<String> {
            let input = input.into();
            self.run(move |pgp| pgp.$string(&input, &options)).await
        }
    )*};
}

/// Decrypting operations, all shaped `(input, output)`.
macro_rules! open_ops {
    ($($file:ident, $stream:ident, $string:ident;)*) => {$(
        pub async fn $file(
            &self,
            input: impl Into<PathBuf>,
            output: impl Into<PathBuf>,
        ) -> Result<()> {
            let (input, output) = (input.into(), output.into());
            self.run(move |pgp| pgp.$file(&input, &output)).await
        }

        pub async fn $stream<R, W>(&self, input: R, output: W) -> Result<()>
        where
            R: AsyncRead + Unpin,
            W: AsyncWrite + Unpin,
        {
            self.stream_through(input, output, |pgp, input, output| pgp.$stream(input, output))
                .await
        }

        pub async fn $string(&self, input: impl Into<String>) -> Result<String> {
            let input = input.into();
            self.run(move |pgp| pgp.$string(&input)).await
        }
    )*};
}

/// Shareable handle running [`Pgp`] operations without blocking the runtime.
#[derive(Debug, Clone)]
pub struct AsyncPgp {
    inner: Arc<Pgp>,
}

impl From<Pgp> for AsyncPgp {
    fn from(pgp: Pgp) -> Self {
        AsyncPgp::new(pgp)
    }
}

impl AsyncPgp {
    pub fn new(pgp: impl Into<Arc<Pgp>>) -> Self {
        AsyncPgp { inner: pgp.into() }
    }

    pub fn pgp(&self) -> &Pgp {
        &self.inner
    }

    protect_ops! {
        encrypt_file, encrypt_stream, encrypt_armored_string;
        encrypt_and_sign_file, encrypt_and_sign_stream, encrypt_and_sign_armored_string;
        sign_file, sign_stream, sign_armored_string;
        clear_sign_file, clear_sign_stream, clear_sign_armored_string;
    }

    open_ops! {
        decrypt_file, decrypt_stream, decrypt_armored_string;
        decrypt_and_verify_file, decrypt_and_verify_stream, decrypt_and_verify_armored_string;
    }

    pub async fn verify_file(
        &self,
        input: impl Into<PathBuf>,
        throw_if_encrypted: bool,
    ) -> Result<bool> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_file(&input, throw_if_encrypted))
            .await
    }

    pub async fn verify_stream<R: AsyncRead + Unpin>(
        &self,
        input: R,
        throw_if_encrypted: bool,
    ) -> Result<bool> {
        self.read_through(input, move |pgp, input| {
            pgp.verify_stream(input, throw_if_encrypted)
        })
        .await
    }

    pub async fn verify_armored_string(
        &self,
        input: impl Into<String>,
        throw_if_encrypted: bool,
    ) -> Result<bool> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_armored_string(&input, throw_if_encrypted))
            .await
    }

    pub async fn verify_and_read_file(
        &self,
        input: impl Into<PathBuf>,
        throw_if_encrypted: bool,
    ) -> Result<VerificationResult> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_and_read_file(&input, throw_if_encrypted))
            .await
    }

    pub async fn verify_and_read_stream<R: AsyncRead + Unpin>(
        &self,
        input: R,
        throw_if_encrypted: bool,
    ) -> Result<VerificationResult> {
        self.read_through(input, move |pgp, input| {
            pgp.verify_and_read_stream(input, throw_if_encrypted)
        })
        .await
    }

    pub async fn verify_and_read_armored_string(
        &self,
        input: impl Into<String>,
        throw_if_encrypted: bool,
    ) -> Result<VerificationResult> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_and_read_armored_string(&input, throw_if_encrypted))
            .await
    }

    pub async fn verify_clear_file(&self, input: impl Into<PathBuf>) -> Result<bool> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_clear_file(&input)).await
    }

    pub async fn verify_clear_stream<R: AsyncRead + Unpin>(&self, input: R) -> Result<bool> {
        self.read_through(input, |pgp, input| pgp.verify_clear_stream(input))
            .await
    }

    pub async fn verify_clear_armored_string(&self, input: impl Into<String>) -> Result<bool> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_clear_armored_string(&input))
            .await
    }

    pub async fn verify_clear_and_read_file(
        &self,
        input: impl Into<PathBuf>,
    ) -> Result<VerificationResult> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_clear_and_read_file(&input))
            .await
    }

    pub async fn verify_clear_and_read_stream<R: AsyncRead + Unpin>(
        &self,
        input: R,
    ) -> Result<VerificationResult> {
        self.read_through(input, |pgp, input| pgp.verify_clear_and_read_stream(input))
            .await
    }

    pub async fn verify_clear_and_read_armored_string(
        &self,
        input: impl Into<String>,
    ) -> Result<VerificationResult> {
        let input = input.into();
        self.run(move |pgp| pgp.verify_clear_and_read_armored_string(&input))
            .await
    }

    pub async fn inspect_file(&self, input: impl Into<PathBuf>) -> Result<Inspection> {
        let input = input.into();
        self.run(move |pgp| pgp.inspect_file(&input)).await
    }

    pub async fn inspect_stream<R: AsyncRead + Unpin>(&self, input: R) -> Result<Inspection> {
        self.read_through(input, |pgp, input| pgp.inspect_stream(input))
            .await
    }

    pub async fn inspect_armored_string(&self, input: impl Into<String>) -> Result<Inspection> {
        let input = input.into();
        self.run(move |pgp| pgp.inspect_armored_string(&input)).await
    }

    pub async fn get_recipients_file(&self, input: impl Into<PathBuf>) -> Result<Vec<KeyId>> {
        let input = input.into();
        self.run(move |pgp| pgp.get_recipients_file(&input)).await
    }

    pub async fn get_recipients_stream<R: AsyncRead + Unpin>(
        &self,
        input: R,
    ) -> Result<Vec<KeyId>> {
        self.read_through(input, |pgp, input| pgp.get_recipients_stream(input))
            .await
    }

    pub async fn get_recipients_armored_string(
        &self,
        input: impl Into<String>,
    ) -> Result<Vec<KeyId>> {
        let input = input.into();
        self.run(move |pgp| pgp.get_recipients_armored_string(&input))
            .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Pgp) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pgp = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&pgp)).await?
    }

    /// Runs `op` with `input` fed to it and its output forwarded to `output`.
    async fn stream_through<R, W, F>(&self, input: R, output: W, op: F) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnOnce(&Pgp, ChannelReader, &mut BufWriter<ChannelWriter>) -> Result<()>
            + Send
            + 'static,
    {
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (output_tx, output_rx) = mpsc::channel(CHANNEL_DEPTH);
        let reader = ChannelReader::new(input_rx);

        let blocking = self.run(move |pgp| {
            let mut writer = BufWriter::with_capacity(CHUNK_SIZE, ChannelWriter { tx: output_tx });
            op(pgp, reader, &mut writer)?;
            writer.flush()?;
            Ok(())
        });
        let (result, (), drained) =
            tokio::join!(blocking, feed(input, input_tx), drain(output_rx, output));
        // a failing output also breaks the writer, report the cause
        drained?;
        result
    }

    /// Runs `op` with `input` fed to it.
    async fn read_through<R, T, F>(&self, input: R, op: F) -> Result<T>
    where
        R: AsyncRead + Unpin,
        F: FnOnce(&Pgp, ChannelReader) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_DEPTH);
        let reader = ChannelReader::new(input_rx);

        let blocking = self.run(move |pgp| op(pgp, reader));
        let (result, ()) = tokio::join!(blocking, feed(input, input_tx));
        result
    }
}

/// Blocking reader over the chunks sent by [`feed`].
#[derive(Debug)]
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Cursor<Vec<u8>>,
    position: u64,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        ChannelReader {
            rx,
            chunk: Cursor::new(Vec::new()),
            position: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = Read::read(&mut self.chunk, buf)?;
            if read > 0 || buf.is_empty() {
                self.position += read as u64;
                return Ok(read);
            }
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.chunk = Cursor::new(chunk),
                Some(Err(err)) => return Err(err),
                None => return Ok(0),
            }
        }
    }
}

/// Only reports the current position, nothing else can be sought.
impl Seek for ChannelReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "streamed input cannot be sought",
            )),
        }
    }
}

/// Blocking writer handing its chunks to [`drain`].
#[derive(Debug)]
struct ChannelWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output was closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sends `input` in chunks until it ends, fails or the reader goes away.
async fn feed<R: AsyncRead + Unpin>(mut input: R, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    loop {
        let mut chunk = vec![0; CHUNK_SIZE];
        let item = match input.read(&mut chunk).await {
            Ok(0) => return,
            Ok(read) => {
                chunk.truncate(read);
                Ok(chunk)
            }
            Err(err) => Err(err),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            debug!("input no longer read, stopping");
            return;
        }
        if failed {
            return;
        }
    }
}

/// Writes the received chunks to `output` until the writer is dropped.
async fn drain<W: AsyncWrite + Unpin>(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut output: W,
) -> io::Result<()> {
    while let Some(chunk) = rx.recv().await {
        output.write_all(&chunk).await?;
    }
    output.flush().await
}
