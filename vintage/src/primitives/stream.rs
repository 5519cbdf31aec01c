//! The STREAM payload transform: chunked authenticated encryption.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305,
};
use secrecy::{ExposeSecret, Secret, SecretVec};
use std::io::{self, Read, Write};

const CHUNK_SIZE: usize = 64 * 1024;
const TAG_SIZE: usize = 16;
const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// The key that a STREAM instance encrypts or decrypts under.
///
/// Derived from the file key and the per-stream nonce, so it is unique to a
/// single payload.
pub(crate) struct PayloadKey(pub(crate) Secret<[u8; 32]>);

/// The per-chunk nonce: an 11-byte big-endian counter followed by one byte
/// holding the last-chunk flag. Stored in the low 12 bytes of a `u128`.
#[derive(Clone, Copy, Default)]
struct ChunkNonce(u128);

impl ChunkNonce {
    /// The counter occupies 88 bits; incrementing past this is an error.
    const EXHAUSTED: u128 = 1 << (8 * 12);

    fn increment_counter(&mut self) -> io::Result<()> {
        self.0 += 1 << 8;
        if self.0 >= Self::EXHAUSTED {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "STREAM nonce counter is exhausted",
            ));
        }
        Ok(())
    }

    fn is_last(&self) -> bool {
        self.0 & 1 != 0
    }

    fn set_last(&mut self, last: bool) -> Result<(), ()> {
        if self.is_last() {
            return Err(());
        }
        self.0 |= u128::from(last);
        Ok(())
    }

    fn to_bytes(self) -> [u8; 12] {
        self.0.to_be_bytes()[4..]
            .try_into()
            .expect("slice is the correct length")
    }
}

/// `STREAM[key](plaintext)`
///
/// The [STREAM] construction for online authenticated encryption,
/// instantiated with ChaCha20-Poly1305 over 64 KiB chunks.
///
/// [STREAM]: https://eprint.iacr.org/2015/189.pdf
pub(crate) struct Stream {
    aead: ChaCha20Poly1305,
    nonce: ChunkNonce,
}

impl Stream {
    fn new(key: PayloadKey) -> Self {
        Stream {
            aead: ChaCha20Poly1305::new(key.0.expose_secret().into()),
            nonce: ChunkNonce::default(),
        }
    }

    /// Wraps STREAM encryption under `key` around a writer.
    ///
    /// `key` must never be reused across streams; the caller guarantees this
    /// by deriving it from a fresh per-stream nonce.
    pub(crate) fn encrypt<W: Write>(key: PayloadKey, inner: W) -> StreamWriter<W> {
        StreamWriter {
            stream: Self::new(key),
            inner,
            chunk: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// Wraps STREAM decryption under `key` around a reader.
    pub(crate) fn decrypt<R: Read>(key: PayloadKey, inner: R) -> StreamReader<R> {
        StreamReader {
            stream: Self::new(key),
            inner,
            encrypted_chunk: vec![0; ENCRYPTED_CHUNK_SIZE],
            encrypted_pos: 0,
            chunk: None,
            chunk_pos: 0,
        }
    }

    fn encrypt_chunk(&mut self, chunk: &[u8], last: bool) -> io::Result<Vec<u8>> {
        assert!(chunk.len() <= CHUNK_SIZE);

        self.nonce.set_last(last).map_err(|_| {
            io::Error::new(io::ErrorKind::WriteZero, "last chunk has been processed")
        })?;

        let encrypted = self
            .aead
            .encrypt(&self.nonce.to_bytes().into(), chunk)
            .expect("we will never hit the ChaCha20 block limit at this chunk size");
        if !last {
            self.nonce.increment_counter()?;
        }

        Ok(encrypted)
    }

    fn decrypt_chunk(&mut self, chunk: &[u8], last: bool) -> io::Result<SecretVec<u8>> {
        assert!(chunk.len() <= ENCRYPTED_CHUNK_SIZE);

        self.nonce.set_last(last).map_err(|_| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "last chunk has been processed",
            )
        })?;

        let decrypted = self
            .aead
            .decrypt(&self.nonce.to_bytes().into(), chunk)
            .map(SecretVec::new)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "decryption error"))?;
        if !last {
            self.nonce.increment_counter()?;
        }

        Ok(decrypted)
    }

    fn is_complete(&self) -> bool {
        self.nonce.is_last()
    }
}

/// Writes an encrypted age payload.
pub struct StreamWriter<W: Write> {
    stream: Stream,
    inner: W,
    chunk: Vec<u8>,
}

impl<W: Write> StreamWriter<W> {
    /// Encrypts and writes the final chunk.
    ///
    /// You **must** call `finish` when you are done writing; without it the
    /// last-chunk marker is never emitted and the file will fail to decrypt.
    pub fn finish(mut self) -> io::Result<W> {
        let encrypted = self.stream.encrypt_chunk(&self.chunk, true)?;
        self.inner.write_all(&encrypted)?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let mut bytes_written = 0;

        while !buf.is_empty() {
            let to_write = (CHUNK_SIZE - self.chunk.len()).min(buf.len());
            self.chunk.extend_from_slice(&buf[..to_write]);
            bytes_written += to_write;
            buf = &buf[to_write..];

            // A full chunk is only encrypted once we know more data follows,
            // because the final chunk must carry the last-chunk flag and is
            // emitted by finish().
            if !buf.is_empty() {
                debug_assert_eq!(self.chunk.len(), CHUNK_SIZE);
                let encrypted = self.stream.encrypt_chunk(&self.chunk, false)?;
                self.inner.write_all(&encrypted)?;
                self.chunk.clear();
            }
        }

        Ok(bytes_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Provides sequential access to a decrypted age payload.
///
/// Bytes read from this reader have been authenticated chunk by chunk, but
/// the stream as a whole is only known to be complete once `read` has
/// returned 0; a caller that acts on plaintext before then accepts that
/// truncation is indistinguishable from success.
pub struct StreamReader<R: Read> {
    stream: Stream,
    inner: R,
    encrypted_chunk: Vec<u8>,
    encrypted_pos: usize,
    chunk: Option<SecretVec<u8>>,
    chunk_pos: usize,
}

impl<R: Read> StreamReader<R> {
    /// Reads until a full encrypted frame is buffered, or EOF.
    fn fill_encrypted_chunk(&mut self) -> io::Result<()> {
        while self.encrypted_pos < ENCRYPTED_CHUNK_SIZE {
            match self
                .inner
                .read(&mut self.encrypted_chunk[self.encrypted_pos..])
            {
                Ok(0) => break,
                Ok(n) => self.encrypted_pos += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn decrypt_chunk(&mut self) -> io::Result<()> {
        let chunk = &self.encrypted_chunk[..self.encrypted_pos];

        if chunk.is_empty() {
            if !self.stream.is_complete() {
                // EOF before any last-chunk frame.
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "age file is truncated",
                ));
            }
        } else {
            // A short frame is always the last one. A full-sized frame is
            // usually interior, except when the plaintext length is an exact
            // multiple of the chunk size; that case is caught by retrying
            // the decryption with the last-chunk flag set.
            let last = chunk.len() < ENCRYPTED_CHUNK_SIZE;

            self.chunk = match (self.stream.decrypt_chunk(chunk, last), last) {
                (Ok(chunk), _) => Some(chunk),
                (Err(_), false) => Some(self.stream.decrypt_chunk(chunk, true)?),
                (Err(e), true) => return Err(e),
            };
            self.chunk_pos = 0;
        }

        self.encrypted_pos = 0;

        Ok(())
    }

    fn read_from_chunk(&mut self, buf: &mut [u8]) -> usize {
        let chunk = match &self.chunk {
            Some(chunk) => chunk,
            None => return 0,
        };

        let to_read = (chunk.expose_secret().len() - self.chunk_pos).min(buf.len());
        buf[..to_read]
            .copy_from_slice(&chunk.expose_secret()[self.chunk_pos..self.chunk_pos + to_read]);
        self.chunk_pos += to_read;

        if self.chunk_pos == chunk.expose_secret().len() {
            self.chunk = None;
        }

        to_read
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.chunk.is_none() {
            self.fill_encrypted_chunk()?;
            self.decrypt_chunk()?;
        }

        Ok(self.read_from_chunk(buf))
    }
}
