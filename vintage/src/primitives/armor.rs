//! ASCII armoring, a transparent text encoding around the binary format.

use base64::{prelude::BASE64_STANDARD, Engine};
use std::cmp;
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::util::LINE_ENDING;

const ARMORED_COLUMNS_PER_LINE: usize = 64;
const ARMORED_BYTES_PER_LINE: usize = ARMORED_COLUMNS_PER_LINE / 4 * 3;
const ARMORED_BEGIN_MARKER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";
const ARMORED_END_MARKER: &str = "-----END AGE ENCRYPTED FILE-----";

/// Whether an age file is encoded as binary or text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// PEM-style armor: standard padded base64 between begin/end markers.
    AsciiArmor,
    /// The raw binary format.
    Binary,
}

/// Writer that optionally armors the age file written through it.
pub struct ArmoredWriter<W: Write> {
    inner: W,
    /// `None` when writing the binary format.
    pending: Option<Vec<u8>>,
}

impl<W: Write> ArmoredWriter<W> {
    /// Wraps a writer in the requested output format.
    pub fn wrap_output(mut inner: W, format: Format) -> io::Result<Self> {
        match format {
            Format::AsciiArmor => {
                inner.write_all(ARMORED_BEGIN_MARKER.as_bytes())?;
                inner.write_all(LINE_ENDING.as_bytes())?;
                Ok(ArmoredWriter {
                    inner,
                    pending: Some(Vec::with_capacity(ARMORED_BYTES_PER_LINE)),
                })
            }
            Format::Binary => Ok(ArmoredWriter {
                inner,
                pending: None,
            }),
        }
    }

    /// Flushes the final (padded) line and the end marker.
    ///
    /// You **must** call `finish` when you are done writing; without it the
    /// armor is truncated and will not decode.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(pending) = self.pending.take() {
            // The final line is strictly shorter than a full line only when
            // the data length requires it; an empty payload still gets its
            // end marker.
            if !pending.is_empty() {
                let encoded = BASE64_STANDARD.encode(&pending);
                self.inner.write_all(encoded.as_bytes())?;
                self.inner.write_all(LINE_ENDING.as_bytes())?;
            }
            self.inner.write_all(ARMORED_END_MARKER.as_bytes())?;
            self.inner.write_all(LINE_ENDING.as_bytes())?;
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for ArmoredWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pending = match self.pending.as_mut() {
            Some(pending) => pending,
            None => return self.inner.write(buf),
        };

        let to_buffer = cmp::min(ARMORED_BYTES_PER_LINE - pending.len(), buf.len());
        pending.extend_from_slice(&buf[..to_buffer]);

        if pending.len() == ARMORED_BYTES_PER_LINE {
            let encoded = BASE64_STANDARD.encode(&pending);
            debug_assert_eq!(encoded.len(), ARMORED_COLUMNS_PER_LINE);
            self.inner.write_all(encoded.as_bytes())?;
            self.inner.write_all(LINE_ENDING.as_bytes())?;
            pending.clear();
        }

        Ok(to_buffer)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum ArmorState {
    /// We have not yet looked at the input.
    Start,
    /// The input is armored; `true` once the end marker has been seen.
    Armored(bool),
    /// The input is binary; the bytes peeked during detection are served
    /// before the underlying reader.
    Binary(Vec<u8>),
}

/// Reader that detects and transparently strips ASCII armor.
///
/// Binary input is passed through untouched.
pub struct ArmoredReader<R: Read> {
    inner: BufReader<R>,
    state: ArmorState,
    /// Decoded bytes not yet handed to the caller.
    out_buf: Vec<u8>,
    out_pos: usize,
    /// Set once a short armor line has been seen; only the end marker may
    /// follow it.
    saw_short_line: bool,
}

fn invalid_armor() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "invalid armor")
}

impl<R: Read> ArmoredReader<R> {
    /// Wraps a reader that may or may not be armored.
    pub fn new(inner: R) -> Self {
        ArmoredReader {
            inner: BufReader::new(inner),
            state: ArmorState::Start,
            out_buf: vec![],
            out_pos: 0,
            saw_short_line: false,
        }
    }

    /// Peeks at the start of the input to decide whether it is armored.
    fn detect(&mut self) -> io::Result<()> {
        let mut peeked = vec![0; ARMORED_BEGIN_MARKER.len()];
        let mut filled = 0;
        while filled < peeked.len() {
            match self.inner.read(&mut peeked[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        peeked.truncate(filled);

        self.state = if peeked == ARMORED_BEGIN_MARKER.as_bytes() {
            // Consume the line ending after the begin marker.
            let mut rest = String::new();
            self.inner.read_line(&mut rest)?;
            if !matches!(rest.as_str(), "\n" | "\r\n") {
                return Err(invalid_armor());
            }
            ArmorState::Armored(false)
        } else {
            ArmorState::Binary(peeked)
        };

        Ok(())
    }

    /// Reads and decodes the next armor line into the output buffer.
    fn refill_from_armor(&mut self) -> io::Result<()> {
        let mut line = String::new();
        if self.inner.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "armored file is truncated",
            ));
        }
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

        if line == ARMORED_END_MARKER {
            self.state = ArmorState::Armored(true);
            return Ok(());
        }

        // Data lines are full-width except the last, which must still be a
        // whole number of base64 quads.
        if self.saw_short_line
            || line.len() > ARMORED_COLUMNS_PER_LINE
            || line.len() % 4 != 0
            || line.is_empty()
        {
            return Err(invalid_armor());
        }
        if line.len() < ARMORED_COLUMNS_PER_LINE {
            self.saw_short_line = true;
        }

        self.out_buf = BASE64_STANDARD
            .decode(line.as_bytes())
            .map_err(|_| invalid_armor())?;
        self.out_pos = 0;

        Ok(())
    }

    fn read_from_out_buf(&mut self, buf: &mut [u8]) -> usize {
        let to_read = cmp::min(self.out_buf.len() - self.out_pos, buf.len());
        buf[..to_read].copy_from_slice(&self.out_buf[self.out_pos..self.out_pos + to_read]);
        self.out_pos += to_read;
        to_read
    }
}

impl<R: Read> Read for ArmoredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let ArmorState::Start = self.state {
            self.detect()?;
        }

        if let ArmorState::Binary(peeked) = &mut self.state {
            if !peeked.is_empty() {
                let to_read = cmp::min(peeked.len(), buf.len());
                buf[..to_read].copy_from_slice(&peeked[..to_read]);
                peeked.drain(..to_read);
                return Ok(to_read);
            }
            return self.inner.read(buf);
        }

        loop {
            if self.out_pos < self.out_buf.len() {
                return Ok(self.read_from_out_buf(buf));
            }
            if let ArmorState::Armored(true) = self.state {
                return Ok(0);
            }
            self.refill_from_armor()?;
        }
    }
}
