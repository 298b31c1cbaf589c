//! Stream decompression with format autodetection.
//!
//! Layer blobs may be gzip-compressed, zstd-compressed, or plain tar; the
//! media type suffix is not always trustworthy, so the format is detected
//! from magic bytes and the original stream is replayed through the chosen
//! decoder.

use std::io::{self, Read};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Wrap `reader` in a decompressor chosen by sniffing its first bytes.
///
/// Recognizes gzip (multi-member) and zstd; anything else passes through
/// unchanged. Streams shorter than the longest magic are passed through.
pub fn decompress<'a, R: Read + 'a>(reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let mut reader = reader;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = reader.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let replayed = io::Cursor::new(magic[..filled].to_vec()).chain(reader);

    if filled >= 2 && magic[..2] == GZIP_MAGIC {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(replayed)))
    } else if filled >= 4 && magic == ZSTD_MAGIC {
        Ok(Box::new(zstd::stream::read::Decoder::new(replayed)?))
    } else {
        Ok(Box::new(replayed))
    }
}

/// A reader that fails with an error once more than `limit` bytes are read.
///
/// Unlike a plain `take`, exceeding the bound is reported as an error rather
/// than a silent EOF, so an over-long stream is distinguishable from a
/// well-formed one.
pub struct LimitReader<R> {
    inner: R,
    remaining: u64,
    what: &'static str,
    limit: u64,
}

impl<R: Read> LimitReader<R> {
    /// Bound `inner` to `limit` bytes; `what` names the stream in the error.
    pub fn new(inner: R, limit: u64, what: &'static str) -> Self {
        Self {
            inner,
            remaining: limit,
            what,
            limit,
        }
    }
}

impl<R: Read> Read for LimitReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            // Probe: any further byte means the stream is over the bound.
            let mut probe = [0u8; 1];
            let n = self.inner.read(&mut probe)?;
            if n > 0 {
                return Err(io::Error::other(format!(
                    "too large {} (> {} bytes)",
                    self.what, self.limit
                )));
            }
            return Ok(0);
        }
        let cap = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
