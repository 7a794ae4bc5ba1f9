///! CRC-64 over record stream bodies
///!
///! Headers are excluded: they are rewritten when a stream is finished, while the body
///! digest is accumulated once as records are appended.

use crc::{Crc, CRC_64_GO_ISO};
use std::io::{self, Write};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Running checksum of a stream body
pub struct Digest {
    inner: crc::Digest<'static, u64>,
    bytes: u64,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            inner: CRC64.digest(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Body bytes digested so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> u64 {
        self.inner.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer adapter that digests every byte passed through it
pub struct DigestWriter<W: Write> {
    inner: W,
    digest: Digest,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: Digest::new(),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.digest.bytes()
    }

    /// The inner writer and the checksum of everything written through it
    pub fn finish(self) -> (W, u64) {
        (self.inner, self.digest.finalize())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_updates_match_one_shot() {
        let data = b"boundary rim";
        let mut split = Digest::new();
        split.update(&data[..5]);
        split.update(&data[5..]);
        assert_eq!(split.bytes(), data.len() as u64);
        assert_eq!(split.finalize(), CRC64.checksum(data));
    }

    #[test]
    fn test_digest_writer_passes_bytes_through() {
        let mut w = DigestWriter::new(Vec::new());
        w.write_all(b"tile ").unwrap();
        w.write_all(b"sweep").unwrap();
        assert_eq!(w.bytes_written(), 10);
        let (buf, crc) = w.finish();
        assert_eq!(buf, b"tile sweep");
        assert_eq!(crc, CRC64.checksum(b"tile sweep"));
        assert_ne!(crc, CRC64.checksum(b"tile swept"));
    }
}
