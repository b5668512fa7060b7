//! Whole-file trailer checksums.
//!
//! Files such as the index end with the SHA-256 of every byte before the
//! trailer. [`ChecksumWriter`] computes it while bytes are streamed out and
//! [`verify_trailer`] checks a complete buffer.

use std::io::{self, Write};

use sha2::{Digest, Sha256};

/// Width of the trailer appended by [`ChecksumWriter::finish`].
pub const TRAILER_LEN: usize = 32;

/// A writer adapter that hashes everything passing through it.
pub struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written so far, excluding the trailer.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append the trailer and return the inner writer and the checksum.
    pub fn finish(mut self) -> io::Result<(W, [u8; TRAILER_LEN])> {
        let digest: [u8; TRAILER_LEN] = self.hasher.finalize().into();
        self.inner.write_all(&digest)?;
        self.inner.flush()?;
        Ok((self.inner, digest))
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Check the trailing checksum of a complete file image.
///
/// Returns the body (everything before the trailer) when the checksum
/// matches, `None` when the buffer is too short or the checksum differs.
pub fn verify_trailer(data: &[u8]) -> Option<&[u8]> {
    if data.len() < TRAILER_LEN {
        return None;
    }
    let (body, trailer) = data.split_at(data.len() - TRAILER_LEN);
    let digest: [u8; TRAILER_LEN] = Sha256::digest(body).into();
    (digest.as_slice() == trailer).then_some(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailer_roundtrip() {
        let mut w = ChecksumWriter::new(Vec::new());
        w.write_all(b"DIRC").unwrap();
        w.write_all(b"payload").unwrap();
        assert_eq!(w.written(), 11);
        let (buf, digest) = w.finish().unwrap();
        assert_eq!(buf.len(), 11 + TRAILER_LEN);
        assert_eq!(&buf[11..], &digest);
        assert_eq!(verify_trailer(&buf), Some(&b"DIRCpayload"[..]));
    }

    #[test]
    fn flipped_byte_fails_verification() {
        let mut w = ChecksumWriter::new(Vec::new());
        w.write_all(b"some index bytes").unwrap();
        let (mut buf, _) = w.finish().unwrap();
        buf[3] ^= 0x01;
        assert!(verify_trailer(&buf).is_none());
    }

    #[test]
    fn short_buffer_fails_verification() {
        assert!(verify_trailer(&[0u8; 8]).is_none());
    }
}
