//! Byte-level primitives shared by the encoder and decoder.
//!
//! JKSN is a forward-only stream format (no footer, no random access), so unlike
//! the block-store `Reader`/`Writer` traits this crate's teacher defines, there is
//! no need for a `Seek` bound here: everything is expressed over plain
//! `std::io::{Read, Write}`. Every primitive read goes through `read_exact`, which
//! gives us EOF-strict semantics for free: a short read always surfaces as
//! [`ErrorKind::PrematureEof`] rather than silently returning fewer bytes.

use std::io::{self, Read, Write};

use jksn_base::{Error, ErrorKind, Result};

fn map_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::from(ErrorKind::PrematureEof)
    } else {
        Error::from(e)
    }
}

pub(crate) fn read_exact_n<R: Read>(src: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    src.read_exact(&mut buf).map_err(map_eof)?;
    Ok(buf)
}

pub(crate) fn read_u8<R: Read>(src: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    src.read_exact(&mut buf).map_err(map_eof)?;
    Ok(buf[0])
}

pub(crate) fn read_be_u16<R: Read>(src: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    src.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_be_u32<R: Read>(src: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    src.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_be_u64<R: Read>(src: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    src.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u64::from_be_bytes(buf))
}

pub(crate) fn read_be_i32<R: Read>(src: &mut R) -> Result<i32> {
    Ok(read_be_u32(src)? as i32)
}

pub(crate) fn read_be_i16<R: Read>(src: &mut R) -> Result<i16> {
    Ok(read_be_u16(src)? as i16)
}

pub(crate) fn read_i8<R: Read>(src: &mut R) -> Result<i8> {
    Ok(read_u8(src)? as i8)
}

/// Reads a self-terminating 7-bits-per-byte varint: the MSB of a byte is a
/// continuation bit, set on every byte but the last; the payload bits are
/// big-endian (most-significant group first).
pub(crate) fn read_uvarint<R: Read>(src: &mut R) -> Result<u64> {
    let mut accum: u128 = 0;
    loop {
        let b = read_u8(src)?;
        accum = (accum << 7) | (b & 0x7f) as u128;
        if accum > u64::MAX as u128 {
            return Err(Error::from(ErrorKind::MalformedVarint));
        }
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(accum as u64)
}

/// Writes `v` using the same varint shape `read_uvarint` parses: build the byte
/// list least-significant-group-first without the continuation bit, then flip
/// the continuation bit on every byte but the original (now-last) one and
/// reverse so the stream reads most-significant-group first.
pub(crate) fn write_uvarint<W: Write>(dst: &mut W, mut v: u64) -> Result<()> {
    let mut bytes = vec![(v & 0x7f) as u8];
    v >>= 7;
    while v != 0 {
        bytes.push(((v & 0x7f) as u8) | 0x80);
        v >>= 7;
    }
    bytes.reverse();
    dst.write_all(&bytes).map_err(Error::from)?;
    Ok(())
}

pub(crate) fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    v >>= 7;
    while v != 0 {
        n += 1;
        v >>= 7;
    }
    n
}

/// Infallible variant of [`write_uvarint`] for building an in-memory length
/// field: writing into a `Vec<u8>` cannot fail, so there is no error to
/// propagate.
pub(crate) fn varint_bytes(v: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(varint_len(v));
    write_uvarint(&mut buf, v).expect("writing a varint into a Vec<u8> cannot fail");
    buf
}

/// A reader wrapper that feeds every byte it passes through into a [`crate::hash::StreamHasher`],
/// used to compute checksums over exactly the bytes consumed while decoding one value.
pub(crate) struct HashingReader<'a, R: Read> {
    inner: &'a mut R,
    hasher: Box<dyn crate::hash::StreamHasher>,
}

impl<'a, R: Read> HashingReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R, hasher: Box<dyn crate::hash::StreamHasher>) -> Self {
        Self { inner, hasher }
    }

    pub(crate) fn into_digest(self) -> Vec<u8> {
        self.hasher.digest()
    }
}

impl<'a, R: Read> Read for HashingReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// A reader wrapper supporting a small amount of pushback, used to probe the
/// optional 3-byte magic header without requiring the underlying source to
/// support `Seek`.
pub(crate) struct PushbackReader<R: Read> {
    inner: R,
    pending: std::collections::VecDeque<u8>,
}

impl<R: Read> PushbackReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            pending: std::collections::VecDeque::new(),
        }
    }

    pub(crate) fn unread(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.pending.push_front(b);
        }
    }

    /// Reads up to `n` bytes, tolerating a short read (used for header probing,
    /// where fewer than 3 bytes available just means "no header").
    pub(crate) fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if let Some(b) = self.pending.pop_front() {
                out.push(b);
                continue;
            }
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => out.push(byte[0]),
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(out)
    }
}

impl<R: Read> Read for PushbackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            match self.pending.pop_front() {
                Some(b) => {
                    buf[written] = b;
                    written += 1;
                }
                None => break,
            }
        }
        if written < buf.len() {
            written += self.inner.read(&mut buf[written..])?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_uvarint_roundtrip() {
        for v in [
            0u64,
            1,
            127,
            128,
            300,
            (1 << 14) - 1,
            1 << 14,
            (1 << 21) - 1,
            1 << 21,
            1 << 28,
            u32::MAX as u64,
            u64::MAX,
        ] {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, v).unwrap();
            assert_eq!(buf.len(), varint_len(v));
            let mut cur = io::Cursor::new(buf);
            assert_eq!(read_uvarint(&mut cur).unwrap(), v);
        }
    }

    #[test]
    fn test_pushback_unread() {
        let mut pb = PushbackReader::new(io::Cursor::new(vec![4u8, 5, 6]));
        let probe = pb.read_up_to(2).unwrap();
        assert_eq!(probe, vec![4, 5]);
        pb.unread(&probe);
        let mut all = Vec::new();
        pb.read_to_end(&mut all).unwrap();
        assert_eq!(all, vec![4, 5, 6]);
    }

    #[test]
    fn test_pushback_short_source() {
        let mut pb = PushbackReader::new(io::Cursor::new(vec![1u8]));
        let probe = pb.read_up_to(3).unwrap();
        assert_eq!(probe, vec![1]);
    }

    #[test]
    fn test_read_exact_n_reports_premature_eof() {
        let mut cur = io::Cursor::new(vec![1u8, 2]);
        let err = read_exact_n(&mut cur, 3);
        assert!(err.is_err());
    }
}
