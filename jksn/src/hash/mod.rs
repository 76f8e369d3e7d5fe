//! DJB-8 is the codec's own rolling hash, used both to pick a dedup-cache slot
//! and as one of the five checksum algorithms. The other four wrap RustCrypto
//! crates behind a small streaming trait so the prefix/suffix checksum wrappers
//! in `encode.rs`/`decode.rs` can select an algorithm at runtime by opcode.

mod crc32;
mod djb8;
mod md5;
mod sha1;
mod sha256;
mod sha512;

pub(crate) use djb8::djb8;

use crate::opcode::{ctrl, family};

/// A streaming digest, fed bytes incrementally and finalized once.
///
/// `digest` consumes a boxed trait object (`self: Box<Self>`) rather than `self`
/// by value so the trait stays object-safe; every algorithm here is selected
/// dynamically from an opcode, so `Box<dyn StreamHasher>` is the natural shape.
pub(crate) trait StreamHasher: Send {
    fn update(&mut self, bytes: &[u8]);
    fn digest(self: Box<Self>) -> Vec<u8>;
}

/// Which of the five checksum algorithms (plus the codec's own DJB-8) wraps a
/// value via the integrity family's prefix/suffix opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumKind {
    Djb8,
    Crc32,
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumKind {
    const ALL: [ChecksumKind; 6] = [
        ChecksumKind::Djb8,
        ChecksumKind::Crc32,
        ChecksumKind::Md5,
        ChecksumKind::Sha1,
        ChecksumKind::Sha256,
        ChecksumKind::Sha512,
    ];

    pub(crate) fn index(self) -> u8 {
        ChecksumKind::ALL.iter().position(|k| *k == self).unwrap() as u8
    }

    pub(crate) fn from_index(i: u8) -> Option<ChecksumKind> {
        ChecksumKind::ALL.get(i as usize).copied()
    }

    pub(crate) fn digest_len(self) -> usize {
        match self {
            ChecksumKind::Djb8 => 1,
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Md5 => 16,
            ChecksumKind::Sha1 => 20,
            ChecksumKind::Sha256 => 32,
            ChecksumKind::Sha512 => 64,
        }
    }

    pub(crate) fn prefix_control(self) -> u8 {
        ctrl(family::INTEGRITY, self.index())
    }

    pub(crate) fn suffix_control(self) -> u8 {
        ctrl(family::INTEGRITY, self.index() + 8)
    }

    pub(crate) fn new_hasher(self) -> Box<dyn StreamHasher> {
        match self {
            ChecksumKind::Djb8 => Box::new(djb8::Djb8Hasher::new()),
            ChecksumKind::Crc32 => Box::new(crc32::Crc32Hasher::new()),
            ChecksumKind::Md5 => Box::new(md5::Md5Hasher::new()),
            ChecksumKind::Sha1 => Box::new(sha1::Sha1Hasher::new()),
            ChecksumKind::Sha256 => Box::new(sha256::Sha256Hasher::new()),
            ChecksumKind::Sha512 => Box::new(sha512::Sha512Hasher::new()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_checksum_kind_roundtrip_index() {
        for kind in ChecksumKind::ALL {
            assert_eq!(ChecksumKind::from_index(kind.index()), Some(kind));
        }
    }

    #[test]
    fn test_prefix_suffix_controls_distinct() {
        for kind in ChecksumKind::ALL {
            assert_ne!(kind.prefix_control(), kind.suffix_control());
        }
    }
}
