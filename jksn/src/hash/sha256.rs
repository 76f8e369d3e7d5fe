use super::StreamHasher;
use sha2::{Digest, Sha256};

pub(crate) struct Sha256Hasher(Sha256);

impl Sha256Hasher {
    pub(crate) fn new() -> Self {
        Self(Sha256::new())
    }
}

impl StreamHasher for Sha256Hasher {
    fn update(&mut self, bytes: &[u8]) {
        Digest::update(&mut self.0, bytes);
    }
    fn digest(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}
