use super::StreamHasher;
use sha2::{Digest, Sha512};

pub(crate) struct Sha512Hasher(Sha512);

impl Sha512Hasher {
    pub(crate) fn new() -> Self {
        Self(Sha512::new())
    }
}

impl StreamHasher for Sha512Hasher {
    fn update(&mut self, bytes: &[u8]) {
        Digest::update(&mut self.0, bytes);
    }
    fn digest(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}
