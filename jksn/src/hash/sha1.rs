use super::StreamHasher;
use sha1::{Digest, Sha1};

pub(crate) struct Sha1Hasher(Sha1);

impl Sha1Hasher {
    pub(crate) fn new() -> Self {
        Self(Sha1::new())
    }
}

impl StreamHasher for Sha1Hasher {
    fn update(&mut self, bytes: &[u8]) {
        Digest::update(&mut self.0, bytes);
    }
    fn digest(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}
