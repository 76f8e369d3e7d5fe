use super::StreamHasher;
use md5::{Digest, Md5};

pub(crate) struct Md5Hasher(Md5);

impl Md5Hasher {
    pub(crate) fn new() -> Self {
        Self(Md5::new())
    }
}

impl StreamHasher for Md5Hasher {
    fn update(&mut self, bytes: &[u8]) {
        Digest::update(&mut self.0, bytes);
    }
    fn digest(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}
