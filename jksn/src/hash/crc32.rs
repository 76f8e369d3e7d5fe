use super::StreamHasher;

pub(crate) struct Crc32Hasher(crc32fast::Hasher);

impl Crc32Hasher {
    pub(crate) fn new() -> Self {
        Self(crc32fast::Hasher::new())
    }
}

impl StreamHasher for Crc32Hasher {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
    fn digest(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_be_bytes().to_vec()
    }
}
