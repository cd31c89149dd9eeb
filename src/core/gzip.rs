//! Process-wide gzip compressor for request bodies.
//!
//! Output buffers are pooled; a buffer handed out by [`compress`] goes back
//! through [`collect_buffer`] once the last clone of it is dropped by the
//! caller. Encoders are created per call since `GzEncoder` cannot be reset
//! onto a new sink.
use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::{Compression, write::GzEncoder};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

const MAX_POOLED_BUFFERS: usize = 64;
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

static COMPRESSOR: Lazy<Compressor> = Lazy::new(Compressor::new);

struct Compressor {
    buffers: Mutex<Vec<BytesMut>>,
}

impl Compressor {
    fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> BytesMut {
        let mut buffer = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY));
        buffer.clear();
        buffer
    }

    fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < MAX_POOLED_BUFFERS {
            buffers.push(buffer);
        }
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let buffer = self.acquire();
        let mut encoder = GzEncoder::new(buffer.writer(), Compression::default());
        encoder.write_all(data)?;
        let buffer = encoder.finish()?.into_inner();
        Ok(buffer.freeze())
    }
}

/// Gzip `data` into a pooled buffer.
pub fn compress(data: &[u8]) -> io::Result<Bytes> {
    COMPRESSOR.compress(data)
}

/// Return a buffer from [`compress`] to the pool. Buffers still shared
/// elsewhere are left alone.
pub fn collect_buffer(buffer: Bytes) {
    if let Ok(buffer) = buffer.try_into_mut() {
        COMPRESSOR.release(buffer);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_compress_round_trips() {
        let compressed = compress(b"FOOBAR").unwrap();
        assert_eq!(&compressed[..3], &[0x1f, 0x8b, 0x08]);
        assert_eq!(decompress(&compressed), b"FOOBAR");
        collect_buffer(compressed);
    }

    #[test]
    fn test_buffers_are_reused_cleanly() {
        let big = vec![b'x'; 64 * 1024];
        let first = compress(&big).unwrap();
        collect_buffer(first);

        let second = compress(b"small").unwrap();
        assert_eq!(decompress(&second), b"small");
        collect_buffer(second);
    }

    #[test]
    fn test_shared_buffer_is_not_collected() {
        let compressed = compress(b"shared").unwrap();
        let clone = compressed.clone();
        collect_buffer(compressed);
        assert_eq!(decompress(&clone), b"shared");
    }
}
