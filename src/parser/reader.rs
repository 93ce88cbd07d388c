use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("no more bytes to read")]
    EndOfStream,
}

/// A forward-only source of bytes.
///
/// Reads and skips that run past the end fail with
/// [`StreamError::EndOfStream`] and leave the position untouched.
pub trait Stream {
    /// Read a single byte, advancing the stream.
    fn read_byte(&mut self) -> Result<u8, StreamError>;

    /// Read a single byte without advancing the stream.
    fn peek_byte(&self) -> Result<u8, StreamError>;

    /// Read exactly `len` bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, StreamError>;

    /// Advance past `len` bytes without copying them.
    fn skip(&mut self, len: usize) -> Result<(), StreamError>;

    fn has_remaining(&self) -> bool;

    /// The number of bytes consumed so far.
    fn bytes_consumed(&self) -> usize;

    // Read and interpret types ------------------------------------------------

    fn read_u32_le(&mut self) -> Result<u32, StreamError> {
        let bytes = self.read_bytes(4)?;
        Ok(LittleEndian::read_u32(&bytes))
    }

    fn read_f32(&mut self) -> Result<f32, StreamError> {
        let bytes = self.read_bytes(4)?;
        Ok(LittleEndian::read_f32(&bytes))
    }

    fn read_f64(&mut self) -> Result<f64, StreamError> {
        let bytes = self.read_bytes(8)?;
        Ok(LittleEndian::read_f64(&bytes))
    }
}

/// A [`Stream`] over an owned, contiguous buffer.
pub struct ByteStream {
    bytes: Vec<u8>,
    pos: usize,
}

impl ByteStream {
    pub fn new(bytes: Vec<u8>) -> ByteStream {
        ByteStream { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

impl Stream for ByteStream {
    // Basic operations --------------------------------------------------------

    fn read_byte(&mut self) -> Result<u8, StreamError> {
        let byte = self.peek_byte()?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek_byte(&self) -> Result<u8, StreamError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(StreamError::EndOfStream)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        if self.remaining() < len {
            return Err(StreamError::EndOfStream);
        }
        let bytes = self.bytes[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<(), StreamError> {
        if self.remaining() < len {
            return Err(StreamError::EndOfStream);
        }
        self.pos += len;
        Ok(())
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.bytes.len()
    }

    fn bytes_consumed(&self) -> usize {
        self.pos
    }
}

#[test]
fn test_read_byte() {
    let mut stream = ByteStream::new(vec![0x00, 0x61, 0x73, 0x6d]);

    assert_eq!(stream.read_byte(), Ok(0x00));
    assert_eq!(stream.read_byte(), Ok(0x61));
    assert_eq!(stream.read_byte(), Ok(0x73));
    assert_eq!(stream.read_byte(), Ok(0x6d));
    assert_eq!(stream.read_byte(), Err(StreamError::EndOfStream));
    assert_eq!(stream.bytes_consumed(), 4);
}

#[test]
fn test_peek_does_not_advance() {
    let mut stream = ByteStream::new(vec![0x2a, 0x2b]);

    assert_eq!(stream.peek_byte(), Ok(0x2a));
    assert_eq!(stream.peek_byte(), Ok(0x2a));
    assert_eq!(stream.bytes_consumed(), 0);
    assert_eq!(stream.read_byte(), Ok(0x2a));
    assert_eq!(stream.peek_byte(), Ok(0x2b));

    stream.skip(1).expect("Failed to skip");
    assert_eq!(stream.peek_byte(), Err(StreamError::EndOfStream));
}

#[test]
fn test_read_bytes() {
    let mut stream = ByteStream::new(vec![1, 2, 3, 4, 5]);

    assert_eq!(stream.read_bytes(0), Ok(vec![]));
    assert_eq!(stream.read_bytes(3), Ok(vec![1, 2, 3]));
    // a short read fails without consuming anything
    assert_eq!(stream.read_bytes(3), Err(StreamError::EndOfStream));
    assert_eq!(stream.bytes_consumed(), 3);
    assert_eq!(stream.read_bytes(2), Ok(vec![4, 5]));
    assert!(!stream.has_remaining());
}

#[test]
fn test_skip() {
    let mut stream = ByteStream::new(vec![1, 2, 3]);

    assert!(stream.has_remaining());
    assert_eq!(stream.skip(2), Ok(()));
    assert_eq!(stream.skip(2), Err(StreamError::EndOfStream));
    assert_eq!(stream.bytes_consumed(), 2);
    assert_eq!(stream.skip(1), Ok(()));
    assert!(!stream.has_remaining());
    assert_eq!(stream.skip(0), Ok(()));
}

#[test]
fn test_read_u32_le() {
    let read = |v: Vec<u8>| -> u32 {
        let mut stream = ByteStream::new(v);
        stream.read_u32_le().expect("Failed to read u32")
    };

    assert_eq!(read(vec![0x00, 0x00, 0x00, 0x00]), 0);
    assert_eq!(read(vec![0x01, 0x00, 0x00, 0x00]), 1);
    assert_eq!(read(vec![0x00, 0x01, 0x00, 0x00]), 256);
    assert_eq!(read(vec![0x00, 0x61, 0x73, 0x6d]), 0x6d736100);
    assert_eq!(read(vec![0xff, 0xff, 0xff, 0xff]), 4294967295);

    let mut short = ByteStream::new(vec![0x01, 0x00]);
    assert_eq!(short.read_u32_le(), Err(StreamError::EndOfStream));
}

#[test]
fn test_read_f32() {
    let read = |v: Vec<u8>| {
        let mut stream = ByteStream::new(v);
        stream.read_f32().expect("Failed to read f32")
    };

    assert!(read(vec![0, 0, 192, 127]).is_nan());
    assert_eq!(read(vec![0, 0, 0, 0]), 0.0);
    assert_eq!(read(vec![219, 15, 201, 64]), 6.28318548202514648);
    assert_eq!(read(vec![255, 255, 127, 127]), 3.4028234e+38);
    assert_eq!(read(vec![249, 2, 21, 80]), 1.0e10);
}

#[test]
fn test_read_f64() {
    let read = |v: Vec<u8>| {
        let mut stream = ByteStream::new(v);
        stream.read_f64().expect("Failed to read f64")
    };

    assert!(read(vec![0, 0, 0, 0, 0, 0, 248, 127]).is_nan());
    assert_eq!(read(vec![0, 0, 0, 0, 0, 0, 0, 0]), 0.0);
    assert_eq!(
        read(vec![24, 45, 68, 84, 251, 33, 25, 64]),
        6.28318530717958623
    );
    assert_eq!(read(vec![125, 195, 148, 37, 173, 73, 178, 84]), 1.0e100);
}
