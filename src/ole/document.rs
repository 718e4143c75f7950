//! Document content access: a read cursor over a chain and a sink for
//! push-style writers.

use std::fmt;
use std::io::{self, Read, Write};

/// Forward-only reader over a document's blocks.
///
/// The cursor borrows the filesystem, so the tree cannot change while it is
/// alive. Reading past the declared size returns `Ok(0)`.
pub struct DocumentInputStream<'a> {
    /// Document bytes, one slice per block in chain order
    segments: Vec<&'a [u8]>,
    segment: usize,
    offset: usize,
    size: u64,
    position: u64,
}

impl<'a> DocumentInputStream<'a> {
    /// Build a cursor over `segments`, trimmed to `size` bytes in total.
    pub(crate) fn new(mut segments: Vec<&'a [u8]>, size: u64) -> Self {
        let mut remaining = size as usize;
        for segment in segments.iter_mut() {
            let bytes: &'a [u8] = *segment;
            let take = remaining.min(bytes.len());
            *segment = &bytes[..take];
            remaining -= take;
        }
        segments.retain(|segment| !segment.is_empty());
        Self {
            segments,
            segment: 0,
            offset: 0,
            size,
            position: 0,
        }
    }

    /// Declared size of the document.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes read so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left before the end of the document.
    pub fn remaining(&self) -> u64 {
        self.size - self.position
    }
}

impl Read for DocumentInputStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let Some(segment) = self.segments.get(self.segment) else {
                break;
            };
            let available = &segment[self.offset..];
            let n = available.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.offset += n;
            if self.offset == segment.len() {
                self.segment += 1;
                self.offset = 0;
            }
        }
        self.position += written as u64;
        Ok(written)
    }
}

impl fmt::Debug for DocumentInputStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentInputStream")
            .field("size", &self.size)
            .field("position", &self.position)
            .finish()
    }
}

/// Byte sink handed to push-style document writers.
#[derive(Debug, Default)]
pub struct DocumentSink {
    buffer: Vec<u8>,
}

impl DocumentSink {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for DocumentSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Callback producing a document's content once the filesystem is written.
pub type DocumentWriter = Box<dyn FnMut(&mut DocumentSink) -> io::Result<()>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_across_segments() {
        let a = [1u8, 2, 3, 4];
        let b = [5u8, 6, 7, 8];
        let mut stream = DocumentInputStream::new(vec![&a[..], &b[..]], 6);
        assert_eq!(stream.size(), 6);

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(stream.remaining(), 3);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![4, 5, 6]);
        assert_eq!(stream.position(), 6);
    }

    #[test]
    fn test_read_past_end() {
        let a = [9u8; 64];
        let mut stream = DocumentInputStream::new(vec![&a[..]], 10);
        let mut buf = [0u8; 32];
        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_empty_document() {
        let mut stream = DocumentInputStream::new(Vec::new(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.remaining(), 0);
    }

    #[test]
    fn test_sink() {
        let mut sink = DocumentSink::default();
        sink.write_all(b"abc").unwrap();
        write!(sink, "{}", 12).unwrap();
        assert_eq!(sink.written(), 5);
        assert_eq!(sink.into_inner(), b"abc12");
    }
}
