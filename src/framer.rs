//! Newline framing for the record stream.
//!
//! Bytes arrive in chunks of arbitrary size. `LineFramer` accumulates them
//! and carves out records, each ending with (and including) a single `\n`.
//! Whatever follows the last delimiter stays buffered as the start of the
//! next record; when the connection ends it is dropped.

use bytes::{Bytes, BytesMut};
use std::io::{self, Read};

/// Record terminator.
pub const DELIMITER: u8 = b'\n';

/// Growable receive buffer that splits records at `DELIMITER`.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Bytes per receive; the buffer grows by this much before each read.
    chunk_size: usize,
    /// Prefix of `buffer` already known to contain no delimiter.
    scanned: usize,
}

impl LineFramer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size: chunk_size.max(1),
            scanned: 0,
        }
    }

    /// Append a chunk of received bytes.
    #[cfg(test)]
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Receive one chunk from `reader` into the buffer.
    ///
    /// Returns the number of bytes received; 0 means end of stream.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.chunk_size, 0);

        let result = loop {
            match reader.read(&mut self.buffer[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(n) => {
                self.buffer.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    /// Split off the next complete record, delimiter included.
    pub fn next_record(&mut self) -> Option<Bytes> {
        match self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == DELIMITER)
        {
            Some(offset) => {
                let end = self.scanned + offset + 1;
                self.scanned = 0;
                Some(self.buffer.split_to(end).freeze())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Bytes received but not yet part of a complete record.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Turn this framer into a lazy record stream over `reader`.
    pub fn records<R: Read>(self, reader: R) -> Records<R> {
        Records {
            framer: self,
            reader,
            finished: false,
        }
    }
}

/// Records framed from a reader, in arrival order.
///
/// Every record already buffered is yielded before more input is read.
/// The stream ends at end-of-input, or after yielding a receive error.
pub struct Records<R> {
    framer: LineFramer,
    reader: R,
    finished: bool,
}

impl<R> Records<R> {
    /// Unterminated bytes still buffered.
    pub fn pending(&self) -> usize {
        self.framer.pending()
    }
}

impl<R: Read> Iterator for Records<R> {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.framer.next_record() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            match self.framer.read_from(&mut self.reader) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out its data a few bytes at a time.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn test_single_record() {
        let mut framer = LineFramer::new(16);
        framer.push(b"hello\n");
        assert_eq!(framer.next_record().unwrap(), &b"hello\n"[..]);
        assert!(framer.next_record().is_none());
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut framer = LineFramer::new(16);
        framer.push(b"hel");
        assert!(framer.next_record().is_none());
        framer.push(b"lo wor");
        assert!(framer.next_record().is_none());
        framer.push(b"ld\nne");
        assert_eq!(framer.next_record().unwrap(), &b"hello world\n"[..]);
        assert!(framer.next_record().is_none());
        assert_eq!(framer.pending(), 2);
    }

    #[test]
    fn test_multiple_records_in_one_chunk() {
        let mut framer = LineFramer::new(16);
        framer.push(b"a\nb\nc");
        assert_eq!(framer.next_record().unwrap(), &b"a\n"[..]);
        assert_eq!(framer.next_record().unwrap(), &b"b\n"[..]);
        assert!(framer.next_record().is_none());
        framer.push(b"\n");
        assert_eq!(framer.next_record().unwrap(), &b"c\n"[..]);
    }

    #[test]
    fn test_empty_record() {
        let mut framer = LineFramer::new(4);
        framer.push(b"\n\n");
        assert_eq!(framer.next_record().unwrap(), &b"\n"[..]);
        assert_eq!(framer.next_record().unwrap(), &b"\n"[..]);
        assert!(framer.next_record().is_none());
    }

    #[test]
    fn test_read_from_grows_by_chunk() {
        let mut framer = LineFramer::new(4);
        let mut reader = Cursor::new(b"abcdefg\n".to_vec());

        assert_eq!(framer.read_from(&mut reader).unwrap(), 4);
        assert_eq!(framer.pending(), 4);
        assert!(framer.next_record().is_none());

        assert_eq!(framer.read_from(&mut reader).unwrap(), 4);
        assert_eq!(framer.next_record().unwrap(), &b"abcdefg\n"[..]);

        assert_eq!(framer.read_from(&mut reader).unwrap(), 0);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_records_iterator_small_chunks() {
        let reader = Trickle {
            data: b"first\nsecond\nthird\n".to_vec(),
            pos: 0,
            step: 3,
        };
        let records: Vec<Bytes> = LineFramer::new(3)
            .records(reader)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records, vec![
            Bytes::from_static(b"first\n"),
            Bytes::from_static(b"second\n"),
            Bytes::from_static(b"third\n"),
        ]);
    }

    #[test]
    fn test_unterminated_tail_is_not_emitted() {
        let mut records = LineFramer::new(8).records(Cursor::new(b"one\ntrailing".to_vec()));
        assert_eq!(records.next().unwrap().unwrap(), &b"one\n"[..]);
        assert!(records.next().is_none());
        assert_eq!(records.pending(), 8);
        assert!(records.next().is_none());
    }

    #[test]
    fn test_receive_error_ends_stream() {
        let mut records = LineFramer::new(8).records(Failing);
        let err = records.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(records.next().is_none());
    }
}
