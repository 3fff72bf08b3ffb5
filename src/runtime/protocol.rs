//! Transfer protocol state machine.
//!
//! Every connection receives the file length as an 8-byte big-endian
//! integer followed by the file contents in blocks of at most
//! `block_size` bytes, with no framing between blocks. One call to
//! [`Transfer::advance`] performs at most one positioned read and one
//! socket write, so memory stays bounded by one block per connection and
//! a slow client only slows down its own reads from disk.

use bytes::{Buf, BufMut};
use std::io::{self, Write};
use std::ops::Range;

/// Default number of file bytes sent per readiness event.
pub const BLOCK_SIZE: usize = 1024;

/// Length of the size header preceding the file data.
pub const HEADER_LEN: usize = 8;

/// Encode the size header sent before the first data block.
pub fn encode_header(file_size: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    (&mut header[..]).put_u64(file_size);
    header
}

/// Decode a size header received from the server.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> u64 {
    (&header[..]).get_u64()
}

/// Positioned reads from the distributed file.
///
/// Reads never move a shared cursor, so one source can serve every
/// connection at its own offset.
pub trait BlockSource {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means end of data.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Total length announced to clients.
    fn size(&self) -> u64;
}

impl BlockSource for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

/// Progress of a single connection through the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No client bound to the slot.
    Idle,
    /// The size header has not been fully written yet.
    SendingSize,
    /// Header sent; streaming blocks from the current offset.
    SendingData,
    /// All bytes sent, or the connection failed or hung up.
    Finished,
}

/// Outcome of one successful protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The socket would block; nothing was written.
    Blocked,
    /// Some bytes were written but the current header or block is not done.
    Partial,
    /// The header or a whole block was written.
    Advanced,
    /// Every byte of the file has been delivered.
    Complete,
}

/// Failure of one protocol step.
#[derive(Debug)]
pub enum TransferError {
    /// Socket write or file read failed; only this connection is affected.
    Io(io::Error),
    /// The transfer was advanced while not active.
    InvalidState(TransferState),
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}

/// Per-connection protocol progress.
#[derive(Debug, Clone)]
pub struct Transfer {
    state: TransferState,
    /// Bytes of file data accepted by the socket.
    offset: u64,
    /// Bytes of the size header accepted by the socket.
    header_written: usize,
    /// Unsent part of the current block within the block buffer.
    pending: Range<usize>,
}

impl Default for Transfer {
    fn default() -> Self {
        Self::idle()
    }
}

impl Transfer {
    /// A transfer with no client bound.
    pub fn idle() -> Self {
        Self {
            state: TransferState::Idle,
            offset: 0,
            header_written: 0,
            pending: 0..0,
        }
    }

    /// A transfer for a freshly accepted client.
    pub fn start() -> Self {
        Self {
            state: TransferState::SendingSize,
            ..Self::idle()
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether every file byte has been written to the socket.
    pub fn is_delivered(&self, file_size: u64) -> bool {
        self.header_written == HEADER_LEN
            && self.offset == file_size
            && self.pending.is_empty()
    }

    /// Move to the terminal state.
    pub fn finish(&mut self) {
        self.state = TransferState::Finished;
        self.pending = 0..0;
    }

    /// Perform one protocol step against a writable socket.
    ///
    /// `block` is this connection's scratch buffer; its length is the block
    /// size. It must be the same buffer on every call, since an unsent
    /// remainder of a block is kept there between calls.
    pub fn advance<W, S>(
        &mut self,
        sink: &mut W,
        source: &S,
        file_size: u64,
        block: &mut [u8],
    ) -> Result<Progress, TransferError>
    where
        W: Write + ?Sized,
        S: BlockSource + ?Sized,
    {
        let result = match self.state {
            TransferState::SendingSize => self.send_size(sink, file_size),
            TransferState::SendingData => self.send_block(sink, source, file_size, block),
            state => return Err(TransferError::InvalidState(state)),
        };

        result.map_err(|e| {
            self.finish();
            TransferError::Io(e)
        })
    }

    fn send_size<W>(&mut self, sink: &mut W, file_size: u64) -> io::Result<Progress>
    where
        W: Write + ?Sized,
    {
        let header = encode_header(file_size);

        let n = match write_some(sink, &header[self.header_written..])? {
            Some(n) => n,
            None => return Ok(Progress::Blocked),
        };

        self.header_written += n;
        if self.header_written < HEADER_LEN {
            return Ok(Progress::Partial);
        }

        self.state = TransferState::SendingData;
        self.offset = 0;
        Ok(Progress::Advanced)
    }

    fn send_block<W, S>(
        &mut self,
        sink: &mut W,
        source: &S,
        file_size: u64,
        block: &mut [u8],
    ) -> io::Result<Progress>
    where
        W: Write + ?Sized,
        S: BlockSource + ?Sized,
    {
        if self.pending.is_empty() {
            if self.offset >= file_size {
                self.finish();
                return Ok(Progress::Complete);
            }

            let remaining = file_size - self.offset;
            let want = usize::try_from(remaining).map_or(block.len(), |r| r.min(block.len()));
            let n = source.read_at(&mut block[..want], self.offset)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source file shorter than announced size",
                ));
            }
            self.pending = 0..n;
        }

        let n = match write_some(sink, &block[self.pending.clone()])? {
            Some(n) => n,
            None => return Ok(Progress::Blocked),
        };

        self.pending.start += n;
        self.offset += n as u64;

        if self.pending.is_empty() {
            Ok(Progress::Advanced)
        } else {
            Ok(Progress::Partial)
        }
    }
}

/// Non-blocking write; `None` means the socket would block.
fn write_some<W: Write + ?Sized>(sink: &mut W, buf: &[u8]) -> io::Result<Option<usize>> {
    match sink.write(buf) {
        Ok(0) => Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
        Ok(n) => Ok(Some(n)),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Socket stand-in that records the size of every accepted write.
    struct RecordingSink {
        data: Vec<u8>,
        writes: Vec<usize>,
        /// Maximum bytes accepted per call.
        limit: usize,
        /// Calls that return `WouldBlock` before accepting anything.
        stalls: usize,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                data: Vec::new(),
                writes: Vec::new(),
                limit: usize::MAX,
                stalls: 0,
                fail: false,
            }
        }
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            if self.stalls > 0 {
                self.stalls -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            self.writes.push(n);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Drive a transfer until completion, returning observed data offsets.
    fn drain(transfer: &mut Transfer, sink: &mut RecordingSink, source: &[u8]) -> Vec<u64> {
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut offsets = Vec::new();
        loop {
            let progress = transfer
                .advance(sink, source, source.len() as u64, &mut block)
                .unwrap();
            if transfer.state() == TransferState::SendingData {
                offsets.push(transfer.offset());
            }
            if progress == Progress::Complete {
                return offsets;
            }
        }
    }

    fn received(sink: &RecordingSink) -> (u64, &[u8]) {
        let header: [u8; HEADER_LEN] = sink.data[..HEADER_LEN].try_into().unwrap();
        (decode_header(&header), &sink.data[HEADER_LEN..])
    }

    #[test]
    fn test_header_is_big_endian() {
        assert_eq!(encode_header(2500), [0, 0, 0, 0, 0, 0, 0x09, 0xC4]);
        assert_eq!(decode_header(&encode_header(u64::MAX - 7)), u64::MAX - 7);
    }

    #[test]
    fn test_round_trip_sizes() {
        for len in [0usize, 500, 1024, 5000] {
            let source = file(len);
            let mut transfer = Transfer::start();
            let mut sink = RecordingSink::new();
            drain(&mut transfer, &mut sink, &source);

            let (size, data) = received(&sink);
            assert_eq!(size, len as u64);
            assert_eq!(data, &source[..]);
            assert_eq!(transfer.state(), TransferState::Finished);
            assert!(transfer.is_delivered(len as u64));
        }
    }

    #[test]
    fn test_block_boundaries() {
        let source = file(2500);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        drain(&mut transfer, &mut sink, &source);

        assert_eq!(sink.writes, vec![HEADER_LEN, 1024, 1024, 452]);
    }

    #[test]
    fn test_completion_observed_on_next_step() {
        let source = file(1024);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        let mut block = vec![0u8; BLOCK_SIZE];

        let step = |t: &mut Transfer, s: &mut RecordingSink, b: &mut [u8]| {
            t.advance(s, &source[..], 1024, b).unwrap()
        };
        assert_eq!(step(&mut transfer, &mut sink, &mut block), Progress::Advanced);
        assert_eq!(transfer.state(), TransferState::SendingData);
        assert_eq!(step(&mut transfer, &mut sink, &mut block), Progress::Advanced);
        assert_eq!(transfer.offset(), 1024);
        assert_eq!(transfer.state(), TransferState::SendingData);
        assert_eq!(step(&mut transfer, &mut sink, &mut block), Progress::Complete);
        assert_eq!(transfer.state(), TransferState::Finished);
    }

    #[test]
    fn test_offsets_strictly_increase() {
        let source = file(5000);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        sink.limit = 300;
        let offsets = drain(&mut transfer, &mut sink, &source);

        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert!(offsets.iter().all(|&o| o <= 5000));
        assert_eq!(*offsets.last().unwrap(), 5000);
        assert_eq!(received(&sink).1, &source[..]);
    }

    #[test]
    fn test_would_block_keeps_state() {
        let source = file(10);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        sink.stalls = 1;
        let mut block = vec![0u8; BLOCK_SIZE];

        let progress = transfer.advance(&mut sink, &source[..], 10, &mut block).unwrap();
        assert_eq!(progress, Progress::Blocked);
        assert_eq!(transfer.state(), TransferState::SendingSize);
        assert!(sink.data.is_empty());

        drain(&mut transfer, &mut sink, &source);
        assert_eq!(received(&sink).1, &source[..]);
    }

    #[test]
    fn test_partial_header_resumes() {
        let source = file(100);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        sink.limit = 3;
        let mut block = vec![0u8; BLOCK_SIZE];

        let progress = transfer.advance(&mut sink, &source[..], 100, &mut block).unwrap();
        assert_eq!(progress, Progress::Partial);
        assert_eq!(transfer.state(), TransferState::SendingSize);

        drain(&mut transfer, &mut sink, &source);
        let (size, data) = received(&sink);
        assert_eq!(size, 100);
        assert_eq!(data, &source[..]);
    }

    #[test]
    fn test_write_failure_finishes() {
        let source = file(2000);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        let mut block = vec![0u8; BLOCK_SIZE];

        transfer.advance(&mut sink, &source[..], 2000, &mut block).unwrap();
        sink.fail = true;
        let err = transfer
            .advance(&mut sink, &source[..], 2000, &mut block)
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(transfer.state(), TransferState::Finished);
        assert!(!transfer.is_delivered(2000));
    }

    #[test]
    fn test_truncated_source_fails() {
        let source = file(100);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        let mut block = vec![0u8; BLOCK_SIZE];

        // Announce more bytes than the source holds.
        transfer.advance(&mut sink, &source[..], 200, &mut block).unwrap();
        transfer.advance(&mut sink, &source[..], 200, &mut block).unwrap();
        let err = transfer
            .advance(&mut sink, &source[..], 200, &mut block)
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert_eq!(transfer.state(), TransferState::Finished);
    }

    #[test]
    fn test_inactive_transfer_rejected() {
        let mut sink = RecordingSink::new();
        let mut block = vec![0u8; BLOCK_SIZE];
        let empty: &[u8] = &[];

        let mut idle = Transfer::idle();
        let err = idle.advance(&mut sink, empty, 0, &mut block).unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(TransferState::Idle)));

        let mut done = Transfer::start();
        done.finish();
        let err = done.advance(&mut sink, empty, 0, &mut block).unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(TransferState::Finished)));
        assert!(sink.writes.is_empty());
    }

    #[test]
    fn test_custom_block_size() {
        let source = file(1000);
        let mut transfer = Transfer::start();
        let mut sink = RecordingSink::new();
        let mut block = vec![0u8; 300];
        while transfer
            .advance(&mut sink, &source[..], 1000, &mut block)
            .unwrap()
            != Progress::Complete
        {}
        assert_eq!(sink.writes, vec![HEADER_LEN, 300, 300, 300, 100]);
    }
}
