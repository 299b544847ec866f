//! Growable pull reader
//!
//! [`GrowableReader`] owns the read buffer of one byte source and accumulates
//! chunks until a caller-supplied predicate recognizes a complete unit. The
//! unit is returned and the buffer is reset; nothing carries over into the
//! next call.

use std::io::{self, Read};
use std::ops::Range;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;

/// Initial buffer size used by sessions
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// The buffer is multiplied by this factor whenever it fills up
pub const BUFFER_EXPAND_FACTOR: usize = 4;

/// Consecutive zero-length reads tolerated before the stream is considered closed
const MAX_EMPTY_READS: usize = 64;

/// A byte source that can report readiness.
pub trait Source: Read {
    /// Wait until a read would not block.
    ///
    /// Returns `Ok(false)` when `timeout` elapsed first; `None` waits forever.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool>;
}

/// What a predicate decided about the bytes accumulated so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// No complete unit yet; keep reading
    Pending,
    /// A complete unit was recognized
    Done {
        /// Bytes of the buffer the unit spans (anchors included)
        consumed: usize,
        /// The payload, as a range of the buffer slice
        payload: Range<usize>,
    },
}

/// Pull reader with a growable buffer
pub struct GrowableReader<R> {
    source: R,
    buf: Vec<u8>,
    wpos: usize,
    empty_reads: usize,
    clock: Box<dyn Clock>,
}

impl<R: Source> GrowableReader<R> {
    /// Create a reader with an initial buffer of `size` bytes
    pub fn new(size: usize, source: R) -> Self {
        Self {
            source,
            buf: vec![0; size.max(1)],
            wpos: 0,
            empty_reads: 0,
            clock: Box::new(SystemClock),
        }
    }

    /// Replace the clock used for deadlines
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Discard everything buffered
    pub fn reset(&mut self) {
        self.wpos = 0;
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes accumulated since the last reset
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..self.wpos]
    }

    pub fn source_mut(&mut self) -> &mut R {
        &mut self.source
    }

    /// The instant `timeout` from now, on this reader's clock
    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.clock.now() + timeout
    }

    /// Discard everything that arrives until the source stays silent for
    /// `quiet`. Returns the number of bytes dropped.
    pub fn drain(&mut self, quiet: Duration) -> Result<usize, Error> {
        let mut dropped = 0;
        while let Some(n) = self.fill(Some(quiet))? {
            dropped += n;
            self.reset();
        }
        self.reset();
        if dropped > 0 {
            trace!(dropped, "drained");
        }
        Ok(dropped)
    }

    /// Read until `f` recognizes a unit, blocking for as long as it takes.
    ///
    /// `f` receives every byte accumulated since the last reset and the
    /// number of bytes added by the latest read.
    pub fn read_until<F>(&mut self, mut f: F) -> Result<Vec<u8>, Error>
    where
        F: FnMut(&[u8], usize) -> Progress,
    {
        loop {
            let n = match self.fill(None)? {
                Some(n) => n,
                None => continue,
            };
            if let Some(payload) = self.check(&mut f, n) {
                return Ok(payload);
            }
        }
    }

    /// Like [`read_until`](Self::read_until), but gives up at `deadline`.
    ///
    /// Returns `Ok(None)` on timeout; the buffer keeps what was read.
    pub fn read_until_deadline<F>(&mut self, deadline: Instant, mut f: F) -> Result<Option<Vec<u8>>, Error>
    where
        F: FnMut(&[u8], usize) -> Progress,
    {
        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let n = match self.fill(Some(remaining))? {
                Some(n) => n,
                None => continue,
            };
            if let Some(payload) = self.check(&mut f, n) {
                return Ok(Some(payload));
            }
        }
    }

    /// Read until the source has been silent for `quiet`, returning all bytes.
    ///
    /// Silence only counts once at least one byte has arrived. Returns
    /// `Ok(None)` when `deadline` passes first.
    pub fn read_until_quiet(&mut self, quiet: Duration, deadline: Instant) -> Result<Option<Vec<u8>>, Error> {
        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let wait = quiet.min(remaining);
            match self.fill(Some(wait))? {
                Some(_) => continue,
                None if wait == quiet && self.wpos > 0 => {
                    let out = self.buf[..self.wpos].to_vec();
                    self.reset();
                    return Ok(Some(out));
                }
                None => continue,
            }
        }
    }

    fn check<F>(&mut self, f: &mut F, n: usize) -> Option<Vec<u8>>
    where
        F: FnMut(&[u8], usize) -> Progress,
    {
        match f(&self.buf[..self.wpos], n) {
            Progress::Pending => None,
            Progress::Done { consumed, payload } => {
                let out = self.buf[payload].to_vec();
                trace!(consumed, buffered = self.wpos, "unit complete");
                self.reset();
                Some(out)
            }
        }
    }

    /// Perform one read into the buffer.
    ///
    /// Returns `Ok(None)` when nothing was read: `timeout` elapsed, or the
    /// read was interrupted or came back empty.
    fn fill(&mut self, timeout: Option<Duration>) -> Result<Option<usize>, Error> {
        if self.wpos == self.buf.len() {
            let grown = self.buf.len() * BUFFER_EXPAND_FACTOR;
            trace!(from = self.buf.len(), to = grown, "grow read buffer");
            self.buf.resize(grown, 0);
        }

        if timeout.is_some() && !self.source.wait_readable(timeout).map_err(Error::transport)? {
            return Ok(None);
        }

        loop {
            match self.source.read(&mut self.buf[self.wpos..]) {
                Ok(0) => {
                    self.empty_reads += 1;
                    if self.empty_reads >= MAX_EMPTY_READS {
                        return Err(Error::terminated("end of stream"));
                    }
                    std::thread::yield_now();
                    if timeout.is_some() {
                        return Ok(None);
                    }
                }
                Ok(n) => {
                    trace!(len = n, "read");
                    self.empty_reads = 0;
                    self.wpos += n;
                    return Ok(Some(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(Error::transport(e)),
            }
        }
    }
}
