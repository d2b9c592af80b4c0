//! Sliding window buffer over a forward-only or seekable byte source.
//!
//! The window owns a backing array `data` that mirrors the stream range
//! `[base_offset, base_offset + end)`. Reads at arbitrary offsets are served
//! from the array when possible; otherwise the window is compacted, grown,
//! slid forward, or (on seekable sources) repositioned, and then refilled.
//!
//! # Design
//!
//! - **Lazy discard**: `discard_through` only moves a counter. Dropped bytes
//!   are physically removed the next time the window has to move anyway.
//! - **Doubling growth**: the array grows to the smallest doubling of its
//!   current length that fits the request, capped at `max_size`. It never
//!   shrinks. Forward jumps past the array slide the window instead of
//!   growing it over the gap.
//! - **Forward-only sources**: the source is only ever read forward from
//!   where it stands. Forward jumps read and drop the gap; backward jumps
//!   outside the window fail with `BufferError::BeforeWindow`.
//!
//! # Invariants
//!
//! `discard <= end <= data.len() <= max_size` whenever control returns to a
//! caller.
//!
//! # Thread Safety
//!
//! Not reentrant. One caller per window; share through
//! [`SharedStream`](crate::stream::SharedStream) when packets need access.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::{debug, trace};

use crate::config::WindowConfig;
use crate::error::{BufferError, Error, Result};
use crate::metrics::WindowMetrics;

/// Scratch size used when reading through a gap on a forward-only source.
const SKIP_CHUNK: usize = 4096;

/// A readable byte source, optionally seekable.
pub trait ByteSource {
    /// Read into `buf`, returning the count (0 at end of stream).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether `seek_to` may be called.
    fn can_seek(&self) -> bool;

    /// Move the source cursor to an absolute offset.
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;

    /// Total length, if the source can report it.
    fn len(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

/// Adapter for sources that implement `Read + Seek`.
#[derive(Debug)]
pub struct Seekable<R>(pub R);

impl<R: Read + Seek> ByteSource for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn len(&mut self) -> io::Result<Option<u64>> {
        let current = self.0.stream_position()?;
        let len = self.0.seek(SeekFrom::End(0))?;
        self.0.seek(SeekFrom::Start(current))?;
        Ok(Some(len))
    }
}

/// Adapter for sources that can only be read forward.
#[derive(Debug)]
pub struct ForwardOnly<R>(pub R);

impl<R: Read> ByteSource for ForwardOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn seek_to(&mut self, _offset: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source does not support seeking",
        ))
    }
}

/// Capped, growable window of buffered bytes over a [`ByteSource`].
#[derive(Debug)]
pub struct SlidingWindow<S> {
    /// Underlying source (None once closed)
    source: Option<S>,

    /// Backing array; its length is the current window capacity
    data: Vec<u8>,

    /// Stream offset of `data[0]`
    base_offset: u64,

    /// Valid bytes in `data`
    end: usize,

    /// Bytes at the front of `data` already discarded
    discard: usize,

    /// Upper bound for `data.len()`
    max_size: usize,

    /// Refill exactly what the caller needs
    minimal_read: bool,

    /// Where the source cursor currently sits
    source_position: u64,

    /// Stream length, once a read has hit the end
    eof_offset: Option<u64>,

    /// Lowest offset that may still be read
    low_water: u64,

    metrics: WindowMetrics,
}

impl<S: ByteSource> SlidingWindow<S> {
    /// Create a window over `source`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(source: S, config: &WindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source: Some(source),
            data: vec![0; config.initial_size],
            base_offset: 0,
            end: 0,
            discard: 0,
            max_size: config.max_size,
            minimal_read: config.minimal_read,
            source_position: 0,
            eof_offset: None,
            low_water: 0,
            metrics: WindowMetrics::default(),
        })
    }

    /// Stream offset of the first readable byte in the window.
    pub fn base_offset(&self) -> u64 {
        self.base_offset + self.discard as u64
    }

    /// Readable bytes currently held.
    pub fn bytes_filled(&self) -> usize {
        self.end - self.discard
    }

    /// Current backing array length.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Change the growth cap.
    ///
    /// # Errors
    /// Returns `Error::Config` if `max_size` is below the current capacity.
    pub fn set_max_size(&mut self, max_size: usize) -> Result<()> {
        if max_size < self.data.len() {
            return Err(Error::Config(format!(
                "maximum window size {} is below current capacity {}",
                max_size,
                self.data.len()
            )));
        }
        self.max_size = max_size;
        Ok(())
    }

    pub fn minimal_read(&self) -> bool {
        self.minimal_read
    }

    pub fn set_minimal_read(&mut self, minimal_read: bool) {
        self.minimal_read = minimal_read;
    }

    /// Stream length, if a read has already reached the end.
    pub fn eof_offset(&self) -> Option<u64> {
        self.eof_offset
    }

    /// Lowest offset still readable.
    pub fn low_water(&self) -> u64 {
        self.low_water
    }

    pub fn metrics(&self) -> WindowMetrics {
        self.metrics
    }

    /// Whether the underlying source supports seeking.
    pub fn can_seek(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.can_seek())
    }

    /// Total stream length, from the source if it knows, else from a seen EOF.
    pub fn stream_len(&mut self) -> Result<Option<u64>> {
        if let Some(eof) = self.eof_offset {
            return Ok(Some(eof));
        }
        match self.source.as_mut() {
            Some(source) => Ok(source.len()?),
            None => Err(BufferError::Closed.into()),
        }
    }

    /// Drop the underlying source. Reads that need it will fail afterwards.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!(base_offset = self.base_offset(), "window source closed");
        }
    }

    /// Take the underlying source out of the window.
    pub fn into_source(self) -> Option<S> {
        self.source
    }

    /// Copy bytes starting at stream `offset` into `buf`.
    ///
    /// Returns fewer bytes than requested only at end of stream.
    ///
    /// # Errors
    /// - `BufferError::Discarded` if `offset` is below the low-water mark
    /// - `BufferError::CapacityExceeded` if `buf` is larger than `max_size`
    /// - `BufferError::BeforeWindow` for backward reads on forward-only sources
    /// - `BufferError::Closed` / `Error::Io` if the source is needed and fails
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if offset < self.low_water {
            return Err(BufferError::Discarded {
                offset,
                low_water: self.low_water,
            }
            .into());
        }

        let mut count = buf.len();
        if let Some(eof) = self.eof_offset {
            if offset >= eof {
                return Ok(0);
            }
            count = count.min((eof - offset) as usize);
        }

        let (start, available) = self.ensure_available(offset, count)?;
        buf[..available].copy_from_slice(&self.data[start..start + available]);
        Ok(available)
    }

    /// Read the single byte at `offset`, or `None` at end of stream.
    pub fn read_byte_at(&mut self, offset: u64) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = self.read_at(offset, &mut byte)?;
        Ok((n == 1).then_some(byte[0]))
    }

    /// Permanently drop everything before `offset`.
    ///
    /// Only the counters move; the bytes leave the array on the next move.
    pub fn discard_through(&mut self, offset: u64) {
        if offset <= self.low_water {
            return;
        }
        self.low_water = offset;

        let window_end = self.base_offset + self.end as u64;
        if offset >= window_end {
            self.base_offset = offset;
            self.end = 0;
            self.discard = 0;
        } else if offset > self.base_offset() {
            self.discard = (offset - self.base_offset) as usize;
        }
        trace!(low_water = offset, filled = self.bytes_filled(), "discarded");
    }

    /// Make `[offset, offset + count)` resident, returning its array index
    /// and how many of the bytes exist.
    fn ensure_available(&mut self, offset: u64, count: usize) -> Result<(usize, usize)> {
        let window_start = self.base_offset();
        let window_end = self.base_offset + self.end as u64;

        if offset >= window_start && offset + count as u64 <= window_end {
            return Ok(((offset - self.base_offset) as usize, count));
        }

        if count > self.max_size {
            return Err(BufferError::CapacityExceeded {
                requested: count,
                max: self.max_size,
            }
            .into());
        }

        if offset < window_start {
            if !self.can_seek() {
                return Err(BufferError::BeforeWindow {
                    offset,
                    window_start,
                }
                .into());
            }
            self.reposition(offset);
        } else {
            let need_end = (offset + count as u64 - self.base_offset) as usize;
            if need_end > self.data.len() {
                let span = offset + count as u64 - window_start;
                if span <= self.data.len() as u64 {
                    self.compact();
                } else {
                    self.slide_to(offset);
                }
            }
        }
        // Only the request itself can make the array grow
        self.grow_to(count);

        let start = (offset - self.base_offset) as usize;
        self.fill(start + count)?;
        Ok((start, count.min(self.end.saturating_sub(start))))
    }

    /// Move the readable bytes to the front of the array.
    fn compact(&mut self) {
        if self.discard == 0 {
            return;
        }
        self.data.copy_within(self.discard..self.end, 0);
        self.base_offset += self.discard as u64;
        self.end -= self.discard;
        self.discard = 0;
        self.metrics.compactions += 1;
    }

    /// Restart the window at `offset`, keeping whatever already overlaps.
    fn slide_to(&mut self, offset: u64) {
        let window_end = self.base_offset + self.end as u64;
        if offset < window_end {
            let distance = (offset - self.base_offset) as usize;
            self.data.copy_within(distance..self.end, 0);
            self.end -= distance;
        } else {
            self.end = 0;
        }
        self.base_offset = offset;
        self.discard = 0;
        self.metrics.slides += 1;
        trace!(base_offset = offset, kept = self.end, "window slid");
    }

    /// Empty the window and restart it behind its old start.
    fn reposition(&mut self, offset: u64) {
        self.base_offset = offset;
        self.end = 0;
        self.discard = 0;
        self.metrics.repositions += 1;
        trace!(base_offset = offset, "window repositioned");
    }

    /// Grow the array to the smallest doubling that holds `required` bytes.
    ///
    /// Callers guarantee `required <= max_size`.
    fn grow_to(&mut self, required: usize) {
        let current = self.data.len();
        if required <= current {
            return;
        }

        let mut new_len = current;
        while new_len < required {
            new_len = new_len.saturating_mul(2);
        }
        let new_len = new_len.min(self.max_size);

        self.data.resize(new_len, 0);
        self.metrics.grows += 1;
        debug!(from = current, to = new_len, "window grown");
    }

    /// Read from the source until `data[..need_end]` is valid or the stream ends.
    fn fill(&mut self, need_end: usize) -> Result<()> {
        if self.end >= need_end {
            return Ok(());
        }

        let target = self.base_offset + self.end as u64;
        if !self.position_source(target)? {
            return Ok(());
        }

        let source = self.source.as_mut().ok_or(BufferError::Closed)?;
        while self.end < need_end {
            let limit = if self.minimal_read {
                need_end
            } else {
                self.data.len()
            };

            let n = match source.read(&mut self.data[self.end..limit]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.metrics.source_reads += 1;

            if n == 0 {
                let eof = self.base_offset + self.end as u64;
                trace!(eof, "source reached end of stream");
                self.eof_offset = Some(eof);
                break;
            }

            self.end += n;
            self.source_position += n as u64;
            self.metrics.bytes_from_source += n as u64;
        }
        Ok(())
    }

    /// Bring the source cursor to `target`.
    ///
    /// Returns false if the stream ended before `target` was reached.
    fn position_source(&mut self, target: u64) -> Result<bool> {
        if self.source_position == target {
            return Ok(true);
        }

        let can_seek = self.can_seek();
        let source = self.source.as_mut().ok_or(BufferError::Closed)?;

        if can_seek {
            source.seek_to(target)?;
            self.source_position = target;
            return Ok(true);
        }

        if target < self.source_position {
            return Err(BufferError::BeforeWindow {
                offset: target,
                window_start: self.source_position,
            }
            .into());
        }

        let mut scratch = [0u8; SKIP_CHUNK];
        while self.source_position < target {
            let want = ((target - self.source_position) as usize).min(SKIP_CHUNK);
            let n = match source.read(&mut scratch[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                trace!(eof = self.source_position, "source ended while skipping");
                self.eof_offset = Some(self.source_position);
                return Ok(false);
            }
            self.source_position += n as u64;
            self.metrics.bytes_skipped += n as u64;
        }
        Ok(true)
    }
}
