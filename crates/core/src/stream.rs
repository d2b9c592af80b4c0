//! Buffered read/seek façade over a [`SlidingWindow`].
//!
//! [`BufferedStream`] keeps a logical cursor and routes every read through
//! the window. Moving the cursor never touches the source; the next read
//! does. `discard` permanently raises the low-water mark so the window can
//! reuse that space.
//!
//! Packets read lazily through a [`SharedStream`] handle, using positional
//! reads that leave the cursor alone.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Rc;

use tracing::trace;

use crate::config::WindowConfig;
use crate::error::{BufferError, Result};
use crate::metrics::WindowMetrics;
use crate::packet::PacketData;
use crate::window::{ByteSource, SlidingWindow};

/// Single-threaded shared handle to a [`BufferedStream`].
pub type SharedStream<S> = Rc<RefCell<BufferedStream<S>>>;

/// Cursor-based access to a byte source through a sliding window.
#[derive(Debug)]
pub struct BufferedStream<S> {
    window: SlidingWindow<S>,
    position: u64,
}

impl<S: ByteSource> BufferedStream<S> {
    /// Wrap `source` in a window sized by `config`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(source: S, config: &WindowConfig) -> Result<Self> {
        Ok(Self {
            window: SlidingWindow::new(source, config)?,
            position: 0,
        })
    }

    /// Convert into a shared handle for packets to read through.
    pub fn into_shared(self) -> SharedStream<S> {
        Rc::new(RefCell::new(self))
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the cursor. No I/O happens until the next read.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Read at the cursor and advance it by the bytes returned.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.window.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Read one byte at the cursor, or `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.window.read_byte_at(self.position)?;
        if byte.is_some() {
            self.position += 1;
        }
        Ok(byte)
    }

    /// Read at an absolute offset without moving the cursor.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.window.read_at(offset, buf)
    }

    /// Permanently drop `count` bytes from the start of the window.
    ///
    /// The cursor is pulled forward if it would land in dropped data.
    pub fn discard(&mut self, count: u64) {
        let through = self.window.base_offset() + count;
        self.window.discard_through(through);
        if self.position < through {
            self.position = through;
        }
        trace!(through, position = self.position, "stream discard");
    }

    pub fn minimal_read(&self) -> bool {
        self.window.minimal_read()
    }

    pub fn set_minimal_read(&mut self, minimal_read: bool) {
        self.window.set_minimal_read(minimal_read);
    }

    pub fn max_size(&self) -> usize {
        self.window.max_size()
    }

    /// See [`SlidingWindow::set_max_size`].
    pub fn set_max_size(&mut self, max_size: usize) -> Result<()> {
        self.window.set_max_size(max_size)
    }

    pub fn can_seek(&self) -> bool {
        self.window.can_seek()
    }

    pub fn window(&self) -> &SlidingWindow<S> {
        &self.window
    }

    pub fn metrics(&self) -> WindowMetrics {
        self.window.metrics()
    }

    /// Drop the underlying source; reads that need it fail with `Closed`.
    pub fn close(&mut self) {
        self.window.close();
    }

    /// Give back the underlying source, if it was not closed.
    pub fn into_inner(self) -> Option<S> {
        self.window.into_source()
    }
}

impl<S: ByteSource> Read for BufferedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(self.max_size());
        BufferedStream::read(self, &mut buf[..len]).map_err(io::Error::other)
    }
}

impl<S: ByteSource> Seek for BufferedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let len = self.window.stream_len().map_err(io::Error::other)?;
                let len = len.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "stream length is unknown")
                })?;
                len.checked_add_signed(delta)
            }
        };

        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.position = target;
        Ok(target)
    }
}

/// A byte range of a shared stream, read on demand.
#[derive(Debug)]
pub struct StreamRange<S> {
    stream: SharedStream<S>,
    offset: u64,
    len: usize,
}

impl<S> StreamRange<S> {
    pub fn new(stream: SharedStream<S>, offset: u64, len: usize) -> Self {
        Self {
            stream,
            offset,
            len,
        }
    }

    /// Stream offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<S: ByteSource + std::fmt::Debug> PacketData for StreamRange<S> {
    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let mut stream = self.stream.try_borrow_mut().map_err(|_| BufferError::Busy)?;
        // Larger ranges are read in window-sized steps
        let count = buf.len().min(self.len - offset).min(stream.max_size());
        stream.read_at(self.offset + offset as u64, &mut buf[..count])
    }
}
