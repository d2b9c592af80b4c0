//! Bit-level reading, least-significant bit first.
//!
//! Audio packets pack fields LSB-first: the first bit read is bit 0 of the
//! first byte, and a multi-bit value is assembled with its low bits coming
//! from earlier positions. This module holds the bit engine shared by
//! [`Packet`](crate::packet::Packet) and the slice-backed [`BitReader`].
//!
//! Bytes arrive through the [`ByteFeed`] trait, so the same engine reads a
//! contiguous slice or a chain of fragments without knowing which.
//!
//! # Example
//! ```
//! use packet_demux_core::bitio::BitReader;
//!
//! let bytes = [0b1010_0101u8, 0b0000_0011];
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bits(4).unwrap(), (0b0101, 4));
//! assert_eq!(reader.read_bits(6).unwrap(), (0b11_1010, 6));
//! ```

use crate::error::{BitIoError, Result};

/// Largest bit count a single read may request.
pub const MAX_BITS: u32 = 64;

/// A forward-only supply of bytes.
pub trait ByteFeed {
    /// Return the next byte, or `None` once the feed is exhausted.
    fn next_byte(&mut self) -> Result<Option<u8>>;
}

/// Partially consumed byte carried between reads.
///
/// # Invariants
/// - `available <= 8`
/// - the unread bits of `byte` are its top `available` bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitState {
    byte: u8,
    available: u32,
}

impl BitState {
    /// True when no bits of a partially read byte are pending.
    pub fn is_aligned(&self) -> bool {
        self.available == 0
    }

    /// Bits still pending in the current byte.
    pub fn pending(&self) -> u32 {
        self.available
    }

    /// Read up to `count` bits, LSB-first.
    ///
    /// Returns the value and how many bits were actually read; fewer than
    /// `count` means the feed ran dry.
    ///
    /// # Errors
    /// - `BitIoError::InvalidBitCount` if `count > 64`
    /// - errors from the feed are propagated unchanged
    pub fn read_bits<F: ByteFeed>(&mut self, feed: &mut F, count: u32) -> Result<(u64, u32)> {
        if count > MAX_BITS {
            return Err(BitIoError::InvalidBitCount(count).into());
        }

        let mut value = 0u64;
        let mut got = 0u32;

        while got < count {
            if self.available == 0 {
                match feed.next_byte()? {
                    Some(byte) => {
                        self.byte = byte;
                        self.available = 8;
                    }
                    None => break,
                }
            }

            let take = (count - got).min(self.available);
            let consumed = 8 - self.available;
            let mask = if take == 8 { 0xFF } else { (1u16 << take) as u8 - 1 };
            let bits = (self.byte >> consumed) & mask;

            value |= (bits as u64) << got;
            got += take;
            self.available -= take;
        }

        Ok((value, got))
    }
}

/// Feed over an in-memory slice.
#[derive(Debug, Clone)]
pub struct SliceFeed<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SliceFeed<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }
}

impl ByteFeed for SliceFeed<'_> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.data.get(self.position).copied();
        if byte.is_some() {
            self.position += 1;
        }
        Ok(byte)
    }
}

/// Reads bits LSB-first from a contiguous byte slice.
///
/// # Invariants
/// - `position()` never exceeds `data.len() * 8`
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    feed: SliceFeed<'a>,
    state: BitState,
}

impl<'a> BitReader<'a> {
    /// Create a new BitReader for the given data.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            feed: SliceFeed::new(data),
            state: BitState::default(),
        }
    }

    /// Read up to 64 bits; see [`BitState::read_bits`].
    pub fn read_bits(&mut self, count: u32) -> Result<(u64, u32)> {
        self.state.read_bits(&mut self.feed, count)
    }

    /// Read a single bit, or `None` at the end of the data.
    pub fn read_bit(&mut self) -> Result<Option<bool>> {
        let (value, got) = self.read_bits(1)?;
        Ok((got == 1).then_some(value == 1))
    }

    /// Return the number of bits remaining.
    pub fn bits_remaining(&self) -> usize {
        self.feed.data.len() * 8 - self.position()
    }

    /// Return the current bit position.
    pub fn position(&self) -> usize {
        self.feed.position * 8 - self.state.pending() as usize
    }

    /// Check if every bit has been read.
    pub fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }
}
