//! Bit-addressable packets over one or more byte ranges.
//!
//! A [`Packet`] is what the assembler hands to a decoder. Its bytes live in
//! one or more fragments: the primary range, followed by the ranges of any
//! continuation packets merged into it. Reads walk the fragments in order,
//! so a packet split across pages reads exactly like a contiguous one.
//!
//! # Backing Stores
//!
//! Fragments implement [`PacketData`]: "copy bytes at this offset". The
//! crate provides an in-memory store (`Vec<u8>`) and a stream-backed one
//! ([`StreamRange`](crate::stream::StreamRange)) that reads lazily through
//! the sliding window.
//!
//! # Bit Order
//!
//! Bits are consumed least-significant first within each byte, including
//! across fragment boundaries.
//!
//! # Position Metadata
//!
//! ```text
//! page_sequence          sequence number of the page that completed the packet
//! page_granule_position  granule position stamped on that page
//! granule_position       the packet's own end position, once resolved
//! ```

use std::fmt;
use std::io;
use std::rc::Rc;

use crate::bitio::{BitState, ByteFeed};
use crate::error::Result;
use crate::stream::{SharedStream, StreamRange};
use crate::window::ByteSource;

/// Random access to the bytes of one fragment.
pub trait PacketData: fmt::Debug {
    /// Total bytes in the fragment.
    fn len(&self) -> usize;

    /// Copy bytes starting at `offset` into `buf`, returning the count.
    ///
    /// Returns 0 at or past the end of the fragment.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PacketData for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let Some(rest) = self.get(offset..) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

/// Framing flags carried by a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// Continues a packet begun on an earlier page
    pub continuation: bool,

    /// Continues onto a later page
    pub continued: bool,

    /// First packet after framing was lost and reacquired
    pub resync: bool,

    /// Last packet of the logical stream
    pub end_of_stream: bool,
}

/// Read position within the fragment chain.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    fragment: usize,
    offset: usize,
    bits: BitState,
    bit_position: u64,
}

/// Walks the fragment chain one byte at a time for the bit engine.
struct FragmentFeed<'a> {
    fragments: &'a [Rc<dyn PacketData>],
    fragment: usize,
    offset: usize,
}

impl ByteFeed for FragmentFeed<'_> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        while let Some(data) = self.fragments.get(self.fragment) {
            if self.offset < data.len() {
                let mut byte = [0u8; 1];
                if data.read_at(self.offset, &mut byte)? == 1 {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
            }
            // Exhausted (or truncated underneath us): move on
            self.fragment += 1;
            self.offset = 0;
        }
        Ok(None)
    }
}

/// A logical packet: a chain of fragments plus position metadata.
#[derive(Clone)]
pub struct Packet {
    fragments: Vec<Rc<dyn PacketData>>,
    len: usize,
    cursor: Cursor,
    granule_position: Option<i64>,
    page_sequence: u32,
    page_granule_position: i64,
    flags: PacketFlags,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("fragments", &self.fragments.len())
            .field("bit_position", &self.cursor.bit_position)
            .field("granule_position", &self.granule_position)
            .field("page_sequence", &self.page_sequence)
            .field("page_granule_position", &self.page_granule_position)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Packet {
    /// Create a packet over a single backing range.
    pub fn new(data: Rc<dyn PacketData>) -> Self {
        Self {
            len: data.len(),
            fragments: vec![data],
            cursor: Cursor::default(),
            granule_position: None,
            page_sequence: 0,
            page_granule_position: -1,
            flags: PacketFlags::default(),
        }
    }

    /// Create a packet that owns its bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self::new(Rc::new(bytes))
    }

    /// Create a packet over `len` bytes of a shared stream at `offset`.
    ///
    /// Nothing is read until the packet is.
    pub fn from_stream<S>(stream: &SharedStream<S>, offset: u64, len: usize) -> Self
    where
        S: ByteSource + fmt::Debug + 'static,
    {
        Self::new(Rc::new(StreamRange::new(Rc::clone(stream), offset, len)))
    }

    /// Stamp page metadata.
    pub fn with_page(mut self, sequence: u32, granule_position: i64) -> Self {
        self.page_sequence = sequence;
        self.page_granule_position = granule_position;
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_granule_position(mut self, granule_position: Option<i64>) -> Self {
        self.granule_position = granule_position;
        self
    }

    // === Metadata ===

    /// Total bytes across all fragments.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of physical fragments (1 + merged continuations).
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn is_continuation(&self) -> bool {
        self.flags.continuation
    }

    pub fn set_continuation(&mut self, value: bool) {
        self.flags.continuation = value;
    }

    pub fn is_continued(&self) -> bool {
        self.flags.continued
    }

    pub fn set_continued(&mut self, value: bool) {
        self.flags.continued = value;
    }

    pub fn is_resync(&self) -> bool {
        self.flags.resync
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    pub fn set_end_of_stream(&mut self, value: bool) {
        self.flags.end_of_stream = value;
    }

    /// The packet's own end position, if resolved.
    pub fn granule_position(&self) -> Option<i64> {
        self.granule_position
    }

    pub fn set_granule_position(&mut self, granule_position: Option<i64>) {
        self.granule_position = granule_position;
    }

    pub fn page_sequence(&self) -> u32 {
        self.page_sequence
    }

    /// Granule position of the page that completed this packet (-1 if none).
    pub fn page_granule_position(&self) -> i64 {
        self.page_granule_position
    }

    // === Reading ===

    /// Bits consumed so far.
    pub fn bit_position(&self) -> u64 {
        self.cursor.bit_position
    }

    /// Bits left before the end of the packet.
    pub fn bits_remaining(&self) -> u64 {
        (self.len as u64 * 8).saturating_sub(self.cursor.bit_position)
    }

    /// Read one bit, or `None` at the end of the packet.
    pub fn read_bit(&mut self) -> Result<Option<bool>> {
        let (value, got) = self.read_bits(1)?;
        Ok((got == 1).then_some(value == 1))
    }

    /// Read up to 64 bits, LSB-first.
    ///
    /// Returns the value and the number of bits actually read; a short count
    /// means the packet ended.
    ///
    /// # Errors
    /// - `BitIoError::InvalidBitCount` if `count > 64`
    /// - buffer and I/O errors from stream-backed fragments
    pub fn read_bits(&mut self, count: u32) -> Result<(u64, u32)> {
        let mut feed = FragmentFeed {
            fragments: &self.fragments,
            fragment: self.cursor.fragment,
            offset: self.cursor.offset,
        };
        let (value, got) = self.cursor.bits.read_bits(&mut feed, count)?;

        self.cursor.fragment = feed.fragment;
        self.cursor.offset = feed.offset;
        self.cursor.bit_position += got as u64;
        Ok((value, got))
    }

    /// Read up to 64 bits without consuming them.
    pub fn peek_bits(&mut self, count: u32) -> Result<(u64, u32)> {
        let saved = self.cursor;
        let result = self.read_bits(count);
        self.cursor = saved;
        result
    }

    /// Skip up to `count` bits, returning how many were skipped.
    pub fn skip_bits(&mut self, count: u64) -> Result<u64> {
        let mut skipped = 0u64;

        // Finish the partially read byte first
        let pending = (self.cursor.bits.pending() as u64).min(count);
        if pending > 0 {
            skipped += self.read_bits(pending as u32)?.1 as u64;
        }

        // Whole bytes move the cursor without touching the data
        let mut bytes = (count - skipped) / 8;
        while bytes > 0 {
            let Some(data) = self.fragments.get(self.cursor.fragment) else {
                return Ok(skipped);
            };
            let available = data.len().saturating_sub(self.cursor.offset) as u64;
            if available == 0 {
                self.cursor.fragment += 1;
                self.cursor.offset = 0;
                continue;
            }
            let step = available.min(bytes);
            self.cursor.offset += step as usize;
            self.cursor.bit_position += step * 8;
            skipped += step * 8;
            bytes -= step;
        }

        let rest = (count - skipped) as u32;
        if rest > 0 {
            skipped += self.read_bits(rest)?.1 as u64;
        }
        Ok(skipped)
    }

    /// Read bytes into `buf`, returning the count (0 at end of packet).
    ///
    /// Byte-aligned reads copy straight from the fragments; unaligned reads
    /// go through the bit engine.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.cursor.bits.is_aligned() {
            let mut n = 0;
            for slot in buf.iter_mut() {
                if self.bits_remaining() < 8 {
                    break;
                }
                let (value, got) = self.read_bits(8)?;
                if got < 8 {
                    break;
                }
                *slot = value as u8;
                n += 1;
            }
            return Ok(n);
        }

        let mut total = 0;
        while total < buf.len() {
            let Some(data) = self.fragments.get(self.cursor.fragment) else {
                break;
            };
            let n = data.read_at(self.cursor.offset, &mut buf[total..])?;
            if n == 0 {
                self.cursor.fragment += 1;
                self.cursor.offset = 0;
                continue;
            }
            self.cursor.offset += n;
            total += n;
        }
        self.cursor.bit_position += total as u64 * 8;
        Ok(total)
    }

    /// Rewind to the first bit of the primary range.
    pub fn reset(&mut self) {
        self.cursor = Cursor::default();
    }

    /// A copy of this packet rewound to its first bit.
    pub fn rewound(&self) -> Self {
        let mut packet = self.clone();
        packet.reset();
        packet
    }

    /// Release the backing fragments. The packet reads as empty afterwards.
    pub fn done(&mut self) {
        self.fragments.clear();
        self.len = 0;
        self.cursor = Cursor::default();
    }

    /// Append `other` as continuation fragments of this packet.
    ///
    /// The merged packet belongs to the page that completed it, so it adopts
    /// `other`'s page sequence number and page granule position, and that
    /// granule position becomes its own.
    pub fn merge_with(&mut self, other: Packet) {
        self.fragments.extend(other.fragments);
        self.len += other.len;
        self.page_sequence = other.page_sequence;
        self.page_granule_position = other.page_granule_position;
        self.granule_position =
            (other.page_granule_position >= 0).then_some(other.page_granule_position);
        self.flags.end_of_stream |= other.flags.end_of_stream;
    }
}

impl io::Read for Packet {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Packet::read(self, buf).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitio::BitReader;

    fn packet(bytes: &[u8]) -> Packet {
        Packet::from_bytes(bytes.to_vec())
    }

    fn merged(parts: &[&[u8]]) -> Packet {
        let mut iter = parts.iter();
        let mut first = packet(iter.next().unwrap());
        for part in iter {
            first.merge_with(packet(part));
        }
        first
    }

    #[test]
    fn test_bits_bytes_agree() {
        let data = [0b1100_1010u8, 0x5A];

        let mut by_bit = packet(&data);
        let mut byte = 0u8;
        for i in 0..8 {
            if by_bit.read_bit().unwrap().unwrap() {
                byte |= 1 << i;
            }
        }

        let mut by_bits = packet(&data);
        let (value, got) = by_bits.read_bits(8).unwrap();

        let mut by_read = packet(&data);
        let mut buf = [0u8; 1];
        by_read.read(&mut buf).unwrap();

        assert_eq!(got, 8);
        assert_eq!(byte, data[0]);
        assert_eq!(value as u8, data[0]);
        assert_eq!(buf[0], data[0]);
    }

    #[test]
    fn test_read_across_fragments() {
        let mut packet = merged(&[&[0x12, 0x34], &[0x56], &[0x78, 0x9A]]);
        assert_eq!(packet.len(), 5);
        assert_eq!(packet.fragment_count(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(packet.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], &[0x12, 0x34, 0x56, 0x78, 0x9A]);
        assert_eq!(packet.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_bits_spanning_boundary_match_contiguous() {
        let parts: [&[u8]; 3] = [&[0xA5, 0x3C], &[0xF0], &[0x0F, 0x81]];
        let flat: Vec<u8> = parts.concat();

        let mut packet = merged(&parts);
        let mut reader = BitReader::new(&flat);
        for width in [3u32, 13, 7, 1, 9, 5, 2] {
            assert_eq!(packet.read_bits(width).unwrap(), reader.read_bits(width).unwrap());
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut packet = merged(&[&[0xFF], &[0x01]]);
        packet.read_bits(4).unwrap();

        let peeked = packet.peek_bits(8).unwrap();
        assert_eq!(packet.bit_position(), 4);
        assert_eq!(packet.read_bits(8).unwrap(), peeked);
        assert_eq!(peeked, (0x1F, 8));
    }

    #[test]
    fn test_skip_bits() {
        let mut packet = merged(&[&[0x00, 0x00], &[0x00, 0xF0]]);
        assert_eq!(packet.skip_bits(3).unwrap(), 3);
        assert_eq!(packet.skip_bits(25).unwrap(), 25);
        assert_eq!(packet.bit_position(), 28);
        assert_eq!(packet.read_bits(4).unwrap(), (0xF, 4));

        // Skipping past the end stops at the end
        assert_eq!(packet.skip_bits(100).unwrap(), 0);
    }

    #[test]
    fn test_unaligned_bulk_read() {
        let mut packet = merged(&[&[0x10], &[0x32, 0x54]]);
        packet.read_bits(4).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(packet.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0x21, 0x43]);
        assert_eq!(packet.bits_remaining(), 4);
    }

    #[test]
    fn test_reset_rereads_from_start() {
        let mut packet = merged(&[&[0xAB], &[0xCD]]);
        let mut first = [0u8; 2];
        packet.read(&mut first).unwrap();

        packet.reset();
        let mut second = [0u8; 2];
        packet.read(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_adopts_completing_page() {
        let mut first = packet(&[1]).with_page(3, -1).with_flags(PacketFlags {
            continued: true,
            ..Default::default()
        });
        let middle = packet(&[2]).with_page(4, -1);
        let last = packet(&[3]).with_page(5, 4410);

        first.merge_with(middle);
        assert_eq!(first.granule_position(), None);
        first.merge_with(last);

        assert_eq!(first.page_sequence(), 5);
        assert_eq!(first.page_granule_position(), 4410);
        assert_eq!(first.granule_position(), Some(4410));
    }

    #[test]
    fn test_done_releases_fragments() {
        let mut packet = merged(&[&[1, 2], &[3]]);
        packet.done();
        assert_eq!(packet.fragment_count(), 0);
        assert_eq!(packet.read_bits(8).unwrap(), (0, 0));
    }

    #[test]
    fn test_clone_has_independent_cursor() {
        let mut packet = packet(&[0x01, 0x02]);
        let mut copy = packet.clone();

        packet.read_bits(8).unwrap();
        assert_eq!(copy.bit_position(), 0);
        assert_eq!(copy.read_bits(8).unwrap(), (0x01, 8));
    }
}
