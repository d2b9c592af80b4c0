//! Boundary with the page-framing layer.
//!
//! Page capture, checksum validation and header parsing happen elsewhere.
//! What this crate needs from that layer is small:
//!
//! - a way to pull the next page of a logical stream ([`PageSource`])
//! - the page metadata stamped onto each packet ([`PageHeader`])
//!
//! # Page Layout
//!
//! ```text
//! page N:   [ p0 (continuation?) | p1 | ... | pk (continued?) ]
//!             ^ resync lands here            ^ end-of-stream lands here
//! ```
//!
//! Only the last packet *completed* on a page knows its granule position:
//! it is the page's. Every packet carries the page sequence number and
//! page granule position so the assembler can seek.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::Result;
use crate::packet::{Packet, PacketData, PacketFlags};

/// Header-type bit: first packet continues one from the previous page.
pub const HEADER_TYPE_CONTINUATION: u8 = 0x01;

/// Header-type bit: first page of a logical stream.
pub const HEADER_TYPE_BOS: u8 = 0x02;

/// Header-type bit: last page of a logical stream.
pub const HEADER_TYPE_EOS: u8 = 0x04;

/// Supplies pages for logical streams, one at a time.
pub trait PageSource {
    /// Frame the next page belonging to `stream_serial` and return its packets.
    ///
    /// Returns `Ok(None)` when the container holds no further pages for the
    /// stream.
    fn gather_next_page(&mut self, stream_serial: u32) -> Result<Option<Vec<Packet>>>;
}

/// Streams sharing one container share its read cursor through `Rc<RefCell<_>>`.
impl<T: PageSource> PageSource for Rc<RefCell<T>> {
    fn gather_next_page(&mut self, stream_serial: u32) -> Result<Option<Vec<Packet>>> {
        self.borrow_mut().gather_next_page(stream_serial)
    }
}

/// Page-level flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFlags {
    /// First packet continues one from the previous page
    pub continues_packet: bool,

    /// First page of the logical stream
    pub beginning_of_stream: bool,

    /// Last page of the logical stream
    pub end_of_stream: bool,

    /// Page found after lost framing was reacquired
    pub resync: bool,

    /// Last packet does not finish on this page
    pub last_packet_continues: bool,
}

impl PageFlags {
    /// Decode the header-type byte. `resync` and `last_packet_continues`
    /// come from the reader, not the header byte.
    pub fn from_header_type(header_type: u8) -> Self {
        Self {
            continues_packet: header_type & HEADER_TYPE_CONTINUATION != 0,
            beginning_of_stream: header_type & HEADER_TYPE_BOS != 0,
            end_of_stream: header_type & HEADER_TYPE_EOS != 0,
            ..Default::default()
        }
    }
}

/// Metadata of one framed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub stream_serial: u32,
    pub sequence_number: u32,
    /// -1 when no packet completes on this page
    pub granule_position: i64,
    pub flags: PageFlags,
}

impl PageHeader {
    /// Turn the page's packet ranges into flagged packets.
    ///
    /// - first packet: continuation / resync per page flags
    /// - last packet: continued / end-of-stream per page flags
    /// - last completed packet: granule position = page granule position
    pub fn stamp_packets(&self, ranges: Vec<Rc<dyn PacketData>>) -> Vec<Packet> {
        let count = ranges.len();
        let granule = (self.granule_position >= 0).then_some(self.granule_position);

        ranges
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let first = i == 0;
                let last = i + 1 == count;
                let continued = last && self.flags.last_packet_continues;

                let flags = PacketFlags {
                    continuation: first && self.flags.continues_packet,
                    continued,
                    resync: first && self.flags.resync,
                    end_of_stream: last && self.flags.end_of_stream,
                };

                let last_completed =
                    last || (i + 2 == count && self.flags.last_packet_continues);
                let completes_page = !continued && last_completed;

                Packet::new(data)
                    .with_page(self.sequence_number, self.granule_position)
                    .with_flags(flags)
                    .with_granule_position(if completes_page { granule } else { None })
            })
            .collect()
    }
}

/// In-memory page queues, demultiplexed by stream serial.
///
/// Useful when pages are already framed, and as a stand-in container in tests.
#[derive(Debug, Default)]
pub struct MemoryPages {
    streams: HashMap<u32, VecDeque<Vec<Packet>>>,
    pages_served: u64,
}

impl MemoryPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a page's packets for `stream_serial`.
    pub fn push_page(&mut self, stream_serial: u32, packets: Vec<Packet>) {
        self.streams.entry(stream_serial).or_default().push_back(packets);
    }

    /// Stamp and queue a page described by `header`.
    pub fn push_framed(&mut self, header: &PageHeader, ranges: Vec<Rc<dyn PacketData>>) {
        self.push_page(header.stream_serial, header.stamp_packets(ranges));
    }

    /// Pages still queued for `stream_serial`.
    pub fn pending(&self, stream_serial: u32) -> usize {
        self.streams.get(&stream_serial).map_or(0, VecDeque::len)
    }

    /// Pages handed out so far, across all streams.
    pub fn pages_served(&self) -> u64 {
        self.pages_served
    }
}

impl PageSource for MemoryPages {
    fn gather_next_page(&mut self, stream_serial: u32) -> Result<Option<Vec<Packet>>> {
        let page = self
            .streams
            .get_mut(&stream_serial)
            .and_then(VecDeque::pop_front);
        if page.is_some() {
            self.pages_served += 1;
        }
        Ok(page)
    }
}
