//! Per-stream packet assembly with a seek cache.
//!
//! A [`PacketAssembler`] pulls pages for one logical stream from a
//! [`PageSource`], joins packets split across pages, and hands complete
//! packets to the decoder in order.
//!
//! # Design
//!
//! - **Append-only cache**: every completed packet lands in one ordered list
//! - **Cursor**: packets before it were delivered, packets from it on are ready
//! - **Open packet**: at most one packet waits for its continuation, outside the list
//! - **Seeking**: moving the cursor re-serves cached packets without re-reading pages
//!
//! ```text
//! packets: [ p0 | p1 | p2 | p3 | p4 ]     open: Some(p5, continued)
//!                       ^ next
//!            delivered  |  ready
//! ```
//!
//! # Corruption
//!
//! Continuation flags that do not line up with the previous packet are
//! reported as errors. The offending page's other packets are still
//! accepted so the caller can keep reading past the damage.
//!
//! This structure is NOT thread-safe. Each logical stream owns one
//! instance; streams sharing a container share the page source.

use std::collections::BTreeSet;

use tracing::{debug, trace, warn};

use crate::error::{AssemblyError, Error, Result};
use crate::framing::PageSource;
use crate::metrics::AssemblyMetrics;
use crate::packet::Packet;

/// Assembles complete packets for one logical stream.
#[derive(Debug)]
pub struct PacketAssembler<P> {
    stream_serial: u32,

    pages: P,

    /// Completed packets in stream order (delivered then ready)
    packets: Vec<Packet>,

    /// Index of the next packet to deliver
    next: usize,

    /// Packet still waiting for its continuation
    open: Option<Packet>,

    /// Distinct page sequence numbers seen
    page_sequences: BTreeSet<u32>,

    end_of_stream: bool,

    metrics: AssemblyMetrics,
}

impl<P: PageSource> PacketAssembler<P> {
    /// Create an assembler for `stream_serial`, pulling pages from `pages`.
    pub fn new(stream_serial: u32, pages: P) -> Self {
        Self {
            stream_serial,
            pages,
            packets: Vec::new(),
            next: 0,
            open: None,
            page_sequences: BTreeSet::new(),
            end_of_stream: false,
            metrics: AssemblyMetrics::default(),
        }
    }

    pub fn stream_serial(&self) -> u32 {
        self.stream_serial
    }

    /// True once the stream's last page was seen or the source ran dry.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Index of the packet the next `get_next_packet` returns.
    pub fn current_index(&self) -> usize {
        self.next
    }

    pub fn metrics(&self) -> AssemblyMetrics {
        self.metrics
    }

    /// Accept one raw packet from the framing layer.
    ///
    /// # Errors
    /// - `ContinuationWithoutPacket` if a continuation arrives before any packet
    /// - `UnexpectedContinuation` if the previous packet was complete
    /// - `UnterminatedPacket` if a new packet starts while one is still open;
    ///   the open packet is dropped and the new one is accepted
    pub fn add_packet(&mut self, packet: Packet) -> Result<()> {
        self.metrics.packets_added += 1;
        self.page_sequences.insert(packet.page_sequence());
        let end_of_stream = packet.is_end_of_stream();

        let result = self.accept(packet);

        if end_of_stream {
            self.mark_end_of_stream();
        }
        if let Err(err) = &result {
            if err.is_corruption() {
                self.metrics.corruptions += 1;
                warn!(stream_serial = self.stream_serial, error = %err, "stream corruption");
            }
        }
        result
    }

    fn accept(&mut self, mut packet: Packet) -> Result<()> {
        let page_sequence = packet.page_sequence();

        if packet.is_resync() {
            packet.set_continuation(false);
            self.metrics.resyncs += 1;
            if let Some(mut open) = self.open.take() {
                open.set_continued(false);
                debug!(
                    stream_serial = self.stream_serial,
                    page_sequence, "resync closed open packet"
                );
                self.packets.push(open);
            }
        }

        if packet.is_continuation() {
            let Some(mut open) = self.open.take() else {
                let err = if self.packets.is_empty() {
                    AssemblyError::ContinuationWithoutPacket { page_sequence }
                } else {
                    AssemblyError::UnexpectedContinuation { page_sequence }
                };
                return Err(err.into());
            };

            let continued = packet.is_continued();
            open.merge_with(packet);
            open.set_continued(continued);
            self.metrics.fragments_merged += 1;
            trace!(
                stream_serial = self.stream_serial,
                page_sequence,
                len = open.len(),
                fragments = open.fragment_count(),
                "merged continuation"
            );

            if continued {
                self.open = Some(open);
            } else {
                self.packets.push(open);
            }
            return Ok(());
        }

        let unterminated = self.open.take().is_some();

        if packet.is_continued() {
            self.open = Some(packet);
        } else {
            self.packets.push(packet);
        }

        if unterminated {
            return Err(AssemblyError::UnterminatedPacket { page_sequence }.into());
        }
        Ok(())
    }

    fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
        if let Some(open) = self.open.take() {
            self.metrics.trailing_dropped += 1;
            debug!(
                stream_serial = self.stream_serial,
                page_sequence = open.page_sequence(),
                len = open.len(),
                "dropped unfinished packet at end of stream"
            );
        }
    }

    /// Pull one page from the source and add its packets.
    ///
    /// Returns `false` once no more pages are available.
    ///
    /// # Errors
    /// The first corruption error on the page. The page's remaining
    /// packets are still added.
    pub fn gather_page(&mut self) -> Result<bool> {
        if self.end_of_stream {
            return Ok(false);
        }

        let Some(page) = self.pages.gather_next_page(self.stream_serial)? else {
            debug!(stream_serial = self.stream_serial, "page source exhausted");
            self.mark_end_of_stream();
            return Ok(false);
        };

        self.metrics.pages_gathered += 1;
        trace!(
            stream_serial = self.stream_serial,
            packets = page.len(),
            "gathered page"
        );

        let mut first_error: Option<Error> = None;
        for packet in page {
            if let Err(err) = self.add_packet(packet) {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    /// Gather pages until `count` complete packets are cached.
    fn ensure_packets(&mut self, count: usize) -> Result<bool> {
        while self.packets.len() < count {
            if !self.gather_page()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Next complete packet, or `None` at end of stream.
    pub fn get_next_packet(&mut self) -> Result<Option<Packet>> {
        if !self.ensure_packets(self.next + 1)? {
            return Ok(None);
        }
        let packet = self.packets[self.next].rewound();
        self.next += 1;
        Ok(Some(packet))
    }

    /// Like [`get_next_packet`](Self::get_next_packet) without advancing.
    pub fn peek_next_packet(&mut self) -> Result<Option<Packet>> {
        if !self.ensure_packets(self.next + 1)? {
            return Ok(None);
        }
        Ok(Some(self.packets[self.next].rewound()))
    }

    /// Packet at `index` in stream order, reading pages as needed.
    ///
    /// Does not move the delivery cursor.
    pub fn get_packet(&mut self, index: usize) -> Result<Option<Packet>> {
        if !self.ensure_packets(index + 1)? {
            return Ok(None);
        }
        Ok(Some(self.packets[index].rewound()))
    }

    /// Read every remaining page of the stream.
    pub fn read_all_pages(&mut self) -> Result<()> {
        while self.gather_page()? {}
        Ok(())
    }

    /// Last complete packet of the stream.
    pub fn get_last_packet(&mut self) -> Result<Option<Packet>> {
        self.read_all_pages()?;
        Ok(self.packets.last().map(Packet::rewound))
    }

    /// Distinct pages seen so far.
    pub fn page_count(&self) -> usize {
        self.page_sequences.len()
    }

    /// Distinct pages in the whole stream.
    pub fn get_total_page_count(&mut self) -> Result<usize> {
        self.read_all_pages()?;
        Ok(self.page_sequences.len())
    }

    /// Page granule position of the stream's last packet.
    pub fn get_granule_count(&mut self) -> Result<Option<i64>> {
        self.read_all_pages()?;
        Ok(self.packets.last().map(Packet::page_granule_position))
    }

    /// Make `index` the next packet delivered.
    ///
    /// # Errors
    /// `InvalidPacketIndex` unless the packet is already cached.
    pub fn seek_to_packet(&mut self, index: usize) -> Result<()> {
        if index >= self.packets.len() {
            return Err(AssemblyError::InvalidPacketIndex {
                index,
                available: self.packets.len(),
            }
            .into());
        }
        self.next = index;
        self.metrics.seeks += 1;
        debug!(stream_serial = self.stream_serial, index, "seek to packet");
        Ok(())
    }

    /// Seek to `index`, then back up `pre_roll` packets (not past the start).
    pub fn seek_to_packet_with_pre_roll(&mut self, index: usize, pre_roll: usize) -> Result<()> {
        self.seek_to_packet(index.saturating_sub(pre_roll))
    }

    /// Seek to the first packet that decodes past `position`.
    ///
    /// Returns the index the cursor moved to.
    ///
    /// # Errors
    /// - `InvalidGranule` for a negative position
    /// - `EndOfStream` if the stream ends before `position` is covered
    /// - `GranuleBeforeStream` if every cached page starts after `position`
    pub fn seek_to_granule(&mut self, position: i64) -> Result<usize> {
        if position < 0 {
            return Err(AssemblyError::InvalidGranule { position }.into());
        }

        if !self.ensure_granule(position)? {
            return Err(AssemblyError::EndOfStream.into());
        }

        let found = self
            .packets
            .iter()
            .rposition(|p| p.page_granule_position() <= position)
            .ok_or(AssemblyError::GranuleBeforeStream { position })?;

        let mut index = found + 1;
        if self.packets[found].page_granule_position() != position {
            while let Some(packet) = self.packets.get(index) {
                match packet.granule_position() {
                    Some(g) if g != 0 && g <= position => index += 1,
                    _ => break,
                }
            }
        }

        if !self.ensure_packets(index + 1)? {
            return Err(AssemblyError::EndOfStream.into());
        }

        self.seek_to_packet(index)?;
        Ok(index)
    }

    /// Gather pages until the last cached packet's page reaches `position`.
    fn ensure_granule(&mut self, position: i64) -> Result<bool> {
        loop {
            if let Some(last) = self.packets.last() {
                if last.page_granule_position() >= position {
                    return Ok(true);
                }
            }
            if !self.gather_page()? {
                return Ok(false);
            }
        }
    }

    /// Locate the first packet whose granule position reaches `granule_pos`.
    ///
    /// Granule positions of the packets on the page holding `granule_pos`
    /// are filled in by walking back from the page's last packet.
    /// `granule_count(packet, previous)` returns how many granules
    /// `packet` adds after `previous`.
    ///
    /// Returns `None` if the stream ends first.
    pub fn find_packet<F>(
        &mut self,
        granule_pos: i64,
        mut granule_count: F,
    ) -> Result<Option<usize>>
    where
        F: FnMut(&Packet, Option<&Packet>) -> i64,
    {
        if !self.ensure_granule(granule_pos)? {
            return Ok(None);
        }

        let Some(start) = self
            .packets
            .iter()
            .position(|p| p.page_granule_position() >= granule_pos)
        else {
            return Ok(None);
        };

        let sequence = self.packets[start].page_sequence();
        let mut first = start;
        while first > 0 && self.packets[first - 1].page_sequence() == sequence {
            first -= 1;
        }
        let mut end = start;
        while end + 1 < self.packets.len() && self.packets[end + 1].page_sequence() == sequence {
            end += 1;
        }

        // A merged packet carries the page granule already; recompute them all
        let mut granule = self.packets[end].page_granule_position();
        self.packets[end].set_granule_position(Some(granule));
        for k in (first..end).rev() {
            granule -= granule_count(&self.packets[k + 1], Some(&self.packets[k]));
            self.packets[k].set_granule_position(Some(granule));
        }

        let index = (first..=end)
            .find(|&k| {
                self.packets[k]
                    .granule_position()
                    .is_some_and(|g| g >= granule_pos)
            })
            .unwrap_or(end);
        Ok(Some(index))
    }

    /// Get statistics about current assembly state.
    pub fn stats(&self) -> AssemblerStats {
        AssemblerStats {
            ready: self.packets.len() - self.next,
            delivered: self.next,
            open_fragment: self.open.is_some(),
            pages_seen: self.page_sequences.len(),
            end_of_stream: self.end_of_stream,
        }
    }
}

/// Statistics about assembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Complete packets waiting to be delivered
    pub ready: usize,

    /// Packets already delivered (still cached for seeking)
    pub delivered: usize,

    /// A packet is waiting for its continuation
    pub open_fragment: bool,

    /// Distinct page sequence numbers seen
    pub pages_seen: usize,

    pub end_of_stream: bool,
}
