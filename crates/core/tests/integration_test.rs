//! Integration tests for the full demux pipeline.
//!
//! These tests verify end-to-end behavior: byte source -> sliding window ->
//! stream-backed packets -> page stamping -> assembly -> bit reads, with
//! verification that packet bytes match the source.

use std::cell::{Cell, RefCell};
use std::io::{self, Cursor, Read};
use std::rc::Rc;

use packet_demux_core::{
    bitio::BitReader,
    error::{AssemblyError, BufferError, Error},
    BufferedStream, ByteSource, ForwardOnly, MemoryPages, Packet, PacketAssembler, PacketData,
    PacketFlags, PageFlags, PageHeader, Seekable, SharedStream, StreamRange, WindowConfig,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Source wrapper that records how it was read.
#[derive(Debug, Default, Clone)]
struct ReadLog {
    bytes: Rc<Cell<u64>>,
    end_hits: Rc<Cell<u32>>,
}

#[derive(Debug)]
struct Counting<S> {
    inner: S,
    log: ReadLog,
}

impl<S: ByteSource> ByteSource for Counting<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.log.bytes.set(self.log.bytes.get() + n as u64);
        if n == 0 {
            self.log.end_hits.set(self.log.end_hits.get() + 1);
        }
        Ok(n)
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek_to(offset)
    }
}

fn shared_stream(data: Vec<u8>, config: WindowConfig) -> SharedStream<Seekable<Cursor<Vec<u8>>>> {
    BufferedStream::new(Seekable(Cursor::new(data)), &config)
        .expect("valid config")
        .into_shared()
}

fn range<S>(stream: &SharedStream<S>, start: u64, end: u64) -> Rc<dyn PacketData>
where
    S: ByteSource + std::fmt::Debug + 'static,
{
    Rc::new(StreamRange::new(Rc::clone(stream), start, (end - start) as usize))
}

fn read_packet(packet: &mut Packet) -> Vec<u8> {
    let mut out = Vec::new();
    packet.read_to_end(&mut out).expect("packet read failed");
    out
}

/// Three pages over a shared stream:
///
/// ```text
/// page 1: [0..10)  [10..30)+
/// page 2: +[30..40)  [40..50)  [50..70)+
/// page 3: +[70..80)+ (end of stream)
/// ```
fn three_page_stream(data: &[u8]) -> PacketAssembler<MemoryPages> {
    let stream = shared_stream(data.to_vec(), WindowConfig::with_sizes(16, 64));
    let mut pages = MemoryPages::new();

    let page = |sequence, granule_position, flags| PageHeader {
        stream_serial: 1,
        sequence_number: sequence,
        granule_position,
        flags,
    };

    pages.push_framed(
        &page(
            1,
            100,
            PageFlags {
                beginning_of_stream: true,
                last_packet_continues: true,
                ..Default::default()
            },
        ),
        vec![range(&stream, 0, 10), range(&stream, 10, 30)],
    );
    pages.push_framed(
        &page(
            2,
            300,
            PageFlags {
                continues_packet: true,
                last_packet_continues: true,
                ..Default::default()
            },
        ),
        vec![range(&stream, 30, 40), range(&stream, 40, 50), range(&stream, 50, 70)],
    );
    pages.push_framed(
        &page(
            3,
            -1,
            PageFlags {
                continues_packet: true,
                last_packet_continues: true,
                end_of_stream: true,
                ..Default::default()
            },
        ),
        vec![range(&stream, 70, 80)],
    );

    PacketAssembler::new(1, pages)
}

/// Read at the tail of a 4096-byte source through a 512/2048 window.
#[test]
fn test_tail_read_clamped_at_end_of_stream() {
    init_tracing();
    let data = random_bytes(1, 4096);

    let log = ReadLog::default();
    let source = Counting {
        inner: Seekable(Cursor::new(data.clone())),
        log: log.clone(),
    };
    let mut stream = BufferedStream::new(source, &WindowConfig::with_sizes(512, 2048)).unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(stream.read_at(4087, &mut buf).unwrap(), 9);
    assert_eq!(&buf[..9], &data[4087..]);
    assert_eq!(stream.read_at(4096, &mut buf).unwrap(), 0);
    assert_eq!(stream.read_at(4090, &mut buf).unwrap(), 6);

    assert_eq!(log.bytes.get(), 9);
    assert_eq!(log.end_hits.get(), 1);
    assert_eq!(stream.window().eof_offset(), Some(4096));
}

/// Same tail read, but the source can only move forward.
#[test]
fn test_tail_read_on_forward_only_source() {
    let data = random_bytes(2, 4096);

    let log = ReadLog::default();
    let source = Counting {
        inner: ForwardOnly(Cursor::new(data.clone())),
        log: log.clone(),
    };
    let mut stream = BufferedStream::new(source, &WindowConfig::with_sizes(512, 2048)).unwrap();

    stream.set_position(4087);
    let mut tail = [0u8; 10];
    assert_eq!(stream.read(&mut tail).unwrap(), 9);
    assert_eq!(&tail[..9], &data[4087..]);
    assert_eq!(stream.read(&mut tail).unwrap(), 0);

    // Every byte came off the source exactly once
    assert_eq!(log.bytes.get(), 4096);
    assert_eq!(log.end_hits.get(), 1);
    assert_eq!(stream.metrics().bytes_skipped, 4087);

    assert!(matches!(
        stream.read_at(0, &mut tail),
        Err(Error::Buffer(BufferError::BeforeWindow { offset: 0, .. }))
    ));
}

#[test]
fn test_split_packets_across_pages() {
    init_tracing();
    let data = random_bytes(3, 80);
    let mut asm = three_page_stream(&data);

    let mut delivered = Vec::new();
    while let Some(mut packet) = asm.get_next_packet().unwrap() {
        assert!(!packet.is_continued());
        delivered.push(read_packet(&mut packet));
    }

    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[0], &data[0..10]);
    assert_eq!(delivered[1], &data[10..40]);
    assert_eq!(delivered[2], &data[40..50]);

    assert_eq!(asm.page_count(), 3);
    let metrics = asm.metrics();
    assert_eq!(metrics.pages_gathered, 3);
    assert_eq!(metrics.fragments_merged, 2);
    assert_eq!(metrics.trailing_dropped, 1);
}

#[test]
fn test_merged_packet_takes_completing_page() {
    let data = random_bytes(4, 80);
    let mut asm = three_page_stream(&data);

    let merged = asm.get_packet(1).unwrap().unwrap();
    assert_eq!(merged.fragment_count(), 2);
    assert_eq!(merged.len(), 30);
    assert_eq!(merged.page_sequence(), 2);
    assert_eq!(merged.granule_position(), Some(300));

    // Lookup does not move the delivery cursor
    assert_eq!(asm.current_index(), 0);
}

#[test]
fn test_trailing_partial_never_returned() {
    let data = random_bytes(5, 80);
    let mut asm = three_page_stream(&data);

    let mut last = asm.get_last_packet().unwrap().unwrap();
    assert_eq!(read_packet(&mut last), &data[40..50]);
    assert_eq!(asm.get_total_page_count().unwrap(), 3);
    assert!(asm.get_packet(3).unwrap().is_none());
}

#[test]
fn test_seek_to_granule_is_repeatable() {
    let mut pages = MemoryPages::new();
    for page in 0..8u32 {
        let granule = i64::from(page) * 1024;
        let packets = (0..3u8)
            .map(|i| {
                Packet::from_bytes(vec![page as u8, i])
                    .with_page(page, granule)
                    .with_granule_position((i == 2).then_some(granule))
            })
            .collect();
        pages.push_page(9, packets);
    }
    let mut asm = PacketAssembler::new(9, pages);

    let first = asm.seek_to_granule(3000).unwrap();
    let before = asm.get_packet(first - 1).unwrap().unwrap();
    assert!(before.page_granule_position() <= 3000);
    assert!(asm.get_packet(first).unwrap().unwrap().page_granule_position() > 3000);
    let mut packet = asm.get_next_packet().unwrap().unwrap();
    let bytes = read_packet(&mut packet);

    for _ in 0..3 {
        assert_eq!(asm.seek_to_granule(3000).unwrap(), first);
        let mut again = asm.get_next_packet().unwrap().unwrap();
        assert_eq!(read_packet(&mut again), bytes);
    }

    // 3000 lies on page 3 (3072): decoding starts after page 2 ends
    assert_eq!(bytes, vec![3, 0]);
    assert_eq!(asm.metrics().pages_gathered, 4);
}

#[test]
fn test_random_width_reads_across_fragments() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for _ in 0..64 {
        let len = rng.gen_range(1..200);
        let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

        let cut_count = rng.gen_range(0..4);
        let mut cuts: Vec<usize> = (0..cut_count).map(|_| rng.gen_range(0..=len)).collect();
        cuts.sort_unstable();
        cuts.push(len);

        let mut packet = Packet::from_bytes(bytes[..cuts[0]].to_vec());
        for pair in cuts.windows(2) {
            packet.merge_with(Packet::from_bytes(bytes[pair[0]..pair[1]].to_vec()));
        }
        assert_eq!(packet.len(), len);

        let mut oracle = BitReader::new(&bytes);
        loop {
            let width = rng.gen_range(1..=64);
            let expected = oracle.read_bits(width).unwrap();
            assert_eq!(packet.read_bits(width).unwrap(), expected);
            if expected.1 < width {
                break;
            }
        }
        assert_eq!(packet.bits_remaining(), 0);
    }
}

#[test]
fn test_bit_byte_and_bulk_reads_agree() {
    let data = random_bytes(6, 48);
    let stream = shared_stream(data.clone(), WindowConfig::minimal(8, 32));

    let mut packet = Packet::from_stream(&stream, 0, 16);
    packet.merge_with(Packet::from_stream(&stream, 16, 32));

    let mut by_bits = Vec::new();
    while packet.bits_remaining() > 0 {
        let mut byte = 0u8;
        for i in 0..8 {
            if packet.read_bit().unwrap() == Some(true) {
                byte |= 1 << i;
            }
        }
        by_bits.push(byte);
    }

    packet.reset();
    let mut by_byte = Vec::new();
    while let (value, 8) = packet.read_bits(8).unwrap() {
        by_byte.push(value as u8);
    }

    packet.reset();
    let bulk = read_packet(&mut packet);

    assert_eq!(by_bits, data);
    assert_eq!(by_byte, data);
    assert_eq!(bulk, data);
}

#[test]
fn test_corruption_reported_and_reading_continues() {
    let mut pages = MemoryPages::new();
    pages.push_page(
        4,
        vec![
            Packet::from_bytes(vec![0xde])
                .with_page(1, 10)
                .with_flags(PacketFlags {
                    continuation: true,
                    ..Default::default()
                }),
            Packet::from_bytes(vec![0xad]).with_page(1, 10),
        ],
    );
    let mut asm = PacketAssembler::new(4, pages);

    let err = asm.get_next_packet().unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(
        err,
        Error::Assembly(AssemblyError::ContinuationWithoutPacket { page_sequence: 1 })
    ));

    let mut next = asm.get_next_packet().unwrap().unwrap();
    assert_eq!(read_packet(&mut next), vec![0xad]);
    assert!(asm.get_next_packet().unwrap().is_none());
    assert_eq!(asm.metrics().corruptions, 1);
}

#[test]
fn test_streams_share_page_source() {
    let pages = Rc::new(RefCell::new(MemoryPages::new()));
    {
        let mut pages = pages.borrow_mut();
        pages.push_page(1, vec![Packet::from_bytes(vec![1]).with_page(0, 0)]);
        pages.push_page(2, vec![Packet::from_bytes(vec![2]).with_page(0, 0)]);
        pages.push_page(1, vec![Packet::from_bytes(vec![3]).with_page(1, 10)]);
    }

    let mut audio = PacketAssembler::new(1, Rc::clone(&pages));
    let mut video = PacketAssembler::new(2, Rc::clone(&pages));

    let mut p = video.get_next_packet().unwrap().unwrap();
    assert_eq!(read_packet(&mut p), vec![2]);
    assert_eq!(audio.get_total_page_count().unwrap(), 2);
    assert!(video.get_next_packet().unwrap().is_none());
    assert_eq!(pages.borrow().pages_served(), 3);
}

#[test]
fn test_find_packet_then_seek() {
    let mut pages = MemoryPages::new();
    for page in 0..4u32 {
        let granule = i64::from(page + 1) * 400;
        let packets = (0..4u8)
            .map(|i| Packet::from_bytes(vec![i; usize::from(i) + 1]).with_page(page, granule))
            .collect();
        pages.push_page(3, packets);
    }
    let mut asm = PacketAssembler::new(3, pages);

    // Each packet decodes 100 granules: page 2 covers (800, 1200]
    let index = asm.find_packet(1050, |_, _| 100).unwrap().unwrap();
    assert_eq!(index, 10);
    assert_eq!(asm.get_packet(index).unwrap().unwrap().granule_position(), Some(1100));
    assert_eq!(asm.get_packet(8).unwrap().unwrap().granule_position(), Some(900));

    asm.seek_to_packet_with_pre_roll(index, 2).unwrap();
    assert_eq!(asm.current_index(), 8);
    assert_eq!(asm.get_granule_count().unwrap(), Some(1600));
}
