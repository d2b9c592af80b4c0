//! packet-demux-core: packet-level access to multiplexed container streams
//!
//! This library sits between a page-framing layer and a codec. It:
//! - Buffers a forward-only or seekable byte source behind a sliding window
//! - Exposes packets as bit streams, read lazily through that window
//! - Joins packets split across pages back into whole packets
//! - Seeks within a logical stream by packet index or granule position
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `window`: Capped, resizable sliding window over a byte source
//! - `stream`: Cursor-based read/seek façade over the window
//! - `bitio`: LSB-first bit reading
//! - `packet`: Bit-addressable packets with continuation fragments
//! - `framing`: Page metadata and the page source boundary
//! - `reassembly`: Per-stream packet assembly and seeking
//! - `config`: Window sizing
//! - `metrics`: Observable system behavior
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **Bounded memory**: The window never grows past its configured maximum
//! - **Lazy I/O**: Packets read through the window only when their bits are consumed
//! - **Observable**: Counters and `tracing` events for buffer and assembly activity

pub mod bitio;
pub mod config;
pub mod error;
pub mod framing;
pub mod metrics;
pub mod packet;
pub mod reassembly;
pub mod stream;
pub mod window;

// Re-export commonly used types
pub use config::WindowConfig;
pub use error::{Error, Result};
pub use framing::{MemoryPages, PageFlags, PageHeader, PageSource};
pub use packet::{Packet, PacketData, PacketFlags};
pub use reassembly::{AssemblerStats, PacketAssembler};
pub use stream::{BufferedStream, SharedStream, StreamRange};
pub use window::{ByteSource, ForwardOnly, Seekable, SlidingWindow};
