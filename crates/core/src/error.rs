//! Error types for the demultiplexing layer.
//!
//! All operations return structured errors rather than panicking. Expected
//! end-of-data is never an error here: pulls return `Ok(None)` and short
//! reads return fewer bytes. Errors are reserved for real failures.

use thiserror::Error;

/// Top-level error type for all operations in the crate.
///
/// Each variant corresponds to a specific failure domain:
/// - Bit I/O: misuse of the bit reader
/// - Buffer: the sliding window could not service a request
/// - Assembly: corrupted framing or an unreachable seek target
/// - I/O: the underlying byte source failed
#[derive(Debug, Error)]
pub enum Error {
    /// Bit I/O operation failed (e.g., more than 64 bits requested)
    #[error("bit I/O error: {0}")]
    BitIo(#[from] BitIoError),

    /// Sliding window could not satisfy a read
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Packet assembly error (corruption, end of stream, bad seek target)
    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    /// Underlying source I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for framing inconsistencies that invalidate the stream's local state.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Assembly(
                AssemblyError::ContinuationWithoutPacket { .. }
                    | AssemblyError::UnexpectedContinuation { .. }
                    | AssemblyError::UnterminatedPacket { .. }
            )
        )
    }

    /// True when the stream ended before a request could be satisfied.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::Assembly(AssemblyError::EndOfStream))
    }
}

/// Bit-level I/O errors.
#[derive(Debug, Error)]
pub enum BitIoError {
    /// More bits requested than fit in the result word
    #[error("invalid bit count: {0} (maximum is 64)")]
    InvalidBitCount(u32),
}

/// Sliding window errors.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The request cannot fit in the window even at its maximum size
    #[error("read of {requested} bytes exceeds maximum window size {max}")]
    CapacityExceeded { requested: usize, max: usize },

    /// Forward-only source asked to go back past buffered data
    #[error("offset {offset} is before the buffered window starting at {window_start}")]
    BeforeWindow { offset: u64, window_start: u64 },

    /// Offset lies below the discard low-water mark
    #[error("offset {offset} was discarded (low-water mark {low_water})")]
    Discarded { offset: u64, low_water: u64 },

    /// The underlying source was closed
    #[error("underlying source is closed")]
    Closed,

    /// The stream is already borrowed by another reader
    #[error("stream is already in use")]
    Busy,
}

/// Packet assembly errors.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// A continuation arrived before any packet was accepted
    #[error("continuation packet on page {page_sequence} with no preceding packet")]
    ContinuationWithoutPacket { page_sequence: u32 },

    /// A continuation arrived but the previous packet was complete
    #[error("continuation packet on page {page_sequence} but previous packet was not continued")]
    UnexpectedContinuation { page_sequence: u32 },

    /// A new packet started while an earlier one was still waiting for its continuation
    #[error("packet left unterminated before page {page_sequence}")]
    UnterminatedPacket { page_sequence: u32 },

    /// The stream ended before the request could be satisfied
    #[error("end of stream")]
    EndOfStream,

    /// Packet index outside the cached range
    #[error("packet index {index} out of range (0..{available})")]
    InvalidPacketIndex { index: usize, available: usize },

    /// Negative granule position requested
    #[error("invalid granule position {position}")]
    InvalidGranule { position: i64 },

    /// Target precedes every cached packet
    #[error("granule position {position} precedes all cached packets")]
    GranuleBeforeStream { position: i64 },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
