//! Configuration for the sliding window buffer.
//!
//! The window starts at `initial_size` bytes and doubles on demand up to
//! `max_size`. With `minimal_read` enabled every refill asks the source for
//! exactly the bytes a caller needs; otherwise refills top up the whole window.

use crate::error::{Error, Result};

/// Default initial window size (32 KiB).
pub const DEFAULT_INITIAL_SIZE: usize = 32 * 1024;

/// Default maximum window size (512 KiB).
pub const DEFAULT_MAX_SIZE: usize = 512 * 1024;

/// Sizing and refill policy for a [`SlidingWindow`](crate::window::SlidingWindow).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Backing array length at construction
    pub initial_size: usize,

    /// Upper bound the backing array may grow to
    pub max_size: usize,

    /// Request exactly the needed byte count on each refill
    pub minimal_read: bool,
}

impl WindowConfig {
    /// Create a configuration with the given sizes and opportunistic refills.
    pub fn with_sizes(initial_size: usize, max_size: usize) -> Self {
        Self {
            initial_size,
            max_size,
            minimal_read: false,
        }
    }

    /// Create a configuration that never reads ahead of the caller.
    ///
    /// Useful over live or metered sources where over-reading is costly.
    pub fn minimal(initial_size: usize, max_size: usize) -> Self {
        Self {
            initial_size,
            max_size,
            minimal_read: true,
        }
    }

    /// Check that the configuration describes a usable window.
    ///
    /// # Errors
    /// Returns `Error::Config` if `initial_size` is zero or exceeds `max_size`.
    pub fn validate(&self) -> Result<()> {
        if self.initial_size == 0 {
            return Err(Error::Config("initial window size must be non-zero".to_string()));
        }
        if self.initial_size > self.max_size {
            return Err(Error::Config(format!(
                "initial window size {} exceeds maximum {}",
                self.initial_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::with_sizes(DEFAULT_INITIAL_SIZE, DEFAULT_MAX_SIZE)
    }
}
