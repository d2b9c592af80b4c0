//! Counters describing buffer and assembler behavior.
//!
//! - Window: how often the source was touched and how the window moved
//! - Assembly: pages pulled, merges, resyncs, dropped partials, seeks
//!
//! # Thread Safety
//!
//! Counters are plain integers owned by the component that updates them.
//! Callers read snapshots through `metrics()` accessors.

/// Counters maintained by a [`SlidingWindow`](crate::window::SlidingWindow).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowMetrics {
    /// `read` calls issued to the underlying source
    pub source_reads: u64,

    /// Bytes delivered by the source into the window
    pub bytes_from_source: u64,

    /// Bytes read and dropped to emulate forward seeks
    pub bytes_skipped: u64,

    /// Backing array growths
    pub grows: u64,

    /// Window moves that dropped bytes ahead of the low-water mark
    pub slides: u64,

    /// Discarded bytes physically compacted out of the array
    pub compactions: u64,

    /// Backward repositions on seekable sources
    pub repositions: u64,
}

impl WindowMetrics {
    /// Export metrics as a simple `key=value` text block.
    pub fn export_text(&self) -> String {
        format!(
            "source_reads={}\n\
             bytes_from_source={}\n\
             bytes_skipped={}\n\
             grows={}\n\
             slides={}\n\
             compactions={}\n\
             repositions={}\n",
            self.source_reads,
            self.bytes_from_source,
            self.bytes_skipped,
            self.grows,
            self.slides,
            self.compactions,
            self.repositions,
        )
    }
}

/// Counters maintained by a [`PacketAssembler`](crate::reassembly::PacketAssembler).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyMetrics {
    /// Pages obtained from the page source
    pub pages_gathered: u64,

    /// Raw packets passed to `add_packet`
    pub packets_added: u64,

    /// Continuation fragments merged into an open packet
    pub fragments_merged: u64,

    /// Resync points observed
    pub resyncs: u64,

    /// Open packets dropped because the stream ended
    pub trailing_dropped: u64,

    /// Corruption errors reported
    pub corruptions: u64,

    /// Completed seeks (by index or granule)
    pub seeks: u64,
}

impl AssemblyMetrics {
    /// Fraction of added packets that were continuation fragments.
    ///
    /// Returns 0.0 if nothing was added.
    pub fn continuation_rate(&self) -> f64 {
        if self.packets_added == 0 {
            0.0
        } else {
            self.fragments_merged as f64 / self.packets_added as f64
        }
    }

    /// Export metrics as a simple `key=value` text block.
    pub fn export_text(&self) -> String {
        format!(
            "pages_gathered={}\n\
             packets_added={}\n\
             fragments_merged={}\n\
             continuation_rate={:.4}\n\
             resyncs={}\n\
             trailing_dropped={}\n\
             corruptions={}\n\
             seeks={}\n",
            self.pages_gathered,
            self.packets_added,
            self.fragments_merged,
            self.continuation_rate(),
            self.resyncs,
            self.trailing_dropped,
            self.corruptions,
            self.seeks,
        )
    }
}
