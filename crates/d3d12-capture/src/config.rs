use serde::{Deserialize, Serialize};

/// Per-chunk byte overhead reserved on top of the payload when planning initial-state chunks.
pub const DEFAULT_INITIAL_STATE_CHUNK_OVERHEAD: u64 = 128;

/// Capture policy knobs.
///
/// ```rust
/// use d3d12_capture::CaptureOptions;
///
/// let opts = CaptureOptions {
///     save_all_initials: true,
///     ..CaptureOptions::default()
/// };
/// assert!(!opts.ref_all_resources);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Snapshot the initial contents of every resource and descriptor heap, not only the ones
    /// that were dirtied or are forced by type.
    pub save_all_initials: bool,
    /// Serialize every tracked resource, not only the ones referenced by the captured frame.
    pub ref_all_resources: bool,
    /// Byte overhead added to each initial-state chunk size estimate.
    pub initial_state_chunk_overhead: u64,
    /// Validate descriptor handles against the heap table before dereferencing them in
    /// submission-time bookkeeping. Invalid handles are logged and skipped.
    pub verify_descriptor_handles: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            save_all_initials: false,
            ref_all_resources: false,
            initial_state_chunk_overhead: DEFAULT_INITIAL_STATE_CHUNK_OVERHEAD,
            verify_descriptor_handles: true,
        }
    }
}
