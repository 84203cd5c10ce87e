use std::fmt;
use std::path::PathBuf;

use url::Url;

/// Decryption context active for a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContext {
    pub uri: Url,
    pub iv: Option<[u8; 16]>,
}

/// One media chunk of the selected variant. `index` is the only ordering used on output.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub uri: Url,
    /// `None` for unencrypted segments.
    pub key: Option<KeyContext>,
    pub media_sequence: u64,
    pub duration: f32,
}

impl Segment {
    /// Deterministic temp file name for this segment.
    pub fn file_name(&self) -> String {
        segment_file_name(self.index)
    }
}

pub(crate) fn segment_file_name(index: usize) -> String {
    format!("segment_{index:06}.ts")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Downloading,
    Decrypted,
    Failed,
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Downloading => "downloading",
            SegmentStatus::Decrypted => "decrypted",
            SegmentStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-index bookkeeping of the segment pool.
#[derive(Debug, Clone)]
pub struct SegmentResult {
    pub index: usize,
    pub status: SegmentStatus,
    pub attempts: u32,
    /// Plaintext location once Decrypted.
    pub path: Option<PathBuf>,
    pub bytes: u64,
}

impl SegmentResult {
    pub fn pending(index: usize) -> Self {
        Self {
            index,
            status: SegmentStatus::Pending,
            attempts: 0,
            path: None,
            bytes: 0,
        }
    }
}
