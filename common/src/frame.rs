use chrono::{DateTime, Local};

/// A single camera frame: encoded JPEG bytes plus the wall-clock instant
/// at which it was captured.
///
/// Frames are ephemeral — they live for one capture-loop iteration and
/// are only persisted when the detector qualifies them as an accident.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

const ARTIFACT_PREFIX: &str = "accident_";
const ARTIFACT_EXT: &str = ".jpg";

impl Frame {
    pub fn new(jpeg: Vec<u8>, captured_at: DateTime<Local>) -> Self {
        Self { jpeg, captured_at }
    }

    /// Size of the encoded payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// File name for this frame when persisted as an accident image:
    /// `accident_<YYYYMMDD>_<HHMMSS>.jpg`, zero-padded local time.
    ///
    /// The timestamp encoding makes names sort lexicographically in
    /// capture order, so "newest first" falls out of a reverse sort on
    /// the bare directory listing. Two captures inside the same second
    /// produce the same name and the later write wins.
    pub fn artifact_name(&self) -> String {
        format!(
            "{ARTIFACT_PREFIX}{}{ARTIFACT_EXT}",
            self.captured_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Returns true if `name` looks like an accident image artifact.
pub fn is_artifact_name(name: &str) -> bool {
    name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_EXT)
}
