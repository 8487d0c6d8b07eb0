use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suffix of the payload file of a segment.
pub const SEGMENT_PAYLOAD_SUFFIX: &str = ".cfs";
/// Suffix of the per-segment info file.
pub const SEGMENT_INFO_SUFFIX: &str = ".si";

/// Uuid-backed identifier of one immutable segment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(Uuid);

impl SegmentId {
    pub fn generate_random() -> SegmentId {
        SegmentId(Uuid::new_v4())
    }

    pub fn uuid_string(&self) -> String {
        self.0.simple().to_string()
    }

    /// Short prefix, convenient in logs.
    pub fn short_id(&self) -> String {
        self.uuid_string()[..8].to_string()
    }

    pub fn payload_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{SEGMENT_PAYLOAD_SUFFIX}", self.uuid_string()))
    }

    pub fn info_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{SEGMENT_INFO_SUFFIX}", self.uuid_string()))
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seg({})", self.short_id())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_the_uuid() {
        let segment_id = SegmentId::generate_random();
        let payload = segment_id.payload_path();
        let info = segment_id.info_path();
        assert!(payload.to_str().unwrap().ends_with(".cfs"));
        assert!(info.to_str().unwrap().ends_with(".si"));
        assert_eq!(
            payload.to_str().unwrap().trim_end_matches(".cfs"),
            info.to_str().unwrap().trim_end_matches(".si"),
        );
    }
}
