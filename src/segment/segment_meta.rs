use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use census::{Inventory, TrackedObject};
use log::error;
use serde::{Deserialize, Serialize};

use crate::common::errors::EngineError;
use crate::common::etag::Etag;
use crate::directory::error::OpenReadError;
use crate::directory::Directory;
use crate::segment::SegmentId;
use crate::{Generation, INDEX_VERSION_FILEPATH, SEGMENTS_GEN_FILEPATH};

/// Commit user-data key recording the highest etag of the batch, as a
/// UTF-8 hex string of the 16-byte opaque etag.
pub const USER_DATA_HIGHEST_ETAG: &str = "highest_etag";

/// Tracks every `SegmentMeta` currently alive in the process, whether
/// referenced by a commit point, a writer buffer or an open searcher.
#[derive(Clone, Default)]
pub struct SegmentMetaInventory {
    inventory: Inventory<InnerSegmentMeta>,
}

impl SegmentMetaInventory {
    pub fn all(&self) -> Vec<SegmentMeta> {
        self.inventory.list().into_iter().map(SegmentMeta::from).collect::<Vec<_>>()
    }

    pub fn new_segment_meta(
        &self,
        segment_id: SegmentId,
        doc_count: u32,
        tombstones: BTreeSet<u32>,
    ) -> SegmentMeta {
        let inner = InnerSegmentMeta { segment_id, doc_count, tombstones };
        SegmentMeta::from(self.inventory.track(inner))
    }
}

#[derive(Clone)]
pub struct SegmentMeta {
    tracked: TrackedObject<InnerSegmentMeta>,
}

impl fmt::Debug for SegmentMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        self.tracked.fmt(f)
    }
}

impl serde::Serialize for SegmentMeta {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error> {
        self.tracked.serialize(serializer)
    }
}

impl From<TrackedObject<InnerSegmentMeta>> for SegmentMeta {
    fn from(tracked: TrackedObject<InnerSegmentMeta>) -> SegmentMeta {
        SegmentMeta { tracked }
    }
}

impl SegmentMeta {
    pub fn id(&self) -> SegmentId {
        self.tracked.segment_id
    }

    pub fn doc_count(&self) -> u32 {
        self.tracked.doc_count
    }

    /// Documents neither deleted nor superseded.
    pub fn alive_doc_count(&self) -> u32 {
        self.tracked.doc_count - self.tracked.tombstones.len() as u32
    }

    pub fn tombstones(&self) -> &BTreeSet<u32> {
        &self.tracked.tombstones
    }

    pub fn is_tombstoned(&self, ord: u32) -> bool {
        self.tracked.tombstones.contains(&ord)
    }

    /// Files belonging to this segment. They exist for as long as any
    /// `SegmentMeta` instance for the segment is alive.
    pub fn list_files(&self) -> Vec<PathBuf> {
        vec![self.id().info_path(), self.id().payload_path()]
    }

    /// Returns a meta for the same segment files with more ordinals
    /// tombstoned. Deletions never mutate segment payloads.
    pub fn with_tombstones(&self, tombstones: BTreeSet<u32>) -> SegmentMeta {
        let tracked = self.tracked.map(move |inner| InnerSegmentMeta {
            segment_id: inner.segment_id,
            doc_count: inner.doc_count,
            tombstones,
        });
        SegmentMeta { tracked }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InnerSegmentMeta {
    segment_id: SegmentId,
    doc_count: u32,
    #[serde(default)]
    tombstones: BTreeSet<u32>,
}

impl InnerSegmentMeta {
    pub fn track(self, inventory: &SegmentMetaInventory) -> SegmentMeta {
        SegmentMeta { tracked: inventory.inventory.track(self) }
    }
}

/// One durable commit: the ordered segment set, its tombstones and the
/// commit user-data. Stored as `segments_<generation>`; `segments.gen`
/// names the live generation.
#[derive(Clone, Serialize)]
pub struct CommitPoint {
    pub segments: Vec<SegmentMeta>,
    pub generation: Generation,
    pub user_data: BTreeMap<String, String>,
}

impl fmt::Debug for CommitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            serde_json::ser::to_string(self)
                .expect("JSON serialization for CommitPoint should never fail.")
        )
    }
}

impl CommitPoint {
    /// The state before any commit: generation zero, no segments.
    pub fn empty() -> CommitPoint {
        CommitPoint { segments: Vec::new(), generation: 0, user_data: BTreeMap::new() }
    }

    pub fn commit_filename(generation: Generation) -> PathBuf {
        PathBuf::from(format!("segments_{generation}"))
    }

    /// Total live documents across all segments.
    pub fn alive_doc_count(&self) -> u32 {
        self.segments.iter().map(SegmentMeta::alive_doc_count).sum()
    }

    pub fn highest_etag(&self) -> crate::Result<Option<Etag>> {
        match self.user_data.get(USER_DATA_HIGHEST_ETAG) {
            Some(hex) => Ok(Some(Etag::parse_hex(hex)?)),
            None => Ok(None),
        }
    }

    /// Every file this commit references, commit metadata included.
    /// This is the set a snapshot pins and a backup copies.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if self.generation > 0 {
            files.push(Self::commit_filename(self.generation));
        }
        files.push(SEGMENTS_GEN_FILEPATH.to_path_buf());
        files.push(INDEX_VERSION_FILEPATH.to_path_buf());
        for segment in &self.segments {
            files.extend(segment.list_files());
        }
        files
    }

    pub(crate) fn deserialize(
        commit_json: &str,
        inventory: &SegmentMetaInventory,
    ) -> serde_json::Result<CommitPoint> {
        let untracked: UntrackedCommitPoint = serde_json::from_str(commit_json)?;
        Ok(untracked.track(inventory))
    }
}

/// Commit point as read from disk, before its segment metas are handed
/// over to the inventory.
#[derive(Deserialize, Debug)]
pub(crate) struct UntrackedCommitPoint {
    segments: Vec<InnerSegmentMeta>,
    generation: Generation,
    #[serde(default)]
    user_data: BTreeMap<String, String>,
}

impl UntrackedCommitPoint {
    pub fn track(self, inventory: &SegmentMetaInventory) -> CommitPoint {
        CommitPoint {
            segments: self
                .segments
                .into_iter()
                .map(|inner| inner.track(inventory))
                .collect::<Vec<SegmentMeta>>(),
            generation: self.generation,
            user_data: self.user_data,
        }
    }
}

/// Follows `segments.gen` to the current commit point.
///
/// A missing `segments.gen` means a brand new index. A `segments.gen`
/// pointing at a missing or unreadable commit file is corruption: the
/// pointer is written last, so a consistent directory always resolves.
pub fn load_current_commit(
    directory: &dyn Directory,
    inventory: &SegmentMetaInventory,
) -> crate::Result<CommitPoint> {
    let gen_data = match directory.atomic_read(&SEGMENTS_GEN_FILEPATH) {
        Ok(data) => data,
        Err(OpenReadError::FileDoesNotExist(_)) => return Ok(CommitPoint::empty()),
        Err(other) => return Err(other.into()),
    };
    let gen_text = String::from_utf8(gen_data).map_err(|_| {
        EngineError::corrupted(&SEGMENTS_GEN_FILEPATH, "segments.gen is not valid utf8")
    })?;
    let generation: Generation = gen_text.trim().parse().map_err(|_| {
        EngineError::corrupted(
            &SEGMENTS_GEN_FILEPATH,
            format!("segments.gen does not contain a generation: {gen_text:?}"),
        )
    })?;
    if generation == 0 {
        return Ok(CommitPoint::empty());
    }
    let commit_path = CommitPoint::commit_filename(generation);
    let commit_data = directory.atomic_read(&commit_path).map_err(|read_error| {
        error!("segments.gen points at generation {generation} but the commit file cannot be read");
        EngineError::CorruptIndex(format!(
            "commit file {commit_path:?} is unreadable: {read_error}"
        ))
    })?;
    let commit_json = String::from_utf8(commit_data)
        .map_err(|_| EngineError::corrupted(&commit_path, "commit file is not valid utf8"))?;
    CommitPoint::deserialize(&commit_json, inventory).map_err(|serde_error| {
        EngineError::corrupted(
            &commit_path,
            format!("commit file cannot be deserialized: {serde_error:?}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RamDirectory;

    #[test]
    fn test_commit_point_serialization_round_trip() {
        let inventory = SegmentMetaInventory::default();
        let meta =
            inventory.new_segment_meta(SegmentId::generate_random(), 7, BTreeSet::from([2u32]));
        let mut user_data = BTreeMap::new();
        user_data.insert(USER_DATA_HIGHEST_ETAG.to_string(), Etag::from_counter(9).to_hex());
        let commit = CommitPoint { segments: vec![meta], generation: 3, user_data };

        let json = serde_json::to_string(&commit).unwrap();
        let read_back = CommitPoint::deserialize(&json, &inventory).unwrap();
        assert_eq!(read_back.generation, 3);
        assert_eq!(read_back.segments.len(), 1);
        assert_eq!(read_back.segments[0].doc_count(), 7);
        assert_eq!(read_back.segments[0].alive_doc_count(), 6);
        assert_eq!(read_back.highest_etag().unwrap(), Some(Etag::from_counter(9)));
    }

    #[test]
    fn test_load_current_commit_on_empty_directory() {
        let directory = RamDirectory::create();
        let inventory = SegmentMetaInventory::default();
        let commit = load_current_commit(&directory, &inventory).unwrap();
        assert_eq!(commit.generation, 0);
        assert!(commit.segments.is_empty());
    }

    #[test]
    fn test_dangling_segments_gen_is_corruption() {
        let directory = RamDirectory::create();
        directory.atomic_write(&SEGMENTS_GEN_FILEPATH, b"4\n").unwrap();
        let inventory = SegmentMetaInventory::default();
        let result = load_current_commit(&directory, &inventory);
        assert!(matches!(result, Err(EngineError::CorruptIndex(_))));
    }
}
