//! Request and result payload types shared by methods and the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::target::Target;

bitflags! {
    /// How a file is opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Truncate to zero length on open (requires WRITE).
        const TRUNCATE = 1 << 2;
        /// Writes go to the end of the file (requires WRITE).
        const APPEND = 1 << 3;
    }
}

impl OpenMode {
    /// Whether the mode is internally consistent.
    pub fn is_valid(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        let needs_write = self.intersects(OpenMode::TRUNCATE | OpenMode::APPEND);
        !needs_write || self.contains(OpenMode::WRITE)
    }
}

bitflags! {
    /// What to gather when fetching file info.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InfoOptions: u32 {
        /// Report the target of a symlink rather than the link.
        const FOLLOW_LINKS = 1 << 0;
        /// Only the name is needed; skip size, permissions and times.
        const NAME_ONLY = 1 << 1;
    }
}

/// Kind of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileType::Regular)
    }
}

/// File metadata as reported by a method.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Last path component.
    pub name: String,
    pub kind: FileType,
    /// Size in bytes (0 for directories or when not gathered).
    pub size: u64,
    /// Unix permission bits.
    pub perm: u32,
    pub modified: Option<SystemTime>,
    /// Extra keys requested by the caller that the method knows about.
    pub metadata: BTreeMap<String, String>,
}

impl FileInfo {
    /// Info for a regular file.
    pub fn file(name: impl Into<String>, size: u64, perm: u32) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Regular,
            size,
            perm,
            modified: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Info for a directory.
    pub fn directory(name: impl Into<String>, perm: u32) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Directory,
            size: 0,
            perm,
            modified: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Strip everything but the name and kind.
    pub fn name_only(mut self) -> Self {
        self.size = 0;
        self.perm = 0;
        self.modified = None;
        self.metadata.clear();
        self
    }

    /// Hidden by the dot-file convention.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Sort key for directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Directories before everything else.
    DirectoriesFirst,
    Name,
    NameIgnoreCase,
    Size,
    Modified,
}

/// One sort rule; rules apply in order, later rules break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortRule {
    pub key: SortKey,
    pub descending: bool,
}

impl SortRule {
    pub const fn ascending(key: SortKey) -> Self {
        Self { key, descending: false }
    }

    pub const fn descending(key: SortKey) -> Self {
        Self { key, descending: true }
    }
}

/// Predicate deciding which directory entries reach the caller.
#[derive(Clone)]
pub struct DirFilter(Arc<dyn Fn(&FileInfo) -> bool + Send + Sync>);

impl DirFilter {
    pub fn new(f: impl Fn(&FileInfo) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Drop dot-files.
    pub fn no_hidden() -> Self {
        Self::new(|info| !info.is_hidden())
    }

    /// Keep regular files only.
    pub fn files_only() -> Self {
        Self::new(|info| info.kind.is_file())
    }

    pub fn accepts(&self, info: &FileInfo) -> bool {
        (self.0)(info)
    }
}

impl fmt::Debug for DirFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DirFilter(..)")
    }
}

/// What a transfer does when the destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwriteMode {
    /// Fail the transfer.
    #[default]
    Abort,
    /// Replace the destination.
    Replace,
    /// Leave the destination alone and move on.
    Skip,
}

/// Transfer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferOptions {
    /// Remove each source after it was copied (a move).
    pub remove_source: bool,
    /// Bytes per read/write round; 0 = engine default.
    pub chunk_size: usize,
}

/// Phase of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    #[default]
    Initial,
    /// Stat-ing sources to compute totals.
    Collecting,
    Copying,
    Completed,
}

/// Counters reported while a transfer runs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    pub source: Option<Target>,
    pub target: Option<Target>,
    /// 1-based index of the current file; 0 before the first file.
    pub file_index: usize,
    pub files_total: usize,
    pub files_skipped: usize,
    /// Size of the current file.
    pub file_size: u64,
    /// Bytes copied of the current file.
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub total_bytes_copied: u64,
}

/// Intermediate notification delivered before a job's completion.
#[derive(Debug, Clone)]
pub enum Progress {
    /// A batch of directory entries.
    Entries(Vec<FileInfo>),
    /// Transfer counters.
    Transfer(TransferProgress),
}

/// Caller's reply to a progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressAction {
    #[default]
    Continue,
    /// Skip the current item (transfer: current file).
    Skip,
    /// Abort the whole job; it completes with `Cancelled`.
    Abort,
}
