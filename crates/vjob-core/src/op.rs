//! Job operations: the request a caller submits and the output it gets back.
//!
//! One variant per backend call. Adding an operation means adding a
//! `Request` variant, an `Output` variant and an arm in the executor; the
//! compiler points at every match that needs updating.

use core::fmt;

use crate::error::VfsResult;
use crate::method::FileHandle;
use crate::target::Target;
use crate::types::{
    DirFilter, FileInfo, InfoOptions, OpenMode, OverwriteMode, SortRule, TransferOptions,
    TransferProgress,
};

/// Operation tag, for logs and dispatch decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Open,
    Create,
    Close,
    Read,
    Write,
    GetFileInfo,
    LoadDirectory,
    Transfer,
}

impl OpKind {
    /// Whether the worker waits for the caller's loop to consume the
    /// completion before it lets go of the job.
    ///
    /// Read results hand a buffer to the caller; the worker holds off until
    /// the callback has run.
    pub const fn needs_completion_ack(&self) -> bool {
        matches!(self, OpKind::Read)
    }

    /// Whether progress notifications wait for the caller's reply.
    ///
    /// Transfer progress is answered with a `ProgressAction`; directory
    /// batches are fire-and-forget.
    pub const fn needs_progress_ack(&self) -> bool {
        matches!(self, OpKind::Transfer)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OpKind::Open => "open",
            OpKind::Create => "create",
            OpKind::Close => "close",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::GetFileInfo => "get-file-info",
            OpKind::LoadDirectory => "load-directory",
            OpKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job's request.
#[derive(Debug, Clone)]
pub enum Request {
    Open {
        target: Target,
        mode: OpenMode,
    },
    Create {
        target: Target,
        mode: OpenMode,
        exclusive: bool,
        perm: u32,
    },
    Close {
        file: FileHandle,
    },
    Read {
        file: FileHandle,
        len: usize,
    },
    Write {
        file: FileHandle,
        data: Vec<u8>,
    },
    GetFileInfo {
        targets: Vec<Target>,
        options: InfoOptions,
        keys: Vec<String>,
    },
    LoadDirectory {
        target: Target,
        options: InfoOptions,
        sort: Vec<SortRule>,
        filter: Option<DirFilter>,
        /// Entries per batch notification; 0 = engine default.
        batch_size: usize,
    },
    Transfer {
        sources: Vec<Target>,
        targets: Vec<Target>,
        options: TransferOptions,
        overwrite: OverwriteMode,
        /// Chunks per progress notification; 0 = engine default.
        batch_size: usize,
    },
}

impl Request {
    pub fn kind(&self) -> OpKind {
        match self {
            Request::Open { .. } => OpKind::Open,
            Request::Create { .. } => OpKind::Create,
            Request::Close { .. } => OpKind::Close,
            Request::Read { .. } => OpKind::Read,
            Request::Write { .. } => OpKind::Write,
            Request::GetFileInfo { .. } => OpKind::GetFileInfo,
            Request::LoadDirectory { .. } => OpKind::LoadDirectory,
            Request::Transfer { .. } => OpKind::Transfer,
        }
    }

    /// Open an existing `target`.
    pub fn open(target: impl Into<Target>, mode: OpenMode) -> Self {
        Request::Open { target: target.into(), mode }
    }

    pub fn read(file: &FileHandle, len: usize) -> Self {
        Request::Read { file: file.clone(), len }
    }

    pub fn write(file: &FileHandle, data: impl Into<Vec<u8>>) -> Self {
        Request::Write { file: file.clone(), data: data.into() }
    }

    pub fn close(file: &FileHandle) -> Self {
        Request::Close { file: file.clone() }
    }

    /// Directory listing with default options, no sorting or filtering.
    pub fn load_directory(target: impl Into<Target>) -> Self {
        Request::LoadDirectory {
            target: target.into(),
            options: InfoOptions::default(),
            sort: Vec::new(),
            filter: None,
            batch_size: 0,
        }
    }

    /// Pairwise copy of `sources[i]` to `targets[i]`.
    pub fn transfer(sources: Vec<Target>, targets: Vec<Target>, overwrite: OverwriteMode) -> Self {
        Request::Transfer {
            sources,
            targets,
            options: TransferOptions::default(),
            overwrite,
            batch_size: 0,
        }
    }
}

/// A job's successful result.
#[derive(Debug)]
pub enum Output {
    Opened(FileHandle),
    Created(FileHandle),
    Closed,
    /// Bytes read; empty at end of file.
    Read(Vec<u8>),
    /// Bytes written.
    Written(usize),
    /// One entry per requested target, in request order.
    FileInfo(Vec<(Target, VfsResult<FileInfo>)>),
    /// Entries were delivered in batches; this is the total.
    Directory { entries_read: usize },
    /// Final transfer counters.
    Transferred(TransferProgress),
}

impl Output {
    /// File handle carried by open/create results.
    pub fn file(&self) -> Option<&FileHandle> {
        match self {
            Output::Opened(f) | Output::Created(f) => Some(f),
            _ => None,
        }
    }

    /// Bytes moved by a read or write.
    pub fn bytes_transferred(&self) -> usize {
        match self {
            Output::Read(data) => data.len(),
            Output::Written(n) => *n,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind() {
        assert_eq!(Request::open("mem:/a", OpenMode::READ).kind(), OpKind::Open);
        assert_eq!(Request::load_directory("mem:/").kind(), OpKind::LoadDirectory);
        let t = Request::transfer(vec!["mem:/a".into()], vec!["mem:/b".into()], OverwriteMode::Skip);
        assert_eq!(t.kind(), OpKind::Transfer);
    }

    #[test]
    fn test_ack_requirements() {
        assert!(OpKind::Read.needs_completion_ack());
        assert!(!OpKind::Write.needs_completion_ack());
        assert!(OpKind::Transfer.needs_progress_ack());
        assert!(!OpKind::LoadDirectory.needs_progress_ack());
    }

    #[test]
    fn test_output_bytes() {
        assert_eq!(Output::Read(vec![0; 16]).bytes_transferred(), 16);
        assert_eq!(Output::Written(7).bytes_transferred(), 7);
        assert_eq!(Output::Closed.bytes_transferred(), 0);
        assert!(Output::Closed.file().is_none());
    }
}
