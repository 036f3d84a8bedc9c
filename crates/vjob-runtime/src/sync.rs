//! Synchronous API
//!
//! The same operations as the engine, run directly on the calling thread
//! through the shared executor. Every call blocks until the method
//! returns. Cancellation works through the instance's token, which other
//! threads may trip.

use std::sync::Arc;

use vjob_core::{
    CancellationToken, DirFilter, FileHandle, FileInfo, InfoOptions, MethodContext,
    MethodResolver, OpenMode, OverwriteMode, Output, Progress, ProgressAction, Request, SortRule,
    Target, TransferOptions, TransferProgress, VfsResult,
};

use crate::config::EngineConfig;
use crate::exec::{Executor, NoProgress};

pub struct SyncVfs {
    exec: Executor,
    token: CancellationToken,
}

impl SyncVfs {
    pub fn new(resolver: Arc<dyn MethodResolver>, config: &EngineConfig) -> Self {
        Self {
            exec: Executor::new(resolver, config.default_batch_size, config.transfer_chunk_size),
            token: CancellationToken::new(),
        }
    }

    /// Use `token` for every call made through this instance.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run any request; progress is discarded.
    pub fn execute(&self, request: Request) -> VfsResult<Output> {
        self.exec.execute(request, &self.token, &mut NoProgress)
    }

    pub fn open(&self, target: impl Into<Target>, mode: OpenMode) -> VfsResult<FileHandle> {
        self.exec.open(&self.token, target.into(), mode)
    }

    pub fn create(
        &self,
        target: impl Into<Target>,
        mode: OpenMode,
        exclusive: bool,
        perm: u32,
    ) -> VfsResult<FileHandle> {
        self.exec.create(&self.token, target.into(), mode, exclusive, perm)
    }

    pub fn close(&self, file: &FileHandle) -> VfsResult<()> {
        self.exec.close(&self.token, file)
    }

    pub fn read(&self, file: &FileHandle, len: usize) -> VfsResult<Vec<u8>> {
        self.exec.read(&self.token, file, len)
    }

    /// Read until end of file.
    pub fn read_to_end(&self, file: &FileHandle, chunk: usize) -> VfsResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let data = self.read(file, chunk.max(1))?;
            if data.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&data);
        }
    }

    pub fn write(&self, file: &FileHandle, data: &[u8]) -> VfsResult<usize> {
        self.exec.write(&self.token, file, data)
    }

    pub fn get_file_info(
        &self,
        targets: Vec<Target>,
        options: InfoOptions,
        keys: &[String],
    ) -> VfsResult<Vec<(Target, VfsResult<FileInfo>)>> {
        self.exec.get_file_info(&self.token, targets, options, keys)
    }

    /// Stream a directory to `on_batch`. Returns the entry count.
    pub fn load_directory(
        &self,
        target: impl Into<Target>,
        options: InfoOptions,
        sort: &[SortRule],
        filter: Option<&DirFilter>,
        mut on_batch: impl FnMut(Vec<FileInfo>),
    ) -> VfsResult<usize> {
        let mut sink = |p: Progress| {
            if let Progress::Entries(entries) = p {
                on_batch(entries);
            }
            ProgressAction::Continue
        };
        self.exec
            .load_directory(&self.token, &target.into(), options, sort, filter, 0, &mut sink)
    }

    /// Whole listing, filtered and sorted.
    pub fn list_directory(
        &self,
        target: impl Into<Target>,
        sort: &[SortRule],
        filter: Option<&DirFilter>,
    ) -> VfsResult<Vec<FileInfo>> {
        let mut all = Vec::new();
        self.load_directory(target, InfoOptions::default(), sort, filter, |batch| {
            all.extend(batch)
        })?;
        Ok(all)
    }

    pub fn transfer(
        &self,
        sources: &[Target],
        targets: &[Target],
        options: TransferOptions,
        overwrite: OverwriteMode,
        mut on_progress: impl FnMut(&TransferProgress) -> ProgressAction,
    ) -> VfsResult<TransferProgress> {
        let mut sink = |p: Progress| match p {
            Progress::Transfer(p) => on_progress(&p),
            Progress::Entries(_) => ProgressAction::Continue,
        };
        self.exec
            .transfer(&self.token, sources, targets, options, overwrite, 0, &mut sink)
    }

    pub fn remove(&self, target: impl Into<Target>) -> VfsResult<()> {
        let target = target.into();
        let method = self.exec.resolver().resolve(&target)?;
        method.remove(&MethodContext::new(&self.token), &target)
    }

    pub fn make_directory(&self, target: impl Into<Target>, perm: u32) -> VfsResult<()> {
        let target = target.into();
        let method = self.exec.resolver().resolve(&target)?;
        method.make_directory(&MethodContext::new(&self.token), &target, perm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::{LocalMethod, MemoryMethod};
    use vjob_core::{MethodTable, SortKey, VfsError};

    fn vfs() -> (SyncVfs, Arc<MemoryMethod>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(MemoryMethod::new());
        let table = MethodTable::new()
            .with("mem", mem.clone())
            .with("file", Arc::new(LocalMethod::rooted(dir.path())));
        let config = EngineConfig::new().default_batch_size(2);
        (SyncVfs::new(Arc::new(table), &config), mem, dir)
    }

    #[test]
    fn test_write_then_read_back() {
        let (vfs, _, _dir) = vfs();
        let f = vfs.create("file:/notes.txt", OpenMode::WRITE, true, 0o644).unwrap();
        vfs.write(&f, b"line one\n").unwrap();
        vfs.close(&f).unwrap();

        let f = vfs.open("file:/notes.txt", OpenMode::READ).unwrap();
        assert_eq!(vfs.read_to_end(&f, 3).unwrap(), b"line one\n");
        vfs.close(&f).unwrap();
    }

    #[test]
    fn test_cross_method_transfer() {
        let (vfs, mem, dir) = vfs();
        mem.insert_file("/src.bin", &[1, 2, 3, 4, 5]).unwrap();
        let done = vfs
            .transfer(
                &["mem:/src.bin".into()],
                &["file:/dst.bin".into()],
                TransferOptions::default(),
                OverwriteMode::Abort,
                |_| ProgressAction::Continue,
            )
            .unwrap();
        assert_eq!(done.total_bytes_copied, 5);
        assert_eq!(std::fs::read(dir.path().join("dst.bin")).unwrap(), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_list_directory_sorted() {
        let (vfs, _, _dir) = vfs();
        vfs.make_directory("file:/d", 0o755).unwrap();
        for name in ["b", "a", "c"] {
            let f = vfs.create(format!("file:/d/{name}"), OpenMode::WRITE, true, 0o644).unwrap();
            vfs.close(&f).unwrap();
        }
        let names: Vec<String> = vfs
            .list_directory("file:/d", &[SortRule::descending(SortKey::Name)], None)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["c", "b", "a"]);
        vfs.remove("file:/d/a").unwrap();
        assert_eq!(vfs.list_directory("file:/d", &[], None).unwrap().len(), 2);
    }

    #[test]
    fn test_token_cancels_calls() {
        let (vfs, mem, _dir) = vfs();
        mem.insert_file("/x", b"1").unwrap();
        let token = CancellationToken::new();
        let vfs = vfs.with_token(token.clone());
        assert!(vfs.open("mem:/x", OpenMode::READ).is_ok());
        token.cancel();
        assert!(matches!(vfs.open("mem:/x", OpenMode::READ), Err(VfsError::Cancelled)));
    }
}
