//! Request execution
//!
//! Turns a `Request` into method calls. Workers run it for queued jobs
//! and `SyncVfs` runs it on the caller's thread, so both APIs share one
//! code path. Everything here blocks.
//!
//! Cancellation is cooperative: the executor checks the job token before
//! each per-item step (one get-file-info target, one directory batch,
//! one transfer chunk) and hands the token to every method call.

mod transfer;

use std::sync::Arc;

use tracing::{debug, trace};

use vjob_core::listing::{filter_entries, sort_entries};
use vjob_core::{
    CancellationToken, DirFilter, FileHandle, FileInfo, InfoOptions, MethodContext,
    MethodResolver, OpenMode, OverwriteMode, Output, Progress, ProgressAction, Request, SortRule,
    Target, TransferOptions, TransferProgress, VfsError, VfsResult,
};

/// Receives intermediate results while a request runs.
pub trait ProgressSink {
    /// Deliver `progress`; the return value steers transfers and aborts
    /// directory loads.
    fn emit(&mut self, progress: Progress) -> ProgressAction;
}

impl<F> ProgressSink for F
where
    F: FnMut(Progress) -> ProgressAction,
{
    fn emit(&mut self, progress: Progress) -> ProgressAction {
        self(progress)
    }
}

/// Sink that drops everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&mut self, _progress: Progress) -> ProgressAction {
        ProgressAction::Continue
    }
}

/// Executes requests against methods found through a resolver.
#[derive(Clone)]
pub struct Executor {
    resolver: Arc<dyn MethodResolver>,
    batch_size: usize,
    chunk_size: usize,
}

impl Executor {
    pub fn new(resolver: Arc<dyn MethodResolver>, batch_size: usize, chunk_size: usize) -> Self {
        Self {
            resolver,
            batch_size: batch_size.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn resolver(&self) -> &Arc<dyn MethodResolver> {
        &self.resolver
    }

    /// Run `request` to completion.
    pub fn execute(
        &self,
        request: Request,
        token: &CancellationToken,
        sink: &mut dyn ProgressSink,
    ) -> VfsResult<Output> {
        token.check()?;
        match request {
            Request::Open { target, mode } => self.open(token, target, mode).map(Output::Opened),
            Request::Create { target, mode, exclusive, perm } => self
                .create(token, target, mode, exclusive, perm)
                .map(Output::Created),
            Request::Close { file } => self.close(token, &file).map(|()| Output::Closed),
            Request::Read { file, len } => self.read(token, &file, len).map(Output::Read),
            Request::Write { file, data } => self.write(token, &file, &data).map(Output::Written),
            Request::GetFileInfo { targets, options, keys } => {
                self.get_file_info(token, targets, options, &keys).map(Output::FileInfo)
            }
            Request::LoadDirectory { target, options, sort, filter, batch_size } => self
                .load_directory(token, &target, options, &sort, filter.as_ref(), batch_size, sink)
                .map(|entries_read| Output::Directory { entries_read }),
            Request::Transfer { sources, targets, options, overwrite, batch_size } => self
                .transfer(token, &sources, &targets, options, overwrite, batch_size, sink)
                .map(Output::Transferred),
        }
    }

    pub fn open(
        &self,
        token: &CancellationToken,
        target: Target,
        mode: OpenMode,
    ) -> VfsResult<FileHandle> {
        if !mode.is_valid() {
            return Err(VfsError::bad_parameters(format!("invalid open mode {mode:?}")));
        }
        let method = self.resolver.resolve(&target)?;
        let file = method.open(&MethodContext::new(token), &target, mode)?;
        debug!(%target, ?mode, "opened");
        Ok(FileHandle::new(target, mode, file))
    }

    pub fn create(
        &self,
        token: &CancellationToken,
        target: Target,
        mode: OpenMode,
        exclusive: bool,
        perm: u32,
    ) -> VfsResult<FileHandle> {
        if !mode.is_valid() || !mode.contains(OpenMode::WRITE) {
            return Err(VfsError::bad_parameters(format!("invalid create mode {mode:?}")));
        }
        let method = self.resolver.resolve(&target)?;
        let file = method.create(&MethodContext::new(token), &target, mode, exclusive, perm)?;
        debug!(%target, ?mode, exclusive, "created");
        Ok(FileHandle::new(target, mode, file))
    }

    pub fn close(&self, token: &CancellationToken, file: &FileHandle) -> VfsResult<()> {
        let inner = file.take()?;
        inner.close(&MethodContext::new(token))
    }

    pub fn read(&self, token: &CancellationToken, file: &FileHandle, len: usize) -> VfsResult<Vec<u8>> {
        if !file.mode().contains(OpenMode::READ) {
            return Err(VfsError::bad_parameters("file not open for reading"));
        }
        let ctx = MethodContext::new(token);
        file.with_file(|f| f.read(&ctx, len))
    }

    pub fn write(&self, token: &CancellationToken, file: &FileHandle, data: &[u8]) -> VfsResult<usize> {
        if !file.mode().contains(OpenMode::WRITE) {
            return Err(VfsError::bad_parameters("file not open for writing"));
        }
        let ctx = MethodContext::new(token);
        file.with_file(|f| f.write(&ctx, data))
    }

    /// Stat each target in order. Per-target failures are reported in
    /// place; only cancellation fails the whole request.
    pub fn get_file_info(
        &self,
        token: &CancellationToken,
        targets: Vec<Target>,
        options: InfoOptions,
        keys: &[String],
    ) -> VfsResult<Vec<(Target, VfsResult<FileInfo>)>> {
        let ctx = MethodContext::new(token);
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            ctx.check()?;
            let info = self.stat(&ctx, &target, options, keys);
            if let Err(e) = &info {
                if e.is_cancelled() {
                    return Err(VfsError::Cancelled);
                }
            }
            out.push((target, info));
        }
        Ok(out)
    }

    fn stat(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        options: InfoOptions,
        keys: &[String],
    ) -> VfsResult<FileInfo> {
        let method = self.resolver.resolve(target)?;
        let info = method.get_file_info(ctx, target, options, keys)?;
        Ok(if options.contains(InfoOptions::NAME_ONLY) {
            info.name_only()
        } else {
            info
        })
    }

    /// List, filter and sort `target`, streaming entries to `sink` in
    /// batches. Returns the number of entries delivered.
    #[allow(clippy::too_many_arguments)]
    pub fn load_directory(
        &self,
        token: &CancellationToken,
        target: &Target,
        options: InfoOptions,
        sort: &[SortRule],
        filter: Option<&DirFilter>,
        batch_size: usize,
        sink: &mut dyn ProgressSink,
    ) -> VfsResult<usize> {
        let ctx = MethodContext::new(token);
        let method = self.resolver.resolve(target)?;
        let entries = method.read_directory(&ctx, target, options)?;
        let mut entries = filter_entries(entries, filter);
        sort_entries(&mut entries, sort);
        if options.contains(InfoOptions::NAME_ONLY) {
            entries = entries.into_iter().map(FileInfo::name_only).collect();
        }

        let total = entries.len();
        let batch = if batch_size == 0 { self.batch_size } else { batch_size };
        let mut sent = 0;
        while sent < total {
            ctx.check()?;
            let end = (sent + batch).min(total);
            let chunk = entries[sent..end].to_vec();
            trace!(%target, from = sent, to = end, "directory batch");
            if sink.emit(Progress::Entries(chunk)) == ProgressAction::Abort {
                return Err(VfsError::Cancelled);
            }
            sent = end;
        }
        Ok(total)
    }

    /// Copy `sources[i]` to `targets[i]`. See the `transfer` module.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &self,
        token: &CancellationToken,
        sources: &[Target],
        targets: &[Target],
        options: TransferOptions,
        overwrite: OverwriteMode,
        batch_size: usize,
        sink: &mut dyn ProgressSink,
    ) -> VfsResult<TransferProgress> {
        let chunk = if options.chunk_size == 0 { self.chunk_size } else { options.chunk_size };
        let batch = if batch_size == 0 { self.batch_size } else { batch_size };
        transfer::Transfer {
            resolver: self.resolver.as_ref(),
            token,
            sink,
            options,
            overwrite,
            chunk_size: chunk,
            batch_size: batch,
        }
        .run(sources, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::MemoryMethod;
    use vjob_core::{MethodTable, SortKey};

    fn executor(batch: usize) -> (Executor, Arc<MemoryMethod>) {
        let mem = Arc::new(MemoryMethod::new());
        let table = MethodTable::new().with("mem", mem.clone());
        (Executor::new(Arc::new(table), batch, 4), mem)
    }

    #[test]
    fn test_open_read_close() {
        let (exec, mem) = executor(8);
        mem.insert_file("/a.txt", b"hello world").unwrap();
        let token = CancellationToken::new();

        let file = exec.open(&token, "mem:/a.txt".into(), OpenMode::READ).unwrap();
        assert_eq!(exec.read(&token, &file, 5).unwrap(), b"hello");
        assert!(exec.write(&token, &file, b"x").is_err());
        exec.close(&token, &file).unwrap();
        assert!(matches!(exec.close(&token, &file), Err(VfsError::InvalidHandle)));
    }

    #[test]
    fn test_execute_cancelled_token() {
        let (exec, _) = executor(8);
        let token = CancellationToken::new();
        token.cancel();
        let res = exec.execute(Request::load_directory("mem:/"), &token, &mut NoProgress);
        assert!(matches!(res, Err(VfsError::Cancelled)));
    }

    #[test]
    fn test_get_file_info_per_target_errors() {
        let (exec, mem) = executor(8);
        mem.insert_file("/x", b"123").unwrap();
        let token = CancellationToken::new();
        let out = exec
            .get_file_info(
                &token,
                vec!["mem:/x".into(), "mem:/missing".into(), "nope:/y".into()],
                InfoOptions::default(),
                &[],
            )
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].1.as_ref().unwrap().size, 3);
        assert!(matches!(out[1].1, Err(VfsError::NotFound(_))));
        assert!(matches!(out[2].1, Err(VfsError::UnknownScheme(_))));
    }

    #[test]
    fn test_load_directory_batches_sorted() {
        let (exec, mem) = executor(2);
        for name in ["c", "a", "b", ".hidden", "d"] {
            mem.insert_file(&format!("/dir/{name}"), b"").unwrap();
        }
        let token = CancellationToken::new();
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut sink = |p: Progress| {
            if let Progress::Entries(entries) = p {
                batches.push(entries.into_iter().map(|e| e.name).collect());
            }
            ProgressAction::Continue
        };
        let n = exec
            .load_directory(
                &token,
                &"mem:/dir".into(),
                InfoOptions::default(),
                &[SortRule::ascending(SortKey::Name)],
                Some(&DirFilter::no_hidden()),
                0,
                &mut sink,
            )
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn test_load_directory_abort() {
        let (exec, mem) = executor(1);
        mem.insert_file("/d/a", b"").unwrap();
        mem.insert_file("/d/b", b"").unwrap();
        let token = CancellationToken::new();
        let mut sink = |_p: Progress| ProgressAction::Abort;
        let res = exec.load_directory(
            &token,
            &"mem:/d".into(),
            InfoOptions::default(),
            &[],
            None,
            0,
            &mut sink,
        );
        assert!(matches!(res, Err(VfsError::Cancelled)));
    }

    #[test]
    fn test_bad_modes() {
        let (exec, _) = executor(8);
        let token = CancellationToken::new();
        assert!(matches!(
            exec.open(&token, "mem:/a".into(), OpenMode::empty()),
            Err(VfsError::BadParameters(_))
        ));
        assert!(matches!(
            exec.create(&token, "mem:/a".into(), OpenMode::READ, false, 0o644),
            Err(VfsError::BadParameters(_))
        ));
    }
}
