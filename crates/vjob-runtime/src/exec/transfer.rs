//! Multi-file transfer
//!
//! Copies `sources[i]` to `targets[i]` through the method boundary, so
//! source and destination may live behind different methods.
//!
//! Phases: `Collecting` stats every source to compute totals, `Copying`
//! moves the bytes chunk by chunk, `Completed` reports final counters.
//! Progress goes to the sink at each file start and every `batch_size`
//! chunks; the reply steers the transfer:
//!
//! - `Continue` - keep going
//! - `Skip` - drop the current file (partial destination removed)
//! - `Abort` - stop, the job completes with `Cancelled`
//!
//! Each file runs under a child of the job token. Skipping trips only the
//! child, so a cancelled child with a live parent means "skip".

use std::sync::Arc;

use tracing::{debug, warn};

use vjob_core::{
    CancellationToken, FileType, InfoOptions, Method, MethodContext, MethodFile, MethodResolver, OpenMode,
    OverwriteMode, Progress, ProgressAction, Target, TransferOptions, TransferPhase,
    TransferProgress, VfsError, VfsResult,
};

use super::ProgressSink;

const DEFAULT_PERM: u32 = 0o644;

pub(super) struct Transfer<'a> {
    pub(super) resolver: &'a dyn MethodResolver,
    pub(super) token: &'a CancellationToken,
    pub(super) sink: &'a mut dyn ProgressSink,
    pub(super) options: TransferOptions,
    pub(super) overwrite: OverwriteMode,
    pub(super) chunk_size: usize,
    pub(super) batch_size: usize,
}

enum FileOutcome {
    Copied,
    Skipped,
}

impl<'a> Transfer<'a> {
    pub(super) fn run(mut self, sources: &[Target], targets: &[Target]) -> VfsResult<TransferProgress> {
        if sources.is_empty() || sources.len() != targets.len() {
            return Err(VfsError::bad_parameters(format!(
                "transfer needs matching source/target lists ({} vs {})",
                sources.len(),
                targets.len()
            )));
        }

        let mut progress = TransferProgress {
            phase: TransferPhase::Collecting,
            files_total: sources.len(),
            ..TransferProgress::default()
        };

        let ctx = MethodContext::new(self.token);
        let mut sizes = Vec::with_capacity(sources.len());
        for (source, target) in sources.iter().zip(targets) {
            ctx.check()?;
            let method = self.resolver.resolve(source)?;
            if self.same_file(&method, source, target)? {
                return Err(VfsError::bad_parameters(format!(
                    "transfer source and destination are the same file: {source}"
                )));
            }
            let info = method.get_file_info(&ctx, source, InfoOptions::FOLLOW_LINKS, &[])?;
            if info.kind == FileType::Directory {
                return Err(VfsError::is_a_directory(source.as_str()));
            }
            progress.total_bytes += info.size;
            sizes.push((info.size, info.perm));
        }
        self.report(&progress)?;

        progress.phase = TransferPhase::Copying;
        for (i, (source, target)) in sources.iter().zip(targets).enumerate() {
            self.token.check()?;
            progress.file_index = i + 1;
            progress.source = Some(source.clone());
            progress.target = Some(target.clone());
            progress.file_size = sizes[i].0;
            progress.bytes_copied = 0;

            if self.destination_exists(target)? {
                match self.overwrite {
                    OverwriteMode::Abort => return Err(VfsError::already_exists(target.as_str())),
                    OverwriteMode::Skip => {
                        debug!(%source, %target, "destination exists, skipping");
                        progress.files_skipped += 1;
                        continue;
                    }
                    OverwriteMode::Replace => {}
                }
            }

            match self.copy_file(source, target, sizes[i].1, &mut progress)? {
                FileOutcome::Copied => {
                    if self.options.remove_source {
                        let method = self.resolver.resolve(source)?;
                        method.remove(&ctx, source)?;
                    }
                }
                FileOutcome::Skipped => progress.files_skipped += 1,
            }
        }

        progress.phase = TransferPhase::Completed;
        progress.source = None;
        progress.target = None;
        // Final counters go out through the completion; the reply is moot.
        self.sink.emit(Progress::Transfer(progress.clone()));
        Ok(progress)
    }

    /// Whether `target` names the same object as `source` behind the same
    /// method instance.
    fn same_file(
        &self,
        source_method: &Arc<dyn Method>,
        source: &Target,
        target: &Target,
    ) -> VfsResult<bool> {
        let target_method = self.resolver.resolve(target)?;
        let same_method = std::ptr::addr_eq(Arc::as_ptr(source_method), Arc::as_ptr(&target_method));
        Ok(same_method && normalize_path(source.path()) == normalize_path(target.path()))
    }

    fn destination_exists(&self, target: &Target) -> VfsResult<bool> {
        let method = self.resolver.resolve(target)?;
        let ctx = MethodContext::new(self.token);
        match method.get_file_info(&ctx, target, InfoOptions::NAME_ONLY, &[]) {
            Ok(_) => Ok(true),
            Err(VfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Emit progress, mapping `Abort` to `Cancelled`.
    fn report(&mut self, progress: &TransferProgress) -> VfsResult<ProgressAction> {
        match self.sink.emit(Progress::Transfer(progress.clone())) {
            ProgressAction::Abort => Err(VfsError::Cancelled),
            action => Ok(action),
        }
    }

    fn copy_file(
        &mut self,
        source: &Target,
        target: &Target,
        perm: u32,
        progress: &mut TransferProgress,
    ) -> VfsResult<FileOutcome> {
        let file_token = self.token.child();
        let src_method = self.resolver.resolve(source)?;
        let dst_method = self.resolver.resolve(target)?;
        let ctx = MethodContext::new(&file_token);

        if self.report(progress)? == ProgressAction::Skip {
            return Ok(FileOutcome::Skipped);
        }

        let mut reader = src_method.open(&ctx, source, OpenMode::READ)?;
        let perm = if perm == 0 { DEFAULT_PERM } else { perm };
        let mut writer = match dst_method.create(
            &ctx,
            target,
            OpenMode::WRITE | OpenMode::TRUNCATE,
            false,
            perm,
        ) {
            Ok(w) => w,
            Err(e) => {
                let _ = reader.close(&ctx);
                return Err(e);
            }
        };

        let copied = self.pump(&ctx, &file_token, reader.as_mut(), writer.as_mut(), progress);
        let closed_src = reader.close(&ctx);
        let closed_dst = writer.close(&ctx);

        match copied {
            Err(VfsError::Cancelled) if file_token.is_cancelled() && !self.token.is_cancelled() => {
                debug!(%source, %target, "file skipped mid-copy");
                progress.total_bytes_copied -= progress.bytes_copied;
                let cleanup = MethodContext::new(self.token);
                if let Err(e) = dst_method.remove(&cleanup, target) {
                    warn!(%target, error = %e, "could not remove partial file");
                }
                Ok(FileOutcome::Skipped)
            }
            Err(e) => Err(e),
            Ok(()) => {
                closed_src?;
                closed_dst?;
                Ok(FileOutcome::Copied)
            }
        }
    }

    fn pump(
        &mut self,
        ctx: &MethodContext<'_>,
        file_token: &CancellationToken,
        reader: &mut dyn MethodFile,
        writer: &mut dyn MethodFile,
        progress: &mut TransferProgress,
    ) -> VfsResult<()> {
        let mut chunks = 0usize;
        loop {
            ctx.check()?;
            let data = reader.read(ctx, self.chunk_size)?;
            if data.is_empty() {
                return Ok(());
            }
            let mut written = 0;
            while written < data.len() {
                let n = writer.write(ctx, &data[written..])?;
                if n == 0 {
                    return Err(VfsError::other("short write"));
                }
                written += n;
            }
            progress.bytes_copied += data.len() as u64;
            progress.total_bytes_copied += data.len() as u64;
            chunks += 1;
            if chunks % self.batch_size == 0 && self.report(progress)? == ProgressAction::Skip {
                file_token.cancel();
            }
        }
    }
}

/// Lexical normalization: drops empty and `.` segments, resolves `..`.
fn normalize_path(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            seg => parts.push(seg),
        }
    }
    parts
}
