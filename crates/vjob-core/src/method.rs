//! Method abstraction: the blocking backend the engine drives.
//!
//! A `Method` implements one scheme (`mem:`, `file:`, an archive, a network
//! share). Every call is synchronous and may block for as long as the
//! backend needs; the engine runs it on a worker thread so the caller never
//! waits on it.
//!
//! # Contract
//!
//! - Long-running calls poll `ctx.check()` at convenient points and return
//!   `VfsError::Cancelled` once it fails. The engine never interrupts a call.
//! - Unsupported operations return `VfsError::NotSupported`.
//! - Methods must be `Send + Sync`; a single instance serves every worker.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cancel::CancellationToken;
use crate::error::{VfsError, VfsResult};
use crate::target::Target;
use crate::types::{FileInfo, InfoOptions, OpenMode};

/// Per-call context handed to a method.
pub struct MethodContext<'a> {
    token: &'a CancellationToken,
}

impl<'a> MethodContext<'a> {
    pub fn new(token: &'a CancellationToken) -> Self {
        Self { token }
    }

    /// The job's cancellation token.
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        self.token
    }

    /// Cooperative check point.
    #[inline]
    pub fn check(&self) -> VfsResult<()> {
        self.token.check()
    }
}

/// An open file inside a method.
pub trait MethodFile: Send {
    /// Read up to `len` bytes. An empty vector means end of file.
    fn read(&mut self, ctx: &MethodContext<'_>, len: usize) -> VfsResult<Vec<u8>>;

    /// Write `data`, returning the number of bytes written.
    fn write(&mut self, ctx: &MethodContext<'_>, data: &[u8]) -> VfsResult<usize>;

    /// Flush and release the file.
    fn close(self: Box<Self>, ctx: &MethodContext<'_>) -> VfsResult<()>;
}

/// A filesystem backend.
pub trait Method: Send + Sync {
    /// Scheme this method serves (for logs).
    fn name(&self) -> &str;

    /// Open an existing file.
    fn open(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        mode: OpenMode,
    ) -> VfsResult<Box<dyn MethodFile>>;

    /// Create a file. With `exclusive`, fail if it already exists.
    fn create(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        mode: OpenMode,
        exclusive: bool,
        perm: u32,
    ) -> VfsResult<Box<dyn MethodFile>>;

    /// Stat a single target. `keys` are extra metadata keys the caller
    /// asked for; unknown keys are ignored.
    fn get_file_info(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        options: InfoOptions,
        keys: &[String],
    ) -> VfsResult<FileInfo>;

    /// List a directory (unsorted, unfiltered).
    fn read_directory(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        options: InfoOptions,
    ) -> VfsResult<Vec<FileInfo>>;

    /// Remove a file or empty directory.
    fn remove(&self, _ctx: &MethodContext<'_>, _target: &Target) -> VfsResult<()> {
        Err(VfsError::NotSupported("remove"))
    }

    /// Create a directory.
    fn make_directory(
        &self,
        _ctx: &MethodContext<'_>,
        _target: &Target,
        _perm: u32,
    ) -> VfsResult<()> {
        Err(VfsError::NotSupported("make_directory"))
    }
}

/// Maps a target to the method serving it.
///
/// The engine only consumes this; loading methods from plugins is the
/// resolver's business.
pub trait MethodResolver: Send + Sync {
    fn resolve(&self, target: &Target) -> VfsResult<Arc<dyn Method>>;
}

/// Scheme → method table.
#[derive(Default)]
pub struct MethodTable {
    methods: RwLock<HashMap<String, Arc<dyn Method>>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` for `scheme`, replacing any previous entry.
    pub fn register(&self, scheme: impl Into<String>, method: Arc<dyn Method>) {
        self.methods.write().insert(scheme.into(), method);
    }

    /// Builder-style [`MethodTable::register`].
    pub fn with(self, scheme: impl Into<String>, method: Arc<dyn Method>) -> Self {
        self.register(scheme, method);
        self
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.methods.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl MethodResolver for MethodTable {
    fn resolve(&self, target: &Target) -> VfsResult<Arc<dyn Method>> {
        self.methods
            .read()
            .get(target.scheme())
            .cloned()
            .ok_or_else(|| VfsError::UnknownScheme(target.scheme().to_string()))
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("schemes", &self.schemes())
            .finish()
    }
}

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

struct OpenFile {
    id: u64,
    target: Target,
    mode: OpenMode,
    /// `None` once closed.
    file: Mutex<Option<Box<dyn MethodFile>>>,
}

/// Caller-side handle to an open file.
///
/// Cloning shares the same open file. Operations on one handle from
/// concurrent jobs serialize on the handle; ordering them is the caller's
/// job.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<OpenFile>,
}

impl FileHandle {
    /// Wrap a freshly opened method file.
    pub fn new(target: Target, mode: OpenMode, file: Box<dyn MethodFile>) -> Self {
        Self {
            inner: Arc::new(OpenFile {
                id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
                target,
                mode,
                file: Mutex::new(Some(file)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    pub fn is_closed(&self) -> bool {
        self.inner.file.lock().is_none()
    }

    /// Run `f` against the open file; `InvalidHandle` once closed.
    pub fn with_file<R>(
        &self,
        f: impl FnOnce(&mut dyn MethodFile) -> VfsResult<R>,
    ) -> VfsResult<R> {
        let mut guard = self.inner.file.lock();
        match guard.as_mut() {
            Some(file) => f(file.as_mut()),
            None => Err(VfsError::InvalidHandle),
        }
    }

    /// Detach the method file for closing. A second call fails.
    pub fn take(&self) -> VfsResult<Box<dyn MethodFile>> {
        self.inner.file.lock().take().ok_or(VfsError::InvalidHandle)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.inner.id)
            .field("target", &self.inner.target)
            .field("mode", &self.inner.mode)
            .finish()
    }
}
