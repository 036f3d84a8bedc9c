//! Local disk method (`file:`).
//!
//! Thin `std::fs` wrapper. A rooted method maps `file:/x` to `<root>/x`
//! and refuses paths that climb out of the root.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use vjob_core::{
    FileInfo, FileType, InfoOptions, Method, MethodContext, MethodFile, OpenMode, Target,
    VfsError, VfsResult,
};

/// Entries stat'ed between cancellation checks while listing.
const LIST_CHECK_EVERY: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct LocalMethod {
    root: Option<PathBuf>,
}

impl LocalMethod {
    /// Paths are used as given.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Paths resolve below `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }

    fn resolve(&self, target: &Target) -> VfsResult<PathBuf> {
        let path = Path::new(target.path());
        match &self.root {
            None => Ok(path.to_path_buf()),
            Some(root) => {
                let mut out = root.clone();
                for comp in path.components() {
                    match comp {
                        Component::Normal(part) => out.push(part),
                        Component::RootDir | Component::CurDir => {}
                        Component::ParentDir | Component::Prefix(_) => {
                            return Err(VfsError::bad_parameters(format!(
                                "path escapes root: {target}"
                            )));
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn open_options(mode: OpenMode) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(mode.contains(OpenMode::READ))
            .write(mode.contains(OpenMode::WRITE))
            .append(mode.contains(OpenMode::APPEND))
            .truncate(mode.contains(OpenMode::TRUNCATE));
        opts
    }
}

fn file_type(ft: fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::Regular
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::Other
    }
}

fn to_info(name: String, meta: &fs::Metadata, keys: &[String]) -> FileInfo {
    #[cfg(unix)]
    let perm = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    };
    #[cfg(not(unix))]
    let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };

    let kind = file_type(meta.file_type());
    let mut info = if kind.is_dir() {
        FileInfo::directory(name, perm)
    } else {
        FileInfo::file(name, meta.len(), perm)
    };
    info.kind = kind;
    info.modified = meta.modified().ok();

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        for key in keys {
            let value = match key.as_str() {
                "inode" => meta.ino(),
                "nlink" => meta.nlink(),
                "uid" => u64::from(meta.uid()),
                "gid" => u64::from(meta.gid()),
                _ => continue,
            };
            info.metadata.insert(key.clone(), value.to_string());
        }
    }
    #[cfg(not(unix))]
    let _ = keys;
    info
}

fn stat(path: &Path, options: InfoOptions) -> std::io::Result<fs::Metadata> {
    if options.contains(InfoOptions::FOLLOW_LINKS) {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}

impl Method for LocalMethod {
    fn name(&self) -> &str {
        "file"
    }

    fn open(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        mode: OpenMode,
    ) -> VfsResult<Box<dyn MethodFile>> {
        ctx.check()?;
        let path = self.resolve(target)?;
        if path.is_dir() {
            return Err(VfsError::is_a_directory(target.as_str()));
        }
        let file = Self::open_options(mode)
            .open(&path)
            .map_err(|e| VfsError::from_io(e, target.as_str()))?;
        Ok(Box::new(LocalFile { file, target: target.clone() }))
    }

    fn create(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        mode: OpenMode,
        exclusive: bool,
        perm: u32,
    ) -> VfsResult<Box<dyn MethodFile>> {
        ctx.check()?;
        let path = self.resolve(target)?;
        let mut opts = Self::open_options(mode);
        if exclusive {
            opts.create_new(true);
        } else {
            opts.create(true).truncate(!mode.contains(OpenMode::APPEND));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;
        let file = opts
            .open(&path)
            .map_err(|e| VfsError::from_io(e, target.as_str()))?;
        Ok(Box::new(LocalFile { file, target: target.clone() }))
    }

    fn get_file_info(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        options: InfoOptions,
        keys: &[String],
    ) -> VfsResult<FileInfo> {
        ctx.check()?;
        let path = self.resolve(target)?;
        let meta = stat(&path, options).map_err(|e| VfsError::from_io(e, target.as_str()))?;
        Ok(to_info(target.name().to_string(), &meta, keys))
    }

    fn read_directory(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        options: InfoOptions,
    ) -> VfsResult<Vec<FileInfo>> {
        ctx.check()?;
        let path = self.resolve(target)?;
        if !path.is_dir() {
            return Err(match path.exists() {
                true => VfsError::not_a_directory(target.as_str()),
                false => VfsError::not_found(target.as_str()),
            });
        }
        let dir = fs::read_dir(&path).map_err(|e| VfsError::from_io(e, target.as_str()))?;
        let mut out = Vec::new();
        for (i, entry) in dir.enumerate() {
            if i % LIST_CHECK_EVERY == 0 {
                ctx.check()?;
            }
            let entry = entry.map_err(|e| VfsError::from_io(e, target.as_str()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match stat(&entry.path(), options) {
                Ok(meta) => meta,
                // raced with a delete
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(VfsError::from_io(e, target.join(&name).as_str())),
            };
            out.push(to_info(name, &meta, &[]));
        }
        Ok(out)
    }

    fn remove(&self, ctx: &MethodContext<'_>, target: &Target) -> VfsResult<()> {
        ctx.check()?;
        let path = self.resolve(target)?;
        let meta = fs::symlink_metadata(&path).map_err(|e| VfsError::from_io(e, target.as_str()))?;
        let res = if meta.is_dir() { fs::remove_dir(&path) } else { fs::remove_file(&path) };
        res.map_err(|e| VfsError::from_io(e, target.as_str()))
    }

    fn make_directory(&self, ctx: &MethodContext<'_>, target: &Target, perm: u32) -> VfsResult<()> {
        ctx.check()?;
        let path = self.resolve(target)?;
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;
        builder
            .create(&path)
            .map_err(|e| VfsError::from_io(e, target.as_str()))
    }
}

struct LocalFile {
    file: File,
    target: Target,
}

impl MethodFile for LocalFile {
    fn read(&mut self, ctx: &MethodContext<'_>, len: usize) -> VfsResult<Vec<u8>> {
        ctx.check()?;
        let mut buf = vec![0u8; len];
        let n = self
            .file
            .read(&mut buf)
            .map_err(|e| VfsError::from_io(e, self.target.as_str()))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&mut self, ctx: &MethodContext<'_>, data: &[u8]) -> VfsResult<usize> {
        ctx.check()?;
        self.file
            .write(data)
            .map_err(|e| VfsError::from_io(e, self.target.as_str()))
    }

    fn close(mut self: Box<Self>, _ctx: &MethodContext<'_>) -> VfsResult<()> {
        self.file
            .flush()
            .map_err(|e| VfsError::from_io(e, self.target.as_str()))
    }
}
