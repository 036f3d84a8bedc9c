//! In-memory method (`mem:`).
//!
//! A flat map from normalized path to node. Directories are explicit
//! nodes; the root always exists. File contents are shared between the
//! tree and open files, so writes are visible to later opens.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use vjob_core::{
    FileInfo, FileType, InfoOptions, Method, MethodContext, MethodFile, OpenMode, Target,
    VfsError, VfsResult,
};

enum Node {
    File {
        data: Arc<Mutex<Vec<u8>>>,
        perm: u32,
        modified: SystemTime,
    },
    Dir {
        perm: u32,
        modified: SystemTime,
    },
}

impl Node {
    fn info(&self, name: &str) -> FileInfo {
        match self {
            Node::File { data, perm, modified } => {
                let mut info = FileInfo::file(name, data.lock().len() as u64, *perm);
                info.modified = Some(*modified);
                info
            }
            Node::Dir { perm, modified } => {
                let mut info = FileInfo::directory(name, *perm);
                info.modified = Some(*modified);
                info
            }
        }
    }
}

/// Strip trailing slashes and collapse empty segments; root is "/".
fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

pub struct MemoryMethod {
    tree: RwLock<BTreeMap<String, Node>>,
}

impl Default for MemoryMethod {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMethod {
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(
            "/".to_string(),
            Node::Dir { perm: 0o755, modified: SystemTime::now() },
        );
        Self { tree: RwLock::new(tree) }
    }

    /// Create (or replace) a file, creating missing parent directories.
    pub fn insert_file(&self, path: &str, contents: &[u8]) -> VfsResult<()> {
        let path = normalize(path);
        let mut tree = self.tree.write();
        if let Some(parent) = parent_of(&path) {
            mkdir_all(&mut tree, parent)?;
        }
        if matches!(tree.get(&path), Some(Node::Dir { .. })) {
            return Err(VfsError::is_a_directory(path));
        }
        tree.insert(
            path,
            Node::File {
                data: Arc::new(Mutex::new(contents.to_vec())),
                perm: 0o644,
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Create a directory and any missing parents.
    pub fn create_dir_all(&self, path: &str) -> VfsResult<()> {
        mkdir_all(&mut self.tree.write(), &normalize(path))
    }

    /// Snapshot of a file's contents.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.tree.read().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.lock().clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.read().contains_key(&normalize(path))
    }

    fn open_node(&self, path: &str, mode: OpenMode) -> VfsResult<Box<dyn MethodFile>> {
        let tree = self.tree.read();
        match tree.get(path) {
            Some(Node::File { data, .. }) => {
                if mode.contains(OpenMode::TRUNCATE) {
                    data.lock().clear();
                }
                Ok(Box::new(MemoryFile { data: data.clone(), pos: 0, mode }))
            }
            Some(Node::Dir { .. }) => Err(VfsError::is_a_directory(path)),
            None => Err(VfsError::not_found(path)),
        }
    }
}

fn mkdir_all(tree: &mut BTreeMap<String, Node>, path: &str) -> VfsResult<()> {
    match tree.get(path) {
        Some(Node::Dir { .. }) => return Ok(()),
        Some(Node::File { .. }) => return Err(VfsError::not_a_directory(path)),
        None => {}
    }
    if let Some(parent) = parent_of(path) {
        mkdir_all(tree, parent)?;
    }
    tree.insert(
        path.to_string(),
        Node::Dir { perm: 0o755, modified: SystemTime::now() },
    );
    Ok(())
}

fn check_parent(tree: &BTreeMap<String, Node>, path: &str) -> VfsResult<()> {
    let Some(parent) = parent_of(path) else {
        return Err(VfsError::already_exists(path));
    };
    match tree.get(parent) {
        Some(Node::Dir { .. }) => Ok(()),
        Some(Node::File { .. }) => Err(VfsError::not_a_directory(parent)),
        None => Err(VfsError::not_found(parent)),
    }
}

impl Method for MemoryMethod {
    fn name(&self) -> &str {
        "mem"
    }

    fn open(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        mode: OpenMode,
    ) -> VfsResult<Box<dyn MethodFile>> {
        ctx.check()?;
        self.open_node(&normalize(target.path()), mode)
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
        let path = normalize(target.path());
        let mut tree = self.tree.write();
        match tree.get(&path) {
            Some(Node::Dir { .. }) => return Err(VfsError::is_a_directory(path)),
            Some(Node::File { .. }) if exclusive => return Err(VfsError::already_exists(path)),
            Some(Node::File { data, .. }) => {
                data.lock().clear();
                return Ok(Box::new(MemoryFile { data: data.clone(), pos: 0, mode }));
            }
            None => check_parent(&tree, &path)?,
        }
        let data = Arc::new(Mutex::new(Vec::new()));
        tree.insert(
            path,
            Node::File { data: data.clone(), perm, modified: SystemTime::now() },
        );
        Ok(Box::new(MemoryFile { data, pos: 0, mode }))
    }

    fn get_file_info(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        _options: InfoOptions,
        keys: &[String],
    ) -> VfsResult<FileInfo> {
        ctx.check()?;
        let path = normalize(target.path());
        let tree = self.tree.read();
        let node = tree.get(&path).ok_or_else(|| VfsError::not_found(path.as_str()))?;
        let mut info = node.info(name_of(&path));
        if keys.iter().any(|k| k == "path") {
            info.metadata.insert("path".into(), path.clone());
        }
        Ok(info)
    }

    fn read_directory(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        _options: InfoOptions,
    ) -> VfsResult<Vec<FileInfo>> {
        ctx.check()?;
        let path = normalize(target.path());
        let tree = self.tree.read();
        match tree.get(&path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(VfsError::not_a_directory(path)),
            None => return Err(VfsError::not_found(path)),
        }
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        Ok(tree
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
            .map(|(k, node)| node.info(&k[prefix.len()..]))
            .collect())
    }

    fn remove(&self, ctx: &MethodContext<'_>, target: &Target) -> VfsResult<()> {
        ctx.check()?;
        let path = normalize(target.path());
        let mut tree = self.tree.write();
        match tree.get(&path) {
            None => return Err(VfsError::not_found(path)),
            Some(Node::Dir { .. }) => {
                if path == "/" {
                    return Err(VfsError::permission_denied(path));
                }
                let prefix = format!("{path}/");
                if tree.range(prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&prefix)) {
                    return Err(VfsError::other(format!("directory not empty: {path}")));
                }
            }
            Some(Node::File { .. }) => {}
        }
        tree.remove(&path);
        Ok(())
    }

    fn make_directory(&self, ctx: &MethodContext<'_>, target: &Target, perm: u32) -> VfsResult<()> {
        ctx.check()?;
        let path = normalize(target.path());
        let mut tree = self.tree.write();
        if tree.contains_key(&path) {
            return Err(VfsError::already_exists(path));
        }
        check_parent(&tree, &path)?;
        tree.insert(path, Node::Dir { perm, modified: SystemTime::now() });
        Ok(())
    }
}

struct MemoryFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
    mode: OpenMode,
}

impl MethodFile for MemoryFile {
    fn read(&mut self, ctx: &MethodContext<'_>, len: usize) -> VfsResult<Vec<u8>> {
        ctx.check()?;
        let data = self.data.lock();
        let start = self.pos.min(data.len());
        let end = (start + len).min(data.len());
        self.pos = end;
        Ok(data[start..end].to_vec())
    }

    fn write(&mut self, ctx: &MethodContext<'_>, buf: &[u8]) -> VfsResult<usize> {
        ctx.check()?;
        let mut data = self.data.lock();
        if self.mode.contains(OpenMode::APPEND) {
            self.pos = data.len();
        }
        let end = self.pos + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn close(self: Box<Self>, _ctx: &MethodContext<'_>) -> VfsResult<()> {
        Ok(())
    }
}
