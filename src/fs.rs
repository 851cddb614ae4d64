//! In-memory output filesystem
//!
//! Build output is written here instead of to disk and served straight from
//! memory. Paths are normalised on the way in: both `/` and `\` separate
//! segments, `.` is dropped and `..` pops a segment, so `C:\out\app.js`
//! and `/C:/out/app.js` address the same entry.

use crate::compiler::{Compiler, CompilerDescriptor};
use crate::error::{DevServeError, FsError, Result};
use hyper::body::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared handle to the filesystem
pub type SharedFs = Arc<MemoryFs>;

/// Result of a `stat` lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStat {
    Missing,
    File { size: usize },
    Directory,
}

impl FileStat {
    pub const fn exists(self) -> bool {
        !matches!(self, Self::Missing)
    }

    pub const fn is_file(self) -> bool {
        matches!(self, Self::File { .. })
    }

    pub const fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Bytes),
}

/// Thread-safe in-memory filesystem
#[derive(Debug)]
pub struct MemoryFs {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Look up a path without failing on missing entries
    pub fn stat(&self, path: &str) -> FileStat {
        let key = normalize(path);
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(&key) {
            Some(Node::Directory) => FileStat::Directory,
            Some(Node::File(data)) => FileStat::File { size: data.len() },
            None => FileStat::Missing,
        }
    }

    /// Read a whole file. Cloning `Bytes` is cheap, no copy is made.
    pub fn read_file(&self, path: &str) -> std::result::Result<Bytes, FsError> {
        let key = normalize(path);
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(&key) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Directory) => Err(FsError::IsDirectory(key)),
            None => Err(FsError::NotFound(key)),
        }
    }

    /// Write a file. The parent directory must already exist.
    pub fn write_file(
        &self,
        path: &str,
        data: impl Into<Bytes>,
    ) -> std::result::Result<(), FsError> {
        let key = normalize(path);
        let parent = parent_of(&key);
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        match nodes.get(parent) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => return Err(FsError::NotDirectory(parent.to_string())),
            None => return Err(FsError::NotFound(parent.to_string())),
        }
        if matches!(nodes.get(&key), Some(Node::Directory)) {
            return Err(FsError::IsDirectory(key));
        }

        nodes.insert(key, Node::File(data.into()));
        Ok(())
    }

    /// Create a directory and any missing ancestors
    pub fn mkdir_p(&self, path: &str) -> std::result::Result<(), FsError> {
        let key = normalize(path);
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        let mut current = String::new();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match nodes.get(&current) {
                Some(Node::Directory) => {}
                Some(Node::File(_)) => return Err(FsError::NotDirectory(current)),
                None => {
                    nodes.insert(current.clone(), Node::Directory);
                }
            }
        }
        Ok(())
    }

    /// Remove a file, or a directory with everything below it
    pub fn remove(&self, path: &str) -> std::result::Result<(), FsError> {
        let key = normalize(path);
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        match nodes.remove(&key) {
            None => Err(FsError::NotFound(key)),
            Some(Node::File(_)) => Ok(()),
            Some(Node::Directory) => {
                let prefix = if key == "/" { key.clone() } else { format!("{key}/") };
                nodes.retain(|k, _| !k.starts_with(&prefix));
                if key == "/" {
                    nodes.insert(key, Node::Directory);
                }
                Ok(())
            }
        }
    }

    /// Drop everything except the root directory
    pub fn clear(&self) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.clear();
        nodes.insert("/".to_string(), Node::Directory);
    }

    /// Every file and directory strictly below `path`, sorted
    pub fn entries_below(&self, path: &str) -> Vec<String> {
        let key = normalize(path);
        let prefix = if key == "/" { key } else { format!("{key}/") };
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| path.len() > prefix.len())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// All file paths, sorted
    pub fn files(&self) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Canonical key for `path`: `/`-separated, rooted, dot segments resolved
pub(crate) fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

fn parent_of(key: &str) -> &str {
    match key.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &key[..idx],
    }
}

/// Check whether a configured output path is absolute on either POSIX or
/// Windows, independent of the host platform
pub fn is_absolute_path(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with("\\\\") {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Install the in-memory filesystem as the compiler's output target
///
/// A single compiler that already writes to a `MemoryFs` keeps it; anything
/// else gets a fresh one. Relative output paths are a fatal configuration
/// error.
pub fn set_fs(compiler: &dyn Compiler) -> Result<SharedFs> {
    let output_path = compiler.descriptor().output_path();
    if !is_absolute_path(output_path) {
        return Err(DevServeError::Config(
            "`output.path` needs to be an absolute path or `/`.".to_string(),
        ));
    }

    let existing = match compiler.descriptor() {
        CompilerDescriptor::Single(_) => compiler.output_file_system(),
        CompilerDescriptor::Composite { .. } => None,
    };

    let fs = existing.unwrap_or_else(|| {
        let fs = Arc::new(MemoryFs::new());
        compiler.set_output_file_system(Arc::clone(&fs));
        fs
    });

    Ok(fs)
}
