//! Filesystem capability used by the resolvers.
//!
//! Every lookup in this crate goes through a [`Filesystem`] so the engine
//! never touches the process working directory. Paths are always joined
//! onto an explicit base directory by the caller.
//!
//! | Implementation | Backing store |
//! |----------------|---------------|
//! | [`OsFilesystem`] | The real filesystem via `std::fs` |
//! | [`MemoryFilesystem`] | An in-memory map of path → contents |
//!
//! # Example
//!
//! ```
//! use specplus::fs::{Filesystem, MemoryFilesystem};
//! use std::path::Path;
//!
//! let fs = MemoryFilesystem::new()
//!     .with_file("/project/site.yml", "- include: web.yml\n")
//!     .with_dir("/project/roles/nginx");
//!
//! assert!(fs.is_dir(Path::new("/project/roles")));
//! assert_eq!(fs.list_dir(Path::new("/project/roles")).unwrap().len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of a directory tree.
///
/// Implementations must be `Send + Sync` so a single index can be shared
/// when callers evaluate several roles or hosts in parallel.
pub trait Filesystem: Send + Sync {
    /// Reads a whole file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Lists the immediate children of a directory, sorted by path.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Returns `true` if `path` is an existing directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Returns the size of a file in bytes.
    fn file_size(&self, path: &Path) -> io::Result<u64>;
}

/// [`Filesystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }
}

/// [`Filesystem`] held entirely in memory.
///
/// Directories are implied by the files beneath them; empty directories
/// can be declared with [`with_dir`](Self::with_dir).
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryFilesystem {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given contents.
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.insert_file(path, contents);
        self
    }

    /// Declares a directory, which may stay empty.
    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.insert_dir(path);
        self
    }

    /// Adds or replaces a file in place.
    pub fn insert_file(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        let path = path.into();
        if let Some(parent) = path.parent() {
            self.insert_dir(parent);
        }
        self.files.insert(path, contents.into());
    }

    /// Declares a directory and all of its ancestors.
    pub fn insert_dir(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl Filesystem for MemoryFilesystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| not_found(path))
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.dirs.contains(path) {
            return Err(not_found(path));
        }

        let children: BTreeSet<PathBuf> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();

        Ok(children.into_iter().collect())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .get(path)
            .map(|contents| contents.len() as u64)
            .ok_or_else(|| not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_list_dir_mixes_files_and_dirs() {
        let fs = MemoryFilesystem::new()
            .with_file("/p/roles/a/tasks/main.yml", "---\n")
            .with_dir("/p/roles/b")
            .with_file("/p/roles/README", "roles");

        let children = fs.list_dir(Path::new("/p/roles")).unwrap();
        assert_eq!(
            children,
            vec![
                PathBuf::from("/p/roles/README"),
                PathBuf::from("/p/roles/a"),
                PathBuf::from("/p/roles/b"),
            ]
        );
        assert!(fs.is_dir(Path::new("/p/roles/a/tasks")));
        assert!(!fs.is_dir(Path::new("/p/roles/README")));
    }

    #[test]
    fn test_memory_missing_paths() {
        let fs = MemoryFilesystem::new();
        assert!(fs.read_to_string(Path::new("/nope")).is_err());
        assert!(fs.list_dir(Path::new("/nope")).is_err());
        assert!(fs.file_size(Path::new("/nope")).is_err());
    }

    #[test]
    fn test_memory_file_size() {
        let fs = MemoryFilesystem::new().with_file("/p/spec/a_spec.rb", "\n");
        assert_eq!(fs.file_size(Path::new("/p/spec/a_spec.rb")).unwrap(), 1);
    }

    #[test]
    fn test_os_filesystem_lists_sorted() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.yml"), "b").unwrap();
        std::fs::write(temp_dir.path().join("a.yml"), "aa").unwrap();
        std::fs::create_dir(temp_dir.path().join("c")).unwrap();

        let fs = OsFilesystem;
        let children = fs.list_dir(temp_dir.path()).unwrap();
        assert_eq!(children.len(), 3);
        assert!(children[0].ends_with("a.yml"));
        assert!(children[2].ends_with("c"));
        assert!(fs.is_dir(&children[2]));
        assert_eq!(fs.file_size(&children[0]).unwrap(), 2);
        assert_eq!(fs.read_to_string(&children[1]).unwrap(), "b");
    }
}
