//! Local filesystem reading and enumeration.
//!
//! Small files are read directly; large files are memory-mapped. Media
//! types are guessed from the extension, which also decides whether the
//! built-in extractor can handle the file.

// Memory mapping requires unsafe but is well-documented and safe for read-only access
#![allow(unsafe_code)]

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, Result};

/// Threshold for using memory mapping (1MB).
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Maximum file size to ingest (1GB).
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Reads a file's bytes, memory-mapping large files.
///
/// # Errors
///
/// Returns an error when the file is missing, unreadable, or oversized.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    if size > MAX_FILE_SIZE {
        return Err(Error::permanent(format!(
            "file too large: {} bytes (max {MAX_FILE_SIZE})",
            size
        )));
    }

    if size >= MMAP_THRESHOLD {
        // SAFETY: the mapping is read-only and dropped before the file.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(mmap.to_vec())
    } else {
        Ok(std::fs::read(path)?)
    }
}

/// Guesses a media type from the file extension.
#[must_use]
pub fn media_type_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "doc" | "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" | "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" | "pptx" => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Enumerates files under a path.
///
/// Directories are walked iteratively with an explicit stack; symlink
/// cycles are avoided by tracking visited canonical paths. Hidden entries
/// are skipped.
///
/// # Errors
///
/// Returns an error when the root path does not exist.
pub fn enumerate_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::permanent(format!(
            "path not found: {}",
            root.display()
        )));
    }

    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    let mut visited: HashSet<PathBuf> = HashSet::new();

    while let Some(dir) = stack.pop() {
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.clone());
        if !visited.insert(canonical) {
            continue;
        }

        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_small_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_file(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(err, Error::PermanentIo { .. }));
    }

    #[test]
    fn test_media_type_mapping() {
        assert_eq!(media_type_for_path(Path::new("a.txt")), "text/plain");
        assert_eq!(media_type_for_path(Path::new("a.md")), "text/markdown");
        assert_eq!(media_type_for_path(Path::new("a.csv")), "text/csv");
        assert_eq!(media_type_for_path(Path::new("a.pdf")), "application/pdf");
        assert_eq!(
            media_type_for_path(Path::new("noext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_enumerate_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.txt");
        std::fs::write(&path, b"x").unwrap();
        assert_eq!(enumerate_files(&path, true).unwrap(), vec![path]);
    }

    #[test]
    fn test_enumerate_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("sub/deep/c.txt"), b"c").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();

        let files = enumerate_files(dir.path(), true).unwrap();
        assert_eq!(files.len(), 3);

        let flat = enumerate_files(dir.path(), false).unwrap();
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn test_enumerate_missing_root() {
        let err = enumerate_files(Path::new("/no/such/dir"), true).unwrap_err();
        assert!(matches!(err, Error::PermanentIo { .. }));
    }
}
