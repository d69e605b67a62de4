//! Schema document discovery

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;
use crate::schema::SchemaDescriptor;

/// Lists schema document files under a set of directories
pub trait SchemaFileEnumerator: Send + Sync {
    /// Return every file with the given extension below `directories`.
    ///
    /// Only existing directories are passed in.
    fn files(&self, directories: &[PathBuf], extension: &str) -> Result<Vec<PathBuf>>;
}

/// Recursive directory walk, sorted by file name for a stable scan order
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkDirEnumerator;

impl SchemaFileEnumerator for WalkDirEnumerator {
    fn files(&self, directories: &[PathBuf], extension: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for directory in directories {
            for entry in WalkDir::new(directory)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if path.extension().map(|e| e != extension).unwrap_or(true) {
                    continue;
                }
                files.push(path.to_path_buf());
            }
        }

        Ok(files)
    }
}

/// Keep only the directories that exist
pub(crate) fn existing_directories(directories: &[PathBuf]) -> Vec<PathBuf> {
    directories
        .iter()
        .filter(|d| d.is_dir())
        .cloned()
        .collect()
}

/// Read every listed document, skipping empty ones
pub(crate) fn read_descriptors(files: &[PathBuf]) -> Result<Vec<SchemaDescriptor>> {
    let mut descriptors = Vec::with_capacity(files.len());

    for path in files {
        match SchemaDescriptor::read(path)? {
            Some(descriptor) => descriptors.push(descriptor),
            None => debug!(path = %path.display(), "skipping empty schema document"),
        }
    }

    Ok(descriptors)
}

/// Convenience for callers that want to know what a directory would yield
pub fn discover(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    WalkDirEnumerator.files(&existing_directories(&[directory.to_path_buf()]), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_finds_nested_schema_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("acme/orders")).unwrap();
        fs::write(dir.path().join("acme/orders/order.avsc"), "{}").unwrap();
        fs::write(dir.path().join("acme/customer.avsc"), "{}").unwrap();
        fs::write(dir.path().join("acme/readme.md"), "docs").unwrap();

        let files = discover(dir.path(), "avsc").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["customer.avsc", "order.avsc"]);
    }

    #[test]
    fn test_missing_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        let files = discover(&dir.path().join("absent"), "avsc").unwrap();
        assert!(files.is_empty());
    }
}
