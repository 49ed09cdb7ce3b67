//! Scoped on-disk staging of input documents

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where input bytes live while the document is parsed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Staging {
    /// Parse straight from the request buffer
    #[default]
    Memory,
    /// Write the bytes to a temporary file inside the given directory first
    TempDir(PathBuf),
}

/// A document written to a temporary file.
///
/// The file is deleted when this value is dropped, so whoever owns it owns
/// the cleanup on every exit path.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
}

impl StagedFile {
    /// Write `data` to a fresh `.pdf` temp file inside `dir`
    pub fn create(dir: &Path, data: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("profile-photo-")
            .suffix(".pdf")
            .tempfile_in(dir)?;
        file.write_all(data)?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), bytes = data.len(), "Staged document");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        tracing::trace!(path = %self.file.path().display(), "Removing staged document");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedFile::create(dir.path(), b"%PDF-1.4").unwrap();
        let path = staged.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
        assert_eq!(path.extension().unwrap(), "pdf");

        drop(staged);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_staging_into_missing_dir_fails() {
        let result = StagedFile::create(Path::new("/nonexistent/stage/dir"), b"%PDF");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
