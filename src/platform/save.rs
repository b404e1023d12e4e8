//! Save targets backing the download operation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A platform facility that can persist a downloaded file.
pub trait SaveTarget: Send + Sync {
    fn save(&self, filename: &str, mime: &str, bytes: &[u8]) -> Result<()>;
}

/// Default target: writes into a directory on the local file system.
pub struct FileSaveTarget {
    dir: PathBuf,
}

impl FileSaveTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSaveTarget { dir: dir.into() }
    }
}

impl SaveTarget for FileSaveTarget {
    fn save(&self, filename: &str, _mime: &str, bytes: &[u8]) -> Result<()> {
        // Only the final path component is honored; a filename must not
        // escape the target directory.
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| Error::Save {
                filename: filename.to_string(),
                reason: "filename has no final path component".into(),
            })?;
        let path = self.dir.join(name);
        std::fs::write(&path, bytes).map_err(|e| Error::Save {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;
        log::debug!("saved {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

/// A file recorded by [`MemorySaveTarget`]
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFile {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// In-memory target that records saves, used in tests and as a safe default
/// for hosts without a writable file system.
#[derive(Default)]
pub struct MemorySaveTarget {
    saved: Mutex<Vec<SavedFile>>,
}

impl MemorySaveTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<SavedFile> {
        self.saved.lock().unwrap().clone()
    }
}

impl SaveTarget for MemorySaveTarget {
    fn save(&self, filename: &str, mime: &str, bytes: &[u8]) -> Result<()> {
        self.saved.lock().unwrap().push(SavedFile {
            filename: filename.to_string(),
            mime: mime.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_target_records_saves() {
        let target = MemorySaveTarget::new();
        target.save("chart.png", "image/png", &[1, 2, 3]).unwrap();
        let saved = target.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].filename, "chart.png");
        assert_eq!(saved[0].mime, "image/png");
        assert_eq!(saved[0].bytes, vec![1, 2, 3]);
    }

    #[test]
    fn file_target_strips_directory_components() {
        let dir = std::env::temp_dir().join("svgshot-save-test");
        std::fs::create_dir_all(&dir).unwrap();
        let target = FileSaveTarget::new(&dir);
        target
            .save("../escape/../chart.svg", "image/svg+xml", b"<svg/>")
            .unwrap();
        let written = std::fs::read(dir.join("chart.svg")).unwrap();
        assert_eq!(written, b"<svg/>");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
