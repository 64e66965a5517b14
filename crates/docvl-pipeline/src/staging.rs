use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use docvl_core::{OcrError, Result};

/// Extension used when the upload name carries none we recognize.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Longest extension accepted from an upload name.
const MAX_EXTENSION_LEN: usize = 8;

/// Image data presented to the model as a path on disk.
///
/// A staged upload owns its temporary file and deletes it when released or
/// dropped, so every exit path from the processing call cleans up. A
/// deletion failure is logged and never escalated. A caller-supplied path
/// is borrowed: no copy, no cleanup.
#[derive(Debug)]
pub struct StagedInput {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl StagedInput {
    /// Wrap a path owned by someone else.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this input owns a temporary file.
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Delete the temporary file now. Equivalent to dropping.
    pub fn release(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        match temp.close() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed staged input"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to delete staged input"
            ),
        }
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Writes request bytes to temporary files for the model to read.
#[derive(Debug, Clone, Default)]
pub struct InputStager {
    dir: Option<PathBuf>,
}

impl InputStager {
    /// Stage into `dir`, or the system temp dir when `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Write `bytes` to a new temporary file whose extension follows
    /// `filename`. Write failures surface as `OcrError::Staging`.
    pub fn stage_bytes(&self, bytes: &[u8], filename: Option<&str>) -> Result<StagedInput> {
        let suffix = format!(".{}", extension_for(filename));
        let mut builder = tempfile::Builder::new();
        builder.prefix("docvl-").suffix(&suffix);

        let staging = |e: std::io::Error| OcrError::Staging { source: e };
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(staging)?;

        file.write_all(bytes).map_err(staging)?;
        file.flush().map_err(staging)?;

        // Close our handle; the path stays until the TempPath goes away.
        let temp = file.into_temp_path();
        let path = temp.to_path_buf();

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "staged input");

        Ok(StagedInput {
            path,
            temp: Some(temp),
        })
    }
}

/// Extension (without dot) to give a staged file, derived from the original
/// upload name.
pub fn extension_for(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or(DEFAULT_EXTENSION)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_filename() {
        assert_eq!(extension_for(Some("scan.png")), "png");
        assert_eq!(extension_for(Some("archive.tar.TIFF")), "TIFF");
        assert_eq!(extension_for(Some("noext")), DEFAULT_EXTENSION);
        assert_eq!(extension_for(Some("weird.p ng")), DEFAULT_EXTENSION);
        assert_eq!(extension_for(Some("long.abcdefghijk")), DEFAULT_EXTENSION);
        assert_eq!(extension_for(None), DEFAULT_EXTENSION);
    }

    #[test]
    fn test_stage_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let stager = InputStager::new(Some(dir.path().to_path_buf()));

        let staged = stager.stage_bytes(b"\x89PNG", Some("page.png")).unwrap();
        let path = staged.path().to_path_buf();
        assert!(staged.is_temporary());
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG");

        staged.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = InputStager::new(Some(dir.path().to_path_buf()));
        let path = {
            let staged = stager.stage_bytes(b"data", None).unwrap();
            staged.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_already_deleted_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let stager = InputStager::new(Some(dir.path().to_path_buf()));
        let staged = stager.stage_bytes(b"data", Some("a.jpg")).unwrap();
        std::fs::remove_file(staged.path()).unwrap();
        staged.release();
    }

    #[test]
    fn test_existing_path_is_untouched() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let staged = StagedInput::existing(file.path());
        assert!(!staged.is_temporary());
        staged.release();
        assert!(file.path().exists());
    }

    #[test]
    fn test_missing_staging_dir_is_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let stager = InputStager::new(Some(dir.path().join("missing")));
        let err = stager.stage_bytes(b"data", None).unwrap_err();
        assert!(matches!(err, OcrError::Staging { .. }));
    }
}
