#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use table_profiler::{config::AnalysisConfig, pipeline::Upload};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Loads a fixture as an upload, deriving the MIME type from its extension.
pub fn fixture_upload(name: &str) -> Upload {
    let path = fixture_path(name);
    let bytes = fs::read(&path).expect("read fixture");
    Upload::new(
        name,
        table_profiler::io_utils::mime_for_path(&path),
        bytes,
    )
}

pub fn default_config() -> AnalysisConfig {
    AnalysisConfig::default()
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }
}
