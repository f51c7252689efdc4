//! Session pipeline configuration

use std::path::PathBuf;

/// Tunables for one [`crate::SessionPipeline`]
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Copy buffer size for session writes
    pub chunk_size: usize,
    /// Directory for buffering entries whose size the archive does not declare
    pub scratch_dir: PathBuf,
    /// Session entry name for a source that is a single package
    pub session_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            scratch_dir: std::env::temp_dir(),
            session_name: "base.apk".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Set the copy buffer size; zero is raised to one byte
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    #[must_use]
    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }
}
