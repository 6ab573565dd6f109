use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;

use super::traits::{SourceStream, StreamSource};

/// Reads a recorded stream from disk, or from stdin when the path is `-`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }
}

#[async_trait]
impl StreamSource for FileSource {
    async fn open(&self) -> Result<SourceStream> {
        if self.is_stdin() {
            return Ok(SourceStream::new(tokio::io::stdin()));
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("failed to open stream file {}", self.path.display()))?;
        Ok(SourceStream::new(file))
    }

    fn describe(&self) -> String {
        if self.is_stdin() {
            "stdin".to_owned()
        } else {
            format!("file {}", self.path.display())
        }
    }
}
