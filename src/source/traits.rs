use anyhow::Result;
use async_trait::async_trait;
use tokio::{io::AsyncRead, process::Child};
use tracing::warn;

type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// An opened stream. For process-backed sources the child lives exactly as
/// long as the stream does.
pub struct SourceStream {
    reader: Reader,
    child: Option<Child>,
}

impl SourceStream {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
        }
    }

    pub fn with_child(reader: impl AsyncRead + Send + Unpin + 'static, child: Child) -> Self {
        Self {
            reader: Box::new(reader),
            child: Some(child),
        }
    }

    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.reader.as_mut()
    }

    /// Stops the backing process, if any, and waits for it to exit.
    pub async fn shutdown(mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(err) = child.kill().await {
            warn!("failed to kill stream source process: {err}");
        }
        if let Err(err) = child.wait().await {
            warn!("failed to wait for stream source process: {err}");
        }
    }
}

#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self) -> Result<SourceStream>;

    /// Human readable origin, used in logs and status output.
    fn describe(&self) -> String;
}

#[async_trait]
impl StreamSource for Box<dyn StreamSource> {
    async fn open(&self) -> Result<SourceStream> {
        self.as_ref().open().await
    }

    fn describe(&self) -> String {
        self.as_ref().describe()
    }
}
