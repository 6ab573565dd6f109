use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

/// One complete JPEG image cut out of the stream, markers included.
///
/// Cloning is cheap: the payload is reference counted, so handing the same
/// frame to several observers never copies image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    seq: u64,
    data: Bytes,
}

impl Frame {
    pub(crate) fn new(seq: u64, data: Bytes) -> Self {
        Self { seq, data }
    }

    /// Zero-based emission index within the demuxer that produced it.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Observer of completed frames. Called synchronously from inside `write`.
pub trait FrameSink: Send {
    fn on_frame(&mut self, frame: Frame);
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) + Send,
{
    fn on_frame(&mut self, frame: Frame) {
        self(frame)
    }
}

/// Forwards frames into an unbounded channel. Frames are dropped once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub mpsc::UnboundedSender<Frame>);

impl FrameSink for ChannelSink {
    fn on_frame(&mut self, frame: Frame) {
        let seq = frame.seq();
        if self.0.send(frame).is_err() {
            trace!(seq, "frame receiver dropped");
        }
    }
}
