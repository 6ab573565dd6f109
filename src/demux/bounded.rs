use bytes::Bytes;
use tracing::warn;

use super::{Frame, FrameDemuxer};
use crate::core::errors::{Error, Result};

/// Caps how large a frame in progress may grow.
///
/// The wrapped demuxer is unbounded; this policy checks the pending size
/// after each write and, once it exceeds `max_pending_bytes`, drops the
/// frame in progress and reports [`Error::FrameTooLarge`]. Frames completed
/// earlier in the same write are still delivered.
#[derive(Debug)]
pub struct BoundedDemuxer {
    inner: FrameDemuxer,
    max_pending_bytes: Option<usize>,
}

impl BoundedDemuxer {
    pub fn new(inner: FrameDemuxer, max_pending_bytes: usize) -> Self {
        Self {
            inner,
            max_pending_bytes: Some(max_pending_bytes),
        }
    }

    pub fn unbounded(inner: FrameDemuxer) -> Self {
        Self {
            inner,
            max_pending_bytes: None,
        }
    }

    pub fn max_pending_bytes(&self) -> Option<usize> {
        self.max_pending_bytes
    }

    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<()> {
        self.inner.write(chunk);
        self.enforce_limit()
    }

    pub fn write_with<F: FnMut(Frame)>(&mut self, chunk: impl Into<Bytes>, emit: F) -> Result<()> {
        self.inner.write_with(chunk, emit);
        self.enforce_limit()
    }

    pub fn inner(&self) -> &FrameDemuxer {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut FrameDemuxer {
        &mut self.inner
    }

    pub fn into_inner(self) -> FrameDemuxer {
        self.inner
    }

    fn enforce_limit(&mut self) -> Result<()> {
        let Some(limit) = self.max_pending_bytes else {
            return Ok(());
        };

        let pending = self.inner.pending_len();
        if pending <= limit {
            return Ok(());
        }

        warn!(pending, limit, "dropping oversized frame in progress");
        self.inner.reset();
        Err(Error::FrameTooLarge { pending, limit })
    }
}

#[cfg(test)]
mod tests {
    use super::BoundedDemuxer;
    use crate::{core::errors::Error, demux::FrameDemuxer};

    #[test]
    fn small_frames_pass_through() {
        let mut demuxer = BoundedDemuxer::new(FrameDemuxer::new(), 8);
        let mut frames = Vec::new();

        demuxer
            .write_with(vec![0xFF_u8, 0xD8, 1, 2, 3], |frame| frames.push(frame))
            .expect("pending frame is under the limit");
        demuxer
            .write_with(vec![4_u8, 0xFF, 0xD9], |frame| frames.push(frame))
            .expect("frame closes cleanly");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), &[0xFF, 0xD8, 1, 2, 3, 4, 0xFF, 0xD9]);
    }

    #[test]
    fn oversized_frame_is_dropped_and_reported() {
        let mut demuxer = BoundedDemuxer::new(FrameDemuxer::new(), 4);
        let mut frames = Vec::new();

        let err = demuxer
            .write_with(vec![0xFF_u8, 0xD8, 0xFF, 0xD9, 0xFF, 0xD8, 1, 2, 3], |frame| {
                frames.push(frame)
            })
            .expect_err("second frame exceeds the limit");

        assert!(matches!(err, Error::FrameTooLarge { pending: 5, limit: 4 }));
        assert_eq!(frames.len(), 1, "frame closed before the overflow survives");
        assert_eq!(demuxer.inner().pending_len(), 0);
        assert!(!demuxer.inner().is_accumulating());

        demuxer
            .write_with(vec![0xFF_u8, 0xD8, 9, 0xFF, 0xD9], |frame| frames.push(frame))
            .expect("demuxer resynchronises on the next start marker");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_ref(), &[0xFF, 0xD8, 9, 0xFF, 0xD9]);
    }

    #[test]
    fn unbounded_never_errors() {
        let mut demuxer = BoundedDemuxer::unbounded(FrameDemuxer::new());
        demuxer.write(vec![0xFF_u8, 0xD8]).expect("no limit");
        demuxer.write(vec![0_u8; 64 * 1024]).expect("no limit");

        assert_eq!(demuxer.max_pending_bytes(), None);
        assert_eq!(demuxer.inner().pending_len(), 2 + 64 * 1024);
    }
}
