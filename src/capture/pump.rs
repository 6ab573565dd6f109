use anyhow::{Context, Result};
use bytes::BytesMut;
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{mpsc, watch},
};
use tracing::{debug, info};

use crate::demux::{BoundedDemuxer, DemuxStats, Frame};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpEnd {
    #[default]
    Eof,
    Cancelled,
    ReceiverClosed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub chunks: u64,
    pub bytes_read: u64,
    pub frames: u64,
    pub bytes_discarded: u64,
    /// Bytes of an unterminated frame still held when the pump stopped.
    pub pending_bytes: usize,
    pub end: PumpEnd,
}

/// Reads a source chunk by chunk into the demuxer and forwards completed
/// frames over a bounded channel. The next read only starts once every
/// frame from the previous chunk has been accepted by the receiver.
pub struct Pump {
    demuxer: BoundedDemuxer,
    chunk_size: usize,
    stats: watch::Sender<DemuxStats>,
}

impl Pump {
    pub fn new(demuxer: BoundedDemuxer, chunk_size: usize, stats: watch::Sender<DemuxStats>) -> Self {
        Self {
            demuxer,
            chunk_size: chunk_size.max(1),
            stats,
        }
    }

    pub fn demuxer(&self) -> &BoundedDemuxer {
        &self.demuxer
    }

    pub async fn run<R>(
        &mut self,
        reader: &mut R,
        frames: &mpsc::Sender<Frame>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<PumpReport>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut report = PumpReport::default();
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut ready = Vec::new();

        let end = loop {
            if *cancel.borrow() {
                break PumpEnd::Cancelled;
            }

            buffer.reserve(self.chunk_size);
            let read = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break PumpEnd::Cancelled;
                    }
                    continue;
                }
                read = reader.read_buf(&mut buffer) => {
                    read.context("failed to read from stream source")?
                }
            };
            if read == 0 {
                break PumpEnd::Eof;
            }
            report.chunks += 1;
            report.bytes_read += read as u64;

            let written = self
                .demuxer
                .write_with(buffer.split().freeze(), |frame| ready.push(frame));
            self.stats.send_replace(self.demuxer.inner().stats());

            let mut receiver_closed = false;
            for frame in ready.drain(..) {
                if frames.send(frame).await.is_err() {
                    receiver_closed = true;
                    break;
                }
                report.frames += 1;
            }
            written?;

            if receiver_closed {
                break PumpEnd::ReceiverClosed;
            }
        };

        let stats = self.demuxer.inner().stats();
        self.stats.send_replace(stats);
        report.bytes_discarded = stats.bytes_discarded;
        report.pending_bytes = stats.pending_bytes;
        report.end = end;

        if report.pending_bytes > 0 {
            debug!(
                pending = report.pending_bytes,
                "stream ended inside an unterminated frame"
            );
        }
        info!(
            chunks = report.chunks,
            bytes = report.bytes_read,
            frames = report.frames,
            end = ?report.end,
            "pump finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::sync::{mpsc, watch};

    use super::{Pump, PumpEnd};
    use crate::demux::{BoundedDemuxer, DemuxStats, FrameDemuxer};

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn pump(chunk_size: usize, limit: Option<usize>) -> (Pump, watch::Receiver<DemuxStats>) {
        let demuxer = match limit {
            Some(limit) => BoundedDemuxer::new(FrameDemuxer::new(), limit),
            None => BoundedDemuxer::unbounded(FrameDemuxer::new()),
        };
        let (stats_tx, stats_rx) = watch::channel(DemuxStats::default());
        (Pump::new(demuxer, chunk_size, stats_tx), stats_rx)
    }

    #[tokio::test]
    async fn delivers_frames_in_order_and_reports_leftovers() {
        let frames: Vec<Vec<u8>> = (0..5_u8).map(|i| fake_jpeg(&[i; 20])).collect();
        let mut stream = b"--mjpegtap\r\n\r\n".to_vec();
        for frame in &frames {
            stream.extend_from_slice(frame);
            stream.extend_from_slice(b"\r\n--mjpegtap\r\n\r\n");
        }
        stream.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3]);

        let (mut pump, stats_rx) = pump(7, None);
        let (tx, mut rx) = mpsc::channel(16);
        let (_cancel_tx, mut cancel_rx) = watch::channel(false);

        let report = pump
            .run(&mut Cursor::new(stream.clone()), &tx, &mut cancel_rx)
            .await
            .expect("pump should finish");
        drop(tx);

        let mut received = Vec::new();
        while let Some(frame) = rx.recv().await {
            received.push(frame.as_ref().to_vec());
        }
        assert_eq!(received, frames);
        assert_eq!(report.frames, 5);
        assert_eq!(report.bytes_read, stream.len() as u64);
        assert_eq!(report.pending_bytes, 5);
        assert_eq!(report.end, PumpEnd::Eof);
        assert_eq!(stats_rx.borrow().frames_emitted, 5);
    }

    #[tokio::test]
    async fn stops_when_receiver_is_gone() {
        let mut stream = Vec::new();
        for i in 0..4_u8 {
            stream.extend_from_slice(&fake_jpeg(&[i]));
        }

        let (mut pump, _stats_rx) = pump(1024, None);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_cancel_tx, mut cancel_rx) = watch::channel(false);

        let report = pump
            .run(&mut Cursor::new(stream), &tx, &mut cancel_rx)
            .await
            .expect("pump should finish");

        assert_eq!(report.end, PumpEnd::ReceiverClosed);
        assert_eq!(report.frames, 0);
    }

    #[tokio::test]
    async fn cancelled_before_reading() {
        let (mut pump, _stats_rx) = pump(1024, None);
        let (tx, _rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        cancel_tx.send(true).expect("receiver alive");

        let report = pump
            .run(&mut Cursor::new(fake_jpeg(b"x")), &tx, &mut cancel_rx)
            .await
            .expect("pump should finish");

        assert_eq!(report.end, PumpEnd::Cancelled);
        assert_eq!(report.bytes_read, 0);
    }

    #[tokio::test]
    async fn oversized_frame_fails_the_pump() {
        let mut stream = vec![0xFF, 0xD8];
        stream.extend_from_slice(&[0x42; 256]);

        let (mut pump, _stats_rx) = pump(64, Some(100));
        let (tx, _rx) = mpsc::channel(1);
        let (_cancel_tx, mut cancel_rx) = watch::channel(false);

        let err = pump
            .run(&mut Cursor::new(stream), &tx, &mut cancel_rx)
            .await
            .expect_err("frame exceeds the limit");

        assert!(err.to_string().contains("limit is 100"));
        assert_eq!(pump.demuxer().inner().pending_len(), 0);
    }
}
