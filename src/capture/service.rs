use anyhow::{Result, bail};
use tokio::sync::{mpsc, watch};
use tracing::info;

use super::pump::{Pump, PumpReport};
use crate::{
    core::state::{CaptureState, CaptureStatus},
    demux::{BoundedDemuxer, DemuxConfig, DemuxStats, Frame, FrameDemuxer},
    source::{SourceStream, StreamSource},
};

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub demux: DemuxConfig,
    pub chunk_size: usize,
    /// `None` disables the pending frame limit.
    pub max_pending_bytes: Option<usize>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            demux: DemuxConfig::default(),
            chunk_size: 16 * 1024,
            max_pending_bytes: Some(8 * 1024 * 1024),
        }
    }
}

impl CaptureSettings {
    pub fn build_demuxer(&self) -> BoundedDemuxer {
        let inner = FrameDemuxer::with_config(self.demux);
        match self.max_pending_bytes {
            Some(limit) => BoundedDemuxer::new(inner, limit),
            None => BoundedDemuxer::unbounded(inner),
        }
    }
}

/// One opened source plus the demuxer that reads it. Every session starts
/// from a fresh demuxer.
pub struct CaptureSession {
    stream: SourceStream,
    pump: Pump,
    cancel_rx: watch::Receiver<bool>,
}

impl CaptureSession {
    /// Pumps the source until EOF, cancellation or a closed receiver, then
    /// shuts the source down.
    pub async fn run(mut self, frames: mpsc::Sender<Frame>) -> Result<PumpReport> {
        let outcome = self
            .pump
            .run(self.stream.reader(), &frames, &mut self.cancel_rx)
            .await;
        self.stream.shutdown().await;
        outcome
    }
}

pub struct CaptureService<S: StreamSource> {
    source: S,
    settings: CaptureSettings,
    state: CaptureState,
    cancel_tx: Option<watch::Sender<bool>>,
    stats_rx: watch::Receiver<DemuxStats>,
    last_report: Option<PumpReport>,
}

impl<S: StreamSource> CaptureService<S> {
    pub fn new(source: S, settings: CaptureSettings) -> Self {
        let (_, stats_rx) = watch::channel(DemuxStats::default());
        Self {
            source,
            settings,
            state: CaptureState::Idle,
            cancel_tx: None,
            stats_rx,
            last_report: None,
        }
    }

    pub async fn open_session(&mut self) -> Result<CaptureSession> {
        if self.cancel_tx.is_some() {
            bail!("capture session already active");
        }

        self.state = CaptureState::Starting;
        let stream = match self.source.open().await {
            Ok(stream) => stream,
            Err(err) => {
                self.state = CaptureState::Idle;
                return Err(err);
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (stats_tx, stats_rx) = watch::channel(DemuxStats::default());
        self.cancel_tx = Some(cancel_tx);
        self.stats_rx = stats_rx;
        self.state = CaptureState::Streaming;
        info!(source = %self.source.describe(), "capture session opened");

        Ok(CaptureSession {
            stream,
            pump: Pump::new(
                self.settings.build_demuxer(),
                self.settings.chunk_size,
                stats_tx,
            ),
            cancel_rx,
        })
    }

    /// Asks the running session to stop. A no-op when nothing is running.
    pub fn stop(&mut self) {
        if let Some(cancel_tx) = &self.cancel_tx {
            let _ = cancel_tx.send(true);
            self.state = CaptureState::Stopping;
        }
    }

    pub fn finish_session(&mut self, report: Option<PumpReport>) {
        self.cancel_tx = None;
        self.state = CaptureState::Idle;
        if report.is_some() {
            self.last_report = report;
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel_tx.is_some()
    }

    pub fn status(&self) -> CaptureStatus {
        CaptureStatus {
            state: self.state,
            source: self.source.describe(),
            stats: *self.stats_rx.borrow(),
            last_report: self.last_report,
        }
    }
}
