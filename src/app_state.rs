use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{
    capture::{CaptureService, PumpReport},
    config::AppConfig,
    demux::Frame,
    detect::PlateDetector,
    imaging::RawImage,
    source::StreamSource,
};

/// Frames buffered between the pump and the consumer before the pump
/// stops reading.
const FRAME_QUEUE: usize = 8;
/// Frames a slow `/stream` client may fall behind before it skips ahead.
const BROADCAST_CAPACITY: usize = 4;

pub type Capture = CaptureService<Box<dyn StreamSource>>;

pub struct AppState {
    pub config: AppConfig,
    pub capture: Mutex<Capture>,
    pub detector: Option<Arc<PlateDetector>>,
    latest_frame: Mutex<Option<Frame>>,
    frames_tx: broadcast::Sender<Frame>,
}

impl AppState {
    pub fn new(config: AppConfig, capture: Capture, detector: Option<PlateDetector>) -> Self {
        let (frames_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            config,
            capture: Mutex::new(capture),
            detector: detector.map(Arc::new),
            latest_frame: Mutex::new(None),
            frames_tx,
        }
    }

    pub async fn set_latest_frame(&self, frame: Frame) {
        // No subscribers is fine, the frame is still cached.
        let _ = self.frames_tx.send(frame.clone());
        let mut latest = self.latest_frame.lock().await;
        *latest = Some(frame);
    }

    pub async fn latest_frame(&self) -> Option<Frame> {
        let latest = self.latest_frame.lock().await;
        latest.clone()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<Frame> {
        self.frames_tx.subscribe()
    }

    /// Opens a capture session and drives it in the background until the
    /// source ends or `/stop` cancels it.
    pub async fn start_capture(self: &Arc<Self>) -> anyhow::Result<()> {
        let session = {
            let mut capture = self.capture.lock().await;
            capture.open_session().await?
        };

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let state = self.clone();
        tokio::spawn(async move {
            let consumer = tokio::spawn(state.clone().consume_frames(rx));

            let report: Option<PumpReport> = match session.run(tx).await {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!("capture session failed: {err:#}");
                    None
                }
            };
            if let Err(err) = consumer.await {
                warn!("frame consumer task failed: {err}");
            }

            {
                let mut capture = state.capture.lock().await;
                capture.finish_session(report);
            }
            info!("capture session closed");
        });
        Ok(())
    }

    async fn consume_frames(self: Arc<Self>, mut rx: mpsc::Receiver<Frame>) {
        while let Some(frame) = rx.recv().await {
            self.save_frame(&frame).await;
            self.schedule_detection(&frame);
            self.set_latest_frame(frame).await;
        }
    }

    async fn save_frame(&self, frame: &Frame) {
        let Some(dir) = &self.config.frame_dir else {
            return;
        };
        let path = dir.join(format!("frame-{:08}.jpg", frame.seq()));
        if let Err(err) = tokio::fs::write(&path, frame.data()).await {
            warn!("failed to write {}: {err}", path.display());
        }
    }

    fn schedule_detection(&self, frame: &Frame) {
        let Some(detector) = self.detector.clone() else {
            return;
        };
        if frame.seq() % self.config.detect_every != 0 {
            return;
        }

        let seq = frame.seq();
        let data = frame.data().clone();
        tokio::spawn(async move {
            if let Err(err) = detect_plates(&detector, seq, data).await {
                warn!(seq, "plate detection failed: {err:#}");
            }
        });
    }
}

async fn detect_plates(detector: &PlateDetector, seq: u64, data: Bytes) -> anyhow::Result<()> {
    let image = tokio::task::spawn_blocking(move || RawImage::from_jpeg(&data))
        .await
        .context("frame decode task failed")??;
    let detection = detector.detect(&image).await?;

    if detection.results.is_empty() {
        debug!(seq, "no plates in frame");
    }
    for result in &detection.results {
        info!(
            seq,
            plate = result.plate.as_deref().unwrap_or("?"),
            confidence = result.confidence.unwrap_or_default(),
            region = ?result.region,
            "plate detected"
        );
    }
    Ok(())
}
