use serde::Serialize;

use crate::{capture::PumpReport, demux::DemuxStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub source: String,
    pub stats: DemuxStats,
    pub last_report: Option<PumpReport>,
}
