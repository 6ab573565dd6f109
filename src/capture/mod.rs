//! Moving bytes from a [`StreamSource`](crate::source::StreamSource)
//! through the demuxer and out as frames.

mod pump;
pub mod service;

pub use pump::{Pump, PumpEnd, PumpReport};
pub use service::{CaptureService, CaptureSession, CaptureSettings};
