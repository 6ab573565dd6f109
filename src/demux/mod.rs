//! Motion-JPEG demuxing.
//!
//! [`FrameDemuxer`] turns a sequence of arbitrarily sized chunks into
//! complete `FF D8 .. FF D9` frames and hands each one to its observers
//! before `write` returns. [`BoundedDemuxer`] adds a ceiling on the size of
//! a frame in progress for callers that cannot trust their input.

mod bounded;
mod demuxer;
mod frame;
pub mod marker;

pub use bounded::BoundedDemuxer;
pub use demuxer::{DemuxConfig, DemuxStats, FrameDemuxer};
pub use frame::{ChannelSink, Frame, FrameSink};
