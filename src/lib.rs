//! Split a Motion-JPEG byte stream into complete JPEG frames.
//!
//! The heart of the crate is [`demux::FrameDemuxer`], a synchronous state
//! machine fed with arbitrarily sized chunks. Everything else (sources,
//! the capture pump, image helpers, plate detection and the HTTP surface)
//! sits around it.

pub mod app_state;
pub mod capture;
pub mod config;
pub mod core;
pub mod demux;
pub mod detect;
pub mod imaging;
pub mod source;
pub mod web;

pub use crate::core::errors::{Error, Result};
pub use demux::{BoundedDemuxer, DemuxConfig, DemuxStats, Frame, FrameDemuxer, FrameSink};
