//! Pixel-level helpers for frames that leave the demuxer.

mod raw;
mod roi;

pub use raw::RawImage;
pub use roi::Roi;
