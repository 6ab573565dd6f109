//! Byte streams the demuxer can be fed from.

pub mod ffmpeg;
pub mod file;
pub mod traits;

pub use ffmpeg::FfmpegSource;
pub use file::FileSource;
pub use traits::{SourceStream, StreamSource};
