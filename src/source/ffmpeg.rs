use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::traits::{SourceStream, StreamSource};

pub const BOUNDARY_TAG: &str = "mjpegtap";

/// Runs ffmpeg and reads its multipart JPEG output from stdout.
///
/// `/dev/video*` inputs are captured through v4l2 using `input_format`;
/// anything else (files, rtsp/http urls) is handed to ffmpeg as is.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    input: String,
    input_format: String,
}

impl FfmpegSource {
    pub fn new(input: String, input_format: String) -> Self {
        Self {
            input,
            input_format,
        }
    }

    pub fn set_input(&mut self, input: String) {
        self.input = input;
    }

    fn is_v4l2(&self) -> bool {
        self.input.starts_with("/dev/video")
    }

    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .into_iter()
            .map(String::from)
            .collect();

        if self.is_v4l2() {
            args.extend([
                "-f".to_owned(),
                "v4l2".to_owned(),
                "-input_format".to_owned(),
                self.input_format.clone(),
            ]);
        }
        args.extend(["-i".to_owned(), self.input.clone()]);

        // MJPEG devices already deliver JPEG frames, skip the re-encode.
        let codec = if self.is_v4l2() && self.input_format == "mjpeg" {
            "copy"
        } else {
            "mjpeg"
        };
        args.extend(
            [
                "-an",
                "-c:v",
                codec,
                "-f",
                "mpjpeg",
                "-boundary_tag",
                BOUNDARY_TAG,
                "pipe:1",
            ]
            .into_iter()
            .map(String::from),
        );
        args
    }
}

#[async_trait]
impl StreamSource for FfmpegSource {
    async fn open(&self) -> Result<SourceStream> {
        let mut child = Command::new("ffmpeg")
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffmpeg stream process")?;

        let stdout = child
            .stdout
            .take()
            .context("missing ffmpeg stdout pipe for stream")?;
        Ok(SourceStream::with_child(stdout, child))
    }

    fn describe(&self) -> String {
        format!("ffmpeg {} ({})", self.input, self.input_format)
    }
}
