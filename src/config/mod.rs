use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};
use reqwest::Url;
use tracing::Level;

use crate::{
    capture::CaptureSettings,
    demux::DemuxConfig,
    detect::DEFAULT_COUNTRY_CODE,
    source::{FfmpegSource, FileSource, StreamSource},
};

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
const DEFAULT_MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ffmpeg,
    File,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "file" => Ok(Self::File),
            other => bail!("unknown SOURCE_KIND {other:?}, expected ffmpeg or file"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: SocketAddr,
    pub source: String,
    pub source_kind: SourceKind,
    pub input_format: String,
    pub chunk_size: usize,
    /// `None` leaves the frame in progress unbounded.
    pub max_pending_bytes: Option<usize>,
    pub split_start_lookback: bool,
    pub frame_dir: Option<PathBuf>,
    pub alpr_url: Option<Url>,
    pub alpr_country_code: String,
    pub alpr_pattern: Option<String>,
    pub detect_every: u64,
    pub log_level: Level,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "mjpeg-tap".to_owned());
        let bind_addr: SocketAddr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_owned())
            .parse()
            .context("BIND_ADDR is not a socket address")?;

        let source = env::var("SOURCE").unwrap_or_else(|_| "/dev/video0".to_owned());
        let source_kind = match non_empty("SOURCE_KIND") {
            Some(value) => value.parse()?,
            None => SourceKind::Ffmpeg,
        };
        let input_format = env::var("INPUT_FORMAT").unwrap_or_else(|_| "mjpeg".to_owned());

        let chunk_size = parsed::<usize>("CHUNK_SIZE")
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let max_pending_bytes = match parsed::<usize>("MAX_PENDING_BYTES") {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => Some(DEFAULT_MAX_PENDING_BYTES),
        };
        let split_start_lookback = parsed("SPLIT_START_LOOKBACK").unwrap_or(true);
        let frame_dir = non_empty("FRAME_DIR").map(PathBuf::from);

        let alpr_url = non_empty("ALPR_URL")
            .map(|value| Url::parse(&value).context("ALPR_URL is not a valid url"))
            .transpose()?;
        let alpr_country_code =
            non_empty("ALPR_COUNTRY_CODE").unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_owned());
        let alpr_pattern = non_empty("ALPR_PATTERN");
        let detect_every = parsed::<u64>("DETECT_EVERY")
            .filter(|every| *every > 0)
            .unwrap_or(10);
        let log_level = parsed("LOG_LEVEL").unwrap_or(Level::INFO);

        Ok(Self {
            app_name,
            bind_addr,
            source,
            source_kind,
            input_format,
            chunk_size,
            max_pending_bytes,
            split_start_lookback,
            frame_dir,
            alpr_url,
            alpr_country_code,
            alpr_pattern,
            detect_every,
            log_level,
        })
    }

    pub fn demux_config(&self) -> DemuxConfig {
        DemuxConfig {
            split_start_lookback: self.split_start_lookback,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            demux: self.demux_config(),
            chunk_size: self.chunk_size,
            max_pending_bytes: self.max_pending_bytes,
        }
    }

    pub fn stream_source(&self) -> Box<dyn StreamSource> {
        match self.source_kind {
            SourceKind::Ffmpeg => Box::new(FfmpegSource::new(
                self.source.clone(),
                self.input_format.clone(),
            )),
            SourceKind::File => Box::new(FileSource::new(&self.source)),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    non_empty(key).and_then(|value| value.trim().parse().ok())
}
