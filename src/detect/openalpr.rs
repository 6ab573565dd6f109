//! Client for an OpenALPR-compatible plate recognition endpoint.

use reqwest::{
    Client, Url,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    config::AppConfig,
    core::errors::{Error, Result},
    imaging::{RawImage, Roi},
};

pub const DEFAULT_COUNTRY_CODE: &str = "us";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateResult {
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub coordinates: Vec<Point>,
    /// Bounding box of `coordinates`, clamped to the submitted image.
    #[serde(skip)]
    pub region: Option<Roi>,
    /// JPEG of `region` cut from the submitted image.
    #[serde(skip)]
    pub jpeg: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub results: Vec<PlateResult>,
    /// Any other fields the service reports, e.g. processing time.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct PlateDetector {
    url: Url,
    country_code: String,
    pattern: Option<String>,
    client: Client,
}

impl PlateDetector {
    pub fn new(url: Url, country_code: impl Into<String>, pattern: Option<String>) -> Self {
        Self {
            url,
            country_code: country_code.into(),
            pattern,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let url = config.alpr_url.clone()?;
        Some(Self::new(
            url,
            config.alpr_country_code.clone(),
            config.alpr_pattern.clone(),
        ))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Submits `image` and cuts every reported plate out of it.
    pub async fn detect(&self, image: &RawImage) -> Result<Detection> {
        let upload = Part::bytes(image.to_jpeg()?)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let mut form = Form::new()
            .part("upload", upload)
            .text("country_code", self.country_code.clone());
        if let Some(pattern) = &self.pattern {
            form = form.text("pattern", pattern.clone());
        }

        debug!(url = %self.url, "submitting frame for plate detection");
        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DetectStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut detection: Detection = response.json().await?;
        for result in &mut detection.results {
            result.region = plate_region(&result.coordinates, image.width(), image.height());
            if let Some(region) = result.region {
                result.jpeg = Some(image.roi(&region)?.to_jpeg()?);
            }
        }
        Ok(detection)
    }
}

/// Bounding box of a plate polygon after clamping every corner into the
/// image. `None` when nothing of the plate is left.
pub fn plate_region(coordinates: &[Point], width: u32, height: u32) -> Option<Roi> {
    let clamp = |v: i64, max: u32| v.clamp(0, i64::from(max)) as u32;
    let region = Roi::bounding(
        coordinates
            .iter()
            .map(|p| (clamp(p.x, width), clamp(p.y, height))),
    )?;
    (!region.is_empty()).then_some(region)
}
