use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::imaging::Roi;

/// Errors raised by the library side of the crate.
///
/// The demuxer core never fails; everything here comes from the wrapping
/// policy or from the downstream collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pending frame grew to {pending} bytes, limit is {limit}")]
    FrameTooLarge { pending: usize, limit: usize },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("region {roi:?} does not fit in a {width}x{height} image")]
    RoiOutOfBounds { roi: Roi, width: u32, height: u32 },

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("detector returned status {status}: {body}")]
    DetectStatus { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(format!("{value:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
