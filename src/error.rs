use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported datum {0:?}")]
    UnsupportedDatum(String),

    #[error("unsupported GCP type: {0}")]
    UnsupportedGcpType(String),

    #[error("GCPs not available")]
    MissingGcps,

    #[error("need at least {needed} GCPs, got {got}")]
    TooFewGcps { needed: usize, got: usize },

    #[error("malformed calibration file: {0}")]
    MalformedCalibration(String),

    #[error("{tool} failed with {status}")]
    ToolFailed { tool: String, status: String },

    #[error("resolution equation has no usable solution (denominator {0:e})")]
    UnsolvableResolution(f64),

    #[error("polygon is not simple after longitude normalization")]
    InvalidPolygon,

    #[error("projection error: {0}")]
    Projection(String),

    #[error("IO error {0}")]
    Io(#[from] io::Error),

    #[error("image error {0}")]
    Image(#[from] image::ImageError),

    #[error("json error {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("http error {0}")]
    Http(#[from] reqwest::Error),
}

pub(crate) fn projection_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Projection(e.to_string())
}
