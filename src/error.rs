use thiserror::Error;

use crate::{fetcher::FetchError, sinks::SinkError};

#[derive(Error, Debug)]
pub enum SwitcherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch failed: {0}")]
    TransientFetch(#[from] FetchError),

    #[error("Unsupported image format '{format}' (header {signature})")]
    UnsupportedFormat { format: String, signature: String },

    #[error("Could not create secondary reference: {0}")]
    LinkFallbackExhausted(std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Platform sink failed: {0}")]
    PlatformSink(#[from] SinkError),

    #[error("Configuration key '{0}' is missing")]
    ConfigurationMissing(String),

    #[error("Configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("No running instance is listening for '{0}'")]
    SignalUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type SwitcherResult<T> = Result<T, SwitcherError>;
