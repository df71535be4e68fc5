use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillMonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Remote file {name} failed to process (state: {state})")]
    ProcessingFailed { name: String, state: String },

    #[error("Remote file {name} was still processing after {attempts} checks")]
    ProcessingTimeout { name: String, attempts: u32 },

    #[error("Weather data error: {0}")]
    WeatherData(String),

    #[error("Insufficient data for forecast: {0}")]
    InsufficientData(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BillMonitorError>;
