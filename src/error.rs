use thiserror::Error;

pub type BimResult<T> = Result<T, BimError>;

#[derive(Error, Debug)]
pub enum BimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Workbook XML error: {0}")]
    Xml(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Measure resolution error: {0}")]
    Resolution(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
