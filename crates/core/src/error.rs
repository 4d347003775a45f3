use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid device ID: {0}")]
    InvalidDeviceId(String),

    #[error("invalid request source: {0}")]
    InvalidRequestSource(String),

    #[error("service registration file error: {0}")]
    ServiceConfig(String),

    #[error("{0}")]
    Other(String),
}
