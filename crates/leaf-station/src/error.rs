use leaf_vision::CaptureError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StationError {
    #[error("camera error: {0}")]
    Device(String),
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("region {0} not found")]
    NotFound(u64),
    #[error("{0}")]
    WrongMode(&'static str),
    #[error("video is not running")]
    NotRunning,
    #[error("click ignored: previous click was less than {0}ms ago")]
    Cooldown(u64),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("image {0} not found")]
    MissingImage(String),
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CaptureError> for StationError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::NotRunning => StationError::NotRunning,
            other => StationError::Device(other.to_string()),
        }
    }
}
