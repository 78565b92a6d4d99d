//! Typed errors for the core (§7 of the design doc).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("exhausted id space for feature-space {feature_space:?}, subspace (k={k}, v={v})")]
    ExhaustedIdSpace {
        feature_space: crate::id::feature_space::IdFeatureSpace,
        k: u32,
        v: u32,
    },

    #[error("file missing: {0}")]
    FileMissing(std::path::PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::error::ImageError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("transport unsupported: {0}")]
    TransportUnsupported(String),

    #[error("not found in db: {0}")]
    NotFoundInDb(String),

    #[error("malformed formula: {0}")]
    FormulaError(String),

    #[error("config file error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("internal error (should be unreachable): {0}")]
    Internal(String),
}

/// Internal-only control-flow signal used by the upload coordinator.
///
/// Per the design notes: this must never be surfaced to the public API, so
/// it deliberately does not participate in [`Error`]. Callers that can
/// observe it (only `upload::coordinator`) convert it into a retry loop.
#[derive(Debug)]
pub(crate) struct RetryAssignId;

pub type Result<T> = std::result::Result<T, Error>;
