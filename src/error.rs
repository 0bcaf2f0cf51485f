use thiserror::Error;

/// Error taxonomy for the query fabric core.
///
/// Each variant corresponds to one entry in the error taxonomy: transport
/// and protocol failures that a `ResponseHandler` can latch, plus the
/// ambient IO/serialization/configuration errors every module needs.
#[derive(Error, Debug, Clone)]
pub enum FabricError {
    #[error("malformed header or body: {0}")]
    ResultDecode(String),

    #[error("MD5 integrity check failed: {0}")]
    ResultMd5(String),

    #[error("result path error: {0}")]
    ResultError(String),

    #[error("remote refused to provision: {0}")]
    ProvisionNack(String),

    #[error("response data not acknowledged: {0}")]
    ResponseDataNack(String),

    #[error("response data stream corrupt: {0}")]
    ResponseDataErrorCorrupt(String),

    #[error("response data stream ended without corruption signal: {0}")]
    ResponseDataErrorOk(String),

    #[error("result store rejected append: {0}")]
    MergeError(String),

    #[error("cancelled")]
    Cancel,

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for FabricError {
    fn from(e: std::io::Error) -> Self {
        FabricError::Io(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for FabricError {
    fn from(e: bincode::error::EncodeError) -> Self {
        FabricError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for FabricError {
    fn from(e: bincode::error::DecodeError) -> Self {
        FabricError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;
