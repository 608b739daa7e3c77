use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("package is read-only")]
    ReadOnly,

    #[error("package format error: {0}")]
    Format(String),

    #[error("multi-volume archives are not supported")]
    MultiVolume,

    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("mount failed: {0}")]
    Mount(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VfsError>;
