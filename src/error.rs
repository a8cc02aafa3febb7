use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no phone is connected/mounted under {path}")]
    DeviceNotFound { path: PathBuf },

    #[error("more than one device is mounted under {path}; unmount the extras and retry")]
    MultipleDevices { path: PathBuf },

    #[error("phone storage {path} is not accessible for reading/writing")]
    DeviceUnreadable { path: PathBuf },

    #[error("XDG_RUNTIME_DIR is not set; cannot locate gvfs mounts")]
    NoRuntimeDir,

    #[error("no home directory could be resolved")]
    NoHome,

    #[error("source directory {path} is missing or is not a directory")]
    BadRoot { path: PathBuf },

    #[error("another sync run holds the lock at {path}")]
    Locked { path: PathBuf },

    #[error("config file {path} is not valid: {source}")]
    BadConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("walking {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("encoding snapshot {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("decoding snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl SyncError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
