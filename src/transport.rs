use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Result, SyncError};

// The capability set the orchestrator needs from a destination filesystem.
// Injected so tests can count or fail individual operations.
pub trait Transport {
    fn copy(&self, src: &Path, dest: &Path) -> Result<()>;
    fn delete(&self, path: &Path) -> Result<()>;
    fn make_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

pub struct LocalFs;

impl Transport for LocalFs {
    fn copy(&self, src: &Path, dest: &Path) -> Result<()> {
        fs::copy(src, dest)
            .map(|_| ())
            .map_err(|e| SyncError::io("copy to", dest, e))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(path).map_err(|e| SyncError::io("remove dir", path, e))
            }
            Ok(_) => fs::remove_file(path).map_err(|e| SyncError::io("remove file", path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io("stat", path, e)),
        }
    }

    fn make_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| SyncError::io("create dir", path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
