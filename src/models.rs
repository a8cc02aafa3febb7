use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

// Persisted as the two-element array [size, mtime] so the snapshot documents
// stay a plain path -> [size, mtime] mapping on disk.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(from = "(u64, f64)", into = "(u64, f64)")]
pub struct FileRecord {
    pub size: u64,
    pub mtime: f64,
}

impl From<(u64, f64)> for FileRecord {
    fn from(v: (u64, f64)) -> Self {
        FileRecord {
            size: v.0,
            mtime: v.1,
        }
    }
}

impl From<FileRecord> for (u64, f64) {
    fn from(r: FileRecord) -> Self {
        (r.size, r.mtime)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub root: PathBuf,
    pub files: HashMap<String, FileRecord>,
    pub dirs: BTreeSet<String>,
}

impl Snapshot {
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Snapshot {
            root: root.into(),
            files: HashMap::new(),
            dirs: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub files_to_add: Vec<String>,
    pub files_to_update: Vec<String>,
    pub files_to_delete: Vec<String>,
    pub dirs_to_add: Vec<String>,
    pub dirs_to_delete: Vec<String>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.files_to_add.is_empty()
            && self.files_to_update.is_empty()
            && self.files_to_delete.is_empty()
            && self.dirs_to_add.is_empty()
            && self.dirs_to_delete.is_empty()
    }

    pub fn total(&self) -> usize {
        self.files_to_add.len()
            + self.files_to_update.len()
            + self.files_to_delete.len()
            + self.dirs_to_add.len()
            + self.dirs_to_delete.len()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncConfig {
    pub doc_root: PathBuf,
    pub pull_root: PathBuf,

    #[serde(default = "default_device_subdir")]
    pub device_subdir: String,

    #[serde(default = "default_transfer_subdir")]
    pub transfer_subdir: String,

    #[serde(default)]
    pub dirs_to_device: Vec<String>,

    #[serde(default)]
    pub dirs_from_device: Vec<String>,

    #[serde(default)]
    pub exclusions: Vec<String>,
}

fn default_device_subdir() -> String {
    "Phone".into()
}

fn default_transfer_subdir() -> String {
    "Documents/0_Transfer".into()
}

impl SyncConfig {
    pub fn default_for_home(home: &Path) -> Self {
        SyncConfig {
            doc_root: home.join("Documents"),
            pull_root: home.join("PhoneTransfer"),
            device_subdir: default_device_subdir(),
            transfer_subdir: default_transfer_subdir(),
            dirs_to_device: Vec::new(),
            dirs_from_device: vec!["DCIM".into(), "Download".into()],
            exclusions: Vec::new(),
        }
    }
}
