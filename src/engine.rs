use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use fs2::FileExt;
use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::models::{Changeset, FileRecord, Snapshot};

// -----------------------------------------------------------------------------
// Snapshot keys
// -----------------------------------------------------------------------------

// Key = short hash of the parent path + the root's own name, so two roots that
// share a basename under different parents get distinct baselines.
pub fn snapshot_key(root: &Path) -> String {
    let parent = root.parent().unwrap_or_else(|| Path::new(""));
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(parent.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}_{}", &digest[..8], name)
}

// -----------------------------------------------------------------------------
// Filters
// -----------------------------------------------------------------------------

fn matches_exclusion(path: &Path, exclusions: &[String]) -> bool {
    if exclusions.is_empty() {
        return false;
    }
    let s = path.to_string_lossy().replace('\\', "/");

    for exc in exclusions {
        if let Ok(pat) = Pattern::new(exc) {
            if pat.matches(&s) {
                return true;
            }
        }
        if s.contains(exc) {
            return true;
        }
    }
    false
}

// -----------------------------------------------------------------------------
// Snapshot reader
// -----------------------------------------------------------------------------

fn mtime_seconds(meta: &fs::Metadata) -> f64 {
    meta.modified()
        .unwrap_or(UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub fn take_snapshot(root: &Path, exclusions: &[String]) -> Result<Snapshot> {
    if !root.is_dir() {
        return Err(SyncError::BadRoot {
            path: root.to_path_buf(),
        });
    }

    let mut snapshot = Snapshot::empty(root);

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| SyncError::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();

        if matches_exclusion(path, exclusions) {
            continue;
        }

        if entry.file_type().is_dir() {
            snapshot.dirs.insert(path.to_string_lossy().into_owned());
        } else if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(|e| SyncError::Walk {
                path: root.to_path_buf(),
                source: e,
            })?;
            snapshot.files.insert(
                path.to_string_lossy().into_owned(),
                FileRecord {
                    size: meta.len(),
                    mtime: mtime_seconds(&meta),
                },
            );
        }
    }

    debug!(
        "snapshot of {}: {} file(s), {} dir(s)",
        root.display(),
        snapshot.files.len(),
        snapshot.dirs.len()
    );
    Ok(snapshot)
}

// -----------------------------------------------------------------------------
// Snapshot store
// -----------------------------------------------------------------------------

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SyncError::io("create dir", &dir, e))?;
        Ok(SnapshotStore { dir })
    }

    fn files_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_files.json"))
    }

    fn dirs_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_dirs.json"))
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let key = snapshot_key(&snapshot.root);

        write_json(&self.files_path(&key), &snapshot.files)?;

        // Value slot is kept null for future per-directory metadata.
        let dir_doc: BTreeMap<&String, ()> = snapshot.dirs.iter().map(|d| (d, ())).collect();
        write_json(&self.dirs_path(&key), &dir_doc)
    }

    // Missing documents mean "first run" and load as an empty snapshot.
    pub fn load(&self, root: &Path) -> Result<Snapshot> {
        let key = snapshot_key(root);

        let files: HashMap<String, FileRecord> = read_json(&self.files_path(&key))?;
        let dir_doc: BTreeMap<String, ()> = read_json(&self.dirs_path(&key))?;

        Ok(Snapshot {
            root: root.to_path_buf(),
            files,
            dirs: dir_doc.into_keys().collect(),
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| SyncError::Encode {
        path: path.to_path_buf(),
        source: e,
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| SyncError::io("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| SyncError::io("rename", path, e))
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Ok(T::default());
    }
    let txt = fs::read_to_string(path).map_err(|e| SyncError::io("read", path, e))?;
    serde_json::from_str(&txt).map_err(|e| SyncError::Decode {
        path: path.to_path_buf(),
        source: e,
    })
}

// -----------------------------------------------------------------------------
// Run lock
// -----------------------------------------------------------------------------

pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

// One sync run per state directory at a time; the diff/persist sequence is a
// read-modify-write on the baseline files.
pub fn lock_state_dir(dir: &Path) -> Result<LockGuard> {
    let path = dir.join("LOCK");
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| SyncError::io("open lock file", &path, e))?;

    file.try_lock_exclusive()
        .map_err(|_| SyncError::Locked { path })?;

    Ok(LockGuard { file })
}

// -----------------------------------------------------------------------------
// Diff
// -----------------------------------------------------------------------------

pub fn diff(current: &Snapshot, previous: &Snapshot) -> Changeset {
    let mut changes = Changeset::default();

    for path in current.files.keys() {
        if !previous.files.contains_key(path) {
            changes.files_to_add.push(path.clone());
        }
    }

    // The update check only visits paths the previous run knew about; a path
    // that is new this run has no stored record to compare against.
    for (path, old) in &previous.files {
        match current.files.get(path) {
            None => changes.files_to_delete.push(path.clone()),
            Some(new) => {
                // Exact match on both fields; mtimes round-trip through the
                // store bit-for-bit, so equal means untouched.
                if new.size != old.size || new.mtime != old.mtime {
                    changes.files_to_update.push(path.clone());
                }
            }
        }
    }

    for dir in &current.dirs {
        if !previous.dirs.contains(dir) {
            changes.dirs_to_add.push(dir.clone());
        }
    }
    for dir in &previous.dirs {
        if !current.dirs.contains(dir) {
            changes.dirs_to_delete.push(dir.clone());
        }
    }

    changes
}

// -----------------------------------------------------------------------------
// Duplicate removal
// -----------------------------------------------------------------------------

pub fn hash_file(path: &Path) -> String {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return String::new(),
    };
    let mut hasher = Sha256::new();
    if io::copy(&mut file, &mut hasher).is_err() {
        return String::new();
    }
    hex::encode(hasher.finalize())
}

// Drops files under target_root whose content already exists somewhere under
// reference_root. Size index first, hashing only on size collisions.
pub fn remove_duplicates(target_root: &Path, reference_root: &Path) -> Result<usize> {
    if !reference_root.is_dir() {
        return Ok(0);
    }

    let mut by_size: HashMap<u64, Vec<PathBuf>> = HashMap::new();
    for entry in WalkDir::new(reference_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            by_size.entry(meta.len()).or_default().push(entry.into_path());
        }
    }

    let mut ref_hashes: HashMap<PathBuf, String> = HashMap::new();
    let mut removed = 0;

    for entry in WalkDir::new(target_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        let candidates = match by_size.get(&size) {
            Some(c) => c,
            None => continue,
        };

        let target_hash = hash_file(entry.path());
        if target_hash.is_empty() {
            continue;
        }

        let is_dup = candidates.iter().any(|c| {
            let h = ref_hashes
                .entry(c.clone())
                .or_insert_with(|| hash_file(c));
            *h == target_hash
        });

        if is_dup {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    info!("duplicate removed: {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => warn!(
                    "could not remove duplicate {}: {e}",
                    entry.path().display()
                ),
            }
        }
    }

    Ok(removed)
}

// -----------------------------------------------------------------------------
// Pull-side housekeeping
// -----------------------------------------------------------------------------

// Zero-size files go first, then the directories they may have emptied.
pub fn clean_pull_tree(root: &Path) -> Result<(usize, usize)> {
    let mut zero_removed = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| SyncError::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|e| SyncError::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;
        if meta.len() == 0 {
            fs::remove_file(entry.path())
                .map_err(|e| SyncError::io("remove", entry.path(), e))?;
            zero_removed += 1;
        }
    }

    // contents_first walks bottom-up, so emptied chains collapse in one pass.
    let mut dirs_removed = 0;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() && fs::remove_dir(entry.path()).is_ok() {
            dirs_removed += 1;
        }
    }

    Ok((zero_removed, dirs_removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snap(root: &str, files: &[(&str, u64, f64)], dirs: &[&str]) -> Snapshot {
        let mut s = Snapshot::empty(root);
        for (p, size, mtime) in files {
            s.files.insert(
                p.to_string(),
                FileRecord {
                    size: *size,
                    mtime: *mtime,
                },
            );
        }
        for d in dirs {
            s.dirs.insert(d.to_string());
        }
        s
    }

    #[test]
    fn diff_detects_added_file() {
        let previous = snap("/r", &[("/r/a.txt", 100, 1000.5)], &[]);
        let current = snap(
            "/r",
            &[("/r/a.txt", 100, 1000.5), ("/r/b.txt", 50, 2000.0)],
            &[],
        );

        let changes = diff(&current, &previous);
        assert_eq!(changes.files_to_add, vec!["/r/b.txt"]);
        assert!(changes.files_to_update.is_empty());
        assert!(changes.files_to_delete.is_empty());
    }

    #[test]
    fn diff_detects_size_change_as_update() {
        let previous = snap("/r", &[("/r/a.txt", 100, 1000.5)], &[]);
        let current = snap("/r", &[("/r/a.txt", 200, 1000.5)], &[]);

        let changes = diff(&current, &previous);
        assert!(changes.files_to_add.is_empty());
        assert_eq!(changes.files_to_update, vec!["/r/a.txt"]);
    }

    #[test]
    fn diff_detects_mtime_change_as_update() {
        let previous = snap("/r", &[("/r/a.txt", 100, 1000.5)], &[]);
        let current = snap("/r", &[("/r/a.txt", 100, 1000.500001)], &[]);

        let changes = diff(&current, &previous);
        assert_eq!(changes.files_to_update, vec!["/r/a.txt"]);
    }

    #[test]
    fn diff_detects_deleted_file() {
        let previous = snap(
            "/r",
            &[("/r/a.txt", 100, 1.0), ("/r/b.txt", 50, 2.0)],
            &[],
        );
        let current = snap("/r", &[("/r/a.txt", 100, 1.0)], &[]);

        let changes = diff(&current, &previous);
        assert_eq!(changes.files_to_delete, vec!["/r/b.txt"]);
        assert!(changes.files_to_update.is_empty());
    }

    #[test]
    fn diff_detects_dir_add_and_delete() {
        let previous = snap("/r", &[], &["/r/x"]);
        let current = snap("/r", &[], &["/r/x", "/r/y"]);

        let changes = diff(&current, &previous);
        assert_eq!(changes.dirs_to_add, vec!["/r/y"]);
        assert!(changes.dirs_to_delete.is_empty());

        let reverse = diff(&previous, &current);
        assert_eq!(reverse.dirs_to_delete, vec!["/r/y"]);
    }

    #[test]
    fn diff_against_empty_previous_adds_everything() {
        let previous = Snapshot::empty("/r");
        let current = snap(
            "/r",
            &[("/r/a.txt", 1, 1.0), ("/r/b.txt", 2, 2.0)],
            &["/r/sub"],
        );

        let mut changes = diff(&current, &previous);
        changes.files_to_add.sort();
        assert_eq!(changes.files_to_add, vec!["/r/a.txt", "/r/b.txt"]);
        assert!(changes.files_to_update.is_empty());
        assert!(changes.files_to_delete.is_empty());
        assert_eq!(changes.dirs_to_add, vec!["/r/sub"]);
    }

    #[test]
    fn diff_lists_are_disjoint() {
        let previous = snap(
            "/r",
            &[
                ("/r/same.txt", 1, 1.0),
                ("/r/changed.txt", 2, 2.0),
                ("/r/gone.txt", 3, 3.0),
            ],
            &[],
        );
        let current = snap(
            "/r",
            &[
                ("/r/same.txt", 1, 1.0),
                ("/r/changed.txt", 2, 9.0),
                ("/r/new.txt", 4, 4.0),
            ],
            &[],
        );

        let changes = diff(&current, &previous);
        for path in &changes.files_to_add {
            assert!(!changes.files_to_update.contains(path));
            assert!(!changes.files_to_delete.contains(path));
        }
        for path in &changes.files_to_update {
            assert!(!changes.files_to_delete.contains(path));
        }
        assert_eq!(changes.files_to_add, vec!["/r/new.txt"]);
        assert_eq!(changes.files_to_update, vec!["/r/changed.txt"]);
        assert_eq!(changes.files_to_delete, vec!["/r/gone.txt"]);
    }

    #[test]
    fn diff_is_repeatable() {
        let previous = snap("/r", &[("/r/a", 1, 1.5), ("/r/b", 2, 2.5)], &["/r/d"]);
        let current = snap("/r", &[("/r/a", 1, 1.5), ("/r/c", 3, 3.5)], &["/r/e"]);

        let mut first = diff(&current, &previous);
        let mut second = diff(&current, &previous);
        first.files_to_add.sort();
        second.files_to_add.sort();
        assert_eq!(first, second);
    }

    #[test]
    fn snapshot_key_separates_same_basename_roots() {
        let a = snapshot_key(Path::new("/home/u/Documents/Private"));
        let b = snapshot_key(Path::new("/home/u/Backup/Private"));
        assert_ne!(a, b);
        assert!(a.ends_with("_Private"));
        assert!(b.ends_with("_Private"));

        // Stable across calls.
        assert_eq!(a, snapshot_key(Path::new("/home/u/Documents/Private")));
    }

    #[test]
    fn take_snapshot_records_nested_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();

        let snapshot = take_snapshot(dir.path(), &[]).unwrap();
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.dirs.len(), 2);

        let key = dir.path().join("root.txt").to_string_lossy().into_owned();
        assert_eq!(snapshot.files[&key].size, 4);
        assert!(snapshot
            .dirs
            .contains(&dir.path().join("sub/deep").to_string_lossy().into_owned()));
    }

    #[test]
    fn take_snapshot_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            take_snapshot(&missing, &[]),
            Err(SyncError::BadRoot { .. })
        ));
    }

    #[test]
    fn take_snapshot_applies_exclusions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.txt"), "k").unwrap();
        fs::write(dir.path().join("skip.log"), "s").unwrap();

        let snapshot = take_snapshot(dir.path(), &["*.log".into()]).unwrap();
        assert_eq!(snapshot.files.len(), 1);
        let keys: Vec<_> = snapshot.files.keys().collect();
        assert!(keys[0].ends_with("keep.txt"));
    }

    #[test]
    fn store_roundtrip_preserves_records_exactly() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let mut snapshot = Snapshot::empty("/home/u/Documents/Stuff");
        snapshot.files.insert(
            "/home/u/Documents/Stuff/a.txt".into(),
            FileRecord {
                size: 100,
                mtime: 1000.5,
            },
        );
        snapshot.files.insert(
            "/home/u/Documents/Stuff/фото/лето.jpg".into(),
            FileRecord {
                size: 123_456,
                mtime: 1_700_000_000.123456,
            },
        );
        snapshot.dirs.insert("/home/u/Documents/Stuff/фото".into());

        store.save(&snapshot).unwrap();
        let loaded = store.load(Path::new("/home/u/Documents/Stuff")).unwrap();

        assert_eq!(loaded.files, snapshot.files);
        assert_eq!(loaded.dirs, snapshot.dirs);
    }

    #[test]
    fn store_load_without_prior_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let loaded = store.load(Path::new("/never/saved")).unwrap();
        assert!(loaded.files.is_empty());
        assert!(loaded.dirs.is_empty());
    }

    #[test]
    fn captured_and_reloaded_snapshot_diffs_clean() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::write(root.join("sub/b.txt"), "beta").unwrap();

        let state = TempDir::new().unwrap();
        let store = SnapshotStore::open(state.path()).unwrap();

        let first = take_snapshot(&root, &[]).unwrap();
        store.save(&first).unwrap();

        // Nothing touched in between: recapture must diff empty against the
        // reloaded baseline, sub-second mtimes included.
        let baseline = store.load(&root).unwrap();
        let second = take_snapshot(&root, &[]).unwrap();
        let changes = diff(&second, &baseline);
        assert!(changes.is_empty(), "spurious changes: {changes:?}");
    }

    #[test]
    fn lock_is_exclusive_per_state_dir() {
        let dir = TempDir::new().unwrap();

        let guard = lock_state_dir(dir.path()).unwrap();
        assert!(matches!(
            lock_state_dir(dir.path()),
            Err(SyncError::Locked { .. })
        ));

        drop(guard);
        assert!(lock_state_dir(dir.path()).is_ok());
    }

    #[test]
    fn remove_duplicates_drops_only_matching_content() {
        let reference = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::create_dir_all(reference.path().join("archive")).unwrap();
        fs::write(reference.path().join("archive/known.jpg"), "same bytes").unwrap();

        fs::write(target.path().join("copy.jpg"), "same bytes").unwrap();
        fs::write(target.path().join("other.jpg"), "other byte").unwrap();

        let removed = remove_duplicates(target.path(), reference.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!target.path().join("copy.jpg").exists());
        assert!(target.path().join("other.jpg").exists());
    }

    #[test]
    fn clean_pull_tree_removes_zero_files_then_empty_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join("kept")).unwrap();
        fs::write(dir.path().join("a/b/empty.bin"), "").unwrap();
        fs::write(dir.path().join("kept/full.bin"), "data").unwrap();

        let (zero, dirs) = clean_pull_tree(dir.path()).unwrap();
        assert_eq!(zero, 1);
        assert_eq!(dirs, 2); // a/b emptied, then a
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("kept/full.bin").exists());
    }
}
