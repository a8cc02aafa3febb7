use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::engine::{
    clean_pull_tree, diff, lock_state_dir, remove_duplicates, take_snapshot, SnapshotStore,
};
use crate::error::{Result, SyncError};
use crate::models::SyncConfig;
use crate::transport::Transport;

// -----------------------------------------------------------------------------
// Device discovery
// -----------------------------------------------------------------------------

// gvfs mounts one directory per connected MTP device; anything other than
// exactly one means the user has to sort the cables out first.
pub fn discover_device_root(cfg: &SyncConfig) -> Result<PathBuf> {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .ok_or(SyncError::NoRuntimeDir)?;
    let gvfs = runtime_dir.join("gvfs");

    let entries = fs::read_dir(&gvfs).map_err(|_| SyncError::DeviceNotFound {
        path: gvfs.clone(),
    })?;
    let mut mounts: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();

    match mounts.len() {
        0 => Err(SyncError::DeviceNotFound { path: gvfs }),
        1 => {
            let base = mounts.remove(0).join(&cfg.device_subdir);
            if base.is_dir() {
                Ok(base)
            } else {
                Err(SyncError::DeviceUnreadable { path: base })
            }
        }
        _ => Err(SyncError::MultipleDevices { path: gvfs }),
    }
}

// -----------------------------------------------------------------------------
// Orchestrator
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOutcome {
    pub files_copied: usize,
    pub files_deleted: usize,
    pub dirs_added: usize,
    pub dirs_deleted: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub files_pulled: usize,
    pub duplicates_removed: usize,
    pub zero_files_removed: usize,
    pub empty_dirs_removed: usize,
    pub files_pushed: usize,
    pub files_deleted: usize,
    pub dirs_added: usize,
    pub dirs_deleted: usize,
}

pub struct Syncer<'a> {
    cfg: &'a SyncConfig,
    store: SnapshotStore,
    transport: &'a dyn Transport,
}

fn rebase(path: &str, from: &Path, to: &Path) -> PathBuf {
    let path = Path::new(path);
    match path.strip_prefix(from) {
        Ok(rel) => to.join(rel),
        Err(_) => to.join(path.file_name().unwrap_or_default()),
    }
}

impl<'a> Syncer<'a> {
    pub fn new(cfg: &'a SyncConfig, store: SnapshotStore, transport: &'a dyn Transport) -> Self {
        Syncer {
            cfg,
            store,
            transport,
        }
    }

    // Capture, diff against the stored baseline, apply, then overwrite the
    // baseline. Deletions run before creations so a path that changed type
    // does not collide; directories exist before any file lands in them.
    // An error on any step leaves the old baseline in place, so the next run
    // recomputes the same changeset.
    pub fn push_tree(&self, source_root: &Path, dest_root: &Path) -> Result<PushOutcome> {
        let current = take_snapshot(source_root, &self.cfg.exclusions)?;
        let previous = self.store.load(source_root)?;
        let changes = diff(&current, &previous);

        if changes.is_empty() {
            debug!("push {}: nothing changed", source_root.display());
        } else {
            debug!(
                "push {}: {} change(s): +{} ~{} -{} files, +{}/-{} dirs",
                source_root.display(),
                changes.total(),
                changes.files_to_add.len(),
                changes.files_to_update.len(),
                changes.files_to_delete.len(),
                changes.dirs_to_add.len(),
                changes.dirs_to_delete.len()
            );
        }

        let mut outcome = PushOutcome::default();

        for path in &changes.files_to_delete {
            let dest = rebase(path, source_root, dest_root);
            if self.transport.exists(&dest) {
                self.transport.delete(&dest)?;
                outcome.files_deleted += 1;
            }
        }

        for path in &changes.dirs_to_delete {
            let dest = rebase(path, source_root, dest_root);
            if self.transport.exists(&dest) {
                self.transport.delete(&dest)?;
                outcome.dirs_deleted += 1;
            }
        }

        for path in &changes.dirs_to_add {
            let dest = rebase(path, source_root, dest_root);
            if !self.transport.exists(&dest) {
                self.transport.make_dir_all(&dest)?;
                outcome.dirs_added += 1;
            }
        }

        for path in changes.files_to_add.iter().chain(&changes.files_to_update) {
            let dest = rebase(path, source_root, dest_root);
            if let Some(parent) = dest.parent() {
                if !self.transport.exists(parent) {
                    self.transport.make_dir_all(parent)?;
                }
            }
            self.transport.copy(Path::new(path), &dest)?;
            outcome.files_copied += 1;
        }

        self.store.save(&current)?;
        Ok(outcome)
    }

    // Every pull is a full refresh into a fresh destination; no baseline is
    // consulted, so nothing here can go stale. Paths mirror their location
    // relative to the device base, not the configured subdirectory.
    pub fn pull_tree(
        &self,
        device_dir: &Path,
        device_base: &Path,
        dest_root: &Path,
    ) -> Result<usize> {
        let mut copied = 0;

        for entry in walkdir::WalkDir::new(device_dir) {
            let entry = entry.map_err(|e| SyncError::Walk {
                path: device_dir.to_path_buf(),
                source: e,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let src = entry.path();
            let dest = match src.strip_prefix(device_base) {
                Ok(rel) => dest_root.join(rel),
                Err(_) => continue,
            };

            if let Some(parent) = dest.parent() {
                if !self.transport.exists(parent) {
                    self.transport.make_dir_all(parent)?;
                }
            }
            self.transport.copy(src, &dest)?;
            copied += 1;
        }

        Ok(copied)
    }
}

// -----------------------------------------------------------------------------
// Full pass
// -----------------------------------------------------------------------------

pub fn run_full(
    cfg: &SyncConfig,
    state_dir: &Path,
    device_base: &Path,
    transport: &dyn Transport,
    tx: &mpsc::Sender<(f32, String)>,
) -> Result<SyncReport> {
    let _lock = lock_state_dir(state_dir)?;
    let store = SnapshotStore::open(state_dir.join("snapshots"))?;
    let syncer = Syncer::new(cfg, store, transport);
    let mut report = SyncReport::default();

    // Phone -> computer, into a fresh timestamped folder.
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let pull_root = cfg.pull_root.join(format!("FromPhone_{stamp}"));
    tx.send((2.0, "Copying files from the phone...".into())).ok();

    let pull_total = cfg.dirs_from_device.len().max(1) as f32;
    for (idx, rel) in cfg.dirs_from_device.iter().enumerate() {
        tx.send((
            2.0 + (idx as f32 / pull_total) * 38.0,
            format!("Pulling {rel}..."),
        ))
        .ok();

        let device_dir = device_base.join(rel);
        if !device_dir.is_dir() {
            warn!(
                "device directory {} is not present, skipping",
                device_dir.display()
            );
            continue;
        }
        report.files_pulled += syncer.pull_tree(&device_dir, device_base, &pull_root)?;
    }
    info!(
        "pulled {} file(s) into {}",
        report.files_pulled,
        pull_root.display()
    );

    if pull_root.is_dir() {
        tx.send((
            45.0,
            "Removing duplicates of already archived files...".into(),
        ))
        .ok();
        report.duplicates_removed = remove_duplicates(&pull_root, &cfg.doc_root)?;

        tx.send((
            55.0,
            "Deleting zero size files and empty directories...".into(),
        ))
        .ok();
        let (zero, empty) = clean_pull_tree(&pull_root)?;
        report.zero_files_removed = zero;
        report.empty_dirs_removed = empty;
    }

    // Computer -> phone, incremental against the stored baselines.
    tx.send((60.0, "Copying files from the computer to the phone...".into()))
        .ok();
    let transfer_root = device_base.join(&cfg.transfer_subdir);

    let push_total = cfg.dirs_to_device.len().max(1) as f32;
    for (idx, rel) in cfg.dirs_to_device.iter().enumerate() {
        tx.send((
            60.0 + (idx as f32 / push_total) * 38.0,
            format!("Pushing {rel}..."),
        ))
        .ok();

        let source = cfg.doc_root.join(rel);
        let dest = transfer_root.join(rel);
        let outcome = syncer.push_tree(&source, &dest)?;
        report.files_pushed += outcome.files_copied;
        report.files_deleted += outcome.files_deleted;
        report.dirs_added += outcome.dirs_added;
        report.dirs_deleted += outcome.dirs_deleted;
    }

    info!("sync pass finished: {report:?}");
    tx.send((
        100.0,
        format!(
            "✅ Done: {} pulled, {} duplicate(s) dropped, {} cleaned, {} pushed, {} deleted.",
            report.files_pulled,
            report.duplicates_removed,
            report.zero_files_removed + report.empty_dirs_removed,
            report.files_pushed,
            report.files_deleted
        ),
    ))
    .ok();

    Ok(report)
}
