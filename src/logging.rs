//! Tracing setup: one log file per launch under the state directory, kept to
//! a bounded count so the log folder does not grow forever.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const MAX_LOG_FILES: usize = 10;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init(log_dir: &Path) -> std::io::Result<PathBuf> {
    if LOG_GUARD.get().is_some() {
        return Ok(log_dir.to_path_buf());
    }

    fs::create_dir_all(log_dir)?;

    let name = log_file_name(Local::now());
    let appender = tracing_appender::rolling::never(log_dir, &name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    prune_old_logs(log_dir, MAX_LOG_FILES)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    let _ = LOG_GUARD.set(guard);

    Ok(log_dir.join(name))
}

fn log_file_name(now: DateTime<Local>) -> String {
    format!("phonesync_{}.log", now.format("%Y%m%d_%H%M%S"))
}

fn prune_old_logs(dir: &Path, max_files: usize) -> std::io::Result<()> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)?
        .flatten()
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("log"))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .collect();

    entries.sort_by_key(|(modified, _)| *modified);
    while entries.len() > max_files {
        let (_, path) = entries.remove(0);
        fs::remove_file(path)?;
    }
    Ok(())
}
