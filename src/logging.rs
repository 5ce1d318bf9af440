//! Plain-text debug log for the client.
//!
//! Off unless `--logs` is given. Lines that may carry user content (drafts,
//! transcripts, replies) additionally need `--log-content`. The file rolls
//! over to `<name>.1` when it reaches the size cap, keeping one backup.

use crate::config::AppConfig;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const LOG_PATH_ENV: &str = "ESSENCE_LOG";
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_SINK: OnceLock<Mutex<Option<RollingFile>>> = OnceLock::new();

/// Where debug lines go: `ESSENCE_LOG`, or `essence.log` in the temp dir.
pub fn log_file_path() -> PathBuf {
    env::var(LOG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("essence.log"))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

struct RollingFile {
    path: PathBuf,
    file: File,
    len: u64,
    cap: u64,
}

impl RollingFile {
    fn open(path: PathBuf, cap: u64) -> Option<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut rolling = Self {
            path,
            file,
            len,
            cap,
        };
        if rolling.len >= cap {
            rolling.roll();
        }
        Some(rolling)
    }

    /// Move the current file to the backup slot and start empty.
    fn roll(&mut self) {
        let _ = fs::rename(&self.path, backup_path(&self.path));
        if let Ok(file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = file;
            self.len = 0;
        }
    }

    fn append(&mut self, line: &str) {
        let incoming = line.len() as u64;
        if self.len > 0 && self.len + incoming > self.cap {
            self.roll();
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.len += incoming;
        }
    }
}

// Not lock_or_recover: on poison it logs, which would re-enter this lock.
fn lock_sink() -> MutexGuard<'static, Option<RollingFile>> {
    LOG_SINK
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn configure(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(enabled && content_enabled, Ordering::Relaxed);
    let mut slot = lock_sink();
    *slot = if enabled {
        RollingFile::open(log_file_path(), LOG_MAX_BYTES)
    } else {
        None
    };
}

/// Apply `--logs`, `--log-content`, and `--no-logs`.
pub fn init_logging(config: &AppConfig) {
    configure(config.logs && !config.no_logs, config.log_content);
}

fn format_line(msg: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let current = thread::current();
    let thread_name = current.name().unwrap_or("-");
    format!("[{millis}] [{thread_name}] {msg}\n")
}

/// Append one diagnostic line. Never include user content here.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format_line(msg);
    let mut slot = lock_sink();
    if let Some(file) = slot.as_mut() {
        file.append(&line);
    }
}

/// Like [`log_debug`], for lines that may contain drafts, transcripts, or replies.
pub fn log_debug_content(msg: &str) {
    if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        log_debug(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::env_lock;

    fn scratch_path(tag: &str) -> PathBuf {
        env::temp_dir().join(format!("essence-log-{tag}-{}.log", std::process::id()))
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_file(path);
        let _ = fs::remove_file(backup_path(path));
    }

    #[test]
    fn full_file_rolls_into_backup() {
        let path = scratch_path("roll");
        cleanup(&path);
        let mut file = RollingFile::open(path.clone(), 16).expect("open log");
        file.append("0123456789\n");
        file.append("abcdefghij\n");

        assert_eq!(fs::read_to_string(&path).expect("read log"), "abcdefghij\n");
        assert_eq!(
            fs::read_to_string(backup_path(&path)).expect("read backup"),
            "0123456789\n"
        );
        cleanup(&path);
    }

    #[test]
    fn oversized_existing_file_is_rolled_on_open() {
        let path = scratch_path("oversized");
        cleanup(&path);
        fs::write(&path, "x".repeat(64)).expect("seed log");
        let file = RollingFile::open(path.clone(), 16).expect("open log");
        assert_eq!(file.len, 0);
        assert_eq!(fs::metadata(backup_path(&path)).map(|m| m.len()).ok(), Some(64));
        cleanup(&path);
    }

    #[test]
    fn lines_carry_thread_name() {
        let line = thread::Builder::new()
            .name("essence-test".to_string())
            .spawn(|| format_line("hello"))
            .expect("spawn")
            .join()
            .expect("join");
        assert!(line.contains("[essence-test] hello"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn content_logging_requires_opt_in() {
        let _guard = env_lock().lock().expect("env lock");
        let path = scratch_path("content");
        cleanup(&path);
        unsafe {
            env::set_var(LOG_PATH_ENV, &path);
        }
        configure(true, false);
        unsafe {
            env::remove_var(LOG_PATH_ENV);
        }
        log_debug("connection marker");
        log_debug_content("draft marker");
        configure(false, false);

        let contents = fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("connection marker"));
        assert!(!contents.contains("draft marker"));
        cleanup(&path);
    }
}
