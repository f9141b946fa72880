use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};

const DEFAULT_LOG_MAX_BYTES: u64 = 10_000_000; // 10MB
const DEFAULT_LOG_MAX_FILES: usize = 5;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn max_bytes() -> u64 {
    env_u64("VOICEMORPH_LOG_MAX_BYTES", DEFAULT_LOG_MAX_BYTES)
}

fn max_files() -> usize {
    env_usize("VOICEMORPH_LOG_MAX_FILES", DEFAULT_LOG_MAX_FILES)
}

pub fn log_path(log_dir: &Path) -> PathBuf {
    log_dir.join("voicemorph.log")
}

/// Size-based rotation, performed once per launch.
///
/// The backend child holds the log file open for the whole run and the
/// tailer is positioned inside it, so renaming mid-run would strand both.
/// Rotating before either exists avoids the problem entirely.
pub fn rotate_on_launch_best_effort(log_dir: &Path) {
    let p = log_path(log_dir);
    let max_b = max_bytes();
    let max_f = max_files();
    if max_f == 0 {
        return;
    }

    let len = match std::fs::metadata(&p) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if len <= max_b {
        return;
    }

    // Remove the oldest first so renames cannot fail on an existing dest.
    let oldest = log_dir.join(format!("voicemorph.log.{max_f}"));
    if oldest.exists() {
        let _ = std::fs::remove_file(&oldest);
    }
    for i in (1..max_f).rev() {
        let src = log_dir.join(format!("voicemorph.log.{i}"));
        let dst = log_dir.join(format!("voicemorph.log.{}", i + 1));
        if src.exists() {
            let _ = std::fs::rename(&src, &dst);
        }
    }
    let first = log_dir.join("voicemorph.log.1");
    let _ = std::fs::rename(&p, &first);
}

/// Append handle for redirecting the backend child's stdout/stderr.
pub fn open_for_append(log_dir: &Path) -> Result<File> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir failed: {}", log_dir.display()))?;
    let p = log_path(log_dir);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&p)
        .with_context(|| format!("open log file failed: {}", p.display()))
}

fn write_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Wrapper-side log line. Interleaves with the backend's raw output in the
/// same file; the tailer treats both the same way.
pub fn append_line_best_effort(log_dir: &Path, level: &str, msg: &str) {
    let _guard = write_lock().lock().unwrap();
    let mut f = match open_for_append(log_dir) {
        Ok(f) => f,
        Err(e) => {
            crate::safe_eprintln!("applog: open failed: {e:#}");
            return;
        }
    };
    if let Err(e) = writeln!(f, "{} wrapper {} {}", now_ms(), level, msg) {
        crate::safe_eprintln!("applog: write failed: {e}");
    }
}

pub fn info(log_dir: &Path, msg: &str) {
    append_line_best_effort(log_dir, "INFO", msg);
}

pub fn error(log_dir: &Path, msg: &str) {
    append_line_best_effort(log_dir, "ERROR", msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_dir_and_file() {
        let td = tempfile::tempdir().expect("tempdir");
        let dir = td.path().join("nested");
        info(&dir, "hello from the wrapper");
        let raw = std::fs::read_to_string(log_path(&dir)).expect("read log");
        assert!(raw.contains("wrapper INFO hello from the wrapper"));
    }

    #[test]
    fn launch_rotation_shifts_backups() {
        let td = tempfile::tempdir().expect("tempdir");
        let dir = td.path().to_path_buf();
        std::env::set_var("VOICEMORPH_LOG_MAX_BYTES", "10");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(log_path(&dir), b"0123456789abcdef").unwrap();
        std::fs::write(dir.join("voicemorph.log.1"), b"older").unwrap();

        rotate_on_launch_best_effort(&dir);

        assert!(!log_path(&dir).exists());
        assert_eq!(
            std::fs::read_to_string(dir.join("voicemorph.log.1")).unwrap(),
            "0123456789abcdef"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("voicemorph.log.2")).unwrap(),
            "older"
        );
        std::env::remove_var("VOICEMORPH_LOG_MAX_BYTES");
    }

    #[test]
    fn small_log_is_left_alone() {
        let td = tempfile::tempdir().expect("tempdir");
        let dir = td.path().to_path_buf();
        std::fs::write(log_path(&dir), b"tiny").unwrap();
        rotate_on_launch_best_effort(&dir);
        assert_eq!(std::fs::read_to_string(log_path(&dir)).unwrap(), "tiny");
    }
}
