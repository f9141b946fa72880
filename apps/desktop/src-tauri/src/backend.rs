use std::{
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};

use crate::{applog, config::BackendEnv};

/// Where the Gradio application lives. Precedence: explicit env override,
/// then the bundle's resources, then the repo-local dev checkout.
pub fn resolve_backend_dir() -> Result<PathBuf> {
    if let Ok(raw) = std::env::var("VOICEMORPH_BACKEND_DIR") {
        let t = raw.trim();
        if !t.is_empty() {
            let p = PathBuf::from(t);
            if p.exists() {
                return Ok(p);
            }
            return Err(anyhow!(
                "E_BACKEND_NOT_FOUND: VOICEMORPH_BACKEND_DIR points to missing directory: {}",
                p.display()
            ));
        }
    }

    if let Some(bundled) = bundled_backend_dir() {
        if bundled.exists() {
            return Ok(bundled);
        }
    }

    let dev = dev_backend_dir();
    if dev.exists() {
        return Ok(dev);
    }
    Err(anyhow!(
        "E_BACKEND_NOT_FOUND: no backend directory (set VOICEMORPH_BACKEND_DIR, or place the app in its bundle, or create {})",
        dev.display()
    ))
}

/// `<App>.app/Contents/MacOS/<exe>` -> `<App>.app/Contents/Resources/backend`.
fn bundled_backend_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let contents = exe.parent()?.parent()?;
    Some(contents.join("Resources").join("backend"))
}

fn dev_backend_dir() -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.ancestors()
        .nth(3)
        .map(|root| root.join("backend"))
        .unwrap_or_else(|| PathBuf::from("backend"))
}

/// The Python interpreter that runs the backend. Precedence: explicit env
/// override, then the backend's own virtualenv.
pub fn resolve_python(backend_dir: &Path) -> Result<PathBuf> {
    if let Ok(raw) = std::env::var("VOICEMORPH_PYTHON") {
        let t = raw.trim();
        if !t.is_empty() {
            let p = PathBuf::from(t);
            if p.exists() {
                return Ok(p);
            }
            return Err(anyhow!(
                "E_PYTHON_NOT_READY: VOICEMORPH_PYTHON points to missing file: {}",
                p.display()
            ));
        }
    }

    let p = venv_python_path(backend_dir);
    if p.exists() {
        return Ok(p);
    }
    Err(anyhow!(
        "E_PYTHON_NOT_READY: missing python interpreter at {} (set VOICEMORPH_PYTHON or create the backend .venv)",
        p.display()
    ))
}

fn venv_python_path(backend_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        backend_dir.join(".venv").join("Scripts").join("python.exe")
    } else {
        backend_dir.join(".venv").join("bin").join("python")
    }
}

pub struct BackendProcess {
    pid: u32,
    child: Arc<Mutex<Option<Child>>>,
}

impl BackendProcess {
    /// Spawn `python -u app.py --host .. --port ..` with stdout/stderr
    /// appended to the application log so the tailer sees everything the
    /// ML stack prints.
    pub fn spawn(host: &str, port: u16, env: &BackendEnv, log_dir: &Path) -> Result<Self> {
        let backend_dir = resolve_backend_dir()?;
        let python = resolve_python(&backend_dir)?;

        let stdout = applog::open_for_append(log_dir)?;
        let stderr = stdout.try_clone().context("clone log handle failed")?;

        let mut cmd = Command::new(&python);
        cmd.current_dir(&backend_dir)
            .args(["-u", "app.py", "--host", host, "--port", &port.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        env.apply(&mut cmd);

        let child = cmd.spawn().with_context(|| {
            format!(
                "E_BACKEND_SPAWN: failed to spawn {} in {}",
                python.display(),
                backend_dir.display()
            )
        })?;
        let pid = child.id();
        applog::info(
            log_dir,
            &format!("backend started (pid {pid}) from {}", backend_dir.display()),
        );

        Ok(Self {
            pid,
            child: Arc::new(Mutex::new(Some(child))),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait on the child from a background thread and log how it exited.
    /// An early exit is recorded but not surfaced to the UI here; the
    /// readiness timeout is the single authority for the error page.
    pub fn spawn_exit_logger(&self, log_dir: &Path) {
        let child = self.child.clone();
        let log_dir = log_dir.to_path_buf();
        let _ = std::thread::Builder::new()
            .name("backend_wait".to_string())
            .spawn(move || {
                // Take the handle so kill_best_effort afterwards is a no-op.
                let taken = child.lock().unwrap().take();
                let Some(mut c) = taken else {
                    return;
                };
                match c.wait() {
                    Ok(status) => {
                        applog::info(&log_dir, &format!("backend exited: {status}"));
                    }
                    Err(e) => {
                        applog::error(&log_dir, &format!("backend wait failed: {e}"));
                    }
                }
            });
    }

    /// Signal the child by pid. The exit logger (if running) reaps it;
    /// signalling an already-exited pid just fails quietly.
    pub fn kill_best_effort(&self) {
        let _ = kill_pid(self.pid);
        if let Some(mut c) = self.child.lock().unwrap().take() {
            let _ = c.wait();
        }
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .context("kill failed")?;
    if !status.success() {
        return Err(anyhow!("kill exit={status}"));
    }
    Ok(())
}

#[cfg(windows)]
fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status()
        .context("taskkill failed")?;
    if !status.success() {
        return Err(anyhow!("taskkill exit={status}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn resolve_python_requires_config() {
        let _g = env_lock().lock().unwrap();
        std::env::remove_var("VOICEMORPH_PYTHON");
        let td = tempfile::tempdir().expect("tempdir");
        let err = resolve_python(td.path()).unwrap_err();
        assert!(err.to_string().contains("E_PYTHON_NOT_READY"));
    }

    #[test]
    fn resolve_python_prefers_explicit_env_path() {
        let _g = env_lock().lock().unwrap();
        let td = tempfile::tempdir().expect("tempdir");
        let py = td.path().join(if cfg!(windows) { "python.exe" } else { "python" });
        std::fs::write(&py, b"x").expect("write");
        std::env::set_var("VOICEMORPH_PYTHON", py.display().to_string());
        let got = resolve_python(td.path()).expect("resolve");
        assert_eq!(got, py);
        std::env::remove_var("VOICEMORPH_PYTHON");
    }

    #[test]
    fn resolve_python_uses_backend_venv() {
        let _g = env_lock().lock().unwrap();
        std::env::remove_var("VOICEMORPH_PYTHON");
        let td = tempfile::tempdir().expect("tempdir");
        let py = venv_python_path(td.path());
        std::fs::create_dir_all(py.parent().expect("parent")).expect("mkdir");
        std::fs::write(&py, b"x").expect("write");

        let got = resolve_python(td.path()).expect("resolve");
        assert_eq!(got, py);
    }

    #[test]
    fn resolve_backend_dir_prefers_env_override() {
        let _g = env_lock().lock().unwrap();
        let td = tempfile::tempdir().expect("tempdir");
        std::env::set_var("VOICEMORPH_BACKEND_DIR", td.path().display().to_string());
        let got = resolve_backend_dir().expect("resolve");
        assert_eq!(got, td.path());
        std::env::remove_var("VOICEMORPH_BACKEND_DIR");
    }

    #[test]
    fn resolve_backend_dir_rejects_missing_override() {
        let _g = env_lock().lock().unwrap();
        std::env::set_var("VOICEMORPH_BACKEND_DIR", "/definitely/not/here");
        let err = resolve_backend_dir().unwrap_err();
        assert!(err.to_string().contains("E_BACKEND_NOT_FOUND"));
        std::env::remove_var("VOICEMORPH_BACKEND_DIR");
    }
}
