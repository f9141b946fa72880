use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub const APP_NAME: &str = "VoiceMorph";

/// Directory for the application log (and its rotated backups).
/// `~/Library/Logs/VoiceMorph` on macOS; the platform data dir elsewhere.
pub fn log_dir() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("VOICEMORPH_LOG_DIR") {
        let t = p.trim();
        if !t.is_empty() {
            return Ok(PathBuf::from(t));
        }
    }
    if cfg!(target_os = "macos") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("failed to locate home directory"))?;
        return Ok(home.join("Library").join("Logs").join(APP_NAME));
    }
    Ok(data_dir()?.join("logs"))
}

/// Directory for settings, trace output, and backend caches.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("VOICEMORPH_DATA_DIR") {
        let t = p.trim();
        if !t.is_empty() {
            return Ok(PathBuf::from(t));
        }
    }
    let base = dirs::data_dir().ok_or_else(|| anyhow!("failed to locate platform data directory"))?;
    Ok(base.join(APP_NAME))
}

/// Cache roots handed to the backend process so model downloads and Gradio
/// temp files stay under our data dir instead of scattered user caches.
pub fn cache_root() -> Result<PathBuf> {
    Ok(data_dir()?.join("caches"))
}
