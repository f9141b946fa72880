use std::{path::Path, time::Duration};

use anyhow::Result;

use crate::paths;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_BACKEND_PORT: u16 = 6969;
const DEFAULT_LOADING_PORT: u16 = 5678;
const DEFAULT_READY_TIMEOUT_MS: u64 = 5 * 60 * 1000;
const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 500;
const READY_POLL_INTERVAL_MIN_MS: u64 = 50;
const READY_POLL_INTERVAL_MAX_MS: u64 = 10_000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<u16>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Everything the startup sequence needs, resolved once at launch.
/// Defaults are compiled in; `VOICEMORPH_*` variables override them.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub host: String,
    pub backend_port: u16,
    pub loading_port: u16,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl LaunchConfig {
    pub fn from_env() -> Self {
        let interval = env_u64(
            "VOICEMORPH_READY_POLL_INTERVAL_MS",
            DEFAULT_READY_POLL_INTERVAL_MS,
        )
        .clamp(READY_POLL_INTERVAL_MIN_MS, READY_POLL_INTERVAL_MAX_MS);
        Self {
            host: DEFAULT_HOST.to_string(),
            backend_port: env_u16("VOICEMORPH_BACKEND_PORT", DEFAULT_BACKEND_PORT),
            loading_port: env_u16("VOICEMORPH_LOADING_PORT", DEFAULT_LOADING_PORT),
            ready_timeout: Duration::from_millis(env_u64(
                "VOICEMORPH_READY_TIMEOUT_MS",
                DEFAULT_READY_TIMEOUT_MS,
            )),
            ready_poll_interval: Duration::from_millis(interval),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }

    pub fn backend_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.backend_port)
    }

    pub fn loading_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.loading_port)
    }
}

/// Environment handed to the backend child process.
///
/// The ML stack reads its cache locations and Metal knobs from the
/// environment; building them here and applying them to the `Command`
/// keeps the wrapper's own process environment untouched.
#[derive(Debug, Clone)]
pub struct BackendEnv {
    pairs: Vec<(String, String)>,
}

impl BackendEnv {
    pub fn from_cache_root(cache_root: &Path) -> Self {
        let hf = cache_root.join("huggingface");
        let torch = cache_root.join("torch");
        let gradio = cache_root.join("gradio");
        Self {
            pairs: vec![
                // Fall back to CPU for Metal operators MPS does not implement,
                // instead of aborting mid-inference.
                ("PYTORCH_ENABLE_MPS_FALLBACK".to_string(), "1".to_string()),
                ("HF_HOME".to_string(), hf.display().to_string()),
                ("TORCH_HOME".to_string(), torch.display().to_string()),
                ("GRADIO_TEMP_DIR".to_string(), gradio.display().to_string()),
            ],
        }
    }

    pub fn resolve() -> Result<Self> {
        let root = paths::cache_root()?;
        std::fs::create_dir_all(&root).ok();
        Ok(Self::from_cache_root(&root))
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn apply(&self, cmd: &mut std::process::Command) {
        for (k, v) in &self.pairs {
            cmd.env(k, v);
        }
    }
}
