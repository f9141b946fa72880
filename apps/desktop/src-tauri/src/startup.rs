use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tauri::{AppHandle, Manager};
use tokio_util::sync::CancellationToken;

use crate::{
    applog,
    backend::BackendProcess,
    config::{BackendEnv, LaunchConfig},
    loading_server::LoadingServer,
    status::StatusBoard,
    tailer::LogTailer,
    trace,
};

pub const MAIN_WINDOW: &str = "main";
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Everything the background threads share, managed as Tauri state.
pub struct StartupState {
    pub cfg: LaunchConfig,
    pub board: Arc<StatusBoard>,
    pub shutdown: CancellationToken,
    pub backend: Mutex<Option<BackendProcess>>,
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl StartupState {
    pub fn new(cfg: LaunchConfig, log_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            cfg,
            board: Arc::new(StatusBoard::new()),
            shutdown: CancellationToken::new(),
            backend: Mutex::new(None),
            log_dir,
            data_dir,
        }
    }
}

/// Bind and detach the loading server. Called before the window is created
/// so the first page load has something to talk to.
pub fn start_loading_server(state: &StartupState) -> Result<()> {
    let span = trace::Span::start(&state.data_dir, "Startup", "LOAD.server_bind", None);
    let server = match LoadingServer::bind(&state.cfg.host, state.cfg.loading_port, state.board.clone()) {
        Ok(s) => s,
        Err(e) => {
            span.err_anyhow("io", "E_LOADING_BIND", &e, None);
            return Err(e);
        }
    };
    let addr = server.local_addr()?;
    span.ok(Some(serde_json::json!({"addr": addr.to_string()})));

    let token = state.shutdown.clone();
    let data_dir = state.data_dir.clone();
    std::thread::Builder::new()
        .name("loading_server".to_string())
        .spawn(move || {
            if let Err(e) = server.run_blocking(token) {
                trace::event(
                    &data_dir,
                    "Startup",
                    "LOAD.server_run",
                    "err",
                    Some(serde_json::json!({"message": e.to_string()})),
                );
            }
        })
        .context("spawn loading server thread failed")?;
    Ok(())
}

/// Launch the backend child and the log tailer, then hand off to the
/// readiness monitor. A spawn failure is logged and traced; the loading
/// page keeps running and the readiness timeout produces the error state.
pub fn start_backend_and_monitor(app: AppHandle, state: &StartupState) {
    let env = match BackendEnv::resolve() {
        Ok(e) => e,
        Err(e) => {
            applog::error(&state.log_dir, &format!("cache env setup failed: {e:#}"));
            trace::event(
                &state.data_dir,
                "Startup",
                "BACKEND.env",
                "err",
                Some(serde_json::json!({"message": e.to_string()})),
            );
            BackendEnv::from_cache_root(&state.data_dir.join("caches"))
        }
    };

    let span = trace::Span::start(&state.data_dir, "Startup", "BACKEND.spawn", None);
    match BackendProcess::spawn(&state.cfg.host, state.cfg.backend_port, &env, &state.log_dir) {
        Ok(proc) => {
            span.ok(Some(serde_json::json!({"pid": proc.pid()})));
            proc.spawn_exit_logger(&state.log_dir);
            *state.backend.lock().unwrap() = Some(proc);
        }
        Err(e) => {
            applog::error(&state.log_dir, &format!("backend launch failed: {e:#}"));
            span.err_anyhow("process", "E_BACKEND_SPAWN", &e, None);
            // Fall through: the monitor times out and latches the error.
        }
    }

    start_tailer(state);
    start_monitor(app, state);
}

fn start_tailer(state: &StartupState) {
    let path = applog::log_path(&state.log_dir);
    let tailer = LogTailer::new(&path, state.board.clone());
    let token = state.shutdown.clone();
    let data_dir = state.data_dir.clone();
    let _ = std::thread::Builder::new()
        .name("log_tailer".to_string())
        .spawn(move || {
            if let Err(e) = tailer.run(&token) {
                trace::event(
                    &data_dir,
                    "Startup",
                    "TAIL.run",
                    "err",
                    Some(serde_json::json!({"message": e.to_string()})),
                );
            }
        });
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadyOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// Poll the backend root URL until it answers 200, the deadline passes, or
/// shutdown begins. Fixed interval, bounded per-probe timeout, no backoff:
/// the backend either comes up or it does not.
pub async fn poll_backend_ready(
    url: &str,
    ready_timeout: Duration,
    poll_interval: Duration,
    probe_timeout: Duration,
    token: &CancellationToken,
) -> ReadyOutcome {
    let client = match reqwest::Client::builder().timeout(probe_timeout).build() {
        Ok(c) => c,
        Err(_) => return ReadyOutcome::TimedOut,
    };
    let deadline = Instant::now() + ready_timeout;
    loop {
        if token.is_cancelled() {
            return ReadyOutcome::Cancelled;
        }
        if let Ok(resp) = client.get(url).send().await {
            if resp.status().as_u16() == 200 {
                return ReadyOutcome::Ready;
            }
        }
        if Instant::now() >= deadline {
            return ReadyOutcome::TimedOut;
        }
        tokio::select! {
            _ = token.cancelled() => return ReadyOutcome::Cancelled,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

fn start_monitor(app: AppHandle, state: &StartupState) {
    let cfg = state.cfg.clone();
    let board = state.board.clone();
    let token = state.shutdown.clone();
    let log_dir = state.log_dir.clone();
    let data_dir = state.data_dir.clone();

    // The monitor needs its own runtime: Tauri's setup hook offers no
    // reactor guarantee for plain threads, and blocking the main loop on a
    // five minute poll is not an option.
    let _ = std::thread::Builder::new()
        .name("ready_monitor".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    crate::safe_eprintln!("ready monitor: runtime build failed: {e}");
                    return;
                }
            };
            rt.block_on(async move {
                let url = cfg.backend_url();
                let span = trace::Span::start(
                    &data_dir,
                    "Startup",
                    "READY.poll",
                    Some(serde_json::json!({"url": url, "timeout_ms": cfg.ready_timeout.as_millis() as u64})),
                );
                let outcome = poll_backend_ready(
                    &url,
                    cfg.ready_timeout,
                    cfg.ready_poll_interval,
                    cfg.probe_timeout,
                    &token,
                )
                .await;
                match outcome {
                    ReadyOutcome::Ready => {
                        span.ok(None);
                        applog::info(&log_dir, "backend is ready; switching the window");
                        board.mark_ready();
                        navigate_to_backend(&app, &url, &data_dir);
                    }
                    ReadyOutcome::TimedOut => {
                        span.err(
                            "http",
                            "E_READY_TIMEOUT",
                            "backend readiness probe timed out",
                            None,
                        );
                        // The latch makes a late duplicate harmless; log only
                        // on the actual transition into the error state.
                        if board.mark_error(
                            "The voice engine did not start in time. Check the log for details.",
                        ) {
                            applog::error(&log_dir, "backend did not become ready in time");
                        }
                    }
                    ReadyOutcome::Cancelled => {
                        span.ok(Some(serde_json::json!({"cancelled": true})));
                    }
                }
            });
        });
}

fn navigate_to_backend(app: &AppHandle, url: &str, data_dir: &Path) {
    let parsed = match tauri::Url::parse(url) {
        Ok(u) => u,
        Err(e) => {
            crate::safe_eprintln!("navigate: bad backend url {url}: {e}");
            return;
        }
    };
    match app.get_webview_window(MAIN_WINDOW) {
        Some(mut w) => {
            if let Err(e) = w.navigate(parsed) {
                trace::event(
                    data_dir,
                    "Startup",
                    "READY.navigate",
                    "err",
                    Some(serde_json::json!({"message": e.to_string()})),
                );
            } else {
                trace::event(data_dir, "Startup", "READY.navigate", "ok", None);
            }
        }
        None => {
            trace::event(
                data_dir,
                "Startup",
                "READY.navigate",
                "err",
                Some(serde_json::json!({"message": "main window missing"})),
            );
        }
    }
}

/// Cooperative teardown: signal the background threads, stop the backend,
/// give everything a short bounded grace period, then leave. Gradio-side
/// threads can be sticky, so the process exit is still authoritative.
pub fn shutdown_and_exit(state: &StartupState) -> ! {
    applog::info(&state.log_dir, "window closed; shutting down");
    trace::event(&state.data_dir, "Shutdown", "APP.exit", "ok", None);
    state.shutdown.cancel();
    if let Some(proc) = state.backend.lock().unwrap().take() {
        proc.kill_best_effort();
    }
    std::thread::sleep(SHUTDOWN_GRACE);
    std::process::exit(0);
}
