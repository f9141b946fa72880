mod applog;
mod backend;
mod config;
mod loading_server;
mod menu;
mod panic_log;
mod paths;
mod permissions;
mod safe_print;
mod startup;
mod startup_trace;
mod status;
mod tailer;
mod trace;

use std::time::Duration;

use tauri::{Manager, WebviewUrl, WebviewWindowBuilder};

use config::LaunchConfig;
use startup::StartupState;
use status::StatusSnapshot;
use trace::Span;

fn cmd_span(state: &StartupState, step_id: &str) -> Span {
    Span::start(&state.data_dir, "Cmd", step_id, None)
}

/// Same snapshot the loading page polls over HTTP, for the backend UI or
/// a debugging console to query through Tauri.
#[tauri::command]
fn startup_status(state: tauri::State<StartupState>) -> StatusSnapshot {
    let span = cmd_span(&state, "CMD.startup_status");
    let snap = (*state.board.snapshot()).clone();
    span.ok(None);
    snap
}

#[tauri::command]
fn microphone_status(state: tauri::State<StartupState>) -> permissions::MicrophoneStatus {
    let span = cmd_span(&state, "CMD.microphone_status");
    let st = permissions::microphone_status();
    span.ok(Some(serde_json::json!({"status": st.status})));
    st
}

#[tauri::command]
async fn request_microphone_access(
    state: tauri::State<'_, StartupState>,
) -> Result<permissions::MicrophoneStatus, String> {
    let span = cmd_span(&state, "CMD.request_microphone_access");
    // The bounded wait for the consent callback must not park the main
    // thread or the async runtime.
    let join = tauri::async_runtime::spawn_blocking(|| {
        permissions::request_microphone_access_best_effort(Duration::from_secs(120))
    })
    .await;
    match join {
        Ok(st) => {
            span.ok(Some(serde_json::json!({"status": st.status})));
            Ok(st)
        }
        Err(e) => {
            let msg = format!("spawn_blocking failed: {e}");
            span.err("runtime", "E_CMD_JOIN", &msg, None);
            Err(msg)
        }
    }
}

#[tauri::command]
fn open_logs_dir(state: tauri::State<StartupState>) -> Result<(), String> {
    let span = cmd_span(&state, "CMD.open_logs_dir");
    match tauri_plugin_opener::open_path(state.log_dir.display().to_string(), None::<&str>) {
        Ok(()) => {
            span.ok(None);
            Ok(())
        }
        Err(e) => {
            let msg = e.to_string();
            span.err("io", "E_CMD_OPEN_LOGS", &msg, None);
            Err(msg)
        }
    }
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    startup_trace::mark_best_effort("run_enter");
    panic_log::install_best_effort();
    startup_trace::mark_best_effort("panic_hook_installed");

    let log_dir = paths::log_dir().unwrap_or_else(|_| std::env::temp_dir().join("VoiceMorph"));
    let data_dir = paths::data_dir().unwrap_or_else(|_| std::env::temp_dir().join("VoiceMorph"));
    let cfg = LaunchConfig::from_env();

    // Rotate before anything holds the log open: the child's stdio and the
    // tailer both pin the current file for the rest of the run.
    applog::rotate_on_launch_best_effort(&log_dir);
    applog::info(&log_dir, "starting VoiceMorph desktop shell");
    trace::event(
        &data_dir,
        "Startup",
        "APP.boot",
        "ok",
        Some(serde_json::json!({
            "backend_port": cfg.backend_port,
            "loading_port": cfg.loading_port,
            "ready_timeout_ms": cfg.ready_timeout.as_millis() as u64,
        })),
    );

    let state = StartupState::new(cfg, log_dir, data_dir);

    let ctx = tauri::generate_context!();
    startup_trace::mark_best_effort("context_generated");
    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
            // A second launch just raises the existing window.
            if let Some(w) = app.get_webview_window(startup::MAIN_WINDOW) {
                let _ = w.show();
                let _ = w.set_focus();
            }
        }))
        .plugin(tauri_plugin_opener::init())
        .manage(state)
        .setup(|app| {
            startup_trace::mark_best_effort("setup_enter");
            let state = app.state::<StartupState>();

            if let Ok(m) = menu::build(app.handle()) {
                let _ = app.set_menu(m);
            }

            // The loading server must be answering before the window's
            // first request; a bind failure is unrecoverable because the
            // window would have nothing to show.
            startup::start_loading_server(&state)?;

            let loading_url = state.cfg.loading_url();
            let url = tauri::Url::parse(&loading_url)?;
            let window = WebviewWindowBuilder::new(
                app,
                startup::MAIN_WINDOW,
                WebviewUrl::External(url),
            )
            .title("VoiceMorph")
            .inner_size(1280.0, 720.0)
            .min_inner_size(800.0, 600.0)
            .resizable(true)
            .build()?;
            let _ = window.set_focus();

            startup::start_backend_and_monitor(app.handle().clone(), &state);

            // Surface the consent prompt early so it does not pop up the
            // first time the user records. Never blocks startup.
            let _ = std::thread::Builder::new()
                .name("mic_permission".to_string())
                .spawn(|| {
                    permissions::request_microphone_access_best_effort(Duration::from_secs(120));
                });

            startup_trace::mark_best_effort("setup_exit");
            Ok(())
        })
        .on_window_event(|window, event| {
            if window.label() != startup::MAIN_WINDOW {
                return;
            }
            if let tauri::WindowEvent::CloseRequested { .. } = event {
                let state = window.app_handle().state::<StartupState>();
                startup::shutdown_and_exit(&state);
            }
        })
        .invoke_handler(tauri::generate_handler![
            startup_status,
            microphone_status,
            request_microphone_access,
            open_logs_dir
        ])
        .build(ctx)
        .expect("error while building tauri application")
        .run(|app_handle, event| {
            // Quit can also arrive through the menu; make sure the backend
            // never outlives the shell.
            if let tauri::RunEvent::Exit = event {
                let state = app_handle.state::<StartupState>();
                state.shutdown.cancel();
                if let Some(proc) = state.backend.lock().unwrap().take() {
                    proc.kill_best_effort();
                }
            }
        });
}
