use std::{
    fs::OpenOptions,
    io::Write,
    time::{SystemTime, UNIX_EPOCH},
};

// Install a panic hook that writes to the data dir instead of stderr.
//
// In windowed builds stderr may be unwritable, and the default hook prints
// there; a failing print inside the hook can recurse into an abort with no
// visible message. Logging to a file best-effort sidesteps all of that, and
// the hook itself must never panic.
pub fn install_best_effort() {
    std::panic::set_hook(Box::new(|info| {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let bt = std::backtrace::Backtrace::force_capture();
        let msg = format!("ts_ms={ts_ms}\npanic={info}\nbacktrace={bt}\n---\n");

        if let Ok(dir) = crate::paths::data_dir() {
            let _ = std::fs::create_dir_all(&dir);
            let path = dir.join("panic.log");
            if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&path) {
                let _ = f.write_all(msg.as_bytes());
            }
        }
    }));
}
