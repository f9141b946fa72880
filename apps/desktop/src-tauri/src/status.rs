use std::sync::{Arc, Mutex};

use serde::Serialize;

/// What the loading page sees. Immutable once published; the board swaps
/// whole snapshots so a reader can never observe a half-written update.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub heading: String,
    pub message: String,
    pub stage: String,
    pub progress: f32,
    pub detail: String,
    pub ready: bool,
    pub error: Option<String>,
}

impl StatusSnapshot {
    fn initial() -> Self {
        Self {
            heading: "Starting VoiceMorph".to_string(),
            message: "Warming up the voice engine".to_string(),
            stage: "boot".to_string(),
            progress: 2.0,
            detail: String::new(),
            ready: false,
            error: None,
        }
    }
}

/// One classified log line's contribution to the snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub heading: Option<String>,
    pub message: Option<String>,
    pub stage: Option<String>,
    pub progress: Option<f32>,
    /// Ceiling the idle creep may approach while this stage lasts.
    pub stage_ceiling: Option<f32>,
    /// Allow `progress` to move backwards (entering a new stage).
    pub reset_progress: bool,
    pub detail: Option<String>,
}

struct Inner {
    snap: Arc<StatusSnapshot>,
    stage_ceiling: f32,
}

/// Single writer (the tailer / readiness monitor), many readers (the HTTP
/// handler, the Tauri command). Readers clone the current `Arc` under the
/// lock and serialize it outside.
pub struct StatusBoard {
    inner: Mutex<Inner>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                snap: Arc::new(StatusSnapshot::initial()),
                stage_ceiling: 15.0,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.inner.lock().unwrap().snap.clone()
    }

    /// Apply a classified update. Progress never decreases unless the
    /// update explicitly flags a stage reset; terminal states win over
    /// everything.
    pub fn apply(&self, up: StatusUpdate) {
        let mut g = self.inner.lock().unwrap();
        if g.snap.ready || g.snap.error.is_some() {
            return;
        }
        let mut next = (*g.snap).clone();
        if let Some(h) = up.heading {
            next.heading = h;
        }
        if let Some(m) = up.message {
            next.message = m;
        }
        if let Some(s) = up.stage {
            next.stage = s;
        }
        if let Some(p) = up.progress {
            let p = p.clamp(0.0, 99.0);
            next.progress = if up.reset_progress {
                p
            } else {
                next.progress.max(p)
            };
        }
        if let Some(c) = up.stage_ceiling {
            g.stage_ceiling = c.clamp(0.0, 99.0);
        }
        if let Some(d) = up.detail {
            next.detail = d;
        }
        g.snap = Arc::new(next);
    }

    /// Fabricated idle progress: nudge the bar toward the current stage
    /// ceiling so it never looks stuck between log lines.
    pub fn creep(&self) {
        let mut g = self.inner.lock().unwrap();
        if g.snap.ready || g.snap.error.is_some() {
            return;
        }
        let cur = g.snap.progress;
        if cur >= g.stage_ceiling {
            return;
        }
        let step = ((g.stage_ceiling - cur) * 0.04).min(0.5);
        if step <= 0.0 {
            return;
        }
        let mut next = (*g.snap).clone();
        next.progress = (cur + step).min(g.stage_ceiling);
        g.snap = Arc::new(next);
    }

    pub fn mark_ready(&self) {
        let mut g = self.inner.lock().unwrap();
        if g.snap.ready {
            return;
        }
        let mut next = (*g.snap).clone();
        next.ready = true;
        next.progress = 100.0;
        next.heading = "Ready".to_string();
        next.message = "Opening VoiceMorph".to_string();
        next.stage = "ready".to_string();
        g.snap = Arc::new(next);
    }

    /// Latch the first error. Returns true only for the call that set it,
    /// so the caller can act on the transition exactly once.
    pub fn mark_error(&self, message: &str) -> bool {
        let mut g = self.inner.lock().unwrap();
        if g.snap.error.is_some() || g.snap.ready {
            return false;
        }
        let mut next = (*g.snap).clone();
        next.error = Some(message.to_string());
        next.heading = "Something went wrong".to_string();
        next.message = message.to_string();
        next.stage = "error".to_string();
        g.snap = Arc::new(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up(progress: f32) -> StatusUpdate {
        StatusUpdate {
            progress: Some(progress),
            ..Default::default()
        }
    }

    #[test]
    fn progress_is_monotonic_without_reset() {
        let board = StatusBoard::new();
        board.apply(up(40.0));
        board.apply(up(20.0));
        assert_eq!(board.snapshot().progress, 40.0);
    }

    #[test]
    fn stage_reset_allows_decrease() {
        let board = StatusBoard::new();
        board.apply(up(70.0));
        board.apply(StatusUpdate {
            progress: Some(35.0),
            reset_progress: true,
            stage: Some("downloads".to_string()),
            ..Default::default()
        });
        let s = board.snapshot();
        assert_eq!(s.progress, 35.0);
        assert_eq!(s.stage, "downloads");
    }

    #[test]
    fn creep_approaches_but_never_crosses_ceiling() {
        let board = StatusBoard::new();
        board.apply(StatusUpdate {
            progress: Some(10.0),
            stage_ceiling: Some(15.0),
            ..Default::default()
        });
        let mut last = board.snapshot().progress;
        for _ in 0..500 {
            board.creep();
            let cur = board.snapshot().progress;
            assert!(cur >= last);
            assert!(cur <= 15.0);
            last = cur;
        }
        assert!(last > 10.0);
    }

    #[test]
    fn ready_forces_full_progress_and_blocks_updates() {
        let board = StatusBoard::new();
        board.mark_ready();
        let s = board.snapshot();
        assert!(s.ready);
        assert_eq!(s.progress, 100.0);

        board.apply(up(10.0));
        board.creep();
        assert_eq!(board.snapshot().progress, 100.0);
    }

    #[test]
    fn error_latches_exactly_once() {
        let board = StatusBoard::new();
        assert!(board.mark_error("backend never came up"));
        assert!(!board.mark_error("second failure"));
        let s = board.snapshot();
        assert_eq!(s.error.as_deref(), Some("backend never came up"));
        assert_eq!(s.stage, "error");

        // A latched error also suppresses late updates and ready.
        board.apply(up(90.0));
        board.creep();
        assert_eq!(board.snapshot().stage, "error");
    }

    #[test]
    fn ready_beats_late_error() {
        let board = StatusBoard::new();
        board.mark_ready();
        assert!(!board.mark_error("too late"));
        assert!(board.snapshot().error.is_none());
    }

    #[test]
    fn snapshot_serializes_documented_fields() {
        let board = StatusBoard::new();
        let v = serde_json::to_value(&*board.snapshot()).expect("json");
        for field in ["heading", "progress", "stage", "detail"] {
            assert!(v.get(field).is_some(), "missing field {field}");
        }
    }
}
