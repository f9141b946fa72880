use std::{
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::status::{StatusBoard, StatusUpdate};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const DETAIL_MAX_CHARS: usize = 120;

/// One entry in the ordered classification table. First match wins.
struct Rule {
    re: Regex,
    stage: &'static str,
    heading: Option<&'static str>,
    message: &'static str,
    /// Progress floor when the rule fires without a captured percentage.
    floor: f32,
    /// Ceiling the idle creep may approach while this stage lasts.
    ceiling: f32,
    /// Entering this stage restarts the bar at its floor.
    reset: bool,
    /// Map a captured download percentage into the stage's band.
    percent_band: Option<(f32, f32)>,
}

fn rules() -> Vec<Rule> {
    // Ordered most-specific first; these scrape whatever the ML stack
    // happens to print, so a miss is normal and falls through to creep.
    vec![
        Rule {
            re: Regex::new(r"(?i)running on local url").unwrap(),
            stage: "interface",
            heading: Some("Almost ready"),
            message: "Web interface is up",
            floor: 96.0,
            ceiling: 99.0,
            reset: false,
            percent_band: None,
        },
        Rule {
            re: Regex::new(r"(?i)(launch(ing)?\s+gradio|starting web interface|uvicorn running)")
                .unwrap(),
            stage: "interface",
            heading: None,
            message: "Starting the web interface",
            floor: 85.0,
            ceiling: 95.0,
            reset: false,
            percent_band: None,
        },
        Rule {
            re: Regex::new(r"(?i)download(ing)?\b.*?(?P<pct>\d{1,3})%").unwrap(),
            stage: "downloads",
            heading: None,
            message: "Downloading model assets",
            floor: 35.0,
            ceiling: 60.0,
            reset: true,
            percent_band: Some((35.0, 60.0)),
        },
        Rule {
            re: Regex::new(r"(?i)(download(ing)?|fetching)\b").unwrap(),
            stage: "downloads",
            heading: None,
            message: "Downloading model assets",
            floor: 35.0,
            ceiling: 60.0,
            reset: true,
            percent_band: None,
        },
        Rule {
            re: Regex::new(r"(?i)(load(ing)?\s+(the\s+)?(model|checkpoint|weights)|embedder|hubert|rmvpe)")
                .unwrap(),
            stage: "models",
            heading: None,
            message: "Loading voice models",
            floor: 60.0,
            ceiling: 85.0,
            reset: false,
            percent_band: None,
        },
        Rule {
            re: Regex::new(r"(?i)\b(torch|mps|metal|cuda)\b").unwrap(),
            stage: "runtime",
            heading: None,
            message: "Preparing the PyTorch runtime",
            floor: 25.0,
            ceiling: 35.0,
            reset: false,
            percent_band: None,
        },
        Rule {
            re: Regex::new(r"(?i)traceback \(most recent call last\)").unwrap(),
            stage: "runtime",
            heading: None,
            message: "Backend reported an error (see log)",
            floor: 0.0,
            ceiling: 99.0,
            reset: false,
            percent_band: None,
        },
        Rule {
            re: Regex::new(r"(?i)\bimport(ing)?\b").unwrap(),
            stage: "imports",
            heading: None,
            message: "Importing application modules",
            floor: 10.0,
            ceiling: 25.0,
            reset: false,
            percent_band: None,
        },
    ]
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars));
    for (i, ch) in s.chars().enumerate() {
        if i >= max_chars {
            out.push('…');
            break;
        }
        out.push(ch);
    }
    out
}

/// Classify one log line against the ordered table. `None` means the line
/// carried no recognizable stage signal; the caller shows it as detail and
/// lets the bar creep.
fn classify(rules: &[Rule], line: &str) -> Option<StatusUpdate> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    for rule in rules {
        let Some(caps) = rule.re.captures(trimmed) else {
            continue;
        };
        let progress = match (rule.percent_band, caps.name("pct")) {
            (Some((lo, hi)), Some(pct)) => {
                let pct: f32 = pct.as_str().parse::<f32>().unwrap_or(0.0).clamp(0.0, 100.0);
                lo + (hi - lo) * pct / 100.0
            }
            _ => rule.floor,
        };
        return Some(StatusUpdate {
            heading: rule.heading.map(|h| h.to_string()),
            message: Some(rule.message.to_string()),
            stage: Some(rule.stage.to_string()),
            progress: if progress > 0.0 { Some(progress) } else { None },
            stage_ceiling: Some(rule.ceiling),
            reset_progress: rule.reset,
            detail: Some(truncate_chars(trimmed, DETAIL_MAX_CHARS)),
        });
    }
    None
}

pub struct LogTailer {
    path: PathBuf,
    board: Arc<StatusBoard>,
}

impl LogTailer {
    pub fn new(path: &Path, board: Arc<StatusBoard>) -> Self {
        Self {
            path: path.to_path_buf(),
            board,
        }
    }

    /// Tail the application log until the token fires. Only lines written
    /// after this call are considered; history is someone else's problem.
    pub fn run(&self, token: &CancellationToken) -> Result<()> {
        let mut f = File::open(&self.path)
            .with_context(|| format!("open log for tail failed: {}", self.path.display()))?;
        f.seek(SeekFrom::End(0)).context("seek to log end failed")?;
        let mut reader = BufReader::new(f);
        let rules = rules();
        let mut buf = String::new();

        while !token.is_cancelled() {
            buf.clear();
            let n = reader.read_line(&mut buf).unwrap_or(0);
            if n == 0 {
                // No complete new line yet; keep the bar alive and wait.
                self.board.creep();
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            if !buf.ends_with('\n') {
                // Partial line (the writer is mid-append). Rewind and retry
                // once a full line is there.
                let len = buf.len() as i64;
                let _ = reader.seek(SeekFrom::Current(-len));
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            match classify(&rules, &buf) {
                Some(up) => self.board.apply(up),
                None => {
                    let trimmed = buf.trim();
                    if !trimmed.is_empty() {
                        self.board.apply(StatusUpdate {
                            detail: Some(truncate_chars(trimmed, DETAIL_MAX_CHARS)),
                            ..Default::default()
                        });
                    }
                    self.board.creep();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;

    #[test]
    fn first_match_wins_over_later_rules() {
        let rules = rules();
        // "Downloading" and "model" both appear; the download rule sits
        // earlier in the table and must take the line.
        let up = classify(&rules, "Downloading model pack: 50%").expect("classified");
        assert_eq!(up.stage.as_deref(), Some("downloads"));
        assert!(up.reset_progress);
    }

    #[test]
    fn download_percent_maps_into_stage_band() {
        let rules = rules();
        let up = classify(&rules, "Downloading hubert_base.pt: 40%").expect("classified");
        let p = up.progress.expect("progress");
        assert!((p - 45.0).abs() < 0.01, "got {p}");
    }

    #[test]
    fn ready_line_lands_near_the_top() {
        let rules = rules();
        let up = classify(&rules, "* Running on local URL:  http://127.0.0.1:6969").expect("hit");
        assert_eq!(up.stage.as_deref(), Some("interface"));
        assert_eq!(up.progress, Some(96.0));
        assert_eq!(up.heading.as_deref(), Some("Almost ready"));
    }

    #[test]
    fn model_load_lines_classify() {
        let rules = rules();
        let up = classify(&rules, "Loading the model checkpoint from rvc/weights").expect("hit");
        assert_eq!(up.stage.as_deref(), Some("models"));
        assert_eq!(up.progress, Some(60.0));
    }

    #[test]
    fn unmatched_line_is_not_classified() {
        let rules = rules();
        assert!(classify(&rules, "some unremarkable chatter").is_none());
        assert!(classify(&rules, "   ").is_none());
    }

    #[test]
    fn detail_is_truncated() {
        let rules = rules();
        let long = format!("Loading the model {}", "x".repeat(300));
        let up = classify(&rules, &long).expect("hit");
        let detail = up.detail.expect("detail");
        assert!(detail.chars().count() <= DETAIL_MAX_CHARS + 1);
        assert!(detail.ends_with('…'));
    }

    #[test]
    fn tail_thread_applies_appended_lines() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("voicemorph.log");
        std::fs::write(&path, "old line before the tailer started\n").unwrap();

        let board = Arc::new(StatusBoard::new());
        let tailer = LogTailer::new(&path, board.clone());
        let token = CancellationToken::new();
        let token2 = token.clone();
        let join = std::thread::spawn(move || tailer.run(&token2));

        // Give the tailer a moment to seek to the end, then append.
        std::thread::sleep(Duration::from_millis(300));
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "Loading the model checkpoint").unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if board.snapshot().stage == "models" {
                break;
            }
            assert!(Instant::now() < deadline, "tailer never classified the line");
            std::thread::sleep(Duration::from_millis(50));
        }

        token.cancel();
        join.join().expect("join").expect("tailer run");
        // The pre-existing line must not have been consumed.
        assert!(!board.snapshot().detail.contains("old line"));
    }
}
