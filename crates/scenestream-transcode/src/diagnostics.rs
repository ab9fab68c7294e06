//! Encoder diagnostic stream handling.
//!
//! ffmpeg writes three kinds of lines to stderr when launched with
//! `-loglevel level+info -progress pipe:2`: leveled log lines (`[error] ...`,
//! `[info] ...`), unleveled banner/stream lines, and `key=value` progress
//! records terminated by a `progress=continue|end` line. Errors and
//! informational lines are kept in a bounded buffer for post-mortem logging;
//! progress records are folded into periodic summaries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Class of a single diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Error,
    Info,
    Progress,
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time",
    "out_time_us",
    "out_time_ms",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Classify one stderr line.
pub fn classify_line(line: &str) -> LineClass {
    let trimmed = line.trim();
    if let Some((key, _)) = trimmed.split_once('=') {
        if PROGRESS_KEYS.contains(&key) || key.starts_with("stream_") {
            return LineClass::Progress;
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("[error]") || lower.contains("[fatal]") || lower.contains("[panic]") {
        return LineClass::Error;
    }
    // Some failures (bad input path, unknown encoder) are printed without a level tag.
    if !has_level_tag(&lower)
        && (lower.contains("error")
            || lower.contains("no such file")
            || lower.contains("invalid"))
    {
        return LineClass::Error;
    }
    LineClass::Info
}

const LEVEL_TAGS: &[&str] = &[
    "[quiet]",
    "[panic]",
    "[fatal]",
    "[error]",
    "[warning]",
    "[info]",
    "[verbose]",
    "[debug]",
    "[trace]",
];

/// Whether ffmpeg tagged the line with a log level, possibly after a
/// `[component @ 0x...]` context prefix.
fn has_level_tag(lower: &str) -> bool {
    LEVEL_TAGS.iter().any(|tag| lower.contains(tag))
}

/// A bounded ring of the most recent error and informational lines.
#[derive(Debug)]
pub struct DiagnosticLog {
    lines: VecDeque<String>,
    capacity: usize,
    errors_seen: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            errors_seen: 0,
        }
    }

    pub fn push(&mut self, class: LineClass, line: &str) {
        if class == LineClass::Error {
            self.errors_seen += 1;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// The last `n` retained lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total error-class lines observed, including evicted ones.
    pub fn errors_seen(&self) -> usize {
        self.errors_seen
    }
}

/// Diagnostic buffer shared between the stderr reader and status readers.
pub type SharedDiagnostics = Arc<Mutex<DiagnosticLog>>;

pub fn shared_diagnostics(capacity: usize) -> SharedDiagnostics {
    Arc::new(Mutex::new(DiagnosticLog::new(capacity)))
}

/// Aggregated progress over one throttle interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSummary {
    pub avg_fps: Option<f64>,
    pub avg_speed: Option<f64>,
    pub samples: usize,
    /// Output position reached, relative to the encode's start offset.
    pub out_time_secs: Option<f64>,
    /// True for the final summary of a run (`progress=end`).
    pub finished: bool,
}

/// Collects progress records and emits at most one summary per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Instant,
    fps_sum: f64,
    fps_samples: usize,
    speed_sum: f64,
    speed_samples: usize,
    blocks: usize,
    out_time_us: Option<i64>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_emit: now,
            fps_sum: 0.0,
            fps_samples: 0,
            speed_sum: 0.0,
            speed_samples: 0,
            blocks: 0,
            out_time_us: None,
        }
    }

    /// Feed one progress line. Returns a summary when a block ends and the
    /// interval has elapsed, or when the encoder reports the end of output.
    pub fn observe(&mut self, line: &str, now: Instant) -> Option<ProgressSummary> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            "fps" => {
                if let Ok(fps) = value.parse::<f64>() {
                    self.fps_sum += fps;
                    self.fps_samples += 1;
                }
            }
            "speed" => {
                if let Ok(speed) = value.trim_end_matches('x').trim().parse::<f64>() {
                    self.speed_sum += speed;
                    self.speed_samples += 1;
                }
            }
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_us = Some(us);
                }
            }
            "progress" => {
                self.blocks += 1;
                let finished = value == "end";
                if finished || now.duration_since(self.last_emit) >= self.interval {
                    return Some(self.flush(now, finished));
                }
            }
            _ => {}
        }
        None
    }

    fn flush(&mut self, now: Instant, finished: bool) -> ProgressSummary {
        let avg = |sum: f64, n: usize| (n > 0).then(|| sum / n as f64);
        let summary = ProgressSummary {
            avg_fps: avg(self.fps_sum, self.fps_samples),
            avg_speed: avg(self.speed_sum, self.speed_samples),
            samples: self.blocks,
            out_time_secs: self.out_time_us.map(|us| us.max(0) as f64 / 1_000_000.0),
            finished,
        };
        self.last_emit = now;
        self.fps_sum = 0.0;
        self.fps_samples = 0;
        self.speed_sum = 0.0;
        self.speed_samples = 0;
        self.blocks = 0;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_progress_records() {
        assert_eq!(classify_line("frame=120"), LineClass::Progress);
        assert_eq!(classify_line("out_time_us=4000000"), LineClass::Progress);
        assert_eq!(classify_line("stream_0_0_q=23.0"), LineClass::Progress);
        assert_eq!(classify_line("progress=continue"), LineClass::Progress);
    }

    #[test]
    fn classifies_leveled_lines() {
        assert_eq!(
            classify_line("[error] Error while decoding stream #0:0"),
            LineClass::Error
        );
        assert_eq!(classify_line("[fatal] something broke"), LineClass::Error);
        assert_eq!(
            classify_line("[info] Stream #0:0: Video: h264"),
            LineClass::Info
        );
        assert_eq!(classify_line("[info] error_resilience=1"), LineClass::Info);
    }

    #[test]
    fn classifies_untagged_failures_as_errors() {
        assert_eq!(
            classify_line("/nope.mp4: No such file or directory"),
            LineClass::Error
        );
        assert_eq!(classify_line("Input #0, mov,mp4"), LineClass::Info);
    }

    #[test]
    fn leveled_warnings_are_not_failures() {
        assert_eq!(
            classify_line("[warning] invalid dropping st:0 packet"),
            LineClass::Info
        );
        assert_eq!(
            classify_line("[h264 @ 0x55d0c8a0] [warning] Invalid NAL unit size, error concealment"),
            LineClass::Info
        );
        assert_eq!(
            classify_line("[mpegts @ 0x55d0c8a0] [verbose] invalid pts"),
            LineClass::Info
        );
        assert_eq!(
            classify_line("[h264 @ 0x55d0c8a0] [error] no frame!"),
            LineClass::Error
        );
    }

    #[test]
    fn diagnostic_log_is_bounded() {
        let mut log = DiagnosticLog::new(3);
        for i in 0..5 {
            log.push(LineClass::Info, &format!("line {i}"));
        }
        log.push(LineClass::Error, "boom");
        assert_eq!(log.len(), 3);
        assert_eq!(log.tail(10), vec!["line 3", "line 4", "boom"]);
        assert_eq!(log.tail(1), vec!["boom"]);
        assert_eq!(log.errors_seen(), 1);
    }

    #[test]
    fn throttle_holds_back_until_interval_elapses() {
        let start = Instant::now();
        let mut t = ProgressThrottle::new(Duration::from_secs(30), start);

        assert_eq!(t.observe("fps=20.0", start), None);
        assert_eq!(t.observe("speed=1.0x", start), None);
        assert_eq!(
            t.observe("progress=continue", start + Duration::from_secs(10)),
            None
        );

        t.observe("fps=40.0", start);
        t.observe("speed=3.0x", start);
        t.observe("out_time_us=8000000", start);
        let summary = t
            .observe("progress=continue", start + Duration::from_secs(31))
            .unwrap();
        assert_eq!(summary.avg_fps, Some(30.0));
        assert_eq!(summary.avg_speed, Some(2.0));
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.out_time_secs, Some(8.0));
        assert!(!summary.finished);
    }

    #[test]
    fn throttle_resets_after_emitting() {
        let start = Instant::now();
        let mut t = ProgressThrottle::new(Duration::from_secs(30), start);
        t.observe("fps=10.0", start);
        t.observe("progress=continue", start + Duration::from_secs(30));

        assert_eq!(
            t.observe("progress=continue", start + Duration::from_secs(40)),
            None
        );
    }

    #[test]
    fn end_of_progress_always_emits() {
        let start = Instant::now();
        let mut t = ProgressThrottle::new(Duration::from_secs(30), start);
        t.observe("speed=N/A", start);
        let summary = t.observe("progress=end", start).unwrap();
        assert!(summary.finished);
        assert_eq!(summary.avg_speed, None);
    }
}
