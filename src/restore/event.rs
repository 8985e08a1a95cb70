// ABOUTME: Progress events emitted by a restore run
// ABOUTME: Timestamped, ordered status updates consumed by the renderer

use chrono::{DateTime, Local};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Succeeded,
    Failed,
    Retrying,
    Paused,
    Resumed,
    Completed,
    /// Stopped by the operator before the input was exhausted.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Local>,
    pub line: u64,
    /// Always within `[0, 100]`, rounded to two decimals.
    pub percent: f64,
    pub phase: Phase,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, line: u64, percent: f64) -> Self {
        Self {
            timestamp: Local::now(),
            line,
            percent,
            phase,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.format("%H:%M:%S");
        let detail = self.message.as_deref().unwrap_or("");
        match self.phase {
            Phase::Running => write!(
                f,
                "[{}][line {}] running... (progress: {:.2}%)",
                ts, self.line, self.percent
            ),
            Phase::Succeeded => write!(f, "[{}][line {}] done", ts, self.line),
            Phase::Failed => write!(f, "[{}][line {}] failed {}", ts, self.line, detail),
            Phase::Retrying => write!(f, "[{}][line {}] {}", ts, self.line, detail),
            Phase::Paused => write!(
                f,
                "[{}][PAUSE] paused before line {}. Type 'r' to resume",
                ts, self.line
            ),
            Phase::Resumed => write!(f, "[{}][RESUME] resuming at line {}", ts, self.line),
            Phase::Completed => write!(f, "[{}] restore complete ({:.2}%)", ts, self.percent),
            Phase::Cancelled => write!(
                f,
                "[{}][STOP] stopped before line {}. {}",
                ts, self.line, detail
            ),
        }
    }
}

/// Share of `total` already consumed, as a percentage with two decimals.
///
/// Returns 0 when the total is unknown (0).
pub fn percent(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = (processed as f64 / total as f64 * 100.0).min(100.0);
    (raw * 100.0).round() / 100.0
}
