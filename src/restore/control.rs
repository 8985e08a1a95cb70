// ABOUTME: Control surface shared between the restore task and the operator
// ABOUTME: Pause/resume/stop commands, run state snapshots, and the event stream

use crate::restore::event::{percent, Phase, ProgressEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// What the restore task is allowed to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Running,
    Paused,
    Stopping,
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    /// Next line to be read (1-based).
    pub current_line: u64,
    pub resume_line: u64,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub paused: bool,
    pub statement_count: u64,
}

struct Counters {
    current_line: AtomicU64,
    resume_line: AtomicU64,
    processed_bytes: AtomicU64,
    total_bytes: AtomicU64,
    size_known: AtomicBool,
    statement_count: AtomicU64,
}

struct Shared {
    mode: watch::Sender<RunMode>,
    counters: Counters,
    /// Highest percent sent so far; held while sending so the stream never goes backwards.
    events: Mutex<Emitter>,
}

struct Emitter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    last_percent: f64,
}

/// Cloneable handle used by both sides of a run.
///
/// The restore task is the only writer of the counters; the operator side
/// changes the run mode and reads snapshots.
#[derive(Clone)]
pub struct RestoreControl {
    shared: Arc<Shared>,
}

/// Ordered stream of every event emitted during a run.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl EventStream {
    /// Next event, or `None` once every control handle is gone and the queue is drained.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain whatever is queued right now.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

impl RestoreControl {
    pub fn new() -> (Self, EventStream) {
        let (mode, _) = watch::channel(RunMode::Running);
        let (events, rx) = mpsc::unbounded_channel();
        let control = Self {
            shared: Arc::new(Shared {
                mode,
                counters: Counters {
                    current_line: AtomicU64::new(1),
                    resume_line: AtomicU64::new(1),
                    processed_bytes: AtomicU64::new(0),
                    total_bytes: AtomicU64::new(0),
                    size_known: AtomicBool::new(false),
                    statement_count: AtomicU64::new(0),
                },
                events: Mutex::new(Emitter {
                    tx: events,
                    last_percent: 0.0,
                }),
            }),
        };
        (control, EventStream { rx })
    }

    /// Request a pause. Returns `false` if the run was not running.
    pub fn pause(&self) -> bool {
        self.transition(RunMode::Running, RunMode::Paused, Phase::Paused)
    }

    /// Request a resume. Returns `false` if the run was not paused.
    pub fn resume(&self) -> bool {
        self.transition(RunMode::Paused, RunMode::Running, Phase::Resumed)
    }

    /// Stop requesting new work. The statement in flight is allowed to finish.
    pub fn stop(&self) {
        let stopped = self.shared.mode.send_if_modified(|mode| {
            if *mode == RunMode::Stopping {
                false
            } else {
                *mode = RunMode::Stopping;
                true
            }
        });
        if stopped {
            tracing::warn!("Stop requested, finishing the current statement...");
        }
    }

    pub fn mode(&self) -> RunMode {
        *self.shared.mode.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.mode() == RunMode::Paused
    }

    pub fn snapshot(&self) -> RunState {
        let c = &self.shared.counters;
        RunState {
            current_line: c.current_line.load(Ordering::SeqCst),
            resume_line: c.resume_line.load(Ordering::SeqCst),
            processed_bytes: c.processed_bytes.load(Ordering::SeqCst),
            total_bytes: c.total_bytes.load(Ordering::SeqCst),
            paused: self.is_paused(),
            statement_count: c.statement_count.load(Ordering::SeqCst),
        }
    }

    /// Percent complete, or 0 when the input size is unknown.
    pub fn percent(&self) -> f64 {
        let c = &self.shared.counters;
        if !c.size_known.load(Ordering::SeqCst) {
            return 0.0;
        }
        percent(
            c.processed_bytes.load(Ordering::SeqCst),
            c.total_bytes.load(Ordering::SeqCst),
        )
    }

    fn transition(&self, from: RunMode, to: RunMode, phase: Phase) -> bool {
        let changed = self.shared.mode.send_if_modified(|mode| {
            if *mode == from {
                *mode = to;
                true
            } else {
                false
            }
        });
        if changed {
            let line = self.shared.counters.current_line.load(Ordering::SeqCst);
            tracing::info!("Restore {:?} at line {}", to, line);
            self.emit(ProgressEvent::new(phase, line, self.percent()));
        }
        changed
    }

    pub(crate) fn emit(&self, mut event: ProgressEvent) {
        let mut emitter = self.emitter();
        // Pause/resume events are computed on the operator side and may race an advance
        event.percent = event.percent.max(emitter.last_percent);
        emitter.last_percent = event.percent;
        // A dropped receiver only means nobody is watching
        let _ = emitter.tx.send(event);
    }

    fn emitter(&self) -> std::sync::MutexGuard<'_, Emitter> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until the run is not paused, returning the mode that ended the wait.
    pub(crate) async fn wait_while_paused(&self) -> RunMode {
        let mut rx = self.shared.mode.subscribe();
        let mode = *rx.borrow_and_update();
        if mode != RunMode::Paused {
            return mode;
        }
        // The sender lives as long as `self`, so the wait cannot fail
        let mode = match rx.wait_for(|mode| *mode != RunMode::Paused).await {
            Ok(mode) => *mode,
            Err(_) => RunMode::Stopping,
        };
        mode
    }

    pub(crate) fn begin(&self, resume_line: u64, total_bytes: Option<u64>) {
        let c = &self.shared.counters;
        c.current_line.store(1, Ordering::SeqCst);
        c.resume_line.store(resume_line, Ordering::SeqCst);
        c.processed_bytes.store(0, Ordering::SeqCst);
        c.total_bytes.store(total_bytes.unwrap_or(0), Ordering::SeqCst);
        c.size_known.store(total_bytes.is_some(), Ordering::SeqCst);
        c.statement_count.store(0, Ordering::SeqCst);
        self.emitter().last_percent = 0.0;
    }

    /// Record one consumed line.
    pub(crate) fn advance(&self, line_number: u64, bytes: u64) {
        let c = &self.shared.counters;
        let processed = c.processed_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        // A file that grows while being read must not push processed past total
        c.total_bytes.fetch_max(processed, Ordering::SeqCst);
        c.current_line.fetch_max(line_number + 1, Ordering::SeqCst);
    }

    pub(crate) fn record_statement(&self) -> u64 {
        self.shared.counters.statement_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}
