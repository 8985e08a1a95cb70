// ABOUTME: Resumable statement-by-statement restore engine
// ABOUTME: Splitter, retrying executor, controller, and the operator control surface

pub mod control;
pub mod controller;
pub mod event;
pub mod executor;
pub mod splitter;

pub use control::{EventStream, RestoreControl, RunMode, RunState};
pub use controller::{RestoreOptions, Restorer, RunSummary, TrailingStatement};
pub use event::{Phase, ProgressEvent};
pub use executor::{retry_fixed, AttemptFailure, RetryPolicy};
pub use splitter::{BoundaryDetector, Delimiter, LineOutcome, Semicolon, StatementSplitter};
