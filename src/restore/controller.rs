// ABOUTME: Restore controller driving the splitter and executor for one run
// ABOUTME: Maintains run state, honours pause/stop, and emits progress events

use crate::error::RestoreError;
use crate::postgres::Database;
use crate::restore::control::{RestoreControl, RunMode};
use crate::restore::event::{Phase, ProgressEvent};
use crate::restore::executor::{self, AttemptFailure, RetryPolicy};
use crate::restore::splitter::{BoundaryDetector, Delimiter, Semicolon, StatementSplitter};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::task::JoinHandle;

/// What to do with text left after the last terminator at end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrailingStatement {
    /// Drop it with a warning.
    #[default]
    Discard,
    /// Run it as a final statement.
    Execute,
    /// Fail the run.
    Reject,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// First line (1-based) whose statements are executed.
    pub resume_line: u64,
    pub retry: RetryPolicy,
    pub trailing: TrailingStatement,
    /// Custom terminator; `None` means a trailing `;`.
    pub delimiter: Option<String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            resume_line: 1,
            retry: RetryPolicy::default(),
            trailing: TrailingStatement::default(),
            delimiter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub statements_executed: u64,
    pub lines_read: u64,
    pub skipped_lines: u64,
    pub bytes_read: u64,
    pub elapsed: Duration,
}

pub struct Restorer {
    options: RestoreOptions,
}

impl Restorer {
    pub fn new(options: RestoreOptions) -> Self {
        Self { options }
    }

    /// Run the restore on its own task so the caller can keep serving the operator.
    pub fn spawn<D>(
        self,
        db: Arc<D>,
        path: PathBuf,
        control: RestoreControl,
    ) -> JoinHandle<Result<RunSummary, RestoreError>>
    where
        D: Database + 'static,
    {
        tokio::spawn(async move { self.run(db.as_ref(), &path, &control).await })
    }

    /// Restore the dump at `path` into `db`.
    pub async fn run<D: Database>(
        &self,
        db: &D,
        path: &Path,
        control: &RestoreControl,
    ) -> Result<RunSummary, RestoreError> {
        let file = File::open(path)
            .await
            .map_err(|source| RestoreError::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let total_bytes = match file.metadata().await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                tracing::warn!(
                    "Could not determine size of {}: {}. Progress will show 0%",
                    path.display(),
                    e
                );
                None
            }
        };

        tracing::info!(
            "Restoring {} ({} bytes) starting at line {}",
            path.display(),
            total_bytes.unwrap_or(0),
            self.options.resume_line
        );

        self.run_stream(db, BufReader::new(file), total_bytes, control)
            .await
    }

    /// Restore from any buffered reader. `total_bytes` drives the percentage.
    pub async fn run_stream<D, R>(
        &self,
        db: &D,
        reader: R,
        total_bytes: Option<u64>,
        control: &RestoreControl,
    ) -> Result<RunSummary, RestoreError>
    where
        D: Database,
        R: AsyncBufRead + Unpin + Send,
    {
        let started = Instant::now();
        let resume_line = self.options.resume_line.max(1);
        control.begin(resume_line, total_bytes);

        let detector: Box<dyn BoundaryDetector> = match &self.options.delimiter {
            Some(delimiter) => Box::new(Delimiter(delimiter.clone())),
            None => Box::new(Semicolon),
        };
        let mut splitter = StatementSplitter::with_detector(reader, resume_line, detector);

        // Line an operator would resume from if the run stopped right now
        let mut resume_from = resume_line;
        let mut executed = 0;
        let mut skipped = 0;

        loop {
            if control.wait_while_paused().await == RunMode::Stopping {
                let line = control.snapshot().current_line;
                tracing::warn!("Restore stopped before line {}", line);
                let err = RestoreError::Cancelled {
                    resume_line: resume_from,
                };
                control.emit(
                    ProgressEvent::new(Phase::Cancelled, line, control.percent())
                        .with_message(err.to_string()),
                );
                return Err(err);
            }

            let outcome = match splitter.next_line().await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => break,
                Err(e) => {
                    self.fail(control, &e, control.snapshot().current_line);
                    return Err(e);
                }
            };
            control.advance(outcome.line_number, outcome.bytes);

            if outcome.line_number < resume_line {
                skipped += 1;
                continue;
            }

            if let Some(statement) = outcome.statement {
                self.execute_statement(db, &statement, outcome.line_number, resume_from, control)
                    .await?;
                executed += 1;
                resume_from = outcome.line_number + 1;
            }
        }

        if skipped > 0 {
            tracing::debug!("Skipped {} line(s) before resume line {}", skipped, resume_line);
        }

        let last_line = splitter.lines_read();
        if let Some(rest) = splitter.take_trailing() {
            match self.options.trailing {
                TrailingStatement::Discard => {
                    tracing::warn!(
                        "Dump ends with an unterminated statement (lines {}-{}); it was not executed",
                        resume_from,
                        last_line
                    );
                }
                TrailingStatement::Execute => {
                    self.execute_statement(db, &rest, last_line, resume_from, control)
                        .await?;
                    executed += 1;
                }
                TrailingStatement::Reject => {
                    let err = RestoreError::IncompleteStatement {
                        line: last_line,
                        resume_line: resume_from,
                        statement: rest,
                    };
                    self.fail(control, &err, last_line);
                    return Err(err);
                }
            }
        }

        let state = control.snapshot();
        control.emit(ProgressEvent::new(Phase::Completed, last_line, 100.0));
        tracing::info!(
            "✓ Restore complete: {} statement(s) executed from {} line(s)",
            executed,
            last_line
        );

        Ok(RunSummary {
            statements_executed: executed,
            lines_read: last_line,
            skipped_lines: skipped,
            bytes_read: state.processed_bytes,
            elapsed: started.elapsed(),
        })
    }

    async fn execute_statement<D: Database>(
        &self,
        db: &D,
        statement: &str,
        line: u64,
        resume_from: u64,
        control: &RestoreControl,
    ) -> Result<(), RestoreError> {
        control.record_statement();
        control.emit(ProgressEvent::new(Phase::Running, line, control.percent()));

        let on_failure = |failure: &AttemptFailure<'_>| {
            let message = match failure.retry_in {
                Some(wait) => format!(
                    "attempt {}/{} failed: {}. Retrying in {}s...",
                    failure.attempt,
                    failure.max_attempts,
                    failure.error,
                    wait.as_secs()
                ),
                None => format!(
                    "attempt {}/{} failed: {}",
                    failure.attempt, failure.max_attempts, failure.error
                ),
            };
            tracing::warn!("Line {}: {}", line, message);
            control.emit(
                ProgressEvent::new(Phase::Retrying, line, control.percent()).with_message(message),
            );
        };

        match executor::execute(db, statement, &self.options.retry, on_failure).await {
            Ok(()) => {
                control.emit(ProgressEvent::new(Phase::Succeeded, line, control.percent()));
                Ok(())
            }
            Err(source) => {
                let err = RestoreError::Statement {
                    line,
                    resume_line: resume_from,
                    statement: statement.to_string(),
                    source,
                };
                self.fail(control, &err, line);
                Err(err)
            }
        }
    }

    fn fail(&self, control: &RestoreControl, err: &RestoreError, line: u64) {
        tracing::error!("Restore failed at line {}: {}", line, err);
        control.emit(
            ProgressEvent::new(Phase::Failed, line, control.percent()).with_message(err.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Records executed statements; fails any statement containing `fail_on`.
    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Database for Recorder {
        async fn ping(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn exec(&self, sql: &str) -> Result<(), DbError> {
            self.executed.lock().unwrap().push(sql.to_string());
            match self.fail_on {
                Some(needle) if sql.contains(needle) => Err("constraint violation".into()),
                _ => Ok(()),
            }
        }
    }

    fn options(resume_line: u64) -> RestoreOptions {
        RestoreOptions {
            resume_line,
            retry: RetryPolicy {
                max_attempts: 3,
                interval: Duration::ZERO,
            },
            ..RestoreOptions::default()
        }
    }

    const TWO_INSERTS: &str = "INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n";

    #[tokio::test]
    async fn test_runs_all_statements_in_order() {
        let db = Recorder::default();
        let (control, mut events) = RestoreControl::new();

        let summary = Restorer::new(options(1))
            .run_stream(&db, TWO_INSERTS.as_bytes(), Some(TWO_INSERTS.len() as u64), &control)
            .await
            .unwrap();

        assert_eq!(
            *db.executed.lock().unwrap(),
            vec!["INSERT INTO t VALUES (1);\n", "INSERT INTO t VALUES (2);\n"]
        );
        assert_eq!(summary.statements_executed, 2);
        assert_eq!(summary.lines_read, 2);
        assert_eq!(summary.bytes_read, TWO_INSERTS.len() as u64);

        let events = events.drain();
        let last = events.last().unwrap();
        assert_eq!(last.phase, Phase::Completed);
        assert_eq!(last.percent, 100.0);
        assert_eq!(control.snapshot().statement_count, 2);
    }

    #[tokio::test]
    async fn test_resume_line_skips_execution_only() {
        let db = Recorder::default();
        let (control, _events) = RestoreControl::new();

        let summary = Restorer::new(options(2))
            .run_stream(&db, TWO_INSERTS.as_bytes(), Some(TWO_INSERTS.len() as u64), &control)
            .await
            .unwrap();

        assert_eq!(
            *db.executed.lock().unwrap(),
            vec!["INSERT INTO t VALUES (2);\n"]
        );
        assert_eq!(summary.skipped_lines, 1);
        let state = control.snapshot();
        assert_eq!(state.current_line, 3);
        assert_eq!(state.processed_bytes, TWO_INSERTS.len() as u64);
    }

    #[tokio::test]
    async fn test_failure_stops_run_with_line_and_sql() {
        let db = Recorder {
            fail_on: Some("(2)"),
            ..Recorder::default()
        };
        let input = "INSERT INTO t VALUES (1);\nINSERT INTO t\nVALUES (2);\nINSERT INTO t VALUES (3);\n";
        let (control, mut events) = RestoreControl::new();

        let err = Restorer::new(options(1))
            .run_stream(&db, input.as_bytes(), Some(input.len() as u64), &control)
            .await
            .unwrap_err();

        match err {
            RestoreError::Statement {
                line,
                resume_line,
                statement,
                source,
            } => {
                assert_eq!(line, 3);
                assert_eq!(resume_line, 2);
                assert_eq!(statement, "INSERT INTO t\nVALUES (2);\n");
                assert_eq!(source.attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }

        // 1 success + 3 attempts of the failing statement, nothing after it
        assert_eq!(db.executed.lock().unwrap().len(), 4);

        let phases: Vec<_> = events.drain().into_iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Running,
                Phase::Succeeded,
                Phase::Running,
                Phase::Retrying,
                Phase::Retrying,
                Phase::Retrying,
                Phase::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_trailing_statement_policies() {
        let input = "SELECT 1;\nSELECT 2\n";

        let db = Recorder::default();
        let (control, _events) = RestoreControl::new();
        Restorer::new(options(1))
            .run_stream(&db, input.as_bytes(), None, &control)
            .await
            .unwrap();
        assert_eq!(*db.executed.lock().unwrap(), vec!["SELECT 1;\n"]);

        let db = Recorder::default();
        let restorer = Restorer::new(RestoreOptions {
            trailing: TrailingStatement::Execute,
            ..options(1)
        });
        let summary = restorer
            .run_stream(&db, input.as_bytes(), None, &control)
            .await
            .unwrap();
        assert_eq!(*db.executed.lock().unwrap(), vec!["SELECT 1;\n", "SELECT 2\n"]);
        assert_eq!(summary.statements_executed, 2);

        let db = Recorder::default();
        let restorer = Restorer::new(RestoreOptions {
            trailing: TrailingStatement::Reject,
            ..options(1)
        });
        let err = restorer
            .run_stream(&db, input.as_bytes(), None, &control)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RestoreError::IncompleteStatement {
                line: 2,
                resume_line: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_before_first_line_is_cancelled_at_resume_line() {
        let db = Recorder::default();
        let (control, mut events) = RestoreControl::new();
        control.stop();

        let err = Restorer::new(options(5))
            .run_stream(&db, TWO_INSERTS.as_bytes(), None, &control)
            .await
            .unwrap_err();

        assert_eq!(err.resume_line(), Some(5));
        assert!(db.executed.lock().unwrap().is_empty());

        let events = events.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Phase::Cancelled);
        assert_eq!(events[0].line, 1);
        assert!(events[0].is_terminal());
        assert_eq!(events[0].message.as_deref(), Some(err.to_string().as_str()));
    }

    /// Yields `data`, then fails every later read.
    struct BrokenReader {
        data: &'static [u8],
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.data.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "device went away",
                )));
            }
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_fails_run_after_executed_lines() {
        let db = Recorder::default();
        let (control, mut events) = RestoreControl::new();
        let reader = tokio::io::BufReader::new(BrokenReader {
            data: b"SELECT 1;\nSELECT",
        });

        let err = Restorer::new(options(1))
            .run_stream(&db, reader, None, &control)
            .await
            .unwrap_err();

        assert!(matches!(err, RestoreError::StreamRead { line: 2, .. }));
        assert_eq!(*db.executed.lock().unwrap(), vec!["SELECT 1;\n"]);

        let events = events.drain();
        let last = events.last().unwrap();
        assert_eq!(last.phase, Phase::Failed);
        assert_eq!(last.line, 2);
        assert_eq!(
            events.iter().filter(|e| e.phase == Phase::Running).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_file_open_error() {
        let db = Recorder::default();
        let (control, _events) = RestoreControl::new();
        let err = Restorer::new(options(1))
            .run(&db, Path::new("/definitely/not/here.sql"), &control)
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::FileOpen { .. }));
    }

    #[test]
    fn test_trailing_policy_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            trailing: TrailingStatement,
        }
        let w: Wrapper = toml::from_str("trailing = \"reject\"").unwrap();
        assert_eq!(w.trailing, TrailingStatement::Reject);
    }
}
