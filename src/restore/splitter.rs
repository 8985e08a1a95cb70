// ABOUTME: Splits a SQL dump stream into executable statements line by line
// ABOUTME: Tracks line numbers and raw byte counts for progress and resume

use crate::error::RestoreError;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Decides whether a line closes the statement being accumulated.
pub trait BoundaryDetector: Send {
    fn is_boundary(&self, line: &str) -> bool;
}

/// A line whose trimmed content ends with `;`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Semicolon;

impl BoundaryDetector for Semicolon {
    fn is_boundary(&self, line: &str) -> bool {
        line.trim_end().ends_with(';')
    }
}

/// A line whose trimmed content ends with a custom terminator such as `$$` or `//`.
#[derive(Debug, Clone)]
pub struct Delimiter(pub String);

impl BoundaryDetector for Delimiter {
    fn is_boundary(&self, line: &str) -> bool {
        !self.0.is_empty() && line.trim_end().ends_with(self.0.as_str())
    }
}

/// One physical line of the dump, and the statement it completes, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    pub line_number: u64,
    pub bytes: u64,
    pub statement: Option<String>,
}

/// Lazy, single-pass splitter over a dump stream.
///
/// Lines before `resume_line` are still read so that counters and the stream
/// cursor advance, but their text never reaches the statement buffer.
pub struct StatementSplitter<R> {
    reader: R,
    detector: Box<dyn BoundaryDetector>,
    resume_line: u64,
    next_line: u64,
    raw: Vec<u8>,
    buffer: String,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> StatementSplitter<R> {
    pub fn new(reader: R, resume_line: u64) -> Self {
        Self::with_detector(reader, resume_line, Box::new(Semicolon))
    }

    pub fn with_detector(reader: R, resume_line: u64, detector: Box<dyn BoundaryDetector>) -> Self {
        Self {
            reader,
            detector,
            resume_line: resume_line.max(1),
            next_line: 1,
            raw: Vec::new(),
            buffer: String::new(),
            finished: false,
        }
    }

    /// Read the next line. Returns `Ok(None)` once the stream is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<LineOutcome>, RestoreError> {
        if self.finished {
            return Ok(None);
        }

        self.raw.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.raw)
            .await
            .map_err(|source| RestoreError::StreamRead {
                line: self.next_line,
                source,
            })?;

        if read == 0 {
            self.finished = true;
            return Ok(None);
        }

        let line_number = self.next_line;
        self.next_line += 1;

        if line_number < self.resume_line {
            return Ok(Some(LineOutcome {
                line_number,
                bytes: read as u64,
                statement: None,
            }));
        }

        let text = std::str::from_utf8(&self.raw).map_err(|e| RestoreError::StreamRead {
            line: line_number,
            source: io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line is not valid UTF-8 (byte {}): {}", e.valid_up_to(), e),
            ),
        })?;
        self.buffer.push_str(text);

        let statement = if self.detector.is_boundary(text) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        };

        Ok(Some(LineOutcome {
            line_number,
            bytes: read as u64,
            statement,
        }))
    }

    /// Take whatever was buffered after the last terminator.
    ///
    /// Only meaningful once `next_line` has returned `None`. Whitespace-only
    /// leftovers (blank lines after the final statement) count as empty.
    pub fn take_trailing(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Number of lines read so far.
    pub fn lines_read(&self) -> u64 {
        self.next_line - 1
    }
}
