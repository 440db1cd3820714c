//! Append-only action log.
//!
//! Entries are written one JSON object per line so training tooling can
//! stream them. Recording is best-effort from the agent's point of view:
//! [`BestEffortLogger`] swallows failures after counting and reporting them.

use crate::config::LoggingConfig;
use deskpilot_common::{ActionKind, LogEntry, REDACTED, TimeRange};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt log line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Log lock poisoned")]
    Poisoned,
}

pub type LogIter = Box<dyn Iterator<Item = Result<LogEntry, LoggingError>> + Send>;

pub trait ActionLogger: Send + Sync {
    fn record(&self, entry: &LogEntry) -> Result<(), LoggingError>;

    /// Entries whose timestamp falls in `range`, in append order. Each call
    /// starts a fresh pass over the log.
    fn query(&self, range: TimeRange) -> Result<LogIter, LoggingError>;

    fn flush(&self) -> Result<(), LoggingError> {
        Ok(())
    }
}

/// JSON-lines file logger. Safe to share between agents: each entry is
/// serialised up front and written under one lock, so lines never interleave.
#[derive(Debug)]
pub struct JsonlActionLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlActionLogger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoggingError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "action log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ActionLogger for JsonlActionLogger {
    fn record(&self, entry: &LogEntry) -> Result<(), LoggingError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = self.file.lock().map_err(|_| LoggingError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn query(&self, range: TimeRange) -> Result<LogIter, LoggingError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Box::new(std::iter::empty()));
            }
            Err(e) => return Err(e.into()),
        };

        let entries = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(i, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(LoggingError::Io(e))),
                };
                if line.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str::<LogEntry>(&line) {
                    Ok(entry) if range.contains(&entry.timestamp) => Some(Ok(entry)),
                    Ok(_) => None,
                    Err(source) => Some(Err(LoggingError::Corrupt { line: i + 1, source })),
                }
            });
        Ok(Box::new(entries))
    }

    fn flush(&self) -> Result<(), LoggingError> {
        let file = self.file.lock().map_err(|_| LoggingError::Poisoned)?;
        file.sync_all()?;
        Ok(())
    }
}

/// In-memory logger for tests and sessions that should leave no trace.
#[derive(Debug, Clone, Default)]
pub struct MemoryActionLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryActionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl ActionLogger for MemoryActionLogger {
    fn record(&self, entry: &LogEntry) -> Result<(), LoggingError> {
        self.entries
            .lock()
            .map_err(|_| LoggingError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }

    fn query(&self, range: TimeRange) -> Result<LogIter, LoggingError> {
        let snapshot: Vec<_> = self
            .entries
            .lock()
            .map_err(|_| LoggingError::Poisoned)?
            .iter()
            .filter(|e| range.contains(&e.timestamp))
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }
}

/// Masks sensitive parameters before entries hit the log.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    enabled: bool,
    fields: HashSet<String>,
}

impl Redactor {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.redact_in_logs,
            fields: config
                .sensitive_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
        }
    }

    pub fn redact(&self, mut entry: LogEntry) -> LogEntry {
        if !self.enabled {
            return entry;
        }
        let secret_text =
            entry.action.kind() == ActionKind::TypeText && entry.action.flag("secret");
        let redacted = entry.action.redacted(|name| {
            self.fields.contains(&name.to_lowercase()) || (secret_text && name == "text")
        });

        // The command text usually repeats the masked values verbatim.
        for (name, original) in entry.action.parameters() {
            if redacted.param(name) != Some(original)
                && let Some(value) = original.as_str()
                && !value.is_empty()
            {
                entry.source_text = mask_whole_words(&entry.source_text, value);
            }
        }
        entry.action = redacted;
        entry
    }
}

/// Replaces occurrences of `value` that are not part of a longer word.
fn mask_whole_words(text: &str, value: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(value) {
        let end = start + value.len();
        let open_start = value.starts_with(|c: char| !is_word(c))
            || !text[..start].ends_with(is_word);
        let open_end =
            value.ends_with(|c: char| !is_word(c)) || !text[end..].starts_with(is_word);
        if open_start && open_end {
            out.push_str(&text[last..start]);
            out.push_str(REDACTED);
            last = end;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Wraps a logger so that a failed write never reaches the caller.
pub struct BestEffortLogger {
    inner: Arc<dyn ActionLogger>,
    redactor: Redactor,
    failures: AtomicU64,
}

impl BestEffortLogger {
    pub fn new(inner: Arc<dyn ActionLogger>, redactor: Redactor) -> Self {
        Self {
            inner,
            redactor,
            failures: AtomicU64::new(0),
        }
    }

    pub fn record(&self, entry: LogEntry) {
        let entry = self.redactor.redact(entry);
        if let Err(e) = self.inner.record(&entry) {
            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(error = %e, failures, kind = %entry.action.kind(), "action log write failed");
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn query(&self, range: TimeRange) -> Result<LogIter, LoggingError> {
        self.inner.query(range)
    }

    pub fn flush(&self) -> Result<(), LoggingError> {
        self.inner.flush()
    }
}

impl std::fmt::Debug for BestEffortLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BestEffortLogger")
            .field("failures", &self.failure_count())
            .finish()
    }
}
