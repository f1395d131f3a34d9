//! Indexing progress reporting.
//!
//! Reports observable progress during `assist index` so users see which
//! stage is running and how many chunks are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for one indexing run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Reading and chunking files. Total unknown.
    Chunking { collection: String },
    /// n chunks embedded out of total.
    Embedding {
        collection: String,
        n: u64,
        total: u64,
    },
    /// n chunks written to the vector store.
    Storing { collection: String, n: u64 },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index code_shop_v2_…  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Chunking { collection } => {
                format!("index {}  chunking...\n", collection)
            }
            IndexProgressEvent::Embedding {
                collection,
                n,
                total,
            } => format!(
                "index {}  embedding  {} / {} chunks\n",
                collection,
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Storing { collection, n } => {
                format!("index {}  storing  {} chunks\n", collection, format_number(*n))
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Chunking { collection } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "chunking"
            }),
            IndexProgressEvent::Embedding {
                collection,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Storing { collection, n } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "storing",
                "n": n
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
