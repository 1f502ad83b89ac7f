//! cz-logging: append-only NDJSON events for run post-mortems.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One searched move, written after every `think`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMoveEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,

    pub position: String,
    pub best_move: String,
    pub playouts: u32,
    pub nodes: usize,
    pub elapsed_ms: u64,
    /// Root value in [0, 1], side to move's view.
    pub winrate: f32,
    pub pv: Vec<String>,
}

impl SearchMoveEventV1 {
    pub const EVENT: &'static str = "search_move_v1";
}

/// Periodic root snapshot while analysis output is enabled.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,

    pub playouts: u32,
    pub nodes: usize,
    pub elapsed_ms: u64,
    pub winrate: f32,
    pub pv: Vec<String>,
}

impl AnalysisEventV1 {
    pub const EVENT: &'static str = "analysis_v1";
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub enum NdjsonError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for NdjsonError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for NdjsonError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl std::fmt::Display for NdjsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NdjsonError::Io(e) => write!(f, "log io error: {}", e),
            NdjsonError::Json(e) => write!(f, "log encode error: {}", e),
        }
    }
}

impl std::error::Error for NdjsonError {}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it if it doesn't exist.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use serde_json::Value;

    fn read_ndjson_lenient(path: &Path) -> Vec<Value> {
        let s = fs::read_to_string(path).expect("read");
        let mut out = Vec::new();
        for line in s.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(v) = serde_json::from_str::<Value>(line) {
                out.push(v);
            }
        }
        out
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn writes_one_valid_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut w = NdjsonWriter::open_append(&path).unwrap();

        let event = SearchMoveEventV1 {
            event: SearchMoveEventV1::EVENT,
            ts_ms: now_ms(),
            position: "startpos".to_string(),
            best_move: "e2e4".to_string(),
            playouts: 800,
            nodes: 4321,
            elapsed_ms: 95,
            winrate: 0.53,
            pv: vec!["e2e4".to_string(), "e7e5".to_string()],
        };
        w.write_event(&event).unwrap();
        w.write_event(&event).unwrap();
        w.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0]["event"], "search_move_v1");
        assert_eq!(vals[0]["best_move"], "e2e4");
        assert_eq!(vals[1]["playouts"], 800);
    }

    #[test]
    fn lenient_reader_tolerates_trailing_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        {
            let mut w = NdjsonWriter::open_append(&path).unwrap();
            let event = AnalysisEventV1 {
                event: AnalysisEventV1::EVENT,
                ts_ms: 1,
                playouts: 10,
                nodes: 11,
                elapsed_ms: 12,
                winrate: 0.5,
                pv: vec![],
            };
            w.write_event(&event).unwrap();
            w.flush().unwrap();
        }

        // Simulate a crash: append a partial JSON line with no newline.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"event":"analysis_v1","playouts":"#).unwrap();
        f.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0]["nodes"], 11);
    }
}
