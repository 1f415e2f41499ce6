//! # Lazarus: Trace Reader
//!
//! Brings a recorded sandbox run back to life as an ordered list of records.
//!
//! - **Role**: Decodes JSON / JSON.gz record streams (NDJSON or concatenated
//!   values) into `TraceRecord`s for the build session.
//! - **Design**: Streaming. Values that are valid JSON but not a known record
//!   are logged and skipped; a syntax error ends the stream but keeps every
//!   record read before it.

use anyhow::{Context, Result};
use common::Call;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TRACE_SUFFIXES: &[&str] = &[".json", ".jsonl", ".ndjson", ".json.gz"];

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("record {index} is not a trace record: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("stream ends in invalid JSON after {records} values: {source}")]
    Truncated {
        records: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One entry of a trace stream, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceRecord {
    Call(Call),
    File { path: String },
    Directory { path: String },
}

#[derive(Debug, Default)]
pub struct Trace {
    pub source: PathBuf,
    pub records: Vec<TraceRecord>,
    /// Values skipped because they did not decode as a record.
    pub malformed: usize,
    /// Set when the stream stopped at a syntax error.
    pub truncated: bool,
}

impl Trace {
    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.records.iter().filter_map(|r| match r {
            TraceRecord::Call(call) => Some(call),
            _ => None,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls().count()
    }
}

/// Whether a path looks like a trace file by its suffix.
pub fn is_trace_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    TRACE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Opens a trace file, transparently decompressing `.gz`.
pub fn open_trace(path: &Path) -> Result<Box<dyn Read>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open trace file: {:?}", path))?;
    let reader: Box<dyn Read> = if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(reader)
}

/// Decodes every record of a stream into `trace`.
pub fn decode_records<R: Read>(reader: R, trace: &mut Trace) {
    let stream = serde_json::Deserializer::from_reader(BufReader::new(reader)).into_iter::<Value>();

    for (index, result) in stream.enumerate() {
        match result {
            Ok(value) => match serde_json::from_value::<TraceRecord>(value) {
                Ok(record) => trace.records.push(record),
                Err(source) => {
                    let e = TraceError::Malformed { index, source };
                    warn!(trace = ?trace.source, error = %e, "Skipping malformed record");
                    trace.malformed += 1;
                }
            },
            Err(source) => {
                let e = TraceError::Truncated {
                    records: index,
                    source,
                };
                warn!(trace = ?trace.source, error = %e, "Trace stream ended early");
                trace.truncated = true;
                break;
            }
        }
    }
}

/// Reads a whole trace file.
pub fn read_trace(path: &Path) -> Result<Trace> {
    let reader = open_trace(path)?;
    let mut trace = Trace {
        source: path.to_path_buf(),
        ..Default::default()
    };
    decode_records(reader, &mut trace);
    debug!(
        trace = ?path,
        records = trace.records.len(),
        malformed = trace.malformed,
        "Trace decoded"
    );
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn records() -> Vec<Value> {
        vec![
            serde_json::json!({
                "type": "directory",
                "path": "C:\\Windows\\System32"
            }),
            serde_json::json!({
                "type": "call",
                "name": "socket",
                "status": true,
                "arguments": { "af": 2, "type": 1, "protocol": 6 },
                "return_value": 256,
                "process": { "pid": 1337, "executable": "C:\\sample.exe" },
                "time": 0.25
            }),
            serde_json::json!({
                "type": "call",
                "name": "RegOpenKeyExW",
                "status": "success",
                "arguments": { "key_handle": 64, "regkey": "HKLM\\Software" },
                "process": { "pid": 1337 }
            }),
        ]
    }

    #[test]
    fn test_read_trace_gz() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file_path = temp_dir.path().join("run.json.gz");
        let file = File::create(&file_path)?;

        let mut encoder = GzEncoder::new(file, Compression::default());
        for record in records() {
            serde_json::to_writer(&mut encoder, &record)?;
            writeln!(encoder)?;
        }
        encoder.finish()?;

        let trace = read_trace(&file_path)?;
        assert_eq!(trace.records.len(), 3);
        assert_eq!(trace.call_count(), 2);
        assert_eq!(trace.malformed, 0);
        assert!(!trace.truncated);
        assert_eq!(
            trace.records[0],
            TraceRecord::Directory {
                path: "C:\\Windows\\System32".into()
            }
        );

        let first = trace.calls().next().unwrap();
        assert_eq!(first.name, "socket");
        assert!(first.succeeded());
        assert_eq!(first.arguments.int("af").unwrap(), 2);
        assert_eq!(first.process.pid, 1337);
        assert_eq!(first.time, 0.25);
        Ok(())
    }

    #[test]
    fn test_concatenated_plain_json() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file_path = temp_dir.path().join("run.json");
        let mut file = File::create(&file_path)?;
        for record in records() {
            serde_json::to_writer(&mut file, &record)?;
        }
        drop(file);

        let trace = read_trace(&file_path)?;
        assert_eq!(trace.records.len(), 3);
        Ok(())
    }

    #[test]
    fn test_unknown_records_are_skipped() {
        let input = concat!(
            r#"{"type":"file","path":"C:\\a.txt"}"#,
            "\n",
            r#"{"type":"thread","tid":4}"#,
            "\n",
            r#"{"type":"call","name":"listen"}"#,
            "\n",
            r#"{"type":"file","path":"C:\\b.txt"}"#,
            "\n",
        );
        let mut trace = Trace::default();
        decode_records(input.as_bytes(), &mut trace);
        assert_eq!(trace.records.len(), 2);
        assert_eq!(trace.malformed, 2);
        assert!(!trace.truncated);
    }

    #[test]
    fn test_syntax_error_keeps_earlier_records() {
        let input = concat!(
            r#"{"type":"file","path":"C:\\a.txt"}"#,
            "\n",
            r#"{"type":"file","path": "#,
        );
        let mut trace = Trace::default();
        decode_records(input.as_bytes(), &mut trace);
        assert_eq!(trace.records.len(), 1);
        assert!(trace.truncated);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(read_trace(&temp_dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_is_trace_file() {
        assert!(is_trace_file(Path::new("/t/run.json")));
        assert!(is_trace_file(Path::new("/t/RUN.JSONL")));
        assert!(is_trace_file(Path::new("/t/run.ndjson")));
        assert!(is_trace_file(Path::new("/t/run.json.gz")));
        assert!(!is_trace_file(Path::new("/t/run.gz")));
        assert!(!is_trace_file(Path::new("/t/config.toml")));
    }
}
