//! Staged file decoding
//!
//! # Supported Formats
//!
//! - **JSON Lines** (`.jsonl`, `.ndjson`): one record per non-blank line
//! - **JSON** (`.json`): a top-level array yields one record per element,
//!   any other value is a single record
//! - **Gzip** (`.gz` suffix on either of the above): using flate2
//!
//! Decoding is all-or-nothing: the first bad record fails the whole file.

use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use tracing::debug;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    JsonLines,
    Json,
}

/// Format and compression inferred from the file identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileKind {
    pub format: FileFormat,
    pub gzip: bool,
}

impl FileKind {
    pub fn detect(file_id: &str) -> Option<Self> {
        let lower = file_id.to_lowercase();
        let (stem, gzip) = match lower.strip_suffix(".gz") {
            Some(stem) => (stem, true),
            None => (lower.as_str(), false),
        };

        let format = if stem.ends_with(".jsonl") || stem.ends_with(".ndjson") {
            FileFormat::JsonLines
        } else if stem.ends_with(".json") {
            FileFormat::Json
        } else {
            return None;
        };

        Some(Self { format, gzip })
    }
}

/// Decode a staged file into its records, in file order
pub fn parse_records(file_id: &str, data: &[u8]) -> Result<Vec<Value>> {
    let kind = FileKind::detect(file_id)
        .ok_or_else(|| PipelineError::parse_failure(file_id, 0, "unsupported file format"))?;

    let decompressed;
    let bytes = if kind.gzip {
        decompressed = decompress_gzip(data)
            .map_err(|e| PipelineError::parse_failure(file_id, 0, format!("gzip: {e}")))?;
        &decompressed[..]
    } else {
        data
    };

    let records = match kind.format {
        FileFormat::JsonLines => parse_json_lines(file_id, bytes)?,
        FileFormat::Json => parse_json_document(file_id, bytes)?,
    };

    debug!(file_id, records = records.len(), "Parsed staged file");
    Ok(records)
}

fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

fn parse_json_lines(file_id: &str, bytes: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::parse_failure(file_id, 0, format!("invalid UTF-8: {e}")))?;

    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        // blank lines do not take a position
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line)
            .map_err(|e| PipelineError::parse_failure(file_id, records.len(), e))?;
        records.push(value);
    }
    Ok(records)
}

fn parse_json_document(file_id: &str, bytes: &[u8]) -> Result<Vec<Value>> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| PipelineError::parse_failure(file_id, 0, e))?;

    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_detect() {
        assert_eq!(
            FileKind::detect("a.jsonl"),
            Some(FileKind { format: FileFormat::JsonLines, gzip: false })
        );
        assert_eq!(
            FileKind::detect("a.NDJSON.gz"),
            Some(FileKind { format: FileFormat::JsonLines, gzip: true })
        );
        assert_eq!(
            FileKind::detect("a.json"),
            Some(FileKind { format: FileFormat::Json, gzip: false })
        );
        assert_eq!(FileKind::detect("a.csv"), None);
        assert_eq!(FileKind::detect("a.gz"), None);
    }

    #[test]
    fn test_json_lines_blank_lines_skipped() {
        let records = parse_records("a.jsonl", b"{\"n\":0}\n\n   \n{\"n\":1}\r\n{\"n\":2}").unwrap();
        assert_eq!(records, vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_json_lines_failure_reports_position() {
        let err = parse_records("a.jsonl", b"{\"n\":0}\n\n{broken\n{\"n\":2}\n").unwrap_err();
        match err {
            PipelineError::ParseFailure { file_id, position, .. } => {
                assert_eq!(file_id, "a.jsonl");
                assert_eq!(position, 1);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_json_document() {
        assert_eq!(parse_records("a.json", b"[1, {\"a\": 2}]").unwrap(), vec![json!(1), json!({"a": 2})]);
        assert_eq!(parse_records("a.json", b"{\"a\": 1}").unwrap(), vec![json!({"a": 1})]);
        assert!(parse_records("a.json", b"[1, 2").is_err());
    }

    #[test]
    fn test_gzip_json_lines() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"n\":0}\n{\"n\":1}\n").unwrap();
        let data = encoder.finish().unwrap();

        let records = parse_records("a.jsonl.gz", &data).unwrap();
        assert_eq!(records.len(), 2);
        assert!(parse_records("b.jsonl.gz", b"not gzip").is_err());
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            parse_records("notes.txt", b"hello"),
            Err(PipelineError::ParseFailure { position: 0, .. })
        ));
    }
}
