//! Append-only stores backed by SQLite
//!
//! - [`RawStore`]: schema-on-read payloads, unique on `(source_file_id, position_in_file)`
//! - [`LoadStateStore`]: per-file ingestion status
//! - [`CuratedStore`]: fixed-schema projection, unique on the lineage key `raw_record_id`
//! - [`CursorStore`]: named high-water marks over raw record ids
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`) so
//! that string comparison in SQL matches chronological order.

pub mod curated;
pub mod cursor;
pub mod load_state;
pub mod raw;

pub use curated::{CuratedFields, CuratedRecord, CuratedStore, GroupField, NewCuratedRecord};
pub use cursor::CursorStore;
pub use load_state::{LoadState, LoadStateStore, LoadSummary};
pub use raw::{RawRecord, RawStore};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{PipelineError, Result};

pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(table: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| PipelineError::corrupt_row(table, format!("bad timestamp '{value}': {e}")))
}
