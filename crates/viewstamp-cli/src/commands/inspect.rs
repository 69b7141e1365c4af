//! Record store inspection.

use std::path::Path;

use anyhow::{Context, Result};
use viewstamp_storage::{FileStore, RecordStore};
use viewstamp_types::ViewStamp;
use viewstamp_vsr::RequestRecord;

/// Parses `VIEW.REQ`, optionally prefixed with `v` (as stamps are displayed).
pub fn parse_stamp(s: &str) -> Result<ViewStamp, String> {
    let trimmed = s.strip_prefix('v').unwrap_or(s);
    let (view, req) = trimmed
        .split_once('.')
        .ok_or_else(|| format!("expected VIEW.REQ, got {s:?}"))?;
    let view_id = view
        .parse()
        .map_err(|e| format!("invalid view in {s:?}: {e}"))?;
    let req_id = req
        .parse()
        .map_err(|e| format!("invalid request id in {s:?}: {e}"))?;
    Ok(ViewStamp::new(view_id, req_id))
}

/// Prints every record with `from <= stamp <= to`.
pub fn run(data_dir: &Path, from: Option<ViewStamp>, to: Option<ViewStamp>) -> Result<()> {
    let store = FileStore::open(data_dir)
        .with_context(|| format!("Failed to open record store in {}", data_dir.display()))?;

    let start = from.unwrap_or(ViewStamp::ZERO);
    let end = to.unwrap_or(ViewStamp::new(u64::MAX, u64::MAX));

    println!(
        "{:<14} {:<24} {:<20} {:>5} {:>9}",
        "stamp", "created_at", "ack_bitmap", "acks", "bytes"
    );

    let mut count = 0usize;
    for (key, value) in store.range(start.key(), end.key())? {
        let stamp = key.stamp();
        match RequestRecord::decode(&value) {
            Ok(record) => println!(
                "{:<14} {:<24} {:<20} {:>5} {:>9}",
                stamp.to_string(),
                record.created_at.to_string(),
                record.ack_bitmap.to_string(),
                record.ack_bitmap.count(),
                record.payload.len()
            ),
            Err(e) => println!("{:<14} unreadable record: {e}", stamp.to_string()),
        }
        count += 1;
    }

    println!("{count} records in {}", store.path().display());
    Ok(())
}
