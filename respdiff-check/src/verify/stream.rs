//! Stream comparison: consumer-group state, entries, and pending lists.
//!
//! Three phases, each aborting the whole key with a `value` conflict on
//! its first mismatch. Entry walks advance id cursors so the stream is
//! never materialised whole.

use respdiff_client::{Command, Reply, StoreClient};
use respdiff_core::constants::STREAM_SEGMENT;
use respdiff_core::{CheckError, KeyRecord};

/// Compare one stream key. Returns true when the sides differ.
pub fn compare_stream(
    record: &KeyRecord,
    source: &mut StoreClient,
    target: &mut StoreClient,
) -> Result<bool, CheckError> {
    // Phase 1: consumer-group metadata must match exactly.
    let groups_cmd = Command::new("XINFO").arg("GROUPS").arg(record.key.clone());
    let source_groups = source.do_command(&groups_cmd)?;
    let target_groups = target.do_command(&groups_cmd)?;
    if source_groups != target_groups {
        return Ok(true);
    }

    // Phase 2: entry-by-entry walk.
    let step = STREAM_SEGMENT.max(record.source.item_count / 20);
    if walk_entries(record, source, target, step)? {
        return Ok(true);
    }

    // Phase 3: per-group pending entries, compared on (id, consumer)
    // only. Delivery counts and idle times drift under redelivery.
    for (group, pending) in extract_groups(&source_groups) {
        if walk_pending(record, source, target, &group, pending, step)? {
            return Ok(true);
        }
    }

    Ok(false)
}

fn walk_entries(
    record: &KeyRecord,
    source: &mut StoreClient,
    target: &mut StoreClient,
    step: i64,
) -> Result<bool, CheckError> {
    let mut start = b"0-0".to_vec();
    let mut scanned: i64 = 0;

    while scanned < record.source.item_count {
        let cmd = Command::new("XRANGE")
            .arg(record.key.clone())
            .arg(start.clone())
            .arg("+")
            .arg("COUNT")
            .arg_int(step);
        let source_page = source.do_command(&cmd)?;
        let target_page = target.do_command(&cmd)?;
        if source_page != target_page {
            return Ok(true);
        }

        let entries = source_page.into_array("XRANGE")?;
        if entries.is_empty() {
            break;
        }
        scanned += entries.len() as i64;

        let Some(last_id) = entry_id(entries.last().expect("non-empty page")) else {
            break;
        };
        start = next_stream_id(&last_id);
    }
    Ok(false)
}

fn walk_pending(
    record: &KeyRecord,
    source: &mut StoreClient,
    target: &mut StoreClient,
    group: &[u8],
    pending: i64,
    step: i64,
) -> Result<bool, CheckError> {
    let mut start = b"0-0".to_vec();
    let mut scanned: i64 = 0;

    while scanned < pending {
        let cmd = Command::new("XPENDING")
            .arg(record.key.clone())
            .arg(group.to_vec())
            .arg(start.clone())
            .arg("+")
            .arg_int(step);
        let source_page = source.do_command(&cmd)?.into_array("XPENDING")?;
        let target_page = target.do_command(&cmd)?.into_array("XPENDING")?;

        if pending_digest(&source_page) != pending_digest(&target_page) {
            return Ok(true);
        }
        if source_page.is_empty() {
            break;
        }
        scanned += source_page.len() as i64;

        let Some(last_id) = entry_id(source_page.last().expect("non-empty page")) else {
            break;
        };
        start = next_stream_id(&last_id);
    }
    Ok(false)
}

/// `(entry id, consumer name)` pairs of an XPENDING page.
fn pending_digest(page: &[Reply]) -> Vec<(Vec<u8>, Vec<u8>)> {
    page.iter()
        .filter_map(|entry| {
            let Reply::Array(fields) = entry else {
                return None;
            };
            let id = match fields.first() {
                Some(Reply::Bulk(id)) => id.clone(),
                _ => return None,
            };
            let consumer = match fields.get(1) {
                Some(Reply::Bulk(consumer)) => consumer.clone(),
                _ => return None,
            };
            Some((id, consumer))
        })
        .collect()
}

/// First element of an entry reply (`[id, [field, value, …]]` for XRANGE,
/// `[id, consumer, idle, count]` for XPENDING).
fn entry_id(entry: &Reply) -> Option<Vec<u8>> {
    let Reply::Array(fields) = entry else {
        return None;
    };
    match fields.first() {
        Some(Reply::Bulk(id)) => Some(id.clone()),
        _ => None,
    }
}

/// `(group name, pending count)` pairs from an XINFO GROUPS reply, whose
/// entries are flat field/value maps.
fn extract_groups(reply: &Reply) -> Vec<(Vec<u8>, i64)> {
    let Reply::Array(groups) = reply else {
        return Vec::new();
    };
    groups
        .iter()
        .filter_map(|group| {
            let Reply::Array(fields) = group else {
                return None;
            };
            let mut name = None;
            let mut pending = None;
            let mut iter = fields.iter();
            while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                let Reply::Bulk(field) = field else { continue };
                match field.as_slice() {
                    b"name" => {
                        if let Reply::Bulk(n) = value {
                            name = Some(n.clone());
                        }
                    }
                    b"pending" => {
                        if let Reply::Int(p) = value {
                            pending = Some(*p);
                        }
                    }
                    _ => {}
                }
            }
            Some((name?, pending?))
        })
        .collect()
}

/// The id immediately after `id` in stream order.
fn next_stream_id(id: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(id);
    match text.split_once('-') {
        Some((ms, seq)) => {
            let seq: u64 = seq.parse().unwrap_or(0);
            format!("{ms}-{}", seq + 1).into_bytes()
        }
        None => format!("{text}-1").into_bytes(),
    }
}
