//! Chromium LocalStorage: a thin logical layer over [`crate::ldb`] records
//! keyed `META:<host>`, `METAACCESS:<host>`, and `_<host>\x00<selector><key>`.
//!
//! References:
//!   - <https://www.cclsolutionsgroup.com/post/chromium-session-storage-and-local-storage>

use std::path::Path;

use crate::error::Error;
use crate::ldb::{LevelDb, Record, RecordState};

/// Microseconds between the WebKit epoch (1601-01-01) and the Unix epoch.
const WEBKIT_TO_UNIX_MICROS: i64 = 11_644_473_600_000_000;

/// Converts a raw WebKit timestamp (microseconds since 1601-01-01 UTC) to
/// microseconds since the Unix epoch.
pub fn webkit_to_unix_micros(webkit: i64) -> i64 {
    webkit - WEBKIT_TO_UNIX_MICROS
}

#[derive(Clone, Copy, Debug)]
pub enum MetaValue {
    Write { last_modified_webkit: i64 },
    Access { last_accessed_webkit: i64 },
}

#[derive(Clone, Debug)]
pub struct MetaKey {
    pub host: String,
    pub sequence: u64,
    pub value: MetaValue,
}

/// Timestamps a [`RecordKey`] is heuristically associated with, per the
/// documented write-ordering assumption: meta keys are written immediately
/// before the records in the same batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordMeta {
    pub created_webkit: Option<i64>,
    pub last_modified_webkit: Option<i64>,
    pub last_accessed_webkit: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct RecordKey {
    pub key: String,
    pub value: Option<String>,
    pub sequence: u64,
    pub state: RecordState,
}

pub struct Store {
    pub host: String,
    pub meta: Vec<MetaKey>,
    pub records: Vec<RecordKey>,
}
impl Store {
    pub fn get(&self, key: &str) -> Option<&RecordKey> {
        self.records.iter().find(|r| r.key == key)
    }

    /// Finds the metadata most likely belonging to `record`: the meta key
    /// with the greatest sequence strictly less than the record's own.
    /// This is explicitly a heuristic (batched writes put meta keys first),
    /// not a reconstruction of a real transaction boundary.
    pub fn meta_for(&self, record: &RecordKey) -> RecordMeta {
        let mut result = RecordMeta::default();

        for meta_key in &self.meta {
            if meta_key.sequence < record.sequence {
                match meta_key.value {
                    MetaValue::Write { last_modified_webkit } => {
                        result.last_modified_webkit = Some(last_modified_webkit);
                        if result.created_webkit.is_none() {
                            result.created_webkit = Some(last_modified_webkit);
                        }
                    }
                    MetaValue::Access { last_accessed_webkit } => {
                        result.last_accessed_webkit = Some(last_accessed_webkit);
                        if result.created_webkit.map_or(true, |c| c > last_accessed_webkit) {
                            result.created_webkit = Some(last_accessed_webkit);
                        }
                    }
                }
            } else if meta_key.sequence > record.sequence {
                break;
            }
        }

        result
    }
}

pub struct LocalStorage {
    pub stores: Vec<Store>,
}
impl LocalStorage {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let leveldb = LevelDb::open(path)?;

        let mut hosts: Vec<(String, Vec<MetaKey>)> = Vec::new();
        for record in &leveldb.records {
            if record.state != RecordState::Live {
                continue;
            }
            let Some((host, value)) = decode_meta(record) else { continue };
            match hosts.iter_mut().find(|(h, _)| *h == host) {
                Some((_, keys)) => keys.push(MetaKey { host: host.clone(), sequence: record.sequence, value }),
                None => hosts.push((host.clone(), vec![MetaKey { host, sequence: record.sequence, value }])),
            }
        }

        let mut stores = Vec::with_capacity(hosts.len());
        for (host, mut meta) in hosts {
            meta.sort_by_key(|m| m.sequence);
            let records = collect_records(&leveldb.records, &host);
            stores.push(Store { host, meta, records });
        }

        Ok(Self { stores })
    }

    pub fn store(&self, host: &str) -> Option<&Store> {
        self.stores.iter().find(|s| s.host == host)
    }
}

fn decode_meta(record: &Record) -> Option<(String, MetaValue)> {
    if let Some(host) = record.key.strip_prefix(b"META:") {
        let last_modified_webkit = decode_single_field_timestamp(&record.value)?;
        return Some((latin1_decode(host), MetaValue::Write { last_modified_webkit }));
    }
    if let Some(host) = record.key.strip_prefix(b"METAACCESS:") {
        let last_accessed_webkit = decode_single_field_timestamp(&record.value)?;
        return Some((latin1_decode(host), MetaValue::Access { last_accessed_webkit }));
    }
    None
}

/// `LocalStorageAreaWriteMetaData`/`LocalStorageAreaAccessMetaData` are
/// single-field protobuf messages (`optional int64 last_modified/last_accessed
/// = 1`): a `0x08` tag byte followed by a varint timestamp.
fn decode_single_field_timestamp(value: &[u8]) -> Option<i64> {
    if value.first() != Some(&0x08) {
        return None;
    }
    let mut offset = 1usize;
    crate::varint::read_varint(value, &mut offset).ok().map(|v| v as i64)
}

fn collect_records(records: &[Record], host: &str) -> Vec<RecordKey> {
    let mut prefix = b"_".to_vec();
    prefix.extend_from_slice(host.as_bytes());
    prefix.push(0);

    records.iter()
        .filter(|r| r.key.starts_with(&prefix))
        .filter_map(|r| decode_record(r, prefix.len()))
        .collect()
}

fn decode_record(record: &Record, prefix_len: usize) -> Option<RecordKey> {
    let payload = &record.key[prefix_len..];
    let selector = *payload.first()?;
    let key_bytes = &payload[1..];
    let key = decode_selected_string(selector, key_bytes)?;

    let value = if record.value.is_empty() {
        None
    } else {
        let value_selector = record.value[0];
        decode_selected_string(value_selector, &record.value[1..])
    };

    Some(RecordKey { key, value, sequence: record.sequence, state: record.state })
}

fn decode_selected_string(selector: u8, bytes: &[u8]) -> Option<String> {
    match selector {
        0x00 => Some(utf16_le_decode(bytes)),
        0x01 => Some(latin1_decode(bytes)),
        _ => None,
    }
}

fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn utf16_le_decode(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_for_picks_greatest_lower_sequence() {
        let store = Store {
            host: "example.com".to_owned(),
            meta: vec![
                MetaKey { host: "example.com".to_owned(), sequence: 1, value: MetaValue::Write { last_modified_webkit: 100 } },
                MetaKey { host: "example.com".to_owned(), sequence: 3, value: MetaValue::Write { last_modified_webkit: 300 } },
                MetaKey { host: "example.com".to_owned(), sequence: 7, value: MetaValue::Write { last_modified_webkit: 700 } },
            ],
            records: Vec::new(),
        };
        let record = RecordKey { key: "k".to_owned(), value: None, sequence: 5, state: RecordState::Live };
        let meta = store.meta_for(&record);
        assert_eq!(meta.last_modified_webkit, Some(300));
    }

    #[test]
    fn meta_for_returns_none_when_no_earlier_meta_exists() {
        let store = Store { host: "h".to_owned(), meta: Vec::new(), records: Vec::new() };
        let record = RecordKey { key: "k".to_owned(), value: None, sequence: 5, state: RecordState::Live };
        let meta = store.meta_for(&record);
        assert!(meta.last_modified_webkit.is_none());
        assert!(meta.last_accessed_webkit.is_none());
        assert!(meta.created_webkit.is_none());
    }

    #[test]
    fn decodes_utf16_record_key_and_value() {
        let mut key = b"_example.com\x00\x00".to_vec();
        key.extend_from_slice(&utf16_le_bytes("MyKey"));
        let mut value = vec![0x00];
        value.extend_from_slice(&utf16_le_bytes("MyValue"));

        let record = Record { key, value, sequence: 10, state: RecordState::Live };
        let decoded = decode_record(&record, "_example.com\x00".len()).unwrap();
        assert_eq!(decoded.key, "MyKey");
        assert_eq!(decoded.value.as_deref(), Some("MyValue"));
    }

    fn utf16_le_bytes(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }
}
