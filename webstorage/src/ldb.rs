//! Salvage-style LevelDB record surfacing: decodes `.log` write-ahead logs
//! and `.ldb` SSTables into a single newest-first stream of
//! `(key, value, sequence, state)` records, keeping older versions of a
//! key around for forensic inspection rather than hiding them.
//!
//! This is deliberately not a full LevelDB implementation: there is no
//! compaction, no bloom filters, and the `MANIFEST`/`CURRENT` files are
//! only used to discover `.ldb` files, never replayed for version-set
//! state. Every physical record on disk — live, superseded, or logically
//! deleted — is yielded, which is exactly what a forensic reader wants.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use esedb::byte_io::{ByteRead, LittleEndianRead};

use crate::error::Error;
use crate::varint::read_varint;

const BLOCK_SIZE: u64 = 32768;
const HEADER_SIZE: u64 = 7;
const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;
const FOOTER_SIZE: usize = 48;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordState {
    Live,
    Deleted,
    PriorVersion,
}

/// A single decoded LevelDB record.
#[derive(Clone, Debug)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub sequence: u64,
    pub state: RecordState,
}

struct RawEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    sequence: u64,
    deleted: bool,
}

/// An opened LevelDB directory: every physical record across its `.log`
/// and `.ldb` files, newest-first.
pub struct LevelDb {
    pub records: Vec<Record>,
}
impl LevelDb {
    pub fn open(path: &Path) -> Result<Self, Error> {
        if !path.is_dir() {
            return Err(Error::NotADirectory { path: path.display().to_string() });
        }

        let mut raw = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();
            let Some(name) = file_path.file_name().and_then(|n| n.to_str()) else { continue };

            if name.ends_with(".log") {
                match parse_log_file(&file_path) {
                    Ok(mut entries) => raw.append(&mut entries),
                    Err(e) => tracing::warn!("skipping malformed WAL log {name:?}: {e}"),
                }
            } else if name.ends_with(".ldb") || name.ends_with(".sst") {
                match parse_ldb_file(&file_path) {
                    Ok(mut entries) => raw.append(&mut entries),
                    Err(e) => tracing::warn!("skipping malformed SSTable {name:?}: {e}"),
                }
            }
        }

        Ok(Self { records: resolve_states(raw) })
    }
}

fn resolve_states(mut raw: Vec<RawEntry>) -> Vec<Record> {
    use std::collections::HashMap;

    let mut max_sequence: HashMap<Vec<u8>, u64> = HashMap::new();
    for entry in &raw {
        let slot = max_sequence.entry(entry.key.clone()).or_insert(entry.sequence);
        if entry.sequence > *slot {
            *slot = entry.sequence;
        }
    }

    raw.sort_by(|a, b| b.sequence.cmp(&a.sequence));

    raw.into_iter()
        .map(|entry| {
            let is_current = max_sequence.get(&entry.key) == Some(&entry.sequence);
            let state = if !is_current {
                RecordState::PriorVersion
            } else if entry.deleted {
                RecordState::Deleted
            } else {
                RecordState::Live
            };
            Record { key: entry.key, value: entry.value, sequence: entry.sequence, state }
        })
        .collect()
}

/// Parses a `.log` write-ahead log: 32KiB physical-record blocks carrying
/// `WriteBatch` payloads (an 8-byte sequence, a 4-byte count, then that
/// many tagged key/value entries).
fn parse_log_file(path: &Path) -> Result<Vec<RawEntry>, Error> {
    let mut file = File::open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let mut batches: Vec<u8> = Vec::new();
    let mut in_progress = false;
    let mut entries = Vec::new();
    let mut pos = 0u64;

    while pos < len {
        let block_remaining = BLOCK_SIZE - (pos % BLOCK_SIZE);
        if block_remaining < HEADER_SIZE {
            pos += block_remaining;
            file.seek(SeekFrom::Start(pos))?;
            continue;
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        if file.read_exact(&mut header).is_err() {
            break;
        }
        let length = u16::from_le_bytes([header[4], header[5]]) as usize;
        let record_type = header[6];
        pos += HEADER_SIZE;

        if record_type == 0 {
            // Zero-fill padding to the end of the block.
            pos += block_remaining - HEADER_SIZE;
            file.seek(SeekFrom::Start(pos))?;
            continue;
        }

        let mut data = vec![0u8; length];
        file.read_exact(&mut data)?;
        pos += length as u64;

        match record_type {
            1 => {
                // FULL
                parse_write_batch(&data, &mut entries);
            }
            2 => {
                // FIRST
                batches.clear();
                batches.extend_from_slice(&data);
                in_progress = true;
            }
            3 => {
                // MIDDLE
                if in_progress {
                    batches.extend_from_slice(&data);
                }
            }
            4 => {
                // LAST
                if in_progress {
                    batches.extend_from_slice(&data);
                    parse_write_batch(&batches, &mut entries);
                    in_progress = false;
                }
            }
            _ => {
                tracing::warn!("skipping WAL record with unknown type {record_type}");
            }
        }
    }

    Ok(entries)
}

fn parse_write_batch(data: &[u8], out: &mut Vec<RawEntry>) {
    if data.len() < 12 {
        return;
    }
    let sequence = u64::from_le_bytes(data[0..8].try_into().unwrap());
    let count = u32::from_le_bytes(data[8..12].try_into().unwrap());

    let mut offset = 12usize;
    for i in 0..count as u64 {
        if offset >= data.len() {
            break;
        }
        let tag = data[offset];
        offset += 1;

        let key = match read_length_prefixed(data, &mut offset) {
            Some(k) => k,
            None => break,
        };

        let value = if tag == 1 {
            match read_length_prefixed(data, &mut offset) {
                Some(v) => v,
                None => break,
            }
        } else {
            Vec::new()
        };

        out.push(RawEntry { key, value, sequence: sequence + i, deleted: tag != 1 });
    }
}

fn read_length_prefixed(data: &[u8], offset: &mut usize) -> Option<Vec<u8>> {
    let length = read_varint(data, offset).ok()? as usize;
    let end = offset.checked_add(length)?;
    let slice = data.get(*offset..end)?;
    *offset = end;
    Some(slice.to_vec())
}

struct BlockHandle {
    offset: u64,
    size: u64,
}

fn read_block_handle(data: &[u8], offset: &mut usize) -> Result<BlockHandle, Error> {
    let block_offset = read_varint(data, offset)?;
    let size = read_varint(data, offset)?;
    Ok(BlockHandle { offset: block_offset, size })
}

/// Reads and decompresses a block given its handle. The on-disk layout is
/// `[block data][compression type: 1 byte][crc32: 4 bytes]`; the CRC is
/// not verified (consistent with this reader's read-only salvage intent).
fn read_block(file: &mut File, handle: &BlockHandle) -> Result<Vec<u8>, Error> {
    file.seek(SeekFrom::Start(handle.offset))?;
    let mut buf = vec![0u8; handle.size as usize + 1];
    file.read_exact(&mut buf)?;
    let compression_type = buf[buf.len() - 1];
    let payload = &buf[..buf.len() - 1];

    match compression_type {
        0 => Ok(payload.to_vec()),
        1 => {
            let mut decoder = snap::raw::Decoder::new();
            decoder.decompress_vec(payload)
                .map_err(|e| Error::InvalidFormat { reason: format!("snappy decompression failed: {e}") })
        }
        other => Err(Error::Unsupported { reason: leak_compression_name(other) }),
    }
}

fn leak_compression_name(code: u8) -> &'static str {
    match code {
        2 => "zstd-compressed LevelDB blocks are not supported",
        _ => "unknown LevelDB block compression type",
    }
}

/// Decodes the restart-point-compressed entries of a single block.
fn parse_block_entries(data: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    if data.len() < 4 {
        return Vec::new();
    }
    let num_restarts = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as usize;
    let restart_array_size = 4 + num_restarts * 4;
    if data.len() < restart_array_size {
        return Vec::new();
    }
    let entries_end = data.len() - restart_array_size;

    let mut entries = Vec::new();
    let mut offset = 0usize;
    let mut last_key: Vec<u8> = Vec::new();

    while offset < entries_end {
        let Ok(shared) = read_varint(data, &mut offset) else { break };
        let Ok(non_shared) = read_varint(data, &mut offset) else { break };
        let Ok(value_len) = read_varint(data, &mut offset) else { break };

        let key_delta_end = offset + non_shared as usize;
        let Some(key_delta) = data.get(offset..key_delta_end) else { break };
        offset = key_delta_end;

        let value_end = offset + value_len as usize;
        let Some(value) = data.get(offset..value_end) else { break };
        offset = value_end;

        let mut key = last_key[..shared as usize].to_vec();
        key.extend_from_slice(key_delta);

        entries.push((key.clone(), value.to_vec()));
        last_key = key;
    }

    entries
}

/// Parses a `.ldb` SSTable: footer -> index block -> each data block's
/// restart-compressed entries, splitting each entry's internal key into
/// its user key, sequence number, and value-type tag.
fn parse_ldb_file(path: &Path) -> Result<Vec<RawEntry>, Error> {
    let mut file = File::open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    if len < FOOTER_SIZE as u64 {
        return Err(Error::InvalidFormat { reason: "file too small to contain a footer".to_owned() });
    }

    file.seek(SeekFrom::Start(len - FOOTER_SIZE as u64))?;
    let mut footer = [0u8; FOOTER_SIZE];
    file.read_exact(&mut footer)?;

    let magic = {
        let mut r = LittleEndianRead::new(&footer[40..48]);
        r.read_u64()?
    };
    if magic != TABLE_MAGIC {
        return Err(Error::WrongMagic { expected: TABLE_MAGIC, read: magic });
    }

    let mut offset = 0usize;
    let _metaindex_handle = read_block_handle(&footer, &mut offset)?;
    let index_handle = read_block_handle(&footer, &mut offset)?;

    let index_block = read_block(&mut file, &index_handle)?;
    let index_entries = parse_block_entries(&index_block);

    let mut entries = Vec::new();
    for (_, handle_value) in index_entries {
        let mut handle_offset = 0usize;
        let data_handle = read_block_handle(&handle_value, &mut handle_offset)?;
        let data_block = read_block(&mut file, &data_handle)?;

        for (internal_key, value) in parse_block_entries(&data_block) {
            if internal_key.len() < 8 {
                continue;
            }
            let split = internal_key.len() - 8;
            let key = internal_key[..split].to_vec();
            let trailer = u64::from_le_bytes(internal_key[split..].try_into().unwrap());
            let sequence = trailer >> 8;
            let value_type = (trailer & 0xff) as u8;

            entries.push(RawEntry { key, value, sequence, deleted: value_type == 0 });
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_sequence_wins_and_older_become_prior_version() {
        let raw = vec![
            RawEntry { key: b"k".to_vec(), value: b"v1".to_vec(), sequence: 1, deleted: false },
            RawEntry { key: b"k".to_vec(), value: b"v2".to_vec(), sequence: 2, deleted: false },
        ];
        let records = resolve_states(raw);
        assert_eq!(records[0].sequence, 2);
        assert_eq!(records[0].state, RecordState::Live);
        assert_eq!(records[1].sequence, 1);
        assert_eq!(records[1].state, RecordState::PriorVersion);
    }

    #[test]
    fn deletion_tag_yields_deleted_state_for_current_version() {
        let raw = vec![RawEntry { key: b"k".to_vec(), value: Vec::new(), sequence: 5, deleted: true }];
        let records = resolve_states(raw);
        assert_eq!(records[0].state, RecordState::Deleted);
    }

    #[test]
    fn write_batch_assigns_increasing_sequence_per_entry() {
        let mut data = Vec::new();
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        // First entry: tag=1 (value), key="a", value="1"
        data.push(1);
        data.push(1);
        data.push(b'a');
        data.push(1);
        data.push(b'1');
        // Second entry: tag=0 (deletion), key="b"
        data.push(0);
        data.push(1);
        data.push(b'b');

        let mut entries = Vec::new();
        parse_write_batch(&data, &mut entries);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 100);
        assert_eq!(entries[0].key, b"a");
        assert!(!entries[0].deleted);
        assert_eq!(entries[1].sequence, 101);
        assert_eq!(entries[1].key, b"b");
        assert!(entries[1].deleted);
    }

    #[test]
    fn block_entries_round_trip_shared_prefix_compression() {
        // Two entries sharing no restart compression (simplest valid block: 0 restarts).
        let mut block = Vec::new();
        // entry 1: shared=0, non_shared=3, value_len=1, key="foo", value="1"
        block.extend_from_slice(&[0, 3, 1]);
        block.extend_from_slice(b"foo");
        block.extend_from_slice(b"1");
        // entry 2: shared=2 ("fo"), non_shared=1 ("x" -> "fox"), value_len=1, value="2"
        block.extend_from_slice(&[2, 1, 1]);
        block.extend_from_slice(b"x");
        block.extend_from_slice(b"2");
        // no restarts
        block.extend_from_slice(&0u32.to_le_bytes());

        let entries = parse_block_entries(&block);
        assert_eq!(entries, vec![(b"foo".to_vec(), b"1".to_vec()), (b"fox".to_vec(), b"2".to_vec())]);
    }
}
