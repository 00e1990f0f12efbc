//! IndexedDB as Chrome stores it: a handful of global/per-database metadata
//! key spaces layered over the same LevelDB record stream, plus a
//! best-effort decoder for the V8 `ValueSerializer` payloads object stores
//! hold.
//!
//! References:
//!   - <https://chromium.googlesource.com/chromium/src/+/main/content/browser/indexed_db/indexed_db_leveldb_coding.h>
//!   - <https://chromium.googlesource.com/v8/v8/+/main/src/objects/value-serializer.cc>

use std::path::Path;

use crate::blink::{deserialize_host_object, BlinkHostObject};
use crate::error::Error;
use crate::ldb::{LevelDb, RecordState};
use crate::varint::read_varint;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GlobalMetaDataType {
    SchemaVersion,
    MaxDatabaseId,
    DataVersion,
    RecoveryBlobJournal,
    ActiveBlobJournal,
    EarliestSweep,
    EarliestCompaction,
    DatabaseFreeList,
    DatabaseName,
    Unknown(u8),
}
impl GlobalMetaDataType {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::SchemaVersion,
            1 => Self::MaxDatabaseId,
            2 => Self::DataVersion,
            3 => Self::RecoveryBlobJournal,
            4 => Self::ActiveBlobJournal,
            5 => Self::EarliestSweep,
            6 => Self::EarliestCompaction,
            100 => Self::DatabaseFreeList,
            201 => Self::DatabaseName,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatabaseMetaDataType {
    OriginName,
    DatabaseName,
    UserStringVersion,
    MaxObjectStoreId,
    UserVersion,
    BlobKeyGeneratorCurrentNumber,
    MaxSimpleMetadataType,
    ObjectStoreMetaData,
    Unknown(u8),
}
impl DatabaseMetaDataType {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::OriginName,
            1 => Self::DatabaseName,
            2 => Self::UserStringVersion,
            3 => Self::MaxObjectStoreId,
            4 => Self::UserVersion,
            5 => Self::BlobKeyGeneratorCurrentNumber,
            6 => Self::MaxSimpleMetadataType,
            50 => Self::ObjectStoreMetaData,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexIdType {
    ObjectStoreData,
    ExistsEntry,
    BlobEntry,
    Index(u32),
}
impl IndexIdType {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::ObjectStoreData,
            2 => Self::ExistsEntry,
            3 => Self::BlobEntry,
            other => Self::Index(other),
        }
    }
}

/// The first byte(s) of every `IndexedDB` key: a bit-packed triple of
/// (database_id, object_store_id, index_id) byte counts, followed by that
/// many little-endian bytes for each of the three ids in turn.
#[derive(Clone, Copy, Debug)]
pub struct KeyPrefix {
    pub database_id: u32,
    pub object_store_id: u32,
    pub index_id: u32,
}
impl KeyPrefix {
    /// Returns the decoded prefix and the number of bytes it consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), Error> {
        let first = *data.first().ok_or_else(|| Error::InvalidFormat { reason: "empty IndexedDB key".to_owned() })?;
        let database_id_bytes = ((first >> 5) & 0x07) as usize + 1;
        let object_store_id_bytes = ((first >> 2) & 0x07) as usize + 1;
        let index_id_bytes = (first & 0x03) as usize + 1;

        let mut offset = 1usize;
        let database_id = read_le_uint(data, &mut offset, database_id_bytes)?;
        let object_store_id = read_le_uint(data, &mut offset, object_store_id_bytes)?;
        let index_id = read_le_uint(data, &mut offset, index_id_bytes)?;

        Ok((Self { database_id, object_store_id, index_id }, offset))
    }
}

fn read_le_uint(data: &[u8], offset: &mut usize, width: usize) -> Result<u32, Error> {
    let end = *offset + width;
    let slice = data.get(*offset..end).ok_or_else(|| Error::InvalidFormat { reason: "truncated IndexedDB key prefix".to_owned() })?;
    let mut value = 0u32;
    for (i, &byte) in slice.iter().enumerate() {
        value |= (byte as u32) << (8 * i);
    }
    *offset = end;
    Ok(value)
}

/// An IndexedDB key's tagged-union encoding (`IndexedDBKey::Encode`).
#[derive(Clone, Debug)]
pub enum IndexedDbKey {
    Null,
    String(String),
    Date(f64),
    Number(f64),
    Array(Vec<IndexedDbKey>),
    MinKey,
    Binary(Vec<u8>),
}

fn read_truncated_int(data: &[u8], offset: &mut usize, len: usize) -> Result<u64, Error> {
    let end = *offset + len;
    let slice = data.get(*offset..end).ok_or_else(|| Error::InvalidFormat { reason: "truncated integer".to_owned() })?;
    let mut value = 0u64;
    for &byte in slice {
        value = (value << 8) | byte as u64;
    }
    *offset = end;
    Ok(value)
}

fn read_varint_string(data: &[u8], offset: &mut usize) -> Result<String, Error> {
    let char_count = read_varint(data, offset)? as usize;
    let byte_len = char_count * 2;
    let end = *offset + byte_len;
    let slice = data.get(*offset..end).ok_or_else(|| Error::InvalidFormat { reason: "truncated IndexedDB key string".to_owned() })?;
    *offset = end;
    let units: Vec<u16> = slice.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
    Ok(String::from_utf16_lossy(&units))
}

pub fn decode_key(data: &[u8]) -> Result<IndexedDbKey, Error> {
    let mut offset = 0;
    decode_key_at(data, &mut offset)
}

fn decode_key_at(data: &[u8], offset: &mut usize) -> Result<IndexedDbKey, Error> {
    let tag = *data.get(*offset).ok_or_else(|| Error::InvalidFormat { reason: "empty IndexedDB key value".to_owned() })?;
    *offset += 1;
    match tag {
        0 => Ok(IndexedDbKey::Null),
        1 => Ok(IndexedDbKey::String(read_varint_string(data, offset)?)),
        2 => {
            let bits = read_truncated_int(data, offset, 8)?;
            Ok(IndexedDbKey::Date(f64::from_bits(bits)))
        }
        3 => {
            let bits = read_truncated_int(data, offset, 8)?;
            Ok(IndexedDbKey::Number(f64::from_bits(bits)))
        }
        4 => {
            let count = read_varint(data, offset)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_key_at(data, offset)?);
            }
            Ok(IndexedDbKey::Array(items))
        }
        5 => Ok(IndexedDbKey::MinKey),
        6 => {
            let len = read_varint(data, offset)? as usize;
            let end = *offset + len;
            let bytes = data.get(*offset..end).ok_or_else(|| Error::InvalidFormat { reason: "truncated IndexedDB binary key".to_owned() })?.to_vec();
            *offset = end;
            Ok(IndexedDbKey::Binary(bytes))
        }
        other => Err(Error::InvalidFormat { reason: format!("unknown IndexedDB key type tag {}", other) }),
    }
}

/// A best-effort decode of a V8 `ValueSerializer` payload. Only the flat
/// primitive and plain-object/array shapes are recognised; anything else
/// (maps, sets, regexps, typed arrays, ...) decodes to [`JsValue::Raw`]
/// rather than guessing at an unimplemented tag.
#[derive(Clone, Debug)]
pub enum JsValue {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<JsValue>),
    Object(Vec<(String, JsValue)>),
    HostObject(BlinkHostObject),
    Raw(Vec<u8>),
}

fn zigzag_decode(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

/// Decodes one V8-serialized value, skipping a leading version tag
/// (`0xFF <varint version>`) if present.
pub fn decode_js_value(data: &[u8]) -> JsValue {
    let mut offset = 0;
    match decode_value_at(data, &mut offset) {
        Ok(value) => value,
        Err(_) => JsValue::Raw(data.to_vec()),
    }
}

fn decode_value_at(data: &[u8], offset: &mut usize) -> Result<JsValue, Error> {
    let mut tag = read_tag(data, offset)?;
    if tag == 0xFF {
        let _version = read_varint(data, offset)?;
        tag = read_tag(data, offset)?;
    }
    decode_tagged(data, offset, tag)
}

fn read_tag(data: &[u8], offset: &mut usize) -> Result<u8, Error> {
    let tag = *data.get(*offset).ok_or_else(|| Error::InvalidFormat { reason: "truncated V8 value".to_owned() })?;
    *offset += 1;
    Ok(tag)
}

fn decode_tagged(data: &[u8], offset: &mut usize, tag: u8) -> Result<JsValue, Error> {
    match tag {
        b'0' => Ok(JsValue::Null),
        b'_' => Ok(JsValue::Undefined),
        b'T' => Ok(JsValue::Bool(true)),
        b'F' => Ok(JsValue::Bool(false)),
        b'I' => Ok(JsValue::Int(zigzag_decode(read_varint(data, offset)?))),
        b'U' => Ok(JsValue::Int(read_varint(data, offset)? as i64)),
        b'N' => {
            let bits = read_truncated_int(data, offset, 8)?;
            Ok(JsValue::Double(f64::from_bits(bits)))
        }
        b'S' | b'"' => {
            let len = read_varint(data, offset)? as usize;
            let end = *offset + len;
            let bytes = data.get(*offset..end).ok_or_else(|| Error::InvalidFormat { reason: "truncated V8 string".to_owned() })?;
            let s = String::from_utf8_lossy(bytes).into_owned();
            *offset = end;
            Ok(JsValue::Str(s))
        }
        b'c' => {
            let len = read_varint(data, offset)? as usize;
            let end = *offset + len;
            let bytes = data.get(*offset..end).ok_or_else(|| Error::InvalidFormat { reason: "truncated V8 two-byte string".to_owned() })?;
            let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            *offset = end;
            Ok(JsValue::Str(String::from_utf16_lossy(&units)))
        }
        b'o' => {
            let mut fields = Vec::new();
            loop {
                let next_tag = read_tag(data, offset)?;
                if next_tag == b'{' {
                    let _property_count = read_varint(data, offset)?;
                    return Ok(JsValue::Object(fields));
                }
                let key = match decode_tagged(data, offset, next_tag)? {
                    JsValue::Str(s) => s,
                    other => return Err(Error::InvalidFormat { reason: format!("non-string object key: {:?}", other) }),
                };
                let value = decode_value_at_same_offset(data, offset)?;
                fields.push((key, value));
            }
        }
        b'A' => {
            let count = read_varint(data, offset)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_value_at_same_offset(data, offset)?);
            }
            let end_tag = read_tag(data, offset)?;
            if end_tag != b'$' {
                return Err(Error::InvalidFormat { reason: "missing dense array end tag".to_owned() });
            }
            let _trailing_property_count = read_varint(data, offset)?;
            let _length = read_varint(data, offset)?;
            Ok(JsValue::Array(items))
        }
        b'\\' => Ok(JsValue::HostObject(deserialize_host_object(data, offset)?)),
        _other => Err(Error::Unsupported { reason: "unrecognised V8 serialization tag (maps, sets, regexps, typed arrays, ... are not decoded)" }),
    }
}

fn decode_value_at_same_offset(data: &[u8], offset: &mut usize) -> Result<JsValue, Error> {
    let tag = read_tag(data, offset)?;
    decode_tagged(data, offset, tag)
}

/// The per-record header wrapping every IndexedDB value blob: a version
/// varint, a `0xFF` Blink marker, a Blink version varint, and (for Blink
/// versions 21 and up) a 13-byte trailer ahead of the V8 payload.
pub struct IdbValueHeader {
    pub version: u64,
    pub blink_version: u64,
}

pub fn split_idb_value(data: &[u8]) -> Result<(IdbValueHeader, &[u8]), Error> {
    let mut offset = 0;
    let version = read_varint(data, &mut offset)?;
    let blink_tag = read_tag(data, &mut offset)?;
    if blink_tag != 0xFF {
        return Err(Error::InvalidFormat { reason: "missing Blink value marker".to_owned() });
    }
    let blink_version = read_varint(data, &mut offset)?;
    if blink_version >= 21 {
        offset += 13;
    }
    let body = data.get(offset..).ok_or_else(|| Error::InvalidFormat { reason: "truncated IndexedDB value".to_owned() })?;
    Ok((IdbValueHeader { version, blink_version }, body))
}

#[derive(Clone, Debug)]
pub struct IndexedDbRecord {
    pub database_id: u32,
    pub object_store_id: u32,
    pub index_id: IndexIdType,
    pub user_key: Vec<u8>,
    pub raw_value: Vec<u8>,
    pub sequence: u64,
    pub state: RecordState,
}

pub struct ObjectStore {
    pub id: u32,
    pub name: Option<String>,
    pub records: Vec<IndexedDbRecord>,
}

pub struct Database {
    pub id: u32,
    pub name: Option<String>,
    pub object_stores: Vec<ObjectStore>,
}

pub struct IndexedDb {
    pub databases: Vec<Database>,
}
impl IndexedDb {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let leveldb = LevelDb::open(path)?;

        let mut database_names: Vec<(u32, String)> = Vec::new();
        let mut object_store_names: Vec<(u32, u32, String)> = Vec::new();
        let mut entries: Vec<IndexedDbRecord> = Vec::new();

        for record in &leveldb.records {
            let Ok((prefix, consumed)) = KeyPrefix::parse(&record.key) else { continue };
            let rest = &record.key[consumed..];

            if prefix.database_id == 0 && prefix.object_store_id == 0 && prefix.index_id == 0 {
                if let Some(&raw_type) = rest.first() {
                    if GlobalMetaDataType::from_raw(raw_type) == GlobalMetaDataType::DatabaseName {
                        if let Some(name) = decode_database_name_key(&rest[1..], &record.value) {
                            database_names.push(name);
                        }
                    }
                }
                continue;
            }

            if prefix.index_id == 0 {
                if let Some(&raw_type) = rest.first() {
                    if DatabaseMetaDataType::from_raw(raw_type) == DatabaseMetaDataType::DatabaseName {
                        if let Some(name) = decode_utf16_value(&record.value) {
                            object_store_names.push((prefix.database_id, prefix.object_store_id, name));
                        }
                    }
                }
                continue;
            }

            entries.push(IndexedDbRecord {
                database_id: prefix.database_id,
                object_store_id: prefix.object_store_id,
                index_id: IndexIdType::from_raw(prefix.index_id),
                user_key: rest.to_vec(),
                raw_value: record.value.clone(),
                sequence: record.sequence,
                state: record.state,
            });
        }

        let mut database_ids: Vec<u32> = entries.iter().map(|e| e.database_id).collect();
        database_ids.extend(database_names.iter().map(|(id, _)| *id));
        database_ids.sort_unstable();
        database_ids.dedup();

        let mut databases = Vec::with_capacity(database_ids.len());
        for database_id in database_ids {
            let name = database_names.iter().find(|(id, _)| *id == database_id).map(|(_, n)| n.clone());

            let mut store_ids: Vec<u32> = entries.iter()
                .filter(|e| e.database_id == database_id)
                .map(|e| e.object_store_id)
                .collect();
            store_ids.sort_unstable();
            store_ids.dedup();

            let object_stores = store_ids.into_iter().map(|object_store_id| {
                let name = object_store_names.iter()
                    .find(|(d, o, _)| *d == database_id && *o == object_store_id)
                    .map(|(_, _, n)| n.clone());
                let records = entries.iter()
                    .filter(|e| e.database_id == database_id && e.object_store_id == object_store_id)
                    .cloned()
                    .collect();
                ObjectStore { id: object_store_id, name, records }
            }).collect();

            databases.push(Database { id: database_id, name, object_stores });
        }

        Ok(Self { databases })
    }
}

fn decode_database_name_key(_rest: &[u8], value: &[u8]) -> Option<(u32, String)> {
    decode_utf16_value(value).map(|name| (0, name))
}

fn decode_utf16_value(value: &[u8]) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let units: Vec<u16> = value.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    Some(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefix_round_trip_single_byte_ids() {
        // byte layout bits: (db_len-1)<<5 | (os_len-1)<<2 | (idx_len-1)
        let header = (0u8 << 5) | (0u8 << 2) | 0u8;
        let data = [header, 7, 3, 1];
        let (prefix, consumed) = KeyPrefix::parse(&data).unwrap();
        assert_eq!(prefix.database_id, 7);
        assert_eq!(prefix.object_store_id, 3);
        assert_eq!(prefix.index_id, 1);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn decodes_flat_object_with_string_and_int_fields() {
        // o "S"1"a" I02 { 01
        let mut data = vec![b'o'];
        data.push(b'S');
        data.push(1);
        data.push(b'a');
        data.push(b'I');
        data.push(4); // zigzag(4) = 2
        data.push(b'{');
        data.push(1);
        let value = decode_js_value(&data);
        match value {
            JsValue::Object(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].0, "a");
                match fields[0].1 {
                    JsValue::Int(n) => assert_eq!(n, 2),
                    ref other => panic!("unexpected value {:?}", other),
                }
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn unrecognised_tag_falls_back_to_raw() {
        let data = [0x99, 0x01, 0x02];
        match decode_js_value(&data) {
            JsValue::Raw(bytes) => assert_eq!(bytes, data.to_vec()),
            other => panic!("expected Raw fallback, got {:?}", other),
        }
    }

    #[test]
    fn idb_value_header_skips_trailer_for_modern_blink_version() {
        let mut data = vec![3u8, 0xFF, 21];
        data.extend_from_slice(&[0u8; 13]);
        data.push(b'I');
        data.push(4);
        let (header, body) = split_idb_value(&data).unwrap();
        assert_eq!(header.blink_version, 21);
        assert_eq!(body, &[b'I', 4]);
    }
}
