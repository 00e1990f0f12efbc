//! Chromium SessionStorage: namespaces keyed `namespace-<uuid>-<host>`
//! (value = the namespace's integer id) whose keys live under
//! `map-<id>-<name>`.

use std::path::Path;

use crate::error::Error;
use crate::ldb::LevelDb;

pub struct Record {
    pub key: String,
    pub value: String,
}

pub struct Namespace {
    pub uuid: String,
    pub host: String,
    pub id: i64,
    pub records: Vec<Record>,
}

pub struct SessionStorage {
    pub namespaces: Vec<Namespace>,
}
impl SessionStorage {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let leveldb = LevelDb::open(path)?;

        let mut namespaces = Vec::new();
        for record in &leveldb.records {
            if !record.key.starts_with(b"namespace-") || record.key.len() <= 10 || record.value.is_empty() {
                continue;
            }
            let key_str = String::from_utf8_lossy(&record.key);
            let mut parts = key_str.splitn(3, '-');
            let _literal = parts.next();
            let Some(uuid) = parts.next() else { continue };
            let Some(host) = parts.next() else { continue };

            let value_str = String::from_utf8_lossy(&record.value);
            let Ok(id) = value_str.parse::<i64>() else { continue };

            let prefix = format!("map-{}-", id).into_bytes();
            let records = leveldb.records.iter()
                .filter(|r| r.key.starts_with(&prefix))
                .map(|r| Record {
                    key: String::from_utf8_lossy(&r.key[prefix.len()..]).into_owned(),
                    value: utf16_le_decode(&r.value),
                })
                .collect();

            namespaces.push(Namespace { uuid: uuid.to_owned(), host: host.to_owned(), id, records });
        }

        Ok(Self { namespaces })
    }

    pub fn namespace(&self, id: i64) -> Option<&Namespace> {
        self.namespaces.iter().find(|n| n.id == id)
    }

    pub fn namespace_by_host(&self, host: &str) -> Vec<&Namespace> {
        self.namespaces.iter().filter(|n| n.host == host).collect()
    }
}

fn utf16_le_decode(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_round_trips_ascii() {
        let bytes: Vec<u8> = "hello".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(utf16_le_decode(&bytes), "hello");
    }
}
