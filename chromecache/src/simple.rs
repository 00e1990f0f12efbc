//! Chromium "Very Simple" Disk Cache backend: a flat index file plus one
//! file per cached key, read by walking backward from EOF.
//!
//! References:
//!   - <https://www.chromium.org/developers/design-documents/network-stack/disk-cache/very-simple-backend/>
//!   - <https://chromium.googlesource.com/chromium/src/+/HEAD/net/disk_cache/simple/simple_entry_format.h>

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use esedb::byte_io::{ByteRead, LittleEndianRead};

use crate::content::decode_content;
use crate::error::Error;

pub const INDEX_MAGIC: u64 = 0x656E_7465_7220_796F;
pub const FILE_START_MAGIC: u64 = 0xFCFB_6D1B_A772_5C30;
pub const FILE_END_MAGIC: u64 = 0xF4FA_6F45_970D_41D8;
pub const SPARSE_RANGE_MAGIC: u64 = 0xEB97_BF01_6553_676B;
pub const EOF_RECORD_SIZE: i64 = 24;

#[derive(Clone, Copy, Debug)]
pub struct IndexTableEntry {
    pub hash: u64,
    pub last_used_webkit: i64,
    pub size: i64,
}

/// `index-dir/the-real-index`: magic/crc header plus `num_entries` fixed
/// records, the last of which gives the cache's overall last-used time.
pub struct SimpleIndexFile {
    pub entries: Vec<IndexTableEntry>,
    pub last_used_webkit: i64,
}
impl SimpleIndexFile {
    fn open(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        let mut r = LittleEndianRead::new(&mut file);
        let _size = r.read_u32()?;
        let _crc32 = r.read_u32()?;
        let magic = r.read_u64()?;
        let _version = r.read_u32()?;
        let num_entries = r.read_i64()?;
        let _cache_size = r.read_i64()?;
        let _unknown = r.read_i32()?;

        if magic != INDEX_MAGIC {
            return Err(Error::WrongMagic { expected: INDEX_MAGIC, read: magic });
        }

        let mut entries = Vec::with_capacity(num_entries.max(0) as usize);
        for _ in 0..num_entries.max(0) {
            let mut r = LittleEndianRead::new(&mut file);
            let hash = r.read_u64()?;
            let last_used_webkit = r.read_i64()?;
            let size = r.read_i64()?;
            entries.push(IndexTableEntry { hash, last_used_webkit, size });
        }

        let last_used_webkit = entries.last().map(|e| e.last_used_webkit).unwrap_or(0);

        Ok(Self { entries, last_used_webkit })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimpleFileType {
    Stream01,
    Stream2,
    StreamSparse,
}

pub fn infer_file_type(file_name: &str) -> Result<SimpleFileType, Error> {
    if file_name.ends_with("_0") {
        Ok(SimpleFileType::Stream01)
    } else if file_name.ends_with("_1") {
        Ok(SimpleFileType::Stream2)
    } else if file_name.ends_with("_s") {
        Ok(SimpleFileType::StreamSparse)
    } else {
        Err(Error::UnknownSimpleFileType { name: file_name.to_owned() })
    }
}

struct SimpleFileEof {
    flags: u32,
    stream_size: i32,
}
impl SimpleFileEof {
    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut r = LittleEndianRead::new(reader);
        let _magic = r.read_u64()?;
        let flags = r.read_u32()?;
        let _crc32 = r.read_u32()?;
        let stream_size = r.read_i32()?;
        Ok(Self { flags, stream_size })
    }
}

/// A single `<16-hex-hash>_{0|1|s}` per-key cache file.
pub struct SimpleCacheFile {
    path: PathBuf,
    pub key: String,
    pub file_type: SimpleFileType,
    header_size: u64,
}
impl SimpleCacheFile {
    fn open(path: &Path) -> Result<Self, Error> {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_owned();
        let file_type = infer_file_type(&file_name)?;

        let mut file = File::open(path)?;
        let mut r = LittleEndianRead::new(&mut file);
        let magic = r.read_u64()?;
        let _version = r.read_u32()?;
        let key_length = r.read_u32()?;
        let _key_hash = r.read_u32()?;
        let _unused_padding = r.read_u32()?;

        if magic != FILE_START_MAGIC {
            return Err(Error::WrongMagic { expected: FILE_START_MAGIC, read: magic });
        }

        let mut key_buf = vec![0u8; key_length as usize];
        file.read_exact(&mut key_buf)?;
        let key = key_buf.iter().map(|&b| b as char).collect();
        let header_size = 8 + 4 + 4 + 4 + 4 + key_length as u64;

        Ok(Self { path: path.to_owned(), key, file_type, header_size })
    }

    /// Reads the stream-0 metadata blob and stream-1 body, per stream type.
    pub fn streams(&self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        match self.file_type {
            SimpleFileType::Stream01 => self.read_stream_0_1(),
            SimpleFileType::StreamSparse => self.read_sparse(),
            SimpleFileType::Stream2 => Err(Error::Unsupported { reason: "STREAM_2 simple cache files are not implemented" }),
        }
    }

    fn read_stream_0_1(&self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let mut file = File::open(&self.path)?;
        let end = file.seek(SeekFrom::End(0))?;

        file.seek(SeekFrom::End(-EOF_RECORD_SIZE))?;
        let eof0 = SimpleFileEof::read(&mut file)?;

        let mut meta_offset = end as i64 - EOF_RECORD_SIZE - eof0.stream_size as i64;
        if eof0.flags == 2 || eof0.flags == 3 {
            meta_offset -= 32;
        }
        file.seek(SeekFrom::Start(meta_offset as u64))?;
        let mut meta = vec![0u8; eof0.stream_size as usize];
        file.read_exact(&mut meta)?;

        let mut eof1_offset = end as i64 - (EOF_RECORD_SIZE * 2) - eof0.stream_size as i64;
        if eof0.flags == 2 || eof0.flags == 3 {
            eof1_offset -= 32;
        }
        file.seek(SeekFrom::Start(eof1_offset as u64))?;
        let eof1 = SimpleFileEof::read(&mut file)?;
        let _ = eof1.flags;

        file.seek(SeekFrom::Start(self.header_size))?;
        let mut body = vec![0u8; eof1.stream_size as usize];
        file.read_exact(&mut body)?;

        Ok((meta, body))
    }

    fn read_sparse(&self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.header_size))?;

        let mut ranges = Vec::new();
        loop {
            let mut r = LittleEndianRead::new(&mut file);
            let magic = match r.read_u64() {
                Ok(v) => v,
                Err(_) => break,
            };
            if magic != SPARSE_RANGE_MAGIC {
                break;
            }
            let _offset = r.read_i64()?;
            let length = r.read_i64()?;
            let _crc32 = r.read_u32()?;
            let data_offset = file.stream_position()?;
            ranges.push((length, data_offset));
            file.seek(SeekFrom::Start(data_offset + length as u64))?;
        }

        if ranges.len() > 1 {
            tracing::warn!("simple cache sparse stream has {} ranges, expected at most 1", ranges.len());
        }

        if let Some((length, offset)) = ranges.into_iter().next() {
            file.seek(SeekFrom::Start(offset))?;
            let mut body = vec![0u8; length as usize];
            file.read_exact(&mut body)?;
            return Ok((Vec::new(), body));
        }

        Ok((Vec::new(), Vec::new()))
    }

    /// The stream-1 body, decoded via the shared gzip/brotli/deflate
    /// heuristic driven by the stream-0 metadata blob.
    pub fn data(&self) -> Result<Vec<u8>, Error> {
        let (meta, body) = self.streams()?;
        Ok(decode_content(&body, &meta))
    }
}

/// An open Chromium Simple Cache directory.
pub struct SimpleDiskCache {
    pub index: SimpleIndexFile,
    pub cache_files: Vec<SimpleCacheFile>,
}
impl SimpleDiskCache {
    pub fn open(path: &Path) -> Result<Self, Error> {
        if !path.is_dir() {
            return Err(Error::NotADirectory { path: path.display().to_string() });
        }
        let real_index = path.join("index-dir").join("the-real-index");
        if !real_index.exists() {
            return Err(Error::MissingFile { path: path.display().to_string(), name: "index-dir/the-real-index" });
        }

        let index = SimpleIndexFile::open(&real_index)?;

        let mut cache_files = Vec::new();
        for child in std::fs::read_dir(path)? {
            let child = child?;
            let name = child.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() == 18 && name.contains('_') {
                match SimpleCacheFile::open(&child.path()) {
                    Ok(cache_file) => cache_files.push(cache_file),
                    Err(e) => tracing::warn!("skipping malformed simple cache file {name:?}: {e}"),
                }
            }
        }

        Ok(Self { index, cache_files })
    }

    pub fn get(&self, key: &str) -> Option<&SimpleCacheFile> {
        self.cache_files.iter().find(|f| f.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_known_suffixes() {
        assert_eq!(infer_file_type("0123456789abcdef_0").unwrap(), SimpleFileType::Stream01);
        assert_eq!(infer_file_type("0123456789abcdef_1").unwrap(), SimpleFileType::Stream2);
        assert_eq!(infer_file_type("0123456789abcdef_s").unwrap(), SimpleFileType::StreamSparse);
        assert!(infer_file_type("0123456789abcdef_x").is_err());
    }
}
