//! Chromium Disk (Block File) Cache backend: index file, data block files,
//! and the `CacheAddress`-addressed `EntryStore` records they hold.
//!
//! References:
//!   - <https://chromium.googlesource.com/chromium/src/+/HEAD/net/disk_cache/blockfile/addr.h>
//!   - <https://chromium.googlesource.com/chromium/src/+/HEAD/net/disk_cache/blockfile/disk_format.h>

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use esedb::byte_io::{ByteRead, LittleEndianRead};

use crate::content::decode_content;
use crate::error::Error;

pub const INDEX_MAGIC: u32 = 0xC103CAC3;
pub const INDEX_VERSION: u32 = 0x0003_0000;
pub const BLOCK_FILE_MAGIC: u32 = 0xC104CAC3;
pub const BLOCK_HEADER_SIZE: u64 = 8192;

const INITIALIZED_MASK: u32 = 0x8000_0000;
const FILE_TYPE_MASK: u32 = 0x7000_0000;
const FILE_TYPE_OFFSET: u32 = 28;
const NUM_BLOCKS_MASK: u32 = 0x0300_0000;
const NUM_BLOCKS_OFFSET: u32 = 24;
const FILE_SELECTOR_MASK: u32 = 0x00FF_0000;
const FILE_SELECTOR_OFFSET: u32 = 16;
const START_BLOCK_MASK: u32 = 0x0000_FFFF;
const FILE_NAME_MASK: u32 = 0x0FFF_FFFF;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    External,
    Rankings,
    Block256,
    Block1K,
    Block4K,
    BlockFiles,
    BlockEntries,
    BlockEvicted,
}
impl FileType {
    fn from_raw(value: u32) -> Result<Self, Error> {
        Ok(match value {
            0 => Self::External,
            1 => Self::Rankings,
            2 => Self::Block256,
            3 => Self::Block1K,
            4 => Self::Block4K,
            5 => Self::BlockFiles,
            6 => Self::BlockEntries,
            7 => Self::BlockEvicted,
            other => return Err(Error::UnknownFileType { value: other }),
        })
    }

    fn to_raw(self) -> u32 {
        match self {
            Self::External => 0,
            Self::Rankings => 1,
            Self::Block256 => 2,
            Self::Block1K => 3,
            Self::Block4K => 4,
            Self::BlockFiles => 5,
            Self::BlockEntries => 6,
            Self::BlockEvicted => 7,
        }
    }

    /// Fixed block size for block-file-backed (non-`External`) addresses.
    pub fn block_size(self) -> Option<u32> {
        match self {
            Self::External => None,
            Self::Rankings => Some(36),
            Self::Block256 => Some(256),
            Self::Block1K => Some(1024),
            Self::Block4K => Some(4096),
            Self::BlockFiles => Some(8),
            Self::BlockEntries => Some(104),
            Self::BlockEvicted => Some(48),
        }
    }
}

/// A 32-bit packed `CacheAddr`: location of an `EntryStore`, a block-file
/// region, or an externally-stored stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheAddress {
    pub raw: u32,
    pub is_initialized: bool,
    pub file_type: FileType,
    pub file_number: u32,
    pub start_block: u16,
    pub num_blocks: u8,
}
impl CacheAddress {
    pub fn parse(raw: u32) -> Result<Self, Error> {
        let is_initialized = raw & INITIALIZED_MASK != 0;
        let file_type = FileType::from_raw((raw & FILE_TYPE_MASK) >> FILE_TYPE_OFFSET)?;
        let is_separate_file = (raw & FILE_TYPE_MASK) == 0;

        if is_separate_file {
            Ok(Self {
                raw,
                is_initialized,
                file_type,
                file_number: raw & FILE_NAME_MASK,
                start_block: 0,
                num_blocks: 0,
            })
        } else {
            Ok(Self {
                raw,
                is_initialized,
                file_type,
                file_number: (raw & FILE_SELECTOR_MASK) >> FILE_SELECTOR_OFFSET,
                start_block: (raw & START_BLOCK_MASK) as u16,
                num_blocks: (1 + ((raw & NUM_BLOCKS_MASK) >> NUM_BLOCKS_OFFSET)) as u8,
            })
        }
    }

    pub fn is_separate_file(&self) -> bool {
        matches!(self.file_type, FileType::External)
    }

    /// Re-packs the 28-bit payload; inverse of [`Self::parse`]'s bitfield math.
    pub fn encode(&self) -> u32 {
        let mut raw = if self.is_initialized { INITIALIZED_MASK } else { 0 };
        raw |= self.file_type.to_raw() << FILE_TYPE_OFFSET;
        if self.is_separate_file() {
            raw |= self.file_number & FILE_NAME_MASK;
        } else {
            raw |= (self.file_number << FILE_SELECTOR_OFFSET) & FILE_SELECTOR_MASK;
            raw |= (((self.num_blocks as u32).saturating_sub(1)) << NUM_BLOCKS_OFFSET) & NUM_BLOCKS_MASK;
            raw |= self.start_block as u32 & START_BLOCK_MASK;
        }
        raw
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryState {
    Normal,
    Evicted,
    Doomed,
}
impl EntryState {
    fn from_raw(value: i32) -> Self {
        match value {
            1 => Self::Evicted,
            2 => Self::Doomed,
            _ => Self::Normal,
        }
    }
}

/// A decoded `EntryStore` record: 256 bytes, key inline at offset 96..256
/// unless `long_key` is set, preceded by a `self_hash` at offset 92..96.
#[derive(Clone, Debug)]
pub struct EntryStore {
    pub hash: u32,
    pub next: u32,
    pub rankings_node: u32,
    pub state: EntryState,
    pub creation_time_webkit: u64,
    pub key_len: i32,
    pub long_key: u32,
    pub data_size: [i32; 4],
    pub data_addr: [u32; 4],
    pub key: String,
}
impl EntryStore {
    const SIZE: usize = 256;

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut r = LittleEndianRead::new(reader);
        let hash = r.read_u32()?;
        let next = r.read_u32()?;
        let rankings_node = r.read_u32()?;
        let _reuse_count = r.read_i32()?;
        let _refetch_count = r.read_i32()?;
        let state = EntryState::from_raw(r.read_i32()?);
        let creation_time_webkit = r.read_u64()?;
        let key_len = r.read_i32()?;
        let long_key = r.read_u32()?;
        let mut data_size = [0i32; 4];
        for slot in data_size.iter_mut() {
            *slot = r.read_i32()?;
        }
        let mut data_addr = [0u32; 4];
        for slot in data_addr.iter_mut() {
            *slot = r.read_u32()?;
        }
        let _flags = r.read_u32()?;
        for _ in 0..4 {
            let _padding = r.read_i32()?;
        }
        let _self_hash = r.read_u32()?;
        let mut key_buf = [0u8; 160];
        r.read_exact(&mut key_buf)?;
        let key = String::from_utf8_lossy(&key_buf)
            .trim_end_matches('\u{0}')
            .to_owned();

        Ok(Self { hash, next, rankings_node, state, creation_time_webkit, key_len, long_key, data_size, data_addr, key })
    }
}

#[derive(Clone, Debug)]
pub struct IndexHeader {
    pub magic: u32,
    pub version: u32,
    pub num_entries: i32,
    pub table_len: i32,
    pub create_time_webkit: u64,
}

/// The `index` file: an 8192-byte header prefix followed by `table_len`
/// packed `CacheAddress` table cells.
pub struct CacheIndexFile {
    pub header: IndexHeader,
    pub addresses: Vec<CacheAddress>,
}
impl CacheIndexFile {
    fn open(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        let mut r = LittleEndianRead::new(&mut file);
        let magic = r.read_u32()?;
        let version = r.read_u32()?;
        let num_entries = r.read_i32()?;
        let _num_bytes_legacy = r.read_i32()?;
        let _last_file = r.read_i32()?;
        let _dirty_flag = r.read_i32()?;
        let _stats = r.read_u32()?;
        let table_len = r.read_i32()?;

        if magic != INDEX_MAGIC {
            return Err(Error::WrongMagic { expected: INDEX_MAGIC as u64, read: magic as u64 });
        }
        if version != INDEX_VERSION {
            return Err(Error::UnsupportedVersion { read: version });
        }

        file.seek(SeekFrom::Start(64))?;
        let create_time_webkit = {
            let mut r = LittleEndianRead::new(&mut file);
            r.read_u64()?
        };

        file.seek(SeekFrom::Start(BLOCK_HEADER_SIZE))?;
        let mut addresses = Vec::with_capacity(table_len.max(0) as usize);
        for _ in 0..table_len.max(0) {
            let raw = {
                let mut r = LittleEndianRead::new(&mut file);
                r.read_u32()?
            };
            addresses.push(CacheAddress::parse(raw)?);
        }

        Ok(Self {
            header: IndexHeader { magic, version, num_entries, table_len, create_time_webkit },
            addresses,
        })
    }
}

/// One of `data_0`..`data_3`: a block-allocation file holding fixed-size
/// blocks addressed by `(start_block, num_blocks)`.
pub struct CacheBlockFile {
    path: PathBuf,
    pub this_file: u16,
    pub entry_size: i32,
    pub num_entries: i32,
}
impl CacheBlockFile {
    fn open(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        let mut r = LittleEndianRead::new(&mut file);
        let magic = r.read_u32()?;
        let _version = r.read_u32()?;
        let this_file = r.read_i16()? as u16;
        let _next_file = r.read_i16()?;
        let entry_size = r.read_i32()?;
        let num_entries = r.read_i32()?;

        if magic != BLOCK_FILE_MAGIC {
            return Err(Error::WrongMagic { expected: BLOCK_FILE_MAGIC as u64, read: magic as u64 });
        }

        Ok(Self { path: path.to_owned(), this_file, entry_size, num_entries })
    }

    fn read_region(&self, addr: &CacheAddress) -> Result<Vec<u8>, Error> {
        let offset = BLOCK_HEADER_SIZE + (self.entry_size as u64) * (addr.start_block as u64);
        let size = (self.entry_size as u64) * (addr.num_blocks as u64);
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// An open Chromium blockfile Disk Cache directory.
pub struct DiskCache {
    path: PathBuf,
    index: CacheIndexFile,
    block_files: Vec<CacheBlockFile>,
    pub create_time_webkit: u64,
    pub num_entries: i32,
}
impl DiskCache {
    pub fn open(path: &Path) -> Result<Self, Error> {
        if !path.is_dir() {
            return Err(Error::NotADirectory { path: path.display().to_string() });
        }
        for name in ["index", "data_0", "data_1", "data_2", "data_3"] {
            if !path.join(name).exists() {
                return Err(Error::MissingFile { path: path.display().to_string(), name });
            }
        }

        let index = CacheIndexFile::open(&path.join("index"))?;
        let block_files = ["data_0", "data_1", "data_2", "data_3"].iter()
            .map(|name| CacheBlockFile::open(&path.join(name)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.to_owned(),
            create_time_webkit: index.header.create_time_webkit,
            num_entries: index.header.num_entries,
            index,
            block_files,
        })
    }

    fn block_file(&self, file_number: u32) -> Option<&CacheBlockFile> {
        self.block_files.iter().find(|bf| bf.this_file as u32 == file_number)
    }

    /// Reads the raw bytes an address points at: an externally-stored
    /// `f_xxxxxx` file, or a region of one of the `data_N` block files.
    pub fn read_address(&self, addr: &CacheAddress) -> Result<Vec<u8>, Error> {
        if !addr.is_initialized {
            return Err(Error::NotInitialized);
        }

        if addr.is_separate_file() {
            let file_name = format!("f_{:06x}", addr.file_number);
            let mut file = File::open(self.path.join(file_name))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            return Ok(buf);
        }

        let block_file = self.block_file(addr.file_number)
            .ok_or(Error::BlockFileNotFound { file_number: addr.file_number as u16 })?;
        block_file.read_region(addr)
    }

    fn read_entry(&self, addr: CacheAddress) -> Result<CacheEntry, Error> {
        let raw = self.read_address(&addr)?;
        let mut cursor = std::io::Cursor::new(&raw[..EntryStore::SIZE.min(raw.len())]);
        let header = EntryStore::read(&mut cursor)?;

        let key = if header.long_key != 0 {
            let key_addr = CacheAddress::parse(header.long_key)?;
            let raw_key = self.read_address(&key_addr)?;
            String::from_utf8_lossy(&raw_key[..(header.key_len.max(0) as usize).min(raw_key.len())]).into_owned()
        } else {
            header.key.clone()
        };

        Ok(CacheEntry { address: addr, header, key })
    }

    /// Iterates every `EntryStore` reachable from an initialized index table
    /// cell, following each `next` hash-bucket chain pointer to its end.
    pub fn entries(&self) -> impl Iterator<Item = Result<CacheEntry, Error>> + '_ {
        self.index.addresses.iter()
            .filter(|addr| addr.is_initialized)
            .copied()
            .flat_map(move |first_addr| EntryChain { cache: self, next: Some(first_addr) })
    }
}

struct EntryChain<'c> {
    cache: &'c DiskCache,
    next: Option<CacheAddress>,
}
impl<'c> Iterator for EntryChain<'c> {
    type Item = Result<CacheEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.next.take()?;
        match self.cache.read_entry(addr) {
            Ok(entry) => {
                if entry.header.next != 0 {
                    match CacheAddress::parse(entry.header.next) {
                        Ok(next_addr) if next_addr.is_initialized => self.next = Some(next_addr),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("skipping malformed next address in entry chain: {e}");
                        }
                    }
                }
                Some(Ok(entry))
            }
            Err(e) => {
                tracing::warn!("skipping malformed cache entry at 0x{:x}: {e}", addr.raw);
                None
            }
        }
    }
}

/// A decoded cache entry: its key, state, and accessors for its metadata
/// and body payload.
pub struct CacheEntry {
    pub address: CacheAddress,
    pub header: EntryStore,
    pub key: String,
}
impl CacheEntry {
    pub fn state(&self) -> EntryState {
        self.header.state
    }

    /// The opaque serialised HTTP response metadata blob (`data_addr[0]`).
    pub fn meta(&self, cache: &DiskCache) -> Result<Vec<u8>, Error> {
        let addr = CacheAddress::parse(self.header.data_addr[0])?;
        if !addr.is_initialized {
            return Ok(Vec::new());
        }
        cache.read_address(&addr)
    }

    /// The (possibly compressed) response body (`data_addr[1]`), decoded
    /// per the gzip/brotli/deflate content heuristic.
    pub fn data(&self, cache: &DiskCache) -> Result<Vec<u8>, Error> {
        let addr = CacheAddress::parse(self.header.data_addr[1])?;
        if !addr.is_initialized {
            return Ok(Vec::new());
        }
        let raw = cache.read_address(&addr)?;
        let meta = self.meta(cache).unwrap_or_default();
        Ok(decode_content(&raw, &meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip_block_1k() {
        let addr = CacheAddress {
            raw: 0,
            is_initialized: true,
            file_type: FileType::Block1K,
            file_number: 2,
            start_block: 5,
            num_blocks: 2,
        };
        let encoded = addr.encode();
        let decoded = CacheAddress::parse(encoded).unwrap();
        assert_eq!(decoded.file_type, FileType::Block1K);
        assert_eq!(decoded.file_number, 2);
        assert_eq!(decoded.start_block, 5);
        assert_eq!(decoded.num_blocks, 2);
        assert!(decoded.is_initialized);
    }

    #[test]
    fn address_round_trip_external() {
        let addr = CacheAddress {
            raw: 0,
            is_initialized: true,
            file_type: FileType::External,
            file_number: 0x1234,
            start_block: 0,
            num_blocks: 0,
        };
        let decoded = CacheAddress::parse(addr.encode()).unwrap();
        assert_eq!(decoded.file_type, FileType::External);
        assert_eq!(decoded.file_number, 0x1234);
    }

    #[test]
    fn block_size_table_matches_spec() {
        assert_eq!(FileType::Rankings.block_size(), Some(36));
        assert_eq!(FileType::Block256.block_size(), Some(256));
        assert_eq!(FileType::Block1K.block_size(), Some(1024));
        assert_eq!(FileType::Block4K.block_size(), Some(4096));
        assert_eq!(FileType::BlockFiles.block_size(), Some(8));
        assert_eq!(FileType::BlockEntries.block_size(), Some(104));
        assert_eq!(FileType::BlockEvicted.block_size(), Some(48));
        assert_eq!(FileType::External.block_size(), None);
    }
}
