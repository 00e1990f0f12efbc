//! Reads the two Chromium HTTP disk cache on-disk backends: the classic
//! blockfile (index + `data_0..3`) format in [`blockfile`], and the newer
//! "Simple Cache" flat-file format in [`simple`]. Both share the gzip/
//! brotli/deflate content-decoding heuristic in [`content`].

pub mod blockfile;
pub mod content;
pub mod error;
pub mod simple;

pub use blockfile::DiskCache;
pub use error::Error;
pub use simple::SimpleDiskCache;
