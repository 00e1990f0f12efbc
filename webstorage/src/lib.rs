//! Logical readers for Chromium's LevelDB-backed web storage backends:
//! raw [`ldb`] record surfacing, and the [`localstorage`], [`sessionstorage`],
//! and [`indexeddb`] facades layered on top of it.

pub mod blink;
pub mod error;
pub mod indexeddb;
pub mod ldb;
pub mod localstorage;
pub mod sessionstorage;
pub mod varint;

pub use error::Error;
pub use indexeddb::IndexedDb;
pub use ldb::LevelDb;
pub use localstorage::LocalStorage;
pub use sessionstorage::SessionStorage;
