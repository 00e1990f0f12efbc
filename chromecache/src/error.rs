use std::fmt;
use std::io;


#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    NotADirectory { path: String },
    MissingFile { path: String, name: &'static str },
    WrongMagic { expected: u64, read: u64 },
    UnsupportedVersion { read: u32 },
    UnknownFileType { value: u32 },
    BlockFileNotFound { file_number: u16 },
    NotInitialized,
    UnknownSimpleFileType { name: String },
    Unsupported { reason: &'static str },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::NotADirectory { path } => write!(f, "provided path is not a directory: {:?}", path),
            Self::MissingFile { path, name } => write!(f, "directory {:?} is missing expected file {:?}", path, name),
            Self::WrongMagic { expected, read } => write!(f, "wrong magic (expected 0x{:x}, read 0x{:x})", expected, read),
            Self::UnsupportedVersion { read } => write!(f, "unsupported version 0x{:x}", read),
            Self::UnknownFileType { value } => write!(f, "unknown cache address file type {}", value),
            Self::BlockFileNotFound { file_number } => write!(f, "block file {} does not exist", file_number),
            Self::NotInitialized => write!(f, "cannot read data from a non-initialized address"),
            Self::UnknownSimpleFileType { name } => write!(f, "cannot infer SimpleFileType for filename {:?}", name),
            Self::Unsupported { reason } => write!(f, "unsupported: {}", reason),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
