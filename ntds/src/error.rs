use std::fmt;
use std::io;

use esedb::error::ReadError as EseReadError;


#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Ese(EseReadError),
    TableNotFound { name: &'static str },
    AttributeNotFound { name: String },
    NoColumnMapping { name: String },
    IndexNotFound { column: String },
    UnsupportedWildcard,
    InvalidFilter { reason: String },
    DntNotFound { dnt: i32 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Ese(e) => write!(f, "ESE error: {}", e),
            Self::TableNotFound { name } => write!(f, "table {:?} not found in database", name),
            Self::AttributeNotFound { name } => write!(f, "attribute {:?} not found in schema", name),
            Self::NoColumnMapping { name } => write!(f, "attribute {:?} has no column mapping", name),
            Self::IndexNotFound { column } => write!(f, "no index available for column {:?}", column),
            Self::UnsupportedWildcard => write!(f, "wildcards in the middle or start of a filter value are not supported"),
            Self::InvalidFilter { reason } => write!(f, "invalid LDAP filter: {}", reason),
            Self::DntNotFound { dnt } => write!(f, "no object with DNT {} found", dnt),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Ese(e) => Some(e),
            _ => None,
        }
    }
}
impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
impl From<EseReadError> for Error {
    fn from(value: EseReadError) -> Self {
        Self::Ese(value)
    }
}
