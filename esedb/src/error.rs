use std::borrow::Cow;
use std::fmt;
use std::io;

use crate::data::DataType;
use crate::table::ObjectType;


#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    WrongHeaderSignature { expected: u32, read: u32 },
    WrongHeaderChecksum { calculated: u32, read: u32 },
    HeaderLongerThanPage { header_length: usize, page_size: usize },
    PageSizeNotDivisibleBy4 { page_size: usize },
    Page0,
    UnknownFormatVariant,
    MissingRequiredColumn { name: Cow<'static, str> },
    WrongColumnType { name: Cow<'static, str>, expected: DataType, obtained: DataType },
    UnexpectedFixedColumnDataType { table_id: i32, column_id: i32, data_type: DataType },
    UnexpectedTaggedColumnDataType { table_id: i32, column_id: i32, data_type: DataType },
    SeparatedValueWithoutLongValueInfo,
    UnexpectedObjectType { expected: ObjectType, obtained: ObjectType },
}
impl ReadError {
    pub fn ensure_object_type(expected: ObjectType, obtained: ObjectType) -> Result<(), Self> {
        if expected == obtained {
            Ok(())
        } else {
            Err(Self::UnexpectedObjectType { expected, obtained })
        }
    }
}
impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)
                => write!(f, "I/O error: {}", e),
            Self::WrongHeaderSignature { expected, read }
                => write!(f, "wrong header magic (expected 0x{:08X}, read 0x{:08X})", expected, read),
            Self::WrongHeaderChecksum { calculated, read }
                => write!(f, "wrong header checksum (calculated 0x{:08X}, read 0x{:08X})", calculated, read),
            Self::HeaderLongerThanPage { header_length, page_size }
                => write!(f, "header length ({}) greater than page size ({})", header_length, page_size),
            Self::PageSizeNotDivisibleBy4 { page_size }
                => write!(f, "page size ({}) not divisible by 4", page_size),
            Self::Page0
                => write!(f, "page 0 does not exist"),
            Self::UnknownFormatVariant
                => write!(f, "failed to detect format variant"),
            Self::MissingRequiredColumn { name }
                => write!(f, "missing required column {:?}", name),
            Self::WrongColumnType { name, expected, obtained }
                => write!(f, "column {:?} has wrong type (expected {:?}, obtained {:?})", name, expected, obtained),
            Self::UnexpectedFixedColumnDataType { table_id, column_id, data_type }
                => write!(f, "fixed column {} of table {} has unexpected data type {:?}", column_id, table_id, data_type),
            Self::UnexpectedTaggedColumnDataType { table_id, column_id, data_type }
                => write!(f, "tagged column {} of table {} has unexpected data type {:?}", column_id, table_id, data_type),
            Self::SeparatedValueWithoutLongValueInfo
                => write!(f, "encountered a separated value but the table has no long-value tree"),
            Self::UnexpectedObjectType { expected, obtained }
                => write!(f, "expected catalog object type {:?}, obtained {:?}", expected, obtained),
        }
    }
}
impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}


#[derive(Debug)]
pub enum IoOrInvalidValueError {
    Io(io::Error),
    InvalidValue,
}
impl fmt::Display for IoOrInvalidValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::InvalidValue => write!(f, "invalid value for target type"),
        }
    }
}
impl std::error::Error for IoOrInvalidValueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidValue => None,
        }
    }
}
impl From<io::Error> for IoOrInvalidValueError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}


#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    UnsignedOutOfRange { name: Cow<'static, str>, value: u128, min_value: u128, max_value: u128 },
}
impl WriteError {
    pub fn check_unsigned_max(name: &'static str, value: u128, max_value: u128) -> Result<(), Self> {
        if value <= max_value {
            Ok(())
        } else {
            Err(Self::UnsignedOutOfRange { name: Cow::Borrowed(name), value, min_value: 0, max_value })
        }
    }
}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)
                => write!(f, "I/O error: {}", e),
            Self::UnsignedOutOfRange { name, value, min_value, max_value }
                => write!(f, "unsigned value {} of {:?} out of range (minimum {}, maximum {})", value, name, min_value, max_value),
        }
    }
}
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::UnsignedOutOfRange { .. } => None,
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
