//! Blink's V8 `HostObject` tags: the application-defined extension points
//! IndexedDB values use to reference externally-stored Blob/File payloads.
//!
//! References:
//!   - <https://chromium.googlesource.com/chromium/src/+/main/third_party/blink/renderer/bindings/core/v8/serialization/v8_script_value_deserializer.cc>

use crate::error::Error;
use crate::varint::read_varint;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlinkHostObject {
    BlobIndex(u64),
    FileIndex(u64),
    FileListIndex(Vec<u64>),
}

/// Decodes a single Blink `HostObject` tag (`'i'`, `'e'`, `'L'`) from
/// `data` starting at `*offset`. `CryptoKeyTag`/native-filesystem-handle
/// tags are not supported, matching the upstream implementation's scope.
pub fn deserialize_host_object(data: &[u8], offset: &mut usize) -> Result<BlinkHostObject, Error> {
    let tag = *data.get(*offset).ok_or_else(|| Error::InvalidFormat { reason: "truncated Blink host object".to_owned() })?;
    *offset += 1;

    match tag {
        b'i' => Ok(BlinkHostObject::BlobIndex(read_varint(data, offset)?)),
        b'e' => Ok(BlinkHostObject::FileIndex(read_varint(data, offset)?)),
        b'L' => {
            let count = read_varint(data, offset)?;
            let mut indices = Vec::with_capacity(count as usize);
            for _ in 0..count {
                indices.push(read_varint(data, offset)?);
            }
            Ok(BlinkHostObject::FileListIndex(indices))
        }
        other => Err(Error::Unsupported { reason: leak_tag_name(other) }),
    }
}

fn leak_tag_name(tag: u8) -> &'static str {
    match tag {
        b'n' | b'N' | b'K' => "native filesystem handle / crypto key Blink host object tags are not supported",
        _ => "unknown Blink host object tag",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_blob_index() {
        let data = [b'i', 0x05];
        let mut offset = 0;
        assert_eq!(deserialize_host_object(&data, &mut offset).unwrap(), BlinkHostObject::BlobIndex(5));
    }

    #[test]
    fn decodes_file_list_index() {
        let data = [b'L', 0x02, 0x01, 0x02];
        let mut offset = 0;
        assert_eq!(
            deserialize_host_object(&data, &mut offset).unwrap(),
            BlinkHostObject::FileListIndex(vec![1, 2]),
        );
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let data = [b'K', 0x00];
        let mut offset = 0;
        assert!(deserialize_host_object(&data, &mut offset).is_err());
    }
}
