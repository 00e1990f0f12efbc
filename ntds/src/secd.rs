//! Parses the self-relative `SECURITY_DESCRIPTOR` binary blobs stored in
//! `sd_table.sd_value`: owner/group SIDs and a DACL/SACL of ACEs.

use std::io::{Cursor, Read};

use esedb::byte_io::{ByteRead, LittleEndianRead};

use crate::error::Error;


bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AceFlags: u8 {
        const OBJECT_INHERIT = 0x01;
        const CONTAINER_INHERIT = 0x02;
        const NO_PROPAGATE_INHERIT = 0x04;
        const INHERIT_ONLY = 0x08;
        const INHERITED = 0x10;
        const SUCCESSFUL_ACCESS = 0x40;
        const FAILED_ACCESS = 0x80;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ObjectAceFlags: u32 {
        const ACE_OBJECT_TYPE_PRESENT = 0x01;
        const ACE_INHERITED_OBJECT_TYPE_PRESENT = 0x02;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AccessMask: u32 {
        const GENERIC_READ = 0x8000_0000;
        const GENERIC_WRITE = 0x0400_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_ALL = 0x1000_0000;
        const MAXIMUM_ALLOWED = 0x0200_0000;
        const ACCESS_SYSTEM_SECURITY = 0x0100_0000;
        const SYNCHRONIZE = 0x0010_0000;
        const WRITE_OWNER = 0x0008_0000;
        const WRITE_DAC = 0x0004_0000;
        const READ_CONTROL = 0x0002_0000;
        const DELETE = 0x0001_0000;
        const DS_CONTROL_ACCESS = 0x0000_0100;
        const DS_CREATE_CHILD = 0x0000_0001;
        const DS_DELETE_CHILD = 0x0000_0002;
        const DS_READ_PROP = 0x0000_0010;
        const DS_WRITE_PROP = 0x0000_0020;
        const DS_SELF = 0x0000_0008;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AceType {
    AccessAllowed,
    AccessDenied,
    SystemAudit,
    AccessAllowedObject,
    AccessDeniedObject,
    Unsupported(u8),
}
impl AceType {
    fn from_raw(value: u8) -> Self {
        match value {
            0x00 => Self::AccessAllowed,
            0x01 => Self::AccessDenied,
            0x02 => Self::SystemAudit,
            0x05 => Self::AccessAllowedObject,
            0x06 => Self::AccessDeniedObject,
            other => Self::Unsupported(other),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LdapSid {
    pub revision: u8,
    pub identifier_authority: [u8; 6],
    pub sub_authorities: Vec<u32>,
}
impl LdapSid {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut read = LittleEndianRead::new(reader);
        let revision = read.read_u8()?;
        let sub_authority_count = read.read_u8()?;
        let mut identifier_authority = [0u8; 6];
        read.read_exact(&mut identifier_authority)?;
        let mut sub_authorities = Vec::with_capacity(sub_authority_count.into());
        for _ in 0..sub_authority_count {
            sub_authorities.push(read.read_u32()?);
        }
        // The last sub-authority (the RID) is stored byte-reversed relative
        // to the others; swap it back to its natural value.
        if let Some(last) = sub_authorities.last_mut() {
            *last = last.swap_bytes();
        }
        Ok(Self { revision, identifier_authority, sub_authorities })
    }
}
impl std::fmt::Display for LdapSid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.identifier_authority[5])?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Ace {
    pub ace_type: AceType,
    pub flags: AceFlags,
    pub mask: Option<AccessMask>,
    pub sid: Option<LdapSid>,
    pub object_flags: Option<ObjectAceFlags>,
    pub object_type: Option<[u8; 16]>,
    pub inherited_object_type: Option<[u8; 16]>,
}
impl Ace {
    fn parse(data: &[u8]) -> Result<Self, Error> {
        let mut cursor = Cursor::new(data);
        let mut read = LittleEndianRead::new(&mut cursor);
        let ace_type_raw = read.read_u8()?;
        let flags_raw = read.read_u8()?;
        let _ace_size = read.read_u16()?;
        let ace_type = AceType::from_raw(ace_type_raw);
        let flags = AceFlags::from_bits_retain(flags_raw);

        match ace_type {
            AceType::AccessAllowed | AceType::AccessDenied | AceType::SystemAudit => {
                let mask = AccessMask::from_bits_retain(read.read_u32()?);
                let sid = LdapSid::read(&mut read)?;
                Ok(Self {
                    ace_type, flags, mask: Some(mask), sid: Some(sid),
                    object_flags: None, object_type: None, inherited_object_type: None,
                })
            },
            AceType::AccessAllowedObject | AceType::AccessDeniedObject => {
                let mask = AccessMask::from_bits_retain(read.read_u32()?);
                let object_flags = ObjectAceFlags::from_bits_retain(read.read_u32()?);
                let object_type = if object_flags.contains(ObjectAceFlags::ACE_OBJECT_TYPE_PRESENT) {
                    let mut buf = [0u8; 16];
                    read.read_exact(&mut buf)?;
                    Some(buf)
                } else {
                    None
                };
                let inherited_object_type = if object_flags.contains(ObjectAceFlags::ACE_INHERITED_OBJECT_TYPE_PRESENT) {
                    let mut buf = [0u8; 16];
                    read.read_exact(&mut buf)?;
                    Some(buf)
                } else {
                    None
                };
                let sid = LdapSid::read(&mut read)?;
                Ok(Self {
                    ace_type, flags, mask: Some(mask), sid: Some(sid),
                    object_flags: Some(object_flags), object_type, inherited_object_type,
                })
            },
            AceType::Unsupported(_) => {
                Ok(Self {
                    ace_type, flags, mask: None, sid: None,
                    object_flags: None, object_type: None, inherited_object_type: None,
                })
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Acl {
    pub aces: Vec<Ace>,
}
impl Acl {
    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut read = LittleEndianRead::new(reader);
        let _revision = read.read_u8()?;
        let _sbz1 = read.read_u8()?;
        let acl_size = read.read_u16()?;
        let ace_count = read.read_u16()?;
        let _sbz2 = read.read_u16()?;

        let data_len: usize = (acl_size as usize).saturating_sub(8);
        let mut data = vec![0u8; data_len];
        read.read_exact(&mut data)?;

        let mut aces = Vec::with_capacity(ace_count.into());
        let mut offset = 0usize;
        for _ in 0..ace_count {
            if offset + 4 > data.len() {
                break;
            }
            let ace_size = u16::from_le_bytes([data[offset + 2], data[offset + 3]]) as usize;
            if offset + ace_size > data.len() || ace_size < 4 {
                break;
            }
            aces.push(Ace::parse(&data[offset..offset + ace_size])?);
            offset += ace_size;
        }
        Ok(Self { aces })
    }
}

#[derive(Clone, Debug, Default)]
pub struct SecurityDescriptor {
    pub revision: u8,
    pub control: u16,
    pub owner_sid: Option<LdapSid>,
    pub group_sid: Option<LdapSid>,
    pub sacl: Option<Acl>,
    pub dacl: Option<Acl>,
}
impl SecurityDescriptor {
    /// Self-Relative control bit: this security descriptor stores its
    /// sub-structures as byte offsets from its own start rather than pointers.
    pub const CONTROL_SELF_RELATIVE: u16 = 1 << 0;

    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let mut cursor = Cursor::new(data);
        let mut read = LittleEndianRead::new(&mut cursor);
        let revision = read.read_u8()?;
        let _sbz1 = read.read_u8()?;
        let control = read.read_u16()?;
        let offset_owner = read.read_u32()?;
        let offset_group = read.read_u32()?;
        let offset_sacl = read.read_u32()?;
        let offset_dacl = read.read_u32()?;

        let owner_sid = read_at(data, offset_owner, LdapSid::read)?;
        let group_sid = read_at(data, offset_group, LdapSid::read)?;
        let sacl = read_at(data, offset_sacl, Acl::read)?;
        let dacl = read_at(data, offset_dacl, Acl::read)?;

        Ok(Self { revision, control, owner_sid, group_sid, sacl, dacl })
    }

    pub fn has_control(&self, bit: u16) -> bool {
        (self.control >> bit) & 1 == 1
    }
}

/// Formats a 16-byte `GUID` blob as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
pub fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]),
        u16::from_le_bytes([guid[4], guid[5]]),
        u16::from_le_bytes([guid[6], guid[7]]),
        guid[8], guid[9],
        guid[10], guid[11], guid[12], guid[13], guid[14], guid[15],
    )
}

fn read_at<'a, T>(
    data: &'a [u8],
    offset: u32,
    parse: impl FnOnce(&mut Cursor<&'a [u8]>) -> Result<T, Error>,
) -> Result<Option<T>, Error> {
    if offset == 0 {
        return Ok(None);
    }
    let offset: usize = offset.try_into().unwrap_or(usize::MAX);
    if offset >= data.len() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(&data[offset..]);
    Ok(Some(parse(&mut cursor)?))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_formats_as_s_string() {
        let sid = LdapSid {
            revision: 1,
            identifier_authority: [0, 0, 0, 0, 0, 5],
            sub_authorities: vec![21, 111, 222, 333, 1000],
        };
        assert_eq!(sid.to_string(), "S-1-5-21-111-222-333-1000");
    }

    #[test]
    fn ace_type_unknown_falls_back() {
        assert_eq!(AceType::from_raw(0x42), AceType::Unsupported(0x42));
    }
}
