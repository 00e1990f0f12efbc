//! Decodes `datatable` rows into typed Active Directory objects: the
//! `objectClass`-driven dispatch from `Object` ("top") down to `User`,
//! `Group`, `Computer` and the rest of the well-known schema classes, plus
//! the per-attribute value decoding that turns raw ESE column data into
//! LDAP-shaped values (SIDs, DNTs, booleans, integers, timestamps).
//!
//! Graph traversal (parent/children/links/backlinks and the convenience
//! wrappers built on them) lives on [`crate::database::Database`], since it
//! needs access to other tables; this module only knows about a single
//! record's own attributes.

use std::collections::BTreeMap;

use esedb::data::Data;
use esedb::table::{Column, Value};

use crate::schema::Schema;

bitflags::bitflags! {
    /// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-ada3/39e7f8cd-2b7a-488d-ae0a-f30ae425d1e6
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct InstanceType: i32 {
        const HEAD_OF_NAMING_CONTEXT = 0x0000_0001;
        const NOT_INSTANTIATED = 0x0000_0002;
        const WRITABLE = 0x0000_0004;
        const NAMING_CONTEXT_HELD_ABOVE = 0x0000_0008;
        const CONSTRUCTING_NAMING_CONTEXT = 0x0000_0010;
        const REMOVING_NAMING_CONTEXT = 0x0000_0020;
    }
}

bitflags::bitflags! {
    /// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-ada3/1e889686-e27a-40e2-8c8b-6d8e4e471cf5
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct SystemFlags: i32 {
        const ATTR_NOT_REPLICATED = 0x0000_0001;
        const ATTR_IS_CONSTRUCTED = 0x0000_0004;
        const DISALLOW_MOVE_ON_DELETE = 0x0200_0000;
        const DOMAIN_DISALLOW_MOVE = 0x0400_0000;
        const CONFIG_ALLOW_RENAME = 0x0800_0000;
        const CONFIG_ALLOW_MOVE = 0x1000_0000;
        const DOMAIN_DISALLOW_RENAME = 0x2000_0000;
        const CONFIG_ALLOW_LIMITED_MOVE = 0x4000_0000;
        const DISALLOW_DELETE = (0x8000_0000u32 as i32);
    }
}

bitflags::bitflags! {
    /// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-ada3/1e889686-e27a-40e2-8c8b-6d8e4e471cf5
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct UserAccountControl: i32 {
        const SCRIPT = 0x0001;
        const ACCOUNTDISABLE = 0x0002;
        const HOMEDIR_REQUIRED = 0x0008;
        const LOCKOUT = 0x0010;
        const PASSWD_NOTREQD = 0x0020;
        const PASSWD_CANT_CHANGE = 0x0040;
        const ENCRYPTED_TEXT_PWD_ALLOWED = 0x0080;
        const TEMP_DUPLICATE_ACCOUNT = 0x0100;
        const NORMAL_ACCOUNT = 0x0200;
        const INTERDOMAIN_TRUST_ACCOUNT = 0x0800;
        const WORKSTATION_TRUST_ACCOUNT = 0x1000;
        const SERVER_TRUST_ACCOUNT = 0x2000;
        const DONT_EXPIRE_PASSWORD = 0x0001_0000;
        const MNS_LOGON_ACCOUNT = 0x0002_0000;
        const SMARTCARD_REQUIRED = 0x0004_0000;
        const TRUSTED_FOR_DELEGATION = 0x0008_0000;
        const NOT_DELEGATED = 0x0010_0000;
        const USE_DES_KEY_ONLY = 0x0020_0000;
        const DONT_REQUIRE_PREAUTH = 0x0040_0000;
        const PASSWORD_EXPIRED = 0x0080_0000;
        const TRUSTED_TO_AUTH_FOR_DELEGATION = 0x0100_0000;
        const PARTIAL_SECRETS_ACCOUNT = 0x0400_0000;
    }
}


/// A decoded attribute value, in the LDAP-facing shape rather than the raw
/// ESE column encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Sid(String),
    Guid(String),
    Dnt(i32),
    /// A Windows FILETIME attribute converted to Unix epoch seconds;
    /// `None` represents "never"/unset (a raw value of `0` or `i64::MAX`).
    Timestamp(Option<i64>),
    List(Vec<AttributeValue>),
}
impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Sid(s) | Self::Guid(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Dnt(v) => Some((*v).into()),
            Self::Bool(b) => Some((*b).into()),
            Self::Timestamp(v) => *v,
            _ => None,
        }
    }

    pub fn as_list(&self) -> Vec<&AttributeValue> {
        match self {
            Self::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }
}

/// Decodes a single raw [`Data`] value according to its attribute's type OID,
/// following the `OID_ENCODE_DECODE_MAP` used to turn SYNTAX-typed column
/// data into LDAP-shaped values. `badPasswordTime`-style attributes that are
/// declared as `Integer`/`LargeInteger` but actually hold Windows FILETIMEs
/// are special-cased by name rather than by their declared syntax.
pub fn decode_value(schema: &Schema, ldap_name: &str, raw: &Data) -> AttributeValue {
    if is_windows_timestamp_attribute(ldap_name) {
        if let Some(raw_int) = data_as_i64(raw) {
            return wintimestamp(raw_int);
        }
    }

    let Some(entry) = schema.by_ldap_name(ldap_name) else {
        return data_to_generic(raw);
    };
    let Some(type_oid) = &entry.type_oid else {
        return data_to_generic(raw);
    };

    match type_oid.as_str() {
        "2.5.5.1" => data_as_i64(raw)
            .map(|d| d as i32)
            .and_then(|dnt| schema.by_dnt(dnt))
            .map(|e| AttributeValue::Text(e.ldap_name.clone()))
            .unwrap_or_else(|| data_as_i64(raw).map(|d| d as i32).map(AttributeValue::Dnt).unwrap_or_else(|| data_to_generic(raw))),
        "2.5.5.8" => data_as_i64(raw).map(|v| AttributeValue::Bool(v != 0)).unwrap_or_else(|| data_to_generic(raw)),
        "2.5.5.9" | "2.5.5.16" => data_as_i64(raw).map(AttributeValue::Int).unwrap_or_else(|| data_to_generic(raw)),
        "2.5.5.10" => match raw {
            Data::Binary(b) | Data::LongBinary(b) | Data::SuperLongValue(b) => AttributeValue::Bytes(b.clone()),
            other => data_to_generic(other),
        },
        "2.5.5.15" => match raw {
            Data::Binary(b) | Data::LongBinary(b) | Data::SuperLongValue(b) => {
                AttributeValue::Bytes(b.clone())
            },
            other => data_to_generic(other),
        },
        "2.5.5.17" => match raw {
            Data::Binary(b) | Data::LongBinary(b) | Data::SuperLongValue(b) => {
                crate::secd::LdapSid::read(&mut std::io::Cursor::new(b.as_slice()))
                    .map(|sid| AttributeValue::Sid(sid.to_string()))
                    .unwrap_or_else(|_| AttributeValue::Bytes(b.clone()))
            },
            other => data_to_generic(other),
        },
        "2.5.5.2" => data_as_i64(raw)
            .map(|d| d as i32)
            .and_then(|attrtyp| schema.by_attrtyp(attrtyp))
            .map(|e| AttributeValue::Text(e.ldap_name.clone()))
            .unwrap_or_else(|| data_to_generic(raw)),
        "2.5.5.11" => data_as_i64(raw).map(wintimestamp).unwrap_or_else(|| data_to_generic(raw)),
        "2.5.5.3" | "2.5.5.4" | "2.5.5.5" | "2.5.5.6" | "2.5.5.12" => data_to_generic(raw),
        _ => data_to_generic(raw),
    }
}

/// Decodes a full attribute's worth of values, handling the multi-valued
/// (`Value::Multiple`) case the way `decode_value` in the original handles
/// Python lists.
pub fn decode_attribute(schema: &Schema, ldap_name: &str, value: &Value) -> AttributeValue {
    let parts: Vec<AttributeValue> = value.to_data_vec().into_iter()
        .map(|d| decode_value(schema, ldap_name, d))
        .collect();
    match parts.len() {
        1 => parts.into_iter().next().unwrap(),
        _ => AttributeValue::List(parts),
    }
}

fn is_windows_timestamp_attribute(ldap_name: &str) -> bool {
    matches!(
        ldap_name,
        "badPasswordTime" | "lastLogonTimestamp" | "lastLogon" | "lastLogoff" | "pwdLastSet" | "accountExpires"
    )
}

/// Seconds between the FILETIME epoch (1601-01-01) and the Unix epoch.
const FILETIME_TO_UNIX_EPOCH_SECONDS: i64 = 11_644_473_600;

/// `(1<<63)-1`: the "never" sentinel `accountExpires` and similar
/// attributes use in place of a real FILETIME.
const FILETIME_NEVER: i64 = i64::MAX;

/// Converts a raw Windows FILETIME (100ns intervals since 1601-01-01) to
/// Unix epoch seconds, mapping the `0`/"never" sentinels to `None`.
fn wintimestamp(raw: i64) -> AttributeValue {
    if raw == 0 || raw == FILETIME_NEVER {
        return AttributeValue::Timestamp(None);
    }
    AttributeValue::Timestamp(Some(raw / 10_000_000 - FILETIME_TO_UNIX_EPOCH_SECONDS))
}

fn data_as_i64(data: &Data) -> Option<i64> {
    match data {
        Data::Bit(b) => Some(if b.0 != 0 { 1 } else { 0 }),
        Data::UnsignedByte(v) => Some((*v).into()),
        Data::Short(v) => Some((*v).into()),
        Data::Long(v) => Some((*v).into()),
        Data::UnsignedLong(v) => Some((*v).into()),
        Data::LongLong(v) => Some(*v),
        Data::Currency(v) => Some(*v),
        Data::DateTime(v) => Some(*v),
        _ => None,
    }
}

fn data_to_generic(data: &Data) -> AttributeValue {
    match data {
        Data::Nil => AttributeValue::Bytes(Vec::new()),
        Data::Bit(b) => AttributeValue::Bool(b.0 != 0),
        Data::UnsignedByte(v) => AttributeValue::Int((*v).into()),
        Data::Short(v) => AttributeValue::Int((*v).into()),
        Data::Long(v) => AttributeValue::Int((*v).into()),
        Data::UnsignedLong(v) => AttributeValue::Int((*v).into()),
        Data::LongLong(v) => AttributeValue::Int(*v),
        Data::Currency(v) => AttributeValue::Int(*v),
        Data::DateTime(v) => AttributeValue::Int(*v),
        Data::IeeeSingle(v) => AttributeValue::Text(v.to_string()),
        Data::IeeeDouble(v) => AttributeValue::Text(v.to_string()),
        Data::Text(s) | Data::LongText(s) => AttributeValue::Text(s.clone()),
        Data::Binary(b) | Data::LongBinary(b) | Data::SuperLongValue(b) => AttributeValue::Bytes(b.clone()),
        Data::Guid(uuid) => AttributeValue::Guid(uuid.to_string()),
        Data::UnsignedShort(v) => AttributeValue::Int((*v).into()),
        Data::Other(_, b) => AttributeValue::Bytes(b.clone()),
    }
}


/// The well-known `objectClass` values `classSchema` objects and ordinary
/// directory objects can be tagged with. Ordering mirrors the specificity
/// the original dispatch walks `objectClass` in: the most specific class
/// listed on the record wins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectClass {
    ClassSchema,
    AttributeSchema,
    DomainDns,
    Domain,
    BuiltinDomain,
    Configuration,
    QuotaContainer,
    CrossRefContainer,
    SitesContainer,
    Locality,
    PhysicalLocation,
    OrganizationalUnit,
    LostAndFound,
    Container,
    Computer,
    Group,
    Server,
    User,
    OrganizationalPerson,
    Person,
    Generic,
}
impl ObjectClass {
    /// The LDAP display names known classes dispatch on, most specific
    /// first, matched against the `objectClass` attribute's listed values.
    const KNOWN: &'static [(&'static str, ObjectClass)] = &[
        ("classSchema", ObjectClass::ClassSchema),
        ("attributeSchema", ObjectClass::AttributeSchema),
        ("computer", ObjectClass::Computer),
        ("group", ObjectClass::Group),
        ("server", ObjectClass::Server),
        ("user", ObjectClass::User),
        ("organizationalPerson", ObjectClass::OrganizationalPerson),
        ("person", ObjectClass::Person),
        ("domainDNS", ObjectClass::DomainDns),
        ("domain", ObjectClass::Domain),
        ("builtinDomain", ObjectClass::BuiltinDomain),
        ("configuration", ObjectClass::Configuration),
        ("msDS-QuotaContainer", ObjectClass::QuotaContainer),
        ("crossRefContainer", ObjectClass::CrossRefContainer),
        ("sitesContainer", ObjectClass::SitesContainer),
        ("locality", ObjectClass::Locality),
        ("physicalLocation", ObjectClass::PhysicalLocation),
        ("organizationalUnit", ObjectClass::OrganizationalUnit),
        ("lostAndFound", ObjectClass::LostAndFound),
        ("container", ObjectClass::Container),
    ];

    pub fn from_object_classes(classes: &[String]) -> Self {
        for class in classes {
            if let Some((_, known)) = Self::KNOWN.iter().find(|(name, _)| name == class) {
                return *known;
            }
        }
        Self::Generic
    }
}


/// A single decoded Active Directory object: the `DNT_col`-identified row
/// from `datatable`, with its attributes resolved to LDAP display names and
/// decoded to their schema-declared types.
#[derive(Clone, Debug)]
pub struct Object {
    pub dnt: i32,
    pub pdnt: i32,
    pub ncdnt: Option<i32>,
    pub class: ObjectClass,
    pub object_classes: Vec<String>,
    attributes: BTreeMap<String, AttributeValue>,
}
impl Object {
    pub fn from_row(schema: &Schema, columns: &[Column], row: &BTreeMap<i32, Value>) -> Option<Self> {
        let column_names: BTreeMap<i32, &str> = columns.iter()
            .map(|c| (c.column_id, c.name.as_str()))
            .collect();

        let mut attributes = BTreeMap::new();
        for (column_id, value) in row {
            let Some(&column_name) = column_names.get(column_id) else { continue };
            let Some(entry) = schema.by_column_name(column_name) else { continue };
            let decoded = decode_attribute(schema, &entry.ldap_name, value);
            attributes.insert(entry.ldap_name.clone(), decoded);
        }

        let dnt = attributes.get("DNT").and_then(AttributeValue::as_int).map(|v| v as i32)?;
        let pdnt = attributes.get("Pdnt").and_then(AttributeValue::as_int).map(|v| v as i32).unwrap_or(0);
        let ncdnt = attributes.get("Ncdnt").and_then(AttributeValue::as_int).map(|v| v as i32);
        let object_classes: Vec<String> = attributes.get("objectClass")
            .map(|v| v.as_list().into_iter().filter_map(AttributeValue::as_str).map(str::to_owned).collect())
            .unwrap_or_default();
        let class = ObjectClass::from_object_classes(&object_classes);

        Some(Self { dnt, pdnt, ncdnt, class, object_classes, attributes })
    }

    pub fn get(&self, ldap_name: &str) -> Option<&AttributeValue> {
        self.attributes.get(ldap_name)
    }

    pub fn as_dict(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(AttributeValue::as_str)
    }

    pub fn sid(&self) -> Option<&str> {
        self.get("objectSid").and_then(AttributeValue::as_str)
    }

    pub fn guid(&self) -> Option<&str> {
        self.get("objectGUID").and_then(AttributeValue::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.get("isDeleted").and_then(AttributeValue::as_int).map(|v| v != 0).unwrap_or(false)
    }

    pub fn instance_type(&self) -> Option<InstanceType> {
        self.get("instanceType").and_then(AttributeValue::as_int).map(|v| InstanceType::from_bits_retain(v as i32))
    }

    pub fn system_flags(&self) -> Option<SystemFlags> {
        self.get("systemFlags").and_then(AttributeValue::as_int).map(|v| SystemFlags::from_bits_retain(v as i32))
    }

    pub fn is_head_of_naming_context(&self) -> bool {
        self.instance_type().map(|t| t.contains(InstanceType::HEAD_OF_NAMING_CONTEXT)).unwrap_or(false)
    }

    pub fn sam_account_name(&self) -> Option<&str> {
        self.get("sAMAccountName").and_then(AttributeValue::as_str)
    }

    pub fn primary_group_id(&self) -> Option<i64> {
        self.get("primaryGroupID").and_then(AttributeValue::as_int)
    }

    pub fn user_account_control(&self) -> Option<UserAccountControl> {
        self.get("userAccountControl").and_then(AttributeValue::as_int).map(|v| UserAccountControl::from_bits_retain(v as i32))
    }

    pub fn is_machine_account(&self) -> bool {
        self.user_account_control()
            .map(|f| f.contains(UserAccountControl::WORKSTATION_TRUST_ACCOUNT))
            .unwrap_or(false)
    }

    /// The relative identifier: the last dash-separated component of the
    /// object's own `objectSid`.
    pub fn rid(&self) -> Option<&str> {
        self.sid().and_then(|sid| sid.rsplit('-').next())
    }

    /// The domain portion of the object's own `objectSid` (everything up to
    /// but not including the trailing RID).
    pub fn domain_sid(&self) -> Option<&str> {
        self.sid().and_then(|sid| sid.rsplit_once('-')).map(|(domain, _)| domain)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_class_dispatches_to_most_specific_known_class() {
        let classes = vec!["top".to_owned(), "person".to_owned(), "organizationalPerson".to_owned(), "user".to_owned()];
        assert_eq!(ObjectClass::from_object_classes(&classes), ObjectClass::User);
    }

    #[test]
    fn object_class_falls_back_to_generic() {
        let classes = vec!["top".to_owned(), "someVendorExtension".to_owned()];
        assert_eq!(ObjectClass::from_object_classes(&classes), ObjectClass::Generic);
    }

    #[test]
    fn attribute_value_as_list_wraps_scalars() {
        let value = AttributeValue::Int(5);
        assert_eq!(value.as_list().len(), 1);
    }
}
