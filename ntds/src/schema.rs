//! Bootstrap and index of the NTDS schema: the mapping between LDAP display
//! names, OIDs, ATTRTYP values and the `ATT<letter><id>` datatable columns
//! that actually hold the values.
//!
//! The schema describing the database's own attributes and classes is
//! itself stored as rows in `datatable`, so reading it requires a small
//! hardcoded bootstrap (the same fixed columns and object-class numbers
//! `addump` uses to find `MSysObjects` before anything else can be read).

use std::collections::BTreeMap;

use esedb::data::Data;
use esedb::table::{Column, Table, Value};

use crate::error::Error;


/// Hardcoded objectClass numbers needed to find schema rows before the
/// schema itself has been parsed.
pub const TOP_OBJECT_CLASS: i32 = 0x0001_0000;
pub const CLASS_SCHEMA_OBJECT_CLASS: i32 = 0x0003_000D;
pub const ATTRIBUTE_SCHEMA_OBJECT_CLASS: i32 = 0x0003_000E;

/// Attributes that are hardcoded in the database schema and present on
/// (almost) every row, keyed by their ESE column name.
pub const FIXED_COLUMN_MAP: &[(&str, &str)] = &[
    ("DNT", "DNT_col"),
    ("Pdnt", "PDNT_col"),
    ("Obj", "OBJ_col"),
    ("RdnType", "RDNtyp_col"),
    ("CNT", "cnt_col"),
    ("AB_cnt", "ab_cnt_col"),
    ("Time", "time_col"),
    ("Ncdnt", "NCDNT_col"),
    ("RecycleTime", "recycle_time_col"),
    ("Ancestors", "Ancestors_col"),
    ("objectClass", "ATTc0"),
    ("lDAPDisplayName", "ATTm131532"),
    ("attributeSyntax", "ATTc131104"),
    ("attributeID", "ATTc131102"),
    ("governsID", "ATTc131094"),
    ("objectCategory", "ATTb590606"),
    ("linkId", "ATTj131122"),
];

/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-adts/7cda533e-d7a4-4aec-a517-91d02ff4a1aa
const OID_TO_TYPE: &[(&str, char)] = &[
    ("2.5.5.1", 'b'),
    ("2.5.5.2", 'c'),
    ("2.5.5.3", 'd'),
    ("2.5.5.4", 'e'),
    ("2.5.5.5", 'f'),
    ("2.5.5.6", 'g'),
    ("2.5.5.7", 'h'),
    ("2.5.5.8", 'i'),
    ("2.5.5.9", 'j'),
    ("2.5.5.10", 'k'),
    ("2.5.5.11", 'l'),
    ("2.5.5.12", 'm'),
    ("2.5.5.13", 'n'),
    ("2.5.5.14", 'o'),
    ("2.5.5.15", 'p'),
    ("2.5.5.16", 'q'),
    ("2.5.5.17", 'r'),
];

/// High-16-bit-prefix-of-ATTRTYP to OID-prefix table.
const OID_PREFIX: &[(u32, &str)] = &[
    (0x0000_0000, "2.5.4"),
    (0x0001_0000, "2.5.6"),
    (0x0002_0000, "1.2.840.113556.1.2"),
    (0x0003_0000, "1.2.840.113556.1.3"),
    (0x0008_0000, "2.5.5"),
    (0x0009_0000, "1.2.840.113556.1.4"),
    (0x000A_0000, "1.2.840.113556.1.5"),
    (0x0014_0000, "2.16.840.1.113730.3"),
    (0x0015_0000, "0.9.2342.19200300.100.1"),
    (0x0016_0000, "2.16.840.1.113730.3.1"),
    (0x0017_0000, "1.2.840.113556.1.5.7000"),
    (0x0018_0000, "2.5.21"),
    (0x0019_0000, "2.5.18"),
    (0x001A_0000, "2.5.20"),
    (0x001B_0000, "1.3.6.1.4.1.1466.101.119"),
    (0x001C_0000, "2.16.840.1.113730.3.2"),
    (0x001D_0000, "1.3.6.1.4.1.250.1"),
    (0x001E_0000, "1.2.840.113549.1.9"),
    (0x001F_0000, "0.9.2342.19200300.100.4"),
    (0x0020_0000, "1.2.840.113556.1.6.23"),
    (0x0021_0000, "1.2.840.113556.1.6.18.1"),
    (0x0022_0000, "1.2.840.113556.1.6.18.2"),
    (0x0023_0000, "1.2.840.113556.1.6.13.3"),
    (0x0024_0000, "1.2.840.113556.1.6.13.4"),
    (0x0025_0000, "1.3.6.1.1.1.1"),
    (0x0026_0000, "1.3.6.1.1.1.2"),
    (0x4608_0000, "1.2.840.113556.1.8000.2554"),
];

/// Returns the OID corresponding to an ATTRTYP value, e.g. `590094` (`printShareName`)
/// becomes `1.2.840.113556.1.4.270`.
pub fn attrtyp_to_oid(value: i32) -> Option<String> {
    let value = value as u32;
    let prefix_key = value & 0xFFFF_0000;
    let suffix = value & 0x0000_FFFF;
    OID_PREFIX.iter()
        .find(|(k, _)| *k == prefix_key)
        .map(|(_, prefix)| format!("{}.{}", prefix, suffix))
}

fn oid_to_type_letter(type_oid: &str) -> Option<char> {
    OID_TO_TYPE.iter().find(|(oid, _)| *oid == type_oid).map(|(_, c)| *c)
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaEntry {
    pub dnt: i32,
    pub oid: String,
    pub attrtyp: i32,
    pub ldap_name: String,
    pub column_name: Option<String>,
    pub type_oid: Option<String>,
    pub link_id: Option<i32>,
}

/// A unified index of schema entries, providing fast lookups by DNT, OID,
/// ATTRTYP, LDAP display name and datatable column name.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    by_dnt: BTreeMap<i32, SchemaEntry>,
    by_oid: BTreeMap<String, SchemaEntry>,
    by_attrtyp: BTreeMap<i32, SchemaEntry>,
    by_ldap_name: BTreeMap<String, SchemaEntry>,
    by_column_name: BTreeMap<String, SchemaEntry>,
}
impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: SchemaEntry) {
        self.by_dnt.insert(entry.dnt, entry.clone());
        self.by_oid.insert(entry.oid.clone(), entry.clone());
        self.by_attrtyp.insert(entry.attrtyp, entry.clone());
        self.by_ldap_name.insert(entry.ldap_name.clone(), entry.clone());
        if let Some(column_name) = &entry.column_name {
            self.by_column_name.insert(column_name.clone(), entry.clone());
        }
    }

    pub fn by_dnt(&self, dnt: i32) -> Option<&SchemaEntry> { self.by_dnt.get(&dnt) }
    pub fn by_oid(&self, oid: &str) -> Option<&SchemaEntry> { self.by_oid.get(oid) }
    pub fn by_attrtyp(&self, attrtyp: i32) -> Option<&SchemaEntry> { self.by_attrtyp.get(&attrtyp) }
    pub fn by_ldap_name(&self, name: &str) -> Option<&SchemaEntry> { self.by_ldap_name.get(name) }
    pub fn by_column_name(&self, name: &str) -> Option<&SchemaEntry> { self.by_column_name.get(name) }

    /// Find the link name (an even `linkId`, divided by two as stored in `link_base`)
    /// for a `link_table` `link_base` value.
    pub fn link_name_for_base(&self, base: i32) -> Option<&str> {
        self.by_attrtyp.values()
            .find(|e| e.link_id == Some(base * 2))
            .map(|e| e.ldap_name.as_str())
    }

    /// Bootstraps the schema index from already-decoded `datatable` rows,
    /// reading the hardcoded fixed columns to find `classSchema` and
    /// `attributeSchema` entries, then registering the fixed columns
    /// themselves so lookups for e.g. "DNT" resolve too.
    pub fn from_rows(columns: &[Column], rows: &[BTreeMap<i32, Value>]) -> Result<Self, Error> {
        let mut schema = Self::new();

        let column_id = |ese_name: &str| -> Result<i32, Error> {
            columns.iter()
                .find(|c| c.name == ese_name)
                .map(|c| c.column_id)
                .ok_or_else(|| Error::NoColumnMapping { name: ese_name.to_owned() })
        };

        let dnt_col = column_id("DNT_col")?;
        let object_class_col = column_id("ATTc0")?;
        let ldap_name_col = column_id("ATTm131532")?;
        let governs_id_col = column_id("ATTc131094")?;
        let attribute_id_col = column_id("ATTc131102")?;
        let attribute_syntax_col = column_id("ATTc131104")?;
        let link_id_col = columns.iter().find(|c| c.name == "ATTj131122").map(|c| c.column_id);

        for row in rows {
            let Some(object_class) = first_long(row, object_class_col) else { continue };

            if object_class == CLASS_SCHEMA_OBJECT_CLASS {
                let Some(dnt) = first_long(row, dnt_col) else { continue };
                let Some(governs_id) = first_long(row, governs_id_col) else { continue };
                let Some(ldap_name) = first_text(row, ldap_name_col) else { continue };
                let Some(oid) = attrtyp_to_oid(governs_id) else { continue };

                schema.add(SchemaEntry {
                    dnt,
                    oid,
                    attrtyp: governs_id,
                    ldap_name,
                    column_name: None,
                    type_oid: None,
                    link_id: None,
                });
            } else if object_class == ATTRIBUTE_SCHEMA_OBJECT_CLASS {
                let Some(dnt) = first_long(row, dnt_col) else { continue };
                let Some(attribute_id) = first_long(row, attribute_id_col) else { continue };
                let Some(syntax) = first_long(row, attribute_syntax_col) else { continue };
                let Some(ldap_name) = first_text(row, ldap_name_col) else { continue };
                let Some(type_oid) = attrtyp_to_oid(syntax) else { continue };
                let Some(type_letter) = oid_to_type_letter(&type_oid) else { continue };
                let Some(oid) = attrtyp_to_oid(attribute_id) else { continue };
                let link_id = link_id_col
                    .and_then(|col| first_long(row, col))
                    .map(|raw| raw / 2);

                schema.add(SchemaEntry {
                    dnt,
                    oid,
                    attrtyp: attribute_id,
                    ldap_name,
                    column_name: Some(format!("ATT{}{}", type_letter, attribute_id)),
                    type_oid: Some(type_oid),
                    link_id,
                });
            }
        }

        for (ldap_name, column_name) in FIXED_COLUMN_MAP {
            if schema.by_column_name(column_name).is_none() {
                schema.add(SchemaEntry {
                    dnt: -1,
                    oid: String::new(),
                    attrtyp: -1,
                    ldap_name: (*ldap_name).to_owned(),
                    column_name: Some((*column_name).to_owned()),
                    type_oid: None,
                    link_id: None,
                });
            }
        }

        Ok(schema)
    }
}

fn first_long(row: &BTreeMap<i32, Value>, column_id: i32) -> Option<i32> {
    match row.get(&column_id)?.first_data()? {
        Data::Long(v) => Some(*v),
        _ => None,
    }
}

fn first_text(row: &BTreeMap<i32, Value>, column_id: i32) -> Option<String> {
    match row.get(&column_id)?.first_data()? {
        Data::Text(s) | Data::LongText(s) => Some(s.clone()),
        _ => None,
    }
}


/// Finds a table's catalog entry by name, as read by [`esedb::table::collect_tables`].
pub fn find_table<'t>(tables: &'t [Table], name: &'static str) -> Result<&'t Table, Error> {
    tables.iter()
        .find(|t| t.header.name == name)
        .ok_or(Error::TableNotFound { name })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrtyp_to_oid_resolves_known_prefix() {
        // printShareName: ATTRTYP 590094 (0x9010e) -> 1.2.840.113556.1.4.270
        assert_eq!(attrtyp_to_oid(590094), Some("1.2.840.113556.1.4.270".to_owned()));
    }

    #[test]
    fn attrtyp_to_oid_unknown_prefix_is_none() {
        assert_eq!(attrtyp_to_oid(0x7FFF_0001), None);
    }

    #[test]
    fn oid_to_type_letter_matches_table() {
        assert_eq!(oid_to_type_letter("2.5.5.12"), Some('m'));
        assert_eq!(oid_to_type_letter("9.9.9.9"), None);
    }
}
