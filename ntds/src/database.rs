//! Opens an NTDS.dit file and exposes it as a queryable Active Directory
//! database: reads the ESE catalog, bootstraps `MSysObjects`, materializes
//! `datatable`/`link_table`/`sd_table` and builds the schema index, the
//! DNT lookup table and the link/backlink indexes all the rest of this
//! crate relies on.
//!
//! The on-disk ESE secondary indexes (`DNT_index`, `link_index`,
//! `sd_id_index`) are not walked directly; instead the whole of each table
//! is decoded once up front and indexed in memory with [`std::collections::BTreeMap`].
//! For the record counts NTDS.dit tables hold in practice this trades a
//! larger one-time parse for a much simpler, allocation-light lookup path,
//! and it sidesteps needing a correct implementation of ESE's own secondary
//! B-tree key encoding, which is out of scope here.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use esedb::header::{read_header, Header};
use esedb::page::CATALOG_PAGE_NUMBER;
use esedb::table::{collect_tables, read_table_from_pages, Column, Table, METADATA_COLUMN_DEFS};

use crate::error::Error;
use crate::object::{Object, ObjectClass};
use crate::query::{Query, QueryStats};
use crate::schema::Schema;
use crate::secd::SecurityDescriptor;

const DATATABLE: &str = "datatable";
const LINK_TABLE: &str = "link_table";
const SD_TABLE: &str = "sd_table";
const MSYSOBJECTS: &str = "MSysObjects";

#[derive(Clone, Debug)]
struct Link {
    link_dnt: i32,
    backlink_dnt: i32,
    link_base: i32,
}

/// An opened NTDS.dit database: all three tables this crate cares about,
/// decoded and indexed in memory.
pub struct Database {
    pub schema: Schema,
    header: Header,
    objects: Vec<Object>,
    by_dnt: BTreeMap<i32, usize>,
    /// PDNT-index equivalent: children grouped by parent DNT, each bucket
    /// sorted by the child's own DNT (the on-disk `PDNT_index` enumeration
    /// order).
    children_by_pdnt: BTreeMap<i32, Vec<usize>>,
    /// Every (attribute, lowercased value) pair an object carries, mapping
    /// to the objects that carry it. This is the column index the LDAP
    /// planner's index mode resolves atomic filter nodes against.
    attribute_index: BTreeMap<String, BTreeMap<String, Vec<usize>>>,
    links: Vec<Link>,
    links_by_dnt: BTreeMap<i32, Vec<usize>>,
    backlinks_by_dnt: BTreeMap<i32, Vec<usize>>,
    security_descriptors: BTreeMap<i32, Vec<u8>>,
}
impl Database {
    pub fn open<R: Read + Seek>(mut reader: R) -> Result<Self, Error> {
        let header = read_header(&mut reader)?;
        let shadow_header = read_header(&mut reader)?;
        if header != shadow_header {
            tracing::warn!("database header and shadow header do not match");
        }

        let catalog_rows = read_table_from_pages(&mut reader, &header, CATALOG_PAGE_NUMBER, &*METADATA_COLUMN_DEFS, None)?;
        let catalog_tables = collect_tables(&catalog_rows, &*METADATA_COLUMN_DEFS)?;
        let msysobjects = find_table(&catalog_tables, MSYSOBJECTS)?;

        let meta_rows = read_table_from_pages(
            &mut reader, &header,
            msysobjects.header.fdp_page_number.try_into().unwrap(),
            &msysobjects.columns, msysobjects.long_value_page_number(),
        )?;
        let tables = collect_tables(&meta_rows, &msysobjects.columns)?;

        let datatable = find_table(&tables, DATATABLE)?;
        let datatable_rows = read_table_from_pages(
            &mut reader, &header,
            datatable.header.fdp_page_number.try_into().unwrap(),
            &datatable.columns, datatable.long_value_page_number(),
        )?;

        let schema = Schema::from_rows(&datatable.columns, &datatable_rows)?;

        let mut objects = Vec::with_capacity(datatable_rows.len());
        let mut by_dnt = BTreeMap::new();
        for row in &datatable_rows {
            if let Some(object) = Object::from_row(&schema, &datatable.columns, row) {
                by_dnt.insert(object.dnt, objects.len());
                objects.push(object);
            }
        }

        let mut children_by_pdnt: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (i, object) in objects.iter().enumerate() {
            children_by_pdnt.entry(object.pdnt).or_default().push(i);
        }
        for children in children_by_pdnt.values_mut() {
            children.sort_by_key(|&i| objects[i].dnt);
        }

        let attribute_index = build_attribute_index(&objects);

        let (links, links_by_dnt, backlinks_by_dnt) = match find_table(&tables, LINK_TABLE) {
            Ok(link_table) => read_links(&mut reader, &header, link_table)?,
            Err(_) => (Vec::new(), BTreeMap::new(), BTreeMap::new()),
        };

        let security_descriptors = match find_table(&tables, SD_TABLE) {
            Ok(sd_table) => read_security_descriptors(&mut reader, &header, sd_table)?,
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            schema, header, objects, by_dnt, children_by_pdnt, attribute_index,
            links, links_by_dnt, backlinks_by_dnt,
            security_descriptors,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn object_by_dnt(&self, dnt: i32) -> Option<&Object> {
        self.by_dnt.get(&dnt).map(|&i| &self.objects[i])
    }

    /// Runs an LDAP filter against the database with the index-mode/filter-mode
    /// planner, optimizing `AND` child order to favor indexed predicates.
    pub fn query(&self, filter: &str) -> Result<Vec<&Object>, Error> {
        Ok(self.query_with_options(filter, true)?.0)
    }

    /// As [`Database::query`], but lets the caller disable `AND`-reordering
    /// and inspect how many index/filter scans the planner performed.
    pub fn query_with_options(&self, filter: &str, optimize: bool) -> Result<(Vec<&Object>, QueryStats), Error> {
        let query = Query::parse(filter)?;
        Ok(query.evaluate(self, optimize))
    }

    /// Runs an AND of exact attribute=value matches, the way `DataTable.lookup` does.
    pub fn lookup(&self, attribute: &str, value: &str) -> Result<Vec<&Object>, Error> {
        self.query(&format!("({attribute}={value})"))
    }

    /// Runs an AND of exact attribute=value matches without going through
    /// the LDAP filter grammar at all, the way `DataTable.search(**kwargs)` does.
    pub fn search(&self, attrs: &[(&str, &str)]) -> Vec<&Object> {
        self.objects.iter()
            .filter(|o| attrs.iter().all(|&(attribute, value)| {
                o.get(attribute).map(|v| v.as_list().into_iter().any(|x| crate::query::value_equals(x, value))).unwrap_or(false)
            }))
            .collect()
    }

    /// Every object whose most specific `objectClass` is `User`.
    pub fn users(&self) -> Vec<&Object> {
        self.objects.iter().filter(|o| o.class == ObjectClass::User).collect()
    }

    /// The object at DNT 2, the root of the whole hive ("$ROOT_OBJECT$").
    pub fn root(&self) -> Option<&Object> {
        self.object_by_dnt(2)
    }

    /// Walks the tree below the root looking for the naming context head
    /// that is itself a domain: the `domainDNS` object whose `instanceType`
    /// carries `HEAD_OF_NAMING_CONTEXT`.
    pub fn root_domain(&self) -> Option<&Object> {
        self.objects.iter().find(|o| o.class == ObjectClass::DomainDns && o.is_head_of_naming_context())
    }

    /// The direct child of `dnt` whose `name` matches, case-insensitively.
    pub fn child_of(&self, dnt: i32, name: &str) -> Option<&Object> {
        self.children_by_pdnt.get(&dnt)?
            .iter()
            .map(|&i| &self.objects[i])
            .find(|o| o.name().map(|n| n.eq_ignore_ascii_case(name)).unwrap_or(false))
    }

    /// Direct children of `dnt`, in PDNT-index order (ascending child DNT).
    pub fn children_of(&self, dnt: i32) -> Vec<&Object> {
        self.children_by_pdnt.get(&dnt)
            .map(|indices| indices.iter().map(|&i| &self.objects[i]).collect())
            .unwrap_or_default()
    }

    /// The naming-context root that owns `object`: walks up via `ncdnt` if
    /// present, otherwise via ancestors until a head-of-naming-context object
    /// is found.
    pub fn partition(&self, object: &Object) -> Option<&Object> {
        if let Some(ncdnt) = object.ncdnt {
            if let Some(nc) = self.object_by_dnt(ncdnt) {
                return Some(nc);
            }
        }
        if object.is_head_of_naming_context() {
            if let Some(found) = self.object_by_dnt(object.dnt) {
                return Some(found);
            }
        }
        self.ancestors(object).into_iter().find(|o| o.is_head_of_naming_context())
    }

    /// `object`'s parent chain, nearest first, up to (not including) the root.
    pub fn ancestors<'a>(&'a self, object: &Object) -> Vec<&'a Object> {
        let mut ancestors = Vec::new();
        let mut current = object.pdnt;
        while current != 0 {
            let Some(parent) = self.object_by_dnt(current) else { break };
            ancestors.push(parent);
            if parent.dnt == 2 {
                break;
            }
            current = parent.pdnt;
        }
        ancestors
    }

    /// `child_of(object.dnt, name)`, as a method on the object's own subtree.
    pub fn child(&self, object: &Object, name: &str) -> Option<&Object> {
        self.child_of(object.dnt, name)
    }

    pub fn parent(&self, object: &Object) -> Option<&Object> {
        if object.pdnt == 0 { None } else { self.object_by_dnt(object.pdnt) }
    }

    pub fn children(&self, object: &Object) -> impl Iterator<Item = &Object> {
        let dnt = object.dnt;
        self.objects.iter().filter(move |o| o.pdnt == dnt)
    }

    pub(crate) fn index_lookup(&self, attribute: &str, value: &str) -> Vec<usize> {
        self.attribute_index.get(attribute)
            .and_then(|by_value| by_value.get(&value.to_lowercase()))
            .cloned()
            .unwrap_or_default()
    }

    /// Range scan for a trailing-wildcard prefix query, exploiting the
    /// `BTreeMap`'s sort order instead of touching every entry.
    pub(crate) fn index_prefix(&self, attribute: &str, prefix: &str) -> Vec<usize> {
        let Some(by_value) = self.attribute_index.get(attribute) else { return Vec::new() };
        let lower_prefix = prefix.to_lowercase();
        let mut result = Vec::new();
        match increment_key(&lower_prefix) {
            Some(upper) => {
                for indices in by_value.range(lower_prefix.clone()..upper).map(|(_, v)| v) {
                    result.extend(indices.iter().copied());
                }
            },
            None => {
                for indices in by_value.range(lower_prefix.clone()..).map(|(_, v)| v) {
                    result.extend(indices.iter().copied());
                }
            },
        }
        result
    }

    /// Walks up the parent chain and renders a Distinguished Name, the same
    /// way `_make_dn` does: `RDNKEY=VALUE` components from root to leaf,
    /// joined by commas, most specific first.
    pub fn distinguished_name(&self, object: &Object) -> String {
        let mut components = Vec::new();
        let mut current = object;
        loop {
            if current.dnt == 0 || current.dnt == 2 {
                break;
            }
            let rdn_type = current.get("RdnType").and_then(crate::object::AttributeValue::as_int);
            let rdn_key = rdn_type
                .and_then(|t| self.schema.by_attrtyp(t as i32))
                .map(|e| e.ldap_name.to_uppercase());
            let rdn_value = current.name();
            if let (Some(key), Some(value)) = (rdn_key, rdn_value) {
                components.push(format!("{key}={}", value.to_uppercase()));
            }
            match self.object_by_dnt(current.pdnt) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        components.join(",")
    }

    /// Objects linked *from* `object` via the given link attribute (e.g. `member`).
    pub fn links<'a>(&'a self, object: &Object, link_name: &str) -> Vec<&'a Object> {
        let Some(indices) = self.links_by_dnt.get(&object.dnt) else { return Vec::new() };
        indices.iter()
            .filter_map(|&i| {
                let link = &self.links[i];
                let name = self.schema.link_name_for_base(link.link_base)?;
                (name == link_name).then(|| self.object_by_dnt(link.backlink_dnt)).flatten()
            })
            .collect()
    }

    /// Objects linking *to* `object` via the given link attribute (e.g. `memberOf`).
    pub fn backlinks<'a>(&'a self, object: &Object, link_name: &str) -> Vec<&'a Object> {
        let Some(indices) = self.backlinks_by_dnt.get(&object.dnt) else { return Vec::new() };
        indices.iter()
            .filter_map(|&i| {
                let link = &self.links[i];
                let name = self.schema.link_name_for_base(link.link_base)?;
                (name == link_name).then(|| self.object_by_dnt(link.link_dnt)).flatten()
            })
            .collect()
    }

    /// Every named, outgoing link from `object`, paired with its link name.
    /// Link bases with no corresponding `linkID` in the schema (unnamed or
    /// orphaned) are skipped.
    pub fn all_links<'a>(&'a self, object: &Object) -> Vec<(&'a str, &'a Object)> {
        let Some(indices) = self.links_by_dnt.get(&object.dnt) else { return Vec::new() };
        indices.iter()
            .filter_map(|&i| {
                let link = &self.links[i];
                let name = self.schema.link_name_for_base(link.link_base)?;
                let target = self.object_by_dnt(link.backlink_dnt)?;
                Some((name, target))
            })
            .collect()
    }

    /// Every named, incoming link to `object`, paired with its link name.
    pub fn all_backlinks<'a>(&'a self, object: &Object) -> Vec<(&'a str, &'a Object)> {
        let Some(indices) = self.backlinks_by_dnt.get(&object.dnt) else { return Vec::new() };
        indices.iter()
            .filter_map(|&i| {
                let link = &self.links[i];
                let name = self.schema.link_name_for_base(link.link_base)?;
                let target = self.object_by_dnt(link.link_dnt)?;
                Some((name, target))
            })
            .collect()
    }

    /// Whether `object` has at least one outgoing link named `link_name`.
    pub fn has_link(&self, object: &Object, link_name: &str) -> bool {
        !self.links(object, link_name).is_empty()
    }

    /// Whether `object` has at least one incoming link named `link_name`.
    pub fn has_backlink(&self, object: &Object, link_name: &str) -> bool {
        !self.backlinks(object, link_name).is_empty()
    }

    /// Every group `object` (a user or group) belongs to via `member`/
    /// `memberOf`, plus the group whose RID matches `primaryGroupID`.
    pub fn groups_of(&self, user: &Object) -> Vec<&Object> {
        let mut groups = self.backlinks(user, "memberOf");
        if let (Some(primary_group_id), Some(domain_sid)) = (user.primary_group_id(), user.domain_sid()) {
            let target_sid = format!("{domain_sid}-{primary_group_id}");
            groups.extend(self.objects.iter().filter(|o| o.sid() == Some(target_sid.as_str())));
        }
        groups
    }

    /// Every member of `group` via `member`, plus users whose `primaryGroupID`
    /// matches the group's own RID.
    pub fn members_of(&self, group: &Object) -> Vec<&Object> {
        let mut members = self.links(group, "member");
        if let Some(rid) = group.rid().and_then(|r| r.parse::<i64>().ok()) {
            members.extend(self.objects.iter().filter(|o| o.primary_group_id() == Some(rid)));
        }
        members
    }

    /// The parsed discretionary ACL for an object's `nTSecurityDescriptor`, if present.
    pub fn dacl(&self, object: &Object) -> Option<crate::secd::Acl> {
        let sd_id = object.get("nTSecurityDescriptor").and_then(crate::object::AttributeValue::as_int)?;
        let raw = self.security_descriptors.get(&(sd_id as i32))?;
        SecurityDescriptor::parse(raw).ok()?.dacl
    }
}

fn build_attribute_index(objects: &[Object]) -> BTreeMap<String, BTreeMap<String, Vec<usize>>> {
    let mut index: BTreeMap<String, BTreeMap<String, Vec<usize>>> = BTreeMap::new();
    for (i, object) in objects.iter().enumerate() {
        for (ldap_name, value) in object.as_dict() {
            for part in value.as_list() {
                if let Some(s) = crate::object::AttributeValue::as_str(part) {
                    index.entry(ldap_name.clone()).or_default()
                        .entry(s.to_lowercase()).or_default()
                        .push(i);
                }
            }
        }
    }
    index
}

/// Increments a lowercased key for use as an exclusive upper range bound:
/// `a`..`y` bump by one letter, `z` carries into the character to its left,
/// and a key of all `z`s has no upper bound (returns `None`).
fn increment_key(s: &str) -> Option<String> {
    let mut chars: Vec<char> = s.chars().collect();
    let mut i = chars.len();
    loop {
        if i == 0 {
            return None;
        }
        i -= 1;
        match chars[i] {
            'a'..='y' | 'A'..='Y' => {
                chars[i] = char::from_u32(chars[i] as u32 + 1).unwrap();
                return Some(chars.into_iter().collect());
            },
            'z' => { chars[i] = 'a'; },
            'Z' => { chars[i] = 'A'; },
            _ => { return Some(chars.into_iter().collect()); },
        }
    }
}

fn find_table<'t>(tables: &'t [Table], name: &'static str) -> Result<&'t Table, Error> {
    tables.iter().find(|t| t.header.name == name).ok_or(Error::TableNotFound { name })
}

fn column_id(columns: &[Column], name: &str) -> Option<i32> {
    columns.iter().find(|c| c.name == name).map(|c| c.column_id)
}

fn first_i32(row: &BTreeMap<i32, esedb::table::Value>, column_id: i32) -> Option<i32> {
    match row.get(&column_id)?.first_data()? {
        esedb::data::Data::Long(v) => Some(*v),
        esedb::data::Data::UnsignedLong(v) => Some(*v as i32),
        _ => None,
    }
}

fn read_links<R: Read + Seek>(
    reader: &mut R,
    header: &Header,
    link_table: &Table,
) -> Result<(Vec<Link>, BTreeMap<i32, Vec<usize>>, BTreeMap<i32, Vec<usize>>), Error> {
    let rows = read_table_from_pages(
        reader, header,
        link_table.header.fdp_page_number.try_into().unwrap(),
        &link_table.columns, link_table.long_value_page_number(),
    )?;

    let link_dnt_col = column_id(&link_table.columns, "link_DNT");
    let backlink_dnt_col = column_id(&link_table.columns, "backlink_DNT");
    let link_base_col = column_id(&link_table.columns, "link_base");

    let mut links = Vec::new();
    let mut links_by_dnt: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    let mut backlinks_by_dnt: BTreeMap<i32, Vec<usize>> = BTreeMap::new();

    for row in &rows {
        let (Some(link_dnt), Some(backlink_dnt), Some(link_base)) = (
            link_dnt_col.and_then(|c| first_i32(row, c)),
            backlink_dnt_col.and_then(|c| first_i32(row, c)),
            link_base_col.and_then(|c| first_i32(row, c)),
        ) else { continue };

        let index = links.len();
        links.push(Link { link_dnt, backlink_dnt, link_base });
        links_by_dnt.entry(link_dnt).or_default().push(index);
        backlinks_by_dnt.entry(backlink_dnt).or_default().push(index);
    }

    Ok((links, links_by_dnt, backlinks_by_dnt))
}

fn read_security_descriptors<R: Read + Seek>(
    reader: &mut R,
    header: &Header,
    sd_table: &Table,
) -> Result<BTreeMap<i32, Vec<u8>>, Error> {
    let rows = read_table_from_pages(
        reader, header,
        sd_table.header.fdp_page_number.try_into().unwrap(),
        &sd_table.columns, sd_table.long_value_page_number(),
    )?;

    let sd_id_col = column_id(&sd_table.columns, "sd_id");
    let sd_value_col = column_id(&sd_table.columns, "sd_value");

    let mut descriptors = BTreeMap::new();
    for row in &rows {
        let (Some(sd_id_col), Some(sd_value_col)) = (sd_id_col, sd_value_col) else { break };
        let Some(sd_id) = first_i32(row, sd_id_col) else { continue };
        let Some(value) = row.get(&sd_value_col).and_then(|v| v.first_data()) else { continue };
        let bytes = match value {
            esedb::data::Data::Binary(b) | esedb::data::Data::LongBinary(b) | esedb::data::Data::SuperLongValue(b) => b.clone(),
            _ => continue,
        };
        descriptors.insert(sd_id, bytes);
    }

    Ok(descriptors)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_from_row_resolves_dnt_through_schema() {
        let mut schema = Schema::new();
        schema.add(crate::schema::SchemaEntry {
            dnt: -1, oid: String::new(), attrtyp: -1,
            ldap_name: "DNT".to_owned(), column_name: Some("DNT_col".to_owned()),
            type_oid: None, link_id: None,
        });
        let columns = [esedb::table::Column {
            table_object_id: 0, column_id: 0, column_type: esedb::data::DataType::Long,
            length: 4, flags: esedb::table::ColumnFlags::empty(), codepage: 0,
            root_flag: None, record_offset: None, name: "DNT_col".to_owned(),
        }];
        let mut row = BTreeMap::new();
        row.insert(0, esedb::table::Value::Simple(esedb::data::Data::Long(2)));

        let object = Object::from_row(&schema, &columns, &row).unwrap();
        assert_eq!(object.dnt, 2);
    }

    #[test]
    fn increment_key_bumps_last_letter() {
        assert_eq!(increment_key("abc"), Some("abd".to_owned()));
    }

    #[test]
    fn increment_key_carries_across_trailing_z() {
        assert_eq!(increment_key("abz"), Some("aca".to_owned()));
    }

    #[test]
    fn increment_key_of_all_z_has_no_upper_bound() {
        assert_eq!(increment_key("zzz"), None);
    }

    #[test]
    fn attribute_index_groups_by_lowercased_value() {
        let mut schema = Schema::new();
        schema.add(crate::schema::SchemaEntry {
            dnt: -1, oid: String::new(), attrtyp: -1,
            ldap_name: "DNT".to_owned(), column_name: Some("DNT_col".to_owned()),
            type_oid: None, link_id: None,
        });
        schema.add(crate::schema::SchemaEntry {
            dnt: -2, oid: String::new(), attrtyp: -2,
            ldap_name: "cn".to_owned(), column_name: Some("cn_col".to_owned()),
            type_oid: None, link_id: None,
        });
        let columns = [
            esedb::table::Column {
                table_object_id: 0, column_id: 0, column_type: esedb::data::DataType::Long,
                length: 4, flags: esedb::table::ColumnFlags::empty(), codepage: 0,
                root_flag: None, record_offset: None, name: "DNT_col".to_owned(),
            },
            esedb::table::Column {
                table_object_id: 0, column_id: 1, column_type: esedb::data::DataType::Text,
                length: 0, flags: esedb::table::ColumnFlags::empty(), codepage: 0,
                root_flag: None, record_offset: None, name: "cn_col".to_owned(),
            },
        ];
        let mut row = BTreeMap::new();
        row.insert(0, esedb::table::Value::Simple(esedb::data::Data::Long(2)));
        row.insert(1, esedb::table::Value::Simple(esedb::data::Data::Text("Alice".to_owned())));
        let object = Object::from_row(&schema, &columns, &row).unwrap();

        let index = build_attribute_index(std::slice::from_ref(&object));
        assert_eq!(index.get("cn").unwrap().get("alice").unwrap(), &vec![0]);
    }
}
