//! A small LDAP search filter parser and matcher, evaluated against the
//! in-memory set of decoded [`crate::object::Object`]s a [`crate::database::Database`]
//! holds.
//!
//! Supports the standard parenthesized filter grammar
//! (`(&(objectClass=user)(sAMAccountName=jdoe))`, `(cn=Finance*)`, `(!(...))`)
//! with a single restriction carried over from the on-disk-index design this
//! was grounded on: a wildcard may only appear as the trailing character of
//! a value, since the database exposes no substring index.
//!
//! [`Query::evaluate`] implements the planner's two evaluation modes: index
//! mode resolves an atomic node straight from [`crate::database::Database`]'s
//! per-attribute value index, while filter mode checks a node against a
//! caller-supplied candidate set with a plain linear scan. An `AND` with no
//! incoming candidates runs its first child in index mode to build one, then
//! filter-checks the rest against it; with `optimize` set, the child most
//! likely to hit the index (an equality or prefix test) is moved first.

use crate::database::Database;
use crate::object::{AttributeValue, Object};
use crate::error::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Equality { attribute: String, value: String },
    Prefix { attribute: String, prefix: String },
    Present { attribute: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

/// Counters describing how a [`Query::evaluate`] run reached its result,
/// mainly useful for confirming the planner actually used the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub index_scans: usize,
    pub filter_scans: usize,
}

/// A parsed LDAP query, ready to be matched against objects.
#[derive(Clone, Debug)]
pub struct Query {
    filter: Filter,
}
impl Query {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut parser = Parser { input: text.as_bytes(), pos: 0 };
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.input.len() {
            return Err(Error::InvalidFilter { reason: "trailing data after filter".to_owned() });
        }
        Ok(Self { filter })
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Returns every object in `objects` that the filter matches, via a
    /// plain linear filter-mode scan (no index involved).
    pub fn process<'s, 'o>(&'s self, objects: &'o [Object]) -> impl Iterator<Item = &'o Object> + use<'s, 'o> {
        objects.iter().filter(move |obj| matches(&self.filter, obj))
    }

    /// Evaluates the filter against `database` using the index-mode/filter-mode
    /// planner. When `optimize` is set, `AND` children are reordered so an
    /// indexable predicate runs first.
    pub fn evaluate<'d>(&self, database: &'d Database, optimize: bool) -> (Vec<&'d Object>, QueryStats) {
        let mut stats = QueryStats::default();
        let indices = eval_node(&self.filter, database, None, optimize, &mut stats);
        let objects = indices.into_iter().map(|i| &database.objects()[i]).collect();
        (objects, stats)
    }
}

fn matches(filter: &Filter, object: &Object) -> bool {
    match filter {
        Filter::And(children) => children.iter().all(|c| matches(c, object)),
        Filter::Or(children) => children.iter().any(|c| matches(c, object)),
        Filter::Not(child) => !matches(child, object),
        Filter::Present { attribute } => object.get(attribute).is_some(),
        Filter::Prefix { attribute, prefix } => {
            let Some(attr_value) = object.get(attribute) else { return false };
            attr_value.as_list().into_iter()
                .filter_map(AttributeValue::as_str)
                .any(|v| v.to_lowercase().starts_with(&prefix.to_lowercase()))
        },
        Filter::Equality { attribute, value } => {
            let Some(attr_value) = object.get(attribute) else { return false };
            attr_value.as_list().into_iter().any(|v| value_equals(v, value))
        },
    }
}

pub(crate) fn value_equals(attr_value: &AttributeValue, literal: &str) -> bool {
    if let Some(s) = attr_value.as_str() {
        return s.eq_ignore_ascii_case(literal);
    }
    if let Some(i) = attr_value.as_int() {
        if let Ok(parsed) = literal.parse::<i64>() {
            return i == parsed;
        }
    }
    false
}

/// Whether `filter` is atomic enough to be resolved straight from the index
/// (as opposed to needing a recursive filter-mode evaluation).
fn is_indexable(filter: &Filter) -> bool {
    matches!(filter, Filter::Equality { .. } | Filter::Prefix { .. })
}

fn order_by_selectivity(children: &[Filter]) -> Vec<&Filter> {
    let mut ordered: Vec<&Filter> = children.iter().collect();
    ordered.sort_by_key(|f| if is_indexable(f) { 0 } else { 1 });
    ordered
}

fn eval_node(
    filter: &Filter,
    database: &Database,
    candidates: Option<&[usize]>,
    optimize: bool,
    stats: &mut QueryStats,
) -> Vec<usize> {
    match filter {
        Filter::And(children) => eval_and(children, database, candidates, optimize, stats),
        Filter::Or(children) => {
            let mut seen = std::collections::BTreeSet::new();
            for child in children {
                seen.extend(eval_node(child, database, candidates, optimize, stats));
            }
            seen.into_iter().collect()
        },
        Filter::Not(inner) => {
            let base: Vec<usize> = match candidates {
                Some(c) => c.to_vec(),
                None => (0..database.objects().len()).collect(),
            };
            let excluded: std::collections::BTreeSet<usize> =
                eval_node(inner, database, candidates, optimize, stats).into_iter().collect();
            base.into_iter().filter(|i| !excluded.contains(i)).collect()
        },
        Filter::Present { attribute } => filter_scan(database, candidates, stats, |o| o.get(attribute).is_some()),
        Filter::Equality { attribute, value } => match candidates {
            None => {
                stats.index_scans += 1;
                database.index_lookup(attribute, value)
            },
            Some(c) => filter_scan(database, Some(c), stats, |o| {
                o.get(attribute).map(|v| v.as_list().into_iter().any(|x| value_equals(x, value))).unwrap_or(false)
            }),
        },
        Filter::Prefix { attribute, prefix } => match candidates {
            None => {
                stats.index_scans += 1;
                database.index_prefix(attribute, prefix)
            },
            Some(c) => filter_scan(database, Some(c), stats, |o| matches(filter, o)),
        },
    }
}

fn eval_and(
    children: &[Filter],
    database: &Database,
    candidates: Option<&[usize]>,
    optimize: bool,
    stats: &mut QueryStats,
) -> Vec<usize> {
    if children.is_empty() {
        return Vec::new();
    }
    let ordered: Vec<&Filter> = if optimize && candidates.is_none() {
        order_by_selectivity(children)
    } else {
        children.iter().collect()
    };

    match candidates {
        Some(existing) => {
            stats.filter_scans += 1;
            existing.iter().copied()
                .filter(|&i| ordered.iter().all(|f| matches(f, &database.objects()[i])))
                .collect()
        },
        None => {
            let (first, rest) = ordered.split_first().unwrap();
            let mut result = eval_node(first, database, None, optimize, stats);
            if !rest.is_empty() {
                stats.filter_scans += 1;
                result.retain(|&i| rest.iter().all(|f| matches(f, &database.objects()[i])));
            }
            result
        },
    }
}

fn filter_scan(
    database: &Database,
    candidates: Option<&[usize]>,
    stats: &mut QueryStats,
    pred: impl Fn(&Object) -> bool,
) -> Vec<usize> {
    stats.filter_scans += 1;
    match candidates {
        Some(c) => c.iter().copied().filter(|&i| pred(&database.objects()[i])).collect(),
        None => database.objects().iter().enumerate().filter(|(_, o)| pred(o)).map(|(i, _)| i).collect(),
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}
impl<'a> Parser<'a> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), Error> {
        self.skip_whitespace();
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::InvalidFilter { reason: format!("expected '{}' at position {}", byte as char, self.pos) })
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, Error> {
        self.expect(b'(')?;
        self.skip_whitespace();
        let filter = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_filter_list()?)
            },
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_filter_list()?)
            },
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            },
            _ => self.parse_simple()?,
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_filter_list(&mut self) -> Result<Vec<Filter>, Error> {
        let mut filters = Vec::new();
        self.skip_whitespace();
        while self.input.get(self.pos) == Some(&b'(') {
            filters.push(self.parse_filter()?);
            self.skip_whitespace();
        }
        if filters.is_empty() {
            return Err(Error::InvalidFilter { reason: "empty logical filter list".to_owned() });
        }
        Ok(filters)
    }

    fn parse_simple(&mut self) -> Result<Filter, Error> {
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != b')' && self.input[self.pos] != b'=' {
            self.pos += 1;
        }
        let attribute = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| Error::InvalidFilter { reason: "non-UTF8 attribute name".to_owned() })?
            .trim()
            .to_owned();
        self.expect(b'=')?;

        let value_start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != b')' {
            self.pos += 1;
        }
        let value = std::str::from_utf8(&self.input[value_start..self.pos])
            .map_err(|_| Error::InvalidFilter { reason: "non-UTF8 filter value".to_owned() })?
            .to_owned();

        if value == "*" {
            return Ok(Filter::Present { attribute });
        }
        if value.contains('*') && !value.ends_with('*') {
            return Err(Error::UnsupportedWildcard);
        }
        if let Some(prefix) = value.strip_suffix('*') {
            return Ok(Filter::Prefix { attribute, prefix: prefix.to_owned() });
        }
        Ok(Filter::Equality { attribute, value })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_equality() {
        let query = Query::parse("(sAMAccountName=jdoe)").unwrap();
        assert_eq!(query.filter(), &Filter::Equality { attribute: "sAMAccountName".to_owned(), value: "jdoe".to_owned() });
    }

    #[test]
    fn parses_and_of_two_terms() {
        let query = Query::parse("(&(objectClass=user)(sAMAccountName=jdoe))").unwrap();
        assert_eq!(
            query.filter(),
            &Filter::And(vec![
                Filter::Equality { attribute: "objectClass".to_owned(), value: "user".to_owned() },
                Filter::Equality { attribute: "sAMAccountName".to_owned(), value: "jdoe".to_owned() },
            ])
        );
    }

    #[test]
    fn rejects_mid_string_wildcard() {
        assert!(matches!(Query::parse("(cn=*foo*bar)"), Err(Error::UnsupportedWildcard)));
    }

    #[test]
    fn parses_negation() {
        let query = Query::parse("(!(isDeleted=1))").unwrap();
        assert_eq!(
            query.filter(),
            &Filter::Not(Box::new(Filter::Equality { attribute: "isDeleted".to_owned(), value: "1".to_owned() }))
        );
    }

    #[test]
    fn parses_trailing_wildcard_as_prefix() {
        let query = Query::parse("(cn=Finance*)").unwrap();
        assert_eq!(query.filter(), &Filter::Prefix { attribute: "cn".to_owned(), prefix: "Finance".to_owned() });
    }

    #[test]
    fn order_by_selectivity_moves_equality_before_present() {
        let children = vec![
            Filter::Present { attribute: "description".to_owned() },
            Filter::Equality { attribute: "objectClass".to_owned(), value: "user".to_owned() },
        ];
        let ordered = order_by_selectivity(&children);
        assert_eq!(ordered[0], &Filter::Equality { attribute: "objectClass".to_owned(), value: "user".to_owned() });
    }
}
