//! Query-string conventions -> find options.
//!
//! Recognized keys: `page`, `per_page`, `populate`, `fields`, `filters`, `sort` and `where[...]`.
//! Malformed values never fail a request; they fall back to defaults.

use crate::config::Resource;
use crate::query::WhereOptions;

/// Largest page size a client can ask for.
pub const MAX_PER_PAGE: u64 = 1000;

/// `page=-1` disables pagination.
const NO_PAGINATION: i64 = -1;

/// Offsets stay within PostgreSQL's `bigint` range.
pub const MAX_OFFSET: u64 = i64::MAX as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<u64>,
    pub offset: u64,
    pub populate: Vec<String>,
    /// Projection; empty means every field.
    pub fields: Vec<String>,
    /// Named resource filters to apply.
    pub filters: Vec<String>,
    /// Ordering in priority order; one entry per field.
    pub order_by: Vec<(String, SortDirection)>,
}

fn comma_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

impl FindOptions {
    /// Parse the find-related keys. `default_per_page` applies when `page` is given without a valid `per_page`.
    pub fn from_query(pairs: &[(String, String)], default_per_page: u64) -> Self {
        let mut out = FindOptions::default();
        let mut page: Option<i64> = None;
        let mut per_page: Option<u64> = None;
        for (k, v) in pairs {
            match k.as_str() {
                "page" => page = v.trim().parse().ok(),
                "per_page" => per_page = v.trim().parse().ok().filter(|&n: &u64| n > 0),
                "populate" => out.populate.extend(comma_list(v)),
                "fields" => out.fields.extend(comma_list(v)),
                "filters" => out.filters.extend(comma_list(v)),
                "sort" => {
                    for pair in comma_list(v) {
                        let (field, direction) = match pair.split_once(':') {
                            Some((f, d)) => (f.trim(), SortDirection::parse(d)),
                            None => (pair.as_str(), SortDirection::Asc),
                        };
                        if !field.is_empty() {
                            out.set_order(field, direction);
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(page) = page.filter(|&p| p != NO_PAGINATION) {
            let limit = per_page.unwrap_or(default_per_page).min(MAX_PER_PAGE);
            out.limit = Some(limit);
            // A page past the representable range lands past the end.
            out.offset = if page >= 1 {
                (page as u64 - 1)
                    .checked_mul(limit)
                    .map_or(MAX_OFFSET, |o| o.min(MAX_OFFSET))
            } else {
                0
            };
        }
        out
    }

    /// Later orderings for the same field overwrite earlier ones in place.
    pub fn set_order(&mut self, field: &str, direction: SortDirection) {
        match self.order_by.iter_mut().find(|(f, _)| f == field) {
            Some(entry) => entry.1 = direction,
            None => self.order_by.push((field.to_string(), direction)),
        }
    }

    /// Drop names that do not belong to `resource` so only model identifiers reach the manager.
    pub fn restrict_to(mut self, resource: &Resource) -> Self {
        let known_column = |name: &String| {
            let known = resource.is_column(name);
            if !known {
                tracing::debug!(resource = %resource.name, field = %name, "dropping unknown field");
            }
            known
        };
        self.fields.retain(known_column);
        self.order_by.retain(|(f, _)| known_column(f));
        self.populate.retain(|path| {
            let head = path.split('.').next().unwrap_or_default();
            let known = resource.field(head).map(|f| f.is_relation()).unwrap_or(false);
            if !known {
                tracing::debug!(resource = %resource.name, relation = %path, "dropping unknown populate");
            }
            known
        });
        if !self.fields.is_empty() {
            // Populated owning relations need their key column in the projection.
            let mut extra = vec![resource.primary_key.clone()];
            for path in &self.populate {
                let head = path.split('.').next().unwrap_or_default();
                if resource.is_column(head) {
                    extra.push(head.to_string());
                }
            }
            for name in extra {
                if !self.fields.contains(&name) {
                    self.fields.push(name);
                }
            }
        }
        self
    }
}

/// Find options and where predicate for one request against one resource.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub find: FindOptions,
    pub filter: WhereOptions,
}

impl QueryOptions {
    /// Parse the whole query string for `resource`, AND-ing in the named filters it requests.
    pub fn parse(pairs: &[(String, String)], resource: &Resource) -> Self {
        let find = FindOptions::from_query(pairs, resource.default_per_page()).restrict_to(resource);
        let mut filter = WhereOptions::from_query_for(pairs, resource);
        for name in &find.filters {
            match resource.filters.get(name) {
                Some(named) => filter = filter.and(named.clone()),
                None => tracing::debug!(resource = %resource.name, filter = %name, "ignoring unknown filter"),
            }
        }
        QueryOptions {
            find,
            filter: filter.restrict_to(resource),
        }
    }
}
