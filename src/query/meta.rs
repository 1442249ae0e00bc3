//! Page metadata for list envelopes.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub total: u64,
    /// Null when the request was not paginated.
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub page_count: u64,
}

/// Derive page metadata from the total row count and the limit/offset actually applied.
pub fn page_meta(total: u64, limit: Option<u64>, offset: u64) -> PageMeta {
    match limit.filter(|&l| l > 0) {
        Some(limit) => PageMeta {
            total,
            page: Some(offset / limit + 1),
            per_page: Some(limit),
            page_count: total.div_ceil(limit),
        },
        None => PageMeta {
            total,
            page: None,
            per_page: None,
            page_count: u64::from(total > 0),
        },
    }
}
