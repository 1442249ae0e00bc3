//! Query-string parsing: find options, where predicates, page metadata.

pub mod filter;
pub mod meta;
pub mod parser;

pub use filter::{decode_value, CompareOp, WhereOptions};
pub use meta::{page_meta, PageMeta};
pub use parser::{FindOptions, QueryOptions, SortDirection};
