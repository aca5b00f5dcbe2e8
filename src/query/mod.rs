//! Compilation of filter trees into document-store queries.
//!
//! The target vocabulary is MongoDB's: `exists`, `ne`, `lt`, `lte`, `gt`,
//! `gte`, `in`, `regex`, `not`, `and`, `or`, each written with a configurable
//! prefix (`$` by default) when serialized.

mod compile;

pub use compile::{Condition, QueryNode, QueryOp, QueryOptions, QueryValue, compile_query};
