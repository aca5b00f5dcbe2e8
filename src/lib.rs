//! `filtration` parses boolean filter expressions such as
//! `src in 10.0.0.0/8 and not blocked`, evaluates them against nested
//! key/value contexts, compiles them into MongoDB-style queries, and decodes
//! `field__op=value` query strings into the same language.

pub mod config;
pub mod dsl;
pub mod qs;
pub mod query;

pub use dsl::{
    BooleanNode, CompileError, ComparisonTypeError, Context, FilterError, Literal, Operator,
    Statement, SyntaxError, Value, evaluate_filter, parse_filter,
};
pub use qs::{decode_query_string, parse_query_string};
pub use query::{QueryNode, QueryOptions, compile_query};
