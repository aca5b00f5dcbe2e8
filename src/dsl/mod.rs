//! Filter expression language.
//!
//! Syntax:
//!   field                      - truthiness (missing paths are falsy)
//!   a.b.c                      - nested lookup
//!   field == 'v', field != 1   - equality
//!   field < 5, <=, >, >=       - ordering
//!   field in 'a', 'b', 'c'     - list membership
//!   src in 10.0.0.0/8          - subnet membership
//!   name =~ /^abc/i            - regex search (flags: i, m, s)
//!   ts > 2015-03-01T12:00:00   - timestamps (date, time or both)
//!   not expr                   - NOT (binds tightest)
//!   expr and expr              - AND
//!   expr or expr               - OR (lowest precedence)
//!   (expr)                     - grouping

mod ast;
mod error;
mod eval;
mod lexer;
mod literal;
mod parser;

pub use ast::*;
pub use error::{CompileError, ComparisonTypeError, FilterError, SyntaxError};
pub use eval::{
    Context, Value, apply, evaluate_filter, evaluate_literal, evaluate_statement, resolve_symbol,
};
pub use lexer::{Spanned, Token, tokenize};
pub use literal::{RegexFlags, RegexLiteral, Subnet, format_timestamp, parse_timestamp};
pub use parser::parse_filter;

pub(crate) use lexer::keyword;
pub(crate) use literal::escape_regex_source;
