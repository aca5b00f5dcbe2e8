//! AST types for the filter language.
//!
//! Every node renders back to filter source through `Display`.

use std::fmt;
use time::PrimitiveDateTime;

use super::literal::{RegexLiteral, Subnet, format_timestamp};

/// Root of a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum BooleanNode {
    /// A single comparison or truthiness test.
    Leaf(Statement),

    /// Boolean NOT: `not expr`
    Not(Box<BooleanNode>),

    /// Boolean AND over two or more children: `a and b and c`
    And(Vec<BooleanNode>),

    /// Boolean OR over two or more children: `a or b or c`
    Or(Vec<BooleanNode>),
}

/// `lhs [op rhs]`. Without an operator the statement tests `lhs` for truthiness.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub lhs: Literal,
    pub comparison: Option<(Operator, Literal)>,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,    // ==
    Ne,    // !=
    Lt,    // <
    Le,    // <=
    Gt,    // >
    Ge,    // >=
    In,    // in
    Match, // =~
}

/// An atomic value produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    DateTime(PrimitiveDateTime),
    Regex(RegexLiteral),
    Subnet(Subnet),
    /// Two or more scalar values: `'a', 'b'` or `1, 2, 3`
    List(Vec<Literal>),
    Symbol(SymbolPath),
}

/// Dotted reference into the evaluation context, e.g. `src.addr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolPath(String);

impl SymbolPath {
    pub fn new(path: impl Into<String>) -> Self {
        SymbolPath(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::Match => "=~",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Literal {
    /// Name of the literal kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Literal::String(_) => "string",
            Literal::Int(_) => "integer",
            Literal::DateTime(_) => "datetime",
            Literal::Regex(_) => "regex",
            Literal::Subnet(_) => "subnet",
            Literal::List(_) => "list",
            Literal::Symbol(_) => "symbol",
        }
    }

    pub fn symbol(path: impl Into<String>) -> Self {
        Literal::Symbol(SymbolPath::new(path))
    }
}

/// True if `quote` appears in `text` without a backslash in front of it.
fn has_bare_quote(text: &str, quote: char) -> bool {
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            c if c == quote => return true,
            _ => {}
        }
    }
    false
}

/// Quote string text so the lexer reads the same text back. Text lexed from
/// source always fits one of the two delimiters; otherwise bare single
/// quotes and a dangling backslash get escaped.
fn quote_string(text: &str) -> String {
    let dangling = text.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1;
    if !dangling {
        if !has_bare_quote(text, '\'') {
            return format!("'{}'", text);
        }
        if !has_bare_quote(text, '"') {
            return format!("\"{}\"", text);
        }
    }

    let mut out = String::with_capacity(text.len() + 4);
    out.push('\'');
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                out.push(chars.next().unwrap_or('\\'));
            }
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => f.write_str(&quote_string(s)),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::DateTime(ts) => f.write_str(&format_timestamp(ts)),
            Literal::Regex(rex) => write!(f, "{}", rex),
            Literal::Subnet(subnet) => write!(f, "{}", subnet),
            Literal::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Literal::Symbol(path) => f.write_str(path.as_str()),
        }
    }
}

impl Statement {
    pub fn new(lhs: Literal, op: Operator, rhs: Literal) -> Self {
        Statement {
            lhs,
            comparison: Some((op, rhs)),
        }
    }

    /// A bare truthiness test of `lhs`.
    pub fn exists(lhs: Literal) -> Self {
        Statement {
            lhs,
            comparison: None,
        }
    }

    pub fn op(&self) -> Option<Operator> {
        self.comparison.as_ref().map(|(op, _)| *op)
    }

    pub fn rhs(&self) -> Option<&Literal> {
        self.comparison.as_ref().map(|(_, rhs)| rhs)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comparison {
            None => write!(f, "{}", self.lhs),
            Some((op, rhs)) => write!(f, "{} {} {}", self.lhs, op, rhs),
        }
    }
}

impl BooleanNode {
    /// Build `path op value` without going through source text.
    pub fn simple(path: &str, op: Operator, value: Literal) -> Self {
        BooleanNode::Leaf(Statement::new(Literal::symbol(path), op, value))
    }

    /// Number of statements in the tree.
    pub fn statement_count(&self) -> usize {
        match self {
            BooleanNode::Leaf(_) => 1,
            BooleanNode::Not(inner) => inner.statement_count(),
            BooleanNode::And(items) | BooleanNode::Or(items) => {
                items.iter().map(BooleanNode::statement_count).sum()
            }
        }
    }

    /// Merge directly nested And/Or nodes of the same kind into one chain.
    pub fn flatten(self) -> Self {
        match self {
            BooleanNode::And(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item.flatten() {
                        BooleanNode::And(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                BooleanNode::And(flat)
            }
            BooleanNode::Or(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item.flatten() {
                        BooleanNode::Or(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                BooleanNode::Or(flat)
            }
            BooleanNode::Not(inner) => BooleanNode::Not(Box::new(inner.flatten())),
            leaf => leaf,
        }
    }
}

impl From<Statement> for BooleanNode {
    fn from(statement: Statement) -> Self {
        BooleanNode::Leaf(statement)
    }
}

fn write_chain(f: &mut fmt::Formatter<'_>, items: &[BooleanNode], keyword: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", keyword)?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(")")
}

impl fmt::Display for BooleanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanNode::Leaf(statement) => write!(f, "{}", statement),
            BooleanNode::Not(inner) => write!(f, "not {}", inner),
            BooleanNode::And(items) => write_chain(f, items, "and"),
            BooleanNode::Or(items) => write_chain(f, items, "or"),
        }
    }
}
