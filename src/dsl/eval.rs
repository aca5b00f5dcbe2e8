//! Evaluator for the filter AST.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use time::PrimitiveDateTime;

use super::ast::{BooleanNode, Literal, Operator, Statement, SymbolPath};
use super::error::ComparisonTypeError;
use super::literal::{RegexLiteral, Subnet, parse_timestamp};

/// A resolved operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A symbol whose path is missing from the context.
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(PrimitiveDateTime),
    Regex(RegexLiteral),
    Subnet(Subnet),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// A node of the evaluation context.
///
/// Mapping-like nodes answer [`Context::child`]; every other node returns
/// `None`, which resolves the symbol to [`Value::Undefined`].
pub trait Context {
    fn child(&self, key: &str) -> Option<&Self>;

    fn to_value(&self) -> Value;
}

impl Context for serde_json::Value {
    fn child(&self, key: &str) -> Option<&Self> {
        match self {
            serde_json::Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Context::to_value).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

impl Context for Value {
    fn child(&self, key: &str) -> Option<&Self> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Regex(_) => "regex",
            Value::Subnet(_) => "subnet",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    /// Falsy: undefined, null, false, zero, and empty strings, lists and objects.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::DateTime(_) | Value::Regex(_) | Value::Subnet(_) => true,
        }
    }

    fn is_absent(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Int(n) => Value::Int(*n),
            Literal::DateTime(ts) => Value::DateTime(*ts),
            Literal::Regex(rex) => Value::Regex(rex.clone()),
            Literal::Subnet(subnet) => Value::Subnet(*subnet),
            Literal::List(items) => Value::List(items.iter().map(Value::from).collect()),
            // Unresolved paths only reach here outside a context.
            Literal::Symbol(_) => Value::Undefined,
        }
    }
}

/// Resolve a symbol path against the context.
///
/// A root key spelled exactly like the dotted path wins over the nested walk.
pub fn resolve_symbol<C: Context>(path: &SymbolPath, ctx: &C) -> Value {
    if let Some(node) = ctx.child(path.as_str()) {
        return node.to_value();
    }

    let mut node = ctx;
    for segment in path.segments() {
        match node.child(segment) {
            Some(next) => node = next,
            None => return Value::Undefined,
        }
    }
    node.to_value()
}

/// Resolve a literal to its runtime value.
pub fn evaluate_literal<C: Context>(literal: &Literal, ctx: &C) -> Value {
    match literal {
        Literal::Symbol(path) => resolve_symbol(path, ctx),
        other => Value::from(other),
    }
}

/// Evaluate a filter AST against a context.
///
/// `and`/`or` short-circuit left to right, so the first type error met wins.
pub fn evaluate_filter<C: Context>(
    ast: &BooleanNode,
    ctx: &C,
) -> Result<bool, ComparisonTypeError> {
    match ast {
        BooleanNode::Leaf(statement) => evaluate_statement(statement, ctx),

        BooleanNode::Not(inner) => Ok(!evaluate_filter(inner, ctx)?),

        BooleanNode::And(exprs) => {
            for expr in exprs {
                if !evaluate_filter(expr, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        BooleanNode::Or(exprs) => {
            for expr in exprs {
                if evaluate_filter(expr, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

pub fn evaluate_statement<C: Context>(
    statement: &Statement,
    ctx: &C,
) -> Result<bool, ComparisonTypeError> {
    let lhs = evaluate_literal(&statement.lhs, ctx);

    let Some((op, rhs)) = &statement.comparison else {
        return Ok(lhs.is_truthy());
    };
    let rhs = evaluate_literal(rhs, ctx);

    apply(*op, &lhs, &rhs)
}

fn type_error(op: Operator, lhs: &Value, rhs: &Value) -> ComparisonTypeError {
    ComparisonTypeError {
        left_kind: lhs.kind(),
        right_kind: rhs.kind(),
        operator: op,
    }
}

/// Apply a comparison operator to resolved operands.
pub fn apply(op: Operator, lhs: &Value, rhs: &Value) -> Result<bool, ComparisonTypeError> {
    match op {
        Operator::Eq => equals(lhs, rhs).ok_or_else(|| type_error(op, lhs, rhs)),
        Operator::Ne => equals(lhs, rhs)
            .map(|eq| !eq)
            .ok_or_else(|| type_error(op, lhs, rhs)),
        Operator::Lt => order(op, lhs, rhs).map(Ordering::is_lt),
        Operator::Le => order(op, lhs, rhs).map(Ordering::is_le),
        Operator::Gt => order(op, lhs, rhs).map(Ordering::is_gt),
        Operator::Ge => order(op, lhs, rhs).map(Ordering::is_ge),
        Operator::In => contains(lhs, rhs),
        Operator::Match => matches_regex(lhs, rhs),
    }
}

fn timestamp_of(value: &Value) -> Option<PrimitiveDateTime> {
    match value {
        Value::DateTime(ts) => Some(*ts),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

/// `None` when the operands cannot be compared for equality.
fn equals(lhs: &Value, rhs: &Value) -> Option<bool> {
    match (lhs, rhs) {
        (a, b) if a.is_absent() || b.is_absent() => Some(a.is_absent() && b.is_absent()),
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::Int(a), Value::Int(b)) => Some(a == b),
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            Some(*a as f64 == *b)
        }
        (Value::Float(a), Value::Float(b)) => Some(a == b),
        (Value::String(a), Value::String(b)) => Some(a == b),
        (Value::DateTime(_), _) | (_, Value::DateTime(_)) => {
            Some(timestamp_of(lhs)? == timestamp_of(rhs)?)
        }
        (Value::List(a), Value::List(b)) => {
            if a.len() != b.len() {
                return Some(false);
            }
            for (x, y) in a.iter().zip(b) {
                if !equals(x, y)? {
                    return Some(false);
                }
            }
            Some(true)
        }
        (Value::Object(a), Value::Object(b)) => Some(a == b),
        (Value::Regex(a), Value::Regex(b)) => Some(a == b),
        (Value::Subnet(a), Value::Subnet(b)) => Some(a == b),
        _ => None,
    }
}

fn order(op: Operator, lhs: &Value, rhs: &Value) -> Result<Ordering, ComparisonTypeError> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::DateTime(_), _) | (_, Value::DateTime(_)) => {
            match (timestamp_of(lhs), timestamp_of(rhs)) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            }
        }
        _ => None,
    };
    ordering.ok_or_else(|| type_error(op, lhs, rhs))
}

fn in_subnet(item: &Value, subnet: &Subnet) -> bool {
    match item {
        Value::String(s) => s
            .trim()
            .parse::<Ipv4Addr>()
            .is_ok_and(|ip| subnet.contains(ip)),
        _ => false,
    }
}

/// `lhs in rhs`: the right-hand side is the container.
fn contains(lhs: &Value, rhs: &Value) -> Result<bool, ComparisonTypeError> {
    if !(lhs.is_truthy() && rhs.is_truthy()) {
        return Ok(false);
    }

    match rhs {
        Value::List(items) => Ok(items.iter().any(|item| equals(lhs, item) == Some(true))),
        Value::Subnet(subnet) => Ok(match lhs {
            Value::List(items) => items.iter().any(|item| in_subnet(item, subnet)),
            item => in_subnet(item, subnet),
        }),
        Value::String(haystack) => match lhs {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            _ => Err(type_error(Operator::In, lhs, rhs)),
        },
        Value::Object(map) => match lhs {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Ok(false),
        },
        _ => Err(type_error(Operator::In, lhs, rhs)),
    }
}

/// `lhs =~ rhs`: a search anywhere in the string, or in any string of a list.
fn matches_regex(lhs: &Value, rhs: &Value) -> Result<bool, ComparisonTypeError> {
    if !(lhs.is_truthy() && rhs.is_truthy()) {
        return Ok(false);
    }

    let Value::Regex(rex) = rhs else {
        return Err(type_error(Operator::Match, lhs, rhs));
    };

    match lhs {
        Value::String(s) => Ok(rex.is_match(s)),
        Value::List(items) => Ok(items.iter().any(|item| match item {
            Value::String(s) => rex.is_match(s),
            _ => false,
        })),
        _ => Err(type_error(Operator::Match, lhs, rhs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_filter;
    use serde_json::json;

    fn eval(src: &str, ctx: &serde_json::Value) -> bool {
        let ast = parse_filter(src).unwrap();
        evaluate_filter(&ast, ctx).unwrap()
    }

    fn context() -> serde_json::Value {
        json!({
            "symbol_true": true,
            "symbol_false": false,
            "symbol_int": 1,
            "symbol_float": 1.5,
            "symbol_str": "a",
            "symbol_dt": "2020-06-01T12:00:00",
            "symbol_list": ["abcde", "cdefg"],
            "dict": {"symbol_true": true, "nested": {"deep": "x"}},
            "dotted.key": "literal"
        })
    }

    #[test]
    fn test_existence() {
        let ctx = context();
        assert!(eval("symbol_true", &ctx));
        assert!(!eval("symbol_false", &ctx));
        assert!(!eval("missing", &ctx));
        assert!(eval("dict.symbol_true", &ctx));
        assert!(!eval("dict.doesnt_exist", &ctx));
        assert!(!eval("symbol_str.deeper", &ctx));
    }

    #[test]
    fn test_dotted_root_key() {
        let ctx = context();
        assert!(eval("dotted.key == 'literal'", &ctx));
        assert!(eval("dict.nested.deep == 'x'", &ctx));
    }

    #[test]
    fn test_boolean_combinators() {
        let ctx = context();
        assert!(eval("symbol_true and symbol_true", &ctx));
        assert!(!eval("symbol_true and symbol_false", &ctx));
        assert!(eval("symbol_true or symbol_false", &ctx));
        assert!(!eval("symbol_false or symbol_false", &ctx));
        assert!(eval("not symbol_false", &ctx));
        assert!(!eval("not symbol_true", &ctx));
    }

    #[test]
    fn test_integer_comparisons() {
        let ctx = context();
        let cases = [
            ("symbol_int == 1", "symbol_int == 2"),
            ("symbol_int != 2", "symbol_int != 1"),
            ("symbol_int < 2", "symbol_int < 1"),
            ("symbol_int <= 1", "symbol_int <= 0"),
            ("symbol_int > 0", "symbol_int > 1"),
            ("symbol_int >= 1", "symbol_int >= 2"),
            ("symbol_float > 1", "symbol_float >= 2"),
        ];
        for (truthy, falsy) in cases {
            assert!(eval(truthy, &ctx), "{}", truthy);
            assert!(!eval(falsy, &ctx), "{}", falsy);
        }
    }

    #[test]
    fn test_in_list() {
        let ctx = context();
        assert!(eval("symbol_str in 'a','b'", &ctx));
        assert!(!eval("symbol_str in 'c','d'", &ctx));
        assert!(!eval("'a' in nonexistant", &ctx));
        assert!(!eval("missing in 1, 2", &ctx));
        assert!(eval("'abcde' in symbol_list", &ctx));
    }

    #[test]
    fn test_in_string_and_object() {
        let ctx = context();
        assert!(eval("'cde' in symbol_list.0", &json!({"symbol_list.0": "abcde"})));
        assert!(eval("'nested' in dict", &ctx));
        assert!(!eval("'other' in dict", &ctx));
    }

    #[test]
    fn test_in_subnet() {
        let ast = parse_filter("src in 127.0.0.0/8").unwrap();
        assert!(evaluate_filter(&ast, &json!({"src": "127.0.0.1"})).unwrap());
        assert!(!evaluate_filter(&ast, &json!({"src": "localhost"})).unwrap());
        assert!(!evaluate_filter(&ast, &json!({})).unwrap());
        assert!(evaluate_filter(&ast, &json!({"src": ["10.0.0.1", "127.1.1.1"]})).unwrap());
        assert!(!evaluate_filter(&ast, &json!({"src": ["10.0.0.1"]})).unwrap());
    }

    #[test]
    fn test_regex() {
        let ctx = context();
        assert!(eval("symbol_str =~ /^a/", &ctx));
        assert!(!eval("symbol_str =~ /c$/", &ctx));
        assert!(eval("symbol_list =~ /cde/", &ctx));
        assert!(!eval("symbol_list =~ /xyz/", &ctx));
        assert!(!eval("nonexistant =~ /a/", &ctx));
        assert!(eval("symbol_str =~ /A/i", &ctx));
    }

    #[test]
    fn test_datetime() {
        let ctx = context();
        assert!(eval("symbol_dt > 2015-03-01", &ctx));
        assert!(!eval("symbol_dt < 2000-01-01", &ctx));
        assert!(eval("symbol_dt == 2020-06-01T12:00:00", &ctx));
        assert!(eval("symbol_dt == 2020-06-01 12:00:00", &ctx));
    }

    #[test]
    fn test_type_errors_propagate() {
        let ctx = context();
        let ast = parse_filter("symbol_str < 1").unwrap();
        let err = evaluate_filter(&ast, &ctx).unwrap_err();
        assert_eq!(
            err,
            ComparisonTypeError {
                left_kind: "string",
                right_kind: "integer",
                operator: Operator::Lt,
            }
        );

        let ast = parse_filter("symbol_true and symbol_str == 1").unwrap();
        assert!(evaluate_filter(&ast, &ctx).is_err());

        // Short-circuit: the failing statement is never reached.
        let ast = parse_filter("symbol_false and symbol_str == 1").unwrap();
        assert_eq!(evaluate_filter(&ast, &ctx), Ok(false));

        let ast = parse_filter("symbol_dt > 2015-03-01").unwrap();
        assert!(evaluate_filter(&ast, &json!({"symbol_dt": "not a date"})).is_err());
    }

    #[test]
    fn test_undefined_equality_is_not_an_error() {
        let ctx = context();
        assert!(!eval("missing == 'x'", &ctx));
        assert!(eval("missing != 'x'", &ctx));
        assert!(eval("missing == other_missing", &ctx));
    }

    #[test]
    fn test_evaluate_literal() {
        let ctx = context();
        assert_eq!(
            evaluate_literal(&Literal::symbol("dict.nested.deep"), &ctx),
            Value::String("x".into())
        );
        assert_eq!(evaluate_literal(&Literal::Int(3), &ctx), Value::Int(3));
        assert_eq!(
            evaluate_literal(&Literal::symbol("nope"), &ctx),
            Value::Undefined
        );
    }

    #[test]
    fn test_value_context() {
        let mut inner = BTreeMap::new();
        inner.insert("port".to_string(), Value::Int(443));
        let mut root = BTreeMap::new();
        root.insert("conn".to_string(), Value::Object(inner));
        let ctx = Value::Object(root);

        let ast = parse_filter("conn.port == 443").unwrap();
        assert!(evaluate_filter(&ast, &ctx).unwrap());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::String("x".into()).is_truthy());
    }
}
