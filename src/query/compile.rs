//! Query tree types and the compiler that builds them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use time::PrimitiveDateTime;

use crate::dsl::{
    BooleanNode, CompileError, Literal, Operator, Statement, escape_regex_source, format_timestamp,
};

/// Knobs for query output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryOptions {
    /// Prefix put in front of every operator keyword on output.
    #[serde(default = "default_operator_prefix")]
    pub operator_prefix: String,
    /// Largest subnet that may be expanded into an address list.
    #[serde(default = "default_max_subnet_members")]
    pub max_subnet_members: u64,
}

fn default_operator_prefix() -> String {
    "$".to_string()
}

fn default_max_subnet_members() -> u64 {
    65_536
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            operator_prefix: default_operator_prefix(),
            max_subnet_members: default_max_subnet_members(),
        }
    }
}

/// Structural mirror of a [`BooleanNode`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Field { path: String, condition: Condition },
    Not(Box<QueryNode>),
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `{field: {exists: true}}`
    Exists,
    /// `{field: value}`
    Equals(QueryValue),
    /// `{field: {op: value}}`
    Compare(QueryOp, QueryValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Regex,
}

impl QueryOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            QueryOp::Ne => "ne",
            QueryOp::Lt => "lt",
            QueryOp::Lte => "lte",
            QueryOp::Gt => "gt",
            QueryOp::Gte => "gte",
            QueryOp::In => "in",
            QueryOp::Regex => "regex",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    String(String),
    Int(i64),
    DateTime(PrimitiveDateTime),
    /// Pattern text and flag letters, rendered as `/pattern/flags`.
    Regex { pattern: String, flags: String },
    List(Vec<QueryValue>),
}

impl QueryValue {
    pub fn to_json(&self) -> Json {
        match self {
            QueryValue::String(s) => Json::String(s.clone()),
            QueryValue::Int(n) => Json::from(*n),
            QueryValue::DateTime(ts) => Json::String(format_timestamp(ts)),
            QueryValue::Regex { pattern, flags } => {
                Json::String(format!("/{}/{}", escape_regex_source(pattern), flags))
            }
            QueryValue::List(items) => Json::Array(items.iter().map(QueryValue::to_json).collect()),
        }
    }
}

fn keyed(key: String, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(key, value);
    Json::Object(map)
}

impl QueryNode {
    /// Serialize to JSON, writing each keyword as `prefix + keyword`.
    pub fn to_json(&self, prefix: &str) -> Json {
        match self {
            QueryNode::Field { path, condition } => {
                let value = match condition {
                    Condition::Exists => keyed(format!("{}exists", prefix), Json::Bool(true)),
                    Condition::Equals(value) => value.to_json(),
                    Condition::Compare(op, value) => {
                        keyed(format!("{}{}", prefix, op.keyword()), value.to_json())
                    }
                };
                keyed(path.clone(), value)
            }
            QueryNode::Not(inner) => keyed(format!("{}not", prefix), inner.to_json(prefix)),
            QueryNode::And(items) => keyed(
                format!("{}and", prefix),
                Json::Array(items.iter().map(|q| q.to_json(prefix)).collect()),
            ),
            QueryNode::Or(items) => keyed(
                format!("{}or", prefix),
                Json::Array(items.iter().map(|q| q.to_json(prefix)).collect()),
            ),
        }
    }
}

fn compile_value(literal: &Literal, options: &QueryOptions) -> Result<QueryValue, CompileError> {
    match literal {
        Literal::String(s) => Ok(QueryValue::String(s.clone())),
        Literal::Int(n) => Ok(QueryValue::Int(*n)),
        Literal::DateTime(ts) => Ok(QueryValue::DateTime(*ts)),
        Literal::Regex(rex) => Ok(QueryValue::Regex {
            pattern: rex.pattern().to_string(),
            flags: rex.flags().to_string(),
        }),
        Literal::Subnet(subnet) => {
            if subnet.size() > options.max_subnet_members {
                return Err(CompileError::new(format!(
                    "subnet {} has {} addresses, more than the {} allowed",
                    subnet,
                    subnet.size(),
                    options.max_subnet_members
                )));
            }
            Ok(QueryValue::List(
                subnet
                    .members()
                    .map(|ip| QueryValue::String(ip.to_string()))
                    .collect(),
            ))
        }
        Literal::List(items) => items
            .iter()
            .map(|item| compile_value(item, options))
            .collect::<Result<Vec<_>, _>>()
            .map(QueryValue::List),
        Literal::Symbol(path) => Err(CompileError::new(format!(
            "right-hand side '{}' is a field reference; only literal values can be compared",
            path.as_str()
        ))),
    }
}

fn compile_statement(
    statement: &Statement,
    options: &QueryOptions,
) -> Result<QueryNode, CompileError> {
    let Literal::Symbol(path) = &statement.lhs else {
        return Err(CompileError::new(format!(
            "left-hand side of '{}' must be a field reference, found {} literal",
            statement,
            statement.lhs.kind()
        )));
    };

    let condition = match &statement.comparison {
        None => Condition::Exists,
        Some((op, rhs)) => {
            let value = compile_value(rhs, options)?;
            match op {
                Operator::Eq => Condition::Equals(value),
                Operator::Ne => Condition::Compare(QueryOp::Ne, value),
                Operator::Lt => Condition::Compare(QueryOp::Lt, value),
                Operator::Le => Condition::Compare(QueryOp::Lte, value),
                Operator::Gt => Condition::Compare(QueryOp::Gt, value),
                Operator::Ge => Condition::Compare(QueryOp::Gte, value),
                Operator::In => match value {
                    list @ QueryValue::List(_) => Condition::Compare(QueryOp::In, list),
                    // The `in` operator takes an array.
                    scalar => Condition::Compare(QueryOp::In, QueryValue::List(vec![scalar])),
                },
                Operator::Match => Condition::Compare(QueryOp::Regex, value),
            }
        }
    };

    Ok(QueryNode::Field {
        path: path.as_str().to_string(),
        condition,
    })
}

fn compile_node(ast: &BooleanNode, options: &QueryOptions) -> Result<QueryNode, CompileError> {
    match ast {
        BooleanNode::Leaf(statement) => compile_statement(statement, options),
        BooleanNode::Not(inner) => Ok(QueryNode::Not(Box::new(compile_node(inner, options)?))),
        BooleanNode::And(items) => items
            .iter()
            .map(|item| compile_node(item, options))
            .collect::<Result<Vec<_>, _>>()
            .map(QueryNode::And),
        BooleanNode::Or(items) => items
            .iter()
            .map(|item| compile_node(item, options))
            .collect::<Result<Vec<_>, _>>()
            .map(QueryNode::Or),
    }
}

/// Compile a filter tree into a query tree.
pub fn compile_query(ast: &BooleanNode, options: &QueryOptions) -> Result<QueryNode, CompileError> {
    let query = compile_node(ast, options)?;
    tracing::debug!(statements = ast.statement_count(), "compiled query");
    Ok(query)
}
