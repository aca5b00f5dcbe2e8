//! Parser for the filter language.
//!
//! Grammar (in rough EBNF):
//!
//! filter    = or_expr EOF
//! or_expr   = and_expr ("or" and_expr)*
//! and_expr  = not_expr ("and" not_expr)*
//! not_expr  = "not" not_expr | primary
//! primary   = "(" or_expr ")" | statement
//! statement = lhs (compare_op rhs)?
//! lhs       = SYMBOL | value
//! rhs       = SYMBOL | SUBNET | list | value | REGEX
//! list      = value ("," value)+
//! value     = STRING | INTEGER | TIMESTAMP

use super::ast::{BooleanNode, Literal, Operator, Statement};
use super::error::SyntaxError;
use super::lexer::{Spanned, Token, tokenize};

/// Parser state.
struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

fn describe(token: &Token) -> String {
    match token {
        Token::Literal(lit) => format!("{} literal {}", lit.kind(), lit),
        Token::Symbol(name) => format!("symbol '{}'", name),
        Token::And => "'and'".to_string(),
        Token::Or => "'or'".to_string(),
        Token::Not => "'not'".to_string(),
        Token::In => "'in'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Eof => "end of input".to_string(),
        op => match compare_op(op) {
            Some(op) => format!("'{}'", op),
            None => format!("{:?}", op),
        },
    }
}

fn compare_op(token: &Token) -> Option<Operator> {
    match token {
        Token::Eq => Some(Operator::Eq),
        Token::Ne => Some(Operator::Ne),
        Token::Lt => Some(Operator::Lt),
        Token::Le => Some(Operator::Le),
        Token::Gt => Some(Operator::Gt),
        Token::Ge => Some(Operator::Ge),
        Token::In => Some(Operator::In),
        Token::Match => Some(Operator::Match),
        _ => None,
    }
}

/// Scalar values allowed on the left-hand side and inside lists.
fn is_value(literal: &Literal) -> bool {
    matches!(
        literal,
        Literal::String(_) | Literal::Int(_) | Literal::DateTime(_)
    )
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Spanned {
        // tokenize() always ends the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error_at(&self, spanned: &Spanned, expected: &str) -> SyntaxError {
        SyntaxError::new(
            format!("expected {}, found {}", expected, describe(&spanned.token)),
            spanned.offset,
        )
    }

    /// Parse OR expression: and_expr ("or" and_expr)*
    fn parse_or_expr(&mut self) -> Result<BooleanNode, SyntaxError> {
        let mut items = vec![self.parse_and_expr()?];

        while matches!(self.peek().token, Token::Or) {
            self.advance(); // consume or
            items.push(self.parse_and_expr()?);
        }

        Ok(match items.len() {
            1 => items.remove(0),
            _ => BooleanNode::Or(items),
        })
    }

    /// Parse AND expression: not_expr ("and" not_expr)*
    fn parse_and_expr(&mut self) -> Result<BooleanNode, SyntaxError> {
        let mut items = vec![self.parse_not_expr()?];

        while matches!(self.peek().token, Token::And) {
            self.advance(); // consume and
            items.push(self.parse_not_expr()?);
        }

        Ok(match items.len() {
            1 => items.remove(0),
            _ => BooleanNode::And(items),
        })
    }

    /// Parse NOT expression: "not" not_expr | primary
    fn parse_not_expr(&mut self) -> Result<BooleanNode, SyntaxError> {
        if matches!(self.peek().token, Token::Not) {
            self.advance(); // consume not
            let inner = self.parse_not_expr()?;
            Ok(BooleanNode::Not(Box::new(inner)))
        } else {
            self.parse_primary()
        }
    }

    /// Parse primary expression: "(" or_expr ")" | statement
    fn parse_primary(&mut self) -> Result<BooleanNode, SyntaxError> {
        if matches!(self.peek().token, Token::LParen) {
            self.advance(); // consume (
            let inner = self.parse_or_expr()?;
            let close = self.advance();
            if close.token != Token::RParen {
                return Err(self.error_at(&close, "')'"));
            }
            return Ok(inner);
        }

        self.parse_statement().map(BooleanNode::Leaf)
    }

    /// Parse statement: lhs (compare_op rhs)?
    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let start = self.advance();
        let lhs = match start.token {
            Token::Symbol(name) => Literal::symbol(name),
            Token::Literal(lit) if is_value(&lit) => lit,
            Token::Literal(lit) => {
                return Err(SyntaxError::new(
                    format!(
                        "{} literal {} cannot start a statement; put a symbol or value on the left",
                        lit.kind(),
                        lit
                    ),
                    start.offset,
                ));
            }
            other => {
                let spanned = Spanned {
                    token: other,
                    offset: start.offset,
                };
                return Err(self.error_at(&spanned, "a symbol, value or '('"));
            }
        };

        let Some(op) = compare_op(&self.peek().token) else {
            return Ok(Statement::exists(lhs));
        };
        self.advance(); // consume operator

        let rhs = self.parse_rhs()?;
        Ok(Statement::new(lhs, op, rhs))
    }

    /// Parse right-hand side: SYMBOL | SUBNET | list | value | REGEX
    fn parse_rhs(&mut self) -> Result<Literal, SyntaxError> {
        let start = self.advance();
        match start.token {
            Token::Symbol(name) => Ok(Literal::symbol(name)),
            Token::Literal(lit) if is_value(&lit) => {
                if matches!(self.peek().token, Token::Comma) {
                    self.parse_list(lit)
                } else {
                    Ok(lit)
                }
            }
            Token::Literal(lit) => Ok(lit),
            other => {
                let spanned = Spanned {
                    token: other,
                    offset: start.offset,
                };
                Err(self.error_at(&spanned, "a symbol, value, list, subnet or regex"))
            }
        }
    }

    /// Parse the rest of a list after its first value: ("," value)+
    fn parse_list(&mut self, first: Literal) -> Result<Literal, SyntaxError> {
        let mut items = vec![first];

        while matches!(self.peek().token, Token::Comma) {
            self.advance(); // consume ,
            let next = self.advance();
            match next.token {
                Token::Literal(lit) if is_value(&lit) => items.push(lit),
                _ => return Err(self.error_at(&next, "a string, integer or timestamp list item")),
            }
        }

        Ok(Literal::List(items))
    }
}

/// Parse filter source into an AST.
pub fn parse_filter(input: &str) -> Result<BooleanNode, SyntaxError> {
    let tokens = tokenize(input)?;
    if matches!(tokens.first().map(|s| &s.token), Some(Token::Eof) | None) {
        return Err(SyntaxError::new("empty filter", 0));
    }

    let mut parser = Parser::new(tokens);
    let ast = parser.parse_or_expr()?;

    // Ensure we consumed all tokens
    let next = parser.peek();
    if !matches!(next.token, Token::Eof) {
        return Err(SyntaxError::new(
            format!("unexpected {} after expression", describe(&next.token)),
            next.offset,
        ));
    }

    let ast = ast.flatten();
    tracing::debug!(
        source_len = input.len(),
        statements = ast.statement_count(),
        "parsed filter"
    );
    Ok(ast)
}
