//! Lexer/tokenizer for the filter language.

use winnow::ascii::digit1;
use winnow::combinator::{alt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use super::ast::Literal;
use super::error::SyntaxError;
use super::literal::{
    PResult, SubnetParts, TimestampParts, int_from_digits, regex_body, regex_from_parts,
    subnet_from_parts, subnet_parts, timestamp_from_parts, timestamp_parts, today,
};

/// Token types for the filter language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Values and references
    Literal(Literal), // string, integer, timestamp, regex, subnet
    Symbol(String),   // dotted context path

    // Comparison operators
    Eq,    // ==
    Ne,    // !=
    Lt,    // <
    Le,    // <=
    Gt,    // >
    Ge,    // >=
    Match, // =~
    In,    // in

    // Boolean keywords
    And,
    Or,
    Not,

    // Punctuation
    LParen, // (
    RParen, // )
    Comma,  // ,

    // End of input
    Eof,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Raw token text before literal validation.
#[derive(Debug, Clone)]
enum Lexeme<'i> {
    Punct(Token),
    Word(&'i str),
    Str(&'i str),
    Digits(&'i str),
    Timestamp(TimestampParts<'i>),
    Subnet(SubnetParts<'i>),
    Regex(String, String),
}

/// Lex a word: letter or underscore, then letters, digits, dots, underscores.
fn lex_word<'i>(input: &mut &'i str) -> PResult<Lexeme<'i>> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || c == '_' || c == '.'
        }),
    )
        .take()
        .map(Lexeme::Word)
        .parse_next(input)
}

/// Lex a single- or double-quoted string. A backslash keeps the next
/// character from closing the string; the text is otherwise kept verbatim.
fn lex_string<'i>(input: &mut &'i str) -> PResult<Lexeme<'i>> {
    let quote = one_of(['\'', '"']).parse_next(input)?;
    let body = *input;
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' | '\r' => break,
            c if c == quote => {
                *input = &body[idx + 1..];
                return Ok(Lexeme::Str(&body[..idx]));
            }
            _ => {}
        }
    }

    Err(ErrMode::Cut(ContextError::new()))
}

fn lex_lexeme<'i>(input: &mut &'i str) -> PResult<Lexeme<'i>> {
    alt((
        // Multi-char operators first
        "==".value(Lexeme::Punct(Token::Eq)),
        "!=".value(Lexeme::Punct(Token::Ne)),
        "<=".value(Lexeme::Punct(Token::Le)),
        ">=".value(Lexeme::Punct(Token::Ge)),
        "=~".value(Lexeme::Punct(Token::Match)),
        // Single-char operators
        "<".value(Lexeme::Punct(Token::Lt)),
        ">".value(Lexeme::Punct(Token::Gt)),
        "(".value(Lexeme::Punct(Token::LParen)),
        ")".value(Lexeme::Punct(Token::RParen)),
        ",".value(Lexeme::Punct(Token::Comma)),
        preceded('/', regex_body).map(|(pattern, flags)| Lexeme::Regex(pattern, flags)),
        lex_string,
        // Numeric forms, longest first
        subnet_parts.map(Lexeme::Subnet),
        timestamp_parts.map(Lexeme::Timestamp),
        digit1.map(Lexeme::Digits),
        lex_word,
    ))
    .parse_next(input)
}

pub(crate) fn keyword(word: &str) -> Option<Token> {
    match word.to_ascii_lowercase().as_str() {
        "and" => Some(Token::And),
        "or" => Some(Token::Or),
        "not" => Some(Token::Not),
        "in" => Some(Token::In),
        _ => None,
    }
}

fn to_token(lexeme: Lexeme<'_>, raw: &str, today: time::Date) -> Result<Token, String> {
    let literal = match lexeme {
        Lexeme::Punct(token) => return Ok(token),
        Lexeme::Word(word) => {
            return Ok(keyword(word).unwrap_or_else(|| Token::Symbol(word.to_string())));
        }
        Lexeme::Str(text) => Literal::String(text.to_string()),
        Lexeme::Digits(digits) => Literal::Int(int_from_digits(digits)?),
        Lexeme::Timestamp(parts) => Literal::DateTime(
            timestamp_from_parts(&parts, today)
                .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))?,
        ),
        Lexeme::Subnet(parts) => Literal::Subnet(
            subnet_from_parts(&parts).map_err(|e| format!("invalid subnet '{}': {}", raw, e))?,
        ),
        Lexeme::Regex(pattern, flags) => Literal::Regex(regex_from_parts(&pattern, &flags)?),
    };
    Ok(Token::Literal(literal))
}

fn lex_failure(rest: &str) -> String {
    match rest.chars().next() {
        Some('/') => "unterminated regex literal".to_string(),
        Some('\'') | Some('"') => "unterminated string literal".to_string(),
        Some('=') => "unexpected '=' (use '==' or '=~')".to_string(),
        Some(c) => format!("unexpected character '{}'", c),
        None => "unexpected end of input".to_string(),
    }
}

/// Tokenize the entire input.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let today = today();
    let mut remaining = input;
    let mut tokens = Vec::new();

    loop {
        remaining = remaining.trim_start();
        let offset = input.len() - remaining.len();
        if remaining.is_empty() {
            tokens.push(Spanned {
                token: Token::Eof,
                offset,
            });
            break;
        }

        let before = remaining;
        let lexeme = lex_lexeme
            .parse_next(&mut remaining)
            .map_err(|_| SyntaxError::new(lex_failure(before), offset))?;
        let raw = &before[..before.len() - remaining.len()];
        let token = to_token(lexeme, raw, today).map_err(|e| SyntaxError::new(e, offset))?;
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("symbol == 'value'"),
            vec![
                Token::Symbol("symbol".into()),
                Token::Eq,
                Token::Literal(Literal::String("value".into())),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("NOT a AnD b or c In d"),
            vec![
                Token::Not,
                Token::Symbol("a".into()),
                Token::And,
                Token::Symbol("b".into()),
                Token::Or,
                Token::Symbol("c".into()),
                Token::In,
                Token::Symbol("d".into()),
                Token::Eof,
            ]
        );
        // Keywords only match whole words.
        assert_eq!(kinds("index")[0], Token::Symbol("index".into()));
    }

    #[test]
    fn test_numeric_forms() {
        let tokens = kinds("10.0.0.0/8 2015-03-01 12:00:00 42");
        assert_eq!(tokens.len(), 4);
        assert!(matches!(tokens[0], Token::Literal(Literal::Subnet(_))));
        assert!(matches!(tokens[1], Token::Literal(Literal::DateTime(_))));
        assert_eq!(tokens[2], Token::Literal(Literal::Int(42)));
        assert_eq!(tokens[3], Token::Eof);

        let tokens = kinds("2015-03-01, 12:00:00");
        assert!(matches!(tokens[0], Token::Literal(Literal::DateTime(_))));
        assert_eq!(tokens[1], Token::Comma);
        assert!(matches!(tokens[2], Token::Literal(Literal::DateTime(_))));
    }

    #[test]
    fn test_datetime_with_space_is_one_token() {
        let tokens = kinds("2015-03-01 12:00:00");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("== != < <= > >= =~ , ( )"),
            vec![
                Token::Eq,
                Token::Ne,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::Match,
                Token::Comma,
                Token::LParen,
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_offsets() {
        let tokens = tokenize("a  ==\t'x'").unwrap();
        let offsets: Vec<usize> = tokens.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_string_keeps_backslashes() {
        assert_eq!(
            kinds(r"'it\'s'")[0],
            Token::Literal(Literal::String(r"it\'s".into()))
        );
    }

    #[test]
    fn test_regex_ending_in_escaped_backslash() {
        match &kinds(r"path =~ /a\\/i")[2] {
            Token::Literal(Literal::Regex(rex)) => {
                assert_eq!(rex.pattern(), r"a\\");
                assert!(rex.is_match(r"A\"));
            }
            other => panic!("expected regex, got {:?}", other),
        }
    }

    #[test]
    fn test_lexer_errors() {
        let err = tokenize("a == 'open").unwrap_err();
        assert_eq!(err.offset, 5);
        assert!(err.message.contains("unterminated string"));

        let err = tokenize("a =~ /abc").unwrap_err();
        assert!(err.message.contains("unterminated regex"));

        let err = tokenize("a = 1").unwrap_err();
        assert_eq!(err.offset, 2);

        let err = tokenize("ip in 10.0.0.0/-1").unwrap_err();
        assert_eq!(err.offset, 6);
        assert!(err.message.contains("subnet"));

        assert!(tokenize("a =~ /x/q").is_err());
        assert!(tokenize("a == 99999999999999999999").is_err());
    }
}
