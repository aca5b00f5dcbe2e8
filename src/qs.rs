//! Query-string front end.
//!
//! Turns `field__op=value&other__sub__op=value` into filter source, e.g.
//! `field == 'value' and other.sub == 'value'`, which is then parsed like
//! any other filter.

use crate::dsl::{BooleanNode, SyntaxError, keyword, parse_filter};

/// How a suffix is written in filter source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expansion {
    /// `field op 'value'`
    Quoted(&'static str),
    /// `field op 123`
    Integer(&'static str),
    /// `field =~ /prefix value suffix/flags`
    Pattern {
        prefix: &'static str,
        suffix: &'static str,
        flags: &'static str,
    },
}

fn expansion(suffix: &str) -> Option<Expansion> {
    let pattern = |prefix, suffix, flags| Expansion::Pattern {
        prefix,
        suffix,
        flags,
    };
    Some(match suffix {
        "eq" => Expansion::Quoted("=="),
        "ne" => Expansion::Quoted("!="),
        "lt" => Expansion::Integer("<"),
        "le" => Expansion::Integer("<="),
        "gt" => Expansion::Integer(">"),
        "ge" => Expansion::Integer(">="),
        "contains" => pattern("", "", ""),
        "icontains" => pattern("", "", "i"),
        "startswith" => pattern("^", "", ""),
        "istartswith" => pattern("^", "", "i"),
        "endswith" => pattern("", "$", ""),
        "iendswith" => pattern("", "$", "i"),
        _ => return None,
    })
}

fn percent_decode(text: &str, offset: usize) -> Result<String, SyntaxError> {
    urlencoding::decode(&text.replace('+', " "))
        .map(|decoded| decoded.into_owned())
        .map_err(|_| SyntaxError::new(format!("invalid percent-encoding in '{}'", text), offset))
}

fn quote(value: &str, offset: usize) -> Result<String, SyntaxError> {
    if value.ends_with('\\') {
        return Err(SyntaxError::new(
            format!("value '{}' cannot end with a backslash", value),
            offset,
        ));
    }
    if !value.contains('\'') {
        Ok(format!("'{}'", value))
    } else if !value.contains('"') {
        Ok(format!("\"{}\"", value))
    } else {
        Err(SyntaxError::new(
            format!("value '{}' contains both quote characters", value),
            offset,
        ))
    }
}

/// A letter or underscore, then letters, digits or underscores; keywords
/// are reserved.
fn is_symbol_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    let leading = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    leading && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && keyword(segment).is_none()
}

fn decode_chunk(chunk: &str, offset: usize) -> Result<String, SyntaxError> {
    let Some((raw_key, raw_value)) = chunk.split_once('=') else {
        return Err(SyntaxError::new(
            format!("query-string chunk '{}' has no '='", chunk),
            offset,
        ));
    };
    let key = percent_decode(raw_key, offset)?;
    let value = percent_decode(raw_value, offset + raw_key.len() + 1)?;

    let Some((path, suffix)) = key.rsplit_once("__") else {
        return Err(SyntaxError::new(
            format!("key '{}' has no '__<operator>' suffix", key),
            offset,
        ));
    };
    if path.is_empty() {
        return Err(SyntaxError::new(format!("key '{}' names no field", key), offset));
    }
    let segments: Vec<&str> = path.split("__").collect();
    if let Some(bad) = segments.iter().find(|segment| !is_symbol_segment(segment)) {
        return Err(SyntaxError::new(
            format!("key '{}' has invalid field name segment '{}'", key, bad),
            offset,
        ));
    }
    let path = segments.join(".");

    let expansion = expansion(suffix).ok_or_else(|| {
        SyntaxError::new(format!("unknown query-string operator '{}'", suffix), offset)
    })?;

    let value_offset = offset + raw_key.len() + 1;
    Ok(match expansion {
        Expansion::Quoted(op) => format!("{} {} {}", path, op, quote(&value, value_offset)?),
        Expansion::Integer(op) => {
            let number = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|n| i64::try_from(*n).is_ok())
                .ok_or_else(|| {
                    SyntaxError::new(
                        format!("operator '{}' expects a non-negative integer, got '{}'", suffix, value),
                        value_offset,
                    )
                })?;
            format!("{} {} {}", path, op, number)
        }
        Expansion::Pattern {
            prefix,
            suffix,
            flags,
        } => {
            if value.ends_with('\\') {
                return Err(SyntaxError::new(
                    format!("pattern '{}' cannot end with a backslash", value),
                    value_offset,
                ));
            }
            format!(
                "{} =~ /{}{}{}/{}",
                path,
                prefix,
                value.replace('/', "\\/"),
                suffix,
                flags
            )
        }
    })
}

/// Decode every non-empty chunk, pairing its filter source with the chunk's
/// offset in the query string.
fn decode_chunks(qs: &str) -> Result<Vec<(usize, String)>, SyntaxError> {
    let (mut offset, qs) = match qs.strip_prefix('?') {
        Some(rest) => (1, rest),
        None => (0, qs),
    };
    let mut statements = Vec::new();

    for chunk in qs.split('&') {
        if !chunk.is_empty() {
            statements.push((offset, decode_chunk(chunk, offset)?));
        }
        offset += chunk.len() + 1;
    }

    if statements.is_empty() {
        return Err(SyntaxError::new("empty query string", 0));
    }
    tracing::debug!(chunks = statements.len(), "decoded query string");
    Ok(statements)
}

fn join(statements: &[(usize, String)]) -> String {
    statements
        .iter()
        .map(|(_, source)| source.as_str())
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Decode a query string into filter source.
pub fn decode_query_string(qs: &str) -> Result<String, SyntaxError> {
    Ok(join(&decode_chunks(qs)?))
}

/// Decode a query string and parse the resulting filter source.
///
/// Parse errors point at the start of the chunk that produced the failing
/// statement.
pub fn parse_query_string(qs: &str) -> Result<BooleanNode, SyntaxError> {
    let statements = decode_chunks(qs)?;
    let source = join(&statements);

    parse_filter(&source).map_err(|err| {
        let mut start = 0;
        let mut chunk_offset = 0;
        for (offset, statement) in &statements {
            if start > err.offset {
                break;
            }
            chunk_offset = *offset;
            start += statement.len() + " and ".len();
        }
        SyntaxError::new(err.message, chunk_offset)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operators() {
        let cases = [
            ("symbol__eq=value", "symbol == 'value'"),
            ("symbol__ne=value", "symbol != 'value'"),
            ("symbol__lt=1", "symbol < 1"),
            ("symbol__le=1", "symbol <= 1"),
            ("symbol__gt=1", "symbol > 1"),
            ("symbol__ge=1", "symbol >= 1"),
        ];
        for (qs, expected) in cases {
            assert_eq!(decode_query_string(qs).unwrap(), expected);
        }
    }

    #[test]
    fn test_regex_operators() {
        let cases = [
            ("symbol__contains=pattern", "symbol =~ /pattern/"),
            ("symbol__icontains=pattern", "symbol =~ /pattern/i"),
            ("symbol__startswith=pattern", "symbol =~ /^pattern/"),
            ("symbol__istartswith=pattern", "symbol =~ /^pattern/i"),
            ("symbol__endswith=pattern", "symbol =~ /pattern$/"),
            ("symbol__iendswith=pattern", "symbol =~ /pattern$/i"),
            ("path__contains=a/b", "path =~ /a\\/b/"),
        ];
        for (qs, expected) in cases {
            assert_eq!(decode_query_string(qs).unwrap(), expected);
        }
    }

    #[test]
    fn test_nested_keys_and_joining() {
        assert_eq!(
            decode_query_string("symbol__key__eq=value&age__gt=18").unwrap(),
            "symbol.key == 'value' and age > 18"
        );
    }

    #[test]
    fn test_percent_decoding() {
        assert_eq!(
            decode_query_string("name__eq=John%20Smith&city__eq=New+York").unwrap(),
            "name == 'John Smith' and city == 'New York'"
        );
        assert_eq!(
            decode_query_string("name__eq=O%27Brien").unwrap(),
            "name == \"O'Brien\""
        );
    }

    #[test]
    fn test_errors() {
        let err = decode_query_string("a__eq=1&b__like=x").unwrap_err();
        assert_eq!(err.offset, 8);
        assert!(err.message.contains("like"));

        assert!(decode_query_string("").is_err());
        assert!(decode_query_string("symbol=1").is_err());
        assert!(decode_query_string("symbol__eq").is_err());
        assert!(decode_query_string("__eq=1").is_err());
        assert!(decode_query_string("age__gt=abc").is_err());
        assert!(decode_query_string("age__gt=-1").is_err());
        assert!(decode_query_string("q__eq=%27%22").is_err());
    }

    #[test]
    fn test_parse_query_string() {
        let ast = parse_query_string("age__gt=18").unwrap();
        assert_eq!(ast, parse_filter("age > 18").unwrap());

        assert!(parse_query_string("name__contains=(").is_err());
    }

    #[test]
    fn test_parse_errors_point_at_the_chunk() {
        let err = parse_query_string("a__eq=1&name__contains=(").unwrap_err();
        assert_eq!(err.offset, 8);

        let err = parse_query_string("?name__contains=(").unwrap_err();
        assert_eq!(err.offset, 1);
    }

    #[test]
    fn test_keys_must_be_field_paths() {
        let err = decode_query_string("a%3D%3D1%20or%20b__eq=x").unwrap_err();
        assert_eq!(err.offset, 0);
        assert!(err.message.contains("segment"));

        let err = decode_query_string("ok__eq=1&user__or__eq=x").unwrap_err();
        assert_eq!(err.offset, 9);

        for qs in ["1a__eq=x", "a.b__eq=x", "a%20b__eq=x", "a____eq=x", "NOT__eq=x"] {
            assert!(decode_query_string(qs).is_err(), "{}", qs);
        }
        assert_eq!(
            decode_query_string("_a__b1__eq=x").unwrap(),
            "_a.b1 == 'x'"
        );
    }
}
