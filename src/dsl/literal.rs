//! Typed atomic values: integers, timestamps, regexes and IPv4 subnets.
//!
//! The winnow recognizers here only split a token into its raw parts; the
//! `*_from_parts` functions apply the bounds checks and build the typed value.
//! Keeping the two apart lets the lexer report precise offsets while the
//! evaluator reuses the timestamp grammar to coerce context strings.

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use winnow::ascii::{digit1, space1};
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;
use winnow::token::take_while;

pub(crate) type PResult<T> = winnow::ModalResult<T>;

// ============ Integers ============

pub(crate) fn int_from_digits(digits: &str) -> Result<i64, String> {
    digits
        .parse::<i64>()
        .map_err(|_| format!("integer literal '{}' does not fit in 64 bits", digits))
}

// ============ Timestamps ============

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DateParts<'i> {
    pub year: &'i str,
    pub month: &'i str,
    pub day: &'i str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TimeParts<'i> {
    pub hour: &'i str,
    pub minute: &'i str,
    pub second: &'i str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TimestampParts<'i> {
    Date(DateParts<'i>),
    Time(TimeParts<'i>),
    DateTime(DateParts<'i>, TimeParts<'i>),
}

fn date_parts<'i>(input: &mut &'i str) -> PResult<DateParts<'i>> {
    (digit1, '-', digit1, '-', digit1)
        .map(|(year, _, month, _, day)| DateParts { year, month, day })
        .parse_next(input)
}

fn time_parts<'i>(input: &mut &'i str) -> PResult<TimeParts<'i>> {
    (digit1, ':', digit1, ':', digit1)
        .map(|(hour, _, minute, _, second)| TimeParts {
            hour,
            minute,
            second,
        })
        .parse_next(input)
}

/// Recognize `date [T|space] time`, `date` or `time`, longest first.
pub(crate) fn timestamp_parts<'i>(input: &mut &'i str) -> PResult<TimestampParts<'i>> {
    alt((
        (date_parts, opt(alt(('T'.void(), space1.void()))), time_parts)
            .map(|(date, _, time)| TimestampParts::DateTime(date, time)),
        date_parts.map(TimestampParts::Date),
        time_parts.map(TimestampParts::Time),
    ))
    .parse_next(input)
}

fn component(text: &str, name: &str, max_digits: usize) -> Result<u16, String> {
    if text.len() > max_digits {
        return Err(format!(
            "{} '{}' has more than {} digits",
            name, text, max_digits
        ));
    }
    text.parse::<u16>()
        .map_err(|_| format!("invalid {} '{}'", name, text))
}

fn date_from_parts(parts: &DateParts<'_>) -> Result<Date, String> {
    let year = component(parts.year, "year", 4)?;
    let month = component(parts.month, "month", 2)?;
    let day = component(parts.day, "day", 2)?;

    let month = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .ok_or_else(|| format!("month {} is out of range", month))?;
    // `component` caps the day at two digits.
    Date::from_calendar_date(i32::from(year), month, day as u8)
        .map_err(|e| format!("invalid date {}-{}-{}: {}", parts.year, parts.month, parts.day, e))
}

fn time_from_parts(parts: &TimeParts<'_>) -> Result<Time, String> {
    let hour = component(parts.hour, "hour", 2)?;
    let minute = component(parts.minute, "minute", 2)?;
    let second = component(parts.second, "second", 2)?;

    Time::from_hms(hour as u8, minute as u8, second as u8).map_err(|e| {
        format!(
            "invalid time {}:{}:{}: {}",
            parts.hour, parts.minute, parts.second, e
        )
    })
}

/// Build a timestamp. A bare time is anchored to `today`.
pub(crate) fn timestamp_from_parts(
    parts: &TimestampParts<'_>,
    today: Date,
) -> Result<PrimitiveDateTime, String> {
    match parts {
        TimestampParts::Date(date) => Ok(PrimitiveDateTime::new(
            date_from_parts(date)?,
            Time::MIDNIGHT,
        )),
        TimestampParts::Time(time) => Ok(PrimitiveDateTime::new(today, time_from_parts(time)?)),
        TimestampParts::DateTime(date, time) => Ok(PrimitiveDateTime::new(
            date_from_parts(date)?,
            time_from_parts(time)?,
        )),
    }
}

/// The calendar date bare time literals are anchored to.
pub(crate) fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Interpret a context string as a timestamp.
///
/// Accepts the literal forms (`2015-03-01`, `2015-03-01T12:00:00`,
/// `2015-03-01 12:00:00`, `12:00:00`) and RFC 3339; offsets are normalized
/// to UTC.
pub fn parse_timestamp(text: &str) -> Option<PrimitiveDateTime> {
    let text = text.trim();
    if let Ok(parts) = timestamp_parts.parse(text) {
        return timestamp_from_parts(&parts, today()).ok();
    }

    let dt = OffsetDateTime::parse(text, &Rfc3339).ok()?;
    let utc = dt.to_offset(UtcOffset::UTC);
    Some(PrimitiveDateTime::new(utc.date(), utc.time()))
}

pub fn format_timestamp(ts: &PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

// ============ Regex ============

/// Flags accepted after the closing slash of a regex literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

impl RegexFlags {
    /// Parse flag letters; order does not matter and repeats are ignored.
    pub fn from_letters(letters: &str) -> Result<Self, char> {
        let mut flags = RegexFlags::default();
        for letter in letters.chars() {
            match letter {
                'i' => flags.case_insensitive = true,
                'm' => flags.multi_line = true,
                's' => flags.dot_matches_new_line = true,
                other => return Err(other),
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for RegexFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.case_insensitive {
            write!(f, "i")?;
        }
        if self.multi_line {
            write!(f, "m")?;
        }
        if self.dot_matches_new_line {
            write!(f, "s")?;
        }
        Ok(())
    }
}

/// A regex literal, compiled when parsed.
#[derive(Debug, Clone)]
pub struct RegexLiteral {
    pattern: String,
    flags: RegexFlags,
    matcher: Regex,
}

impl RegexLiteral {
    pub fn new(pattern: &str, flags: RegexFlags) -> Result<Self, regex::Error> {
        let matcher = RegexBuilder::new(pattern)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .dot_matches_new_line(flags.dot_matches_new_line)
            .build()?;

        Ok(RegexLiteral {
            pattern: pattern.to_string(),
            flags,
            matcher,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    /// True if the pattern matches anywhere in `haystack`.
    pub fn is_match(&self, haystack: &str) -> bool {
        self.matcher.is_match(haystack)
    }
}

impl PartialEq for RegexLiteral {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

impl fmt::Display for RegexLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", escape_regex_source(&self.pattern), self.flags)
    }
}

/// Write a pattern so that [`regex_body`] reads it back: bare slashes become
/// `\/`, and backslash escapes stay paired with the character they escape.
pub(crate) fn escape_regex_source(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '/' => out.push_str("\\/"),
            c => out.push(c),
        }
    }
    out
}

/// Lex the body and flags of `/pattern/flags`. The opening slash is consumed
/// by the caller; `\/` stands for a literal slash inside the pattern.
pub(crate) fn regex_body(input: &mut &str) -> PResult<(String, String)> {
    let mut pattern = String::new();
    loop {
        let rest: &str = *input;
        let mut chars = rest.chars();
        match chars.next() {
            None => {
                return Err(winnow::error::ErrMode::Cut(
                    winnow::error::ContextError::new(),
                ));
            }
            Some('/') => {
                *input = &rest[1..];
                break;
            }
            Some('\\') => match chars.next() {
                Some('/') => {
                    pattern.push('/');
                    *input = &rest[2..];
                }
                Some(escaped) => {
                    pattern.push('\\');
                    pattern.push(escaped);
                    *input = &rest[1 + escaped.len_utf8()..];
                }
                None => {
                    return Err(winnow::error::ErrMode::Cut(
                        winnow::error::ContextError::new(),
                    ));
                }
            },
            Some(c) => {
                pattern.push(c);
                *input = &rest[c.len_utf8()..];
            }
        }
    }

    let flags = take_while(0.., |c: char| c.is_ascii_alphabetic()).parse_next(input)?;
    Ok((pattern, flags.to_string()))
}

pub(crate) fn regex_from_parts(pattern: &str, flags: &str) -> Result<RegexLiteral, String> {
    let flags = RegexFlags::from_letters(flags)
        .map_err(|c| format!("unknown regex flag '{}' (expected i, m or s)", c))?;
    RegexLiteral::new(pattern, flags).map_err(|e| format!("invalid regex /{}/: {}", pattern, e))
}

// ============ Subnets ============

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    address: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Option<Self> {
        (prefix <= 32).then_some(Subnet { address, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.mask())
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) | !self.mask())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == u32::from(self.network())
    }

    /// Number of addresses in the network, network and broadcast included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Every address from network to broadcast.
    pub fn members(&self) -> impl Iterator<Item = Ipv4Addr> {
        (u32::from(self.network())..=u32::from(self.broadcast())).map(Ipv4Addr::from)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SubnetParts<'i> {
    pub octets: [&'i str; 4],
    pub prefix: Option<&'i str>,
}

/// Recognize `a.b.c.d` with an optional `/digits` tail. Bounds are checked
/// by [`subnet_from_parts`] so a bad prefix is reported, not backtracked.
pub(crate) fn subnet_parts<'i>(input: &mut &'i str) -> PResult<SubnetParts<'i>> {
    (
        digit1,
        '.',
        digit1,
        '.',
        digit1,
        '.',
        digit1,
        opt(preceded('/', take_while(0.., |c: char| c.is_ascii_digit()))),
    )
        .map(|(a, _, b, _, c, _, d, prefix)| SubnetParts {
            octets: [a, b, c, d],
            prefix,
        })
        .parse_next(input)
}

pub(crate) fn subnet_from_parts(parts: &SubnetParts<'_>) -> Result<Subnet, String> {
    let mut octets = [0u8; 4];
    for (slot, text) in octets.iter_mut().zip(parts.octets) {
        *slot = match text.parse::<u8>() {
            Ok(octet) if text.len() <= 3 => octet,
            _ => return Err(format!("octet '{}' is not in 0-255", text)),
        };
    }

    let prefix = match parts.prefix {
        None => return Err("subnet is missing its '/prefix' length".to_string()),
        Some(p) => match p.parse::<u8>() {
            Ok(n) if n <= 32 && p.len() <= 2 => n,
            _ => return Err(format!("prefix length '{}' is not in 0-32", p)),
        },
    };

    Subnet::new(Ipv4Addr::from(octets), prefix)
        .ok_or_else(|| format!("prefix length {} is not in 0-32", prefix))
}

impl FromStr for Subnet {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let parts = subnet_parts
            .parse(text.trim())
            .map_err(|_| format!("invalid subnet '{}'", text))?;
        subnet_from_parts(&parts).map_err(|e| format!("invalid subnet '{}': {}", text, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn subnet_size_and_membership() {
        let subnet: Subnet = "192.168.0.0/16".parse().unwrap();
        assert_eq!(subnet.size(), 65536);
        assert_eq!(subnet.network(), Ipv4Addr::new(192, 168, 0, 0));
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 1, 5)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn subnet_host_bits_are_masked() {
        let subnet: Subnet = "172.16.5.4/8".parse().unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(172, 0, 0, 0));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(172, 255, 255, 255));
        assert_eq!(subnet.to_string(), "172.16.5.4/8");
    }

    #[test]
    fn subnet_edges() {
        let all: Subnet = "0.0.0.0/0".parse().unwrap();
        assert_eq!(all.size(), 1u64 << 32);
        assert!(all.contains(Ipv4Addr::new(8, 8, 8, 8)));

        let host: Subnet = "127.0.0.1/32".parse().unwrap();
        let members: Vec<_> = host.members().collect();
        assert_eq!(members, vec![Ipv4Addr::new(127, 0, 0, 1)]);
    }

    #[test]
    fn subnet_bounds_are_rejected() {
        assert!("300.1.1.1/8".parse::<Subnet>().is_err());
        assert!("1.1.1.1/33".parse::<Subnet>().is_err());
        assert!("0.0.0.0".parse::<Subnet>().is_err());
        assert!("10.0.0.0/".parse::<Subnet>().is_err());
        assert!("0001.0.0.0/8".parse::<Subnet>().is_err());
    }

    #[test]
    fn regex_flags_are_order_insensitive() {
        let a = RegexFlags::from_letters("ims").unwrap();
        let b = RegexFlags::from_letters("smii").unwrap();
        assert_eq!(a, b);
        assert_eq!(b.to_string(), "ims");
        assert_eq!(RegexFlags::from_letters("x"), Err('x'));
    }

    #[test]
    fn regex_case_insensitive_flag() {
        let rex = regex_from_parts("abc", "i").unwrap();
        assert!(rex.is_match("xxABCxx"));
        assert!(regex_from_parts("abc", "").unwrap().is_match("abc"));
        assert!(!regex_from_parts("abc", "").unwrap().is_match("ABC"));
    }

    #[test]
    fn regex_compile_errors_are_reported() {
        assert!(regex_from_parts("not[a-valid", "").is_err());
        assert!(regex_from_parts("not(a-valid", "").is_err());
    }

    #[test]
    fn regex_body_handles_escaped_slash() {
        let mut input = "a\\/b/i rest";
        let (pattern, flags) = regex_body(&mut input).unwrap();
        assert_eq!(pattern, "a/b");
        assert_eq!(flags, "i");
        assert_eq!(input, " rest");
    }

    #[test]
    fn regex_body_keeps_other_escapes_paired() {
        let mut input = r"a\\/ rest";
        let (pattern, _) = regex_body(&mut input).unwrap();
        assert_eq!(pattern, r"a\\");
        assert_eq!(input, " rest");

        let mut input = r"a\\\//";
        let (pattern, _) = regex_body(&mut input).unwrap();
        assert_eq!(pattern, r"a\\/");

        let mut input = r"\d+\.\d/";
        let (pattern, _) = regex_body(&mut input).unwrap();
        assert_eq!(pattern, r"\d+\.\d");

        let mut input = r"a\";
        assert!(regex_body(&mut input).is_err());
    }

    #[test]
    fn regex_display_reads_back() {
        for pattern in [r"a\\", r"a\\/", "a/b", r"\d+\.\d"] {
            let rex = RegexLiteral::new(pattern, RegexFlags::default()).unwrap();
            let rendered = rex.to_string();
            let mut body = &rendered[1..];
            let (reread, _) = regex_body(&mut body).unwrap();
            let again = RegexLiteral::new(&reread, RegexFlags::default()).unwrap();
            assert_eq!(again.to_string(), rendered, "{}", pattern);
        }

        let rex = regex_from_parts(r"a\\", "").unwrap();
        assert!(rex.is_match(r"xa\y"));
        assert_eq!(rex.to_string(), r"/a\\/");
    }

    #[test]
    fn date_and_datetime_parts() {
        let today = datetime!(2020-06-15 0:00).date();
        let parts = timestamp_parts.parse("2015-3-1").unwrap();
        assert_eq!(
            timestamp_from_parts(&parts, today).unwrap(),
            datetime!(2015-03-01 0:00)
        );

        let parts = timestamp_parts.parse("2015-03-01T12:30:05").unwrap();
        assert_eq!(
            timestamp_from_parts(&parts, today).unwrap(),
            datetime!(2015-03-01 12:30:05)
        );

        let parts = timestamp_parts.parse("2015-03-01 12:30:05").unwrap();
        assert!(matches!(parts, TimestampParts::DateTime(..)));
    }

    #[test]
    fn bare_time_uses_anchor_date() {
        let today = datetime!(2020-06-15 0:00).date();
        let parts = timestamp_parts.parse("12:00:00").unwrap();
        assert_eq!(
            timestamp_from_parts(&parts, today).unwrap(),
            datetime!(2020-06-15 12:00)
        );
    }

    #[test]
    fn timestamp_bounds_are_rejected() {
        let today = datetime!(2020-06-15 0:00).date();
        for text in ["2015-13-01", "2015-02-30", "12345-01-01", "25:00:00", "12:60:00"] {
            let parts = timestamp_parts.parse(text).unwrap();
            assert!(timestamp_from_parts(&parts, today).is_err(), "{}", text);
        }
    }

    #[test]
    fn context_strings_parse_as_timestamps() {
        assert_eq!(
            parse_timestamp("2015-03-01T10:00:00Z"),
            Some(datetime!(2015-03-01 10:00))
        );
        assert_eq!(
            parse_timestamp("2015-03-01T12:00:00+02:00"),
            Some(datetime!(2015-03-01 10:00))
        );
        assert_eq!(parse_timestamp("2015-03-01"), Some(datetime!(2015-03-01 0:00)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn formats_timestamps() {
        assert_eq!(
            format_timestamp(&datetime!(2014-01-01 9:05:00)),
            "2014-01-01T09:05:00"
        );
    }

    #[test]
    fn integer_overflow_is_rejected() {
        assert_eq!(int_from_digits("42"), Ok(42));
        assert!(int_from_digits("99999999999999999999").is_err());
    }
}
