//! Filter expression parser using nom.
//!
//! Grammar (operator precedence: NOT > AND > OR):
//! ```text
//! filter     = expr
//! expr       = term (("or" | "||") term)*
//! term       = factor (("and" | "&&") factor)*
//! factor     = ("not" | "!") factor | primary
//! primary    = "(" expr ")" | "tag(" string ")" | "path(" string ")"
//!            | "true" | "false" | field op literal | field
//! op         = "==" | "!=" | "<=" | ">=" | "<" | ">" | "="
//! literal    = string | bytes | ipv4 | integer | float | bool
//! ```

use std::net::Ipv4Addr;

use bytes::Bytes;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{all_consuming, map, not, opt, recognize, value},
    error::{Error as NomError, ErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use super::ast::{CmpOp, FilterExpr};
use super::error::FilterError;
use crate::layer::{AttrValue, PathPattern};

/// Parse a complete filter expression.
pub fn parse_filter(input: &str) -> Result<FilterExpr, FilterError> {
    if input.trim().is_empty() {
        return Err(FilterError::Empty);
    }

    match all_consuming(delimited(multispace0, expr, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(to_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err(FilterError::Syntax {
            offset: input.len(),
            fragment: "end of input".to_string(),
        }),
    }
}

fn to_error(source: &str, e: NomError<&str>) -> FilterError {
    let offset = source.len() - e.input.len();
    let fragment = describe(e.input);
    match e.code {
        ErrorKind::MapRes => FilterError::Literal { offset, fragment },
        ErrorKind::Verify => FilterError::Pattern { offset, fragment },
        _ => FilterError::Syntax { offset, fragment },
    }
}

fn describe(rest: &str) -> String {
    let token: String = rest
        .split_whitespace()
        .next()
        .unwrap_or("")
        .chars()
        .take(24)
        .collect();
    if token.is_empty() {
        "end of input".to_string()
    } else {
        format!("'{token}'")
    }
}

// =============================================================================
// Expression Parsers (handle operator precedence)
// =============================================================================

/// Parse an expression (OR level - lowest precedence).
fn expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, alt((tag("||"), keyword("or"))), multispace0),
        term,
    ))(input)?;

    Ok((input, rest.into_iter().fold(first, FilterExpr::or)))
}

/// Parse a term (AND level).
fn term(input: &str) -> IResult<&str, FilterExpr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, alt((tag("&&"), keyword("and"))), multispace0),
        factor,
    ))(input)?;

    Ok((input, rest.into_iter().fold(first, FilterExpr::and)))
}

/// Parse a factor (NOT level).
fn factor(input: &str) -> IResult<&str, FilterExpr> {
    alt((not_expr, primary))(input)
}

fn not_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, _) = alt((terminated(tag("!"), not(char('='))), keyword("not")))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, inner) = factor(input)?;
    Ok((input, FilterExpr::negate(inner)))
}

fn primary(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        paren_expr,
        tag_expr,
        path_expr,
        const_expr,
        comparison,
        map(field_name, |f| FilterExpr::Exists(f.into())),
    ))(input)
}

fn paren_expr(input: &str) -> IResult<&str, FilterExpr> {
    delimited(
        pair(char('('), multispace0),
        expr,
        pair(multispace0, char(')')),
    )(input)
}

/// `tag("name")`
fn tag_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, _) = call_open("tag")(input)?;
    let (input, name) = string_lit(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    Ok((input, FilterExpr::Tag(name.into())))
}

/// `path("pattern")`
fn path_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, _) = call_open("path")(input)?;
    let start = input;
    let (input, text) = string_lit(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;

    match text.parse::<PathPattern>() {
        Ok(pattern) => Ok((input, FilterExpr::Path(pattern))),
        Err(_) => Err(nom::Err::Failure(NomError::new(start, ErrorKind::Verify))),
    }
}

fn const_expr(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        value(FilterExpr::Const(true), keyword("true")),
        value(FilterExpr::Const(false), keyword("false")),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, FilterExpr> {
    let (input, field) = field_name(input)?;
    let (input, op) = delimited(multispace0, cmp_op, multispace0)(input)?;
    let (input, value) = literal(input)?;

    Ok((
        input,
        FilterExpr::Compare {
            field: field.into(),
            op,
            value,
        },
    ))
}

// =============================================================================
// Token Parsers
// =============================================================================

fn is_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// A case-insensitive word not followed by an identifier character.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(word), not(satisfy(is_field_char)))
}

/// `name (` with optional whitespace.
fn call_open<'a>(name: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(keyword(name), delimited(multispace0, tag("("), multispace0))
}

/// Parse an attribute identifier: `udp.src`, `tcp.flags.syn`.
fn field_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_field_char),
    ))(input)
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
        value(CmpOp::Eq, tag("=")),
    ))(input)
}

/// Parse a double-quoted string with `\"`, `\\`, `\n` and `\t` escapes.
fn string_lit(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", tag("\\")),
                    value("\"", tag("\"")),
                    value("\n", tag("n")),
                    value("\t", tag("t")),
                )),
            )),
            |s: Option<String>| s.unwrap_or_default(),
        ),
        char('"'),
    )(input)
}

fn literal(input: &str) -> IResult<&str, AttrValue> {
    alt((
        map(string_lit, |s| AttrValue::Str(s.into())),
        bare_literal,
    ))(input)
}

/// Unquoted literal. Once a token is taken it must convert, otherwise the
/// whole parse fails at the token.
fn bare_literal(input: &str) -> IResult<&str, AttrValue> {
    let (rest, token) = take_while1(|c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '+' | '_')
    })(input)?;

    match convert_literal(token) {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Failure(NomError::new(input, ErrorKind::MapRes))),
    }
}

fn convert_literal(token: &str) -> Option<AttrValue> {
    if token.eq_ignore_ascii_case("true") {
        return Some(AttrValue::Bool(true));
    }
    if token.eq_ignore_ascii_case("false") {
        return Some(AttrValue::Bool(false));
    }

    // de:ad:be:ef, MAC addresses
    if token.contains(':') {
        return hex_bytes(token).map(|b| AttrValue::Bytes(Bytes::from(b)));
    }

    // Dotted quad compares against 4-byte address attributes
    if let Ok(addr) = token.parse::<Ipv4Addr>() {
        return Some(AttrValue::Bytes(Bytes::copy_from_slice(&addr.octets())));
    }

    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let magnitude = u64::from_str_radix(hex, 16).ok()?;
        return integer(negative, magnitude);
    }

    if let Ok(v) = token.parse::<i64>() {
        return Some(AttrValue::Int(v));
    }
    if let Ok(v) = token.parse::<u64>() {
        return Some(AttrValue::UInt(v));
    }
    if digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        if let Ok(v) = token.parse::<f64>() {
            return v.is_finite().then_some(AttrValue::Float(v));
        }
    }
    None
}

fn integer(negative: bool, magnitude: u64) -> Option<AttrValue> {
    if negative {
        return i64::try_from(magnitude).ok().map(|v| AttrValue::Int(-v));
    }
    Some(match i64::try_from(magnitude) {
        Ok(v) => AttrValue::Int(v),
        Err(_) => AttrValue::UInt(magnitude),
    })
}

fn hex_bytes(token: &str) -> Option<Vec<u8>> {
    token
        .split(':')
        .map(|part| {
            if part.is_empty() || part.len() > 2 {
                return None;
            }
            u8::from_str_radix(part, 16).ok()
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
