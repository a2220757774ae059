use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of, satisfy},
    combinator::{map, not, opt, peek, recognize, value},
    error::{Error, ErrorKind, ParseError},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use crate::query_ast::Value;

pub fn ws<'a, O, E: ParseError<&'a str>, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
{
    delimited(multispace0, inner, multispace0)
}

pub fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// Letter or underscore, then letters, digits, underscores: "o", "_x", "OrderLines2"
pub fn parse_identifier(input: &str) -> IResult<&str, &str> {
    let (rest, name) = recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_identifier_char),
    ))
    .parse(input)?;
    if is_reserved(name) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, name))
}

fn is_reserved(word: &str) -> bool {
    matches!(word, "new" | "true" | "false" | "null")
}

/// A whole word: `keyword("new")` does not match the start of `newest`
pub fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = Error<&'a str>> {
    terminated(tag(word), not(peek(satisfy(is_identifier_char))))
}

/// `@minTotal`
pub fn parse_parameter_name(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_while1(is_identifier_char)).parse(input)
}

pub fn parse_keyword_literal(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        value(Value::Null, keyword("null")),
    ))
    .parse(input)
}

/// Integer or decimal literal with an optional type suffix (`10m`, `2.5d`, `3L`).
/// Negative numbers are unary negation applied during lowering.
pub fn parse_numeric_literal(input: &str) -> IResult<&str, Value> {
    let (rest, (digits, suffix)) = terminated(
        pair(
            recognize(pair(digit1, opt(pair(char('.'), digit1)))),
            opt(one_of("mMdDfFlL")),
        ),
        not(peek(satisfy(is_identifier_char))),
    )
    .parse(input)?;

    let is_float = digits.contains('.') || matches!(suffix, Some('m' | 'M' | 'd' | 'D' | 'f' | 'F'));
    let parsed = if is_float {
        digits.parse::<f64>().ok().map(Value::Float)
    } else {
        digits.parse::<i64>().ok().map(Value::Int)
    };
    match parsed {
        Some(value) => Ok((rest, value)),
        None => Err(nom::Err::Failure(Error::new(input, ErrorKind::Digit))),
    }
}

/// Double-quoted string with `\"`, `\\`, `\n`, `\t`, `\r` escapes, or a
/// single-quoted string without escapes.
pub fn parse_string_literal(input: &str) -> IResult<&str, String> {
    alt((
        parse_double_quoted,
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            |s: &str| s.to_string(),
        ),
    ))
    .parse(input)
}

fn parse_double_quoted(input: &str) -> IResult<&str, String> {
    let (body, _) = char('"').parse(input)?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[i + 1..], out)),
            '\\' => {
                let Some((j, escaped)) = chars.next() else {
                    break;
                };
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '"' | '\\' | '\'' => escaped,
                    _ => return Err(nom::Err::Failure(Error::new(&body[j..], ErrorKind::Escaped))),
                });
            }
            other => out.push(other),
        }
    }
    // Unterminated
    Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)))
}
