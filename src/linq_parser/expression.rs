use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, one_of},
    combinator::{map, not, opt, peek, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use crate::query_ast::{BinaryOperator, UnaryOperator, Value};

use super::ast::Syntax;
use super::common::{self, keyword, ws};

pub fn parse_expression(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_conditional(input)
}

// test ? a : b, right associative
fn parse_conditional(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    let (input, test) = parse_coalesce(input)?;
    let (input, branches) = opt(pair(
        preceded(ws(char('?')), parse_expression),
        preceded(ws(char(':')), parse_expression),
    ))
    .parse(input)?;

    match branches {
        Some((if_true, if_false)) => Ok((
            input,
            Syntax::Conditional {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            },
        )),
        None => Ok((input, test)),
    }
}

// a ?? b, right associative
fn parse_coalesce(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    let (input, lhs) = parse_logical_or(input)?;
    let (input, rhs) = opt(preceded(ws(tag("??")), parse_coalesce)).parse(input)?;
    match rhs {
        Some(rhs) => Ok((input, Syntax::binary(BinaryOperator::Coalesce, lhs, rhs))),
        None => Ok((input, lhs)),
    }
}

/// Left-associative chain of `operand (operator operand)*`
fn parse_left_assoc<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Syntax<'a>>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOperator>,
) -> IResult<&'a str, Syntax<'a>> {
    let (input, lhs) = operand(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        match ws(operator).parse(remaining_input) {
            Ok((new_input, op)) => {
                let (new_input, rhs) = operand(new_input)?;
                final_expression = Syntax::binary(op, final_expression, rhs);
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_logical_or(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_left_assoc(input, parse_logical_and, |i| {
        value(BinaryOperator::OrElse, tag("||")).parse(i)
    })
}

fn parse_logical_and(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_left_assoc(input, parse_equality, |i| {
        value(BinaryOperator::AndAlso, tag("&&")).parse(i)
    })
}

fn parse_equality(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_left_assoc(input, parse_relational, |i| {
        alt((
            value(BinaryOperator::Equal, tag("==")),
            value(BinaryOperator::NotEqual, tag("!=")),
        ))
        .parse(i)
    })
}

fn parse_relational(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_left_assoc(input, parse_additive, |i| {
        alt((
            value(BinaryOperator::LessThanOrEqual, tag("<=")),
            value(BinaryOperator::GreaterThanOrEqual, tag(">=")),
            value(BinaryOperator::LessThan, tag("<")),
            value(BinaryOperator::GreaterThan, tag(">")),
        ))
        .parse(i)
    })
}

fn parse_additive(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_left_assoc(input, parse_multiplicative, |i| {
        alt((
            value(BinaryOperator::Add, char('+')),
            value(BinaryOperator::Subtract, char('-')),
        ))
        .parse(i)
    })
}

fn parse_multiplicative(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    parse_left_assoc(input, parse_unary, |i| {
        alt((
            value(BinaryOperator::Multiply, char('*')),
            value(BinaryOperator::Divide, char('/')),
            value(BinaryOperator::Modulo, char('%')),
        ))
        .parse(i)
    })
}

fn parse_unary(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    alt((
        map(
            preceded(ws(terminated(char('!'), not(peek(char('='))))), parse_unary),
            |operand| Syntax::Unary {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            },
        ),
        map(preceded(ws(char('-')), parse_unary), |operand| Syntax::Unary {
            op: UnaryOperator::Negate,
            operand: Box::new(operand),
        }),
        parse_postfix,
    ))
    .parse(input)
}

enum Postfix<'a> {
    Member(&'a str, Option<Vec<Syntax<'a>>>),
    Index(Syntax<'a>),
}

// primary followed by any number of `.Member`, `.Method(args)` or `[index]`
fn parse_postfix(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    let (input, primary) = ws(parse_primary).parse(input)?;

    let mut remaining_input = input;
    let mut final_expression = primary;

    loop {
        let res = alt((
            map(
                pair(
                    preceded(ws(char('.')), common::parse_identifier),
                    opt(parse_arguments),
                ),
                |(name, args)| Postfix::Member(name, args),
            ),
            map(
                delimited(ws(char('[')), parse_expression, ws(char(']'))),
                Postfix::Index,
            ),
        ))
        .parse(remaining_input);

        match res {
            Ok((new_input, postfix)) => {
                final_expression = match postfix {
                    Postfix::Member(name, None) => Syntax::Member {
                        target: Box::new(final_expression),
                        name,
                    },
                    Postfix::Member(method, Some(args)) => Syntax::Call {
                        target: Box::new(final_expression),
                        method,
                        args,
                    },
                    Postfix::Index(index) => Syntax::Index {
                        target: Box::new(final_expression),
                        index: Box::new(index),
                    },
                };
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_primary(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    alt((
        delimited(char('('), parse_expression, ws(char(')'))),
        parse_new_expression,
        map(common::parse_string_literal, |s| Syntax::Literal(Value::String(s))),
        map(common::parse_numeric_literal, Syntax::Literal),
        map(common::parse_keyword_literal, Syntax::Literal),
        map(common::parse_parameter_name, Syntax::Parameter),
        map(common::parse_identifier, Syntax::Identifier),
    ))
    .parse(input)
}

/// `(arg, arg, ...)` where an argument may be a lambda
fn parse_arguments(input: &'_ str) -> IResult<&'_ str, Vec<Syntax<'_>>> {
    delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_argument),
        ws(char(')')),
    )
    .parse(input)
}

fn parse_argument(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    alt((parse_lambda, parse_expression)).parse(input)
}

/// `o => body` or `(o, c) => body`
pub fn parse_lambda(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    let (input, params) = ws(alt((
        map(common::parse_identifier, |name| vec![name]),
        delimited(
            char('('),
            separated_list0(ws(char(',')), ws(common::parse_identifier)),
            char(')'),
        ),
    )))
    .parse(input)?;
    let (input, _) = ws(tag("=>")).parse(input)?;
    let (input, body) = parse_expression(input)?;
    Ok((
        input,
        Syntax::Lambda {
            params,
            body: Box::new(body),
        },
    ))
}

fn parse_new_expression(input: &'_ str) -> IResult<&'_ str, Syntax<'_>> {
    let (input, _) = keyword("new").parse(input)?;
    alt((
        map(
            delimited(
                ws(char('{')),
                separated_list0(ws(char(',')), parse_anonymous_member),
                preceded(opt(ws(char(','))), ws(char('}'))),
            ),
            Syntax::AnonymousObject,
        ),
        map(
            preceded(
                pair(ws(char('[')), ws(char(']'))),
                delimited(
                    ws(char('{')),
                    separated_list0(ws(char(',')), parse_expression),
                    preceded(opt(ws(char(','))), ws(char('}'))),
                ),
            ),
            Syntax::ArrayLiteral,
        ),
        map(pair(ws(common::parse_identifier), parse_arguments), |(type_name, args)| {
            Syntax::Construct { type_name, args }
        }),
    ))
    .parse(input)
}

// `Name = expr` or a bare expression whose name is inferred during lowering
fn parse_anonymous_member(input: &'_ str) -> IResult<&'_ str, (Option<&'_ str>, Syntax<'_>)> {
    alt((
        map(
            pair(
                terminated(ws(common::parse_identifier), terminated(char('='), not(peek(one_of("=>"))))),
                parse_expression,
            ),
            |(name, expr)| (Some(name), expr),
        ),
        map(parse_expression, |expr| (None, expr)),
    ))
    .parse(input)
}
