use crate::query_ast::{BinaryOperator, UnaryOperator, Value};

/// Surface syntax of method-chain query text, before lowering.
///
/// Query operators are still ordinary calls at this stage; lowering decides
/// which calls are operators over sequences and which are scalar methods.
#[derive(Debug, Clone, PartialEq)]
pub enum Syntax<'a> {
    Identifier(&'a str),
    /// `@name`
    Parameter(&'a str),
    Literal(Value),
    Member {
        target: Box<Syntax<'a>>,
        name: &'a str,
    },
    Call {
        target: Box<Syntax<'a>>,
        method: &'a str,
        args: Vec<Syntax<'a>>,
    },
    Index {
        target: Box<Syntax<'a>>,
        index: Box<Syntax<'a>>,
    },
    Lambda {
        params: Vec<&'a str>,
        body: Box<Syntax<'a>>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Syntax<'a>>,
        right: Box<Syntax<'a>>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Syntax<'a>>,
    },
    Conditional {
        test: Box<Syntax<'a>>,
        if_true: Box<Syntax<'a>>,
        if_false: Box<Syntax<'a>>,
    },
    /// `new { o.Id, Total = o.Amount }`; unnamed members take their name
    /// from the last member access
    AnonymousObject(Vec<(Option<&'a str>, Syntax<'a>)>),
    /// `new[] { 1, 2, 3 }`
    ArrayLiteral(Vec<Syntax<'a>>),
    /// `new DateTime(2024, 1, 31)`
    Construct {
        type_name: &'a str,
        args: Vec<Syntax<'a>>,
    },
}

impl<'a> Syntax<'a> {
    pub fn binary(op: BinaryOperator, left: Syntax<'a>, right: Syntax<'a>) -> Self {
        Syntax::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Short label used in lowering errors
    pub fn describe(&self) -> String {
        match self {
            Syntax::Identifier(name) => name.to_string(),
            Syntax::Parameter(name) => format!("@{}", name),
            Syntax::Literal(value) => value.to_string(),
            Syntax::Member { target, name } => format!("{}.{}", target.describe(), name),
            Syntax::Call { target, method, .. } => format!("{}.{}(...)", target.describe(), method),
            Syntax::Index { target, .. } => format!("{}[...]", target.describe()),
            Syntax::Lambda { params, .. } => format!("({}) => ...", params.join(", ")),
            Syntax::Binary { op, .. } => format!("'{}' expression", op.symbol()),
            Syntax::Unary { .. } => "unary expression".to_string(),
            Syntax::Conditional { .. } => "conditional expression".to_string(),
            Syntax::AnonymousObject(_) => "new { ... }".to_string(),
            Syntax::ArrayLiteral(_) => "new[] { ... }".to_string(),
            Syntax::Construct { type_name, .. } => format!("new {}(...)", type_name),
        }
    }
}
