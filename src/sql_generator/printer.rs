//! Renders a finalized [`SelectExpression`] to query text.
//!
//! Rendering is a pure function of the IR and the [`DialectPolicy`]: the
//! printer owns a single output buffer, descends recursively into nested
//! selects and indents them by four spaces. Clause order is SELECT, FROM
//! (with joins), WHERE, GROUP BY, HAVING, ORDER BY, pagination.

use crate::errors::{CompilationResult, QueryCompilationError};
use crate::model::ValueType;
use crate::query_ast::Value;
use crate::sql_ir::{
    AggregateFunction, DynamicField, JoinType, Literal, PathSegment, ProjectionForm,
    SelectExpression, SetOperator, Source, SourceKind, SqlAggregate, SqlBinary,
    SqlBinaryOperator, SqlExpr, SqlFunction, SqlUnaryOperator,
};

use super::dialect::{
    ArrayLiteralStyle, ConcatStyle, DialectPolicy, FunctionTemplate, IdentifierQuote,
    JsonObjectStyle, JsonPathStyle, LikeKind, PaginationStyle, ParenthesizeStyle,
    StringLiteralStyle,
};

const INDENT: &str = "    ";

pub struct SqlPrinter<'a> {
    dialect: &'a DialectPolicy,
    sql: String,
    indent: usize,
}

/// Renders `select` under `dialect`
pub fn generate_sql(select: &SelectExpression, dialect: &DialectPolicy) -> CompilationResult<String> {
    let mut printer = SqlPrinter::new(dialect);
    printer.visit_select(select)?;
    Ok(printer.finish())
}

impl<'a> SqlPrinter<'a> {
    pub fn new(dialect: &'a DialectPolicy) -> Self {
        SqlPrinter {
            dialect,
            sql: String::new(),
            indent: 0,
        }
    }

    pub fn finish(self) -> String {
        self.sql
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn newline(&mut self) {
        self.sql.push('\n');
        for _ in 0..self.indent {
            self.sql.push_str(INDENT);
        }
    }

    /// Renders into a scratch buffer, for templates that splice arguments
    fn capture<F>(&mut self, render: F) -> CompilationResult<String>
    where
        F: FnOnce(&mut Self) -> CompilationResult<()>,
    {
        let saved = std::mem::take(&mut self.sql);
        let result = render(self);
        let captured = std::mem::replace(&mut self.sql, saved);
        result.map(|_| captured)
    }

    fn render(&mut self, expr: &SqlExpr) -> CompilationResult<String> {
        self.capture(|p| p.visit_expr(expr))
    }

    fn unsupported(&self, feature: &str) -> QueryCompilationError {
        QueryCompilationError::unsupported(&self.dialect.name, feature)
    }

    pub fn quote(&self, identifier: &str) -> String {
        match self.dialect.identifier_quote() {
            IdentifierQuote::DoubleQuote => format!("\"{}\"", identifier.replace('"', "\"\"")),
            IdentifierQuote::Brackets => format!("[{}]", identifier.replace(']', "]]")),
            IdentifierQuote::Backtick => format!("`{}`", identifier.replace('`', "``")),
            IdentifierQuote::None => identifier.to_string(),
        }
    }

    fn alias_clause(&self, alias: &str) -> String {
        if self.dialect.table_alias_keyword() {
            format!(" AS {}", self.quote(alias))
        } else {
            format!(" {}", self.quote(alias))
        }
    }

    // ===== SELECT =====

    pub fn visit_select(&mut self, select: &SelectExpression) -> CompilationResult<()> {
        let pagination = self.dialect.pagination();

        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        if pagination == PaginationStyle::Top && select.offset.is_none() {
            if let Some(limit) = &select.limit {
                self.push("TOP(");
                self.visit_expr(limit)?;
                self.push(") ");
            }
        }
        self.visit_projection(select)?;

        for (i, source) in select.sources.iter().enumerate() {
            self.newline();
            if i == 0 {
                self.push("FROM ");
            } else {
                self.push(self.join_keyword(source));
            }
            self.visit_source(source)?;
            if let Some(on) = &source.on {
                self.push(" ON ");
                self.visit_expr(on)?;
            }
        }

        if let Some(predicate) = &select.predicate {
            self.newline();
            self.push("WHERE ");
            self.visit_expr(predicate)?;
        }

        if !select.group_by.is_empty() {
            self.newline();
            self.push("GROUP BY ");
            self.visit_list(&select.group_by)?;
        }

        if let Some(having) = &select.having {
            self.newline();
            self.push("HAVING ");
            self.visit_expr(having)?;
        }

        if !select.orderings.is_empty() {
            self.newline();
            self.push("ORDER BY ");
            for (i, ordering) in select.orderings.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.visit_expr(&ordering.expression)?;
                if !ordering.ascending {
                    self.push(" DESC");
                }
            }
        } else if pagination == PaginationStyle::Top && select.offset.is_some() {
            // OFFSET/FETCH requires an ORDER BY
            self.newline();
            self.push("ORDER BY (SELECT 1)");
        }

        self.visit_pagination(select, &pagination)
    }

    fn visit_projection(&mut self, select: &SelectExpression) -> CompilationResult<()> {
        match select.projection_form {
            ProjectionForm::Value => match select.projection.as_slice() {
                [item] => {
                    self.push("VALUE ");
                    self.visit_expr(&item.expression)
                }
                items => Err(QueryCompilationError::composition(
                    "value projection",
                    format!("expected exactly one projected value, found {}", items.len()),
                )),
            },
            ProjectionForm::Rows if select.projection.is_empty() => {
                self.push("1");
                Ok(())
            }
            ProjectionForm::Rows => {
                for (i, item) in select.projection.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.visit_expr(&item.expression)?;
                    let named_column = matches!(
                        &item.expression,
                        SqlExpr::Column(c) if c.column == item.alias
                    );
                    if !named_column && !item.alias.is_empty() {
                        self.push(" AS ");
                        let alias = self.quote(&item.alias);
                        self.push(&alias);
                    }
                }
                Ok(())
            }
        }
    }

    fn join_keyword(&self, source: &Source) -> &'static str {
        if source.with_in {
            return "JOIN ";
        }
        match source.join {
            JoinType::Inner => "INNER JOIN ",
            JoinType::Left => "LEFT JOIN ",
            JoinType::Cross | JoinType::From => "CROSS JOIN ",
        }
    }

    fn visit_source(&mut self, source: &Source) -> CompilationResult<()> {
        match &source.kind {
            SourceKind::Table(table) => {
                if self.dialect.is_document() {
                    self.push(&format!("{} {}", table.name, source.alias));
                    return Ok(());
                }
                if let Some(schema) = &table.schema {
                    let schema = self.quote(schema);
                    self.push(&schema);
                    self.push(".");
                }
                let name = self.quote(&table.name);
                self.push(&name);
            }
            SourceKind::Subquery(select) => {
                self.visit_nested_select("(", select)?;
                self.newline();
                self.push(")");
            }
            SourceKind::Expression(expr) if source.with_in => {
                self.dialect.require_iteration_sources()?;
                self.push(&source.alias);
                self.push(" IN ");
                return self.visit_expr(expr);
            }
            SourceKind::Expression(expr) => self.visit_expr(expr)?,
            SourceKind::SetOperation(operation) => {
                self.push("(");
                self.indent += 1;
                self.newline();
                self.visit_select(&operation.left)?;
                self.newline();
                self.push(match operation.operator {
                    SetOperator::Union => "UNION",
                    SetOperator::UnionAll => "UNION ALL",
                    SetOperator::Intersect => "INTERSECT",
                    SetOperator::Except => "EXCEPT",
                });
                self.newline();
                self.visit_select(&operation.right)?;
                self.indent -= 1;
                self.newline();
                self.push(")");
            }
        }
        let alias = self.alias_clause(&source.alias);
        self.push(&alias);
        Ok(())
    }

    /// `opener` + newline + indented select; the caller closes
    fn visit_nested_select(&mut self, opener: &str, select: &SelectExpression) -> CompilationResult<()> {
        self.push(opener);
        self.indent += 1;
        self.newline();
        let result = self.visit_select(select);
        self.indent -= 1;
        result
    }

    fn visit_pagination(
        &mut self,
        select: &SelectExpression,
        style: &PaginationStyle,
    ) -> CompilationResult<()> {
        let (limit, offset) = (&select.limit, &select.offset);
        if limit.is_none() && offset.is_none() {
            return Ok(());
        }
        match style {
            PaginationStyle::OffsetFetch => {
                if let Some(offset) = offset {
                    self.newline();
                    self.push("OFFSET ");
                    self.visit_expr(offset)?;
                    self.push(" ROWS");
                    if let Some(limit) = limit {
                        self.push(" FETCH NEXT ");
                        self.visit_expr(limit)?;
                        self.push(" ROWS ONLY");
                    }
                } else if let Some(limit) = limit {
                    self.newline();
                    self.push("FETCH FIRST ");
                    self.visit_expr(limit)?;
                    self.push(" ROWS ONLY");
                }
            }
            PaginationStyle::Top => {
                // Limit alone was rendered as TOP(n)
                if let Some(offset) = offset {
                    self.newline();
                    self.push("OFFSET ");
                    self.visit_expr(offset)?;
                    self.push(" ROWS");
                    if let Some(limit) = limit {
                        self.push(" FETCH NEXT ");
                        self.visit_expr(limit)?;
                        self.push(" ROWS ONLY");
                    }
                }
            }
            PaginationStyle::LimitOffset { unbounded_limit } => {
                self.newline();
                match (limit, unbounded_limit) {
                    (Some(limit), _) => {
                        self.push("LIMIT ");
                        self.visit_expr(limit)?;
                    }
                    (None, Some(unbounded)) => {
                        self.push("LIMIT ");
                        self.push(unbounded);
                    }
                    (None, None) => {}
                }
                if let Some(offset) = offset {
                    if limit.is_some() || unbounded_limit.is_some() {
                        self.push(" ");
                    }
                    self.push("OFFSET ");
                    self.visit_expr(offset)?;
                }
            }
            PaginationStyle::OffsetLimit => {
                let limit = limit
                    .as_ref()
                    .ok_or_else(|| self.unsupported("OFFSET without LIMIT"))?;
                self.newline();
                self.push("OFFSET ");
                match offset {
                    Some(offset) => self.visit_expr(offset)?,
                    None => self.push("0"),
                }
                self.push(" LIMIT ");
                self.visit_expr(limit)?;
            }
        }
        Ok(())
    }

    // ===== EXPRESSIONS =====

    fn visit_list(&mut self, exprs: &[SqlExpr]) -> CompilationResult<()> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    pub fn visit_expr(&mut self, expr: &SqlExpr) -> CompilationResult<()> {
        match expr {
            SqlExpr::Column(column) => {
                if self.dialect.is_document() {
                    let key = json_string(&column.column);
                    self.push(&format!("{}[{}]", column.table_alias, key));
                } else {
                    let text = format!(
                        "{}.{}",
                        self.quote(&column.table_alias),
                        self.quote(&column.column)
                    );
                    self.push(&text);
                }
            }
            SqlExpr::SourceRef(source) => {
                let text = self.quote(&source.alias);
                self.push(&text);
            }
            SqlExpr::Literal(literal) => {
                let text = self.literal(&literal.value)?;
                self.push(&text);
            }
            SqlExpr::Parameter(parameter) => {
                let prefix = self.dialect.parameter_prefix().to_string();
                self.push(&prefix);
                self.push(&parameter.name);
            }
            SqlExpr::Binary(binary) => self.visit_binary(binary)?,
            SqlExpr::Unary(unary) => {
                let operand = self.render_operand(&unary.operand)?;
                match unary.operator {
                    SqlUnaryOperator::Not => {
                        let inner = self.render(&unary.operand)?;
                        let text = fill_template(self.dialect.not_template(), &[inner]);
                        self.push(&text);
                    }
                    SqlUnaryOperator::Negate => {
                        // `--` would start a line comment
                        let operand = if operand.starts_with('-') {
                            format!("({})", operand)
                        } else {
                            operand
                        };
                        self.push("-");
                        self.push(&operand);
                    }
                    SqlUnaryOperator::IsNull | SqlUnaryOperator::IsNotNull => {
                        let is_null = unary.operator == SqlUnaryOperator::IsNull;
                        if self.dialect.is_document() {
                            let op = if is_null { "=" } else { "!=" };
                            let null = self.dialect.null_literal().to_string();
                            self.push(&format!("({} {} {})", operand, op, null));
                        } else {
                            self.push(&operand);
                            self.push(if is_null { " IS NULL" } else { " IS NOT NULL" });
                        }
                    }
                }
            }
            SqlExpr::Function(function) => self.visit_function(function)?,
            SqlExpr::Aggregate(aggregate) => self.visit_aggregate(aggregate)?,
            SqlExpr::Case(case) => {
                self.push("CASE");
                for (when, then) in &case.when_then {
                    self.push(" WHEN ");
                    self.visit_expr(when)?;
                    self.push(" THEN ");
                    self.visit_expr(then)?;
                }
                if let Some(else_expr) = &case.else_expr {
                    self.push(" ELSE ");
                    self.visit_expr(else_expr)?;
                }
                self.push(" END");
            }
            SqlExpr::In(in_list) => {
                let item = self.render_operand(&in_list.item)?;
                self.push(&item);
                self.push(if in_list.negated { " NOT IN (" } else { " IN (" });
                self.visit_list(&in_list.values)?;
                self.push(")");
            }
            SqlExpr::DynamicField(field) => self.visit_dynamic_field(field)?,
            SqlExpr::Exists(select) => {
                self.visit_nested_select("EXISTS (", select)?;
                self.push(")");
            }
            SqlExpr::ScalarSubquery(select) => {
                self.visit_nested_select("(", select)?;
                self.push(")");
            }
            SqlExpr::ArrayWrap(select) => {
                let keyword = self.dialect.array_wrap()?.to_string();
                self.visit_nested_select(&format!("{}(", keyword), select)?;
                self.push(")");
            }
            SqlExpr::ArrayLiteral(items) => {
                match self.dialect.array_literal()? {
                    ArrayLiteralStyle::Brackets => self.push("["),
                    ArrayLiteralStyle::Keyword(keyword) => {
                        self.push(&keyword);
                        self.push("[");
                    }
                }
                self.visit_list(items)?;
                self.push("]");
            }
            SqlExpr::ObjectWrap(members) => self.visit_object(members)?,
        }
        Ok(())
    }

    /// Operand of a postfix/prefix operator; binary operands get parentheses
    fn render_operand(&mut self, expr: &SqlExpr) -> CompilationResult<String> {
        let text = self.render(expr)?;
        let needs_parens = matches!(expr, SqlExpr::Binary(_))
            && self.dialect.parenthesize() == ParenthesizeStyle::Precedence;
        Ok(if needs_parens { format!("({})", text) } else { text })
    }

    fn binary_token(&self, operator: SqlBinaryOperator) -> &'static str {
        match operator {
            SqlBinaryOperator::Equal => "=",
            SqlBinaryOperator::NotEqual => {
                if self.dialect.is_document() {
                    "!="
                } else {
                    "<>"
                }
            }
            SqlBinaryOperator::LessThan => "<",
            SqlBinaryOperator::LessThanOrEqual => "<=",
            SqlBinaryOperator::GreaterThan => ">",
            SqlBinaryOperator::GreaterThanOrEqual => ">=",
            SqlBinaryOperator::And => "AND",
            SqlBinaryOperator::Or => "OR",
            SqlBinaryOperator::Add => "+",
            SqlBinaryOperator::Subtract => "-",
            SqlBinaryOperator::Multiply => "*",
            SqlBinaryOperator::Divide => "/",
            SqlBinaryOperator::Modulo => "%",
            SqlBinaryOperator::Concat => "||",
        }
    }

    fn visit_binary(&mut self, binary: &SqlBinary) -> CompilationResult<()> {
        if binary.operator == SqlBinaryOperator::Concat {
            if let ConcatStyle::Function(name) = self.dialect.concat() {
                let left = self.render(&binary.left)?;
                let right = self.render(&binary.right)?;
                self.push(&format!("{}({}, {})", name, left, right));
                return Ok(());
            }
        }

        let token = match (binary.operator, self.dialect.concat()) {
            (SqlBinaryOperator::Concat, ConcatStyle::Operator(op)) => op,
            (operator, _) => self.binary_token(operator).to_string(),
        };

        let always = self.dialect.parenthesize() == ParenthesizeStyle::Always;
        let left = self.render_child(&binary.left, binary.operator, false)?;
        let right = self.render_child(&binary.right, binary.operator, true)?;
        if always {
            self.push(&format!("({} {} {})", left, token, right));
        } else {
            self.push(&format!("{} {} {}", left, token, right));
        }
        Ok(())
    }

    fn render_child(
        &mut self,
        child: &SqlExpr,
        parent: SqlBinaryOperator,
        is_right: bool,
    ) -> CompilationResult<String> {
        let text = self.render(child)?;
        if self.dialect.parenthesize() == ParenthesizeStyle::Always {
            return Ok(text);
        }
        let needs_parens = match child {
            SqlExpr::Binary(inner) => {
                let (inner_prec, parent_prec) = (inner.operator.precedence(), parent.precedence());
                inner_prec < parent_prec
                    || (inner_prec == parent_prec
                        && (parent.is_comparison()
                            || (is_right && !(parent == inner.operator && parent.is_associative()))))
            }
            // `x LIKE 'a%'` spliced into arithmetic or another comparison
            SqlExpr::Function(f) if f.function.is_predicate() => !parent.is_logical(),
            SqlExpr::Unary(u) if u.operator != SqlUnaryOperator::Negate => !parent.is_logical(),
            SqlExpr::In(_) => !parent.is_logical(),
            _ => false,
        };
        Ok(if needs_parens { format!("({})", text) } else { text })
    }

    fn visit_function(&mut self, function: &SqlFunction) -> CompilationResult<()> {
        let template = self.dialect.function_template(function.function)?;
        let args = function
            .args
            .iter()
            .map(|arg| self.render(arg))
            .collect::<CompilationResult<Vec<_>>>()?;
        let text = match template {
            FunctionTemplate::Call(name) => format!("{}({})", name, args.join(", ")),
            FunctionTemplate::Pattern(pattern) => fill_template(&pattern, &args),
            FunctionTemplate::Like(kind) => self.like(kind, function, &args)?,
            FunctionTemplate::Unsupported => {
                return Err(self.unsupported(&format!("function `{}`", function.function.name())))
            }
        };
        self.push(&text);
        Ok(())
    }

    fn like(&self, kind: LikeKind, function: &SqlFunction, args: &[String]) -> CompilationResult<String> {
        let (target, pattern_arg) = match (args, function.args.get(1)) {
            ([target, _], Some(pattern)) => (target, pattern),
            _ => {
                return Err(QueryCompilationError::composition(
                    "LIKE rendering",
                    format!("`{}` expects two arguments", function.function.name()),
                ))
            }
        };

        if let SqlExpr::Literal(Literal {
            value: Value::String(text),
        }) = pattern_arg
        {
            let needs_escape = text.contains(['%', '_', '\\']);
            let escaped = text
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = match kind {
                LikeKind::Prefix => format!("{}%", escaped),
                LikeKind::Suffix => format!("%{}", escaped),
                LikeKind::Infix => format!("%{}%", escaped),
            };
            let mut text = format!("{} LIKE {}", target, self.string_literal(&pattern));
            if needs_escape {
                text.push_str(&format!(" ESCAPE {}", self.string_literal("\\")));
            }
            return Ok(text);
        }

        let wildcard = self.string_literal("%");
        let concat = |left: &str, right: &str| match self.dialect.concat() {
            ConcatStyle::Operator(op) => format!("{} {} {}", left, op, right),
            ConcatStyle::Function(name) => format!("{}({}, {})", name, left, right),
        };
        let pattern = &args[1];
        let pattern = match kind {
            LikeKind::Prefix => concat(pattern, &wildcard),
            LikeKind::Suffix => concat(&wildcard, pattern),
            LikeKind::Infix => concat(&concat(&wildcard, pattern), &wildcard),
        };
        Ok(format!("{} LIKE {}", target, pattern))
    }

    fn visit_aggregate(&mut self, aggregate: &SqlAggregate) -> CompilationResult<()> {
        let name = match aggregate.function {
            AggregateFunction::Count => "COUNT".to_string(),
            AggregateFunction::LongCount => self.dialect.long_count_function().to_string(),
            AggregateFunction::Sum => "SUM".to_string(),
            AggregateFunction::Min => "MIN".to_string(),
            AggregateFunction::Max => "MAX".to_string(),
            AggregateFunction::Average => "AVG".to_string(),
            AggregateFunction::JsonArray => {
                let template = self.dialect.json_array_aggregate()?.to_string();
                let argument = match &aggregate.argument {
                    Some(argument) => self.render(argument)?,
                    None => {
                        return Err(QueryCompilationError::composition(
                            "JSON aggregation",
                            "missing aggregated value",
                        ))
                    }
                };
                self.push(&fill_template(&template, &[argument]));
                return Ok(());
            }
        };
        match &aggregate.argument {
            None if aggregate.function == AggregateFunction::Count => {
                let count_star = self.dialect.count_star().to_string();
                self.push(&count_star);
            }
            None => {
                self.push(&name);
                self.push("(*)");
            }
            Some(argument) => {
                self.push(&name);
                self.push("(");
                if aggregate.distinct {
                    self.push("DISTINCT ");
                }
                self.visit_expr(argument)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn visit_dynamic_field(&mut self, field: &DynamicField) -> CompilationResult<()> {
        let base = self.render(&field.base)?;
        let structured = field.value_type.is_structured();
        let text = match self.dialect.json_path() {
            JsonPathStyle::Brackets => {
                let mut text = base;
                for segment in &field.path {
                    match segment {
                        PathSegment::Property(name) => text.push_str(&format!("[{}]", json_string(name))),
                        PathSegment::Index(index) => {
                            let index = self.render(index)?;
                            text.push_str(&format!("[{}]", index));
                        }
                    }
                }
                text
            }
            JsonPathStyle::JsonValue => {
                let path = self.json_path_string(&field.path)?;
                let function = if structured { "JSON_QUERY" } else { "JSON_VALUE" };
                format!("{}({}, {})", function, base, self.string_literal_plain(&path))
            }
            JsonPathStyle::JsonExtract => {
                let path = self.json_path_string(&field.path)?;
                format!("json_extract({}, {})", base, self.string_literal_plain(&path))
            }
            JsonPathStyle::Arrow => {
                let mut text = base;
                let last = field.path.len().saturating_sub(1);
                for (i, segment) in field.path.iter().enumerate() {
                    let operator = if i == last && !structured { " ->> " } else { " -> " };
                    text.push_str(operator);
                    match segment {
                        PathSegment::Property(name) => text.push_str(&self.string_literal_plain(name)),
                        PathSegment::Index(index) => {
                            let index = self.render(index)?;
                            text.push_str(&index);
                        }
                    }
                }
                text
            }
        };
        self.push(&text);
        Ok(())
    }

    /// `$.a.b[0]`; array indexes must be constants
    fn json_path_string(&self, path: &[PathSegment]) -> CompilationResult<String> {
        let mut text = String::from("$");
        for segment in path {
            match segment {
                PathSegment::Property(name) => {
                    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        text.push('.');
                        text.push_str(name);
                    } else {
                        text.push_str(&format!(".\"{}\"", name.replace('"', "\\\"")));
                    }
                }
                PathSegment::Index(index) => match index.as_ref() {
                    SqlExpr::Literal(Literal {
                        value: Value::Int(i),
                    }) => text.push_str(&format!("[{}]", i)),
                    _ => return Err(self.unsupported("non-constant JSON array indexes")),
                },
            }
        }
        Ok(text)
    }

    fn visit_object(&mut self, members: &[(String, SqlExpr)]) -> CompilationResult<()> {
        let rendered = members
            .iter()
            .map(|(name, expr)| Ok((name.as_str(), self.render(expr)?)))
            .collect::<CompilationResult<Vec<_>>>()?;
        let text = match self.dialect.json_object() {
            JsonObjectStyle::Literal => {
                let body = rendered
                    .iter()
                    .map(|(name, value)| format!("{}: {}", json_string(name), value))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", body)
            }
            JsonObjectStyle::KeyValue {
                function,
                separator,
            } => {
                let body = rendered
                    .iter()
                    .map(|(name, value)| format!("{}{}{}", self.string_literal_plain(name), separator, value))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", function, body)
            }
            JsonObjectStyle::Pairs { function } => {
                let body = rendered
                    .iter()
                    .map(|(name, value)| format!("{}, {}", self.string_literal_plain(name), value))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", function, body)
            }
        };
        self.push(&text);
        Ok(())
    }

    // ===== LITERALS =====

    fn literal(&self, value: &Value) -> CompilationResult<String> {
        Ok(match value {
            Value::Null => self.dialect.null_literal().to_string(),
            Value::Bool(b) => self.dialect.boolean_literal(*b),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => self.string_literal(s),
            Value::DateTime(dt) => {
                let style = self.dialect.datetime_literal();
                let text = self.string_literal_plain(&dt.format(&style.format).to_string());
                match style.prefix {
                    Some(prefix) => format!("{} {}", prefix, text),
                    None => text,
                }
            }
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.literal(item))
                    .collect::<CompilationResult<Vec<_>>>()?
                    .join(", ");
                match self.dialect.array_literal()? {
                    ArrayLiteralStyle::Brackets => format!("[{}]", items),
                    ArrayLiteralStyle::Keyword(keyword) => format!("{}[{}]", keyword, items),
                }
            }
        })
    }

    /// String literal, with the dialect's unicode prefix
    pub fn string_literal(&self, text: &str) -> String {
        match self.dialect.string_literal() {
            StringLiteralStyle::SingleQuoted { unicode_prefix } => {
                let prefix = if unicode_prefix { "N" } else { "" };
                format!("{}'{}'", prefix, text.replace('\'', "''"))
            }
            StringLiteralStyle::Json => json_string(text),
        }
    }

    /// String literal for paths, keys and formats: never prefixed
    fn string_literal_plain(&self, text: &str) -> String {
        match self.dialect.string_literal() {
            StringLiteralStyle::SingleQuoted { .. } => format!("'{}'", text.replace('\'', "''")),
            StringLiteralStyle::Json => json_string(text),
        }
    }
}

fn json_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Substitutes `{N}` placeholders in one left-to-right pass; argument text is
/// never rescanned. Placeholders without a matching argument are kept as is.
fn fill_template(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len() + args.iter().map(String::len).sum::<usize>());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let index = if digits > 0 && after[digits..].starts_with('}') {
            after[..digits].parse::<usize>().ok()
        } else {
            None
        };
        match index.and_then(|i| args.get(i)) {
            Some(arg) => {
                out.push_str(arg);
                rest = &after[digits + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
