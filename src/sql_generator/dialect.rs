//! Dialect policies.
//!
//! A [`DialectPolicy`] is a value: a table of optional rendering hooks. Every
//! hook that is unset falls back to the ANSI default documented on its
//! accessor. Hooks that have no sensible ANSI rendering (JSON aggregation,
//! array wrapping, array literals, iteration sources and some canonical
//! functions) report [`UnsupportedDialectFeature`] instead.
//!
//! Policies can be loaded from YAML as a built-in base plus overrides:
//!
//! ```yaml
//! base: postgres
//! name: redshift
//! parameter_prefix: ":"
//! functions:
//!   length: { call: LEN }
//! ```
//!
//! [`UnsupportedDialectFeature`]: crate::errors::QueryCompilationError::UnsupportedDialectFeature

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use super::errors::DialectError;
use crate::errors::{CompilationResult, QueryCompilationError};
use crate::sql_ir::CanonicalFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataShape {
    /// Row-per-result relational output
    #[default]
    Relational,
    /// Document store: `SELECT VALUE`, `ARRAY(...)`, `x IN array` sources
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierQuote {
    #[default]
    DoubleQuote,
    Brackets,
    Backtick,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringLiteralStyle {
    /// `'it''s'`, optionally with an `N` prefix
    SingleQuoted { unicode_prefix: bool },
    /// `"it's"` with JSON escaping
    Json,
}

impl Default for StringLiteralStyle {
    fn default() -> Self {
        StringLiteralStyle::SingleQuoted {
            unicode_prefix: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanLiterals {
    pub true_text: String,
    pub false_text: String,
}

impl Default for BooleanLiterals {
    fn default() -> Self {
        BooleanLiterals {
            true_text: "TRUE".to_string(),
            false_text: "FALSE".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeLiteral {
    /// Keyword placed before the quoted value, e.g. `TIMESTAMP`
    #[serde(default)]
    pub prefix: Option<String>,
    /// chrono format string
    pub format: String,
}

impl Default for DateTimeLiteral {
    fn default() -> Self {
        DateTimeLiteral {
            prefix: Some("TIMESTAMP".to_string()),
            format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStyle {
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    #[default]
    OffsetFetch,
    /// `LIMIT n OFFSET m`; `unbounded_limit` fills LIMIT when only an offset is set
    LimitOffset { unbounded_limit: Option<String> },
    /// `TOP(n)` without offset, otherwise OFFSET/FETCH (which needs an ORDER BY)
    Top,
    /// `OFFSET m LIMIT n`, both clauses mandatory
    OffsetLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParenthesizeStyle {
    /// Only where operator precedence demands it
    #[default]
    Precedence,
    /// Every binary expression
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatStyle {
    Operator(String),
    Function(String),
}

impl Default for ConcatStyle {
    fn default() -> Self {
        ConcatStyle::Operator("||".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonPathStyle {
    /// `JSON_VALUE(x, '$.a')` for scalars, `JSON_QUERY` for objects and arrays
    #[default]
    JsonValue,
    /// `x -> 'a' ->> 'b'`
    Arrow,
    /// `json_extract(x, '$.a')`
    JsonExtract,
    /// `x["a"][0]`
    Brackets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonObjectStyle {
    /// `JSON_OBJECT('a' VALUE x)`
    KeyValue { function: String, separator: String },
    /// `json_build_object('a', x)`
    Pairs { function: String },
    /// `{"a": x}`
    Literal,
}

impl Default for JsonObjectStyle {
    fn default() -> Self {
        JsonObjectStyle::KeyValue {
            function: "JSON_OBJECT".to_string(),
            separator: " VALUE ".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayLiteralStyle {
    /// `[1, 2]`
    Brackets,
    /// `ARRAY[1, 2]`
    Keyword(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeKind {
    Prefix,
    Suffix,
    Infix,
}

/// How a canonical function is spelled in a dialect. Patterns use `{0}`,
/// `{1}`, ... as argument placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionTemplate {
    Call(String),
    Pattern(String),
    Like(LikeKind),
    Unsupported,
}

lazy_static! {
    /// ANSI spellings of the canonical functions
    static ref ANSI_FUNCTIONS: HashMap<CanonicalFunction, FunctionTemplate> = {
        use CanonicalFunction::*;
        use FunctionTemplate::{Call, Like, Pattern};
        let mut m = HashMap::new();

        // ===== STRING =====
        m.insert(StartsWith, Like(LikeKind::Prefix));
        m.insert(EndsWith, Like(LikeKind::Suffix));
        m.insert(Contains, Like(LikeKind::Infix));
        m.insert(ToUpper, Call("UPPER".to_string()));
        m.insert(ToLower, Call("LOWER".to_string()));
        m.insert(Trim, Call("TRIM".to_string()));
        m.insert(Length, Call("CHAR_LENGTH".to_string()));
        // zero-based start index
        m.insert(Substring, Pattern("SUBSTRING({0} FROM {1} + 1 FOR {2})".to_string()));
        m.insert(Replace, Call("REPLACE".to_string()));
        m.insert(IndexOf, Pattern("POSITION({1} IN {0}) - 1".to_string()));

        // ===== MATH =====
        m.insert(Abs, Call("ABS".to_string()));
        m.insert(Ceiling, Call("CEILING".to_string()));
        m.insert(Floor, Call("FLOOR".to_string()));
        m.insert(Round, Call("ROUND".to_string()));
        m.insert(Power, Call("POWER".to_string()));
        m.insert(Sqrt, Call("SQRT".to_string()));

        // ===== DATETIME =====
        m.insert(Year, Pattern("EXTRACT(YEAR FROM {0})".to_string()));
        m.insert(Month, Pattern("EXTRACT(MONTH FROM {0})".to_string()));
        m.insert(Day, Pattern("EXTRACT(DAY FROM {0})".to_string()));
        m.insert(Hour, Pattern("EXTRACT(HOUR FROM {0})".to_string()));
        m.insert(Minute, Pattern("EXTRACT(MINUTE FROM {0})".to_string()));
        m.insert(Second, Pattern("EXTRACT(SECOND FROM {0})".to_string()));
        m.insert(Now, Pattern("CURRENT_TIMESTAMP".to_string()));

        m.insert(Coalesce, Call("COALESCE".to_string()));
        m
    };
}

/// A table of rendering hooks. `None` means "use the documented default".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialectPolicy {
    pub name: String,
    pub data_shape: Option<DataShape>,
    pub identifier_quote: Option<IdentifierQuote>,
    pub string_literal: Option<StringLiteralStyle>,
    pub boolean_literals: Option<BooleanLiterals>,
    /// Whether boolean values may stand in for conditions and vice versa
    pub native_booleans: Option<bool>,
    pub null_literal: Option<String>,
    pub datetime_literal: Option<DateTimeLiteral>,
    pub parameter_prefix: Option<String>,
    pub pagination: Option<PaginationStyle>,
    pub parenthesize: Option<ParenthesizeStyle>,
    pub not_template: Option<String>,
    pub concat: Option<ConcatStyle>,
    pub count_star: Option<String>,
    pub long_count_function: Option<String>,
    pub table_alias_keyword: Option<bool>,
    pub json_path: Option<JsonPathStyle>,
    pub json_object: Option<JsonObjectStyle>,
    pub json_array_aggregate: Option<String>,
    pub array_wrap: Option<String>,
    pub array_literal: Option<ArrayLiteralStyle>,
    pub iteration_sources: Option<bool>,
    pub root_source: Option<String>,
    pub functions: BTreeMap<CanonicalFunction, FunctionTemplate>,
}

/// A YAML dialect file: a built-in base plus overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectConfig {
    pub base: String,
    #[serde(flatten)]
    pub overrides: DialectPolicy,
}

pub const BUILTIN_DIALECTS: &[&str] = &["ansi", "sqlserver", "postgres", "sqlite", "cosmos"];

impl DialectPolicy {
    pub fn ansi() -> Self {
        DialectPolicy {
            name: "ansi".to_string(),
            ..Default::default()
        }
    }

    pub fn sqlserver() -> Self {
        use CanonicalFunction::*;
        let functions = BTreeMap::from([
            (Length, FunctionTemplate::Call("LEN".to_string())),
            (Substring, FunctionTemplate::Pattern("SUBSTRING({0}, {1} + 1, {2})".to_string())),
            (IndexOf, FunctionTemplate::Pattern("CHARINDEX({1}, {0}) - 1".to_string())),
            (Trim, FunctionTemplate::Pattern("LTRIM(RTRIM({0}))".to_string())),
            (Year, FunctionTemplate::Pattern("DATEPART(year, {0})".to_string())),
            (Month, FunctionTemplate::Pattern("DATEPART(month, {0})".to_string())),
            (Day, FunctionTemplate::Pattern("DATEPART(day, {0})".to_string())),
            (Hour, FunctionTemplate::Pattern("DATEPART(hour, {0})".to_string())),
            (Minute, FunctionTemplate::Pattern("DATEPART(minute, {0})".to_string())),
            (Second, FunctionTemplate::Pattern("DATEPART(second, {0})".to_string())),
            (Now, FunctionTemplate::Pattern("GETDATE()".to_string())),
            (
                ArrayContains,
                FunctionTemplate::Pattern("{1} IN (SELECT [value] FROM OPENJSON({0}))".to_string()),
            ),
            (
                ArrayLength,
                FunctionTemplate::Pattern("(SELECT COUNT(*) FROM OPENJSON({0}))".to_string()),
            ),
        ]);
        DialectPolicy {
            name: "sqlserver".to_string(),
            identifier_quote: Some(IdentifierQuote::Brackets),
            string_literal: Some(StringLiteralStyle::SingleQuoted {
                unicode_prefix: true,
            }),
            boolean_literals: Some(BooleanLiterals {
                true_text: "CAST(1 AS bit)".to_string(),
                false_text: "CAST(0 AS bit)".to_string(),
            }),
            native_booleans: Some(false),
            datetime_literal: Some(DateTimeLiteral {
                prefix: None,
                format: "%Y-%m-%dT%H:%M:%S%.7f".to_string(),
            }),
            pagination: Some(PaginationStyle::Top),
            concat: Some(ConcatStyle::Operator("+".to_string())),
            long_count_function: Some("COUNT_BIG".to_string()),
            json_object: Some(JsonObjectStyle::KeyValue {
                function: "JSON_OBJECT".to_string(),
                separator: ": ".to_string(),
            }),
            functions,
            ..Default::default()
        }
    }

    pub fn postgres() -> Self {
        use CanonicalFunction::*;
        let functions = BTreeMap::from([
            (Length, FunctionTemplate::Call("length".to_string())),
            (Substring, FunctionTemplate::Pattern("substring({0}, {1} + 1, {2})".to_string())),
            (IndexOf, FunctionTemplate::Pattern("strpos({0}, {1}) - 1".to_string())),
            (Now, FunctionTemplate::Pattern("now()".to_string())),
            (ArrayContains, FunctionTemplate::Pattern("{1} = ANY ({0})".to_string())),
            (ArrayLength, FunctionTemplate::Pattern("cardinality({0})".to_string())),
        ]);
        DialectPolicy {
            name: "postgres".to_string(),
            datetime_literal: Some(DateTimeLiteral {
                prefix: Some("TIMESTAMP".to_string()),
                format: "%Y-%m-%dT%H:%M:%S".to_string(),
            }),
            pagination: Some(PaginationStyle::LimitOffset {
                unbounded_limit: None,
            }),
            json_path: Some(JsonPathStyle::Arrow),
            json_object: Some(JsonObjectStyle::Pairs {
                function: "json_build_object".to_string(),
            }),
            json_array_aggregate: Some("COALESCE(json_agg({0}), '[]')".to_string()),
            array_literal: Some(ArrayLiteralStyle::Keyword("ARRAY".to_string())),
            functions,
            ..Default::default()
        }
    }

    pub fn sqlite() -> Self {
        use CanonicalFunction::*;
        let functions = BTreeMap::from([
            (Length, FunctionTemplate::Call("length".to_string())),
            (ToUpper, FunctionTemplate::Call("upper".to_string())),
            (ToLower, FunctionTemplate::Call("lower".to_string())),
            (Trim, FunctionTemplate::Call("trim".to_string())),
            (Substring, FunctionTemplate::Pattern("substr({0}, {1} + 1, {2})".to_string())),
            (IndexOf, FunctionTemplate::Pattern("instr({0}, {1}) - 1".to_string())),
            (Year, FunctionTemplate::Pattern("CAST(strftime('%Y', {0}) AS INTEGER)".to_string())),
            (Month, FunctionTemplate::Pattern("CAST(strftime('%m', {0}) AS INTEGER)".to_string())),
            (Day, FunctionTemplate::Pattern("CAST(strftime('%d', {0}) AS INTEGER)".to_string())),
            (Hour, FunctionTemplate::Pattern("CAST(strftime('%H', {0}) AS INTEGER)".to_string())),
            (Minute, FunctionTemplate::Pattern("CAST(strftime('%M', {0}) AS INTEGER)".to_string())),
            (Second, FunctionTemplate::Pattern("CAST(strftime('%S', {0}) AS INTEGER)".to_string())),
            (Now, FunctionTemplate::Pattern("datetime('now')".to_string())),
            (Ceiling, FunctionTemplate::Call("ceiling".to_string())),
            (Power, FunctionTemplate::Call("pow".to_string())),
            (
                ArrayContains,
                FunctionTemplate::Pattern("{1} IN (SELECT value FROM json_each({0}))".to_string()),
            ),
            (ArrayLength, FunctionTemplate::Pattern("json_array_length({0})".to_string())),
        ]);
        DialectPolicy {
            name: "sqlite".to_string(),
            boolean_literals: Some(BooleanLiterals {
                true_text: "1".to_string(),
                false_text: "0".to_string(),
            }),
            datetime_literal: Some(DateTimeLiteral {
                prefix: None,
                format: "%Y-%m-%d %H:%M:%S".to_string(),
            }),
            pagination: Some(PaginationStyle::LimitOffset {
                unbounded_limit: Some("-1".to_string()),
            }),
            json_path: Some(JsonPathStyle::JsonExtract),
            json_object: Some(JsonObjectStyle::Pairs {
                function: "json_object".to_string(),
            }),
            json_array_aggregate: Some("json_group_array({0})".to_string()),
            functions,
            ..Default::default()
        }
    }

    pub fn cosmos() -> Self {
        use CanonicalFunction::*;
        let functions = BTreeMap::from([
            (StartsWith, FunctionTemplate::Call("STARTSWITH".to_string())),
            (EndsWith, FunctionTemplate::Call("ENDSWITH".to_string())),
            (Contains, FunctionTemplate::Call("CONTAINS".to_string())),
            (Length, FunctionTemplate::Call("LENGTH".to_string())),
            (Substring, FunctionTemplate::Call("SUBSTRING".to_string())),
            (IndexOf, FunctionTemplate::Call("INDEX_OF".to_string())),
            (Trim, FunctionTemplate::Call("TRIM".to_string())),
            (Year, FunctionTemplate::Pattern("DateTimePart(\"yyyy\", {0})".to_string())),
            (Month, FunctionTemplate::Pattern("DateTimePart(\"mm\", {0})".to_string())),
            (Day, FunctionTemplate::Pattern("DateTimePart(\"dd\", {0})".to_string())),
            (Hour, FunctionTemplate::Pattern("DateTimePart(\"hh\", {0})".to_string())),
            (Minute, FunctionTemplate::Pattern("DateTimePart(\"mi\", {0})".to_string())),
            (Second, FunctionTemplate::Pattern("DateTimePart(\"ss\", {0})".to_string())),
            (Now, FunctionTemplate::Pattern("GetCurrentDateTime()".to_string())),
            (Coalesce, FunctionTemplate::Pattern("({0} ?? {1})".to_string())),
            (ArrayContains, FunctionTemplate::Call("ARRAY_CONTAINS".to_string())),
            (ArrayLength, FunctionTemplate::Call("ARRAY_LENGTH".to_string())),
        ]);
        DialectPolicy {
            name: "cosmos".to_string(),
            data_shape: Some(DataShape::Document),
            identifier_quote: Some(IdentifierQuote::None),
            string_literal: Some(StringLiteralStyle::Json),
            boolean_literals: Some(BooleanLiterals {
                true_text: "true".to_string(),
                false_text: "false".to_string(),
            }),
            null_literal: Some("null".to_string()),
            datetime_literal: Some(DateTimeLiteral {
                prefix: None,
                format: "%Y-%m-%dT%H:%M:%S".to_string(),
            }),
            pagination: Some(PaginationStyle::OffsetLimit),
            parenthesize: Some(ParenthesizeStyle::Always),
            not_template: Some("NOT({0})".to_string()),
            concat: Some(ConcatStyle::Operator("||".to_string())),
            count_star: Some("COUNT(1)".to_string()),
            table_alias_keyword: Some(false),
            json_path: Some(JsonPathStyle::Brackets),
            json_object: Some(JsonObjectStyle::Literal),
            array_wrap: Some("ARRAY".to_string()),
            array_literal: Some(ArrayLiteralStyle::Brackets),
            iteration_sources: Some(true),
            root_source: Some("root".to_string()),
            functions,
            ..Default::default()
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ansi" => Some(Self::ansi()),
            "sqlserver" | "mssql" => Some(Self::sqlserver()),
            "postgres" | "postgresql" => Some(Self::postgres()),
            "sqlite" => Some(Self::sqlite()),
            "cosmos" => Some(Self::cosmos()),
            _ => None,
        }
    }

    /// Field-wise overlay: every hook set in `overrides` wins
    pub fn merge(self, overrides: DialectPolicy) -> DialectPolicy {
        let mut functions = self.functions;
        functions.extend(overrides.functions);
        DialectPolicy {
            name: if overrides.name.is_empty() {
                self.name
            } else {
                overrides.name
            },
            data_shape: overrides.data_shape.or(self.data_shape),
            identifier_quote: overrides.identifier_quote.or(self.identifier_quote),
            string_literal: overrides.string_literal.or(self.string_literal),
            boolean_literals: overrides.boolean_literals.or(self.boolean_literals),
            native_booleans: overrides.native_booleans.or(self.native_booleans),
            null_literal: overrides.null_literal.or(self.null_literal),
            datetime_literal: overrides.datetime_literal.or(self.datetime_literal),
            parameter_prefix: overrides.parameter_prefix.or(self.parameter_prefix),
            pagination: overrides.pagination.or(self.pagination),
            parenthesize: overrides.parenthesize.or(self.parenthesize),
            not_template: overrides.not_template.or(self.not_template),
            concat: overrides.concat.or(self.concat),
            count_star: overrides.count_star.or(self.count_star),
            long_count_function: overrides.long_count_function.or(self.long_count_function),
            table_alias_keyword: overrides.table_alias_keyword.or(self.table_alias_keyword),
            json_path: overrides.json_path.or(self.json_path),
            json_object: overrides.json_object.or(self.json_object),
            json_array_aggregate: overrides.json_array_aggregate.or(self.json_array_aggregate),
            array_wrap: overrides.array_wrap.or(self.array_wrap),
            array_literal: overrides.array_literal.or(self.array_literal),
            iteration_sources: overrides.iteration_sources.or(self.iteration_sources),
            root_source: overrides.root_source.or(self.root_source),
            functions,
        }
    }

    fn unsupported(&self, feature: &str) -> QueryCompilationError {
        QueryCompilationError::unsupported(&self.name, feature)
    }

    // ---- hooks with ANSI defaults ----

    /// Default: relational
    pub fn data_shape(&self) -> DataShape {
        self.data_shape.unwrap_or_default()
    }

    pub fn is_document(&self) -> bool {
        self.data_shape() == DataShape::Document
    }

    /// Default: `"double quotes"`
    pub fn identifier_quote(&self) -> IdentifierQuote {
        self.identifier_quote.unwrap_or_default()
    }

    /// Default: `'single quotes'` without prefix
    pub fn string_literal(&self) -> StringLiteralStyle {
        self.string_literal.clone().unwrap_or_default()
    }

    /// Default: `TRUE` / `FALSE`
    pub fn boolean_literal(&self, value: bool) -> String {
        let literals = self.boolean_literals.clone().unwrap_or_default();
        if value {
            literals.true_text
        } else {
            literals.false_text
        }
    }

    /// Default: true
    pub fn native_booleans(&self) -> bool {
        self.native_booleans.unwrap_or(true)
    }

    /// Default: `NULL`
    pub fn null_literal(&self) -> &str {
        self.null_literal.as_deref().unwrap_or("NULL")
    }

    /// Default: `TIMESTAMP '%Y-%m-%d %H:%M:%S'`
    pub fn datetime_literal(&self) -> DateTimeLiteral {
        self.datetime_literal.clone().unwrap_or_default()
    }

    /// Default: `@`
    pub fn parameter_prefix(&self) -> &str {
        self.parameter_prefix.as_deref().unwrap_or("@")
    }

    /// Default: `OFFSET .. ROWS FETCH NEXT .. ROWS ONLY`
    pub fn pagination(&self) -> PaginationStyle {
        self.pagination.clone().unwrap_or_default()
    }

    /// Default: by precedence
    pub fn parenthesize(&self) -> ParenthesizeStyle {
        self.parenthesize.unwrap_or_default()
    }

    /// Default: `NOT ({0})`
    pub fn not_template(&self) -> &str {
        self.not_template.as_deref().unwrap_or("NOT ({0})")
    }

    /// Default: `||`
    pub fn concat(&self) -> ConcatStyle {
        self.concat.clone().unwrap_or_default()
    }

    /// Default: `COUNT(*)`
    pub fn count_star(&self) -> &str {
        self.count_star.as_deref().unwrap_or("COUNT(*)")
    }

    /// Default: `COUNT`
    pub fn long_count_function(&self) -> &str {
        self.long_count_function.as_deref().unwrap_or("COUNT")
    }

    /// Default: `AS` between a source and its alias
    pub fn table_alias_keyword(&self) -> bool {
        self.table_alias_keyword.unwrap_or(true)
    }

    /// Default: `JSON_VALUE` / `JSON_QUERY`
    pub fn json_path(&self) -> JsonPathStyle {
        self.json_path.unwrap_or_default()
    }

    /// Default: `JSON_OBJECT('a' VALUE x)`
    pub fn json_object(&self) -> JsonObjectStyle {
        self.json_object.clone().unwrap_or_default()
    }

    // ---- hooks without defaults ----

    pub fn json_array_aggregate(&self) -> CompilationResult<&str> {
        self.json_array_aggregate
            .as_deref()
            .ok_or_else(|| self.unsupported("JSON array aggregation"))
    }

    pub fn array_wrap(&self) -> CompilationResult<&str> {
        self.array_wrap
            .as_deref()
            .ok_or_else(|| self.unsupported("ARRAY subquery wrapping"))
    }

    pub fn array_literal(&self) -> CompilationResult<ArrayLiteralStyle> {
        self.array_literal
            .clone()
            .ok_or_else(|| self.unsupported("array literals"))
    }

    pub fn require_iteration_sources(&self) -> CompilationResult<()> {
        if self.iteration_sources.unwrap_or(false) {
            Ok(())
        } else {
            Err(self.unsupported("iteration over array-valued expressions"))
        }
    }

    /// Name of the document root source, `root` in `FROM root c`
    pub fn root_source(&self) -> CompilationResult<&str> {
        self.root_source
            .as_deref()
            .ok_or_else(|| self.unsupported("document root sources"))
    }

    /// Dialect override, then the ANSI table; `Unsupported` and missing
    /// entries are errors.
    pub fn function_template(
        &self,
        function: CanonicalFunction,
    ) -> CompilationResult<FunctionTemplate> {
        match self
            .functions
            .get(&function)
            .or_else(|| ANSI_FUNCTIONS.get(&function))
        {
            Some(FunctionTemplate::Unsupported) | None => {
                Err(self.unsupported(&format!("function `{}`", function.name())))
            }
            Some(template) => Ok(template.clone()),
        }
    }
}

impl DialectConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, DialectError> {
        let contents = fs::read_to_string(path).map_err(|e| DialectError::ReadError {
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, DialectError> {
        serde_yaml::from_str(yaml).map_err(|e| DialectError::ParseError {
            error: e.to_string(),
        })
    }

    pub fn resolve(self) -> Result<DialectPolicy, DialectError> {
        let base = DialectPolicy::builtin(&self.base).ok_or_else(|| DialectError::UnknownBase {
            name: self.base.clone(),
        })?;
        Ok(base.merge(self.overrides))
    }
}

/// Loads a dialect policy from a built-in name or a YAML file path
pub fn load_dialect(name_or_path: &str) -> Result<DialectPolicy, DialectError> {
    if let Some(policy) = DialectPolicy::builtin(name_or_path) {
        return Ok(policy);
    }
    if name_or_path.ends_with(".yaml") || name_or_path.ends_with(".yml") {
        log::debug!("Loading dialect policy from {}", name_or_path);
        return DialectConfig::from_yaml_file(name_or_path)?.resolve();
    }
    Err(DialectError::UnknownBase {
        name: name_or_path.to_string(),
    })
}
