/// Method and member translation table
///
/// Maps source-language method calls (`o.Name.StartsWith(x)`, `Math.Abs(x)`)
/// and member functions (`o.Name.Length`, `o.OrderDate.Year`) to canonical
/// SQL functions. The dialect decides how a canonical function is spelled.
use std::collections::HashMap;

use crate::model::ValueType;
use crate::sql_ir::CanonicalFunction;

/// Result type of a mapped call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultType {
    Fixed(ValueType),
    /// Same type as the argument at this position (the instance is argument 0)
    SameAs(usize),
}

/// Method mapping entry
#[derive(Debug, Clone, Copy)]
pub struct MethodMapping {
    pub function: CanonicalFunction,
    pub result: ResultType,
    /// Argument count including the instance for instance methods
    pub arity: usize,
}

impl MethodMapping {
    pub fn result_type(&self, args: &[ValueType]) -> ValueType {
        match self.result {
            ResultType::Fixed(value_type) => value_type,
            ResultType::SameAs(i) => args.get(i).copied().unwrap_or(ValueType::Unknown),
        }
    }
}

/// Instance method on a translated target, e.g. `StartsWith`
pub fn instance_method(name: &str) -> Option<MethodMapping> {
    INSTANCE_METHODS.get(name).copied()
}

/// Static method on a well-known type, e.g. `Math.Abs`
pub fn static_method(qualified_name: &str) -> Option<MethodMapping> {
    STATIC_METHODS.get(qualified_name).copied()
}

/// Property-like member with a function translation, keyed by the target's
/// value type: `Length` means string length on strings, element count on arrays.
pub fn member_function(target: ValueType, name: &str) -> Option<MethodMapping> {
    match (target, name) {
        (ValueType::Array, "Length" | "Count") => Some(MethodMapping {
            function: CanonicalFunction::ArrayLength,
            result: ResultType::Fixed(ValueType::Int),
            arity: 1,
        }),
        (ValueType::Array, _) => None,
        _ => MEMBER_FUNCTIONS.get(name).copied(),
    }
}

// Static mapping tables
lazy_static::lazy_static! {
    static ref INSTANCE_METHODS: HashMap<&'static str, MethodMapping> = {
        use CanonicalFunction::*;
        use ResultType::{Fixed, SameAs};
        let mut m = HashMap::new();

        // ===== STRING METHODS =====
        m.insert("StartsWith", MethodMapping { function: StartsWith, result: Fixed(ValueType::Bool), arity: 2 });
        m.insert("EndsWith", MethodMapping { function: EndsWith, result: Fixed(ValueType::Bool), arity: 2 });
        // string containment only; collection Contains is resolved by the translator
        m.insert("Contains", MethodMapping { function: Contains, result: Fixed(ValueType::Bool), arity: 2 });
        m.insert("ToUpper", MethodMapping { function: ToUpper, result: Fixed(ValueType::String), arity: 1 });
        m.insert("ToLower", MethodMapping { function: ToLower, result: Fixed(ValueType::String), arity: 1 });
        m.insert("Trim", MethodMapping { function: Trim, result: Fixed(ValueType::String), arity: 1 });
        // s.Substring(start, length), zero-based start
        m.insert("Substring", MethodMapping { function: Substring, result: Fixed(ValueType::String), arity: 3 });
        m.insert("Replace", MethodMapping { function: Replace, result: Fixed(ValueType::String), arity: 3 });
        m.insert("IndexOf", MethodMapping { function: IndexOf, result: Fixed(ValueType::Int), arity: 2 });

        // ===== OTHER =====
        m.insert("GetValueOrDefault", MethodMapping { function: Coalesce, result: SameAs(0), arity: 2 });
        m
    };

    static ref STATIC_METHODS: HashMap<&'static str, MethodMapping> = {
        use CanonicalFunction::*;
        use ResultType::{Fixed, SameAs};
        let mut m = HashMap::new();

        // ===== MATH =====
        m.insert("Math.Abs", MethodMapping { function: Abs, result: SameAs(0), arity: 1 });
        m.insert("Math.Ceiling", MethodMapping { function: Ceiling, result: SameAs(0), arity: 1 });
        m.insert("Math.Floor", MethodMapping { function: Floor, result: SameAs(0), arity: 1 });
        m.insert("Math.Round", MethodMapping { function: Round, result: SameAs(0), arity: 1 });
        m.insert("Math.Pow", MethodMapping { function: Power, result: Fixed(ValueType::Double), arity: 2 });
        m.insert("Math.Sqrt", MethodMapping { function: Sqrt, result: Fixed(ValueType::Double), arity: 1 });

        // ===== DATETIME =====
        m.insert("DateTime.Now", MethodMapping { function: Now, result: Fixed(ValueType::DateTime), arity: 0 });
        m.insert("DateTime.UtcNow", MethodMapping { function: Now, result: Fixed(ValueType::DateTime), arity: 0 });
        m
    };

    static ref MEMBER_FUNCTIONS: HashMap<&'static str, MethodMapping> = {
        use CanonicalFunction::*;
        use ResultType::Fixed;
        let mut m = HashMap::new();

        m.insert("Length", MethodMapping { function: Length, result: Fixed(ValueType::Int), arity: 1 });

        // ===== DATETIME PARTS =====
        m.insert("Year", MethodMapping { function: Year, result: Fixed(ValueType::Int), arity: 1 });
        m.insert("Month", MethodMapping { function: Month, result: Fixed(ValueType::Int), arity: 1 });
        m.insert("Day", MethodMapping { function: Day, result: Fixed(ValueType::Int), arity: 1 });
        m.insert("Hour", MethodMapping { function: Hour, result: Fixed(ValueType::Int), arity: 1 });
        m.insert("Minute", MethodMapping { function: Minute, result: Fixed(ValueType::Int), arity: 1 });
        m.insert("Second", MethodMapping { function: Second, result: Fixed(ValueType::Int), arity: 1 });
        m
    };
}
