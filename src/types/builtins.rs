//! Builtin call table

use crate::{Error, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Operand contract family of a builtin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinClass {
    /// `plus minus multiply divide`
    Arithmetic,
    /// `negate`
    Negate,
    /// `equal not_equal less_than ...`
    Comparison,
    /// `and or`
    Boolean,
    /// `not`
    Not,
    /// `clamp min max abs sign saturate pow floor sqrt sin ...`
    Math,
    /// `convert<T>`
    Convert,
    /// `location`
    Location,
    /// `dereference`
    Dereference,
    /// `assign`
    Assign,
    /// `increment decrement`
    Step,
    /// `if`
    If,
    /// `repeat`
    Repeat,
    /// `loop`, which fails on a negative count
    Loop,
    /// `while`
    While,
    /// `for(init, cond, step)`
    For,
    /// `block`
    Block,
    /// `return`
    Return,
    /// `print print_line print_error print_line_error`
    Print,
    /// `count`
    Count,
    /// `at at_unsafe`
    Index,
    /// `array<T> vector<T> map<K, V>` literals
    Collection,
    /// `push reserve`
    Heap,
    /// `notify insert take`
    Pathspace,
}

impl BuiltinClass {
    /// Builtins that take a trailing block
    pub fn takes_body(self) -> bool {
        matches!(
            self,
            BuiltinClass::Repeat | BuiltinClass::Loop | BuiltinClass::While | BuiltinClass::For | BuiltinClass::Block
        )
    }

    /// Statement-only builtins that never leave a value
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            BuiltinClass::Return
                | BuiltinClass::Repeat
                | BuiltinClass::Loop
                | BuiltinClass::While
                | BuiltinClass::For
                | BuiltinClass::Print
                | BuiltinClass::Pathspace
        )
    }
}

/// Static description of a builtin
#[derive(Debug, Clone, Copy)]
pub struct BuiltinInfo {
    /// Contract family
    pub class: BuiltinClass,
    /// Minimum positional arguments
    pub min_args: usize,
    /// Maximum positional arguments (`None` = unbounded)
    pub max_args: Option<usize>,
}

impl BuiltinInfo {
    const fn exact(class: BuiltinClass, n: usize) -> Self {
        Self {
            class,
            min_args: n,
            max_args: Some(n),
        }
    }
}

lazy_static! {
    static ref BUILTINS: HashMap<&'static str, BuiltinInfo> = {
        use BuiltinClass::*;
        let mut m = HashMap::new();
        for name in ["plus", "minus", "multiply", "divide"] {
            m.insert(name, BuiltinInfo::exact(Arithmetic, 2));
        }
        m.insert("negate", BuiltinInfo::exact(Negate, 1));
        for name in ["equal", "not_equal", "less_than", "less_equal", "greater_than", "greater_equal"] {
            m.insert(name, BuiltinInfo::exact(Comparison, 2));
        }
        m.insert("and", BuiltinInfo::exact(Boolean, 2));
        m.insert("or", BuiltinInfo::exact(Boolean, 2));
        m.insert("not", BuiltinInfo::exact(Not, 1));
        m.insert("clamp", BuiltinInfo::exact(Math, 3));
        for name in ["min", "max", "pow"] {
            m.insert(name, BuiltinInfo::exact(Math, 2));
        }
        for name in [
            "abs", "sign", "saturate", "floor", "ceil", "round", "trunc", "fract", "sqrt", "cbrt", "exp", "log",
            "sin", "cos", "tan",
        ] {
            m.insert(name, BuiltinInfo::exact(Math, 1));
        }
        m.insert("convert", BuiltinInfo::exact(Convert, 1));
        m.insert("location", BuiltinInfo::exact(Location, 1));
        m.insert("dereference", BuiltinInfo::exact(Dereference, 1));
        m.insert("assign", BuiltinInfo::exact(Assign, 2));
        m.insert("increment", BuiltinInfo::exact(Step, 1));
        m.insert("decrement", BuiltinInfo::exact(Step, 1));
        m.insert("if", BuiltinInfo::exact(If, 3));
        m.insert("repeat", BuiltinInfo::exact(Repeat, 1));
        m.insert("loop", BuiltinInfo::exact(Loop, 1));
        m.insert("while", BuiltinInfo::exact(While, 1));
        m.insert("for", BuiltinInfo::exact(For, 3));
        m.insert("block", BuiltinInfo::exact(Block, 0));
        m.insert(
            "return",
            BuiltinInfo {
                class: Return,
                min_args: 0,
                max_args: Some(1),
            },
        );
        for name in ["print", "print_line", "print_error", "print_line_error"] {
            m.insert(name, BuiltinInfo::exact(Print, 1));
        }
        m.insert("count", BuiltinInfo::exact(Count, 1));
        m.insert("at", BuiltinInfo::exact(Index, 2));
        m.insert("at_unsafe", BuiltinInfo::exact(Index, 2));
        for name in ["array", "vector", "map"] {
            m.insert(
                name,
                BuiltinInfo {
                    class: Collection,
                    min_args: 0,
                    max_args: None,
                },
            );
        }
        m.insert("push", BuiltinInfo::exact(Heap, 2));
        m.insert("reserve", BuiltinInfo::exact(Heap, 2));
        m.insert("notify", BuiltinInfo::exact(Pathspace, 2));
        m.insert("insert", BuiltinInfo::exact(Pathspace, 2));
        m.insert("take", BuiltinInfo::exact(Pathspace, 1));
        m
    };
}

/// Builtin description for a plain call name
pub fn lookup(name: &str) -> Option<&'static BuiltinInfo> {
    BUILTINS.get(name)
}

/// Whether `name` is a builtin
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains_key(name)
}

/// Fail unless `count` positional arguments fit builtin `name`
pub fn check_arity(name: &str, info: &BuiltinInfo, count: usize) -> Result<()> {
    let too_many = info.max_args.is_some_and(|max| count > max);
    if count < info.min_args || too_many {
        return Err(Error::call_shape(format!(
            "argument count mismatch for builtin {}",
            name
        )));
    }
    Ok(())
}

/// Print builtins: (newline, stderr)
pub fn print_flags(name: &str) -> (bool, bool) {
    match name {
        "print_line" => (true, false),
        "print_error" => (false, true),
        "print_line_error" => (true, true),
        _ => (false, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_arity() {
        let info = lookup("clamp").unwrap();
        assert_eq!(info.class, BuiltinClass::Math);
        assert!(check_arity("clamp", info, 3).is_ok());
        assert_eq!(
            check_arity("clamp", info, 2).unwrap_err().to_string(),
            "argument count mismatch for builtin clamp"
        );
        let ret = lookup("return").unwrap();
        assert!(check_arity("return", ret, 0).is_ok());
        assert!(check_arity("return", ret, 2).is_err());
        assert!(check_arity("vector", lookup("vector").unwrap(), 9).is_ok());
        assert!(!is_builtin("square"));
    }

    #[test]
    fn test_loop_classes_take_bodies() {
        for name in ["repeat", "loop", "while", "for", "block"] {
            assert!(lookup(name).unwrap().class.takes_body(), "{}", name);
        }
        assert!(!lookup("if").unwrap().class.takes_body());
        assert_eq!(lookup("for").unwrap().max_args, Some(3));
        assert_eq!(lookup("map").unwrap().class, BuiltinClass::Collection);
        assert!(lookup("while").unwrap().class.is_statement());
        assert!(!lookup("increment").unwrap().class.is_statement());
    }

    #[test]
    fn test_print_flags() {
        assert_eq!(print_flags("print_line_error"), (true, true));
        assert_eq!(print_flags("print"), (false, false));
    }
}
