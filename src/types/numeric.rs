//! Numeric & pointer operator resolution
//!
//! Given already-inferred operand kinds, decides whether an operator is
//! legal and which opcode width to emit. Checks run in a fixed order:
//! non-numeric operands, then signed/unsigned mixing, then int/float mixing,
//! and finally the wider kind wins (`F64 > F32 > I64/U64 > I32`).
//!
//! Pointer arithmetic is separate: `plus`/`minus` with a pointer on the left
//! and an integer offset on the right always lowers to 64-bit integer
//! add/subtract on the raw address.

use super::ValueKind;
use crate::{Error, Result};

/// Opcode width selected for a numeric operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericWidth {
    /// 32-bit signed
    I32,
    /// 64-bit signed
    I64,
    /// 64-bit unsigned
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl NumericWidth {
    /// Width of a numeric kind; bool counts as I32
    pub fn of(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Int32 | ValueKind::Bool => Some(NumericWidth::I32),
            ValueKind::Int64 => Some(NumericWidth::I64),
            ValueKind::UInt64 => Some(NumericWidth::U64),
            ValueKind::Float32 => Some(NumericWidth::F32),
            ValueKind::Float64 => Some(NumericWidth::F64),
            ValueKind::String | ValueKind::Unknown => None,
        }
    }

    /// Value kind produced at this width
    pub fn value_kind(self) -> ValueKind {
        match self {
            NumericWidth::I32 => ValueKind::Int32,
            NumericWidth::I64 => ValueKind::Int64,
            NumericWidth::U64 => ValueKind::UInt64,
            NumericWidth::F32 => ValueKind::Float32,
            NumericWidth::F64 => ValueKind::Float64,
        }
    }

    /// F32 or F64
    pub fn is_float(self) -> bool {
        matches!(self, NumericWidth::F32 | NumericWidth::F64)
    }

    fn rank(self) -> u8 {
        match self {
            NumericWidth::I32 => 0,
            NumericWidth::I64 | NumericWidth::U64 => 1,
            NumericWidth::F32 => 2,
            NumericWidth::F64 => 3,
        }
    }
}

/// Operand as seen by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Scalar value
    Value(ValueKind),
    /// Raw pointer to a value of the given kind
    Pointer(ValueKind),
}

impl OperandKind {
    /// Scalar kind; pointers are 64-bit addresses
    pub fn value_kind(self) -> ValueKind {
        match self {
            OperandKind::Value(kind) => kind,
            OperandKind::Pointer(_) => ValueKind::Int64,
        }
    }

    /// Whether this is a pointer
    pub fn is_pointer(self) -> bool {
        matches!(self, OperandKind::Pointer(_))
    }
}

/// Binary arithmetic builtins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    /// `plus`
    Plus,
    /// `minus`
    Minus,
    /// `multiply`
    Multiply,
    /// `divide`
    Divide,
}

impl ArithmeticOp {
    /// Map a builtin name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "plus" => Some(ArithmeticOp::Plus),
            "minus" => Some(ArithmeticOp::Minus),
            "multiply" => Some(ArithmeticOp::Multiply),
            "divide" => Some(ArithmeticOp::Divide),
            _ => None,
        }
    }
}

/// Comparison builtins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `equal`
    Equal,
    /// `not_equal`
    NotEqual,
    /// `less_than`
    Less,
    /// `less_equal`
    LessEqual,
    /// `greater_than`
    Greater,
    /// `greater_equal`
    GreaterEqual,
}

impl ComparisonOp {
    /// Map a builtin name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "equal" => Some(ComparisonOp::Equal),
            "not_equal" => Some(ComparisonOp::NotEqual),
            "less_than" => Some(ComparisonOp::Less),
            "less_equal" => Some(ComparisonOp::LessEqual),
            "greater_than" => Some(ComparisonOp::Greater),
            "greater_equal" => Some(ComparisonOp::GreaterEqual),
            _ => None,
        }
    }
}

/// Outcome of resolving a binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticResolution {
    /// Numeric operation at the given width
    Numeric(NumericWidth),
    /// Address arithmetic; result is a pointer to `pointee`
    Pointer {
        /// Kind the resulting pointer points at
        pointee: ValueKind,
    },
}

impl ArithmeticResolution {
    /// Operand kind of the result
    pub fn result(self) -> OperandKind {
        match self {
            ArithmeticResolution::Numeric(width) => OperandKind::Value(width.value_kind()),
            ArithmeticResolution::Pointer { pointee } => OperandKind::Pointer(pointee),
        }
    }
}

/// Which diagnostic wording a numeric pair check uses
#[derive(Debug, Clone, Copy)]
enum Family<'a> {
    Arithmetic,
    Comparison,
    Builtin(&'a str),
}

impl Family<'_> {
    fn non_numeric(self) -> String {
        match self {
            Family::Arithmetic => "arithmetic operators require numeric operands".to_string(),
            Family::Comparison => "comparisons require numeric or bool operands".to_string(),
            Family::Builtin(name) => format!("{} requires numeric operands", name),
        }
    }

    fn mixed(self, what: &str) -> String {
        match self {
            Family::Arithmetic => format!("arithmetic operators do not support mixed {} operands", what),
            Family::Comparison => format!("comparisons do not support mixed {} operands", what),
            Family::Builtin(name) => format!("{} does not support mixed {} operands", name, what),
        }
    }
}

fn width_for(kind: ValueKind, family: Family<'_>) -> Result<NumericWidth> {
    let allowed = match family {
        Family::Comparison => kind.is_numeric() || kind == ValueKind::Bool,
        _ => kind.is_numeric(),
    };
    if !allowed {
        return Err(Error::type_error(family.non_numeric()));
    }
    NumericWidth::of(kind).ok_or_else(|| Error::type_error(family.non_numeric()))
}

fn combine(lhs: ValueKind, rhs: ValueKind, family: Family<'_>) -> Result<NumericWidth> {
    let left = width_for(lhs, family)?;
    let right = width_for(rhs, family)?;
    let left_unsigned = left == NumericWidth::U64;
    let right_unsigned = right == NumericWidth::U64;
    let left_float = matches!(left, NumericWidth::F32 | NumericWidth::F64);
    let right_float = matches!(right, NumericWidth::F32 | NumericWidth::F64);
    if left_unsigned != right_unsigned && !left_float && !right_float {
        return Err(Error::type_error(family.mixed("signed/unsigned")));
    }
    if left_float != right_float {
        return Err(Error::type_error(family.mixed("int/float")));
    }
    Ok(if right.rank() > left.rank() { right } else { left })
}

/// Resolve `plus`/`minus`/`multiply`/`divide`
pub fn resolve_arithmetic(
    op: ArithmeticOp,
    lhs: OperandKind,
    rhs: OperandKind,
) -> Result<ArithmeticResolution> {
    match (lhs, rhs) {
        (OperandKind::Pointer(_), OperandKind::Pointer(_)) => Err(Error::type_error(
            "pointer arithmetic does not support pointer + pointer",
        )),
        (OperandKind::Value(_), OperandKind::Pointer(_)) => Err(Error::type_error(
            "pointer arithmetic requires pointer on the left",
        )),
        (OperandKind::Pointer(pointee), OperandKind::Value(offset)) => {
            if !matches!(op, ArithmeticOp::Plus | ArithmeticOp::Minus) {
                return Err(Error::type_error(Family::Arithmetic.non_numeric()));
            }
            if !offset.is_integer() {
                return Err(Error::type_error("pointer arithmetic requires an integer offset"));
            }
            Ok(ArithmeticResolution::Pointer { pointee })
        }
        (OperandKind::Value(left), OperandKind::Value(right)) => {
            combine(left, right, Family::Arithmetic).map(ArithmeticResolution::Numeric)
        }
    }
}

/// Resolve `negate`
pub fn resolve_negate(operand: OperandKind) -> Result<NumericWidth> {
    let kind = match operand {
        OperandKind::Value(kind) => kind,
        OperandKind::Pointer(_) => return Err(Error::type_error(Family::Arithmetic.non_numeric())),
    };
    let width = width_for(kind, Family::Arithmetic)?;
    if width == NumericWidth::U64 {
        return Err(Error::type_error("negate does not support unsigned operands"));
    }
    Ok(width)
}

/// Resolve a comparison; bool operands compare as i32
pub fn resolve_comparison(lhs: OperandKind, rhs: OperandKind) -> Result<NumericWidth> {
    combine(lhs.value_kind(), rhs.value_kind(), Family::Comparison)
}

/// Math builtins defined only on float operands
pub const FLOAT_MATH_BUILTINS: &[&str] = &["sqrt", "cbrt", "exp", "log", "sin", "cos", "tan"];

/// Resolve a math builtin (`clamp`, `pow`, `floor`, `sqrt`, `sin`, ...)
pub fn resolve_math_builtin(name: &str, operands: &[OperandKind]) -> Result<NumericWidth> {
    let family = Family::Builtin(name);
    let mut width: Option<NumericWidth> = None;
    for operand in operands {
        if operand.is_pointer() {
            return Err(Error::type_error(family.non_numeric()));
        }
        let kind = operand.value_kind();
        width = Some(match width {
            None => width_for(kind, family)?,
            Some(current) => combine(current.value_kind(), kind, family)?,
        });
    }
    let width = width.ok_or_else(|| Error::type_error(family.non_numeric()))?;
    if FLOAT_MATH_BUILTINS.contains(&name) && !width.is_float() {
        return Err(Error::type_error(format!("{} requires float argument", name)));
    }
    Ok(width)
}
