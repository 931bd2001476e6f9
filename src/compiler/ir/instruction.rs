//! IR instruction definitions

use crate::types::numeric::{ArithmeticOp, ComparisonOp, NumericWidth};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Stack-machine opcode
///
/// Discriminants are the wire encoding and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IrOpcode {
    // Stack and locals
    /// Push `imm` as a sign-extended i32
    PushI32 = 1,
    /// Push `imm` as an i64/u64
    PushI64 = 2,
    /// Push `imm` as f32 bits
    PushF32 = 3,
    /// Push `imm` as f64 bits
    PushF64 = 4,
    /// Discard the top value
    Pop = 5,
    /// Duplicate the top value
    Dup = 6,
    /// Push local `imm`
    LoadLocal = 7,
    /// Pop into local `imm`
    StoreLocal = 8,
    /// Push the address of local `imm`
    AddressOfLocal = 9,
    /// Pop an address, push the value stored there
    LoadIndirect = 10,
    /// Pop value then address, store, push the value back
    StoreIndirect = 11,

    // Arithmetic
    /// i32 add
    AddI32 = 12,
    /// i32 subtract
    SubI32 = 13,
    /// i32 multiply
    MulI32 = 14,
    /// i32 divide
    DivI32 = 15,
    /// i32 negate
    NegI32 = 16,
    /// i64 add (also u64)
    AddI64 = 17,
    /// i64 subtract (also u64)
    SubI64 = 18,
    /// i64 multiply (also u64)
    MulI64 = 19,
    /// i64 divide
    DivI64 = 20,
    /// i64 negate
    NegI64 = 21,
    /// u64 divide
    DivU64 = 22,
    /// f32 add
    AddF32 = 23,
    /// f32 subtract
    SubF32 = 24,
    /// f32 multiply
    MulF32 = 25,
    /// f32 divide
    DivF32 = 26,
    /// f32 negate
    NegF32 = 27,
    /// f64 add
    AddF64 = 28,
    /// f64 subtract
    SubF64 = 29,
    /// f64 multiply
    MulF64 = 30,
    /// f64 divide
    DivF64 = 31,
    /// f64 negate
    NegF64 = 32,

    // Comparisons push 1 or 0 as i32
    /// i32 ==
    CmpEqI32 = 33,
    /// i32 !=
    CmpNeI32 = 34,
    /// i32 <
    CmpLtI32 = 35,
    /// i32 <=
    CmpLeI32 = 36,
    /// i32 >
    CmpGtI32 = 37,
    /// i32 >=
    CmpGeI32 = 38,
    /// i64 == (also u64)
    CmpEqI64 = 39,
    /// i64 != (also u64)
    CmpNeI64 = 40,
    /// i64 <
    CmpLtI64 = 41,
    /// i64 <=
    CmpLeI64 = 42,
    /// i64 >
    CmpGtI64 = 43,
    /// i64 >=
    CmpGeI64 = 44,
    /// u64 <
    CmpLtU64 = 45,
    /// u64 <=
    CmpLeU64 = 46,
    /// u64 >
    CmpGtU64 = 47,
    /// u64 >=
    CmpGeU64 = 48,
    /// f32 ==
    CmpEqF32 = 49,
    /// f32 !=
    CmpNeF32 = 50,
    /// f32 <
    CmpLtF32 = 51,
    /// f32 <=
    CmpLeF32 = 52,
    /// f32 >
    CmpGtF32 = 53,
    /// f32 >=
    CmpGeF32 = 54,
    /// f64 ==
    CmpEqF64 = 55,
    /// f64 !=
    CmpNeF64 = 56,
    /// f64 <
    CmpLtF64 = 57,
    /// f64 <=
    CmpLeF64 = 58,
    /// f64 >
    CmpGtF64 = 59,
    /// f64 >=
    CmpGeF64 = 60,

    // Conversions
    /// i32 → f32
    ConvertI32ToF32 = 61,
    /// i32 → f64
    ConvertI32ToF64 = 62,
    /// i64 → f32
    ConvertI64ToF32 = 63,
    /// i64 → f64
    ConvertI64ToF64 = 64,
    /// u64 → f32
    ConvertU64ToF32 = 65,
    /// u64 → f64
    ConvertU64ToF64 = 66,
    /// f32 → i32
    ConvertF32ToI32 = 67,
    /// f32 → i64
    ConvertF32ToI64 = 68,
    /// f32 → u64
    ConvertF32ToU64 = 69,
    /// f64 → i32
    ConvertF64ToI32 = 70,
    /// f64 → i64
    ConvertF64ToI64 = 71,
    /// f64 → u64
    ConvertF64ToU64 = 72,
    /// f32 → f64
    ConvertF32ToF64 = 73,
    /// f64 → f32
    ConvertF64ToF32 = 74,

    // Control flow; `imm` is an absolute instruction index
    /// Unconditional jump
    Jump = 75,
    /// Pop; jump when zero
    JumpIfZero = 76,
    /// Return without a value
    ReturnVoid = 77,
    /// Pop and return an i32
    ReturnI32 = 78,
    /// Pop and return an i64/u64
    ReturnI64 = 79,
    /// Pop and return an f32
    ReturnF32 = 80,
    /// Pop and return an f64
    ReturnF64 = 81,

    // Entry arguments and output
    /// Push the entry argument count as i32
    PushArgc = 82,
    /// Print string-table entry; `imm = (index << 2) | flags`
    PrintString = 83,
    /// Pop and print an i32; `imm = flags`
    PrintI32 = 84,
    /// Pop and print an i64; `imm = flags`
    PrintI64 = 85,
    /// Pop and print a u64; `imm = flags`
    PrintU64 = 86,
    /// Pop an argv index, bounds-check it, print the argument
    PrintArgv = 87,
    /// Pop an argv index proven in range, print the argument
    PrintArgvUnsafe = 88,

    // Strings
    /// Pop an index; push byte `index` of string-table entry `imm` as i32
    LoadStringByte = 89,
}

impl IrOpcode {
    /// Every opcode in encoding order
    pub const ALL: [IrOpcode; 89] = {
        use IrOpcode::*;
        [
            PushI32, PushI64, PushF32, PushF64, Pop, Dup, LoadLocal, StoreLocal, AddressOfLocal,
            LoadIndirect, StoreIndirect, AddI32, SubI32, MulI32, DivI32, NegI32, AddI64, SubI64,
            MulI64, DivI64, NegI64, DivU64, AddF32, SubF32, MulF32, DivF32, NegF32, AddF64,
            SubF64, MulF64, DivF64, NegF64, CmpEqI32, CmpNeI32, CmpLtI32, CmpLeI32, CmpGtI32,
            CmpGeI32, CmpEqI64, CmpNeI64, CmpLtI64, CmpLeI64, CmpGtI64, CmpGeI64, CmpLtU64,
            CmpLeU64, CmpGtU64, CmpGeU64, CmpEqF32, CmpNeF32, CmpLtF32, CmpLeF32, CmpGtF32,
            CmpGeF32, CmpEqF64, CmpNeF64, CmpLtF64, CmpLeF64, CmpGtF64, CmpGeF64,
            ConvertI32ToF32, ConvertI32ToF64, ConvertI64ToF32, ConvertI64ToF64, ConvertU64ToF32,
            ConvertU64ToF64, ConvertF32ToI32, ConvertF32ToI64, ConvertF32ToU64, ConvertF64ToI32,
            ConvertF64ToI64, ConvertF64ToU64, ConvertF32ToF64, ConvertF64ToF32, Jump, JumpIfZero,
            ReturnVoid, ReturnI32, ReturnI64, ReturnF32, ReturnF64, PushArgc, PrintString,
            PrintI32, PrintI64, PrintU64, PrintArgv, PrintArgvUnsafe, LoadStringByte,
        ]
    };

    /// Arithmetic opcode for `op` at `width`; u64 shares the i64 add/sub/mul
    pub fn arithmetic(op: ArithmeticOp, width: NumericWidth) -> Self {
        use ArithmeticOp::*;
        use NumericWidth::*;
        match (op, width) {
            (Plus, I32) => IrOpcode::AddI32,
            (Minus, I32) => IrOpcode::SubI32,
            (Multiply, I32) => IrOpcode::MulI32,
            (Divide, I32) => IrOpcode::DivI32,
            (Plus, I64 | U64) => IrOpcode::AddI64,
            (Minus, I64 | U64) => IrOpcode::SubI64,
            (Multiply, I64 | U64) => IrOpcode::MulI64,
            (Divide, I64) => IrOpcode::DivI64,
            (Divide, U64) => IrOpcode::DivU64,
            (Plus, F32) => IrOpcode::AddF32,
            (Minus, F32) => IrOpcode::SubF32,
            (Multiply, F32) => IrOpcode::MulF32,
            (Divide, F32) => IrOpcode::DivF32,
            (Plus, F64) => IrOpcode::AddF64,
            (Minus, F64) => IrOpcode::SubF64,
            (Multiply, F64) => IrOpcode::MulF64,
            (Divide, F64) => IrOpcode::DivF64,
        }
    }

    /// Negation opcode; unsigned values have none
    pub fn negate(width: NumericWidth) -> Option<Self> {
        match width {
            NumericWidth::I32 => Some(IrOpcode::NegI32),
            NumericWidth::I64 => Some(IrOpcode::NegI64),
            NumericWidth::U64 => None,
            NumericWidth::F32 => Some(IrOpcode::NegF32),
            NumericWidth::F64 => Some(IrOpcode::NegF64),
        }
    }

    /// Comparison opcode for `op` at `width`; u64 equality uses the i64 forms
    pub fn compare(op: ComparisonOp, width: NumericWidth) -> Self {
        use ComparisonOp::*;
        use NumericWidth::*;
        match (op, width) {
            (Equal, I32) => IrOpcode::CmpEqI32,
            (NotEqual, I32) => IrOpcode::CmpNeI32,
            (Less, I32) => IrOpcode::CmpLtI32,
            (LessEqual, I32) => IrOpcode::CmpLeI32,
            (Greater, I32) => IrOpcode::CmpGtI32,
            (GreaterEqual, I32) => IrOpcode::CmpGeI32,
            (Equal, I64 | U64) => IrOpcode::CmpEqI64,
            (NotEqual, I64 | U64) => IrOpcode::CmpNeI64,
            (Less, I64) => IrOpcode::CmpLtI64,
            (LessEqual, I64) => IrOpcode::CmpLeI64,
            (Greater, I64) => IrOpcode::CmpGtI64,
            (GreaterEqual, I64) => IrOpcode::CmpGeI64,
            (Less, U64) => IrOpcode::CmpLtU64,
            (LessEqual, U64) => IrOpcode::CmpLeU64,
            (Greater, U64) => IrOpcode::CmpGtU64,
            (GreaterEqual, U64) => IrOpcode::CmpGeU64,
            (Equal, F32) => IrOpcode::CmpEqF32,
            (NotEqual, F32) => IrOpcode::CmpNeF32,
            (Less, F32) => IrOpcode::CmpLtF32,
            (LessEqual, F32) => IrOpcode::CmpLeF32,
            (Greater, F32) => IrOpcode::CmpGtF32,
            (GreaterEqual, F32) => IrOpcode::CmpGeF32,
            (Equal, F64) => IrOpcode::CmpEqF64,
            (NotEqual, F64) => IrOpcode::CmpNeF64,
            (Less, F64) => IrOpcode::CmpLtF64,
            (LessEqual, F64) => IrOpcode::CmpLeF64,
            (Greater, F64) => IrOpcode::CmpGtF64,
            (GreaterEqual, F64) => IrOpcode::CmpGeF64,
        }
    }

    /// Conversion between widths; `None` when the stack form is already right
    pub fn convert(from: NumericWidth, to: NumericWidth) -> Option<Self> {
        use NumericWidth::*;
        match (from, to) {
            (I32, F32) => Some(IrOpcode::ConvertI32ToF32),
            (I32, F64) => Some(IrOpcode::ConvertI32ToF64),
            (I64, F32) => Some(IrOpcode::ConvertI64ToF32),
            (I64, F64) => Some(IrOpcode::ConvertI64ToF64),
            (U64, F32) => Some(IrOpcode::ConvertU64ToF32),
            (U64, F64) => Some(IrOpcode::ConvertU64ToF64),
            (F32, I32) => Some(IrOpcode::ConvertF32ToI32),
            (F32, I64) => Some(IrOpcode::ConvertF32ToI64),
            (F32, U64) => Some(IrOpcode::ConvertF32ToU64),
            (F64, I32) => Some(IrOpcode::ConvertF64ToI32),
            (F64, I64) => Some(IrOpcode::ConvertF64ToI64),
            (F64, U64) => Some(IrOpcode::ConvertF64ToU64),
            (F32, F64) => Some(IrOpcode::ConvertF32ToF64),
            (F64, F32) => Some(IrOpcode::ConvertF64ToF32),
            _ => None,
        }
    }

    /// Return opcode for a value of `width`
    pub fn ret(width: NumericWidth) -> Self {
        match width {
            NumericWidth::I32 => IrOpcode::ReturnI32,
            NumericWidth::I64 | NumericWidth::U64 => IrOpcode::ReturnI64,
            NumericWidth::F32 => IrOpcode::ReturnF32,
            NumericWidth::F64 => IrOpcode::ReturnF64,
        }
    }

    /// Push opcode for a constant of `width`
    pub fn push(width: NumericWidth) -> Self {
        match width {
            NumericWidth::I32 => IrOpcode::PushI32,
            NumericWidth::I64 | NumericWidth::U64 => IrOpcode::PushI64,
            NumericWidth::F32 => IrOpcode::PushF32,
            NumericWidth::F64 => IrOpcode::PushF64,
        }
    }

    /// Whether `imm` is a jump target
    pub fn is_jump(self) -> bool {
        matches!(self, IrOpcode::Jump | IrOpcode::JumpIfZero)
    }

    /// Whether the instruction leaves the function
    pub fn is_return(self) -> bool {
        matches!(
            self,
            IrOpcode::ReturnVoid
                | IrOpcode::ReturnI32
                | IrOpcode::ReturnI64
                | IrOpcode::ReturnF32
                | IrOpcode::ReturnF64
        )
    }
}

impl TryFrom<u8> for IrOpcode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Err(Error::serialization("invalid IR opcode: 0")),
            n => IrOpcode::ALL
                .get(n as usize - 1)
                .copied()
                .ok_or_else(|| Error::serialization(format!("invalid IR opcode: {}", n))),
        }
    }
}

/// Print immediate flag: append a newline
pub const PRINT_FLAG_NEWLINE: u64 = 1;
/// Print immediate flag: write to stderr
pub const PRINT_FLAG_STDERR: u64 = 2;

/// Flags part of a print immediate
pub fn print_flags(newline: bool, stderr: bool) -> u64 {
    let mut flags = 0;
    if newline {
        flags |= PRINT_FLAG_NEWLINE;
    }
    if stderr {
        flags |= PRINT_FLAG_STDERR;
    }
    flags
}

/// `PrintString` immediate for string-table entry `index`
pub fn encode_print_string(index: u32, newline: bool, stderr: bool) -> u64 {
    ((index as u64) << 2) | print_flags(newline, stderr)
}

/// Split a print immediate into (string index, newline, stderr)
pub fn decode_print_imm(imm: u64) -> (u64, bool, bool) {
    (
        imm >> 2,
        imm & PRINT_FLAG_NEWLINE != 0,
        imm & PRINT_FLAG_STDERR != 0,
    )
}

/// One stack-machine instruction: opcode plus 64-bit immediate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IrInstruction {
    /// Operation
    pub op: IrOpcode,
    /// Immediate operand (0 when unused)
    pub imm: u64,
}

impl IrInstruction {
    /// Instruction with an immediate
    pub fn new(op: IrOpcode, imm: u64) -> Self {
        Self { op, imm }
    }

    /// Instruction without an immediate
    pub fn op(op: IrOpcode) -> Self {
        Self { op, imm: 0 }
    }
}
