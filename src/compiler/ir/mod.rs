//! # Intermediate Representation (IR) for the native backend
//!
//! A validated program is lowered to a flat stack-machine instruction stream
//! that a VM or native code generator consumes.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── instruction.rs  # IrOpcode (closed, numbered set), IrInstruction, print immediates
//! ├── program.rs      # IrFunction, IrModule (functions + string table)
//! ├── serializer.rs   # Binary encoding and decoding of IrModule
//! └── lowerer/        # IrLowerer: program -> IrModule, with full inlining
//! ```
//!
//! ## Key Types
//!
//! - [`IrOpcode`] - Stack-machine opcode; its discriminant is the wire byte
//! - [`IrInstruction`] - Opcode plus a 64-bit immediate
//! - [`IrModule`] - Functions, string table and entry index
//! - [`IrLowerer`] - AST-to-IR transformer
//!
//! ## Stack conventions
//!
//! | Value | Stack form |
//! |-------|------------|
//! | `i32`, `bool` | sign-extended into 64 bits (`bool` is 0/1) |
//! | `i64`, `u64`, pointers | raw 64 bits |
//! | `f32` | IEEE bits in the low 32 bits |
//! | `f64` | IEEE bits |
//!
//! Jump immediates are absolute instruction indices within the function.

mod instruction;
mod lowerer;
mod program;
mod serializer;

pub use instruction::{
    decode_print_imm, encode_print_string, print_flags, IrInstruction, IrOpcode, PRINT_FLAG_NEWLINE,
    PRINT_FLAG_STDERR,
};
pub use lowerer::{lower_program, IrLowerer};
pub use program::{IrFunction, IrModule};
pub use serializer::{deserialize_ir, serialize_ir, IR_MAGIC, IR_VERSION};
