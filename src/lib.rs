//! # primec - semantics validation and IR lowering
//!
//! The middle of the primec toolchain. A front end hands over a parsed
//! [`Program`]; this crate checks it against the language rules and lowers
//! the entry definition to a flat stack-machine IR that a native code
//! generator or the bundled reference VM executes.
//!
//! ## Quick Start
//!
//! ```rust
//! use primec::{CompileOptions, Compiler, Definition, Expr, Program, Vm};
//!
//! # fn main() -> primec::Result<()> {
//! // [return<int>] main() { return(plus(3i32, 4i32)) }
//! let program = Program::new().with_definition(
//!     Definition::new("/main")
//!         .returns("int")
//!         .with_statement(Expr::ret(Expr::call("plus", vec![Expr::i32(3), Expr::i32(4)]))),
//! );
//!
//! let result = Compiler::new(CompileOptions::default()).compile(&program)?;
//! let output = Vm::new(&result.module).run(&[])?;
//! assert_eq!(output.as_i32(), Some(7));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Program → SemanticsValidator → IrLowerer → IrModule ⇄ bytes
//!                                               ↓
//!                                              Vm
//! ```
//!
//! ### Main Components
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`parser`] | syntax tree handed over by the front end, JSON decoding |
//! | [`types`] | value kinds, effects, operator resolution, return analysis, the validator |
//! | [`compiler`] | compile driver, IR definitions, lowerer, binary serializer, IR dump |
//! | [`runtime`] | reference VM for lowered modules |
//! | [`error`] | error type shared by every stage |
//!
//! ## Language Notes
//!
//! - Every user call is inlined at its call site; recursion is rejected.
//! - Effects (`io_out`, `io_err`, `heap_alloc`, ...) gate builtins; nested
//!   `effects(...)` annotations may only narrow the enclosing set.
//! - Mixed signed/unsigned and int/float arithmetic is rejected; there are
//!   no implicit promotions beyond `i32` widening to `i64`.

#![allow(clippy::too_many_arguments)]

/// Version of the primec middle-end
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod parser;
pub mod runtime;
pub mod types;

// Re-export main types
pub use compiler::{CompileOptions, CompileResult, Compiler, IrModule, IrOpcode};
pub use error::{Error, ErrorCategory, Result};
pub use parser::{Call, Definition, Execution, Expr, ExprKind, Literal, Program, Transform};
pub use runtime::{Vm, VmOutput};
pub use types::{validate, SemanticsValidator};
