//! Program input
//!
//! The tokenizer and parser live in the front end; this module owns the
//! syntax tree they hand over and decodes it from its JSON interchange form.

mod ast;

pub use ast::{
    Call, Definition, Execution, Expr, ExprKind, FloatWidth, IntWidth, Literal, Program,
    Transform,
};

use crate::Result;

impl Program {
    /// Decode a program from the front end's JSON output
    pub fn from_json(source: &str) -> Result<Program> {
        parse_program_json(source)
    }

    /// Encode the program as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Decode a program from JSON
pub fn parse_program_json(source: &str) -> Result<Program> {
    let program: Program = serde_json::from_str(source)?;
    tracing::debug!(
        definitions = program.definitions.len(),
        executions = program.executions.len(),
        "decoded program"
    );
    Ok(program)
}
