//! # primec Compiler - Program to stack-machine IR
//!
//! This module drives a decoded program through semantic validation and
//! lowering, producing an [`IrModule`] that the reference VM or a native
//! backend consumes.
//!
//! ## Architecture
//!
//! ```text
//! JSON → Program → SemanticsValidator → IrLowerer (inline) → IrModule → bytes
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use primec::compiler::{Compiler, CompileOptions};
//!
//! let compiler = Compiler::new(CompileOptions::default());
//! let result = compiler.compile_json(&json)?;
//! std::fs::write("program.psir", result.to_bytes()?)?;
//! ```

pub mod debug;
pub mod ir;

pub use debug::{dump_ir, format_ir_instr, validate_ir};
pub use ir::{
    deserialize_ir, lower_program, serialize_ir, IrFunction, IrInstruction, IrLowerer, IrModule,
    IrOpcode,
};

use crate::parser::{parse_program_json, Program};
use crate::types::validate;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Full path of the entry definition
    pub entry_path: String,
    /// Effects active in definitions and executions without `effects(...)`
    pub default_effects: Vec<String>,
    /// Effects active in the entry definition without `effects(...)`
    pub entry_default_effects: Vec<String>,
    /// Run the semantics validator before lowering
    pub run_validator: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            entry_path: "/main".to_string(),
            default_effects: vec!["io_out".to_string(), "io_err".to_string()],
            entry_default_effects: vec!["io_out".to_string(), "io_err".to_string()],
            run_validator: true,
        }
    }
}

/// Compilation result with metadata
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Lowered module
    pub module: IrModule,
    /// Number of IR instructions
    pub instruction_count: usize,
    /// Number of string-table entries
    pub string_count: usize,
}

impl CompileResult {
    /// Binary encoding of the module
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize_ir(&self.module)
    }
}

/// Program to IR compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Validate and lower a decoded program
    pub fn compile(&self, program: &Program) -> Result<CompileResult> {
        let opts = &self.options;

        // Phase 1: Semantics
        if opts.run_validator {
            validate(program, &opts.entry_path, &opts.default_effects, &opts.entry_default_effects)?;
        } else {
            tracing::warn!(entry = %opts.entry_path, "semantics validation skipped");
        }

        // Phase 2: Lower
        let module = lower_program(program, &opts.entry_path, &opts.default_effects, &opts.entry_default_effects)?;

        tracing::info!(
            entry = %opts.entry_path,
            instructions = module.instruction_count(),
            strings = module.string_table.len(),
            "compiled program"
        );
        Ok(CompileResult {
            instruction_count: module.instruction_count(),
            string_count: module.string_table.len(),
            module,
        })
    }

    /// Decode a JSON program, then compile it
    pub fn compile_json(&self, source: &str) -> Result<CompileResult> {
        let program = parse_program_json(source)?;
        self.compile(&program)
    }
}
