//! IR Lowerer - turns a validated program into stack-machine IR
//!
//! Every user call is inlined; the module holds a single function for the
//! entry definition. The lowerer re-derives operand kinds instead of reading
//! validator output, so it stays safe when called on its own.
//!
//! ## Module Organization
//!
//! | File | Contents |
//! |------|----------|
//! | `mod.rs` | lowerer state, entry lowering, emission and jump-patching helpers |
//! | `control.rs` | statements: bindings, `return`, `if`, loops, `block`, print |
//! | `expr.rs` | expressions: literals, names, operators, convert, pointers, steps, argv |
//! | `math.rs` | math builtins as inline compare-and-jump and series code |
//! | `collections.rs` | array, vector and map literals, `count`, `at`, string bytes |
//! | `inline.rs` | inline expansion of user calls and the recursion guard |
//! | `infer.rs` | operand-kind inference and return-type inference |
//!
//! ## Locals
//!
//! Each binding gets a fresh slot; slots are never reused, so nested scopes
//! and inlined bodies cannot clobber each other. `AddressOfLocal i` yields
//! the address `i * 16` understood by `LoadIndirect`/`StoreIndirect`.

mod collections;
mod control;
mod expr;
mod infer;
mod inline;
mod math;

use super::instruction::{IrInstruction, IrOpcode};
use super::program::{IrFunction, IrModule};
use crate::parser::{Definition, Expr, Program};
use crate::types::effects::{self, EffectSet};
use crate::types::numeric::NumericWidth;
use crate::types::scope::DefinitionScope;
use crate::types::{binding_type, BindingKind, ReturnInfo, ValueKind};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Where a string-kinded local gets its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StringSource {
    /// Not a string
    None,
    /// String-table entry
    Table(u32),
    /// Entry argument; the slot holds the argv index
    Argv {
        /// Index was bounds-checked when the binding was created
        checked: bool,
    },
}

/// A binding visible to the code being lowered
#[derive(Debug, Clone)]
pub(crate) struct LocalInfo {
    /// Slot number
    pub(crate) index: u32,
    /// Declared `mut`
    pub(crate) mutable: bool,
    /// Binding shape
    pub(crate) kind: BindingKind,
    /// Scalar, pointee or element kind
    pub(crate) value_kind: ValueKind,
    /// Key kind of map locals
    pub(crate) key_kind: ValueKind,
    /// Text source for string locals
    pub(crate) string_source: StringSource,
    /// Struct definition for struct-typed values
    pub(crate) struct_path: Option<String>,
}

pub(crate) type LocalMap = HashMap<String, LocalInfo>;

/// State of one in-progress inline expansion
#[derive(Debug)]
struct InlineContext {
    /// Definition being expanded
    def_path: String,
    /// Its return descriptor
    returns: ReturnInfo,
    /// Slot receiving the return value
    return_local: Option<u32>,
    /// `Jump`s to patch to the expansion's exit
    return_jumps: Vec<usize>,
}

/// Lower `program` starting at `entry_path`
pub fn lower_program<S: AsRef<str>>(
    program: &Program,
    entry_path: &str,
    default_effects: &[S],
    entry_default_effects: &[S],
) -> Result<IrModule> {
    IrLowerer::new(program, entry_path, default_effects, entry_default_effects)?.lower()
}

/// Program-to-IR lowerer
pub struct IrLowerer<'a> {
    program: &'a Program,
    scope: DefinitionScope<'a>,
    entry_path: String,
    default_effects: EffectSet,
    entry_default_effects: EffectSet,
    /// Module under construction (string table)
    module: IrModule,
    /// Entry function body
    instructions: Vec<IrInstruction>,
    next_local: u32,
    /// Definitions currently being expanded
    inline_stack: HashSet<String>,
    inline_ctx: Option<InlineContext>,
    active_effects: EffectSet,
    entry_returns: ReturnInfo,
    return_cache: HashMap<String, ReturnInfo>,
    inferring: HashSet<String>,
}

impl<'a> IrLowerer<'a> {
    /// Prepare a lowerer
    pub fn new<S: AsRef<str>>(
        program: &'a Program,
        entry_path: &str,
        default_effects: &[S],
        entry_default_effects: &[S],
    ) -> Result<Self> {
        Ok(Self {
            program,
            scope: DefinitionScope::build(program)?,
            entry_path: entry_path.to_string(),
            default_effects: EffectSet::parse(default_effects, "default effects")?,
            entry_default_effects: EffectSet::parse(entry_default_effects, "entry default effects")?,
            module: IrModule::new(),
            instructions: Vec::new(),
            next_local: 0,
            inline_stack: HashSet::new(),
            inline_ctx: None,
            active_effects: EffectSet::new(),
            entry_returns: ReturnInfo::void(),
            return_cache: HashMap::new(),
            inferring: HashSet::new(),
        })
    }

    /// Lower the entry definition into a single-function module
    pub fn lower(mut self) -> Result<IrModule> {
        tracing::debug!(entry = %self.entry_path, "lowering program");
        let entry = self.scope.get(&self.entry_path).ok_or_else(|| {
            Error::structural(format!("missing entry definition {}", self.entry_path))
        })?;

        let program = self.program;
        for exec in &program.executions {
            self.scope
                .resolve_call(&exec.full_path, "/")
                .ok_or_else(|| Error::structural(format!("unknown execution target: {}", exec.full_path)))?;
            effects::resolve_active_effects(&exec.transforms, &self.default_effects, &exec.full_path)?;
        }

        self.lower_entry(entry)?;

        let mut module = std::mem::take(&mut self.module);
        module
            .functions
            .push(IrFunction::new(&entry.full_path, std::mem::take(&mut self.instructions)));
        module.entry_index = 0;
        tracing::debug!(
            instructions = module.instruction_count(),
            strings = module.string_table.len(),
            locals = self.next_local,
            "lowering finished"
        );
        Ok(module)
    }

    fn lower_entry(&mut self, entry: &'a Definition) -> Result<()> {
        let path = entry.full_path.clone();
        if !entry.template_args.is_empty() {
            return Err(Error::structural(format!("entry definition cannot be templated: {}", path)));
        }
        self.active_effects =
            effects::resolve_active_effects(&entry.transforms, &self.entry_default_effects, &path)?;
        self.entry_returns = self.return_info(entry)?;

        let mut locals = LocalMap::new();
        match entry.parameters.as_slice() {
            [] => {}
            [param] => {
                let ty = binding_type(&param.transforms, &self.scope)?;
                let name = crate::types::binding_name(param);
                match (name, ty) {
                    (Some(name), Some(ty)) if ty.kind == BindingKind::Array && ty.value_kind == ValueKind::String => {
                        let index = self.alloc_local();
                        locals.insert(
                            name.to_string(),
                            LocalInfo {
                                index,
                                mutable: false,
                                kind: BindingKind::Array,
                                value_kind: ValueKind::String,
                                key_kind: ValueKind::Unknown,
                                string_source: StringSource::None,
                                struct_path: None,
                            },
                        );
                    }
                    _ => {
                        return Err(Error::structural(format!(
                            "entry definition must take a single array<string> parameter: {}",
                            path
                        )))
                    }
                }
            }
            _ => {
                return Err(Error::structural(format!(
                    "entry definition must take a single array<string> parameter: {}",
                    path
                )))
            }
        }

        let body = entry.body();
        if !self.entry_returns.returns_void && !crate::types::returns::contains_return(&body) {
            return Err(Error::lowering("native backend requires an explicit return statement"));
        }

        self.inline_stack.insert(path.clone());
        self.lower_statements(&body, &mut locals)?;
        self.inline_stack.remove(&path);

        if self.entry_returns.returns_void && self.needs_trailing_return() {
            self.emit_op(IrOpcode::ReturnVoid);
        }
        Ok(())
    }

    /// Control can reach the end of the instruction stream
    fn needs_trailing_return(&self) -> bool {
        let end = self.instructions.len() as u64;
        let falls_through = self.instructions.last().map_or(true, |i| !i.op.is_return());
        falls_through || self.instructions.iter().any(|i| i.op.is_jump() && i.imm == end)
    }

    /// Path used to resolve relative call names at the current point
    fn current_path(&self) -> String {
        match &self.inline_ctx {
            Some(ctx) => ctx.def_path.clone(),
            None => self.entry_path.clone(),
        }
    }

    /// Apply an expression's own `effects(...)`; returns the set to restore
    fn enter_effects(&mut self, expr: &Expr, label: &str) -> Result<Option<EffectSet>> {
        if !expr.has_transform("effects") {
            return Ok(None);
        }
        let nested = effects::resolve_nested_effects(&expr.transforms, &self.active_effects, label)?;
        Ok(Some(std::mem::replace(&mut self.active_effects, nested)))
    }

    // =========================================================================
    // EMISSION HELPERS
    // =========================================================================

    fn emit(&mut self, op: IrOpcode, imm: u64) {
        self.instructions.push(IrInstruction::new(op, imm));
    }

    fn emit_op(&mut self, op: IrOpcode) {
        self.emit(op, 0);
    }

    fn here(&self) -> usize {
        self.instructions.len()
    }

    /// Emit a jump whose target is patched later
    fn emit_jump_placeholder(&mut self, op: IrOpcode) -> usize {
        let at = self.here();
        self.emit(op, 0);
        at
    }

    fn patch_jump(&mut self, at: usize, target: usize) {
        tracing::trace!(at, target, "patching jump");
        if let Some(instr) = self.instructions.get_mut(at) {
            instr.imm = target as u64;
        }
    }

    fn patch_jump_here(&mut self, at: usize) {
        let target = self.here();
        self.patch_jump(at, target);
    }

    fn alloc_local(&mut self) -> u32 {
        let index = self.next_local;
        self.next_local += 1;
        index
    }

    fn load_local(&mut self, index: u32) {
        self.emit(IrOpcode::LoadLocal, index as u64);
    }

    fn store_local(&mut self, index: u32) {
        self.emit(IrOpcode::StoreLocal, index as u64);
    }

    /// Push an integer constant in the stack form of `width`
    fn push_const(&mut self, width: NumericWidth, value: i64) {
        let imm = match width {
            NumericWidth::I32 | NumericWidth::I64 | NumericWidth::U64 => value as u64,
            NumericWidth::F32 => (value as f32).to_bits() as u64,
            NumericWidth::F64 => (value as f64).to_bits(),
        };
        self.emit(IrOpcode::push(width), imm);
    }

    /// Convert the top of stack from `from` to `to` where the forms differ
    fn coerce(&mut self, from: ValueKind, to: ValueKind) {
        if let (Some(f), Some(t)) = (NumericWidth::of(from), NumericWidth::of(to)) {
            if let Some(op) = IrOpcode::convert(f, t) {
                self.emit_op(op);
            }
        }
    }

    fn width_of(kind: ValueKind) -> Result<NumericWidth> {
        NumericWidth::of(kind)
            .ok_or_else(|| Error::lowering(format!("native backend does not support {} values here", kind)))
    }

    /// Push a float constant in the stack form of `width`
    fn push_float(&mut self, width: NumericWidth, value: f64) {
        match width {
            NumericWidth::F32 => self.emit(IrOpcode::PushF32, (value as f32).to_bits() as u64),
            NumericWidth::F64 => self.emit(IrOpcode::PushF64, value.to_bits()),
            _ => self.push_const(width, value as i64),
        }
    }

    /// Runtime check failure: report `message` on stderr and exit with code 3
    fn emit_runtime_failure(&mut self, message: &str) {
        let index = self.module.intern(message);
        self.emit(
            IrOpcode::PrintString,
            super::instruction::encode_print_string(index, true, true),
        );
        self.emit(IrOpcode::PushI32, 3);
        self.emit_op(IrOpcode::ReturnI32);
    }
}
