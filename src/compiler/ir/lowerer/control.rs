//! Statement lowering: bindings, `return`, `if`, loops, `block`, print

use super::collections::{is_argument_array, Collection};
use super::{IrLowerer, LocalInfo, LocalMap, StringSource};
use crate::compiler::ir::instruction::{encode_print_string, print_flags, IrOpcode};
use crate::parser::{Call, Expr, ExprKind, Literal};
use crate::types::builtins::{self, BuiltinClass};
use crate::types::effects;
use crate::types::numeric::{ArithmeticOp, ComparisonOp, NumericWidth, OperandKind};
use crate::types::{binding_name, binding_type, BindingKind, ValueKind};
use crate::{Error, Result};

impl<'a> IrLowerer<'a> {
    pub(super) fn lower_statements(&mut self, stmts: &[Expr], locals: &mut LocalMap) -> Result<()> {
        for stmt in stmts {
            self.lower_statement(stmt, locals)?;
        }
        Ok(())
    }

    pub(super) fn lower_statement(&mut self, stmt: &Expr, locals: &mut LocalMap) -> Result<()> {
        let label = match &stmt.kind {
            ExprKind::Call(call) => call.name.clone(),
            _ => self.current_path(),
        };
        let saved = self.enter_effects(stmt, &label)?;
        let result = self.lower_statement_inner(stmt, locals);
        if let Some(saved) = saved {
            self.active_effects = saved;
        }
        result
    }

    fn lower_statement_inner(&mut self, stmt: &Expr, locals: &mut LocalMap) -> Result<()> {
        let call = match &stmt.kind {
            ExprKind::Call(call) => call,
            _ => {
                self.emit_expr(stmt, locals)?;
                self.emit_op(IrOpcode::Pop);
                return Ok(());
            }
        };

        if call.is_binding {
            let from = self.current_path();
            let (name, info) = self.bind_local(stmt, call.args.first(), locals, &from, false)?;
            locals.insert(name, info);
            return Ok(());
        }

        let builtin = if call.is_method_call { None } else { builtins::lookup(&call.name) };
        let Some(info) = builtin else {
            let from = self.current_path();
            let callee = self.resolve_callee(call, locals, &from)?;
            self.emit_inline_call(call, callee, locals, false)?;
            return Ok(());
        };

        if call.has_named_args() {
            return Err(Error::call_shape("named arguments not supported for builtin calls"));
        }
        if call.body.is_some() && !info.class.takes_body() {
            return Err(Error::call_shape(format!(
                "block arguments are only supported on control-flow builtins: {}",
                call.name
            )));
        }
        builtins::check_arity(&call.name, info, call.args.len())?;
        effects::require_effect(&call.name, &self.active_effects)?;

        match info.class {
            BuiltinClass::Return => self.lower_return(call, locals),
            BuiltinClass::If => self.lower_if(call, locals),
            BuiltinClass::Repeat => self.lower_repeat(call, locals),
            BuiltinClass::Loop => self.lower_loop(call, locals),
            BuiltinClass::While => self.lower_while(call, locals),
            BuiltinClass::For => self.lower_for(call, locals),
            BuiltinClass::Block => {
                let body = call
                    .body
                    .as_deref()
                    .ok_or_else(|| Error::call_shape("block requires a block"))?;
                let mut inner = locals.clone();
                self.lower_statements(body, &mut inner)
            }
            BuiltinClass::Print => self.lower_print(call, locals),
            BuiltinClass::Assign => {
                self.emit_assign(call, locals)?;
                self.emit_op(IrOpcode::Pop);
                Ok(())
            }
            BuiltinClass::Step => {
                self.emit_step(call, locals)?;
                self.emit_op(IrOpcode::Pop);
                Ok(())
            }
            _ => {
                self.emit_expr(stmt, locals)?;
                self.emit_op(IrOpcode::Pop);
                Ok(())
            }
        }
    }

    /// Allocate and initialise a local for a binding or parameter
    ///
    /// `init` is evaluated against `eval`, which for inlined parameters is
    /// the caller's scope. Parameters whose kind cannot be inferred fall back
    /// to `i32`.
    pub(super) fn bind_local(
        &mut self,
        stmt: &Expr,
        init: Option<&Expr>,
        eval: &LocalMap,
        from: &str,
        parameter: bool,
    ) -> Result<(String, LocalInfo)> {
        let name = binding_name(stmt)
            .ok_or_else(|| Error::structural("binding requires a name"))?
            .to_string();

        let typed = binding_type(&stmt.transforms, &self.scope)?.is_some();
        let collection_init = match init {
            Some(e) => is_argument_array(e, eval) || self.collection_of(e, eval)?.is_some(),
            None => false,
        };
        let shape = match (parameter && !typed && !collection_init, init) {
            (true, Some(arg)) => match self.infer_kind(arg, eval, from)? {
                OperandKind::Value(ValueKind::Unknown) => LocalInfo {
                    index: 0,
                    mutable: crate::types::is_mutable(&stmt.transforms),
                    kind: BindingKind::Value,
                    value_kind: ValueKind::Int32,
                    key_kind: ValueKind::Unknown,
                    string_source: StringSource::None,
                    struct_path: None,
                },
                _ => self.binding_shape(stmt, init, eval, from)?,
            },
            _ => self.binding_shape(stmt, init, eval, from)?,
        };

        if shape.kind == BindingKind::Array && shape.value_kind == ValueKind::String {
            // String arrays are only ever the entry arguments; bindings alias them.
            return match init {
                Some(source) if is_argument_array(source, eval) => match &source.kind {
                    ExprKind::Name(source) => Ok((name, eval[source].clone())),
                    _ => Err(Error::lowering("native backend only supports array<string> entry arguments")),
                },
                _ => Err(Error::lowering("native backend only supports array<string> entry arguments")),
            };
        }

        if shape.kind.is_collection() {
            let init = init.ok_or_else(|| {
                Error::lowering(format!("native backend requires an initializer for collection binding: {}", name))
            })?;
            let index = self.alloc_local();
            let built = self.emit_collection(init, eval)?;
            let declared = Collection {
                kind: shape.kind,
                key_kind: shape.key_kind,
                value_kind: shape.value_kind,
            };
            let unknown = shape.value_kind == ValueKind::Unknown
                || (shape.kind == BindingKind::Map && shape.key_kind == ValueKind::Unknown);
            if !unknown && !declared.compatible(built) {
                return Err(Error::type_error(format!("binding initializer type mismatch: {}", name)));
            }
            self.store_local(index);
            tracing::trace!(binding = %name, slot = index, "bound collection");
            return Ok((
                name,
                LocalInfo {
                    index,
                    kind: built.kind,
                    value_kind: built.value_kind,
                    key_kind: built.key_kind,
                    ..shape
                },
            ));
        }

        let index = self.alloc_local();
        let mut info = LocalInfo { index, ..shape };
        tracing::trace!(binding = %name, slot = index, kind = %info.value_kind, "allocated local");

        if info.value_kind == ValueKind::String && info.kind == BindingKind::Value {
            let init = init.ok_or_else(|| {
                Error::lowering(format!("native backend requires an initializer for string binding: {}", name))
            })?;
            info.string_source = self.string_source(init, eval)?;
            match info.string_source {
                StringSource::Table(idx) => self.emit(IrOpcode::PushI64, idx as u64),
                StringSource::Argv { checked } => match &init.kind {
                    ExprKind::Name(source) => {
                        let slot = eval[source].index;
                        self.load_local(slot);
                    }
                    ExprKind::Call(call) => self.emit_argv_index(call, eval, checked)?,
                    ExprKind::Literal(_) => {
                        return Err(Error::lowering(format!(
                            "native backend does not know string binding: {}",
                            name
                        )))
                    }
                },
                StringSource::None => {}
            }
            self.store_local(index);
            return Ok((name, info));
        }

        match init {
            Some(init) => {
                let kind = self.emit_expr(init, eval)?;
                if info.kind == BindingKind::Value {
                    self.coerce(kind.value_kind(), info.value_kind);
                }
            }
            None => {
                let width = NumericWidth::of(info.value_kind).unwrap_or(NumericWidth::I32);
                self.push_const(width, 0);
            }
        }
        self.store_local(index);
        Ok((name, info))
    }

    /// Classify where a string binding's text comes from
    fn string_source(&mut self, init: &Expr, eval: &LocalMap) -> Result<StringSource> {
        match &init.kind {
            ExprKind::Literal(Literal::String(text)) => Ok(StringSource::Table(self.module.intern(text))),
            ExprKind::Name(name) => eval
                .get(name)
                .filter(|l| l.value_kind == ValueKind::String && l.string_source != StringSource::None)
                .map(|l| l.string_source.clone())
                .ok_or_else(|| Error::lowering(format!("native backend does not know string binding: {}", name))),
            ExprKind::Call(_) if init.is_call_to("at") => Ok(StringSource::Argv { checked: true }),
            ExprKind::Call(_) if init.is_call_to("at_unsafe") => Ok(StringSource::Argv { checked: false }),
            _ => Err(Error::lowering(
                "native backend only supports string literals, string bindings and entry arguments as strings",
            )),
        }
    }

    fn lower_return(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        if let Some((returns, return_local)) = self.inline_ctx.as_ref().map(|c| (c.returns, c.return_local)) {
            match (call.args.first(), return_local) {
                (Some(value), Some(slot)) => {
                    let kind = self.emit_expr(value, locals)?;
                    if returns.kind != ValueKind::Unknown {
                        self.coerce(kind.value_kind(), returns.kind);
                    }
                    self.store_local(slot);
                }
                (Some(value), None) => {
                    // Value discarded by a statement-position call.
                    if !returns.returns_void {
                        self.emit_expr(value, locals)?;
                        self.emit_op(IrOpcode::Pop);
                    }
                }
                (None, _) => {}
            }
            let jump = self.emit_jump_placeholder(IrOpcode::Jump);
            if let Some(ctx) = self.inline_ctx.as_mut() {
                ctx.return_jumps.push(jump);
            }
            return Ok(());
        }

        let Some(value) = call.args.first() else {
            self.emit_op(IrOpcode::ReturnVoid);
            return Ok(());
        };
        if self.entry_returns.returns_void {
            return Err(Error::type_error("return value not allowed for void definition"));
        }
        let kind = self.emit_expr(value, locals)?;
        if kind.is_pointer() {
            self.emit_op(IrOpcode::ReturnI64);
            return Ok(());
        }
        let target = match self.entry_returns.kind {
            ValueKind::Unknown => kind.value_kind(),
            declared => declared,
        };
        self.coerce(kind.value_kind(), target);
        let width = Self::width_of(target)?;
        self.emit_op(IrOpcode::ret(width));
        Ok(())
    }

    fn lower_if(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        self.emit_bool_condition(&call.args[0], locals)?;
        let to_else = self.emit_jump_placeholder(IrOpcode::JumpIfZero);

        let then_body = self.branch_body(&call.args[1])?;
        let mut inner = locals.clone();
        self.lower_statements(then_body, &mut inner)?;
        let to_end = self.emit_jump_placeholder(IrOpcode::Jump);

        self.patch_jump_here(to_else);
        let else_body = self.branch_body(&call.args[2])?;
        let mut inner = locals.clone();
        self.lower_statements(else_body, &mut inner)?;
        self.patch_jump_here(to_end);
        Ok(())
    }

    /// Counted loop over a hidden counter; the check runs before every pass
    fn lower_repeat(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        let body = call
            .body
            .as_deref()
            .ok_or_else(|| Error::call_shape("repeat requires a block"))?;
        let count = &call.args[0];

        match &count.kind {
            ExprKind::Literal(Literal::Int { value, .. }) if *value <= 0 => return Ok(()),
            ExprKind::Literal(Literal::UInt(0)) | ExprKind::Literal(Literal::Bool(false)) => return Ok(()),
            _ => {}
        }

        let from = self.current_path();
        let kind = self.infer_kind(count, locals, &from)?;
        if kind.is_pointer() || !(kind.value_kind().is_integer() || kind.value_kind() == ValueKind::Bool) {
            return Err(Error::type_error("repeat count requires integer or bool"));
        }
        let width = Self::width_of(kind.value_kind())?;
        let counter = self.alloc_local();
        self.emit_operand_as(count, locals, width)?;
        self.store_local(counter);
        self.emit_countdown(counter, width, body, locals)
    }

    /// `loop(count)`: an integer count; a negative one fails at run time
    fn lower_loop(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        let body = call
            .body
            .as_deref()
            .ok_or_else(|| Error::call_shape("loop requires a block"))?;
        let count = &call.args[0];
        let from = self.current_path();
        let kind = self.infer_kind(count, locals, &from)?;
        if kind.is_pointer() || !kind.value_kind().is_integer() {
            return Err(Error::type_error("loop count requires integer"));
        }
        let width = Self::width_of(kind.value_kind())?;
        let counter = self.alloc_local();
        self.emit_operand_as(count, locals, width)?;
        self.store_local(counter);
        if width != NumericWidth::U64 {
            self.load_local(counter);
            self.push_const(width, 0);
            self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
            let to_ok = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
            self.emit_runtime_failure("loop count must be non-negative");
            self.patch_jump_here(to_ok);
        }
        self.emit_countdown(counter, width, body, locals)
    }

    /// Run `body` while `counter` is positive, decrementing after each pass
    fn emit_countdown(&mut self, counter: u32, width: NumericWidth, body: &[Expr], locals: &LocalMap) -> Result<()> {
        let check = self.here();
        self.load_local(counter);
        self.push_const(width, 0);
        let cmp = if width == NumericWidth::U64 {
            IrOpcode::compare(ComparisonOp::NotEqual, width)
        } else {
            IrOpcode::compare(ComparisonOp::Greater, width)
        };
        self.emit_op(cmp);
        let to_exit = self.emit_jump_placeholder(IrOpcode::JumpIfZero);

        let mut inner = locals.clone();
        self.lower_statements(body, &mut inner)?;

        self.load_local(counter);
        self.push_const(width, 1);
        self.emit_op(IrOpcode::arithmetic(ArithmeticOp::Minus, width));
        self.store_local(counter);
        self.emit(IrOpcode::Jump, check as u64);
        self.patch_jump_here(to_exit);
        Ok(())
    }

    /// Loop condition, which must be bool
    fn emit_loop_condition(&mut self, cond: &Expr, locals: &LocalMap, builtin: &str) -> Result<()> {
        match self.emit_expr(cond, locals)? {
            OperandKind::Value(ValueKind::Bool | ValueKind::Unknown) => Ok(()),
            _ => Err(Error::type_error(format!("{} condition requires bool", builtin))),
        }
    }

    /// `while(cond) { body }`; the condition is re-evaluated before each pass
    fn lower_while(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        let body = call
            .body
            .as_deref()
            .ok_or_else(|| Error::call_shape("while requires a block"))?;
        let check = self.here();
        self.emit_loop_condition(&call.args[0], locals, "while")?;
        let to_exit = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        let mut inner = locals.clone();
        self.lower_statements(body, &mut inner)?;
        self.emit(IrOpcode::Jump, check as u64);
        self.patch_jump_here(to_exit);
        Ok(())
    }

    /// `for(init, cond, step) { body }`
    ///
    /// `init` and a binding condition are visible to the condition, the body
    /// and the step. A binding condition is re-initialised at every check.
    fn lower_for(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        let body = call
            .body
            .as_deref()
            .ok_or_else(|| Error::call_shape("for requires a block"))?;
        let (init, cond, step) = (&call.args[0], &call.args[1], &call.args[2]);
        let mut scope = locals.clone();
        self.lower_statement(init, &mut scope)?;

        let check = self.here();
        if cond.is_binding() {
            self.lower_statement(cond, &mut scope)?;
            let local = binding_name(cond)
                .and_then(|name| scope.get(name))
                .filter(|l| l.kind == BindingKind::Value && l.value_kind == ValueKind::Bool)
                .ok_or_else(|| Error::type_error("for condition requires bool"))?;
            let slot = local.index;
            self.load_local(slot);
        } else {
            self.emit_loop_condition(cond, &scope, "for")?;
        }
        let to_exit = self.emit_jump_placeholder(IrOpcode::JumpIfZero);

        let mut inner = scope.clone();
        self.lower_statements(body, &mut inner)?;
        self.lower_statement(step, &mut scope)?;
        self.emit(IrOpcode::Jump, check as u64);
        self.patch_jump_here(to_exit);
        Ok(())
    }

    fn lower_print(&mut self, call: &Call, locals: &LocalMap) -> Result<()> {
        let (newline, stderr) = builtins::print_flags(&call.name);
        let flags = print_flags(newline, stderr);
        let arg = &call.args[0];

        match &arg.kind {
            ExprKind::Literal(Literal::String(text)) => {
                let index = self.module.intern(text);
                self.emit(IrOpcode::PrintString, encode_print_string(index, newline, stderr));
                return Ok(());
            }
            ExprKind::Name(name) => {
                let string_local = locals
                    .get(name)
                    .filter(|l| l.kind == BindingKind::Value && l.value_kind == ValueKind::String);
                if let Some(local) = string_local {
                    match local.string_source {
                        StringSource::Table(index) => {
                            self.emit(IrOpcode::PrintString, encode_print_string(index, newline, stderr));
                        }
                        StringSource::Argv { checked } => {
                            self.load_local(local.index);
                            let op = if checked { IrOpcode::PrintArgv } else { IrOpcode::PrintArgvUnsafe };
                            self.emit(op, flags);
                        }
                        StringSource::None => {
                            return Err(Error::lowering(format!(
                                "native backend does not know string binding: {}",
                                name
                            )))
                        }
                    }
                    return Ok(());
                }
            }
            ExprKind::Call(inner)
                if (arg.is_call_to("at") || arg.is_call_to("at_unsafe"))
                    && inner.args.first().is_some_and(|target| is_argument_array(target, locals)) =>
            {
                let checked = inner.name == "at";
                self.emit_argv_index(inner, locals, checked)?;
                let op = if checked { IrOpcode::PrintArgv } else { IrOpcode::PrintArgvUnsafe };
                self.emit(op, flags);
                return Ok(());
            }
            _ => {}
        }

        let kind = self.emit_expr(arg, locals)?;
        let op = match kind {
            OperandKind::Value(ValueKind::Int32 | ValueKind::Bool) => IrOpcode::PrintI32,
            OperandKind::Value(ValueKind::Int64) => IrOpcode::PrintI64,
            OperandKind::Value(ValueKind::UInt64) => IrOpcode::PrintU64,
            OperandKind::Pointer(_) => {
                return Err(Error::type_error(format!("{} does not support pointer values", call.name)))
            }
            OperandKind::Value(other) => {
                return Err(Error::lowering(format!("native backend cannot print {} values", other)))
            }
        };
        self.emit(op, flags);
        Ok(())
    }
}
