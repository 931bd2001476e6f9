//! Expression lowering

use super::collections::{is_argument_array, Collection};
use super::infer::convert_target;
use super::{IrLowerer, LocalMap};
use crate::compiler::ir::instruction::IrOpcode;
use crate::parser::{Call, Expr, ExprKind, IntWidth, Literal};
use crate::types::builtins::{self, BuiltinClass};
use crate::types::effects;
use crate::types::numeric::{self, ArithmeticOp, ArithmeticResolution, ComparisonOp, NumericWidth, OperandKind};
use crate::types::{BindingKind, ValueKind};
use crate::{Error, Result};

fn value(kind: ValueKind) -> OperandKind {
    OperandKind::Value(kind)
}

impl<'a> IrLowerer<'a> {
    /// Emit `expr`, leaving exactly one value on the stack
    pub(super) fn emit_expr(&mut self, expr: &Expr, locals: &LocalMap) -> Result<OperandKind> {
        let label = match &expr.kind {
            ExprKind::Call(call) => call.name.clone(),
            _ => self.current_path(),
        };
        let saved = self.enter_effects(expr, &label)?;
        let result = self.emit_expr_inner(expr, locals);
        if let Some(saved) = saved {
            self.active_effects = saved;
        }
        result
    }

    fn emit_expr_inner(&mut self, expr: &Expr, locals: &LocalMap) -> Result<OperandKind> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.emit_literal(lit).map(value),
            ExprKind::Name(name) => self.emit_name(name, locals),
            ExprKind::Call(call) => {
                if call.is_binding {
                    return Err(Error::structural(format!(
                        "binding not allowed in expression context: {}",
                        call.name
                    )));
                }
                if !call.is_method_call {
                    if let Some(info) = builtins::lookup(&call.name) {
                        if call.has_named_args() {
                            return Err(Error::call_shape("named arguments not supported for builtin calls"));
                        }
                        builtins::check_arity(&call.name, info, call.args.len())?;
                        effects::require_effect(&call.name, &self.active_effects)?;
                        return self.emit_builtin(call, info.class, locals);
                    }
                }
                let from = self.current_path();
                let callee = self.resolve_callee(call, locals, &from)?;
                let kind = self
                    .emit_inline_call(call, callee, locals, true)?
                    .ok_or_else(|| {
                        Error::lowering(format!("void call not allowed in expression context: {}", callee.full_path))
                    })?;
                Ok(value(kind))
            }
        }
    }

    /// Emit `expr` and convert it to the stack form of `width`
    pub(super) fn emit_operand_as(&mut self, expr: &Expr, locals: &LocalMap, width: NumericWidth) -> Result<()> {
        let kind = self.emit_expr(expr, locals)?;
        self.coerce(kind.value_kind(), width.value_kind());
        Ok(())
    }

    fn emit_literal(&mut self, literal: &Literal) -> Result<ValueKind> {
        match literal {
            Literal::Int { value, width: IntWidth::I32 } => {
                let narrow = i32::try_from(*value)
                    .map_err(|_| Error::lowering("i32 literal out of range for native backend"))?;
                self.emit(IrOpcode::PushI32, narrow as i64 as u64);
            }
            Literal::Int { value, width: IntWidth::I64 } => self.emit(IrOpcode::PushI64, *value as u64),
            Literal::UInt(value) => self.emit(IrOpcode::PushI64, *value),
            Literal::Float { value, width } => match width {
                crate::parser::FloatWidth::F32 => self.emit(IrOpcode::PushF32, (*value as f32).to_bits() as u64),
                crate::parser::FloatWidth::F64 => self.emit(IrOpcode::PushF64, value.to_bits()),
            },
            Literal::Bool(flag) => self.emit(IrOpcode::PushI32, *flag as u64),
            Literal::String(_) => {
                return Err(Error::lowering(
                    "native backend only supports string literals in print calls and bindings",
                ))
            }
        }
        Ok(ValueKind::of_literal(literal))
    }

    fn emit_name(&mut self, name: &str, locals: &LocalMap) -> Result<OperandKind> {
        let local = locals
            .get(name)
            .ok_or_else(|| Error::lowering(format!("native backend does not know identifier: {}", name)))?;
        if let Some(collection) = Collection::of_local(local) {
            return Err(Error::lowering(format!(
                "native backend only reads {} values through count and at: {}",
                collection.type_name(),
                name
            )));
        }
        let (index, kind, value_kind) = (local.index, local.kind, local.value_kind);
        match kind {
            BindingKind::Array | BindingKind::Vector | BindingKind::Map => Err(Error::lowering(format!(
                "native backend does not support array values: {}",
                name
            ))),
            BindingKind::Reference => {
                self.load_local(index);
                self.emit_op(IrOpcode::LoadIndirect);
                Ok(value(value_kind))
            }
            BindingKind::Pointer => {
                self.load_local(index);
                Ok(OperandKind::Pointer(value_kind))
            }
            BindingKind::Value => {
                self.load_local(index);
                Ok(value(value_kind))
            }
        }
    }

    fn emit_builtin(&mut self, call: &Call, class: BuiltinClass, locals: &LocalMap) -> Result<OperandKind> {
        let from = self.current_path();
        match class {
            BuiltinClass::Arithmetic => {
                let lhs = self.infer_kind(&call.args[0], locals, &from)?;
                let rhs = self.infer_kind(&call.args[1], locals, &from)?;
                let op = ArithmeticOp::from_name(&call.name)
                    .ok_or_else(|| Error::type_error(format!("unknown arithmetic operator: {}", call.name)))?;
                match numeric::resolve_arithmetic(op, lhs, rhs)? {
                    ArithmeticResolution::Numeric(width) => {
                        self.emit_operand_as(&call.args[0], locals, width)?;
                        self.emit_operand_as(&call.args[1], locals, width)?;
                        self.emit_op(IrOpcode::arithmetic(op, width));
                        Ok(value(width.value_kind()))
                    }
                    ArithmeticResolution::Pointer { pointee } => {
                        self.emit_expr(&call.args[0], locals)?;
                        self.emit_expr(&call.args[1], locals)?;
                        self.emit_op(IrOpcode::arithmetic(op, NumericWidth::I64));
                        Ok(OperandKind::Pointer(pointee))
                    }
                }
            }
            BuiltinClass::Negate => {
                let operand = self.infer_kind(&call.args[0], locals, &from)?;
                let width = numeric::resolve_negate(operand)?;
                self.emit_operand_as(&call.args[0], locals, width)?;
                let op = IrOpcode::negate(width)
                    .ok_or_else(|| Error::type_error("negate does not support unsigned operands"))?;
                self.emit_op(op);
                Ok(value(width.value_kind()))
            }
            BuiltinClass::Comparison => {
                let lhs = self.infer_kind(&call.args[0], locals, &from)?;
                let rhs = self.infer_kind(&call.args[1], locals, &from)?;
                let width = numeric::resolve_comparison(lhs, rhs)?;
                let op = ComparisonOp::from_name(&call.name)
                    .ok_or_else(|| Error::type_error(format!("unknown comparison: {}", call.name)))?;
                self.emit_operand_as(&call.args[0], locals, width)?;
                self.emit_operand_as(&call.args[1], locals, width)?;
                self.emit_op(IrOpcode::compare(op, width));
                Ok(value(ValueKind::Bool))
            }
            BuiltinClass::Boolean => self.emit_short_circuit(call, locals),
            BuiltinClass::Not => {
                self.emit_bool_operand(&call.args[0], locals)?;
                self.emit(IrOpcode::PushI32, 0);
                self.emit_op(IrOpcode::CmpEqI32);
                Ok(value(ValueKind::Bool))
            }
            BuiltinClass::Math => self.emit_math(call, locals),
            BuiltinClass::Convert => self.emit_convert(call, locals),
            BuiltinClass::Location => self.emit_location(&call.args[0], locals),
            BuiltinClass::Dereference => {
                let target = &call.args[0];
                if let ExprKind::Name(name) = &target.kind {
                    if locals.get(name).is_some_and(|l| l.kind == BindingKind::Reference) {
                        return self.emit_name(name, locals);
                    }
                }
                match self.emit_expr(target, locals)? {
                    OperandKind::Pointer(kind) => {
                        self.emit_op(IrOpcode::LoadIndirect);
                        Ok(value(kind))
                    }
                    OperandKind::Value(_) => Err(Error::type_error("dereference requires a pointer or reference")),
                }
            }
            BuiltinClass::Assign => self.emit_assign(call, locals),
            BuiltinClass::If => self.emit_if_value(call, locals),
            BuiltinClass::Block => self.emit_block_value(call.body.as_deref().unwrap_or(&[]), locals),
            BuiltinClass::Step => self.emit_step(call, locals),
            BuiltinClass::Count => self.emit_count(call, locals),
            BuiltinClass::Index => self.emit_index(call, locals),
            BuiltinClass::Collection => Err(Error::lowering(format!(
                "native backend only supports {} literals in bindings, arguments, count and at",
                call.name
            ))),
            BuiltinClass::Heap => Err(Error::lowering(format!(
                "native backend does not support heap allocation: {}",
                call.name
            ))),
            BuiltinClass::Pathspace => Err(Error::lowering(format!(
                "native backend does not support pathspace operations: {}",
                call.name
            ))),
            BuiltinClass::Return
            | BuiltinClass::Repeat
            | BuiltinClass::Loop
            | BuiltinClass::While
            | BuiltinClass::For
            | BuiltinClass::Print => Err(Error::type_error(format!("{} does not produce a value", call.name))),
        }
    }

    fn emit_bool_operand(&mut self, expr: &Expr, locals: &LocalMap) -> Result<()> {
        match self.emit_expr(expr, locals)? {
            OperandKind::Value(ValueKind::Bool | ValueKind::Unknown) => Ok(()),
            _ => Err(Error::type_error("boolean operators require bool operands")),
        }
    }

    /// `and`/`or`; the right operand runs only when it decides the result
    fn emit_short_circuit(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        self.emit_bool_operand(&call.args[0], locals)?;
        let to_short = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        if call.name == "and" {
            self.emit_bool_operand(&call.args[1], locals)?;
            let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
            self.patch_jump_here(to_short);
            self.emit(IrOpcode::PushI32, 0);
            self.patch_jump_here(to_end);
        } else {
            self.emit(IrOpcode::PushI32, 1);
            let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
            self.patch_jump_here(to_short);
            self.emit_bool_operand(&call.args[1], locals)?;
            self.patch_jump_here(to_end);
        }
        Ok(value(ValueKind::Bool))
    }

    fn emit_convert(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let target = convert_target(call)?;
        let source = self.emit_expr(&call.args[0], locals)?;
        if source.is_pointer() {
            return Err(Error::type_error("convert requires numeric or bool operand"));
        }
        let from = Self::width_of(source.value_kind())?;
        if target == ValueKind::Bool {
            self.push_const(from, 0);
            self.emit_op(IrOpcode::compare(ComparisonOp::NotEqual, from));
            return Ok(value(ValueKind::Bool));
        }
        let to = Self::width_of(target)?;
        if let Some(op) = IrOpcode::convert(from, to) {
            self.emit_op(op);
        }
        Ok(value(target))
    }

    fn emit_location(&mut self, target: &Expr, locals: &LocalMap) -> Result<OperandKind> {
        let ExprKind::Name(name) = &target.kind else {
            return Err(Error::type_error("location requires a local binding"));
        };
        let local = locals
            .get(name)
            .ok_or_else(|| Error::lowering(format!("native backend does not know identifier: {}", name)))?;
        if local.value_kind == ValueKind::String {
            return Err(Error::lowering("native backend does not support string pointers or references"));
        }
        let (index, kind, value_kind) = (local.index, local.kind, local.value_kind);
        match kind {
            // The slot already holds the referenced address.
            BindingKind::Reference => self.load_local(index),
            BindingKind::Array | BindingKind::Vector | BindingKind::Map => {
                return Err(Error::lowering(format!(
                    "native backend does not support array values: {}",
                    name
                )))
            }
            BindingKind::Value | BindingKind::Pointer => self.emit(IrOpcode::AddressOfLocal, index as u64),
        }
        Ok(OperandKind::Pointer(value_kind))
    }

    /// `assign(target, value)`; the assigned value stays on the stack
    pub(super) fn emit_assign(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let target = &call.args[0];
        let assigned = &call.args[1];
        match &target.kind {
            ExprKind::Name(name) => {
                let local = locals.get(name).ok_or_else(|| {
                    Error::type_error(format!("assign target must be a known binding: {}", name))
                })?;
                if !local.mutable {
                    return Err(Error::type_error(format!("assign target must be mutable: {}", name)));
                }
                if local.value_kind == ValueKind::String {
                    return Err(Error::lowering("native backend does not support string assignment"));
                }
                let (index, kind, value_kind) = (local.index, local.kind, local.value_kind);
                match kind {
                    BindingKind::Reference => {
                        self.load_local(index);
                        let k = self.emit_expr(assigned, locals)?;
                        self.coerce(k.value_kind(), value_kind);
                        self.emit_op(IrOpcode::StoreIndirect);
                        Ok(value(value_kind))
                    }
                    BindingKind::Pointer => {
                        self.emit_expr(assigned, locals)?;
                        self.emit_op(IrOpcode::Dup);
                        self.store_local(index);
                        Ok(OperandKind::Pointer(value_kind))
                    }
                    BindingKind::Value => {
                        let k = self.emit_expr(assigned, locals)?;
                        self.coerce(k.value_kind(), value_kind);
                        self.emit_op(IrOpcode::Dup);
                        self.store_local(index);
                        Ok(value(value_kind))
                    }
                    BindingKind::Array | BindingKind::Vector | BindingKind::Map => Err(Error::lowering(format!(
                        "native backend does not support array values: {}",
                        name
                    ))),
                }
            }
            ExprKind::Call(inner) if target.is_call_to("dereference") && inner.args.len() == 1 => {
                let pointer = &inner.args[0];
                let pointee = match &pointer.kind {
                    ExprKind::Name(name) if locals.get(name).is_some_and(|l| l.kind == BindingKind::Reference) => {
                        let local = &locals[name];
                        let (index, kind) = (local.index, local.value_kind);
                        self.load_local(index);
                        kind
                    }
                    _ => match self.emit_expr(pointer, locals)? {
                        OperandKind::Pointer(kind) => kind,
                        OperandKind::Value(_) => {
                            return Err(Error::type_error("dereference requires a pointer or reference"))
                        }
                    },
                };
                let k = self.emit_expr(assigned, locals)?;
                self.coerce(k.value_kind(), pointee);
                self.emit_op(IrOpcode::StoreIndirect);
                Ok(value(pointee))
            }
            _ => Err(Error::type_error("assign target must be a binding or dereference")),
        }
    }

    fn emit_if_value(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let from = self.current_path();
        let result = self.infer_if(call, locals, &from)?;
        self.emit_bool_condition(&call.args[0], locals)?;
        let to_else = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        let then_body = self.branch_body(&call.args[1])?;
        let k = self.emit_block_value(then_body, locals)?;
        self.coerce(k.value_kind(), result.value_kind());
        let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
        self.patch_jump_here(to_else);
        let else_body = self.branch_body(&call.args[2])?;
        let k = self.emit_block_value(else_body, locals)?;
        self.coerce(k.value_kind(), result.value_kind());
        self.patch_jump_here(to_end);
        Ok(result)
    }

    /// Statements of a `then(){...}` style envelope
    pub(super) fn branch_body<'e>(&self, branch: &'e Expr) -> Result<&'e [Expr]> {
        if !crate::types::returns::is_block_envelope(branch) {
            return Err(Error::call_shape("if branches require block envelopes"));
        }
        Ok(branch.as_call().and_then(|c| c.body.as_deref()).unwrap_or(&[]))
    }

    /// Emit an `if` condition, which must be bool
    pub(super) fn emit_bool_condition(&mut self, cond: &Expr, locals: &LocalMap) -> Result<()> {
        match self.emit_expr(cond, locals)? {
            OperandKind::Value(ValueKind::Bool | ValueKind::Unknown) => Ok(()),
            _ => Err(Error::type_error("if condition requires bool")),
        }
    }

    /// Block in value position: a new scope whose last statement is the value
    pub(super) fn emit_block_value(&mut self, body: &[Expr], locals: &LocalMap) -> Result<OperandKind> {
        let (last, init) = body
            .split_last()
            .ok_or_else(|| Error::type_error("block expression requires a value"))?;
        let mut inner = locals.clone();
        self.lower_statements(init, &mut inner)?;
        if last.is_binding() {
            return Err(Error::type_error("block expression requires a value"));
        }
        if last.is_call_to("return") {
            self.lower_statement(last, &mut inner)?;
            // Unreachable filler keeps both join paths at the same depth.
            self.emit(IrOpcode::PushI32, 0);
            return Ok(value(ValueKind::Unknown));
        }
        self.emit_expr(last, &inner)
    }

    /// Leave an argv index on the stack; `checked` adds both bounds tests
    pub(super) fn emit_argv_index(&mut self, call: &Call, locals: &LocalMap, checked: bool) -> Result<()> {
        if call.args.len() != 2 {
            return Err(Error::call_shape(format!("argument count mismatch for builtin {}", call.name)));
        }
        if !is_argument_array(&call.args[0], locals) {
            return Err(Error::type_error(format!("{} requires an array argument", call.name)));
        }
        if !checked {
            let from = self.current_path();
            let index_kind = self.infer_kind(&call.args[1], locals, &from)?;
            if index_kind.is_pointer() || !index_kind.value_kind().is_integer() {
                return Err(Error::type_error(format!("{} index requires an integer", call.name)));
            }
            return self.emit_operand_as(&call.args[1], locals, Self::width_of(index_kind.value_kind())?);
        }
        let (slot, width) = self.spill_index(call, locals)?;
        self.emit_range_check(slot, width, |lowerer| lowerer.emit_op(IrOpcode::PushArgc), "array index out of bounds");
        self.load_local(slot);
        Ok(())
    }

    /// `increment`/`decrement`; the updated value stays on the stack
    pub(super) fn emit_step(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let op = if call.name == "increment" {
            ArithmeticOp::Plus
        } else {
            ArithmeticOp::Minus
        };
        let target = &call.args[0];
        let numeric = |kind: ValueKind| -> Result<NumericWidth> {
            match NumericWidth::of(kind) {
                Some(width) if kind.is_numeric() => Ok(width),
                _ => Err(Error::type_error(format!("{} requires numeric operand", call.name))),
            }
        };
        match &target.kind {
            ExprKind::Name(name) => {
                let local = locals.get(name).ok_or_else(|| {
                    Error::type_error(format!("{} target must be a known binding: {}", call.name, name))
                })?;
                if !local.mutable {
                    return Err(Error::type_error(format!("{} target must be mutable: {}", call.name, name)));
                }
                let (index, kind, value_kind) = (local.index, local.kind, local.value_kind);
                let width = numeric(value_kind)?;
                match kind {
                    BindingKind::Value => {
                        self.load_local(index);
                        self.push_const(width, 1);
                        self.emit_op(IrOpcode::arithmetic(op, width));
                        self.emit_op(IrOpcode::Dup);
                        self.store_local(index);
                    }
                    BindingKind::Reference => {
                        self.load_local(index);
                        self.load_local(index);
                        self.emit_op(IrOpcode::LoadIndirect);
                        self.push_const(width, 1);
                        self.emit_op(IrOpcode::arithmetic(op, width));
                        self.emit_op(IrOpcode::StoreIndirect);
                    }
                    _ => return Err(Error::type_error(format!("{} target must be a mutable binding", call.name))),
                }
                Ok(value(value_kind))
            }
            ExprKind::Call(inner) if target.is_call_to("dereference") && inner.args.len() == 1 => {
                let pointer = &inner.args[0];
                let pointee = match &pointer.kind {
                    ExprKind::Name(name) if locals.get(name).is_some_and(|l| l.kind == BindingKind::Reference) => {
                        let local = &locals[name];
                        let (index, kind) = (local.index, local.value_kind);
                        self.load_local(index);
                        kind
                    }
                    _ => match self.emit_expr(pointer, locals)? {
                        OperandKind::Pointer(kind) => kind,
                        OperandKind::Value(_) => {
                            return Err(Error::type_error("dereference requires a pointer or reference"))
                        }
                    },
                };
                let width = numeric(pointee)?;
                let address = self.alloc_local();
                self.store_local(address);
                self.load_local(address);
                self.load_local(address);
                self.emit_op(IrOpcode::LoadIndirect);
                self.push_const(width, 1);
                self.emit_op(IrOpcode::arithmetic(op, width));
                self.emit_op(IrOpcode::StoreIndirect);
                Ok(value(pointee))
            }
            _ => Err(Error::type_error(format!("{} target must be a binding or dereference", call.name))),
        }
    }
}
