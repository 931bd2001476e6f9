//! Collections: `array`, `vector` and `map` literals, `count`, `at`
//!
//! A literal occupies consecutive local slots and its value is the address
//! of the first one:
//!
//! ```text
//! array<T>    [count][e0][e1]...
//! vector<T>   [count][capacity][e0][e1]...
//! map<K, V>   [count][k0][v0][k1][v1]...
//! ```
//!
//! Element `i` lives at `base + (i + header) * 16`. Map entry `i` keeps its
//! key at `base + (2i + 1) * 16` and its value in the next slot. The entry
//! argument list stays a host-side `array<string>` reached through
//! `PushArgc` and the argv print opcodes.

use super::{IrLowerer, LocalInfo, LocalMap, StringSource};
use crate::compiler::ir::instruction::IrOpcode;
use crate::parser::{Call, Expr, ExprKind, Literal};
use crate::types::effects;
use crate::types::numeric::{ArithmeticOp, ComparisonOp, NumericWidth, OperandKind};
use crate::types::{collection_literal_type, BindingKind, ValueKind};
use crate::{Error, Result};

/// Shape of a collection value held in local slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Collection {
    pub(super) kind: BindingKind,
    pub(super) key_kind: ValueKind,
    pub(super) value_kind: ValueKind,
}

impl Collection {
    /// Slots in front of the first element
    fn header_slots(self) -> i64 {
        if self.kind == BindingKind::Vector {
            2
        } else {
            1
        }
    }

    pub(super) fn type_name(self) -> String {
        match self.kind {
            BindingKind::Map => format!("map<{}, {}>", self.key_kind, self.value_kind),
            BindingKind::Vector => format!("vector<{}>", self.value_kind),
            _ => format!("array<{}>", self.value_kind),
        }
    }

    /// Same slot layout and element widths
    pub(super) fn compatible(self, other: Collection) -> bool {
        self.kind == other.kind
            && NumericWidth::of(self.value_kind) == NumericWidth::of(other.value_kind)
            && (self.kind != BindingKind::Map || NumericWidth::of(self.key_kind) == NumericWidth::of(other.key_kind))
    }

    pub(super) fn of_local(local: &LocalInfo) -> Option<Self> {
        if !local.kind.is_collection() || is_argv(local) {
            return None;
        }
        Some(Self {
            kind: local.kind,
            key_kind: local.key_kind,
            value_kind: local.value_kind,
        })
    }
}

/// The entry argument list (or a binding aliasing it)
pub(super) fn is_argv(local: &LocalInfo) -> bool {
    local.kind == BindingKind::Array && local.value_kind == ValueKind::String
}

/// `expr` names the entry argument list
pub(super) fn is_argument_array(expr: &Expr, locals: &LocalMap) -> bool {
    matches!(&expr.kind, ExprKind::Name(name) if locals.get(name).is_some_and(is_argv))
}

impl<'a> IrLowerer<'a> {
    /// Collection shape of `expr` without emitting anything
    pub(super) fn collection_of(&self, expr: &Expr, locals: &LocalMap) -> Result<Option<Collection>> {
        match &expr.kind {
            ExprKind::Name(name) => Ok(locals.get(name).and_then(Collection::of_local)),
            ExprKind::Call(call) => Ok(collection_literal_type(call, &[])?.map(|ty| Collection {
                kind: ty.kind,
                key_kind: ty.key_kind,
                value_kind: ty.value_kind,
            })),
            ExprKind::Literal(_) => Ok(None),
        }
    }

    /// Push the address of the collection `expr` denotes
    pub(super) fn emit_collection(&mut self, expr: &Expr, locals: &LocalMap) -> Result<Collection> {
        match &expr.kind {
            ExprKind::Name(name) => {
                let local = locals
                    .get(name)
                    .ok_or_else(|| Error::lowering(format!("native backend does not know identifier: {}", name)))?;
                let collection = Collection::of_local(local).ok_or_else(|| {
                    Error::type_error(format!("native backend requires a collection value: {}", name))
                })?;
                self.load_local(local.index);
                Ok(collection)
            }
            ExprKind::Call(call) if collection_literal_type(call, &[])?.is_some() => {
                let saved = self.enter_effects(expr, &call.name)?;
                let result = self.emit_collection_literal(call, locals);
                if let Some(saved) = saved {
                    self.active_effects = saved;
                }
                result
            }
            _ => Err(Error::lowering("native backend requires a collection binding or literal")),
        }
    }

    fn emit_collection_literal(&mut self, call: &Call, locals: &LocalMap) -> Result<Collection> {
        effects::require_effect(&call.name, &self.active_effects)?;
        let ty = collection_literal_type(call, &[])?
            .ok_or_else(|| Error::lowering(format!("not a collection literal: {}", call.name)))?;
        let collection = Collection {
            kind: ty.kind,
            key_kind: ty.key_kind,
            value_kind: ty.value_kind,
        };
        let value_width = NumericWidth::of(collection.value_kind).ok_or_else(|| {
            Error::lowering(format!("native backend only supports numeric/bool {} literals", call.name))
        })?;
        let key_width = if collection.kind == BindingKind::Map {
            if call.args.len() % 2 != 0 {
                return Err(Error::call_shape("map literal requires an even number of arguments"));
            }
            Some(NumericWidth::of(collection.key_kind).ok_or_else(|| {
                Error::lowering("native backend only supports numeric/bool map keys")
            })?)
        } else {
            None
        };

        let header = collection.header_slots() as u32;
        let entries = match key_width {
            Some(_) => call.args.len() / 2,
            None => call.args.len(),
        };
        // Reserve every slot up front; element expressions may allocate temps.
        let base = self.next_local;
        self.next_local += header + call.args.len() as u32;

        self.emit(IrOpcode::PushI32, entries as u64);
        self.store_local(base);
        if collection.kind == BindingKind::Vector {
            self.emit(IrOpcode::PushI32, entries as u64);
            self.store_local(base + 1);
        }
        for (i, arg) in call.args.iter().enumerate() {
            let width = match key_width {
                Some(key) if i % 2 == 0 => key,
                _ => value_width,
            };
            let kind = self.emit_expr(arg, locals)?;
            if kind.is_pointer() {
                return Err(Error::type_error(format!("{} literal element type mismatch", call.name)));
            }
            self.coerce(kind.value_kind(), width.value_kind());
            self.store_local(base + header + i as u32);
        }
        self.emit(IrOpcode::AddressOfLocal, base as u64);
        tracing::trace!(literal = %collection.type_name(), base, entries, "collection literal");
        Ok(collection)
    }

    /// Push `base + (index * scale + offset) * 16` from two slots
    fn emit_slot_address(&mut self, base: u32, index: u32, scale: i64, offset: i64) {
        self.load_local(base);
        self.load_local(index);
        self.push_const(NumericWidth::I64, scale);
        self.emit_op(IrOpcode::arithmetic(ArithmeticOp::Multiply, NumericWidth::I64));
        self.push_const(NumericWidth::I64, offset);
        self.emit_op(IrOpcode::arithmetic(ArithmeticOp::Plus, NumericWidth::I64));
        self.push_const(NumericWidth::I64, 16);
        self.emit_op(IrOpcode::arithmetic(ArithmeticOp::Multiply, NumericWidth::I64));
        self.emit_op(IrOpcode::arithmetic(ArithmeticOp::Plus, NumericWidth::I64));
    }

    /// `count(c)` over argv, a collection or a known string
    pub(super) fn emit_count(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let target = &call.args[0];
        if is_argument_array(target, locals) {
            self.emit_op(IrOpcode::PushArgc);
            return Ok(OperandKind::Value(ValueKind::Int32));
        }
        if self.collection_of(target, locals)?.is_some() {
            self.emit_collection(target, locals)?;
            self.emit_op(IrOpcode::LoadIndirect);
            return Ok(OperandKind::Value(ValueKind::Int32));
        }
        if let Some((_, len)) = self.known_string(target, locals, &call.name)? {
            self.emit(IrOpcode::PushI32, len as u64);
            return Ok(OperandKind::Value(ValueKind::Int32));
        }
        Err(Error::type_error(format!("{} requires an array argument", call.name)))
    }

    /// `at(c, i)` and `at_unsafe(c, i)`
    pub(super) fn emit_index(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let checked = call.name == "at";
        let target = &call.args[0];
        if is_argument_array(target, locals) {
            self.emit_argv_index(call, locals, checked)?;
            return Ok(OperandKind::Value(ValueKind::String));
        }
        if let Some(collection) = self.collection_of(target, locals)? {
            return if collection.kind == BindingKind::Map {
                self.emit_map_lookup(call, locals, collection, checked)
            } else {
                self.emit_element(call, locals, collection, checked)
            };
        }
        if let Some((table_index, len)) = self.known_string(target, locals, &call.name)? {
            return self.emit_string_byte(call, locals, table_index, len, checked);
        }
        Err(Error::type_error(format!("{} requires an array argument", call.name)))
    }

    /// Evaluate an integer index into a fresh slot
    pub(super) fn spill_index(&mut self, call: &Call, locals: &LocalMap) -> Result<(u32, NumericWidth)> {
        let from = self.current_path();
        let kind = self.infer_kind(&call.args[1], locals, &from)?;
        if kind.is_pointer() || !kind.value_kind().is_integer() {
            return Err(Error::type_error(format!("{} index requires an integer", call.name)));
        }
        let width = Self::width_of(kind.value_kind())?;
        let slot = self.alloc_local();
        self.emit_operand_as(&call.args[1], locals, width)?;
        self.store_local(slot);
        Ok((slot, width))
    }

    /// Fail with `message` unless `0 <= index < bound`; `bound` pushes the limit
    pub(super) fn emit_range_check(&mut self, index: u32, width: NumericWidth, bound: impl Fn(&mut Self), message: &str) {
        if width != NumericWidth::U64 {
            self.load_local(index);
            self.push_const(width, 0);
            self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
            let to_ok = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
            self.emit_runtime_failure(message);
            self.patch_jump_here(to_ok);
        }
        self.load_local(index);
        bound(self);
        self.emit_op(IrOpcode::compare(ComparisonOp::GreaterEqual, width));
        let to_ok = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        self.emit_runtime_failure(message);
        self.patch_jump_here(to_ok);
    }

    fn emit_element(
        &mut self,
        call: &Call,
        locals: &LocalMap,
        collection: Collection,
        checked: bool,
    ) -> Result<OperandKind> {
        let base = self.alloc_local();
        self.emit_collection(&call.args[0], locals)?;
        self.store_local(base);
        let (index, width) = self.spill_index(call, locals)?;
        if checked {
            self.emit_range_check(
                index,
                width,
                |lowerer| {
                    lowerer.load_local(base);
                    lowerer.emit_op(IrOpcode::LoadIndirect);
                    lowerer.coerce(ValueKind::Int32, width.value_kind());
                },
                "array index out of bounds",
            );
        }
        self.emit_slot_address(base, index, 1, collection.header_slots());
        self.emit_op(IrOpcode::LoadIndirect);
        Ok(OperandKind::Value(collection.value_kind))
    }

    /// Linear scan over the entries; a missing key fails under `at`
    fn emit_map_lookup(
        &mut self,
        call: &Call,
        locals: &LocalMap,
        map: Collection,
        checked: bool,
    ) -> Result<OperandKind> {
        let from = self.current_path();
        let key_width = Self::width_of(map.key_kind)?;
        let lookup_kind = self.infer_kind(&call.args[1], locals, &from)?;
        if lookup_kind.is_pointer() || NumericWidth::of(lookup_kind.value_kind()) != Some(key_width) {
            return Err(Error::lowering(
                "native backend requires map lookup key type to match map key type",
            ));
        }

        let base = self.alloc_local();
        self.emit_collection(&call.args[0], locals)?;
        self.store_local(base);
        let key = self.alloc_local();
        self.emit_operand_as(&call.args[1], locals, key_width)?;
        self.store_local(key);
        let count = self.alloc_local();
        self.load_local(base);
        self.emit_op(IrOpcode::LoadIndirect);
        self.store_local(count);
        let entry = self.alloc_local();
        self.emit(IrOpcode::PushI32, 0);
        self.store_local(entry);

        let check = self.here();
        self.load_local(entry);
        self.load_local(count);
        self.emit_op(IrOpcode::CmpLtI32);
        let to_missing = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        self.emit_slot_address(base, entry, 2, 1);
        self.emit_op(IrOpcode::LoadIndirect);
        self.load_local(key);
        self.emit_op(IrOpcode::compare(ComparisonOp::Equal, key_width));
        let to_next = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        let to_found = self.emit_jump_placeholder(IrOpcode::Jump);
        self.patch_jump_here(to_next);
        self.load_local(entry);
        self.emit(IrOpcode::PushI32, 1);
        self.emit_op(IrOpcode::AddI32);
        self.store_local(entry);
        self.emit(IrOpcode::Jump, check as u64);

        self.patch_jump_here(to_missing);
        if checked {
            self.emit_runtime_failure("map key not found");
        }
        self.patch_jump_here(to_found);
        self.emit_slot_address(base, entry, 2, 2);
        self.emit_op(IrOpcode::LoadIndirect);
        Ok(OperandKind::Value(map.value_kind))
    }

    /// Byte of a string-table entry as `i32`
    fn emit_string_byte(
        &mut self,
        call: &Call,
        locals: &LocalMap,
        table_index: u32,
        len: usize,
        checked: bool,
    ) -> Result<OperandKind> {
        let (index, width) = self.spill_index(call, locals)?;
        if checked {
            self.emit_range_check(
                index,
                width,
                |lowerer| lowerer.push_const(width, len as i64),
                "string index out of bounds",
            );
        }
        self.load_local(index);
        self.emit(IrOpcode::LoadStringByte, table_index as u64);
        Ok(OperandKind::Value(ValueKind::Int32))
    }

    /// String-table index and byte length of a literal or table-backed string
    fn known_string(&mut self, expr: &Expr, locals: &LocalMap, builtin: &str) -> Result<Option<(u32, usize)>> {
        match &expr.kind {
            ExprKind::Literal(Literal::String(text)) => Ok(Some((self.module.intern(text), text.len()))),
            ExprKind::Name(name) => match locals.get(name).map(|l| (&l.value_kind, &l.string_source)) {
                Some((ValueKind::String, StringSource::Table(index))) => {
                    let len = self.module.string_table.get(*index as usize).map_or(0, |s| s.len());
                    Ok(Some((*index, len)))
                }
                Some((ValueKind::String, StringSource::Argv { .. })) => Err(Error::lowering(format!(
                    "native backend does not support {} on argument strings",
                    builtin
                ))),
                _ => Ok(None),
            },
            ExprKind::Call(_) | ExprKind::Literal(_) => Ok(None),
        }
    }
}
