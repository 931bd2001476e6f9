//! Operand-kind inference for lowering
//!
//! Mirrors the validator's rules but works on [`LocalMap`] and reports
//! lowering errors; opcode widths are chosen from these kinds before any
//! operand is emitted.

use super::collections::{is_argument_array, Collection};
use super::{IrLowerer, LocalInfo, LocalMap, StringSource};
use crate::parser::{Call, Definition, Expr, ExprKind};
use crate::types::builtins::{self, BuiltinClass};
use crate::types::numeric::{self, ArithmeticOp, NumericWidth, OperandKind};
use crate::types::{
    binding_default, binding_name, binding_type, call_parameters, declared_return, is_mutable, returns,
    BindingKind, ReturnInfo, ValueKind,
};
use crate::{Error, Result};

fn value(kind: ValueKind) -> OperandKind {
    OperandKind::Value(kind)
}

impl<'a> IrLowerer<'a> {
    /// Return descriptor of `def`, inferred on first use and memoized
    pub(super) fn return_info(&mut self, def: &'a Definition) -> Result<ReturnInfo> {
        if let Some(info) = self.return_cache.get(&def.full_path) {
            return Ok(*info);
        }
        if let Some(info) = declared_return(def)? {
            self.return_cache.insert(def.full_path.clone(), info);
            return Ok(info);
        }
        let body = def.body();
        if def.is_struct() || !returns::contains_value_return(&body) {
            self.return_cache.insert(def.full_path.clone(), ReturnInfo::void());
            return Ok(ReturnInfo::void());
        }
        if !self.inferring.insert(def.full_path.clone()) {
            return Ok(ReturnInfo::value(ValueKind::Unknown));
        }

        let mut locals = LocalMap::new();
        for param in call_parameters(def)? {
            if let (Some(name), Ok(info)) = (
                binding_name(param),
                self.binding_shape(param, binding_default(param), &locals, &def.full_path),
            ) {
                locals.insert(name.to_string(), info);
            }
        }
        let kind = self
            .infer_return_kind(&body, &mut locals, &def.full_path)
            .unwrap_or(ValueKind::Unknown);
        self.inferring.remove(&def.full_path);

        let info = ReturnInfo::value(kind);
        tracing::trace!(definition = %def.full_path, kind = %kind, "inferred return kind");
        self.return_cache.insert(def.full_path.clone(), info);
        Ok(info)
    }

    fn infer_return_kind(&mut self, stmts: &[Expr], locals: &mut LocalMap, from: &str) -> Option<ValueKind> {
        for stmt in stmts {
            let ExprKind::Call(call) = &stmt.kind else {
                continue;
            };
            if call.is_binding {
                if let Ok(info) = self.binding_shape(stmt, call.args.first(), locals, from) {
                    locals.insert(call.name.clone(), info);
                }
                continue;
            }
            if stmt.is_call_to("return") {
                if let Some(v) = call.args.first() {
                    return self.infer_kind(v, locals, from).ok().map(|k| k.value_kind());
                }
                continue;
            }
            let nested = call
                .args
                .iter()
                .filter_map(|a| a.as_call().and_then(|c| c.body.as_ref()))
                .chain(call.body.as_ref());
            for body in nested.collect::<Vec<_>>() {
                let mut inner = locals.clone();
                if let Some(kind) = self.infer_return_kind(body, &mut inner, from) {
                    return Some(kind);
                }
            }
        }
        None
    }

    /// Shape of a binding; slot and string source are filled in by the caller
    pub(super) fn binding_shape(
        &mut self,
        stmt: &Expr,
        init: Option<&Expr>,
        locals: &LocalMap,
        from: &str,
    ) -> Result<LocalInfo> {
        let name = binding_name(stmt).unwrap_or("?");
        let mutable = is_mutable(&stmt.transforms);
        if let Some(ty) = binding_type(&stmt.transforms, &self.scope)? {
            match ty.kind {
                BindingKind::Pointer | BindingKind::Reference if ty.value_kind == ValueKind::String => {
                    return Err(Error::lowering("native backend does not support string pointers or references"));
                }
                BindingKind::Array if ty.value_kind == ValueKind::String => {}
                BindingKind::Array | BindingKind::Vector | BindingKind::Map => {
                    let numeric = |kind: ValueKind| kind == ValueKind::Unknown || NumericWidth::of(kind).is_some();
                    if !numeric(ty.value_kind) || (ty.kind == BindingKind::Map && !numeric(ty.key_kind)) {
                        return Err(Error::lowering(format!(
                            "native backend only supports numeric/bool collection elements: {}",
                            name
                        )));
                    }
                }
                _ => {}
            }
            return Ok(LocalInfo {
                index: 0,
                mutable,
                kind: ty.kind,
                value_kind: ty.value_kind,
                key_kind: ty.key_kind,
                string_source: StringSource::None,
                struct_path: ty.struct_path,
            });
        }

        let init = init.ok_or_else(|| {
            Error::lowering(format!("binding requires a type or initializer: {}", name))
        })?;
        if let ExprKind::Name(source) = &init.kind {
            if let Some(local) = locals.get(source).filter(|l| l.kind.is_collection()) {
                return Ok(LocalInfo {
                    index: 0,
                    mutable,
                    ..local.clone()
                });
            }
        }
        if let Some(collection) = self.collection_of(init, locals)? {
            return Ok(LocalInfo {
                index: 0,
                mutable,
                kind: collection.kind,
                value_kind: collection.value_kind,
                key_kind: collection.key_kind,
                string_source: StringSource::None,
                struct_path: None,
            });
        }
        let (kind, value_kind) = match self.infer_kind(init, locals, from)? {
            OperandKind::Pointer(ValueKind::String) => {
                return Err(Error::lowering("native backend does not support string pointers or references"))
            }
            OperandKind::Pointer(k) => (BindingKind::Pointer, k),
            OperandKind::Value(ValueKind::Unknown) => {
                return Err(Error::lowering(format!(
                    "native backend cannot infer binding type: {}",
                    name
                )))
            }
            OperandKind::Value(k) => (BindingKind::Value, k),
        };
        Ok(LocalInfo {
            index: 0,
            mutable,
            kind,
            value_kind,
            key_kind: ValueKind::Unknown,
            string_source: StringSource::None,
            struct_path: self.struct_constructed_by(init, from),
        })
    }

    fn struct_constructed_by(&self, expr: &Expr, from: &str) -> Option<String> {
        let call = expr.as_call()?;
        if call.is_binding || call.is_method_call || builtins::is_builtin(&call.name) {
            return None;
        }
        self.scope
            .resolve_call(&call.name, from)
            .filter(|def| def.is_struct())
            .map(|def| def.full_path.clone())
    }

    /// Definition a user or method call resolves to
    pub(super) fn resolve_callee(&mut self, call: &Call, locals: &LocalMap, from: &str) -> Result<&'a Definition> {
        if !call.is_method_call {
            return self
                .scope
                .resolve_call(&call.name, from)
                .ok_or_else(|| Error::structural(format!("unknown call target: {}", call.name)));
        }
        let receiver = call
            .args
            .first()
            .ok_or_else(|| Error::call_shape(format!("method call requires a receiver: {}", call.name)))?;
        let struct_path = match &receiver.kind {
            ExprKind::Name(name) => locals.get(name).and_then(|l| l.struct_path.clone()),
            _ => self.struct_constructed_by(receiver, from),
        };
        let base = match struct_path {
            Some(path) => path,
            None => format!("/{}", self.infer_kind(receiver, locals, from)?.value_kind().type_name()),
        };
        let path = format!("{}/{}", base, call.name);
        self.scope
            .get(&path)
            .ok_or_else(|| Error::structural(format!("unknown call target: {}", path)))
    }

    /// Kind an expression leaves on the stack
    pub(super) fn infer_kind(&mut self, expr: &Expr, locals: &LocalMap, from: &str) -> Result<OperandKind> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(value(ValueKind::of_literal(lit))),
            ExprKind::Name(name) => {
                let local = locals.get(name).ok_or_else(|| {
                    Error::lowering(format!("native backend does not know identifier: {}", name))
                })?;
                if let Some(collection) = Collection::of_local(local) {
                    return Err(Error::lowering(format!(
                        "native backend only reads {} values through count and at: {}",
                        collection.type_name(),
                        name
                    )));
                }
                match local.kind {
                    BindingKind::Pointer => Ok(OperandKind::Pointer(local.value_kind)),
                    BindingKind::Array | BindingKind::Vector | BindingKind::Map => Err(Error::lowering(format!(
                        "native backend does not support array values: {}",
                        name
                    ))),
                    BindingKind::Value | BindingKind::Reference => Ok(value(local.value_kind)),
                }
            }
            ExprKind::Call(call) => {
                if call.is_binding {
                    return Err(Error::structural(format!(
                        "binding not allowed in expression context: {}",
                        call.name
                    )));
                }
                if !call.is_method_call {
                    if let Some(info) = builtins::lookup(&call.name) {
                        return self.infer_builtin(call, info.class, locals, from);
                    }
                }
                let callee = self.resolve_callee(call, locals, from)?;
                if callee.is_struct() {
                    return Ok(value(ValueKind::Int32));
                }
                let info = self.return_info(callee)?;
                if info.returns_void {
                    return Err(Error::lowering(format!(
                        "void call not allowed in expression context: {}",
                        callee.full_path
                    )));
                }
                Ok(value(info.kind))
            }
        }
    }

    fn infer_builtin(&mut self, call: &Call, class: BuiltinClass, locals: &LocalMap, from: &str) -> Result<OperandKind> {
        let arg = |i: usize| {
            call.args
                .get(i)
                .ok_or_else(|| Error::call_shape(format!("argument count mismatch for builtin {}", call.name)))
        };
        match class {
            BuiltinClass::Arithmetic => {
                let lhs = self.infer_kind(arg(0)?, locals, from)?;
                let rhs = self.infer_kind(arg(1)?, locals, from)?;
                let op = ArithmeticOp::from_name(&call.name)
                    .ok_or_else(|| Error::type_error(format!("unknown arithmetic operator: {}", call.name)))?;
                Ok(numeric::resolve_arithmetic(op, lhs, rhs)?.result())
            }
            BuiltinClass::Negate => {
                let operand = self.infer_kind(arg(0)?, locals, from)?;
                Ok(value(numeric::resolve_negate(operand)?.value_kind()))
            }
            BuiltinClass::Comparison | BuiltinClass::Boolean | BuiltinClass::Not => Ok(value(ValueKind::Bool)),
            BuiltinClass::Math => {
                let mut operands = Vec::with_capacity(call.args.len());
                for a in &call.args {
                    operands.push(self.infer_kind(a, locals, from)?);
                }
                Ok(value(numeric::resolve_math_builtin(&call.name, &operands)?.value_kind()))
            }
            BuiltinClass::Convert => Ok(value(convert_target(call)?)),
            BuiltinClass::Location => match &arg(0)?.kind {
                ExprKind::Name(name) => {
                    let local = locals.get(name).ok_or_else(|| {
                        Error::lowering(format!("native backend does not know identifier: {}", name))
                    })?;
                    if local.value_kind == ValueKind::String {
                        return Err(Error::lowering("native backend does not support string pointers or references"));
                    }
                    Ok(OperandKind::Pointer(local.value_kind))
                }
                _ => Err(Error::type_error("location requires a local binding")),
            },
            BuiltinClass::Dereference => {
                let target = arg(0)?;
                if let ExprKind::Name(name) = &target.kind {
                    if let Some(local) = locals.get(name).filter(|l| l.kind == BindingKind::Reference) {
                        return Ok(value(local.value_kind));
                    }
                }
                match self.infer_kind(target, locals, from)? {
                    OperandKind::Pointer(kind) => Ok(value(kind)),
                    OperandKind::Value(_) => Err(Error::type_error("dereference requires a pointer or reference")),
                }
            }
            BuiltinClass::Assign | BuiltinClass::Step => {
                let target = arg(0)?;
                if let ExprKind::Name(name) = &target.kind {
                    if let Some(local) = locals.get(name).filter(|l| l.kind == BindingKind::Reference) {
                        return Ok(value(local.value_kind));
                    }
                }
                self.infer_kind(target, locals, from)
            }
            BuiltinClass::If => self.infer_if(call, locals, from),
            BuiltinClass::Block => self.infer_block_value(call.body.as_deref().unwrap_or(&[]), locals, from),
            BuiltinClass::Count => Ok(value(ValueKind::Int32)),
            BuiltinClass::Index => {
                let target = arg(0)?;
                if is_argument_array(target, locals) {
                    return Ok(value(ValueKind::String));
                }
                if let Some(collection) = self.collection_of(target, locals)? {
                    return Ok(value(collection.value_kind));
                }
                match self.infer_kind(target, locals, from)? {
                    OperandKind::Value(ValueKind::String) => Ok(value(ValueKind::Int32)),
                    _ => Err(Error::type_error(format!("{} requires an array argument", call.name))),
                }
            }
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

    /// Result kind of an `if` used as a value
    pub(super) fn infer_if(&mut self, call: &Call, locals: &LocalMap, from: &str) -> Result<OperandKind> {
        let mut kinds = Vec::with_capacity(2);
        for branch in call.args.iter().skip(1) {
            let body = branch
                .as_call()
                .and_then(|c| c.body.as_deref())
                .ok_or_else(|| Error::call_shape("if branches require block envelopes"))?;
            kinds.push(self.infer_block_value(body, locals, from)?);
        }
        let mismatch = || Error::type_error("if expression branches must produce compatible values");
        match kinds.as_slice() {
            [a, b] => match (a.value_kind(), b.value_kind()) {
                (ValueKind::Unknown, _) => Ok(*b),
                (_, ValueKind::Unknown) => Ok(*a),
                _ if a == b => Ok(*a),
                (x, y) if x.is_numeric() && y.is_numeric() && !a.is_pointer() && !b.is_pointer() => {
                    numeric::resolve_arithmetic(ArithmeticOp::Plus, *a, *b)
                        .map(|r| r.result())
                        .map_err(|_| mismatch())
                }
                _ => Err(mismatch()),
            },
            _ => Err(Error::call_shape("argument count mismatch for builtin if")),
        }
    }

    /// Kind produced by the last statement of a value block
    pub(super) fn infer_block_value(&mut self, body: &[Expr], locals: &LocalMap, from: &str) -> Result<OperandKind> {
        let (last, init) = body
            .split_last()
            .ok_or_else(|| Error::type_error("block expression requires a value"))?;
        let mut inner = locals.clone();
        for stmt in init {
            if let Some(name) = binding_name(stmt) {
                let info = self.binding_shape(stmt, binding_default(stmt), &inner, from)?;
                inner.insert(name.to_string(), info);
            }
        }
        if last.is_binding() {
            return Err(Error::type_error("block expression requires a value"));
        }
        if last.is_call_to("return") {
            return Ok(value(ValueKind::Unknown));
        }
        self.infer_kind(last, &inner, from)
    }
}

/// Target kind of `convert<T>`
pub(super) fn convert_target(call: &Call) -> Result<ValueKind> {
    let target = call
        .template_args
        .first()
        .ok_or_else(|| Error::type_error("convert requires a template argument"))?;
    crate::types::check_software_numeric(target)?;
    ValueKind::from_type_name(target)
        .filter(|k| *k != ValueKind::String)
        .ok_or_else(|| Error::type_error(format!("unsupported convert target: {}", target)))
}
