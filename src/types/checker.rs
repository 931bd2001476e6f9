//! Semantics validator
//!
//! Walks every definition and execution once, inferring operand kinds as it
//! goes, and reports the first violation of:
//!
//! - entry-definition shape (`/main` takes nothing or one `array<string>`)
//! - effect vocabulary, defaults, nested-subset rule and builtin requirements
//! - builtin operand contracts (via [`super::numeric`])
//! - call shape: arity, named arguments, block arguments
//! - collection literals, loops and `increment`/`decrement` targets
//! - return-path completeness (via [`super::returns`])
//!
//! The validator never mutates the program.

use super::builtins::{self, BuiltinClass};
use super::effects::{self, EffectSet};
use super::numeric::{self, ArithmeticOp, OperandKind};
use super::returns;
use super::scope::DefinitionScope;
use super::{
    binding_name, binding_type, call_parameters, check_software_numeric, collection_literal_type, declared_return,
    is_mutable, order_call_arguments, templated_binding_type, BindingKind, ReturnInfo, TypeDescriptor, ValueKind,
};
use crate::parser::{Call, Definition, Execution, Expr, ExprKind, Program};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Validate `program` for lowering from `entry_path`
pub fn validate<S: AsRef<str>>(
    program: &Program,
    entry_path: &str,
    default_effects: &[S],
    entry_default_effects: &[S],
) -> Result<()> {
    SemanticsValidator::new(program, entry_path, default_effects, entry_default_effects)?.validate()
}

/// Compile-time view of a binding
#[derive(Debug, Clone)]
struct Binding {
    kind: BindingKind,
    value_kind: ValueKind,
    key_kind: ValueKind,
    mutable: bool,
    struct_path: Option<String>,
}

impl Binding {
    fn of_type(ty: TypeDescriptor, mutable: bool) -> Self {
        Self {
            kind: ty.kind,
            value_kind: ty.value_kind,
            key_kind: ty.key_kind,
            mutable,
            struct_path: ty.struct_path,
        }
    }

    fn operand(&self) -> OperandKind {
        match self.kind {
            BindingKind::Pointer => OperandKind::Pointer(self.value_kind),
            BindingKind::Value | BindingKind::Reference => OperandKind::Value(self.value_kind),
            BindingKind::Map | BindingKind::Array | BindingKind::Vector => OperandKind::Value(ValueKind::Unknown),
        }
    }

    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor {
            kind: self.kind,
            value_kind: self.value_kind,
            key_kind: self.key_kind,
            struct_path: None,
        }
    }
}

type Env = HashMap<String, Binding>;

/// Per-definition checking context
#[derive(Debug, Clone)]
struct Context {
    def_path: String,
    effects: EffectSet,
    returns: ReturnInfo,
    /// Template parameters of the definition; their types read as unknown
    templates: Vec<String>,
}

/// Expression and effect semantics checker
pub struct SemanticsValidator<'a> {
    program: &'a Program,
    scope: DefinitionScope<'a>,
    entry_path: String,
    default_effects: EffectSet,
    entry_default_effects: EffectSet,
    return_cache: HashMap<String, ReturnInfo>,
    inferring: HashSet<String>,
}

fn value(kind: ValueKind) -> OperandKind {
    OperandKind::Value(kind)
}

/// Kinds that may flow into a slot of kind `expected`
fn kinds_compatible(expected: ValueKind, actual: ValueKind) -> bool {
    if expected == ValueKind::Unknown || actual == ValueKind::Unknown || expected == actual {
        return true;
    }
    if expected.is_integer() && actual.is_integer() {
        return true;
    }
    expected.is_float() && actual.is_float()
}

/// Collection of type `actual` (or an uninferred value) may fill a slot of type `expected`
fn collection_matches(expected: &TypeDescriptor, actual: Option<&TypeDescriptor>, operand: OperandKind) -> bool {
    match actual {
        Some(actual) => {
            actual.kind == expected.kind
                && kinds_compatible(expected.value_kind, actual.value_kind)
                && kinds_compatible(expected.key_kind, actual.key_kind)
        }
        None => operand == OperandKind::Value(ValueKind::Unknown),
    }
}

/// Some operand has not been inferred (template parameters, cyclic returns)
fn any_unknown(operands: &[OperandKind]) -> bool {
    operands.iter().any(|op| *op == OperandKind::Value(ValueKind::Unknown))
}

fn is_bool_condition(kind: OperandKind) -> bool {
    !kind.is_pointer() && matches!(kind.value_kind(), ValueKind::Bool | ValueKind::Unknown)
}

impl<'a> SemanticsValidator<'a> {
    /// Prepare a validator; fails on malformed default effect lists or imports
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
            return_cache: HashMap::new(),
            inferring: HashSet::new(),
        })
    }

    /// Run every check; the first failure aborts
    pub fn validate(&mut self) -> Result<()> {
        tracing::debug!(entry = %self.entry_path, "validating program");
        let entry = self.scope.get(&self.entry_path).ok_or_else(|| {
            Error::structural(format!("missing entry definition {}", self.entry_path))
        })?;
        self.check_entry_shape(entry)?;

        let program = self.program;
        for def in &program.definitions {
            self.check_definition(def)?;
        }
        for exec in &program.executions {
            self.check_execution(exec)?;
        }
        tracing::debug!(
            definitions = program.definitions.len(),
            executions = program.executions.len(),
            "validation finished"
        );
        Ok(())
    }

    fn check_entry_shape(&self, entry: &Definition) -> Result<()> {
        let path = &entry.full_path;
        if !entry.template_args.is_empty() {
            return Err(Error::structural(format!(
                "entry definition cannot be templated: {}",
                path
            )));
        }
        match entry.parameters.as_slice() {
            [] => Ok(()),
            [param] => {
                let ty = binding_type(&param.transforms, &self.scope)?;
                let is_string_array = matches!(
                    ty,
                    Some(TypeDescriptor {
                        kind: BindingKind::Array,
                        value_kind: ValueKind::String,
                        ..
                    })
                );
                if binding_name(param).is_none() || !is_string_array {
                    return Err(Error::structural(format!(
                        "entry definition must take a single array<string> parameter: {}",
                        path
                    )));
                }
                if super::binding_default(param).is_some() {
                    return Err(Error::structural(format!(
                        "entry parameter does not allow a default value: {}",
                        path
                    )));
                }
                Ok(())
            }
            _ => Err(Error::structural(format!(
                "entry definition must take a single array<string> parameter: {}",
                path
            ))),
        }
    }

    fn check_definition(&mut self, def: &'a Definition) -> Result<()> {
        let path = def.full_path.as_str();
        tracing::trace!(definition = path, "checking definition");
        let defaults = if path == self.entry_path {
            self.entry_default_effects.clone()
        } else {
            self.default_effects.clone()
        };
        let effects = effects::resolve_active_effects(&def.transforms, &defaults, path)?;
        let returns = self.return_info(def)?;
        let ctx = Context {
            def_path: path.to_string(),
            effects,
            returns,
            templates: def.template_args.clone(),
        };

        if def.is_struct() {
            let mut env = Env::new();
            for field in super::struct_fields(def)? {
                self.check_binding(field, &mut env, &ctx)?;
            }
            return Ok(());
        }
        let mut env = Env::new();
        for param in &def.parameters {
            let name = binding_name(param).ok_or_else(|| {
                Error::structural(format!("parameters must be bindings: {}", path))
            })?;
            if env.contains_key(name) {
                return Err(Error::structural(format!("duplicate parameter: {}", name)));
            }
            self.check_binding(param, &mut env, &ctx)?;
        }

        let body = def.body();
        self.check_statements(&body, &mut env, &ctx)?;

        if !ctx.returns.returns_void && !returns::block_always_returns(&body) {
            if returns::contains_return(&body) {
                return Err(Error::structural(format!(
                    "not all control paths return in {}",
                    path
                )));
            }
            return Err(Error::structural(format!("missing return statement in {}", path)));
        }
        Ok(())
    }

    fn check_execution(&mut self, exec: &Execution) -> Result<()> {
        let path = exec.full_path.as_str();
        let target = self
            .scope
            .resolve_call(path, "/")
            .ok_or_else(|| Error::structural(format!("unknown execution target: {}", path)))?;
        let effects = effects::resolve_active_effects(&exec.transforms, &self.default_effects, path)?;
        let ctx = Context {
            def_path: path.to_string(),
            effects,
            returns: ReturnInfo::void(),
            templates: Vec::new(),
        };
        let params = call_parameters(target)?;
        order_call_arguments(&target.full_path, &params, &exec.arguments, &exec.argument_names)?;

        let mut env = Env::new();
        for arg in &exec.arguments {
            self.check_expr(arg, &mut env, &ctx)?;
        }
        self.check_statements(&exec.body, &mut env, &ctx)?;
        Ok(())
    }

    // =========================================================================
    // RETURN INFO
    // =========================================================================

    fn return_info(&mut self, def: &'a Definition) -> Result<ReturnInfo> {
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
            // Cyclic inference; the recursion itself is rejected by the lowerer.
            return Ok(ReturnInfo::value(ValueKind::Unknown));
        }
        let mut env = Env::new();
        for param in &def.parameters {
            if let Some(name) = binding_name(param) {
                let binding = match templated_binding_type(&param.transforms, &self.scope, &def.template_args) {
                    Ok(Some(ty)) => Binding::of_type(ty, is_mutable(&param.transforms)),
                    _ => self.infer_binding(param, &env, &def.full_path),
                };
                env.insert(name.to_string(), binding);
            }
        }
        let kind = self
            .infer_return_kind(&body, &mut env, &def.full_path)
            .unwrap_or(ValueKind::Unknown);
        self.inferring.remove(&def.full_path);
        let info = ReturnInfo::value(kind);
        self.return_cache.insert(def.full_path.clone(), info);
        Ok(info)
    }

    fn infer_return_kind(&mut self, stmts: &[Expr], env: &mut Env, from: &str) -> Option<ValueKind> {
        for stmt in stmts {
            let ExprKind::Call(call) = &stmt.kind else {
                continue;
            };
            if call.is_binding {
                let binding = self.infer_binding(stmt, env, from);
                env.insert(call.name.clone(), binding);
                continue;
            }
            if call.name == "return" {
                if let Some(value) = call.args.first() {
                    return Some(self.infer_operand(value, env, from).value_kind());
                }
                continue;
            }
            for arg in &call.args {
                if let Some(body) = arg.as_call().and_then(|c| c.body.as_ref()) {
                    let mut inner = env.clone();
                    if let Some(kind) = self.infer_return_kind(body, &mut inner, from) {
                        return Some(kind);
                    }
                }
            }
            if let Some(body) = &call.body {
                let mut inner = env.clone();
                if let Some(kind) = self.infer_return_kind(body, &mut inner, from) {
                    return Some(kind);
                }
            }
        }
        None
    }

    fn infer_binding(&mut self, expr: &Expr, env: &Env, from: &str) -> Binding {
        let mutable = is_mutable(&expr.transforms);
        if let Ok(Some(ty)) = binding_type(&expr.transforms, &self.scope) {
            return Binding::of_type(ty, mutable);
        }
        let init = super::binding_default(expr);
        if let Some(ty) = init.and_then(|e| Self::collection_in(e, env, &[]).ok().flatten()) {
            return Binding::of_type(ty, mutable);
        }
        let operand = init
            .map(|e| self.infer_operand(e, env, from))
            .unwrap_or(value(ValueKind::Unknown));
        Binding {
            kind: if operand.is_pointer() {
                BindingKind::Pointer
            } else {
                BindingKind::Value
            },
            value_kind: match operand {
                OperandKind::Value(k) | OperandKind::Pointer(k) => k,
            },
            key_kind: ValueKind::Unknown,
            mutable,
            struct_path: init.and_then(|e| self.struct_constructed_by(e, from)),
        }
    }

    /// Collection type of a collection binding or literal
    fn collection_in(expr: &Expr, env: &Env, templates: &[String]) -> Result<Option<TypeDescriptor>> {
        match &expr.kind {
            ExprKind::Name(name) => Ok(env
                .get(name)
                .filter(|b| b.kind.is_collection())
                .map(Binding::descriptor)),
            ExprKind::Call(call) => collection_literal_type(call, templates),
            ExprKind::Literal(_) => Ok(None),
        }
    }

    /// Element kind read by `at` on `target`: collection elements, string bytes as i32
    fn indexed_kind(target: &Expr, env: &Env) -> Option<ValueKind> {
        if let Ok(Some(ty)) = Self::collection_in(target, env, &[]) {
            return Some(ty.value_kind);
        }
        let is_string = match &target.kind {
            ExprKind::Name(name) => env
                .get(name)
                .is_some_and(|b| b.kind == BindingKind::Value && b.value_kind == ValueKind::String),
            ExprKind::Literal(lit) => ValueKind::of_literal(lit) == ValueKind::String,
            ExprKind::Call(_) => false,
        };
        is_string.then_some(ValueKind::Int32)
    }

    /// Side-effect-free kind inference used for return-type inference
    fn infer_operand(&mut self, expr: &Expr, env: &Env, from: &str) -> OperandKind {
        match &expr.kind {
            ExprKind::Literal(lit) => value(ValueKind::of_literal(lit)),
            ExprKind::Name(name) => env
                .get(name)
                .map(Binding::operand)
                .unwrap_or(value(ValueKind::Unknown)),
            ExprKind::Call(call) => {
                if call.is_binding {
                    return value(ValueKind::Unknown);
                }
                if !call.is_method_call {
                    if let Some(info) = builtins::lookup(&call.name) {
                        return self.infer_builtin(call, info.class, env, from);
                    }
                }
                match self.resolve_callee(call, env, from) {
                    Some(def) if def.is_struct() => value(ValueKind::Int32),
                    Some(def) => self
                        .return_info(def)
                        .map(|info| value(info.kind))
                        .unwrap_or(value(ValueKind::Unknown)),
                    None => value(ValueKind::Unknown),
                }
            }
        }
    }

    fn infer_builtin(&mut self, call: &Call, class: BuiltinClass, env: &Env, from: &str) -> OperandKind {
        let operands: Vec<OperandKind> = match class {
            BuiltinClass::Arithmetic | BuiltinClass::Negate | BuiltinClass::Math => call
                .args
                .iter()
                .map(|a| self.infer_operand(a, env, from))
                .collect(),
            _ => Vec::new(),
        };
        match class {
            BuiltinClass::Arithmetic => match (operands.first(), operands.get(1), ArithmeticOp::from_name(&call.name)) {
                (Some(l), Some(r), Some(op)) => numeric::resolve_arithmetic(op, *l, *r)
                    .map(|r| r.result())
                    .unwrap_or(value(ValueKind::Unknown)),
                _ => value(ValueKind::Unknown),
            },
            BuiltinClass::Negate | BuiltinClass::Math => numeric::resolve_math_builtin(&call.name, &operands)
                .map(|w| value(w.value_kind()))
                .unwrap_or(value(ValueKind::Unknown)),
            BuiltinClass::Comparison | BuiltinClass::Boolean | BuiltinClass::Not => value(ValueKind::Bool),
            BuiltinClass::Convert => value(
                call.template_args
                    .first()
                    .and_then(|t| ValueKind::from_type_name(t))
                    .unwrap_or(ValueKind::Unknown),
            ),
            BuiltinClass::Location => match call.args.first().map(|a| &a.kind) {
                Some(ExprKind::Name(name)) => OperandKind::Pointer(
                    env.get(name).map(|b| b.value_kind).unwrap_or(ValueKind::Unknown),
                ),
                _ => OperandKind::Pointer(ValueKind::Unknown),
            },
            BuiltinClass::Dereference => match call.args.first() {
                Some(arg) => match self.infer_operand(arg, env, from) {
                    OperandKind::Pointer(k) | OperandKind::Value(k) => value(k),
                },
                None => value(ValueKind::Unknown),
            },
            BuiltinClass::Assign | BuiltinClass::Step => match call.args.first() {
                Some(target) => value(self.infer_operand(target, env, from).value_kind()),
                None => value(ValueKind::Unknown),
            },
            BuiltinClass::Count => value(ValueKind::Int32),
            BuiltinClass::Index => value(
                call.args
                    .first()
                    .and_then(|t| Self::indexed_kind(t, env))
                    .unwrap_or(ValueKind::Unknown),
            ),
            BuiltinClass::If => match call.args.get(1).and_then(|a| a.as_call()).and_then(|c| c.body.as_ref()) {
                Some(body) => self.infer_block_value(body, env, from),
                None => value(ValueKind::Unknown),
            },
            BuiltinClass::Block => match &call.body {
                Some(body) => self.infer_block_value(body, env, from),
                None => value(ValueKind::Unknown),
            },
            _ => value(ValueKind::Unknown),
        }
    }

    fn infer_block_value(&mut self, body: &[Expr], env: &Env, from: &str) -> OperandKind {
        let mut inner = env.clone();
        let Some((last, init)) = body.split_last() else {
            return value(ValueKind::Unknown);
        };
        for stmt in init {
            if let Some(name) = binding_name(stmt) {
                let binding = self.infer_binding(stmt, &inner, from);
                inner.insert(name.to_string(), binding);
            }
        }
        self.infer_operand(last, &inner, from)
    }

    // =========================================================================
    // CALL RESOLUTION
    // =========================================================================

    fn method_base(&self, receiver: &Expr, env: &Env, receiver_kind: ValueKind) -> Option<String> {
        if let ExprKind::Name(name) = &receiver.kind {
            if let Some(path) = env.get(name).and_then(|b| b.struct_path.clone()) {
                return Some(path);
            }
        }
        match receiver_kind {
            ValueKind::Unknown => None,
            kind => Some(format!("/{}", kind.type_name())),
        }
    }

    fn resolve_callee(&mut self, call: &Call, env: &Env, from: &str) -> Option<&'a Definition> {
        if call.is_method_call {
            let receiver = call.args.first()?;
            let kind = self.infer_operand(receiver, env, from).value_kind();
            let base = self.method_base(receiver, env, kind)?;
            return self.scope.get(&format!("{}/{}", base, call.name));
        }
        self.scope.resolve_call(&call.name, from)
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

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn check_statements(&mut self, stmts: &[Expr], env: &mut Env, ctx: &Context) -> Result<()> {
        for stmt in stmts {
            self.check_statement(stmt, env, ctx)?;
        }
        Ok(())
    }

    fn nested_context(&self, expr: &Expr, ctx: &Context) -> Result<Option<Context>> {
        if !expr.has_transform("effects") {
            return Ok(None);
        }
        let label = match &expr.kind {
            ExprKind::Call(call) => call.name.clone(),
            _ => ctx.def_path.clone(),
        };
        let effects = effects::resolve_nested_effects(&expr.transforms, &ctx.effects, &label)?;
        Ok(Some(Context {
            effects,
            ..ctx.clone()
        }))
    }

    fn check_statement(&mut self, stmt: &Expr, env: &mut Env, ctx: &Context) -> Result<()> {
        let nested = self.nested_context(stmt, ctx)?;
        let ctx = nested.as_ref().unwrap_or(ctx);
        if stmt.is_binding() {
            return self.check_binding(stmt, env, ctx);
        }

        let ExprKind::Call(call) = &stmt.kind else {
            self.check_expr(stmt, env, ctx)?;
            return Ok(());
        };
        if !call.is_method_call {
            if let Some(info) = builtins::lookup(&call.name) {
                self.check_builtin_shape(call, info)?;
                effects::require_effect(&call.name, &ctx.effects)?;
                match info.class {
                    BuiltinClass::Return => return self.check_return(call, env, ctx),
                    BuiltinClass::If => {
                        self.check_if(call, env, ctx, false)?;
                        return Ok(());
                    }
                    BuiltinClass::Repeat | BuiltinClass::Loop => return self.check_repeat(call, env, ctx),
                    BuiltinClass::While => return self.check_while(call, env, ctx),
                    BuiltinClass::For => return self.check_for(call, env, ctx),
                    BuiltinClass::Block => {
                        let mut inner = env.clone();
                        return self.check_statements(call.body.as_deref().unwrap_or(&[]), &mut inner, ctx);
                    }
                    BuiltinClass::Print => return self.check_print(call, env, ctx),
                    BuiltinClass::Heap | BuiltinClass::Pathspace => {
                        for arg in &call.args {
                            self.check_expr(arg, env, ctx)?;
                        }
                        return Ok(());
                    }
                    _ => {
                        self.check_expr(stmt, env, ctx)?;
                        return Ok(());
                    }
                }
            }
        }
        self.check_user_call(call, env, ctx, false)?;
        Ok(())
    }

    fn check_binding(&mut self, stmt: &Expr, env: &mut Env, ctx: &Context) -> Result<()> {
        let Some(call) = stmt.as_call() else {
            return Ok(());
        };
        let name = call.name.as_str();
        if env.contains_key(name) {
            return Err(Error::structural(format!("duplicate binding name: {}", name)));
        }
        let explicit = templated_binding_type(&stmt.transforms, &self.scope, &ctx.templates)?;
        let init = call.args.first();
        let init_kind = match init {
            Some(init) => Some(self.check_expr(init, env, ctx)?),
            None => None,
        };
        let init_collection = match init {
            Some(init) => Self::collection_in(init, env, &ctx.templates)?,
            None => None,
        };
        let mutable = is_mutable(&stmt.transforms);
        let binding = match (explicit, init_kind, init_collection) {
            (Some(ty), init, collection) => {
                if let Some(init) = init {
                    let ok = match ty.kind {
                        BindingKind::Pointer | BindingKind::Reference => init.is_pointer(),
                        BindingKind::Value => {
                            !init.is_pointer() && kinds_compatible(ty.value_kind, init.value_kind())
                        }
                        BindingKind::Map | BindingKind::Array | BindingKind::Vector => {
                            collection_matches(&ty, collection.as_ref(), init)
                        }
                    };
                    if !ok {
                        return Err(Error::type_error(format!(
                            "binding initializer type mismatch: {}",
                            name
                        )));
                    }
                }
                Binding::of_type(ty, mutable)
            }
            (None, Some(_), Some(collection)) => Binding::of_type(collection, mutable),
            (None, Some(init), None) => Binding {
                kind: if init.is_pointer() {
                    BindingKind::Pointer
                } else {
                    BindingKind::Value
                },
                value_kind: match init {
                    OperandKind::Value(k) | OperandKind::Pointer(k) => k,
                },
                key_kind: ValueKind::Unknown,
                mutable,
                struct_path: call
                    .args
                    .first()
                    .and_then(|e| self.struct_constructed_by(e, &ctx.def_path)),
            },
            (None, None, _) => {
                return Err(Error::type_error(format!(
                    "binding requires a type or initializer: {}",
                    name
                )))
            }
        };
        env.insert(name.to_string(), binding);
        Ok(())
    }

    fn check_return(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<()> {
        match call.args.first() {
            Some(value_expr) => {
                if ctx.returns.returns_void {
                    return Err(Error::type_error("return value not allowed for void definition"));
                }
                let kind = self.check_expr(value_expr, env, ctx)?;
                if kind.is_pointer() || !kinds_compatible(ctx.returns.kind, kind.value_kind()) {
                    return Err(Error::type_error(format!("return type mismatch in {}", ctx.def_path)));
                }
                Ok(())
            }
            None if !ctx.returns.returns_void => {
                Err(Error::type_error("return requires exactly one argument"))
            }
            None => Ok(()),
        }
    }

    /// `repeat` takes an integer or bool count, `loop` an integer one
    fn check_repeat(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<()> {
        let count = self.check_expr(&call.args[0], env, ctx)?;
        let kind = count.value_kind();
        let bool_ok = call.name == "repeat" && kind == ValueKind::Bool;
        if count.is_pointer() || !(kind.is_integer() || bool_ok || kind == ValueKind::Unknown) {
            let message = if call.name == "repeat" {
                "repeat count requires integer or bool"
            } else {
                "loop count requires integer"
            };
            return Err(Error::type_error(message));
        }
        let body = call
            .body
            .as_deref()
            .ok_or_else(|| Error::call_shape(format!("{} requires a block", call.name)))?;
        let mut inner = env.clone();
        self.check_statements(body, &mut inner, ctx)
    }

    fn check_while(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<()> {
        let cond = self.check_expr(&call.args[0], env, ctx)?;
        if !is_bool_condition(cond) {
            return Err(Error::type_error("while condition requires bool"));
        }
        let mut inner = env.clone();
        self.check_statements(call.body.as_deref().unwrap_or(&[]), &mut inner, ctx)
    }

    /// `for(init, cond, step)`; `init` and a binding `cond` scope over the loop
    fn check_for(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<()> {
        let mut scope = env.clone();
        self.check_statement(&call.args[0], &mut scope, ctx)?;
        let cond = &call.args[1];
        let cond_kind = if cond.is_binding() {
            self.check_binding(cond, &mut scope, ctx)?;
            binding_name(cond)
                .and_then(|n| scope.get(n))
                .map(Binding::operand)
                .unwrap_or(value(ValueKind::Unknown))
        } else {
            self.check_expr(cond, &mut scope, ctx)?
        };
        if !is_bool_condition(cond_kind) {
            return Err(Error::type_error("for condition requires bool"));
        }
        let mut inner = scope.clone();
        self.check_statements(call.body.as_deref().unwrap_or(&[]), &mut inner, ctx)?;
        self.check_statement(&call.args[2], &mut scope, ctx)
    }

    fn check_print(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<()> {
        let kind = self.check_expr(&call.args[0], env, ctx)?;
        if kind.is_pointer() {
            return Err(Error::type_error(format!("{} does not support pointer values", call.name)));
        }
        Ok(())
    }

    fn check_if(&mut self, call: &Call, env: &mut Env, ctx: &Context, require_value: bool) -> Result<OperandKind> {
        let cond = self.check_expr(&call.args[0], env, ctx)?;
        if !is_bool_condition(cond) {
            return Err(Error::type_error("if condition requires bool"));
        }
        let mut branch_bodies = Vec::with_capacity(2);
        for branch in &call.args[1..] {
            if !returns::is_block_envelope(branch) {
                return Err(Error::call_shape("if branches require block envelopes"));
            }
            let body = branch.as_call().and_then(|c| c.body.as_deref()).unwrap_or(&[]);
            branch_bodies.push(body);
        }
        if !require_value {
            for body in branch_bodies {
                let mut inner = env.clone();
                self.check_statements(body, &mut inner, ctx)?;
            }
            return Ok(value(ValueKind::Unknown));
        }
        let then_kind = self.check_block_value(branch_bodies[0], env, ctx)?;
        let else_kind = self.check_block_value(branch_bodies[1], env, ctx)?;
        self.merge_branch_kinds(then_kind, else_kind)
    }

    fn merge_branch_kinds(&self, a: OperandKind, b: OperandKind) -> Result<OperandKind> {
        let mismatch = || Error::type_error("if expression branches must produce compatible values");
        match (a.value_kind(), b.value_kind()) {
            (ValueKind::Unknown, _) => Ok(b),
            (_, ValueKind::Unknown) => Ok(a),
            (x, y) if x == y && a.is_pointer() == b.is_pointer() => Ok(a),
            (x, y) if x.is_numeric() && y.is_numeric() && !a.is_pointer() && !b.is_pointer() => {
                numeric::resolve_arithmetic(ArithmeticOp::Plus, a, b)
                    .map(|r| r.result())
                    .map_err(|_| mismatch())
            }
            _ => Err(mismatch()),
        }
    }

    fn check_block_value(&mut self, body: &[Expr], env: &Env, ctx: &Context) -> Result<OperandKind> {
        let mut inner = env.clone();
        let (last, init) = body
            .split_last()
            .ok_or_else(|| Error::type_error("block expression requires a value"))?;
        self.check_statements(init, &mut inner, ctx)?;
        if last.is_binding() {
            return Err(Error::type_error("block expression requires a value"));
        }
        if last.is_call_to("return") {
            self.check_statement(last, &mut inner, ctx)?;
            return Ok(value(ValueKind::Unknown));
        }
        if let Some(call) = last.as_call() {
            if let Some(info) = builtins::lookup(&call.name).filter(|_| !call.is_method_call) {
                if info.class.is_statement() {
                    return Err(Error::type_error("block expression requires a value"));
                }
            } else if self.user_call_is_void(call, &inner, &ctx.def_path) {
                return Err(Error::type_error("block expression requires a value"));
            }
        }
        self.check_expr(last, &mut inner, ctx)
    }

    fn user_call_is_void(&mut self, call: &Call, env: &Env, from: &str) -> bool {
        match self.resolve_callee(call, env, from) {
            Some(def) if !def.is_struct() => self.return_info(def).map(|i| i.returns_void).unwrap_or(false),
            _ => false,
        }
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn check_builtin_shape(&self, call: &Call, info: &builtins::BuiltinInfo) -> Result<()> {
        if call.has_named_args() {
            return Err(Error::call_shape("named arguments not supported for builtin calls"));
        }
        if info.class == BuiltinClass::Block && !call.args.is_empty() {
            return Err(Error::call_shape("block does not accept arguments"));
        }
        builtins::check_arity(&call.name, info, call.args.len())?;
        if info.class.takes_body() {
            if call.body.is_none() {
                return Err(Error::call_shape(format!("{} requires a block", call.name)));
            }
        } else if call.body.is_some() {
            return Err(Error::call_shape(format!(
                "block arguments are only supported on control-flow builtins: {}",
                call.name
            )));
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &Expr, env: &mut Env, ctx: &Context) -> Result<OperandKind> {
        let nested = self.nested_context(expr, ctx)?;
        let ctx = nested.as_ref().unwrap_or(ctx);
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(value(ValueKind::of_literal(lit))),
            ExprKind::Name(name) => env
                .get(name)
                .map(Binding::operand)
                .ok_or_else(|| Error::type_error(format!("unknown identifier: {}", name))),
            ExprKind::Call(call) => {
                if call.is_binding {
                    return Err(Error::structural(format!(
                        "binding not allowed in expression context: {}",
                        call.name
                    )));
                }
                if !call.is_method_call {
                    if let Some(info) = builtins::lookup(&call.name) {
                        self.check_builtin_shape(call, info)?;
                        effects::require_effect(&call.name, &ctx.effects)?;
                        return self.check_builtin(call, info.class, env, ctx);
                    }
                }
                self.check_user_call(call, env, ctx, true)
            }
        }
    }

    fn check_operands(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<Vec<OperandKind>> {
        call.args.iter().map(|a| self.check_expr(a, env, ctx)).collect()
    }

    fn check_builtin(&mut self, call: &Call, class: BuiltinClass, env: &mut Env, ctx: &Context) -> Result<OperandKind> {
        match class {
            BuiltinClass::Arithmetic => {
                let ops = self.check_operands(call, env, ctx)?;
                if any_unknown(&ops) {
                    return Ok(value(ValueKind::Unknown));
                }
                let op = ArithmeticOp::from_name(&call.name)
                    .ok_or_else(|| Error::type_error(format!("unknown arithmetic operator: {}", call.name)))?;
                Ok(numeric::resolve_arithmetic(op, ops[0], ops[1])?.result())
            }
            BuiltinClass::Negate => {
                let ops = self.check_operands(call, env, ctx)?;
                if any_unknown(&ops) {
                    return Ok(value(ValueKind::Unknown));
                }
                Ok(value(numeric::resolve_negate(ops[0])?.value_kind()))
            }
            BuiltinClass::Comparison => {
                let ops = self.check_operands(call, env, ctx)?;
                if !any_unknown(&ops) {
                    numeric::resolve_comparison(ops[0], ops[1])?;
                }
                Ok(value(ValueKind::Bool))
            }
            BuiltinClass::Boolean | BuiltinClass::Not => {
                for op in self.check_operands(call, env, ctx)? {
                    if op != value(ValueKind::Bool) && op != value(ValueKind::Unknown) {
                        return Err(Error::type_error("boolean operators require bool operands"));
                    }
                }
                Ok(value(ValueKind::Bool))
            }
            BuiltinClass::Math => {
                let ops = self.check_operands(call, env, ctx)?;
                if any_unknown(&ops) {
                    return Ok(value(ValueKind::Unknown));
                }
                Ok(value(numeric::resolve_math_builtin(&call.name, &ops)?.value_kind()))
            }
            BuiltinClass::Convert => {
                let target = call
                    .template_args
                    .first()
                    .ok_or_else(|| Error::type_error("convert requires a template argument"))?;
                check_software_numeric(target)?;
                let kind = ValueKind::from_type_name(target)
                    .filter(|k| *k != ValueKind::String)
                    .ok_or_else(|| Error::type_error(format!("unsupported convert target: {}", target)))?;
                let operand = self.check_expr(&call.args[0], env, ctx)?;
                let source = operand.value_kind();
                if operand.is_pointer() || !(source.is_numeric() || source == ValueKind::Bool || source == ValueKind::Unknown) {
                    return Err(Error::type_error("convert requires numeric or bool operand"));
                }
                Ok(value(kind))
            }
            BuiltinClass::Location => match &call.args[0].kind {
                ExprKind::Name(name) => {
                    let binding = env
                        .get(name)
                        .ok_or_else(|| Error::type_error(format!("unknown identifier: {}", name)))?;
                    Ok(OperandKind::Pointer(binding.value_kind))
                }
                _ => Err(Error::type_error("location requires a local binding")),
            },
            BuiltinClass::Dereference => {
                if let ExprKind::Name(name) = &call.args[0].kind {
                    if let Some(b) = env.get(name).filter(|b| b.kind == BindingKind::Reference) {
                        return Ok(value(b.value_kind));
                    }
                }
                match self.check_expr(&call.args[0], env, ctx)? {
                    OperandKind::Pointer(kind) => Ok(value(kind)),
                    OperandKind::Value(_) => Err(Error::type_error("dereference requires a pointer or reference")),
                }
            }
            BuiltinClass::Assign => self.check_assign(call, env, ctx),
            BuiltinClass::Step => self.check_step(call, env, ctx),
            BuiltinClass::If => self.check_if(call, env, ctx, true),
            BuiltinClass::Block => self.check_block_value(call.body.as_deref().unwrap_or(&[]), env, ctx),
            BuiltinClass::Return
            | BuiltinClass::Repeat
            | BuiltinClass::Loop
            | BuiltinClass::While
            | BuiltinClass::For
            | BuiltinClass::Print
            | BuiltinClass::Pathspace => Err(Error::type_error(format!("{} does not produce a value", call.name))),
            BuiltinClass::Count => {
                let target = &call.args[0];
                let kind = self.check_expr(target, env, ctx)?;
                let counted = Self::collection_in(target, env, &ctx.templates)?.is_some()
                    || kind == value(ValueKind::String);
                if !counted {
                    return Err(Error::type_error(format!("{} requires an array argument", call.name)));
                }
                Ok(value(ValueKind::Int32))
            }
            BuiltinClass::Index => self.check_index(call, env, ctx),
            BuiltinClass::Collection => self.check_collection_literal(call, env, ctx),
            BuiltinClass::Heap => {
                self.check_operands(call, env, ctx)?;
                Ok(value(ValueKind::Unknown))
            }
        }
    }

    /// `at`/`at_unsafe` on an array, vector, map or string
    fn check_index(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<OperandKind> {
        let target = &call.args[0];
        let target_kind = self.check_expr(target, env, ctx)?;
        let collection = Self::collection_in(target, env, &ctx.templates)?;
        let position = self.check_expr(&call.args[1], env, ctx)?;
        if let Some(map) = collection.as_ref().filter(|ty| ty.kind == BindingKind::Map) {
            if position.is_pointer() || !kinds_compatible(map.key_kind, position.value_kind()) {
                return Err(Error::type_error(format!("{} key type mismatch", call.name)));
            }
            return Ok(value(map.value_kind));
        }
        let element = match collection {
            Some(ty) => ty.value_kind,
            None if target_kind == value(ValueKind::String) => ValueKind::Int32,
            None => return Err(Error::type_error(format!("{} requires an array argument", call.name))),
        };
        if position.is_pointer() || !(position.value_kind().is_integer() || position.value_kind() == ValueKind::Unknown) {
            return Err(Error::type_error(format!("{} index requires an integer", call.name)));
        }
        Ok(value(element))
    }

    /// `array<T>(...)`, `vector<T>(...)`, `map<K, V>(k, v, ...)`
    fn check_collection_literal(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<OperandKind> {
        let ty = collection_literal_type(call, &ctx.templates)?
            .ok_or_else(|| Error::type_error(format!("unknown collection literal: {}", call.name)))?;
        let is_map = ty.kind == BindingKind::Map;
        if is_map && call.args.len() % 2 != 0 {
            return Err(Error::call_shape("map literal requires an even number of arguments"));
        }
        for (i, arg) in call.args.iter().enumerate() {
            let kind = self.check_expr(arg, env, ctx)?;
            let (expected, role) = match (is_map, i % 2) {
                (true, 0) => (ty.key_kind, "key"),
                (true, _) => (ty.value_kind, "value"),
                (false, _) => (ty.value_kind, "element"),
            };
            if kind.is_pointer() || !kinds_compatible(expected, kind.value_kind()) {
                return Err(Error::type_error(format!("{} literal {} type mismatch", call.name, role)));
            }
        }
        Ok(value(ValueKind::Unknown))
    }

    /// `increment`/`decrement` of a mutable numeric binding or dereference
    fn check_step(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<OperandKind> {
        let target = &call.args[0];
        let kind = match &target.kind {
            ExprKind::Name(name) => {
                let binding = env.get(name).ok_or_else(|| {
                    Error::type_error(format!("{} target must be a known binding: {}", call.name, name))
                })?;
                if !binding.mutable {
                    return Err(Error::type_error(format!("{} target must be mutable: {}", call.name, name)));
                }
                if !matches!(binding.kind, BindingKind::Value | BindingKind::Reference) {
                    return Err(Error::type_error(format!("{} target must be a mutable binding", call.name)));
                }
                binding.value_kind
            }
            ExprKind::Call(_) if target.is_call_to("dereference") => self.check_expr(target, env, ctx)?.value_kind(),
            _ => {
                return Err(Error::type_error(format!(
                    "{} target must be a binding or dereference",
                    call.name
                )))
            }
        };
        if !(kind.is_numeric() || kind == ValueKind::Unknown) {
            return Err(Error::type_error(format!("{} requires numeric operand", call.name)));
        }
        Ok(value(kind))
    }

    fn check_assign(&mut self, call: &Call, env: &mut Env, ctx: &Context) -> Result<OperandKind> {
        let target = &call.args[0];
        let target_kind = match &target.kind {
            ExprKind::Name(name) => {
                let binding = env.get(name).ok_or_else(|| {
                    Error::type_error(format!("assign target must be a known binding: {}", name))
                })?;
                if !binding.mutable {
                    return Err(Error::type_error(format!("assign target must be mutable: {}", name)));
                }
                binding.operand()
            }
            ExprKind::Call(inner) if target.is_call_to("dereference") && inner.args.len() == 1 => {
                self.check_expr(target, env, ctx)?
            }
            _ => return Err(Error::type_error("assign target must be a binding or dereference")),
        };
        let assigned = self.check_expr(&call.args[1], env, ctx)?;
        let ok = if target_kind.is_pointer() {
            assigned.is_pointer()
        } else {
            !assigned.is_pointer() && kinds_compatible(target_kind.value_kind(), assigned.value_kind())
        };
        if !ok {
            return Err(Error::type_error("assign value type mismatch"));
        }
        Ok(target_kind)
    }

    fn check_user_call(&mut self, call: &Call, env: &mut Env, ctx: &Context, require_value: bool) -> Result<OperandKind> {
        let callee = self.resolve_callee(call, env, &ctx.def_path).ok_or_else(|| {
            Error::structural(format!("unknown call target: {}", call.name))
        })?;
        if call.body.is_some() {
            return Err(Error::call_shape(format!(
                "block arguments are only supported on control-flow builtins: {}",
                callee.full_path
            )));
        }
        let params = call_parameters(callee)?;
        let ordered = order_call_arguments(&callee.full_path, &params, &call.args, &call.arg_names)?;

        let mut arg_kinds = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            arg_kinds.push(self.check_expr(arg, env, ctx)?);
        }
        for (param, arg) in params.iter().zip(&ordered) {
            // Defaults were checked with the callee's parameters.
            let Some(actual) = call
                .args
                .iter()
                .position(|a| std::ptr::eq(a, *arg))
                .map(|i| arg_kinds[i])
            else {
                continue;
            };
            let Some(ty) = templated_binding_type(&param.transforms, &self.scope, &callee.template_args)? else {
                continue;
            };
            let ok = match ty.kind {
                BindingKind::Pointer | BindingKind::Reference => actual.is_pointer(),
                BindingKind::Value => !actual.is_pointer() && kinds_compatible(ty.value_kind, actual.value_kind()),
                BindingKind::Map | BindingKind::Array | BindingKind::Vector => {
                    let collection = Self::collection_in(arg, env, &ctx.templates)?;
                    collection_matches(&ty, collection.as_ref(), actual)
                }
            };
            if !ok {
                return Err(Error::type_error(format!(
                    "argument type mismatch for {} parameter {}",
                    callee.full_path,
                    binding_name(param).unwrap_or("?")
                )));
            }
        }

        if callee.is_struct() {
            return Ok(value(ValueKind::Int32));
        }
        let info = self.return_info(callee)?;
        if info.returns_void {
            if require_value {
                return Err(Error::type_error(format!(
                    "void call not allowed in expression context: {}",
                    callee.full_path
                )));
            }
            return Ok(value(ValueKind::Unknown));
        }
        Ok(value(info.kind))
    }
}
