//! # Value Kinds and Binding Types
//!
//! The language has a small closed set of scalar kinds plus a handful of
//! binding shapes. Types arrive as transforms on bindings and definitions:
//!
//! ```text
//! [i32 mut] value{4i32}              Value, Int32, mutable
//! [Pointer<i32>] ptr{location(value)} Pointer to Int32
//! [Reference<i32> mut] r{location(v)} Reference to Int32
//! [array<string>] args                Array of String (entry arguments)
//! [vector<i32>] v{vector<i32>(1i32)}  Vector of Int32
//! [map<i32, i64>] table{...}          Map with key/value kinds
//! [Point] p{Point()}                  Struct-typed value
//! ```
//!
//! `int` and `float` are aliases for `i32` and `f32`. The arbitrary-precision
//! names `integer`, `decimal` and `complex` are rejected outright.

pub mod builtins;
pub mod checker;
pub mod effects;
pub mod numeric;
pub mod returns;
pub mod scope;

pub use checker::{validate, SemanticsValidator};
pub use effects::{Effect, EffectSet};
pub use numeric::{NumericWidth, OperandKind};
pub use scope::DefinitionScope;

use crate::parser::{Call, Definition, Expr, ExprKind, FloatWidth, IntWidth, Literal, Transform};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Scalar kind of a value on the operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Boolean (lowered as i32 0/1)
    Bool,
    /// String (table index or argv index)
    String,
    /// Not yet inferred
    Unknown,
}

impl ValueKind {
    /// Parse a scalar type name
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "int" | "i32" => Some(ValueKind::Int32),
            "i64" => Some(ValueKind::Int64),
            "u64" => Some(ValueKind::UInt64),
            "float" | "f32" => Some(ValueKind::Float32),
            "f64" => Some(ValueKind::Float64),
            "bool" => Some(ValueKind::Bool),
            "string" => Some(ValueKind::String),
            _ => None,
        }
    }

    /// Kind of a literal
    pub fn of_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Int { width: IntWidth::I32, .. } => ValueKind::Int32,
            Literal::Int { width: IntWidth::I64, .. } => ValueKind::Int64,
            Literal::UInt(_) => ValueKind::UInt64,
            Literal::Float { width: FloatWidth::F32, .. } => ValueKind::Float32,
            Literal::Float { width: FloatWidth::F64, .. } => ValueKind::Float64,
            Literal::Bool(_) => ValueKind::Bool,
            Literal::String(_) => ValueKind::String,
        }
    }

    /// Canonical type name, used for method-call paths
    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::Int32 => "i32",
            ValueKind::Int64 => "i64",
            ValueKind::UInt64 => "u64",
            ValueKind::Float32 => "f32",
            ValueKind::Float64 => "f64",
            ValueKind::Bool => "bool",
            ValueKind::String => "string",
            ValueKind::Unknown => "unknown",
        }
    }

    /// Int32, Int64 or UInt64
    pub fn is_integer(self) -> bool {
        matches!(self, ValueKind::Int32 | ValueKind::Int64 | ValueKind::UInt64)
    }

    /// Float32 or Float64
    pub fn is_float(self) -> bool {
        matches!(self, ValueKind::Float32 | ValueKind::Float64)
    }

    /// Integer or float
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Shape of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    /// Plain scalar or struct value
    Value,
    /// Raw address; arithmetic moves it
    Pointer,
    /// Address that reads and writes through transparently
    Reference,
    /// Map with key/value kinds
    Map,
    /// Fixed-length array; `array<string>` is the entry argument list
    Array,
    /// Growable array with a count and a capacity header
    Vector,
}

impl BindingKind {
    /// Array, vector or map
    pub fn is_collection(self) -> bool {
        matches!(self, BindingKind::Array | BindingKind::Vector | BindingKind::Map)
    }
}

/// Parsed binding type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Binding shape
    pub kind: BindingKind,
    /// Scalar kind, pointee kind, element kind or map value kind
    pub value_kind: ValueKind,
    /// Map key kind
    pub key_kind: ValueKind,
    /// Struct definition path for struct-typed bindings
    pub struct_path: Option<String>,
}

impl TypeDescriptor {
    /// Plain value of `kind`
    pub fn value(kind: ValueKind) -> Self {
        Self {
            kind: BindingKind::Value,
            value_kind: kind,
            key_kind: ValueKind::Unknown,
            struct_path: None,
        }
    }

    fn shaped(kind: BindingKind, value_kind: ValueKind) -> Self {
        Self {
            kind,
            value_kind,
            key_kind: ValueKind::Unknown,
            struct_path: None,
        }
    }
}

/// Arbitrary-precision numeric type names that are reserved but unimplemented
pub const SOFTWARE_NUMERIC_TYPES: &[&str] = &["integer", "decimal", "complex"];

/// Transforms that qualify a binding instead of naming its type
const QUALIFIER_TRANSFORMS: &[&str] = &["mut", "static", "public", "private", "package", "effects"];

/// Reject arbitrary-precision numeric type names
pub fn check_software_numeric(name: &str) -> Result<()> {
    if SOFTWARE_NUMERIC_TYPES.contains(&name) {
        return Err(Error::type_error(format!(
            "software numeric types are not supported yet: {}",
            name
        )));
    }
    Ok(())
}

fn scalar_argument(name: &str, templates: &[String]) -> Result<ValueKind> {
    if templates.iter().any(|t| t == name) {
        return Ok(ValueKind::Unknown);
    }
    check_software_numeric(name)?;
    ValueKind::from_type_name(name)
        .ok_or_else(|| Error::type_error(format!("unsupported binding type: {}", name)))
}

/// Parse a single type transform; struct names are resolved through `scope`
pub fn parse_type_transform(transform: &Transform, scope: &DefinitionScope) -> Result<TypeDescriptor> {
    parse_type(transform, scope, &[])
}

fn collection_type(name: &str, template: &[String], templates: &[String]) -> Result<TypeDescriptor> {
    match name {
        "map" => {
            if template.len() != 2 {
                return Err(Error::type_error("map requires key and value types"));
            }
            let mut desc = TypeDescriptor::shaped(BindingKind::Map, scalar_argument(&template[1], templates)?);
            desc.key_kind = scalar_argument(&template[0], templates)?;
            Ok(desc)
        }
        _ => {
            let element = template
                .first()
                .ok_or_else(|| Error::type_error(format!("{} requires a template argument", name)))?;
            let kind = if name == "array" {
                BindingKind::Array
            } else {
                BindingKind::Vector
            };
            Ok(TypeDescriptor::shaped(kind, scalar_argument(element, templates)?))
        }
    }
}

/// Type built by a collection literal such as `map<i32, i64>(1i32, 2i64)`
///
/// `None` when `call` is not an `array`, `vector` or `map` literal.
pub fn collection_literal_type(call: &Call, templates: &[String]) -> Result<Option<TypeDescriptor>> {
    if call.is_binding || call.is_method_call || !matches!(call.name.as_str(), "array" | "vector" | "map") {
        return Ok(None);
    }
    collection_type(&call.name, &call.template_args, templates).map(Some)
}

/// Like [`parse_type_transform`], reading the names in `templates` as `Unknown`
fn parse_type(transform: &Transform, scope: &DefinitionScope, templates: &[String]) -> Result<TypeDescriptor> {
    let name = transform.name.as_str();
    check_software_numeric(name)?;
    let template = &transform.template_args;
    match name {
        "Pointer" | "Reference" => {
            let target = template.first().ok_or_else(|| {
                Error::type_error(format!("{} requires a template argument", name))
            })?;
            let kind = if name == "Pointer" {
                BindingKind::Pointer
            } else {
                BindingKind::Reference
            };
            Ok(TypeDescriptor::shaped(kind, scalar_argument(target, templates)?))
        }
        "array" | "vector" | "map" => collection_type(name, template, templates),
        _ if templates.iter().any(|t| t == name) => Ok(TypeDescriptor::value(ValueKind::Unknown)),
        _ => {
            if let Some(kind) = ValueKind::from_type_name(name) {
                return Ok(TypeDescriptor::value(kind));
            }
            if let Some(path) = scope.resolve_struct(name) {
                let mut desc = TypeDescriptor::value(ValueKind::Int32);
                desc.struct_path = Some(path);
                return Ok(desc);
            }
            Err(Error::type_error(format!("unsupported binding type: {}", transform)))
        }
    }
}

/// Explicit type of a binding, if one of its transforms names a type
pub fn binding_type(transforms: &[Transform], scope: &DefinitionScope) -> Result<Option<TypeDescriptor>> {
    templated_binding_type(transforms, scope, &[])
}

/// Explicit type of a binding inside a definition templated on `templates`
pub fn templated_binding_type(
    transforms: &[Transform],
    scope: &DefinitionScope,
    templates: &[String],
) -> Result<Option<TypeDescriptor>> {
    match transforms
        .iter()
        .find(|t| !QUALIFIER_TRANSFORMS.contains(&t.name.as_str()))
    {
        Some(t) => parse_type(t, scope, templates).map(Some),
        None => Ok(None),
    }
}

/// Whether a binding carries the `mut` qualifier
pub fn is_mutable(transforms: &[Transform]) -> bool {
    transforms.iter().any(|t| t.name == "mut")
}

/// Whether a binding carries the `static` qualifier
pub fn is_static(transforms: &[Transform]) -> bool {
    transforms.iter().any(|t| t.name == "static")
}

/// Per-definition return descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnInfo {
    /// No value is produced
    pub returns_void: bool,
    /// `return<array<T>>`
    pub returns_array: bool,
    /// Scalar kind of the returned value
    pub kind: ValueKind,
}

impl ReturnInfo {
    /// Void return
    pub fn void() -> Self {
        Self {
            returns_void: true,
            returns_array: false,
            kind: ValueKind::Unknown,
        }
    }

    /// Scalar return of `kind`
    pub fn value(kind: ValueKind) -> Self {
        Self {
            returns_void: false,
            returns_array: false,
            kind,
        }
    }
}

/// Return info declared by a `return<T>` transform; `None` when undeclared
pub fn declared_return(def: &Definition) -> Result<Option<ReturnInfo>> {
    let Some(transform) = def.transforms.iter().rev().find(|t| t.name == "return") else {
        return Ok(None);
    };
    let ty = transform.template_args.first().ok_or_else(|| {
        Error::type_error(format!("return transform requires a type on {}", def.full_path))
    })?;
    if ty == "void" {
        return Ok(Some(ReturnInfo::void()));
    }
    if def.template_args.iter().any(|t| t == ty) {
        return Ok(Some(ReturnInfo::value(ValueKind::Unknown)));
    }
    check_software_numeric(ty)?;
    if let Some(kind) = ValueKind::from_type_name(ty) {
        return Ok(Some(ReturnInfo::value(kind)));
    }
    let parsed = Transform::parse(ty);
    if parsed.name == "array" {
        if let Some(kind) = parsed
            .template_args
            .first()
            .and_then(|t| ValueKind::from_type_name(t))
        {
            return Ok(Some(ReturnInfo {
                returns_void: false,
                returns_array: true,
                kind,
            }));
        }
    }
    Err(Error::type_error(format!("unsupported return type on {}", def.full_path)))
}

/// Name of a parameter or field binding
pub fn binding_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Call(call) if call.is_binding => Some(call.name.as_str()),
        _ => None,
    }
}

/// Default value of a parameter or initializer of a field binding
pub fn binding_default(expr: &Expr) -> Option<&Expr> {
    match &expr.kind {
        ExprKind::Call(call) if call.is_binding => call.args.first(),
        _ => None,
    }
}

/// Non-static field bindings of a struct definition
pub fn struct_fields(def: &Definition) -> Result<Vec<&Expr>> {
    let mut fields = Vec::new();
    for stmt in &def.statements {
        if !stmt.is_binding() {
            return Err(Error::structural(format!(
                "struct definitions may only contain field bindings: {}",
                def.full_path
            )));
        }
        if !is_static(&stmt.transforms) {
            fields.push(stmt);
        }
    }
    Ok(fields)
}

/// Bindings that play the parameter role for a call to `def`
pub fn call_parameters(def: &Definition) -> Result<Vec<&Expr>> {
    if def.is_struct() {
        struct_fields(def)
    } else {
        Ok(def.parameters.iter().collect())
    }
}

/// Match call arguments to parameters
///
/// Arguments are consumed in order: a named argument fills the parameter of
/// that name, a positional one fills the next unfilled slot. Slots left open
/// take the parameter's default value.
pub fn order_call_arguments<'e>(
    callee: &str,
    params: &[&'e Expr],
    args: &'e [Expr],
    arg_names: &[Option<String>],
) -> Result<Vec<&'e Expr>> {
    let mut seen_names = HashSet::new();
    for name in arg_names.iter().flatten() {
        if !seen_names.insert(name.as_str()) {
            return Err(Error::call_shape(format!("duplicate named argument: {}", name)));
        }
    }

    let mut ordered: Vec<Option<&'e Expr>> = vec![None; params.len()];
    let mut positional = 0usize;
    for (i, arg) in args.iter().enumerate() {
        if let Some(Some(name)) = arg_names.get(i) {
            let index = params
                .iter()
                .position(|p| binding_name(p) == Some(name.as_str()))
                .ok_or_else(|| Error::call_shape(format!("unknown named argument: {}", name)))?;
            if ordered[index].is_some() {
                return Err(Error::call_shape(format!(
                    "named argument duplicates parameter: {}",
                    name
                )));
            }
            ordered[index] = Some(arg);
            continue;
        }
        while positional < params.len() && ordered[positional].is_some() {
            positional += 1;
        }
        if positional >= params.len() {
            return Err(Error::call_shape(format!("argument count mismatch for {}", callee)));
        }
        ordered[positional] = Some(arg);
        positional += 1;
    }

    ordered
        .into_iter()
        .zip(params)
        .map(|(slot, param)| {
            slot.or_else(|| binding_default(param))
                .ok_or_else(|| Error::call_shape(format!("argument count mismatch for {}", callee)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Program;

    fn params() -> Vec<Expr> {
        vec![
            Expr::param("x", &["i32"]),
            Expr::binding("y", &["i32"], Expr::i32(5)),
            Expr::binding("z", &["i32"], Expr::i32(6)),
        ]
    }

    #[test]
    fn test_order_call_arguments_named_then_positional() {
        let params = params();
        let refs: Vec<&Expr> = params.iter().collect();
        let args = vec![Expr::i32(1), Expr::i32(2)];
        let names = vec![Some("x".to_string()), None];
        let ordered = order_call_arguments("/f", &refs, &args, &names).unwrap();
        assert_eq!(ordered[0], &Expr::i32(1));
        assert_eq!(ordered[1], &Expr::i32(2));
        assert_eq!(ordered[2], &Expr::i32(6));
    }

    #[test]
    fn test_order_call_arguments_errors() {
        let params = params();
        let refs: Vec<&Expr> = params.iter().collect();

        let args = vec![Expr::i32(1)];
        let err = order_call_arguments("/f", &refs, &args, &[Some("w".to_string())]).unwrap_err();
        assert_eq!(err.to_string(), "unknown named argument: w");

        let args = vec![Expr::i32(1), Expr::i32(2)];
        let err = order_call_arguments("/f", &refs, &args, &[None, Some("x".to_string())]).unwrap_err();
        assert_eq!(err.to_string(), "named argument duplicates parameter: x");

        let err = order_call_arguments(
            "/f",
            &refs,
            &args,
            &[Some("y".to_string()), Some("y".to_string())],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "duplicate named argument: y");

        let err = order_call_arguments("/f", &refs, &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "argument count mismatch for /f");

        let args = vec![Expr::i32(1), Expr::i32(2), Expr::i32(3), Expr::i32(4)];
        assert!(order_call_arguments("/f", &refs, &args, &[]).is_err());
    }

    #[test]
    fn test_struct_fields_skip_static() {
        let def = Definition::new("/Point")
            .with_transform("struct")
            .with_statement(Expr::binding("x", &["i32"], Expr::i32(0)))
            .with_statement(Expr::binding("origin", &["static", "i32"], Expr::i32(0)));
        let fields = struct_fields(&def).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(binding_name(fields[0]), Some("x"));

        let bad = Definition::new("/Bad")
            .with_transform("struct")
            .with_statement(Expr::call("print_line", vec![Expr::string("no")]));
        assert_eq!(
            struct_fields(&bad).unwrap_err().to_string(),
            "struct definitions may only contain field bindings: /Bad"
        );
    }

    #[test]
    fn test_type_name_aliases() {
        assert_eq!(ValueKind::from_type_name("int"), Some(ValueKind::Int32));
        assert_eq!(ValueKind::from_type_name("float"), Some(ValueKind::Float32));
        assert_eq!(ValueKind::from_type_name("u64"), Some(ValueKind::UInt64));
        assert_eq!(ValueKind::from_type_name("decimal"), None);
    }

    #[test]
    fn test_binding_type_skips_qualifiers() {
        let program = Program::new();
        let scope = DefinitionScope::build(&program).unwrap();
        let transforms = vec![Transform::new("mut"), Transform::parse("Pointer<i64>")];
        let desc = binding_type(&transforms, &scope).unwrap().unwrap();
        assert_eq!(desc.kind, BindingKind::Pointer);
        assert_eq!(desc.value_kind, ValueKind::Int64);
        assert!(is_mutable(&transforms));
        assert!(binding_type(&[Transform::new("mut")], &scope).unwrap().is_none());
    }

    #[test]
    fn test_software_numeric_rejected() {
        let program = Program::new();
        let scope = DefinitionScope::build(&program).unwrap();
        let err = binding_type(&[Transform::new("decimal")], &scope).unwrap_err();
        assert_eq!(err.to_string(), "software numeric types are not supported yet: decimal");
    }

    #[test]
    fn test_map_captures_key_and_value_kinds() {
        let program = Program::new();
        let scope = DefinitionScope::build(&program).unwrap();
        let desc = parse_type_transform(&Transform::parse("map<i32, f64>"), &scope).unwrap();
        assert_eq!(desc.kind, BindingKind::Map);
        assert_eq!(desc.key_kind, ValueKind::Int32);
        assert_eq!(desc.value_kind, ValueKind::Float64);
    }

    #[test]
    fn test_vector_and_template_types() {
        let program = Program::new();
        let scope = DefinitionScope::build(&program).unwrap();
        let desc = parse_type_transform(&Transform::parse("vector<i64>"), &scope).unwrap();
        assert_eq!(desc.kind, BindingKind::Vector);
        assert_eq!(desc.value_kind, ValueKind::Int64);
        assert!(desc.kind.is_collection());

        let templates = vec!["T".to_string()];
        let desc = templated_binding_type(&[Transform::new("T")], &scope, &templates)
            .unwrap()
            .unwrap();
        assert_eq!(desc, TypeDescriptor::value(ValueKind::Unknown));
        let desc = templated_binding_type(&[Transform::parse("Pointer<T>")], &scope, &templates)
            .unwrap()
            .unwrap();
        assert_eq!(desc.kind, BindingKind::Pointer);
        assert_eq!(desc.value_kind, ValueKind::Unknown);
        assert!(binding_type(&[Transform::new("T")], &scope).is_err());
    }

    #[test]
    fn test_declared_return_forms() {
        let def = Definition::new("/f").returns("void");
        assert_eq!(declared_return(&def).unwrap(), Some(ReturnInfo::void()));

        let def = Definition::new("/f").returns("i64");
        assert_eq!(declared_return(&def).unwrap(), Some(ReturnInfo::value(ValueKind::Int64)));

        let def = Definition::new("/f").with_transform("return");
        assert_eq!(
            declared_return(&def).unwrap_err().to_string(),
            "return transform requires a type on /f"
        );

        let def = Definition::new("/f").returns("Widget");
        assert_eq!(
            declared_return(&def).unwrap_err().to_string(),
            "unsupported return type on /f"
        );

        assert_eq!(declared_return(&Definition::new("/f")).unwrap(), None);

        let def = Definition::new("/id").with_template("T").returns("T");
        assert_eq!(declared_return(&def).unwrap(), Some(ReturnInfo::value(ValueKind::Unknown)));
    }
}
