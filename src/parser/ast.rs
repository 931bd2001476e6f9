use serde::{Deserialize, Serialize};
use std::fmt;

/// Complete program handed over by the front end
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    /// Namespace paths whose immediate children are aliased into the root
    #[serde(default)]
    pub imports: Vec<String>,
    /// Definitions, unique by full path
    #[serde(default)]
    pub definitions: Vec<Definition>,
    /// Top-level executions in source order
    #[serde(default)]
    pub executions: Vec<Execution>,
}

impl Program {
    /// Create an empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an import path
    pub fn with_import(mut self, path: &str) -> Self {
        self.imports.push(path.to_string());
        self
    }

    /// Add a definition
    pub fn with_definition(mut self, def: Definition) -> Self {
        self.definitions.push(def);
        self
    }

    /// Add an execution
    pub fn with_execution(mut self, exec: Execution) -> Self {
        self.executions.push(exec);
        self
    }

    /// Find a definition by exact full path
    pub fn definition(&self, path: &str) -> Option<&Definition> {
        self.definitions.iter().find(|def| def.full_path == path)
    }
}

/// Named annotation on a definition, execution or expression
///
/// Either a flat argument list (`effects(io_out, heap_alloc)`) or template
/// arguments (`map<i32, i32>`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transform {
    /// Transform name (`effects`, `return`, `mut`, `i32`, `Pointer`, ...)
    pub name: String,
    /// Template arguments, outermost split only
    #[serde(default)]
    pub template_args: Vec<String>,
    /// Flat arguments
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl Transform {
    /// Create a bare transform
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Parse the textual form `name`, `name<a, b>` or `name(a, b)`
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(open) = text.find('<') {
            if text.ends_with('>') {
                let inner = &text[open + 1..text.len() - 1];
                return Self {
                    name: text[..open].trim().to_string(),
                    template_args: split_top_level(inner),
                    arguments: Vec::new(),
                };
            }
        }
        if let Some(open) = text.find('(') {
            if text.ends_with(')') {
                let inner = &text[open + 1..text.len() - 1];
                return Self {
                    name: text[..open].trim().to_string(),
                    template_args: Vec::new(),
                    arguments: split_top_level(inner),
                };
            }
        }
        Self::new(text)
    }

    /// `effects(...)` transform with the given capability names
    pub fn effects(names: &[&str]) -> Self {
        Self {
            name: "effects".to_string(),
            template_args: Vec::new(),
            arguments: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.template_args.is_empty() {
            write!(f, "<{}>", self.template_args.join(", "))?;
        }
        if !self.arguments.is_empty() {
            write!(f, "({})", self.arguments.join(", "))?;
        }
        Ok(())
    }
}

/// Split on commas that are not nested inside `<...>`
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '<' => {
                depth += 1;
                current.push(ch);
            }
            '>' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Named callable unit: function, method or struct layout
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Definition {
    /// Unique slash-separated path (`/main`, `/math/square`)
    pub full_path: String,
    /// Annotations (`return<T>`, `effects(...)`, `struct`, ...)
    #[serde(default)]
    pub transforms: Vec<Transform>,
    /// Template parameter names
    #[serde(default)]
    pub template_args: Vec<String>,
    /// Parameter bindings; `args[0]` of each is its default value
    #[serde(default)]
    pub parameters: Vec<Expr>,
    /// Body statements
    #[serde(default)]
    pub statements: Vec<Expr>,
    /// Trailing value, treated as a final `return(expr)`
    #[serde(default)]
    pub return_expr: Option<Expr>,
}

impl Definition {
    /// Create an empty definition at `path`
    pub fn new(path: &str) -> Self {
        Self {
            full_path: path.to_string(),
            ..Default::default()
        }
    }

    /// Add a transform parsed from its textual form
    pub fn with_transform(mut self, text: &str) -> Self {
        self.transforms.push(Transform::parse(text));
        self
    }

    /// Declare the return type (`return<T>`)
    pub fn returns(self, ty: &str) -> Self {
        self.with_transform(&format!("return<{}>", ty))
    }

    /// Attach an `effects(...)` transform
    pub fn with_effects(mut self, names: &[&str]) -> Self {
        self.transforms.push(Transform::effects(names));
        self
    }

    /// Add a template parameter
    pub fn with_template(mut self, name: &str) -> Self {
        self.template_args.push(name.to_string());
        self
    }

    /// Add a parameter binding
    pub fn with_parameter(mut self, param: Expr) -> Self {
        self.parameters.push(param);
        self
    }

    /// Append a body statement
    pub fn with_statement(mut self, stmt: Expr) -> Self {
        self.statements.push(stmt);
        self
    }

    /// Replace the body statements
    pub fn with_statements(mut self, stmts: Vec<Expr>) -> Self {
        self.statements = stmts;
        self
    }

    /// Set the trailing return expression
    pub fn with_return_expr(mut self, expr: Expr) -> Self {
        self.return_expr = Some(expr);
        self
    }

    /// Whether any transform carries `name`
    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.iter().any(|t| t.name == name)
    }

    /// Struct definitions are field-binding aggregates
    pub fn is_struct(&self) -> bool {
        self.has_transform("struct")
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.full_path.rsplit('/').next().unwrap_or(&self.full_path)
    }

    /// Body statements followed by the trailing return, if any
    pub fn body(&self) -> Vec<Expr> {
        let mut stmts = self.statements.clone();
        if let Some(ret) = &self.return_expr {
            stmts.push(Expr::ret(ret.clone()));
        }
        stmts
    }
}

/// Top-level statement run outside any definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Execution {
    /// Path of the definition this execution invokes
    pub full_path: String,
    /// Annotations (`effects(...)`)
    #[serde(default)]
    pub transforms: Vec<Transform>,
    /// Call arguments
    #[serde(default)]
    pub arguments: Vec<Expr>,
    /// Optional argument labels, parallel to `arguments`
    #[serde(default)]
    pub argument_names: Vec<Option<String>>,
    /// Attached block statements
    #[serde(default)]
    pub body: Vec<Expr>,
}

impl Execution {
    /// Create an execution of `path` with positional arguments
    pub fn new(path: &str, arguments: Vec<Expr>) -> Self {
        Self {
            full_path: path.to_string(),
            argument_names: vec![None; arguments.len()],
            arguments,
            ..Default::default()
        }
    }

    /// Attach an `effects(...)` transform
    pub fn with_effects(mut self, names: &[&str]) -> Self {
        self.transforms.push(Transform::effects(names));
        self
    }

    /// Label arguments; `None` keeps an argument positional
    pub fn with_argument_names(mut self, names: &[Option<&str>]) -> Self {
        self.argument_names = names.iter().map(|n| n.map(str::to_string)).collect();
        self
    }

    /// Set the attached block statements
    pub fn with_body(mut self, body: Vec<Expr>) -> Self {
        self.body = body;
        self
    }
}

/// Integer literal width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntWidth {
    /// 32-bit signed
    I32,
    /// 64-bit signed
    I64,
}

/// Float literal width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloatWidth {
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Signed integer; an `I32` literal outside the i32 range is rejected by the lowerer
    Int {
        /// Value
        value: i64,
        /// Width suffix
        width: IntWidth,
    },
    /// Unsigned 64-bit integer (`u64` suffix)
    UInt(u64),
    /// Floating point
    Float {
        /// Value
        value: f64,
        /// Width suffix
        width: FloatWidth,
    },
    /// `true` / `false`
    Bool(bool),
    /// String literal
    String(String),
}

/// Call node: builtin, user definition, method, binding or block envelope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Call {
    /// Callee name or path; for bindings, the bound name
    pub name: String,
    /// Positional operands (for bindings, `args[0]` is the initializer)
    #[serde(default)]
    pub args: Vec<Expr>,
    /// Optional label per argument; empty means all positional
    #[serde(default)]
    pub arg_names: Vec<Option<String>>,
    /// Attached block statements (`then(){...}`), `None` when absent
    #[serde(default)]
    pub body: Option<Vec<Expr>>,
    /// Template arguments (`convert<f64>`)
    #[serde(default)]
    pub template_args: Vec<String>,
    /// Binding declaration rather than a call
    #[serde(default)]
    pub is_binding: bool,
    /// `recv.name(...)` form; `args[0]` is the receiver
    #[serde(default)]
    pub is_method_call: bool,
}

impl Call {
    /// Label of argument `index`, if named
    pub fn arg_name(&self, index: usize) -> Option<&str> {
        self.arg_names.get(index).and_then(|n| n.as_deref())
    }

    /// Whether any argument carries a label
    pub fn has_named_args(&self) -> bool {
        self.arg_names.iter().any(Option::is_some)
    }
}

/// Expression shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Literal value
    Literal(Literal),
    /// Identifier reference
    Name(String),
    /// Call, binding or block-bearing call
    Call(Call),
}

/// Expression with its attached transforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// Shape and payload
    pub kind: ExprKind,
    /// Annotations (`effects(...)`, binding types, `mut`)
    #[serde(default)]
    pub transforms: Vec<Transform>,
}

impl Expr {
    fn from_kind(kind: ExprKind) -> Self {
        Self {
            kind,
            transforms: Vec::new(),
        }
    }

    /// `N` / `Ni32`
    pub fn i32(value: i32) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::Int {
            value: value as i64,
            width: IntWidth::I32,
        }))
    }

    /// `Ni64`
    pub fn i64(value: i64) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::Int {
            value,
            width: IntWidth::I64,
        }))
    }

    /// `Nu64`
    pub fn u64(value: u64) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::UInt(value)))
    }

    /// `N.Nf`
    pub fn f32(value: f32) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::Float {
            value: value as f64,
            width: FloatWidth::F32,
        }))
    }

    /// `N.Nf64`
    pub fn f64(value: f64) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::Float {
            value,
            width: FloatWidth::F64,
        }))
    }

    /// `true` / `false`
    pub fn bool(value: bool) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::Bool(value)))
    }

    /// String literal
    pub fn string(text: &str) -> Self {
        Self::from_kind(ExprKind::Literal(Literal::String(text.to_string())))
    }

    /// Identifier
    pub fn name(name: &str) -> Self {
        Self::from_kind(ExprKind::Name(name.to_string()))
    }

    /// Plain call with positional arguments
    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::from_kind(ExprKind::Call(Call {
            name: name.to_string(),
            arg_names: vec![None; args.len()],
            args,
            ..Default::default()
        }))
    }

    /// Call with optional labels per argument
    pub fn call_named(name: &str, args: Vec<(Option<&str>, Expr)>) -> Self {
        let (names, args): (Vec<_>, Vec<_>) = args
            .into_iter()
            .map(|(label, arg)| (label.map(str::to_string), arg))
            .unzip();
        Self::from_kind(ExprKind::Call(Call {
            name: name.to_string(),
            args,
            arg_names: names,
            ..Default::default()
        }))
    }

    /// Call carrying template arguments (`convert<f64>(x)`)
    pub fn call_template(name: &str, template: &[&str], args: Vec<Expr>) -> Self {
        let mut expr = Self::call(name, args);
        if let ExprKind::Call(call) = &mut expr.kind {
            call.template_args = template.iter().map(|t| t.to_string()).collect();
        }
        expr
    }

    /// Method call `receiver.name(args...)`
    pub fn method(receiver: Expr, name: &str, args: Vec<Expr>) -> Self {
        let mut all = vec![receiver];
        all.extend(args);
        let mut expr = Self::call(name, all);
        if let ExprKind::Call(call) = &mut expr.kind {
            call.is_method_call = true;
        }
        expr
    }

    /// Call with an attached block (`name(args){ body }`)
    pub fn block_call(name: &str, args: Vec<Expr>, body: Vec<Expr>) -> Self {
        let mut expr = Self::call(name, args);
        if let ExprKind::Call(call) = &mut expr.kind {
            call.body = Some(body);
        }
        expr
    }

    /// Binding declaration `[types...] name{init}`
    pub fn binding(name: &str, transforms: &[&str], init: Expr) -> Self {
        let mut expr = Self::call(name, vec![init]);
        if let ExprKind::Call(call) = &mut expr.kind {
            call.is_binding = true;
        }
        expr.transforms = transforms.iter().map(|t| Transform::parse(t)).collect();
        expr
    }

    /// Parameter binding without a default `[types...] name`
    pub fn param(name: &str, transforms: &[&str]) -> Self {
        let mut expr = Self::call(name, Vec::new());
        if let ExprKind::Call(call) = &mut expr.kind {
            call.is_binding = true;
        }
        expr.transforms = transforms.iter().map(|t| Transform::parse(t)).collect();
        expr
    }

    /// `return(value)`
    pub fn ret(value: Expr) -> Self {
        Self::call("return", vec![value])
    }

    /// `return()`
    pub fn ret_void() -> Self {
        Self::call("return", Vec::new())
    }

    /// `if(cond, then(){...}, else(){...})`
    pub fn if_else(cond: Expr, then_body: Vec<Expr>, else_body: Vec<Expr>) -> Self {
        Self::call(
            "if",
            vec![
                cond,
                Self::block_call("then", Vec::new(), then_body),
                Self::block_call("else", Vec::new(), else_body),
            ],
        )
    }

    /// `repeat(count){...}`
    pub fn repeat(count: Expr, body: Vec<Expr>) -> Self {
        Self::block_call("repeat", vec![count], body)
    }

    /// `while(cond){...}`
    pub fn while_loop(cond: Expr, body: Vec<Expr>) -> Self {
        Self::block_call("while", vec![cond], body)
    }

    /// `for(init, cond, step){...}`
    pub fn for_loop(init: Expr, cond: Expr, step: Expr, body: Vec<Expr>) -> Self {
        Self::block_call("for", vec![init, cond, step], body)
    }

    /// `block(){...}`
    pub fn block(body: Vec<Expr>) -> Self {
        Self::block_call("block", Vec::new(), body)
    }

    /// `assign(target, value)`
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::call("assign", vec![target, value])
    }

    /// Attach a transform parsed from text
    pub fn with_transform(mut self, text: &str) -> Self {
        self.transforms.push(Transform::parse(text));
        self
    }

    /// Attach an `effects(...)` transform
    pub fn with_effects(mut self, names: &[&str]) -> Self {
        self.transforms.push(Transform::effects(names));
        self
    }

    /// The call payload, if this is a call
    pub fn as_call(&self) -> Option<&Call> {
        match &self.kind {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Whether this is a binding declaration
    pub fn is_binding(&self) -> bool {
        matches!(&self.kind, ExprKind::Call(call) if call.is_binding)
    }

    /// Whether this is a plain (non-binding, non-method) call to `name`
    pub fn is_call_to(&self, name: &str) -> bool {
        matches!(&self.kind, ExprKind::Call(call)
            if !call.is_binding && !call.is_method_call && call.name == name)
    }

    /// Whether any transform carries `name`
    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.iter().any(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_parse_forms() {
        let t = Transform::parse("map<i32, Pointer<i64>>");
        assert_eq!(t.name, "map");
        assert_eq!(t.template_args, vec!["i32", "Pointer<i64>"]);

        let t = Transform::parse("effects(io_out, heap_alloc)");
        assert_eq!(t.name, "effects");
        assert_eq!(t.arguments, vec!["io_out", "heap_alloc"]);

        let t = Transform::parse("mut");
        assert_eq!(t, Transform::new("mut"));
        assert_eq!(Transform::parse("array<string>").to_string(), "array<string>");
    }

    #[test]
    fn test_if_else_builder_shape() {
        let expr = Expr::if_else(Expr::bool(true), vec![Expr::i32(1)], vec![Expr::i32(2)]);
        let call = expr.as_call().unwrap();
        assert_eq!(call.name, "if");
        assert_eq!(call.args.len(), 3);
        assert!(call.args[1].as_call().unwrap().body.is_some());
    }

    #[test]
    fn test_definition_body_appends_return_expr() {
        let def = Definition::new("/main")
            .returns("int")
            .with_return_expr(Expr::i32(7));
        let body = def.body();
        assert_eq!(body.len(), 1);
        assert!(body[0].is_call_to("return"));
        assert_eq!(def.name(), "main");
    }

    #[test]
    fn test_program_json_shape_roundtrips() {
        let program = Program::new().with_definition(
            Definition::new("/main")
                .returns("int")
                .with_statement(Expr::ret(Expr::i32(7))),
        );
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(program, back);
    }
}
