//! Definition lookup
//!
//! Definitions are keyed by full path. Relative call names are searched from
//! the caller's namespace outward to the root, then through import aliases.
//! An import of `/ns` aliases the immediate children of `/ns` (not deeper
//! descendants) into the root scope.

use crate::parser::{Definition, Program};
use crate::{Error, Result};
use std::collections::HashMap;

/// Path-indexed view of a program's definitions
#[derive(Debug, Clone)]
pub struct DefinitionScope<'a> {
    definitions: HashMap<String, &'a Definition>,
    aliases: HashMap<String, String>,
}

/// Namespace containing `path` (`/a/b` → `/a`, `/main` → ``)
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn normalize_import(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches("/*").trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl<'a> DefinitionScope<'a> {
    /// Index `program` and apply its imports
    pub fn build(program: &'a Program) -> Result<Self> {
        let mut definitions = HashMap::new();
        for def in &program.definitions {
            if definitions.insert(def.full_path.clone(), def).is_some() {
                return Err(Error::structural(format!("duplicate definition: {}", def.full_path)));
            }
        }

        let mut aliases: HashMap<String, String> = HashMap::new();
        for import in &program.imports {
            let namespace = normalize_import(import);
            let mut found = false;
            for def in &program.definitions {
                if parent_path(&def.full_path) != namespace {
                    continue;
                }
                found = true;
                let alias = format!("/{}", def.name());
                if definitions.contains_key(&alias) {
                    return Err(Error::structural(format!(
                        "import creates name conflict: {}",
                        def.name()
                    )));
                }
                if let Some(existing) = aliases.get(&alias) {
                    if existing != &def.full_path {
                        return Err(Error::structural(format!(
                            "import creates name conflict: {}",
                            def.name()
                        )));
                    }
                }
                aliases.insert(alias, def.full_path.clone());
            }
            let is_definition = definitions.contains_key(&namespace);
            if !found && !is_definition {
                return Err(Error::structural(format!("unknown import path: {}", namespace)));
            }
        }

        tracing::trace!(
            definitions = definitions.len(),
            aliases = aliases.len(),
            "built definition scope"
        );
        Ok(Self { definitions, aliases })
    }

    /// Definition at an exact or aliased root path
    pub fn get(&self, path: &str) -> Option<&'a Definition> {
        if let Some(def) = self.definitions.get(path) {
            return Some(def);
        }
        self.aliases
            .get(path)
            .and_then(|target| self.definitions.get(target))
            .copied()
    }

    /// Resolve a call name as seen from the definition at `from_path`
    pub fn resolve_call(&self, name: &str, from_path: &str) -> Option<&'a Definition> {
        if name.starts_with('/') {
            return self.get(name);
        }
        let mut namespace = parent_path(from_path);
        loop {
            let candidate = format!("{}/{}", namespace, name);
            if let Some(def) = self.definitions.get(&candidate) {
                return Some(def);
            }
            if namespace.is_empty() {
                break;
            }
            namespace = parent_path(namespace);
        }
        self.get(&format!("/{}", name))
    }

    /// Full path of the struct definition named `name`
    pub fn resolve_struct(&self, name: &str) -> Option<String> {
        self.resolve_call(name, "/")
            .filter(|def| def.is_struct())
            .map(|def| def.full_path.clone())
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// No definitions
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Expr;

    fn def(path: &str) -> Definition {
        Definition::new(path).with_statement(Expr::ret_void())
    }

    #[test]
    fn test_relative_resolution_walks_outward() {
        let program = Program::new()
            .with_definition(def("/math/square"))
            .with_definition(def("/math/inner/cube"))
            .with_definition(def("/helper"));
        let scope = DefinitionScope::build(&program).unwrap();
        assert_eq!(
            scope.resolve_call("square", "/math/inner/cube").unwrap().full_path,
            "/math/square"
        );
        assert_eq!(scope.resolve_call("helper", "/math/square").unwrap().full_path, "/helper");
        assert!(scope.resolve_call("square", "/main").is_none());
    }

    #[test]
    fn test_import_aliases_immediate_children_only() {
        let program = Program::new()
            .with_import("/util")
            .with_definition(def("/util/twice"))
            .with_definition(def("/util/deep/hidden"));
        let scope = DefinitionScope::build(&program).unwrap();
        assert_eq!(scope.resolve_call("twice", "/main").unwrap().full_path, "/util/twice");
        assert!(scope.resolve_call("hidden", "/main").is_none());
    }

    #[test]
    fn test_import_conflict_regardless_of_order() {
        let program = Program::new()
            .with_import("/util")
            .with_definition(def("/util/helper"))
            .with_definition(def("/helper"));
        let err = DefinitionScope::build(&program).unwrap_err();
        assert_eq!(err.to_string(), "import creates name conflict: helper");

        let program = Program::new()
            .with_import("/util")
            .with_definition(def("/helper"))
            .with_definition(def("/util/helper"));
        assert!(DefinitionScope::build(&program).is_err());
    }

    #[test]
    fn test_duplicate_definitions_rejected() {
        let program = Program::new().with_definition(def("/main")).with_definition(def("/main"));
        let err = DefinitionScope::build(&program).unwrap_err();
        assert_eq!(err.to_string(), "duplicate definition: /main");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/main"), "");
    }
}
