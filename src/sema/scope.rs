//! Symbols and the scope stack.
//!
//! A scope is a map from name to symbol; the stack replaces a parent-pointer
//! tree. Lookup walks from the innermost scope out to the module's global
//! scope at the bottom.

use super::types::SemanticType;
use crate::source::SourceLocation;
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: SemanticType,
    pub is_mutable: bool,
    pub is_initialized: bool,
    /// Name of the defining module; empty for built-ins, which are visible
    /// everywhere.
    pub declared_module: String,
    pub is_exported: bool,
    pub location: SourceLocation,
}

impl Symbol {
    pub fn new(name: impl Into<String>, ty: SemanticType, is_mutable: bool, location: SourceLocation) -> Self {
        Self {
            name: name.into(),
            ty,
            is_mutable,
            is_initialized: false,
            declared_module: String::new(),
            is_exported: false,
            location,
        }
    }

    pub fn initialized(mut self) -> Self {
        self.is_initialized = true;
        self
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.declared_module = module.into();
        self
    }

    pub fn exported(mut self, exported: bool) -> Self {
        self.is_exported = exported;
        self
    }
}

pub struct ScopeStack {
    scopes: Vec<IndexMap<String, Symbol>>,
}

impl ScopeStack {
    /// Starts with the module's global scope at the bottom.
    pub fn new() -> Self {
        Self {
            scopes: vec![IndexMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the global scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Insert into the innermost scope, replacing any existing entry.
    /// Redefinition policy belongs to the caller.
    pub fn define(&mut self, symbol: Symbol) {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        scope.insert(symbol.name.clone(), symbol);
    }

    /// Insert into the module's global scope, regardless of nesting.
    pub fn define_global(&mut self, symbol: Symbol) {
        self.scopes[0].insert(symbol.name.clone(), symbol);
    }

    pub fn is_defined_in_current(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map(|s| s.contains_key(name))
            .unwrap_or(false)
    }

    /// Walk parents until a hit or the global scope root.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Top-level symbols of the module (the bottom scope).
    pub fn globals(&self) -> impl Iterator<Item = &Symbol> {
        self.scopes[0].values()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, ty: &str) -> Symbol {
        Symbol::new(name, SemanticType::primitive(ty), false, SourceLocation::default())
    }

    #[test]
    fn test_lookup_walks_outward() {
        let mut scopes = ScopeStack::new();
        scopes.define(sym("x", "i32"));
        scopes.push();
        scopes.define(sym("y", "bool"));

        assert!(scopes.lookup("x").is_some());
        assert!(scopes.lookup("y").is_some());
        assert!(scopes.lookup("z").is_none());
    }

    #[test]
    fn test_inner_shadows_outer() {
        let mut scopes = ScopeStack::new();
        scopes.define(sym("x", "i32"));
        scopes.push();
        scopes.define(sym("x", "string"));

        assert!(scopes.lookup("x").unwrap().ty.is_string());
        scopes.pop();
        assert!(scopes.lookup("x").unwrap().ty.is_named("i32"));
    }

    #[test]
    fn test_exit_restores_matching_entry_depth() {
        let mut scopes = ScopeStack::new();
        let before = scopes.depth();
        scopes.push();
        scopes.push();
        scopes.pop();
        scopes.pop();
        assert_eq!(scopes.depth(), before);
        // The symbol defined before the pushes is still reachable.
        scopes.define(sym("kept", "i32"));
        assert!(scopes.lookup("kept").is_some());
    }

    #[test]
    fn test_current_scope_redefinition_visible_to_caller() {
        let mut scopes = ScopeStack::new();
        scopes.define(sym("x", "i32"));
        assert!(scopes.is_defined_in_current("x"));
        scopes.push();
        assert!(!scopes.is_defined_in_current("x"));
    }
}
