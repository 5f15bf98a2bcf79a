//! Built-in function registry.
//!
//! An explicit value threaded into the analyzer (and a backend) at
//! construction; there is no process-global state. The default registry is
//! empty: everything the standard library offers arrives through foreign
//! declarations in its own modules.

use crate::sema::scope::{ScopeStack, Symbol};
use crate::sema::types::SemanticType;
use crate::source::SourceLocation;

#[derive(Debug, Clone)]
pub struct BuiltinFunction {
    pub name: String,
    pub params: Vec<SemanticType>,
    pub ret: SemanticType,
}

#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    functions: Vec<BuiltinFunction>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(
        mut self,
        name: impl Into<String>,
        params: Vec<SemanticType>,
        ret: SemanticType,
    ) -> Self {
        self.functions.push(BuiltinFunction {
            name: name.into(),
            params,
            ret,
        });
        self
    }

    pub fn functions(&self) -> &[BuiltinFunction] {
        &self.functions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    /// Define every registered function in the module's global scope.
    /// Built-ins carry an empty `declared_module`, which makes them visible
    /// from any module.
    pub fn install(&self, scopes: &mut ScopeStack) {
        for f in &self.functions {
            let ty = SemanticType::function(f.params.clone(), f.ret.clone());
            scopes.define_global(
                Symbol::new(&f.name, ty, false, SourceLocation::default()).initialized(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_is_empty() {
        let registry = BuiltinRegistry::new();
        assert!(registry.functions().is_empty());
        assert!(!registry.contains("print"));
    }

    #[test]
    fn test_install_defines_global_symbols() {
        let registry = BuiltinRegistry::new().with_function(
            "print",
            vec![SemanticType::primitive("string")],
            SemanticType::void(),
        );
        assert!(registry.contains("print"));

        let mut scopes = ScopeStack::new();
        registry.install(&mut scopes);
        let symbol = scopes.lookup("print").unwrap();
        assert!(symbol.declared_module.is_empty());
        assert_eq!(symbol.ty.to_string(), "fn(string) -> void");
    }
}
