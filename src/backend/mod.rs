//! Backend interface.
//!
//! The code emitter is a collaborator, not part of this crate. This module
//! pins down the contract it must honor: the cast categorization shared with
//! the analyzer, variadic argument promotion, the scoped value table, and
//! the expression-value cache keyed by AST node identity. Emitters report
//! failures (unresolved functions, unconvertible types) through the same
//! diagnostics channel as the front-end.

use crate::ast::{NodeId, Program, TypeExpr};
use crate::error::{DiagnosticEmitter, Result};
use crate::sema::{ExprTypes, SemanticType};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;

/// Conversion from AST types into an emitter's own type universe. An
/// unconvertible type is an `Err`; the emitter reports it through the
/// diagnostics channel and substitutes a poison value.
pub trait TypeLowering {
    type Ty;

    fn backend_type_of(&mut self, ty: &TypeExpr) -> Result<Self::Ty>;
}

/// A code emitter consuming the typed AST.
pub trait Backend {
    /// Lower the whole program. Expression types come from the analyzer's
    /// side table.
    fn emit_program(
        &mut self,
        program: &Program,
        types: &ExprTypes,
        diagnostics: &mut DiagnosticEmitter,
    ) -> Result<()>;

    /// Write the intermediate representation to a file.
    fn write_ir(&mut self, path: &Path) -> Result<()>;

    /// Link a native executable at the given path.
    fn link_executable(&mut self, path: &Path) -> Result<()>;
}

// ============================================================================
// Cast categorization
// ============================================================================

/// How a scalar cast lowers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Same width and representation; nothing to do.
    NoOp,
    IntWiden,
    IntTruncate,
    IntToFloat,
    FloatToInt,
    FloatWiden,
    FloatTruncate,
    /// Compare against zero.
    ToBool,
    /// Zero-extend the boolean.
    FromBool,
}

fn int_width(ty: &SemanticType) -> Option<u8> {
    match ty.numeric_rank()? {
        1 => Some(8),
        2 => Some(16),
        3 => Some(32),
        4 => Some(64),
        _ => None,
    }
}

/// Categorize a cast between two types from the castable scalar set.
/// Returns `None` when either endpoint has no lowering (strings, pointers,
/// user types); the emitter reports those through diagnostics.
pub fn classify_cast(from: &SemanticType, to: &SemanticType) -> Option<CastKind> {
    if from == to {
        return Some(CastKind::NoOp);
    }
    if to.is_bool() {
        return (from.is_numeric() || from.is_bool()).then_some(CastKind::ToBool);
    }
    if from.is_bool() {
        return (to.is_numeric()).then_some(CastKind::FromBool);
    }
    if from.is_integer() && to.is_integer() {
        let fw = int_width(from)?;
        let tw = int_width(to)?;
        return Some(if tw > fw {
            CastKind::IntWiden
        } else if tw < fw {
            CastKind::IntTruncate
        } else {
            // Same width, different sign: a plain reinterpretation.
            CastKind::NoOp
        });
    }
    if from.is_integer() && to.is_float() {
        return Some(CastKind::IntToFloat);
    }
    if from.is_float() && to.is_integer() {
        return Some(CastKind::FloatToInt);
    }
    if from.is_float() && to.is_float() {
        return Some(if to.is_named("f64") {
            CastKind::FloatWiden
        } else {
            CastKind::FloatTruncate
        });
    }
    None
}

// ============================================================================
// Variadic call lowering
// ============================================================================

/// Default argument promotion for variadic foreign calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariadicPromotion {
    /// `f32` widens to double.
    WidenToF64,
    /// Sub-32-bit integers (and bool) sign-extend to 32 bits.
    SignExtendToI32,
    AsIs,
}

pub fn variadic_promotion(ty: &SemanticType) -> VariadicPromotion {
    if ty.is_named("f32") {
        return VariadicPromotion::WidenToF64;
    }
    if ty.is_bool() {
        return VariadicPromotion::SignExtendToI32;
    }
    match ty.numeric_rank() {
        Some(rank) if rank < 3 && ty.is_integer() => VariadicPromotion::SignExtendToI32,
        _ => VariadicPromotion::AsIs,
    }
}

// ============================================================================
// Value scopes and the expression-value cache
// ============================================================================

/// What kind of storage a name resolves to during lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// A mutable stack slot.
    Local,
    Global,
    /// A compile-time constant.
    Constant,
}

#[derive(Debug, Clone)]
pub struct Binding<V> {
    pub value: V,
    pub kind: BindingKind,
}

/// Function- and block-level name table for the emitter. The bottom scope is
/// the function scope; blocks push and pop on top of it.
pub struct ValueScopes<V> {
    scopes: Vec<IndexMap<String, Binding<V>>>,
}

impl<V> ValueScopes<V> {
    pub fn new() -> Self {
        Self {
            scopes: vec![IndexMap::new()],
        }
    }

    pub fn push_block(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop_block(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the function scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: V, kind: BindingKind) {
        let scope = self.scopes.last_mut().expect("value scopes never empty");
        scope.insert(name.into(), Binding { value, kind });
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding<V>> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

impl<V> Default for ValueScopes<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Expression-value cache keyed by AST node identity, populated in
/// visitation order.
pub struct ExprValues<V> {
    values: HashMap<NodeId, V>,
}

impl<V> ExprValues<V> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: NodeId, value: V) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: NodeId) -> Option<&V> {
        self.values.get(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> Default for ExprValues<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(name: &str) -> SemanticType {
        SemanticType::primitive(name)
    }

    #[test]
    fn test_classify_integer_casts() {
        assert_eq!(classify_cast(&prim("i8"), &prim("i64")), Some(CastKind::IntWiden));
        assert_eq!(classify_cast(&prim("u64"), &prim("u8")), Some(CastKind::IntTruncate));
        assert_eq!(classify_cast(&prim("i32"), &prim("u32")), Some(CastKind::NoOp));
        assert_eq!(classify_cast(&prim("i32"), &prim("i32")), Some(CastKind::NoOp));
    }

    #[test]
    fn test_classify_float_casts() {
        assert_eq!(classify_cast(&prim("f32"), &prim("f64")), Some(CastKind::FloatWiden));
        assert_eq!(classify_cast(&prim("f64"), &prim("f32")), Some(CastKind::FloatTruncate));
        assert_eq!(classify_cast(&prim("i16"), &prim("f32")), Some(CastKind::IntToFloat));
        assert_eq!(classify_cast(&prim("f64"), &prim("u8")), Some(CastKind::FloatToInt));
    }

    #[test]
    fn test_classify_bool_casts() {
        assert_eq!(classify_cast(&prim("i32"), &prim("bool")), Some(CastKind::ToBool));
        assert_eq!(classify_cast(&prim("f64"), &prim("bool")), Some(CastKind::ToBool));
        assert_eq!(classify_cast(&prim("bool"), &prim("i32")), Some(CastKind::FromBool));
    }

    #[test]
    fn test_unloweable_casts_are_none() {
        assert_eq!(classify_cast(&prim("string"), &prim("i32")), None);
        assert_eq!(classify_cast(&prim("i32"), &prim("string")), None);
        use crate::ast::PointerKind;
        let ptr = SemanticType::pointer(prim("u8"), PointerKind::Cptr);
        assert_eq!(classify_cast(&ptr, &prim("i64")), None);
    }

    #[test]
    fn test_variadic_promotion() {
        assert_eq!(variadic_promotion(&prim("f32")), VariadicPromotion::WidenToF64);
        assert_eq!(variadic_promotion(&prim("f64")), VariadicPromotion::AsIs);
        assert_eq!(variadic_promotion(&prim("i8")), VariadicPromotion::SignExtendToI32);
        assert_eq!(variadic_promotion(&prim("u16")), VariadicPromotion::SignExtendToI32);
        assert_eq!(variadic_promotion(&prim("bool")), VariadicPromotion::SignExtendToI32);
        assert_eq!(variadic_promotion(&prim("i32")), VariadicPromotion::AsIs);
        assert_eq!(variadic_promotion(&prim("string")), VariadicPromotion::AsIs);
    }

    #[test]
    fn test_value_scopes_block_shadowing() {
        let mut scopes: ValueScopes<u32> = ValueScopes::new();
        scopes.define("x", 1, BindingKind::Local);
        scopes.push_block();
        scopes.define("x", 2, BindingKind::Local);
        assert_eq!(scopes.lookup("x").unwrap().value, 2);
        scopes.pop_block();
        assert_eq!(scopes.lookup("x").unwrap().value, 1);
        assert_eq!(scopes.lookup("x").unwrap().kind, BindingKind::Local);
    }

    #[test]
    fn test_expr_values_cache() {
        let mut values: ExprValues<&str> = ExprValues::new();
        assert!(values.is_empty());
        values.insert(3, "v3");
        values.insert(7, "v7");
        assert_eq!(values.get(3), Some(&"v3"));
        assert_eq!(values.get(4), None);
        assert_eq!(values.len(), 2);
    }
}
