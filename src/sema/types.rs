//! Semantic types.
//!
//! A closed variant set with a `is_const` bit riding on every type. Exact
//! structural match for non-numeric types; any two numeric types convert
//! implicitly, with the common type decided by rank.

use crate::ast::PointerKind;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Named primitive or user-defined type
    Primitive(String),
    Array {
        elem: Box<SemanticType>,
        size: usize,
    },
    Pointer {
        pointee: Box<SemanticType>,
        kind: PointerKind,
    },
    Function {
        params: Vec<SemanticType>,
        ret: Box<SemanticType>,
    },
    Void,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticType {
    pub kind: TypeKind,
    pub is_const: bool,
}

impl SemanticType {
    pub fn primitive(name: impl Into<String>) -> Self {
        Self {
            kind: TypeKind::Primitive(name.into()),
            is_const: false,
        }
    }

    pub fn array(elem: SemanticType, size: usize) -> Self {
        Self {
            kind: TypeKind::Array {
                elem: Box::new(elem),
                size,
            },
            is_const: false,
        }
    }

    pub fn pointer(pointee: SemanticType, kind: PointerKind) -> Self {
        Self {
            kind: TypeKind::Pointer {
                pointee: Box::new(pointee),
                kind,
            },
            is_const: false,
        }
    }

    pub fn function(params: Vec<SemanticType>, ret: SemanticType) -> Self {
        Self {
            kind: TypeKind::Function {
                params,
                ret: Box::new(ret),
            },
            is_const: false,
        }
    }

    pub fn void() -> Self {
        Self {
            kind: TypeKind::Void,
            is_const: false,
        }
    }

    pub fn error() -> Self {
        Self {
            kind: TypeKind::Error,
            is_const: false,
        }
    }

    pub fn with_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, TypeKind::Error)
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    fn primitive_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Primitive(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.primitive_name() == Some(name)
    }

    pub fn is_bool(&self) -> bool {
        self.is_named("bool")
    }

    pub fn is_string(&self) -> bool {
        self.is_named("string")
    }

    pub fn is_null(&self) -> bool {
        self.is_named("null")
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.primitive_name(),
            Some("i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64")
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.primitive_name(), Some("f32" | "f64"))
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Width rank used for numeric promotion. Floats outrank every integer.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self.primitive_name()? {
            "i8" | "u8" => Some(1),
            "i16" | "u16" => Some(2),
            "i32" | "u32" => Some(3),
            "i64" | "u64" => Some(4),
            "f32" => Some(5),
            "f64" => Some(6),
            _ => None,
        }
    }

    /// The scalar set `cast<T>`, `try_cast<T>`, and `as` operate on.
    pub fn is_castable(&self) -> bool {
        self.is_numeric() || self.is_bool() || self.is_string()
    }

    /// Structural compatibility. Error types are compatible with everything
    /// so one failure does not cascade. Constness does not affect value
    /// compatibility.
    pub fn is_compatible_with(&self, other: &SemanticType) -> bool {
        if self.is_error() || other.is_error() {
            return true;
        }
        if self.is_numeric() && other.is_numeric() {
            return true;
        }
        match (&self.kind, &other.kind) {
            (TypeKind::Primitive(a), TypeKind::Primitive(b)) => a == b,
            (TypeKind::Void, TypeKind::Void) => true,
            (
                TypeKind::Array { elem: a, .. },
                TypeKind::Array { elem: b, .. },
            ) => a.is_compatible_with(b),
            (
                TypeKind::Pointer { pointee: a, kind: ka },
                TypeKind::Pointer { pointee: b, kind: kb },
            ) => ka == kb && a.is_compatible_with(b),
            (
                TypeKind::Function { params: pa, ret: ra },
                TypeKind::Function { params: pb, ret: rb },
            ) => {
                pa.len() == pb.len()
                    && ra.is_compatible_with(rb)
                    && pa.iter().zip(pb.iter()).all(|(a, b)| a.is_compatible_with(b))
            }
            _ => false,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const ")?;
        }
        match &self.kind {
            TypeKind::Primitive(name) => write!(f, "{}", name),
            TypeKind::Array { elem, size } => write!(f, "{}[{}]", elem, size),
            TypeKind::Pointer { pointee, kind } => write!(f, "{} {}", kind.as_str(), pointee),
            TypeKind::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                write!(f, "fn({}) -> {}", params.join(", "), ret)
            }
            TypeKind::Void => write!(f, "void"),
            TypeKind::Error => write!(f, "<error>"),
        }
    }
}

/// The promoted type of a mixed-numeric binary operation: the wider rank
/// wins, and any floating operand pulls the result into floating point.
/// On an exact rank tie the left operand's type wins.
pub fn common_numeric_type(a: &SemanticType, b: &SemanticType) -> Option<SemanticType> {
    let ra = a.numeric_rank()?;
    let rb = b.numeric_rank()?;
    if rb > ra {
        Some(b.clone())
    } else {
        Some(a.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(name: &str) -> SemanticType {
        SemanticType::primitive(name)
    }

    #[test]
    fn test_numeric_compatibility_is_loose() {
        assert!(prim("i8").is_compatible_with(&prim("u64")));
        assert!(prim("i32").is_compatible_with(&prim("f64")));
        assert!(!prim("i32").is_compatible_with(&prim("bool")));
        assert!(!prim("string").is_compatible_with(&prim("i32")));
    }

    #[test]
    fn test_non_numeric_needs_exact_match() {
        assert!(prim("bool").is_compatible_with(&prim("bool")));
        assert!(prim("string").is_compatible_with(&prim("string")));
        assert!(!prim("Point").is_compatible_with(&prim("Circle")));
        assert!(prim("Point").is_compatible_with(&prim("Point")));
    }

    #[test]
    fn test_pointer_compatibility_includes_kind() {
        let a = SemanticType::pointer(prim("u8"), PointerKind::Cptr);
        let b = SemanticType::pointer(prim("u8"), PointerKind::Cptr);
        let c = SemanticType::pointer(prim("u8"), PointerKind::Unique);
        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
    }

    #[test]
    fn test_error_type_compatible_with_everything() {
        assert!(SemanticType::error().is_compatible_with(&prim("bool")));
        assert!(prim("string").is_compatible_with(&SemanticType::error()));
    }

    #[test]
    fn test_common_numeric_type_rank_order() {
        let cases = [
            ("i8", "i16", "i16"),
            ("i32", "i64", "i64"),
            ("u8", "u32", "u32"),
            ("i64", "f32", "f32"),
            ("f32", "f64", "f64"),
            ("i32", "f64", "f64"),
        ];
        for (a, b, expected) in cases {
            let result = common_numeric_type(&prim(a), &prim(b)).unwrap();
            assert!(result.is_named(expected), "{} x {} -> {}", a, b, result);
            // Promotion is symmetric in rank.
            let result = common_numeric_type(&prim(b), &prim(a)).unwrap();
            assert!(result.is_named(expected));
        }
    }

    #[test]
    fn test_common_numeric_type_tie_keeps_left() {
        let result = common_numeric_type(&prim("u32"), &prim("i32")).unwrap();
        assert!(result.is_named("u32"));
    }

    #[test]
    fn test_common_numeric_type_rejects_non_numeric() {
        assert!(common_numeric_type(&prim("bool"), &prim("i32")).is_none());
    }

    #[test]
    fn test_display() {
        let fn_ty = SemanticType::function(vec![prim("i32"), prim("string")], prim("bool"));
        assert_eq!(fn_ty.to_string(), "fn(i32, string) -> bool");
        let ptr = SemanticType::pointer(SemanticType::pointer(prim("u8"), PointerKind::Cptr), PointerKind::Shared);
        assert_eq!(ptr.to_string(), "shared cptr u8");
        assert_eq!(SemanticType::array(prim("i32"), 4).to_string(), "i32[4]");
        assert_eq!(prim("i32").with_const().to_string(), "const i32");
    }
}
