//! The compile-time type-expression model and the resolution tables the
//! lowering pass consults. Type expressions are immutable once published;
//! the two-phase descriptor decoder is the only writer of a not-yet-filled
//! node (see `descriptor.rs`).

use std::fmt::{Display, Formatter};

use ecow::EcoString;
use fxhash::FxHashMap;
use itertools::Itertools;
use string_interner::backend::StringBackend;

use crate::SV4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(string_interner::symbol::SymbolU32);

/// Interned qualified names, dotted source form ("java.lang.Object").
pub struct Names {
    intern_pool: string_interner::StringInterner<StringBackend>,
}

impl Names {
    pub fn new() -> Names {
        Names { intern_pool: string_interner::StringInterner::with_capacity(1024) }
    }

    pub fn intern(&mut self, s: impl AsRef<str>) -> NameId {
        NameId(self.intern_pool.get_or_intern(s))
    }

    pub fn get(&self, id: NameId) -> &str {
        self.intern_pool.resolve(id.0).expect("failed to resolve name")
    }
}

impl Default for Names {
    fn default() -> Self {
        Names::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Void,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 9] = [
        PrimitiveKind::Bool,
        PrimitiveKind::Byte,
        PrimitiveKind::Char,
        PrimitiveKind::Double,
        PrimitiveKind::Float,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Short,
        PrimitiveKind::Void,
    ];

    pub fn descriptor_char(&self) -> char {
        match self {
            PrimitiveKind::Bool => 'Z',
            PrimitiveKind::Byte => 'B',
            PrimitiveKind::Char => 'C',
            PrimitiveKind::Double => 'D',
            PrimitiveKind::Float => 'F',
            PrimitiveKind::Int => 'I',
            PrimitiveKind::Long => 'J',
            PrimitiveKind::Short => 'S',
            PrimitiveKind::Void => 'V',
        }
    }

    pub fn from_descriptor_char(c: char) -> Option<PrimitiveKind> {
        let kind = match c {
            'Z' => PrimitiveKind::Bool,
            'B' => PrimitiveKind::Byte,
            'C' => PrimitiveKind::Char,
            'D' => PrimitiveKind::Double,
            'F' => PrimitiveKind::Float,
            'I' => PrimitiveKind::Int,
            'J' => PrimitiveKind::Long,
            'S' => PrimitiveKind::Short,
            'V' => PrimitiveKind::Void,
            _ => return None,
        };
        Some(kind)
    }

    /// The platform class a value of this kind boxes to; also used as the
    /// nullable-of-primitive marker type.
    pub fn boxed_class_name(&self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "java.lang.Boolean",
            PrimitiveKind::Byte => "java.lang.Byte",
            PrimitiveKind::Char => "java.lang.Character",
            PrimitiveKind::Double => "java.lang.Double",
            PrimitiveKind::Float => "java.lang.Float",
            PrimitiveKind::Int => "java.lang.Integer",
            PrimitiveKind::Long => "java.lang.Long",
            PrimitiveKind::Short => "java.lang.Short",
            PrimitiveKind::Void => "java.lang.Void",
        }
    }
}

impl Display for PrimitiveKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveKind::Bool => write!(f, "bool"),
            PrimitiveKind::Byte => write!(f, "byte"),
            PrimitiveKind::Char => write!(f, "char"),
            PrimitiveKind::Double => write!(f, "double"),
            PrimitiveKind::Float => write!(f, "float"),
            PrimitiveKind::Int => write!(f, "int"),
            PrimitiveKind::Long => write!(f, "long"),
            PrimitiveKind::Short => write!(f, "short"),
            PrimitiveKind::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeExprId(u32);
impl TypeExprId {
    /// Placeholder element of a freshly-allocated, not-yet-filled array node.
    pub const PENDING: TypeExprId = TypeExprId(u32::MAX);
}

impl Display for TypeExprId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDefId(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDefId(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRefId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamOwner {
    Type(TypeDefId),
    Method(MethodDefId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Primitive(PrimitiveKind),
    Reference {
        name: NameId,
    },
    /// Multi-dimensional arrays are one node with a rank, never nested
    /// single-dim nodes.
    Array {
        element: TypeExprId,
        rank: u32,
    },
    GenericParam {
        owner: ParamOwner,
        position: u32,
    },
    GenericInstance {
        definition: TypeExprId,
        args: SV4<TypeExprId>,
    },
}

impl TypeExpr {
    pub fn as_primitive(&self) -> Option<PrimitiveKind> {
        match self {
            TypeExpr::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeExpr::Array { .. })
    }
}

pub const BOOL_TYPE_ID: TypeExprId = TypeExprId(0);
pub const BYTE_TYPE_ID: TypeExprId = TypeExprId(1);
pub const CHAR_TYPE_ID: TypeExprId = TypeExprId(2);
pub const DOUBLE_TYPE_ID: TypeExprId = TypeExprId(3);
pub const FLOAT_TYPE_ID: TypeExprId = TypeExprId(4);
pub const INT_TYPE_ID: TypeExprId = TypeExprId(5);
pub const LONG_TYPE_ID: TypeExprId = TypeExprId(6);
pub const SHORT_TYPE_ID: TypeExprId = TypeExprId(7);
pub const VOID_TYPE_ID: TypeExprId = TypeExprId(8);
/// `java.lang.Object`; the fallback for unknowable generic context.
pub const OBJECT_TYPE_ID: TypeExprId = TypeExprId(9);
/// `java.lang.Class`; the platform's runtime type value.
pub const CLASS_TYPE_ID: TypeExprId = TypeExprId(10);
/// Marker standing in for nullable-of-reference under `TrueOrMarker`.
pub const NULLABLE_MARKER_TYPE_ID: TypeExprId = TypeExprId(11);
/// `java.lang.Class[]`; the shape of packed runtime slots.
pub const CLASS_ARRAY_TYPE_ID: TypeExprId = TypeExprId(12);
/// `int[]`; the dimensions argument of reflective multi-dim allocation.
pub const INT_ARRAY_TYPE_ID: TypeExprId = TypeExprId(13);

pub const OBJECT_CLASS_NAME: &str = "java.lang.Object";
pub const CLASS_CLASS_NAME: &str = "java.lang.Class";
pub const NULLABLE_MARKER_CLASS_NAME: &str = "dx.internal.NullableMarker";

/// Declared type definition, as the frontend resolved it. Read-only during
/// lowering.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: NameId,
    pub generic_param_count: u32,
    /// Imported platform type, outside compiler control; its bound generic
    /// arguments are unknowable at runtime.
    pub is_foreign: bool,
    /// The nullable wrapper itself (`Nullable<T>` in the source language).
    pub is_nullable_wrapper: bool,
    /// Per-type annotation silencing the type-initializer fallback warning.
    pub suppress_initializer_warning: bool,
    /// The `Reference` expression naming this definition.
    pub expr: TypeExprId,
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: NameId,
    pub declaring_type: TypeDefId,
    pub is_static: bool,
    pub is_constructor: bool,
    /// Platform-intrinsic; its call sites are never augmented.
    pub is_native: bool,
    pub generic_param_count: u32,
    /// Whether the body reads its declaring type's bound generic arguments.
    pub needs_type_args: bool,
    /// Whether the body reads its own method-level bound generic arguments.
    pub needs_method_args: bool,
}

/// A use-site reference to a method or constructor. `declaring_type` is the
/// reference actually invoked (possibly a closed generic instance), not the
/// definition. `resolved` is `None` when the frontend could not resolve the
/// reference; such sites are left unaugmented.
#[derive(Debug, Clone)]
pub struct MethodRef {
    pub declaring_type: TypeExprId,
    pub resolved: Option<MethodDefId>,
    /// Bound method-level generic arguments at this use site; empty for
    /// non-generic (or open) references.
    pub method_args: SV4<TypeExprId>,
}

/// Owns the type-expression pool, the definition tables, and the descriptor
/// memoization cache. The single source of type identity for one compilation.
pub struct TypeStore {
    pub names: Names,
    type_exprs: Vec<TypeExpr>,
    type_defs: Vec<TypeDef>,
    method_defs: Vec<MethodDef>,
    method_refs: Vec<MethodRef>,
    def_by_name: FxHashMap<NameId, TypeDefId>,
    ref_exprs: FxHashMap<NameId, TypeExprId>,
    /// Full-mode descriptor memoization, keyed by node identity.
    /// Recomputation is idempotent, so concurrent first-writers racing on one
    /// key would produce identical content; within this crate all writes go
    /// through `&mut`.
    pub(crate) descriptor_cache: FxHashMap<TypeExprId, EcoString>,
}

impl TypeStore {
    pub fn new() -> TypeStore {
        let mut store = TypeStore {
            names: Names::new(),
            type_exprs: Vec::with_capacity(256),
            type_defs: Vec::new(),
            method_defs: Vec::new(),
            method_refs: Vec::new(),
            def_by_name: FxHashMap::default(),
            ref_exprs: FxHashMap::default(),
            descriptor_cache: FxHashMap::default(),
        };
        // Seed order matches the const ids above.
        for kind in PrimitiveKind::ALL {
            store.type_exprs.push(TypeExpr::Primitive(kind));
        }
        let object = store.reference(OBJECT_CLASS_NAME);
        debug_assert_eq!(object, OBJECT_TYPE_ID);
        let class = store.reference(CLASS_CLASS_NAME);
        debug_assert_eq!(class, CLASS_TYPE_ID);
        let marker = store.reference(NULLABLE_MARKER_CLASS_NAME);
        debug_assert_eq!(marker, NULLABLE_MARKER_TYPE_ID);
        let class_array = store.array(CLASS_TYPE_ID, 1);
        debug_assert_eq!(class_array, CLASS_ARRAY_TYPE_ID);
        let int_array = store.array(INT_TYPE_ID, 1);
        debug_assert_eq!(int_array, INT_ARRAY_TYPE_ID);
        store
    }

    pub fn get(&self, id: TypeExprId) -> &TypeExpr {
        &self.type_exprs[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: TypeExprId) -> &mut TypeExpr {
        &mut self.type_exprs[id.0 as usize]
    }

    pub(crate) fn add_type_expr(&mut self, expr: TypeExpr) -> TypeExprId {
        let id = TypeExprId(self.type_exprs.len() as u32);
        self.type_exprs.push(expr);
        id
    }

    pub fn primitive(&self, kind: PrimitiveKind) -> TypeExprId {
        match kind {
            PrimitiveKind::Bool => BOOL_TYPE_ID,
            PrimitiveKind::Byte => BYTE_TYPE_ID,
            PrimitiveKind::Char => CHAR_TYPE_ID,
            PrimitiveKind::Double => DOUBLE_TYPE_ID,
            PrimitiveKind::Float => FLOAT_TYPE_ID,
            PrimitiveKind::Int => INT_TYPE_ID,
            PrimitiveKind::Long => LONG_TYPE_ID,
            PrimitiveKind::Short => SHORT_TYPE_ID,
            PrimitiveKind::Void => VOID_TYPE_ID,
        }
    }

    /// Reference nodes are deduplicated by name so descriptor memoization
    /// hits across use sites.
    pub fn reference(&mut self, name: impl AsRef<str>) -> TypeExprId {
        let name = self.names.intern(name);
        if let Some(id) = self.ref_exprs.get(&name) {
            return *id;
        }
        let id = self.add_type_expr(TypeExpr::Reference { name });
        self.ref_exprs.insert(name, id);
        id
    }

    pub fn array(&mut self, element: TypeExprId, rank: u32) -> TypeExprId {
        debug_assert!(rank >= 1);
        self.add_type_expr(TypeExpr::Array { element, rank })
    }

    pub fn generic_param(&mut self, owner: ParamOwner, position: u32) -> TypeExprId {
        self.add_type_expr(TypeExpr::GenericParam { owner, position })
    }

    pub fn generic_instance(
        &mut self,
        definition: TypeExprId,
        args: impl IntoIterator<Item = TypeExprId>,
    ) -> TypeExprId {
        let args: SV4<TypeExprId> = args.into_iter().collect();
        self.add_type_expr(TypeExpr::GenericInstance { definition, args })
    }

    pub fn boxed_primitive(&mut self, kind: PrimitiveKind) -> TypeExprId {
        self.reference(kind.boxed_class_name())
    }

    pub fn add_type_def(
        &mut self,
        name: impl AsRef<str>,
        generic_param_count: u32,
        is_foreign: bool,
    ) -> TypeDefId {
        let expr = self.reference(name.as_ref());
        let name = self.names.intern(name);
        let id = TypeDefId(self.type_defs.len() as u32);
        self.type_defs.push(TypeDef {
            name,
            generic_param_count,
            is_foreign,
            is_nullable_wrapper: false,
            suppress_initializer_warning: false,
            expr,
        });
        self.def_by_name.insert(name, id);
        id
    }

    pub fn get_type_def(&self, id: TypeDefId) -> &TypeDef {
        &self.type_defs[id.0 as usize]
    }

    pub fn get_type_def_mut(&mut self, id: TypeDefId) -> &mut TypeDef {
        &mut self.type_defs[id.0 as usize]
    }

    pub fn add_method_def(&mut self, def: MethodDef) -> MethodDefId {
        let id = MethodDefId(self.method_defs.len() as u32);
        self.method_defs.push(def);
        id
    }

    pub fn get_method_def(&self, id: MethodDefId) -> &MethodDef {
        &self.method_defs[id.0 as usize]
    }

    pub fn add_method_ref(&mut self, mref: MethodRef) -> MethodRefId {
        let id = MethodRefId(self.method_refs.len() as u32);
        self.method_refs.push(mref);
        id
    }

    pub fn get_method_ref(&self, id: MethodRefId) -> &MethodRef {
        &self.method_refs[id.0 as usize]
    }

    /// Oracle query: the definition a reference resolves to, if any.
    pub fn resolve_method(&self, id: MethodRefId) -> Option<MethodDefId> {
        self.get_method_ref(id).resolved
    }

    /// Oracle query: the definition a type expression names, looking through
    /// generic instances. `None` for primitives, arrays, parameters, and
    /// references the frontend never declared.
    pub fn type_def_of(&self, ty: TypeExprId) -> Option<TypeDefId> {
        match self.get(ty) {
            TypeExpr::Reference { name } => self.def_by_name.get(name).copied(),
            TypeExpr::GenericInstance { definition, .. } => self.type_def_of(*definition),
            _ => None,
        }
    }

    /// Whether a type expression mentions any generic parameter or instance;
    /// the new-array rewrite triggers on non-concrete element types.
    pub fn contains_generics(&self, ty: TypeExprId) -> bool {
        match self.get(ty) {
            TypeExpr::Primitive(_) => false,
            TypeExpr::Reference { .. } => false,
            TypeExpr::Array { element, .. } => self.contains_generics(*element),
            TypeExpr::GenericParam { .. } => true,
            TypeExpr::GenericInstance { .. } => true,
        }
    }

    /// Render a type expression for diagnostics.
    pub fn type_expr_to_string(&self, ty: TypeExprId) -> String {
        match self.get(ty) {
            TypeExpr::Primitive(kind) => kind.to_string(),
            TypeExpr::Reference { name } => self.names.get(*name).to_string(),
            TypeExpr::Array { element, rank } => {
                if *element == TypeExprId::PENDING {
                    return "<pending>[]".to_string();
                }
                let mut s = self.type_expr_to_string(*element);
                for _ in 0..*rank {
                    s.push_str("[]");
                }
                s
            }
            TypeExpr::GenericParam { owner, position } => match owner {
                ParamOwner::Type(t) => {
                    format!("{}!{}", self.names.get(self.get_type_def(*t).name), position)
                }
                ParamOwner::Method(m) => {
                    format!("{}!!{}", self.names.get(self.get_method_def(*m).name), position)
                }
            },
            TypeExpr::GenericInstance { definition, args } => {
                let args = args.iter().map(|a| self.type_expr_to_string(*a)).join(", ");
                format!("{}<{}>", self.type_expr_to_string(*definition), args)
            }
        }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        TypeStore::new()
    }
}
