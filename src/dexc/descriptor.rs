// Copyright (c) 2025 knix
// All rights reserved.

//! The canonical text encoding of types and method prototypes: the naming
//! format embedded in generated metadata and the identity key for overload
//! signatures. One fixed tag character per primitive kind, `[` for arrays,
//! `L<name>;` for references with the dotted namespace separator rewritten
//! to `/`. Full-mode encodings are memoized by node identity; shorty
//! encodings are cheap and context-insensitive, so they are never cached.

use anyhow::{Result, bail};
use ecow::EcoString;

use crate::types::{PrimitiveKind, TypeExpr, TypeExprId, TypeStore};

pub const ARRAY_TAG: char = '[';
pub const REFERENCE_TAG: char = 'L';
pub const REFERENCE_TERMINATOR: char = ';';
pub const NAMESPACE_SEPARATOR: char = '.';
pub const INTERNAL_SEPARATOR: char = '/';

pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

/// True for the single-character primitive tags, false for `[` and `L`.
pub fn is_primitive_tag(c: char) -> bool {
    PrimitiveKind::from_descriptor_char(c).is_some()
}

/// The fixed zero-equivalent of a primitive kind. `Void` has none, and
/// reference/array kinds are unrepresentable here by construction; callers
/// use the platform's absence sentinel for those.
pub fn default_value(kind: PrimitiveKind) -> Option<ConstValue> {
    let value = match kind {
        PrimitiveKind::Bool => ConstValue::Bool(false),
        PrimitiveKind::Byte => ConstValue::Byte(0),
        PrimitiveKind::Char => ConstValue::Char(0),
        PrimitiveKind::Double => ConstValue::Double(0.0),
        PrimitiveKind::Float => ConstValue::Float(0.0),
        PrimitiveKind::Int => ConstValue::Int(0),
        PrimitiveKind::Long => ConstValue::Long(0),
        PrimitiveKind::Short => ConstValue::Short(0),
        PrimitiveKind::Void => return None,
    };
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Byte(i8),
    Char(u16),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
}

fn shorty_reference_tag() -> EcoString {
    let mut result = EcoString::new();
    result.push(REFERENCE_TAG);
    result
}

impl TypeStore {
    /// Encode a type expression. Full mode (`shorty = false`) is memoized;
    /// recomputation is idempotent, so a cached value is always identical to
    /// a fresh one. Under shorty mode every reference and array kind
    /// collapses to the single reference tag.
    ///
    /// Generic parameters and instances encode by erasure: an instance as
    /// its definition, a parameter as `Object`.
    pub fn encode(&mut self, ty: TypeExprId, shorty: bool) -> EcoString {
        if !shorty {
            if let Some(cached) = self.descriptor_cache.get(&ty) {
                return cached.clone();
            }
        }
        let result = self.encode_uncached(ty, shorty);
        if !shorty {
            self.descriptor_cache.insert(ty, result.clone());
        }
        result
    }

    fn encode_uncached(&mut self, ty: TypeExprId, shorty: bool) -> EcoString {
        match self.get(ty).clone() {
            TypeExpr::Primitive(kind) => {
                let mut result = EcoString::new();
                result.push(kind.descriptor_char());
                result
            }
            TypeExpr::Array { element, .. } => {
                if shorty {
                    return shorty_reference_tag();
                }
                assert!(
                    element != TypeExprId::PENDING,
                    "encoding an unfilled array placeholder"
                );
                let mut result = EcoString::new();
                result.push(ARRAY_TAG);
                result.push_str(&self.encode(element, false));
                result
            }
            TypeExpr::Reference { name } => {
                if shorty {
                    return shorty_reference_tag();
                }
                let mut result = EcoString::new();
                result.push(REFERENCE_TAG);
                for c in self.names.get(name).chars() {
                    result
                        .push(if c == NAMESPACE_SEPARATOR { INTERNAL_SEPARATOR } else { c });
                }
                result.push(REFERENCE_TERMINATOR);
                result
            }
            TypeExpr::GenericParam { .. } => {
                if shorty {
                    shorty_reference_tag()
                } else {
                    EcoString::from(OBJECT_DESCRIPTOR)
                }
            }
            TypeExpr::GenericInstance { definition, .. } => self.encode(definition, shorty),
        }
    }

    /// The wire form of a method prototype: return type then each parameter,
    /// in declaration order.
    pub fn encode_prototype(
        &mut self,
        return_type: TypeExprId,
        params: &[TypeExprId],
        shorty: bool,
    ) -> EcoString {
        let mut result = self.encode(return_type, shorty);
        for param in params {
            result.push_str(&self.encode(*param, shorty));
        }
        result
    }

    /// Phase one of decoding: inspect only the leading tag and produce a
    /// node of the right kind without recursing. Arrays come back with a
    /// `PENDING` element and references with an empty name, so a batch of
    /// mutually-referential metadata entries can be wired up by identity
    /// before any entry's content is filled.
    ///
    /// Decoded reference nodes are transient: they are not entered in the
    /// by-name node index, so they never alias a frontend-created node.
    pub fn allocate_descriptor(&mut self, s: &str) -> Result<TypeExprId> {
        let Some(tag) = s.chars().next() else {
            bail!("empty type descriptor");
        };
        if let Some(kind) = PrimitiveKind::from_descriptor_char(tag) {
            return Ok(self.primitive(kind));
        }
        match tag {
            ARRAY_TAG => {
                Ok(self.add_type_expr(TypeExpr::Array { element: TypeExprId::PENDING, rank: 1 }))
            }
            REFERENCE_TAG => {
                let empty = self.names.intern("");
                Ok(self.add_type_expr(TypeExpr::Reference { name: empty }))
            }
            _ => bail!("invalid type descriptor tag '{tag}' in \"{s}\""),
        }
    }

    /// Phase two of decoding: recursively decode the remainder of `s` into
    /// the placeholder produced by [`TypeStore::allocate_descriptor`].
    /// Primitive singletons need no fill.
    pub fn fill_descriptor(&mut self, id: TypeExprId, s: &str) -> Result<()> {
        let Some(tag) = s.chars().next() else {
            bail!("empty type descriptor");
        };
        match tag {
            ARRAY_TAG => {
                let rest = &s[1..];
                let element = self.allocate_descriptor(rest)?;
                self.fill_descriptor(element, rest)?;
                match self.get_mut(id) {
                    TypeExpr::Array { element: slot, .. } => *slot = element,
                    other => bail!("array descriptor fill on non-array node {other:?}"),
                }
                Ok(())
            }
            REFERENCE_TAG => {
                if s.len() < 2 || !s.ends_with(REFERENCE_TERMINATOR) {
                    bail!("unterminated reference descriptor \"{s}\"");
                }
                let dotted =
                    s[1..s.len() - 1].replace(INTERNAL_SEPARATOR, &NAMESPACE_SEPARATOR.to_string());
                let name = self.names.intern(dotted);
                match self.get_mut(id) {
                    TypeExpr::Reference { name: slot } => *slot = name,
                    other => bail!("reference descriptor fill on non-reference node {other:?}"),
                }
                Ok(())
            }
            _ if is_primitive_tag(tag) => Ok(()),
            _ => bail!("invalid type descriptor tag '{tag}' in \"{s}\""),
        }
    }

    /// Decode a full-mode descriptor. Array descriptors carry a single `[`
    /// tag regardless of rank; the rank of a multi-dimensional array travels
    /// out-of-band, see [`TypeStore::decode_descriptor_ranked`].
    pub fn decode_descriptor(&mut self, s: &str) -> Result<TypeExprId> {
        self.decode_descriptor_ranked(s, 1)
    }

    /// Decode a descriptor whose array rank was recorded out-of-band.
    pub fn decode_descriptor_ranked(&mut self, s: &str, rank: u32) -> Result<TypeExprId> {
        let id = self.allocate_descriptor(s)?;
        self.fill_descriptor(id, s)?;
        if rank != 1 {
            match self.get_mut(id) {
                TypeExpr::Array { rank: slot, .. } => *slot = rank,
                other => bail!("rank {rank} given for non-array descriptor {other:?}"),
            }
        }
        Ok(id)
    }
}
