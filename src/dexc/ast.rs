//! The expression AST surface the lowering pass consumes: code + operand +
//! child arguments per node, depth-first enumeration by predicate, in-place
//! wholesale replacement, and append-and-count on argument lists.

use smallvec::smallvec;

use crate::SV4;
use crate::span::SpanId;
use crate::types::{MethodRefId, TypeExprId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

/// Runtime library entry points the lowered code calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeHelper {
    /// `(element class) -> array class`, single dimension.
    ArrayOf,
    /// `(element class, rank) -> array class`.
    ArrayOfRank,
    /// `(definition class, bound args...) -> cached proxy` for the closed
    /// instantiation.
    InternGenericInstance,
    /// Strips markers and proxies, boxing where the platform requires a
    /// reference; yields a genuine platform type object.
    EnsureRuntimeType,
    /// `(class, value) -> bool`.
    IsInstance,
    /// `(element class, length) -> array object`.
    ReflectNewArray,
    /// `(element class, int[] dimensions) -> array object`.
    ReflectNewMultiArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Int(i32),
    Type(TypeExprId),
    Method(MethodRefId),
    Helper(RuntimeHelper),
    /// Index of an individually-addressed runtime slot.
    Slot(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstCode {
    // Surface codes the lowering matches on.
    LdcI4,
    Call,
    NewObj,
    NewArr,
    TypeOf,
    InstanceOf,
    Delegate,
    // Codes emitted by lowering.
    BoxedTypeOf,
    CastClass,
    LdElemRef,
    InitArrayFromArguments,
    CallHelper,
    /// Packed per-instance field holding the declaring type's bound
    /// arguments as one array.
    LdGenericInstanceFieldArray,
    /// Individually-slotted per-instance field; slot index in the operand.
    LdGenericInstanceField,
    /// Packed per-call hidden argument carrying the declaring type's bound
    /// arguments into a static method.
    LdGenericTypeArgArray,
    LdGenericTypeArg,
    /// Packed per-call hidden argument carrying a generic method's own
    /// bound arguments.
    LdGenericMethodArgArray,
    LdGenericMethodArg,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub code: AstCode,
    pub operand: Operand,
    pub args: SV4<ExprId>,
    pub expected_type: Option<TypeExprId>,
    pub span: SpanId,
    /// How many trailing arguments were appended by lowering; downstream
    /// code generation must distinguish synthetic from user-supplied
    /// arguments.
    pub synthetic_args: u32,
}

impl Expr {
    pub fn new(code: AstCode, operand: Operand, span: SpanId) -> Expr {
        Expr { code, operand, args: smallvec![], expected_type: None, span, synthetic_args: 0 }
    }

    pub fn with_args(
        code: AstCode,
        operand: Operand,
        args: impl IntoIterator<Item = ExprId>,
        span: SpanId,
    ) -> Expr {
        Expr {
            code,
            operand,
            args: args.into_iter().collect(),
            expected_type: None,
            span,
            synthetic_args: 0,
        }
    }

    pub fn typed(mut self, ty: TypeExprId) -> Expr {
        self.expected_type = Some(ty);
        self
    }

    pub fn operand_type(&self) -> Option<TypeExprId> {
        match self.operand {
            Operand::Type(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn operand_method(&self) -> Option<MethodRefId> {
        match self.operand {
            Operand::Method(m) => Some(m),
            _ => None,
        }
    }
}

pub struct Exprs {
    exprs: Vec<Expr>,
}

impl Exprs {
    pub fn new() -> Exprs {
        Exprs { exprs: Vec::with_capacity(64) }
    }

    pub fn add(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    /// Depth-first enumeration of `root` and its children, collecting the
    /// ids whose node matches `pred`. Collecting before mutating keeps the
    /// pass from revisiting nodes it spliced in itself.
    pub fn collect_matching(
        &self,
        root: ExprId,
        pred: impl Fn(&Expr) -> bool,
    ) -> Vec<ExprId> {
        let mut out = Vec::new();
        self.visit(root, &mut |id, expr| {
            if pred(expr) {
                out.push(id);
            }
        });
        out
    }

    fn visit(&self, id: ExprId, f: &mut impl FnMut(ExprId, &Expr)) {
        let expr = self.get(id);
        f(id, expr);
        for arg in &expr.args {
            self.visit(*arg, f);
        }
    }

    /// Wholesale in-place replacement of a node's content from another
    /// expression tree. The node keeps its identity; parents are untouched.
    pub fn replace(&mut self, target: ExprId, with: Expr) {
        *self.get_mut(target) = with;
    }

    /// Append a synthetic trailing argument and bump the node's counter.
    pub fn push_synthetic_arg(&mut self, target: ExprId, arg: ExprId) {
        let expr = self.get_mut(target);
        expr.args.push(arg);
        expr.synthetic_args += 1;
    }
}

impl Default for Exprs {
    fn default() -> Self {
        Exprs::new()
    }
}
