// Copyright (c) 2025 knix
// All rights reserved.

//! Generic instantiation lowering: rewrites every generics-reflective
//! construct (type-of, instance-of, array/object creation over type
//! parameters) into an explicit runtime computation of the bound type
//! arguments, and appends the synthetic trailing arguments callees need to
//! reconstruct their own generic context on an erased-generics target.
//!
//! The pass walks one method body at a time, has no cross-body mutable
//! state, and must be applied exactly once per body; its output is not a
//! fixpoint.


use std::error::Error;
use std::fmt::{Display, Formatter};

use colored::Colorize;
use log::{debug, warn};
use smallvec::smallvec;

use crate::SV4;
use crate::ast::{AstCode, Expr, ExprId, Exprs, Operand, RuntimeHelper};
use crate::span::{SpanId, Spans};
use crate::types::{
    BOOL_TYPE_ID, CLASS_ARRAY_TYPE_ID, CLASS_TYPE_ID, INT_ARRAY_TYPE_ID, INT_TYPE_ID,
    MethodRef, NULLABLE_MARKER_TYPE_ID, OBJECT_TYPE_ID, ParamOwner, TypeDefId, TypeExpr,
    TypeExprId, TypeStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warn,
    Info,
    Hint,
}

impl Display for ErrorLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorLevel::Error => f.write_str("error"),
            ErrorLevel::Warn => f.write_str("warn"),
            ErrorLevel::Info => f.write_str("info"),
            ErrorLevel::Hint => f.write_str("hint"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LowerError {
    pub message: String,
    pub span: SpanId,
    pub level: ErrorLevel,
}

impl LowerError {
    fn make(message: impl AsRef<str>, span: SpanId) -> LowerError {
        LowerError { message: message.as_ref().to_owned(), span, level: ErrorLevel::Error }
    }
}

impl Display for LowerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("lower error: {}", self.message))
    }
}

impl Error for LowerError {}

pub type LowerResult<A> = Result<A, LowerError>;

pub fn make_error<T: AsRef<str>>(message: T, span: SpanId) -> LowerError {
    LowerError::make(message.as_ref(), span)
}

pub fn make_fail_span<A, T: AsRef<str>>(message: T, span: SpanId) -> LowerResult<A> {
    Err(make_error(message, span))
}

#[macro_export]
macro_rules! errf {
    ($span:expr, $($format_args:expr),* $(,)?) => {
        {
            let s: String = format!($($format_args),*);
            make_error(&s, $span)
        }
    };
}

#[macro_export]
macro_rules! failf {
    ($span:expr, $($format_args:expr),* $(,)?) => {
        {
            let s: String = format!($($format_args),*);
            make_fail_span(&s, $span)
        }
    };
}

pub fn write_error(
    w: &mut impl std::io::Write,
    spans: &Spans,
    message: impl AsRef<str>,
    level: ErrorLevel,
    span: SpanId,
) -> std::io::Result<()> {
    let span = spans.get(span);
    let level_str = match level {
        ErrorLevel::Error => level.to_string().red(),
        ErrorLevel::Warn => level.to_string().yellow(),
        ErrorLevel::Info | ErrorLevel::Hint => level.to_string().normal(),
    };
    writeln!(w, "{} at {}:{}: {}", level_str, span.file_id, span.start, message.as_ref())
}

/// What the computed type value will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// The type's most natural runtime representation; no boxing or marker
    /// normalization.
    Identity,
    /// The value a generic algorithm should see as "the bound T": interned
    /// proxies for closed instances, markers for nullable, primitives stay
    /// unboxed.
    TrueOrMarker,
    /// A genuine platform type object fit for reflection, instance-of, and
    /// array allocation; never a marker or proxy.
    RuntimeType,
}

/// Packed-array-vs-individual-slot thresholds, one per owner kind.
/// Configured once for the whole compilation.
#[derive(Debug, Clone, Copy)]
pub struct LoweringOptions {
    pub type_param_threshold: u32,
    pub method_param_threshold: u32,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        LoweringOptions { type_param_threshold: 2, method_param_threshold: 2 }
    }
}

/// The method whose body is being lowered. Immutable for the duration of
/// that body.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext {
    pub declaring_type: TypeDefId,
    pub is_static: bool,
    /// Type initializers have neither an instance nor per-call hidden
    /// slots; generic context is unreachable there.
    pub is_type_initializer: bool,
    pub type_generic_param_count: u32,
    pub method_generic_param_count: u32,
}

pub struct GenericLowering<'a> {
    pub store: &'a mut TypeStore,
    pub exprs: &'a mut Exprs,
    pub options: LoweringOptions,
    /// Non-fatal diagnostics, collected rather than thrown.
    pub diagnostics: Vec<LowerError>,
}

impl<'a> GenericLowering<'a> {
    pub fn new(
        store: &'a mut TypeStore,
        exprs: &'a mut Exprs,
        options: LoweringOptions,
    ) -> GenericLowering<'a> {
        GenericLowering { store, exprs, options, diagnostics: Vec::new() }
    }

    /// Lower one method body rooted at `root`. Matching nodes are collected
    /// up front per sub-pass, so nodes spliced in by the pass itself are
    /// never revisited.
    pub fn run(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        self.expand_type_of(root, ctx)?;
        self.expand_instance_of(root, ctx)?;
        self.expand_new_array(root, ctx)?;
        self.augment_calls(root, ctx)?;
        self.augment_delegates(root, ctx)?;
        self.expand_new_object(root, ctx)?;
        Ok(())
    }

    fn expand_type_of(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        for node in self.exprs.collect_matching(root, |e| e.code == AstCode::TypeOf) {
            let span = self.exprs.get(node).span;
            let Some(ty) = self.exprs.get(node).operand_type() else {
                return failf!(span, "type-of node carries no type operand");
            };
            let load = self.load_type(span, ctx, ty, ConversionMode::TrueOrMarker)?;
            let content = self.exprs.get(load).clone();
            self.exprs.replace(node, content);
        }
        Ok(())
    }

    fn expand_instance_of(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        for node in self.exprs.collect_matching(root, |e| e.code == AstCode::InstanceOf) {
            let expr = self.exprs.get(node);
            let span = expr.span;
            let Some(ty) = expr.operand_type() else {
                return failf!(span, "instance-of node carries no type operand");
            };
            if !matches!(self.store.get(ty), TypeExpr::GenericParam { .. }) {
                continue;
            }
            let Some(value) = expr.args.first().copied() else {
                return failf!(span, "instance-of node has no tested value");
            };
            let loaded = self.load_type(span, ctx, ty, ConversionMode::RuntimeType)?;
            let call = Expr::with_args(
                AstCode::CallHelper,
                Operand::Helper(RuntimeHelper::IsInstance),
                [loaded, value],
                span,
            )
            .typed(BOOL_TYPE_ID);
            self.exprs.replace(node, call);
        }
        Ok(())
    }

    fn expand_new_array(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        for node in self.exprs.collect_matching(root, |e| e.code == AstCode::NewArr) {
            let expr = self.exprs.get(node);
            let span = expr.span;
            let Some(element) = expr.operand_type() else {
                return failf!(span, "new-array node carries no element type operand");
            };
            // Concrete element types allocate directly downstream.
            if !self.store.contains_generics(element) {
                continue;
            }
            let Some(length) = expr.args.first().copied() else {
                return failf!(span, "new-array node has no length argument");
            };
            let loaded = self.load_type(span, ctx, element, ConversionMode::RuntimeType)?;
            let alloc = self.exprs.add(
                Expr::with_args(
                    AstCode::CallHelper,
                    Operand::Helper(RuntimeHelper::ReflectNewArray),
                    [loaded, length],
                    span,
                )
                .typed(OBJECT_TYPE_ID),
            );
            let array_ty = self.store.array(element, 1);
            let cast =
                Expr::with_args(AstCode::CastClass, Operand::Type(array_ty), [alloc], span)
                    .typed(array_ty);
            self.exprs.replace(node, cast);
        }
        Ok(())
    }

    fn augment_calls(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        for node in self.exprs.collect_matching(root, |e| e.code == AstCode::Call) {
            let span = self.exprs.get(node).span;
            let Some(mref_id) = self.exprs.get(node).operand_method() else {
                return failf!(span, "call node carries no method operand");
            };
            let mref = self.store.get_method_ref(mref_id).clone();
            // Array pseudo-methods are handled structurally, never as
            // generic calls.
            if self.store.get(mref.declaring_type).is_array() {
                continue;
            }
            let Some(def_id) = mref.resolved else {
                debug!("unresolvable callee at call site; leaving unaugmented");
                continue;
            };
            let def = self.store.get_method_def(def_id).clone();
            if def.is_native {
                continue;
            }
            if def.needs_type_args {
                self.append_type_binding(node, span, ctx, &mref)?;
            }
            if def.needs_method_args {
                self.append_method_binding(node, span, ctx, &mref)?;
            }
        }
        Ok(())
    }

    fn augment_delegates(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        for node in self.exprs.collect_matching(root, |e| e.code == AstCode::Delegate) {
            let span = self.exprs.get(node).span;
            let Some(mref_id) = self.exprs.get(node).operand_method() else {
                return failf!(span, "delegate node carries no method operand");
            };
            let mref = self.store.get_method_ref(mref_id).clone();
            let Some(def_id) = mref.resolved else {
                debug!("unresolvable delegate target; leaving unaugmented");
                continue;
            };
            let def = self.store.get_method_def(def_id).clone();
            let type_is_closed =
                matches!(self.store.get(mref.declaring_type), TypeExpr::GenericInstance { .. });
            // Instance-bound delegates recover the declaring type's
            // arguments from the receiver; only static-bound targets need
            // them threaded through.
            if type_is_closed && def.is_static {
                self.append_type_binding(node, span, ctx, &mref)?;
            }
            if !mref.method_args.is_empty() {
                self.append_method_binding(node, span, ctx, &mref)?;
            }
        }
        Ok(())
    }

    fn expand_new_object(&mut self, root: ExprId, ctx: &MethodContext) -> LowerResult<()> {
        for node in self.exprs.collect_matching(root, |e| e.code == AstCode::NewObj) {
            let span = self.exprs.get(node).span;
            let Some(mref_id) = self.exprs.get(node).operand_method() else {
                return failf!(span, "new-object node carries no constructor operand");
            };
            let mref = self.store.get_method_ref(mref_id).clone();
            let declaring = mref.declaring_type;
            if let TypeExpr::Array { element, .. } = *self.store.get(declaring) {
                // Multi-dimensional array construction: reflective
                // allocation from the constructor's dimension arguments.
                let elem_load = self.load_type(span, ctx, element, ConversionMode::Identity)?;
                let dims = self.exprs.get(node).args.clone();
                let dims_array = self.exprs.add(
                    Expr::with_args(
                        AstCode::InitArrayFromArguments,
                        Operand::Type(INT_ARRAY_TYPE_ID),
                        dims,
                        span,
                    )
                    .typed(INT_ARRAY_TYPE_ID),
                );
                let alloc = self.exprs.add(
                    Expr::with_args(
                        AstCode::CallHelper,
                        Operand::Helper(RuntimeHelper::ReflectNewMultiArray),
                        [elem_load, dims_array],
                        span,
                    )
                    .typed(OBJECT_TYPE_ID),
                );
                let cast =
                    Expr::with_args(AstCode::CastClass, Operand::Type(declaring), [alloc], span)
                        .typed(declaring);
                self.exprs.replace(node, cast);
            } else {
                let Some(def_id) = mref.resolved else {
                    debug!("unresolvable constructor; leaving unaugmented");
                    continue;
                };
                let def = self.store.get_method_def(def_id).clone();
                if def.is_native {
                    continue;
                }
                if def.needs_type_args {
                    self.append_type_binding(node, span, ctx, &mref)?;
                }
            }
        }
        Ok(())
    }

    /// Append the declaring type's bound arguments as synthetic trailing
    /// argument(s). The oracle's needs-flag is authoritative: a reference
    /// that is not actually a generic instance here is an internal
    /// consistency failure.
    fn append_type_binding(
        &mut self,
        node: ExprId,
        span: SpanId,
        ctx: &MethodContext,
        mref: &MethodRef,
    ) -> LowerResult<()> {
        let TypeExpr::GenericInstance { args, .. } = self.store.get(mref.declaring_type).clone()
        else {
            return failf!(
                span,
                "{} is not a generic instance",
                self.store.type_expr_to_string(mref.declaring_type)
            );
        };
        self.append_binding(node, span, ctx, &args, self.options.type_param_threshold)
    }

    /// Append the invoked method's own bound arguments as synthetic
    /// trailing argument(s).
    fn append_method_binding(
        &mut self,
        node: ExprId,
        span: SpanId,
        ctx: &MethodContext,
        mref: &MethodRef,
    ) -> LowerResult<()> {
        if mref.method_args.is_empty() {
            return failf!(
                span,
                "call of {} binds no method-level generic arguments",
                self.store.type_expr_to_string(mref.declaring_type)
            );
        }
        let args = mref.method_args.clone();
        self.append_binding(node, span, ctx, &args, self.options.method_param_threshold)
    }

    fn append_binding(
        &mut self,
        node: ExprId,
        span: SpanId,
        ctx: &MethodContext,
        args: &[TypeExprId],
        threshold: u32,
    ) -> LowerResult<()> {
        let mut loaded: SV4<ExprId> = smallvec![];
        for arg in args {
            loaded.push(self.load_type(span, ctx, *arg, ConversionMode::TrueOrMarker)?);
        }
        if args.len() as u32 <= threshold {
            for expr in loaded {
                self.exprs.push_synthetic_arg(node, expr);
            }
        } else {
            let packed = self.exprs.add(
                Expr::with_args(
                    AstCode::InitArrayFromArguments,
                    Operand::Type(CLASS_ARRAY_TYPE_ID),
                    loaded,
                    span,
                )
                .typed(CLASS_ARRAY_TYPE_ID),
            );
            self.exprs.push_synthetic_arg(node, packed);
        }
        Ok(())
    }

    /// Build a side-effect-free expression whose evaluation at runtime
    /// yields the given type's value under the requested conversion mode.
    pub fn load_type(
        &mut self,
        span: SpanId,
        ctx: &MethodContext,
        ty: TypeExprId,
        mode: ConversionMode,
    ) -> LowerResult<ExprId> {
        self.load_type_inner(span, ctx, ty, mode, false)
    }

    fn load_type_inner(
        &mut self,
        span: SpanId,
        ctx: &MethodContext,
        ty: TypeExprId,
        mode: ConversionMode,
        boxed_context: bool,
    ) -> LowerResult<ExprId> {
        match self.store.get(ty).clone() {
            TypeExpr::Array { element, rank } => {
                // Array elements live in a reference position.
                let elem = self.load_type_inner(span, ctx, element, mode, true)?;
                if rank == 1 {
                    Ok(self.exprs.add(
                        Expr::with_args(
                            AstCode::CallHelper,
                            Operand::Helper(RuntimeHelper::ArrayOf),
                            [elem],
                            span,
                        )
                        .typed(CLASS_TYPE_ID),
                    ))
                } else {
                    let rank_lit = self.exprs.add(
                        Expr::new(AstCode::LdcI4, Operand::Int(rank as i32), span)
                            .typed(INT_TYPE_ID),
                    );
                    Ok(self.exprs.add(
                        Expr::with_args(
                            AstCode::CallHelper,
                            Operand::Helper(RuntimeHelper::ArrayOfRank),
                            [elem, rank_lit],
                            span,
                        )
                        .typed(CLASS_TYPE_ID),
                    ))
                }
            }
            TypeExpr::GenericParam { owner: ParamOwner::Type(owner), position } => {
                let owner_def = self.store.get_type_def(owner).clone();
                if owner_def.is_foreign {
                    // The true argument is unknowable outside compiler
                    // control.
                    return Ok(self.type_of(OBJECT_TYPE_ID, span));
                }
                if ctx.is_type_initializer {
                    if !owner_def.suppress_initializer_warning {
                        let message = format!(
                            "type initializer of {} uses a generic parameter; it will always see Object",
                            self.store.names.get(owner_def.name)
                        );
                        warn!("{message}");
                        self.diagnostics.push(LowerError {
                            message,
                            span,
                            level: ErrorLevel::Warn,
                        });
                    }
                    return Ok(self.type_of(OBJECT_TYPE_ID, span));
                }
                let loaded = if ctx.is_static {
                    self.slot_read(
                        span,
                        AstCode::LdGenericTypeArg,
                        AstCode::LdGenericTypeArgArray,
                        ctx.type_generic_param_count,
                        self.options.type_param_threshold,
                        position,
                    )
                } else {
                    self.slot_read(
                        span,
                        AstCode::LdGenericInstanceField,
                        AstCode::LdGenericInstanceFieldArray,
                        ctx.type_generic_param_count,
                        self.options.type_param_threshold,
                        position,
                    )
                };
                Ok(self.normalize(loaded, mode, span))
            }
            TypeExpr::GenericParam { owner: ParamOwner::Method(owner), position } => {
                let owner_def = self.store.get_method_def(owner).clone();
                if self.store.get_type_def(owner_def.declaring_type).is_foreign {
                    // Recurse through Object so mode normalization still
                    // applies.
                    return self.load_type_inner(span, ctx, OBJECT_TYPE_ID, mode, boxed_context);
                }
                let loaded = self.slot_read(
                    span,
                    AstCode::LdGenericMethodArg,
                    AstCode::LdGenericMethodArgArray,
                    ctx.method_generic_param_count,
                    self.options.method_param_threshold,
                    position,
                );
                Ok(self.normalize(loaded, mode, span))
            }
            TypeExpr::GenericInstance { definition, args } => {
                let nullable = self
                    .store
                    .type_def_of(definition)
                    .is_some_and(|d| self.store.get_type_def(d).is_nullable_wrapper);
                if mode == ConversionMode::TrueOrMarker && nullable && !args.is_empty() {
                    // The marker distinguishes nullable-of-primitive from
                    // nullable-of-reference for generic algorithms.
                    return match self.store.get(args[0]).as_primitive() {
                        Some(kind) => {
                            let prim = self.store.primitive(kind);
                            Ok(self.exprs.add(
                                Expr::new(AstCode::BoxedTypeOf, Operand::Type(prim), span)
                                    .typed(CLASS_TYPE_ID),
                            ))
                        }
                        None => Ok(self.type_of(NULLABLE_MARKER_TYPE_ID, span)),
                    };
                }
                let def_load = self.load_type_inner(span, ctx, definition, mode, boxed_context)?;
                if mode != ConversionMode::TrueOrMarker || nullable {
                    return Ok(def_load);
                }
                // Closed instantiation: intern a proxy carrying the bound
                // arguments.
                let mut call_args: SV4<ExprId> = smallvec![def_load];
                let mut loaded: SV4<ExprId> = smallvec![];
                for arg in &args {
                    loaded.push(self.load_type(span, ctx, *arg, ConversionMode::TrueOrMarker)?);
                }
                if args.len() as u32 <= self.options.type_param_threshold {
                    call_args.extend(loaded);
                } else {
                    let packed = self.exprs.add(
                        Expr::with_args(
                            AstCode::InitArrayFromArguments,
                            Operand::Type(CLASS_ARRAY_TYPE_ID),
                            loaded,
                            span,
                        )
                        .typed(CLASS_ARRAY_TYPE_ID),
                    );
                    call_args.push(packed);
                }
                Ok(self.exprs.add(
                    Expr::with_args(
                        AstCode::CallHelper,
                        Operand::Helper(RuntimeHelper::InternGenericInstance),
                        call_args,
                        span,
                    )
                    .typed(CLASS_TYPE_ID),
                ))
            }
            TypeExpr::Primitive(_) => {
                if boxed_context || mode == ConversionMode::RuntimeType {
                    Ok(self.exprs.add(
                        Expr::new(AstCode::BoxedTypeOf, Operand::Type(ty), span)
                            .typed(CLASS_TYPE_ID),
                    ))
                } else {
                    Ok(self.type_of(ty, span))
                }
            }
            TypeExpr::Reference { .. } => Ok(self.type_of(ty, span)),
        }
    }

    /// Read one generic argument out of its runtime slot: a direct slot
    /// read when the owner's parameter count is within the threshold, an
    /// index into the packed array slot otherwise.
    fn slot_read(
        &mut self,
        span: SpanId,
        individual: AstCode,
        packed: AstCode,
        param_count: u32,
        threshold: u32,
        position: u32,
    ) -> ExprId {
        if param_count <= threshold {
            self.exprs
                .add(Expr::new(individual, Operand::Slot(position), span).typed(CLASS_TYPE_ID))
        } else {
            let base =
                self.exprs.add(Expr::new(packed, Operand::None, span).typed(CLASS_ARRAY_TYPE_ID));
            let index = self.exprs.add(
                Expr::new(AstCode::LdcI4, Operand::Int(position as i32), span).typed(INT_TYPE_ID),
            );
            self.exprs.add(
                Expr::with_args(AstCode::LdElemRef, Operand::None, [base, index], span)
                    .typed(CLASS_TYPE_ID),
            )
        }
    }

    /// Slot reads can yield markers or interned proxies; under
    /// `RuntimeType` they are passed through the runtime's normalization
    /// helper, which strips both and boxes where required. Constant type
    /// loads are already genuine platform types and skip the wrap.
    fn normalize(&mut self, loaded: ExprId, mode: ConversionMode, span: SpanId) -> ExprId {
        if mode == ConversionMode::RuntimeType {
            self.exprs.add(
                Expr::with_args(
                    AstCode::CallHelper,
                    Operand::Helper(RuntimeHelper::EnsureRuntimeType),
                    [loaded],
                    span,
                )
                .typed(CLASS_TYPE_ID),
            )
        } else {
            loaded
        }
    }

    fn type_of(&mut self, ty: TypeExprId, span: SpanId) -> ExprId {
        self.exprs.add(Expr::new(AstCode::TypeOf, Operand::Type(ty), span).typed(CLASS_TYPE_ID))
    }
}
