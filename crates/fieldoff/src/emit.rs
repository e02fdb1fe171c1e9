//! Lowering of resolved offsets into Cranelift IR.
//!
//! Every function here appends to the block the caller's builder is currently
//! positioned in; nothing is emitted anywhere else.

use cranelift::prelude::*;

use crate::error::LayoutError;
use crate::layout::LayoutCx;
use crate::lex::Span;
use crate::offset::OffsetResult;
use crate::target::TargetLayout;
use crate::ty::Ty;
use crate::var::Variable;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitErrorKind {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("internal compiler error: builder has no current block")]
    NoInsertionPoint,

    #[error("variable `{0}` has no storage")]
    NoStorage(String),

    #[error("member `{member}` has aggregate type {ty} and cannot be stored as a scalar")]
    NotScalar { member: String, ty: Ty },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitError {
    pub span: Span,
    pub kind: EmitErrorKind,
}
impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.col, self.kind)
    }
}
impl std::error::Error for EmitError {}
fn eerr(span: Span, kind: impl Into<EmitErrorKind>) -> EmitError {
    EmitError {
        span,
        kind: kind.into(),
    }
}

/// A constant appended to the instruction stream: where it went, its type and
/// the SSA value holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub block: Block,
    pub ty: Ty,
    pub value: Value,
    pub offset: u64,
}

/// A member read out of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValue {
    Scalar(Value, Ty),
    Aggregate { addr: Value, ty: Ty },
}

/// Appends `result` as an `iconst` of the target's size type.
pub fn emit_offset(
    builder: &mut FunctionBuilder,
    target: &TargetLayout,
    result: &OffsetResult,
    span: Span,
) -> Result<Emitted, EmitError> {
    let block = builder
        .current_block()
        .ok_or_else(|| eerr(span, EmitErrorKind::NoInsertionPoint))?;
    // iconst takes the raw bit pattern; offsets never exceed the pointer width.
    let value = builder
        .ins()
        .iconst(target.size_cl_type(), result.offset as i64);
    Ok(Emitted {
        block,
        ty: result.size_ty.clone(),
        value,
        offset: result.offset,
    })
}

pub fn emit_offset_of(
    builder: &mut FunctionBuilder,
    cx: &LayoutCx,
    ty: &Ty,
    member: &str,
    span: Span,
) -> Result<Emitted, EmitError> {
    let result = cx.offset_of(ty, member).map_err(|e| eerr(span, e))?;
    emit_offset(builder, cx.target, &result, span)
}

pub fn emit_offset_of_index(
    builder: &mut FunctionBuilder,
    cx: &LayoutCx,
    ty: &Ty,
    index: usize,
    span: Span,
) -> Result<Emitted, EmitError> {
    let result = cx.offset_of_index(ty, index).map_err(|e| eerr(span, e))?;
    emit_offset(builder, cx.target, &result, span)
}

/// Appends the size of `ty` as an `iconst` of the target's size type.
pub fn emit_size_of(
    builder: &mut FunctionBuilder,
    cx: &LayoutCx,
    ty: &Ty,
    span: Span,
) -> Result<Emitted, EmitError> {
    let size = cx.size_of(ty).map_err(|e| eerr(span, e))?;
    let result = OffsetResult {
        offset: size,
        size_ty: cx.target.size_ty(),
    };
    emit_offset(builder, cx.target, &result, span)
}

fn member_slot(cx: &LayoutCx, ty: &Ty, member: &str) -> Result<(u64, Ty), LayoutError> {
    let index = cx.registry.resolve_member(ty, member)?;
    let field = cx
        .layout(ty)?
        .fields
        .get(index)
        .ok_or_else(|| LayoutError::Internal(format!("member {index} of {ty} vanished")))?;
    Ok((field.offset, field.ty.clone()))
}

fn base_of(var: &Variable, span: Span) -> Result<Value, EmitError> {
    var.value
        .ok_or_else(|| eerr(span, EmitErrorKind::NoStorage(var.name.clone())))
}

/// Address of `var.member`.
pub fn member_addr(
    builder: &mut FunctionBuilder,
    cx: &LayoutCx,
    var: &Variable,
    member: &str,
    span: Span,
) -> Result<Value, EmitError> {
    let base = base_of(var, span)?;
    let (offset, _) = member_slot(cx, &var.ty, member).map_err(|e| eerr(span, e))?;
    if offset == 0 {
        return Ok(base);
    }
    Ok(builder.ins().iadd_imm(base, offset as i64))
}

/// Splits `offset` into an (address, immediate) pair that fits a memory op.
fn addr_and_imm(builder: &mut FunctionBuilder, base: Value, offset: u64) -> (Value, i32) {
    match i32::try_from(offset) {
        Ok(imm) => (base, imm),
        Err(_) => (builder.ins().iadd_imm(base, offset as i64), 0),
    }
}

/// Loads a scalar member; aggregate members yield their address instead.
pub fn load_member(
    builder: &mut FunctionBuilder,
    cx: &LayoutCx,
    var: &Variable,
    member: &str,
    span: Span,
) -> Result<MemberValue, EmitError> {
    let base = base_of(var, span)?;
    let (offset, mty) = member_slot(cx, &var.ty, member).map_err(|e| eerr(span, e))?;
    match cx.target.scalar_cl_type(&mty) {
        Some(cl_ty) => {
            let (addr, imm) = addr_and_imm(builder, base, offset);
            let v = builder.ins().load(cl_ty, MemFlags::new(), addr, imm);
            Ok(MemberValue::Scalar(v, mty))
        }
        None => {
            let addr = if offset == 0 {
                base
            } else {
                builder.ins().iadd_imm(base, offset as i64)
            };
            Ok(MemberValue::Aggregate { addr, ty: mty })
        }
    }
}

pub fn store_member(
    builder: &mut FunctionBuilder,
    cx: &LayoutCx,
    var: &Variable,
    member: &str,
    val: Value,
    span: Span,
) -> Result<(), EmitError> {
    let base = base_of(var, span)?;
    let (offset, mty) = member_slot(cx, &var.ty, member).map_err(|e| eerr(span, e))?;
    if mty.is_aggregate() {
        return Err(eerr(
            span,
            EmitErrorKind::NotScalar {
                member: member.to_string(),
                ty: mty,
            },
        ));
    }
    let (addr, imm) = addr_and_imm(builder, base, offset);
    builder.ins().store(MemFlags::new(), val, addr, imm);
    Ok(())
}
