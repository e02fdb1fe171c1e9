use tracing::debug;

use crate::error::LayoutError;
use crate::layout::LayoutCx;
use crate::ty::Ty;

/// A resolved member offset and the type it is expressed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetResult {
    pub offset: u64,
    /// Always the target's canonical size type.
    pub size_ty: Ty,
}

impl<'a> LayoutCx<'a> {
    /// Byte offset of the member named `member` in struct `ty`.
    pub fn offset_of(&self, ty: &Ty, member: &str) -> Result<OffsetResult, LayoutError> {
        let index = self.registry.resolve_member(ty, member)?;
        let layout = self.layout(ty)?;
        let field = layout.fields.get(index).ok_or_else(|| {
            LayoutError::Internal(format!(
                "member `{member}` of {ty} resolved to index {index}, but the layout has {} members",
                layout.fields.len()
            ))
        })?;
        if field.name != member {
            return Err(LayoutError::Internal(format!(
                "member `{member}` of {ty} resolved to index {index}, which lays out `{}`",
                field.name
            )));
        }
        debug!(target: "layout", ty = %ty, member, index, offset = field.offset, "offsetof");
        Ok(OffsetResult {
            offset: field.offset,
            size_ty: self.target.size_ty(),
        })
    }

    /// Byte offset of the member at ordinal `index`, skipping name resolution.
    pub fn offset_of_index(&self, ty: &Ty, index: usize) -> Result<OffsetResult, LayoutError> {
        let offset = self.indexed_offset(ty, index)?;
        debug!(target: "layout", ty = %ty, index, offset, "offsetof by index");
        Ok(OffsetResult {
            offset,
            size_ty: self.target.size_ty(),
        })
    }
}
