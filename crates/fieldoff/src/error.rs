use crate::ty::Ty;

/// Failure kinds of registry lookup, layout computation and offset resolution.
///
/// None of these are retryable: layout is a pure function of the registry and
/// target, so a failing request fails identically every time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("struct {ty} has no member named `{member}`")]
    MemberNotFound { ty: Ty, member: String },

    #[error("type {ty} is not a struct")]
    NotAnAggregate { ty: Ty },

    #[error("layout of {ty} cannot be determined: {reason}")]
    UnresolvedType { ty: Ty, reason: String },

    #[error("member index {index} out of range for {ty} ({len} members)")]
    IndexOutOfRange { ty: Ty, index: usize, len: usize },

    #[error("size of {ty} exceeds the target address space")]
    SizeOverflow { ty: Ty },

    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl LayoutError {
    pub(crate) fn unresolved(ty: &Ty, reason: impl Into<String>) -> Self {
        LayoutError::UnresolvedType {
            ty: ty.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(ty: &Ty) -> Self {
        LayoutError::SizeOverflow { ty: ty.clone() }
    }
}
