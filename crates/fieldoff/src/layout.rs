//! Size, alignment and member offsets of types on a given target.

use std::borrow::Cow;

use crate::error::LayoutError;
use crate::registry::{Registry, StructType};
use crate::target::TargetLayout;
use crate::ty::Ty;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: Ty,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub size: u64,
    pub align: u64,
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Rounds `n` up to a multiple of `align`; `None` on overflow.
pub fn align_up(n: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(n);
    }
    let rem = n % align;
    if rem == 0 {
        Some(n)
    } else {
        n.checked_add(align - rem)
    }
}

#[derive(Debug, Clone)]
enum Entry {
    /// Incomplete structs never get a layout.
    Pending,
    Ready(StructLayout),
    /// `member` could not be laid out; `root` is the first failure below it.
    Blocked {
        member: String,
        member_ty: Ty,
        root: LayoutError,
    },
}

/// Every struct of one registry laid out for one target, indexed like the
/// registry and filled in dependency order.
#[derive(Debug, Clone)]
pub(crate) struct LayoutTable {
    entries: Vec<Entry>,
}

impl LayoutTable {
    pub(crate) fn compute(registry: &Registry, target: &TargetLayout) -> Self {
        let mut table = Self {
            entries: vec![Entry::Pending; registry.len()],
        };
        for &i in registry.layout_order() {
            if let Some(st) = registry.by_index(i) {
                table.entries[i] = table.lay_out(registry, target, st);
            }
        }
        table
    }

    fn lay_out(&self, registry: &Registry, target: &TargetLayout, st: &StructType) -> Entry {
        let Some(members) = st.members() else {
            return Entry::Pending;
        };
        let ty = st.ty();
        let limit = target.max_object_size();
        let mut offset = 0u64;
        let mut align = 1u64;
        let mut fields = Vec::with_capacity(members.len());
        for m in members {
            let blocked = |root| Entry::Blocked {
                member: m.name.clone(),
                member_ty: m.ty.clone(),
                root,
            };
            let (sz, al) = match self.size_align(registry, target, &m.ty) {
                Ok(sa) => sa,
                Err(root) => return blocked(root),
            };
            let Some(at) = align_up(offset, al) else {
                return blocked(LayoutError::overflow(&ty));
            };
            align = align.max(al);
            fields.push(FieldLayout {
                name: m.name.clone(),
                ty: m.ty.clone(),
                offset: at,
                size: sz,
                align: al,
            });
            match at.checked_add(sz).filter(|o| *o <= limit) {
                Some(end) => offset = end,
                None => return blocked(LayoutError::overflow(&ty)),
            }
        }
        match align_up(offset, align).filter(|s| *s <= limit) {
            Some(size) => Entry::Ready(StructLayout {
                size,
                align,
                fields,
            }),
            None => Entry::Blocked {
                member: String::new(),
                member_ty: ty.clone(),
                root: LayoutError::overflow(&ty),
            },
        }
    }

    /// Size and alignment of `ty`. Struct failures come back as their root
    /// cause so that reporting stays bounded however deep the nesting is.
    fn size_align(
        &self,
        registry: &Registry,
        target: &TargetLayout,
        ty: &Ty,
    ) -> Result<(u64, u64), LayoutError> {
        let mut lens = Vec::new();
        let mut base = ty;
        while let Ty::Array { elem, len } = base {
            lens.push(*len);
            base = elem;
        }
        let (mut size, align) = match target.scalar_size_align(base) {
            Some(sa) => sa,
            None => {
                let layout = self.raw(registry, base)?;
                (layout.size, layout.align)
            }
        };
        for len in lens.into_iter().rev() {
            size = size
                .checked_mul(len)
                .filter(|s| *s <= target.max_object_size())
                .ok_or_else(|| LayoutError::overflow(ty))?;
        }
        Ok((size, align))
    }

    fn raw<'t>(&'t self, registry: &Registry, ty: &Ty) -> Result<&'t StructLayout, LayoutError> {
        let st = registry.complete_struct(ty)?;
        match registry.position(st.name()).and_then(|i| self.entries.get(i)) {
            Some(Entry::Ready(layout)) => Ok(layout),
            Some(Entry::Blocked { root, .. }) => Err(root.clone()),
            _ => Err(LayoutError::Internal(format!(
                "layout of {ty} requested before it was computed"
            ))),
        }
    }

    /// Like [`LayoutTable::raw`], but names the member that blocked `ty`.
    fn get<'t>(&'t self, registry: &Registry, ty: &Ty) -> Result<&'t StructLayout, LayoutError> {
        let st = registry.complete_struct(ty)?;
        let Some(Entry::Blocked {
            member,
            member_ty,
            root,
        }) = registry.position(st.name()).and_then(|i| self.entries.get(i))
        else {
            return self.raw(registry, ty);
        };
        Err(match root {
            LayoutError::UnresolvedType { ty: cause, reason } => {
                let via = if cause == member_ty {
                    String::new()
                } else {
                    format!(", which needs {cause}")
                };
                LayoutError::unresolved(
                    ty,
                    format!("member `{member}` has type {member_ty}{via}: {reason}"),
                )
            }
            other => other.clone(),
        })
    }
}

/// Everything layout computation reads: the frozen registry, the target and
/// the struct layouts derived from both.
///
/// All three are immutable, so a `LayoutCx` is `Send` and `Sync`, and every
/// query on it is deterministic.
#[derive(Debug, Clone)]
pub struct LayoutCx<'a> {
    pub registry: &'a Registry,
    pub target: &'a TargetLayout,
    table: Cow<'a, LayoutTable>,
}

impl<'a> LayoutCx<'a> {
    /// Lays out every struct in `registry` for `target` up front.
    pub fn new(registry: &'a Registry, target: &'a TargetLayout) -> Self {
        Self {
            registry,
            target,
            table: Cow::Owned(LayoutTable::compute(registry, target)),
        }
    }

    /// Reuses a table previously computed for this exact registry and target.
    pub(crate) fn with_table(
        registry: &'a Registry,
        target: &'a TargetLayout,
        table: &'a LayoutTable,
    ) -> Self {
        Self {
            registry,
            target,
            table: Cow::Borrowed(table),
        }
    }

    pub fn size_of(&self, ty: &Ty) -> Result<u64, LayoutError> {
        Ok(self.size_align(ty)?.0)
    }

    pub fn align_of(&self, ty: &Ty) -> Result<u64, LayoutError> {
        Ok(self.size_align(ty)?.1)
    }

    pub fn size_align(&self, ty: &Ty) -> Result<(u64, u64), LayoutError> {
        let mut base = ty;
        while let Ty::Array { elem, .. } = base {
            base = elem;
        }
        if let Ty::Struct(_) = base {
            self.layout(base)?;
        }
        self.table.size_align(self.registry, self.target, ty)
    }

    /// Layout of the struct `ty`, members in declaration order.
    pub(crate) fn layout(&self, ty: &Ty) -> Result<&StructLayout, LayoutError> {
        self.table.get(self.registry, ty)
    }

    pub fn struct_layout(&self, ty: &Ty) -> Result<StructLayout, LayoutError> {
        self.layout(ty).cloned()
    }

    /// Byte offset of the member at ordinal `index` of struct `ty`.
    pub fn indexed_offset(&self, ty: &Ty, index: usize) -> Result<u64, LayoutError> {
        let layout = self.layout(ty)?;
        layout
            .fields
            .get(index)
            .map(|f| f.offset)
            .ok_or_else(|| LayoutError::IndexOutOfRange {
                ty: ty.clone(),
                index,
                len: layout.fields.len(),
            })
    }
}
