//! Target data-layout facts.

use std::fmt;
use std::str::FromStr;

use cranelift::prelude::{Type, types};
use target_lexicon::{Architecture, OperatingSystem, PointerWidth, Triple};

use crate::ty::{IntTy, Ty};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("invalid target triple `{triple}`: {reason}")]
    InvalidTriple { triple: String, reason: String },

    #[error("target `{0}` has no known pointer width")]
    UnknownPointerWidth(String),
}

/// Primitive size/alignment rules for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    triple: Triple,
    pointer_width: PointerWidth,
    /// Alignment of 64-bit scalars (`i64`, `u64`, `f64`).
    align64: u64,
}

impl TargetLayout {
    pub fn for_triple(triple: &Triple) -> Result<Self, TargetError> {
        let pointer_width = triple
            .pointer_width()
            .map_err(|_| TargetError::UnknownPointerWidth(triple.to_string()))?;
        // i386 System V keeps 64-bit scalars at 4-byte alignment.
        let align64 = match (&triple.architecture, &triple.operating_system) {
            (Architecture::X86_32(_), OperatingSystem::Windows) => 8,
            (Architecture::X86_32(_), _) => 4,
            _ => 8,
        };
        Ok(Self {
            triple: triple.clone(),
            pointer_width,
            align64,
        })
    }

    pub fn parse(triple: &str) -> Result<Self, TargetError> {
        let parsed = Triple::from_str(triple).map_err(|e| TargetError::InvalidTriple {
            triple: triple.to_string(),
            reason: e.to_string(),
        })?;
        Self::for_triple(&parsed)
    }

    pub fn host() -> Result<Self, TargetError> {
        Self::for_triple(&Triple::host())
    }

    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    pub fn pointer_bytes(&self) -> u64 {
        u64::from(self.pointer_width.bytes())
    }

    pub fn pointer_bits(&self) -> u32 {
        u32::from(self.pointer_width.bits())
    }

    /// Largest size or offset representable on this target.
    pub fn max_object_size(&self) -> u64 {
        match self.pointer_width {
            PointerWidth::U64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    /// The unsigned integer type sizes and offsets are expressed in.
    pub fn size_ty(&self) -> Ty {
        Ty::Int(IntTy::Usize)
    }

    /// Cranelift type of [`TargetLayout::size_ty`].
    pub fn size_cl_type(&self) -> Type {
        match self.pointer_width {
            PointerWidth::U16 => types::I16,
            PointerWidth::U32 => types::I32,
            PointerWidth::U64 => types::I64,
        }
    }

    /// `(size, align)` of a non-aggregate type; `None` for structs and arrays.
    pub fn scalar_size_align(&self, ty: &Ty) -> Option<(u64, u64)> {
        let ptr = self.pointer_bytes();
        Some(match ty {
            Ty::Bool | Ty::Int(IntTy::I8 | IntTy::U8) => (1, 1),
            Ty::Int(IntTy::I16 | IntTy::U16) => (2, 2),
            Ty::Int(IntTy::I32 | IntTy::U32) | Ty::F32 => (4, 4),
            Ty::Int(IntTy::I64 | IntTy::U64) | Ty::F64 => (8, self.align64),
            Ty::Int(IntTy::Isize | IntTy::Usize) | Ty::Ptr(_) => (ptr, ptr),
            Ty::Struct(_) | Ty::Array { .. } => return None,
        })
    }

    /// Cranelift type used to load or store a non-aggregate type.
    pub fn scalar_cl_type(&self, ty: &Ty) -> Option<Type> {
        Some(match ty {
            Ty::Bool | Ty::Int(IntTy::I8 | IntTy::U8) => types::I8,
            Ty::Int(IntTy::I16 | IntTy::U16) => types::I16,
            Ty::Int(IntTy::I32 | IntTy::U32) => types::I32,
            Ty::Int(IntTy::I64 | IntTy::U64) => types::I64,
            Ty::F32 => types::F32,
            Ty::F64 => types::F64,
            Ty::Int(IntTy::Isize | IntTy::Usize) | Ty::Ptr(_) => self.size_cl_type(),
            Ty::Struct(_) | Ty::Array { .. } => return None,
        })
    }
}

impl fmt::Display for TargetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ptr{})", self.triple, self.pointer_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_width_follows_triple() {
        let x64 = TargetLayout::parse("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(x64.pointer_bytes(), 8);
        assert_eq!(x64.size_cl_type(), types::I64);

        let wasm = TargetLayout::parse("wasm32-unknown-unknown").unwrap();
        assert_eq!(wasm.pointer_bytes(), 4);
        assert_eq!(wasm.size_cl_type(), types::I32);
        assert_eq!(wasm.max_object_size(), u64::from(u32::MAX));

        let ptr = Ty::ptr(Ty::Bool);
        assert_eq!(wasm.scalar_size_align(&ptr), Some((4, 4)));
        assert_eq!(x64.scalar_size_align(&ptr), Some((8, 8)));
    }

    #[test]
    fn i386_sysv_aligns_64_bit_scalars_to_four() {
        let linux = TargetLayout::parse("i686-unknown-linux-gnu").unwrap();
        assert_eq!(linux.scalar_size_align(&Ty::F64), Some((8, 4)));

        let windows = TargetLayout::parse("i686-pc-windows-msvc").unwrap();
        assert_eq!(windows.scalar_size_align(&Ty::F64), Some((8, 8)));

        let arm = TargetLayout::parse("aarch64-unknown-linux-gnu").unwrap();
        assert_eq!(arm.scalar_size_align(&Ty::Int(IntTy::U64)), Some((8, 8)));
    }

    #[test]
    fn size_type_is_unsigned_pointer_sized() {
        let t = TargetLayout::parse("aarch64-apple-darwin").unwrap();
        assert_eq!(t.size_ty(), Ty::Int(IntTy::Usize));
        assert_eq!(t.scalar_size_align(&t.size_ty()), Some((8, 8)));
    }

    #[test]
    fn aggregates_have_no_scalar_layout() {
        let t = TargetLayout::parse("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(t.scalar_size_align(&Ty::Struct("S".into())), None);
        assert_eq!(t.scalar_cl_type(&Ty::array(Ty::Bool, 2)), None);
    }

    #[test]
    fn rejects_garbage_triples() {
        assert!(matches!(
            TargetLayout::parse("not-a-real-target-at-all"),
            Err(TargetError::InvalidTriple { .. })
        ));
    }
}
