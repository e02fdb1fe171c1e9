//! Struct member offset resolution for a Cranelift-backed compiler.
//!
//! Layout declarations are lexed, parsed and elaborated into an immutable
//! [`Registry`]. A [`LayoutCx`] pairs that registry with a [`TargetLayout`]
//! and answers size, alignment and offset queries; [`emit`] lowers the answers
//! into Cranelift IR.

pub mod ast;
pub mod driver;
pub mod emit;
pub mod error;
pub mod layout;
pub mod lex;
pub mod logging;
pub mod offset;
pub mod parse;
pub mod registry;
pub mod sem;
pub mod target;
pub mod ty;
pub mod var;

pub use error::LayoutError;
pub use layout::{FieldLayout, LayoutCx, StructLayout};
pub use offset::OffsetResult;
pub use registry::{MemberDescriptor, Registry, RegistryBuilder, StructType};
pub use target::TargetLayout;
pub use ty::{IntTy, Ty};
