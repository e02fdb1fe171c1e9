use cranelift::prelude::Value;

use crate::ty::Ty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
    #[default]
    Auto,
    Intern,
    Extern,
    ExternC,
}

/// A named binding produced by the namespace layer.
///
/// Offset resolution only reads `ty` and `value`; nothing here mutates a
/// variable.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Unqualified, unmangled name.
    pub name: String,
    /// Qualified, mangled name.
    pub internal_name: String,
    pub ty: Ty,
    /// Base address of the variable's storage, once it has been lowered.
    pub value: Option<Value>,
    /// Extern variables may or may not have space set aside for them.
    pub has_initialiser: bool,
    pub once_tag: String,
    /// Set by the namespace on insertion.
    pub index: usize,
    pub linkage: Linkage,
    pub serialise: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        let name = name.into();
        Self {
            internal_name: name.clone(),
            name,
            ty,
            value: None,
            has_initialiser: false,
            once_tag: String::new(),
            index: 0,
            linkage: Linkage::Auto,
            serialise: true,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Variables compare equal when their types do.
    pub fn is_equal_to(&self, other: &Variable) -> bool {
        self.ty == other.ty
    }
}
