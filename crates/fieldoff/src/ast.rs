use crate::lex::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Named(String, Span),
    Ptr(Box<TypeExpr>),
    Array { elem: Box<TypeExpr>, len: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    /// `None` for a forward declaration (`struct Name;`).
    pub fields: Option<Vec<FieldDef>>,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub structs: Vec<StructDef>,
}
