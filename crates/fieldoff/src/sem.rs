use crate::ast::*;
use crate::lex::Span;
use crate::registry::{Registry, RegistryError};
use crate::ty::Ty;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct SemError {
    pub span: Span,
    pub msg: String,
}
impl std::fmt::Display for SemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.col, self.msg)
    }
}
impl std::error::Error for SemError {}
fn serr(span: Span, msg: impl Into<String>) -> SemError {
    SemError {
        span,
        msg: msg.into(),
    }
}

fn resolve_ty(te: &TypeExpr, known: &HashSet<&str>) -> Result<Ty, SemError> {
    match te {
        TypeExpr::Named(name, span) => {
            if let Some(t) = Ty::primitive(name) {
                return Ok(t);
            }
            if known.contains(name.as_str()) {
                return Ok(Ty::Struct(name.clone()));
            }
            Err(serr(*span, format!("unknown type: {name}")))
        }
        TypeExpr::Ptr(inner) => Ok(Ty::ptr(resolve_ty(inner, known)?)),
        TypeExpr::Array { elem, len } => Ok(Ty::array(resolve_ty(elem, known)?, *len)),
    }
}

/// Elaborates parsed struct declarations into a frozen [`Registry`].
pub fn elaborate(prog: &Program) -> Result<Registry, SemError> {
    let mut defined = HashMap::<&str, Span>::new();
    let mut first_seen = HashMap::<&str, Span>::new();
    for s in &prog.structs {
        if Ty::primitive(&s.name).is_some() {
            return Err(serr(
                s.span,
                format!("struct name {} shadows a primitive type", s.name),
            ));
        }
        first_seen.entry(&s.name).or_insert(s.span);
        if s.fields.is_some() {
            if let Some(prev) = defined.insert(&s.name, s.span) {
                return Err(serr(
                    s.span,
                    format!(
                        "duplicate struct type: {} (previous at {}:{})",
                        s.name, prev.line, prev.col
                    ),
                ));
            }
        }
    }
    let known: HashSet<&str> = first_seen.keys().copied().collect();

    let mut builder = Registry::builder();
    for s in &prog.structs {
        let Some(fields) = &s.fields else {
            builder.declare(&s.name);
            continue;
        };
        let mut members = Vec::new();
        let mut seen = HashMap::<&str, Span>::new();
        for f in fields {
            if let Some(prev) = seen.insert(&f.name, f.span) {
                return Err(serr(
                    f.span,
                    format!(
                        "duplicate field: {} (previous at {}:{})",
                        f.name, prev.line, prev.col
                    ),
                ));
            }
            members.push((f.name.clone(), resolve_ty(&f.ty, &known)?));
        }
        builder
            .define(&s.name, members)
            .map_err(|e| serr(s.span, e.to_string()))?;
    }

    builder.finish().map_err(|e| {
        let span = match &e {
            RegistryError::RecursiveByValue { path } => path
                .first()
                .and_then(|n| defined.get(n.as_str()).copied())
                .unwrap_or_default(),
            RegistryError::DuplicateStruct(n)
            | RegistryError::DuplicateMember { owner: n, .. }
            | RegistryError::UnknownType { owner: n, .. } => {
                first_seen.get(n.as_str()).copied().unwrap_or_default()
            }
        };
        serr(span, e.to_string())
    })
}
