//! Struct definitions, frozen once elaboration completes.
//!
//! A [`Registry`] can only be produced by [`RegistryBuilder::finish`], which
//! validates it; afterwards it exposes read-only access, so it can be shared
//! freely between threads.

use std::collections::HashMap;

use crate::error::LayoutError;
use crate::ty::Ty;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub ty: Ty,
    /// Declaration order, 0-based.
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct StructType {
    name: String,
    members: Option<Vec<MemberDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl StructType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` while the struct is only forward-declared.
    pub fn members(&self) -> Option<&[MemberDescriptor]> {
        self.members.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.members.is_some()
    }

    pub fn name_to_index(&self, member: &str) -> Option<usize> {
        self.by_name.get(member).copied()
    }

    pub fn ty(&self) -> Ty {
        Ty::Struct(self.name.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    structs: Vec<StructType>,
    index: HashMap<String, usize>,
    /// Struct indices with every by-value dependency before its dependents.
    order: Vec<usize>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&StructType> {
        self.index.get(name).map(|&i| &self.structs[i])
    }

    /// Returns the struct behind `ty`, or `None` if `ty` is not a known struct.
    pub fn lookup_struct(&self, ty: &Ty) -> Option<&StructType> {
        match ty {
            Ty::Struct(name) => self.get(name),
            _ => None,
        }
    }

    /// Structs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &StructType> {
        self.structs.iter()
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn by_index(&self, i: usize) -> Option<&StructType> {
        self.structs.get(i)
    }

    pub(crate) fn layout_order(&self) -> &[usize] {
        &self.order
    }

    /// Exact-name lookup of a member's ordinal index.
    pub fn resolve_member(&self, ty: &Ty, member: &str) -> Result<usize, LayoutError> {
        let st = self.complete_struct(ty)?;
        st.name_to_index(member)
            .ok_or_else(|| LayoutError::MemberNotFound {
                ty: ty.clone(),
                member: member.to_string(),
            })
    }

    /// Returns the member list of `ty`, failing if `ty` is not a struct or is
    /// not yet defined.
    pub fn complete_struct(&self, ty: &Ty) -> Result<&StructType, LayoutError> {
        let Ty::Struct(name) = ty else {
            return Err(LayoutError::NotAnAggregate { ty: ty.clone() });
        };
        let st = self
            .get(name)
            .ok_or_else(|| LayoutError::unresolved(ty, "unknown struct"))?;
        if !st.is_complete() {
            return Err(LayoutError::unresolved(ty, "struct is declared but never defined"));
        }
        Ok(st)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate struct type: {0}")]
    DuplicateStruct(String),

    #[error("duplicate member `{member}` in struct {owner}")]
    DuplicateMember { owner: String, member: String },

    #[error("unknown type {ty} in struct {owner}")]
    UnknownType { owner: String, ty: Ty },

    #[error("struct contains itself by value: {}", .path.join(" -> "))]
    RecursiveByValue { path: Vec<String> },
}

#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    fn slot(&mut self, name: &str) -> &mut StructType {
        let next = self.registry.structs.len();
        let i = *self.registry.index.entry(name.to_string()).or_insert(next);
        if i == next {
            self.registry.structs.push(StructType {
                name: name.to_string(),
                members: None,
                by_name: HashMap::new(),
            });
        }
        &mut self.registry.structs[i]
    }

    /// Forward-declares a struct. Declaring an already known struct is a no-op.
    pub fn declare(&mut self, name: &str) -> &mut Self {
        self.slot(name);
        self
    }

    /// Defines a struct's members in layout order.
    pub fn define<S: Into<String>>(
        &mut self,
        name: &str,
        members: impl IntoIterator<Item = (S, Ty)>,
    ) -> Result<&mut Self, RegistryError> {
        let st = self.slot(name);
        if st.members.is_some() {
            return Err(RegistryError::DuplicateStruct(name.to_string()));
        }
        let mut list = Vec::new();
        let mut by_name = HashMap::new();
        for (index, (member, ty)) in members.into_iter().enumerate() {
            let member = member.into();
            if by_name.insert(member.clone(), index).is_some() {
                return Err(RegistryError::DuplicateMember {
                    owner: name.to_string(),
                    member,
                });
            }
            list.push(MemberDescriptor {
                name: member,
                ty,
                index,
            });
        }
        st.members = Some(list);
        st.by_name = by_name;
        Ok(self)
    }

    /// Validates struct references and freezes the registry.
    pub fn finish(self) -> Result<Registry, RegistryError> {
        let mut reg = self.registry;
        for st in &reg.structs {
            for m in st.members().unwrap_or_default() {
                if let Some(missing) = first_unknown_struct(&m.ty, &reg) {
                    return Err(RegistryError::UnknownType {
                        owner: st.name.clone(),
                        ty: missing,
                    });
                }
            }
        }
        reg.order = by_value_order(&reg).map_err(|path| RegistryError::RecursiveByValue { path })?;
        Ok(reg)
    }
}

fn first_unknown_struct(mut ty: &Ty, reg: &Registry) -> Option<Ty> {
    loop {
        match ty {
            Ty::Struct(name) if reg.get(name).is_none() => return Some(ty.clone()),
            Ty::Ptr(inner) | Ty::Array { elem: inner, .. } => ty = inner,
            _ => return None,
        }
    }
}

/// Struct embedded by value in `ty` (through arrays, not pointers).
fn by_value_struct(mut ty: &Ty) -> Option<&str> {
    while let Ty::Array { elem, .. } = ty {
        ty = elem;
    }
    match ty {
        Ty::Struct(name) => Some(name),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Post-order over by-value struct references, with an explicit stack so
/// arbitrarily deep nesting cannot exhaust the call stack. `Err` carries the
/// first cycle found, closed on its starting struct.
fn by_value_order(reg: &Registry) -> Result<Vec<usize>, Vec<String>> {
    let deps: Vec<Vec<usize>> = reg
        .structs
        .iter()
        .map(|st| {
            st.members()
                .unwrap_or_default()
                .iter()
                .filter_map(|m| by_value_struct(&m.ty))
                .filter_map(|name| reg.position(name))
                .collect()
        })
        .collect();

    let mut mark = vec![Mark::New; reg.structs.len()];
    let mut order = Vec::with_capacity(reg.structs.len());
    for root in 0..reg.structs.len() {
        if mark[root] != Mark::New {
            continue;
        }
        mark[root] = Mark::Active;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let Some(&dep) = deps[node].get(next) else {
                mark[node] = Mark::Done;
                order.push(node);
                stack.pop();
                continue;
            };
            top.1 += 1;
            match mark[dep] {
                Mark::New => {
                    mark[dep] = Mark::Active;
                    stack.push((dep, 0));
                }
                Mark::Active => {
                    let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|&(n, _)| reg.structs[n].name.clone())
                        .collect();
                    path.push(reg.structs[dep].name.clone());
                    return Err(path);
                }
                Mark::Done => {}
            }
        }
    }
    Ok(order)
}
