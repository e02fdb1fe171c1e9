use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use cranelift::codegen::ir::{Function, UserFuncName};
use cranelift::codegen::isa::OwnedTargetIsa;
use cranelift::codegen::{Context, verify_function};
use cranelift::prelude::*;
use cranelift_module::{Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use target_lexicon::Triple;
use tracing::{debug, info, warn};

use crate::emit::{EmitError, Emitted, emit_offset_of, emit_offset_of_index, emit_size_of};
use crate::error::LayoutError;
use crate::layout::{LayoutCx, LayoutTable, StructLayout};
use crate::lex::{self, LexError, Span};
use crate::offset::OffsetResult;
use crate::parse::{self, ParseError};
use crate::registry::{Registry, StructType};
use crate::sem::{self, SemError};
use crate::target::{TargetError, TargetLayout};
use crate::ty::Ty;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{}: failed to read: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: failed to write: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{source}", .path.display())]
    Lex { path: PathBuf, source: LexError },

    #[error("{}:{source}", .path.display())]
    Parse { path: PathBuf, source: ParseError },

    #[error("{}:{source}", .path.display())]
    Sem { path: PathBuf, source: SemError },

    #[error("{}: {source}", .path.display())]
    Layout { path: PathBuf, source: LayoutError },

    #[error("{}: {}", .path.display(), .source.kind)]
    Emit { path: PathBuf, source: EmitError },

    #[error("{}: no struct named `{name}`", .path.display())]
    UnknownStruct { path: PathBuf, name: String },

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("unsupported target `{triple}`: {reason}")]
    UnsupportedTarget { triple: String, reason: String },

    #[error("code generation failed: {0}")]
    Codegen(String),
}

fn codegen_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Codegen(e.to_string())
}

/// A member named on the command line: `name` or `#index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRef {
    Name(String),
    Index(usize),
}

impl FromStr for MemberRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('#') {
            Some(digits) => digits
                .parse()
                .map(MemberRef::Index)
                .map_err(|_| format!("invalid member index `{s}`")),
            None if s.is_empty() => Err("member name is empty".to_string()),
            None => Ok(MemberRef::Name(s.to_string())),
        }
    }
}

impl std::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRef::Name(n) => f.write_str(n),
            MemberRef::Index(i) => write!(f, "#{i}"),
        }
    }
}

fn timed<T>(stage: &'static str, path: &Path, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    info!(
        target: "pipeline",
        stage,
        file = %path.display(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "stage finished"
    );
    out
}

/// One loaded declaration file, the target it is laid out for and the
/// resulting struct layouts.
#[derive(Debug)]
pub struct Session {
    path: PathBuf,
    registry: Registry,
    target: TargetLayout,
    layouts: LayoutTable,
}

impl Session {
    pub fn load(path: &Path, target: TargetLayout) -> Result<Self, DriverError> {
        let src = std::fs::read_to_string(path).map_err(|source| DriverError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_source(path, &src, target)
    }

    /// Runs lex, parse and elaboration over `src`; `path` only labels errors.
    pub fn from_source(
        path: impl Into<PathBuf>,
        src: &str,
        target: TargetLayout,
    ) -> Result<Self, DriverError> {
        let path = path.into();
        let tokens = timed("lex", &path, || lex::lex_str(src, 0)).map_err(|source| {
            DriverError::Lex {
                path: path.clone(),
                source,
            }
        })?;
        let prog = timed("parse", &path, || parse::parse_program(&tokens)).map_err(|source| {
            DriverError::Parse {
                path: path.clone(),
                source,
            }
        })?;
        let registry = timed("elaborate", &path, || sem::elaborate(&prog)).map_err(|source| {
            DriverError::Sem {
                path: path.clone(),
                source,
            }
        })?;
        debug!(target: "pipeline", structs = registry.len(), triple = %target, "registry ready");
        let layouts = timed("layout", &path, || LayoutTable::compute(&registry, &target));
        Ok(Self {
            path,
            registry,
            target,
            layouts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn target(&self) -> &TargetLayout {
        &self.target
    }

    pub fn cx(&self) -> LayoutCx<'_> {
        LayoutCx::with_table(&self.registry, &self.target, &self.layouts)
    }

    fn layout_err(&self, source: LayoutError) -> DriverError {
        DriverError::Layout {
            path: self.path.clone(),
            source,
        }
    }

    fn struct_ty(&self, name: &str) -> Result<Ty, DriverError> {
        self.registry
            .get(name)
            .map(StructType::ty)
            .ok_or_else(|| DriverError::UnknownStruct {
                path: self.path.clone(),
                name: name.to_string(),
            })
    }

    /// Human-readable layout of one struct, or of every struct in declaration
    /// order when `only` is `None`.
    pub fn render_layout(&self, only: Option<&str>) -> Result<String, DriverError> {
        let cx = self.cx();
        let mut out = String::new();
        if let Some(name) = only {
            let ty = self.struct_ty(name)?;
            let layout = cx.layout(&ty).map_err(|e| self.layout_err(e))?;
            write_layout(&mut out, name, layout);
            return Ok(out);
        }
        for st in self.registry.iter() {
            if !st.is_complete() {
                let _ = writeln!(out, "struct {};  # incomplete", st.name());
                continue;
            }
            match cx.layout(&st.ty()) {
                Ok(layout) => write_layout(&mut out, st.name(), layout),
                Err(e) => {
                    warn!(target: "layout", name = st.name(), error = %e, "layout unavailable");
                    let _ = writeln!(out, "struct {}: {e}", st.name());
                }
            }
        }
        Ok(out)
    }

    pub fn offset_of(&self, st: &str, member: &MemberRef) -> Result<OffsetResult, DriverError> {
        let ty = self.struct_ty(st)?;
        let cx = self.cx();
        let result = match member {
            MemberRef::Name(n) => cx.offset_of(&ty, n),
            MemberRef::Index(i) => cx.offset_of_index(&ty, *i),
        };
        result.map_err(|e| self.layout_err(e))
    }

    fn member_label(&self, ty: &Ty, member: &MemberRef) -> String {
        match member {
            MemberRef::Name(n) => n.clone(),
            MemberRef::Index(i) => self
                .registry
                .lookup_struct(ty)
                .and_then(StructType::members)
                .and_then(|ms| ms.get(*i))
                .map_or_else(|| i.to_string(), |m| m.name.clone()),
        }
    }

    /// Cranelift IR of a function returning the offset of `st.member`.
    pub fn emit_clif(&self, st: &str, member: &MemberRef) -> Result<String, DriverError> {
        let ty = self.struct_ty(st)?;
        let cx = self.cx();
        let mut sig = Signature::new(isa::CallConv::triple_default(self.target.triple()));
        sig.returns.push(AbiParam::new(self.target.size_cl_type()));
        let name = format!("{st}__offsetof__{}", self.member_label(&ty, member));
        let mut func = Function::with_name_signature(UserFuncName::testcase(name), sig);
        let mut fctx = FunctionBuilderContext::new();
        self.lower_constant(&mut func, &mut fctx, |b| match member {
            MemberRef::Name(n) => emit_offset_of(b, &cx, &ty, n, Span::default()),
            MemberRef::Index(i) => emit_offset_of_index(b, &cx, &ty, *i, Span::default()),
        })?;
        let flags = settings::Flags::new(settings::builder());
        verify_function(&func, &flags).map_err(codegen_err)?;
        Ok(func.display().to_string())
    }

    /// Fills `func` with a single block returning the constant `body` emits.
    fn lower_constant(
        &self,
        func: &mut Function,
        fctx: &mut FunctionBuilderContext,
        body: impl FnOnce(&mut FunctionBuilder) -> Result<Emitted, EmitError>,
    ) -> Result<u64, DriverError> {
        let mut b = FunctionBuilder::new(func, fctx);
        let block = b.create_block();
        b.switch_to_block(block);
        b.seal_block(block);
        let emitted = body(&mut b).map_err(|source| DriverError::Emit {
            path: self.path.clone(),
            source,
        })?;
        b.ins().return_(&[emitted.value]);
        b.finalize();
        Ok(emitted.offset)
    }

    fn isa(&self) -> Result<OwnedTargetIsa, DriverError> {
        let triple = self.target.triple();
        let builder = if *triple == Triple::host() {
            cranelift_native::builder().map_err(codegen_err)?
        } else {
            isa::lookup(triple.clone()).map_err(|e| DriverError::UnsupportedTarget {
                triple: triple.to_string(),
                reason: e.to_string(),
            })?
        };
        builder
            .finish(settings::Flags::new(settings::builder()))
            .map_err(codegen_err)
    }

    /// Relocatable object exporting `S__sizeof` and `S__offsetof__m` for every
    /// struct `S` that has a layout and each of its members `m`. Structs
    /// without one are skipped with a warning, as in [`Session::render_layout`].
    pub fn build_object(&self) -> Result<Vec<u8>, DriverError> {
        let isa = self.isa()?;
        let object_builder =
            ObjectBuilder::new(isa, "fieldoff", cranelift_module::default_libcall_names())
                .map_err(codegen_err)?;
        let mut module = ObjectModule::new(object_builder);
        let mut ctx = module.make_context();
        let mut fctx = FunctionBuilderContext::new();
        let cx = self.cx();

        for st in self.registry.iter().filter(|s| s.is_complete()) {
            let ty = st.ty();
            if let Err(e) = cx.layout(&ty) {
                warn!(target: "layout", name = st.name(), error = %e, "layout unavailable");
                continue;
            }
            let sizeof = format!("{}__sizeof", st.name());
            self.define_export(&mut module, &mut ctx, &mut fctx, &sizeof, |b| {
                emit_size_of(b, &cx, &ty, Span::default())
            })?;
            for m in st.members().unwrap_or_default() {
                let symbol = format!("{}__offsetof__{}", st.name(), m.name);
                self.define_export(&mut module, &mut ctx, &mut fctx, &symbol, |b| {
                    emit_offset_of_index(b, &cx, &ty, m.index, Span::default())
                })?;
            }
        }

        let product = timed("object", &self.path, || module.finish().emit());
        product.map_err(codegen_err)
    }

    fn define_export(
        &self,
        module: &mut ObjectModule,
        ctx: &mut Context,
        fctx: &mut FunctionBuilderContext,
        symbol: &str,
        body: impl FnOnce(&mut FunctionBuilder) -> Result<Emitted, EmitError>,
    ) -> Result<(), DriverError> {
        let mut sig = module.make_signature();
        sig.returns.push(AbiParam::new(self.target.size_cl_type()));
        let id = module
            .declare_function(symbol, Linkage::Export, &sig)
            .map_err(codegen_err)?;
        ctx.func.signature = sig;
        ctx.func.name = UserFuncName::user(0, id.as_u32());
        let value = self.lower_constant(&mut ctx.func, fctx, body)?;
        module
            .define_function(id, ctx)
            .map_err(|e| DriverError::Codegen(format!("{symbol}: {e}")))?;
        module.clear_context(ctx);
        debug!(target: "pipeline", symbol, value, "defined export");
        Ok(())
    }

    pub fn write_object(&self, out: &Path) -> Result<usize, DriverError> {
        let bytes = self.build_object()?;
        std::fs::write(out, &bytes).map_err(|source| DriverError::Write {
            path: out.to_path_buf(),
            source,
        })?;
        Ok(bytes.len())
    }
}

fn write_layout(out: &mut String, name: &str, layout: &StructLayout) {
    let _ = writeln!(
        out,
        "struct {name} (size {}, align {})",
        layout.size, layout.align
    );
    for f in &layout.fields {
        let _ = writeln!(
            out,
            "  +{:<6} {}: {} (size {}, align {})",
            f.offset, f.name, f.ty, f.size, f.align
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "\
struct Point { x: i32, y: i32 }
struct Mixed {
    a: i8,
    b: i64,
}
struct Handle;
";

    fn session(triple: &str) -> Session {
        let t = TargetLayout::parse(triple).unwrap();
        Session::from_source("decls.fo", SRC, t).unwrap()
    }

    #[test]
    fn member_refs_parse_names_and_ordinals() {
        assert_eq!("y".parse::<MemberRef>(), Ok(MemberRef::Name("y".into())));
        assert_eq!("#1".parse::<MemberRef>(), Ok(MemberRef::Index(1)));
        assert!("#x".parse::<MemberRef>().is_err());
        assert!("".parse::<MemberRef>().is_err());
    }

    #[test]
    fn renders_every_struct_in_declaration_order() {
        let text = session("x86_64-unknown-linux-gnu")
            .render_layout(None)
            .unwrap();
        let point = text.find("struct Point (size 8, align 4)").unwrap();
        let mixed = text.find("struct Mixed (size 16, align 8)").unwrap();
        assert!(point < mixed, "{text}");
        assert!(text.contains("+8      b: i64 (size 8, align 8)"), "{text}");
        assert!(text.contains("struct Handle;  # incomplete"), "{text}");
    }

    #[test]
    fn renders_one_struct_for_a_32_bit_target() {
        let text = session("i686-unknown-linux-gnu")
            .render_layout(Some("Mixed"))
            .unwrap();
        assert!(text.starts_with("struct Mixed (size 12, align 4)"), "{text}");
        assert!(!text.contains("Point"));
    }

    #[test]
    fn offsets_by_name_and_ordinal() {
        let s = session("x86_64-unknown-linux-gnu");
        assert_eq!(s.offset_of("Point", &MemberRef::Name("y".into())).unwrap().offset, 4);
        assert_eq!(s.offset_of("Mixed", &MemberRef::Index(1)).unwrap().offset, 8);
    }

    #[test]
    fn errors_name_the_file() {
        let s = session("x86_64-unknown-linux-gnu");
        let e = s.offset_of("Nope", &MemberRef::Name("x".into())).unwrap_err();
        assert_eq!(e.to_string(), "decls.fo: no struct named `Nope`");

        let e = s.offset_of("Point", &MemberRef::Name("z".into())).unwrap_err();
        assert_eq!(e.to_string(), "decls.fo: struct Point has no member named `z`");

        let t = TargetLayout::parse("x86_64-unknown-linux-gnu").unwrap();
        let e = Session::from_source("bad.fo", "struct A {\n  x: Missing\n}", t).unwrap_err();
        assert_eq!(e.to_string(), "bad.fo:2:6: unknown type: Missing");
    }

    #[test]
    fn clif_returns_the_constant() {
        let s = session("x86_64-unknown-linux-gnu");
        let text = s.emit_clif("Mixed", &MemberRef::Name("b".into())).unwrap();
        assert!(text.contains("Mixed__offsetof__b"), "{text}");
        assert!(text.contains("-> i64"), "{text}");
        assert!(text.contains("iconst.i64 8"), "{text}");

        let text = session("i686-unknown-linux-gnu")
            .emit_clif("Mixed", &MemberRef::Index(1))
            .unwrap();
        assert!(text.contains("Mixed__offsetof__b"), "{text}");
        assert!(text.contains("iconst.i32 4"), "{text}");
    }

    #[test]
    fn clif_for_a_missing_member_fails_without_a_span_prefix() {
        let s = session("x86_64-unknown-linux-gnu");
        let e = s.emit_clif("Point", &MemberRef::Index(5)).unwrap_err();
        assert!(matches!(e, DriverError::Emit { .. }));
        assert_eq!(
            e.to_string(),
            "decls.fo: member index 5 out of range for Point (2 members)"
        );
    }

    fn mentions(bytes: &[u8], symbol: &str) -> bool {
        bytes.windows(symbol.len()).any(|w| w == symbol.as_bytes())
    }

    #[test]
    fn objects_skip_structs_without_a_layout() {
        let t = TargetLayout::parse("x86_64-unknown-linux-gnu").unwrap();
        let src = "struct Blob;\nstruct Holder { b: Blob }\nstruct Point { x: i32, y: i32 }\n";
        let s = Session::from_source("o.fo", src, t).unwrap();

        let text = s.render_layout(None).unwrap();
        assert!(text.contains("struct Holder: layout of Holder"), "{text}");

        let bytes = s.build_object().unwrap();
        assert!(mentions(&bytes, "Point__offsetof__y"));
        assert!(!mentions(&bytes, "Holder__sizeof"));
        assert!(!mentions(&bytes, "Holder__offsetof__b"));
    }
}
