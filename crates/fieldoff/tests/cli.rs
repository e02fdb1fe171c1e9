use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const DECLS: &str = "\
struct Point { x: i32, y: i32 }
struct Mixed {
    a: i8,
    b: i64,
}
struct Handle;
";

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("failed to write file");
    path
}

fn fieldoff(args: &[&str], file: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .args(args)
        .arg(file)
        .env_remove("FIELDOFF_LOG")
        .env_remove("FIELDOFF_LOG_LEVEL")
        .output()
        .expect("failed to execute fieldoff")
}

fn stdout(o: &Output) -> String {
    String::from_utf8_lossy(&o.stdout).into_owned()
}

fn stderr(o: &Output) -> String {
    String::from_utf8_lossy(&o.stderr).into_owned()
}

#[test]
fn offsetof_by_name_and_ordinal() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);

    let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .args(["offsetof", "--target", "x86_64-unknown-linux-gnu"])
        .arg(&decls)
        .args(["Mixed", "b"])
        .output()
        .expect("failed to execute fieldoff");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "8");

    let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .args(["offsetof", "--target", "i686-unknown-linux-gnu"])
        .arg(&decls)
        .args(["Mixed", "#1"])
        .output()
        .expect("failed to execute fieldoff");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "4");
}

#[test]
fn offsetof_can_print_clif() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);

    let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .args(["offsetof", "--target", "wasm32-unknown-unknown", "--emit-clif"])
        .arg(&decls)
        .args(["Point", "y"])
        .output()
        .expect("failed to execute fieldoff");
    assert!(out.status.success(), "{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("function %Point__offsetof__y() -> i32"), "{text}");
    assert!(text.contains("iconst.i32 4"), "{text}");
    assert!(text.contains("return"), "{text}");
}

#[test]
fn layout_of_a_single_struct() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);

    let out = fieldoff(
        &["layout", "--target", "x86_64-unknown-linux-gnu", "--struct", "Point"],
        &decls,
    );
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(
        stdout(&out),
        "struct Point (size 8, align 4)\n  +0      x: i32 (size 4, align 4)\n  +4      y: i32 (size 4, align 4)\n"
    );
}

#[test]
fn compile_errors_exit_1_with_location() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let bad = write_file(dir.path(), "bad.fo", "struct A {\n  x: i32,\n  x: i64\n}\n");

    let out = fieldoff(&["layout"], &bad);
    assert_eq!(out.status.code(), Some(1));
    let expected = format!("{}:3:3: duplicate field: x (previous at 2:3)", bad.display());
    assert!(stderr(&out).contains(&expected), "{}", stderr(&out));
}

#[test]
fn resolution_errors_exit_1() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);

    for (strukt, member, msg) in [
        ("Point", "z", "struct Point has no member named `z`"),
        ("Handle", "x", "layout of Handle cannot be determined"),
        ("Nope", "x", "no struct named `Nope`"),
        ("Point", "#2", "member index 2 out of range for Point (2 members)"),
    ] {
        let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
            .arg("offsetof")
            .arg(&decls)
            .args([strukt, member])
            .output()
            .expect("failed to execute fieldoff");
        assert_eq!(out.status.code(), Some(1), "{strukt}.{member}");
        assert!(stderr(&out).contains(msg), "{}", stderr(&out));
        assert!(stdout(&out).is_empty());
    }
}

#[test]
fn usage_errors_exit_2() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);

    let out = fieldoff(&["offsetof"], &decls);
    assert_eq!(out.status.code(), Some(2));

    let out = fieldoff(&["layout", "--target", "not-a-real-target-at-all"], &decls);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("invalid target triple"), "{}", stderr(&out));
}

#[test]
fn missing_file_is_a_compile_error() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let out = fieldoff(&["layout"], &dir.path().join("absent.fo"));
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("failed to read"), "{}", stderr(&out));
}

#[test]
fn debug_logging_goes_to_stderr() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);

    let out = fieldoff(
        &["layout", "--log-level", "debug", "--log-format", "json"],
        &decls,
    );
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).starts_with("struct Point"));
    let logs = stderr(&out);
    assert!(logs.contains("\"stage\":\"lex\""), "{logs}");
    assert!(logs.contains("stage finished"), "{logs}");
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[test]
fn build_writes_a_host_object() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "decls.fo", DECLS);
    let obj = dir.path().join("layout.o");

    let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .arg("build")
        .arg(&decls)
        .arg("-o")
        .arg(&obj)
        .output()
        .expect("failed to execute fieldoff");
    assert!(out.status.success(), "{}", stderr(&out));

    let bytes = fs::read(&obj).expect("object not written");
    if cfg!(target_os = "linux") {
        assert_eq!(&bytes[..4], b"\x7fELF");
    } else {
        assert_eq!(&bytes[..4], &[0xcf, 0xfa, 0xed, 0xfe]);
    }
    for symbol in ["Point__sizeof", "Point__offsetof__y", "Mixed__offsetof__b"] {
        assert!(
            bytes.windows(symbol.len()).any(|w| w == symbol.as_bytes()),
            "symbol {symbol} missing from object"
        );
    }
}

#[test]
fn build_skips_structs_without_a_layout() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(
        dir.path(),
        "decls.fo",
        "struct Blob;\nstruct Holder { b: Blob }\nstruct Point { x: i32, y: i32 }\n",
    );
    let obj = dir.path().join("layout.o");

    let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .args(["build", "--target", "x86_64-unknown-linux-gnu"])
        .arg(&decls)
        .arg("-o")
        .arg(&obj)
        .env_remove("FIELDOFF_LOG")
        .env_remove("FIELDOFF_LOG_LEVEL")
        .output()
        .expect("failed to execute fieldoff");
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("layout unavailable"), "{}", stderr(&out));

    let bytes = fs::read(&obj).expect("object not written");
    let has = |symbol: &str| bytes.windows(symbol.len()).any(|w| w == symbol.as_bytes());
    assert!(has("Point__offsetof__y"));
    assert!(!has("Holder__sizeof"));
}

#[test]
fn deeply_nested_declarations_resolve() {
    let mut src = String::new();
    for i in 0..100_000 {
        src.push_str(&format!("struct S{i} {{ inner: S{} }}\n", i + 1));
    }
    src.push_str("struct S100000 { x: u16 }\n");
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let decls = write_file(dir.path(), "deep.fo", &src);

    let out = Command::new(env!("CARGO_BIN_EXE_fieldoff"))
        .arg("offsetof")
        .arg(&decls)
        .args(["S0", "inner"])
        .output()
        .expect("failed to execute fieldoff");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "0");
}
