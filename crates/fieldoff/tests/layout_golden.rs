use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const TARGETS: [(&str, &str); 3] = [
    ("x86_64", "x86_64-unknown-linux-gnu"),
    ("i686", "i686-unknown-linux-gnu"),
    ("wasm32", "wasm32-unknown-unknown"),
];

fn golden_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("golden")
}

fn find_inputs(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)
        .expect("failed to read golden dir")
        .map(|e| e.expect("bad dir entry").path())
        .filter(|p| p.extension().is_some_and(|e| e == "fo"))
        .collect();
    out.sort();
    out
}

#[test]
fn layout_matches_golden_output() {
    let bin = env!("CARGO_BIN_EXE_fieldoff");
    let inputs = find_inputs(&golden_dir());
    assert!(!inputs.is_empty(), "no golden inputs found");

    let mut failures = Vec::new();
    for input in &inputs {
        for (short, triple) in TARGETS {
            let output = Command::new(bin)
                .args(["layout", "--target", triple])
                .arg(input)
                .output()
                .expect("failed to execute fieldoff layout");
            if !output.status.success() {
                failures.push(format!(
                    "layout failed for {input:?} on {triple}:\n{}",
                    String::from_utf8_lossy(&output.stderr)
                ));
                continue;
            }

            let actual = String::from_utf8_lossy(&output.stdout).replace("\r\n", "\n");
            let golden = input.with_extension(format!("{short}.stdout"));
            if env::var("UPDATE_GOLDEN").is_ok() {
                fs::write(&golden, &actual).expect("failed to write golden file");
                continue;
            }
            let expected = fs::read_to_string(&golden)
                .unwrap_or_else(|e| panic!("missing golden {golden:?}: {e}"))
                .replace("\r\n", "\n");
            if actual.trim_end() != expected.trim_end() {
                failures.push(format!(
                    "mismatch for {input:?} on {triple}:\nExpected:\n---\n{}\n---\nActual:\n---\n{}\n---",
                    expected.trim_end(),
                    actual.trim_end()
                ));
            }
        }
    }

    if !failures.is_empty() {
        panic!("{} golden failures:\n\n{}", failures.len(), failures.join("\n\n"));
    }
}
