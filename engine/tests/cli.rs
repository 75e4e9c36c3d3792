// Integration tests for the `sfe` binary.
//
// Runs the built executable and checks stdout, stderr and exit codes for the
// addr, slice and pum subcommands.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

fn sfe_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sfe"))
}

/// Unique counter for temp file names (avoids collisions in parallel tests).
static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{}_{}_{}.{}", prefix, std::process::id(), n, ext))
}

fn run(args: &[&str]) -> Output {
    Command::new(sfe_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run sfe")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn write_job(json: &str) -> PathBuf {
    let path = temp_path("sfe_job", "json");
    std::fs::write(&path, json).unwrap();
    path
}

// ── addr ────────────────────────────────────────────────────────────────────

#[test]
fn addr_prints_linear_addresses() {
    let out = run(&["addr", "--params", "8,4,0x1000", "--count", "4"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "0 0x1000\n1 0x1008\n2 0x1010\n3 0x1018\n");
}

#[test]
fn addr_accepts_negative_strides() {
    let out = run(&["addr", "--params", "-8,0x1000", "--count", "3"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "0 0x1000\n1 0xff8\n2 0xff0\n");
}

#[test]
fn addr_rejects_short_params() {
    let out = run(&["addr", "--params", "8"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("at least 2 params"), "stderr: {}", stderr(&out));
}

#[test]
fn addr_rejects_malformed_words() {
    let out = run(&["addr", "--params", "8,zz"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("invalid parameter 'zz'"), "stderr: {}", stderr(&out));
}

// ── slice ───────────────────────────────────────────────────────────────────

#[test]
fn slice_coalesces_contiguous_elements() {
    let out = run(&["slice", "--params", "8,0x1000", "--elem-size", "8", "--total-trip", "12"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[0, 8) 0x1000+64"), "{}", lines[0]);
    assert!(lines[1].ends_with("[8, 12) 0x1040+64"), "{}", lines[1]);
}

#[test]
fn slice_without_coalescing_emits_every_element() {
    let out = run(&[
        "slice",
        "--params",
        "8,0x1000",
        "--elem-size",
        "8",
        "--no-coalesce",
        "--count",
        "3",
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[2].ends_with("[2, 3) 0x1000+64"), "{}", lines[2]);
}

#[test]
fn slice_line_size_must_be_a_power_of_two() {
    let out = run(&["slice", "--params", "8,0x1000", "--elem-size", "8", "--line-size", "48"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn options_file_sets_the_line_size() {
    let path = temp_path("sfe_options", "json");
    std::fs::write(&path, r#"{ "line_size": 32 }"#).unwrap();
    let out = run(&[
        "slice",
        "--options",
        path.to_str().unwrap(),
        "--params",
        "8,0x1000",
        "--elem-size",
        "8",
        "--total-trip",
        "8",
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with("[4, 8) 0x1020+32"), "{}", lines[1]);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn bad_options_file_is_reported() {
    let path = temp_path("sfe_options", "json");
    std::fs::write(&path, r#"{ "line_size": 64, "bogus": 1 }"#).unwrap();
    let out = run(&["--options", path.to_str().unwrap(), "addr", "--params", "8,0"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("bogus"), "stderr: {}", stderr(&out));
    let _ = std::fs::remove_file(&path);
}

// ── pum ─────────────────────────────────────────────────────────────────────

const HW: &str = r#""hw": {
        "wordlines": 256, "bitlines": 16, "arrays_per_way": 1,
        "ways_per_bank": 1, "mesh_rows": 1, "mesh_cols": 2
    }"#;

#[test]
fn pum_job_prints_commands() {
    let job = write_job(&format!(
        r#"{{ {HW}, "array_sizes": [8], "tile_sizes": [4],
            "src": {{ "start": 0, "params": [[1, 4]] }},
            "dst": {{ "start": 4, "params": [[1, 4]] }},
            "compute": {{ "op": "add" }} }}"#
    ));
    let out = run(&["pum", job.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(
        stdout(&out),
        "[PUMCmd inter-array WD-32]\n  BitlineMask    [0,4)\n  TileMask       [0,1)\n  TileDist       1\n    LLCCmd  0 tiles 0\n      0 -> 1 bank 1 network\n\
         [PUMCmd sync WD-32]\n\
         [PUMCmd cmp WD-32]\n  BitlineMask    [0,4)\n  TileMask       [1,2)\n  Op add\n    LLCCmd  1 tiles 1\n"
    );
    let _ = std::fs::remove_file(&job);
}

#[test]
fn pum_rejects_uncompilable_patterns() {
    let job = write_job(&format!(
        r#"{{ {HW}, "array_sizes": [8], "tile_sizes": [4],
            "src": {{ "start": 0, "params": [[1, 4]] }},
            "dst": {{ "start": 6, "params": [[1, 4]] }} }}"#
    ));
    let out = run(&["pum", job.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("not a canonical sub-region"), "stderr: {}", stderr(&out));
    let _ = std::fs::remove_file(&job);
}

#[test]
fn pum_missing_job_file() {
    let out = run(&["pum", "/nonexistent/sfe_job.json"]);
    assert_eq!(out.status.code(), Some(2));
}
