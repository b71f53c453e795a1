//! E2E Integration tests for inclean
//!
//! Run with: cargo test --test integration
//! Verbose:  TEST_VERBOSE=1 cargo test --test integration -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Test logging macro - prints when TEST_VERBOSE is set
macro_rules! test_log {
    ($level:expr, $($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            eprintln!("[{}] [integration:{}] {}",
                $level,
                line!(),
                format!($($arg)*)
            );
        }
    };
}

fn get_binary_path() -> PathBuf {
    if let Ok(bin_path) = std::env::var("CARGO_BIN_EXE_inclean") {
        let path = PathBuf::from(bin_path);
        if path.exists() {
            return path;
        }
    }

    // Try release first, then debug
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let release_path = PathBuf::from(manifest_dir).join("target/release/inclean");
    let debug_path = PathBuf::from(manifest_dir).join("target/debug/inclean");

    if release_path.exists() {
        release_path
    } else if debug_path.exists() {
        debug_path
    } else {
        panic!(
            "inclean binary not found. Run 'cargo build' first.\n\
             Looked in:\n  - {}\n  - {}",
            release_path.display(),
            debug_path.display()
        );
    }
}

/// Run inclean in `dir` with config lookup disabled unless the test opts in
fn run_inclean_in(dir: &Path, args: &[&str]) -> (String, String, i32) {
    test_log!("RUN", "inclean with args: {:?}", args);

    let output = Command::new(get_binary_path())
        .args(args)
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run inclean");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    test_log!("OUTPUT", "Exit code: {}", code);
    if !stderr.is_empty() {
        test_log!("STDERR", "{}", stderr);
    }

    (stdout, stderr, code)
}

fn write_source(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write source");
    path
}

const THREE_INCLUDES: &str = "#include <a.h>\n#include <b.h>\nint x;\n#include <c.h>\n";

#[test]
fn test_e2e_help_exits_zero() {
    let dir = TempDir::new().unwrap();
    let (stdout, _, code) = run_inclean_in(dir.path(), &["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("--command"));
    assert!(stdout.contains("--verbose"));
}

#[test]
fn test_e2e_no_paths_prints_usage() {
    let dir = TempDir::new().unwrap();
    let (stdout, _, code) = run_inclean_in(dir.path(), &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage"), "stdout: {}", stdout);
}

#[cfg(unix)]
#[test]
fn test_e2e_unknown_option_is_reported_and_ignored() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", "#include <a.h>\n");
    let (_, stderr, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "--bogus", "-c", "true", "a.cc"],
    );
    assert_eq!(code, 0);
    assert!(stderr.contains("Unknown option: '--bogus'"));
    assert_eq!(fs::read_to_string(path).unwrap(), "// #include <a.h>\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_invalid_option_value_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", "#include <a.h>\n");
    let (_, stderr, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "--color", "sometimes", "-c", "true", "a.cc"],
    );
    assert_eq!(code, 0);
    assert!(stderr.contains("Unknown option: '--color sometimes'"), "stderr: {}", stderr);
    assert_eq!(fs::read_to_string(path).unwrap(), "// #include <a.h>\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_latin1_source_is_cleaned() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.c");
    fs::write(&path, b"/* \xa9 1998 */\n#include <a.h>\n").unwrap();
    let (_, _, code) = run_inclean_in(dir.path(), &["--no-config", "-c", "true", "old.c"]);
    assert_eq!(code, 0);
    assert_eq!(fs::read(path).unwrap(), b"/* \xa9 1998 */\n// #include <a.h>\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_always_failing_check_is_safe() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", THREE_INCLUDES);
    let (_, _, code) = run_inclean_in(dir.path(), &["--no-config", "-c", "false", "a.cc"]);
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(path).unwrap(), THREE_INCLUDES);
}

#[cfg(unix)]
#[test]
fn test_e2e_always_passing_check_comments_everything() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", THREE_INCLUDES);
    let (_, _, code) = run_inclean_in(dir.path(), &["--no-config", "-c", "true", "a.cc"]);
    assert_eq!(code, 0);
    assert_eq!(
        fs::read_to_string(path).unwrap(),
        "// #include <a.h>\n// #include <b.h>\nint x;\n// #include <c.h>\n"
    );
}

#[cfg(unix)]
#[test]
fn test_e2e_concrete_scenario() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", "#include <a.h>\nint x;\n#include <b.h>\n");
    // Passes only while a.h is no longer included
    let (_, _, code) = run_inclean_in(
        dir.path(),
        &[
            "--no-config",
            "-c",
            "! grep -q '^#include <a.h>' {file}",
            "a.cc",
        ],
    );
    assert_eq!(code, 0);
    assert_eq!(
        fs::read_to_string(path).unwrap(),
        "// #include <a.h>\nint x;\n#include <b.h>\n"
    );
}

#[cfg(unix)]
#[test]
fn test_e2e_compiler_mode_uses_cflags() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", "#include <a.h>\n");
    let log = dir.path().join("argv.log");
    let compiler = dir.path().join("fake-cc");
    fs::write(
        &compiler,
        format!("#!/bin/sh\necho \"$@\" >> {}\nexit 1\n", log.display()),
    )
    .unwrap();
    Command::new("chmod")
        .arg("+x")
        .arg(&compiler)
        .status()
        .unwrap();

    let (_, _, code) = run_inclean_in(
        dir.path(),
        &[
            "--no-config",
            "--compiler",
            compiler.to_str().unwrap(),
            "--cflag",
            "-DONE",
            "a.cc",
        ],
    );
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&log).unwrap(), "-DONE -c a.cc\n");
    assert_eq!(fs::read_to_string(path).unwrap(), "#include <a.h>\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_verbose_prints_location() {
    let dir = TempDir::new().unwrap();
    write_source(&dir, "a.cc", "int x;\n#include <a.h>\n");
    let (stdout, stderr, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "-v", "-c", "true", "a.cc"],
    );
    assert_eq!(code, 0);
    let output = format!("{}{}", stdout, stderr);
    assert!(output.contains("a.cc:2: #include <a.h>"), "output: {}", output);
    assert!(output.contains("removed"));
}

#[cfg(unix)]
#[test]
fn test_e2e_json_report() {
    let dir = TempDir::new().unwrap();
    write_source(&dir, "a.cc", THREE_INCLUDES);
    let (stdout, _, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "--json", "-c", "grep -q '^#include <b.h>' {file}", "a.cc"],
    );
    assert_eq!(code, 0);

    let report: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(report["status"], "success");
    assert_eq!(report["changed"], true);
    assert_eq!(report["removed"], 2);
    assert_eq!(report["kept"], 1);
    assert_eq!(report["directives"][1]["line"], 2);
    assert_eq!(report["directives"][1]["verdict"], "kept");
}

#[cfg(unix)]
#[test]
fn test_e2e_diff_output() {
    let dir = TempDir::new().unwrap();
    write_source(&dir, "a.cc", "#include <a.h>\nint x;\n");
    let (stdout, _, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "--diff", "-c", "true", "a.cc"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("-#include <a.h>"));
    assert!(stdout.contains("+// #include <a.h>"));
}

#[cfg(unix)]
#[test]
fn test_e2e_missing_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let real = write_source(&dir, "real.cc", "#include <a.h>\n");
    let (_, _, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "-c", "true", "missing.cc", "real.cc"],
    );
    assert_eq!(code, 0);
    assert!(!dir.path().join("missing.cc").exists());
    assert_eq!(fs::read_to_string(real).unwrap(), "// #include <a.h>\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_backup_keeps_original() {
    let dir = TempDir::new().unwrap();
    write_source(&dir, "a.cc", "#include <a.h>\n");
    let (_, _, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "--backup", "-c", "true", "a.cc"],
    );
    assert_eq!(code, 0);
    assert_eq!(
        fs::read_to_string(dir.path().join("a.cc.bak")).unwrap(),
        "#include <a.h>\n"
    );
}

#[cfg(unix)]
#[test]
fn test_e2e_recursive_respects_glob() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    let source = dir.path().join("src/a.cpp");
    let notes = dir.path().join("src/notes.txt");
    fs::write(&source, "#include <a.h>\n").unwrap();
    fs::write(&notes, "#include <a.h>\n").unwrap();

    let (_, _, code) = run_inclean_in(
        dir.path(),
        &["--no-config", "-r", "-c", "true", "src"],
    );
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(source).unwrap(), "// #include <a.h>\n");
    assert_eq!(fs::read_to_string(notes).unwrap(), "#include <a.h>\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_config_file_supplies_command() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", "#include <a.h>\n");
    fs::write(dir.path().join(".incleanrc"), "command = \"true\"\n").unwrap();

    let (_, _, code) = run_inclean_in(dir.path(), &["a.cc"]);
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(path).unwrap(), "// #include <a.h>\n");
}

/// Send `signal` while the first directive is under test and check the line
/// is back on disk and the exit code is 130
#[cfg(unix)]
fn assert_signal_restores_line_under_test(signal: &str) {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "a.cc", "#include <a.h>\nint x;\n");
    let marker = dir.path().join("started");
    let check = format!("touch {}; sleep 5", marker.display());

    let child = Command::new(get_binary_path())
        .args(["--no-config", "-c", &check, "a.cc"])
        .current_dir(dir.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn inclean");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !marker.exists() {
        assert!(Instant::now() < deadline, "verification never started");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "// #include <a.h>\nint x;\n"
    );

    test_log!("SIGNAL", "sending -{} to {}", signal, child.id());
    let killed = Command::new("kill")
        .args([format!("-{}", signal), child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let output = child.wait_with_output().unwrap();
    test_log!("STDERR", "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(output.status.code(), Some(130), "signal {}", signal);
    assert_eq!(fs::read_to_string(&path).unwrap(), "#include <a.h>\nint x;\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_sigterm_restores_line_under_test() {
    assert_signal_restores_line_under_test("TERM");
}

#[cfg(unix)]
#[test]
fn test_e2e_sigquit_restores_line_under_test() {
    assert_signal_restores_line_under_test("QUIT");
}

#[cfg(unix)]
#[test]
fn test_e2e_sigint_restores_line_under_test() {
    assert_signal_restores_line_under_test("INT");
}

#[test]
fn test_e2e_config_path_without_file() {
    let dir = TempDir::new().unwrap();
    let (stdout, stderr, code) = run_inclean_in(dir.path(), &["config", "path"]);
    // A config in $HOME may exist on the machine running the tests
    if code == 0 {
        assert!(!stdout.trim().is_empty());
    } else {
        assert_eq!(code, 1);
        assert!(stderr.contains("No config file found"));
    }
}
