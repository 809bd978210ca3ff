//! End-to-end tests of the `circuitgen` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn circuitgen() -> Command {
    let mut cmd = Command::cargo_bin("circuitgen").unwrap();
    cmd.env_remove("CIRCUITGEN_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    circuitgen()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("assemble")));
}

#[test]
fn assemble_fails_on_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();

    circuitgen()
        .args(["assemble", input.to_str().unwrap(), "--output-dir", output.to_str().unwrap()])
        .args(["--language", "guppy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No input files found"));

    let log = std::fs::read_to_string(output.join("assembler.log")).unwrap();
    assert!(log.contains("No input files found"));
}

#[test]
fn assemble_rejects_min_files_above_available() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("only.py"), "x = 1\n").unwrap();

    circuitgen()
        .args(["assemble", dir.path().to_str().unwrap()])
        .args(["--output-dir", dir.path().join("out").to_str().unwrap()])
        .args(["--language", "qiskit", "--min-files", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("min_files (2)"));
}

#[cfg(unix)]
#[test]
fn assemble_with_configured_tool_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();
    for (name, body) in [("a.py", "a = 1\n"), ("b.py", "b = 2\n"), ("c.py", "c = 3\n")] {
        std::fs::write(input.join(name), body).unwrap();
    }
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        "tools:\n  assembler: [\"sh\", \"-c\", 'out=\"$2\"; shift 6; cat \"$@\" > \"$out\"', \"sh\"]\n",
    )
    .unwrap();

    circuitgen()
        .args(["--config", config.to_str().unwrap()])
        .args(["assemble", input.to_str().unwrap(), "--output-dir", output.to_str().unwrap()])
        .args(["--language", "guppy", "--n-generations", "3", "--max-files", "2", "--seed", "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assembled 3/3"));

    for i in 0..3 {
        let text = std::fs::read_to_string(output.join(format!("assembled_circuit_{}.py", i))).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}

#[test]
fn run_requires_api_key() {
    let dir = tempfile::tempdir().unwrap();
    circuitgen()
        .env_remove("OPENROUTER_API_KEY")
        .args(["run", "--output-dir", dir.path().to_str().unwrap(), "--n-programs", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENROUTER_API_KEY"));
}
