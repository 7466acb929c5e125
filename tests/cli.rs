//! Smoke tests for the CLI binary.

use assert_cmd::Command;

#[test]
fn reads_a_file_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("note.txt");
    std::fs::write(&path, "straylight cli smoke").expect("write");

    let mut cmd = Command::cargo_bin("straylight").expect("binary");
    cmd.arg(format!("Read {}", path.display()));
    let assert = cmd.assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(output.contains("straylight cli smoke"));
}

#[test]
fn destructive_command_exits_nonzero() {
    let mut cmd = Command::cargo_bin("straylight").expect("binary");
    cmd.arg("Run rm -rf / on the system");
    let assert = cmd.assert().failure();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(output.contains("Error"));
}
