//! ---
//! chroma_section: "15-testing-qa-runbook"
//! chroma_subsection: "integration-tests"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Command-line behaviour of the operator CLI."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use assert_cmd::Command;

fn chromactl() -> Command {
    let mut cmd = Command::cargo_bin("chromactl").expect("binary builds");
    cmd.env_remove("CHROMA_CONFIG")
        .env_remove("CHROMA_BACKEND")
        .current_dir(env!("CARGO_TARGET_TMPDIR"));
    cmd
}

#[test]
fn help_lists_operator_commands() {
    let output = chromactl().arg("--help").output().expect("runs");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for command in ["watch", "scripts", "sliders", "set", "start", "inspect", "stop", "colour"] {
        assert!(help.contains(command), "help should mention `{command}`");
    }
}

#[test]
fn colour_with_spaces_is_rejected_before_any_request() {
    // Port 9 is discard; nothing should ever be sent there.
    let output = chromactl()
        .args(["--backend", "http://127.0.0.1:9", "colour", "Fire Red"])
        .output()
        .expect("runs");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Name cannot contain spaces."), "{stderr}");
}

#[test]
fn non_http_backend_override_is_refused() {
    chromactl()
        .args(["--backend", "ftp://127.0.0.1", "scripts"])
        .assert()
        .failure();
}
