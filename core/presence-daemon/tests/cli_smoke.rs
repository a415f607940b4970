use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn daemon(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_presence-daemon"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("PRESENCE_DEBUG_LOG")
        .output()
        .expect("Failed to spawn presence-daemon")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn clear_on_empty_root_succeeds() {
    let root = TempDir::new().expect("temp dir");
    let output = daemon(root.path(), &["clear", "--target", "SomeChannel"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Cleared 0 record(s) for somechannel"));
    assert!(root.path().join("store.db").exists());
}

#[test]
fn invalid_timezone_exits_non_zero_and_keeps_previous() {
    let root = TempDir::new().expect("temp dir");

    let set = daemon(root.path(), &["timezone", "set", "JST"]);
    assert!(set.status.success());
    assert!(stdout(&set).contains("Asia/Tokyo"));

    let invalid = daemon(root.path(), &["timezone", "set", "Mars/Olympus_Mons"]);
    assert!(!invalid.status.success());

    let show = daemon(root.path(), &["timezone", "show"]);
    assert!(show.status.success());
    assert!(stdout(&show).contains("Display time zone: Asia/Tokyo"));
}

#[test]
fn timezone_suggest_lists_matches() {
    let root = TempDir::new().expect("temp dir");
    let output = daemon(root.path(), &["timezone", "suggest", "new york"]);

    assert!(output.status.success());
    assert!(stdout(&output).lines().any(|line| line == "America/New_York"));
}

#[test]
fn show_json_for_unknown_target_is_empty_view() {
    let root = TempDir::new().expect("temp dir");
    let output = daemon(root.path(), &["show", "--target", "chan", "--json"]);

    assert!(output.status.success());
    let view: Value = serde_json::from_str(&stdout(&output)).expect("view JSON");
    assert_eq!(view["target"], "chan");
    assert_eq!(view["entityRows"], Value::Array(Vec::new()));
    assert_eq!(view["pinnedToLiveEdge"], Value::Bool(true));
}

#[test]
fn export_and_import_with_file_backend() {
    let root = TempDir::new().expect("temp dir");
    let exported = root.path().join("timeline.json");
    let exported_arg = exported.to_string_lossy().to_string();

    let export = daemon(
        root.path(),
        &["--backend", "file", "export", "--target", "chan", &exported_arg],
    );
    assert!(export.status.success(), "stderr: {}", String::from_utf8_lossy(&export.stderr));
    let document: Value =
        serde_json::from_str(&std::fs::read_to_string(&exported).expect("read export")).expect("parse");
    assert!(document["users"].is_object());

    let import = daemon(
        root.path(),
        &["--backend", "file", "import", "--target", "other", &exported_arg],
    );
    assert!(import.status.success());
    assert!(stdout(&import).contains("Imported into other"));
}

#[test]
fn invalid_target_is_rejected() {
    let root = TempDir::new().expect("temp dir");
    let output = daemon(root.path(), &["clear", "--target", "a/b"]);
    assert!(!output.status.success());
}
