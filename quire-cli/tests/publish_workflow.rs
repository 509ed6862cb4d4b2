use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn quire_cmd(root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("quire"));
    cmd.arg("--root").arg(root).env("NO_COLOR", "1");
    cmd
}

fn write_note(root: &Path, rel: &str, publish: bool, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create note dir");
    fs::write(path, format!("---\npublish: {publish}\n---\n{body}\n")).expect("write note");
}

fn status_json(root: &Path) -> serde_json::Value {
    let output = quire_cmd(root)
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success(), "status failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("status JSON")
}

#[test]
fn publish_all_then_status_reports_synced() {
    let root = TempDir::new().expect("root");
    write_note(root.path(), "notes/a.md", true, "alpha");
    write_note(root.path(), "notes/b.md", true, "beta");
    write_note(root.path(), "drafts/c.md", false, "wip");

    let before = status_json(root.path());
    assert_eq!(before["summary"]["new"], 2);

    quire_cmd(root.path())
        .args(["publish", "--all"])
        .assert()
        .success()
        .stdout(contains("published 2 of 2"));

    let after = status_json(root.path());
    assert_eq!(after["summary"]["synced"], 2);
    assert_eq!(after["summary"]["new"], 0);
    assert!(root
        .path()
        .join(".quire/remote/content/notes/a.md")
        .exists());
}

#[test]
fn diff_shows_local_edit_after_publish() {
    let root = TempDir::new().expect("root");
    write_note(root.path(), "a.md", true, "first");
    quire_cmd(root.path())
        .args(["publish", "a.md"])
        .assert()
        .success();

    write_note(root.path(), "a.md", true, "first\nsecond");
    quire_cmd(root.path())
        .args(["diff", "a.md"])
        .assert()
        .success()
        .stdout(contains("--- a/content/a.md"))
        .stdout(contains("+second"));

    let status = status_json(root.path());
    assert_eq!(status["summary"]["modified"], 1);
}

#[test]
fn unpublish_without_record_exits_non_zero() {
    let root = TempDir::new().expect("root");
    write_note(root.path(), "a.md", true, "alpha");

    quire_cmd(root.path())
        .args(["unpublish", "a.md"])
        .assert()
        .failure()
        .stdout(contains("no record found"));
}

#[test]
fn pending_unpublish_removes_retracted_notes() {
    let root = TempDir::new().expect("root");
    write_note(root.path(), "a.md", true, "alpha");
    quire_cmd(root.path())
        .args(["publish", "--all"])
        .assert()
        .success();

    write_note(root.path(), "a.md", false, "alpha");
    quire_cmd(root.path())
        .args(["unpublish", "--pending"])
        .assert()
        .success()
        .stdout(contains("unpublished 1 of 1"));

    assert!(!root.path().join(".quire/remote/content/a.md").exists());
    let status = status_json(root.path());
    assert_eq!(status["items"].as_array().map(Vec::len), Some(0));
}

#[test]
fn site_config_push_detects_conflicts() {
    let root = TempDir::new().expect("root");
    let local = root.path().join("site.yml");
    fs::write(&local, "title: one\n").expect("write local config");

    quire_cmd(root.path())
        .args(["site-config", "push"])
        .arg(&local)
        .assert()
        .success()
        .stdout(contains("saved _config.yml"));

    fs::write(&local, "title: two\n").expect("edit local config");
    quire_cmd(root.path())
        .args(["site-config", "push"])
        .arg(&local)
        .args(["--baseline", "stale-version"])
        .assert()
        .failure()
        .stderr(contains("changed remotely"));
    assert_eq!(
        fs::read_to_string(root.path().join(".quire/remote/_config.yml")).expect("remote"),
        "title: one\n"
    );

    quire_cmd(root.path())
        .args(["site-config", "push"])
        .arg(&local)
        .args(["--baseline", "stale-version", "--on-conflict", "force"])
        .assert()
        .success()
        .stdout(contains("overwrote _config.yml"));
    quire_cmd(root.path())
        .args(["site-config", "show"])
        .assert()
        .success()
        .stdout(contains("title: two"));
}

#[test]
fn cleanup_forgets_records_deleted_remotely() {
    let root = TempDir::new().expect("root");
    write_note(root.path(), "a.md", true, "alpha");
    quire_cmd(root.path())
        .args(["publish", "--all"])
        .assert()
        .success();

    fs::remove_file(root.path().join(".quire/remote/content/a.md")).expect("remove remote");
    quire_cmd(root.path())
        .arg("cleanup")
        .assert()
        .success()
        .stdout(contains("removed 1 stale records"));

    let status = status_json(root.path());
    assert_eq!(status["summary"]["new"], 1);
}

#[test]
fn status_lists_malformed_notes_as_skipped() {
    let root = TempDir::new().expect("root");
    write_note(root.path(), "good.md", true, "fine");
    fs::write(root.path().join("typo.md"), "---\npublish: [\n---\nbroken\n").expect("write");

    let status = status_json(root.path());
    assert_eq!(status["summary"]["new"], 1);
    assert_eq!(status["skipped"][0]["path"], "typo.md");

    quire_cmd(root.path())
        .arg("status")
        .assert()
        .success()
        .stderr(contains("skipped typo.md"));
}
