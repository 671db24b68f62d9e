//! Command-line tests for the `labelq` binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A scratch directory with an empty config file and no inherited settings.
struct Sandbox {
    dir: TempDir,
    config: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(&config, "{}").unwrap();
        Self { dir, config }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn db(&self) -> PathBuf {
        self.path().join("tasks.db")
    }

    fn touch(&self, name: &str) {
        std::fs::write(self.path().join(name), b"%PDF-1.5\n").unwrap();
    }

    fn labelq(&self) -> Command {
        let mut cmd = Command::cargo_bin("labelq").unwrap();
        cmd.current_dir(self.path())
            .env_remove("LABELQ_DB_PATH")
            .env_remove("GEMINI_API_KEY")
            .env_remove("GOOGLE_AI_API_KEY")
            .env_remove("LOG_LEVEL")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }
}

#[test]
fn enqueue_is_idempotent_and_counted() {
    let sandbox = Sandbox::new();
    sandbox.touch("a.pdf");
    sandbox.touch("b.pdf");

    sandbox
        .labelq()
        .args(["enqueue", "a.pdf", "b.pdf", "--label-type", "shipping", "--db"])
        .arg(sandbox.db())
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued 2 shipping tasks (0 already queued)"));

    sandbox
        .labelq()
        .args(["enqueue", "*.pdf", "-l", "shipping", "--db"])
        .arg(sandbox.db())
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued 0 shipping tasks (2 already queued)"));

    let output = sandbox
        .labelq()
        .args(["status", "--json", "--db"])
        .arg(sandbox.db())
        .output()
        .unwrap();
    assert!(output.status.success());

    let counts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(counts["pending"], 2);
    assert_eq!(counts["done"], 0);
}

#[test]
fn db_path_is_read_from_environment() {
    let sandbox = Sandbox::new();
    sandbox.touch("r.pdf");

    sandbox
        .labelq()
        .env("LABELQ_DB_PATH", sandbox.db())
        .args(["enqueue", "r.pdf", "-l", "return"])
        .assert()
        .success();

    assert!(sandbox.db().exists());
}

#[test]
fn unknown_label_type_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox.touch("a.pdf");

    sandbox
        .labelq()
        .args(["enqueue", "a.pdf", "-l", "invoice", "--db"])
        .arg(sandbox.db())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown label type"));
}

#[test]
fn sweep_on_fresh_store_changes_nothing() {
    let sandbox = Sandbox::new();

    sandbox
        .labelq()
        .args(["sweep", "--db"])
        .arg(sandbox.db())
        .assert()
        .success()
        .stdout(predicate::str::contains("Requeued 0 tasks, gave up on 0"));
}

#[test]
fn work_requires_an_api_key() {
    let sandbox = Sandbox::new();

    sandbox
        .labelq()
        .args(["work", "--drain", "--no-ocr", "--db"])
        .arg(sandbox.db())
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn work_drain_on_empty_store_exits_cleanly() {
    let sandbox = Sandbox::new();

    sandbox
        .labelq()
        .env("GEMINI_API_KEY", "test-key")
        .args(["work", "--drain", "--no-ocr", "--db"])
        .arg(sandbox.db())
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 0 tasks"));
}

#[test]
fn extract_reports_unreadable_document() {
    let sandbox = Sandbox::new();

    sandbox
        .labelq()
        .args(["extract", "missing.pdf", "--no-ocr"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No text could be extracted"));
}

#[test]
fn config_set_then_get() {
    let sandbox = Sandbox::new();

    sandbox
        .labelq()
        .args(["config", "set", "service.max_attempts", "5"])
        .assert()
        .success();

    sandbox
        .labelq()
        .args(["config", "get", "service.max_attempts"])
        .assert()
        .success()
        .stdout(predicate::str::diff("5\n"));

    sandbox
        .labelq()
        .args(["config", "set", "service.max_attempts", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid value"));
}

#[test]
fn config_path_follows_flag() {
    let sandbox = Sandbox::new();
    let missing = sandbox.path().join("nested").join("labelq.json");

    Command::cargo_bin("labelq")
        .unwrap()
        .current_dir(sandbox.path())
        .arg("-c")
        .arg(&missing)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("labelq.json"))
        .stdout(predicate::str::contains("not created"));
}
