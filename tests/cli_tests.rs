#[cfg(test)]
#[cfg(unix)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::path::Path;

    const PLAN: &str = r#"
name = "cli-demo"

[params.version]
kind = "semver"

[checkpoints.publish]
message = "Release notes reviewed?"

[[steps]]
name = "prepare"
[steps.action]
type = "command"
program = "sh"
args = ["-c", "echo opened https://example.com/acme/widget/pull/12 for {{params.version}}"]
capture = [{ from = "url", key = "link" }, { from = "pr_number" }]

[[steps]]
name = "publish"
checkpoint = "publish"
[steps.action]
type = "command"
program = "sh"
args = ["-c", "echo published {{steps.prepare.pr_number}} > published.txt"]
"#;

    fn write_plan(dir: &Path, plan: &str) -> std::path::PathBuf {
        let path = dir.join("release.toml");
        std::fs::write(&path, plan).unwrap();
        path
    }

    fn cli(dir: &Path, subcommand: &str) -> Command {
        let mut cmd = Command::cargo_bin("release_orchestrator").unwrap();
        cmd.arg(subcommand)
            .arg("--plan")
            .arg(dir.join("release.toml"))
            .arg("--param")
            .arg("version=1.4.0")
            .arg("--state-dir")
            .arg(dir.join("state"))
            .arg("--repo-root")
            .arg(dir)
            .env_remove("RELEASE_ORCHESTRATOR_STATE_DIR");
        cmd
    }

    #[test]
    fn test_pause_then_resume_with_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(dir.path(), PLAN);

        cli(dir.path(), "run")
            .arg("--allow-dirty")
            .assert()
            .success()
            .stdout(predicate::str::contains("--confirm-checkpoint publish"))
            .stdout(predicate::str::contains("Release notes reviewed?"));
        assert!(dir.path().join("state/cli-demo-1.4.0.json").exists());
        assert!(!dir.path().join("published.txt").exists());

        cli(dir.path(), "run")
            .arg("--allow-dirty")
            .arg("--confirm-checkpoint")
            .arg("publish")
            .assert()
            .success()
            .stdout(predicate::str::contains("Skipping prepare (already completed)"))
            .stdout(predicate::str::contains("\"link\": \"https://example.com/acme/widget/pull/12\""));

        let published = std::fs::read_to_string(dir.path().join("published.txt")).unwrap();
        assert_eq!(published.trim(), "published 12");

        let output = cli(dir.path(), "status").arg("--json").output().unwrap();
        assert!(output.status.success());
        let state: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(state["run_id"], "cli-demo-1.4.0");
        assert_eq!(state["steps"][1]["status"], "done");
    }

    #[test]
    fn test_unknown_checkpoint_exits_with_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(dir.path(), PLAN);

        cli(dir.path(), "run")
            .arg("--allow-dirty")
            .arg("--confirm-checkpoint")
            .arg("yes")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Unknown checkpoint 'yes'"));
        assert!(!dir.path().join("state/cli-demo-1.4.0.json").exists());
    }

    #[test]
    fn test_step_failure_exit_code_and_retry() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(
            dir.path(),
            r#"
name = "cli-demo"

[params.version]

[[steps]]
name = "flaky"
[steps.action]
type = "command"
program = "sh"
args = ["-c", "test -f ok || { echo not yet >&2; exit 1; }"]
"#,
        );

        cli(dir.path(), "run")
            .arg("--allow-dirty")
            .assert()
            .code(3)
            .stderr(predicate::str::contains("not yet"));

        // Still failed: not retried automatically
        std::fs::write(dir.path().join("ok"), b"").unwrap();
        cli(dir.path(), "run")
            .arg("--allow-dirty")
            .assert()
            .code(3)
            .stderr(predicate::str::contains("marked failed"));

        cli(dir.path(), "retry").arg("--step").arg("flaky").assert().success();
        cli(dir.path(), "run").arg("--allow-dirty").assert().success();
    }

    #[test]
    fn test_dry_run_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(dir.path(), PLAN);

        cli(dir.path(), "run")
            .arg("--allow-dirty")
            .arg("--dry-run")
            .assert()
            .success()
            .stdout(predicate::str::contains("prepare: would execute"))
            .stdout(predicate::str::contains("publish: would pause for checkpoint publish"));

        assert!(!dir.path().join("state/cli-demo-1.4.0.json").exists());
        cli(dir.path(), "status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No release run found"));
    }

    #[test]
    fn test_cleanup_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        write_plan(dir.path(), PLAN);

        cli(dir.path(), "run").arg("--allow-dirty").assert().success();
        cli(dir.path(), "cleanup").arg("--yes").assert().success();
        assert!(!dir.path().join("state/cli-demo-1.4.0.json").exists());
        assert!(!dir.path().join("state/cli-demo-1.4.0.lock").exists());
    }
}
