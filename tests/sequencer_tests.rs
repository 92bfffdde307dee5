mod common;

#[cfg(test)]
mod tests {
    use super::common::{ABC_PLAN, CountingRunner, FakePoller, StubEnv, orchestrator};
    use release_orchestrator::error::{ActionError, ActionErrorKind, CliError, EXIT_LOCKED, ReleaseError, StateError};
    use release_orchestrator::sequencer::{DryRunVerdict, SequenceOutcome};
    use release_orchestrator::state::{RunStatus, StateStore, StepStatus};
    use release_orchestrator::wait::{JobHandle, JobProbe, Poller, ProbeStatus, WaitOutcome};
    use release_orchestrator::{Orchestrator, RunOptions};
    use std::time::Duration;

    fn options(confirmations: &[&str]) -> RunOptions {
        RunOptions {
            confirmations: confirmations.iter().map(|c| c.to_string()).collect(),
            dry_run: false,
            allow_dirty: false,
        }
    }

    fn persisted(orchestrator: &Orchestrator) -> release_orchestrator::ReleaseRun {
        orchestrator.status().unwrap().expect("run should be persisted")
    }

    #[tokio::test]
    async fn test_pause_then_confirm_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let poller = FakePoller::succeeding();
        let env = StubEnv::default();

        // First invocation: A runs, B pauses at X
        let report = orch
            .run_with(&options(&[]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            SequenceOutcome::Paused {
                step: "B".into(),
                checkpoint: "X".into(),
                message: "Check the release branch before opening the PR".into(),
            }
        );
        assert_eq!(runner.calls("A"), 1);
        assert_eq!(runner.calls("B"), 0);

        let run = persisted(&orch);
        assert_eq!(run.status(), RunStatus::Paused);
        assert_eq!(run.step("A").unwrap().status, StepStatus::Done);
        assert_eq!(run.step("B").unwrap().status, StepStatus::AwaitingConfirmation);
        assert_eq!(run.pending_checkpoint.as_ref().unwrap().name, "X");

        // Second invocation confirms X: A skipped, B and C run, D pauses at Y
        let report = orch
            .run_with(&options(&["X"]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();
        assert!(matches!(report.outcome, SequenceOutcome::Paused { ref checkpoint, .. } if checkpoint == "Y"));
        assert_eq!(runner.calls("A"), 1);
        assert_eq!(runner.calls("B"), 1);
        assert_eq!(runner.calls("C"), 1);

        let waits = poller.waits();
        assert_eq!(waits.len(), 1);
        assert!(matches!(waits[0].0, JobHandle::WorkflowRun { run_id: 7, .. }));
        assert_eq!(waits[0].1, Duration::from_secs(10));
        assert_eq!(waits[0].2, Duration::from_secs(60));

        let run = persisted(&orch);
        let c = run.step("C").unwrap();
        assert_eq!(c.status, StepStatus::Done);
        assert_eq!(c.outputs["ran"], serde_json::json!("C"));
        assert_eq!(c.outputs["conclusion"], serde_json::json!("success"));
        assert!(c.job.is_none());

        // Third invocation confirms Y and finishes
        let report = orch
            .run_with(&options(&["Y"]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();
        assert_eq!(report.outcome, SequenceOutcome::Completed);
        assert_eq!(persisted(&orch).status(), RunStatus::Done);

        // A completed run is a no-op on re-invocation
        let before = runner.total_calls();
        let report = orch
            .run_with(&options(&[]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();
        assert_eq!(report.outcome, SequenceOutcome::Completed);
        assert_eq!(runner.total_calls(), before);
        assert_eq!(poller.waits().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_for_another_checkpoint_keeps_pause() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let poller = FakePoller::succeeding();
        let env = StubEnv::default();

        orch.run_with(&options(&[]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();

        // Y is declared but gates D, not B
        let report = orch
            .run_with(&options(&["Y"]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();
        assert!(matches!(report.outcome, SequenceOutcome::Paused { ref step, .. } if step == "B"));
        assert_eq!(runner.calls("B"), 0);
        assert_eq!(persisted(&orch).step("B").unwrap().status, StepStatus::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn test_unknown_checkpoint_is_rejected_before_anything_runs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();

        let err = orch
            .run_with(&options(&["yes"]), runner.clone(), FakePoller::succeeding(), &StubEnv::default(), &())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Cli(CliError::UnknownCheckpoint { .. })));
        assert_eq!(runner.total_calls(), 0);
        assert!(orch.status().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_done_side_effecting_step_not_repeated_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let poller = FakePoller::succeeding();
        let env = StubEnv::default();

        orch.run_with(&options(&[]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();

        // Simulate a crash while C was waiting on its workflow run
        {
            let store = StateStore::open(orch.state_path(), orch.run_id()).unwrap();
            let mut run = store.load().unwrap();
            for name in ["B", "C"] {
                let record = run.step_mut(name).unwrap();
                record.transition(StepStatus::Running).unwrap();
                if name == "B" {
                    record.transition(StepStatus::Done).unwrap();
                } else {
                    record.job = Some(JobHandle::WorkflowRun { run_id: 99, url: None });
                    record.transition(StepStatus::WaitingRemote).unwrap();
                }
            }
            run.pending_checkpoint = None;
            store.save(&mut run).unwrap();
        }

        orch.run_with(&options(&[]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();

        // B and C were never re-executed; C resumed polling its persisted job
        assert_eq!(runner.calls("B"), 0);
        assert_eq!(runner.calls("C"), 0);
        let waits = poller.waits();
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].0, JobHandle::WorkflowRun { run_id: 99, url: None });
        assert_eq!(persisted(&orch).step("C").unwrap().status, StepStatus::Done);
    }

    #[tokio::test]
    async fn test_interrupted_running_step_is_reentered_once() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let env = StubEnv::default();

        // Crash right after A entered running
        {
            let store = StateStore::open(orch.state_path(), orch.run_id()).unwrap();
            let plan = orch.plan();
            let mut run = release_orchestrator::ReleaseRun::new(
                orch.run_id().to_string(),
                plan.name.clone(),
                [("version".to_string(), "2.5.0".to_string())].into(),
                &plan.identity_params,
                &plan.steps,
                false,
            );
            run.steps[0].transition(StepStatus::Running).unwrap();
            store.save(&mut run).unwrap();
        }

        orch.run_with(&options(&[]), runner.clone(), FakePoller::succeeding(), &env, &())
            .await
            .unwrap();

        assert_eq!(runner.calls("A"), 1);
        let a = persisted(&orch).step("A").unwrap().clone();
        assert_eq!(a.status, StepStatus::Done);
        assert_eq!(a.attempts, 2);
    }

    #[tokio::test]
    async fn test_failed_step_halts_until_retried() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let poller = FakePoller::succeeding();
        let env = StubEnv::default();
        runner.fail("B");

        let err = orch
            .run_with(&options(&["X"]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Action(ActionError::Failed { ref step, .. }) if step == "B"));
        assert_eq!(err.exit_code(), 3);

        let run = persisted(&orch);
        let b = run.step("B").unwrap();
        assert_eq!(b.status, StepStatus::Failed);
        assert_eq!(b.error.as_ref().unwrap().kind, ActionErrorKind::Action);

        // Never auto-retried
        runner.heal("B");
        let err = orch
            .run_with(&options(&["X"]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Action(ActionError::PreviouslyFailed { .. })));
        assert_eq!(runner.calls("B"), 1);

        orch.retry("B").unwrap();
        orch.run_with(&options(&["X", "Y"]), runner.clone(), poller.clone(), &env, &())
            .await
            .unwrap();
        assert_eq!(runner.calls("B"), 2);
        let run = persisted(&orch);
        assert_eq!(run.status(), RunStatus::Done);
        assert_eq!(run.step("B").unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_step_is_skipped_with_operator_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let env = StubEnv::default();
        runner.fail("A");

        orch.run_with(&options(&[]), runner.clone(), FakePoller::succeeding(), &env, &())
            .await
            .unwrap_err();

        let outputs = [("ran".to_string(), serde_json::json!("by hand"))].into();
        orch.resolve("A", outputs).unwrap();

        orch.run_with(&options(&[]), runner.clone(), FakePoller::succeeding(), &env, &())
            .await
            .unwrap();
        assert_eq!(runner.calls("A"), 1);
        let a = persisted(&orch).step("A").unwrap().clone();
        assert!(a.resolved_manually);
        assert_eq!(a.outputs["ran"], serde_json::json!("by hand"));
    }

    #[tokio::test]
    async fn test_remote_failure_recorded_as_remote_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let poller = FakePoller::new(WaitOutcome::Failed("conclusion: failure".into()));

        let err = orch
            .run_with(&options(&["X"]), CountingRunner::default(), poller, &StubEnv::default(), &())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Action(ActionError::Failed { .. })));

        let c = persisted(&orch).step("C").unwrap().clone();
        assert_eq!(c.status, StepStatus::Failed);
        assert_eq!(c.error.unwrap().kind, ActionErrorKind::RemoteFailure);
    }

    struct NeverFinishes;

    impl JobProbe for NeverFinishes {
        async fn probe(&self, _job: &JobHandle) -> release_orchestrator::Result<ProbeStatus> {
            Ok(ProbeStatus::Pending("in_progress".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_from_remote_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");

        let started = tokio::time::Instant::now();
        let err = orch
            .run_with(
                &options(&["X"]),
                CountingRunner::default(),
                Poller::new(NeverFinishes),
                &StubEnv::default(),
                &(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReleaseError::Action(ActionError::Timeout { ref step, timeout_secs: 60 }) if step == "C"
        ));
        assert!(started.elapsed() >= Duration::from_secs(60));

        let c = persisted(&orch).step("C").unwrap().clone();
        assert_eq!(c.status, StepStatus::Failed);
        assert_eq!(c.error.unwrap().kind, ActionErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();
        let poller = FakePoller::succeeding();

        let report = orch
            .run_with(
                &RunOptions {
                    confirmations: vec!["X".into()],
                    dry_run: true,
                    allow_dirty: false,
                },
                runner.clone(),
                poller.clone(),
                &StubEnv::default(),
                &(),
            )
            .await
            .unwrap();

        let SequenceOutcome::DryRun(dry) = report.outcome else {
            panic!("expected a dry-run report");
        };
        assert_eq!(dry.verdict("A"), Some(&DryRunVerdict::WouldExecute));
        assert_eq!(dry.verdict("B"), Some(&DryRunVerdict::WouldExecute));
        assert_eq!(dry.verdict("C"), Some(&DryRunVerdict::WouldWait));
        assert_eq!(
            dry.verdict("D"),
            Some(&DryRunVerdict::WouldPause {
                checkpoint: "Y".into()
            })
        );
        assert!(!dry.has_failures());

        // Side-effecting steps never reached the real runner, the poller was never used
        assert_eq!(runner.total_calls(), 0);
        assert!(poller.waits().is_empty());
        assert!(!orch.state_path().exists());
        assert!(orch.status().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dry_run_honours_recorded_side_effecting_class() {
        const GATED: &str = r#"
name = "demo"

[params.version]

[[steps]]
name = "lint"
checkpoint = "go"
[steps.action]
type = "noop"
"#;
        let dir = tempfile::tempdir().unwrap();
        let runner = CountingRunner::default();

        // Recorded as side-effecting-once, paused before running
        let first = orchestrator(GATED, dir.path(), "2.5.0");
        let report = first
            .run_with(&options(&[]), runner.clone(), FakePoller::succeeding(), &StubEnv::default(), &())
            .await
            .unwrap();
        assert!(matches!(report.outcome, SequenceOutcome::Paused { .. }));

        // The plan was later relaxed to safe-to-repeat
        let relaxed = GATED.replace("checkpoint = \"go\"", "checkpoint = \"go\"\nidempotency = \"safe-to-repeat\"");
        let second = orchestrator(&relaxed, dir.path(), "2.5.0");
        let report = second
            .run_with(
                &RunOptions {
                    confirmations: vec!["go".into()],
                    dry_run: true,
                    allow_dirty: false,
                },
                runner.clone(),
                FakePoller::succeeding(),
                &StubEnv::default(),
                &(),
            )
            .await
            .unwrap();

        let SequenceOutcome::DryRun(dry) = report.outcome else {
            panic!("expected a dry-run report");
        };
        assert_eq!(dry.verdict("lint"), Some(&DryRunVerdict::WouldExecute));
        assert_eq!(runner.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_lock_contention_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        let runner = CountingRunner::default();

        let _held = StateStore::open(orch.state_path(), orch.run_id()).unwrap();
        let err = orch
            .run_with(&options(&[]), runner.clone(), FakePoller::succeeding(), &StubEnv::default(), &())
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::State(StateError::RunLocked { .. })));
        assert_eq!(err.exit_code(), EXIT_LOCKED);
        assert_eq!(runner.total_calls(), 0);

        // A different run id is independent
        let other = orchestrator(ABC_PLAN, dir.path(), "2.6.0");
        other
            .run_with(&options(&[]), runner.clone(), FakePoller::succeeding(), &StubEnv::default(), &())
            .await
            .unwrap();
        assert_eq!(runner.calls("A"), 1);
    }

    #[tokio::test]
    async fn test_param_mismatch_on_pinned_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(ABC_PLAN, dir.path(), "2.5.0");
        orch.run_with(&options(&[]), CountingRunner::default(), FakePoller::succeeding(), &StubEnv::default(), &())
            .await
            .unwrap();

        let plan = release_orchestrator::ReleasePlan::parse(ABC_PLAN).unwrap();
        let diverging = Orchestrator::new(
            plan,
            release_orchestrator::RunTarget {
                params: [("version".to_string(), "2.5.1".to_string())].into(),
                state_file: Some(orch.state_path().to_path_buf()),
                state_dir: None,
                repo_root: dir.path().to_path_buf(),
            },
            release_orchestrator::Settings::default(),
        )
        .unwrap();

        let err = diverging
            .run_with(&options(&[]), CountingRunner::default(), FakePoller::succeeding(), &StubEnv::default(), &())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::State(StateError::Corrupted { .. })));
        assert!(err.to_string().contains("demo-2.5.0"));
    }
}
