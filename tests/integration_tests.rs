//! Integration tests for pipewright
//!
//! CLI behavior against databases seeded by real engine runs, plus an
//! end-to-end run over a git workspace.

use anyhow::Result;
use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use async_trait::async_trait;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use pipewright::graph::{
    DistillPlan, GraphEngine, NodeId, PipelineAgents, RunOutcome, TurnOutput, VerifyOutcome,
};
use pipewright::state::{
    DocumentRecord, DocumentStatus, EpicRecord, EpicStatus, Gate, ProjectConfig, ResumeSignal,
    RunState, TaskRecord, TaskStatus,
};
use pipewright::store::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointStore, DbHandle,
    ProjectRepository,
};

/// Helper to create a pipewright Command
fn pipewright() -> Command {
    let mut cmd = cargo_bin_cmd!("pipewright");
    cmd.env_remove("PIPEWRIGHT_DB").env_remove("PIPEWRIGHT_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("state.sqlite")
}

/// Agents that produce one epic with `tasks` independent tasks. When
/// `workspace` is set, each implementation turn writes a file there.
struct FileAgents {
    tasks: usize,
    workspace: Option<PathBuf>,
}

#[async_trait]
impl PipelineAgents for FileAgents {
    async fn research(&self, _state: &RunState) -> Result<Vec<DocumentRecord>> {
        Ok(vec![DocumentRecord {
            id: "research".into(),
            kind: "research".into(),
            title: "Findings".into(),
            content: "notes".into(),
            status: DocumentStatus::Draft,
            version: 1,
        }])
    }

    async fn design(&self, _state: &RunState) -> Result<Vec<DocumentRecord>> {
        Ok(vec![DocumentRecord {
            id: "prd".into(),
            kind: "prd".into(),
            title: "PRD".into(),
            content: "requirements".into(),
            status: DocumentStatus::Draft,
            version: 1,
        }])
    }

    async fn distill(&self, _state: &RunState) -> Result<DistillPlan> {
        Ok(DistillPlan {
            requirements: vec![],
            epics: vec![EpicRecord {
                id: "e1".into(),
                name: "core".into(),
                status: EpicStatus::Pending,
                phase_number: 1,
                satisfied_requirement_ids: vec![],
            }],
            tasks: (1..=self.tasks)
                .map(|i| TaskRecord::new(&format!("t{}", i), "e1"))
                .collect(),
        })
    }

    async fn implement(&self, _state: &RunState, task: &TaskRecord) -> Result<TurnOutput> {
        if let Some(dir) = &self.workspace {
            fs::write(dir.join(format!("{}.txt", task.id)), &task.id)?;
        }
        Ok(TurnOutput::text(&format!("implemented {}", task.id)))
    }

    async fn verify(&self, _state: &RunState, _task: &TaskRecord) -> Result<VerifyOutcome> {
        Ok(VerifyOutcome::pass())
    }
}

fn engine_at(path: &Path, tasks: usize) -> Result<(GraphEngine, DbHandle)> {
    let db = DbHandle::open(path)?;
    let engine = GraphEngine::new(
        CheckpointStore::new(db.clone()),
        Arc::new(FileAgents {
            tasks,
            workspace: None,
        }),
    );
    Ok((engine, db))
}

/// Run thread 1 up to the design approval gate.
async fn seed_suspended_run(path: &Path) -> Result<()> {
    let (engine, _) = engine_at(path, 1)?;
    let report = engine
        .invoke(RunState::new(ProjectConfig::new(1, "seeded")))
        .await?;
    assert!(matches!(report.outcome, RunOutcome::Suspended(_)));
    Ok(())
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_pipewright_help() {
        pipewright()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("validate-dag"));
    }

    #[test]
    fn test_pipewright_version() {
        pipewright().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        pipewright().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No pipewright.toml found"))
            .stdout(predicate::str::contains(".pipewright/state.sqlite"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created pipewright.toml"));

        let content = fs::read_to_string(dir.path().join(".pipewright/pipewright.toml")).unwrap();
        assert!(content.contains("[store]"));
        assert!(content.contains("[logging]"));

        pipewright()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_bad_level() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".pipewright")).unwrap();
        fs::write(
            dir.path().join(".pipewright/pipewright.toml"),
            "[logging]\nlevel = \"loud\"\n",
        )
        .unwrap();

        // the bad level also stops tracing setup, so point it at a valid one
        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_LOG", "info")
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Invalid logging.level 'loud'"));
    }

    #[test]
    fn test_env_db_override_is_effective() {
        let dir = create_temp_project();
        let custom = dir.path().join("elsewhere.sqlite");

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_DB", &custom)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("elsewhere.sqlite"));
    }
}

// =============================================================================
// Checkpoint Inspection Tests
// =============================================================================

mod checkpoints {
    use super::*;

    #[tokio::test]
    async fn test_checkpoints_lists_each_step() -> Result<()> {
        let dir = create_temp_project();
        seed_suspended_run(&db_path(&dir)).await?;

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["checkpoints", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Checkpoints for thread 1 (4)"))
            .stdout(predicate::str::contains("approve_design"));

        let output = pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["--json", "checkpoints", "1", "--limit", "2"])
            .output()?;
        assert!(output.status.success());
        let rows: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let rows = rows.as_array().expect("array");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["node"], "approve_design");
        assert_eq!(rows[0]["status"], "paused_for_approval");
        Ok(())
    }

    #[test]
    fn test_checkpoints_empty_thread() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["checkpoints", "42"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints for thread 42"));
    }

    #[tokio::test]
    async fn test_status_shows_pending_gate() -> Result<()> {
        let dir = create_temp_project();
        seed_suspended_run(&db_path(&dir)).await?;

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["status", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Pending gate: design_approval"))
            .stdout(predicate::str::contains("seeded (1)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_recover_reports_resume_point() -> Result<()> {
        let dir = create_temp_project();
        seed_suspended_run(&db_path(&dir)).await?;

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["recover", "1", "--project", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("approval at design_approval"))
            .stdout(predicate::str::contains("history:    4 checkpoint(s)"))
            .stdout(predicate::str::contains("stale tasks: none"))
            .stdout(predicate::str::contains("Marked 0 in-progress task row(s)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_recover_lists_stale_tasks() -> Result<()> {
        let dir = create_temp_project();
        let path = db_path(&dir);
        seed_suspended_run(&path).await?;

        // a run that died between implement and verify
        let store = CheckpointStore::new(DbHandle::open(&path)?);
        let latest = store
            .get_tuple(&CheckpointConfig::for_thread("1"))?
            .expect("checkpoint");
        let mut state = latest.checkpoint.state.clone();
        state.pending_gate = None;
        let mut task = TaskRecord::new("a", "e1");
        task.name = "wire the parser".into();
        task.status = TaskStatus::InProgress;
        state.tasks.push(task);
        store.put(
            &latest.config,
            &Checkpoint::new(state, Some(NodeId::Verify)),
            &CheckpointMetadata {
                source: CheckpointSource::Loop,
                step: latest.metadata.step + 1,
                node: Some(NodeId::Implement),
            },
        )?;

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(&path)
            .args(["recover", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("next node:  verify"))
            .stdout(predicate::str::contains("history:    5 checkpoint(s)"))
            .stdout(predicate::str::contains("stale tasks (continue the run to resume them):"))
            .stdout(predicate::str::contains("- a wire the parser"));
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_force_deletes_thread() -> Result<()> {
        let dir = create_temp_project();
        seed_suspended_run(&db_path(&dir)).await?;

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["purge", "1", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted 4 checkpoint(s) of thread 1"));

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["status", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints for thread 1"));
        Ok(())
    }
}

// =============================================================================
// Rollback Tests
// =============================================================================

mod rollback {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_rows_after_snapshot() -> Result<()> {
        let dir = create_temp_project();
        let path = db_path(&dir);
        let db = DbHandle::open(&path)?;
        let repository = ProjectRepository::new(db.clone());
        let engine = GraphEngine::new(
            CheckpointStore::new(db.clone()),
            Arc::new(FileAgents {
                tasks: 2,
                workspace: None,
            }),
        )
        .with_business_tables();

        let report = engine
            .invoke(RunState::new(ProjectConfig::new(1, "rollback")))
            .await?;
        let snapshot = report.config.checkpoint_id.clone().expect("checkpoint id");
        // keep later rows out of the snapshot's millisecond
        std::thread::sleep(std::time::Duration::from_millis(20));

        let report = engine.resume("1", ResumeSignal::approve()).await?;
        assert!(matches!(
            report.outcome,
            RunOutcome::Suspended(ref p) if p.gate == Gate::DagApproval
        ));
        assert_eq!(repository.get_project_state(1)?.expect("project").tasks.len(), 2);

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(&path)
            .args(["rollback", "1", &snapshot])
            .assert()
            .success()
            .stdout(predicate::str::contains("tasks removed:        2"));

        assert!(repository.get_project_state(1)?.expect("project").tasks.is_empty());
        Ok(())
    }

    #[test]
    fn test_rollback_unknown_checkpoint_fails() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .arg("--db")
            .arg(db_path(&dir))
            .args(["rollback", "1", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Snapshot nope not found"));
    }
}

// =============================================================================
// DAG Validation Tests
// =============================================================================

mod validate_dag {
    use super::*;

    fn write_tasks(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("tasks.json");
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_valid_graph() {
        let dir = create_temp_project();
        let file = write_tasks(
            &dir,
            r#"[
                {"id": "a", "epic_id": "e1"},
                {"id": "b", "epic_id": "e1", "depends_on": ["a"]}
            ]"#,
        );

        pipewright()
            .current_dir(dir.path())
            .arg("validate-dag")
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("Task graph is valid (2 tasks)"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let dir = create_temp_project();
        let file = write_tasks(
            &dir,
            r#"[
                {"id": "a", "epic_id": "e1", "depends_on": ["b"]},
                {"id": "b", "epic_id": "e1", "depends_on": ["a"]}
            ]"#,
        );

        pipewright()
            .current_dir(dir.path())
            .arg("validate-dag")
            .arg(&file)
            .assert()
            .failure()
            .stdout(predicate::str::contains("dependency cycle"))
            .stderr(predicate::str::contains("Task graph rejected"));
    }

    #[test]
    fn test_phase_violations_are_all_reported() {
        let dir = create_temp_project();
        let file = write_tasks(
            &dir,
            r#"[
                {"id": "check", "epic_id": "e1", "phase": "verification"},
                {"id": "plan", "epic_id": "e1", "phase": "expansion", "depends_on": ["check"]},
                {"id": "build", "epic_id": "e1", "phase": "execution", "depends_on": ["check"]}
            ]"#,
        );

        let output = pipewright()
            .current_dir(dir.path())
            .args(["--json", "validate-dag"])
            .arg(&file)
            .output()
            .unwrap();
        assert!(!output.status.success());
        let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(view["valid"], false);
        assert_eq!(view["phase_violations"].as_array().unwrap().len(), 2);
        assert!(view["cycle"].is_null());
    }

    #[test]
    fn test_unreadable_file_fails() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .args(["validate-dag", "missing.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read task file"));
    }
}

// =============================================================================
// Global Flag Tests
// =============================================================================

mod global_flags {
    use super::*;

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        let other = create_temp_project();

        pipewright()
            .current_dir(other.path())
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success();

        assert!(dir.path().join(".pipewright/pipewright.toml").exists());
        assert!(!other.path().join(".pipewright").exists());
    }

    #[test]
    fn test_default_db_lives_under_project_dir() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .args(["checkpoints", "1"])
            .assert()
            .success();

        assert!(dir.path().join(".pipewright/state.sqlite").exists());
    }
}

// =============================================================================
// End-to-end Run Over a Git Workspace
// =============================================================================

mod git_workspace {
    use super::*;
    use pipewright::state::{ProjectStatus, TaskStatus};
    use pipewright::tracker::{GitWorkspace, WorkspaceGuard};

    fn init_repo(dir: &Path) {
        let repo = git2::Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }

    async fn run_to_completion(
        engine: &GraphEngine,
        tasks: usize,
    ) -> Result<pipewright::graph::RunReport> {
        let mut report = engine
            .invoke(RunState::new(ProjectConfig::new(3, "git")))
            .await?;
        // design gate, then one task-graph gate per task
        for _ in 0..=tasks {
            report = engine.resume("3", ResumeSignal::approve()).await?;
        }
        Ok(report)
    }

    #[tokio::test]
    async fn test_each_task_becomes_a_commit() -> Result<()> {
        let repo_dir = create_temp_project();
        let data_dir = create_temp_project();
        init_repo(repo_dir.path());
        let workspace = Arc::new(GitWorkspace::new(repo_dir.path())?);

        let engine = GraphEngine::new(
            CheckpointStore::new(DbHandle::open(&db_path(&data_dir))?),
            Arc::new(FileAgents {
                tasks: 2,
                workspace: Some(repo_dir.path().to_path_buf()),
            }),
        )
        .with_workspace(workspace.clone());

        let report = run_to_completion(&engine, 2).await?;
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.state.status, ProjectStatus::Completed);

        let hashes: Vec<String> = report
            .state
            .tasks
            .iter()
            .map(|t| t.git_commit_hash.clone().expect("hash"))
            .collect();
        assert_ne!(hashes[0], hashes[1]);
        assert_eq!(workspace.head_sha()?, Some(hashes[1].clone()));

        let repo = git2::Repository::open(repo_dir.path())?;
        let head = repo.head()?.peel_to_commit()?;
        assert_eq!(head.message(), Some("task: complete t2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_secret_file_halts_run() -> Result<()> {
        let repo_dir = create_temp_project();
        let data_dir = create_temp_project();
        init_repo(repo_dir.path());
        fs::write(repo_dir.path().join(".env"), "API_TOKEN=abc")?;
        let workspace = Arc::new(GitWorkspace::new(repo_dir.path())?);
        assert!(!workspace.verify_workspace()?.passed);

        let engine = GraphEngine::new(
            CheckpointStore::new(DbHandle::open(&db_path(&data_dir))?),
            Arc::new(FileAgents {
                tasks: 1,
                workspace: Some(repo_dir.path().to_path_buf()),
            }),
        )
        .with_workspace(workspace.clone());

        let report = run_to_completion(&engine, 1).await?;
        assert_eq!(report.outcome, RunOutcome::Halted);
        assert_eq!(report.state.status, ProjectStatus::SecurityPause);
        assert_eq!(report.state.tasks[0].status, TaskStatus::InProgress);
        assert!(workspace.head_sha()?.is_none());

        fs::remove_file(repo_dir.path().join(".env"))?;
        let report = engine.continue_run("3").await?;
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(workspace.head_sha()?.is_some());
        Ok(())
    }
}
