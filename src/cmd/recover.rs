//! Crash recovery and relational rollback commands.

use anyhow::Result;

use pipewright::config::Config;
use pipewright::recovery::{RecoveryManager, RelationalRollback};
use pipewright::store::CheckpointStore;

pub fn cmd_recover(config: &Config, thread: &str, project: Option<i64>, json: bool) -> Result<()> {
    let manager =
        RecoveryManager::new(CheckpointStore::new(config.open_db()?)).with_namespace(&config.namespace);

    let Some(info) = manager.recover_project(thread)? else {
        if json {
            println!("null");
        } else {
            println!("No checkpoint to recover for thread {}", thread);
        }
        return Ok(());
    };

    let summary = manager.summary(thread)?;
    let marked = match project {
        Some(project_id) => Some(manager.mark_in_progress_tasks_as_resumed(project_id)?),
        None => None,
    };

    if json {
        let view = serde_json::json!({
            "thread_id": info.thread_id,
            "checkpoint_id": info.checkpoint_id,
            "checkpoint_count": summary.checkpoint_count,
            "next_node": info.tuple.checkpoint.next_node,
            "pending_gate": info.tuple.checkpoint.state.pending_gate,
            "stale_tasks": info.stale_tasks,
            "marked_resumed": marked,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let state = &info.tuple.checkpoint.state;
    println!();
    println!("Resume point for thread {}", info.thread_id);
    println!("  checkpoint: {}", info.checkpoint_id);
    println!("  history:    {} checkpoint(s)", summary.checkpoint_count);
    match (state.pending_gate, info.tuple.checkpoint.next_node) {
        (Some(gate), _) => println!("  waiting:    approval at {}", gate),
        (None, Some(node)) => println!("  next node:  {}", node),
        (None, None) => println!("  run ended with status {}", state.status),
    }

    if info.stale_tasks.is_empty() {
        println!("  stale tasks: none");
    } else {
        println!("  stale tasks (continue the run to resume them):");
        for task in &info.stale_tasks {
            println!(
                "    - {} {} {}",
                task.task_id,
                task.name,
                console::style(format!("(epic {})", task.epic_id)).dim()
            );
        }
    }
    if let Some(count) = marked {
        println!();
        println!("Marked {} in-progress task row(s) as resumed", count);
    }
    println!();
    Ok(())
}

pub fn cmd_rollback(config: &Config, project: i64, checkpoint: &str, json: bool) -> Result<()> {
    let rollback = RelationalRollback::new(CheckpointStore::new(config.open_db()?));
    let report = rollback.rollback_to_snapshot(project, checkpoint)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "Rolled project {} back to checkpoint {} ({})",
        project, report.checkpoint_id, report.snapshot_at
    );
    println!("  agent logs removed:   {}", report.logs_deleted);
    println!("  tasks removed:        {}", report.tasks_deleted);
    println!("  requirements removed: {}", report.requirements_deleted);
    println!();
    Ok(())
}
