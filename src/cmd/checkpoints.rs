//! Checkpoint inspection and purge commands.

use anyhow::Result;
use serde::Serialize;

use pipewright::config::Config;
use pipewright::recovery::RecoveryManager;
use pipewright::state::TaskStatus;
use pipewright::store::{CheckpointConfig, CheckpointStore, CheckpointTuple};

#[derive(Serialize)]
struct CheckpointRow {
    checkpoint_id: String,
    parent_id: Option<String>,
    step: i64,
    source: String,
    node: Option<String>,
    next_node: Option<String>,
    status: String,
    created_at: String,
}

impl From<&CheckpointTuple> for CheckpointRow {
    fn from(tuple: &CheckpointTuple) -> Self {
        Self {
            checkpoint_id: tuple.checkpoint.id.clone(),
            parent_id: tuple
                .parent_config
                .as_ref()
                .and_then(|p| p.checkpoint_id.clone()),
            step: tuple.metadata.step,
            source: tuple.metadata.source.as_str().to_string(),
            node: tuple.metadata.node.map(|n| n.to_string()),
            next_node: tuple.checkpoint.next_node.map(|n| n.to_string()),
            status: tuple.checkpoint.state.status.to_string(),
            created_at: tuple.created_at.clone(),
        }
    }
}

fn open_store(config: &Config) -> Result<CheckpointStore> {
    Ok(CheckpointStore::new(config.open_db()?))
}

fn thread_config(config: &Config, thread: &str) -> CheckpointConfig {
    CheckpointConfig::for_thread(thread).with_namespace(&config.namespace)
}

pub fn cmd_checkpoints(config: &Config, thread: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let tuples = store.list(&thread_config(config, thread), limit)?;
    let rows: Vec<CheckpointRow> = tuples.iter().map(CheckpointRow::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!();
    if rows.is_empty() {
        println!("No checkpoints for thread {}", thread);
        println!();
        return Ok(());
    }

    println!("Checkpoints for thread {} ({})", thread, rows.len());
    println!();
    println!(
        "{:<6} {:<8} {:<18} {:<18} {:<26} Checkpoint",
        "Step", "Source", "Node", "Next", "Created"
    );
    println!(
        "{:<6} {:<8} {:<18} {:<18} {:<26} ----------",
        "----", "------", "----", "----", "-------"
    );
    for row in &rows {
        println!(
            "{:<6} {:<8} {:<18} {:<18} {:<26} {}",
            row.step,
            row.source,
            row.node.as_deref().unwrap_or("-"),
            row.next_node.as_deref().unwrap_or("(end)"),
            row.created_at,
            console::style(&row.checkpoint_id).dim()
        );
    }
    println!();
    Ok(())
}

#[derive(Serialize)]
struct StatusView {
    thread_id: String,
    checkpoint: CheckpointRow,
    pending_gate: Option<String>,
    active_epic_id: Option<String>,
    active_task_id: Option<String>,
    tasks_total: usize,
    tasks_completed: usize,
    errors: usize,
    implementation_turns: u32,
    stale_tasks: Vec<String>,
}

pub fn cmd_status(config: &Config, thread: &str, json: bool) -> Result<()> {
    let manager = RecoveryManager::new(open_store(config)?).with_namespace(&config.namespace);
    let Some(info) = manager.recover_project(thread)? else {
        if json {
            println!("null");
        } else {
            println!();
            println!("No checkpoints for thread {}", thread);
            println!();
        }
        return Ok(());
    };

    let state = &info.tuple.checkpoint.state;
    let view = StatusView {
        thread_id: info.thread_id.clone(),
        checkpoint: CheckpointRow::from(&info.tuple),
        pending_gate: state.pending_gate.map(|g| g.to_string()),
        active_epic_id: state.active_epic_id.clone(),
        active_task_id: state.active_task_id.clone(),
        tasks_total: state.tasks.len(),
        tasks_completed: state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count(),
        errors: state.error_history.len(),
        implementation_turns: state.implementation_turns,
        stale_tasks: info.stale_tasks.iter().map(|t| t.task_id.clone()).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!();
    println!("Thread {}", view.thread_id);
    println!("==========");
    println!();
    println!("Project:      {} ({})", state.project.name, state.project.project_id);
    println!("Status:       {}", view.checkpoint.status);
    println!(
        "Checkpoint:   {} (step {}, {})",
        view.checkpoint.checkpoint_id, view.checkpoint.step, view.checkpoint.created_at
    );
    println!(
        "Next node:    {}",
        view.checkpoint.next_node.as_deref().unwrap_or("(run ended)")
    );
    if let Some(gate) = &view.pending_gate {
        println!("Pending gate: {}", console::style(gate).yellow());
    }
    println!(
        "Active:       epic {} / task {}",
        view.active_epic_id.as_deref().unwrap_or("-"),
        view.active_task_id.as_deref().unwrap_or("-")
    );
    println!("Tasks:        {}/{} completed", view.tasks_completed, view.tasks_total);
    println!("Turns:        {}", view.implementation_turns);
    println!("Errors:       {}", view.errors);
    if let Some(last) = state.error_history.last() {
        println!(
            "Last error:   [{}] {} ({}x)",
            last.source_node, last.message, last.consecutive_count
        );
    }
    if !info.stale_tasks.is_empty() {
        println!();
        println!("Stale tasks (left in progress):");
        for task in &info.stale_tasks {
            println!("  - {} {} (epic {})", task.task_id, task.name, task.epic_id);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_purge(config: &Config, thread: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let store = open_store(config)?;
    let count = store.count(thread)?;
    if count == 0 {
        println!("No checkpoints for thread {}", thread);
        return Ok(());
    }

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Delete {} checkpoint(s) of thread {}? This cannot be undone.",
                count, thread
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Purge cancelled");
            return Ok(());
        }
    }

    store.delete_thread(thread)?;
    println!("Deleted {} checkpoint(s) of thread {}", count, thread);
    Ok(())
}
