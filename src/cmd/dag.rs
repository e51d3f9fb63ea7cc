//! Offline task-graph validation: `pipewright validate-dag`.

use anyhow::{Context, Result, bail};
use std::path::Path;

use pipewright::dag::{check_phase_order, detect_cycles};
use pipewright::state::TaskRecord;

pub fn cmd_validate_dag(file: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read task file: {}", file.display()))?;
    let tasks: Vec<TaskRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse task list in {}", file.display()))?;

    let cycle = detect_cycles(&tasks);
    let violations = check_phase_order(&tasks);
    let valid = !cycle.has_cycle && violations.is_empty();

    if json {
        let view = serde_json::json!({
            "valid": valid,
            "tasks": tasks.len(),
            "cycle": &cycle.cycle,
            "phase_violations": violations.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!();
        if let Some(path) = &cycle.cycle {
            println!(
                "{} dependency cycle: {}",
                console::style("✗").red(),
                path.join(" -> ")
            );
        }
        for violation in &violations {
            println!("{} phase order: {}", console::style("✗").red(), violation);
        }
        if valid {
            println!(
                "{} Task graph is valid ({} tasks)",
                console::style("✓").green(),
                tasks.len()
            );
        }
        println!();
    }

    if !valid {
        bail!(
            "Task graph rejected: {} cycle(s), {} phase-order violation(s)",
            usize::from(cycle.has_cycle),
            violations.len()
        );
    }
    Ok(())
}
