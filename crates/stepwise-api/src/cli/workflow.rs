//! CLI workflow and run subcommands.
//!
//! Provides start, run, status, history, cancel, list and validate against
//! the local run registry.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use uuid::Uuid;

use stepwise_core::workflow::PollOptions;
use stepwise_core::workflow::definition::load_simple_workflow;
use stepwise_core::workflow::poll::run_and_wait;
use stepwise_core::workflow::validator::validate_simple_workflow;
use stepwise_types::workflow::{RunReport, RunStatus, StepStatus, WorkflowRun};

use crate::state::AppState;

/// Parse the `--input` argument.
pub fn parse_input(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--input is not valid JSON: {raw}"))
}

// ---------------------------------------------------------------------------
// Start / run
// ---------------------------------------------------------------------------

/// Record a new run and return without waiting. The run is driven by the
/// next `stepwise serve` that resumes unfinished runs.
pub async fn start_run(state: &AppState, workflow: &str, input: &str, json: bool) -> Result<()> {
    let input = parse_input(input)?;
    let run_id = state.controller.start(workflow, input).await?;

    if json {
        let out = serde_json::json!({ "runId": run_id, "status": "pending" });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Started '{}' as run {}",
        style("*").green().bold(),
        style(workflow).cyan(),
        style(run_id).cyan()
    );
    println!(
        "  Check progress with: {}",
        style(format!("stepwise status {run_id}")).dim()
    );
    println!();
    Ok(())
}

/// Start a run in this process and wait for it to finish.
pub async fn run_workflow(
    state: &AppState,
    workflow: &str,
    input: &str,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let input = parse_input(input)?;
    let options = PollOptions {
        interval: state.poll.interval.min(Duration::from_millis(250)),
        timeout: timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(state.poll.timeout),
    };

    let report = run_and_wait(&state.controller, workflow, input, &options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display_report(&report)?;
    }

    if report.status != RunStatus::Completed {
        bail!("run {} finished {}", report.run_id, report.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

pub async fn show_status(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let run = state.controller.get_run(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }
    display_single_run(&run)
}

pub async fn show_history(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let steps = state.controller.get_run_history(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    if steps.is_empty() {
        println!();
        println!("  No steps recorded for run {}.", style(run_id).cyan());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Attempt"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Error"),
        ]);

    for step in &steps {
        table.add_row(vec![
            Cell::new(&step.step_name),
            Cell::new(step.kind.as_str()),
            Cell::new(step.attempt_count),
            format_step_status(step.status),
            Cell::new(step.started_at.format("%H:%M:%S%.3f")),
            Cell::new(step.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn cancel_run(state: &AppState, run_id: Uuid, reason: &str, json: bool) -> Result<()> {
    let run = state.controller.cancel(run_id, reason).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Cancelled run {}",
        style("*").green().bold(),
        style(run_id).cyan()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

pub fn list_workflows(state: &AppState, json: bool) -> Result<()> {
    let workflows = state.controller.workflows().list();

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Tags"),
            Cell::new("Description"),
        ]);

    for w in &workflows {
        let kind = serde_json::to_value(w.kind)?;
        table.add_row(vec![
            Cell::new(&w.name),
            Cell::new(kind.as_str().unwrap_or_default()),
            Cell::new(w.tags.join(", ")),
            Cell::new(w.description.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn list_runs(
    state: &AppState,
    workflow: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let runs = state.controller.list_runs(workflow, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No runs recorded.");
        println!(
            "  Start one with: {}",
            style("stepwise start <workflow> --input '{...}'").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Finished"),
        ]);

    for run in &runs {
        table.add_row(vec![
            Cell::new(run.id),
            Cell::new(&run.workflow_name),
            format_run_status(run.status),
            Cell::new(run.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(
                run.finished_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Parse and validate a simple workflow file without registering it.
pub fn validate_file(state: &AppState, path: &Path, json: bool) -> Result<()> {
    let definition = load_simple_workflow(path)?;
    let issues = validate_simple_workflow(&definition, state.controller.targets());

    if json {
        let out = serde_json::json!({
            "name": definition.name,
            "valid": issues.is_empty(),
            "issues": issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if issues.is_empty() {
        println!();
        println!(
            "  {} '{}' is valid",
            style("*").green().bold(),
            style(&definition.name).cyan()
        );
        println!();
    } else {
        println!();
        println!(
            "  {} '{}' has {} issue(s):",
            style("x").red().bold(),
            style(&definition.name).cyan(),
            issues.len()
        );
        for issue in &issues {
            println!("    - {}", style(issue).red());
        }
        println!();
    }

    if !issues.is_empty() {
        bail!("workflow '{}' is invalid", definition.name);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn display_single_run(run: &WorkflowRun) -> Result<()> {
    println!();
    println!(
        "  {} Run {}",
        style("Workflow:").bold(),
        style(run.id).cyan()
    );
    println!("  Workflow: {}", style(&run.workflow_name).cyan());
    println!("  Status: {}", styled_status(run.status));
    println!("  Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(finished) = run.finished_at {
        println!("  Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ref output) = run.output {
        println!("  Output: {}", serde_json::to_string(output)?);
    }
    if let Some(ref err) = run.error {
        println!("  Error: {}", style(&err.message).red());
    }
    println!();
    Ok(())
}

fn display_report(report: &RunReport) -> Result<()> {
    println!();
    println!(
        "  {} '{}' finished {}",
        style(report.run_id).cyan(),
        report.workflow_name,
        styled_status(report.status)
    );
    for step in &report.steps {
        let marker = match step.status {
            StepStatus::Succeeded => style("ok").green(),
            StepStatus::Failed => style("failed").red(),
            StepStatus::Running => style("running").blue(),
        };
        println!(
            "    {} {} (attempt {})",
            marker, step.step_name, step.attempt_count
        );
    }
    if let Some(ref output) = report.output {
        println!("  Output: {}", serde_json::to_string_pretty(output)?);
    }
    if let Some(ref err) = report.error {
        println!("  Error: {}", style(&err.message).red());
    }
    println!();
    Ok(())
}

fn styled_status(status: RunStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        RunStatus::Pending => style(text).yellow(),
        RunStatus::Running => style(text).blue(),
        RunStatus::Completed => style(text).green(),
        RunStatus::Failed => style(text).red(),
        RunStatus::Cancelled => style(text).yellow().dim(),
    }
}

fn format_run_status(status: RunStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        RunStatus::Pending => cell.fg(Color::Yellow),
        RunStatus::Running => cell.fg(Color::Blue),
        RunStatus::Completed => cell.fg(Color::Green),
        RunStatus::Failed => cell.fg(Color::Red),
        RunStatus::Cancelled => cell.fg(Color::DarkYellow),
    }
}

fn format_step_status(status: StepStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        StepStatus::Running => cell.fg(Color::Blue),
        StepStatus::Succeeded => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::in_memory_state;

    #[test]
    fn parse_input_reports_bad_json() {
        assert_eq!(parse_input(r#"{"a":1}"#).unwrap()["a"], 1);
        let err = parse_input("{oops").unwrap_err();
        assert!(err.to_string().contains("--input is not valid JSON"));
    }

    #[test]
    fn validate_file_accepts_bundled_workflow_and_rejects_unknown_target() {
        let state = in_memory_state();
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.yaml");
        std::fs::write(&good, crate::workflows::SEQUENTIAL_INVITE_YAML).unwrap();
        validate_file(&state, &good, true).unwrap();

        let bad = dir.path().join("bad.yaml");
        std::fs::write(
            &bad,
            "name: bad\nsteps:\n  - type: step\n    name: Nope\n    rpc: chargeCard\n",
        )
        .unwrap();
        let err = validate_file(&state, &bad, true).unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[tokio::test]
    async fn run_workflow_fails_for_unsuccessful_run() {
        let state = in_memory_state();
        let err = run_workflow(&state, "unhappy-retry", r#"{"value":-1}"#, None, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));

        run_workflow(&state, "happy-retry", r#"{"value":1}"#, None, true)
            .await
            .unwrap();
    }
}
