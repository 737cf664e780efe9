//! CLI execution subcommands.
//!
//! Start executions, report link outcomes on behalf of an external invoker,
//! and operate running executions (pause, unpause, resume, cancel, fail).
//! Audit views list attempts and checkpoints.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use skillchain_types::chain::ChainId;
use skillchain_types::execution::{
    Execution, ExecutionId, ExecutionStatus, LinkOutcome, OutcomeReport, ReportedOutcome,
    Resolution, Transition,
};

use crate::state::AppState;

/// Execution subcommands.
#[derive(Subcommand)]
pub enum ExecCommand {
    /// Start an execution of a published chain.
    Start {
        /// Chain name or id.
        chain: String,

        /// Input values as a JSON object.
        #[arg(long)]
        input: Option<String>,

        /// Who is starting the execution.
        #[arg(long, env = "SKC_ACTOR")]
        actor: Option<String>,
    },

    /// Show an execution's status.
    Status {
        /// Execution UUID.
        execution_id: String,
    },

    /// List recent executions.
    List {
        /// Filter by chain name or id.
        #[arg(long)]
        chain: Option<String>,

        /// Filter by status (pending, running, paused, completed, failed, cancelled).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of executions to display.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Report the outcome of the pending attempt.
    Report {
        /// Execution UUID.
        execution_id: String,

        /// Link the outcome belongs to.
        #[arg(long)]
        link: String,

        /// Attempt number the outcome belongs to.
        #[arg(long)]
        attempt: u32,

        /// Successful output as JSON.
        #[arg(long, conflicts_with = "error")]
        output: Option<String>,

        /// Failure message.
        #[arg(long)]
        error: Option<String>,

        /// Reason to record if the failure escalates by link policy.
        #[arg(long, requires = "error")]
        escalation_reason: Option<String>,
    },

    /// Pause a running execution.
    Pause {
        execution_id: String,
        #[arg(long, env = "SKC_ACTOR")]
        actor: Option<String>,
    },

    /// Lift an operator pause.
    Unpause {
        execution_id: String,
        #[arg(long, env = "SKC_ACTOR")]
        actor: Option<String>,
    },

    /// Resolve an execution that is awaiting intervention.
    Resume {
        execution_id: String,
        #[arg(long, env = "SKC_ACTOR")]
        actor: Option<String>,
        #[command(subcommand)]
        action: ResumeAction,
    },

    /// Cancel an execution.
    Cancel {
        execution_id: String,
        #[arg(long, env = "SKC_ACTOR")]
        actor: Option<String>,
    },

    /// Mark an execution as failed.
    Fail {
        execution_id: String,

        /// Why the execution cannot continue.
        #[arg(long)]
        reason: String,

        #[arg(long, env = "SKC_ACTOR")]
        actor: Option<String>,
    },

    /// List every attempt of an execution.
    Attempts { execution_id: String },

    /// List the checkpoint log of an execution.
    Checkpoints { execution_id: String },

    /// Rebuild the execution context from checkpoints and compare it with
    /// the stored one.
    Context { execution_id: String },
}

/// Operator decision for `exec resume`.
#[derive(Subcommand)]
pub enum ResumeAction {
    /// Make a fresh attempt at the current link.
    Retry,
    /// Continue at another link.
    Skip {
        /// Link to continue at.
        link_id: String,
    },
    /// End the execution.
    Cancel,
}

impl From<ResumeAction> for Resolution {
    fn from(action: ResumeAction) -> Self {
        match action {
            ResumeAction::Retry => Resolution::Retry,
            ResumeAction::Skip { link_id } => Resolution::Skip { link_id },
            ResumeAction::Cancel => Resolution::Cancel,
        }
    }
}

/// Handle an execution subcommand.
pub async fn handle_exec_command(cmd: ExecCommand, state: &AppState, json: bool) -> Result<()> {
    let engine = &state.engine;

    match cmd {
        ExecCommand::Start {
            chain,
            input,
            actor,
        } => {
            let chain = engine.find_chain(&chain).await?;
            let input = parse_json_arg(input.as_deref(), "--input")?
                .unwrap_or_else(|| serde_json::json!({}));
            let transition = engine.start(&chain.id, input, actor).await?;
            print_transition(&transition, "Started execution", json)
        }
        ExecCommand::Status { execution_id } => {
            let execution = engine.get_execution(&parse_execution_id(&execution_id)?).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&execution)?);
            } else {
                print_execution(&execution);
            }
            Ok(())
        }
        ExecCommand::List {
            chain,
            status,
            limit,
        } => handle_list(chain.as_deref(), status.as_deref(), limit, state, json).await,
        ExecCommand::Report {
            execution_id,
            link,
            attempt,
            output,
            error,
            escalation_reason,
        } => {
            let outcome = match (output, error) {
                (_, Some(error)) => ReportedOutcome::Failure {
                    error,
                    escalation_reason,
                },
                (output, None) => ReportedOutcome::Success {
                    output: parse_json_arg(output.as_deref(), "--output")?
                        .unwrap_or(serde_json::Value::Null),
                },
            };
            let report = OutcomeReport {
                link_id: link,
                attempt_number: attempt,
                outcome,
            };
            let transition = engine
                .record_outcome(&parse_execution_id(&execution_id)?, report)
                .await?;
            print_transition(&transition, "Recorded outcome", json)
        }
        ExecCommand::Pause {
            execution_id,
            actor,
        } => {
            let transition = engine.pause(&parse_execution_id(&execution_id)?, actor).await?;
            print_transition(&transition, "Paused execution", json)
        }
        ExecCommand::Unpause {
            execution_id,
            actor,
        } => {
            let transition = engine
                .unpause(&parse_execution_id(&execution_id)?, actor)
                .await?;
            print_transition(&transition, "Unpaused execution", json)
        }
        ExecCommand::Resume {
            execution_id,
            actor,
            action,
        } => {
            let transition = engine
                .resume(&parse_execution_id(&execution_id)?, action.into(), actor)
                .await?;
            print_transition(&transition, "Resumed execution", json)
        }
        ExecCommand::Cancel {
            execution_id,
            actor,
        } => {
            let transition = engine.cancel(&parse_execution_id(&execution_id)?, actor).await?;
            print_transition(&transition, "Cancelled execution", json)
        }
        ExecCommand::Fail {
            execution_id,
            reason,
            actor,
        } => {
            let transition = engine
                .fail(&parse_execution_id(&execution_id)?, reason, actor)
                .await?;
            print_transition(&transition, "Failed execution", json)
        }
        ExecCommand::Attempts { execution_id } => {
            handle_attempts(&parse_execution_id(&execution_id)?, state, json).await
        }
        ExecCommand::Checkpoints { execution_id } => {
            handle_checkpoints(&parse_execution_id(&execution_id)?, state, json).await
        }
        ExecCommand::Context { execution_id } => {
            handle_context(&parse_execution_id(&execution_id)?, state, json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

async fn handle_list(
    chain: Option<&str>,
    status: Option<&str>,
    limit: Option<u32>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let chain_id: Option<ChainId> = match chain {
        Some(key) => Some(state.engine.find_chain(key).await?.id),
        None => None,
    };
    let status = status
        .map(|s| s.parse::<ExecutionStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let executions = state
        .engine
        .list_executions(chain_id.as_ref(), status, limit)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Chain"),
            Cell::new("Status"),
            Cell::new("Current link"),
            Cell::new("Failures"),
            Cell::new("Created"),
        ]);

    for e in &executions {
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(&e.chain.name),
            status_cell(e),
            Cell::new(e.current_link_id.as_deref().unwrap_or("-")),
            Cell::new(format!("{}/{}", e.total_failure_count, e.chain.max_total_failures)),
            Cell::new(e.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_attempts(id: &ExecutionId, state: &AppState, json: bool) -> Result<()> {
    let attempts = state.engine.link_executions(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&attempts)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Link").fg(Color::Cyan),
            Cell::new("Attempt"),
            Cell::new("Outcome"),
            Cell::new("Transition"),
            Cell::new("Error"),
            Cell::new("Finished"),
        ]);

    for a in &attempts {
        let outcome = match a.outcome {
            LinkOutcome::Success => Cell::new(a.outcome).fg(Color::Green),
            LinkOutcome::Failure => Cell::new(a.outcome).fg(Color::Red),
            LinkOutcome::Pending if a.dispatched_at.is_none() => {
                Cell::new("pending (held)").fg(Color::Yellow)
            }
            _ => Cell::new(a.outcome).fg(Color::Yellow),
        };
        let transition = a
            .transition_taken
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&a.link_id),
            Cell::new(a.attempt_number),
            outcome,
            Cell::new(transition),
            Cell::new(a.error.as_deref().unwrap_or("")),
            Cell::new(
                a.finished_at
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default(),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_checkpoints(id: &ExecutionId, state: &AppState, json: bool) -> Result<()> {
    let checkpoints = state.engine.checkpoint_log(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!();
        println!("  No checkpoints yet.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Link").fg(Color::Cyan),
            Cell::new("Attempt"),
            Cell::new("Output"),
            Cell::new("Recorded"),
        ]);

    for c in &checkpoints {
        table.add_row(vec![
            Cell::new(c.position),
            Cell::new(&c.link_id),
            Cell::new(c.attempt_number),
            Cell::new(truncate(&c.checkpoint_data.output.to_string(), 60)),
            Cell::new(c.created_at.format("%H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_context(id: &ExecutionId, state: &AppState, json: bool) -> Result<()> {
    let execution = state.engine.get_execution(id).await?;
    let rebuilt = state.engine.reconstruct_context(id).await?;
    let consistent = rebuilt == execution.execution_context;

    if json {
        let out = serde_json::json!({
            "execution_id": id.to_string(),
            "consistent": consistent,
            "context": rebuilt,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    for entry in &rebuilt.entries {
        println!(
            "  {} {} (attempt {}): {}",
            style("*").green(),
            style(&entry.link_id).cyan(),
            entry.attempt_number,
            truncate(&entry.output.to_string(), 80)
        );
    }
    if rebuilt.is_empty() {
        println!("  Context is empty.");
    }
    println!();
    if consistent {
        println!("  {} Stored context matches the checkpoint log", style("✓").green());
    } else {
        println!(
            "  {} Stored context differs from the checkpoint log",
            style("✗").red()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_transition(transition: &Transition, headline: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(transition)?);
        return Ok(());
    }

    println!();
    if transition.applied {
        println!(
            "  {} {headline} {}",
            style("*").green().bold(),
            style(transition.execution.id).cyan()
        );
    } else {
        println!(
            "  {} Nothing to do: execution {} is already {}",
            style("-").dim(),
            style(transition.execution.id).cyan(),
            transition.execution.status
        );
    }
    print_execution(&transition.execution);

    if let Some(dispatch) = &transition.dispatch {
        println!(
            "  Dispatch: link '{}' attempt {} (skill {})",
            style(&dispatch.link_id).cyan(),
            dispatch.attempt_number,
            dispatch.skill
        );
        println!(
            "  Report with: {}",
            style(format!(
                "skc exec report {} --link {} --attempt {} --output '<json>'",
                dispatch.execution_id, dispatch.link_id, dispatch.attempt_number
            ))
            .dim()
        );
        println!();
    }
    Ok(())
}

fn print_execution(execution: &Execution) {
    println!();
    println!("  Execution: {}", execution.id);
    println!("  Chain: {}", style(&execution.chain.name).cyan());
    println!("  Status: {}", styled_status(execution));
    println!(
        "  Current link: {}",
        execution.current_link_id.as_deref().unwrap_or("-")
    );
    println!(
        "  Failures: {}/{}",
        execution.total_failure_count, execution.chain.max_total_failures
    );
    println!("  Context entries: {}", execution.execution_context.len());
    if let Some(reason) = &execution.intervention_reason {
        println!("  Intervention: {}", style(reason).yellow());
    }
    if let Some(error) = &execution.error {
        println!("  Error: {}", style(error).red());
    }
    if let Some(by) = &execution.started_by {
        println!("  Started by: {by}");
    }
    if let Some(by) = &execution.completed_by {
        println!("  Ended by: {by}");
    }
    println!();
}

fn styled_status(execution: &Execution) -> console::StyledObject<String> {
    let label = if execution.is_awaiting_intervention() {
        "paused (awaiting intervention)".to_string()
    } else {
        execution.status.to_string()
    };
    match execution.status {
        ExecutionStatus::Completed => style(label).green(),
        ExecutionStatus::Failed | ExecutionStatus::Cancelled => style(label).red(),
        ExecutionStatus::Paused => style(label).yellow(),
        _ => style(label).cyan(),
    }
}

fn status_cell(execution: &Execution) -> Cell {
    let cell = if execution.is_awaiting_intervention() {
        Cell::new("needs intervention")
    } else {
        Cell::new(execution.status)
    };
    match execution.status {
        ExecutionStatus::Completed => cell.fg(Color::Green),
        ExecutionStatus::Failed | ExecutionStatus::Cancelled => cell.fg(Color::Red),
        ExecutionStatus::Paused => cell.fg(Color::Yellow),
        _ => cell,
    }
}

fn parse_execution_id(raw: &str) -> Result<ExecutionId> {
    match raw.parse() {
        Ok(id) => Ok(id),
        Err(_) => bail!("'{raw}' is not a valid execution id"),
    }
}

fn parse_json_arg(raw: Option<&str>, flag: &str) -> Result<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(s).map_err(|e| anyhow::anyhow!("{flag} is not valid JSON: {e}"))
    })
    .transpose()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_actions_map_to_resolutions() {
        assert_eq!(Resolution::from(ResumeAction::Retry), Resolution::Retry);
        assert_eq!(
            Resolution::from(ResumeAction::Skip {
                link_id: "reply".to_string()
            }),
            Resolution::Skip {
                link_id: "reply".to_string()
            }
        );
        assert_eq!(Resolution::from(ResumeAction::Cancel), Resolution::Cancel);
    }

    #[test]
    fn execution_id_must_be_a_uuid() {
        assert!(parse_execution_id("not-a-uuid").is_err());
        let id = ExecutionId::new();
        assert_eq!(parse_execution_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn json_arguments_are_validated() {
        assert_eq!(parse_json_arg(None, "--input").unwrap(), None);
        assert_eq!(
            parse_json_arg(Some(r#"{"ticket": 7}"#), "--input").unwrap(),
            Some(serde_json::json!({"ticket": 7}))
        );
        let err = parse_json_arg(Some("{oops"), "--output").unwrap_err();
        assert!(err.to_string().contains("--output"));
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
