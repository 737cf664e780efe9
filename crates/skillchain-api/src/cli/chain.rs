//! CLI chain management subcommands.
//!
//! Import YAML definitions into the chain store, list and inspect them, and
//! toggle publication.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use skillchain_core::chain::definition::load_chain_file;
use skillchain_types::chain::{ChainRecord, FailureKind, LinkRecord, SuccessKind};

use crate::state::AppState;

/// Chain management subcommands.
#[derive(Subcommand)]
pub enum ChainCommand {
    /// Import (or replace) a chain from a YAML file.
    Import {
        /// Path to the chain YAML file.
        file: PathBuf,

        /// Publish the chain right away.
        #[arg(long)]
        publish: bool,
    },

    /// List stored chains.
    List,

    /// Show a chain's links and transitions.
    Show {
        /// Chain name or id.
        chain: String,
    },

    /// Allow executions of a chain to start.
    Publish {
        /// Chain name or id.
        chain: String,
    },

    /// Stop new executions of a chain from starting.
    Unpublish {
        /// Chain name or id.
        chain: String,
    },
}

/// Handle a chain subcommand.
pub async fn handle_chain_command(cmd: ChainCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ChainCommand::Import { file, publish } => handle_import(&file, publish, state, json).await,
        ChainCommand::List => handle_list(state, json).await,
        ChainCommand::Show { chain } => handle_show(&chain, state, json).await,
        ChainCommand::Publish { chain } => handle_publish(&chain, true, state, json).await,
        ChainCommand::Unpublish { chain } => handle_publish(&chain, false, state, json).await,
    }
}

async fn handle_import(file: &PathBuf, publish: bool, state: &AppState, json: bool) -> Result<()> {
    let mut record = load_chain_file(file, state.engine.config())
        .with_context(|| format!("Failed to load chain from {}", file.display()))?;
    if publish {
        record.published = true;
    }

    let chain = state.engine.import_chain(record).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Imported chain '{}'",
        style("*").green().bold(),
        style(&chain.name).cyan()
    );
    println!("  ID: {}", chain.id);
    println!("  Links: {}", chain.links.len());
    println!("  Published: {}", yes_no(chain.published));
    if !chain.published {
        println!();
        println!(
            "  Publish with: {}",
            style(format!("skc chain publish {}", chain.name)).dim()
        );
    }
    println!();
    Ok(())
}

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let chains = state.engine.list_chains().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chains)?);
        return Ok(());
    }

    if chains.is_empty() {
        println!();
        println!("  No chains stored.");
        println!(
            "  Import one with: {}",
            style("skc chain import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Links"),
            Cell::new("Failure budget"),
            Cell::new("Published"),
            Cell::new("Updated"),
        ]);

    for c in &chains {
        let published = if c.published {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&c.name),
            Cell::new(c.link_count),
            Cell::new(c.max_total_failures),
            published,
            Cell::new(c.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(key: &str, state: &AppState, json: bool) -> Result<()> {
    let chain = state.engine.find_chain(key).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    print_chain(&chain);
    Ok(())
}

async fn handle_publish(key: &str, published: bool, state: &AppState, json: bool) -> Result<()> {
    let chain = state.engine.set_chain_published(key, published).await?;

    if json {
        let out = serde_json::json!({
            "id": chain.id.to_string(),
            "name": chain.name,
            "published": chain.published,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        let verb = if published { "Published" } else { "Unpublished" };
        println!();
        println!(
            "  {} {verb} chain '{}'",
            style("*").green().bold(),
            style(&chain.name).cyan()
        );
        println!();
    }
    Ok(())
}

fn print_chain(chain: &ChainRecord) {
    println!();
    println!("  {}", style(&chain.name).cyan().bold());
    if let Some(desc) = &chain.description {
        println!("  {}", style(desc).dim());
    }
    println!("  ID: {}", chain.id);
    println!("  Published: {}", yes_no(chain.published));
    println!("  Failure budget: {}", chain.max_total_failures);
    println!();

    let mut links: Vec<&LinkRecord> = chain.links.iter().collect();
    links.sort_by_key(|l| l.position);

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Link").fg(Color::Cyan),
            Cell::new("Skill"),
            Cell::new("Retries"),
            Cell::new("On success"),
            Cell::new("On failure"),
        ]);

    for l in links {
        table.add_row(vec![
            Cell::new(l.position),
            Cell::new(format!("{} ({})", l.id, l.name)),
            Cell::new(&l.skill),
            Cell::new(l.max_retries),
            Cell::new(describe_success(l)),
            Cell::new(describe_failure(l)),
        ]);
    }

    println!("{table}");
    println!();
}

fn describe_success(link: &LinkRecord) -> String {
    match (&link.on_success_transition, &link.on_success_target_link_id) {
        (SuccessKind::GoToLink, Some(target)) => format!("go to {target}"),
        (kind, _) => kind.to_string(),
    }
}

fn describe_failure(link: &LinkRecord) -> String {
    match (&link.on_failure_transition, &link.on_failure_target_link_id) {
        (FailureKind::GoToLink, Some(target)) => format!("go to {target}"),
        (FailureKind::Escalate, _) => match &link.escalation_reason {
            Some(reason) => format!("escalate: {reason}"),
            None => "escalate".to_string(),
        },
        (kind, _) => kind.to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
