//! # lanegraph CLI - Draw commit history as lanes
//!
//! Command-line front end for the lanegraph library.
//!
//! ## Features
//! - Merge the history of several repositories into one graph
//! - Draw the lane layout as ASCII, optionally grouped by day
//! - List the ancestors of a commit
//! - Report statistics and dangling parent references
//!
//! ## Input
//!
//! One JSON-lines file per repository, newest commit first:
//!
//! ```text
//! {"id": "4b825dc642cb6eb9a060e54bf8d69288fbee4904", "timestamp": 1700000000, "parents": ["a1b2c3d"]}
//! ```
//!
//! ## Usage
//! ```bash
//! # Draw the first 40 rows of two merged repositories
//! lanegraph layout app.jsonl lib.jsonl --limit 40
//!
//! # Which rows are ancestors of a commit?
//! lanegraph ancestors app.jsonl --focus 4b825dc
//!
//! # Summary counters as JSON
//! lanegraph stats app.jsonl --json
//! ```

use clap::{Args, Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use lanegraph::{
    feed_channel, group_by_day, CommitGraph, CommitId, CommitRow, FeedSender, GraphBuilder,
    GraphConfig, GraphError, Result, Row,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Commits per batch handed to the feed
const BATCH_SIZE: usize = 256;

/// lanegraph CLI - Lane layout for commit history
#[derive(Parser)]
#[command(name = "lanegraph")]
#[command(version)]
#[command(about = "Lay out merged commit history as lanes")]
#[command(long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rows between index checkpoints
    #[arg(long, global = true)]
    checkpoint_frequency: Option<usize>,

    /// Entries per merger pack (power of two)
    #[arg(long, global = true)]
    pack_size: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Inputs {
    /// One JSON-lines file per repository, newest commit first
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Show loading progress
    #[arg(long)]
    progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw the lane layout
    Layout {
        #[command(flatten)]
        inputs: Inputs,

        /// Rows to draw
        #[arg(short, long)]
        limit: Option<usize>,

        /// Insert a header before each day
        #[arg(long)]
        group_by_day: bool,
    },

    /// List the ancestors of a commit
    Ancestors {
        #[command(flatten)]
        inputs: Inputs,

        /// Commit to start from (7 to 40 hex digits)
        #[arg(short, long)]
        focus: String,

        /// Rows to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show graph statistics
    Stats {
        #[command(flatten)]
        inputs: Inputs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List parent references that never appeared
    Unresolved {
        #[command(flatten)]
        inputs: Inputs,
    },
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("lanegraph=debug")
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => return,
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.checkpoint_frequency, cli.pack_size)?;

    match cli.command {
        Commands::Layout {
            inputs,
            limit,
            group_by_day,
        } => {
            let graph = load(config, &inputs)?;
            cmd_layout(&graph, limit, group_by_day)
        }
        Commands::Ancestors {
            inputs,
            focus,
            limit,
        } => {
            let mut graph = load(config, &inputs)?;
            cmd_ancestors(&mut graph, &focus, limit)
        }
        Commands::Stats { inputs, json } => {
            let graph = load(config, &inputs)?;
            cmd_stats(&graph, json)
        }
        Commands::Unresolved { inputs } => {
            let graph = load(config, &inputs)?;
            cmd_unresolved(&graph)
        }
    }
}

/// Merge the configuration file with command-line overrides
fn resolve_config(path: Option<&Path>, frequency: Option<usize>, pack_size: Option<usize>) -> Result<GraphConfig> {
    // Overrides may repair a file value, so validate only once at the end.
    let mut config: GraphConfig = match path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => GraphConfig::default(),
    };
    if let Some(frequency) = frequency {
        config.checkpoint_frequency = frequency;
    }
    if let Some(pack_size) = pack_size {
        config.merge_pack_size = pack_size;
    }
    config.validate()?;
    Ok(config)
}

/// Parse every input in parallel and feed the graph
///
/// Each file is one source. Workers parse on the rayon pool and push batches
/// through the feed, which a tokio runtime drains into the graph.
fn load(config: GraphConfig, inputs: &Inputs) -> Result<CommitGraph> {
    let start = Instant::now();
    let shared = GraphBuilder::new()
        .config(config)
        .sources(inputs.files.len())
        .build_shared()?;
    let generation = shared.read().generation();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()?;
    let (sender, driver) = feed_channel(64, generation);
    let driver = runtime.spawn(driver.run(shared.clone()));

    let progress = inputs.progress.then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} {pos} commits")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Loading");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let parsed: Vec<Result<usize>> = inputs
        .files
        .par_iter()
        .enumerate()
        .map(|(source, path)| feed_file(path, source, &sender, progress.as_ref()))
        .collect();
    drop(sender);

    let summary = runtime
        .block_on(driver)
        .map_err(|e| GraphError::internal(format!("feed driver failed: {}", e)))??;
    drop(runtime);
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    for result in parsed {
        result?;
    }

    let graph = std::sync::Arc::try_unwrap(shared)
        .map_err(|_| GraphError::internal("graph still shared after loading"))?
        .into_inner();

    eprintln!(
        "{} {} commits from {} {} in {}",
        "Loaded".green().bold(),
        summary.commits,
        inputs.files.len(),
        if inputs.files.len() == 1 { "source" } else { "sources" },
        format_duration(Duration::from_millis(start.elapsed().as_millis() as u64))
    );
    if graph.is_degraded() {
        eprintln!(
            "{} input is not time ordered, lanes are disabled",
            "Warning:".yellow().bold()
        );
    }
    Ok(graph)
}

/// Parse one JSON-lines file and push it to the feed in batches
fn feed_file(path: &Path, source: usize, sender: &FeedSender, progress: Option<&ProgressBar>) -> Result<usize> {
    let text = std::fs::read_to_string(path)?;
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut total = 0;

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let commit: lanegraph::Commit = serde_json::from_str(line)?;
        batch.push(commit);
        if batch.len() == BATCH_SIZE {
            total += batch.len();
            if let Some(pb) = progress {
                pb.inc(batch.len() as u64);
            }
            sender.blocking_send_batch(source, std::mem::take(&mut batch))?;
        }
    }
    if !batch.is_empty() {
        total += batch.len();
        if let Some(pb) = progress {
            pb.inc(batch.len() as u64);
        }
        sender.blocking_send_batch(source, batch)?;
    }
    sender.blocking_exhausted(source)?;
    debug!("Parsed {} commits from {}", total, path.display());
    Ok(total)
}

/// Draw lanes for the first `limit` rows
///
/// Each row shows every lane crossing it; the commit's own lane is marked
/// with `*` (or `M` for a merge).
fn cmd_layout(graph: &CommitGraph, limit: Option<usize>, group: bool) -> Result<()> {
    let end = limit.unwrap_or(graph.len()).min(graph.len()) as Row;

    let rows: Vec<CommitRow<'_>> = if group {
        group_by_day(graph, 0..end)?
    } else {
        graph
            .commits(0..end)
            .map(|(row, commit)| CommitRow::Real { row, commit })
            .collect()
    };

    println!();
    for entry in rows {
        match entry {
            CommitRow::GroupHeader { label, .. } => {
                println!("{}", label.blue().bold());
            }
            CommitRow::Real { row, commit } => {
                let lanes = if graph.is_degraded() {
                    String::new()
                } else {
                    draw_row(graph, row, commit.is_merge())?
                };
                println!(
                    "{} {} {}",
                    lanes,
                    commit.id.short().yellow(),
                    format_timestamp(commit.timestamp).dimmed()
                );
            }
        }
    }
    Ok(())
}

fn draw_row(graph: &CommitGraph, row: Row, merge: bool) -> Result<String> {
    let lane = graph.lane_of(row)?;
    let active = graph.active_lanes_at(row)?;
    let width = active.iter().next_back().map_or(0, |last| last + 1).max(lane + 1);

    let mut out = String::new();
    for column in 0..width {
        let cell = if column == lane {
            if merge {
                "M"
            } else {
                "*"
            }
        } else if active.contains(&column) {
            "|"
        } else {
            " "
        };
        out.push_str(&paint(cell, column));
        out.push(' ');
    }
    Ok(out)
}

fn paint(cell: &str, lane: u32) -> String {
    match lane % 6 {
        0 => cell.green().to_string(),
        1 => cell.cyan().to_string(),
        2 => cell.magenta().to_string(),
        3 => cell.yellow().to_string(),
        4 => cell.blue().to_string(),
        _ => cell.red().to_string(),
    }
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// List the ancestors of `focus`
fn cmd_ancestors(graph: &mut CommitGraph, focus: &str, limit: Option<usize>) -> Result<()> {
    let id = CommitId::from_hex(focus)?;
    let focus_row = graph.row_of(&id)?;
    graph.set_focus(id);

    let end = graph.len() as Row;
    let flags = graph.included_rows(focus_row..end);
    let limit = limit.unwrap_or(usize::MAX);

    println!("\n{} {}", "Ancestors of".blue().bold(), id.short().yellow());
    let mut shown = 0;
    for (offset, included) in flags.iter().enumerate() {
        if !included {
            continue;
        }
        if shown == limit {
            println!("  {}", "...".dimmed());
            break;
        }
        let row = focus_row + offset as Row;
        let commit = graph.commit(row)?;
        println!(
            "  {:>6}  {}  {}",
            row.to_string().dimmed(),
            commit.id.short().yellow(),
            format_timestamp(commit.timestamp)
        );
        shown += 1;
    }
    let total = flags.iter().filter(|flag| **flag).count();
    println!("\n{} ancestors (focus included)", total.to_string().green().bold());
    Ok(())
}

/// Print summary counters
fn cmd_stats(graph: &CommitGraph, json: bool) -> Result<()> {
    let stats = graph.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\n{}", "Graph Statistics".blue().bold());
    println!("  Rows:                {}", stats.rows.to_string().cyan());
    println!("  Sources:             {}", stats.sources);
    println!("  Events:              {}", stats.events);
    println!("  Checkpoints:         {}", stats.checkpoints);
    println!("  Pending checkpoints: {}", stats.pending_checkpoints);
    println!("  Peak lanes:          {}", stats.peak_lanes.to_string().cyan());
    println!("  Lanes in use:        {}", stats.lanes_in_use);
    println!("  Unresolved parents:  {}", stats.unresolved);
    println!("  Pending edges:       {}", stats.pending_edges);
    if stats.degraded {
        println!("  {}", "Layout disabled (input out of order)".yellow());
    }
    Ok(())
}

/// List dangling parent references and who waits for them
fn cmd_unresolved(graph: &CommitGraph) -> Result<()> {
    let unresolved = graph.unresolved();
    if unresolved.is_empty() {
        println!("{} every parent reference resolved", "✓".green().bold());
        return Ok(());
    }

    println!("\n{}", "Unresolved parents".yellow().bold());
    for id in &unresolved {
        let rows: Vec<String> = graph
            .waiting_for(id)
            .iter()
            .map(|row| row.to_string())
            .collect();
        println!("  {}  wanted by rows {}", id.to_string().red(), rows.join(", "));
    }
    println!("\n{} unresolved", unresolved.len().to_string().yellow().bold());
    Ok(())
}
