//! slotflow command line
//!
//! Loads graph documents, validates them and executes them through the
//! scheduler, printing the report and output tables.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use slotflow::{
    cache::ResultCache,
    config::EngineConfig,
    graph::{Graph, NodeId},
    logging,
    node::{NodeCatalog, ParameterHolder},
    persistence::GraphDocument,
    run::{RunEvent, RunOutcome, RunSettings, Scheduler},
    validation::Validator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Slot-based pipeline graph engine
#[derive(Parser)]
#[command(name = "slotflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a graph document without running it
    Validate {
        /// Path to the graph JSON file
        file: PathBuf,
    },

    /// Run a graph document
    Run {
        /// Path to the graph JSON file
        file: PathBuf,

        /// Only run these nodes and their upstream (repeatable)
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Ignore and do not store cached results
        #[arg(long)]
        no_cache: bool,

        /// Worker threads for parallel steps
        #[arg(long)]
        threads: Option<usize>,

        /// Write the graph with its cached results here after the run
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// List the available node types
    Nodes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(),
    };
    config.apply_env_overrides();
    let _guard = logging::init(&config.logging);

    let catalog = NodeCatalog::with_builtin_nodes();
    match cli.command {
        Commands::Validate { file } => validate(&catalog, &file),
        Commands::Run {
            file,
            targets,
            no_cache,
            threads,
            save,
        } => run(config, &catalog, &file, &targets, no_cache, threads, save.as_deref()),
        Commands::Nodes => list_nodes(&catalog),
    }
}

fn list_nodes(catalog: &NodeCatalog) -> Result<()> {
    for info in catalog.types() {
        println!("{:<24} {:<20} {}", info.type_id, info.display_name, info.description);
        let node = catalog.create(&info.type_id)?;
        for descriptor in node.list_parameters().values() {
            println!(
                "    {:<12} {:<8} default {}",
                descriptor.key,
                descriptor.kind.to_string(),
                descriptor.default
            );
        }
    }
    Ok(())
}

fn load_graph(catalog: &NodeCatalog, file: &Path) -> Result<(GraphDocument, Graph)> {
    let document = GraphDocument::load(file)?;
    let registry = Arc::new(slotflow::DataTypeRegistry::with_builtin_types());
    let graph = document
        .to_graph(catalog, registry)
        .with_context(|| format!("Failed to build graph from {}", file.display()))?;
    Ok((document, graph))
}

fn validate(catalog: &NodeCatalog, file: &Path) -> Result<()> {
    let (_, graph) = load_graph(catalog, file)?;
    let report = Validator::validate_graph(&graph);
    for entry in report.entries() {
        println!("{}", entry);
    }
    if !report.is_valid() {
        bail!("{} validation error(s)", report.error_count());
    }
    println!(
        "{}: {} nodes, {} edges, {} warning(s)",
        file.display(),
        graph.node_count(),
        graph.edge_count(),
        report.warning_count()
    );
    Ok(())
}

fn run(
    config: EngineConfig,
    catalog: &NodeCatalog,
    file: &Path,
    targets: &[String],
    no_cache: bool,
    threads: Option<usize>,
    save: Option<&Path>,
) -> Result<()> {
    let (document, graph) = load_graph(catalog, file)?;

    let cache = Arc::new(ResultCache::new());
    let restored = document.restore_cache(&cache, graph.registry())?;
    if restored > 0 {
        tracing::info!("Restored {} cached result(s) from {}", restored, file.display());
    }

    let targets = targets
        .iter()
        .map(|text| NodeId::parse(text).with_context(|| format!("Invalid node id '{}'", text)))
        .collect::<Result<Vec<_>>>()?;

    let mut settings = if targets.is_empty() {
        RunSettings::default()
    } else {
        RunSettings::targets(targets)
    };
    settings = settings.with_label(file.display().to_string());
    if no_cache {
        settings = settings.without_cache();
    }
    if let Some(threads) = threads {
        settings = settings.with_worker_threads(threads);
    }

    let scheduler = Scheduler::with_cache(config, cache);
    let listener = scheduler.subscribe(|event: &RunEvent| match event {
        RunEvent::Enqueued { run, label } => tracing::info!("Run {} queued ({})", run, label),
        RunEvent::Started { run } => tracing::info!("Run {} started", run),
        RunEvent::Finished { run, .. } => tracing::info!("Run {} finished", run),
        RunEvent::Interrupted { run, cause, .. } => {
            tracing::warn!("Run {} interrupted: {}", run, cause.as_deref().unwrap_or("cancelled"))
        }
    });

    let handle = scheduler.enqueue(&graph, settings)?;
    let outcome = handle.wait();
    scheduler.unsubscribe(listener);

    print_outcome(&graph, &outcome);

    if let Some(path) = save {
        GraphDocument::from_graph(&graph, Some(scheduler.cache())).save(path)?;
        println!("Saved graph to {}", path.display());
    }

    if !outcome.is_success() {
        bail!("Run {} {}", outcome.run, outcome.state);
    }
    Ok(())
}

fn print_outcome(graph: &Graph, outcome: &RunOutcome) {
    for entry in outcome.report.entries() {
        println!("{}", entry);
    }

    for report in &outcome.nodes {
        println!(
            "{:<20} {:<14} {} step(s), {} skipped row(s)",
            report.name,
            report.status.to_string(),
            report.steps,
            report.skipped_rows
        );
        let Some(slots) = outcome.outputs.get(&report.node) else {
            continue;
        };
        for (slot, table) in slots {
            println!("  {} ({} rows)", slot, table.len());
            for row in table.rows() {
                let annotations: Vec<String> = row
                    .annotations
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect();
                println!("    {} [{}]", row.item.display(), annotations.join(", "));
            }
        }
    }

    if let Some(failure) = &outcome.failure {
        let name = graph
            .node(failure.node)
            .map(|entry| entry.name().to_string())
            .unwrap_or_else(|| failure.node_name.clone());
        println!("Failed at '{}': {}", name, failure.message);
    }
    if let Some(duration) = outcome.stats.duration() {
        println!(
            "{} in {} ms ({} step(s), {} cache hit(s))",
            outcome.state,
            duration.num_milliseconds(),
            outcome.stats.steps_executed,
            outcome.stats.cache_hits
        );
    }
}
