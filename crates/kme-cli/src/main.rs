//! KME CLI - knowledge memory engine

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use kme_core::config::Config;
use kme_core::domain::knowledge::{EntryContext, KnowledgeCategory, KnowledgeSource, ValidationStatus};
use kme_core::domain::query::KnowledgeQuery;
use kme_core::engine::{KnowledgeEngine, LifecycleManager};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;


#[derive(Parser)]
#[command(name = "kme")]
#[command(author, version, about = "Knowledge memory engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Data directory (overrides store.data_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new piece of knowledge
    Ingest {
        /// Knowledge text
        content: String,
        /// interaction, environmental, system or external
        #[arg(short, long, default_value = "interaction")]
        source: String,
        /// tactical, technical, behavioral, strategic or environmental
        #[arg(short, long, default_value = "technical")]
        category: String,
        /// Trust level of the supplier (0-100)
        #[arg(long)]
        trust: Option<u8>,
        /// Emotional label of the supplier
        #[arg(long)]
        emotion: Option<String>,
    },

    /// Ranked retrieval
    Query {
        /// Query text
        text: String,
        /// Only entries of this category
        #[arg(short, long)]
        category: Option<String>,
        /// Minimum confidence (0-100)
        #[arg(long)]
        min_confidence: Option<u8>,
        /// Maximum results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Import a legacy line-delimited file
    Migrate {
        /// Path to the legacy file
        path: PathBuf,
    },

    /// Fold the append log into the compacted store
    Compact,

    /// Evict entries when over capacity
    Evict,

    /// Rebuild the keyword and phrase indices
    Reindex {
        /// Also rebuild the relationship graph and clusters
        #[arg(long)]
        graph: bool,
    },

    /// Copy the store into the backup directory
    Backup,

    /// Build the relationship graph and list semantic clusters
    Clusters,

    /// Strongest relationships of one entry
    Neighbors {
        /// Entry ID
        id: Uuid,
    },

    /// Show one entry
    Show {
        /// Entry ID
        id: Uuid,
    },

    /// Change the validation status of an entry
    Status {
        /// Entry ID
        id: Uuid,
        /// pending, validated, rejected or conflicted
        status: String,
    },

    /// Run one maintenance pass (flush, evict, compact, reindex, backup)
    Maintain,

    /// Store statistics
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config
    List,
    /// Reset to defaults
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("kme=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    if let Commands::Config { action } = cli.command {
        return cmd_config(action, &out);
    }

    let mut config = Config::load()?;
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    debug!(data_dir = %config.store.data_dir.display(), "Opening store");
    let engine = KnowledgeEngine::open(&config)
        .with_context(|| format!("Failed to open store at {}", config.store.data_dir.display()))?;

    match cli.command {
        Commands::Ingest {
            content,
            source,
            category,
            trust,
            emotion,
        } => cmd_ingest(&engine, &content, &source, &category, trust, emotion, &out).await,

        Commands::Query {
            text,
            category,
            min_confidence,
            limit,
        } => cmd_query(&engine, text, category.as_deref(), min_confidence, limit, &out).await,

        Commands::Migrate { path } => cmd_migrate(&engine, &path, &out).await,

        Commands::Compact => {
            let entries = engine.compact().await?;
            out.emit(&serde_json::json!({ "entries": entries }), || {
                println!("Compacted {} entries.", entries);
            })
        }

        Commands::Evict => {
            let report = engine.evict_if_over_capacity().await?;
            out.emit(&report, || {
                if report.evicted.is_empty() {
                    println!("Store is within capacity ({} entries).", report.retained);
                } else {
                    println!("Evicted {} entries, {} retained.", report.evicted.len(), report.retained);
                }
            })
        }

        Commands::Reindex { graph } => cmd_reindex(&engine, graph, &out).await,

        Commands::Backup => {
            let report = engine.backup().await?;
            out.emit(&report, || match &report {
                Some(report) => {
                    println!("Backup written to {}", report.path.display());
                    println!("  Retained: {}", report.retained);
                    println!("  Pruned: {}", report.pruned.len());
                }
                None => println!("Nothing to back up."),
            })
        }

        Commands::Clusters => cmd_clusters(&engine, &out).await,

        Commands::Neighbors { id } => cmd_neighbors(&engine, id, &out).await,

        Commands::Show { id } => {
            let entry = engine
                .get(&id)
                .await
                .ok_or_else(|| kme_core::Error::EntryNotFound(id.to_string()))?;
            out.emit(&entry, || {
                println!("{}", entry.content);
                println!("  ID: {}", entry.id);
                println!("  Category: {}", entry.category);
                println!("  Source: {}", entry.source);
                println!("  Confidence: {}", entry.confidence_score);
                println!("  Status: {}", entry.validation_status);
                println!("  Utility: {}", entry.utility_score);
                println!("  Accessed: {} times", entry.access_count);
            })
        }

        Commands::Status { id, status } => {
            let status = parse_status(&status)?;
            engine.set_status(id, status).await?;
            out.emit(&serde_json::json!({ "id": id, "status": status }), || {
                println!("Entry {} is now {}.", id, status);
            })
        }

        Commands::Maintain => {
            let engine = Arc::new(engine);
            let report = LifecycleManager::new(Arc::clone(&engine), config.lifecycle.clone())
                .run_once()
                .await?;
            out.emit(&report, || {
                println!("Maintenance complete.");
                println!("  Flushed: {}", report.flushed);
                println!("  Evicted: {}", report.evicted);
                println!("  Compacted: {}", report.compacted);
                println!("  Reindexed: {}", if report.reindexed.is_some() { "yes" } else { "no" });
                if let Some(backup) = &report.backup {
                    println!("  Backup: {}", backup.path.display());
                }
            })
        }

        Commands::Stats => {
            let stats = engine.stats().await;
            out.emit(&stats, || {
                println!("Entries: {} ({} live)", stats.store.total, stats.store.live);
                println!("Store version: {}", stats.store.version);
                println!("Index generation: {}{}", stats.generation, if stats.stale { " (stale)" } else { "" });
                println!("Indexed entries: {}", stats.indexed_entries);
                println!("\nBy status:");
                for (status, count) in &stats.store.by_status {
                    println!("  {:<12} {}", status, count);
                }
                println!("\nBy category:");
                for (category, count) in &stats.store.by_category {
                    println!("  {:<14} {}", category, count);
                }
                if stats.store.corrupt_on_load > 0 {
                    println!("\nSkipped {} corrupt records on load.", stats.store.corrupt_on_load);
                }
            })
        }

        Commands::Config { .. } => unreachable!("handled before the store is opened"),
    }
}

// ============================================================================
// Output
// ============================================================================

struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    /// Print `value` as JSON, or run `text` unless quiet
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text if !self.quiet => text(),
            OutputFormat::Text => {}
        }
        Ok(())
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

fn parse_source(value: &str) -> anyhow::Result<KnowledgeSource> {
    KnowledgeSource::parse(value).ok_or_else(|| {
        anyhow!(
            "Unknown source '{}'. Expected one of: {}",
            value,
            join(KnowledgeSource::all().iter().map(|s| s.as_str()))
        )
    })
}

fn parse_category(value: &str) -> anyhow::Result<KnowledgeCategory> {
    KnowledgeCategory::parse(value).ok_or_else(|| {
        anyhow!(
            "Unknown category '{}'. Expected one of: {}",
            value,
            join(KnowledgeCategory::all().iter().map(|c| c.as_str()))
        )
    })
}

fn parse_status(value: &str) -> anyhow::Result<ValidationStatus> {
    ValidationStatus::parse(value).ok_or_else(|| {
        anyhow!(
            "Unknown status '{}'. Expected one of: {}",
            value,
            join(ValidationStatus::all().iter().map(|s| s.as_str()))
        )
    })
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_ingest(
    engine: &KnowledgeEngine,
    content: &str,
    source: &str,
    category: &str,
    trust: Option<u8>,
    emotion: Option<String>,
    out: &Output,
) -> anyhow::Result<()> {
    let source = parse_source(source)?;
    let category = parse_category(category)?;

    let mut context = EntryContext::new();
    if let Some(trust) = trust {
        context = context.with_trust_level(trust);
    }
    if let Some(emotion) = emotion {
        context = context.with_emotional_label(emotion);
    }

    let receipt = engine.ingest(content, source, category, context).await?;
    out.emit(&receipt, || {
        if receipt.is_rejected() {
            println!("Entry stored as rejected (confidence {}).", receipt.confidence);
        } else {
            println!("Entry ingested.");
        }
        println!("  ID: {}", receipt.id);
        println!("  Confidence: {}", receipt.confidence);
        println!("  Status: {}", receipt.status);
        for conflict in &receipt.conflicts {
            println!(
                "  Conflict with {} ({:.2} similar, {} policy)",
                conflict.existing, conflict.similarity, conflict.policy
            );
        }
    })
}

async fn cmd_query(
    engine: &KnowledgeEngine,
    text: String,
    category: Option<&str>,
    min_confidence: Option<u8>,
    limit: Option<usize>,
    out: &Output,
) -> anyhow::Result<()> {
    let mut request = KnowledgeQuery::new(text);
    if let Some(category) = category {
        request = request.with_category(parse_category(category)?);
    }
    if let Some(min) = min_confidence {
        request = request.with_min_confidence(min);
    }
    if let Some(limit) = limit {
        request = request.with_limit(limit);
    }

    let response = engine.query(&request).await?;
    engine.flush().await?;

    out.emit(&response, || {
        if response.hits.is_empty() {
            println!("No matching knowledge.");
            return;
        }
        for (rank, hit) in response.hits.iter().enumerate() {
            println!(
                "{:>2}. [{:5.1}] {} ({}, confidence {})",
                rank + 1,
                hit.relevance,
                hit.entry.content,
                hit.entry.category,
                hit.entry.confidence_score
            );
            println!("      {}", hit.entry.id);
        }
        if response.stale {
            println!("\nIndex is stale; run `kme reindex` for current results.");
        }
    })
}

async fn cmd_migrate(engine: &KnowledgeEngine, path: &std::path::Path, out: &Output) -> anyhow::Result<()> {
    if !out.quiet && out.format == OutputFormat::Text {
        println!("Migrating {}...", path.display());
    }
    let report = engine
        .migrate_from_legacy(path)
        .await
        .with_context(|| format!("Migration of {} failed", path.display()))?;

    out.emit(&report, || {
        println!("Migration complete.");
        println!("  Migrated: {}", report.migrated);
        println!("  Skipped (already present): {}", report.skipped_duplicates);
        println!("  Skipped (malformed): {}", report.malformed);
        println!("  Rejected (low confidence): {}", report.rejected);
        println!("  Conflicts resolved: {}", report.conflicts);
        if report.linked + report.unresolved_links > 0 {
            println!("  Relationships linked: {} ({} unresolved)", report.linked, report.unresolved_links);
        }
        for warning in &report.warnings {
            println!("  warning: {}", warning);
        }
    })
}

async fn cmd_reindex(engine: &KnowledgeEngine, graph: bool, out: &Output) -> anyhow::Result<()> {
    let index = engine.rebuild_indices().await?;
    let graph = if graph {
        Some(engine.rebuild_graph().await?)
    } else {
        None
    };

    out.emit(&serde_json::json!({ "index": index, "graph": graph }), || {
        println!("Index generation {} built.", index.generation);
        println!("  Entries: {}", index.counts.entries);
        println!("  Keywords: {}", index.counts.keywords);
        println!(
            "  Phrases: {} ({} from co-occurrence)",
            index.counts.phrases, index.counts.cooccurrence_phrases
        );
        if let Some(graph) = &graph {
            println!("  Graph edges: {}", graph.edges);
            println!("  Clusters: {}", graph.clusters);
        }
    })
}

async fn cmd_clusters(engine: &KnowledgeEngine, out: &Output) -> anyhow::Result<()> {
    engine.rebuild_graph().await?;
    let clusters = engine.clusters();

    out.emit(&*clusters, || {
        if clusters.is_empty() {
            println!("No clusters found.");
            return;
        }
        for cluster in clusters.iter() {
            println!(
                "{} [{}] {} members, strength {:.2}",
                cluster.id,
                cluster.theme,
                cluster.len(),
                cluster.strength
            );
        }
    })
}

async fn cmd_neighbors(engine: &KnowledgeEngine, id: Uuid, out: &Output) -> anyhow::Result<()> {
    if engine.get(&id).await.is_none() {
        return Err(kme_core::Error::EntryNotFound(id.to_string()).into());
    }
    engine.rebuild_graph().await?;
    let neighbors = engine.neighbors(&id);

    let mut rows = Vec::with_capacity(neighbors.len());
    for (neighbor, strength) in neighbors {
        let content = engine.get(&neighbor).await.map(|e| e.content).unwrap_or_default();
        rows.push(serde_json::json!({ "id": neighbor, "strength": strength, "content": content }));
    }

    out.emit(&rows, || {
        if rows.is_empty() {
            println!("No related entries.");
        }
        for row in &rows {
            println!("[{:.2}] {} {}", row["strength"].as_f64().unwrap_or_default(), row["id"], row["content"]);
        }
    })
}

fn cmd_config(action: ConfigAction, out: &Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            match out.format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = items
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
    }
    Ok(())
}
