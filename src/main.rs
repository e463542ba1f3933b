//! lore CLI: evolving knowledge graphs from transcripts.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use lorekeeper::config::LoreConfig;
use lorekeeper::extraction::{ExtractionResult, apply_extraction};
use lorekeeper::graph::{KnowledgeBase, Node, Source, SourceType};
use lorekeeper::insights::{Insights, KeyEntityMethod};
use lorekeeper::paths::LorePaths;
use lorekeeper::persist::{KnowledgeBaseStore, export_graphml};
use lorekeeper::resolution::{
    MergeEngine, MergeRequest, MergeType, check_merge_conflicts, find_candidates,
};

#[derive(Parser)]
#[command(name = "lore", version, about = "Evolving knowledge graphs from transcripts")]
struct Cli {
    /// Path to the config file (defaults to the XDG config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding knowledge bases (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty knowledge base.
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List knowledge bases.
    List,

    /// Show counts and type breakdowns for a knowledge base.
    Info {
        /// Knowledge base id or name.
        kb: String,
    },

    /// Apply an extraction JSON file to a knowledge base.
    Ingest {
        kb: String,
        /// Path to the extraction result JSON.
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        source_title: String,
        /// video, audio, document, webpage, or other.
        #[arg(long, default_value = "other")]
        source_type: SourceType,
        #[arg(long)]
        url: Option<String>,
    },

    /// List likely duplicate entities.
    Candidates {
        kb: String,
        /// Minimum confidence (defaults to the configured review threshold).
        #[arg(long)]
        min_confidence: Option<f64>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Merge one entity into another.
    Merge {
        kb: String,
        /// Label, alias, or id of the surviving entity.
        survivor: String,
        /// Label, alias, or id of the entity to fold in.
        merged: String,
        /// Idempotency key; repeating it returns the original merge.
        #[arg(long)]
        request_id: Option<String>,
        #[arg(long)]
        merged_by: Option<String>,
    },

    /// Merge every candidate at or above the auto-merge threshold.
    AutoResolve {
        kb: String,
        /// Override the configured auto-merge threshold.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Rank entities by connections, influence, or bridging.
    KeyEntities {
        kb: String,
        #[arg(long, default_value = "connections")]
        method: KeyEntityMethod,
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        entity_type: Option<String>,
    },

    /// Show how two entities are connected.
    Connect { kb: String, a: String, b: String },

    /// Show what two entities have in common.
    CommonGround { kb: String, a: String, b: String },

    /// Show sources mentioning an entity.
    Mentions { kb: String, entity: String },

    /// Discover groups of related entities.
    Groups {
        kb: String,
        /// Only show clusters disconnected from the main graph.
        #[arg(long)]
        isolated: bool,
    },

    /// Suggest what to explore next.
    Suggest {
        kb: String,
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Write the knowledge base as GraphML.
    ExportGraphml {
        kb: String,
        /// Output file (defaults to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete a knowledge base.
    Delete { kb: String },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = open_store(&cli, &config)?;
    let json = cli.json;

    match cli.command {
        Commands::Create { name, description } => {
            let kb = KnowledgeBase::new(name, description);
            store.save(&kb)?;
            println!("Created knowledge base \"{}\" ({})", kb.name(), kb.id());
        }

        Commands::List => {
            let metas = store.list()?;
            if json {
                return print_json(&metas);
            }
            if metas.is_empty() {
                println!("No knowledge bases in {}", store.base_dir().display());
            }
            for meta in metas {
                println!(
                    "{}  {:<24} nodes={} edges={} sources={}",
                    meta.id, meta.name, meta.node_count, meta.edge_count, meta.source_count
                );
            }
        }

        Commands::Info { kb } => {
            let kb = open_kb(&store, &kb)?;
            let stats = kb.stats();
            if json {
                return print_json(&stats);
            }
            println!("{} ({})", kb.name(), kb.id());
            if !kb.description().is_empty() {
                println!("  {}", kb.description());
            }
            println!(
                "  nodes={} edges={} sources={}",
                stats.node_count, stats.edge_count, stats.source_count
            );
            for (entity_type, count) in &stats.entity_types {
                println!("  {entity_type:<20} {count}");
            }
            if let Some(profile) = kb.domain_profile() {
                println!("  domain profile: {}", profile.name);
            }
        }

        Commands::Ingest {
            kb,
            file,
            source_title,
            source_type,
            url,
        } => {
            let mut kb = open_kb(&store, &kb)?;
            let text = std::fs::read_to_string(&file).into_diagnostic()?;
            let result: ExtractionResult = serde_json::from_str(&text).into_diagnostic()?;

            let mut source = Source::new(source_title, source_type);
            if let Some(url) = url {
                source = source.with_url(url);
            }
            let source_id = kb.add_source(source);
            let stats = apply_extraction(&mut kb, &result, &source_id)?;
            store.save(&kb)?;

            if json {
                return print_json(&stats);
            }
            println!(
                "Ingested {}: {} created, {} updated, {} relationships ({} skipped)",
                file.display(),
                stats.nodes_created,
                stats.nodes_updated,
                stats.relationships_added,
                stats.relationships_skipped
            );
        }

        Commands::Candidates {
            kb,
            min_confidence,
            limit,
        } => {
            let kb = open_kb(&store, &kb)?;
            let min = min_confidence.unwrap_or(config.resolution.review_threshold);
            let nodes: Vec<&Node> = kb.nodes().collect();
            let mut candidates = find_candidates(&nodes, &kb, &config.resolution, min);
            candidates.truncate(limit);
            if json {
                return print_json(&candidates);
            }
            if candidates.is_empty() {
                println!("No candidates at confidence >= {min:.2}");
            }
            for candidate in &candidates {
                let report = check_merge_conflicts(&kb, &candidate.id, &candidates, &config.resolution);
                println!(
                    "{:.3}  {}  <-  {}",
                    candidate.confidence,
                    node_label(&kb, &candidate.node_a_id),
                    node_label(&kb, &candidate.node_b_id)
                );
                for reason in report.reasons.iter().chain(&report.warnings) {
                    println!("       ! {reason}");
                }
            }
        }

        Commands::Merge {
            kb,
            survivor,
            merged,
            request_id,
            merged_by,
        } => {
            let kb = open_kb(&store, &kb)?;
            let kb_id = kb.id().to_string();
            let engine = MergeEngine::with_history(store.load_merge_history(&kb_id)?);

            // The labels may no longer resolve once the recorded merge has run.
            let replayed = request_id.as_deref().and_then(|id| engine.find_by_request_id(id));
            let (kb, history) = match replayed {
                Some(history) => {
                    tracing::info!(request_id = ?history.request_id, "merge already applied");
                    (kb, history)
                }
                None => {
                    let survivor_id = resolve_node(&kb, &survivor)?;
                    let merged_id = resolve_node(&kb, &merged)?;
                    let lock = RwLock::new(kb);
                    let mut request = MergeRequest::new(survivor_id, merged_id).merge_type(MergeType::User);
                    request.request_id = request_id;
                    request.merged_by = merged_by;
                    let history = engine.merge_nodes(&lock, request)?;

                    let kb = lock.into_inner().unwrap_or_else(PoisonError::into_inner);
                    store.save(&kb)?;
                    store.save_merge_history(&kb_id, &engine.history())?;
                    (kb, history)
                }
            };

            if json {
                return print_json(&history);
            }
            println!(
                "Merged \"{}\" into \"{}\" ({} edges redirected)",
                history.merged_label,
                node_label(&kb, &history.survivor_id),
                history.edges_redirected
            );
        }

        Commands::AutoResolve { kb, threshold } => {
            let kb = open_kb(&store, &kb)?;
            let threshold = threshold.unwrap_or(config.resolution.auto_merge_threshold);
            let nodes: Vec<&Node> = kb.nodes().collect();
            let candidates = find_candidates(&nodes, &kb, &config.resolution, threshold);
            let kb_id = kb.id().to_string();

            let engine = MergeEngine::with_history(store.load_merge_history(&kb_id)?);
            let lock = RwLock::new(kb);
            let merged = engine.auto_resolve_candidates(&lock, &candidates, threshold);

            let kb = lock.into_inner().unwrap_or_else(PoisonError::into_inner);
            if !merged.is_empty() {
                store.save(&kb)?;
                store.save_merge_history(&kb_id, &engine.history())?;
            }

            if json {
                return print_json(&merged);
            }
            println!("Auto-merged {} of {} candidates", merged.len(), candidates.len());
            for history in &merged {
                println!(
                    "  {}  <-  {}",
                    node_label(&kb, &history.survivor_id),
                    history.merged_label
                );
            }
        }

        Commands::KeyEntities {
            kb,
            method,
            limit,
            entity_type,
        } => {
            let kb = open_kb(&store, &kb)?;
            let insights = Insights::with_config(&kb, config.insights.clone());
            let ranked = insights.get_key_entities(limit, method, entity_type.as_deref());
            if json {
                return print_json(&ranked);
            }
            for (rank, entity) in ranked.iter().enumerate() {
                println!(
                    "{:>3}. {:<30} {:<14} {}",
                    rank + 1,
                    entity.label,
                    entity.entity_type,
                    entity.explanation
                );
            }
        }

        Commands::Connect { kb, a, b } => {
            let kb = open_kb(&store, &kb)?;
            let insights = Insights::with_config(&kb, config.insights.clone());
            let connection = insights.find_connection(&a, &b);
            if json {
                return print_json(&connection);
            }
            println!("{}", connection.message);
            for step in &connection.path {
                println!("  {} --{}--> {}", step.from, step.relationship_type, step.to);
            }
        }

        Commands::CommonGround { kb, a, b } => {
            let kb = open_kb(&store, &kb)?;
            let ground = Insights::with_config(&kb, config.insights.clone()).find_common_ground(&a, &b);
            if json {
                return print_json(&ground);
            }
            println!("{}", ground.message);
            for shared in &ground.shared {
                println!(
                    "  {} ({}): {} / {}",
                    shared.label, shared.entity_type, shared.relation_to_a, shared.relation_to_b
                );
            }
        }

        Commands::Mentions { kb, entity } => {
            let kb = open_kb(&store, &kb)?;
            let report = Insights::new(&kb).get_mentions(&entity);
            if json {
                return print_json(&report);
            }
            if !report.found {
                miette::bail!("no entity named \"{entity}\"");
            }
            println!("{} is mentioned in {} source(s)", report.label, report.mentions.len());
            for mention in &report.mentions {
                match &mention.url {
                    Some(url) => println!("  {} <{url}>", mention.title),
                    None => println!("  {}", mention.title),
                }
            }
        }

        Commands::Groups { kb, isolated } => {
            let kb = open_kb(&store, &kb)?;
            let insights = Insights::with_config(&kb, config.insights.clone());
            let groups = if isolated {
                insights.find_isolated_topics()
            } else {
                insights.discover_groups()
            };
            if json {
                return print_json(&groups);
            }
            for group in &groups {
                let members: Vec<&str> = group.members.iter().map(|m| m.label.as_str()).collect();
                println!("[{}] {} ({}): {}", group.id, group.label, group.size, members.join(", "));
            }
        }

        Commands::Suggest { kb, limit } => {
            let kb = open_kb(&store, &kb)?;
            let suggestions = Insights::with_config(&kb, config.insights.clone()).get_smart_suggestions(limit);
            if json {
                return print_json(&suggestions);
            }
            for suggestion in &suggestions {
                println!("{:?}: {}", suggestion.priority, suggestion.message);
            }
        }

        Commands::ExportGraphml { kb, output } => {
            let kb = open_kb(&store, &kb)?;
            let xml = export_graphml(&kb);
            match output {
                Some(path) => {
                    std::fs::write(&path, xml).into_diagnostic()?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{xml}"),
            }
        }

        Commands::Delete { kb } => {
            let kb = open_kb(&store, &kb)?;
            store.delete(kb.id())?;
            println!("Deleted knowledge base \"{}\" ({})", kb.name(), kb.id());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<LoreConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => match LorePaths::resolve() {
            Ok(paths) => paths.config_file(),
            // No home directory: fall back to defaults when the data dir is explicit.
            Err(_) if cli.data_dir.is_some() => return Ok(LoreConfig::default()),
            Err(e) => return Err(e.into()),
        },
    };
    Ok(LoreConfig::load(&path)?)
}

fn open_store(cli: &Cli, config: &LoreConfig) -> Result<KnowledgeBaseStore> {
    let base = match cli.data_dir.clone().or_else(|| config.data_dir.clone()) {
        Some(dir) => dir,
        None => {
            let paths = LorePaths::resolve()?;
            paths.ensure_dirs()?;
            paths.knowledge_base_dir()
        }
    };
    Ok(KnowledgeBaseStore::new(base))
}

fn open_kb(store: &KnowledgeBaseStore, id_or_name: &str) -> Result<KnowledgeBase> {
    match store.find(id_or_name)? {
        Some(kb) => Ok(kb),
        None => miette::bail!("knowledge base not found: {id_or_name} (see `lore list`)"),
    }
}

/// Accept a node id, label, or alias.
fn resolve_node(kb: &KnowledgeBase, text: &str) -> Result<String> {
    if kb.has_node(text) {
        return Ok(text.to_string());
    }
    match kb.resolve_label(text) {
        Some(id) => Ok(id.to_string()),
        None => miette::bail!("no entity named \"{text}\" in {}", kb.name()),
    }
}

fn node_label(kb: &KnowledgeBase, node_id: &str) -> String {
    kb.get_node(node_id)
        .map(|n| n.label.clone())
        .unwrap_or_else(|| node_id.to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
