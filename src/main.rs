//! Page Annotator - control-surface CLI
//!
//! Inspects and edits the annotation records kept in the JSON file store, and
//! resolves an origin's annotations against a saved page snapshot.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use page_annotator::annotations::{AnnotationStore, NotePatch, Record, RecordLoad};
use page_annotator::dom::{MemoryDocument, PageSnapshot};
use page_annotator::overlay::RecordingSurface;
use page_annotator::queue::MutationQueue;
use page_annotator::reconcile::Trigger;
use page_annotator::storage::{ChangeFeed, JsonFileStore, RecordStore};
use page_annotator::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "annotator")]
#[command(about = "Inspect and edit page annotations")]
struct Cli {
    /// YAML config file (defaults to ./annotator.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record store file (overrides config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List origins that have a record
    Origins,

    /// Show the notes and highlights of an origin
    List {
        origin: String,

        /// Print the normalized record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or hide a note
    SetVisible {
        origin: String,
        note_id: String,
        #[arg(action = clap::ArgAction::Set)]
        visible: bool,
    },

    /// Delete a note
    Delete { origin: String, note_id: String },

    /// Remove every highlight of an origin
    ClearHighlights { origin: String },

    /// Convert legacy single-note records in place (all origins by default)
    Migrate { origin: Option<String> },

    /// Resolve an origin's annotations against a page snapshot
    Resolve {
        origin: String,

        /// JSON page snapshot
        #[arg(long)]
        page: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,page_annotator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;
    if let Some(path) = cli.store {
        config.store_path = path;
    }
    let store = Arc::new(JsonFileStore::with_feed(
        &config.store_path,
        ChangeFeed::new(config.change_capacity),
    ));

    match cli.command {
        Commands::Origins => run_origins(store.as_ref()).await,
        Commands::List { origin, json } => run_list(store.as_ref(), &origin, json).await,
        Commands::SetVisible {
            origin,
            note_id,
            visible,
        } => {
            let queue = MutationQueue::new(store, origin);
            let record = queue
                .enqueue({
                    let note_id = note_id.clone();
                    move |record| {
                        if let Some(note) = record.note_mut(&note_id) {
                            note.apply(&NotePatch::visible(visible));
                        }
                    }
                })
                .wait()
                .await?;
            if record.note(&note_id).is_none() {
                bail!("note not found: {note_id}");
            }
            tracing::info!(%note_id, visible, "Visibility updated");
            Ok(())
        }
        Commands::Delete { origin, note_id } => {
            let queue = MutationQueue::new(store, origin);
            let id = note_id.clone();
            queue
                .enqueue(move |record| {
                    if !record.remove_note(&id) {
                        tracing::debug!(note_id = %id, "Nothing to delete");
                    }
                })
                .wait()
                .await?;
            tracing::info!(%note_id, "Note deleted");
            Ok(())
        }
        Commands::ClearHighlights { origin } => {
            let queue = MutationQueue::new(store, origin);
            let record = queue
                .enqueue(|record| {
                    record.clear_highlights();
                })
                .wait()
                .await?;
            tracing::info!(notes = record.notes.len(), "Highlights cleared");
            Ok(())
        }
        Commands::Migrate { origin } => run_migrate(store, origin).await,
        Commands::Resolve { origin, page } => run_resolve(store, &origin, &page, &config).await,
    }
}

async fn run_origins(store: &JsonFileStore) -> Result<()> {
    for origin in store.origins().await? {
        let RecordLoad { record, .. } = Record::from_stored(store.get(&origin).await?);
        println!(
            "{}\t{} notes\t{} highlights",
            origin,
            record.notes.len(),
            record.highlights.len()
        );
    }
    Ok(())
}

async fn run_list(store: &JsonFileStore, origin: &str, json: bool) -> Result<()> {
    let RecordLoad {
        record,
        migrated,
        skipped,
    } = Record::from_stored(store.get(origin).await?);

    if json {
        println!("{}", serde_json::to_string_pretty(&record.to_value()?)?);
        return Ok(());
    }

    if migrated {
        println!("(legacy record, not yet migrated)");
    }
    for note in &record.notes {
        let flags = match (note.visible, note.minimized) {
            (false, _) => "hidden",
            (true, true) => "minimized",
            (true, false) => "shown",
        };
        println!(
            "{}\t{}\t{} +({}, {})\t{}",
            note.id,
            flags,
            note.anchor.selector,
            note.anchor.offset.x,
            note.anchor.offset.y,
            note.text.lines().next().unwrap_or_default()
        );
    }
    for highlight in &record.highlights {
        println!(
            "{}\t{}\t{}\t{}",
            highlight.id,
            if highlight.is_area() { "area" } else { "text" },
            highlight.color,
            highlight.anchor.selector
        );
    }
    if skipped > 0 {
        println!("({skipped} unreadable entries)");
    }
    Ok(())
}

async fn run_migrate(store: Arc<JsonFileStore>, origin: Option<String>) -> Result<()> {
    let origins = match origin {
        Some(origin) => vec![origin],
        None => store.origins().await?,
    };

    for origin in origins {
        let load = Record::from_stored(store.get(&origin).await?);
        if !load.migrated {
            tracing::debug!(%origin, "Already current");
            continue;
        }
        let queue = MutationQueue::new(store.clone(), origin.clone());
        let record = queue.enqueue(|_| {}).wait().await?;
        tracing::info!(
            %origin,
            notes = record.notes.len(),
            skipped = load.skipped,
            "Legacy record migrated"
        );
    }
    Ok(())
}

async fn run_resolve(
    store: Arc<JsonFileStore>,
    origin: &str,
    page: &Path,
    config: &Config,
) -> Result<()> {
    let contents = std::fs::read_to_string(page)
        .with_context(|| format!("failed to read page snapshot {}", page.display()))?;
    let snapshot: PageSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("invalid page snapshot {}", page.display()))?;

    // Read-only: reconcile the stored value without a queue cycle
    let RecordLoad { record, .. } = Record::from_stored(store.get(origin).await?);
    let queue = MutationQueue::new(store, origin);
    let mut annotations = AnnotationStore::new(
        MemoryDocument::from_snapshot(&snapshot),
        RecordingSurface::new(),
        queue,
    )
    .with_visibility_margin(config.visibility_margin_px);

    let report = annotations.reconcile(&record);
    annotations.schedule(Trigger::Structural);
    annotations.on_frame();
    tracing::info!(created = report.created, "Resolved against {}", page.display());

    let overlays: Vec<_> = annotations.surface().overlays().cloned().collect();
    println!("{}", serde_json::to_string_pretty(&overlays)?);
    Ok(())
}
