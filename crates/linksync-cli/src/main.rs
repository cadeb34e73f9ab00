//! Linksync CLI
//!
//! Thin wrapper around linksync-core for command-line usage. No remote is
//! configured here, so every mutation is applied locally and waits in the
//! Pending Operation Queue.
//!
//! ## Usage
//!
//! ```bash
//! # Show client information
//! linksync info
//!
//! # Build a folder tree
//! linksync folder create "Rust"
//! linksync folder create "Async" --parent 1
//! linksync folder list
//!
//! # Save links, optionally in a folder and tagged
//! linksync tag create "docs"
//! linksync link add "Tokio" https://tokio.rs --folder 2 --tag 3
//! linksync link list
//!
//! # Pin a folder to a panel
//! linksync panel create "Work"
//! linksync panel add-folder 5 2
//!
//! # Inspect pending sync work
//! linksync queue list
//! linksync status
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linksync_core::logging::{self, JsonlLayer};
use linksync_core::{
    Applied, EntityKind, Folder, FolderFields, LinkFields, LinkScope, LocalId, LocalRef,
    MirrorOutcome, OfflineRemote, SyncConfig, SyncEngine, SyncMeta,
};
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Linksync - offline-first link collection
#[derive(Parser)]
#[command(name = "linksync")]
#[command(version)]
#[command(about = "Linksync - offline-first link collection")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.linksync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write a JSONL activity log into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show client information
    Info,

    /// Folder management
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Link management
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Tag management
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Panel management
    Panel {
        #[command(subcommand)]
        action: PanelAction,
    },

    /// Pending Operation Queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Show the sync indicator
    Status,

    /// Summarize the JSONL activity log (requires --log-dir)
    Logs {
        /// Only entries written by this client
        #[arg(long)]
        client: Option<String>,
    },
}

#[derive(Subcommand)]
enum FolderAction {
    /// Create a folder
    Create {
        name: String,
        /// Parent folder id (root when omitted)
        #[arg(short, long)]
        parent: Option<i64>,
        #[arg(short, long)]
        note: Option<String>,
    },
    /// Show the folder tree
    List,
    /// Rename a folder
    Rename { id: i64, name: String },
    /// Move a folder under another one (root when --parent is omitted)
    Move {
        id: i64,
        #[arg(short, long)]
        parent: Option<i64>,
    },
    /// Archive a folder
    Archive { id: i64 },
    /// Unarchive a folder
    Unarchive { id: i64 },
    /// Delete a folder with everything inside it
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum LinkAction {
    /// Save a link
    Add {
        title: String,
        url: String,
        /// Folder id (saved links when omitted)
        #[arg(short, long)]
        folder: Option<i64>,
        /// Tag ids
        #[arg(short, long = "tag")]
        tags: Vec<i64>,
        #[arg(short, long)]
        note: Option<String>,
        #[arg(long)]
        important: bool,
    },
    /// List links
    List {
        /// Only links in this folder
        #[arg(short, long)]
        folder: Option<i64>,
    },
    /// Archive a link
    Archive { id: i64 },
    /// Delete a link
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum TagAction {
    /// Create a tag
    Create { name: String },
    /// List tags
    List,
    /// Delete a tag and detach it from every link
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum PanelAction {
    /// Create a panel
    Create { name: String },
    /// List panels with their folders
    List,
    /// Pin a folder to a panel
    AddFolder { panel: i64, folder: i64 },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending operations, oldest first
    List,
}

// ============================================================================
// Setup
// ============================================================================

fn setup_logging(verbosity: u8, log_dir: Option<&Path>, client: &str) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let jsonl = match log_dir {
        Some(dir) => Some(
            JsonlLayer::new(dir, client)
                .with_context(|| format!("Failed to open log directory {}", dir.display()))?,
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(jsonl)
        .init();
    Ok(())
}

/// Get the default data directory (~/.linksync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".linksync")
        .join("data")
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

// ============================================================================
// Output
// ============================================================================

fn sync_state(meta: &SyncMeta) -> String {
    match meta.remote_id {
        Some(remote) => format!("synced as {}", remote),
        None => "pending".to_string(),
    }
}

fn mirror_state(mirror: &MirrorOutcome) -> String {
    match mirror {
        MirrorOutcome::LocalApplied => "local only".to_string(),
        MirrorOutcome::RemoteMirrored { event_timestamp } => {
            format!("mirrored at {}", format_timestamp(*event_timestamp))
        }
        MirrorOutcome::RemoteFailed(reason) => format!("queued ({})", reason),
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

fn report<T>(what: &str, applied: &Applied<T>) {
    println!("{}", what);
    println!("  Sync: {}", mirror_state(&applied.mirror));
}

fn print_tree(folders: &[Folder]) {
    let children = |parent: Option<LocalId>| -> Vec<&Folder> {
        folders
            .iter()
            .filter(|f| match (f.parent, parent) {
                (None, None) => true,
                (Some(LocalRef::Local(p)), Some(q)) => p == q,
                // Parents not materialized yet show at the root
                (Some(LocalRef::Dangling(_)), None) => true,
                _ => false,
            })
            .collect()
    };

    let mut stack: Vec<(&Folder, usize)> =
        children(None).into_iter().rev().map(|f| (f, 0)).collect();
    while let Some((folder, depth)) = stack.pop() {
        let archived = if folder.archived { " [archived]" } else { "" };
        println!(
            "  {}{} {}{} ({})",
            "  ".repeat(depth),
            folder.meta.local_id,
            folder.name,
            archived,
            sync_state(&folder.meta)
        );
        for child in children(Some(folder.meta.local_id)).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
}

fn scope_label(scope: &LinkScope<LocalRef>) -> String {
    match scope {
        LinkScope::Saved => "saved".to_string(),
        LinkScope::History => "history".to_string(),
        LinkScope::Folder(LocalRef::Local(id)) => format!("folder {}", id),
        LinkScope::Folder(LocalRef::Dangling(remote)) => {
            format!("folder {} (not yet received)", remote)
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    setup_logging(cli.verbose, cli.log_dir.as_deref(), &config.display_name)?;

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let engine = SyncEngine::open(&data_dir, Arc::new(OfflineRemote), config)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
    debug!(data_dir = %data_dir.display(), "Opened engine");
    let gateway = engine.gateway();

    match cli.command {
        Commands::Info => {
            println!("Linksync v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Client: {}", engine.correlation());
            println!("Data directory: {}", data_dir.display());
            println!("Watermark: {}", format_timestamp(engine.watermark()));
            println!();
            println!("Folders: {}", engine.folders()?.len());
            println!("Links: {}", engine.links()?.len());
            println!("Tags: {}", engine.tags()?.len());
            println!("Panels: {}", engine.panels()?.len());
            println!("Pending operations: {}", engine.queued()?.len());
        }

        Commands::Folder { action } => match action {
            FolderAction::Create { name, parent, note } => {
                let mut folder = FolderFields::named(&name);
                folder.parent = parent.map(LocalId);
                if let Some(note) = note {
                    folder = folder.with_note(note);
                }
                let applied = gateway.create_folder_with(folder).await?;
                report(&format!("Created folder {}: {}", applied.value, name), &applied);
            }
            FolderAction::List => {
                let folders = engine.folders()?;
                if folders.is_empty() {
                    println!("No folders found.");
                } else {
                    println!("Folders ({}):", folders.len());
                    print_tree(&folders);
                }
            }
            FolderAction::Rename { id, name } => {
                let applied = gateway.rename_folder(LocalId(id), &name).await?;
                report(&format!("Renamed folder {} to {}", id, name), &applied);
            }
            FolderAction::Move { id, parent } => {
                let applied = gateway.move_folder(LocalId(id), parent.map(LocalId)).await?;
                let target = parent.map_or("root".to_string(), |p| format!("folder {}", p));
                report(&format!("Moved folder {} to {}", id, target), &applied);
            }
            FolderAction::Archive { id } => {
                let applied = gateway.archive_folder(LocalId(id)).await?;
                report(&format!("Archived folder {}", id), &applied);
            }
            FolderAction::Unarchive { id } => {
                let applied = gateway.unarchive_folder(LocalId(id)).await?;
                report(&format!("Unarchived folder {}", id), &applied);
            }
            FolderAction::Delete { id } => {
                let applied = gateway.delete_folder(LocalId(id)).await?;
                report(
                    &format!("Deleted folder {} ({} records removed)", id, applied.value.len()),
                    &applied,
                );
            }
        },

        Commands::Link { action } => match action {
            LinkAction::Add {
                title,
                url,
                folder,
                tags,
                note,
                important,
            } => {
                let mut link = LinkFields::new(&title, url)
                    .with_tags(tags.into_iter().map(LocalId).collect());
                if let Some(folder) = folder {
                    link = link.in_scope(LinkScope::Folder(LocalId(folder)));
                }
                if let Some(note) = note {
                    link = link.with_note(note);
                }
                if important {
                    link = link.important();
                }
                let applied = gateway.create_link(link).await?;
                report(&format!("Saved link {}: {}", applied.value, title), &applied);
            }
            LinkAction::List { folder } => {
                let links: Vec<_> = engine
                    .links()?
                    .into_iter()
                    .filter(|l| match folder {
                        Some(id) => l.scope.folder() == Some(&LocalRef::Local(LocalId(id))),
                        None => true,
                    })
                    .collect();
                if links.is_empty() {
                    println!("No links found.");
                } else {
                    println!("Links ({}):", links.len());
                    for link in links {
                        let star = if link.important { "*" } else { " " };
                        let archived = if link.archived { " [archived]" } else { "" };
                        println!(
                            "  {}{} {}{} <{}> in {} ({})",
                            star,
                            link.meta.local_id,
                            link.title,
                            archived,
                            link.url,
                            scope_label(&link.scope),
                            sync_state(&link.meta)
                        );
                    }
                }
            }
            LinkAction::Archive { id } => {
                let applied = gateway.archive_link(LocalId(id)).await?;
                report(&format!("Archived link {}", id), &applied);
            }
            LinkAction::Delete { id } => {
                let applied = gateway.delete_link(LocalId(id)).await?;
                report(&format!("Deleted link {}", id), &applied);
            }
        },

        Commands::Tag { action } => match action {
            TagAction::Create { name } => {
                let applied = gateway.create_tag(&name).await?;
                report(&format!("Created tag {}: {}", applied.value, name), &applied);
            }
            TagAction::List => {
                let tags = engine.tags()?;
                if tags.is_empty() {
                    println!("No tags found.");
                } else {
                    println!("Tags ({}):", tags.len());
                    for tag in tags {
                        println!(
                            "  {} {} ({})",
                            tag.meta.local_id,
                            tag.name,
                            sync_state(&tag.meta)
                        );
                    }
                }
            }
            TagAction::Delete { id } => {
                let applied = gateway.delete_tag(LocalId(id)).await?;
                report(&format!("Deleted tag {}", id), &applied);
            }
        },

        Commands::Panel { action } => match action {
            PanelAction::Create { name } => {
                let applied = gateway.create_panel(&name).await?;
                report(&format!("Created panel {}: {}", applied.value, name), &applied);
            }
            PanelAction::List => {
                let panels = engine.panels()?;
                if panels.is_empty() {
                    println!("No panels found.");
                } else {
                    let pinned = engine.panel_folders()?;
                    println!("Panels ({}):", panels.len());
                    for panel in panels {
                        println!(
                            "  {} {} ({})",
                            panel.meta.local_id,
                            panel.name,
                            sync_state(&panel.meta)
                        );
                        let mut folders: Vec<_> =
                            pinned.iter().filter(|pf| pf.is_on(panel.meta.local_id)).collect();
                        folders.sort_by_key(|pf| pf.position);
                        for pf in folders {
                            println!("    #{} folder {}", pf.position, pf.folder);
                        }
                    }
                }
            }
            PanelAction::AddFolder { panel, folder } => {
                let applied = gateway
                    .add_folder_to_panel(LocalId(panel), LocalId(folder))
                    .await?;
                report(
                    &format!("Pinned folder {} to panel {} as {}", folder, panel, applied.value),
                    &applied,
                );
            }
        },

        Commands::Queue { action } => match action {
            QueueAction::List => {
                let entries = engine.queued()?;
                if entries.is_empty() {
                    println!("Queue is empty.");
                } else {
                    println!("Pending operations ({}):", entries.len());
                    for entry in entries {
                        println!(
                            "  #{} {} (queued {})",
                            entry.id,
                            entry.kind,
                            format_timestamp(entry.enqueued_at)
                        );
                    }
                }
            }
        },

        Commands::Status => {
            let indicator = engine.indicator()?;
            println!("Sync: {}", indicator);
            let unsynced: usize = EntityKind::ALL
                .iter()
                .map(|kind| engine.store().list_unsynced(*kind).map(|r| r.len()))
                .sum::<Result<usize, _>>()?;
            println!("Unsynced records: {}", unsynced);
        }

        Commands::Logs { client } => {
            let Some(log_dir) = cli.log_dir.as_deref() else {
                anyhow::bail!("--log-dir is required to read the activity log");
            };
            let entries = logging::read_entries(log_dir, client.as_deref())?;
            if entries.is_empty() {
                println!("No log entries found.");
            } else {
                println!("Log entries ({}):", entries.len());
                for (client, counts) in logging::summarize(&entries) {
                    println!(
                        "  {}: {} error, {} warn, {} info, {} debug",
                        client, counts.error, counts.warn, counts.info, counts.debug
                    );
                }
            }
        }
    }

    Ok(())
}
