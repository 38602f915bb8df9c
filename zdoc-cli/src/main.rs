//! doc: local-first Markdown publishing client.
//!
//! Documents are edited in `posts/` (articles) or `knowledge/` (knowledge
//! entries), committed into a local content store with `add`, and exchanged
//! with the server through `push` and `pull`.
//!
//! # Usage
//!
//! ```bash
//! # Configure the workspace with your user token
//! doc init <token>
//!
//! # Write, commit and publish an article
//! doc new hello --category rust
//! doc add hello.md
//! doc push
//!
//! # Bring in changes made elsewhere
//! doc pull
//! doc status
//!
//! # Knowledge entries
//! doc kpull ownership
//! doc kadd ownership -m "clarify moves"
//! doc kpush ownership
//! ```

mod remote;
mod upload;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zdoc_core::remote::RemoteApi;
use zdoc_core::{
    CommitEngine, CommitOutcome, Config, Environment, KnowledgeEngine, Reconciler, RemoveOutcome,
    StatusEntry, SyncReport, Workspace, status, version,
};

use crate::remote::HttpRemote;
use crate::upload::HttpAssetStore;

#[derive(Parser, Debug)]
#[command(name = "doc")]
#[command(author = "zdoc Contributors")]
#[command(version)]
#[command(about = "Sync Markdown posts and knowledge entries with the publishing server")]
struct Cli {
    /// Workspace root
    #[arg(short = 'C', long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the workspace and store the user token
    Init {
        token: String,
        /// Server deployment: production or test
        #[arg(long, default_value = "production")]
        env: Environment,
    },

    /// Create an article from the header template
    New {
        name: String,
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Commit an article, or every article with `.`
    Add { name: String },

    /// Delete an article locally; `push` deletes it on the server
    Rm { name: String },

    /// Fetch server changes into the workspace
    Pull,

    /// Send committed changes to the server
    Push,

    /// Show uncommitted article changes
    Status,

    /// Restore an article, or every article with `.`, from its committed content
    Checkout { name: String },

    /// Fetch a knowledge entry and its history
    Kpull { name: String },

    /// Commit a knowledge entry with a change log
    Kadd {
        name: String,
        #[arg(short = 'm', long = "message")]
        changelog: String,
    },

    /// Push a committed knowledge entry
    Kpush { name: String },

    /// Create a knowledge entry on the server
    Knew { name: String },

    /// Register an alias for a knowledge entry
    Krel { name: String, alias: String },

    /// Show uncommitted knowledge changes
    Kstatus,

    /// Restore a knowledge entry, or every entry with `.`
    Kcheckout { name: String },

    /// Check whether a newer client is published
    Update,
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::from_default_env()
            .add_directive("doc=debug".parse()?)
            .add_directive("zdoc_core=debug".parse()?)
    } else {
        EnvFilter::from_default_env()
            .add_directive("doc=info".parse()?)
            .add_directive("zdoc_core=info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    if let Commands::Init { token, env } = &cli.command {
        return cmd_init(&cli.dir, token, *env);
    }

    let ws = Workspace::open(&cli.dir)?;
    ws.config().require_token()?;
    let remote = HttpRemote::new(ws.config())?;
    let assets = HttpAssetStore::new(ws.config())?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::New { name, category } => cmd_new(&ws, &remote, &name, category).await,
        Commands::Add { name } => cmd_add(&ws, &remote, &assets, &name).await,
        Commands::Rm { name } => cmd_rm(&ws, &remote, &assets, &name),
        Commands::Pull => {
            let report = Reconciler::new(&ws, &remote).pull().await?;
            print_report("Pull", &report);
            Ok(())
        }
        Commands::Push => {
            let report = Reconciler::new(&ws, &remote).push().await?;
            print_report("Push", &report);
            Ok(())
        }
        Commands::Status => print_status(status::article_status(&ws)?),
        Commands::Checkout { name } => {
            let report = status::checkout_articles(&ws, &name)?;
            print_checkout(&report);
            Ok(())
        }
        Commands::Kpull { name } => {
            let report = KnowledgeEngine::new(&ws, &remote, &assets).pull(&name).await?;
            println!(
                "{}: server version {}, {} new history versions, current file: {:?}",
                name,
                report.now_version,
                report.materialized.len(),
                report.current
            );
            Ok(())
        }
        Commands::Kadd { name, changelog } => {
            let outcome = KnowledgeEngine::new(&ws, &remote, &assets)
                .add(&name, &changelog)
                .await?;
            println!("{}: {:?}", name, outcome);
            Ok(())
        }
        Commands::Kpush { name } => {
            KnowledgeEngine::new(&ws, &remote, &assets).push(&name).await?;
            println!("Pushed {}", name);
            Ok(())
        }
        Commands::Knew { name } => {
            KnowledgeEngine::new(&ws, &remote, &assets).create(&name).await?;
            println!("Created {}", name);
            Ok(())
        }
        Commands::Krel { name, alias } => {
            KnowledgeEngine::new(&ws, &remote, &assets)
                .relate(&name, &alias)
                .await?;
            println!("Related {} to {}", alias, name);
            Ok(())
        }
        Commands::Kstatus => print_status(KnowledgeEngine::new(&ws, &remote, &assets).status()?),
        Commands::Kcheckout { name } => {
            let report = KnowledgeEngine::new(&ws, &remote, &assets).checkout(&name)?;
            print_checkout(&report);
            Ok(())
        }
        Commands::Update => cmd_update(&remote).await,
    }
}

fn cmd_init(dir: &Path, token: &str, env: Environment) -> Result<()> {
    let layout_config = Config::load(&dir.join(".repo"))?;
    let config = Config {
        token: token.trim().to_string(),
        env,
        ..layout_config
    };
    config.require_token()?;
    let ws = Workspace::init(dir, config)?;
    println!("Initialized workspace at {:?}", ws.root());
    println!("  Server: {}", ws.config().server_url());
    Ok(())
}

async fn cmd_new(ws: &Workspace, remote: &HttpRemote, name: &str, category: Option<String>) -> Result<()> {
    let category = match category {
        Some(c) => c,
        None => prompt_category(remote).await?,
    };
    let path = ws.create_article(name, &category)?;
    println!("Created {:?}", path);
    Ok(())
}

async fn prompt_category(remote: &HttpRemote) -> Result<String> {
    let categories = remote.list_categories().await?;
    if categories.is_empty() {
        return Err(anyhow!("The server returned no categories; pass --category"));
    }
    println!("Categories:");
    for (i, c) in categories.iter().enumerate() {
        println!("  {}) {}", i + 1, c);
    }
    print!("Choose a category: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let choice = line.trim();
    if let Ok(n) = choice.parse::<usize>() {
        if let Some(c) = n.checked_sub(1).and_then(|i| categories.get(i)) {
            return Ok(c.clone());
        }
    }
    categories
        .into_iter()
        .find(|c| c == choice)
        .ok_or_else(|| anyhow!("Unknown category {:?}", choice))
}

async fn cmd_add(ws: &Workspace, remote: &HttpRemote, assets: &HttpAssetStore, name: &str) -> Result<()> {
    let engine = CommitEngine::new(ws, remote, assets);
    if name == "." {
        let report = engine.commit_all().await?;
        for (name, error) in &report.failed {
            println!("failed:  {}: {}", name, error);
        }
        println!("{}", report.summary());
        return Ok(());
    }
    match engine.commit(name).await? {
        CommitOutcome::Unchanged => println!("{} unchanged", name),
        CommitOutcome::Committed { hash, .. } => println!("Committed {} ({})", name, hash),
    }
    Ok(())
}

fn cmd_rm(ws: &Workspace, remote: &HttpRemote, assets: &HttpAssetStore, name: &str) -> Result<()> {
    match CommitEngine::new(ws, remote, assets).remove(name)? {
        RemoveOutcome::Removed => println!("Removed {}; push to delete it on the server", name),
        RemoveOutcome::AlreadyDeleted => println!("{} is already deleted", name),
    }
    Ok(())
}

async fn cmd_update(remote: &HttpRemote) -> Result<()> {
    let published = remote.client_version().await?;
    if version::is_newer(&published, version::CLIENT_VERSION) {
        println!(
            "A newer client is available: {} (installed {})",
            published,
            version::CLIENT_VERSION
        );
    } else {
        println!("Client is up to date ({})", version::CLIENT_VERSION);
    }
    Ok(())
}

fn print_report(op: &str, report: &SyncReport) {
    for name in &report.fetched {
        println!("pulled:  {}", name);
    }
    for name in &report.uploaded {
        println!("pushed:  {}", name);
    }
    for name in &report.deleted_local {
        println!("deleted: {} (local)", name);
    }
    for name in &report.deleted_remote {
        println!("deleted: {} (server)", name);
    }
    for (name, error) in &report.failed {
        println!("failed:  {}: {}", name, error);
    }
    println!("{}: {}", op, report.summary());
}

fn print_status(entries: Vec<StatusEntry>) -> Result<()> {
    if entries.is_empty() {
        println!("Nothing to commit; working directory clean.");
    }
    for entry in entries {
        println!("{}", entry);
    }
    Ok(())
}

fn print_checkout(report: &zdoc_core::CheckoutReport) {
    for name in &report.restored {
        println!("restored: {}", name);
    }
    for (name, error) in &report.failed {
        println!("failed:   {}: {}", name, error);
    }
}
