//! nevis: register clients, ingest their documents and search both.
//!
//! ```bash
//! nevis client add --first Maria --last Lopez --email maria@example.com
//! nevis upload --client <CLIENT_ID> notes/*.txt
//! nevis search "retirement planning" -n 5
//! nevis eval suite.json --json
//! ```
mod output;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use nevis_core::config::Config;
use nevis_core::traits::{ClientStore, DocumentStore};
use nevis_core::types::{Client, ScopeFilter};
use nevis_hybrid::eval::{load_cases, run_suite};
use nevis_hybrid::Stack;

#[derive(Parser)]
#[command(name = "nevis", version, about = "Hybrid client and document search")]
struct Cli {
    /// Directory holding config.toml and config.<RUST_ENV>.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Overrides data.root
    #[arg(long, global = true, env = "NEVIS_DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage client records
    #[command(subcommand)]
    Client(ClientCommand),
    /// Ingest text files (or directories of them) for a client
    Upload(UploadArgs),
    /// Re-ingest an existing document from a file
    Reprocess { document_id: String, path: PathBuf },
    /// Search clients and documents
    Search(SearchArgs),
    /// Run a JSON suite of labelled queries and report retrieval metrics
    Eval {
        suite: PathBuf,
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ClientCommand {
    Add {
        #[arg(long)]
        first: String,
        #[arg(long)]
        last: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    client: String,
    /// Title for a single file; defaults to the file stem
    #[arg(long)]
    title: Option<String>,
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Args)]
struct SearchArgs {
    query: String,
    #[arg(short = 'n', long)]
    top_k: Option<usize>,
    /// Restrict to one client's documents
    #[arg(long)]
    client: Option<String>,
    /// Overrides chunk_search.reranker_score_threshold
    #[arg(long, allow_hyphen_values = true)]
    threshold: Option<f32>,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Config::load_with(&cli.config_dir).context("loading configuration")?.settings()?;
    if let Some(root) = cli.data_dir {
        settings.data.root = root;
    }

    match cli.command {
        Command::Client(cmd) => client(settings, cmd).await,
        Command::Upload(args) => upload(settings, args).await,
        Command::Reprocess { document_id, path } => {
            let stack = Stack::open(settings).await?;
            let text = read_text(&path)?;
            let doc = stack.ingestor()?.reprocess(&document_id, &text).await?;
            println!("{} {}", doc.id, doc.status);
            Ok(())
        }
        Command::Search(args) => search(settings, args).await,
        Command::Eval { suite, top_k, json } => {
            let cases = load_cases(&suite).with_context(|| format!("reading {}", suite.display()))?;
            let top_k = top_k.unwrap_or(settings.search.default_top_k);
            let stack = Stack::open(settings).await?;
            let report = run_suite(&stack.search_service(), &cases, top_k).await;
            println!("{}", if json { serde_json::to_string_pretty(&report)? } else { output::format_report(&report) });
            Ok(())
        }
    }
}

async fn client(settings: nevis_core::config::Settings, cmd: ClientCommand) -> Result<()> {
    let stack = Stack::open(settings).await?;
    match cmd {
        ClientCommand::Add { first, last, email, description } => {
            let client = Client::new(first, last, email, description);
            stack.catalog.insert_client(client.clone()).await?;
            info!(client_id = %client.id, "client added");
            println!("{}", client.id);
        }
        ClientCommand::List => {
            for c in stack.catalog.clients().await? {
                let docs = stack.catalog.documents(Some(&c.id)).await?.len();
                println!("{}  {:<28} {:<32} {} docs", c.id, c.display_name(), c.email, docs);
            }
        }
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for p in paths {
        if p.is_dir() {
            let walker = WalkDir::new(p).into_iter().filter_map(|e| e.ok());
            files.extend(
                walker
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| matches!(p.extension().and_then(|x| x.to_str()), Some("txt" | "md"))),
            );
        } else {
            files.push(p.clone());
        }
    }
    files.sort();
    files
}

async fn upload(settings: nevis_core::config::Settings, args: UploadArgs) -> Result<()> {
    let files = collect_files(&args.paths);
    if files.is_empty() {
        bail!("no .txt or .md files found");
    }
    if args.title.is_some() && files.len() > 1 {
        bail!("--title only applies to a single file");
    }
    let stack = Stack::open(settings).await?;
    let ingestor = stack.ingestor()?;

    let pb = (files.len() > 1).then(|| {
        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}") {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    });
    let mut failed = 0usize;
    for path in &files {
        let title = args.title.clone().unwrap_or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default());
        if let Some(pb) = &pb {
            pb.set_message(title.clone());
        }
        let result = match read_text(path) {
            Ok(text) => ingestor.upload(&args.client, &title, &text).await.map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(doc) => println!("{} {} {}", doc.id, doc.status, path.display()),
            Err(e) => {
                failed += 1;
                eprintln!("failed: {}: {e:#}", path.display());
            }
        }
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    if failed > 0 {
        bail!("{failed} of {} files failed", files.len());
    }
    Ok(())
}

async fn search(settings: nevis_core::config::Settings, args: SearchArgs) -> Result<()> {
    let stack = Stack::open(settings).await?;
    let mut service = stack.search_service();
    if let Some(t) = args.threshold {
        service = service.with_threshold(t);
    }
    let scope = args.client.map(ScopeFilter::Client).unwrap_or_default();
    let results = service.search_scoped(&args.query, args.top_k, &scope).await?;
    let out = if args.json { output::format_json(&args.query, &results)? } else { output::format_table(&args.query, &results) };
    println!("{out}");
    Ok(())
}
