use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use eventrag::knowledge;
use eventrag::settings::EmbedderArgs;
use eventrag::{KnowledgeStore, RetryPolicy};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "eventrag-index",
    about = "Embed the built-in knowledge base and persist the vector index"
)]
struct IndexCli {
    /// Directory receiving index.bin, knowledge.json and knowledge_base.txt
    #[arg(long, env = "EVENTRAG_STORE_DIR", default_value = "knowledge_store")]
    store_dir: PathBuf,

    /// Attempts per embedding request (first try included)
    #[arg(long, env = "EVENTRAG_EMBED_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: usize,

    /// Print the knowledge base and exit without embedding
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    embedder: EmbedderArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = IndexCli::parse();
    if cli.dry_run {
        print!("{}", knowledge::snapshot_text());
        return Ok(());
    }

    let retry = RetryPolicy::new(cli.max_attempts, eventrag::retry::DEFAULT_BASE_DELAY);
    let embedder = cli.embedder.build(retry)?;
    let store = KnowledgeStore::build_default(embedder.as_ref())
        .context("failed to build knowledge store")?;
    store
        .save(&cli.store_dir)
        .with_context(|| format!("failed to save knowledge store to {:?}", cli.store_dir))?;
    info!(
        dir = %cli.store_dir.display(),
        statements = store.statements().len(),
        dimension = store.index().dimension(),
        "knowledge store written"
    );
    Ok(())
}
