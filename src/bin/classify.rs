use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use eventrag::io::{read_inputs_from, write_records, InputFormat, OutputFormat};
use eventrag::settings::{EmbedderArgs, LlmArgs};
use eventrag::{BatchRunner, CancelFlag, Classifier, ClassifierContext, KnowledgeStore};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "eventrag-classify",
    about = "Classify event-log messages against the persisted knowledge store"
)]
struct ClassifyCli {
    /// CSV (with a Message column) or JSONL file of log messages
    #[arg(long)]
    input: PathBuf,

    /// Input layout; inferred from the extension by default
    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    input_format: InputFormat,

    /// Output file; results go to stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output layout
    #[arg(long, env = "EVENTRAG_OUTPUT_FORMAT", value_enum, default_value_t = OutputFormat::Json)]
    output_format: OutputFormat,

    /// Directory produced by eventrag-index
    #[arg(long, env = "EVENTRAG_STORE_DIR", default_value = "knowledge_store")]
    store_dir: PathBuf,

    #[command(flatten)]
    tuning: eventrag::TuningArgs,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    llm: LlmArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = ClassifyCli::parse();
    let format = cli.input_format.resolve(&cli.input)?;
    let file = File::open(&cli.input).with_context(|| format!("failed to open {:?}", cli.input))?;
    let inputs = read_inputs_from(file, format)?;
    if inputs.is_empty() {
        bail!("no log messages found in {:?}", cli.input);
    }

    let store = KnowledgeStore::load(&cli.store_dir)
        .with_context(|| format!("failed to load knowledge store from {:?}", cli.store_dir))?;
    let classifier_settings = cli.tuning.classifier_settings();
    let batch_settings = cli.tuning.batch_settings();
    let embedder = cli.embedder.build(classifier_settings.retry())?;
    let llm = cli.llm.build()?;
    info!(
        statements = store.statements().len(),
        provider = llm.name(),
        messages = inputs.len(),
        limit = batch_settings.limit(),
        "starting classification"
    );

    let context = Arc::new(ClassifierContext::new(store, embedder, llm));
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received; finishing the current message");
        handler_flag.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let runner = BatchRunner::new(Classifier::new(context, classifier_settings), batch_settings)
        .with_cancel_flag(cancel);
    let outcome = runner.run(&inputs, batch_settings.limit());

    match &cli.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("failed to create {:?}", path))?;
            write_records(BufWriter::new(file), &outcome.records, cli.output_format)?;
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_records(&mut lock, &outcome.records, cli.output_format)?;
            lock.flush()?;
        }
    }
    info!(
        records = outcome.records.len(),
        fallbacks = outcome.fallbacks(),
        errors = outcome.errors,
        cancelled = outcome.cancelled,
        "classification complete"
    );
    Ok(())
}
