use std::path::PathBuf;

use clap::Parser;
use docwhisper::{
    ConfigDb,
    CorpusDb,
    DataDir,
    Error,
    Result,
    chunking::ChunkingConfig,
    cli::{
        AddArgs,
        AskArgs,
        Cli,
        Command,
        ConfigAction,
        ListArgs,
        SearchArgs,
        StatusArgs,
    },
    extract::FileExtractor,
    generation::IGNORE_CONTEXT_SUFFIX,
    incremental,
    ingestion::IngestSummary,
    mcp,
    retriever,
    settings::{self, Settings},
    walker,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCWHISPER_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Add(args) => cmd_add(&config_db, &data_dir, &args)?,
        Command::Search(args) => cmd_search(&config_db, &data_dir, &args)?,
        Command::Ask(args) => cmd_ask(&config_db, &data_dir, &args)?,
        Command::List(args) => cmd_list(&data_dir, &args)?,
        Command::Status(args) => cmd_status(&config_db, &data_dir, &args)?,
        Command::Rebuild => cmd_rebuild(&config_db, &data_dir)?,
        Command::Clear => cmd_clear(&data_dir)?,
        Command::Config { action } => cmd_config(&config_db, action)?,
        Command::Mcp => mcp::run_mcp(data_dir, config_db)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn print_failures(summary: &IngestSummary) {
    for failure in &summary.failures {
        eprintln!("  failed: {}: {}", failure.source_id, failure.reason);
    }
}

fn cmd_add(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &AddArgs,
) -> Result<()> {
    let settings = Settings::load(config_db)?;
    let chunking = ChunkingConfig::new(
        args.chunk_size.unwrap_or(settings.chunking.chunk_size),
        args.overlap.unwrap_or(settings.chunking.overlap),
    );
    chunking.validate()?;

    let glob = args
        .glob
        .as_deref()
        .map(|pattern| {
            globset::Glob::new(pattern)
                .map(|g| g.compile_matcher())
                .map_err(|e| {
                    Error::Config(format!("invalid glob pattern: {e}"))
                })
        })
        .transpose()?;

    let files = walker::collect_inputs(&args.paths, glob.as_ref())?;
    if files.is_empty() {
        println!("No supported documents found.");
        return Ok(());
    }

    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let embedder = settings.build_embedder()?;
    corpus_db.check_embedder(&embedder.inner().name())?;

    let diff = incremental::diff_sources(&corpus_db, &files)?;
    for file in &diff.unchanged_files {
        info!(source = %file.source_id(), "unchanged, skipping");
    }
    for file in &diff.changed_files {
        warn!(
            source = %file.source_id(),
            "changed since it was indexed; run `docwhisper rebuild` to re-index"
        );
    }
    if diff.new_files.is_empty() {
        println!(
            "Nothing new to index ({} unchanged, {} changed).",
            diff.unchanged_files.len(),
            diff.changed_files.len()
        );
        return Ok(());
    }

    let session = corpus_db.load_session(embedder)?;
    let summary = session.ingest_files(
        &diff.new_files,
        &FileExtractor::default(),
        &chunking,
    )?;
    corpus_db.record_ingestion(&session, &diff.new_files, &summary)?;

    println!(
        "Indexed {} document(s), {} chunk(s); {} failed.",
        summary.succeeded(),
        summary.chunks_added(),
        summary.failed()
    );
    print_failures(&summary);
    Ok(())
}

fn cmd_search(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &SearchArgs,
) -> Result<()> {
    let settings = Settings::load(config_db)?;
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let session = corpus_db.load_session(settings.build_embedder()?)?;

    let k = args.k.unwrap_or(settings.top_k);
    let result = session.retrieve(&args.query, k)?;

    if args.json {
        retriever::format_json(&result)?;
    } else {
        retriever::format_human(&result);
        if result.clamped() {
            eprintln!(
                "Only {} chunk(s) indexed; fewer than the {k} requested.",
                result.hits.len()
            );
        }
    }
    Ok(())
}

fn cmd_ask(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &AskArgs,
) -> Result<()> {
    let settings = Settings::load(config_db)?;
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let session = corpus_db.load_session(settings.build_embedder()?)?;
    let generator = settings.build_generator()?;

    let query = if args.ignore_documents {
        format!("{}{IGNORE_CONTEXT_SUFFIX}", args.query)
    } else {
        args.query.clone()
    };
    let k = args.k.unwrap_or(settings.top_k);
    let answer =
        session.answer(&query, k, generator.as_ref(), &settings.generation)?;

    if args.json {
        println!("{}", serde_json::to_string(&answer)?);
        return Ok(());
    }
    if args.show_context {
        retriever::format_human(&answer.retrieved);
        println!();
    }
    println!("{}", answer.text);
    Ok(())
}

fn cmd_list(data_dir: &DataDir, args: &ListArgs) -> Result<()> {
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let sources = corpus_db.sources()?;

    if args.json {
        println!("{}", serde_json::to_string(&sources)?);
    } else if sources.is_empty() {
        println!("No documents indexed.");
    } else {
        for record in &sources {
            println!("{}\t{} chunk(s)", record.source_id, record.chunk_count);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    data_dir: PathBuf,
    embedder: String,
    corpus_embedder: Option<String>,
    generator: String,
    documents: usize,
    chunks: u64,
    dimension: Option<usize>,
    missing: Vec<String>,
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &StatusArgs,
) -> Result<()> {
    let settings = Settings::load(config_db)?;
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let sources = corpus_db.sources()?;

    let report = StatusReport {
        data_dir: data_dir.root().to_path_buf(),
        embedder: settings.build_embedder()?.inner().name(),
        corpus_embedder: corpus_db.embedder()?,
        generator: settings.generator.to_string(),
        documents: sources.len(),
        chunks: corpus_db.len()?,
        dimension: corpus_db.dimension()?,
        missing: incremental::missing_sources(&sources)
            .into_iter()
            .map(|r| r.source_id.clone())
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    println!("Data directory: {}", report.data_dir.display());
    println!("Embedder: {}", report.embedder);
    if let Some(stored) = &report.corpus_embedder
        && *stored != report.embedder
    {
        println!("  corpus was built with {stored}; run `docwhisper rebuild`");
    }
    println!("Generator: {}", report.generator);
    println!("Documents: {}", report.documents);
    println!("Chunks: {}", report.chunks);
    if let Some(dimension) = report.dimension {
        println!("Dimension: {dimension}");
    }
    if !report.missing.is_empty() {
        println!("Missing on disk: {}", report.missing.len());
        for source in &report.missing {
            println!("  {source}");
        }
    }
    Ok(())
}

fn cmd_rebuild(config_db: &ConfigDb, data_dir: &DataDir) -> Result<()> {
    let settings = Settings::load(config_db)?;
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    eprintln!("Rebuilding {} document(s)...", corpus_db.sources()?.len());

    let report = incremental::rebuild(
        &corpus_db,
        settings.build_embedder()?,
        &FileExtractor::default(),
    )?;

    println!(
        "Rebuilt {} document(s), {} chunk(s); {} failed, {} missing.",
        report.summary.succeeded(),
        report.summary.chunks_added(),
        report.summary.failed(),
        report.dropped.len()
    );
    print_failures(&report.summary);
    Ok(())
}

fn cmd_clear(data_dir: &DataDir) -> Result<()> {
    let corpus_db = CorpusDb::open(&data_dir.corpus_db())?;
    let documents = corpus_db.sources()?.len();
    let chunks = corpus_db.len()?;
    corpus_db.clear()?;
    println!("Removed {documents} document(s), {chunks} chunk(s).");
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let settings = Settings::load(config_db)?;
            let values = settings.values();
            if json {
                let map: serde_json::Map<String, serde_json::Value> = values
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::Value::Object(map));
            } else {
                for (key, value) in values {
                    println!("{key} = {}", value.escape_default());
                }
            }
        }
        ConfigAction::Set { key, value } => {
            settings::set_setting(config_db, &key, &value)?;
            println!("Set {key} = {}", value.escape_default());
        }
        ConfigAction::Unset { key } => {
            if settings::unset_setting(config_db, &key)? {
                println!("Unset {key}; the default applies again.");
            } else {
                println!("{key} was not set.");
            }
        }
    }
    Ok(())
}
