use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use reportdb_core::config::{resolve_with_base, Config, Settings};
use reportdb_core::loader::DocumentLoader;
use reportdb_core::traits::TokenCounter;
use reportdb_core::types::SourceDocument;
use reportdb_core::{Chunker, Cl100kTokenizer};
use reportdb_embed::provider_from_settings;
use reportdb_hybrid::{new_build_locks, RetrievalEngine};

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {prog} <ingest|query|stats> [args...]");
        eprintln!("  ingest [data_dir]           chunk, embed and index documents, warming the vector cache");
        eprintln!("  query \"<question>\" [top_k]  retrieve cited chunks for a question");
        eprintln!("  stats [data_dir]            per-document chunk and token counts");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn data_dir(settings: &Settings, arg: Option<&String>) -> anyhow::Result<PathBuf> {
    let cwd = env::current_dir()?;
    Ok(match arg {
        Some(dir) => resolve_with_base(&cwd, dir),
        None => resolve_with_base(&cwd, &settings.data.documents_dir),
    })
}

fn load_documents(dir: &Path) -> anyhow::Result<Vec<SourceDocument>> {
    let loader = DocumentLoader::new();
    let files = loader.list_files(dir);
    if files.is_empty() {
        println!("No .json, .jsonl or .txt files found under {}.", dir.display());
        return Ok(vec![]);
    }
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    let mut docs = Vec::new();
    for file in &files {
        pb.set_message(file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
        docs.extend(loader.load_file(file, dir).with_context(|| format!("reading {}", file.display()))?);
        pb.inc(1);
    }
    pb.finish_with_message(format!("{} blocks", docs.len()));
    Ok(docs)
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn engine(settings: &Settings) -> anyhow::Result<RetrievalEngine> {
    let provider = provider_from_settings(&settings.provider)?;
    Ok(RetrievalEngine::from_settings(settings, provider, new_build_locks())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "ingest" => {
            let dir = data_dir(&settings, args.first())?;
            println!("Ingesting from {}", dir.display());
            let docs = load_documents(&dir)?;
            let engine = engine(&settings)?;
            let pb = spinner("chunking, embedding and indexing");
            let info = engine.ingest(&docs).await;
            pb.finish_and_clear();
            let info = info?;
            println!(
                "Ingest complete: {} blocks -> {} chunks (snapshot v{}, {} d{})",
                docs.len(),
                info.chunk_count,
                info.version,
                info.embedder_id,
                info.dim
            );
            if let Some(path) = engine.store().cache_path() {
                println!("Vector cache: {}", path.display());
            }
        }
        "query" => {
            let Some(question) = args.first() else {
                eprintln!("Usage: reportdb query \"<question>\" [top_k]");
                std::process::exit(1);
            };
            let top_k = match args.get(1) {
                Some(k) => k.parse::<usize>().with_context(|| format!("top_k must be a number, got {k}"))?,
                None => settings.retrieval.top_k,
            };
            let dir = data_dir(&settings, None)?;
            let docs = load_documents(&dir)?;
            let engine = engine(&settings)?;
            let pb = spinner("loading indexes");
            let built = engine.ingest(&docs).await;
            pb.finish_and_clear();
            built?;

            let result = engine.retrieve(question, top_k, None).await?;
            if result.degraded {
                let failed: Vec<&str> = result.failed_methods.iter().map(|m| m.as_str()).collect();
                println!("[degraded: {} unavailable]", failed.join(", "));
            }
            if let Some(reason) = result.empty_reason {
                println!("No results ({reason:?}).");
                return Ok(());
            }
            for (i, sc) in result.chunks.iter().enumerate() {
                let preview: String = sc.chunk.text.chars().take(240).collect();
                println!("{}. [{:.4}] {} ({}, {})", i + 1, sc.fused_score, sc.chunk.id, sc.chunk.source, sc.chunk.kind.as_str());
                println!("   {}", preview.replace('\n', " "));
            }
            println!("Sources:");
            for source in &result.citations {
                println!("  - {source}");
            }
        }
        "stats" => {
            let dir = data_dir(&settings, args.first())?;
            let docs = load_documents(&dir)?;
            let chunker = Chunker::from_settings(Arc::new(Cl100kTokenizer::new()?), &settings.chunking)?;
            let chunks = chunker.chunk_corpus(&docs)?;
            let counter = chunker.counter();
            let mut per_doc: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
            for d in &docs {
                let e = per_doc.entry(d.source.document_id.as_str()).or_default();
                e.0 += 1;
                e.2 += counter.count(&d.text);
            }
            for c in &chunks {
                per_doc.entry(c.source.document_id.as_str()).or_default().1 += 1;
            }
            println!("{:<32} {:>8} {:>8} {:>10}", "document", "blocks", "chunks", "tokens");
            for (doc, (blocks, n_chunks, tokens)) in &per_doc {
                println!("{doc:<32} {blocks:>8} {n_chunks:>8} {tokens:>10}");
            }
            println!(
                "{} documents, {} chunks ({} max / {} overlap tokens, {})",
                per_doc.len(),
                chunks.len(),
                chunker.max_tokens(),
                chunker.overlap_tokens(),
                counter.name()
            );
        }
        _ => {
            eprintln!("Unknown command: {cmd}");
            std::process::exit(1);
        }
    }
    Ok(())
}
