use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use docrag_core::config::{expand_path, Config, Settings};
use docrag_core::normalize::{is_supported_file, normalize};
use docrag_core::types::{SourceDocument, Strategy};
use docrag_embed::embedder_from_settings;
use docrag_hybrid::{state_path, HybridRetriever, IndexBuilder, IndexState};

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} <index|query|status> [args...]", prog);
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "index" => cmd_index(&settings, &args),
        "query" => cmd_query(&settings, &args),
        "status" => cmd_status(&settings),
        _ => {
            eprintln!("Unknown command: {}", cmd);
            std::process::exit(1);
        }
    }
}

fn cmd_index(settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let mut docs_dir = expand_path(&settings.data.docs_dir);
    let mut skip_embeddings = false;
    for arg in args {
        match arg.as_str() {
            "--no-embeddings" => skip_embeddings = true,
            other if other.starts_with("--") => {
                anyhow::bail!("unknown flag for index: {}", other)
            }
            positional => docs_dir = expand_path(positional),
        }
    }

    let index_dir = expand_path(&settings.data.index_dir);
    println!("Indexing {} into {}", docs_dir.display(), index_dir.display());

    let documents = collect_documents(&docs_dir)?;
    if documents.is_empty() {
        println!("No supported documents found under {}.", docs_dir.display());
    }

    let embedder = if skip_embeddings {
        None
    } else {
        embedder_from_settings(&settings.embedding)?
    };
    let mut builder = IndexBuilder::new(
        &index_dir,
        settings.chunking,
        embedder,
        settings.embedding.batch_size,
    )?;
    let report = builder.build(&documents)?;

    println!(
        "Build complete: {} added, {} updated, {} removed, {} unchanged",
        report.added, report.updated, report.removed, report.unchanged
    );
    println!(
        "Indexed {} chunks, embedded {} ({} failures), purged {} stale entries",
        report.chunks_indexed, report.embedded, report.embedding_failures, report.orphans_purged
    );
    Ok(())
}

fn cmd_query(settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let mut query: Option<String> = None;
    let mut strategy = settings.search.strategy;
    let mut alpha = settings.search.alpha;
    let mut top_k = settings.search.top_k;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--strategy=") {
            strategy = value.parse::<Strategy>()?;
        } else if let Some(value) = arg.strip_prefix("--alpha=") {
            alpha = value.parse()?;
        } else if let Some(value) = arg.strip_prefix("--top-k=") {
            top_k = value.parse()?;
        } else if arg.starts_with("--") {
            anyhow::bail!("unknown flag for query: {}", arg);
        } else if query.is_none() {
            query = Some(arg.clone());
        } else {
            anyhow::bail!("unexpected extra argument: {}", arg);
        }
    }
    let Some(query) = query else {
        eprintln!("Usage: docrag query \"<query>\" [--strategy=S] [--alpha=A] [--top-k=K]");
        std::process::exit(1);
    };

    let index_dir = expand_path(&settings.data.index_dir);
    let embedder = embedder_from_settings(&settings.embedding)?;
    let retriever = HybridRetriever::open(&index_dir, embedder, settings.search.alpha)?;
    let results = retriever.retrieve(&query, strategy, alpha, top_k)?;

    if results.is_empty() {
        println!("No results for \"{}\"", query);
        return Ok(());
    }
    for result in &results {
        let scores = match (result.lexical_score, result.semantic_score) {
            (Some(l), Some(s)) => format!("lexical {:.3}, semantic {:.3}", l, s),
            (Some(l), None) => format!("lexical {:.3}", l),
            (None, Some(s)) => format!("semantic {:.3}", s),
            (None, None) => String::new(),
        };
        println!(
            "{:>2}. [{:.3}] {} ({})",
            result.rank, result.fused_score, result.chunk.source_path, scores
        );
        if let Some(heading) = &result.chunk.heading {
            println!("    # {}", heading);
        }
        println!("    {}", snippet(&result.chunk.text, 160));
    }
    Ok(())
}

fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let index_dir = expand_path(&settings.data.index_dir);
    let state = IndexState::load(&state_path(&index_dir));
    if state.documents.is_empty() {
        println!("No tracked documents at {}. Run `docrag index` first.", index_dir.display());
        return Ok(());
    }
    let total_chunks: usize = state.documents.values().map(|r| r.chunk_ids.len()).sum();
    println!("{} documents, {} chunks tracked", state.documents.len(), total_chunks);
    for (path, record) in &state.documents {
        println!("  {} ({} chunks, hash {})", path, record.chunk_ids.len(), &record.content_hash[..12.min(record.content_hash.len())]);
    }
    Ok(())
}

/// Walk the docs directory and normalize every supported file, keeping paths
/// relative to the root. Sorted for deterministic build input.
fn collect_documents(docs_dir: &Path) -> anyhow::Result<Vec<SourceDocument>> {
    let mut files: Vec<PathBuf> = WalkDir::new(docs_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_supported_file(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let raw = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "failed to read file, skipping");
                continue;
            }
        };
        let text = normalize(&raw, &file)?;
        let relative = file
            .strip_prefix(docs_dir)
            .unwrap_or(&file)
            .to_string_lossy()
            .to_string();
        documents.push(SourceDocument { path: relative, text });
    }
    Ok(documents)
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
