use std::env;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use codelens_cli::{chunk_files, open_searcher, read_chunks, routed, settings_for_request};
use codelens_core::config::{Config, Settings};
use codelens_core::types::{SearchFilters, SearchMode};
use codelens_hybrid::{QueryRouter, SearchRequest};

const USAGE: &str = "Usage: codelens <command> [args...]

Commands:
  ingest <file.jsonl|dir>          index pre-chunked code (one chunk metadata object per line)
  search <query> [options]         run a hybrid search
      -k <n>                       number of results
      --mode <hybrid|semantic|lexical>
      --path <substring>           only files whose path contains <substring>
      --multi-hop | --ego-graph | --rerank | --no-rerank
      --json                       print results as JSON
  route <query>                    show which embedding model a query routes to
  status                           index statistics
  validate [--strict]              check lexical/dense consistency
  resync                           rebuild the lexical index from the dense store
  clear                            empty both indices
  remove <file_path>               drop every chunk of a file
  optimize <query>...              grid-search fusion weights on the given queries";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,codelens=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn required(args: &[String], what: &str) -> String {
    match args.first() {
        Some(v) => v.clone(),
        None => {
            eprintln!("Error: missing {what}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "ingest" => ingest(&settings, PathBuf::from(required(&args, "input path")))?,
        "search" => search(&settings, &args)?,
        "route" => {
            let query = required(&args, "query");
            let decision = QueryRouter::from_settings(&settings.routing)?.route(&query);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        "status" => {
            let searcher = open_searcher(&settings)?;
            println!("{}", serde_json::to_string_pretty(&searcher.get_stats())?);
        }
        "validate" => {
            let searcher = open_searcher(&settings)?;
            if args.iter().any(|a| a == "--strict") {
                let report = searcher.validate_strict()?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                if !report.is_consistent() {
                    std::process::exit(2);
                }
            } else if searcher.validate_index_sync() {
                println!("✅ Indices in sync");
            } else {
                println!("⚠️  Indices out of sync; run `codelens resync`");
                std::process::exit(2);
            }
        }
        "resync" => {
            let searcher = open_searcher(&settings)?;
            let n = searcher.resync_from_dense()?;
            println!("✅ Rebuilt lexical index from {n} dense chunks");
        }
        "clear" => {
            open_searcher(&settings)?.clear_index()?;
            println!("✅ Both indices cleared");
        }
        "remove" => {
            let file = required(&args, "file path");
            let n = open_searcher(&settings)?.remove_file_chunks(&file)?;
            println!("🗑️  Removed {n} chunks of {file}");
        }
        "optimize" => {
            if args.is_empty() {
                eprintln!("Error: optimize needs at least one query\n\n{USAGE}");
                std::process::exit(1);
            }
            let searcher = open_searcher(&settings)?;
            let report = searcher.optimize_weights(&args)?;
            for t in &report.trials {
                println!("bm25={:.1} dense={:.1} score={:.4}", t.weights.bm25(), t.weights.dense(), t.score);
            }
            println!(
                "✅ Best: bm25={:.2} dense={:.2} (score {:.4}); set [fusion] in config.toml to keep it",
                report.best.bm25(),
                report.best.dense(),
                report.best_score
            );
        }
        "help" | "--help" | "-h" => println!("{USAGE}"),
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn ingest(settings: &Settings, input: PathBuf) -> anyhow::Result<()> {
    let files = chunk_files(&input)?;
    println!("Ingesting {} chunk file(s) from {}", files.len(), input.display());
    let mut chunks = Vec::new();
    for f in &files {
        chunks.extend(read_chunks(f)?);
    }
    if chunks.is_empty() {
        println!("Nothing to index");
        return Ok(());
    }

    let searcher = open_searcher(settings)?;
    let pb = ProgressBar::new(chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")?
            .progress_chars("#>-"),
    );
    let mut indexed = 0usize;
    for batch in chunks.chunks(settings.sync.batch_size) {
        indexed += searcher.index_documents(batch)?;
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();

    let stats = searcher.get_stats();
    println!("✅ Indexed {indexed} chunks ({} total, in sync: {})", stats.total_chunks, stats.in_sync);
    Ok(())
}

fn search(settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let mut request = SearchRequest::new(required(args, "query"));
    let mut json = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-k" => {
                i += 1;
                let k = args.get(i).and_then(|v| v.parse::<usize>().ok());
                let Some(k) = k else {
                    eprintln!("Error: -k requires a number");
                    std::process::exit(1);
                };
                request = request.with_k(k);
            }
            "--mode" => {
                i += 1;
                let mode: SearchMode = args.get(i).map(String::as_str).unwrap_or_default().parse()?;
                request = request.with_mode(mode);
            }
            "--path" => {
                i += 1;
                let filters = SearchFilters { file_pattern: args.get(i).cloned(), ..Default::default() };
                request = request.with_filters(filters);
            }
            "--multi-hop" => request.multi_hop = Some(true),
            "--ego-graph" => request.ego_graph = Some(true),
            "--rerank" => request.rerank = Some(true),
            "--no-rerank" => request.rerank = Some(false),
            "--json" => json = true,
            other => eprintln!("Ignoring unknown option {other}"),
        }
        i += 1;
    }

    let settings = settings_for_request(settings, &request);
    let searcher = open_searcher(&settings)?;
    if settings.reranker.enabled {
        searcher.preload_reranker();
    }
    let outcome = if settings.routing.enabled { routed(&settings, searcher)?.search(&request) } else { searcher.search(&request) };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    if !outcome.ready {
        println!("⚠️  Index is empty; run `codelens ingest` first");
        return Ok(());
    }
    if let Some(d) = &outcome.routing {
        println!("🧭 {} (confidence {:.2}): {}", d.model_key(), d.confidence(), d.reason());
    }
    println!("Found {} results for '{}'", outcome.results.len(), request.query);
    for r in &outcome.results {
        println!(
            "{:>2}. [{:.4}] {} {}:{}-{} ({})",
            r.rank,
            r.score,
            r.metadata.qualified_name(),
            r.metadata.file_path,
            r.metadata.start_line,
            r.metadata.end_line,
            r.source
        );
    }
    Ok(())
}
