use std::path::Path;

use clap::Parser;
use docchat::{
    App,
    Config,
    chunking,
    cli::{self, Cli, Command, DocumentArgs},
    error,
    extraction,
    passage_store::PassageStore,
    repl::{self, ChatOptions},
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, numbered_passages, preview},
};
use kdam::{Bar, BarExt, tqdm};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCCHAT_LOG") {
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

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match &cli.command {
        Command::Chunk(args) => {
            let config = Config::resolve(cli.overrides(None))?;
            cmd_chunk(&config, &args.file, args.json)?;
        }
        Command::Index(args) => {
            let config = Config::resolve(cli.overrides(None))?;
            let mut app = App::from_config(config)?;
            index_file(&mut app, &args.file)?;
            let manifest = app.save_snapshot()?;
            eprintln!(
                "Saved {} passages from {} to {}",
                manifest.passage_count,
                manifest.source,
                app.config().index_file.display()
            );
        }
        Command::Ask(args) => {
            let config =
                Config::resolve(cli.overrides(args.document.top_k))?;
            let mut app = App::from_config(config)?;
            prepare_document(&mut app, &args.document)?;
            cmd_ask(&mut app, args)?;
        }
        Command::Chat(args) => {
            let config =
                Config::resolve(cli.overrides(args.document.top_k))?;
            let mut app = App::from_config(config)?;
            prepare_document(&mut app, &args.document)?;
            repl::run_chat(
                app,
                ChatOptions {
                    show_context: args.document.show_context,
                },
            )?;
        }
        Command::Status(args) => {
            let config = Config::resolve(cli.overrides(None))?;
            cmd_status(&config, args.json)?;
        }
        Command::Completions(args) => {
            args.generate();
        }
    }

    Ok(())
}

fn cmd_chunk(config: &Config, file: &Path, json: bool) -> error::Result<()> {
    let text = extraction::extract_file(file)?;
    let text = chunking::preprocess(&text, config.lowercase);
    let passages = chunking::chunk_text(&text, config.chunk_size);

    if json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
        return Ok(());
    }

    for p in &passages {
        let oversized = if p.is_oversized(config.chunk_size) {
            ", oversized"
        } else {
            ""
        };
        println!(
            "[{}] {} chars{oversized}, bytes {}..{}",
            p.index + 1,
            p.char_len,
            p.start_offset,
            p.end_offset
        );
        println!("{}\n", p.text);
    }
    eprintln!(
        "{} passages (max {} chars)",
        passages.len(),
        config.chunk_size
    );
    Ok(())
}

/// Extract, chunk and index `file`, showing embedding progress.
fn index_file(app: &mut App, file: &Path) -> error::Result<()> {
    let mut pb: Option<Bar> = None;
    app.load_file_with_progress(file, |done, total| {
        let pb = pb.get_or_insert_with(|| {
            tqdm!(total = total, desc = "Embedding", unit = " passages")
        });
        let _ = pb.update_to(done);
    })?;
    if pb.is_some() {
        eprintln!();
    }
    Ok(())
}

fn prepare_document(app: &mut App, args: &DocumentArgs) -> error::Result<()> {
    if let Some(file) = &args.file {
        index_file(app, file)?;
    } else if args.snapshot {
        let doc = app.restore_snapshot()?;
        eprintln!(
            "Loaded snapshot of {} ({} passages)",
            doc.source,
            doc.passages.len()
        );
    }
    Ok(())
}

fn cmd_ask(app: &mut App, args: &cli::AskArgs) -> error::Result<()> {
    let reply = app.ask(&args.question)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    println!("{}", reply.content);
    if args.document.show_context
        && let Some(contexts) = &reply.contexts
        && !contexts.is_empty()
    {
        // Label each source with its position in the loaded document.
        let numbers: Option<Vec<usize>> = app.document().map(|doc| {
            contexts
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    doc.passages
                        .iter()
                        .position(|p| p == c)
                        .map_or(i + 1, |pos| pos + 1)
                })
                .collect()
        });
        println!(
            "\nSources (passage number in document):\n{}",
            numbered_passages(
                contexts,
                numbers.as_deref(),
                Some(DEFAULT_PREVIEW_MAX_CHARS)
            )
        );
    }
    Ok(())
}

fn cmd_status(config: &Config, json: bool) -> error::Result<()> {
    let store_path = config.passage_store_file();
    let snapshot = if store_path.exists() {
        PassageStore::open(&store_path)?.manifest()?
    } else {
        None
    };

    if json {
        let status = serde_json::json!({
            "config": config,
            "snapshot": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Cache directory: {}", config.cache_dir.display());
    println!("Embedding model: {}", config.embedding_model);
    println!("Generation model: {}", config.generation_model);
    println!("Chunk size: {} chars", config.chunk_size);
    println!("Top-k: {}", config.top_k);
    println!("Metric: {}", config.metric);
    println!("Lowercase: {}", config.lowercase);
    println!("Index file: {}", config.index_file.display());
    match snapshot {
        Some(m) => {
            println!("Snapshot: {} passages of {}", m.passage_count, m.source);
            println!("  model: {}, dimension {}", m.embedding_model, m.dimension);
            println!("  fingerprint: {}", preview(&m.fingerprint, 16));
        }
        None => println!("Snapshot: none"),
    }
    Ok(())
}
