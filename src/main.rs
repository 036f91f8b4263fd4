//! # rag-chat CLI (`ragchat`)
//!
//! Conversational question answering over a local text corpus.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat split` | Load and chunk the corpus, print chunk statistics |
//! | `ragchat index` | Build the vector index, or reuse the existing one |
//! | `ragchat info` | Show metadata of the stored index |
//! | `ragchat search "<query>"` | Retrieve passages without generating an answer |
//! | `ragchat ask "<question>"` | Answer one question |
//! | `ragchat chat` | Interactive multi-turn chat; type `exit` to quit |
//! | `ragchat serve` | Start the JSON HTTP server |
//!
//! Logs go to stderr (`RUST_LOG` controls the level, default `info`);
//! command output goes to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rag_chat::config::{self, Config};
use rag_chat::embedding::create_embedder;
use rag_chat::pipeline;
use rag_chat::server;
use rag_chat_core::orchestrator::{RagChain, Session};

/// rag-chat: ask questions about your documents, with follow-ups.
///
/// All commands read a TOML configuration file given by `--config`.
/// See `config/ragchat.example.toml` for every option.
#[derive(Parser)]
#[command(name = "ragchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and chunk the corpus, then print chunk statistics.
    Split {
        /// Print the first N chunks.
        #[arg(long, default_value_t = 1)]
        show: usize,
    },

    /// Build the vector index, or load it if it already exists.
    Index {
        /// Replace any existing index under the same store id.
        #[arg(long)]
        rebuild: bool,
    },

    /// Show metadata of the stored index.
    Info,

    /// Retrieve the most similar passages for a query.
    Search {
        query: String,

        /// Number of passages (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Also print the retrieved passages.
        #[arg(long)]
        sources: bool,
    },

    /// Interactive multi-turn chat. Type `exit` to end the conversation.
    Chat,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Split { show } => run_split(&cfg, show)?,
        Commands::Index { rebuild } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let manager = pipeline::index_manager(&cfg);
            let index =
                pipeline::prepare_index(&cfg, &manager, embedder.as_ref(), rebuild).await?;
            println!(
                "Index '{}' ready: {} records, model {}, {} dims.",
                index.store_id(),
                index.len(),
                index.meta().model,
                index.meta().dims
            );
        }
        Commands::Info => {
            let manager = pipeline::index_manager(&cfg);
            let index = pipeline::open_index(&cfg, &manager, None).await?;
            let meta = index.meta();
            let created = chrono::DateTime::from_timestamp(meta.created_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| meta.created_at.to_string());
            println!("store_id:           {}", meta.store_id);
            println!("records:            {}", meta.record_count);
            println!("model:              {}", meta.model);
            println!("dims:               {}", meta.dims);
            println!("metric:             {}", meta.metric.as_str());
            println!("corpus_fingerprint: {}", meta.corpus_fingerprint);
            println!("created_at:         {}", created);
        }
        Commands::Search { query, k } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let manager = pipeline::index_manager(&cfg);
            let index = pipeline::open_index(&cfg, &manager, Some(embedder.as_ref())).await?;
            let mut retriever = pipeline::retriever(&cfg, index, embedder)?;
            if let Some(k) = k {
                retriever = retriever.with_k(k)?;
            }
            let passages = retriever.retrieve(&query).await?;
            if passages.is_empty() {
                println!("No results.");
            }
            for (i, p) in passages.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} #{} (chars {}..{})",
                    i + 1,
                    p.score,
                    p.metadata.source,
                    p.metadata.chunk_index,
                    p.metadata.start_char,
                    p.metadata.end_char
                );
                println!("   {}", snippet(&p.text, 240));
            }
        }
        Commands::Ask { question, sources } => {
            let chain = pipeline::build_chain(&cfg).await?;
            let mut session = Session::new(chain);
            let outcome = session.ask_detailed(&question).await?;
            println!("{}", outcome.answer);
            if sources {
                println!();
                for p in &outcome.passages {
                    println!("- {} #{} [{:.4}]", p.metadata.source, p.metadata.chunk_index, p.score);
                }
            }
        }
        Commands::Chat => {
            let chain = pipeline::build_chain(&cfg).await?;
            chat_loop(chain).await?;
        }
        Commands::Serve => {
            let chain = pipeline::build_chain(&cfg).await?;
            server::run_server(&cfg.server.bind, server::AppState::new(chain)).await?;
        }
    }

    Ok(())
}

fn run_split(cfg: &Config, show: usize) -> Result<()> {
    let chunks = pipeline::load_chunks(cfg)?;
    let sources: std::collections::BTreeSet<&str> =
        chunks.iter().map(|c| c.source.as_str()).collect();
    println!(
        "Split {} document(s) into {} chunks.",
        sources.len(),
        chunks.len()
    );
    for c in chunks.iter().take(show) {
        println!(
            "\n--- {} #{} (chars {}..{}) ---\n{}",
            c.source, c.chunk_index, c.start_char, c.end_char, c.text
        );
    }
    Ok(())
}

/// Read utterances from stdin until `exit` or EOF. A failed turn is
/// reported and the conversation continues with its history unchanged.
async fn chat_loop(chain: RagChain) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    let mut session = Session::new(chain);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Start chatting with the AI! Type 'exit' to end the conversation.");
    loop {
        if interactive {
            stdout.write_all(b"You: ").await?;
            stdout.flush().await?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let utterance = line.trim();
        if utterance.eq_ignore_ascii_case("exit") {
            break;
        }
        if utterance.is_empty() {
            continue;
        }

        match session.ask(utterance).await {
            Ok(answer) => println!("AI: {}", answer),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
