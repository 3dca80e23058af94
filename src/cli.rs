use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{config::Overrides, vector_index::Metric};

#[derive(Debug, Parser)]
#[command(
    name = "docchat",
    about = "Ask questions about your documents, answered by local models"
)]
pub struct Cli {
    /// Override the cache directory (models, index snapshot)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding model ID (HuggingFace) or local model path
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// Generation model ID (HuggingFace) or local model path
    #[arg(long, global = true)]
    pub generation_model: Option<String>,

    /// Maximum passage length in characters
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Path of the index snapshot file
    #[arg(long, global = true)]
    pub index_file: Option<PathBuf>,

    /// Distance metric for retrieval
    #[arg(long, value_enum, global = true)]
    pub metric: Option<Metric>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Configuration overrides given on the command line.
    pub fn overrides(&self, top_k: Option<usize>) -> Overrides {
        Overrides {
            cache_dir: self.data_dir.clone(),
            chunk_size: self.chunk_size,
            embedding_model: self.embedding_model.clone(),
            generation_model: self.generation_model.clone(),
            index_file: self.index_file.clone(),
            top_k,
            metric: self.metric,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split a document into passages and print them
    Chunk(ChunkArgs),
    /// Index a document and save the index snapshot
    Index(IndexArgs),
    /// Ask a single question
    Ask(AskArgs),
    /// Start an interactive chat
    Chat(ChatArgs),
    /// Show configuration and snapshot status
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Chunk --

#[derive(Debug, Parser)]
pub struct ChunkArgs {
    /// Document to split (PDF, DOCX or plain text)
    pub file: PathBuf,

    /// Output passages as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Document to index (PDF, DOCX or plain text)
    pub file: PathBuf,
}

// -- Document selection shared by ask and chat --

#[derive(Debug, Clone, Args)]
pub struct DocumentArgs {
    /// Index this document before answering
    #[arg(short, long, conflicts_with = "snapshot")]
    pub file: Option<PathBuf>,

    /// Answer from the saved index snapshot
    #[arg(long)]
    pub snapshot: bool,

    /// Number of passages to retrieve per question
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Print the passages each answer was based on
    #[arg(long)]
    pub show_context: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub question: String,

    #[command(flatten)]
    pub document: DocumentArgs,

    /// Output the answer as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Chat --

#[derive(Debug, Parser)]
pub struct ChatArgs {
    #[command(flatten)]
    pub document: DocumentArgs,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docchat",
            &mut std::io::stdout(),
        );
    }
}
