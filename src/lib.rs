//! docchat - ask questions about a document, answered by local models.
//!
//! A document is split into passages, each passage is embedded with a
//! sentence-transformers model, and questions are answered by retrieving the
//! closest passages and handing them to a small causal language model as
//! context. Without a document, questions go straight to the language model.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use docchat::{App, Config, config::Overrides};
//!
//! let config = Config::resolve(Overrides::default()).unwrap();
//! let mut app = App::from_config(config).unwrap();
//!
//! app.load_file(Path::new("report.pdf")).unwrap();
//! let reply = app.ask("What were the main findings?").unwrap();
//!
//! println!("{}", reply.content);
//! for passage in reply.contexts.unwrap_or_default() {
//!     println!("  - {passage}");
//! }
//! ```

pub mod app;
pub mod chat;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod generation;
pub mod model_manager;
pub mod passage_store;
pub mod rag;
pub mod repl;
pub mod retrieval;
pub mod text_util;
pub mod vector_index;

#[cfg(test)]
mod test_support;

pub use app::{App, LoadedDocument};
pub use chat::{ChatMessage, ChatSession, Role};
pub use config::Config;
pub use data_dir::DataDir;
pub use embedding::{Embedder, SentenceEmbedder};
pub use error::{Error, Result};
pub use generation::{CausalLm, Generator, LanguageModel, PromptGenerator};
pub use passage_store::{PassageStore, SnapshotManifest};
pub use rag::{RagAnswer, RagService};
pub use retrieval::RetrievalService;
pub use vector_index::{Metric, VectorIndex};
