//! Application context: configuration, services and the loaded document.

use std::{path::Path, sync::Arc};

use serde::Serialize;

use crate::{
    chat::{ChatMessage, ChatSession, now_millis},
    chunking::{Passage, chunk_text, preprocess},
    config::Config,
    embedding::{Embedder, SentenceEmbedder},
    error::{Error, Result},
    extraction::extract_file,
    generation::{
        CausalLm,
        GenerationParams,
        Generator,
        PromptGenerator,
    },
    passage_store::{PassageStore, SnapshotManifest},
    rag::RagService,
    retrieval::RetrievalService,
};

/// The document currently available for questions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedDocument {
    /// Where the text came from, for display.
    pub source: String,
    pub passages: Vec<String>,
}

pub struct App {
    config: Config,
    retrieval: Arc<RetrievalService>,
    session: ChatSession,
    document: Option<LoadedDocument>,
}

impl App {
    /// Wire the services together around the given providers.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let retrieval =
            Arc::new(RetrievalService::new(embedder, config.metric));
        let rag =
            RagService::new(Arc::clone(&retrieval), Arc::clone(&generator));
        let session = ChatSession::new(rag, generator, config.top_k);

        Self {
            config,
            retrieval,
            session,
            document: None,
        }
    }

    /// Build an app backed by the local embedding and generation models
    /// named in `config`. Models are loaded on first use.
    pub fn from_config(config: Config) -> Result<Self> {
        let models_dir = config.data_dir()?.models_dir()?;
        let embedder = SentenceEmbedder::new(
            config.embedding_model.clone(),
            models_dir.clone(),
        );
        let lm = CausalLm::new(
            config.generation_model.clone(),
            models_dir,
            GenerationParams {
                max_new_tokens: config.max_new_tokens,
                ..GenerationParams::default()
            },
        );

        Ok(Self::new(
            config,
            Arc::new(embedder),
            Arc::new(PromptGenerator::new(lm)),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ChatSession {
        &mut self.session
    }

    pub fn document(&self) -> Option<&LoadedDocument> {
        self.document.as_ref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        self.session.history()
    }

    /// Extract, chunk and index a file, making it the current document.
    pub fn load_file(&mut self, path: &Path) -> Result<&LoadedDocument> {
        self.load_file_with_progress(path, |_, _| {})
    }

    /// Like [`load_file`](Self::load_file), calling `progress` with the
    /// number of passages embedded so far and the total after each batch.
    pub fn load_file_with_progress(
        &mut self,
        path: &Path,
        progress: impl FnMut(usize, usize),
    ) -> Result<&LoadedDocument> {
        let text = extract_file(path)?;
        self.load_text_with_progress(
            &path.display().to_string(),
            &text,
            progress,
        )
    }

    /// Chunk and index already extracted text.
    pub fn load_text(
        &mut self,
        source: &str,
        text: &str,
    ) -> Result<&LoadedDocument> {
        self.load_text_with_progress(source, text, |_, _| {})
    }

    /// Like [`load_text`](Self::load_text), reporting progress as
    /// [`load_file_with_progress`](Self::load_file_with_progress) does.
    ///
    /// If indexing fails, the previous document and index stay in place.
    pub fn load_text_with_progress(
        &mut self,
        source: &str,
        text: &str,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<&LoadedDocument> {
        let passages: Vec<String> =
            self.chunk(text).into_iter().map(|p| p.text).collect();
        let total = passages.len();
        tracing::info!(
            source,
            passages = total,
            chunk_size = self.config.chunk_size,
            "indexing document"
        );

        let mut done = 0;
        self.retrieval
            .create_index_with_progress(passages.clone(), |n| {
                done += n;
                progress(done, total);
            })?;

        Ok(&*self.document.insert(LoadedDocument {
            source: source.to_string(),
            passages,
        }))
    }

    /// Split text into passages using the configured preprocessing and
    /// chunk size.
    pub fn chunk(&self, text: &str) -> Vec<Passage> {
        let text = preprocess(text, self.config.lowercase);
        chunk_text(&text, self.config.chunk_size)
    }

    /// Record `question` and answer it, against the loaded document if
    /// there is one.
    pub fn ask(&mut self, question: &str) -> Result<ChatMessage> {
        self.session.push_user(question);
        let passages = self.document.as_ref().map(|d| d.passages.as_slice());
        self.session.process_message(question, passages)
    }

    /// Persist the current index and passages to the configured snapshot
    /// location.
    pub fn save_snapshot(&self) -> Result<SnapshotManifest> {
        let document =
            self.document.as_ref().ok_or(Error::NoDocumentLoaded)?;
        let current = self.retrieval.current()?;

        self.retrieval.save_snapshot(&self.config.index_file)?;

        let manifest = SnapshotManifest {
            source: document.source.clone(),
            embedding_model: self.retrieval.embedder().model_id().to_string(),
            metric: current.index().metric(),
            dimension: current.index().dimension(),
            passage_count: current.passages().len(),
            chunk_size: self.config.chunk_size,
            fingerprint: current.index().fingerprint(),
            created_at: now_millis(),
        };

        let store = PassageStore::open(&self.config.passage_store_file())?;
        store.replace(&manifest, current.passages())?;

        tracing::info!(
            index = %self.config.index_file.display(),
            passages = manifest.passage_count,
            "saved snapshot"
        );
        Ok(manifest)
    }

    /// Load the saved snapshot and make its document current.
    pub fn restore_snapshot(&mut self) -> Result<&LoadedDocument> {
        let store_path = self.config.passage_store_file();
        if !store_path.exists() || !self.config.index_file.exists() {
            return Err(Error::Snapshot(format!(
                "no snapshot saved at {}",
                self.config.index_file.display()
            )));
        }

        let store = PassageStore::open(&store_path)?;
        let Some((manifest, passages)) = store.load()? else {
            return Err(Error::Snapshot(format!(
                "{} has no saved passages",
                store_path.display()
            )));
        };

        let model = self.retrieval.embedder().model_id();
        if manifest.embedding_model != model {
            return Err(Error::Snapshot(format!(
                "snapshot was built with {}, current embedding model is \
                 {model}",
                manifest.embedding_model
            )));
        }

        self.retrieval.load_snapshot_checked(
            &self.config.index_file,
            passages.clone(),
            Some(&manifest.fingerprint),
        )?;

        Ok(&*self.document.insert(LoadedDocument {
            source: manifest.source,
            passages,
        }))
    }

    /// Manifest of the saved snapshot, if there is one.
    pub fn saved_snapshot(&self) -> Result<Option<SnapshotManifest>> {
        let store_path = self.config.passage_store_file();
        if !store_path.exists() {
            return Ok(None);
        }
        PassageStore::open(&store_path)?.manifest()
    }
}
