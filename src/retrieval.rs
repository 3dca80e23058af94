//! Passage retrieval over a vector index.

use std::{
    path::Path,
    sync::{Arc, PoisonError, RwLock},
};

use serde::Serialize;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    vector_index::{Metric, VectorIndex},
};

/// Number of passages sent to the embedder per call while indexing.
pub const EMBED_BATCH_SIZE: usize = 32;

/// A passage returned by [`RetrievalService::retrieve_scored`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    /// Position of the passage in the indexed document.
    pub ordinal: usize,
    pub text: String,
    pub distance: f32,
}

/// Passage texts together with the index built from them. Position `i` in
/// the index is the embedding of `passages[i]`.
#[derive(Debug)]
pub struct IndexedPassages {
    passages: Vec<String>,
    index: VectorIndex,
}

impl IndexedPassages {
    pub fn passages(&self) -> &[String] {
        &self.passages
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

#[derive(Debug, Default)]
enum IndexState {
    #[default]
    NotReady,
    Ready(Arc<IndexedPassages>),
}

/// Owns the current index and answers nearest-passage queries.
///
/// The index is replaced wholesale: a new one is built off to the side and
/// swapped in only once it is complete, so readers never observe a partial
/// index and a failed rebuild leaves the previous one in place.
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    metric: Metric,
    state: RwLock<IndexState>,
}

impl RetrievalService {
    pub fn new(embedder: Arc<dyn Embedder>, metric: Metric) -> Self {
        Self {
            embedder,
            metric,
            state: RwLock::new(IndexState::NotReady),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `passages` and make them the searchable set.
    pub fn create_index(&self, passages: Vec<String>) -> Result<()> {
        self.create_index_with_progress(passages, |_| {})
    }

    /// Like [`create_index`](Self::create_index), calling `progress` with
    /// the number of passages embedded after each batch.
    pub fn create_index_with_progress(
        &self,
        passages: Vec<String>,
        mut progress: impl FnMut(usize),
    ) -> Result<()> {
        let started = std::time::Instant::now();
        let mut index =
            VectorIndex::new(self.embedder.dimension()?, self.metric);

        for batch in passages.chunks(EMBED_BATCH_SIZE) {
            let vectors = self.embedder.embed(batch)?;
            if vectors.len() != batch.len() {
                return Err(Error::Model(format!(
                    "embedder returned {} vectors for {} passages",
                    vectors.len(),
                    batch.len()
                )));
            }
            for vector in &vectors {
                index.add(vector)?;
            }
            progress(batch.len());
        }

        tracing::info!(
            passages = passages.len(),
            dimension = index.dimension(),
            metric = %self.metric,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built vector index"
        );

        self.install(IndexedPassages { passages, index });
        Ok(())
    }

    /// Texts of the passages closest to `query`, most relevant first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        Ok(self
            .retrieve_scored(query, top_k)?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }

    /// Closest passages to `query` with their ordinals and distances.
    ///
    /// At most `min(top_k, passage_count)` results, ordered by ascending
    /// distance and then by ordinal. An empty index yields no results
    /// without embedding the query.
    pub fn retrieve_scored(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        let current = self.current()?;
        if current.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query)?;
        let hits = current.index.search(&query_vector, top_k)?;

        let results: Vec<RetrievedPassage> = hits
            .into_iter()
            .filter_map(|hit| {
                let text = current.passages.get(hit.position)?;
                Some(RetrievedPassage {
                    ordinal: hit.position,
                    text: text.clone(),
                    distance: hit.distance,
                })
            })
            .collect();

        tracing::debug!(top_k, hits = results.len(), "retrieved passages");
        Ok(results)
    }

    /// The current passages and index, or `IndexNotReady`.
    pub fn current(&self) -> Result<Arc<IndexedPassages>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            IndexState::Ready(current) => Ok(Arc::clone(current)),
            IndexState::NotReady => Err(Error::IndexNotReady),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ok()
    }

    /// Number of indexed passages, or `None` before any index exists.
    pub fn passage_count(&self) -> Option<usize> {
        self.current().ok().map(|c| c.passages.len())
    }

    /// Write the current index to `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let current = self.current()?;
        current.index.save(path)?;
        tracing::info!(
            path = %path.display(),
            vectors = current.index.len(),
            "saved index snapshot"
        );
        Ok(())
    }

    /// Install an index snapshot from `path` with its passage texts.
    ///
    /// The snapshot holds vectors only, so `passages` must be the texts it
    /// was built from, in order.
    pub fn load_snapshot(
        &self,
        path: &Path,
        passages: Vec<String>,
    ) -> Result<()> {
        self.load_snapshot_checked(path, passages, None)
    }

    /// Like [`load_snapshot`](Self::load_snapshot), also requiring the
    /// index fingerprint to equal `fingerprint` when given.
    pub fn load_snapshot_checked(
        &self,
        path: &Path,
        passages: Vec<String>,
        fingerprint: Option<&str>,
    ) -> Result<()> {
        let index = VectorIndex::load(path)?;

        if index.len() != passages.len() {
            return Err(Error::Snapshot(format!(
                "{} holds {} vectors but {} passages were supplied",
                path.display(),
                index.len(),
                passages.len()
            )));
        }
        if index.metric() != self.metric {
            return Err(Error::Snapshot(format!(
                "{} was built with the {} metric, expected {}",
                path.display(),
                index.metric(),
                self.metric
            )));
        }
        let dimension = self.embedder.dimension()?;
        if index.dimension() != dimension {
            return Err(Error::Snapshot(format!(
                "{} holds {}-dimensional vectors but {} produces {}",
                path.display(),
                index.dimension(),
                self.embedder.model_id(),
                dimension
            )));
        }
        if let Some(expected) = fingerprint
            && index.fingerprint() != expected
        {
            return Err(Error::Snapshot(format!(
                "{} does not match the saved passages",
                path.display()
            )));
        }

        tracing::info!(
            path = %path.display(),
            vectors = index.len(),
            "loaded index snapshot"
        );
        self.install(IndexedPassages { passages, index });
        Ok(())
    }

    fn install(&self, indexed: IndexedPassages) {
        let mut state =
            self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = IndexState::Ready(Arc::new(indexed));
    }
}
