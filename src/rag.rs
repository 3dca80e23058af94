use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::{Error, Result},
    generation::Generator,
    retrieval::RetrievalService,
};

/// Answer given when retrieval finds nothing to ground a response in.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";

pub const DEFAULT_TOP_K: usize = 3;

/// An answer and the passages it was generated from, in ranked order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub passages: Vec<String>,
}

/// Retrieve-then-generate question answering.
#[derive(Clone)]
pub struct RagService {
    retrieval: Arc<RetrievalService>,
    generator: Arc<dyn Generator>,
}

impl RagService {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            retrieval,
            generator,
        }
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }

    /// Answer `query` from the `top_k` passages most relevant to it.
    ///
    /// `passages` is the loaded document; an empty slice means no document
    /// and fails with `NoDocumentLoaded`. If retrieval returns nothing the
    /// generator is skipped and [`NO_RELEVANT_INFORMATION`] is returned.
    pub fn process_query(
        &self,
        query: &str,
        passages: &[String],
        top_k: usize,
    ) -> Result<RagAnswer> {
        if passages.is_empty() {
            return Err(Error::NoDocumentLoaded);
        }

        let relevant = self.retrieval.retrieve(query, top_k)?;
        if relevant.is_empty() {
            tracing::debug!("no passages retrieved, skipping generation");
            return Ok(RagAnswer {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                passages: Vec::new(),
            });
        }

        let context = relevant.join("\n");
        let answer = self.generator.generate(&context, query)?;

        Ok(RagAnswer {
            answer,
            passages: relevant,
        })
    }
}
