//! Deterministic stand-ins for the model-backed providers.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    generation::Generator,
};

/// Bag-of-words embedder over a fixed vocabulary: component `i` counts the
/// occurrences of `vocab[i]` (case-insensitive, punctuation stripped).
pub struct VocabEmbedder {
    vocab: Vec<String>,
    embed_calls: AtomicUsize,
    fail: AtomicBool,
}

impl VocabEmbedder {
    pub fn new(vocab: &[&str]) -> Self {
        Self {
            vocab: vocab.iter().map(|w| w.to_lowercase()).collect(),
            embed_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.vocab.len()];
        for word in text.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if let Some(i) = self.vocab.iter().position(|w| *w == word) {
                v[i] += 1.0;
            }
        }
        v
    }
}

impl Embedder for VocabEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Model("embedder unavailable".into()));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.vocab.len())
    }

    fn model_id(&self) -> &str {
        "test/vocab"
    }
}

/// Generator that records its inputs and answers with a fixed reply.
pub struct RecordingGenerator {
    reply: String,
    calls: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(context, query)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Generator for RecordingGenerator {
    fn generate(&self, context: &str, query: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((context.to_string(), query.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Generation("model crashed".into()));
        }
        Ok(self.reply.clone())
    }
}
