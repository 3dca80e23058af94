use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use docchat::{
    App,
    ChatSession,
    Config,
    Embedder,
    Error,
    Generator,
    Metric,
    RagService,
    Result,
    RetrievalService,
    Role,
    config::Overrides,
    rag::NO_RELEVANT_INFORMATION,
};

/// Bag-of-words embedder over a fixed vocabulary.
struct WordCounts {
    vocab: Vec<&'static str>,
    calls: AtomicUsize,
}

impl WordCounts {
    fn new(vocab: &[&'static str]) -> Self {
        Self {
            vocab: vocab.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for WordCounts {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let words: Vec<String> = text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(str::to_lowercase)
                    .collect();
                self.vocab
                    .iter()
                    .map(|v| words.iter().filter(|w| w == v).count() as f32)
                    .collect()
            })
            .collect())
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.vocab.len())
    }

    fn model_id(&self) -> &str {
        "test/word-counts"
    }
}

/// Generator that echoes its inputs and remembers every call.
#[derive(Default)]
struct Echo {
    calls: Mutex<Vec<(String, String)>>,
}

impl Echo {
    fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Generator for Echo {
    fn generate(&self, context: &str, query: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((context.to_string(), query.to_string()));
        Ok(format!("answer to {query}"))
    }
}

const VOCAB: &[&str] = &["test", "chunk", "another", "yet", "testing"];

fn sample() -> Vec<String> {
    [
        "This is a test chunk.",
        "Another test chunk.",
        "Yet another chunk for testing.",
    ]
    .map(String::from)
    .to_vec()
}

#[test]
fn retrieves_literal_overlap_first() -> Result<()> {
    let embedder = Arc::new(WordCounts::new(VOCAB));
    let retrieval = RetrievalService::new(embedder, Metric::Cosine);
    retrieval.create_index(sample())?;

    let top = retrieval.retrieve("test chunk", 2)?;
    assert_eq!(top, ["This is a test chunk.", "Another test chunk."]);
    Ok(())
}

#[test]
fn rag_turn_passes_ranked_context_to_generator() -> Result<()> {
    let embedder = Arc::new(WordCounts::new(VOCAB));
    let generator = Arc::new(Echo::default());
    let retrieval =
        Arc::new(RetrievalService::new(embedder, Metric::Cosine));
    retrieval.create_index(sample())?;

    let rag = RagService::new(Arc::clone(&retrieval), generator.clone());
    let mut session = ChatSession::new(rag, generator.clone(), 2);

    session.push_user("test chunk");
    let passages = sample();
    let reply =
        session.process_message("test chunk", Some(passages.as_slice()))?;

    assert_eq!(reply.role, Role::Assistant);
    assert!(reply.requires_rag);
    assert_eq!(reply.content, "answer to test chunk");
    assert_eq!(
        generator.calls(),
        [(
            "This is a test chunk.\nAnother test chunk.".to_string(),
            "test chunk".to_string()
        )]
    );
    assert_eq!(session.history().len(), 2);
    Ok(())
}

#[test]
fn empty_index_short_circuits_generation() -> Result<()> {
    let generator = Arc::new(Echo::default());
    let retrieval = Arc::new(RetrievalService::new(
        Arc::new(WordCounts::new(VOCAB)),
        Metric::Cosine,
    ));
    retrieval.create_index(Vec::new())?;

    let rag = RagService::new(retrieval, generator.clone());
    let answer = rag.process_query("test", &sample(), 3)?;

    assert_eq!(answer.answer, NO_RELEVANT_INFORMATION);
    assert!(answer.passages.is_empty());
    assert!(generator.calls().is_empty());
    Ok(())
}

fn app(
    tmp: &tempfile::TempDir,
) -> Result<(App, Arc<WordCounts>, Arc<Echo>)> {
    let config = Config::from_lookup(
        Overrides {
            cache_dir: Some(tmp.path().to_path_buf()),
            chunk_size: Some(21),
            top_k: Some(1),
            ..Overrides::default()
        },
        |_| None,
    )?;
    let embedder = Arc::new(WordCounts::new(VOCAB));
    let generator = Arc::new(Echo::default());
    let app = App::new(config, embedder.clone(), generator.clone());
    Ok((app, embedder, generator))
}

#[test]
fn plain_chat_never_embeds() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (mut app, embedder, generator) = app(&tmp)?;

    let reply = app.ask("hello there")?;

    assert!(!reply.requires_rag);
    assert!(reply.contexts.is_none());
    assert_eq!(embedder.calls(), 0);
    assert_eq!(
        generator.calls(),
        [(String::new(), "hello there".to_string())]
    );
    Ok(())
}

#[test]
fn document_from_disk_answers_and_persists() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("notes.txt");
    std::fs::write(&file, sample().join(" "))?;

    let (mut app, _, _) = app(&tmp)?;
    let doc = app.load_file(&file)?;
    assert_eq!(
        doc.passages,
        [
            "This is a test chunk.",
            "Another test chunk.",
            "Yet another chunk for",
            "testing.",
        ]
    );

    let reply = app.ask("yet testing")?;
    assert!(reply.requires_rag);
    assert_eq!(
        reply.contexts.as_deref(),
        Some(&["testing.".to_string()][..])
    );
    app.save_snapshot()?;

    let generator = Arc::new(Echo::default());
    let mut restarted = App::new(
        app.config().clone(),
        Arc::new(WordCounts::new(VOCAB)),
        generator.clone(),
    );
    restarted.restore_snapshot()?;
    restarted.ask("another test chunk")?;
    assert_eq!(generator.calls()[0].0, "Another test chunk.");
    Ok(())
}

#[test]
fn errors_leave_history_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _, _) = app(&tmp).unwrap();
    let mut session = ChatSession::new(
        app.session().rag().clone(),
        Arc::new(Echo::default()),
        2,
    );

    let err = session
        .process_message("anything", Some(sample().as_slice()))
        .unwrap_err();

    assert!(matches!(err, Error::IndexNotReady));
    assert!(session.history().is_empty());
}
