//! Conversation state and per-turn routing between plain generation and
//! retrieval-augmented answers.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{error::Result, generation::Generator, rag::RagService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Unix time in milliseconds.
    pub created_at: u64,
    /// Passages the answer was generated from. Only set on RAG answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
    pub requires_rag: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: now_millis(),
            contexts: None,
            requires_rag: false,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        contexts: Option<Vec<String>>,
    ) -> Self {
        let requires_rag = contexts.is_some();
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: now_millis(),
            contexts,
            requires_rag,
        }
    }
}

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Ordered conversation history plus the services that answer turns.
///
/// A turn goes through RAG when the caller supplies a non-empty passage
/// list, and straight to the generator otherwise. Only successful turns
/// are recorded.
pub struct ChatSession {
    rag: RagService,
    generator: Arc<dyn Generator>,
    top_k: usize,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(
        rag: RagService,
        generator: Arc<dyn Generator>,
        top_k: usize,
    ) -> Self {
        Self {
            rag,
            generator,
            top_k,
            history: Vec::new(),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn set_top_k(&mut self, top_k: usize) {
        self.top_k = top_k;
    }

    pub fn rag(&self) -> &RagService {
        &self.rag
    }

    /// Record the user's side of a turn.
    pub fn push_user(&mut self, text: &str) -> &ChatMessage {
        self.history.push(ChatMessage::user(text));
        &self.history[self.history.len() - 1]
    }

    /// Answer `text` and append the assistant message to the history.
    ///
    /// On error nothing is appended.
    pub fn process_message(
        &mut self,
        text: &str,
        passages: Option<&[String]>,
    ) -> Result<ChatMessage> {
        let message = match passages {
            Some(passages) if !passages.is_empty() => {
                let answer =
                    self.rag.process_query(text, passages, self.top_k)?;
                ChatMessage::assistant(answer.answer, Some(answer.passages))
            }
            _ => {
                let answer = self.generator.generate("", text)?;
                ChatMessage::assistant(answer, None)
            }
        };

        tracing::debug!(
            requires_rag = message.requires_rag,
            history = self.history.len() + 1,
            "answered message"
        );
        self.history.push(message.clone());
        Ok(message)
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Passages behind the most recent RAG answer.
    pub fn last_contexts(&self) -> Option<&[String]> {
        self.history
            .iter()
            .rev()
            .find_map(|m| m.contexts.as_deref())
    }
}
