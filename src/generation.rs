//! Answer generation.
//!
//! [`Generator`] is what the rest of the crate talks to: it takes a context
//! block and a query and returns answer text. [`PromptGenerator`] builds the
//! prompt and post-processes the output of any [`LanguageModel`], and
//! [`CausalLm`] is the local candle-backed model used in production.

use std::{
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    generation::LogitsProcessor,
    models::qwen2::{self, ModelForCausalLM},
};
use tokenizers::Tokenizer;

use crate::{
    error::{Error, Result},
    model_manager::{self, ModelFiles, default_device, default_dtype},
};

/// Returned in place of an empty model output.
pub const APOLOGY: &str = "I'm sorry, I couldn't generate a response.";

pub const DEFAULT_MAX_NEW_TOKENS: usize = 200;

const RESPONSE_MARKER: &str = "Response:";

/// Token strings that end generation for Qwen2-family tokenizers.
const EOS_TOKENS: &[&str] = &["<|endoftext|>", "<|im_end|>", "</s>"];

/// Produces an answer for a query, optionally grounded in a context block.
pub trait Generator: Send + Sync {
    fn generate(&self, context: &str, query: &str) -> Result<String>;
}

/// Raw text completion.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// The prompt sent to the language model.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!("Context:\n{context}\n\nQuery:\n{query}\n\n{RESPONSE_MARKER}")
}

/// Pull the answer out of a completion.
///
/// If the model echoed the prompt, the answer is whatever follows the first
/// `Response:` marker, up to a second one if the model kept going.
pub fn extract_answer(output: &str) -> &str {
    let answer = match output.split_once(RESPONSE_MARKER) {
        Some((_, rest)) => rest
            .split_once(RESPONSE_MARKER)
            .map_or(rest, |(first, _)| first),
        None => output,
    };
    answer.trim()
}

/// [`Generator`] over any [`LanguageModel`].
pub struct PromptGenerator<M> {
    model: M,
}

impl<M: LanguageModel> PromptGenerator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: LanguageModel> Generator for PromptGenerator<M> {
    fn generate(&self, context: &str, query: &str) -> Result<String> {
        if context.trim().is_empty() && query.trim().is_empty() {
            return Err(Error::InvalidInput(
                "context and query are both empty".into(),
            ));
        }

        let prompt = build_prompt(context, query);
        let output = self.model.complete(&prompt).map_err(|e| match e {
            Error::Generation(_) => e,
            other => Error::Generation(other.to_string()),
        })?;

        let answer = extract_answer(&output);
        if answer.is_empty() {
            tracing::warn!("model produced an empty answer");
            return Ok(APOLOGY.to_string());
        }
        Ok(answer.to_string())
    }
}

/// Sampling settings for [`CausalLm`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    /// `None` selects greedy decoding.
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: None,
            top_p: None,
            seed: 42,
        }
    }
}

struct LoadedLm {
    model: ModelForCausalLM,
    tokenizer: Tokenizer,
    device: Device,
    eos: Vec<u32>,
}

/// Local Qwen2-family causal language model.
///
/// Weights are loaded on the first completion. Completions return only the
/// newly generated text, not the prompt.
pub struct CausalLm {
    model_id: String,
    cache_dir: PathBuf,
    params: GenerationParams,
    loaded: Mutex<Option<LoadedLm>>,
}

impl CausalLm {
    pub fn new(
        model_id: impl Into<String>,
        cache_dir: PathBuf,
        params: GenerationParams,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            cache_dir,
            params,
            loaded: Mutex::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn load(&self) -> Result<LoadedLm> {
        let started = std::time::Instant::now();
        let files = ModelFiles::resolve(&self.model_id, &self.cache_dir)?;
        let config: qwen2::Config = model_manager::read_json(&files.config)?;
        let tokenizer = model_manager::load_tokenizer(&files.tokenizer)?;

        let eos: Vec<u32> = EOS_TOKENS
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();
        if eos.is_empty() {
            tracing::warn!(
                model = %self.model_id,
                "tokenizer has no end-of-sequence token, generation stops at \
                 the token limit"
            );
        }

        let device = default_device();
        let dtype = default_dtype(&device);
        // SAFETY: the weight files are not modified while they are mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)?
        };
        let model = ModelForCausalLM::new(&config, vb)?;

        tracing::info!(
            model = %self.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded generation model"
        );

        Ok(LoadedLm {
            model,
            tokenizer,
            device,
            eos,
        })
    }

    fn run(&self, lm: &mut LoadedLm, prompt: &str) -> Result<String> {
        let encoding = lm
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| Error::Generation(format!("tokenization: {e}")))?;
        let mut tokens = encoding.get_ids().to_vec();
        if tokens.is_empty() {
            return Ok(String::new());
        }

        lm.model.clear_kv_cache();
        let mut sampler = LogitsProcessor::new(
            self.params.seed,
            self.params.temperature,
            self.params.top_p,
        );

        let prompt_len = tokens.len();
        let mut offset = 0;
        for _ in 0..self.params.max_new_tokens {
            let input = Tensor::new(&tokens[offset..], &lm.device)?
                .unsqueeze(0)?;
            let logits = lm
                .model
                .forward(&input, offset)?
                .squeeze(0)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;
            offset = tokens.len();

            let next = sampler.sample(&logits)?;
            if lm.eos.contains(&next) {
                break;
            }
            tokens.push(next);
        }

        let generated = &tokens[prompt_len..];
        tracing::debug!(
            prompt_tokens = prompt_len,
            new_tokens = generated.len(),
            "generation finished"
        );

        lm.tokenizer
            .decode(generated, true)
            .map_err(|e| Error::Generation(format!("decoding: {e}")))
    }
}

impl LanguageModel for CausalLm {
    fn complete(&self, prompt: &str) -> Result<String> {
        let mut guard =
            self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let Some(lm) = guard.as_mut() else {
            return Err(Error::Model("generation model not loaded".into()));
        };
        self.run(lm, prompt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Canned {
        reply: std::result::Result<String, String>,
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                ..Self::ok("")
            }
        }
    }

    impl LanguageModel for Canned {
        fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            self.reply.clone().map_err(Error::Model)
        }
    }

    #[test]
    fn prompt_shape() {
        assert_eq!(
            build_prompt("ctx line", "what?"),
            "Context:\nctx line\n\nQuery:\nwhat?\n\nResponse:"
        );
    }

    #[test]
    fn answer_follows_response_marker() {
        assert_eq!(extract_answer("plain answer  "), "plain answer");
        assert_eq!(
            extract_answer("Context:\nx\n\nQuery:\ny\n\nResponse: The answer."),
            "The answer."
        );
        assert_eq!(
            extract_answer("Response: first Response: second"),
            "first"
        );
    }

    #[test]
    fn generates_from_model_output() {
        let generator = PromptGenerator::new(Canned::ok(" Paris. "));
        let answer = generator.generate("France's capital is Paris.", "Capital?");

        assert_eq!(answer.unwrap(), "Paris.");
        let prompt = generator.model().last_prompt.lock().unwrap().clone();
        assert_eq!(
            prompt.as_deref(),
            Some(
                "Context:\nFrance's capital is Paris.\n\nQuery:\nCapital?\n\n\
                 Response:"
            )
        );
    }

    #[test]
    fn empty_context_is_allowed() {
        let generator = PromptGenerator::new(Canned::ok("Hello!"));
        assert_eq!(generator.generate("", "Hi").unwrap(), "Hello!");
    }

    #[test]
    fn empty_inputs_are_rejected_without_calling_model() {
        let generator = PromptGenerator::new(Canned::ok("unused"));
        let err = generator.generate("  ", "\n").unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(generator.model().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_output_becomes_apology() {
        let generator = PromptGenerator::new(Canned::ok("Response:   \n"));
        assert_eq!(generator.generate("ctx", "q").unwrap(), APOLOGY);
    }

    #[test]
    fn model_errors_become_generation_failures() {
        let generator = PromptGenerator::new(Canned::failing("out of memory"));
        let err = generator.generate("ctx", "q").unwrap_err();

        assert!(
            matches!(&err, Error::Generation(msg) if msg.contains("out of memory"))
        );
    }

    #[test]
    fn causal_lm_is_lazy() {
        let lm = CausalLm::new(
            "/nonexistent/model",
            PathBuf::from("/tmp"),
            GenerationParams::default(),
        );
        assert!(!lm.is_loaded());
        assert_eq!(lm.model_id(), "/nonexistent/model");
        assert_eq!(lm.params().max_new_tokens, 200);
        assert_eq!(lm.params().temperature, None);
    }
}
