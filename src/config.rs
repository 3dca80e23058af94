//! Runtime configuration.
//!
//! Every setting has a built-in default that can be overridden by a
//! `DOCCHAT_*` environment variable, which in turn can be overridden by a
//! command-line flag ([`Overrides`]).

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Serialize;

use crate::{
    chunking::DEFAULT_CHUNK_SIZE,
    data_dir::{CACHE_DIR_ENV, DataDir},
    error::{Error, Result},
    generation::DEFAULT_MAX_NEW_TOKENS,
    rag::DEFAULT_TOP_K,
    vector_index::Metric,
};

pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_GENERATION_MODEL: &str = "Qwen/Qwen2.5-0.5B-Instruct";

pub const CHUNK_SIZE_ENV: &str = "DOCCHAT_CHUNK_SIZE";
pub const EMBEDDING_MODEL_ENV: &str = "DOCCHAT_EMBEDDING_MODEL";
pub const GENERATION_MODEL_ENV: &str = "DOCCHAT_GENERATION_MODEL";
pub const INDEX_FILE_ENV: &str = "DOCCHAT_INDEX_FILE";
pub const TOP_K_ENV: &str = "DOCCHAT_TOP_K";
pub const METRIC_ENV: &str = "DOCCHAT_METRIC";
pub const LOWERCASE_ENV: &str = "DOCCHAT_LOWERCASE";
pub const MAX_NEW_TOKENS_ENV: &str = "DOCCHAT_MAX_NEW_TOKENS";

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub chunk_size: usize,
    pub embedding_model: String,
    pub generation_model: String,
    pub index_file: PathBuf,
    pub cache_dir: PathBuf,
    pub top_k: usize,
    pub metric: Metric,
    pub lowercase: bool,
    pub max_new_tokens: usize,
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub embedding_model: Option<String>,
    pub generation_model: Option<String>,
    pub index_file: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub metric: Option<Metric>,
}

impl Config {
    /// Resolve the configuration from the process environment.
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        Self::from_lookup(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve the configuration using `lookup` in place of the process
    /// environment.
    pub fn from_lookup(
        overrides: Overrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_dir = match overrides.cache_dir {
            Some(dir) => dir,
            None => match lookup(CACHE_DIR_ENV) {
                Some(dir) => PathBuf::from(dir),
                None => default_cache_dir()?,
            },
        };
        let data_dir = DataDir::resolve(Some(&cache_dir))?;

        let index_file = overrides
            .index_file
            .or_else(|| lookup(INDEX_FILE_ENV).map(PathBuf::from))
            .unwrap_or_else(|| data_dir.index_file());

        let chunk_size = match overrides.chunk_size {
            Some(n) => n,
            None => parse_or(&lookup, CHUNK_SIZE_ENV, DEFAULT_CHUNK_SIZE)?,
        };
        let top_k = match overrides.top_k {
            Some(n) => n,
            None => parse_or(&lookup, TOP_K_ENV, DEFAULT_TOP_K)?,
        };
        let metric = match overrides.metric {
            Some(m) => m,
            None => parse_or(&lookup, METRIC_ENV, Metric::default())?,
        };
        let max_new_tokens =
            parse_or(&lookup, MAX_NEW_TOKENS_ENV, DEFAULT_MAX_NEW_TOKENS)?;
        let lowercase = match lookup(LOWERCASE_ENV) {
            Some(v) => parse_bool(LOWERCASE_ENV, &v)?,
            None => false,
        };

        let config = Self {
            chunk_size,
            embedding_model: overrides
                .embedding_model
                .or_else(|| lookup(EMBEDDING_MODEL_ENV))
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            generation_model: overrides
                .generation_model
                .or_else(|| lookup(GENERATION_MODEL_ENV))
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            index_file,
            cache_dir: data_dir.root().to_path_buf(),
            top_k,
            metric,
            lowercase,
            max_new_tokens,
        };

        tracing::debug!(?config, "resolved configuration");
        Ok(config)
    }

    pub fn data_dir(&self) -> Result<DataDir> {
        DataDir::resolve(Some(&self.cache_dir))
    }

    /// Passage store location, next to the index snapshot.
    pub fn passage_store_file(&self) -> PathBuf {
        passage_store_path(&self.index_file)
    }
}

/// The passage store that belongs to a given snapshot file. Always a
/// different file from `index_file`, whatever its extension.
pub fn passage_store_path(index_file: &Path) -> PathBuf {
    index_file.with_extension("passages.redb")
}

fn default_cache_dir() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("docchat")
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}

fn parse_or<T>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            Error::Config(format!("invalid value {raw:?} for {key}: {e}"))
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "invalid value {raw:?} for {key}: expected a boolean"
        ))),
    }
}
