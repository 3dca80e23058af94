use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const CACHE_DIR_ENV: &str = "DOCCHAT_CACHE_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the cache directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCCHAT_CACHE_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docchat/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_with(explicit, std::env::var_os(CACHE_DIR_ENV))
    }

    fn resolve_with(
        explicit: Option<&Path>,
        from_env: Option<std::ffi::OsString>,
    ) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Some(val) = from_env
            && !val.is_empty()
        {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docchat")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default location of the vector index snapshot.
    pub fn index_file(&self) -> PathBuf {
        self.root.join("index.bin")
    }

    /// Download cache for embedding and generation models.
    pub fn models_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("models");
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
