use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    vector_index::Metric,
};

const PASSAGES: TableDefinition<u64, &str> = TableDefinition::new("passages");
const MANIFEST: TableDefinition<&str, &str> = TableDefinition::new("manifest");

const MANIFEST_KEY: &str = "manifest";

/// Describes the document and settings an index snapshot was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Display name of the indexed document (usually its path).
    pub source: String,
    pub embedding_model: String,
    pub metric: Metric,
    pub dimension: usize,
    pub passage_count: usize,
    pub chunk_size: usize,
    /// [`VectorIndex::fingerprint`](crate::vector_index::VectorIndex::fingerprint)
    /// of the snapshot saved alongside.
    pub fingerprint: String,
    /// Unix time in milliseconds.
    pub created_at: u64,
}

/// Passage texts for an index snapshot, stored next to it.
///
/// Passages are keyed by their ordinal so they come back in index order.
pub struct PassageStore {
    db: Database,
}

impl PassageStore {
    /// Open or create a passage store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(redb::Error::from)?;

        let txn = db.begin_write()?;
        txn.open_table(PASSAGES)?;
        txn.open_table(MANIFEST)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Replace everything in the store with `passages` and `manifest`, in a
    /// single transaction.
    pub fn replace(
        &self,
        manifest: &SnapshotManifest,
        passages: &[String],
    ) -> Result<()> {
        if manifest.passage_count != passages.len() {
            return Err(Error::Snapshot(format!(
                "manifest lists {} passages but {} were given",
                manifest.passage_count,
                passages.len()
            )));
        }

        let encoded = serde_json::to_string(manifest)?;

        let txn = self.db.begin_write()?;
        txn.delete_table(PASSAGES)?;
        {
            let mut table = txn.open_table(PASSAGES)?;
            for (ordinal, text) in passages.iter().enumerate() {
                table.insert(ordinal as u64, text.as_str())?;
            }
            let mut manifest_table = txn.open_table(MANIFEST)?;
            manifest_table.insert(MANIFEST_KEY, encoded.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// The manifest, if anything has been saved.
    pub fn manifest(&self) -> Result<Option<SnapshotManifest>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MANIFEST)?;
        match table.get(MANIFEST_KEY)? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// The manifest and passages, or `None` when nothing has been saved.
    pub fn load(&self) -> Result<Option<(SnapshotManifest, Vec<String>)>> {
        let Some(manifest) = self.manifest()? else {
            return Ok(None);
        };

        let txn = self.db.begin_read()?;
        let table = txn.open_table(PASSAGES)?;
        let mut passages = Vec::with_capacity(manifest.passage_count);
        for entry in table.iter()? {
            let (_, text) = entry?;
            passages.push(text.value().to_string());
        }

        if passages.len() != manifest.passage_count {
            return Err(Error::Snapshot(format!(
                "passage store holds {} passages, manifest lists {}",
                passages.len(),
                manifest.passage_count
            )));
        }

        Ok(Some((manifest, passages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(count: usize) -> SnapshotManifest {
        SnapshotManifest {
            source: "report.pdf".into(),
            embedding_model: "test/model".into(),
            metric: Metric::Cosine,
            dimension: 4,
            passage_count: count,
            chunk_size: 512,
            fingerprint: "abc123".into(),
            created_at: 1_700_000_000_000,
        }
    }

    fn passages(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("passage number {i}")).collect()
    }

    #[test]
    fn empty_store_has_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PassageStore::open(&tmp.path().join("p.redb")).unwrap();

        assert!(store.manifest().unwrap().is_none());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn replace_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PassageStore::open(&tmp.path().join("p.redb")).unwrap();
        store.replace(&manifest(12), &passages(12)).unwrap();

        let (m, loaded) = store.load().unwrap().unwrap();
        assert_eq!(m, manifest(12));
        // Ordinal keys keep numeric order past 10.
        assert_eq!(loaded, passages(12));
    }

    #[test]
    fn replace_drops_previous_passages() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PassageStore::open(&tmp.path().join("p.redb")).unwrap();
        store.replace(&manifest(5), &passages(5)).unwrap();
        store
            .replace(&manifest(1), &["only".to_string()])
            .unwrap();

        let (m, loaded) = store.load().unwrap().unwrap();
        assert_eq!(m.passage_count, 1);
        assert_eq!(loaded, ["only"]);
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("p.redb");
        {
            let store = PassageStore::open(&path).unwrap();
            store.replace(&manifest(3), &passages(3)).unwrap();
        }

        let store = PassageStore::open(&path).unwrap();
        let (_, loaded) = store.load().unwrap().unwrap();
        assert_eq!(loaded, passages(3));
    }

    #[test]
    fn mismatched_count_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PassageStore::open(&tmp.path().join("p.redb")).unwrap();

        let err = store.replace(&manifest(2), &passages(3)).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
        assert!(store.load().unwrap().is_none());
    }
}
