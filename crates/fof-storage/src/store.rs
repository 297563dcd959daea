//! Record-store capability with upsert-by-name primitives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use fof_core::{Opportunity, StoredOpportunity};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored opportunity with id {0}")]
    NotFound(Uuid),
    #[error("an opportunity named {0:?} already exists")]
    DuplicateName(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable keyed store. `name` is the identity; ids and timestamps are the
/// store's own business.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredOpportunity>, StoreError>;
    async fn insert(&self, record: &Opportunity) -> Result<Uuid, StoreError>;
    async fn update(&self, id: Uuid, record: &Opportunity) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<StoredOpportunity>, StoreError>;
}

fn insert_into(
    rows: &mut Vec<StoredOpportunity>,
    record: &Opportunity,
) -> Result<Uuid, StoreError> {
    if rows.iter().any(|row| row.record.name == record.name) {
        return Err(StoreError::DuplicateName(record.name.clone()));
    }
    let now = Utc::now();
    let id = Uuid::new_v4();
    rows.push(StoredOpportunity {
        id,
        created_at: now,
        updated_at: now,
        record: record.clone(),
    });
    Ok(id)
}

fn update_in(
    rows: &mut [StoredOpportunity],
    id: Uuid,
    record: &Opportunity,
) -> Result<(), StoreError> {
    if rows
        .iter()
        .any(|row| row.id != id && row.record.name == record.name)
    {
        return Err(StoreError::DuplicateName(record.name.clone()));
    }
    let row = rows
        .iter_mut()
        .find(|row| row.id == id)
        .ok_or(StoreError::NotFound(id))?;
    row.record = record.clone();
    row.updated_at = Utc::now();
    Ok(())
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredOpportunity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredOpportunity>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|row| row.record.name == name)
            .cloned())
    }

    async fn insert(&self, record: &Opportunity) -> Result<Uuid, StoreError> {
        insert_into(&mut *self.rows.write().await, record)
    }

    async fn update(&self, id: Uuid, record: &Opportunity) -> Result<(), StoreError> {
        update_in(&mut self.rows.write().await, id, record)
    }

    async fn list(&self) -> Result<Vec<StoredOpportunity>, StoreError> {
        Ok(self.rows.read().await.clone())
    }
}

/// Whole collection in one JSON file, rewritten atomically (temp file + rename)
/// on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    rows: Mutex<Option<Vec<StoredOpportunity>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<Vec<StoredOpportunity>, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn persist(&self, rows: &[StoredOpportunity]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(rows)?;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Run `op` against the loaded rows and persist only if it succeeded.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Vec<StoredOpportunity>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.rows.lock().await;
        let mut rows = match guard.take() {
            Some(rows) => rows,
            None => self.load().await?,
        };
        let outcome = op(&mut rows);
        if outcome.is_ok() {
            // On failure the cache stays empty and the next call re-reads the file.
            self.persist(&rows).await?;
        }
        *guard = Some(rows);
        outcome
    }

    async fn snapshot(&self) -> Result<Vec<StoredOpportunity>, StoreError> {
        let mut guard = self.rows.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.clone().unwrap_or_default())
    }
}

#[async_trait]
impl OpportunityStore for JsonFileStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredOpportunity>, StoreError> {
        Ok(self
            .snapshot()
            .await?
            .into_iter()
            .find(|row| row.record.name == name))
    }

    async fn insert(&self, record: &Opportunity) -> Result<Uuid, StoreError> {
        self.mutate(|rows| insert_into(rows, record)).await
    }

    async fn update(&self, id: Uuid, record: &Opportunity) -> Result<(), StoreError> {
        self.mutate(|rows| update_in(rows, id, record)).await
    }

    async fn list(&self) -> Result<Vec<StoredOpportunity>, StoreError> {
        self.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fof_core::{Eligibility, OpportunityType, Status};
    use tempfile::tempdir;

    fn opportunity(name: &str) -> Opportunity {
        Opportunity {
            name: name.to_string(),
            provider: "Ministry of Education".to_string(),
            kind: OpportunityType::Scholarship,
            description: "Support for secondary school students".to_string(),
            amount: Some("KES 20,000".to_string()),
            application_deadline: None,
            application_link: None,
            eligibility: Eligibility::default(),
            contact_info: Default::default(),
            status: Status::Active,
            verified: false,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn memory_store_finds_by_exact_name() {
        let store = MemoryStore::new();
        let id = store.insert(&opportunity("Elimu Scholarship")).await.unwrap();

        let found = store.find_by_name("Elimu Scholarship").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.find_by_name("elimu scholarship").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_names() {
        let store = MemoryStore::new();
        store.insert(&opportunity("Elimu Scholarship")).await.unwrap();
        let err = store.insert(&opportunity("Elimu Scholarship")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(Uuid::new_v4(), &opportunity("Ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn json_file_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("data").join("opportunities.json");

        let store = JsonFileStore::new(&path);
        let id = store.insert(&opportunity("Equity Wings to Fly")).await.unwrap();
        let mut changed = opportunity("Equity Wings to Fly");
        changed.priority = 10;
        store.update(id, &changed).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        let rows = reopened.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].record.priority, 10);
    }

    #[tokio::test]
    async fn json_file_store_starts_empty_without_file() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("missing.json"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.find_by_name("anything").await.unwrap().is_none());
    }
}
