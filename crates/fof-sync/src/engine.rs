//! Name-keyed upsert of finalized opportunities into a store.

use std::sync::Arc;

use fof_core::{Opportunity, Status};
use fof_storage::{OpportunityStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

fn default_trusted() -> bool {
    true
}

/// Priority class a batch is synced under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub priority: i32,
    /// Trusted tiers mark records verified and active, and may overwrite
    /// anything. Untrusted tiers keep an existing record's status and never
    /// touch a verified record.
    #[serde(default = "default_trusted")]
    pub trusted: bool,
}

impl Tier {
    pub fn new(name: impl Into<String>, priority: i32, trusted: bool) -> Self {
        Self {
            name: name.into(),
            priority,
            trusted,
        }
    }

    pub fn major() -> Self {
        Self::new("major", 10, true)
    }

    pub fn mooc() -> Self {
        Self::new("mooc", 5, true)
    }

    /// Adapter output.
    pub fn scraped() -> Self {
        Self::new("scraped", 1, false)
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "major" => Some(Self::major()),
            "mooc" => Some(Self::mooc()),
            "scraped" => Some(Self::scraped()),
            _ => None,
        }
    }

    fn stamp(&self, mut record: Opportunity, existing: Option<&Opportunity>) -> Opportunity {
        record.priority = self.priority;
        if self.trusted {
            record.verified = true;
            record.status = Status::Active;
        } else if let Some(existing) = existing {
            record.verified = existing.verified;
            record.status = existing.status;
            record.priority = self.priority.max(existing.priority);
        }
        record
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Every record that ended up stored as requested, rewritten or not.
    pub inserted_or_updated_count: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

impl SyncOutcome {
    pub fn merge(&mut self, other: SyncOutcome) {
        self.inserted_or_updated_count += other.inserted_or_updated_count;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.errors.extend(other.errors);
    }
}

/// A batch's outcome plus every record as it now stands in the store.
/// Records whose write failed are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncedBatch {
    pub outcome: SyncOutcome,
    pub stored: Vec<Opportunity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Inserted,
    Updated,
    Unchanged,
}

/// The only writer of the store. Read-then-write per record, no transaction.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn OpportunityStore>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn OpportunityStore>) -> Self {
        Self { store }
    }

    /// Upsert every record under `tier`. A failing record is reported in
    /// `errors` and the batch moves on. Nothing is ever deleted.
    pub async fn sync(&self, records: &[Opportunity], tier: &Tier) -> SyncOutcome {
        self.sync_batch(records, tier).await.outcome
    }

    /// [`SyncEngine::sync`] that also hands back the stamped records.
    pub async fn sync_batch(&self, records: &[Opportunity], tier: &Tier) -> SyncedBatch {
        let mut outcome = SyncOutcome::default();
        let mut stored = Vec::with_capacity(records.len());

        for record in records {
            match self.upsert(record, tier).await {
                Ok((change, kept)) => {
                    stored.push(kept);
                    outcome.inserted_or_updated_count += 1;
                    match change {
                        Change::Inserted => outcome.inserted += 1,
                        Change::Updated => outcome.updated += 1,
                        Change::Unchanged => outcome.unchanged += 1,
                    }
                    debug!(name = %record.name, ?change, "synced");
                }
                Err(err) => {
                    warn!(name = %record.name, tier = %tier.name, error = %err, "sync failed for record");
                    outcome.errors.push(format!("{}: {err}", record.name));
                }
            }
        }

        info!(
            tier = %tier.name,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            errors = outcome.errors.len(),
            "sync batch finished"
        );
        SyncedBatch { outcome, stored }
    }

    async fn upsert(
        &self,
        record: &Opportunity,
        tier: &Tier,
    ) -> Result<(Change, Opportunity), StoreError> {
        let Some(existing) = self.store.find_by_name(&record.name).await? else {
            let stamped = tier.stamp(record.clone(), None);
            self.store.insert(&stamped).await?;
            return Ok((Change::Inserted, stamped));
        };

        if !tier.trusted && existing.record.verified {
            return Ok((Change::Unchanged, existing.record));
        }

        let stamped = tier.stamp(record.clone(), Some(&existing.record));
        if stamped == existing.record {
            return Ok((Change::Unchanged, stamped));
        }
        self.store.update(existing.id, &stamped).await?;
        Ok((Change::Updated, stamped))
    }
}
