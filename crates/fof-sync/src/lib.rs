//! Sync pipeline: dispatch configured sources, finalize drafts, upsert by
//! tier, write run reports. Also hosts configuration and the scheduler.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fof_adapters::{AdapterRegistry, Dispatcher, SourceJob};
use fof_core::{finalize, Opportunity, ValidationPolicy};
use fof_storage::{
    BackoffPolicy, HttpClientConfig, HttpFetcher, HttpGet, JsonFileStore, MemoryStore,
    OpportunityStore, PgStore,
};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub mod config;
pub mod dedup;
pub mod engine;
pub mod reports;

pub use config::{
    resolve_tier, ConfigError, CuratedList, SourceConfig, SourceRegistry, StoreKind, SyncConfig,
};
pub use dedup::{NearDuplicate, NearDuplicateDetector};
pub use engine::{SyncEngine, SyncOutcome, SyncedBatch, Tier};

pub const CRATE_NAME: &str = "fof-sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_sources: usize,
    pub per_source: BTreeMap<String, usize>,
    pub finalized: usize,
    /// Drafts dropped before sync, with the reason.
    pub rejected: Vec<String>,
    /// Keyed by tier name.
    pub outcomes: BTreeMap<String, SyncOutcome>,
    pub near_duplicates: usize,
    pub errors: Vec<String>,
    pub reports_dir: String,
    pub manifest: String,
}

impl SyncRunSummary {
    pub fn total(&self) -> SyncOutcome {
        let mut total = SyncOutcome::default();
        for outcome in self.outcomes.values() {
            total.merge(outcome.clone());
        }
        total
    }
}

pub async fn open_store(config: &SyncConfig) -> Result<Arc<dyn OpportunityStore>> {
    let store: Arc<dyn OpportunityStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Json => Arc::new(JsonFileStore::new(config.store_path.clone())),
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            Arc::new(PgStore::connect(url).await.context("connecting to postgres")?)
        }
    };
    Ok(store)
}

pub fn build_fetcher(config: &SyncConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        timeout: config.http_timeout(),
        user_agent: Some(config.user_agent.clone()),
        global_concurrency: config.fan_out.max(1) * 2,
        backoff: BackoffPolicy {
            max_retries: config.http_max_retries,
            ..BackoffPolicy::default()
        },
        request_rate: config.request_rate(),
        ..Default::default()
    })
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn OpportunityStore>,
    http: Arc<dyn HttpGet>,
    adapters: AdapterRegistry,
    policy: ValidationPolicy,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn OpportunityStore>, http: Arc<dyn HttpGet>) -> Self {
        Self {
            config,
            store,
            http,
            adapters: AdapterRegistry::with_defaults(),
            policy: ValidationPolicy::default(),
        }
    }

    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let store = open_store(&config).await?;
        let http = Arc::new(build_fetcher(&config)?);
        info!(store = ?config.store, pacing = ?http.request_rate(), "sync pipeline ready");
        Ok(Self::new(config, store, http))
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn OpportunityStore> {
        Arc::clone(&self.store)
    }

    pub fn http(&self) -> Arc<dyn HttpGet> {
        Arc::clone(&self.http)
    }

    /// One full crawl of every enabled source in `sources.yaml`.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let sources_path = self.config.sources_path();
        let registry = SourceRegistry::load(&sources_path).await?;

        let mut errors = Vec::new();
        let mut tier_of_source = BTreeMap::new();
        let mut jobs = Vec::new();
        for source in registry.enabled() {
            match registry.resolve_tier(&source.tier) {
                Ok(tier) => {
                    tier_of_source.insert(source.source_id.clone(), tier);
                    jobs.push(SourceJob {
                        adapter_id: source.adapter.clone(),
                        params: source.to_params(self.config.http_timeout()),
                    });
                }
                Err(err) => {
                    warn!(source_id = %source.source_id, error = %err, "skipping source");
                    errors.push(format!("{}: {err}", source.source_id));
                }
            }
        }
        let enabled_sources = jobs.len() + errors.len();
        info!(%run_id, sources = jobs.len(), "sync run started");

        let dispatcher = Dispatcher::new(self.adapters.clone(), self.http(), self.config.fan_out)
            .with_policy(self.policy.clone());
        let dispatch = dispatcher.run(jobs).await;
        errors.extend(dispatch.errors);
        let mut rejected = dispatch.rejected;

        // Tier name -> records, in arrival order.
        let mut batches: BTreeMap<String, (Tier, Vec<Opportunity>)> = BTreeMap::new();
        let mut finalized = Vec::new();
        for draft in dispatch.drafts {
            let source_id = draft
                .provenance
                .as_ref()
                .map(|p| p.source_id.clone())
                .unwrap_or_default();
            match finalize(&draft, &self.policy) {
                Ok(record) => {
                    let tier = tier_of_source
                        .get(&source_id)
                        .cloned()
                        .unwrap_or_else(Tier::scraped);
                    finalized.push(record.clone());
                    batches
                        .entry(tier.name.clone())
                        .or_insert_with(|| (tier, Vec::new()))
                        .1
                        .push(record);
                }
                Err(report) => rejected.push(format!(
                    "{source_id}: {} missing {:?}",
                    draft.name.as_deref().unwrap_or("<unnamed>"),
                    report.missing_fields
                )),
            }
        }

        let engine = SyncEngine::new(self.store());
        let mut outcomes = BTreeMap::new();
        let mut snapshot = Vec::with_capacity(finalized.len());
        for (name, (tier, records)) in batches {
            let batch = engine.sync_batch(&records, &tier).await;
            errors.extend(batch.outcome.errors.iter().cloned());
            snapshot.extend(batch.stored);
            outcomes.insert(name, batch.outcome);
        }

        let near_duplicates = NearDuplicateDetector::default().detect(&snapshot);
        let reports_dir = reports::run_dir(&self.config.reports_root(), run_id);
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            enabled_sources,
            per_source: dispatch.per_source,
            finalized: finalized.len(),
            rejected,
            outcomes,
            near_duplicates: near_duplicates.len(),
            errors,
            reports_dir: reports_dir.display().to_string(),
            manifest: reports_dir.join(reports::MANIFEST_FILE).display().to_string(),
        };
        reports::write_run_reports(&reports_dir, &summary, &snapshot, &near_duplicates).await?;

        let total = summary.total();
        info!(
            %run_id,
            synced = total.inserted_or_updated_count,
            inserted = total.inserted,
            updated = total.updated,
            rejected = summary.rejected.len(),
            errors = summary.errors.len(),
            "sync run finished"
        );
        Ok(summary)
    }

    /// Sync a curated YAML list. `tier` overrides the list's own tier.
    pub async fn sync_curated(&self, path: &Path, tier: Option<&str>) -> Result<SyncOutcome> {
        let list = CuratedList::load(path).await?;
        let tier_name = tier
            .map(str::to_string)
            .or_else(|| list.tier.clone())
            .with_context(|| format!("{} names no tier; pass one explicitly", path.display()))?;

        let sources_path = self.config.sources_path();
        let custom_tiers = if fs_exists(&sources_path).await {
            SourceRegistry::load(&sources_path).await?.tiers
        } else {
            Vec::new()
        };
        let tier = resolve_tier(&tier_name, &custom_tiers)?;

        let mut records = Vec::with_capacity(list.opportunities.len());
        let mut rejected = Vec::new();
        for draft in &list.opportunities {
            match finalize(draft, &self.policy) {
                Ok(record) => records.push(record),
                Err(report) => rejected.push(format!(
                    "{}: missing {:?}",
                    draft.name.as_deref().unwrap_or("<unnamed>"),
                    report.missing_fields
                )),
            }
        }

        let mut outcome = SyncEngine::new(self.store()).sync(&records, &tier).await;
        outcome.errors.extend(rejected);
        info!(
            list = %path.display(),
            tier = %tier.name,
            synced = outcome.inserted_or_updated_count,
            errors = outcome.errors.len(),
            "curated list synced"
        );
        Ok(outcome)
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.sync_cron_1, &self.config.sync_cron_2] {
            let pipeline = Arc::clone(self);
            let job = Job::new_async(cron, move |_uuid, _l| {
                let pipeline = Arc::clone(&pipeline);
                Box::pin(async move {
                    match pipeline.run_once().await {
                        Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                        Err(err) => warn!(error = %format!("{err:#}"), "scheduled sync failed"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}

async fn fs_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env()?;
    SyncPipeline::from_config(config).await?.run_once().await
}
