//! Source adapter contract, provider-family adapters, registry and dispatcher.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fof_core::{OpportunityDraft, ValidationPolicy};
use fof_storage::{HttpGet, DEFAULT_FETCH_TIMEOUT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{info, warn};

mod portals;
pub mod selectors;

pub use portals::{constituency_fund_adapter, county_portal_adapter, ministry_portal_adapter, PortalAdapter};

pub const CRATE_NAME: &str = "fof-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    MinistryPortal,
    ConstituencyFund,
    CountyPortal,
}

/// Per-invocation parameters for one configured source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceParams {
    pub source_id: String,
    pub display_name: String,
    pub provider: String,
    pub base_url: String,
    pub county: Option<String>,
    pub constituency: Option<String>,
    /// Overrides the adapter's default candidate paths when non-empty.
    pub candidate_paths: Vec<String>,
    pub timeout: Duration,
}

impl SourceParams {
    pub fn new(
        source_id: impl Into<String>,
        provider: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        Self {
            source_id: source_id.into(),
            display_name: provider.clone(),
            provider,
            base_url: base_url.into(),
            county: None,
            constituency: None,
            candidate_paths: Vec::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no adapter registered for {0}")]
    UnknownAdapter(String),
    #[error("adapter task for {source_id} aborted: {reason}")]
    TaskAborted { source_id: String, reason: String },
    #[error("fan-out limit closed before {source_id} could start")]
    FanOutClosed { source_id: String },
}

/// One provider family's fetch-and-extract unit.
///
/// `fetch` never fails: per-path errors are logged and skipped, and a source
/// that yields nothing returns an empty vector.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn adapter_id(&self) -> &'static str;
    fn family(&self) -> ProviderFamily;
    fn candidate_paths(&self, params: &SourceParams) -> Vec<String>;

    async fn fetch(&self, http: &dyn HttpGet, params: &SourceParams) -> Vec<OpportunityDraft>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ministry_portal_adapter());
        registry.register(constituency_fund_adapter());
        registry.register(county_portal_adapter());
        registry
    }

    pub fn register(&mut self, adapter: impl SourceAdapter + 'static) {
        self.adapters
            .insert(adapter.adapter_id().to_string(), Arc::new(adapter));
    }

    pub fn get(&self, adapter_id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(adapter_id).cloned()
    }

    pub fn adapter_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// A configured source paired with the adapter that crawls it.
#[derive(Debug, Clone)]
pub struct SourceJob {
    pub adapter_id: String,
    pub params: SourceParams,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Merged in completion order.
    pub drafts: Vec<OpportunityDraft>,
    pub per_source: BTreeMap<String, usize>,
    pub rejected: Vec<String>,
    pub errors: Vec<String>,
}

/// Runs adapters concurrently up to `fan_out` and merges what they return.
pub struct Dispatcher {
    registry: AdapterRegistry,
    http: Arc<dyn HttpGet>,
    fan_out: usize,
    policy: ValidationPolicy,
}

impl Dispatcher {
    pub fn new(registry: AdapterRegistry, http: Arc<dyn HttpGet>, fan_out: usize) -> Self {
        Self {
            registry,
            http,
            fan_out: fan_out.max(1),
            policy: ValidationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(&self, jobs: Vec<SourceJob>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let limit = Arc::new(Semaphore::new(self.fan_out));
        let mut tasks = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();

        for job in jobs {
            let Some(adapter) = self.registry.get(&job.adapter_id) else {
                let err = AdapterError::UnknownAdapter(job.adapter_id.clone());
                warn!(source_id = %job.params.source_id, error = %err, "skipping source");
                report.errors.push(format!("{}: {err}", job.params.source_id));
                continue;
            };
            let http = Arc::clone(&self.http);
            let limit = Arc::clone(&limit);
            let source_id = job.params.source_id.clone();
            let handle = tasks.spawn(run_job(limit, adapter, http, job.params));
            running.insert(handle.id(), source_id);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((id, outcome)) => {
                    running.remove(&id);
                    outcome
                }
                Err(join_err) => Err(AdapterError::TaskAborted {
                    source_id: running
                        .remove(&join_err.id())
                        .unwrap_or_else(|| "<untracked>".to_string()),
                    reason: join_err.to_string(),
                }),
            };
            let (source_id, drafts) = match outcome {
                Ok(done) => done,
                Err(err) => {
                    warn!(error = %err, "adapter task failed");
                    report.errors.push(err.to_string());
                    continue;
                }
            };

            let mut accepted = 0usize;
            for mut draft in drafts {
                let validation = self.policy.check(&draft);
                if !validation.valid {
                    report.rejected.push(format!(
                        "{source_id}: {} missing {:?}",
                        draft.name.as_deref().unwrap_or("<unnamed>"),
                        validation.missing_fields
                    ));
                    continue;
                }
                if let Some(provenance) = draft.provenance.as_mut() {
                    provenance.source_id = source_id.clone();
                }
                accepted += 1;
                report.drafts.push(draft);
            }
            info!(%source_id, records = accepted, "source finished");
            report.per_source.insert(source_id, accepted);
        }

        report
    }
}

/// One adapter run, started once a fan-out permit is free.
async fn run_job(
    limit: Arc<Semaphore>,
    adapter: Arc<dyn SourceAdapter>,
    http: Arc<dyn HttpGet>,
    params: SourceParams,
) -> Result<(String, Vec<OpportunityDraft>), AdapterError> {
    let Ok(_permit) = limit.acquire_owned().await else {
        return Err(AdapterError::FanOutClosed {
            source_id: params.source_id,
        });
    };
    let drafts = adapter.fetch(http.as_ref(), &params).await;
    Ok((params.source_id, drafts))
}
