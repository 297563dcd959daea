//! AI extraction fallback: turns free text or an arbitrary page into a
//! partial opportunity record via a language model, then validates and
//! optionally enhances it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fof_core::{
    clean_text, fields, normalize_amount, normalize_deadline, OpportunityDraft, OpportunityType,
    Provenance, ValidationPolicy, ValidationReport,
};
use fof_storage::{FetchRequest, HttpGet, DEFAULT_FETCH_TIMEOUT};
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

mod model;

pub use model::{ChatModelConfig, LanguageModel, ModelError, OpenAiChatModel};

pub const CRATE_NAME: &str = "fof-extract";

pub const EXTRACTOR_ID: &str = "ai-extraction";

/// Longer inputs are cut before prompting.
const MAX_INPUT_CHARS: usize = 12_000;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// The only hard failure of the extraction path. Low-confidence output is a
/// successful [`ExtractionResult`].
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("language model unavailable: {0}")]
    ModelUnavailable(#[source] ModelError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub record: OpportunityDraft,
    pub confidence: f64,
    pub extracted_fields: BTreeSet<String>,
    pub missing_fields: BTreeSet<String>,
}

impl ExtractionResult {
    /// The model tried and found nothing usable.
    pub fn empty(policy: &ValidationPolicy) -> Self {
        Self::from_record(OpportunityDraft::default(), Some(0.0), policy)
    }

    fn from_record(
        record: OpportunityDraft,
        stated_confidence: Option<f64>,
        policy: &ValidationPolicy,
    ) -> Self {
        let mut result = Self {
            record,
            confidence: 0.0,
            extracted_fields: BTreeSet::new(),
            missing_fields: BTreeSet::new(),
        };
        result.refresh_fields(policy);
        result.confidence = if result.extracted_fields.is_empty() {
            0.0
        } else {
            match stated_confidence {
                Some(stated) if stated.is_finite() => stated.clamp(0.0, 1.0),
                _ => result.extracted_fields.len() as f64 / fields::ALL.len() as f64,
            }
        };
        result
    }

    /// `missing_fields` lists required fields only, as judged by `policy`.
    fn refresh_fields(&mut self, policy: &ValidationPolicy) {
        self.extracted_fields = self.record.populated_fields();
        self.missing_fields = policy.check(&self.record).missing_fields;
    }
}

/// What the "extract" operation hands back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    pub result: ExtractionResult,
    pub validation: ValidationReport,
    pub enhanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractSource {
    Text(String),
    Url(String),
}

pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    http: Arc<dyn HttpGet>,
    policy: ValidationPolicy,
    fetch_timeout: Duration,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>, http: Arc<dyn HttpGet>) -> Self {
        Self {
            model,
            http,
            policy: ValidationPolicy::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub async fn extract_from_text(&self, text: &str) -> Result<ExtractionResult, ExtractError> {
        let Some(text) = clean_text(text) else {
            return Ok(ExtractionResult::empty(&self.policy));
        };
        let input: String = text.chars().take(MAX_INPUT_CHARS).collect();

        let raw = self
            .model
            .complete(&extraction_prompt(&input))
            .await
            .map_err(ExtractError::ModelUnavailable)?;

        match parse_model_output(&raw) {
            Some((draft, stated)) => {
                let result = ExtractionResult::from_record(tidy(draft), stated, &self.policy);
                debug!(confidence = result.confidence, fields = result.extracted_fields.len(), "extracted");
                Ok(result)
            }
            None => {
                warn!(chars = raw.len(), "model output was not a JSON object; treating as empty");
                Ok(ExtractionResult::empty(&self.policy))
            }
        }
    }

    /// One fetch, stripped to visible text, then the text path. An unreachable
    /// page is an empty result rather than an error.
    pub async fn extract_from_url(&self, url: &str) -> Result<ExtractionResult, ExtractError> {
        let request = FetchRequest::browser(url, self.fetch_timeout);
        let response = match self.http.get(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%url, error = %err, "extraction fetch failed");
                return Ok(ExtractionResult::empty(&self.policy));
            }
        };

        let text = html_to_text(&response.text());
        let mut result = self.extract_from_text(&text).await?;
        if !result.extracted_fields.is_empty() {
            result.record.provenance = Some(Provenance {
                source_id: EXTRACTOR_ID.to_string(),
                source_url: Some(response.final_url),
                fetched_at: Utc::now(),
                extractor: EXTRACTOR_ID.to_string(),
            });
        }
        Ok(result)
    }

    pub fn validate_extraction(&self, record: &OpportunityDraft) -> ValidationReport {
        self.policy.check(record)
    }

    /// Second model pass that only fills fields still unknown. Invalid records
    /// come back untouched without a model call.
    pub async fn enhance_extraction(
        &self,
        record: &OpportunityDraft,
    ) -> Result<OpportunityDraft, ExtractError> {
        if !self.validate_extraction(record).valid {
            return Ok(record.clone());
        }

        let raw = self
            .model
            .complete(&enhancement_prompt(record))
            .await
            .map_err(ExtractError::ModelUnavailable)?;

        let mut enhanced = record.clone();
        match parse_model_output(&raw) {
            Some((guess, _)) => enhanced.fill_missing_from(&tidy(guess)),
            None => warn!("enhancement output was not a JSON object; keeping record as is"),
        }
        Ok(enhanced)
    }

    /// extract, validate, then enhance only when valid.
    pub async fn extract_and_validate(
        &self,
        source: ExtractSource,
    ) -> Result<ExtractionReport, ExtractError> {
        let mut result = match &source {
            ExtractSource::Text(text) => self.extract_from_text(text).await?,
            ExtractSource::Url(url) => self.extract_from_url(url).await?,
        };

        let validation = self.validate_extraction(&result.record);
        let enhanced = validation.valid;
        if enhanced {
            result.record = self.enhance_extraction(&result.record).await?;
            result.refresh_fields(&self.policy);
        }

        info!(
            valid = validation.valid,
            enhanced,
            confidence = result.confidence,
            missing = ?validation.missing_fields,
            "extraction finished"
        );
        Ok(ExtractionReport {
            result,
            validation,
            enhanced,
        })
    }
}

fn type_list() -> String {
    OpportunityType::ALL
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn extraction_prompt(text: &str) -> String {
    format!(
        "Extract the funding opportunity described in the text below.\n\
         Respond with one JSON object and nothing else, with these keys:\n\
         name, provider, type, description, amount, applicationDeadline, applicationLink,\n\
         eligibility (object with counties and constituencies arrays), contactInfo (object with source and website),\n\
         confidence (number from 0.0 to 1.0).\n\
         type must be one of: {types}.\n\
         Use null for anything the text does not state. Do not guess.\n\n\
         TEXT:\n{text}",
        types = type_list(),
    )
}

fn enhancement_prompt(record: &OpportunityDraft) -> String {
    let known = serde_json::to_string_pretty(record).unwrap_or_default();
    format!(
        "Here is a verified funding opportunity record:\n{known}\n\n\
         Suggest values only for the keys that are null or absent, using the same key names.\n\
         Respond with one JSON object and nothing else. Leave a key null if you have no reasonable inference."
    )
}

/// First `{` to last `}`, so code fences and chatter around the object are ignored.
/// Nulls are dropped at every depth. A key whose value has the wrong shape is
/// dropped on its own; the rest of the object still counts.
fn parse_model_output(raw: &str) -> Option<(OpportunityDraft, Option<f64>)> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }

    let mut value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    strip_nulls(&mut value);
    let Value::Object(mut object) = value else {
        return None;
    };
    object.remove("provenance");
    let confidence = object.remove("confidence").and_then(|v| v.as_f64());

    let draft = match serde_json::from_value::<OpportunityDraft>(Value::Object(object.clone())) {
        Ok(draft) => draft,
        Err(err) => {
            debug!(error = %err, "model output did not fit a draft; keeping the keys that do");
            let mut draft = OpportunityDraft::default();
            for (key, field) in object {
                let single = Value::Object(Map::from_iter([(key.clone(), field)]));
                match serde_json::from_value::<OpportunityDraft>(single) {
                    Ok(partial) => draft.fill_missing_from(&partial),
                    Err(err) => debug!(%key, error = %err, "dropping malformed key"),
                }
            }
            draft
        }
    };
    Some((draft, confidence))
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(object) => {
            object.retain(|_, v| !v.is_null());
            object.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => {
            items.retain(|v| !v.is_null());
            items.iter_mut().for_each(strip_nulls);
        }
        _ => {}
    }
}

/// Run model output through the same normalization adapters use.
fn tidy(draft: OpportunityDraft) -> OpportunityDraft {
    OpportunityDraft {
        name: draft.name.as_deref().and_then(clean_text),
        provider: draft.provider.as_deref().and_then(clean_text),
        kind: draft
            .kind
            .as_deref()
            .and_then(clean_text)
            .map(|kind| kind.to_ascii_lowercase()),
        description: draft.description.as_deref().and_then(clean_text),
        amount: draft.amount.as_deref().and_then(normalize_amount),
        application_deadline: draft
            .application_deadline
            .as_deref()
            .and_then(normalize_deadline),
        application_link: draft.application_link.as_deref().and_then(clean_text),
        eligibility: draft.eligibility,
        contact_info: draft.contact_info,
        provenance: None,
    }
}

/// Visible text of an HTML document, one space between text nodes.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| HIDDEN_ELEMENTS.contains(&element.name()))
        });
        if hidden {
            continue;
        }
        if let Some(cleaned) = clean_text(text) {
            parts.push(cleaned);
        }
    }
    parts.join(" ")
}
