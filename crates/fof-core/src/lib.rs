//! Core domain model, field normalizer and validation policy for FOF.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod normalize;

pub use normalize::{clean_text, finalize, normalize_amount, normalize_deadline, parse_deadline};

pub const CRATE_NAME: &str = "fof-core";

/// Canonical field names, as reported in `extractedFields` / `missingFields`.
pub mod fields {
    pub const NAME: &str = "name";
    pub const PROVIDER: &str = "provider";
    pub const TYPE: &str = "type";
    pub const DESCRIPTION: &str = "description";
    pub const AMOUNT: &str = "amount";
    pub const APPLICATION_DEADLINE: &str = "applicationDeadline";
    pub const APPLICATION_LINK: &str = "applicationLink";
    pub const ELIGIBILITY: &str = "eligibility";
    pub const CONTACT_INFO: &str = "contactInfo";

    pub const ALL: [&str; 9] = [
        NAME,
        PROVIDER,
        TYPE,
        DESCRIPTION,
        AMOUNT,
        APPLICATION_DEADLINE,
        APPLICATION_LINK,
        ELIGIBILITY,
        CONTACT_INFO,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityType {
    Scholarship,
    Bursary,
    Grant,
    Loan,
    Bootcamp,
    Learning,
    Mentorship,
    Internship,
}

impl OpportunityType {
    pub const ALL: [OpportunityType; 8] = [
        OpportunityType::Scholarship,
        OpportunityType::Bursary,
        OpportunityType::Grant,
        OpportunityType::Loan,
        OpportunityType::Bootcamp,
        OpportunityType::Learning,
        OpportunityType::Mentorship,
        OpportunityType::Internship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityType::Scholarship => "scholarship",
            OpportunityType::Bursary => "bursary",
            OpportunityType::Grant => "grant",
            OpportunityType::Loan => "loan",
            OpportunityType::Bootcamp => "bootcamp",
            OpportunityType::Learning => "learning",
            OpportunityType::Mentorship => "mentorship",
            OpportunityType::Internship => "internship",
        }
    }

    /// Title-case label used in synthesized descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            OpportunityType::Scholarship => "Scholarship",
            OpportunityType::Bursary => "Bursary",
            OpportunityType::Grant => "Grant",
            OpportunityType::Loan => "Loan",
            OpportunityType::Bootcamp => "Bootcamp",
            OpportunityType::Learning => "Learning",
            OpportunityType::Mentorship => "Mentorship",
            OpportunityType::Internship => "Internship",
        }
    }
}

impl fmt::Display for OpportunityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized opportunity type: {0:?}")]
pub struct UnknownOpportunityType(pub String);

impl FromStr for OpportunityType {
    type Err = UnknownOpportunityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        OpportunityType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| UnknownOpportunityType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Inactive,
}

/// Who may apply. Empty sets mean "open to all" on that axis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    #[serde(default)]
    pub counties: BTreeSet<String>,
    #[serde(default)]
    pub constituencies: BTreeSet<String>,
    /// Criteria without a dedicated axis yet, e.g. `academic_levels`.
    #[serde(default)]
    pub other: BTreeMap<String, BTreeSet<String>>,
}

impl Eligibility {
    pub fn is_empty(&self) -> bool {
        self.counties.is_empty() && self.constituencies.is_empty() && self.other.is_empty()
    }

    pub fn for_county(county: impl Into<String>) -> Self {
        let mut eligibility = Self::default();
        eligibility.counties.insert(county.into());
        eligibility
    }

    pub fn for_constituency(constituency: impl Into<String>) -> Self {
        let mut eligibility = Self::default();
        eligibility.constituencies.insert(constituency.into());
        eligibility
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.website.is_none()
    }
}

/// Where a draft came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source_id: String,
    pub source_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub extractor: String,
}

/// Partial record handed from adapters / AI extraction to the normalizer.
///
/// `kind` keeps the raw type string so an unrecognized value can be reported
/// as missing instead of being silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub application_deadline: Option<String>,
    #[serde(default)]
    pub application_link: Option<String>,
    #[serde(default)]
    pub eligibility: Eligibility,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl OpportunityDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn parsed_kind(&self) -> Option<OpportunityType> {
        self.kind.as_deref().and_then(|k| k.parse().ok())
    }

    /// Canonical names of every field that currently holds a value.
    pub fn populated_fields(&self) -> BTreeSet<String> {
        let present = [
            (fields::NAME, has_text(&self.name)),
            (fields::PROVIDER, has_text(&self.provider)),
            (fields::TYPE, has_text(&self.kind)),
            (fields::DESCRIPTION, has_text(&self.description)),
            (fields::AMOUNT, has_text(&self.amount)),
            (fields::APPLICATION_DEADLINE, has_text(&self.application_deadline)),
            (fields::APPLICATION_LINK, has_text(&self.application_link)),
            (fields::ELIGIBILITY, !self.eligibility.is_empty()),
            (fields::CONTACT_INFO, !self.contact_info.is_empty()),
        ];
        present
            .into_iter()
            .filter(|(_, has)| *has)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Copy values from `other` into fields that are still unknown here.
    /// Fields that already hold a value are never touched.
    pub fn fill_missing_from(&mut self, other: &OpportunityDraft) {
        fill(&mut self.name, &other.name);
        fill(&mut self.provider, &other.provider);
        fill(&mut self.kind, &other.kind);
        fill(&mut self.description, &other.description);
        fill(&mut self.amount, &other.amount);
        fill(&mut self.application_deadline, &other.application_deadline);
        fill(&mut self.application_link, &other.application_link);
        if self.eligibility.is_empty() {
            self.eligibility = other.eligibility.clone();
        }
        fill(&mut self.contact_info.source, &other.contact_info.source);
        fill(&mut self.contact_info.website, &other.contact_info.website);
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn fill(target: &mut Option<String>, candidate: &Option<String>) {
    if !has_text(target) && has_text(candidate) {
        *target = candidate.clone();
    }
}

/// Canonical opportunity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub name: String,
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: OpportunityType,
    pub description: String,
    pub amount: Option<String>,
    pub application_deadline: Option<DateTime<Utc>>,
    pub application_link: Option<String>,
    #[serde(default)]
    pub eligibility: Eligibility,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub priority: i32,
}

impl Opportunity {
    /// True only for a known deadline strictly before `now`. A deadline at
    /// exactly midnight came from a date-only value and stays open for that
    /// whole day.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.application_deadline.is_some_and(|deadline| {
            if deadline.time() == NaiveTime::MIN {
                deadline.date_naive() < now.date_naive()
            } else {
                deadline < now
            }
        })
    }
}

/// Opportunity as held by a store, with the store's surrogate id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpportunity {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub record: Opportunity,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub missing_fields: BTreeSet<String>,
}

/// The single definition of which fields a record must carry to be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    required: BTreeSet<&'static str>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::requiring(&[fields::NAME, fields::PROVIDER, fields::TYPE])
    }
}

impl ValidationPolicy {
    pub fn requiring(required: &[&'static str]) -> Self {
        Self {
            required: required.iter().copied().collect(),
        }
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.required.iter().copied()
    }

    /// A `type` only counts as present when it is a recognized value.
    pub fn check(&self, draft: &OpportunityDraft) -> ValidationReport {
        let populated = draft.populated_fields();
        let missing_fields: BTreeSet<String> = self
            .required
            .iter()
            .filter(|field| {
                if **field == fields::TYPE {
                    draft.parsed_kind().is_none()
                } else {
                    !populated.contains(**field)
                }
            })
            .map(|field| field.to_string())
            .collect();
        ValidationReport {
            valid: missing_fields.is_empty(),
            missing_fields,
        }
    }
}

/// Student attributes consumed by the match engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub constituency: Option<String>,
    #[serde(default)]
    pub academic_level: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opportunity_type_parses_case_insensitively() {
        assert_eq!("Bursary".parse::<OpportunityType>(), Ok(OpportunityType::Bursary));
        assert_eq!(" grant ".parse::<OpportunityType>(), Ok(OpportunityType::Grant));
        assert!("award".parse::<OpportunityType>().is_err());
    }

    #[test]
    fn default_policy_requires_name_provider_and_recognized_type() {
        let policy = ValidationPolicy::default();
        let mut draft = OpportunityDraft::named("Elimu Bursary");
        draft.provider = Some("Ministry of Education".into());
        draft.kind = Some("prize".into());

        let report = policy.check(&draft);
        assert!(!report.valid);
        assert_eq!(report.missing_fields, BTreeSet::from(["type".to_string()]));

        draft.kind = Some("bursary".into());
        assert!(policy.check(&draft).valid);
    }

    #[test]
    fn blank_name_counts_as_missing() {
        let mut draft = OpportunityDraft::named("   ");
        draft.provider = Some("NG-CDF".into());
        draft.kind = Some("bursary".into());
        let report = ValidationPolicy::default().check(&draft);
        assert!(report.missing_fields.contains("name"));
    }

    #[test]
    fn fill_missing_never_overwrites_known_values() {
        let mut draft = OpportunityDraft::named("County Bursary");
        draft.amount = Some("KES 10,000".into());

        let mut guess = OpportunityDraft::named("Something Else");
        guess.amount = Some("KES 99,999".into());
        guess.description = Some("Support for needy students".into());
        guess.eligibility = Eligibility::for_county("Kisumu");

        draft.fill_missing_from(&guess);
        assert_eq!(draft.name.as_deref(), Some("County Bursary"));
        assert_eq!(draft.amount.as_deref(), Some("KES 10,000"));
        assert_eq!(draft.description.as_deref(), Some("Support for needy students"));
        assert!(draft.eligibility.counties.contains("Kisumu"));
    }

    #[test]
    fn drafts_use_canonical_json_field_names() {
        let draft: OpportunityDraft = serde_json::from_str(
            r#"{"name":"X","type":"grant","applicationDeadline":"2026-01-31","contactInfo":{"website":"https://x.go.ke"}}"#,
        )
        .unwrap();
        assert_eq!(draft.kind.as_deref(), Some("grant"));
        assert_eq!(
            draft.populated_fields(),
            BTreeSet::from([
                "applicationDeadline".to_string(),
                "contactInfo".to_string(),
                "name".to_string(),
                "type".to_string(),
            ])
        );
    }

    fn opportunity_due(deadline: Option<DateTime<Utc>>) -> Opportunity {
        Opportunity {
            name: "Kisumu County Secondary Bursary".into(),
            provider: "Kisumu County Government".into(),
            kind: OpportunityType::Bursary,
            description: "Kisumu County Government Bursary Program".into(),
            amount: None,
            application_deadline: deadline,
            application_link: None,
            eligibility: Eligibility::default(),
            contact_info: ContactInfo::default(),
            status: Status::Active,
            verified: false,
            priority: 1,
        }
    }

    #[test]
    fn date_only_deadline_is_open_through_its_own_day() {
        use chrono::TimeZone;

        let due = opportunity_due(Some(Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap()));
        assert!(!due.is_expired_at(Utc.with_ymd_and_hms(2026, 3, 31, 9, 0, 0).unwrap()));
        assert!(!due.is_expired_at(Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap()));
        assert!(due.is_expired_at(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()));

        let timed = opportunity_due(Some(Utc.with_ymd_and_hms(2026, 3, 31, 17, 0, 0).unwrap()));
        assert!(!timed.is_expired_at(Utc.with_ymd_and_hms(2026, 3, 31, 16, 59, 0).unwrap()));
        assert!(timed.is_expired_at(Utc.with_ymd_and_hms(2026, 3, 31, 17, 0, 1).unwrap()));

        assert!(!opportunity_due(None).is_expired_at(Utc::now()));
    }
}
