//! Field normalizer: ragged source strings into canonical values or `None`.
//!
//! Every function here is pure and idempotent. Deadlines are advisory, so a
//! value that cannot be read degrades to unknown instead of failing the record.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::{fields, Opportunity, OpportunityDraft, Status, ValidationPolicy, ValidationReport};

// %B and %b both accept full and abbreviated month names when parsing.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%A, %d %B %Y",
    "%A %d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Collapse runs of whitespace and trim; blank input is unknown.
pub fn clean_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let text = deadline_text(raw)?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(parsed.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// RFC 3339 UTC string (`2025-12-31T00:00:00Z`) or `None`.
pub fn normalize_deadline(raw: &str) -> Option<String> {
    parse_deadline(raw).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Amounts stay strings: sources publish ranges, "varies" and foreign currencies.
pub fn normalize_amount(raw: &str) -> Option<String> {
    clean_text(raw)
}

fn deadline_text(raw: &str) -> Option<String> {
    let mut text = clean_text(raw)?;

    // "Deadline: 31 March 2026", "Closing date: ..."
    if let Some((label, rest)) = text.split_once(':') {
        if !label.is_empty() && label.chars().all(|c| c.is_alphabetic() || c == ' ') {
            text = rest.trim().to_string();
        }
    }

    let words = text
        .split(' ')
        .map(strip_ordinal_suffix)
        .collect::<Vec<_>>()
        .join(" ");
    clean_text(&words)
}

/// "31st" -> "31", "2nd," -> "2,"
fn strip_ordinal_suffix(word: &str) -> String {
    let (core, tail) = match word.strip_suffix(',') {
        Some(core) => (core, ","),
        None => (word, ""),
    };
    let lower = core.to_ascii_lowercase();
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(digits) = lower.strip_suffix(suffix) {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return format!("{digits}{tail}");
            }
        }
    }
    word.to_string()
}

fn clean_set(values: &BTreeSet<String>) -> BTreeSet<String> {
    values.iter().filter_map(|v| clean_text(v)).collect()
}

fn absolute_link(raw: &str) -> Option<String> {
    let link = clean_text(raw)?;
    let lower = link.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        Some(link)
    } else {
        None
    }
}

/// Complete a partial record into a canonical one.
///
/// Name, provider and a recognized type are needed regardless of `policy`,
/// since they make up the record's identity and shape.
pub fn finalize(
    draft: &OpportunityDraft,
    policy: &ValidationPolicy,
) -> Result<Opportunity, ValidationReport> {
    let mut report = policy.check(draft);

    let name = draft.name.as_deref().and_then(clean_text);
    let provider = draft.provider.as_deref().and_then(clean_text);
    let kind = draft.parsed_kind();
    for (field, present) in [
        (fields::NAME, name.is_some()),
        (fields::PROVIDER, provider.is_some()),
        (fields::TYPE, kind.is_some()),
    ] {
        if !present {
            report.missing_fields.insert(field.to_string());
        }
    }
    report.valid = report.missing_fields.is_empty();

    let (Some(name), Some(provider), Some(kind), true) = (name, provider, kind, report.valid)
    else {
        return Err(report);
    };

    let description = draft
        .description
        .as_deref()
        .and_then(clean_text)
        .unwrap_or_else(|| format!("{provider} {} Program", kind.label()));

    let mut eligibility = draft.eligibility.clone();
    eligibility.counties = clean_set(&eligibility.counties);
    eligibility.constituencies = clean_set(&eligibility.constituencies);

    Ok(Opportunity {
        name,
        provider,
        kind,
        description,
        amount: draft.amount.as_deref().and_then(normalize_amount),
        application_deadline: draft.application_deadline.as_deref().and_then(parse_deadline),
        application_link: draft.application_link.as_deref().and_then(absolute_link),
        eligibility,
        contact_info: draft.contact_info.clone(),
        status: Status::Active,
        verified: false,
        priority: 0,
    })
}
