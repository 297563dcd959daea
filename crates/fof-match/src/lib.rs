//! Deterministic match/ranking of stored opportunities against a student
//! profile: binary eligibility gates, then a weighted relevance score.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use fof_core::{Opportunity, OpportunityType, Profile, Status};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::debug;

pub const CRATE_NAME: &str = "fof-match";

/// Key in `eligibility.other` holding accepted academic levels.
pub const ACADEMIC_LEVELS: &str = "academic_levels";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub type_interest: f64,
    pub keywords: f64,
    pub deadline: f64,
    pub priority: f64,
    pub verified: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            type_interest: 40.0,
            keywords: 20.0,
            deadline: 20.0,
            priority: 15.0,
            verified: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredOpportunity {
    pub opportunity: Opportunity,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchEngine {
    weights: MatchWeights,
    /// Jaro-Winkler similarity at which an interest counts as mentioned.
    keyword_threshold: f64,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(MatchWeights::default())
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

impl MatchEngine {
    pub fn new(weights: MatchWeights) -> Self {
        Self {
            weights,
            keyword_threshold: 0.9,
        }
    }

    pub fn weights(&self) -> MatchWeights {
        self.weights
    }

    pub fn match_opportunities(
        &self,
        profile: &Profile,
        opportunities: &[Opportunity],
    ) -> Vec<ScoredOpportunity> {
        self.match_at(profile, opportunities, Utc::now())
    }

    /// Eligible opportunities, best first. Equal scores fall back to higher
    /// priority, then name.
    pub fn match_at(
        &self,
        profile: &Profile,
        opportunities: &[Opportunity],
        now: DateTime<Utc>,
    ) -> Vec<ScoredOpportunity> {
        let mut ranked: Vec<ScoredOpportunity> = opportunities
            .iter()
            .filter(|opportunity| is_eligible(profile, opportunity, now))
            .map(|opportunity| ScoredOpportunity {
                score: self.score(profile, opportunity, now),
                opportunity: opportunity.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.opportunity.priority.cmp(&a.opportunity.priority))
                .then_with(|| a.opportunity.name.cmp(&b.opportunity.name))
        });
        debug!(
            candidates = opportunities.len(),
            matched = ranked.len(),
            "ranked opportunities"
        );
        ranked
    }

    /// Weighted relevance in `0.0..=100.0` with the default weights.
    pub fn score(&self, profile: &Profile, opportunity: &Opportunity, now: DateTime<Utc>) -> f64 {
        let w = &self.weights;
        w.type_interest * type_interest_factor(profile, opportunity.kind)
            + w.keywords * self.keyword_factor(profile, opportunity)
            + w.deadline * deadline_factor(opportunity.application_deadline, now)
            + w.priority * (f64::from(opportunity.priority.clamp(0, 10)) / 10.0)
            + if opportunity.verified { w.verified } else { 0.0 }
    }

    /// Share of interests mentioned in the name or description.
    fn keyword_factor(&self, profile: &Profile, opportunity: &Opportunity) -> f64 {
        let interests: Vec<String> = profile
            .interests
            .iter()
            .map(|i| i.trim().to_lowercase())
            .filter(|i| !i.is_empty())
            .collect();
        if interests.is_empty() {
            return 0.0;
        }

        let haystack = format!("{} {}", opportunity.name, opportunity.description).to_lowercase();
        let vocabulary = words(&haystack);
        let hits = interests
            .iter()
            .filter(|interest| {
                haystack.contains(interest.as_str())
                    || (!interest.contains(' ')
                        && vocabulary
                            .iter()
                            .any(|word| jaro_winkler(word, interest) >= self.keyword_threshold))
            })
            .count();
        hits as f64 / interests.len() as f64
    }
}

/// Binary gates. Empty eligibility sets are open to everyone; an unknown
/// deadline counts as open.
pub fn is_eligible(profile: &Profile, opportunity: &Opportunity, now: DateTime<Utc>) -> bool {
    if opportunity.status == Status::Inactive || opportunity.is_expired_at(now) {
        return false;
    }

    let eligibility = &opportunity.eligibility;
    let in_set = |wanted: &Option<String>, set: &BTreeSet<String>| {
        set.is_empty()
            || wanted
                .as_deref()
                .is_some_and(|wanted| set.iter().any(|entry| same_text(entry, wanted)))
    };
    if !in_set(&profile.county, &eligibility.counties) {
        return false;
    }
    if !in_set(&profile.constituency, &eligibility.constituencies) {
        return false;
    }

    match (
        profile.academic_level.as_deref(),
        eligibility.other.get(ACADEMIC_LEVELS),
    ) {
        (Some(level), Some(levels)) if !levels.is_empty() => {
            levels.iter().any(|entry| same_text(entry, level))
        }
        _ => true,
    }
}

fn type_interest_factor(profile: &Profile, kind: OpportunityType) -> f64 {
    let wanted = profile.interests.iter().any(|interest| {
        interest.parse::<OpportunityType>().ok() == Some(kind)
            || words(interest)
                .iter()
                .any(|word| singular(word) == kind.as_str())
    });
    if wanted {
        1.0
    } else {
        0.0
    }
}

/// English plural to singular for the type names: `bursaries`, `grants`.
fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else {
        word.strip_suffix('s').unwrap_or(word).to_string()
    }
}

/// Sooner deadlines rank higher; unknown ranks like a distant one.
fn deadline_factor(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = deadline else {
        return 0.25;
    };
    match (deadline - now).num_days() {
        days if days <= 14 => 1.0,
        days if days <= 30 => 0.75,
        days if days <= 90 => 0.5,
        _ => 0.25,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fof_core::Eligibility;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
    }

    fn opportunity(name: &str, kind: OpportunityType) -> Opportunity {
        Opportunity {
            name: name.to_string(),
            provider: "Provider".to_string(),
            kind,
            description: format!("Provider {} Program", kind.label()),
            amount: None,
            application_deadline: None,
            application_link: None,
            eligibility: Eligibility::default(),
            contact_info: Default::default(),
            status: Status::Active,
            verified: false,
            priority: 0,
        }
    }

    fn profile(county: Option<&str>, interests: &[&str]) -> Profile {
        Profile {
            county: county.map(str::to_string),
            constituency: None,
            academic_level: None,
            interests: interests.iter().map(|i| i.to_string()).collect(),
        }
    }

    fn names(ranked: &[ScoredOpportunity]) -> Vec<&str> {
        ranked.iter().map(|s| s.opportunity.name.as_str()).collect()
    }

    #[test]
    fn county_gate_excludes_outsiders_and_open_records_stay() {
        let mut restricted = opportunity("Kisumu Bursary", OpportunityType::Bursary);
        restricted.eligibility = Eligibility::for_county("Kisumu");
        let open = opportunity("National Bursary", OpportunityType::Bursary);
        let records = vec![restricted, open];
        let engine = MatchEngine::default();

        let nairobi = engine.match_at(&profile(Some("Nairobi"), &[]), &records, now());
        assert_eq!(names(&nairobi), vec!["National Bursary"]);

        let kisumu = engine.match_at(&profile(Some("kisumu"), &[]), &records, now());
        assert_eq!(kisumu.len(), 2);

        let unknown = engine.match_at(&profile(None, &[]), &records, now());
        assert_eq!(names(&unknown), vec!["National Bursary"]);
    }

    #[test]
    fn expired_records_are_dropped_and_unknown_deadlines_kept() {
        let mut expired = opportunity("Closed Grant", OpportunityType::Grant);
        expired.application_deadline = Some(now() - Duration::days(1));
        expired.priority = 10;
        expired.verified = true;
        let undated = opportunity("Rolling Grant", OpportunityType::Grant);
        let mut upcoming = opportunity("Upcoming Grant", OpportunityType::Grant);
        upcoming.application_deadline = Some(now() + Duration::days(3));

        let ranked = MatchEngine::default().match_at(
            &profile(None, &["grant"]),
            &[expired, undated, upcoming],
            now(),
        );
        assert_eq!(names(&ranked), vec!["Upcoming Grant", "Rolling Grant"]);
    }

    #[test]
    fn inactive_records_are_never_matched() {
        let mut retired = opportunity("Retired Loan", OpportunityType::Loan);
        retired.status = Status::Inactive;
        assert!(MatchEngine::default()
            .match_at(&profile(None, &["loan"]), &[retired], now())
            .is_empty());
    }

    #[test]
    fn constituency_and_academic_level_gates() {
        let mut fund = opportunity("Kisumu East Bursary", OpportunityType::Bursary);
        fund.eligibility = Eligibility::for_constituency("Kisumu East");
        fund.eligibility.other.insert(
            ACADEMIC_LEVELS.to_string(),
            BTreeSet::from(["secondary".to_string()]),
        );

        let mut student = profile(Some("Kisumu"), &[]);
        student.constituency = Some("Kisumu East".to_string());
        student.academic_level = Some("Secondary".to_string());
        assert!(is_eligible(&student, &fund, now()));

        student.academic_level = Some("university".to_string());
        assert!(!is_eligible(&student, &fund, now()));

        student.academic_level = None;
        assert!(is_eligible(&student, &fund, now()));

        student.constituency = Some("Nyando".to_string());
        assert!(!is_eligible(&student, &fund, now()));
    }

    #[test]
    fn type_and_keyword_interests_lift_the_score() {
        let mut engineering = opportunity("Engineering Scholarship", OpportunityType::Scholarship);
        engineering.description = "For engineering undergraduates".to_string();
        let generic = opportunity("General Scholarship", OpportunityType::Scholarship);
        let loan = opportunity("Student Loan", OpportunityType::Loan);

        let ranked = MatchEngine::default().match_at(
            &profile(None, &["scholarships", "engineering"]),
            &[loan, generic, engineering],
            now(),
        );
        assert_eq!(
            names(&ranked),
            vec!["Engineering Scholarship", "General Scholarship", "Student Loan"]
        );
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn ties_break_on_priority_then_name() {
        let mut high = opportunity("Zeta Grant", OpportunityType::Grant);
        high.priority = 5;
        let a = opportunity("Alpha Grant", OpportunityType::Grant);
        let b = opportunity("Beta Grant", OpportunityType::Grant);
        let engine = MatchEngine::new(MatchWeights {
            priority: 0.0,
            ..MatchWeights::default()
        });

        let ranked = engine.match_at(&profile(None, &[]), &[b, high, a], now());
        assert_eq!(names(&ranked), vec!["Zeta Grant", "Alpha Grant", "Beta Grant"]);
        assert_eq!(ranked[0].score, ranked[2].score);
    }

    #[test]
    fn ranking_is_deterministic() {
        let records: Vec<Opportunity> = ["C", "A", "B"]
            .iter()
            .map(|n| opportunity(n, OpportunityType::Bursary))
            .collect();
        let engine = MatchEngine::default();
        let first = engine.match_at(&profile(None, &["bursary"]), &records, now());
        let second = engine.match_at(&profile(None, &["bursary"]), &records, now());
        assert_eq!(first, second);
        assert_eq!(names(&first), vec!["A", "B", "C"]);
    }

    #[test]
    fn scored_results_serialize_with_canonical_fields() {
        let ranked = MatchEngine::default().match_at(
            &profile(None, &[]),
            &[opportunity("HELB Loan", OpportunityType::Loan)],
            now(),
        );
        let json = serde_json::to_value(&ranked).unwrap();
        assert_eq!(json[0]["opportunity"]["type"], "loan");
        assert!(json[0]["score"].is_number());
    }

    #[test]
    fn plural_interests_name_their_type() {
        assert_eq!(singular("bursaries"), "bursary");
        assert_eq!(singular("loans"), "loan");
        assert_eq!(singular("grant"), "grant");

        let bursary = opportunity("Elimu Bursary", OpportunityType::Bursary);
        let grant = opportunity("Research Grant", OpportunityType::Grant);
        let ranked = MatchEngine::default().match_at(
            &profile(None, &["county bursaries"]),
            &[grant, bursary],
            now(),
        );
        assert_eq!(names(&ranked), vec!["Elimu Bursary", "Research Grant"]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn date_only_deadline_matches_until_the_day_ends() {
        let mut closing = opportunity("Kisumu County Secondary Bursary", OpportunityType::Bursary);
        closing.application_deadline = Some(Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap());
        let records = [closing];
        let engine = MatchEngine::default();

        let morning = Utc.with_ymd_and_hms(2026, 3, 31, 9, 0, 0).unwrap();
        assert_eq!(engine.match_at(&profile(None, &[]), &records, morning).len(), 1);

        let next_day = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        assert!(engine.match_at(&profile(None, &[]), &records, next_day).is_empty());
    }
}
