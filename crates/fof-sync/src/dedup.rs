//! Near-duplicate review list. Exact names are the identity; this only flags
//! names that look like the same opportunity spelled differently.

use fof_core::Opportunity;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearDuplicate {
    pub name_a: String,
    pub name_b: String,
    pub provider_a: String,
    pub provider_b: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct NearDuplicateDetector {
    pub threshold: f64,
}

impl Default for NearDuplicateDetector {
    fn default() -> Self {
        Self { threshold: 0.92 }
    }
}

impl NearDuplicateDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn normalize_name(input: &str) -> String {
        input
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn similarity(a: &str, b: &str) -> f64 {
        jaro_winkler(&Self::normalize_name(a), &Self::normalize_name(b))
    }

    /// Pairs at or above the threshold, in input order. Nothing is merged.
    pub fn detect(&self, records: &[Opportunity]) -> Vec<NearDuplicate> {
        let mut pairs = Vec::new();
        for i in 0..records.len() {
            for j in (i + 1)..records.len() {
                let (a, b) = (&records[i], &records[j]);
                if a.name == b.name {
                    continue;
                }
                let score = Self::similarity(&a.name, &b.name);
                if score >= self.threshold {
                    pairs.push(NearDuplicate {
                        name_a: a.name.clone(),
                        name_b: b.name.clone(),
                        provider_a: a.provider.clone(),
                        provider_b: b.provider.clone(),
                        score,
                    });
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fof_core::{OpportunityType, Status};

    fn named(name: &str) -> Opportunity {
        Opportunity {
            name: name.to_string(),
            provider: "Ministry of Education".to_string(),
            kind: OpportunityType::Scholarship,
            description: String::new(),
            amount: None,
            application_deadline: None,
            application_link: None,
            eligibility: Default::default(),
            contact_info: Default::default(),
            status: Status::Active,
            verified: false,
            priority: 0,
        }
    }

    #[test]
    fn spelling_variants_are_flagged() {
        let records = vec![
            named("Elimu Scholarship Programme"),
            named("Elimu Scholarship Program"),
            named("ELIMU scholarship programme."),
        ];
        let pairs = NearDuplicateDetector::default().detect(&records);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.score >= 0.92));
    }

    #[test]
    fn unrelated_names_are_not_flagged() {
        let records = vec![
            named("Kisumu County Bursary"),
            named("Presidential Secondary School Scholarship"),
        ];
        assert!(NearDuplicateDetector::default().detect(&records).is_empty());
    }

    #[test]
    fn exact_repeats_are_the_same_record_not_a_pair() {
        let records = vec![named("HELB Loan"), named("HELB Loan")];
        assert!(NearDuplicateDetector::default().detect(&records).is_empty());
    }
}
