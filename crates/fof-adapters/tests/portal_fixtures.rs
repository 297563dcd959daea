// Saved portal pages run through the real adapters and the normalizer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use fof_adapters::{county_portal_adapter, ministry_portal_adapter, SourceAdapter, SourceParams};
use fof_core::{finalize, OpportunityType, ValidationPolicy};
use fof_storage::{FetchError, FetchRequest, FetchedResponse, HttpGet};

fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative)
}

/// Serves fixture files by URL; anything else is a 404.
struct FixtureSite {
    pages: HashMap<String, PathBuf>,
    requested: Mutex<Vec<String>>,
}

impl FixtureSite {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, file)| (url.to_string(), fixture(file)))
                .collect(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpGet for FixtureSite {
    async fn get(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        self.requested.lock().unwrap().push(request.url.clone());
        let Some(path) = self.pages.get(&request.url) else {
            return Err(FetchError::HttpStatus {
                status: 404,
                url: request.url.clone(),
            });
        };
        Ok(FetchedResponse {
            status: 200,
            final_url: request.url.clone(),
            body: std::fs::read(path).unwrap(),
        })
    }
}

#[test]
fn fixture_pages_exist() {
    assert!(fixture("kisumu-county/education-bursaries.html").exists());
    assert!(fixture("ministry-of-education/scholarships.html").exists());
}

#[tokio::test]
async fn kisumu_county_bursary_page() {
    let site = FixtureSite::new(&[(
        "https://www.kisumu.go.ke/education/bursaries",
        "kisumu-county/education-bursaries.html",
    )]);
    let mut params = SourceParams::new(
        "kisumu-county",
        "Kisumu County Government",
        "https://www.kisumu.go.ke",
    );
    params.county = Some("Kisumu".to_string());

    let drafts = county_portal_adapter().fetch(&site, &params).await;

    assert_eq!(
        site.requested.lock().unwrap().as_slice(),
        [
            "https://www.kisumu.go.ke/bursaries",
            "https://www.kisumu.go.ke/education/bursaries",
        ]
    );
    assert_eq!(drafts.len(), 2);

    let secondary = &drafts[0];
    assert_eq!(secondary.name.as_deref(), Some("Kisumu County Secondary Bursary"));
    assert_eq!(secondary.amount.as_deref(), Some("KES 10,000 per student"));
    assert_eq!(
        secondary.application_deadline.as_deref(),
        Some("2026-03-31T00:00:00Z")
    );
    assert_eq!(
        secondary.application_link.as_deref(),
        Some("https://www.kisumu.go.ke/forms/secondary-bursary.pdf")
    );
    assert!(secondary.eligibility.counties.contains("Kisumu"));

    let tertiary = &drafts[1];
    assert_eq!(tertiary.kind.as_deref(), Some("grant"));
    assert_eq!(tertiary.application_deadline, None);
    assert_eq!(
        tertiary.description.as_deref(),
        Some("Kisumu County Government Bursary Program")
    );

    let policy = ValidationPolicy::default();
    for draft in &drafts {
        let record = finalize(draft, &policy).unwrap();
        assert_eq!(record.provider, "Kisumu County Government");
    }
}

#[tokio::test]
async fn ministry_scholarship_table() {
    let site = FixtureSite::new(&[(
        "https://www.education.go.ke/scholarships",
        "ministry-of-education/scholarships.html",
    )]);
    let params = SourceParams::new(
        "moe-scholarships",
        "Ministry of Education",
        "https://www.education.go.ke",
    );

    let drafts = ministry_portal_adapter().fetch(&site, &params).await;
    let records: Vec<_> = drafts
        .iter()
        .map(|draft| finalize(draft, &ValidationPolicy::default()).unwrap())
        .collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "Presidential Secondary School Scholarship");
    assert_eq!(records[0].kind, OpportunityType::Scholarship);
    assert_eq!(
        records[0].application_deadline.map(|d| d.to_rfc3339()),
        Some("2026-01-15T00:00:00+00:00".to_string())
    );
    assert_eq!(records[1].kind, OpportunityType::Loan);
    assert_eq!(records[1].description, "Ministry of Education Loan Program");
    assert!(records.iter().all(|r| r.eligibility.is_empty()));
}
