//! Portal adapters for the three provider families.

use async_trait::async_trait;
use chrono::Utc;
use fof_core::{
    clean_text, normalize_amount, normalize_deadline, ContactInfo, Eligibility, OpportunityDraft,
    OpportunityType, Provenance,
};
use fof_storage::{FetchRequest, HttpGet};
use tracing::{debug, info, warn};

use crate::selectors::{candidate_url, extract_listings, resolve_link, ExtractionProfile, FieldRule, RawListing};
use crate::{ProviderFamily, SourceAdapter, SourceParams};

const MINISTRY_PROFILE: ExtractionProfile = ExtractionProfile {
    item_selectors: &[
        ".scholarship-item",
        ".bursary-item",
        ".views-row",
        "article.scholarship",
        "table tbody tr",
    ],
    name: &[
        FieldRule::Text(".scholarship-title"),
        FieldRule::Text(".title"),
        FieldRule::Text("h3"),
        FieldRule::Text("h2"),
        FieldRule::Text("td:nth-child(1)"),
    ],
    amount: &[
        FieldRule::Text(".amount"),
        FieldRule::Text(".value"),
        FieldRule::Text("td:nth-child(2)"),
    ],
    deadline: &[
        FieldRule::Attr("time[datetime]", "datetime"),
        FieldRule::Text(".deadline"),
        FieldRule::Text(".closing-date"),
        FieldRule::Text("td:nth-child(3)"),
    ],
    description: &[
        FieldRule::Text(".description"),
        FieldRule::Text(".summary"),
        FieldRule::Text("p"),
    ],
    link: &[
        FieldRule::Attr("a.apply[href]", "href"),
        FieldRule::Attr("a[href]", "href"),
    ],
    constituency: &[],
};

const CONSTITUENCY_FUND_PROFILE: ExtractionProfile = ExtractionProfile {
    item_selectors: &[".bursary-item", ".bursary", ".card", "table tbody tr"],
    name: &[
        FieldRule::Text(".bursary-title"),
        FieldRule::Text(".card-title"),
        FieldRule::Text("h3"),
        FieldRule::Text("h4"),
        FieldRule::Text("td:nth-child(1)"),
    ],
    amount: &[FieldRule::Text(".amount"), FieldRule::Text("td:nth-child(3)")],
    deadline: &[
        FieldRule::Attr("time[datetime]", "datetime"),
        FieldRule::Text(".deadline"),
        FieldRule::Text("td:nth-child(4)"),
    ],
    description: &[FieldRule::Text(".description"), FieldRule::Text("p")],
    link: &[
        FieldRule::Attr("a.apply[href]", "href"),
        FieldRule::Attr("a[href]", "href"),
    ],
    constituency: &[FieldRule::Text(".constituency"), FieldRule::Text("td:nth-child(2)")],
};

const COUNTY_PROFILE: ExtractionProfile = ExtractionProfile {
    item_selectors: &[
        ".bursary-item",
        ".bursary",
        ".scholarship",
        ".news-item",
        "table tbody tr",
    ],
    name: &[
        FieldRule::Text(".bursary-title"),
        FieldRule::Text(".title"),
        FieldRule::Text("h3"),
        FieldRule::Text("h2"),
        FieldRule::Text("h4"),
        FieldRule::Text("td:nth-child(1)"),
    ],
    amount: &[FieldRule::Text(".amount"), FieldRule::Text("td:nth-child(2)")],
    deadline: &[
        FieldRule::Attr("time[datetime]", "datetime"),
        FieldRule::Text(".deadline"),
        FieldRule::Text(".date"),
        FieldRule::Text("td:nth-child(3)"),
    ],
    description: &[
        FieldRule::Text(".description"),
        FieldRule::Text(".excerpt"),
        FieldRule::Text("p"),
    ],
    link: &[
        FieldRule::Attr("a.apply[href]", "href"),
        FieldRule::Attr("a[href]", "href"),
    ],
    constituency: &[],
};

const MINISTRY_PATHS: &[&str] = &["/scholarships"];
const CONSTITUENCY_FUND_PATHS: &[&str] = &["/bursaries"];
const COUNTY_PATHS: &[&str] = &[
    "/bursaries",
    "/education/bursaries",
    "/departments/education/bursaries",
    "/bursary",
    "/scholarships",
    "/education",
];

/// HTML listing adapter parameterized by provider family.
#[derive(Debug, Clone, Copy)]
pub struct PortalAdapter {
    adapter_id: &'static str,
    family: ProviderFamily,
    default_paths: &'static [&'static str],
    profile: ExtractionProfile,
    default_kind: OpportunityType,
}

pub fn ministry_portal_adapter() -> PortalAdapter {
    PortalAdapter {
        adapter_id: "ministry-portal",
        family: ProviderFamily::MinistryPortal,
        default_paths: MINISTRY_PATHS,
        profile: MINISTRY_PROFILE,
        default_kind: OpportunityType::Scholarship,
    }
}

pub fn constituency_fund_adapter() -> PortalAdapter {
    PortalAdapter {
        adapter_id: "constituency-fund",
        family: ProviderFamily::ConstituencyFund,
        default_paths: CONSTITUENCY_FUND_PATHS,
        profile: CONSTITUENCY_FUND_PROFILE,
        default_kind: OpportunityType::Bursary,
    }
}

pub fn county_portal_adapter() -> PortalAdapter {
    PortalAdapter {
        adapter_id: "county-portal",
        family: ProviderFamily::CountyPortal,
        default_paths: COUNTY_PATHS,
        profile: COUNTY_PROFILE,
        default_kind: OpportunityType::Bursary,
    }
}

/// Keyword hint from the listing name, else the family default.
fn infer_kind(name: &str, fallback: OpportunityType) -> OpportunityType {
    let lower = name.to_ascii_lowercase();
    [
        ("scholarship", OpportunityType::Scholarship),
        ("bursar", OpportunityType::Bursary),
        ("grant", OpportunityType::Grant),
        ("loan", OpportunityType::Loan),
        ("internship", OpportunityType::Internship),
        ("mentorship", OpportunityType::Mentorship),
        ("bootcamp", OpportunityType::Bootcamp),
    ]
    .into_iter()
    .find(|(needle, _)| lower.contains(needle))
    .map(|(_, kind)| kind)
    .unwrap_or(fallback)
}

impl PortalAdapter {
    fn default_description(&self, params: &SourceParams, kind: OpportunityType) -> String {
        match self.family {
            ProviderFamily::MinistryPortal => format!("{} {} Program", params.provider, kind.label()),
            ProviderFamily::ConstituencyFund | ProviderFamily::CountyPortal => {
                format!("{} Bursary Program", params.provider)
            }
        }
    }

    fn eligibility_for(&self, listing: &RawListing, params: &SourceParams) -> Eligibility {
        match self.family {
            ProviderFamily::MinistryPortal => Eligibility::default(),
            ProviderFamily::ConstituencyFund => listing
                .constituency
                .clone()
                .or_else(|| params.constituency.clone())
                .and_then(|c| clean_text(&c))
                .map(Eligibility::for_constituency)
                .unwrap_or_default(),
            ProviderFamily::CountyPortal => params
                .county
                .as_deref()
                .and_then(clean_text)
                .map(Eligibility::for_county)
                .unwrap_or_default(),
        }
    }

    fn to_draft(&self, listing: RawListing, params: &SourceParams, page_url: &str) -> OpportunityDraft {
        let kind = infer_kind(&listing.name, self.default_kind);
        let eligibility = self.eligibility_for(&listing, params);
        let description = listing
            .description
            .as_deref()
            .and_then(clean_text)
            .unwrap_or_else(|| self.default_description(params, kind));

        OpportunityDraft {
            name: Some(listing.name),
            provider: Some(params.provider.clone()),
            kind: Some(kind.as_str().to_string()),
            description: Some(description),
            amount: listing.amount.as_deref().and_then(normalize_amount),
            application_deadline: listing.deadline.as_deref().and_then(normalize_deadline),
            application_link: listing
                .link
                .as_deref()
                .and_then(|href| resolve_link(page_url, href)),
            eligibility,
            contact_info: ContactInfo {
                source: Some(params.display_name.clone()),
                website: Some(params.base_url.clone()),
            },
            provenance: Some(Provenance {
                source_id: params.source_id.clone(),
                source_url: Some(page_url.to_string()),
                fetched_at: Utc::now(),
                extractor: self.adapter_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl SourceAdapter for PortalAdapter {
    fn adapter_id(&self) -> &'static str {
        self.adapter_id
    }

    fn family(&self) -> ProviderFamily {
        self.family
    }

    fn candidate_paths(&self, params: &SourceParams) -> Vec<String> {
        if params.candidate_paths.is_empty() {
            self.default_paths.iter().map(|p| p.to_string()).collect()
        } else {
            params.candidate_paths.clone()
        }
    }

    async fn fetch(&self, http: &dyn HttpGet, params: &SourceParams) -> Vec<OpportunityDraft> {
        for path in self.candidate_paths(params) {
            let url = candidate_url(&params.base_url, &path);
            let request = FetchRequest::browser(&url, params.timeout);

            let response = match http.get(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(source_id = %params.source_id, %url, error = %err, "candidate path failed");
                    continue;
                }
            };

            let listings = extract_listings(&response.text(), &self.profile);
            if listings.is_empty() {
                debug!(source_id = %params.source_id, %url, "no listing selector matched");
                continue;
            }

            info!(
                source_id = %params.source_id,
                %url,
                records = listings.len(),
                "extracted listings"
            );
            return listings
                .into_iter()
                .map(|listing| self.to_draft(listing, params, &response.final_url))
                .collect();
        }

        Vec::new()
    }
}
