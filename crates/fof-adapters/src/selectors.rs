//! Selector chains: ordered extraction strategies with first-success-wins
//! semantics, applied to a fetched listing page.

use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use fof_core::clean_text;

/// One way of pulling a value out of a listing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Trimmed text of the first descendant matching the selector that has any.
    Text(&'static str),
    /// Attribute of the first descendant matching the selector that carries it.
    Attr(&'static str, &'static str),
}

impl FieldRule {
    pub fn apply(&self, element: &ElementRef<'_>) -> Option<String> {
        match self {
            FieldRule::Text(css) => {
                let selector = parse_selector(css)?;
                element
                    .select(&selector)
                    .find_map(|node| clean_text(&node.text().collect::<String>()))
            }
            FieldRule::Attr(css, attr) => {
                let selector = parse_selector(css)?;
                element
                    .select(&selector)
                    .find_map(|node| node.value().attr(attr).and_then(clean_text))
            }
        }
    }
}

/// First non-empty value produced by `rules`, in order.
pub fn first_value(element: &ElementRef<'_>, rules: &[FieldRule]) -> Option<String> {
    rules.iter().find_map(|rule| rule.apply(element))
}

/// Structural + field-level heuristics for one provider family.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionProfile {
    /// Tried in order; the first selector with at least one match is the only
    /// one used for the page.
    pub item_selectors: &'static [&'static str],
    pub name: &'static [FieldRule],
    pub amount: &'static [FieldRule],
    pub deadline: &'static [FieldRule],
    pub description: &'static [FieldRule],
    pub link: &'static [FieldRule],
    pub constituency: &'static [FieldRule],
}

/// Raw values lifted from one listing element, before defaults and normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawListing {
    pub name: String,
    pub amount: Option<String>,
    pub deadline: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub constituency: Option<String>,
}

pub(crate) fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(err) => {
            warn!(selector = css, error = %err, "ignoring invalid selector");
            None
        }
    }
}

/// Apply `profile` to an HTML document. Elements without a name are skipped:
/// a record without a name cannot be deduplicated.
pub fn extract_listings(html: &str, profile: &ExtractionProfile) -> Vec<RawListing> {
    let document = Html::parse_document(html);

    for css in profile.item_selectors {
        let Some(selector) = parse_selector(css) else {
            continue;
        };
        let items: Vec<ElementRef<'_>> = document.select(&selector).collect();
        if items.is_empty() {
            continue;
        }

        return items
            .iter()
            .filter_map(|item| {
                let name = first_value(item, profile.name)?;
                Some(RawListing {
                    name,
                    amount: first_value(item, profile.amount),
                    deadline: first_value(item, profile.deadline),
                    description: first_value(item, profile.description),
                    link: first_value(item, profile.link),
                    constituency: first_value(item, profile.constituency),
                })
            })
            .collect();
    }

    Vec::new()
}

/// Resolve `href` against the page it was found on; only http(s) links survive.
pub fn resolve_link(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(absolute) => absolute,
        Err(_) => Url::parse(page_url).ok()?.join(href).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// `base` + `path`, unless `path` is already absolute.
pub fn candidate_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_PROFILE: ExtractionProfile = ExtractionProfile {
        item_selectors: &[".bursary-item", ".bursary", "table tbody tr"],
        name: &[FieldRule::Text(".title"), FieldRule::Text("h3"), FieldRule::Text("td:nth-child(1)")],
        amount: &[FieldRule::Text(".amount"), FieldRule::Text("td:nth-child(2)")],
        deadline: &[FieldRule::Attr("time", "datetime"), FieldRule::Text(".deadline")],
        description: &[FieldRule::Text("p")],
        link: &[FieldRule::Attr("a", "href")],
        constituency: &[],
    };

    #[test]
    fn first_matching_structural_selector_wins() {
        let html = r#"
            <div class="bursary-item"><h3>Card Bursary</h3></div>
            <table><tbody><tr><td>Table Bursary</td><td>KES 1</td></tr></tbody></table>
        "#;
        let listings = extract_listings(html, &CARD_PROFILE);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Card Bursary");
    }

    #[test]
    fn falls_through_to_table_rows() {
        let html = r#"
            <table>
              <thead><tr><th>Name</th><th>Amount</th></tr></thead>
              <tbody>
                <tr><td>Needy Students Fund</td><td>KES 15,000</td></tr>
                <tr><td>Orphans Fund</td><td>Varies</td></tr>
              </tbody>
            </table>
        "#;
        let listings = extract_listings(html, &CARD_PROFILE);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[1].amount.as_deref(), Some("Varies"));
    }

    #[test]
    fn field_chains_prefer_earlier_rules_and_skip_blanks() {
        let html = r#"
            <div class="bursary">
              <span class="title">   </span>
              <h3>Fallback Name</h3>
              <time datetime="2026-03-31">end of March</time>
              <span class="deadline">31 March</span>
            </div>
        "#;
        let listings = extract_listings(html, &CARD_PROFILE);
        assert_eq!(listings[0].name, "Fallback Name");
        assert_eq!(listings[0].deadline.as_deref(), Some("2026-03-31"));
    }

    #[test]
    fn unparseable_html_yields_nothing() {
        assert!(extract_listings("", &CARD_PROFILE).is_empty());
        assert!(extract_listings("<<<>>> not html at all", &CARD_PROFILE).is_empty());
    }

    #[test]
    fn links_resolve_relative_to_page() {
        assert_eq!(
            resolve_link("https://kisumu.go.ke/education/bursaries", "/apply/form").as_deref(),
            Some("https://kisumu.go.ke/apply/form")
        );
        assert_eq!(
            resolve_link("https://kisumu.go.ke/education/", "form.pdf").as_deref(),
            Some("https://kisumu.go.ke/education/form.pdf")
        );
        assert_eq!(resolve_link("https://kisumu.go.ke/", "mailto:edu@kisumu.go.ke"), None);
        assert_eq!(resolve_link("https://kisumu.go.ke/", "#top"), None);
    }

    #[test]
    fn candidate_urls_join_cleanly() {
        assert_eq!(candidate_url("https://nakuru.go.ke/", "/bursaries"), "https://nakuru.go.ke/bursaries");
        assert_eq!(candidate_url("https://nakuru.go.ke", "bursaries"), "https://nakuru.go.ke/bursaries");
        assert_eq!(
            candidate_url("https://nakuru.go.ke", "https://other.go.ke/x"),
            "https://other.go.ke/x"
        );
    }
}
