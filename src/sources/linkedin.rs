use async_trait::async_trait;
use chrono::NaiveDate;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use scraper::{ElementRef, Html, Selector};

use crate::config::LinkedinConfig;
use crate::credentials::Credential;
use crate::error::SourceError;
use crate::models::listing::{Listing, SourceId};
use crate::sources::{SourceAdapter, clean_text, http_client, read_body};

/// Characters left as-is in query values (RFC 3986 unreserved).
const QUERY_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SEARCH_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";
const POSTING_URN_PREFIX: &str = "urn:li:jobPosting:";

/// Scrapes the public job search results page.
pub struct SearchPageAdapter {
    config: LinkedinConfig,
    session_cookie: Option<Credential>,
    client: reqwest::Client,
    search_url: String,
}

#[async_trait]
impl SourceAdapter for SearchPageAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::Linkedin
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError> {
        let mut req = self
            .client
            .get(self.search_url())
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.8");
        if let Some(cookie) = &self.session_cookie {
            req = req.header("Cookie", format!("li_at={}", cookie.expose()));
        }

        let body = read_body(req.send().await?).await?;
        parse_search_page(&body)
    }
}

impl SearchPageAdapter {
    pub fn new(config: LinkedinConfig, session_cookie: Option<Credential>) -> Self {
        Self {
            config,
            session_cookie,
            client: http_client(),
            search_url: SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    /// Full search URL with the configured parameters, in key order.
    pub fn search_url(&self) -> String {
        if self.config.search_params.is_empty() {
            return self.search_url.clone();
        }
        let query = self
            .config
            .search_params
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(k, QUERY_VALUE_SET),
                    utf8_percent_encode(v, QUERY_VALUE_SET)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.search_url)
    }
}

struct CardSelectors {
    card: Selector,
    title: Selector,
    company: Selector,
    location: Selector,
    link: Selector,
    time: Selector,
    salary: Selector,
}

impl CardSelectors {
    fn new() -> Option<Self> {
        Some(Self {
            card: Selector::parse("div.base-card, div[data-entity-urn], li[data-entity-urn]")
                .ok()?,
            title: Selector::parse(".base-search-card__title").ok()?,
            company: Selector::parse(".base-search-card__subtitle").ok()?,
            location: Selector::parse(".job-search-card__location").ok()?,
            link: Selector::parse("a.base-card__full-link[href]").ok()?,
            time: Selector::parse("time[datetime]").ok()?,
            salary: Selector::parse(".job-search-card__salary-info").ok()?,
        })
    }
}

/// Parse a search results page into listings.
///
/// An empty result page yields no listings; a login wall or challenge page
/// is an authentication failure.
pub fn parse_search_page(body: &str) -> Result<Vec<Listing>, SourceError> {
    let Some(sel) = CardSelectors::new() else {
        return Err(SourceError::parse("invalid card selectors", ""));
    };
    let document = Html::parse_document(body);

    let mut listings = Vec::new();
    let mut seen_cards = 0usize;
    for card in document.select(&sel.card) {
        // `div.base-card` nested inside `li[data-entity-urn]` would match twice.
        if card
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| sel.card.matches(&a))
        {
            continue;
        }
        seen_cards += 1;
        if let Some(listing) = parse_card(card, &sel) {
            listings.push(listing);
        }
    }

    if seen_cards == 0 && looks_like_login_wall(body) {
        return Err(SourceError::Auth {
            status: None,
            message: "search page returned a login wall".to_string(),
        });
    }
    if seen_cards > 0 && listings.is_empty() {
        return Err(SourceError::parse(
            format!("{seen_cards} job cards found but none could be read"),
            body,
        ));
    }
    Ok(listings)
}

fn parse_card(card: ElementRef, sel: &CardSelectors) -> Option<Listing> {
    let text_of = |selector: &Selector| {
        card.select(selector)
            .next()
            .map(|el| clean_text(&el.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default()
    };

    let url = card
        .select(&sel.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(canonical_url)
        .unwrap_or_default();

    let urn = card.value().attr("data-entity-urn").or_else(|| {
        card.select(&Selector::parse("[data-entity-urn]").ok()?)
            .next()
            .and_then(|el| el.value().attr("data-entity-urn"))
    });
    let external_id = urn
        .and_then(|u| u.strip_prefix(POSTING_URN_PREFIX))
        .map(str::to_string)
        .or_else(|| (!url.is_empty()).then(|| url.clone()))?;

    let mut listing = Listing::new(SourceId::Linkedin, external_id);
    listing.title = text_of(&sel.title);
    listing.company = text_of(&sel.company);
    listing.location = text_of(&sel.location);
    listing.url = url;
    listing.posted_at = card
        .select(&sel.time)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    let salary = text_of(&sel.salary);
    if !salary.is_empty() {
        listing.raw_fields.insert("salary_range".to_string(), salary);
    }
    Some(listing)
}

/// Strip tracking query parameters from a posting link.
fn canonical_url(href: &str) -> String {
    href.split(['?', '#']).next().unwrap_or(href).to_string()
}

fn looks_like_login_wall(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("authwall") || lower.contains("/checkpoint/challenge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const PAGE: &str = r##"
<li>
  <div class="base-card job-search-card" data-entity-urn="urn:li:jobPosting:3912345678">
    <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/software-engineer-new-grad-at-acme-3912345678?refId=abc&trackingId=xyz"></a>
    <div class="base-search-card__info">
      <h3 class="base-search-card__title">
        Software Engineer, New Grad
      </h3>
      <h4 class="base-search-card__subtitle"><a href="#">Acme Corp</a></h4>
      <div class="base-search-card__metadata">
        <span class="job-search-card__location">New York, NY</span>
        <span class="job-search-card__salary-info">$120K - $150K</span>
        <time class="job-search-card__listdate" datetime="2025-03-08">2 days ago</time>
      </div>
    </div>
  </div>
</li>
<li>
  <div class="base-card job-search-card">
    <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/backend-engineer-at-globex-3911111111?position=2"></a>
    <h3 class="base-search-card__title">Backend Engineer</h3>
    <h4 class="base-search-card__subtitle">Globex</h4>
    <span class="job-search-card__location">Remote</span>
  </div>
</li>
"##;

    #[test]
    fn cards_become_listings() {
        let listings = parse_search_page(PAGE).unwrap();
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.external_id, "3912345678");
        assert_eq!(first.title, "Software Engineer, New Grad");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location, "New York, NY");
        assert_eq!(
            first.url,
            "https://www.linkedin.com/jobs/view/software-engineer-new-grad-at-acme-3912345678"
        );
        assert_eq!(first.raw("salary_range"), Some("$120K - $150K"));
        assert_eq!(
            first.posted_at.map(|d| d.date_naive()),
            NaiveDate::from_ymd_opt(2025, 3, 8)
        );
    }

    #[test]
    fn card_without_urn_is_keyed_by_canonical_url() {
        let listings = parse_search_page(PAGE).unwrap();
        assert_eq!(
            listings[1].external_id,
            "https://www.linkedin.com/jobs/view/backend-engineer-at-globex-3911111111"
        );
        assert!(listings[1].posted_at.is_none());
    }

    #[test]
    fn empty_page_is_not_an_error() {
        assert!(parse_search_page("").unwrap().is_empty());
        assert!(parse_search_page("<html><body></body></html>").unwrap().is_empty());
    }

    #[test]
    fn login_wall_is_an_auth_error() {
        let page = r#"<html><body><form action="/authwall">Sign in</form></body></html>"#;
        let err = parse_search_page(page).unwrap_err();
        assert_eq!(err.kind(), crate::error::SourceErrorKind::Auth);
    }

    #[test]
    fn search_url_encodes_params() {
        let mut params = BTreeMap::new();
        params.insert("keywords".to_string(), "software engineer new grad".to_string());
        params.insert("location".to_string(), "United States".to_string());
        params.insert("f_E".to_string(), "2".to_string());
        let adapter = SearchPageAdapter::new(
            LinkedinConfig {
                enabled: true,
                search_params: params,
            },
            None,
        )
        .with_search_url("https://example.test/search");
        assert_eq!(
            adapter.search_url(),
            "https://example.test/search?f_E=2&keywords=software%20engineer%20new%20grad&location=United%20States"
        );
    }
}
