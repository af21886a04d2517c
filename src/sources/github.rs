use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::GithubConfig;
use crate::credentials::Credential;
use crate::error::SourceError;
use crate::models::listing::{Listing, SourceId};
use crate::sources::{SourceAdapter, clean_text, http_client, read_body};

const API_BASE: &str = "https://api.github.com";
const CLOSED_MARKER: &str = "🔒";
const CONTINUATION_MARKER: &str = "↳";

/// Polls a listings file kept in a GitHub repository (markdown or HTML table).
pub struct RepoListingsAdapter {
    config: GithubConfig,
    token: Option<Credential>,
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

#[async_trait]
impl SourceAdapter for RepoListingsAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::Github
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError> {
        let document = self.fetch_document().await?;
        Ok(parse_listings(&document, Utc::now().date_naive()))
    }
}

impl RepoListingsAdapter {
    pub fn new(config: GithubConfig, token: Option<Credential>) -> Self {
        Self {
            config,
            token,
            client: http_client(),
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.config.owner,
            self.config.repo,
            self.config.path.trim_start_matches('/')
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token.expose()),
            None => req,
        }
    }

    /// Fetch the listings file through the contents API. Files too large for
    /// inline content come back with `encoding: "none"` and are read from
    /// `download_url` instead.
    async fn fetch_document(&self) -> Result<String, SourceError> {
        let resp = self
            .request(&self.contents_url())
            .query(&[("ref", self.config.branch.as_str())])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;
        let body = read_body(resp).await?;

        let contents: ContentsResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::parse(format!("contents response: {e}"), &body))?;

        match (contents.encoding.as_deref(), contents.content.as_deref()) {
            (Some("base64"), Some(content)) if !content.trim().is_empty() => {
                decode_content(content)
            }
            _ => {
                let Some(download_url) = contents.download_url.as_deref() else {
                    return Err(SourceError::parse(
                        "contents response has neither inline content nor download_url",
                        &body,
                    ));
                };
                tracing::debug!("Listings file too large for inline content, using {download_url}");
                let resp = self.request(download_url).send().await?;
                read_body(resp).await
            }
        }
    }
}

fn decode_content(content: &str) -> Result<String, SourceError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| SourceError::parse(format!("base64 content: {e}"), content))?;
    String::from_utf8(bytes).map_err(|e| SourceError::parse(format!("utf-8 content: {e}"), ""))
}

/// One table row before normalization.
#[derive(Debug, Default)]
struct RawRow {
    company: String,
    role: String,
    location: String,
    link: Option<String>,
    date: String,
    closed: bool,
}

/// Parse every open listing in a listings file.
///
/// `today` anchors relative ("3d") and year-less ("Oct 12") dates.
pub fn parse_listings(document: &str, today: NaiveDate) -> Vec<Listing> {
    let rows = if document.contains("<tr") {
        html_rows(document)
    } else {
        markdown_rows(document)
    };

    let mut listings = Vec::new();
    let mut previous_company = String::new();
    for row in rows {
        let company = if row.company.is_empty() || row.company.starts_with(CONTINUATION_MARKER) {
            previous_company.clone()
        } else {
            previous_company = row.company.clone();
            row.company
        };

        if row.closed || row.role.is_empty() {
            continue;
        }

        let url = row.link.unwrap_or_default();
        let external_id = listing_hash(&company, &row.role, &row.location, &url);
        let mut listing = Listing::new(SourceId::Github, external_id);
        listing.posted_at = parse_posted_date(&row.date, today)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
        if !row.date.is_empty() {
            listing.raw_fields.insert("date_posted".to_string(), row.date);
        }
        listing.company = company;
        listing.title = row.role;
        listing.location = row.location;
        listing.url = url;
        listings.push(listing);
    }
    listings
}

/// Stable identity of a table row: SHA-256 over its normalized cells.
pub fn listing_hash(company: &str, role: &str, location: &str, link: &str) -> String {
    let line = [company, role, location, link]
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    hex::encode(hasher.finalize())
}

fn markdown_rows(document: &str) -> Vec<RawRow> {
    let mut rows = Vec::new();
    for line in document.lines() {
        let line = line.trim();
        if !line.starts_with('|') {
            continue;
        }
        let cells: Vec<&str> = line.trim_matches('|').split('|').map(str::trim).collect();
        if cells.len() < 4 {
            continue;
        }
        let is_separator = cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')));
        if is_separator || cells[0].eq_ignore_ascii_case("company") {
            continue;
        }

        rows.push(RawRow {
            company: cell_text(cells[0]),
            role: cell_text(cells[1]),
            location: cell_text(cells[2]),
            link: cell_link(cells[3]),
            date: cells.get(4).map(|c| cell_text(c)).unwrap_or_default(),
            closed: cells.iter().any(|c| c.contains(CLOSED_MARKER)),
        });
    }
    rows
}

fn html_rows(document: &str) -> Vec<RawRow> {
    let html = Html::parse_document(document);
    let (Ok(tr), Ok(td), Ok(a)) = (
        Selector::parse("tr"),
        Selector::parse("td"),
        Selector::parse("a[href]"),
    ) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for row in html.select(&tr) {
        let cells: Vec<ElementRef> = row.select(&td).collect();
        if cells.len() < 4 {
            continue;
        }
        let text = |el: &ElementRef| clean_text(&el.text().collect::<Vec<_>>().join(" "));
        rows.push(RawRow {
            company: strip_emphasis(&text(&cells[0])),
            role: strip_emphasis(&text(&cells[1])),
            location: text(&cells[2]),
            link: cells[3]
                .select(&a)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(str::to_string),
            date: cells.get(4).map(text).unwrap_or_default(),
            closed: cells.iter().any(|c| c.html().contains(CLOSED_MARKER)),
        });
    }
    rows
}

/// Plain text of a markdown cell that may embed links or inline HTML.
fn cell_text(cell: &str) -> String {
    let text = if cell.contains('<') {
        let fragment = Html::parse_fragment(cell);
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        cell.to_string()
    };
    strip_emphasis(&clean_text(&strip_markdown_links(&text)))
}

/// Replace `[text](target)` with `text`.
fn strip_markdown_links(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find("](").map(|i| open + i) else {
            break;
        };
        let Some(end) = rest[close..].find(')').map(|i| close + i) else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&rest[open + 1..close]);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

fn strip_emphasis(s: &str) -> String {
    s.replace("**", "").trim_matches(['*', '_', ' ']).to_string()
}

/// First link target in a cell: an HTML `href` or a markdown `(target)`.
fn cell_link(cell: &str) -> Option<String> {
    if cell.contains("href") {
        let fragment = Html::parse_fragment(cell);
        let a = Selector::parse("a[href]").ok()?;
        if let Some(href) = fragment
            .select(&a)
            .next()
            .and_then(|el| el.value().attr("href"))
        {
            return Some(href.to_string());
        }
    }
    let start = cell.find("](")? + 2;
    let end = cell[start..].find(')')? + start;
    let target = cell[start..end].trim();
    (!target.is_empty()).then(|| target.to_string())
}

/// Accepts "Oct 12", "Oct 12, 2024", "0d", "3d" and "2mo". Out-of-range ages
/// yield `None`. A year-less date is placed in the latest year that puts it
/// on or before `today`, so "Feb 29" lands in the last leap year.
fn parse_posted_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(months) = raw.strip_suffix("mo").and_then(|n| n.parse::<i64>().ok()) {
        return days_before(today, months.checked_mul(30)?);
    }
    if let Some(days) = raw.strip_suffix('d').and_then(|n| n.parse::<i64>().ok()) {
        return days_before(today, days);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%b %d, %Y") {
        return Some(date);
    }
    (0..=4)
        .filter_map(|back| {
            NaiveDate::parse_from_str(&format!("{raw} {}", today.year() - back), "%b %d %Y").ok()
        })
        .find(|date| *date <= today)
}

fn days_before(today: NaiveDate, days: i64) -> Option<NaiveDate> {
    today.checked_sub_signed(ChronoDuration::try_days(days)?)
}
