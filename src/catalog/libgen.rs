//! Library Genesis catalog client.
//!
//! Scrapes the mirror's `index.php` results table and resolves the
//! `get.php` download link from the `ads.php` mirror page.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use super::{Catalog, CatalogError, SearchResult};
use crate::config::CATALOG_HTTP_TIMEOUT_SECS;
use async_trait::async_trait;
use lazy_regex::lazy_regex;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, Response, StatusCode, Url};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Number of rows requested per search
const RESULTS_PER_PAGE: &str = "100";

/// MD5 parameter inside mirror links
static RE_MD5: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"md5=([0-9a-fA-F]{32})");

/// Runs of whitespace inside table cells
static RE_WHITESPACE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\s+");

/// Catalog client bound to one mirror
#[derive(Clone)]
pub struct LibgenCatalog {
    http: HttpClient,
    base: Url,
}

impl LibgenCatalog {
    /// Creates a client for the mirror at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` if the URL is invalid.
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        let base = Url::parse(base_url)
            .map_err(|e| CatalogError::Parse(format!("invalid mirror URL {base_url}: {e}")))?;
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(CATALOG_HTTP_TIMEOUT_SECS))
            .cookie_store(true)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        self.base
            .join(path)
            .map_err(|e| CatalogError::Parse(format!("invalid endpoint {path}: {e}")))
    }

    async fn fetch_page(&self, url: Url, query: &[(&str, &str)]) -> Result<String, CatalogError> {
        let response = self.http.get(url).query(query).send().await?;
        check_status(response).await?.text().await.map_err(Into::into)
    }
}

async fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        let wait = parse_retry_after(&response).unwrap_or_default();
        return Err(CatalogError::RateLimited { wait });
    }
    Err(CatalogError::Status(status))
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Catalog for LibgenCatalog {
    #[instrument(skip(self))]
    async fn search_title(&self, query: &str) -> Result<Vec<SearchResult>, CatalogError> {
        let url = self.endpoint("index.php")?;
        let html = self
            .fetch_page(
                url,
                &[
                    ("req", query),
                    ("columns[]", "t"),
                    ("objects[]", "f"),
                    ("topics[]", "l"),
                    ("res", RESULTS_PER_PAGE),
                    ("filesuns", "all"),
                ],
            )
            .await?;
        let results = parse_search_page(&html, &self.base)?;
        debug!(count = results.len(), "Parsed catalog results");
        Ok(results)
    }

    async fn resolve_direct_link(
        &self,
        result: &SearchResult,
    ) -> Result<Option<String>, CatalogError> {
        if result.direct_download_link.is_some() {
            return Ok(result.direct_download_link.clone());
        }
        let Some(md5) = result.md5.as_deref() else {
            warn!(title = %result.title, "Entry has no md5, cannot resolve a download link");
            return Ok(None);
        };
        let url = self.endpoint("ads.php")?;
        let html = self.fetch_page(url, &[("md5", md5)]).await?;
        Ok(parse_download_page(&html, &self.base))
    }
}

fn selector(css: &str) -> Result<Selector, CatalogError> {
    Selector::parse(css).map_err(|e| CatalogError::Parse(format!("bad selector {css}: {e}")))
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    let raw: String = cell.text().collect();
    RE_WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

fn absolute(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(String::from)
}

/// Parse the results table of a search page.
///
/// A page without the results table yields no results.
///
/// # Errors
///
/// Returns `CatalogError::Parse` if a selector cannot be built.
pub fn parse_search_page(html: &str, base: &Url) -> Result<Vec<SearchResult>, CatalogError> {
    let document = Html::parse_document(html);
    let rows = selector("table#tablelibgen tbody tr")?;
    let cells = selector("td")?;
    let links = selector("a[href]")?;
    let title_link = selector("a[href*='edition.php']")?;

    let mut results = Vec::new();
    for row in document.select(&rows) {
        let tds: Vec<ElementRef<'_>> = row.select(&cells).collect();
        if tds.len() < 9 {
            continue;
        }

        let title = tds[0]
            .select(&title_link)
            .map(|a| cell_text(&a))
            .find(|t| !t.is_empty())
            .unwrap_or_else(|| cell_text(&tds[0]));

        let mirrors: Vec<String> = tds[8]
            .select(&links)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| absolute(base, href))
            .collect();

        let md5 = mirrors
            .iter()
            .find_map(|m| RE_MD5.captures(m))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase());

        let id = tds[6]
            .select(&links)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| href.split("id=").nth(1))
            .map(|id| id.chars().take_while(char::is_ascii_digit).collect())
            .unwrap_or_default();

        results.push(SearchResult {
            id,
            title,
            author: cell_text(&tds[1]),
            publisher: cell_text(&tds[2]),
            year: cell_text(&tds[3]),
            language: cell_text(&tds[4]),
            pages: cell_text(&tds[5]),
            size: cell_text(&tds[6]),
            extension: cell_text(&tds[7]),
            md5,
            mirrors,
            direct_download_link: None,
        });
    }
    Ok(results)
}

/// Extract the direct `get.php` link from a mirror page.
#[must_use]
pub fn parse_download_page(html: &str, base: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let get_link = Selector::parse("a[href*='get.php']").ok()?;
    document
        .select(&get_link)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| absolute(base, href))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
<html><body>
<table id="tablelibgen"><thead><tr><th>Title</th></tr></thead><tbody>
<tr>
  <td><b><a href="series.php?id=9">Dune Chronicles</a></b><br>
      <a href="edition.php?id=111">Dune</a></td>
  <td>Frank   Herbert</td>
  <td>Ace</td>
  <td>1990</td>
  <td>English</td>
  <td>535</td>
  <td><a href="/file.php?id=4242">2 MB</a></td>
  <td>epub</td>
  <td><a href="/ads.php?md5=0123456789ABCDEF0123456789ABCDEF">[1]</a>
      <a href="https://annas-archive.org/md5/0123456789abcdef0123456789abcdef">[2]</a></td>
</tr>
<tr><td>broken row</td></tr>
<tr>
  <td><a href="edition.php?id=222">Dune Messiah</a></td>
  <td>Frank Herbert</td><td></td><td>1969</td><td>English</td><td>256</td>
  <td><a href="/file.php?id=5">900 kB</a></td><td>pdf</td><td></td>
</tr>
</tbody></table>
</body></html>"#;

    fn base() -> Url {
        Url::parse("https://libgen.example/").expect("valid base")
    }

    #[test]
    fn parses_rows_in_page_order() {
        let results = parse_search_page(SEARCH_PAGE, &base()).expect("parse");
        assert_eq!(results.len(), 2);

        let dune = &results[0];
        assert_eq!(dune.title, "Dune");
        assert_eq!(dune.author, "Frank Herbert");
        assert_eq!(dune.size, "2 MB");
        assert_eq!(dune.extension, "epub");
        assert_eq!(dune.id, "4242");
        assert_eq!(dune.md5.as_deref(), Some("0123456789abcdef0123456789abcdef"));
        assert_eq!(
            dune.mirrors[0],
            "https://libgen.example/ads.php?md5=0123456789ABCDEF0123456789ABCDEF"
        );
        assert!(dune.direct_download_link.is_none());

        assert_eq!(results[1].title, "Dune Messiah");
        assert!(results[1].md5.is_none());
    }

    #[test]
    fn page_without_table_has_no_results() {
        let results = parse_search_page("<html><body>nothing</body></html>", &base());
        assert!(matches!(results, Ok(ref v) if v.is_empty()));
    }

    #[test]
    fn finds_get_link_on_mirror_page() {
        let html = r#"<a href="/">home</a><a href="get.php?md5=abc&key=XYZ"><h2>GET</h2></a>"#;
        assert_eq!(
            parse_download_page(html, &base()).as_deref(),
            Some("https://libgen.example/get.php?md5=abc&key=XYZ")
        );
        assert!(parse_download_page("<p>no link</p>", &base()).is_none());
    }
}
