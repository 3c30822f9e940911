use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use deep_agent_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::{Client, StatusCode, Url, header};
use schemars::{JsonSchema, schema_for};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
// The HTML endpoint turns away clients that do not look like a browser.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; deep-agent/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// SafeSearch level of a web search.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    /// No filtering.
    Off,
    /// Filters explicit images and videos.
    #[default]
    Moderate,
    /// Filters all explicit results.
    Strict,
}

impl FromStr for SafeSearch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(SafeSearch::Off),
            "moderate" => Ok(SafeSearch::Moderate),
            "strict" => Ok(SafeSearch::Strict),
            _ => Err(format!(
                "`{s}` is not one of `off`, `moderate` or `strict`"
            )),
        }
    }
}

impl Display for SafeSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SafeSearch::Off => "off",
            SafeSearch::Moderate => "moderate",
            SafeSearch::Strict => "strict",
        })
    }
}

/// Restricts results to a recent period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, JsonSchema)]
pub enum TimeLimit {
    /// Past day.
    #[serde(rename = "d")]
    Day,
    /// Past week.
    #[serde(rename = "w")]
    Week,
    /// Past month.
    #[serde(rename = "m")]
    Month,
    /// Past year.
    #[serde(rename = "y")]
    Year,
}

impl TimeLimit {
    fn as_param(self) -> &'static str {
        match self {
            TimeLimit::Day => "d",
            TimeLimit::Week => "w",
            TimeLimit::Month => "m",
            TimeLimit::Year => "y",
        }
    }
}

/// Defaults of the `web_search` tool, used for parameters the model leaves
/// out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchSettings {
    /// Maximum number of results.
    pub max_results: usize,
    /// Region code, e.g. `us-en`.
    pub region: String,
    /// SafeSearch level.
    pub safesearch: SafeSearch,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 5,
            region: "us-en".to_owned(),
            safesearch: SafeSearch::Moderate,
        }
    }
}

/// A search request handed to a [`SearchProvider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchQuery {
    /// The search terms.
    pub query: String,
    /// Maximum number of results.
    pub max_results: usize,
    /// Region code, e.g. `us-en`.
    pub region: String,
    /// SafeSearch level.
    pub safesearch: SafeSearch,
    /// Optional recency filter.
    pub time: Option<TimeLimit>,
}

/// One search hit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Title of the page.
    pub title: String,
    /// A snippet of the page.
    pub body: String,
    /// URL of the page.
    pub href: String,
    /// Host part of `href`.
    pub hostname: String,
}

/// Error type for [`SearchProvider`].
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request could not be sent, or the body could not be read.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("search service responded with {0}")]
    Status(StatusCode),
    /// The endpoint is not a valid URL.
    #[error("invalid search endpoint `{0}`")]
    InvalidEndpoint(String),
    /// A CSS selector used to pick results apart is malformed.
    #[error("invalid result selector: {0}")]
    Selector(String),
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Runs a search.
    async fn search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// Searches with the HTML version of DuckDuckGo and scrapes the result
/// page.
#[derive(Clone, Debug)]
pub struct DuckDuckGo {
    client: Client,
    endpoint: String,
}

impl DuckDuckGo {
    /// Creates a provider using the public endpoint.
    #[inline]
    pub fn new() -> Self {
        Self::with_endpoint(DUCKDUCKGO_ENDPOINT)
    }

    /// Creates a provider using a custom endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(endpoint: S) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn request_url(&self, query: &SearchQuery) -> Result<Url, SearchError> {
        let kp = match query.safesearch {
            SafeSearch::Strict => "1",
            SafeSearch::Moderate => "-1",
            SafeSearch::Off => "-2",
        };
        let mut params = vec![
            ("q", query.query.as_str()),
            ("kl", query.region.as_str()),
            ("kp", kp),
        ];
        if let Some(time) = query.time {
            params.push(("df", time.as_param()));
        }
        Url::parse_with_params(&self.endpoint, params)
            .map_err(|_| SearchError::InvalidEndpoint(self.endpoint.clone()))
    }
}

impl Default for DuckDuckGo {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGo {
    async fn search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = self.request_url(query)?;
        debug!("searching: {}", query.query);
        let resp = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;
        // Throttled requests get a 202 with a challenge page.
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(SearchError::Status(status));
        }
        let page = resp.text().await?;
        parse_results(&page, query.max_results)
    }
}

fn selector(css: &str) -> Result<Selector, SearchError> {
    Selector::parse(css).map_err(|err| SearchError::Selector(err.to_string()))
}

/// Picks the organic results out of a result page, skipping ads and
/// entries without a link.
fn parse_results(
    page: &str,
    max_results: usize,
) -> Result<Vec<SearchResult>, SearchError> {
    let document = Html::parse_document(page);
    let result_sel = selector("div.result:not(.result--ad)")?;
    let title_sel = selector("a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut results = vec![];
    for element in document.select(&result_sel) {
        if results.len() >= max_results {
            break;
        }
        let Some(link) = element.select(&title_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href").and_then(target_url) else {
            continue;
        };
        let body = element
            .select(&snippet_sel)
            .next()
            .map(|snippet| collapse_text(snippet.text()))
            .unwrap_or_default();
        results.push(search_result(collapse_text(link.text()), body, href));
    }
    Ok(results)
}

/// Resolves a result link, unwrapping DuckDuckGo's `/l/?uddg=` redirects.
fn target_url(href: &str) -> Option<String> {
    let url = Url::parse(DUCKDUCKGO_ENDPOINT).ok()?.join(href).ok()?;
    if url.domain() == Some("duckduckgo.com") && url.path() == "/l/" {
        return url
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned());
    }
    Some(url.into())
}

fn collapse_text<'a>(text: impl Iterator<Item = &'a str>) -> String {
    let text: String = text.collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn search_result(title: String, body: String, href: String) -> SearchResult {
    let hostname = Url::parse(&href)
        .ok()
        .and_then(|url| url.host_str().map(ToOwned::to_owned))
        .unwrap_or_default();
    SearchResult {
        title,
        body,
        href,
        hostname,
    }
}

/// Input of [`WebSearchTool`].
#[derive(Deserialize, JsonSchema)]
pub struct WebSearchToolParameters {
    #[schemars(description = "The search query.")]
    query: String,
    #[schemars(description = "Maximum number of results to return.")]
    #[serde(default)]
    max_results: Option<usize>,
    #[schemars(description = "Region for search results, e.g. `us-en`.")]
    #[serde(default)]
    region: Option<String>,
    #[schemars(
        description = "Safe search level: `off`, `moderate` or `strict`."
    )]
    #[serde(default)]
    safesearch: Option<SafeSearch>,
    #[schemars(description = "Time filter: `d` (day), `w` (week), \
                              `m` (month) or `y` (year).")]
    #[serde(default)]
    time: Option<TimeLimit>,
}

/// A tool for searching the web.
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    settings: SearchSettings,
    parameter_schema: Value,
}

impl WebSearchTool {
    /// Creates a new web search tool.
    #[inline]
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        settings: SearchSettings,
    ) -> Self {
        WebSearchTool {
            provider,
            settings,
            parameter_schema: schema_for!(WebSearchToolParameters).to_value(),
        }
    }

    fn make_query(&self, input: WebSearchToolParameters) -> SearchQuery {
        SearchQuery {
            query: input.query,
            max_results: input
                .max_results
                .filter(|n| *n > 0)
                .unwrap_or(self.settings.max_results),
            region: input
                .region
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| self.settings.region.clone()),
            safesearch: input.safesearch.unwrap_or(self.settings.safesearch),
            time: input.time,
        }
    }
}

impl Tool for WebSearchTool {
    type Input = WebSearchToolParameters;

    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        r#"
Searches the web using DuckDuckGo.
Returns a JSON list of results, each with `title`, `body`, `href`
and `hostname`."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: WebSearchToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let provider = Arc::clone(&self.provider);
        let query = self.make_query(input);
        async move {
            let results = provider.search(&query).await.map_err(|err| {
                warn!("web search failed: {err}");
                ToolError::execution_error()
                    .with_reason(format!("web search failed: {err}"))
            })?;
            serde_json::to_string_pretty(&results).map_err(|err| {
                ToolError::execution_error().with_reason(format!("{err}"))
            })
        }
    }
}
