use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::tools::schemas::{Param, Signature};
use crate::tools::{Tool, ToolArgs, ToolError};

const SERP_API_URL: &str = "https://serpapi.com/search.json";

/// One entry of SerpAPI's `organic_results`, trimmed to the useful fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub displayed_link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub snippet_highlighted_words: Vec<String>,
    #[serde(default)]
    pub source: String,
}

pub fn parse_organic_results(response: &Value) -> Result<Vec<SearchResult>, ToolError> {
    let organic = response
        .get("organic_results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            let detail = response
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("response has no organic_results");
            ToolError::new("SearchError", detail)
        })?;

    organic
        .iter()
        .map(|r| serde_json::from_value(r.clone()).map_err(ToolError::from))
        .collect()
}

const SEARCH_DOC: &str = r#"Search Google and return the first page of results.

    Useful any time the user needs information from the web. You will usually need to use
    `open_url_and_get_text_content` on the `link` field of whatever result you want.

    Returns a list of dictionary objects, each representing a search result.

    Each search result contains:
        - position: The position of the search result on the page (ex: 1, 2, 3, etc).
        - title: Title of the linked content (ex: "Function Calling")
        - link: The actual link to visit to get the content
        - displayed_link: Link normally shown to user
        - snippet: Snippet of the result's content
        - snippet_highlighted_words: The primary words in the result content causing this to be selected as relevant
        - source: Where this result comes from (ex: "OpenAI")

    Args:
        search_query (str): String to use as the google search query (equivalent to typing it into the search bar in a browser).
    "#;

pub struct GoogleSearchTool {
    http: Client,
    api_key: Option<String>,
}

impl GoogleSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, api_key }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ToolError::new("MissingApiKey", "SERP_API_KEY is not set"))?;

        info!(query, "searching google");
        let response: Value = self
            .http
            .get(SERP_API_URL)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("location", "United States"),
                ("hl", "en"),
                ("gl", "us"),
                ("google_domain", "google.com"),
                ("api_key", api_key),
            ])
            .send()
            .await?
            .json()
            .await?;

        parse_organic_results(&response)
    }
}

impl Tool for GoogleSearchTool {
    fn signature(&self) -> Signature {
        Signature::new("search_google_and_return_list_of_results", SEARCH_DOC)
            .param(Param::required::<String>("search_query"))
    }

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(async move {
            let query: String = args.get("search_query")?;
            let results = self.search(&query).await?;
            Ok(Value::String(serde_json::to_string_pretty(&results)?))
        })
    }
}
