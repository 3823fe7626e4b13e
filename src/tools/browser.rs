use futures::future::BoxFuture;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::tools::safety::truncate_string;
use crate::tools::schemas::{Param, Signature};
use crate::tools::{Tool, ToolArgs, ToolError};

const MAX_CONTENT_CHARS: usize = 200_000;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

fn script_or_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")
            .expect("script/style pattern is valid")
    })
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("tag pattern is valid"))
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n(\s*\n)+").expect("blank line pattern is valid"))
}

/// Drops script and style bodies, then every remaining tag.
pub fn extract_text_content(html: &str) -> String {
    let text = script_or_style().replace_all(html, "");
    let text = any_tag().replace_all(&text, "");
    let text = blank_runs().replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn cap_content(text: &str, max_chars: usize) -> String {
    match truncate_string(text, max_chars) {
        (text, true) => format!("{}\n\n[content truncated to {} characters]", text, max_chars),
        (text, false) => text,
    }
}

const OPEN_URL_DOC: &str = r#"Open a URL and return the visible text content of the page.

    Scripts, styles and HTML tags are stripped, so the result is the readable text of the
    page. Very long pages are truncated. Use this on the `link` field of results from
    `search_google_and_return_list_of_results` to read them.

    Args:
        url (str): The full URL to open, including the scheme (ex: "https://example.com").
    "#;

pub struct OpenUrlTool {
    http: Client,
}

impl OpenUrlTool {
    pub fn new(timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        info!(url, "fetching page");
        let response = self.http.get(url).send().await?.error_for_status()?;
        let html = response.text().await?;
        Ok(cap_content(&extract_text_content(&html), MAX_CONTENT_CHARS))
    }
}

impl Tool for OpenUrlTool {
    fn signature(&self) -> Signature {
        Signature::new("open_url_and_get_text_content", OPEN_URL_DOC).param(Param::required::<String>("url"))
    }

    fn call(&self, args: ToolArgs) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(async move {
            let url: String = args.get("url")?;
            Ok(Value::String(self.fetch(&url).await?))
        })
    }
}
