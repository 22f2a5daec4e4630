use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;

use super::{ToolDeclaration, ToolExecutor};

const MAX_PAGE_CHARS: usize = 50_000;

/// Fetches a URL and returns the page's visible text.
pub struct WebFetchTool {
    client: Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebFetchInput {
    url: String,
}

impl WebFetchTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "web_fetch",
            "Fetches a URL and returns the text content of the page.",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch, MUST be a working URL"
                    }
                },
                "required": ["url"]
            }),
        )
    }
}

#[async_trait]
impl ToolExecutor for WebFetchTool {
    async fn execute(&self, arguments: Value) -> Result<Value> {
        let input: WebFetchInput = serde_json::from_value(arguments)?;

        let body = self
            .client
            .get(&input.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut text = extract_text(&body);
        if text.len() > MAX_PAGE_CHARS {
            text.truncate(floor_char_boundary(&text, MAX_PAGE_CHARS));
            text.push_str("\n…(truncated)");
        }
        Ok(Value::String(text))
    }
}

fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();
    let whitespace = Regex::new(r"\s+").unwrap();

    document
        .select(&body_selector)
        .flat_map(text_not_in_script)
        .map(|text| {
            let cleaned = text.replace(['\n', '\t'], " ");
            whitespace.replace_all(&cleaned, " ").trim().to_owned()
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_not_in_script(element: ElementRef) -> Vec<String> {
    element
        .children()
        .flat_map(|node| match node.value() {
            Node::Element(elem) if matches!(elem.name(), "script" | "style") => vec![],
            Node::Element(_) => text_not_in_script(ElementRef::wrap(node).unwrap()),
            Node::Text(text_node) => vec![text_node.text.to_string()],
            _ => vec![],
        })
        .collect()
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Performs a web search and returns the top results as
/// `{title, link, snippet}` triples.
pub struct WebSearchTool {
    client: Client,
    base_url: String,
    max_results: usize,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self {
            client: Client::new(),
            base_url: "https://duckduckgo.com/html/".to_string(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchInput {
    query: String,
}

impl WebSearchTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "google_web_search",
            "Searches the web and returns the top results with title, link and snippet.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query to look up"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    async fn execute(&self, arguments: Value) -> Result<Value> {
        let input: WebSearchInput = serde_json::from_value(arguments)?;

        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| crate::error::CoreError::internal(format!("bad search URL: {e}")))?;
        url.query_pairs_mut().append_pair("q", &input.query);

        let body = self.client.get(url).send().await?.text().await?;
        Ok(Value::Array(parse_results(&body, self.max_results)))
    }
}

fn parse_results(html: &str, max_results: usize) -> Vec<Value> {
    let document = Html::parse_document(html);
    let result_selector = Selector::parse(".web-result").unwrap();
    let title_selector = Selector::parse(".result__a").unwrap();
    let url_selector = Selector::parse(".result__url").unwrap();
    let snippet_selector = Selector::parse(".result__snippet").unwrap();

    let select_text = |result: ElementRef, selector: &Selector| -> Option<String> {
        Some(
            result
                .select(selector)
                .next()?
                .text()
                .collect::<Vec<_>>()
                .join("")
                .trim()
                .to_string(),
        )
    };

    document
        .select(&result_selector)
        .filter_map(|result| {
            let title = select_text(result, &title_selector)?;
            let link = select_text(result, &url_selector)?;
            let snippet = select_text(result, &snippet_selector)?;
            Some(json!({"title": title, "link": link, "snippet": snippet}))
        })
        .take(max_results)
        .collect()
}
