use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

// Fixed property names of the interview workspace schema.
pub const PROP_TITLE: &str = "タイトル";
pub const PROP_INTERVIEWEE: &str = "インタビュイー";
pub const PROP_INTERVIEWER: &str = "インタビュアー";
pub const PROP_MEMBER_NAME: &str = "Name";
pub const PROP_VIDEO_URL: &str = "動画URL";

/// One page of a paginated database query.
#[derive(Debug, Deserialize)]
pub struct QueryPage {
    pub results: Vec<Page>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct BlockList {
    results: Vec<Block>,
    next_cursor: Option<String>,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedPage {
    id: String,
}

pub struct NotionClient {
    http: reqwest::Client,
    token: String,
}

impl NotionClient {
    pub fn new(token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, token })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{BASE_URL}{path}"))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    /// POST one query page. The cursor comes from the previous page's response.
    pub async fn query_database(
        &self,
        database_id: &str,
        start_cursor: Option<&str>,
    ) -> Result<QueryPage> {
        let mut body = serde_json::json!({ "page_size": PAGE_SIZE });
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = Value::String(cursor.to_string());
        }
        let value = self
            .send_with_retry(
                || {
                    self.request(Method::POST, &format!("/databases/{database_id}/query"))
                        .json(&body)
                },
                "query database",
            )
            .await?;
        serde_json::from_value(value).context("query database: unexpected response shape")
    }

    /// Walk the cursor chain and collect every page of the database.
    /// Pagination is sequential: each fetch must finish before the next
    /// cursor is known.
    pub async fn query_all(&self, database_id: &str) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let batch = self.query_database(database_id, cursor.as_deref()).await?;
            pages.extend(batch.results);
            if !batch.has_more {
                break;
            }
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pages)
    }

    pub async fn create_page(&self, database_id: &str, properties: Value) -> Result<String> {
        let body = serde_json::json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        let value = self
            .send_with_retry(
                || self.request(Method::POST, "/pages").json(&body),
                "create page",
            )
            .await?;
        let created: CreatedPage =
            serde_json::from_value(value).context("create page: unexpected response shape")?;
        Ok(created.id)
    }

    pub async fn update_page(&self, page_id: &str, properties: Value) -> Result<()> {
        let body = serde_json::json!({ "properties": properties });
        self.send_with_retry(
            || {
                self.request(Method::PATCH, &format!("/pages/{page_id}"))
                    .json(&body)
            },
            "update page",
        )
        .await?;
        Ok(())
    }

    pub async fn list_block_children(&self, block_id: &str) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let value = self
                .send_with_retry(
                    || {
                        let mut req = self
                            .request(Method::GET, &format!("/blocks/{block_id}/children"))
                            .query(&[("page_size", PAGE_SIZE.to_string())]);
                        if let Some(c) = &cursor {
                            req = req.query(&[("start_cursor", c.clone())]);
                        }
                        req
                    },
                    "list block children",
                )
                .await?;
            let list: BlockList = serde_json::from_value(value)
                .context("list block children: unexpected response shape")?;
            blocks.extend(list.results);
            if !list.has_more {
                break;
            }
            match list.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(blocks)
    }

    pub async fn append_block_children(&self, block_id: &str, children: Value) -> Result<()> {
        let body = serde_json::json!({ "children": children });
        self.send_with_retry(
            || {
                self.request(Method::PATCH, &format!("/blocks/{block_id}/children"))
                    .json(&body)
            },
            "append block children",
        )
        .await?;
        Ok(())
    }

    /// Issue a request, retrying 429 and 5xx responses (and transport errors)
    /// with exponential backoff.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<Value>()
                        .await
                        .with_context(|| format!("{what}: malformed JSON response"));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt == MAX_RETRIES {
                        let body = resp.text().await.unwrap_or_default();
                        bail!("{what}: HTTP {status}: {body}");
                    }
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "{} returned HTTP {} (attempt {}/{}), backing off {:.1}s",
                        what,
                        status,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if attempt == MAX_RETRIES => {
                    return Err(anyhow::Error::new(e).context(format!("{what}: request failed")));
                }
                Err(e) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "{} failed: {} (attempt {}/{}), backing off {:.1}s",
                        what,
                        e,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
            attempt += 1;
        }
    }
}

impl Page {
    fn property(&self, name: &str) -> Result<&Value> {
        self.properties
            .get(name)
            .with_context(|| format!("Missing property '{name}'"))
    }

    /// First fragment's plain text of a rich text property. Ok(None) when the
    /// property holds no text.
    pub fn rich_text(&self, name: &str) -> Result<Option<String>> {
        let fragments = self
            .property(name)?
            .get("rich_text")
            .and_then(Value::as_array)
            .with_context(|| format!("Property '{name}' is not rich text"))?;
        Ok(first_plain_text(fragments))
    }

    /// Same as `rich_text` for a title-type property.
    pub fn title_text(&self, name: &str) -> Result<Option<String>> {
        let fragments = self
            .property(name)?
            .get("title")
            .and_then(Value::as_array)
            .with_context(|| format!("Property '{name}' is not a title"))?;
        Ok(first_plain_text(fragments))
    }

    /// Ids currently linked through a relation property.
    pub fn relation_ids(&self, name: &str) -> Result<Vec<String>> {
        let relations = self
            .property(name)?
            .get("relation")
            .and_then(Value::as_array)
            .with_context(|| format!("Property '{name}' is not a relation"))?;
        relations
            .iter()
            .map(|entry| {
                entry
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .with_context(|| format!("Relation entry in '{name}' has no id"))
            })
            .collect()
    }

    /// Value of a url property. Unset and empty urls are both Ok(None).
    pub fn url(&self, name: &str) -> Result<Option<String>> {
        match self.property(name)?.get("url") {
            Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            _ => bail!("Property '{name}' is not a url"),
        }
    }
}

fn first_plain_text(fragments: &[Value]) -> Option<String> {
    fragments
        .first()
        .and_then(|f| f.get("plain_text"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Tests ──
