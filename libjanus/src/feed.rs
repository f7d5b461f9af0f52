//! HTTP client for the paginated feed backend
//!
//! Pages come back as `{"data": [...], "paging": {"next": "<url>"}}`. The
//! `next` URL already carries every query parameter, so follow-up pages are
//! fetched as-is. Rate-limit responses are retried with exponential backoff
//! (1s, 2s, 4s, ...) up to `max_attempts`.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{FeedConfig, FEED_TOKEN_ENV};
use crate::error::{FeedError, JanusError, Result};
use crate::sources::SourceQuery;

/// Fields requested for every post, with three levels of nested comments
pub const FIELDS: &str = "from,id,message,created_time,status_type,\
comments.summary(true){from,id,like_count,message,created_time,\
comments{from,like_count,created_time,message,\
comments{from,like_count,created_time,message}}},\
likes.summary(true){name},shares,type,source,picture,link,permalink_url";

/// Backend error codes that mean "slow down"
const RATE_LIMIT_CODES: [i64; 4] = [4, 17, 32, 613];

/// Backend error code for an invalid or expired token
const TOKEN_ERROR_CODE: i64 = 190;

/// One page of raw post payloads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub posts: Vec<Value>,
    pub next: Option<String>,
}

impl FeedPage {
    fn from_body(body: &Value) -> Self {
        let posts = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = body
            .pointer("/paging/next")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self { posts, next }
    }

    /// Whether pagination should stop after this page
    pub fn is_last(&self) -> bool {
        self.posts.is_empty() || self.next.is_none()
    }
}

pub struct FeedClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    page_size: u32,
    max_attempts: u32,
    backoff: Duration,
}

impl FeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(FeedError::from)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            page_size: config.page_size,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay (later retries double it)
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check that a token is available before any request goes out
    pub fn authenticate(&self) -> Result<()> {
        match self.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(FeedError::Authentication(format!(
                "no access token for {}. Set feed.access_token or {}",
                self.base_url, FEED_TOKEN_ENV
            ))
            .into()),
        }
    }

    /// Fetch the first page of a page's feed, honouring the query window
    pub async fn first_page(&self, page: &str, query: &SourceQuery) -> Result<FeedPage> {
        let url = format!("{}/{}/feed", self.base_url, page);
        let mut params = vec![
            ("fields".to_string(), FIELDS.to_string()),
            ("limit".to_string(), self.page_size.to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("since".to_string(), since.timestamp().to_string()));
        }
        if let Some(until) = query.until {
            params.push(("until".to_string(), until.timestamp().to_string()));
        }
        if let Some(filter) = query.filter.as_deref() {
            params.extend(filter_params(filter)?);
        }
        self.with_token(&mut params);

        let body = self.get_json(&url, &params).await?;
        Ok(FeedPage::from_body(&body))
    }

    /// Follow a `paging.next` cursor
    pub async fn next_page(&self, url: &str) -> Result<FeedPage> {
        let body = self.get_json(url, &[]).await?;
        Ok(FeedPage::from_body(&body))
    }

    /// Fetch one post by id with the full field set
    pub async fn fetch_post(&self, id: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, id);
        let mut params = vec![("fields".to_string(), FIELDS.to_string())];
        self.with_token(&mut params);
        self.get_json(&url, &params).await
    }

    fn with_token(&self, params: &mut Vec<(String, String)>) {
        if let Some(token) = &self.access_token {
            params.push(("access_token".to_string(), token.clone()));
        }
    }

    async fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        for attempt in 1..=self.max_attempts {
            match self.get_once(url, params).await {
                Ok(body) => {
                    if attempt > 1 {
                        debug!("Fetched {} on attempt {}", url, attempt);
                    }
                    return Ok(body);
                }
                Err(e) => {
                    let transient = matches!(e, FeedError::RateLimit(_) | FeedError::Network(_));
                    if transient && attempt < self.max_attempts {
                        let delay = self.backoff * 2_u32.pow(attempt - 1);
                        warn!(
                            "Transient feed error (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt, self.max_attempts, e, delay
                        );
                        sleep(delay).await;
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }

        Err(JanusError::Feed(FeedError::Network(format!(
            "giving up on {} after {} attempts",
            url, self.max_attempts
        ))))
    }

    async fn get_once(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> std::result::Result<Value, FeedError> {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if let Some(err) = classify(status.as_u16(), &body, &text) {
            return Err(err);
        }
        if body.is_null() {
            return Err(FeedError::Response(format!(
                "response from {} is not JSON",
                url
            )));
        }
        Ok(body)
    }
}

/// Map an error response onto the feed error taxonomy
fn classify(status: u16, body: &Value, text: &str) -> Option<FeedError> {
    let code = body.pointer("/error/code").and_then(Value::as_i64);
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or(text)
        .to_string();

    if status == 429 || code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c)) {
        return Some(FeedError::RateLimit(message));
    }
    if status == 401 || code == Some(TOKEN_ERROR_CODE) {
        return Some(FeedError::Authentication(message));
    }
    if !(200..300).contains(&status) || code.is_some() {
        return Some(FeedError::Request {
            status,
            detail: message,
        });
    }
    None
}

/// Parse a `key=value&key=value` filter into extra query parameters
pub fn filter_params(filter: &str) -> Result<Vec<(String, String)>> {
    filter
        .split('&')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(JanusError::InvalidInput(format!(
                "feed filter '{}' is not key=value",
                pair
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_parsing() {
        let page = FeedPage::from_body(&json!({
            "data": [{ "id": "1" }, { "id": "2" }],
            "paging": { "next": "https://graph.example.com/next" }
        }));
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.next.as_deref(), Some("https://graph.example.com/next"));
        assert!(!page.is_last());

        let last = FeedPage::from_body(&json!({ "data": [{ "id": "3" }] }));
        assert!(last.is_last());

        let empty = FeedPage::from_body(&json!({ "data": [], "paging": { "next": "x" } }));
        assert!(empty.is_last());
    }

    #[test]
    fn test_classify_rate_limits() {
        assert!(matches!(
            classify(429, &Value::Null, "slow down"),
            Some(FeedError::RateLimit(_))
        ));
        for code in RATE_LIMIT_CODES {
            let body = json!({ "error": { "code": code, "message": "limit" } });
            assert!(matches!(classify(400, &body, ""), Some(FeedError::RateLimit(_))));
        }
    }

    #[test]
    fn test_classify_other_failures() {
        let expired = json!({ "error": { "code": 190, "message": "token expired" } });
        assert!(matches!(
            classify(400, &expired, ""),
            Some(FeedError::Authentication(_))
        ));

        let missing = json!({ "error": { "code": 100, "message": "no such object" } });
        match classify(404, &missing, "") {
            Some(FeedError::Request { status, detail }) => {
                assert_eq!(status, 404);
                assert_eq!(detail, "no such object");
            }
            other => panic!("unexpected classification: {:?}", other),
        }

        assert!(classify(200, &json!({ "data": [] }), "").is_none());
    }

    #[test]
    fn test_filter_params() {
        let params = filter_params("with=location & locale=nb_NO").unwrap();
        assert_eq!(
            params,
            vec![
                ("with".to_string(), "location".to_string()),
                ("locale".to_string(), "nb_NO".to_string())
            ]
        );
        assert!(filter_params("").unwrap().is_empty());
        assert!(matches!(
            filter_params("oops"),
            Err(JanusError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_authenticate_requires_token() {
        let client = FeedClient::new(&FeedConfig::default()).unwrap();
        let err = client.authenticate().unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let config = FeedConfig {
            access_token: Some("abc".to_string()),
            ..Default::default()
        };
        assert!(FeedClient::new(&config).unwrap().authenticate().is_ok());
    }
}
