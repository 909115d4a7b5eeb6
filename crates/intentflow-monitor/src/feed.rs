//! HTTP polling provider.
//!
//! Issues `GET <url>?since=<rfc3339>` and accepts either a JSON array of
//! [`RawItem`]s or an object with an `items` array.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{MonitorError, Result};
use crate::provider::{EventProvider, RawItem};

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedBody {
    List(Vec<RawItem>),
    Wrapped { items: Vec<RawItem> },
}

/// Polls a JSON feed endpoint.
#[derive(Debug, Clone)]
pub struct HttpFeedProvider {
    name: String,
    http: reqwest::Client,
    url: url::Url,
    bearer_token: Option<String>,
}

impl HttpFeedProvider {
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self> {
        let url = url::Url::parse(url).map_err(|e| MonitorError::InvalidConfig {
            reason: format!("invalid feed url `{url}`: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonitorError::InvalidConfig {
                reason: format!("feed url must be http or https, got `{}`", url.scheme()),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent("intentflow-monitor/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MonitorError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            name: name.into(),
            http,
            url,
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl EventProvider for HttpFeedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));

        let mut request = self.http.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::provider(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::provider(&self.name, format!("feed returned HTTP {status}")));
        }

        let body: FeedBody = response
            .json()
            .await
            .map_err(|e| MonitorError::provider(&self.name, format!("malformed feed body: {e}")))?;
        let items = match body {
            FeedBody::List(items) | FeedBody::Wrapped { items } => items,
        };
        debug!(provider = %self.name, count = items.len(), "feed fetched");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn since() -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn fetches_items_since_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inbox"))
            .and(query_param("since", "2026-03-01T10:00:00Z"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "m-1", "subject": "Refill", "body": "time to refill"},
                {"id": "m-2", "body": "hello"}
            ])))
            .mount(&server)
            .await;

        let provider = HttpFeedProvider::new("inbox", &format!("{}/inbox", server.uri()))
            .unwrap()
            .with_bearer_token("s3cret");
        let items = provider.fetch_since(since()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].subject.as_deref(), Some("Refill"));
    }

    #[tokio::test]
    async fn accepts_wrapped_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"id": "x"}]})))
            .mount(&server)
            .await;
        let provider = HttpFeedProvider::new("feed", &server.uri()).unwrap();
        assert_eq!(provider.fetch_since(since()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn error_status_fails_the_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let provider = HttpFeedProvider::new("feed", &server.uri()).unwrap();
        let err = provider.fetch_since(since()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Provider { .. }));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpFeedProvider::new("f", "ftp://example.com/feed").is_err());
        assert!(HttpFeedProvider::new("f", "not a url").is_err());
    }
}
