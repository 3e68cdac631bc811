// Copyright 2025 Fusilli Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Elasticsearch implementation of [`SearchIndex`].

use super::config::ElasticsearchConfig;
use async_trait::async_trait;
use fusilli_core::index::{IndexError, SearchIndex};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Error type Elasticsearch reports when creating an index that exists.
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Search index backed by an Elasticsearch cluster.
///
/// Cloning is cheap; clones share the underlying HTTP connection pool.
///
/// # Examples
///
/// ```rust,no_run
/// use fusilli_core::index::SearchIndex;
/// use fusilli_destinations::elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), fusilli_core::index::IndexError> {
/// let config = ElasticsearchConfig::from_connection_string("http://localhost:9200")?;
/// let index = ElasticsearchIndex::new(config)?;
///
/// index.upsert("orders", "1", json!({ "amount": 10 })).await?;
/// assert_eq!(index.get("orders", "1").await?, Some(json!({ "amount": 10 })));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchIndex {
    /// Creates an index client. No request is sent until the first call.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Configuration` if the HTTP client cannot be built
    /// (for example when no TLS backend is available).
    pub fn new(config: ElasticsearchConfig) -> Result<Self, IndexError> {
        info!(
            url = %config.url,
            timeout_ms = config.timeout.as_millis(),
            refresh = config.refresh,
            authenticated = config.username.is_some(),
            "Initializing Elasticsearch index client"
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IndexError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    /// Builds `{base}/{segments...}`, each segment percent-encoded on its own.
    ///
    /// Empty, `.` and `..` segments are rejected: URL normalization would
    /// drop them and address a different resource.
    fn endpoint(&self, segments: &[&str], refresh: bool) -> Result<Url, IndexError> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(IndexError::Other {
                message: format!("'{bad}' cannot be used as an index name or document id"),
                retryable: false,
            });
        }

        let mut url = self.config.url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                IndexError::Configuration(format!("'{}' cannot be used as a base url", self.config.url))
            })?
            .pop_if_empty()
            .extend(segments);

        if refresh && self.config.refresh {
            url.set_query(Some("refresh=true"));
        }

        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_deref()),
            None => request,
        }
    }

    /// Sends the request and returns the status with the full response body.
    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), IndexError> {
        let response = request.send().await.map_err(IndexError::connection)?;
        let status = response.status();
        let body = response.text().await.map_err(IndexError::connection)?;
        Ok((status, body))
    }
}

fn request_error(status: StatusCode, body: &str) -> IndexError {
    IndexError::request(status.as_u16(), describe_error(body))
}

/// Extracts `type: reason` from an Elasticsearch error body, falling back to
/// the raw body.
fn describe_error(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    match error {
        Some(Value::Object(fields)) => {
            let kind = fields.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = fields.get("reason").and_then(Value::as_str).unwrap_or_default();
            format!("{kind}: {reason}")
        }
        Some(Value::String(message)) => message.clone(),
        _ if body.is_empty() => "empty response body".to_string(),
        _ => body.to_string(),
    }
}

/// `HEAD /{index}`: 404 means absent.
fn exists_response(status: StatusCode, body: &str) -> Result<bool, IndexError> {
    match status {
        StatusCode::NOT_FOUND => Ok(false),
        s if s.is_success() => Ok(true),
        s => Err(request_error(s, body)),
    }
}

/// `PUT /{index}`: an index created concurrently counts as created.
fn create_response(status: StatusCode, body: &str) -> Result<(), IndexError> {
    if status.is_success() {
        return Ok(());
    }
    match request_error(status, body) {
        IndexError::Request { message, .. } if message.contains(ALREADY_EXISTS) => Ok(()),
        err => Err(err),
    }
}

/// `PUT /{index}/_doc/{id}`.
fn upsert_response(status: StatusCode, body: &str) -> Result<(), IndexError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(request_error(status, body))
    }
}

/// `DELETE /{index}/_doc/{id}`: a missing document is already deleted.
fn delete_response(status: StatusCode, body: &str) -> Result<(), IndexError> {
    match status {
        StatusCode::NOT_FOUND => Ok(()),
        s if s.is_success() => Ok(()),
        s => Err(request_error(s, body)),
    }
}

/// `GET /{index}/_doc/{id}`: the stored `_source`, or `None` on 404.
fn get_response(status: StatusCode, body: &str) -> Result<Option<Value>, IndexError> {
    match status {
        StatusCode::NOT_FOUND => Ok(None),
        s if s.is_success() => {
            let mut hit: Value = serde_json::from_str(body)
                .map_err(|e| IndexError::serialization(e, "invalid document response"))?;
            Ok(hit.get_mut("_source").map(Value::take))
        }
        s => Err(request_error(s, body)),
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        let url = self.endpoint(&[index], false)?;
        let (status, body) = self.send(self.request(Method::HEAD, url)).await?;
        exists_response(status, &body)
    }

    async fn create_index(&self, index: &str) -> Result<(), IndexError> {
        let url = self.endpoint(&[index], false)?;
        let (status, body) = self.send(self.request(Method::PUT, url)).await?;
        create_response(status, &body)?;

        if status.is_success() {
            info!(index, "Created index");
        } else {
            debug!(index, "Index already exists");
        }
        Ok(())
    }

    async fn upsert(&self, index: &str, id: &str, body: Value) -> Result<(), IndexError> {
        let url = self.endpoint(&[index, "_doc", id], true)?;
        let (status, response) = self.send(self.request(Method::PUT, url).json(&body)).await?;

        if let Err(err) = upsert_response(status, &response) {
            warn!(index, id, error = %err, retryable = err.is_retryable(), "Upsert rejected");
            return Err(err);
        }

        debug!(index, id, "Document upserted");
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError> {
        let url = self.endpoint(&[index, "_doc", id], true)?;
        let (status, body) = self.send(self.request(Method::DELETE, url)).await?;
        delete_response(status, &body)?;

        debug!(index, id, found = status != StatusCode::NOT_FOUND, "Document deleted");
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError> {
        let url = self.endpoint(&[index, "_doc", id], false)?;
        let (status, body) = self.send(self.request(Method::GET, url)).await?;
        get_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(url: &str) -> ElasticsearchIndex {
        let config = ElasticsearchConfig::from_connection_string(url).unwrap();
        ElasticsearchIndex::new(config).unwrap()
    }

    #[test]
    fn test_document_endpoint_with_refresh() {
        let url = index("http://localhost:9200")
            .endpoint(&["orders", "_doc", "1"], true)
            .unwrap();

        assert_eq!(url.as_str(), "http://localhost:9200/orders/_doc/1?refresh=true");
    }

    #[test]
    fn test_endpoint_encodes_ids_as_one_segment() {
        let url = index("http://localhost:9200")
            .endpoint(&["orders", "_doc", "a/b c?"], false)
            .unwrap();

        assert_eq!(url.as_str(), "http://localhost:9200/orders/_doc/a%2Fb%20c%3F");
    }

    #[test]
    fn test_endpoint_rejects_dot_segments() {
        let index = index("http://localhost:9200");

        for id in ["", ".", ".."] {
            let err = index.endpoint(&["orders", "_doc", id], true).unwrap_err();
            assert!(matches!(err, IndexError::Other { retryable: false, .. }), "id {id:?}");
        }

        // Dots inside an id are ordinary characters.
        let url = index.endpoint(&["orders", "_doc", "..a.b"], false).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9200/orders/_doc/..a.b");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let url = index("https://proxy.local/es/")
            .endpoint(&["orders"], false)
            .unwrap();

        assert_eq!(url.as_str(), "https://proxy.local/es/orders");
    }

    #[test]
    fn test_refresh_can_be_disabled() {
        let config = ElasticsearchConfig::builder()
            .url("http://localhost:9200")
            .refresh(false)
            .build()
            .unwrap();
        let url = ElasticsearchIndex::new(config)
            .unwrap()
            .endpoint(&["orders", "_doc", "1"], true)
            .unwrap();

        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_describe_error_body() {
        let body = r#"{"error":{"type":"resource_already_exists_exception","reason":"index [orders/abc] already exists"},"status":400}"#;
        assert_eq!(
            describe_error(body),
            "resource_already_exists_exception: index [orders/abc] already exists"
        );

        assert_eq!(describe_error("Bad Gateway"), "Bad Gateway");
        assert_eq!(describe_error(""), "empty response body");
    }

    #[test]
    fn test_exists_response() {
        assert!(exists_response(StatusCode::OK, "").unwrap());
        assert!(!exists_response(StatusCode::NOT_FOUND, "").unwrap());

        let err = exists_response(StatusCode::UNAUTHORIZED, "").unwrap_err();
        assert!(matches!(err, IndexError::Request { status: 401, .. }));
    }

    #[test]
    fn test_create_response_accepts_existing_index() {
        let exists = r#"{"error":{"type":"resource_already_exists_exception","reason":"index [orders/x] already exists"},"status":400}"#;
        assert!(create_response(StatusCode::BAD_REQUEST, exists).is_ok());
        assert!(create_response(StatusCode::OK, r#"{"acknowledged":true}"#).is_ok());

        let invalid = r#"{"error":{"type":"invalid_index_name_exception","reason":"must be lowercase"},"status":400}"#;
        let err = create_response(StatusCode::BAD_REQUEST, invalid).unwrap_err();
        assert!(matches!(err, IndexError::Request { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_upsert_response() {
        assert!(upsert_response(StatusCode::CREATED, "{}").is_ok());
        assert!(upsert_response(StatusCode::OK, "{}").is_ok());

        let err = upsert_response(StatusCode::TOO_MANY_REQUESTS, "").unwrap_err();
        assert!(err.is_retryable());

        let err = upsert_response(StatusCode::BAD_REQUEST, "mapper_parsing_exception").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_delete_response_accepts_missing_document() {
        assert!(delete_response(StatusCode::OK, "{}").is_ok());
        assert!(delete_response(StatusCode::NOT_FOUND, r#"{"result":"not_found"}"#).is_ok());

        let err = delete_response(StatusCode::SERVICE_UNAVAILABLE, "").unwrap_err();
        assert!(matches!(err, IndexError::Request { status: 503, .. }));
    }

    #[test]
    fn test_get_response() {
        let hit = r#"{"_index":"orders","_id":"1","found":true,"_source":{"amount":20}}"#;
        assert_eq!(
            get_response(StatusCode::OK, hit).unwrap(),
            Some(serde_json::json!({ "amount": 20 }))
        );
        assert_eq!(get_response(StatusCode::NOT_FOUND, "").unwrap(), None);

        let err = get_response(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, IndexError::Serialization { .. }));
    }
}
