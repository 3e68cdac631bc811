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

//! Tests for Elasticsearch configuration.

#![cfg(feature = "elasticsearch")]

use fusilli_core::index::IndexError;
use fusilli_destinations::elasticsearch::{ElasticsearchConfig, DEFAULT_TIMEOUT};
use std::time::Duration;

#[test]
fn test_config_builder_minimal() {
    let config = ElasticsearchConfig::builder()
        .url("http://localhost:9200")
        .build()
        .unwrap();

    assert_eq!(config.url.as_str(), "http://localhost:9200/");
    assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert!(config.refresh);
    assert_eq!(config.username, None);
}

#[test]
fn test_config_builder_full() {
    let config = ElasticsearchConfig::builder()
        .url("https://search.internal:9243/cluster-a")
        .credentials("indexer", "hunter2")
        .timeout(Duration::from_secs(5))
        .refresh(false)
        .build()
        .unwrap();

    assert_eq!(config.url.as_str(), "https://search.internal:9243/cluster-a");
    assert_eq!(config.username.as_deref(), Some("indexer"));
    assert_eq!(config.password.as_deref(), Some("hunter2"));
    assert_eq!(config.timeout, Duration::from_secs(5));
    assert!(!config.refresh);
}

#[test]
fn test_connection_string_with_user_only() {
    let config = ElasticsearchConfig::from_connection_string("http://reader@localhost:9200").unwrap();

    assert_eq!(config.username.as_deref(), Some("reader"));
    assert_eq!(config.password.as_deref(), Some(""));
    assert_eq!(config.url.as_str(), "http://localhost:9200/");
}

#[test]
fn test_config_missing_url() {
    let result = ElasticsearchConfig::builder().build();
    assert!(matches!(result, Err(IndexError::Configuration(msg)) if msg.contains("url is required")));
}

#[test]
fn test_config_empty_url() {
    let result = ElasticsearchConfig::from_connection_string("  ");
    assert!(matches!(result, Err(IndexError::Configuration(msg)) if msg.contains("cannot be empty")));
}

#[test]
fn test_config_invalid_url() {
    let result = ElasticsearchConfig::from_connection_string("not a url");
    assert!(matches!(result, Err(IndexError::Configuration(msg)) if msg.contains("invalid url")));
}

#[test]
fn test_config_rejects_non_http_scheme() {
    let result = ElasticsearchConfig::from_connection_string("mongodb://localhost:27017");
    assert!(
        matches!(result, Err(IndexError::Configuration(msg)) if msg.contains("unsupported url scheme"))
    );
}

#[test]
fn test_config_zero_timeout() {
    let result = ElasticsearchConfig::builder()
        .url("http://localhost:9200")
        .timeout(Duration::ZERO)
        .build();
    assert!(matches!(result, Err(IndexError::Configuration(_))));
}

#[test]
fn test_configuration_errors_are_not_retryable() {
    let err = ElasticsearchConfig::builder().build().unwrap_err();
    assert!(!err.is_retryable());
}
