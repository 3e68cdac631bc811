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

//! Search Index Trait and Error Types
//!
//! This module defines the [`SearchIndex`] trait, the seam between the
//! observer and the target search store. The observer only needs five
//! operations: check and create an index, upsert, delete and read back a
//! document by id.
//!
//! # Write Semantics
//!
//! - **Upsert is a full replace**: the stored document becomes exactly the
//!   given body, no field of a previous version survives.
//! - **Delete is idempotent**: deleting an id that does not exist succeeds.
//! - **Writes are visible on return**: implementations refresh on write so a
//!   read issued right after the call observes it.
//!
//! # Implementing a Search Index
//!
//! ```rust
//! use fusilli_core::index::{IndexError, SearchIndex};
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! /// An index that accepts writes and forgets them.
//! struct NullIndex;
//!
//! #[async_trait]
//! impl SearchIndex for NullIndex {
//!     async fn index_exists(&self, _index: &str) -> Result<bool, IndexError> {
//!         Ok(true)
//!     }
//!
//!     async fn create_index(&self, _index: &str) -> Result<(), IndexError> {
//!         Ok(())
//!     }
//!
//!     async fn upsert(&self, _index: &str, _id: &str, _body: Value) -> Result<(), IndexError> {
//!         Ok(())
//!     }
//!
//!     async fn delete(&self, _index: &str, _id: &str) -> Result<(), IndexError> {
//!         Ok(())
//!     }
//!
//!     async fn get(&self, _index: &str, _id: &str) -> Result<Option<Value>, IndexError> {
//!         Ok(None)
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors returned by a search index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The store could not be reached (network, DNS, TLS, timeout).
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A request or response body could not be (de)serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store rejected the request.
    #[error("Request failed with status {status}: {message}")]
    Request {
        /// HTTP-like status code returned by the store
        status: u16,
        /// Error body or reason returned by the store
        message: String,
    },

    /// The index client is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Any other failure.
    #[error("Index error: {message}")]
    Other {
        /// Human-readable error message
        message: String,
        /// Whether retrying may succeed
        retryable: bool,
    },
}

impl IndexError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a serialization error from any error type.
    #[must_use]
    pub fn serialization(
        source: impl std::error::Error + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a request error from a status code and message.
    #[must_use]
    pub fn request(status: u16, message: impl Into<String>) -> Self {
        Self::Request {
            status,
            message: message.into(),
        }
    }

    /// Returns whether retrying the same call may succeed.
    ///
    /// Connection failures, throttling (429) and server errors (5xx) are
    /// retryable; rejected documents and configuration errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Request { status, .. } => *status == 429 || *status >= 500,
            Self::Serialization { .. } | Self::Configuration(_) => false,
            Self::Other { retryable, .. } => *retryable,
        }
    }
}

/// The target search store.
///
/// Implementations must be `Send + Sync`; the observer shares one instance
/// with its worker task through an `Arc`.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Returns whether `index` exists.
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError>;

    /// Creates `index` with the store's default settings and mappings.
    async fn create_index(&self, index: &str) -> Result<(), IndexError>;

    /// Stores `body` as the document `id`, replacing any previous version.
    async fn upsert(&self, index: &str, id: &str, body: Value) -> Result<(), IndexError>;

    /// Removes the document `id`. A missing document is not an error.
    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError>;

    /// Returns the stored body of document `id`, or `None` if absent.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError>;
}

#[async_trait]
impl<I: SearchIndex + ?Sized> SearchIndex for Arc<I> {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        (**self).index_exists(index).await
    }

    async fn create_index(&self, index: &str) -> Result<(), IndexError> {
        (**self).create_index(index).await
    }

    async fn upsert(&self, index: &str, id: &str, body: Value) -> Result<(), IndexError> {
        (**self).upsert(index, id, body).await
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError> {
        (**self).delete(index, id).await
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError> {
        (**self).get(index, id).await
    }
}

type Indices = HashMap<String, HashMap<String, Value>>;

/// In-memory search index for tests and local runs.
///
/// Clones share the same storage, so a test can keep a handle while the
/// observer owns another. Call counters and failure switches make the write
/// path observable.
///
/// # Examples
///
/// ```rust
/// use fusilli_core::index::{MemoryIndex, SearchIndex};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let index = MemoryIndex::new();
/// index.create_index("orders").await?;
/// index.upsert("orders", "1", json!({ "amount": 10 })).await?;
///
/// assert_eq!(index.document("orders", "1"), Some(json!({ "amount": 10 })));
/// assert_eq!(index.write_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    indices: Arc<RwLock<Indices>>,
    create_calls: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    fail_lookups: Arc<AtomicBool>,
}

impl MemoryIndex {
    /// Creates an empty in-memory index store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already contains an empty `index`.
    #[must_use]
    pub fn with_index(index: &str) -> Self {
        let store = Self::new();
        if let Ok(mut indices) = store.indices.write() {
            indices.insert(index.to_string(), HashMap::new());
        }
        store
    }

    /// Makes every subsequent upsert and delete fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent existence check fail (or succeed again).
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of `create_index` calls that reached the store.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of successful upserts and deletes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns whether `index` exists.
    #[must_use]
    pub fn has_index(&self, index: &str) -> bool {
        self.indices
            .read()
            .map(|indices| indices.contains_key(index))
            .unwrap_or(false)
    }

    /// Returns a copy of document `id` in `index`.
    #[must_use]
    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.indices
            .read()
            .ok()?
            .get(index)?
            .get(id)
            .cloned()
    }

    /// Returns the number of documents in `index`.
    #[must_use]
    pub fn document_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .ok()
            .and_then(|indices| indices.get(index).map(HashMap::len))
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), IndexError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::request(503, "Simulated write failure"));
        }
        Ok(())
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Indices>, IndexError> {
        self.indices.write().map_err(|_| IndexError::Other {
            message: "memory index lock poisoned".to_string(),
            retryable: false,
        })
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(IndexError::connection_msg("Simulated lookup failure"));
        }
        Ok(self.has_index(index))
    }

    async fn create_index(&self, index: &str) -> Result<(), IndexError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut indices = self.write_lock()?;
        if indices.contains_key(index) {
            return Err(IndexError::request(
                400,
                format!("resource_already_exists_exception: index [{index}] already exists"),
            ));
        }
        indices.insert(index.to_string(), HashMap::new());
        Ok(())
    }

    async fn upsert(&self, index: &str, id: &str, body: Value) -> Result<(), IndexError> {
        self.check_writable()?;

        // Writing into a missing index creates it, as the real store does.
        self.write_lock()?
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), body);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), IndexError> {
        self.check_writable()?;

        if let Some(documents) = self.write_lock()?.get_mut(index) {
            documents.remove(id);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError> {
        Ok(self.document(index, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_index_upsert_replaces() {
        let index = MemoryIndex::new();

        index
            .upsert("idx", "1", json!({ "a": 1, "b": 2 }))
            .await
            .unwrap();
        index.upsert("idx", "1", json!({ "a": 3 })).await.unwrap();

        assert_eq!(index.get("idx", "1").await.unwrap(), Some(json!({ "a": 3 })));
        assert_eq!(index.document_count("idx"), 1);
        assert_eq!(index.write_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_index_delete_missing_is_ok() {
        let index = MemoryIndex::with_index("idx");

        index.delete("idx", "nope").await.unwrap();
        index.delete("other", "nope").await.unwrap();

        assert_eq!(index.document_count("idx"), 0);
    }

    #[tokio::test]
    async fn test_memory_index_create_twice_conflicts() {
        let index = MemoryIndex::new();

        index.create_index("idx").await.unwrap();
        let err = index.create_index("idx").await.unwrap_err();

        assert!(matches!(err, IndexError::Request { status: 400, .. }));
        assert_eq!(index.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_memory_index_write_failures() {
        let index = MemoryIndex::new();
        index.set_fail_writes(true);

        let err = index.upsert("idx", "1", json!({})).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(index.write_count(), 0);

        index.set_fail_writes(false);
        index.upsert("idx", "1", json!({})).await.unwrap();
        assert_eq!(index.write_count(), 1);
    }

    #[test]
    fn test_index_error_retryable() {
        assert!(IndexError::connection_msg("down").is_retryable());
        assert!(IndexError::request(503, "unavailable").is_retryable());
        assert!(IndexError::request(429, "throttled").is_retryable());
        assert!(!IndexError::request(400, "mapper_parsing_exception").is_retryable());
        assert!(!IndexError::Configuration("bad url".into()).is_retryable());
        assert!(
            !IndexError::serialization(std::io::Error::other("x"), "bad body").is_retryable()
        );
    }
}
