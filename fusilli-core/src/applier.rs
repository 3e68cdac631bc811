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

//! Change applier.
//!
//! Turns one [`ChangeEvent`] into one search index write:
//!
//! | Operation | Index write                                   |
//! |-----------|-----------------------------------------------|
//! | insert    | upsert of the full document at `document.id()` |
//! | update    | upsert of the full post-image (replace, not merge) |
//! | delete    | delete of `document_id`, missing is fine      |
//!
//! The document body is the serde JSON form of the entity without its `_id`
//! field, which travels as the index document id instead.
//!
//! Failures are handled by [`ChangeApplier::apply_or_drop`]: the error is
//! logged together with a snapshot of the document and the event is dropped.
//! There is no retry and no dead-letter queue, so delivery is at-most-once
//! whenever the target store rejects a write.

use crate::document::Identifiable;
use crate::event::{ChangeEvent, OperationType};
use crate::index::{IndexError, SearchIndex};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// Field holding the source identifier, stripped from index bodies.
const ID_FIELD: &str = "_id";

/// Errors raised while applying one event.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// An insert or update arrived without a document to write.
    #[error("{operation} event for '{document_id}' carries no document")]
    MissingDocument {
        /// Operation of the offending event
        operation: OperationType,
        /// Identifier from the event's document key
        document_id: String,
    },

    /// The document could not be serialized to JSON.
    #[error("Failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The search index rejected the write.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl ApplyError {
    /// Returns whether the same write could succeed later.
    ///
    /// Only index failures can be transient. The event is dropped either way.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Index(e) => e.is_retryable(),
            Self::MissingDocument { .. } | Self::Serialization(_) => false,
        }
    }
}

/// Applies change events to one index.
#[derive(Debug)]
pub struct ChangeApplier<I: ?Sized> {
    index: Arc<I>,
    index_name: String,
}

impl<I: ?Sized> Clone for ChangeApplier<I> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
            index_name: self.index_name.clone(),
        }
    }
}

impl<I> ChangeApplier<I>
where
    I: SearchIndex + ?Sized,
{
    /// Creates an applier writing into `index_name`.
    pub fn new(index: Arc<I>, index_name: impl Into<String>) -> Self {
        Self {
            index,
            index_name: index_name.into(),
        }
    }

    /// Returns the target index name.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Applies `event` to the index.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert/update has no document, the document
    /// cannot be serialized, or the index rejects the write.
    #[instrument(skip_all, fields(operation = %event.operation, document_id = %event.document_id))]
    pub async fn apply<T: Identifiable>(&self, event: &ChangeEvent<T>) -> Result<(), ApplyError> {
        match event.operation {
            OperationType::Insert | OperationType::Update => {
                let document =
                    event
                        .full_document
                        .as_ref()
                        .ok_or_else(|| ApplyError::MissingDocument {
                            operation: event.operation,
                            document_id: event.document_id.clone(),
                        })?;

                let body = document_body(document)?;
                self.index
                    .upsert(&self.index_name, document.id(), body)
                    .await?;
                debug!(id = document.id(), "Document upserted");
            }
            OperationType::Delete => {
                self.index
                    .delete(&self.index_name, &event.document_id)
                    .await?;
                debug!("Document deleted");
            }
        }

        Ok(())
    }

    /// Applies `event`, logging and dropping it on failure.
    ///
    /// Returns whether the event reached the index.
    pub async fn apply_or_drop<T: Identifiable>(&self, event: &ChangeEvent<T>) -> bool {
        match self.apply(event).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    operation = %event.operation,
                    document_id = %event.document_id,
                    index = %self.index_name,
                    document = %document_snapshot(event.full_document.as_ref()),
                    cluster_time = ?event.cluster_time,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to apply change event, dropping it"
                );
                false
            }
        }
    }
}

/// Serializes `document` into the body stored in the index.
///
/// # Errors
///
/// Returns an error if the document cannot be represented as JSON.
pub fn document_body<T: Identifiable>(document: &T) -> Result<Value, serde_json::Error> {
    let mut body = serde_json::to_value(document)?;
    if let Value::Object(fields) = &mut body {
        fields.remove(ID_FIELD);
    }
    Ok(body)
}

fn document_snapshot<T: Identifiable>(document: Option<&T>) -> String {
    match document {
        Some(doc) => serde_json::to_string(doc)
            .unwrap_or_else(|e| format!("<unserializable document: {e}>")),
        None => "null".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Namespace;
    use crate::index::MemoryIndex;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Order {
        #[serde(rename = "_id")]
        id: String,
        amount: i64,
    }

    impl Identifiable for Order {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn event(operation: OperationType, id: &str, doc: Option<Order>) -> ChangeEvent<Order> {
        ChangeEvent {
            operation,
            namespace: Namespace::new("orders", "orders"),
            document_id: id.to_string(),
            full_document: doc,
            cluster_time: None,
        }
    }

    #[test]
    fn test_document_body_strips_id() {
        let body = document_body(&Order {
            id: "1".into(),
            amount: 10,
        })
        .unwrap();

        assert_eq!(body, json!({ "amount": 10 }));
    }

    #[test]
    fn test_document_snapshot() {
        let order = Order {
            id: "1".into(),
            amount: 10,
        };
        assert_eq!(
            document_snapshot(Some(&order)),
            r#"{"_id":"1","amount":10}"#
        );
        assert_eq!(document_snapshot::<Order>(None), "null");
    }

    #[tokio::test]
    async fn test_apply_error_retryable() {
        let index = MemoryIndex::with_index("orders");
        let applier = ChangeApplier::new(Arc::new(index.clone()), "orders");

        index.set_fail_writes(true);
        let unavailable = applier
            .apply(&event(OperationType::Delete, "1", None))
            .await
            .unwrap_err();
        assert!(matches!(unavailable, ApplyError::Index(_)));
        assert!(unavailable.is_retryable());

        let missing = applier
            .apply(&event(OperationType::Update, "1", None))
            .await
            .unwrap_err();
        assert!(!missing.is_retryable());
    }

    #[tokio::test]
    async fn test_update_without_document_is_rejected() {
        let index = MemoryIndex::new();
        let applier = ChangeApplier::new(Arc::new(index.clone()), "orders");

        let err = applier
            .apply(&event(OperationType::Update, "1", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ApplyError::MissingDocument { .. }));
        assert_eq!(index.write_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_or_drop_reports_failure() {
        let index = MemoryIndex::new();
        index.set_fail_writes(true);
        let applier = ChangeApplier::new(Arc::new(index.clone()), "orders");

        let order = Order {
            id: "1".into(),
            amount: 10,
        };
        let applied = applier
            .apply_or_drop(&event(OperationType::Insert, "1", Some(order)))
            .await;

        assert!(!applied);
        assert_eq!(index.document_count("orders"), 0);
    }
}
