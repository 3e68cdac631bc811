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

//! Change stream event representation.
//!
//! Raw driver events are converted into [`ChangeEvent`] before they reach the
//! applier. Only the three data operations mirrored into the search index are
//! represented; anything else is rejected during conversion.
//!
//! # Examples
//!
//! ```rust
//! use fusilli_core::event::{ChangeEvent, Namespace, OperationType};
//! use bson::{doc, Document};
//!
//! let event: ChangeEvent<Document> = ChangeEvent {
//!     operation: OperationType::Delete,
//!     namespace: Namespace::new("orders", "orders"),
//!     document_id: "1".to_string(),
//!     full_document: None,
//!     cluster_time: None,
//! };
//!
//! assert!(!event.operation.is_upsert());
//! assert_eq!(event.namespace.full_name(), "orders.orders");
//! ```

use bson::{Bson, Document, Timestamp};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType as MongoOpType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error that can occur when converting a driver `ChangeStreamEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The event is not an insert, update or delete.
    #[error("Unsupported operation type: {0}")]
    UnsupportedOperation(String),

    /// The event carries no `documentKey._id`.
    #[error("Change event has no document key")]
    MissingDocumentKey,

    /// The event or its full document does not deserialize into the entity type.
    #[error("Failed to deserialize change event: {0}")]
    Deserialization(String),
}

/// Data operations mirrored into the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A document was inserted
    Insert,

    /// A document was updated; the event carries the full post-image
    Update,

    /// A document was deleted
    Delete,
}

impl OperationType {
    /// Operation names accepted by the change stream `$match` stage.
    pub const WATCHED: [&'static str; 3] = ["insert", "update", "delete"];

    /// Returns the lowercase name used by `MongoDB`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Returns true if this operation writes a document (insert or update).
    #[inline]
    #[must_use]
    pub const fn is_upsert(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `MongoDB` namespace (database + collection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    pub database: String,

    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Creates a new namespace from database and collection names.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns the fully qualified namespace as "database.collection".
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

/// A single mutation observed on the source collection.
///
/// Events are consumed exactly once by the applier and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    /// Type of operation that occurred
    pub operation: OperationType,

    /// Namespace where the operation occurred
    pub namespace: Namespace,

    /// String form of `documentKey._id`
    pub document_id: String,

    /// Full document after the operation.
    ///
    /// Always present for inserts. Present for updates unless the document
    /// was deleted before the post-image lookup ran. Never present for deletes.
    pub full_document: Option<T>,

    /// Oplog timestamp of the operation, if reported by the server.
    ///
    /// `time` is in seconds; `increment` orders operations within that second.
    pub cluster_time: Option<Timestamp>,
}

/// Renders a `documentKey._id` value as the string identifier used by the index.
///
/// Strings are taken verbatim and object ids use their hex form; other types
/// fall back to their BSON display form.
#[must_use]
pub fn identifier_from_bson(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

fn document_id_from_key(key: Option<&Document>) -> Result<String, ConversionError> {
    key.and_then(|k| k.get("_id"))
        .map(identifier_from_bson)
        .ok_or(ConversionError::MissingDocumentKey)
}

impl<T> TryFrom<ChangeStreamEvent<T>> for ChangeEvent<T> {
    type Error = ConversionError;

    fn try_from(event: ChangeStreamEvent<T>) -> Result<Self, Self::Error> {
        let operation = match event.operation_type {
            MongoOpType::Insert => OperationType::Insert,
            MongoOpType::Update => OperationType::Update,
            MongoOpType::Delete => OperationType::Delete,
            other => {
                return Err(ConversionError::UnsupportedOperation(format!("{other:?}")));
            }
        };

        let document_id = document_id_from_key(event.document_key.as_ref())?;

        let namespace = event
            .ns
            .map(|ns| Namespace::new(ns.db, ns.coll.unwrap_or_default()))
            .unwrap_or_default();

        Ok(Self {
            operation,
            namespace,
            document_id,
            full_document: event.full_document,
            cluster_time: event.cluster_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_operation_type_serialization() {
        let json = serde_json::to_string(&OperationType::Update).unwrap();
        assert_eq!(json, r#""update""#);

        let parsed: OperationType = serde_json::from_str(r#""delete""#).unwrap();
        assert_eq!(parsed, OperationType::Delete);
    }

    #[test]
    fn test_watched_operations_match_variants() {
        let names: Vec<_> = [
            OperationType::Insert,
            OperationType::Update,
            OperationType::Delete,
        ]
        .iter()
        .map(OperationType::as_str)
        .collect();

        assert_eq!(names, OperationType::WATCHED);
    }

    #[test]
    fn test_is_upsert() {
        assert!(OperationType::Insert.is_upsert());
        assert!(OperationType::Update.is_upsert());
        assert!(!OperationType::Delete.is_upsert());
    }

    #[test]
    fn test_identifier_from_bson() {
        assert_eq!(identifier_from_bson(&Bson::String("abc".into())), "abc");
        assert_eq!(identifier_from_bson(&Bson::Int32(42)), "42");

        let oid = ObjectId::new();
        assert_eq!(identifier_from_bson(&Bson::ObjectId(oid)), oid.to_hex());
    }

    #[test]
    fn test_conversion_keeps_cluster_time() {
        let ts = Timestamp {
            time: 1_700_000_000,
            increment: 2_500,
        };
        let raw: ChangeStreamEvent<Document> = bson::from_document(doc! {
            "_id": { "_data": "826553F1" },
            "operationType": "update",
            "clusterTime": ts,
            "ns": { "db": "orders", "coll": "orders" },
            "documentKey": { "_id": "1" },
            "fullDocument": { "_id": "1", "amount": 20 },
        })
        .unwrap();

        let event = ChangeEvent::try_from(raw).unwrap();

        assert_eq!(event.operation, OperationType::Update);
        assert_eq!(event.document_id, "1");
        assert_eq!(event.namespace.full_name(), "orders.orders");
        assert_eq!(event.cluster_time, Some(ts));
        assert_eq!(
            event.full_document.and_then(|d| d.get_i32("amount").ok()),
            Some(20)
        );
    }

    #[test]
    fn test_document_id_from_key() {
        let key = doc! { "_id": "order-7" };
        assert_eq!(document_id_from_key(Some(&key)).unwrap(), "order-7");

        let no_id = doc! { "shard": 1 };
        assert_eq!(
            document_id_from_key(Some(&no_id)),
            Err(ConversionError::MissingDocumentKey)
        );
        assert_eq!(
            document_id_from_key(None),
            Err(ConversionError::MissingDocumentKey)
        );
    }
}
