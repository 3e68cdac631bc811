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

//! Integration tests for the change applier.
//!
//! These tests verify the index-side effect of each operation type:
//! - Full replace on insert and update
//! - Idempotent delete
//! - Repeated inserts

use fusilli_core::applier::ChangeApplier;
use fusilli_core::document::Identifiable;
use fusilli_core::event::{ChangeEvent, Namespace, OperationType};
use fusilli_core::index::{MemoryIndex, SearchIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    #[serde(rename = "_id")]
    id: String,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Identifiable for Order {
    fn id(&self) -> &str {
        &self.id
    }
}

fn order(id: &str, amount: i64) -> Order {
    Order {
        id: id.to_string(),
        amount,
        note: None,
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

fn applier(index: &MemoryIndex) -> ChangeApplier<MemoryIndex> {
    ChangeApplier::new(Arc::new(index.clone()), "orders")
}

#[tokio::test]
async fn test_insert_update_delete_scenario() {
    let index = MemoryIndex::with_index("orders");
    let applier = applier(&index);

    applier
        .apply(&event(OperationType::Insert, "1", Some(order("1", 10))))
        .await
        .unwrap();
    assert_eq!(
        index.get("orders", "1").await.unwrap(),
        Some(json!({ "amount": 10 }))
    );

    applier
        .apply(&event(OperationType::Update, "1", Some(order("1", 20))))
        .await
        .unwrap();
    assert_eq!(
        index.get("orders", "1").await.unwrap(),
        Some(json!({ "amount": 20 }))
    );

    applier
        .apply(&event(OperationType::Delete, "1", None))
        .await
        .unwrap();
    assert_eq!(index.get("orders", "1").await.unwrap(), None);
}

#[tokio::test]
async fn test_update_replaces_instead_of_merging() {
    let index = MemoryIndex::with_index("orders");
    let applier = applier(&index);

    let mut first = order("7", 10);
    first.note = Some("gift wrap".to_string());
    applier
        .apply(&event(OperationType::Insert, "7", Some(first)))
        .await
        .unwrap();
    assert_eq!(
        index.document("orders", "7"),
        Some(json!({ "amount": 10, "note": "gift wrap" }))
    );

    applier
        .apply(&event(OperationType::Update, "7", Some(order("7", 15))))
        .await
        .unwrap();

    assert_eq!(index.document("orders", "7"), Some(json!({ "amount": 15 })));
}

#[tokio::test]
async fn test_delete_of_absent_document_is_noop() {
    let index = MemoryIndex::with_index("orders");
    index
        .upsert("orders", "other", json!({ "amount": 1 }))
        .await
        .unwrap();
    let applier = applier(&index);

    applier
        .apply(&event(OperationType::Delete, "missing", None))
        .await
        .unwrap();

    assert_eq!(index.document_count("orders"), 1);
    assert_eq!(index.document("orders", "other"), Some(json!({ "amount": 1 })));
}

#[tokio::test]
async fn test_repeated_insert_is_idempotent() {
    let index = MemoryIndex::with_index("orders");
    let applier = applier(&index);
    let insert = event(OperationType::Insert, "3", Some(order("3", 42)));

    applier.apply(&insert).await.unwrap();
    let after_once = index.document("orders", "3");

    applier.apply(&insert).await.unwrap();

    assert_eq!(index.document("orders", "3"), after_once);
    assert_eq!(index.document_count("orders"), 1);
}

#[tokio::test]
async fn test_index_id_comes_from_document() {
    let index = MemoryIndex::with_index("orders");
    let applier = applier(&index);

    // The document key and the entity id agree for well-formed events; the
    // entity id is the one written.
    applier
        .apply(&event(OperationType::Insert, "key-form", Some(order("entity-form", 5))))
        .await
        .unwrap();

    assert!(index.document("orders", "entity-form").is_some());
    assert!(index.document("orders", "key-form").is_none());
}

#[tokio::test]
async fn test_failed_event_is_dropped_and_next_one_applies() {
    let index = MemoryIndex::with_index("orders");
    let applier = applier(&index);

    index.set_fail_writes(true);
    let dropped = applier
        .apply_or_drop(&event(OperationType::Insert, "1", Some(order("1", 10))))
        .await;
    assert!(!dropped);

    index.set_fail_writes(false);
    let applied = applier
        .apply_or_drop(&event(OperationType::Insert, "2", Some(order("2", 20))))
        .await;
    assert!(applied);

    assert_eq!(index.document("orders", "1"), None);
    assert_eq!(index.document("orders", "2"), Some(json!({ "amount": 20 })));
}
