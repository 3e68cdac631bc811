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

//! Document contract for mirrored entities.
//!
//! The observer is generic over the entity stored in the source collection.
//! The only capability it needs is a stable string identifier, which is used
//! verbatim as the search index document id.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// An entity with a stable, unique string identifier.
///
/// The identifier must be present and unique per logical entity: it is the
/// key used for upserts and deletes in the search index, so two entities
/// sharing an id overwrite each other.
///
/// # Examples
///
/// ```rust
/// use fusilli_core::document::Identifiable;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Product {
///     #[serde(rename = "_id")]
///     sku: String,
///     title: String,
/// }
///
/// impl Identifiable for Product {
///     fn id(&self) -> &str {
///         &self.sku
///     }
/// }
/// ```
pub trait Identifiable: Serialize + DeserializeOwned + Unpin + Send + Sync + 'static {
    /// Returns the identifier of this entity.
    fn id(&self) -> &str;
}
