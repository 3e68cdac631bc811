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

//! Elasticsearch search index.
//!
//! [`ElasticsearchIndex`] implements `SearchIndex` over the document REST API:
//!
//! | Operation      | Request                                    |
//! |----------------|--------------------------------------------|
//! | `index_exists` | `HEAD /{index}`                            |
//! | `create_index` | `PUT /{index}`                             |
//! | `upsert`       | `PUT /{index}/_doc/{id}?refresh=true`      |
//! | `delete`       | `DELETE /{index}/_doc/{id}?refresh=true`   |
//! | `get`          | `GET /{index}/_doc/{id}`                   |
//!
//! Indices are created without a body, so the cluster's default settings and
//! dynamic mappings apply. Writes refresh the affected shard unless
//! [`ElasticsearchConfig::refresh`] is turned off.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fusilli_destinations::elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), fusilli_core::index::IndexError> {
//! let config = ElasticsearchConfig::builder()
//!     .url("https://search.internal:9200")
//!     .credentials("elastic", "changeme")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let index = ElasticsearchIndex::new(config)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod index;

pub use config::{ElasticsearchConfig, ElasticsearchConfigBuilder, DEFAULT_TIMEOUT};
pub use index::ElasticsearchIndex;
