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

//! Observer configuration.
//!
//! [`ObserverConfig`] names the triple an observer mirrors (database,
//! collection, index) and carries both connection strings plus the loop
//! timings. It is immutable once built and validated eagerly: an empty name
//! or connection string is a configuration error before any work starts.
//!
//! Connection strings are looked up by logical name through a
//! [`ConnectionProvider`], so the same observer code runs against environment
//! variables in production and a static map in tests.
//!
//! # Example
//!
//! ```rust
//! use fusilli_core::config::{ObserverConfig, StaticConnectionProvider};
//! use std::time::Duration;
//!
//! let provider = StaticConnectionProvider::new(
//!     "mongodb://localhost:27017/?replicaSet=rs0",
//!     "http://localhost:9200",
//! );
//!
//! let config = ObserverConfig::from_provider("orders", "orders", "orders", &provider).unwrap();
//! assert_eq!(config.idle_interval, Duration::from_secs(1));
//! ```

use crate::observer::ObserverError;
use crate::watcher::WatcherConfig;
use std::collections::HashMap;
use std::time::Duration;

/// Logical name of the source store connection string.
pub const SOURCE_CONNECTION: &str = "SourceStoreConnection";

/// Logical name of the target store connection string.
pub const TARGET_CONNECTION: &str = "TargetStoreConnection";

/// Default sleep between two pulls of the change stream.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on how long `stop` waits for the worker.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of named connection strings.
pub trait ConnectionProvider {
    /// Returns the connection string registered under `name`, if any.
    fn connection_string(&self, name: &str) -> Option<String>;
}

/// Reads connection strings from the process environment.
///
/// | Logical name            | Variable                    |
/// |-------------------------|-----------------------------|
/// | `SourceStoreConnection` | `FUSILLI_SOURCE_CONNECTION` |
/// | `TargetStoreConnection` | `FUSILLI_TARGET_CONNECTION` |
///
/// Any other name is read from `FUSILLI_` followed by the name in upper case.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConnectionProvider;

impl EnvConnectionProvider {
    /// Returns the environment variable consulted for `name`.
    #[must_use]
    pub fn variable_for(name: &str) -> String {
        match name {
            SOURCE_CONNECTION => "FUSILLI_SOURCE_CONNECTION".to_string(),
            TARGET_CONNECTION => "FUSILLI_TARGET_CONNECTION".to_string(),
            other => format!("FUSILLI_{}", other.to_uppercase()),
        }
    }
}

impl ConnectionProvider for EnvConnectionProvider {
    fn connection_string(&self, name: &str) -> Option<String> {
        std::env::var(Self::variable_for(name)).ok()
    }
}

/// In-memory connection strings, keyed by logical name.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionProvider {
    entries: HashMap<String, String>,
}

impl StaticConnectionProvider {
    /// Creates a provider holding the source and target connection strings.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::default()
            .with(SOURCE_CONNECTION, source)
            .with(TARGET_CONNECTION, target)
    }

    /// Registers a connection string under `name`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }
}

impl ConnectionProvider for StaticConnectionProvider {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }
}

/// Configuration of one observer.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Source database name
    pub database_name: String,

    /// Source collection name
    pub collection_name: String,

    /// Target search index name
    pub index_name: String,

    /// `MongoDB` connection string
    pub source_connection: String,

    /// Search store connection string
    pub target_connection: String,

    /// Sleep between two pulls of the change stream
    pub idle_interval: Duration,

    /// Maximum time `stop` waits for the worker to exit
    pub stop_timeout: Duration,

    /// Change stream options
    pub watcher: WatcherConfig,
}

impl ObserverConfig {
    /// Creates a new builder for `ObserverConfig`.
    #[must_use]
    pub fn builder() -> ObserverConfigBuilder {
        ObserverConfigBuilder::default()
    }

    /// Builds a configuration whose connection strings come from `provider`.
    ///
    /// # Errors
    ///
    /// Returns `ObserverError::Configuration` if a name is empty or a
    /// connection string is missing or empty.
    pub fn from_provider(
        database_name: impl Into<String>,
        collection_name: impl Into<String>,
        index_name: impl Into<String>,
        provider: &impl ConnectionProvider,
    ) -> Result<Self, ObserverError> {
        let source = provider.connection_string(SOURCE_CONNECTION).ok_or_else(|| {
            ObserverError::Configuration(format!(
                "connection string '{SOURCE_CONNECTION}' is not configured"
            ))
        })?;
        let target = provider.connection_string(TARGET_CONNECTION).ok_or_else(|| {
            ObserverError::Configuration(format!(
                "connection string '{TARGET_CONNECTION}' is not configured"
            ))
        })?;

        Self::builder()
            .database(database_name)
            .collection(collection_name)
            .index(index_name)
            .source_connection(source)
            .target_connection(target)
            .build()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ObserverError::Configuration` if any name or connection string
    /// is empty, or if a timing is zero.
    pub fn validate(&self) -> Result<(), ObserverError> {
        let required = [
            ("database name", &self.database_name),
            ("collection name", &self.collection_name),
            ("index name", &self.index_name),
            (SOURCE_CONNECTION, &self.source_connection),
            (TARGET_CONNECTION, &self.target_connection),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ObserverError::Configuration(format!(
                    "{field} must not be empty"
                )));
            }
        }

        if self.idle_interval.is_zero() {
            return Err(ObserverError::Configuration(
                "idle_interval must be greater than 0".to_string(),
            ));
        }

        if self.stop_timeout.is_zero() {
            return Err(ObserverError::Configuration(
                "stop_timeout must be greater than 0".to_string(),
            ));
        }

        self.watcher
            .validate()
            .map_err(|e| ObserverError::Configuration(e.to_string()))
    }
}

/// Builder for [`ObserverConfig`].
#[derive(Debug, Default)]
pub struct ObserverConfigBuilder {
    database_name: Option<String>,
    collection_name: Option<String>,
    index_name: Option<String>,
    source_connection: Option<String>,
    target_connection: Option<String>,
    idle_interval: Option<Duration>,
    stop_timeout: Option<Duration>,
    watcher: Option<WatcherConfig>,
}

impl ObserverConfigBuilder {
    /// Sets the source database name.
    #[must_use]
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Sets the source collection name.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection_name = Some(name.into());
        self
    }

    /// Sets the target index name.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Sets the `MongoDB` connection string.
    #[must_use]
    pub fn source_connection(mut self, uri: impl Into<String>) -> Self {
        self.source_connection = Some(uri.into());
        self
    }

    /// Sets the search store connection string.
    #[must_use]
    pub fn target_connection(mut self, uri: impl Into<String>) -> Self {
        self.target_connection = Some(uri.into());
        self
    }

    /// Sets the sleep between two pulls.
    ///
    /// Default: 1 second
    #[must_use]
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = Some(interval);
        self
    }

    /// Sets how long `stop` waits for the worker before giving up.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Sets the change stream options.
    #[must_use]
    pub fn watcher(mut self, config: WatcherConfig) -> Self {
        self.watcher = Some(config);
        self
    }

    /// Builds the `ObserverConfig`.
    ///
    /// # Errors
    ///
    /// Returns `ObserverError::Configuration` if a required field is missing
    /// or validation fails.
    pub fn build(self) -> Result<ObserverConfig, ObserverError> {
        let missing = |field: &str| ObserverError::Configuration(format!("{field} is required"));

        let config = ObserverConfig {
            database_name: self.database_name.ok_or_else(|| missing("database name"))?,
            collection_name: self
                .collection_name
                .ok_or_else(|| missing("collection name"))?,
            index_name: self.index_name.ok_or_else(|| missing("index name"))?,
            source_connection: self
                .source_connection
                .ok_or_else(|| missing(SOURCE_CONNECTION))?,
            target_connection: self
                .target_connection
                .ok_or_else(|| missing(TARGET_CONNECTION))?,
            idle_interval: self.idle_interval.unwrap_or(DEFAULT_IDLE_INTERVAL),
            stop_timeout: self.stop_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT),
            watcher: self.watcher.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
