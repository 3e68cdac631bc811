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

//! `MongoDB` Change Stream Watcher
//!
//! This module opens a server-filtered change stream over the source
//! collection and exposes it as a pull-based feed of [`ChangeEvent`] batches.
//!
//! # Filtering
//!
//! The stream is opened with a `$match` stage restricted to the operations
//! mirrored into the index, and with `fullDocument: "updateLookup"` so update
//! events carry the complete post-image instead of a delta:
//!
//! ```text
//! [{ "$match": { "operationType": { "$in": ["insert", "update", "delete"] } } }]
//! ```
//!
//! # Pull Model
//!
//! [`ChangeFeed::next_batch`] returns whatever is available right now: it
//! drains the driver's buffered batch and issues at most one `getMore` when
//! the buffer is empty, returning an empty batch if the server has nothing.
//! The caller decides when to pull again.
//!
//! # Error Handling
//!
//! Errors are returned to the caller, which retries the *same* cursor later.
//! The watcher never re-opens a cursor: a permanently broken cursor keeps
//! returning errors until the observer is restarted.
//!
//! # Example
//!
//! ```rust,no_run
//! use fusilli_core::watcher::{ChangeFeed, ChangeStreamWatcher, WatcherConfig};
//! use bson::Document;
//! use mongodb::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0").await?;
//! let collection = client.database("shop").collection::<Document>("orders");
//!
//! let mut watcher = ChangeStreamWatcher::open(&collection, &WatcherConfig::default()).await?;
//! for event in watcher.next_batch().await? {
//!     println!("{} {}", event.operation, event.document_id);
//! }
//! watcher.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::ObserverConfig;
use crate::event::{ChangeEvent, ConversionError, Namespace, OperationType};
use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::{
    change_stream::{event::ChangeStreamEvent, ChangeStream},
    error::{Error as MongoError, ErrorKind as MongoErrorKind},
    options::{ChangeStreamOptions, FullDocumentType},
    Client, Collection,
};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default upper bound on the events returned by one pull.
pub const DEFAULT_MAX_BATCH_EVENTS: usize = 100;

/// Default time the server waits for new events on an empty `getMore`.
pub const DEFAULT_MAX_AWAIT_TIME: Duration = Duration::from_millis(500);

/// Errors that can occur during change stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// `MongoDB` connection or command error
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying driver error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// `MongoDB` error code
        code: Option<i32>,
        /// `MongoDB` error labels (e.g., "`NetworkError`")
        labels: Vec<String>,
    },

    /// Failed to convert a driver event into a `ChangeEvent`
    #[error("Event conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// The cursor is no longer usable (collection dropped/renamed, or closed)
    #[error("Stream invalidated: {reason}")]
    Invalidated {
        /// Why the cursor stopped
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<MongoError> for StreamError {
    fn from(err: MongoError) -> Self {
        Self::from_mongo_error(err)
    }
}

impl StreamError {
    /// Creates a `StreamError` from a `MongoDB` error, keeping its code and labels.
    ///
    /// A document that does not fit the entity type is a conversion error,
    /// not a connection failure.
    pub fn from_mongo_error(err: MongoError) -> Self {
        let code = match err.kind.as_ref() {
            MongoErrorKind::Command(cmd_err) => Some(cmd_err.code),
            MongoErrorKind::BsonDeserialization(de_err) => {
                return Self::Conversion(ConversionError::Deserialization(de_err.to_string()));
            }
            _ => None,
        };

        let labels: Vec<String> = err.labels().iter().cloned().collect();

        Self::Connection {
            message: err.to_string(),
            source: Some(Box::new(err)),
            code,
            labels,
        }
    }

    /// Returns true if the failure is transient.
    ///
    /// Used for log classification only; the observer retries the same
    /// cursor after its idle interval whatever the answer.
    ///
    /// - Error labels: `RetryableWriteError`, `TransientTransactionError`, `NetworkError`
    /// - Transient error codes: 6, 7, 43, 89, 91, 10107, 11600, 11602, 13435, 13436
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { code, labels, .. } => {
                if labels.iter().any(|l| {
                    l == "RetryableWriteError"
                        || l == "TransientTransactionError"
                        || l == "NetworkError"
                }) {
                    return true;
                }

                matches!(
                    code,
                    Some(
                        6 |     // HostUnreachable
                        7 |     // HostNotFound
                        43 |    // CursorNotFound
                        89 |    // NetworkTimeout
                        91 |    // ShutdownInProgress
                        10107 | // NotWritablePrimary
                        11600 | // InterruptedAtShutdown
                        11602 | // InterruptedDueToReplStateChange
                        13435 | // NotPrimaryNoSecondaryOk
                        13436   // NotPrimaryOrSecondary
                    )
                )
            }
            Self::Conversion(_) | Self::Invalidated { .. } | Self::Configuration(_) => false,
        }
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Conversion(_) => "conversion",
            Self::Invalidated { .. } => "invalidated",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Configuration for the change stream cursor.
///
/// ```rust
/// use fusilli_core::watcher::WatcherConfig;
/// use std::time::Duration;
///
/// let config = WatcherConfig::builder()
///     .batch_size(50)
///     .max_await_time(Duration::from_millis(200))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.max_batch_events, 100);
/// ```
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Server-side cursor batch size
    pub batch_size: Option<u32>,

    /// How long the server holds an empty `getMore` open
    pub max_await_time: Option<Duration>,

    /// Maximum number of events returned by one pull
    pub max_batch_events: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            max_await_time: Some(DEFAULT_MAX_AWAIT_TIME),
            max_batch_events: DEFAULT_MAX_BATCH_EVENTS,
        }
    }
}

impl WatcherConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> WatcherConfigBuilder {
        WatcherConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` if `max_batch_events` or
    /// `batch_size` is zero.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.max_batch_events == 0 {
            return Err(StreamError::Configuration(
                "max_batch_events must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == Some(0) {
            return Err(StreamError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the aggregation pipeline restricting the stream to
    /// insert, update and delete events.
    #[must_use]
    pub fn pipeline(&self) -> Vec<Document> {
        vec![doc! {
            "$match": {
                "operationType": { "$in": OperationType::WATCHED.to_vec() }
            }
        }]
    }

    /// Converts this config to the driver's `ChangeStreamOptions`.
    #[must_use]
    pub fn to_mongo_options(&self) -> ChangeStreamOptions {
        let mut options = ChangeStreamOptions::default();
        options.full_document = Some(FullDocumentType::UpdateLookup);
        options.batch_size = self.batch_size;
        options.max_await_time = self.max_await_time;
        options
    }
}

/// Builder for [`WatcherConfig`].
#[derive(Debug, Default)]
pub struct WatcherConfigBuilder {
    batch_size: Option<u32>,
    max_await_time: Option<Duration>,
    max_batch_events: Option<usize>,
}

impl WatcherConfigBuilder {
    /// Sets the server-side cursor batch size.
    #[must_use]
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Sets how long the server waits for new events before answering an
    /// empty `getMore`.
    ///
    /// Default: 500ms
    #[must_use]
    pub fn max_await_time(mut self, time: Duration) -> Self {
        self.max_await_time = Some(time);
        self
    }

    /// Sets the maximum number of events returned by one pull.
    ///
    /// Default: 100
    #[must_use]
    pub fn max_batch_events(mut self, max: usize) -> Self {
        self.max_batch_events = Some(max);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` if validation fails.
    pub fn build(self) -> Result<WatcherConfig, StreamError> {
        let config = WatcherConfig {
            batch_size: self.batch_size,
            max_await_time: self.max_await_time.or(Some(DEFAULT_MAX_AWAIT_TIME)),
            max_batch_events: self.max_batch_events.unwrap_or(DEFAULT_MAX_BATCH_EVENTS),
        };

        config.validate()?;
        Ok(config)
    }
}

/// A pull-based feed of change events.
#[async_trait]
pub trait ChangeFeed<T: Send>: Send {
    /// Returns the events currently available, in arrival order.
    ///
    /// An empty batch means nothing is available right now.
    async fn next_batch(&mut self) -> Result<Vec<ChangeEvent<T>>, StreamError>;

    /// Releases the underlying cursor.
    async fn close(&mut self);
}

/// Opens change feeds; called once per worker start.
#[async_trait]
pub trait ChangeSource<T: Send>: Send + Sync + 'static {
    /// The feed type produced by this source.
    type Feed: ChangeFeed<T> + 'static;

    /// Opens a new feed positioned at the current end of the oplog.
    async fn open(&self) -> Result<Self::Feed, StreamError>;
}

/// Change feed over a `MongoDB` change stream.
pub struct ChangeStreamWatcher<T: DeserializeOwned> {
    namespace: Namespace,
    max_batch_events: usize,
    stream: Option<ChangeStream<ChangeStreamEvent<T>>>,
    pending_error: Option<StreamError>,
}

impl<T> ChangeStreamWatcher<T>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    /// Opens a filtered change stream on `collection`.
    ///
    /// The stream starts at the current point of the oplog; no resume token
    /// is used.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Configuration` for an invalid config and
    /// `StreamError::Connection` if the server refuses the cursor.
    #[instrument(skip_all, fields(namespace = %collection.namespace()))]
    pub async fn open(collection: &Collection<T>, config: &WatcherConfig) -> Result<Self, StreamError> {
        config.validate()?;

        let namespace = collection.namespace();
        info!("Opening change stream");

        let stream = collection
            .watch()
            .pipeline(config.pipeline())
            .with_options(config.to_mongo_options())
            .await?;

        Ok(Self {
            namespace: Namespace::new(namespace.db, namespace.coll),
            max_batch_events: config.max_batch_events,
            stream: Some(stream),
            pending_error: None,
        })
    }

    /// Returns the watched namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

#[async_trait]
impl<T> ChangeFeed<T> for ChangeStreamWatcher<T>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    async fn next_batch(&mut self) -> Result<Vec<ChangeEvent<T>>, StreamError> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(StreamError::Invalidated {
                reason: "change stream was closed".to_string(),
            });
        };

        if !stream.is_alive() {
            return Err(StreamError::Invalidated {
                reason: format!(
                    "change stream on {} is no longer alive",
                    self.namespace.full_name()
                ),
            });
        }

        let mut batch = Vec::new();
        while batch.len() < self.max_batch_events {
            match stream.next_if_any().await {
                Ok(Some(raw)) => match ChangeEvent::try_from(raw) {
                    Ok(event) => batch.push(event),
                    Err(e) => warn!(error = %e, "Skipping change event that cannot be mirrored"),
                },
                Ok(None) => break,
                Err(e) => match StreamError::from_mongo_error(e) {
                    // The cursor has moved past the undecodable event.
                    err @ StreamError::Conversion(_) => {
                        warn!(error = %err, "Skipping change event that cannot be mirrored");
                    }
                    err if batch.is_empty() => return Err(err),
                    err => {
                        // Hand out what was already read; the error surfaces on the next pull.
                        self.pending_error = Some(err);
                        break;
                    }
                },
            }
        }

        if !batch.is_empty() {
            debug!(events = batch.len(), "Pulled change events");
        }

        Ok(batch)
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(namespace = %self.namespace.full_name(), "Closing change stream");
        }
    }
}

/// Change source that connects to `MongoDB` when the worker starts.
///
/// The client is created inside [`ChangeSource::open`], so connection
/// failures surface as run-level errors of the worker rather than at
/// construction time.
pub struct MongoChangeSource<T> {
    uri: String,
    namespace: Namespace,
    config: WatcherConfig,
    _document: PhantomData<fn() -> T>,
}

impl<T> MongoChangeSource<T> {
    /// Creates a source for the collection named in `config`.
    #[must_use]
    pub fn new(config: &ObserverConfig) -> Self {
        Self {
            uri: config.source_connection.clone(),
            namespace: Namespace::new(&config.database_name, &config.collection_name),
            config: config.watcher.clone(),
            _document: PhantomData,
        }
    }
}

#[async_trait]
impl<T> ChangeSource<T> for MongoChangeSource<T>
where
    T: DeserializeOwned + Unpin + Send + Sync + 'static,
{
    type Feed = ChangeStreamWatcher<T>;

    async fn open(&self) -> Result<Self::Feed, StreamError> {
        let client = Client::with_uri_str(&self.uri).await?;
        let collection = client
            .database(&self.namespace.database)
            .collection::<T>(&self.namespace.collection);

        ChangeStreamWatcher::open(&collection, &self.config).await
    }
}
