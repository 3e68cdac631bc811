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

//! Observer lifecycle and consumption loop.
//!
//! An [`Observer`] mirrors one (database, collection, index) triple. It owns
//! exactly one background worker, started by [`Observer::start`] and torn
//! down by [`Observer::stop`].
//!
//! # Worker
//!
//! ```text
//! Starting ─► Bootstrapping ─► Watching ⇄ Applying ─► Idle ─► Watching ─► …
//!                  │                                              │
//!                  └──── error ──► Stopped ◄── Cancelling ◄───────┘
//! ```
//!
//! 1. [`ensure_index`] runs once.
//! 2. The change source opens its cursor.
//! 3. The loop pulls a batch, applies every event in arrival order, then
//!    sleeps for `idle_interval`. Pull errors are logged and the same cursor
//!    is pulled again after the sleep.
//! 4. Cancellation is checked before each pull and after each batch, never
//!    inside a pull or the sleep. On cancellation the cursor is closed.
//!
//! A failure in steps 1 or 2 ends the worker; it stays stopped until the
//! next `start`.
//!
//! # Shutdown
//!
//! `stop` cancels the worker and waits at most `stop_timeout` for it. If the
//! worker is still busy the wait is abandoned, not forced: the task finishes
//! its in-flight iteration on its own and then exits. Until that detached
//! task has exited, `start` keeps returning `AlreadyRunning`.
//!
//! # Example
//!
//! ```rust,no_run
//! use fusilli_core::config::{ObserverConfig, StaticConnectionProvider};
//! use fusilli_core::index::MemoryIndex;
//! use fusilli_core::observer::Observer;
//! use fusilli_core::watcher::MongoChangeSource;
//!
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct Order { #[serde(rename = "_id")] id: String }
//! # impl fusilli_core::document::Identifiable for Order { fn id(&self) -> &str { &self.id } }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = StaticConnectionProvider::new("mongodb://localhost:27017", "http://localhost:9200");
//! let config = ObserverConfig::from_provider("shop", "orders", "orders", &provider)?;
//!
//! let source = MongoChangeSource::<Order>::new(&config);
//! let mut observer = Observer::new(config, source, MemoryIndex::new())?;
//!
//! observer.start()?;
//! tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! observer.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::applier::ChangeApplier;
use crate::bootstrap::ensure_index;
use crate::config::ObserverConfig;
use crate::document::Identifiable;
use crate::index::{IndexError, SearchIndex};
use crate::watcher::{ChangeFeed, ChangeSource, StreamError};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Observer errors.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `start` was called while the worker is still running
    #[error("Observer is already running")]
    AlreadyRunning,

    /// Index bootstrap failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The change stream could not be opened
    #[error("Change stream error: {0}")]
    ChangeStream(#[from] StreamError),
}

/// How a worker run ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// The cancellation token was observed.
    Cancelled,
    /// Bootstrap or cursor open failed.
    Failed(ObserverError),
}

/// Result of [`Observer::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// The worker observed cancellation and exited.
    Stopped,
    /// The worker had already ended because bootstrap or cursor open failed.
    Failed,
    /// The worker did not exit within `stop_timeout`; it was left to finish.
    TimedOut,
    /// There was no worker to stop.
    NotRunning,
}

/// Cancellation token and task handle of the running worker.
struct WorkerState {
    cancel: CancellationToken,
    handle: JoinHandle<WorkerExit>,
}

/// Mirrors one collection into one search index.
pub struct Observer<T, S, I>
where
    T: Identifiable,
    S: ChangeSource<T>,
    I: SearchIndex + 'static,
{
    config: Arc<ObserverConfig>,
    source: Arc<S>,
    index: Arc<I>,
    span: Span,
    worker: Option<WorkerState>,
    /// Worker abandoned by a timed-out `stop`, still finishing its iteration.
    draining: Option<JoinHandle<WorkerExit>>,
    _document: PhantomData<fn() -> T>,
}

impl<T, S, I> Observer<T, S, I>
where
    T: Identifiable,
    S: ChangeSource<T>,
    I: SearchIndex + 'static,
{
    /// Creates an observer. No background work starts until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `ObserverError::Configuration` if `config` is invalid.
    pub fn new(config: ObserverConfig, source: S, index: I) -> Result<Self, ObserverError> {
        Self::with_shared_index(config, source, Arc::new(index))
    }

    /// Creates an observer writing through an index handle shared with the caller.
    ///
    /// # Errors
    ///
    /// Returns `ObserverError::Configuration` if `config` is invalid.
    pub fn with_shared_index(
        config: ObserverConfig,
        source: S,
        index: Arc<I>,
    ) -> Result<Self, ObserverError> {
        config.validate()?;

        let span = info_span!(
            "observer",
            database = %config.database_name,
            collection = %config.collection_name,
            index = %config.index_name,
        );

        Ok(Self {
            config: Arc::new(config),
            source: Arc::new(source),
            index,
            span,
            worker: None,
            draining: None,
            _document: PhantomData,
        })
    }

    /// Returns the observer configuration.
    #[must_use]
    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Starts the background worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `ObserverError::Configuration` if a name or connection string is empty
    /// - `ObserverError::AlreadyRunning` if the worker is still running
    pub fn start(&mut self) -> Result<(), ObserverError> {
        let _entered = self.span.enter();

        self.config.validate()?;

        if let Some(worker) = &self.worker {
            if !worker.handle.is_finished() {
                return Err(ObserverError::AlreadyRunning);
            }
            debug!("Previous worker already ended, starting a new one");
        }

        if let Some(draining) = &self.draining {
            if !draining.is_finished() {
                return Err(ObserverError::AlreadyRunning);
            }
            debug!("Detached worker has exited");
            self.draining = None;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            run_worker(
                Arc::clone(&self.config),
                Arc::clone(&self.source),
                Arc::clone(&self.index),
                cancel.clone(),
            )
            .instrument(self.span.clone()),
        );

        self.worker = Some(WorkerState { cancel, handle });
        info!("Observer started");

        Ok(())
    }

    /// Stops the background worker, waiting at most `stop_timeout`.
    ///
    /// Never forces termination: on timeout the worker is detached and exits
    /// after its in-flight iteration.
    pub async fn stop(&mut self) -> ShutdownStatus {
        let Some(WorkerState { cancel, mut handle }) = self.worker.take() else {
            debug!(parent: &self.span, "Observer is not running");
            return ShutdownStatus::NotRunning;
        };

        info!(parent: &self.span, "Stopping observer");
        cancel.cancel();

        let outcome = tokio::time::timeout(self.config.stop_timeout, &mut handle).await;
        match outcome {
            Ok(Ok(WorkerExit::Cancelled)) => {
                info!(parent: &self.span, "Observer stopped");
                ShutdownStatus::Stopped
            }
            Ok(Ok(WorkerExit::Failed(e))) => {
                warn!(parent: &self.span, error = %e, "Observer had already stopped after a failure");
                ShutdownStatus::Failed
            }
            Ok(Err(e)) => {
                error!(parent: &self.span, error = %e, "Observer worker panicked");
                ShutdownStatus::Failed
            }
            Err(_) => {
                self.draining = Some(handle);
                warn!(
                    parent: &self.span,
                    timeout_ms = self.config.stop_timeout.as_millis(),
                    "Worker did not exit in time, leaving it to finish its current iteration"
                );
                ShutdownStatus::TimedOut
            }
        }
    }
}

impl<T, S, I> Drop for Observer<T, S, I>
where
    T: Identifiable,
    S: ChangeSource<T>,
    I: SearchIndex + 'static,
{
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }
}

/// Worker body: bootstrap, open, consume until cancelled.
async fn run_worker<T, S, I>(
    config: Arc<ObserverConfig>,
    source: Arc<S>,
    index: Arc<I>,
    cancel: CancellationToken,
) -> WorkerExit
where
    T: Identifiable,
    S: ChangeSource<T>,
    I: SearchIndex + 'static,
{
    info!("Worker starting");

    if let Err(e) = ensure_index(index.as_ref(), &config.index_name).await {
        error!(error = %e, "Index bootstrap failed, worker stopped");
        return WorkerExit::Failed(e.into());
    }

    let mut feed = match source.open().await {
        Ok(feed) => feed,
        Err(e) => {
            error!(error = %e, category = e.category(), "Failed to open change stream, worker stopped");
            return WorkerExit::Failed(e.into());
        }
    };

    let applier = ChangeApplier::new(index, config.index_name.clone());
    consume(&mut feed, &applier, &config, &cancel).await;

    info!("Cancellation observed, closing change stream");
    feed.close().await;
    info!("Worker stopped");

    WorkerExit::Cancelled
}

/// Pull/apply/sleep loop. Returns once cancellation is observed at a loop boundary.
async fn consume<T, F, I>(
    feed: &mut F,
    applier: &ChangeApplier<I>,
    config: &ObserverConfig,
    cancel: &CancellationToken,
) where
    T: Identifiable,
    F: ChangeFeed<T> + ?Sized,
    I: SearchIndex + ?Sized,
{
    info!(
        idle_interval_ms = config.idle_interval.as_millis(),
        "Watching for changes"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match feed.next_batch().await {
            Ok(batch) => {
                let total = batch.len();
                let mut dropped = 0usize;
                for event in &batch {
                    if !applier.apply_or_drop(event).await {
                        dropped += 1;
                    }
                }
                if total > 0 {
                    debug!(events = total, dropped, "Batch applied");
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    category = e.category(),
                    retryable = e.is_retryable(),
                    retry_in_ms = config.idle_interval.as_millis(),
                    "Error pulling change stream, retrying the same cursor"
                );
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        tokio::time::sleep(config.idle_interval).await;
    }
}
