//! Fusilli Core - MongoDB to search index mirroring
//!
//! This crate watches the change stream of a single `MongoDB` collection and
//! mirrors every insert, update and delete into a search index, without a
//! message broker in between.
//!
//! # Key Components
//!
//! - **Events**: [`event`] converts driver change stream events into [`event::ChangeEvent`]
//! - **Watcher**: [`watcher`] opens the filtered change stream and pulls batches
//! - **Applier**: [`applier`] turns one event into one index write
//! - **Bootstrap**: [`bootstrap`] makes sure the target index exists
//! - **Observer**: [`observer`] owns the background worker and its start/stop lifecycle
//!
//! The target store is abstracted by [`index::SearchIndex`]; the Elasticsearch
//! implementation lives in `fusilli-destinations`.
//!
//! # Example
//!
//! ```rust,no_run
//! use fusilli_core::config::{EnvConnectionProvider, ObserverConfig};
//! use fusilli_core::document::Identifiable;
//! use fusilli_core::index::MemoryIndex;
//! use fusilli_core::observer::Observer;
//! use fusilli_core::watcher::MongoChangeSource;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Order {
//!     #[serde(rename = "_id")]
//!     id: String,
//!     amount: i64,
//! }
//!
//! impl Identifiable for Order {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ObserverConfig::from_provider("orders", "orders", "orders", &EnvConnectionProvider)?;
//! let source = MongoChangeSource::<Order>::new(&config);
//! let mut observer = Observer::new(config, source, MemoryIndex::new())?;
//!
//! observer.start()?;
//! // ...
//! observer.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod applier;
pub mod bootstrap;
pub mod config;
pub mod document;
pub mod event;
pub mod index;
pub mod observer;
pub mod watcher;
