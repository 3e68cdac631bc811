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

//! Orders Observer
//!
//! Mirrors the `orders` collection of the `orders` database into the
//! `orders` Elasticsearch index for a fixed period, then shuts down.
//!
//! # Prerequisites
//!
//! A `MongoDB` replica set and an Elasticsearch node:
//!
//! ```bash
//! docker run -d --name mongodb -p 27017:27017 mongo:7 --replSet rs0
//! docker exec mongodb mongosh --eval 'rs.initiate()'
//! docker run -d --name es -p 9200:9200 -e discovery.type=single-node \
//!   -e xpack.security.enabled=false elasticsearch:8.13.0
//! ```
//!
//! # Running the Example
//!
//! ```bash
//! export FUSILLI_SOURCE_CONNECTION="mongodb://localhost:27017/?replicaSet=rs0&directConnection=true"
//! export FUSILLI_TARGET_CONNECTION="http://localhost:9200"
//! cargo run --example orders_observer
//! ```
//!
//! Then, in another terminal:
//!
//! ```bash
//! docker exec mongodb mongosh orders --eval 'db.orders.insertOne({_id: "1", amount: 10})'
//! curl localhost:9200/orders/_doc/1
//! ```

use fusilli_core::config::{EnvConnectionProvider, ObserverConfig};
use fusilli_core::document::Identifiable;
use fusilli_core::observer::{Observer, ShutdownStatus};
use fusilli_core::watcher::MongoChangeSource;
use fusilli_destinations::elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// How long the observer runs before it is stopped.
const RUN_FOR: Duration = Duration::from_secs(120);

/// An order document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    #[serde(rename = "_id")]
    id: String,
    amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    customer: Option<String>,
}

impl Identifiable for Order {
    fn id(&self) -> &str {
        &self.id
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = ObserverConfig::from_provider("orders", "orders", "orders", &EnvConnectionProvider)?;
    let index = ElasticsearchIndex::new(ElasticsearchConfig::from_connection_string(
        &config.target_connection,
    )?)?;
    let source = MongoChangeSource::<Order>::new(&config);

    let mut observer = Observer::new(config, source, index)?;
    observer.start()?;

    info!(run_for_secs = RUN_FOR.as_secs(), "Observer running");
    tokio::time::sleep(RUN_FOR).await;

    match observer.stop().await {
        ShutdownStatus::Stopped | ShutdownStatus::NotRunning => info!("Observer stopped"),
        ShutdownStatus::Failed => warn!("Observer had stopped early, see errors above"),
        ShutdownStatus::TimedOut => warn!("Observer did not stop in time"),
    }

    Ok(())
}

/// Initialize structured logging
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,fusilli_core=info,fusilli_destinations=info")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
