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

//! Index bootstrap.
//!
//! Runs once per worker start, before the change stream is opened.

use crate::index::{IndexError, SearchIndex};
use tracing::{debug, info, instrument};

/// Outcome of [`ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The index was missing and has been created.
    Created,
    /// The index already existed; nothing was created.
    AlreadyExists,
}

/// Makes sure `index_name` exists, creating it with default settings if absent.
///
/// When the index exists no creation call is issued. If another process
/// creates the index between the check and the creation, the store's
/// "already exists" rejection is treated as success.
///
/// # Errors
///
/// Returns the store error if the existence check or the creation fails.
#[instrument(skip(index))]
pub async fn ensure_index<I>(index: &I, index_name: &str) -> Result<BootstrapOutcome, IndexError>
where
    I: SearchIndex + ?Sized,
{
    if index.index_exists(index_name).await? {
        debug!("Index already exists");
        return Ok(BootstrapOutcome::AlreadyExists);
    }

    match index.create_index(index_name).await {
        Ok(()) => {
            info!("Created index with default settings");
            Ok(BootstrapOutcome::Created)
        }
        Err(e) if is_already_exists(&e) => {
            debug!("Index was created concurrently");
            Ok(BootstrapOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

fn is_already_exists(error: &IndexError) -> bool {
    matches!(
        error,
        IndexError::Request { status: 400, message } if message.contains("resource_already_exists_exception")
    )
}
