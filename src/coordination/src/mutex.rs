// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Cooperative, key-scoped mutual exclusion.
//!
//! Member-setup tasks run concurrently with no central coordinator; the only
//! mutual exclusion in the bootstrap path is the advisory mutex acquired
//! around the shared database's one-time initialization. Release is
//! structural: holding a mutex is holding a [`MutexGuard`], and dropping the
//! guard — on success, failure, or cancellation of the holding task —
//! releases the mutex.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::error::CoordinationError;

/// Key-scoped advisory mutual exclusion across independently scheduled
/// tasks.
///
/// At most one holder per key at a time; acquisition blocks until the mutex
/// is available. No fairness is promised beyond mutual exclusion. The trait
/// seam admits distributed implementations (a lock service, a database
/// row-level lock); [`ProcessMutexService`] is the in-process one.
#[async_trait]
pub trait MutexService: fmt::Debug + Send + Sync {
    /// Blocks until the mutex for `key` is held by the caller.
    ///
    /// `description` says what the holder intends to do; it is surfaced by
    /// [`holder`](MutexService::holder) while the mutex is held.
    async fn acquire(&self, key: &str, description: &str)
        -> Result<MutexGuard, CoordinationError>;

    /// Returns the current holder's description for `key`, if the mutex is
    /// held.
    fn holder(&self, key: &str) -> Option<String>;
}

/// A held mutex. Dropping the guard releases the mutex.
pub struct MutexGuard {
    key: String,
    _release: Box<dyn Any + Send>,
}

impl MutexGuard {
    /// Wraps an implementation-specific release handle.
    ///
    /// Dropping `release` must release the underlying mutex.
    pub fn new(key: impl Into<String>, release: Box<dyn Any + Send>) -> MutexGuard {
        MutexGuard {
            key: key.into(),
            _release: release,
        }
    }

    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for MutexGuard {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MutexGuard").field("key", &self.key).finish()
    }
}

/// In-process [`MutexService`] backed by a map of keyed tokio mutexes.
///
/// Suitable when all contending tasks run in one process, which is the case
/// for an orchestration layer that drives every member's setup task itself.
#[derive(Clone, Debug, Default)]
pub struct ProcessMutexService {
    inner: Arc<ProcessMutexInner>,
}

#[derive(Debug, Default)]
struct ProcessMutexInner {
    locks: Mutex<BTreeMap<String, Arc<tokio::sync::Mutex<()>>>>,
    holders: Mutex<BTreeMap<String, String>>,
}

impl ProcessMutexService {
    /// Creates a mutex service with no held mutexes.
    pub fn new() -> ProcessMutexService {
        ProcessMutexService::default()
    }
}

#[async_trait]
impl MutexService for ProcessMutexService {
    async fn acquire(
        &self,
        key: &str,
        description: &str,
    ) -> Result<MutexGuard, CoordinationError> {
        let lock = {
            let mut locks = self.inner.locks.lock().expect("lock poisoned");
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        debug!(key, description, "acquiring mutex");
        let permit = lock.lock_owned().await;
        self.inner
            .holders
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), description.to_string());
        info!(key, description, "mutex acquired");
        Ok(MutexGuard::new(
            key,
            Box::new(ProcessRelease {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                _permit: permit,
            }),
        ))
    }

    fn holder(&self, key: &str) -> Option<String> {
        self.inner
            .holders
            .lock()
            .expect("lock poisoned")
            .get(key)
            .cloned()
    }
}

struct ProcessRelease {
    inner: Arc<ProcessMutexInner>,
    key: String,
    // Dropped after the holder entry is cleared, unblocking the next waiter.
    _permit: OwnedMutexGuard<()>,
}

impl Drop for ProcessRelease {
    fn drop(&mut self) {
        self.inner
            .holders
            .lock()
            .expect("lock poisoned")
            .remove(&self.key);
        debug!(key = %self.key, "mutex released");
    }
}
