// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A publish/subscribe store of per-entity attributes.
//!
//! Readers can block until an attribute is published, which is the readiness
//! barrier used throughout the bootstrap path: a member suspends until the
//! database publishes `SERVICE_UP = true`, or until the initializing member
//! publishes `DATABASE_INITIALIZED = true`. Waits are push-based (each
//! attribute is backed by a watch channel); nothing in this module polls.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::entity::{EntityId, Sensor};
use crate::error::CoordinationError;

/// Shared attribute state for all entities of a deployment.
///
/// Values are type-erased to JSON internally; the typed [`Sensor`] API keeps
/// readers and writers consistent.
#[derive(Debug, Default)]
pub struct AttributeStore {
    entries: Mutex<BTreeMap<(EntityId, &'static str), watch::Sender<Option<Value>>>>,
}

impl AttributeStore {
    /// Creates an empty attribute store.
    pub fn new() -> AttributeStore {
        AttributeStore::default()
    }

    fn sender(&self, entity: EntityId, sensor: &'static str) -> watch::Sender<Option<Value>> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        entries
            .entry((entity, sensor))
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    /// Publishes a value for `sensor` on `entity`, waking all blocked
    /// readers.
    pub fn publish<T: Serialize>(&self, entity: EntityId, sensor: Sensor<T>, value: T) {
        let value = serde_json::to_value(value).expect("sensor values are plain data");
        debug!(%entity, sensor = sensor.name(), %value, "publishing attribute");
        self.sender(entity, sensor.name()).send_replace(Some(value));
    }

    /// Returns the current value of `sensor` on `entity`, or `None` if it has
    /// never been published.
    pub fn get<T: DeserializeOwned>(
        &self,
        entity: EntityId,
        sensor: Sensor<T>,
    ) -> Result<Option<T>, CoordinationError> {
        let current = self.sender(entity, sensor.name()).borrow().clone();
        match current {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|source| {
                CoordinationError::AttributeType {
                    sensor: sensor.name(),
                    source,
                }
            }),
        }
    }

    /// Blocks until `sensor` on `entity` has been published, then returns its
    /// value.
    ///
    /// Suspends the calling task; resumed by the publish itself. There is no
    /// timeout at this layer: bounding the wait is the responsibility of the
    /// caller's overall start timeout.
    pub async fn wait_until_set<T: DeserializeOwned>(
        &self,
        entity: EntityId,
        sensor: Sensor<T>,
    ) -> Result<T, CoordinationError> {
        let tx = self.sender(entity, sensor.name());
        let mut rx = tx.subscribe();
        let guard = rx.wait_for(|v| v.is_some()).await.map_err(|_| {
            CoordinationError::AttributeUnavailable {
                entity,
                sensor: sensor.name(),
            }
        })?;
        let value = guard.clone().expect("wait_for guarantees a set value");
        serde_json::from_value(value).map_err(|source| CoordinationError::AttributeType {
            sensor: sensor.name(),
            source,
        })
    }

    /// Blocks until `sensor` on `entity` has been published as `true`.
    ///
    /// Intermediate `false` publishes keep the caller blocked; once an
    /// attribute used with this method flips to `true` it is expected to stay
    /// `true` for the life of the entity.
    pub async fn wait_until_ready(
        &self,
        entity: EntityId,
        sensor: Sensor<bool>,
    ) -> Result<(), CoordinationError> {
        let tx = self.sender(entity, sensor.name());
        let mut rx = tx.subscribe();
        rx.wait_for(|v| matches!(v, Some(Value::Bool(true))))
            .await
            .map_err(|_| CoordinationError::AttributeUnavailable {
                entity,
                sensor: sensor.name(),
            })?;
        Ok(())
    }
}
