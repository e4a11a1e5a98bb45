// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Entity identity and typed attribute sensors.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The stable identity of one entity managed by the deployment layer: a
/// cluster member, the shared database, the shared broker.
///
/// Identities are minted per entity *instance*. A replacement database is a
/// new `EntityId`, so attribute state recorded against a previous instance
/// (notably [`DATABASE_INITIALIZED`]) can never be observed by entities of a
/// later cluster generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Mints a fresh entity identity.
    pub fn new() -> EntityId {
        EntityId(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> EntityId {
        EntityId::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named, typed attribute slot on an entity.
///
/// Sensors carry their value type statically so that readers and writers of
/// an attribute cannot disagree about what is stored under a name.
pub struct Sensor<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Sensor<T> {
    /// Declares a sensor with the given name.
    pub const fn new(name: &'static str) -> Sensor<T> {
        Sensor {
            name,
            _type: PhantomData,
        }
    }

    /// The sensor's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Sensor<T> {
    fn clone(&self) -> Sensor<T> {
        *self
    }
}

impl<T> Copy for Sensor<T> {}

impl<T> fmt::Debug for Sensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Sensor").field(&self.name).finish()
    }
}

impl<T> fmt::Display for Sensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Whether the entity's service accepts connections.
///
/// Published by the process layer once the database or broker process is up.
pub const SERVICE_UP: Sensor<bool> = Sensor::new("riskgrid.service.up");

/// Whether the shared database's schema has been initialized.
///
/// Written exactly once, false→true, by the member that wins the
/// initialization decision; all other members block on it before launching.
pub const DATABASE_INITIALIZED: Sensor<bool> = Sensor::new("riskgrid.database.initialized");

/// The address on which the entity's service listens.
pub const ADDRESS: Sensor<String> = Sensor::new("riskgrid.address");

/// The port on which the entity's service listens.
pub const PORT: Sensor<u16> = Sensor::new("riskgrid.port");
