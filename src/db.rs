// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The in-memory record database.
//!
//! Records are kept in a forest of trees keyed by class, then by the
//! labels of the owner name in reversed order, then by type. If the RR
//! is `a.b.c. IN A 1.2.3.4`, the reference to its RRset is
//!
//! ```text
//! classes[IN].children["c"].children["b"].children["a"].rrsets[A]
//! ```
//!
//! A node exists only when something was added at or below it, so the
//! *absence* of a node distinguishes NXDOMAIN from a NoError empty
//! answer ([RFC 2308]); that is the discrimination [`Database::lookup_rr`]
//! reports.
//!
//! A [`Database`] is immutable once published through a [`DbHandle`];
//! reloads build a fresh instance and swap it in whole.
//!
//! [RFC 2308]: https://datatracker.ietf.org/doc/html/rfc2308

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rr, Type};

////////////////////////////////////////////////////////////////////////
// DATABASE                                                           //
////////////////////////////////////////////////////////////////////////

/// The record database: one label tree per class.
#[derive(Default)]
pub struct Database {
    classes: HashMap<Class, Node>,
    count: usize,
}

/// One node of the label tree. Maps are only ever created when there is
/// an entry to put in them, so the presence of a node implies RRsets or
/// children.
#[derive(Default)]
struct Node {
    children: HashMap<Box<str>, Node>,
    rrsets: HashMap<Type, Vec<Rr>>,
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. Returns `false` (and leaves the database
    /// unchanged) if an effectively identical record (equal modulo
    /// TTL) is already present.
    pub fn add_rr(&mut self, rr: &Rr) -> bool {
        let mut node = self.classes.entry(rr.class).or_default();
        for label in rr.owner.labels().rev() {
            node = node.children.entry(label.into()).or_default();
        }

        let rrset = node.rrsets.entry(rr.rr_type()).or_default();
        if rrset.iter().any(|existing| existing.eq_modulo_ttl(rr)) {
            return false;
        }
        rrset.push(rr.clone());
        self.count += 1;
        true
    }

    /// Looks up the RRset of the given class, type, and owner.
    ///
    /// `nx_domain` is `true` iff there is no node for `qname` at all.
    /// If the node exists but holds no RRset of the requested type, the
    /// answer is an empty set with `nx_domain` `false` (NoError). The
    /// returned records are clones; callers are free to rewrite TTLs
    /// without affecting the database.
    pub fn lookup_rr(&self, class: Class, rr_type: Type, qname: &Name) -> (Vec<Rr>, bool) {
        let mut node = match self.classes.get(&class) {
            Some(root) => root,
            None => return (Vec::new(), true),
        };
        for label in qname.labels().rev() {
            node = match node.children.get(label) {
                Some(child) => child,
                None => return (Vec::new(), true),
            };
        }

        let rrset = node
            .rrsets
            .get(&rr_type)
            .map(|rrset| rrset.to_vec())
            .unwrap_or_default();
        (rrset, false)
    }

    /// Returns the total number of records.
    pub fn count(&self) -> usize {
        self.count
    }
}

////////////////////////////////////////////////////////////////////////
// DATABASE HANDLE                                                    //
////////////////////////////////////////////////////////////////////////

/// A shared, swappable reference to the current [`Database`].
///
/// The database is read-only once populated; rather than supporting
/// updates, a reload builds a replacement and [`replace`]s it whole.
/// Query tasks call [`current`] once per request and hold the returned
/// [`Arc`] across the request, so a concurrent swap never changes the
/// data a request observes mid-flight; the old instance is freed when
/// the last request drops its snapshot.
///
/// [`replace`]: DbHandle::replace
/// [`current`]: DbHandle::current
pub struct DbHandle {
    db: RwLock<Arc<Database>>,
}

impl DbHandle {
    /// Creates a handle holding an empty database, so [`current`]
    /// always returns a valid instance.
    ///
    /// [`current`]: DbHandle::current
    pub fn new() -> Self {
        Self {
            db: RwLock::new(Arc::new(Database::new())),
        }
    }

    /// Publishes a replacement database.
    pub fn replace(&self, new_db: Database) {
        *self.db.write().unwrap() = Arc::new(new_db);
    }

    /// Returns a snapshot of the current database.
    pub fn current(&self) -> Arc<Database> {
        self.db.read().unwrap().clone()
    }
}

impl Default for DbHandle {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
