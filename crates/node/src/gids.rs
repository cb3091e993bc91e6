// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supplementary-group cache.
//!
//! Resolving a user's group list walks the whole group database, which
//! is too expensive to repeat on every launch. The cache is warmed at
//! startup by enumerating the password database and filled lazily on
//! miss; entries are never invalidated while the daemon runs (a
//! reconfigure rebuilds it).

use gridd_adapters::users::UserDb;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Key = (String, u32);

pub struct GidsCache {
    db: Arc<dyn UserDb>,
    entries: RwLock<HashMap<Key, Arc<Vec<u32>>>>,
}

impl GidsCache {
    pub fn new(db: Arc<dyn UserDb>) -> Self {
        Self {
            db,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-resolve every local user. Returns how many entries were cached.
    pub fn warm(&self) -> usize {
        let users = self.db.enumerate();
        let mut cached = 0;
        for user in users {
            let key = (user.name.clone(), user.gid);
            if self.entries.read().contains_key(&key) {
                continue;
            }
            match self.db.group_list(&user.name, user.gid) {
                Ok(gids) => {
                    self.entries.write().insert(key, Arc::new(gids));
                    cached += 1;
                }
                Err(e) => {
                    tracing::debug!(user = %user.name, error = %e, "group resolution failed");
                }
            }
        }
        cached
    }

    /// Group list for `(user, gid)`, resolving and caching on miss.
    /// Falls back to just the primary gid if the database has no answer.
    pub fn lookup(&self, user: &str, gid: u32) -> Arc<Vec<u32>> {
        let key = (user.to_string(), gid);
        if let Some(gids) = self.entries.read().get(&key) {
            return Arc::clone(gids);
        }

        let gids = match self.db.group_list(user, gid) {
            Ok(gids) => Arc::new(gids),
            Err(e) => {
                tracing::warn!(user, gid, error = %e, "group lookup failed, using primary only");
                Arc::new(vec![gid])
            }
        };
        self.entries
            .write()
            .insert(key, Arc::clone(&gids));
        gids
    }

    /// Drop everything (reconfigure path).
    pub fn purge(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
#[path = "gids_tests.rs"]
mod tests;
