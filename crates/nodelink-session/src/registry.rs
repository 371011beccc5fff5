//! The entity registry: every entity a node announced during listing.
//!
//! One registry belongs to one session. It is filled during the listing
//! phase, read whenever a state report arrives, and superseded wholesale
//! when the session opens again. Nothing is merged across connections,
//! since a node may have been reflashed with a different entity set in
//! between.
//!
//! Not thread-safe by itself: it lives inside the session, which is owned
//! by a single driver task.

use std::collections::HashMap;

use nodelink_protocol::{EntityInfo, EntityKey};

/// Entity descriptors keyed by [`EntityKey`], kept in listing order.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: Vec<EntityInfo>,
    /// Position of each key in `entities`. Kept in sync on every upsert.
    index: HashMap<EntityKey, usize>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor, replacing any earlier one with the same key.
    ///
    /// A replaced descriptor keeps its original position. Returns the
    /// descriptor that was replaced, if any.
    pub fn upsert(&mut self, info: EntityInfo) -> Option<EntityInfo> {
        let key = info.key;
        if let Some(&slot) = self.index.get(&key) {
            tracing::debug!(%key, kind = %info.kind(), "entity descriptor replaced");
            return Some(std::mem::replace(&mut self.entities[slot], info));
        }

        tracing::debug!(
            %key,
            kind = %info.kind(),
            object_id = %info.object_id,
            "entity registered"
        );
        self.index.insert(key, self.entities.len());
        self.entities.push(info);
        None
    }

    /// The descriptor for `key`, or `None` if it has not been listed.
    ///
    /// State reports may arrive for keys that were never listed; that is
    /// not an error.
    pub fn lookup(&self, key: EntityKey) -> Option<&EntityInfo> {
        self.index.get(&key).map(|&slot| &self.entities[slot])
    }

    /// Supersedes the registry with an empty one and hands back the old
    /// contents.
    pub fn replace(&mut self) -> EntityRegistry {
        std::mem::take(self)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Descriptors in the order the node listed them.
    pub fn iter(&self) -> impl Iterator<Item = &EntityInfo> {
        self.entities.iter()
    }

    pub fn to_vec(&self) -> Vec<EntityInfo> {
        self.entities.clone()
    }
}
