//! The normalized store.
//!
//! Responses are flattened into entities keyed by [`EntityRef`]; queries are rebuilt from those
//! entities by walking their selection. Every read records the entities it touched, which is how
//! a write knows exactly which watched queries need to be recomputed.

mod data;
mod denormalize;
mod normalize;
#[cfg(test)]
mod tests;

pub use data::{DataIdFn, Entity, EntityRef, FieldValue, Fields, KeyConfig, Link, Snapshot};

use crate::{Document, Fingerprint, QueryError, Variables};
use data::InMemoryData;
use denormalize::Denormalizer;
use fnv::FnvHashMap;
use normalize::Normalizer;
use serde_json::Value;
use std::{collections::BTreeSet, sync::Arc};

/// The outcome of reading a query from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadResult {
    /// Whatever could be reconstructed. Partial when `complete` is false.
    pub data: Option<Value>,
    /// Every selected field was present, every reference resolved and nothing was invalidated.
    pub complete: bool,
    /// The entities the read touched.
    pub dependencies: BTreeSet<EntityRef>,
    /// References that point at entities the store doesn't have (yet).
    pub dangling: BTreeSet<EntityRef>
}

impl ReadResult {
    fn missing() -> Self {
        ReadResult {
            data: None,
            complete: false,
            dependencies: BTreeSet::new(),
            dangling: BTreeSet::new()
        }
    }
}

struct QueryShape {
    document: Arc<Document>,
    variables: Variables
}

pub struct Store {
    data: InMemoryData,
    keys: KeyConfig,
    queries: FnvHashMap<Fingerprint, QueryShape>
}

impl Store {
    pub fn new(keys: KeyConfig) -> Self {
        Store {
            data: InMemoryData::default(),
            keys,
            queries: FnvHashMap::default()
        }
    }

    /// Remember what a fingerprint looks like so it can be read back by fingerprint alone.
    pub fn register(&mut self, fingerprint: Fingerprint, document: Arc<Document>, variables: Variables) {
        self.queries
            .entry(fingerprint)
            .or_insert(QueryShape {
                document,
                variables
            });
    }

    /// Read a registered query. Unknown fingerprints read as missing.
    pub fn read(&self, fingerprint: &Fingerprint) -> ReadResult {
        match self.queries.get(fingerprint) {
            Some(shape) => self.read_query(&shape.document, &shape.variables),
            None => ReadResult::missing()
        }
    }

    pub fn read_query(&self, document: &Document, variables: &Variables) -> ReadResult {
        // A missing root still counts as a dependency so the first write reaches the reader
        let mut reader = Denormalizer::new(&self.data, variables);
        let data = reader.read_entity(&EntityRef::root(), document.selection());
        ReadResult {
            data,
            complete: reader.complete,
            dependencies: reader.dependencies,
            dangling: reader.dangling
        }
    }

    /// Normalize and merge response data.
    ///
    /// Returns the entities that were added or actually changed. Fields that are structurally
    /// equal to what's stored don't count. On a
    /// [`NormalizationConflict`](QueryError::NormalizationConflict) nothing is written.
    pub fn write(
        &mut self,
        document: &Document,
        variables: &Variables,
        data: &Value
    ) -> Result<BTreeSet<EntityRef>, QueryError> {
        let pending = Normalizer::new(&self.data, &self.keys, variables)
            .normalize(document.selection(), data)?;

        let mut changed = BTreeSet::new();
        for (entity_ref, incoming) in pending {
            let was_stale = self.data.stale.remove(&entity_ref);
            match self.data.entities.get_mut(&entity_ref) {
                Some(entity) => {
                    let mut did_change = data::merge_fields(&mut entity.fields, incoming.fields);
                    if entity.typename.is_none() && incoming.typename.is_some() {
                        entity.typename = incoming.typename;
                        did_change = true;
                    }
                    if did_change || was_stale {
                        changed.insert(entity_ref);
                    }
                }
                None => {
                    self.data.entities.insert(entity_ref.clone(), incoming);
                    changed.insert(entity_ref);
                }
            }
        }
        Ok(changed)
    }

    /// Mark an entity as stale. Reads touching it are incomplete until it's written again.
    ///
    /// Returns the queries whose read set includes it.
    pub fn invalidate(&mut self, entity: &EntityRef) -> BTreeSet<Fingerprint> {
        if self.data.entities.contains_key(entity) {
            self.data.stale.insert(entity.clone());
        }
        self.data.get_dependents(entity).collect()
    }

    /// Remove an entity. References to it become dangling.
    pub fn evict(&mut self, entity: &EntityRef) -> BTreeSet<Fingerprint> {
        self.data.entities.remove(entity);
        self.data.stale.remove(entity);
        self.data.get_dependents(entity).collect()
    }

    /// Remove every entity that can't be reached from the root.
    pub fn gc(&mut self) -> BTreeSet<EntityRef> {
        let mut reachable = BTreeSet::new();
        let mut queue = vec![EntityRef::root()];
        while let Some(entity) = queue.pop() {
            if !reachable.insert(entity.clone()) {
                continue;
            }
            if let Some(stored) = self.data.entities.get(&entity) {
                let mut links = Vec::new();
                InMemoryData::collect_field_links(&stored.fields, &mut links);
                queue.extend(links.into_iter().cloned());
            }
        }

        let unreachable: BTreeSet<EntityRef> = self
            .data
            .entities
            .keys()
            .filter(|entity| !reachable.contains(*entity))
            .cloned()
            .collect();
        for entity in &unreachable {
            self.data.entities.remove(entity);
            self.data.stale.remove(entity);
        }
        unreachable
    }

    /// Record the read set of a watched query.
    pub fn track(&mut self, fingerprint: Fingerprint, dependencies: BTreeSet<EntityRef>) {
        self.data.set_dependencies(fingerprint, dependencies);
    }

    /// Drop everything known about a query that nobody watches anymore.
    pub fn forget(&mut self, fingerprint: &Fingerprint) {
        self.data.clear_dependencies(fingerprint);
        self.queries.remove(fingerprint);
    }

    /// The watched queries that read any of `entities`.
    pub fn dependents<'a, I>(&self, entities: I) -> BTreeSet<Fingerprint>
    where
        I: IntoIterator<Item = &'a EntityRef>
    {
        entities
            .into_iter()
            .flat_map(|entity| self.data.get_dependents(entity))
            .collect()
    }

    pub fn entity(&self, entity: &EntityRef) -> Option<&Entity> {
        self.data.entities.get(entity)
    }

    pub fn is_stale(&self, entity: &EntityRef) -> bool {
        self.data.stale.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.data.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entities.is_empty()
    }

    pub fn extract(&self) -> Snapshot {
        Snapshot {
            entities: self
                .data
                .entities
                .iter()
                .map(|(key, entity)| (key.clone(), entity.clone()))
                .collect()
        }
    }

    /// Replace the store's entities with a snapshot. Returns every entity that was present before
    /// or after, so watchers of any of them can be recomputed.
    pub fn restore(&mut self, snapshot: Snapshot) -> BTreeSet<EntityRef> {
        let mut touched: BTreeSet<EntityRef> = self.data.entities.keys().cloned().collect();
        touched.extend(snapshot.entities.keys().cloned());

        self.data.entities = snapshot.entities.into_iter().collect();
        self.data.stale.clear();
        touched
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new(KeyConfig::default())
    }
}
