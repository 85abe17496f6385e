use crate::Fingerprint;
use fnv::{FnvHashMap, FnvHashSet};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc
};

const ROOT: &str = "Query";

/// The stable identity of a normalized object, usually `Typename:id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(String);

impl EntityRef {
    pub fn new<K: Into<String>>(key: K) -> Self {
        EntityRef(key.into())
    }

    /// The root query entity every query starts reading from.
    pub fn root() -> Self {
        EntityRef(ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// A stored field. Leaf values (including lists of scalars and custom JSON scalars) are kept as
/// is, anything selected as an object becomes a [`Link`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Scalar(Value),
    Link(Link)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Link {
    Null,
    Ref(EntityRef),
    /// An object without an identity, stored under its parent.
    Inline(Fields),
    List(Vec<Link>)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub typename: Option<String>,
    pub fields: Fields
}

/// A serializable copy of the store's entities, used to hydrate a fresh client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entities: BTreeMap<EntityRef, Entity>
}

/// Merge `incoming` into `existing`, returning whether anything observable changed.
///
/// Inline objects are merged field by field so different queries selecting different fields of
/// the same embedded object don't erase each other. Everything else is last-write-wins.
pub(crate) fn merge_field(existing: &mut FieldValue, incoming: FieldValue) -> bool {
    match (existing, incoming) {
        (FieldValue::Link(Link::Inline(current)), FieldValue::Link(Link::Inline(fields))) => {
            merge_fields(current, fields)
        }
        (existing, incoming) => {
            if *existing == incoming {
                false
            } else {
                *existing = incoming;
                true
            }
        }
    }
}

pub(crate) fn merge_fields(current: &mut Fields, incoming: Fields) -> bool {
    let mut changed = false;
    for (key, value) in incoming {
        match current.get_mut(&key) {
            Some(existing) => changed |= merge_field(existing, value),
            None => {
                current.insert(key, value);
                changed = true;
            }
        }
    }
    changed
}

pub type DataIdFn = Arc<dyn Fn(Option<&str>, &Map<String, Value>) -> Option<String> + Send + Sync>;

/// How objects in responses are given an identity.
#[derive(Clone, Default)]
pub struct KeyConfig {
    /// Typename to the name of its unique ID field. `id` and `_id` don't need to be mapped.
    pub key_fields: FnvHashMap<String, String>,
    /// Replaces the default `Typename:id` scheme entirely.
    pub data_id: Option<DataIdFn>
}

impl KeyConfig {
    pub fn key_of(&self, typename: Option<&str>, object: &Map<String, Value>) -> Option<EntityRef> {
        if let Some(data_id) = &self.data_id {
            return data_id(typename, object).map(EntityRef);
        }

        let typename = typename?;
        if typename == ROOT {
            return Some(EntityRef::root());
        }

        let id = match self.key_fields.get(typename) {
            Some(key_field) => object.get(key_field),
            None => object.get("id").or_else(|| object.get("_id"))
        };
        let id = match id? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None
        };

        let mut key = String::with_capacity(typename.len() + id.len() + 1);
        key.push_str(typename);
        key.push(':');
        key.push_str(&id);
        Some(EntityRef(key))
    }
}

#[derive(Default)]
pub(crate) struct InMemoryData {
    pub(crate) entities: FnvHashMap<EntityRef, Entity>,
    pub(crate) stale: FnvHashSet<EntityRef>,
    dependents: FnvHashMap<EntityRef, FnvHashSet<Fingerprint>>,
    dependencies: FnvHashMap<Fingerprint, BTreeSet<EntityRef>>
}

impl InMemoryData {
    /// Replace the read set recorded for a query.
    pub(crate) fn set_dependencies(&mut self, query: Fingerprint, dependencies: BTreeSet<EntityRef>) {
        self.clear_dependencies(&query);
        for dependency in &dependencies {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(query.clone());
        }
        self.dependencies.insert(query, dependencies);
    }

    pub(crate) fn clear_dependencies(&mut self, query: &Fingerprint) {
        if let Some(previous) = self.dependencies.remove(query) {
            for dependency in previous {
                if let Some(queries) = self.dependents.get_mut(&dependency) {
                    queries.remove(query);
                    if queries.is_empty() {
                        self.dependents.remove(&dependency);
                    }
                }
            }
        }
    }

    pub(crate) fn get_dependents(&self, entity: &EntityRef) -> impl Iterator<Item = Fingerprint> + '_ {
        self.dependents
            .get(entity)
            .into_iter()
            .flat_map(|queries| queries.iter().cloned())
    }

    pub(crate) fn collect_links<'a>(link: &'a Link, out: &mut Vec<&'a EntityRef>) {
        match link {
            Link::Null => {}
            Link::Ref(entity) => out.push(entity),
            Link::Inline(fields) => Self::collect_field_links(fields, out),
            Link::List(items) => {
                for item in items {
                    Self::collect_links(item, out);
                }
            }
        }
    }

    pub(crate) fn collect_field_links<'a>(fields: &'a Fields, out: &mut Vec<&'a EntityRef>) {
        for value in fields.values() {
            if let FieldValue::Link(link) = value {
                Self::collect_links(link, out);
            }
        }
    }
}
