use crate::{
    store::data::{EntityRef, FieldValue, Fields, InMemoryData, Link},
    Field, Variables
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Rebuilds a result from the store by walking a selection.
pub(crate) struct Denormalizer<'a> {
    data: &'a InMemoryData,
    variables: &'a Variables,
    pub(crate) dependencies: BTreeSet<EntityRef>,
    pub(crate) dangling: BTreeSet<EntityRef>,
    pub(crate) complete: bool
}

impl<'a> Denormalizer<'a> {
    pub(crate) fn new(data: &'a InMemoryData, variables: &'a Variables) -> Self {
        Denormalizer {
            data,
            variables,
            dependencies: BTreeSet::new(),
            dangling: BTreeSet::new(),
            complete: true
        }
    }

    pub(crate) fn read_entity(&mut self, entity: &EntityRef, selection: &[Field]) -> Option<Value> {
        self.dependencies.insert(entity.clone());
        if self.data.stale.contains(entity) {
            self.complete = false;
        }

        match self.data.entities.get(entity) {
            Some(stored) => Some(Value::Object(self.read_fields(
                &stored.fields,
                stored.typename.as_deref(),
                selection
            ))),
            None => {
                self.complete = false;
                if !entity.is_root() {
                    self.dangling.insert(entity.clone());
                }
                None
            }
        }
    }

    fn read_fields(
        &mut self,
        fields: &Fields,
        typename: Option<&str>,
        selection: &[Field]
    ) -> Map<String, Value> {
        let mut result = Map::new();
        for field in selection {
            let key = field.store_key(self.variables);
            let value = match (fields.get(&key), &field.selection) {
                (Some(FieldValue::Scalar(value)), None) => Some(value.clone()),
                (Some(FieldValue::Scalar(Value::Null)), Some(_)) => Some(Value::Null),
                (Some(FieldValue::Link(link)), Some(selection)) => self.read_link(link, selection),
                (None, None) if field.name == "__typename" && typename.is_some() => {
                    typename.map(|typename| Value::String(typename.to_string()))
                }
                _ => {
                    self.complete = false;
                    None
                }
            };
            if let Some(value) = value {
                result.insert(field.response_key().to_string(), value);
            }
        }
        result
    }

    fn read_link(&mut self, link: &Link, selection: &[Field]) -> Option<Value> {
        match link {
            Link::Null => Some(Value::Null),
            Link::Ref(entity) => self.read_entity(entity, selection),
            Link::Inline(fields) => Some(Value::Object(self.read_fields(fields, None, selection))),
            Link::List(items) => {
                // Read every item so all dangling references get recorded
                let items: Vec<_> = items
                    .iter()
                    .map(|item| self.read_link(item, selection))
                    .collect();
                items
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }
}
