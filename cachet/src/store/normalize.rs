use crate::{
    store::data::{merge_fields, Entity, EntityRef, FieldValue, Fields, InMemoryData, KeyConfig, Link},
    Field, QueryError, Variables
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn conflict(entity: &EntityRef, reason: String) -> QueryError {
    QueryError::NormalizationConflict {
        entity: entity.to_string(),
        reason
    }
}

/// Flattens a response into per-entity field sets without touching the store.
///
/// Nothing is written until the whole response normalized cleanly, so a conflict anywhere
/// rejects the write as a unit.
pub(crate) struct Normalizer<'a> {
    data: &'a InMemoryData,
    keys: &'a KeyConfig,
    variables: &'a Variables,
    pending: BTreeMap<EntityRef, Entity>
}

impl<'a> Normalizer<'a> {
    pub(crate) fn new(data: &'a InMemoryData, keys: &'a KeyConfig, variables: &'a Variables) -> Self {
        Normalizer {
            data,
            keys,
            variables,
            pending: BTreeMap::new()
        }
    }

    pub(crate) fn normalize(
        mut self,
        selection: &[Field],
        response: &Value
    ) -> Result<BTreeMap<EntityRef, Entity>, QueryError> {
        let root = EntityRef::root();
        match response {
            Value::Object(object) => {
                self.write_entity(root, Some("Query"), selection, object)?;
                Ok(self.pending)
            }
            other => Err(conflict(
                &root,
                format!("response data must be an object, got {}", other)
            ))
        }
    }

    fn write_entity(
        &mut self,
        entity: EntityRef,
        typename: Option<&str>,
        selection: &[Field],
        object: &Map<String, Value>
    ) -> Result<(), QueryError> {
        self.check_typename(&entity, typename)?;
        let fields = self.collect_fields(&entity, selection, object)?;

        let pending = self.pending.entry(entity).or_default();
        if pending.typename.is_none() {
            pending.typename = typename.map(str::to_string);
        }
        merge_fields(&mut pending.fields, fields);
        Ok(())
    }

    fn check_typename(&self, entity: &EntityRef, typename: Option<&str>) -> Result<(), QueryError> {
        let typename = match typename {
            Some(typename) => typename,
            None => return Ok(())
        };
        let known = self
            .pending
            .get(entity)
            .and_then(|pending| pending.typename.as_deref())
            .or_else(|| {
                self.data
                    .entities
                    .get(entity)
                    .and_then(|stored| stored.typename.as_deref())
            });

        match known {
            Some(known) if known != typename => Err(conflict(
                entity,
                format!("stored as {} but the response claims {}", known, typename)
            )),
            _ => Ok(())
        }
    }

    fn collect_fields(
        &mut self,
        owner: &EntityRef,
        selection: &[Field],
        object: &Map<String, Value>
    ) -> Result<Fields, QueryError> {
        let mut fields = Fields::new();
        for field in selection {
            // Missing fields stay missing, the next read will simply be incomplete
            let value = match object.get(field.response_key()) {
                Some(value) => value,
                None => continue
            };
            let key = field.store_key(self.variables);
            let stored = match &field.selection {
                None => FieldValue::Scalar(value.clone()),
                Some(selection) => FieldValue::Link(self.link(owner, &key, selection, value)?)
            };
            fields.insert(key, stored);
        }
        Ok(fields)
    }

    fn link(
        &mut self,
        owner: &EntityRef,
        key: &str,
        selection: &[Field],
        value: &Value
    ) -> Result<Link, QueryError> {
        match value {
            Value::Null => Ok(Link::Null),
            Value::Array(items) => items
                .iter()
                .map(|item| self.link(owner, key, selection, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Link::List),
            Value::Object(object) => {
                let typename = object.get("__typename").and_then(Value::as_str);
                match self.keys.key_of(typename, object) {
                    Some(entity) => {
                        self.write_entity(entity.clone(), typename, selection, object)?;
                        Ok(Link::Ref(entity))
                    }
                    None => self.collect_fields(owner, selection, object).map(Link::Inline)
                }
            }
            other => Err(conflict(
                owner,
                format!("field {} is selected as an object but holds {}", key, other)
            ))
        }
    }
}
