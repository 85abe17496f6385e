use crate::{utils::progressive_hash, Document, QueryError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc
};

/// The variables of a request.
///
/// Variables are kept in canonical form: keys are ordered at every nesting level, so two
/// mappings built in different insertion orders compare and hash equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert any serializable value into variables.
    ///
    /// The value must serialize to a JSON object (or `null`, meaning no variables). Anything that
    /// can't be represented as JSON, such as maps with non-string keys, is rejected with
    /// [`QueryError::MalformedVariables`].
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, QueryError> {
        let value = serde_json::to_value(value)
            .map_err(|e| QueryError::MalformedVariables(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Variables(
                map.into_iter()
                    .map(|(name, value)| (name, canonicalize(value)))
                    .collect()
            )),
            other => Err(QueryError::MalformedVariables(format!(
                "expected an object, got {}",
                kind(&other)
            )))
        }
    }

    pub fn insert<N: Into<String>>(&mut self, name: N, value: Value) {
        self.0.insert(name.into(), canonicalize(value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl<'de> Deserialize<'de> for Variables {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Variables::from_value(value).map_err(serde::de::Error::custom)
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object"
    }
}

/// The cache and deduplication key of a request: its document plus its variables.
///
/// Computing a fingerprint is pure and total. Two requests with equal fingerprints are the same
/// logical query. The hash only speeds up lookups, equality is decided on the canonical encoding
/// of the document and variables.
#[derive(Clone, Debug)]
pub struct Fingerprint {
    hash: u64,
    canonical: Arc<[u8]>
}

impl Fingerprint {
    pub fn new(document: &Document, variables: &Variables) -> Self {
        // Strings, field trees and serde_json values always encode
        let canonical = bincode::serialize(&(
            document.operation_name(),
            document.selection(),
            variables
        ))
        .unwrap_or_default();

        Fingerprint {
            hash: progressive_hash(document.key(), variables),
            canonical: canonical.into()
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && (Arc::ptr_eq(&self.canonical, &other.canonical) || self.canonical == other.canonical)
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for Fingerprint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fingerprint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| self.canonical.cmp(&other.canonical))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Argument, Field};
    use serde_json::json;
    use std::collections::HashMap;

    fn document() -> Document {
        Document::query(
            "GetDog",
            vec![Field::object("dog", vec![Field::scalar("id")])
                .arg("breed", Argument::variable("breed"))]
        )
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let mut a = Variables::new();
        a.insert("breed", json!("pug"));
        a.insert("filter", json!({ "size": "small", "color": "fawn" }));

        let b = Variables::from_value(json!({
            "filter": { "color": "fawn", "size": "small" },
            "breed": "pug"
        }))
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(Fingerprint::new(&document(), &a), Fingerprint::new(&document(), &b));
    }

    #[test]
    fn fingerprint_depends_on_values_and_document() {
        let pug = Variables::from_value(json!({ "breed": "pug" })).unwrap();
        let bulldog = Variables::from_value(json!({ "breed": "bulldog" })).unwrap();
        let other = Document::query("GetDogs", vec![Field::scalar("id")]);

        let fingerprint = Fingerprint::new(&document(), &pug);
        assert_eq!(fingerprint, Fingerprint::new(&document(), &pug));
        assert_ne!(fingerprint, Fingerprint::new(&document(), &bulldog));
        assert_ne!(fingerprint, Fingerprint::new(&other, &pug));
    }

    #[test]
    fn colliding_hashes_are_different_fingerprints() {
        // djb2 maps "ab" and "bA" onto the same hash
        let ab = Variables::from_value(json!({ "breed": "ab" })).unwrap();
        let ba = Variables::from_value(json!({ "breed": "bA" })).unwrap();
        let a = Fingerprint::new(&document(), &ab);
        let b = Fingerprint::new(&document(), &ba);

        assert_eq!(a.as_u64(), b.as_u64());
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);

        let mut map = HashMap::new();
        map.insert(a.clone(), "ab");
        map.insert(b.clone(), "bA");
        assert_eq!(map.len(), 2);
        assert_eq!(map[&b], "bA");
    }

    #[test]
    fn non_object_variables_are_malformed() {
        let result = Variables::from_value(json!([1, 2]));
        assert!(matches!(result, Err(QueryError::MalformedVariables(_))));
    }

    #[test]
    fn non_string_map_keys_are_malformed() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], "value");

        let result = Variables::from_serialize(&map);
        assert!(matches!(result, Err(QueryError::MalformedVariables(_))));
    }

    #[test]
    fn typed_variables_serialize_into_canonical_form() {
        #[derive(Serialize)]
        struct DogVariables {
            breed: String,
            limit: u32
        }

        let variables = Variables::from_serialize(&DogVariables {
            breed: "pug".to_string(),
            limit: 2
        })
        .unwrap();

        assert_eq!(variables.get("breed"), Some(&json!("pug")));
        assert_eq!(variables.to_value(), json!({ "breed": "pug", "limit": 2 }));
    }
}
