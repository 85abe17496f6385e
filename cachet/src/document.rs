use crate::{utils::progressive_hash, Variables};
use serde_json::Value;
use std::collections::BTreeMap;

/// A field argument, either a literal or a reference to one of the operation's variables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Argument {
    Literal(Value),
    Variable(String)
}

impl Argument {
    pub fn literal<V: Into<Value>>(value: V) -> Self {
        Argument::Literal(value.into())
    }

    pub fn variable<N: Into<String>>(name: N) -> Self {
        Argument::Variable(name.into())
    }
}

/// A single selected field.
///
/// Leaf fields have no selection; object fields (including lists of objects) carry the selection
/// applied to every object they resolve to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: BTreeMap<String, Argument>,
    pub selection: Option<Vec<Field>>
}

impl Field {
    pub fn scalar<N: Into<String>>(name: N) -> Self {
        Field {
            name: name.into(),
            alias: None,
            arguments: BTreeMap::new(),
            selection: None
        }
    }

    pub fn object<N: Into<String>>(name: N, selection: Vec<Field>) -> Self {
        Field {
            selection: Some(selection),
            ..Field::scalar(name)
        }
    }

    /// The `__typename` meta field.
    pub fn typename() -> Self {
        Field::scalar("__typename")
    }

    pub fn alias<A: Into<String>>(mut self, alias: A) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg<N: Into<String>>(mut self, name: N, argument: Argument) -> Self {
        self.arguments.insert(name.into(), argument);
        self
    }

    /// The key this field appears under in response data.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// The key this field is stored under: the field name plus its resolved arguments.
    ///
    /// Arguments referencing variables that weren't provided are omitted, like GraphQL does.
    pub fn store_key(&self, variables: &Variables) -> String {
        let arguments: BTreeMap<&str, &Value> = self
            .arguments
            .iter()
            .filter_map(|(name, argument)| {
                let value = match argument {
                    Argument::Literal(value) => Some(value),
                    Argument::Variable(variable) => variables.get(variable)
                };
                value.map(|value| (name.as_str(), value))
            })
            .collect();

        if arguments.is_empty() {
            self.name.clone()
        } else {
            // BTreeMaps serialize in key order, so this is canonical
            let args = serde_json::to_string(&arguments).unwrap_or_default();
            let mut key = String::with_capacity(self.name.len() + args.len() + 2);
            key.push_str(&self.name);
            key.push('(');
            key.push_str(&args);
            key.push(')');
            key
        }
    }
}

/// An already-parsed query document.
///
/// Documents are immutable and structurally comparable. The structural hash is computed once on
/// construction and is the document half of every [`Fingerprint`](crate::Fingerprint).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    operation_name: String,
    selection: Vec<Field>,
    key: u32
}

impl Document {
    /// A query operation selecting `selection` on the root `Query` type.
    pub fn query<N: Into<String>>(operation_name: N, selection: Vec<Field>) -> Self {
        let operation_name = operation_name.into();
        let key = progressive_hash(5381, &(&operation_name, &selection)) as u32;
        Document {
            operation_name,
            selection,
            key
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn selection(&self) -> &[Field] {
        &self.selection
    }

    /// The structural hash of this document.
    pub fn key(&self) -> u32 {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dog_field() -> Field {
        Field::object("dog", vec![Field::typename(), Field::scalar("id")])
            .arg("breed", Argument::variable("breed"))
    }

    #[test]
    fn store_key_resolves_variables() {
        let mut variables = Variables::new();
        variables.insert("breed", json!("pug"));

        assert_eq!(dog_field().store_key(&variables), r#"dog({"breed":"pug"})"#);
    }

    #[test]
    fn store_key_omits_missing_variables() {
        assert_eq!(dog_field().store_key(&Variables::new()), "dog");
    }

    #[test]
    fn store_key_sorts_arguments() {
        let field = Field::scalar("dogs")
            .arg("limit", Argument::literal(10))
            .arg("after", Argument::literal("abc"));
        assert_eq!(
            field.store_key(&Variables::new()),
            r#"dogs({"after":"abc","limit":10})"#
        );
    }

    #[test]
    fn aliases_only_change_the_response_key() {
        let field = dog_field().alias("favourite");
        assert_eq!(field.response_key(), "favourite");
        assert_eq!(field.store_key(&Variables::new()), "dog");
    }

    #[test]
    fn structurally_equal_documents_share_a_key() {
        let a = Document::query("GetDog", vec![dog_field()]);
        let b = Document::query("GetDog", vec![dog_field()]);
        let c = Document::query("GetDog", vec![dog_field().alias("other")]);

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
