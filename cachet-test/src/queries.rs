use cachet::{Argument, Document, Field};
use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::sync::Arc;

fn dog_fields() -> Vec<Field> {
    vec![
        Field::typename(),
        Field::scalar("id"),
        Field::scalar("breed"),
        Field::scalar("displayImage")
    ]
}

lazy_static! {
    /// ```graphql
    /// query GetDog($breed: String!) {
    ///   dog(breed: $breed) { __typename id breed displayImage }
    /// }
    /// ```
    pub static ref GET_DOG: Arc<Document> = Arc::new(Document::query(
        "GetDog",
        vec![Field::object("dog", dog_fields()).arg("breed", Argument::variable("breed"))]
    ));

    /// ```graphql
    /// query GetDogs {
    ///   dogs { __typename id breed displayImage }
    /// }
    /// ```
    pub static ref GET_DOGS: Arc<Document> =
        Arc::new(Document::query("GetDogs", vec![Field::object("dogs", dog_fields())]));
}

/// The response body for a single dog.
pub fn dog_response(id: u32, breed: &str, display_image: &str) -> Value {
    json!({
        "dog": {
            "__typename": "Dog",
            "id": id,
            "breed": breed,
            "displayImage": display_image
        }
    })
}
