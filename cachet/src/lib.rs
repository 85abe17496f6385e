//! A GraphQL client core built around a normalized cache.
//!
//! Components request data by document and variables. The client serves complete cached data
//! when it has it, otherwise it issues a single (deduplicated) request through a [`Transport`],
//! normalizes the response into the store and pushes fresh results to every watcher whose data
//! changed.
//!
//! # Getting Started
//!
//! ```
//! # tokio_test::block_on(async {
//! use cachet::{Client, QueryOptions};
//! use cachet_test::{queries, DogServer, MockTransport};
//!
//! let transport = MockTransport::new(DogServer::default());
//! let client = Client::builder(transport.clone()).build();
//!
//! let options = QueryOptions::new().variables(cachet::variables! { "breed" => "pug" });
//! let result = client.query(queries::GET_DOG.clone(), options.clone()).await.unwrap();
//! assert_eq!(result.data.unwrap()["dog"]["breed"], "pug");
//!
//! // The second request is answered from the normalized store
//! client.query(queries::GET_DOG.clone(), options).await.unwrap();
//! assert_eq!(transport.calls(), 1);
//! # });
//! ```
//!
//! # Watched queries
//!
//! [`Client::watch_query`] returns an [`ObservableQuery`]. All watchers of the same
//! [`Fingerprint`] with compatible options share one instance, so N components showing the same
//! data cause exactly one request. Subscribers get a [`QueryResult`] for every state transition
//! (minus the intermediate ones when `notify_on_network_status_change` is off), and the observable
//! can be refetched, polled or rebound to new variables without losing its subscribers.
//!
//! # Fetch policies
//!
//! * `CacheFirst` **(default)** - Use complete cached data, go to the network otherwise.
//! * `CacheAndNetwork` - Show complete cached data while always fetching fresh data.
//! * `NetworkOnly` - Always fetch, but still write the result to the store.
//! * `CacheOnly` - Never fetch.
//! * `NoCache` - Always fetch and never touch the store.
//!
//! # Error policies
//!
//! * `None` **(default)** - GraphQL errors discard any partial data.
//! * `All` - Partial data and errors are delivered together.
//! * `Ignore` - Errors are dropped and the data is delivered as is.

//#![warn(missing_docs)]

#[macro_use]
extern crate serde;
#[macro_use]
extern crate async_trait;

use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, fmt, fmt::Display, sync::Arc};

pub mod client;
mod document;
mod error;
mod in_flight;
mod scheduler;
pub mod store;
mod transport;
mod types;
pub mod utils;
mod variables;

pub use client::{Client, ClientBuilder, ObservableQuery, ResultStream, Subscription};
pub use document::{Argument, Document, Field};
pub use error::QueryError;
pub use store::{EntityRef, ReadResult, Snapshot};
pub use transport::Transport;
pub use types::{
    DebugInfo, ErrorPolicy, FetchPolicy, NetworkStatus, QueryOptions, QueryResult, ResultSource
};
pub use variables::{Fingerprint, Variables};

#[doc(hidden)]
pub use serde_json as __serde_json;

/// A query with statically known variable and response types.
///
/// This is the typed entry point used with [`Client::query_as`]. The document is still the
/// source of truth for normalization; the types only describe how variables are serialized and
/// how the resulting data is deserialized.
pub trait GraphQLQuery: Send + Sync + 'static {
    /// The shape of the variables expected by the query.
    type Variables: Serialize + Send + Sync + Clone + 'static;
    /// The top-level shape of the response data (the `data` field in the GraphQL response).
    type ResponseData: DeserializeOwned + Send + Sync + Clone + 'static;

    /// The document this query executes.
    fn document() -> Arc<Document>;
}

/// The generic shape taken by the responses of GraphQL APIs.
///
/// This is what a [`Transport`] produces. `Data` defaults to untyped JSON, which is what the
/// store normalizes.
///
/// [Spec](https://github.com/facebook/graphql/blob/master/spec/Section%207%20--%20Response.md)
///
/// ```
/// # use serde_json::json;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use cachet::Response;
///
/// let body: Response = serde_json::from_value(json!({
///     "data": { "dog": { "id": 1, "displayImage": "x" } },
///     "errors": [{ "message": "partial" }],
/// }))?;
///
/// assert!(body.has_errors());
/// assert_eq!(body.errors.unwrap()[0].message, "partial");
/// #     Ok(())
/// # }
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Response<Data = serde_json::Value> {
    /// The absent, partial or complete response data.
    pub data: Option<Data>,
    /// The top-level errors returned by the server.
    pub errors: Option<Vec<Error>>
}

impl<Data> Response<Data> {
    /// A response carrying only data.
    pub fn data(data: Data) -> Self {
        Response {
            data: Some(data),
            errors: None
        }
    }

    /// Whether the server reported at least one error.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().map_or(false, |errors| !errors.is_empty())
    }
}

/// An element in the top-level `errors` array of a response body.
///
/// [Spec](https://github.com/facebook/graphql/blob/master/spec/Section%207%20--%20Response.md)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Error {
    /// The human-readable error message. This is the only required field.
    pub message: String,
    /// Which locations in the query the error applies to.
    #[serde(default)]
    pub locations: Option<Vec<Location>>,
    /// Which path in the query the error applies to, e.g. `["users", 0, "email"]`.
    #[serde(default)]
    pub path: Option<Vec<PathFragment>>,
    /// Additional errors. Their exact format is defined by the server.
    #[serde(default)]
    pub extensions: Option<HashMap<String, serde_json::Value>>
}

impl Error {
    /// An error with just a message.
    pub fn new<M: Into<String>>(message: M) -> Self {
        Error {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use `/` as a separator like JSON Pointer.
        let path = self
            .path
            .as_ref()
            .map(|fragments| {
                fragments
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_else(|| "<query>".to_string());

        // Get the location of the error. We'll use just the first location for this.
        let loc = self
            .locations
            .as_ref()
            .and_then(|locations| locations.iter().next())
            .cloned()
            .unwrap_or_default();

        write!(f, "{}:{}:{}: {}", path, loc.line, loc.column, self.message)
    }
}

/// Part of a path in a query. It can be an object key or an array index. See [Error](./struct.Error.html).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PathFragment {
    /// A key inside an object
    Key(String),
    /// An index inside an array
    Index(i32)
}

impl Display for PathFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PathFragment::Key(ref key) => write!(f, "{}", key),
            PathFragment::Index(ref idx) => write!(f, "{}", idx)
        }
    }
}

/// Represents a location inside a query string. Used in errors. See [Error](./struct.Error.html).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    /// The line number in the query string where the error originated (starting from 1).
    pub line: i32,
    /// The column number in the query string where the error originated (starting from 1).
    pub column: i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display_uses_path_and_first_location() {
        let error: Error = serde_json::from_value(json!({
            "message": "Seismic activity detected",
            "path": ["underground", 20],
            "locations": [{ "line": 3, "column": 7 }]
        }))
        .unwrap();

        assert_eq!(error.to_string(), "underground/20:3:7: Seismic activity detected");
    }

    #[test]
    fn error_display_falls_back_to_query_root() {
        assert_eq!(Error::new("boom").to_string(), "<query>:0:0: boom");
    }

    #[test]
    fn empty_error_lists_are_not_errors() {
        let response: Response = serde_json::from_value(json!({
            "data": { "dog": null },
            "errors": []
        }))
        .unwrap();

        assert!(!response.has_errors());
    }
}
