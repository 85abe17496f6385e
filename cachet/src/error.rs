use std::{error::Error as StdError, sync::Arc};

/// Every failure the client can report.
///
/// Errors are cheap to clone so a single settled request can be handed to every observer waiting
/// on it. Apart from [`MalformedVariables`](QueryError::MalformedVariables) and
/// [`InvalidOptions`](QueryError::InvalidOptions), which are rejected before any I/O, they reach
/// watchers through [`QueryResult::error`](crate::QueryResult::error).
#[derive(Clone, Debug, thiserror::Error)]
pub enum QueryError {
    /// The variables could not be turned into a canonical JSON object.
    #[error("malformed variables: {0}")]
    MalformedVariables(String),
    /// The transport failed to produce a response at all.
    #[error("network failure: {0}")]
    Network(Arc<dyn StdError + Send + Sync>),
    /// The server responded with GraphQL errors.
    #[error("{}", join_messages(.0))]
    GraphQL(Vec<crate::Error>),
    /// A response object could not be merged into the store. The write was rejected.
    #[error("normalization conflict on {entity}: {reason}")]
    NormalizationConflict { entity: String, reason: String },
    /// An option bag contained an unknown key or a value of the wrong type.
    #[error("invalid query options: {0}")]
    InvalidOptions(String),
    /// The data didn't match the shape of the typed response it was decoded into.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
    /// The request was aborted before it settled.
    #[error("request was cancelled")]
    Cancelled
}

impl QueryError {
    /// Wrap a transport-level error.
    pub fn network<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        QueryError::Network(Arc::new(error))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, QueryError::Network(_))
    }

    /// The GraphQL errors carried by this error, if any.
    pub fn graphql_errors(&self) -> &[crate::Error] {
        match self {
            QueryError::GraphQL(errors) => errors,
            _ => &[]
        }
    }
}

fn join_messages(errors: &[crate::Error]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn graphql_errors_display_their_messages() {
        let error = QueryError::GraphQL(vec![
            crate::Error::new("partial"),
            crate::Error::new("again")
        ]);
        assert_eq!(error.to_string(), "partial, again");
        assert_eq!(error.graphql_errors().len(), 2);
    }

    #[test]
    fn network_errors_keep_their_cause() {
        let error = QueryError::network(io::Error::new(io::ErrorKind::Other, "connection reset"));
        assert!(error.is_network());
        assert_eq!(error.to_string(), "network failure: connection reset");
        assert!(error.clone().graphql_errors().is_empty());
    }
}
