use crate::{Document, QueryError, Response, Variables};
use std::sync::Arc;

/// The network collaborator. This is the only I/O boundary of the client.
///
/// Implementations send the document and variables however they like (HTTP, WebSocket, an
/// in-process executor) and return the raw response. Transport failures are reported as
/// [`QueryError::Network`]; GraphQL errors belong in [`Response::errors`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(
        &self,
        document: &Document,
        variables: &Variables
    ) -> Result<Response, QueryError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(
        &self,
        document: &Document,
        variables: &Variables
    ) -> Result<Response, QueryError> {
        (**self).execute(document, variables).await
    }
}
