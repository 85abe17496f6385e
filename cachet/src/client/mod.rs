use std::sync::Arc;

mod builder;
mod r#impl;
mod observable;

use crate::{
    store::{EntityRef, ReadResult, Snapshot},
    types::ResolvedOptions,
    Document, GraphQLQuery, QueryError, QueryOptions, QueryResult, Response, Transport, Variables
};
pub use builder::ClientBuilder;
pub use observable::{ObservableQuery, ResultStream, Subscription};
pub use r#impl::ClientImpl;
use serde_json::Value;

#[derive(Clone)]
#[repr(transparent)]
pub struct Client(pub Arc<ClientImpl>);

impl Client {
    pub fn builder<T: Transport>(transport: T) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Run a query once.
    ///
    /// Resolves with the first settled result: cached data when the fetch policy allows it,
    /// otherwise the (possibly deduplicated) network response. Errors that leave no data to show
    /// are returned as `Err`, anything else (for example GraphQL errors under
    /// [`ErrorPolicy::All`](crate::ErrorPolicy::All)) comes back in [`QueryResult::error`].
    pub async fn query(
        &self,
        document: Arc<Document>,
        options: QueryOptions
    ) -> Result<QueryResult, QueryError> {
        self.0.query(document, options).await
    }

    /// Run a typed query once.
    pub async fn query_as<Q: GraphQLQuery>(
        &self,
        variables: Q::Variables,
        options: QueryOptions
    ) -> Result<Response<Q::ResponseData>, QueryError> {
        let options = options.variables(Variables::from_serialize(&variables)?);
        let result = self.0.query(Q::document(), options).await?;

        let data = result
            .data_as::<Q::ResponseData>()
            .map_err(|e| QueryError::UnexpectedShape(e.to_string()))?;
        let errors = result
            .error
            .as_ref()
            .map(|error| error.graphql_errors().to_vec())
            .filter(|errors| !errors.is_empty());
        Ok(Response { data, errors })
    }

    /// Watch a query.
    ///
    /// Watchers of the same document and variables with the same options share a single
    /// [`ObservableQuery`]. Nothing is read or fetched until the first subscriber arrives.
    pub fn watch_query(&self, document: Arc<Document>, options: QueryOptions) -> ObservableQuery {
        let resolved = ResolvedOptions::resolve(&options, self.0.fetch_policy, self.0.error_policy);
        ObservableQuery(self.0.watch(document, options.variables, resolved))
    }

    /// Read a query from the store without touching the network.
    pub fn read_query(&self, document: &Document, variables: &Variables) -> ReadResult {
        self.0.store.lock().read_query(document, variables)
    }

    /// Write data for a query into the store as if the server had returned it. Watchers of the
    /// affected entities are updated.
    pub fn write_query(
        &self,
        document: &Document,
        variables: &Variables,
        data: &Value
    ) -> Result<(), QueryError> {
        self.0.write_query(document, variables, data)
    }

    /// Mark an entity as stale. Watchers depending on it refetch.
    pub fn invalidate(&self, entity: &EntityRef) {
        self.0.invalidate(entity)
    }

    /// Remove an entity from the store. Watchers depending on it refetch.
    pub fn evict(&self, entity: &EntityRef) {
        self.0.evict(entity)
    }

    /// Remove every entity that can't be reached from the root query.
    pub fn gc(&self) -> Vec<EntityRef> {
        self.0.store.lock().gc().into_iter().collect()
    }

    pub fn extract(&self) -> Snapshot {
        self.0.store.lock().extract()
    }

    /// Replace the store's contents, e.g. with a snapshot taken by another client.
    pub fn restore(&self, snapshot: Snapshot) {
        self.0.restore(snapshot)
    }

    /// The number of requests currently on the wire.
    pub fn requests_in_flight(&self) -> usize {
        self.0.in_flight.len()
    }

    /// The number of distinct fingerprints that are currently watched.
    pub fn watched_queries(&self) -> usize {
        self.0.watched_queries()
    }
}
