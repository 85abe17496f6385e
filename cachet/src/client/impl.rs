use crate::{
    client::observable::ObservableInner,
    in_flight::{InFlight, PendingRequest, Settled, WritePolicy},
    scheduler::Scheduler,
    store::{EntityRef, ReadResult, Snapshot, Store},
    types::ResolvedOptions,
    Document, ErrorPolicy, FetchPolicy, Fingerprint, NetworkStatus, QueryError, QueryOptions,
    QueryResult, Response, ResultSource, Transport, Variables
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak
    },
    time::Duration
};
use tracing::{debug, warn};

pub struct ClientImpl {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Mutex<Store>,
    pub(crate) in_flight: Arc<InFlight>,
    pub(crate) scheduler: Scheduler,
    /// Watched queries by the fingerprint they currently observe.
    pub(crate) watched: Mutex<HashMap<Fingerprint, Vec<(u64, Weak<ObservableInner>)>>>,
    pub(crate) fetch_policy: FetchPolicy,
    pub(crate) error_policy: ErrorPolicy,
    pub(crate) teardown_delay: Option<Duration>,
    pub(crate) next_id: AtomicU64
}

pub(crate) fn write_policy(options: &ResolvedOptions) -> WritePolicy {
    WritePolicy {
        cache: options.fetch_policy.writes_cache(),
        partial: options.error_policy.keeps_partial_data()
    }
}

/// Turn a settled request into the result a requester sees.
///
/// `fresh` is the complete read-back from the store if the response was written and the
/// requester reads the store, `previous` is the data the requester showed before.
pub(crate) fn network_result(
    settled: &Settled,
    error_policy: ErrorPolicy,
    fresh: Option<Value>,
    previous: Option<Value>
) -> QueryResult {
    let mut result = QueryResult::new(NetworkStatus::Ready, ResultSource::Network);

    let response = match &settled.response {
        Ok(response) => response,
        Err(error) => {
            if error_policy.keeps_partial_data() {
                result.network_status = NetworkStatus::ReadyStale;
                result.data = previous;
            } else {
                result.network_status = NetworkStatus::Error;
            }
            result.error = Some(error.clone());
            return result;
        }
    };

    if let Some(conflict) = &settled.conflict {
        result.network_status = NetworkStatus::Error;
        result.data = previous;
        result.error = Some(conflict.clone());
        return result;
    }

    let data = fresh.or_else(|| response_data(response));
    if response.has_errors() {
        let error = QueryError::GraphQL(response.errors.clone().unwrap_or_default());
        match error_policy {
            ErrorPolicy::None => {
                result.network_status = NetworkStatus::Error;
                result.error = Some(error);
            }
            ErrorPolicy::All => {
                result.network_status = NetworkStatus::ReadyStale;
                result.data = data.or(previous);
                result.error = Some(error);
            }
            ErrorPolicy::Ignore => result.data = data
        }
    } else {
        result.data = data;
    }
    result
}

fn response_data(response: &Response) -> Option<Value> {
    response.data.clone().filter(|data| !data.is_null())
}

impl ClientImpl {
    /// Execute a request through the in-flight tracker, writing and broadcasting its response.
    pub(crate) fn fetch(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        document: Arc<Document>,
        variables: Variables,
        write: WritePolicy
    ) -> PendingRequest {
        let client = self.clone();
        let key = fingerprint.clone();
        self.in_flight.execute(fingerprint, write, move |write| async move {
            let response = client.transport.execute(&document, &variables).await;
            let write = *write.lock();
            client.settle(key, &document, &variables, response, write)
        })
    }

    fn settle(
        &self,
        fingerprint: Fingerprint,
        document: &Document,
        variables: &Variables,
        response: Result<Response, QueryError>,
        write: WritePolicy
    ) -> Settled {
        let response = match response {
            Ok(response) => Arc::new(response),
            Err(error) => {
                warn!(fingerprint = %fingerprint, error = %error, "Request failed");
                return Settled {
                    response: Err(error),
                    written: false,
                    conflict: None
                };
            }
        };

        let mut settled = Settled {
            response: Ok(response.clone()),
            written: false,
            conflict: None
        };
        let data = match &response.data {
            Some(data) if !data.is_null() => data,
            _ => return settled
        };
        if !write.cache || (response.has_errors() && !write.partial) {
            return settled;
        }

        let changed = self.store.lock().write(document, variables, data);
        match changed {
            Ok(changed) => {
                settled.written = true;
                debug!(
                    fingerprint = %fingerprint,
                    changed = changed.len(),
                    "Wrote response to the store"
                );
                self.broadcast(&changed, Some(fingerprint));
            }
            Err(error) => {
                warn!(fingerprint = %fingerprint, error = %error, "Rejected response");
                settled.conflict = Some(error);
            }
        }
        settled
    }

    /// Recompute every watched query that read one of `changed`.
    ///
    /// The query whose request caused the change applies the response itself, so it's skipped
    /// while it's still waiting on that request.
    pub(crate) fn broadcast(&self, changed: &BTreeSet<EntityRef>, originating: Option<Fingerprint>) {
        if changed.is_empty() {
            return;
        }
        let dependents = self.store.lock().dependents(changed);
        self.recompute(dependents, originating);
    }

    fn recompute(&self, fingerprints: BTreeSet<Fingerprint>, originating: Option<Fingerprint>) {
        for observable in self.observables(&fingerprints) {
            observable.recompute(originating.as_ref());
        }
    }

    fn observables(&self, fingerprints: &BTreeSet<Fingerprint>) -> Vec<Arc<ObservableInner>> {
        let watched = self.watched.lock();
        fingerprints
            .iter()
            .filter_map(|fingerprint| watched.get(fingerprint))
            .flat_map(|observables| observables.iter())
            .filter_map(|(_, observable)| observable.upgrade())
            .collect()
    }

    /// Read a registered query and record what it depends on.
    pub(crate) fn read_tracked(&self, fingerprint: &Fingerprint) -> ReadResult {
        let mut store = self.store.lock();
        let read = store.read(fingerprint);
        store.track(fingerprint.clone(), read.dependencies.clone());
        read
    }

    pub(crate) fn register(&self, fingerprint: Fingerprint, observable: &Arc<ObservableInner>) {
        let mut watched = self.watched.lock();
        let observables = watched.entry(fingerprint).or_insert_with(Vec::new);
        observables.retain(|(_, observable)| observable.strong_count() > 0);
        if !observables.iter().any(|(id, _)| *id == observable.id) {
            observables.push((observable.id, Arc::downgrade(observable)));
        }
    }

    /// Remove a watched query. The store forgets the fingerprint once nobody watches it.
    pub(crate) fn unregister(&self, fingerprint: &Fingerprint, id: u64) {
        let mut watched = self.watched.lock();
        let now_unwatched = match watched.get_mut(fingerprint) {
            Some(observables) => {
                observables.retain(|(other, observable)| {
                    *other != id && observable.strong_count() > 0
                });
                observables.is_empty()
            }
            None => false
        };
        if now_unwatched {
            watched.remove(fingerprint);
            self.store.lock().forget(fingerprint);
            debug!(fingerprint = %fingerprint, "Stopped watching");
        }
    }

    /// The watched query for `document` and `variables` with `options`, shared with every other
    /// watcher asking for the same thing.
    pub(crate) fn watch(
        self: &Arc<Self>,
        document: Arc<Document>,
        variables: Variables,
        options: ResolvedOptions
    ) -> Arc<ObservableInner> {
        let fingerprint = Fingerprint::new(&document, &variables);
        let mut watched = self.watched.lock();
        let live: Vec<Arc<ObservableInner>> = watched
            .get(&fingerprint)
            .map(|observables| {
                observables
                    .iter()
                    .filter_map(|(_, observable)| observable.upgrade())
                    .collect()
            })
            .unwrap_or_default();

        let observable = match live
            .iter()
            .find(|observable| observable.is_compatible(&fingerprint, &options))
        {
            Some(shared) => shared.clone(),
            None => {
                let observable = ObservableInner::new(self.clone(), document, variables, options);
                let observables = watched.entry(fingerprint).or_insert_with(Vec::new);
                observables.retain(|(_, observable)| observable.strong_count() > 0);
                observables.push((observable.id, Arc::downgrade(&observable)));
                observable
            }
        };

        // Handles that turn out to be the last reference unregister themselves on drop
        drop(watched);
        drop(live);
        observable
    }

    pub(crate) fn watched_queries(&self) -> usize {
        self.watched.lock().len()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn query(
        self: &Arc<Self>,
        document: Arc<Document>,
        options: QueryOptions
    ) -> Result<QueryResult, QueryError> {
        let resolved = ResolvedOptions::resolve(&options, self.fetch_policy, self.error_policy);
        let variables = options.variables;

        if resolved.skip {
            return Ok(QueryResult::new(NetworkStatus::Ready, ResultSource::Cache));
        }

        if resolved.fetch_policy.reads_cache() {
            let read = self.store.lock().read_query(&document, &variables);
            let cache_only = resolved.fetch_policy == FetchPolicy::CacheOnly;
            if read.complete || cache_only {
                let mut result = QueryResult::new(NetworkStatus::Ready, ResultSource::Cache);
                result.partial = !read.complete;
                if read.complete || resolved.return_partial_data {
                    result.data = read.data;
                }
                return Ok(result);
            }
        }

        let fingerprint = Fingerprint::new(&document, &variables);
        let pending = self.fetch(
            fingerprint,
            document.clone(),
            variables.clone(),
            write_policy(&resolved)
        );
        let did_dedup = pending.did_dedup;
        let settled = pending.await;

        let fresh = if settled.written && resolved.fetch_policy.writes_cache() {
            let read = self.store.lock().read_query(&document, &variables);
            if read.complete {
                read.data
            } else {
                None
            }
        } else {
            None
        };

        let mut result = network_result(&settled, resolved.error_policy, fresh, None);
        result.debug_info.did_dedup = did_dedup;
        match result.error.take() {
            Some(error) if result.data.is_none() => Err(error),
            error => {
                result.error = error;
                Ok(result)
            }
        }
    }

    pub(crate) fn write_query(
        &self,
        document: &Document,
        variables: &Variables,
        data: &Value
    ) -> Result<(), QueryError> {
        let changed = self.store.lock().write(document, variables, data)?;
        self.broadcast(&changed, None);
        Ok(())
    }

    pub(crate) fn invalidate(&self, entity: &EntityRef) {
        let dependents = self.store.lock().invalidate(entity);
        self.recompute(dependents, None);
    }

    pub(crate) fn evict(&self, entity: &EntityRef) {
        let dependents = self.store.lock().evict(entity);
        self.recompute(dependents, None);
    }

    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let touched = self.store.lock().restore(snapshot);
        self.broadcast(&touched, None);
    }
}
