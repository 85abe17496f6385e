use crate::{
    client::r#impl::{network_result, write_policy, ClientImpl},
    in_flight::Settled,
    scheduler::Pollable,
    types::ResolvedOptions,
    Document, FetchPolicy, Fingerprint, NetworkStatus, QueryResult, ResultSource, Variables
};
use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver},
    future::{AbortHandle, Abortable, BoxFuture},
    FutureExt, Stream, StreamExt
};
use parking_lot::Mutex;
use serde_json::Value;
use stable_vec::StableVec;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc
    },
    task::{Context, Poll},
    time::Duration
};
use tracing::{debug, trace};

type Callback = Arc<dyn Fn(&QueryResult) + Send + Sync>;

struct Listener {
    callback: Callback,
    last_version: AtomicU64
}

impl Listener {
    /// Results can be published from several threads at once, so a listener only ever moves
    /// forward and never sees an older result after a newer one.
    fn deliver(&self, result: &QueryResult) {
        if self.last_version.fetch_max(result.version, Ordering::AcqRel) < result.version {
            (self.callback)(result);
        }
    }
}

struct QueryState {
    fingerprint: Fingerprint,
    document: Arc<Document>,
    variables: Variables,
    options: ResolvedOptions,
    /// The current result, including suppressed intermediate states.
    last: QueryResult,
    /// The last result subscribers were notified of, replayed to new subscribers.
    delivered: Option<QueryResult>,
    version: u64,
    /// Bumped for every request this query issues. Only the latest one may apply its response.
    seq: u64,
    fetch: Option<AbortHandle>,
    cache_complete: bool,
    active: bool
}

pub(crate) struct ObservableInner {
    pub(crate) id: u64,
    client: Arc<ClientImpl>,
    state: Mutex<QueryState>,
    subscribers: Mutex<StableVec<Arc<Listener>>>,
    /// Bumped on every subscribe to cancel pending delayed teardowns.
    generation: AtomicU64
}

impl ObservableInner {
    pub(crate) fn new(
        client: Arc<ClientImpl>,
        document: Arc<Document>,
        variables: Variables,
        options: ResolvedOptions
    ) -> Arc<Self> {
        let fingerprint = Fingerprint::new(&document, &variables);
        Arc::new(ObservableInner {
            id: client.next_id(),
            state: Mutex::new(QueryState {
                fingerprint,
                document,
                variables,
                options,
                last: QueryResult::new(NetworkStatus::Initializing, ResultSource::Cache),
                delivered: None,
                version: 0,
                seq: 0,
                fetch: None,
                cache_complete: false,
                active: false
            }),
            client,
            subscribers: Mutex::new(StableVec::new()),
            generation: AtomicU64::new(0)
        })
    }

    pub(crate) fn is_compatible(&self, fingerprint: &Fingerprint, options: &ResolvedOptions) -> bool {
        let state = self.state.lock();
        state.fingerprint == *fingerprint && state.options == *options
    }

    /// Record a new current result. Returns it if subscribers should be notified.
    ///
    /// Without `notify_on_network_status_change` refetch and poll states are never delivered,
    /// data that changes in the meantime reaches subscribers with the settled result.
    fn publish(&self, state: &mut QueryState, mut result: QueryResult) -> Option<QueryResult> {
        state.version += 1;
        result.version = state.version;

        let intermediate = matches!(
            result.network_status,
            NetworkStatus::Refetching | NetworkStatus::Polling
        );
        let suppressed = intermediate && !state.options.notify_on_network_status_change;

        state.last = result.clone();
        if suppressed {
            trace!(query = self.id, status = ?result.network_status, "Suppressed notification");
            None
        } else {
            state.delivered = Some(result.clone());
            Some(result)
        }
    }

    fn notify(&self, results: Vec<QueryResult>) {
        if results.is_empty() {
            return;
        }
        let listeners: Vec<Arc<Listener>> = self.subscribers.lock().values().cloned().collect();
        for result in &results {
            for listener in &listeners {
                listener.deliver(result);
            }
        }
    }

    /// Issue a request for the current fingerprint and publish the loading state.
    fn start_fetch(
        self: &Arc<Self>,
        state: &mut QueryState,
        status: NetworkStatus,
        data: Option<Value>,
        source: ResultSource
    ) -> Option<QueryResult> {
        state.seq += 1;
        let seq = state.seq;
        if let Some(previous) = state.fetch.take() {
            previous.abort();
        }

        let pending = self.client.fetch(
            state.fingerprint.clone(),
            state.document.clone(),
            state.variables.clone(),
            write_policy(&state.options)
        );
        let did_dedup = pending.did_dedup;
        let this = Arc::downgrade(self);
        let (abort, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            async move {
                let settled = pending.await;
                if let Some(this) = this.upgrade() {
                    this.apply(seq, did_dedup, settled);
                }
            },
            registration
        ));
        state.fetch = Some(abort);

        let mut loading = QueryResult::new(status, source);
        loading.partial = data.is_some() && !state.cache_complete;
        loading.data = data;
        loading.debug_info.did_dedup = did_dedup;
        self.publish(state, loading)
    }

    fn apply(&self, seq: u64, did_dedup: bool, settled: Settled) {
        let result = {
            let mut state = self.state.lock();
            if state.seq != seq || !state.active {
                trace!(query = self.id, "Dropped superseded response");
                return;
            }
            state.fetch = None;

            let reads_store = state.options.fetch_policy != FetchPolicy::NoCache;
            let fresh = if settled.written && reads_store {
                let read = self.client.read_tracked(&state.fingerprint);
                state.cache_complete = read.complete;
                if read.complete {
                    read.data
                } else {
                    None
                }
            } else {
                None
            };

            let previous = state.last.data.clone();
            let mut result = network_result(&settled, state.options.error_policy, fresh, previous);
            result.debug_info.did_dedup = did_dedup;
            self.publish(&mut state, result)
        };
        self.notify(result.into_iter().collect());
    }

    /// Produce the first result for the current fingerprint, from the store or the network.
    fn evaluate(self: &Arc<Self>, state: &mut QueryState, loading: NetworkStatus) -> Vec<QueryResult> {
        let mut results = Vec::new();
        if state.options.skip {
            let result = QueryResult::new(NetworkStatus::Ready, ResultSource::Cache);
            results.extend(self.publish(state, result));
            return results;
        }

        let policy = state.options.fetch_policy;
        if !policy.reads_cache() {
            results.extend(self.start_fetch(state, loading, None, ResultSource::Network));
            return results;
        }

        let read = self.client.read_tracked(&state.fingerprint);
        state.cache_complete = read.complete;
        let usable = read.complete
            || state.options.return_partial_data
            || policy == FetchPolicy::CacheOnly;
        let cached = if usable { read.data } else { None };

        match policy {
            FetchPolicy::CacheOnly => {
                let mut result = QueryResult::new(NetworkStatus::Ready, ResultSource::Cache);
                result.partial = !read.complete;
                result.data = cached;
                results.extend(self.publish(state, result));
            }
            FetchPolicy::CacheFirst if read.complete => {
                let mut result = QueryResult::new(NetworkStatus::Ready, ResultSource::Cache);
                result.data = cached;
                results.extend(self.publish(state, result));
            }
            _ => results.extend(self.start_fetch(state, loading, cached, ResultSource::Cache))
        }
        results
    }

    /// Bring a query with its first subscriber to life.
    fn activate(self: &Arc<Self>) {
        let (results, fingerprint, poll_interval) = {
            let mut state = self.state.lock();
            if state.active {
                return;
            }
            state.active = true;
            if state.options.fetch_policy != FetchPolicy::NoCache {
                self.client.store.lock().register(
                    state.fingerprint.clone(),
                    state.document.clone(),
                    state.variables.clone()
                );
            }
            let results = self.evaluate(&mut state, NetworkStatus::Initializing);
            (results, state.fingerprint.clone(), state.options.poll_interval)
        };

        self.client.register(fingerprint.clone(), self);
        if let Some(interval) = poll_interval {
            self.client
                .scheduler
                .start_polling(self.id, Arc::downgrade(self), interval);
        }
        debug!(query = self.id, fingerprint = %fingerprint, "Activated watched query");
        self.notify(results);
    }

    fn teardown(&self) {
        let fingerprint = {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.seq += 1;
            if let Some(fetch) = state.fetch.take() {
                fetch.abort();
            }
            state.fingerprint.clone()
        };

        self.client.scheduler.stop_polling(self.id);
        self.client.unregister(&fingerprint, self.id);
        debug!(query = self.id, fingerprint = %fingerprint, "Tore down watched query");
    }

    fn subscribe(self: &Arc<Self>, callback: Callback) -> Subscription {
        let listener = Arc::new(Listener {
            callback,
            last_version: AtomicU64::new(0)
        });
        let index = self.subscribers.lock().push(listener.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);

        self.activate();
        let delivered = self.state.lock().delivered.clone();
        if let Some(result) = delivered {
            listener.deliver(&result);
        }

        Subscription {
            inner: Some(self.clone()),
            index
        }
    }

    fn unsubscribe(self: &Arc<Self>, index: usize) {
        let remaining = {
            let mut subscribers = self.subscribers.lock();
            subscribers.remove(index);
            subscribers.num_elements()
        };
        if remaining > 0 {
            return;
        }

        let runtime = tokio::runtime::Handle::try_current();
        match (self.client.teardown_delay, runtime) {
            (Some(delay), Ok(runtime)) => {
                let generation = self.generation.load(Ordering::Acquire);
                let this = self.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let resubscribed = this.generation.load(Ordering::Acquire) != generation;
                    if !resubscribed && this.subscribers.lock().is_empty() {
                        this.teardown();
                    }
                });
            }
            _ => self.teardown()
        }
    }

    /// Re-read the store after a write touched something this query depends on.
    pub(crate) fn recompute(self: &Arc<Self>, originating: Option<&Fingerprint>) {
        let results = {
            let mut state = self.state.lock();
            let policy = state.options.fetch_policy;
            if !state.active || state.options.skip || policy == FetchPolicy::NoCache {
                return;
            }
            let in_flight = state.fetch.is_some();
            if in_flight && originating == Some(&state.fingerprint) {
                return;
            }

            let read = self.client.read_tracked(&state.fingerprint);
            let was_complete = state.cache_complete;
            state.cache_complete = read.complete;

            let mut results = Vec::new();
            let usable = read.complete
                || state.options.return_partial_data
                || policy == FetchPolicy::CacheOnly;
            if usable && read.data != state.last.data {
                let status = if in_flight {
                    state.last.network_status
                } else {
                    NetworkStatus::Ready
                };
                let mut result = QueryResult::new(status, ResultSource::Cache);
                result.partial = !read.complete;
                result.data = read.data;
                results.extend(self.publish(&mut state, result));
            }

            if !read.complete && was_complete && !in_flight && policy != FetchPolicy::CacheOnly {
                debug!(query = self.id, "Cached data went missing, refetching");
                let data = state.last.data.clone();
                results.extend(self.start_fetch(
                    &mut state,
                    NetworkStatus::Refetching,
                    data,
                    ResultSource::Network
                ));
            }
            results
        };
        self.notify(results);
    }

    fn refetch(self: &Arc<Self>, variables: Option<Variables>) -> BoxFuture<'static, QueryResult> {
        if let Some(variables) = variables {
            self.rebind(variables, false);
        }

        // Subscribing first keeps the query alive until the refetch settles
        let mut stream = self.stream();
        let (results, issued) = {
            let mut state = self.state.lock();
            state.options.skip = false;
            let data = state.last.data.clone();
            let results: Vec<_> = self
                .start_fetch(
                    &mut state,
                    NetworkStatus::Refetching,
                    data,
                    ResultSource::Network
                )
                .into_iter()
                .collect();
            (results, state.version)
        };
        self.notify(results);

        async move {
            while let Some(result) = stream.next().await {
                if result.version >= issued && !result.loading() {
                    return result;
                }
            }
            stream.observable.current_result()
        }
        .boxed()
    }

    /// Point the query at new variables, keeping its subscribers.
    fn rebind(self: &Arc<Self>, variables: Variables, evaluate: bool) {
        let (previous, fingerprint, active, results) = {
            let mut state = self.state.lock();
            if state.variables == variables {
                return;
            }
            let fingerprint = Fingerprint::new(&state.document, &variables);
            let previous = std::mem::replace(&mut state.fingerprint, fingerprint);
            state.variables = variables;
            state.cache_complete = false;
            state.seq += 1;
            if let Some(fetch) = state.fetch.take() {
                fetch.abort();
            }

            let mut results = Vec::new();
            if state.active {
                if state.options.fetch_policy != FetchPolicy::NoCache {
                    self.client.store.lock().register(
                        state.fingerprint.clone(),
                        state.document.clone(),
                        state.variables.clone()
                    );
                }
                if evaluate {
                    results = self.evaluate(&mut state, NetworkStatus::SetVariables);
                }
            }
            (previous, state.fingerprint.clone(), state.active, results)
        };

        self.client.unregister(&previous, self.id);
        if active {
            self.client.register(fingerprint.clone(), self);
        }
        debug!(query = self.id, from = %previous, to = %fingerprint, "Rebound watched query");
        self.notify(results);
    }

    fn current_result(&self) -> QueryResult {
        self.state.lock().last.clone()
    }

    fn stream(self: &Arc<Self>) -> ResultStream {
        let (sender, receiver) = unbounded();
        let subscription = self.subscribe(Arc::new(move |result: &QueryResult| {
            let _ = sender.unbounded_send(result.clone());
        }));
        ResultStream {
            receiver,
            observable: ObservableQuery(self.clone()),
            _subscription: subscription
        }
    }
}

impl Pollable for ObservableInner {
    fn poll_tick(self: Arc<Self>) {
        let results = {
            let mut state = self.state.lock();
            let idle = state.active
                && !state.options.skip
                && state.fetch.is_none()
                && state.options.fetch_policy != FetchPolicy::CacheOnly;
            if !idle {
                trace!(query = self.id, "Skipped poll, request still in flight");
                return;
            }
            let data = state.last.data.clone();
            let results: Vec<_> = self
                .start_fetch(&mut state, NetworkStatus::Polling, data, ResultSource::Network)
                .into_iter()
                .collect();
            results
        };
        self.notify(results);
    }
}

impl Drop for ObservableInner {
    fn drop(&mut self) {
        self.client.scheduler.stop_polling(self.id);
        let fingerprint = self.state.get_mut().fingerprint.clone();
        self.client.unregister(&fingerprint, self.id);
    }
}

/// A watched query.
///
/// Cloning the handle doesn't create a new query, all clones observe the same state. The query
/// starts working when it gets its first subscriber and stops when it loses its last one.
#[derive(Clone)]
pub struct ObservableQuery(pub(crate) Arc<ObservableInner>);

impl ObservableQuery {
    /// Register a callback for every (non-suppressed) result. The current result is delivered
    /// immediately if there is one.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueryResult) + Send + Sync + 'static
    {
        self.0.subscribe(Arc::new(callback))
    }

    /// Results as a [`Stream`]. The stream counts as a subscriber while it's alive.
    pub fn stream(&self) -> ResultStream {
        self.0.stream()
    }

    /// Wait for the next result that isn't loading.
    pub async fn result(&self) -> QueryResult {
        let mut stream = self.stream();
        let current = self.current_result();
        if !current.loading() && current.version > 0 {
            return current;
        }
        while let Some(result) = stream.next().await {
            if result.version > current.version && !result.loading() {
                return result;
            }
        }
        self.current_result()
    }

    /// The latest result, including intermediate states that weren't delivered.
    pub fn current_result(&self) -> QueryResult {
        self.0.current_result()
    }

    /// Fetch from the network regardless of the fetch policy, optionally with new variables.
    ///
    /// The request is issued right away; the returned future resolves with its result.
    pub fn refetch(&self, variables: Option<Variables>) -> BoxFuture<'static, QueryResult> {
        self.0.refetch(variables)
    }

    /// Switch to new variables. Subscribers are kept and receive the new data.
    pub fn set_variables(&self, variables: Variables) {
        self.0.rebind(variables, true);
    }

    /// Poll every `interval_ms` milliseconds. `0` stops polling.
    pub fn start_polling(&self, interval_ms: u64) {
        let interval = if interval_ms > 0 {
            Some(Duration::from_millis(interval_ms))
        } else {
            None
        };
        let active = {
            let mut state = self.0.state.lock();
            state.options.poll_interval = interval;
            state.active
        };
        match interval {
            Some(interval) if active => {
                self.0
                    .client
                    .scheduler
                    .start_polling(self.0.id, Arc::downgrade(&self.0), interval)
            }
            _ => self.0.client.scheduler.stop_polling(self.0.id)
        }
    }

    pub fn stop_polling(&self) {
        self.start_polling(0);
    }

    pub fn is_polling(&self) -> bool {
        self.0.client.scheduler.is_polling(self.0.id)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.0.state.lock().fingerprint.clone()
    }

    pub fn variables(&self) -> Variables {
        self.0.state.lock().variables.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.lock().num_elements()
    }

    /// Whether both handles observe the same query.
    pub fn ptr_eq(&self, other: &ObservableQuery) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Keeps a callback registered. Dropping it unsubscribes.
pub struct Subscription {
    inner: Option<Arc<ObservableInner>>,
    index: usize
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.unsubscribe(self.index);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// The results of a watched query as a [`Stream`].
pub struct ResultStream {
    receiver: UnboundedReceiver<QueryResult>,
    observable: ObservableQuery,
    _subscription: Subscription
}

impl ResultStream {
    pub fn observable(&self) -> &ObservableQuery {
        &self.observable
    }
}

impl Stream for ResultStream {
    type Item = QueryResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let receiver = &mut self.get_mut().receiver;
        Pin::new(receiver).poll_next(cx)
    }
}
