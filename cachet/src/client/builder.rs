use crate::{
    client::ClientImpl,
    in_flight::InFlight,
    scheduler::Scheduler,
    store::{KeyConfig, Store},
    Client, ErrorPolicy, FetchPolicy, Transport
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{atomic::AtomicU64, Arc},
    time::Duration
};

pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    keys: KeyConfig,
    fetch_policy: FetchPolicy,
    error_policy: ErrorPolicy,
    teardown_delay: Option<Duration>,
    cancel_on_unsubscribe: bool
}

impl ClientBuilder {
    pub fn new<T: Transport>(transport: T) -> Self {
        ClientBuilder {
            transport: Arc::new(transport),
            keys: KeyConfig::default(),
            fetch_policy: FetchPolicy::CacheFirst,
            error_policy: ErrorPolicy::None,
            teardown_delay: None,
            cancel_on_unsubscribe: false
        }
    }

    /// The fetch policy for queries that don't set one.
    pub fn with_fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = fetch_policy;
        self
    }

    /// The error policy for queries that don't set one.
    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    /// Identify objects of `typename` by `field` instead of `id`.
    pub fn with_key_field<T: Into<String>, F: Into<String>>(mut self, typename: T, field: F) -> Self {
        self.keys.key_fields.insert(typename.into(), field.into());
        self
    }

    /// Replace the `Typename:id` identity scheme. Returning `None` stores the object inline
    /// under its parent.
    pub fn with_data_id<F>(mut self, data_id: F) -> Self
    where
        F: Fn(Option<&str>, &Map<String, Value>) -> Option<String> + Send + Sync + 'static
    {
        self.keys.data_id = Some(Arc::new(data_id));
        self
    }

    /// Keep a watched query alive for `delay` after its last subscriber leaves, so a quick
    /// re-subscribe picks up where it left off.
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = Some(delay);
        self
    }

    /// Abort requests nobody waits for anymore. By default they run to completion so their
    /// response still warms the store.
    pub fn with_cancel_on_unsubscribe(mut self, cancel: bool) -> Self {
        self.cancel_on_unsubscribe = cancel;
        self
    }

    pub fn build(self) -> Client {
        let client = ClientImpl {
            transport: self.transport,
            store: Mutex::new(Store::new(self.keys)),
            in_flight: Arc::new(InFlight::new(self.cancel_on_unsubscribe)),
            scheduler: Scheduler::default(),
            watched: Mutex::new(HashMap::new()),
            fetch_policy: self.fetch_policy,
            error_policy: self.error_policy,
            teardown_delay: self.teardown_delay,
            next_id: AtomicU64::new(0)
        };

        Client(Arc::new(client))
    }
}
