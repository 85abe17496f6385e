use crate::{QueryError, Variables};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Where a query looks for its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    CacheFirst,
    CacheAndNetwork,
    NetworkOnly,
    CacheOnly,
    NoCache
}

impl FetchPolicy {
    pub(crate) fn reads_cache(self) -> bool {
        matches!(
            self,
            FetchPolicy::CacheFirst | FetchPolicy::CacheAndNetwork | FetchPolicy::CacheOnly
        )
    }

    pub(crate) fn writes_cache(self) -> bool {
        self != FetchPolicy::NoCache
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy::CacheFirst
    }
}

/// What happens to partial data when the server reports GraphQL errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Discard the data and surface only the error.
    None,
    /// Surface whatever data arrived together with the error.
    All,
    /// Surface the data and drop the error.
    Ignore
}

impl ErrorPolicy {
    pub(crate) fn keeps_partial_data(self) -> bool {
        self != ErrorPolicy::None
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkStatus {
    /// The first request for this query is in flight.
    Initializing,
    /// The variables changed and the data for the new ones is being fetched.
    SetVariables,
    Refetching,
    Polling,
    Ready,
    /// The last request failed and the error policy discarded the data.
    Error,
    /// The last request failed but data (partial or previous) was kept alongside the error.
    ReadyStale
}

impl NetworkStatus {
    /// Whether a request is outstanding in this state.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            NetworkStatus::Initializing
                | NetworkStatus::SetVariables
                | NetworkStatus::Refetching
                | NetworkStatus::Polling
        )
    }

    /// The conventional numeric code for this status.
    pub fn code(self) -> u8 {
        match self {
            NetworkStatus::Initializing => 1,
            NetworkStatus::SetVariables => 2,
            NetworkStatus::Refetching => 4,
            NetworkStatus::Polling => 6,
            NetworkStatus::Ready | NetworkStatus::ReadyStale => 7,
            NetworkStatus::Error => 8
        }
    }
}

/// Options for a single query or watched query.
///
/// Anything not set falls back to the client's defaults.
///
/// ```
/// # use serde_json::json;
/// use cachet::{FetchPolicy, QueryOptions};
///
/// let options = QueryOptions::from_json(json!({
///     "variables": { "breed": "pug" },
///     "pollInterval": 500,
///     "fetchPolicy": "cache-and-network"
/// }))
/// .unwrap();
/// assert_eq!(options.fetch_policy, Some(FetchPolicy::CacheAndNetwork));
///
/// assert!(QueryOptions::from_json(json!({ "pollIntervall": 500 })).is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct QueryOptions {
    pub variables: Variables,
    /// Don't read or fetch anything until the query is refetched.
    pub skip: bool,
    /// Poll interval in milliseconds. `0` or `None` disables polling.
    pub poll_interval: Option<u64>,
    pub notify_on_network_status_change: bool,
    pub error_policy: Option<ErrorPolicy>,
    pub fetch_policy: Option<FetchPolicy>,
    /// Deliver incomplete cached data instead of nothing while the network request is running.
    pub return_partial_data: bool
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a loosely typed option bag. Unknown keys are rejected.
    pub fn from_json(value: Value) -> Result<Self, QueryError> {
        serde_json::from_value(value).map_err(|e| QueryError::InvalidOptions(e.to_string()))
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval = Some(interval_ms);
        self
    }

    pub fn notify_on_network_status_change(mut self, notify: bool) -> Self {
        self.notify_on_network_status_change = notify;
        self
    }

    pub fn error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = Some(error_policy);
        self
    }

    pub fn fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(fetch_policy);
        self
    }

    pub fn return_partial_data(mut self, return_partial_data: bool) -> Self {
        self.return_partial_data = return_partial_data;
        self
    }

    pub(crate) fn poll_duration(&self) -> Option<Duration> {
        self.poll_interval
            .filter(|interval| *interval > 0)
            .map(Duration::from_millis)
    }
}

/// Options after the client defaults have been applied.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ResolvedOptions {
    pub skip: bool,
    pub poll_interval: Option<Duration>,
    pub notify_on_network_status_change: bool,
    pub error_policy: ErrorPolicy,
    pub fetch_policy: FetchPolicy,
    pub return_partial_data: bool
}

impl ResolvedOptions {
    pub(crate) fn resolve(
        options: &QueryOptions,
        fetch_policy: FetchPolicy,
        error_policy: ErrorPolicy
    ) -> Self {
        ResolvedOptions {
            skip: options.skip,
            poll_interval: options.poll_duration(),
            notify_on_network_status_change: options.notify_on_network_status_change,
            error_policy: options.error_policy.unwrap_or(error_policy),
            fetch_policy: options.fetch_policy.unwrap_or(fetch_policy),
            return_partial_data: options.return_partial_data
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultSource {
    Cache,
    Network
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugInfo {
    pub source: ResultSource,
    pub did_dedup: bool
}

/// The current result of a query as seen by its subscribers.
#[derive(Clone, Debug)]
pub struct QueryResult {
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    pub network_status: NetworkStatus,
    /// The data came from an incomplete cache read.
    pub partial: bool,
    pub debug_info: DebugInfo,
    pub(crate) version: u64
}

impl QueryResult {
    pub(crate) fn new(network_status: NetworkStatus, source: ResultSource) -> Self {
        QueryResult {
            data: None,
            error: None,
            network_status,
            partial: false,
            debug_info: DebugInfo {
                source,
                did_dedup: false
            },
            version: 0
        }
    }

    pub fn loading(&self) -> bool {
        self.network_status.is_in_flight()
    }

    /// Deserialize the data into a typed response.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data
            .as_ref()
            .map(|data| <T as serde::Deserialize>::deserialize(data))
            .transpose()
    }
}
