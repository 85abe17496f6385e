use crate::{Fingerprint, QueryError, Response};
use futures::{
    channel::oneshot,
    future::{AbortHandle, Abortable, BoxFuture, Shared},
    FutureExt
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc
    },
    task::{Context, Poll}
};
use tracing::debug;

/// How a settled response may be written to the store.
///
/// Coalesced requesters can disagree (a `no-cache` watcher joining a `cache-first` request), so
/// the policy of an in-flight request is the union of everyone waiting on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct WritePolicy {
    pub cache: bool,
    /// Write data even if it came with GraphQL errors.
    pub partial: bool
}

impl WritePolicy {
    fn merge(&mut self, other: WritePolicy) {
        self.cache |= other.cache;
        self.partial |= other.partial;
    }
}

/// The outcome of a request, shared by everyone that waited on it.
#[derive(Clone, Debug)]
pub(crate) struct Settled {
    pub response: Result<Arc<Response>, QueryError>,
    /// The response was normalized into the store.
    pub written: bool,
    /// The store rejected the response.
    pub conflict: Option<QueryError>
}

impl Settled {
    pub(crate) fn cancelled() -> Self {
        Settled {
            response: Err(QueryError::Cancelled),
            written: false,
            conflict: None
        }
    }
}

type SharedRequest = Shared<BoxFuture<'static, Settled>>;

struct Entry {
    id: u64,
    request: SharedRequest,
    waiters: usize,
    write: Arc<Mutex<WritePolicy>>,
    abort: AbortHandle
}

/// Tracks the requests currently on the wire, at most one per fingerprint.
///
/// This will catch any identical requests before they execute, instead handing out another
/// handle to the request that is already running.
pub(crate) struct InFlight {
    requests: Mutex<HashMap<Fingerprint, Entry>>,
    next_id: AtomicU64,
    cancel_on_release: bool
}

impl InFlight {
    /// With `cancel_on_release` a request is aborted as soon as nobody waits on it anymore.
    /// Otherwise it runs to completion so its response still lands in the store.
    pub(crate) fn new(cancel_on_release: bool) -> Self {
        InFlight {
            requests: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            cancel_on_release
        }
    }

    /// Join the request for `fingerprint` or start one with `run`.
    ///
    /// `run` is only called when no request is in flight. It receives the write policy, which
    /// later joiners may still widen until the response arrives. Must be called from within a
    /// Tokio runtime.
    pub(crate) fn execute<F, Fut>(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        write: WritePolicy,
        run: F
    ) -> PendingRequest
    where
        F: FnOnce(Arc<Mutex<WritePolicy>>) -> Fut,
        Fut: Future<Output = Settled> + Send + 'static
    {
        let mut requests = self.requests.lock();

        if let Some(entry) = requests.get_mut(&fingerprint) {
            entry.waiters += 1;
            entry.write.lock().merge(write);
            debug!(
                fingerprint = %fingerprint,
                waiters = entry.waiters,
                "Joining in-flight request"
            );
            return PendingRequest {
                fingerprint,
                id: entry.id,
                request: entry.request.clone(),
                did_dedup: true,
                in_flight: self.clone()
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let write = Arc::new(Mutex::new(write));
        let (abort, registration) = AbortHandle::new_pair();
        let (sender, receiver) = oneshot::channel();
        let task = Abortable::new(run(write.clone()), registration);
        let this = Arc::downgrade(self);
        let key = fingerprint.clone();

        tokio::spawn(async move {
            let settled = task.await.unwrap_or_else(|_| Settled::cancelled());
            if let Some(this) = this.upgrade() {
                this.finish(&key, id);
            }
            let _ = sender.send(settled);
        });

        let request = async move { receiver.await.unwrap_or_else(|_| Settled::cancelled()) }
            .boxed()
            .shared();
        requests.insert(
            fingerprint.clone(),
            Entry {
                id,
                request: request.clone(),
                waiters: 1,
                write,
                abort
            }
        );
        debug!(fingerprint = %fingerprint, "Starting request");

        PendingRequest {
            fingerprint,
            id,
            request,
            did_dedup: false,
            in_flight: self.clone()
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.requests.lock().contains_key(fingerprint)
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.lock().len()
    }

    fn finish(&self, fingerprint: &Fingerprint, id: u64) {
        let mut requests = self.requests.lock();
        // The entry may already belong to a newer request if this one was cancelled
        if requests.get(fingerprint).map(|entry| entry.id) == Some(id) {
            requests.remove(fingerprint);
        }
    }

    fn release(&self, fingerprint: &Fingerprint, id: u64) {
        let mut requests = self.requests.lock();
        let entry = match requests.get_mut(fingerprint) {
            Some(entry) if entry.id == id => entry,
            _ => return
        };

        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 && self.cancel_on_release {
            entry.abort.abort();
            requests.remove(fingerprint);
            debug!(fingerprint = %fingerprint, "Cancelled request without waiters");
        }
    }
}

/// A handle to an in-flight request. Dropping it gives up interest in the result.
pub(crate) struct PendingRequest {
    fingerprint: Fingerprint,
    id: u64,
    request: SharedRequest,
    pub(crate) did_dedup: bool,
    in_flight: Arc<InFlight>
}

impl Future for PendingRequest {
    type Output = Settled;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.request).poll(cx)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.in_flight.release(&self.fingerprint, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize},
        time::Duration
    };
    use tokio::time::sleep;

    fn fingerprint() -> Fingerprint {
        Fingerprint::new(
            &Document::query("GetDog", vec![]),
            &crate::variables! { "breed" => "pug" }
        )
    }

    fn settled(written: bool) -> Settled {
        Settled {
            response: Ok(Arc::new(Response::data(serde_json::json!({})))),
            written,
            conflict: None
        }
    }

    fn counting_run(
        calls: Arc<AtomicUsize>
    ) -> impl FnOnce(Arc<Mutex<WritePolicy>>) -> BoxFuture<'static, Settled> {
        move |write| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                sleep(Duration::from_millis(10)).await;
                let written = write.lock().cache;
                settled(written)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_dedup() {
        let in_flight = Arc::new(InFlight::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let fut1 = in_flight.execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone()));
        let fut2 = in_flight.execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone()));
        let did_1_dedup = fut1.did_dedup;
        let did_2_dedup = fut2.did_dedup;

        let join = tokio::spawn(fut1);
        let res2 = fut2.await;
        let res1 = join.await.unwrap();

        assert!(did_1_dedup ^ did_2_dedup);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(res1.response.is_ok() && res2.response.is_ok());
        assert!(!in_flight.contains(&fingerprint()));
    }

    #[tokio::test]
    async fn settled_requests_are_not_reused() {
        let in_flight = Arc::new(InFlight::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        in_flight
            .execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone()))
            .await;
        let second = in_flight.execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone()));

        assert!(!second.did_dedup);
        second.await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn joiners_widen_the_write_policy() {
        let in_flight = Arc::new(InFlight::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let no_cache = in_flight.execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone()));
        let cached = in_flight.execute(
            fingerprint(),
            WritePolicy {
                cache: true,
                partial: false
            },
            counting_run(calls.clone())
        );

        let (first, second) = futures::join!(no_cache, cached);
        assert!(first.written);
        assert!(second.written);
    }

    #[tokio::test(start_paused = true)]
    async fn released_requests_keep_running_by_default() {
        let in_flight = Arc::new(InFlight::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        drop(in_flight.execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone())));
        assert!(in_flight.contains(&fingerprint()));

        let late = in_flight.execute(fingerprint(), WritePolicy::default(), counting_run(calls.clone()));
        assert!(late.did_dedup);
        assert!(late.await.response.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn released_requests_are_cancelled_when_configured() {
        let in_flight = Arc::new(InFlight::new(true));
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let pending = in_flight.execute(fingerprint(), WritePolicy::default(), move |_| async move {
            sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            settled(false)
        });
        drop(pending);

        assert_eq!(in_flight.len(), 0);
        sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
