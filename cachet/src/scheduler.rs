use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Something that can be re-run on a timer.
pub(crate) trait Pollable: Send + Sync + 'static {
    fn poll_tick(self: Arc<Self>);
}

/// Owns the polling timers of all watched queries.
///
/// Timers only hold a weak reference to their query and disarm themselves once it's gone, so a
/// forgotten `stop_polling` can never keep a query alive or touch a dropped one.
#[derive(Default)]
pub(crate) struct Scheduler {
    timers: Mutex<HashMap<u64, AbortHandle>>
}

impl Scheduler {
    /// Arm (or re-arm) the timer for `id`. The first tick fires one full interval from now.
    /// A zero interval disarms it instead.
    pub(crate) fn start_polling<P: Pollable>(&self, id: u64, target: Weak<P>, interval: Duration) {
        if interval == Duration::from_millis(0) {
            self.stop_polling(id);
            return;
        }

        let (abort, registration) = AbortHandle::new_pair();
        let timer = async move {
            let mut ticks = interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                match target.upgrade() {
                    Some(target) => target.poll_tick(),
                    None => break
                }
            }
        };
        tokio::spawn(Abortable::new(timer, registration));

        if let Some(previous) = self.timers.lock().insert(id, abort) {
            previous.abort();
        }
        debug!(query = id, interval_ms = interval.as_millis() as u64, "Started polling");
    }

    pub(crate) fn stop_polling(&self, id: u64) {
        if let Some(timer) = self.timers.lock().remove(&id) {
            timer.abort();
            debug!(query = id, "Stopped polling");
        }
    }

    pub(crate) fn is_polling(&self, id: u64) -> bool {
        self.timers.lock().contains_key(&id)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.get_mut().drain() {
            timer.abort();
        }
    }
}
