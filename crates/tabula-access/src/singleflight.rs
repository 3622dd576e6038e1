//! In-flight construction dedup
//!
//! Cache reads are synchronous, but the asynchronous gap between "miss"
//! and "populated" is where concurrent callers for the same fingerprint
//! would otherwise each build a client or tunnel. The first caller for a
//! key becomes the leader; everyone else waits for its completion and
//! then re-reads the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
pub(crate) struct Singleflight {
    flights: Mutex<HashMap<String, Arc<FlightState>>>,
}

impl Singleflight {
    pub(crate) fn begin(&self, key: &str) -> FlightGuard<'_> {
        let mut map = self.flights.lock();
        if let Some(state) = map.get(key) {
            state.add_ref();
            FlightGuard::new_follower(self, key.to_string(), Arc::clone(state))
        } else {
            let state = Arc::new(FlightState::new());
            map.insert(key.to_string(), Arc::clone(&state));
            FlightGuard::new_leader(self, key.to_string(), state)
        }
    }

    fn release(&self, key: &str, flight: &Arc<FlightState>) {
        let mut map = self.flights.lock();
        if flight.release() == 0
            && let Some(existing) = map.get(key)
            && Arc::ptr_eq(existing, flight)
        {
            map.remove(key);
        }
    }
}

struct FlightState {
    notify: Notify,
    refs: AtomicUsize,
    done: AtomicBool,
}

impl FlightState {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            refs: AtomicUsize::new(1),
            done: AtomicBool::new(false),
        }
    }

    fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// A follower registering between the leader's completion and its
    /// guard release must not sleep forever, so completion is a flag
    /// checked on both sides of waiter registration.
    async fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let notified = self.notify.notified();
        if self.done.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    fn notify_waiters(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

pub(crate) struct FlightGuard<'a> {
    singleflight: &'a Singleflight,
    key: String,
    flight: Arc<FlightState>,
    notify_on_drop: bool,
    is_leader: bool,
}

impl<'a> FlightGuard<'a> {
    fn new_leader(singleflight: &'a Singleflight, key: String, flight: Arc<FlightState>) -> Self {
        Self {
            singleflight,
            key,
            flight,
            notify_on_drop: true,
            is_leader: true,
        }
    }

    fn new_follower(singleflight: &'a Singleflight, key: String, flight: Arc<FlightState>) -> Self {
        Self {
            singleflight,
            key,
            flight,
            notify_on_drop: false,
            is_leader: false,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub(crate) async fn wait(&self) {
        self.flight.wait().await;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.notify_on_drop {
            self.flight.notify_waiters();
            self.notify_on_drop = false;
        }
        self.singleflight.release(&self.key, &self.flight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_leads_followers_wait() {
        let sf = Arc::new(Singleflight::default());

        let leader = sf.begin("k");
        assert!(leader.is_leader());

        let follower = sf.begin("k");
        assert!(!follower.is_leader());

        let sf2 = Arc::clone(&sf);
        let waiter = tokio::spawn(async move {
            let guard = sf2.begin("k");
            if !guard.is_leader() {
                guard.wait().await;
            }
        });

        tokio::task::yield_now().await;
        drop(leader); // notifies waiters on drop
        waiter.await.unwrap();
        drop(follower);

        // flight map drains once all guards release
        assert!(sf.begin("k").is_leader());
    }

    #[tokio::test]
    async fn late_follower_does_not_miss_completion() {
        let sf = Singleflight::default();
        let leader = sf.begin("k");
        let follower = sf.begin("k");
        // leader finishes before the follower starts waiting
        drop(leader);
        follower.wait().await;
    }

    #[tokio::test]
    async fn distinct_keys_do_not_share_flights() {
        let sf = Singleflight::default();
        let a = sf.begin("a");
        let b = sf.begin("b");
        assert!(a.is_leader());
        assert!(b.is_leader());
    }
}
