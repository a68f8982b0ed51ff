//! Single-slot cache for the speculative request started on hover.

use crate::scheduler::Scheduler;
use crate::scheduler::TaskHandle;
use std::time::Duration;
use tr_net::FetchRequest;
use tr_net::FetchResponse;
use tr_net::Location;

/// The one prefetched request, possibly still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchEntry {
    pub location: Location,
    pub request_id: String,
    pub response: Option<FetchResponse>,
    pub expires_at: Duration,
}

#[derive(Debug)]
struct Debounce {
    request: FetchRequest,
    ttl: Duration,
    handle: TaskHandle,
}

/// Holds at most one entry; a new prefetch drops the previous one.
#[derive(Debug, Default)]
pub struct PrefetchCache {
    entry: Option<PrefetchEntry>,
    debounce: Option<Debounce>,
}

impl PrefetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `task` to fire after `delay`; when it does, [`PrefetchCache::fire`]
    /// hands back `request` for issuing. Replaces any earlier entry.
    pub fn set_later<T>(
        &mut self,
        scheduler: &mut Scheduler<T>,
        request: FetchRequest,
        delay: Duration,
        ttl: Duration,
        task: T,
    ) {
        self.clear(scheduler);
        let handle = scheduler.after(delay, task);
        self.debounce = Some(Debounce {
            request,
            ttl,
            handle,
        });
    }

    /// Stores `request` immediately with an expiry of `now + ttl`.
    pub fn set(&mut self, request: &FetchRequest, now: Duration, ttl: Duration) {
        self.entry = Some(PrefetchEntry {
            location: request.location.clone(),
            request_id: request.id.clone(),
            response: None,
            expires_at: now.saturating_add(ttl),
        });
    }

    /// Debounce elapsed: the pending request becomes the cached entry.
    pub fn fire(&mut self, now: Duration) -> Option<FetchRequest> {
        let debounce = self.debounce.take()?;
        self.set(&debounce.request, now, debounce.ttl);
        Some(debounce.request)
    }

    pub fn is_debouncing(&self) -> bool {
        self.debounce.is_some()
    }

    /// Attaches a response to the entry whose request it answers.
    pub fn resolve(&mut self, response: FetchResponse) -> bool {
        match self.entry.as_mut() {
            Some(entry) if entry.request_id == response.request_id => {
                entry.response = Some(response);
                true
            }
            _ => false,
        }
    }

    pub fn owns_request(&self, request_id: &str) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| entry.request_id == request_id)
    }

    /// The entry for `location`, only while `now` is before its expiry.
    pub fn get(&self, location: &Location, now: Duration) -> Option<&PrefetchEntry> {
        self.entry
            .as_ref()
            .filter(|entry| entry.location.same_page_as(location) && now < entry.expires_at)
    }

    /// Reads the entry at most once: a hit clears the cache.
    pub fn take(&mut self, location: &Location, now: Duration) -> Option<PrefetchEntry> {
        self.get(location, now)?;
        self.entry.take()
    }

    /// Cancels any pending debounce and drops the slot.
    pub fn clear<T>(&mut self, scheduler: &mut Scheduler<T>) -> Option<PrefetchEntry> {
        if let Some(debounce) = self.debounce.take() {
            scheduler.cancel(debounce.handle);
        }
        self.entry.take()
    }
}

#[cfg(test)]
mod tests {
    use super::PrefetchCache;
    use crate::scheduler::ManualClock;
    use crate::scheduler::Scheduler;
    use std::rc::Rc;
    use std::time::Duration;
    use tr_net::FetchPurpose;
    use tr_net::FetchRequest;
    use tr_net::Location;

    fn location(path: &str) -> Location {
        match Location::parse(&format!("https://example.com{path}")) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    fn prefetch(path: &str) -> FetchRequest {
        FetchRequest::get(location(path), FetchPurpose::Prefetch)
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = PrefetchCache::new();
        let request = prefetch("/inbox");
        cache.set(&request, Duration::from_secs(1), Duration::from_secs(10));

        assert!(cache.get(&location("/inbox"), Duration::from_secs(5)).is_some());
        assert!(cache.get(&location("/inbox#top"), Duration::from_secs(5)).is_some());
        assert!(cache.get(&location("/other"), Duration::from_secs(5)).is_none());
        assert!(cache.get(&location("/inbox"), Duration::from_secs(11)).is_none());
    }

    #[test]
    fn clear_drops_the_entry_regardless_of_location() {
        let clock = ManualClock::new();
        let mut scheduler: Scheduler<&str> = Scheduler::new(Rc::new(clock.clone()));
        let mut cache = PrefetchCache::new();
        cache.set(&prefetch("/inbox"), Duration::ZERO, Duration::from_secs(10));
        assert!(cache.clear(&mut scheduler).is_some());
        assert!(cache.get(&location("/inbox"), Duration::ZERO).is_none());
    }

    #[test]
    fn debounce_is_canceled_by_clear() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(Rc::new(clock.clone()));
        let mut cache = PrefetchCache::new();
        cache.set_later(
            &mut scheduler,
            prefetch("/inbox"),
            Duration::from_millis(100),
            Duration::from_secs(10),
            "prefetch",
        );
        assert!(cache.is_debouncing());
        cache.clear(&mut scheduler);
        clock.advance(Duration::from_millis(200));
        assert!(scheduler.take_ready().is_empty());
        assert!(cache.fire(scheduler.now()).is_none());
    }

    #[test]
    fn fired_entries_are_read_once() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(Rc::new(clock.clone()));
        let mut cache = PrefetchCache::new();
        cache.set_later(
            &mut scheduler,
            prefetch("/inbox"),
            Duration::from_millis(100),
            Duration::from_secs(10),
            "prefetch",
        );
        clock.advance(Duration::from_millis(100));
        assert_eq!(scheduler.take_ready(), vec!["prefetch"]);
        let issued = match cache.fire(scheduler.now()) {
            Some(request) => request,
            None => panic!("debounced request missing"),
        };
        assert!(cache.owns_request(&issued.id));

        let now = scheduler.now();
        assert!(cache.take(&location("/inbox"), now).is_some());
        assert!(cache.take(&location("/inbox"), now).is_none());
    }
}
