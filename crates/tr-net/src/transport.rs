//! Correlated, cancellable fetch front-end over a [`FetchBackend`].

use crate::backend::Completion;
use crate::backend::FetchBackend;
use crate::http::FetchRequest;
use crate::http::FetchResponse;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

const RECENT_REQUEST_CAPACITY: usize = 20;

/// What an interceptor decided about an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    Proceed,
    /// Skip the network and answer with this response.
    Respond(FetchResponse),
    Prevent,
}

/// Hooks run around every request the transport issues.
pub trait FetchInterceptor {
    fn before_request(&mut self, request: &mut FetchRequest) -> Interception {
        let _ = request;
        Interception::Proceed
    }

    fn after_response(&mut self, response: &FetchResponse) {
        let _ = response;
    }
}

/// Interceptor that lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterception;

impl FetchInterceptor for NoInterception {}

/// Outcome of [`Transport::issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Sent to the backend; a completion with this id will follow.
    Sent(String),
    /// Answered synchronously by the interceptor.
    Answered(FetchResponse),
    Prevented,
}

/// Bounded memory of request ids this page issued, newest last.
#[derive(Debug, Clone)]
pub struct RecentRequests {
    ids: VecDeque<String>,
    capacity: usize,
}

impl Default for RecentRequests {
    fn default() -> Self {
        Self::with_capacity(RECENT_REQUEST_CAPACITY)
    }
}

impl RecentRequests {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&mut self, id: &str) {
        if self.has(id) {
            return;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_owned());
    }

    pub fn has(&self, id: &str) -> bool {
        self.ids.iter().any(|known| known == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct Transport {
    backend: Box<dyn FetchBackend>,
    in_flight: HashMap<String, FetchRequest>,
    recent: RecentRequests,
}

impl Transport {
    pub fn new(backend: Box<dyn FetchBackend>) -> Self {
        Self {
            backend,
            in_flight: HashMap::new(),
            recent: RecentRequests::default(),
        }
    }

    /// Runs the interceptor, then dispatches unless it answered or vetoed.
    pub fn issue(
        &mut self,
        mut request: FetchRequest,
        interceptor: &mut dyn FetchInterceptor,
    ) -> Dispatch {
        match interceptor.before_request(&mut request) {
            Interception::Prevent => {
                log::debug!(
                    target: "trellis::net",
                    "request {} to {} prevented",
                    request.id,
                    request.location
                );
                Dispatch::Prevented
            }
            Interception::Respond(mut response) => {
                response.request_id = request.id.clone();
                self.recent.add(&request.id);
                interceptor.after_response(&response);
                Dispatch::Answered(response)
            }
            Interception::Proceed => {
                log::debug!(
                    target: "trellis::net",
                    "{} {} ({})",
                    request.method.as_str(),
                    request.location,
                    request.id
                );
                self.recent.add(&request.id);
                self.backend.dispatch(&request);
                let id = request.id.clone();
                self.in_flight.insert(id.clone(), request);
                Dispatch::Sent(id)
            }
        }
    }

    /// Aborts an in-flight request; unknown ids are ignored.
    pub fn cancel(&mut self, request_id: &str) {
        if self.in_flight.remove(request_id).is_some() {
            log::debug!(target: "trellis::net", "canceled request {request_id}");
            self.backend.cancel(request_id);
        }
    }

    pub fn is_in_flight(&self, request_id: &str) -> bool {
        self.in_flight.contains_key(request_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn recent_requests(&self) -> &RecentRequests {
        &self.recent
    }

    /// True when `request_id` was issued from this page recently.
    pub fn issued_recently(&self, request_id: &str) -> bool {
        self.recent.has(request_id)
    }

    pub fn poll(&mut self, interceptor: &mut dyn FetchInterceptor) -> Vec<Completion> {
        let arrived = self.backend.poll();
        self.settle(arrived, interceptor)
    }

    /// Blocks up to `timeout` when something is in flight, then settles.
    pub fn wait(
        &mut self,
        timeout: Duration,
        interceptor: &mut dyn FetchInterceptor,
    ) -> Vec<Completion> {
        if self.in_flight.is_empty() {
            return Vec::new();
        }
        let arrived = self.backend.wait(timeout);
        self.settle(arrived, interceptor)
    }

    fn settle(
        &mut self,
        arrived: Vec<Completion>,
        interceptor: &mut dyn FetchInterceptor,
    ) -> Vec<Completion> {
        let mut settled = Vec::with_capacity(arrived.len());
        for completion in arrived {
            if self.in_flight.remove(&completion.request_id).is_none() {
                continue;
            }
            match &completion.outcome {
                Ok(response) => {
                    log::debug!(
                        target: "trellis::net",
                        "{} {} for {}",
                        response.status.as_u16(),
                        response.location,
                        completion.request_id
                    );
                    interceptor.after_response(response);
                }
                Err(error) => log::warn!(
                    target: "trellis::net",
                    "request {} failed: {error}",
                    completion.request_id
                ),
            }
            settled.push(completion);
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::Dispatch;
    use super::FetchInterceptor;
    use super::Interception;
    use super::NoInterception;
    use super::RecentRequests;
    use super::Transport;
    use crate::backend::Scripted;
    use crate::backend::ScriptedBackend;
    use crate::http::FetchPurpose;
    use crate::http::FetchRequest;
    use crate::http::FetchResponse;
    use crate::location::Location;

    fn request(url: &str) -> FetchRequest {
        match Location::parse(url) {
            Ok(location) => FetchRequest::get(location, FetchPurpose::Visit),
            Err(error) => panic!("{error}"),
        }
    }

    struct Substitute;

    impl FetchInterceptor for Substitute {
        fn before_request(&mut self, request: &mut FetchRequest) -> Interception {
            match FetchResponse::html(&request.id, request.location.clone(), 200, "<p>cached</p>") {
                Ok(response) => Interception::Respond(response),
                Err(error) => panic!("{error}"),
            }
        }
    }

    #[test]
    fn canceled_requests_never_complete() {
        let backend = ScriptedBackend::new();
        backend.hold();
        let mut transport = Transport::new(Box::new(backend.clone()));
        let Dispatch::Sent(first) = transport.issue(request("https://example.com/a"), &mut NoInterception)
        else {
            panic!("expected dispatch");
        };
        let Dispatch::Sent(second) = transport.issue(request("https://example.com/b"), &mut NoInterception)
        else {
            panic!("expected dispatch");
        };
        transport.cancel(&first);
        backend.release_all();

        let settled = transport.poll(&mut NoInterception);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].request_id, second);
        assert_eq!(transport.in_flight_count(), 0);
        assert!(transport.issued_recently(&first));
    }

    #[test]
    fn interceptors_can_answer_without_network() {
        let backend = ScriptedBackend::new();
        backend.get("https://example.com/a", Scripted::html(200, "<p>net</p>"));
        let mut transport = Transport::new(Box::new(backend.clone()));
        let outgoing = request("https://example.com/a");
        let id = outgoing.id.clone();
        match transport.issue(outgoing, &mut Substitute) {
            Dispatch::Answered(response) => {
                assert_eq!(response.request_id, id);
                assert_eq!(response.text(), "<p>cached</p>");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn recent_requests_are_bounded() {
        let mut recent = RecentRequests::with_capacity(2);
        recent.add("a");
        recent.add("b");
        recent.add("c");
        assert!(!recent.has("a"));
        assert!(recent.has("b") && recent.has("c"));
        assert_eq!(recent.len(), 2);
    }
}
