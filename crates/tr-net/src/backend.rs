//! Fetch backends: where requests actually go.
//!
//! The engine never blocks on the network. It dispatches a request, keeps
//! running, and later polls the backend for completions.

use crate::client::ClientConfig;
use crate::client::HttpClient;
use crate::http::FetchMethod;
use crate::http::FetchRequest;
use crate::http::FetchResponse;
use crate::http::Header;
use crate::http::HttpStatusCode;
use crate::http::STREAM_CONTENT_TYPE;
use crate::location::Location;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tr_core::DriveError;
use tr_core::DriveResult;

const FETCH_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Result of one dispatched request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request_id: String,
    pub outcome: DriveResult<FetchResponse>,
}

pub trait FetchBackend {
    fn dispatch(&mut self, request: &FetchRequest);

    /// Drops interest in `request_id`; its completion is never delivered.
    fn cancel(&mut self, request_id: &str);

    /// Completions that arrived since the last poll; never blocks.
    fn poll(&mut self) -> Vec<Completion>;

    /// Like `poll`, but may block up to `timeout` for the first completion.
    fn wait(&mut self, timeout: Duration) -> Vec<Completion> {
        let _ = timeout;
        self.poll()
    }
}

/// Runs each request on its own worker thread through [`HttpClient`].
pub struct HttpBackend {
    client: HttpClient,
    sender: mpsc::Sender<Completion>,
    receiver: mpsc::Receiver<Completion>,
    canceled: HashSet<String>,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> DriveResult<Self> {
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            client: HttpClient::new(config)?,
            sender,
            receiver,
            canceled: HashSet::new(),
        })
    }

    fn accept(&mut self, completion: Completion, out: &mut Vec<Completion>) {
        if self.canceled.remove(&completion.request_id) {
            log::trace!(
                target: "trellis::net",
                "discarding canceled completion {}",
                completion.request_id
            );
            return;
        }
        out.push(completion);
    }
}

impl FetchBackend for HttpBackend {
    fn dispatch(&mut self, request: &FetchRequest) {
        let client = self.client.clone();
        let request = request.clone();
        let sender = self.sender.clone();
        let request_id = request.id.clone();

        let job = move || {
            let outcome = client.execute(&request);
            let _ = sender.send(Completion {
                request_id: request.id.clone(),
                outcome,
            });
        };

        if let Err(error) = thread::Builder::new()
            .name("trellis-fetch".to_owned())
            .stack_size(FETCH_THREAD_STACK_SIZE)
            .spawn(job)
        {
            let _ = self.sender.send(Completion {
                request_id,
                outcome: Err(DriveError::new(
                    "net.fetch.network_failure",
                    format!("failed to spawn fetch worker: {error}"),
                )),
            });
        }
    }

    fn cancel(&mut self, request_id: &str) {
        self.canceled.insert(request_id.to_owned());
    }

    fn poll(&mut self) -> Vec<Completion> {
        let mut out = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            self.accept(completion, &mut out);
        }
        out
    }

    fn wait(&mut self, timeout: Duration) -> Vec<Completion> {
        let mut out = Vec::new();
        if let Ok(completion) = self.receiver.recv_timeout(timeout) {
            self.accept(completion, &mut out);
        }
        out.extend(self.poll());
        out
    }
}

/// Canned reply for a [`ScriptedBackend`] route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Respond {
        status: u16,
        content_type: String,
        body: String,
    },
    Redirect {
        to: String,
    },
    Fail {
        code: &'static str,
    },
}

impl Scripted {
    pub fn html(status: u16, body: &str) -> Self {
        Self::Respond {
            status,
            content_type: "text/html; charset=utf-8".to_owned(),
            body: body.to_owned(),
        }
    }

    pub fn stream(body: &str) -> Self {
        Self::Respond {
            status: 200,
            content_type: STREAM_CONTENT_TYPE.to_owned(),
            body: body.to_owned(),
        }
    }

    pub fn with_content_type(status: u16, content_type: &str, body: &str) -> Self {
        Self::Respond {
            status,
            content_type: content_type.to_owned(),
            body: body.to_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    routes: HashMap<(FetchMethod, String), Scripted>,
    held: bool,
    pending: Vec<FetchRequest>,
    ready: VecDeque<Completion>,
    log: Vec<FetchRequest>,
    canceled: Vec<String>,
}

/// In-memory backend answering from a route table.
///
/// Clones share state, so a test can keep a handle after handing one to a
/// session. While held, requests stay pending until released.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, method: FetchMethod, url: &str, reply: Scripted) {
        self.state
            .borrow_mut()
            .routes
            .insert((method, route_key(url)), reply);
    }

    pub fn get(&self, url: &str, reply: Scripted) {
        self.route(FetchMethod::Get, url, reply);
    }

    pub fn hold(&self) {
        self.state.borrow_mut().held = true;
    }

    /// Stops holding and completes every pending request.
    pub fn release_all(&self) {
        let pending = {
            let mut state = self.state.borrow_mut();
            state.held = false;
            std::mem::take(&mut state.pending)
        };
        for request in pending {
            let completion = self.resolve(&request);
            self.state.borrow_mut().ready.push_back(completion);
        }
    }

    /// Completes pending requests whose URL matches, leaving others held.
    pub fn release(&self, url: &str) {
        let key = route_key(url);
        let matching: Vec<FetchRequest> = {
            let mut state = self.state.borrow_mut();
            let (matching, rest) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|request| route_key(request.location.as_str()) == key);
            state.pending = rest;
            matching
        };
        for request in matching {
            let completion = self.resolve(&request);
            self.state.borrow_mut().ready.push_back(completion);
        }
    }

    /// Every request dispatched so far, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.state.borrow().log.clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        let key = route_key(url);
        self.state
            .borrow()
            .log
            .iter()
            .filter(|request| route_key(request.location.as_str()) == key)
            .count()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.state.borrow().canceled.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    fn resolve(&self, request: &FetchRequest) -> Completion {
        Completion {
            request_id: request.id.clone(),
            outcome: self.resolve_outcome(request),
        }
    }

    fn resolve_outcome(&self, request: &FetchRequest) -> DriveResult<FetchResponse> {
        let state = self.state.borrow();
        let mut method = request.method;
        let mut location = request.location.clone();
        let mut redirected = false;

        for _ in 0..10 {
            let reply = state
                .routes
                .get(&(method, route_key(location.as_str())))
                .cloned()
                .unwrap_or_else(|| Scripted::html(404, "<html><body><h1>Not Found</h1></body></html>"));

            match reply {
                Scripted::Respond {
                    status,
                    content_type,
                    body,
                } => {
                    return Ok(FetchResponse {
                        request_id: request.id.clone(),
                        status: HttpStatusCode::new(status)?,
                        location,
                        redirected,
                        headers: vec![Header::new("Content-Type", &content_type)?],
                        body: body.into_bytes(),
                    });
                }
                Scripted::Redirect { to } => {
                    location = location.join(&to)?;
                    method = FetchMethod::Get;
                    redirected = true;
                }
                Scripted::Fail { code } => {
                    return Err(DriveError::new(
                        code,
                        format!("scripted failure for {}", request.location),
                    ));
                }
            }
        }

        Err(DriveError::new(
            "net.fetch.too_many_redirects",
            format!("redirect loop at {}", request.location),
        ))
    }
}

impl FetchBackend for ScriptedBackend {
    fn dispatch(&mut self, request: &FetchRequest) {
        let held = {
            let mut state = self.state.borrow_mut();
            state.log.push(request.clone());
            if state.held {
                state.pending.push(request.clone());
            }
            state.held
        };
        if !held {
            let completion = self.resolve(request);
            self.state.borrow_mut().ready.push_back(completion);
        }
    }

    fn cancel(&mut self, request_id: &str) {
        let mut state = self.state.borrow_mut();
        state.pending.retain(|request| request.id != request_id);
        state
            .ready
            .retain(|completion| completion.request_id != request_id);
        state.canceled.push(request_id.to_owned());
    }

    fn poll(&mut self) -> Vec<Completion> {
        self.state.borrow_mut().ready.drain(..).collect()
    }
}

fn route_key(url: &str) -> String {
    match Location::parse(url) {
        Ok(location) => location.without_anchor().as_str().to_owned(),
        Err(_) => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::FetchBackend;
    use super::Scripted;
    use super::ScriptedBackend;
    use crate::http::FetchPurpose;
    use crate::http::FetchRequest;
    use crate::location::Location;

    fn request(url: &str) -> FetchRequest {
        match Location::parse(url) {
            Ok(location) => FetchRequest::get(location, FetchPurpose::Visit),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn scripted_routes_answer_and_follow_redirects() {
        let backend = ScriptedBackend::new();
        backend.get(
            "https://example.com/old",
            Scripted::Redirect {
                to: "/new".to_owned(),
            },
        );
        backend.get("https://example.com/new", Scripted::html(200, "<p>new</p>"));

        let mut handle = backend.clone();
        let sent = request("https://example.com/old");
        handle.dispatch(&sent);
        let completions = handle.poll();
        assert_eq!(completions.len(), 1);
        let response = match &completions[0].outcome {
            Ok(response) => response.clone(),
            Err(error) => panic!("{error}"),
        };
        assert!(response.redirected);
        assert_eq!(response.location.as_str(), "https://example.com/new");
        assert_eq!(response.request_id, sent.id);
    }

    #[test]
    fn held_requests_can_be_canceled() {
        let backend = ScriptedBackend::new();
        backend.hold();
        let mut handle = backend.clone();
        let first = request("https://example.com/a");
        let second = request("https://example.com/b");
        handle.dispatch(&first);
        handle.dispatch(&second);
        handle.cancel(&first.id);
        assert_eq!(backend.pending_count(), 1);

        backend.release_all();
        let completions = handle.poll();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].request_id, second.id);
        assert_eq!(backend.canceled(), vec![first.id.clone()]);
    }

    #[test]
    fn unrouted_requests_get_not_found() {
        let mut backend = ScriptedBackend::new();
        backend.dispatch(&request("https://example.com/missing"));
        let completions = backend.poll();
        let status = completions[0]
            .outcome
            .as_ref()
            .map(|response| response.status.as_u16());
        assert_eq!(status, Ok(404));
    }
}
