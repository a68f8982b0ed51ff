//! Notifications the engine sends to its embedder.
//!
//! Every method has a default so a delegate implements only what it needs.
//! Methods named `before_*` may veto the default behavior.

use crate::history::HistoryMethod;
use crate::render::RenderReport;
use crate::render::RenderStrategy;
use crate::stream::StreamAction;
use crate::stream::StreamDirective;
use crate::visit::Visit;
use crate::visit::VisitAction;
use std::cell::RefCell;
use std::rc::Rc;
use tr_core::DriveError;
use tr_dom::Document;
use tr_net::FetchInterceptor;
use tr_net::FetchRequest;
use tr_net::FetchResponse;
use tr_net::Interception;
use tr_net::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Proceed,
    Prevent,
}

impl Disposition {
    pub fn is_prevented(self) -> bool {
        self == Self::Prevent
    }
}

/// Describes a render about to happen or just done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderInfo {
    pub strategy: RenderStrategy,
    pub location: Location,
    pub is_preview: bool,
    /// Set for frame renders.
    pub frame_id: Option<String>,
}

pub trait DriveDelegate {
    fn before_visit(&mut self, location: &Location, action: VisitAction) -> Disposition {
        let _ = (location, action);
        Disposition::Proceed
    }

    fn visit_started(&mut self, visit: &Visit) {
        let _ = visit;
    }

    fn visit_request_started(&mut self, visit: &Visit) {
        let _ = visit;
    }

    fn visit_request_finished(&mut self, visit: &Visit) {
        let _ = visit;
    }

    fn visit_completed(&mut self, visit: &Visit) {
        let _ = visit;
    }

    fn visit_failed(&mut self, visit: &Visit) {
        let _ = visit;
    }

    fn visit_canceled(&mut self, visit: &Visit) {
        let _ = visit;
    }

    /// May edit headers, answer with a response, or stop the request.
    fn before_fetch_request(&mut self, request: &mut FetchRequest) -> Interception {
        let _ = request;
        Interception::Proceed
    }

    fn before_fetch_response(&mut self, response: &FetchResponse) -> Disposition {
        let _ = response;
        Disposition::Proceed
    }

    fn fetch_error(&mut self, request_id: &str, error: &DriveError) {
        let _ = (request_id, error);
    }

    /// Last chance to clean up the page before it is snapshotted.
    fn before_cache(&mut self, document: &mut Document) {
        let _ = document;
    }

    fn before_render(&mut self, info: &RenderInfo) -> Disposition {
        let _ = info;
        Disposition::Proceed
    }

    fn render(&mut self, info: &RenderInfo, report: &RenderReport) {
        let _ = (info, report);
    }

    fn load(&mut self, location: &Location) {
        let _ = location;
    }

    fn frame_load(&mut self, frame_id: &str, location: &Location) {
        let _ = (frame_id, location);
    }

    /// Preventing keeps the frame as it is and raises nothing.
    fn frame_missing(&mut self, frame_id: &str, response: &FetchResponse) -> Disposition {
        let _ = (frame_id, response);
        Disposition::Proceed
    }

    fn before_stream_render(&mut self, directive: &StreamDirective) -> Disposition {
        let _ = directive;
        Disposition::Proceed
    }

    /// The engine gave up on a soft navigation; the host should load
    /// `location` from scratch.
    fn hard_reload(&mut self, location: &Location, reason: &str) {
        let _ = (location, reason);
    }

    fn history_changed(&mut self, location: &Location, method: HistoryMethod) {
        let _ = (location, method);
    }

    /// Answers `data-turbo-confirm`; declining stops the submission.
    fn confirm(&mut self, message: &str) -> bool {
        let _ = message;
        true
    }

    fn submission_error(&mut self, error: &DriveError) {
        let _ = error;
    }
}

/// Delegate that accepts every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDelegate;

impl DriveDelegate for NullDelegate {}

/// Routes transport interception through the delegate.
pub(crate) struct DelegateInterceptor<'a> {
    pub(crate) delegate: &'a mut dyn DriveDelegate,
}

impl FetchInterceptor for DelegateInterceptor<'_> {
    fn before_request(&mut self, request: &mut FetchRequest) -> Interception {
        self.delegate.before_fetch_request(request)
    }
}

/// One recorded delegate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveEvent {
    BeforeVisit(String, VisitAction),
    VisitStarted(String),
    VisitRequestStarted(String),
    VisitRequestFinished(String),
    VisitCompleted(String),
    VisitFailed(String),
    VisitCanceled(String),
    BeforeFetchRequest(String),
    BeforeFetchResponse(u16),
    FetchError(&'static str),
    BeforeCache,
    BeforeRender(RenderStrategy, bool),
    Render(RenderStrategy, Option<String>),
    Load(String),
    FrameLoad(String),
    FrameMissing(String),
    BeforeStreamRender(StreamAction),
    HardReload(String),
    HistoryChanged(String, HistoryMethod),
    Confirm(String),
    SubmissionError(&'static str),
}

#[derive(Debug, Default)]
struct Rules {
    prevent_frame_missing: bool,
    prevent_render: bool,
    prevented_visits: Vec<String>,
    confirm: Option<bool>,
}

/// Delegate that records every call. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelegate {
    events: Rc<RefCell<Vec<DriveEvent>>>,
    rules: Rc<RefCell<Rules>>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DriveEvent> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn count(&self, matches: impl Fn(&DriveEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|event| matches(event)).count()
    }

    pub fn prevent_frame_missing(&self, prevent: bool) {
        self.rules.borrow_mut().prevent_frame_missing = prevent;
    }

    pub fn prevent_render(&self, prevent: bool) {
        self.rules.borrow_mut().prevent_render = prevent;
    }

    /// Vetoes visits whose location starts with `prefix`.
    pub fn prevent_visits_to(&self, prefix: &str) {
        self.rules.borrow_mut().prevented_visits.push(prefix.to_owned());
    }

    pub fn answer_confirm(&self, answer: bool) {
        self.rules.borrow_mut().confirm = Some(answer);
    }

    fn record(&self, event: DriveEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl DriveDelegate for RecordingDelegate {
    fn before_visit(&mut self, location: &Location, action: VisitAction) -> Disposition {
        self.record(DriveEvent::BeforeVisit(location.to_string(), action));
        let prevented = self
            .rules
            .borrow()
            .prevented_visits
            .iter()
            .any(|prefix| location.as_str().starts_with(prefix.as_str()));
        if prevented {
            Disposition::Prevent
        } else {
            Disposition::Proceed
        }
    }

    fn visit_started(&mut self, visit: &Visit) {
        self.record(DriveEvent::VisitStarted(visit.location().to_string()));
    }

    fn visit_request_started(&mut self, visit: &Visit) {
        self.record(DriveEvent::VisitRequestStarted(visit.location().to_string()));
    }

    fn visit_request_finished(&mut self, visit: &Visit) {
        self.record(DriveEvent::VisitRequestFinished(visit.location().to_string()));
    }

    fn visit_completed(&mut self, visit: &Visit) {
        self.record(DriveEvent::VisitCompleted(visit.location().to_string()));
    }

    fn visit_failed(&mut self, visit: &Visit) {
        self.record(DriveEvent::VisitFailed(visit.location().to_string()));
    }

    fn visit_canceled(&mut self, visit: &Visit) {
        self.record(DriveEvent::VisitCanceled(visit.location().to_string()));
    }

    fn before_fetch_request(&mut self, request: &mut FetchRequest) -> Interception {
        self.record(DriveEvent::BeforeFetchRequest(request.location.to_string()));
        Interception::Proceed
    }

    fn before_fetch_response(&mut self, response: &FetchResponse) -> Disposition {
        self.record(DriveEvent::BeforeFetchResponse(response.status.as_u16()));
        Disposition::Proceed
    }

    fn fetch_error(&mut self, _request_id: &str, error: &DriveError) {
        self.record(DriveEvent::FetchError(error.code));
    }

    fn before_cache(&mut self, _document: &mut Document) {
        self.record(DriveEvent::BeforeCache);
    }

    fn before_render(&mut self, info: &RenderInfo) -> Disposition {
        self.record(DriveEvent::BeforeRender(info.strategy, info.is_preview));
        if self.rules.borrow().prevent_render {
            Disposition::Prevent
        } else {
            Disposition::Proceed
        }
    }

    fn render(&mut self, info: &RenderInfo, _report: &RenderReport) {
        self.record(DriveEvent::Render(info.strategy, info.frame_id.clone()));
    }

    fn load(&mut self, location: &Location) {
        self.record(DriveEvent::Load(location.to_string()));
    }

    fn frame_load(&mut self, frame_id: &str, _location: &Location) {
        self.record(DriveEvent::FrameLoad(frame_id.to_owned()));
    }

    fn frame_missing(&mut self, frame_id: &str, _response: &FetchResponse) -> Disposition {
        self.record(DriveEvent::FrameMissing(frame_id.to_owned()));
        if self.rules.borrow().prevent_frame_missing {
            Disposition::Prevent
        } else {
            Disposition::Proceed
        }
    }

    fn before_stream_render(&mut self, directive: &StreamDirective) -> Disposition {
        self.record(DriveEvent::BeforeStreamRender(directive.action));
        Disposition::Proceed
    }

    fn hard_reload(&mut self, _location: &Location, reason: &str) {
        self.record(DriveEvent::HardReload(reason.to_owned()));
    }

    fn history_changed(&mut self, location: &Location, method: HistoryMethod) {
        self.record(DriveEvent::HistoryChanged(location.to_string(), method));
    }

    fn confirm(&mut self, message: &str) -> bool {
        self.record(DriveEvent::Confirm(message.to_owned()));
        self.rules.borrow().confirm.unwrap_or(true)
    }

    fn submission_error(&mut self, error: &DriveError) {
        self.record(DriveEvent::SubmissionError(error.code));
    }
}
