//! One navigation attempt of the top-level document.

use crate::scheduler::TaskHandle;
use crate::snapshot::Snapshot;
use std::time::Duration;
use tr_core::DriveError;
use tr_core::fresh_uid;
use tr_net::FetchResponse;
use tr_net::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Advance,
    Replace,
    Restore,
}

impl VisitAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "advance" => Some(Self::Advance),
            "replace" => Some(Self::Replace),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Replace => "replace",
            Self::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitDirection {
    Forward,
    Back,
    None,
}

impl From<VisitAction> for VisitDirection {
    fn from(action: VisitAction) -> Self {
        match action {
            VisitAction::Advance => Self::Forward,
            VisitAction::Restore => Self::Back,
            VisitAction::Replace => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    Initialized,
    Started,
    Completed,
    Failed,
    Canceled,
}

impl VisitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Progress of the visit's request inside the `Started` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Initialized,
    Started,
    Received,
    Finished,
}

/// Clock readings taken at each phase boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitTiming {
    pub visit_start: Option<Duration>,
    pub request_start: Option<Duration>,
    pub request_end: Option<Duration>,
    pub visit_end: Option<Duration>,
}

/// How a visit should behave; defaults describe a plain link click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitOptions {
    pub action: VisitAction,
    pub direction: Option<VisitDirection>,
    /// Already fetched response; the visit issues no request when present.
    pub response: Option<FetchResponse>,
    pub should_cache_snapshot: bool,
    pub will_render: bool,
    pub update_history: bool,
    pub restoration_identifier: Option<String>,
    pub accept_streams: bool,
}

impl Default for VisitOptions {
    fn default() -> Self {
        Self {
            action: VisitAction::Advance,
            direction: None,
            response: None,
            should_cache_snapshot: true,
            will_render: true,
            update_history: true,
            restoration_identifier: None,
            accept_streams: false,
        }
    }
}

impl VisitOptions {
    pub fn with_action(action: VisitAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }
}

/// Render a visit has scheduled but not yet performed.
#[derive(Debug, Clone)]
pub(crate) enum PendingRender {
    Cached { snapshot: Snapshot, is_preview: bool },
    Response,
}

#[derive(Debug, Clone)]
pub struct Visit {
    id: String,
    location: Location,
    action: VisitAction,
    direction: VisitDirection,
    state: VisitState,
    request_state: RequestState,
    timing: VisitTiming,
    restoration_identifier: String,
    should_cache_snapshot: bool,
    will_render: bool,
    update_history: bool,
    accept_streams: bool,
    is_page_refresh: bool,
    is_same_page: bool,
    response: Option<FetchResponse>,
    redirected_to: Option<Location>,
    error: Option<DriveError>,
    pub(crate) request_id: Option<String>,
    pub(crate) render_task: Option<TaskHandle>,
    pub(crate) pending_render: Option<PendingRender>,
    pub(crate) has_cached_snapshot: bool,
    pub(crate) snapshot_cached: bool,
    pub(crate) history_changed: bool,
    pub(crate) scrolled: bool,
}

impl Visit {
    pub(crate) fn new(
        location: Location,
        options: VisitOptions,
        restoration_identifier: &str,
        is_page_refresh: bool,
        is_same_page: bool,
    ) -> Self {
        Self {
            id: fresh_uid(),
            direction: options
                .direction
                .unwrap_or_else(|| VisitDirection::from(options.action)),
            location,
            action: options.action,
            state: VisitState::Initialized,
            request_state: RequestState::Initialized,
            timing: VisitTiming::default(),
            restoration_identifier: options
                .restoration_identifier
                .unwrap_or_else(|| restoration_identifier.to_owned()),
            should_cache_snapshot: options.should_cache_snapshot,
            will_render: options.will_render,
            update_history: options.update_history,
            accept_streams: options.accept_streams,
            is_page_refresh,
            is_same_page,
            response: options.response,
            redirected_to: None,
            error: None,
            request_id: None,
            render_task: None,
            pending_render: None,
            has_cached_snapshot: false,
            snapshot_cached: false,
            history_changed: false,
            scrolled: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn action(&self) -> VisitAction {
        self.action
    }

    pub fn direction(&self) -> VisitDirection {
        self.direction
    }

    pub fn state(&self) -> VisitState {
        self.state
    }

    pub fn request_state(&self) -> RequestState {
        self.request_state
    }

    pub fn timing(&self) -> VisitTiming {
        self.timing
    }

    pub fn restoration_identifier(&self) -> &str {
        &self.restoration_identifier
    }

    pub fn should_cache_snapshot(&self) -> bool {
        self.should_cache_snapshot
    }

    pub fn will_render(&self) -> bool {
        self.will_render
    }

    pub fn update_history(&self) -> bool {
        self.update_history
    }

    pub fn accepts_streams(&self) -> bool {
        self.accept_streams
    }

    pub fn is_page_refresh(&self) -> bool {
        self.is_page_refresh
    }

    pub fn is_same_page(&self) -> bool {
        self.is_same_page
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        self.response.as_ref()
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn redirected_to(&self) -> Option<&Location> {
        self.redirected_to.as_ref()
    }

    pub fn error(&self) -> Option<&DriveError> {
        self.error.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Same-page anchor jumps never fetch; restores fetch only without a
    /// cached snapshot; otherwise a request is needed whenever the visit
    /// renders.
    pub fn should_issue_request(&self) -> bool {
        if self.is_same_page {
            false
        } else if self.action == VisitAction::Restore {
            !self.has_cached_snapshot
        } else {
            self.will_render
        }
    }

    pub(crate) fn start(&mut self, now: Duration) -> bool {
        if self.state != VisitState::Initialized {
            return false;
        }
        self.timing.visit_start = Some(now);
        self.state = VisitState::Started;
        true
    }

    /// Only a started visit can be canceled.
    pub(crate) fn cancel(&mut self, now: Duration) -> bool {
        if self.state != VisitState::Started {
            return false;
        }
        self.pending_render = None;
        self.finish(VisitState::Canceled, now);
        true
    }

    pub(crate) fn complete(&mut self, now: Duration) -> bool {
        if self.state != VisitState::Started {
            return false;
        }
        self.finish(VisitState::Completed, now);
        true
    }

    pub(crate) fn fail(&mut self, now: Duration, error: Option<DriveError>) -> bool {
        if self.state != VisitState::Started {
            return false;
        }
        self.error = error;
        self.finish(VisitState::Failed, now);
        true
    }

    fn finish(&mut self, state: VisitState, now: Duration) {
        self.state = state;
        self.timing.visit_end = Some(now);
        if self.request_state == RequestState::Started {
            self.request_state = RequestState::Finished;
        }
    }

    pub(crate) fn request_started(&mut self, request_id: Option<String>, now: Duration) {
        self.request_id = request_id;
        self.request_state = RequestState::Started;
        self.timing.request_start = Some(now);
    }

    pub(crate) fn record_response(&mut self, response: FetchResponse) {
        if response.redirected && !response.location.same_page_as(&self.location) {
            self.redirected_to = Some(response.location.clone());
        }
        self.response = Some(response);
        self.request_state = RequestState::Received;
    }

    pub(crate) fn request_finished(&mut self, now: Duration) {
        self.request_state = RequestState::Finished;
        self.timing.request_end = Some(now);
    }
}
