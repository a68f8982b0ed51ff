//! Top-level visit lifecycle: propose, start, request, render, complete.

use super::RenderOutcome;
use super::Session;
use super::Task;
use crate::delegate::DelegateInterceptor;
use crate::history::HistoryMethod;
use crate::navigator::Navigation;
use crate::render::RenderPolicy;
use crate::render::RenderStrategy;
use crate::render::RenderTarget;
use crate::render::select_strategy;
use crate::snapshot::Snapshot;
use crate::stream::StreamMessage;
use crate::visit::PendingRender;
use crate::visit::Visit;
use crate::visit::VisitAction;
use crate::visit::VisitOptions;
use crate::visit::VisitState;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_core::fresh_uid;
use tr_net::Dispatch;
use tr_net::FetchPurpose;
use tr_net::FetchRequest;
use tr_net::FetchResponse;
use tr_net::Location;

impl Session {
    /// Visits `href`, resolved against the current location, as a plain
    /// advance. False when the visit was vetoed or handed to a hard reload.
    pub fn visit(&mut self, href: &str) -> DriveResult<bool> {
        let location = self.view.location().join(href)?;
        self.visit_with(location, VisitOptions::default())
    }

    /// Proposes a visit: locations outside the root reload, then the
    /// delegate may veto, then the visit starts.
    pub fn visit_with(&mut self, location: Location, options: VisitOptions) -> DriveResult<bool> {
        let root = self.view.root_location();
        if !location.is_visitable(&root) {
            self.request_hard_reload(location, "location_not_visitable");
            return Ok(false);
        }
        if self.delegate.before_visit(&location, options.action).is_prevented() {
            log::debug!(target: "trellis::visit", "visit to {location} prevented");
            return Ok(false);
        }
        self.start_visit(location, options)?;
        Ok(true)
    }

    pub(crate) fn start_visit(&mut self, location: Location, options: VisitOptions) -> DriveResult<()> {
        self.stop_navigation()?;
        if options.action != VisitAction::Restore {
            let position = self.view.scroll_position();
            self.history.record_scroll(position);
        }

        let current = self.view.location();
        let is_same_page = options.action != VisitAction::Replace
            && location.same_page_as(current)
            && match location.anchor() {
                None => options.action == VisitAction::Restore,
                Some(anchor) => current.anchor().as_deref() != Some(anchor.as_str()),
            };
        let is_page_refresh = options.action == VisitAction::Replace && location.same_page_as(current);
        let accept_streams = options.accept_streams;

        // Each proposed visit gets its own entry identity; restores carry
        // the identifier of the entry they return to.
        let restoration_identifier = fresh_uid();
        let mut visit = Visit::new(location, options, &restoration_identifier, is_page_refresh, is_same_page);
        visit.has_cached_snapshot = self.snapshot_cache.has(visit.location());
        visit.start(self.scheduler.now());
        log::debug!(
            target: "trellis::visit",
            "{} visit {} to {}",
            visit.action().as_str(),
            visit.id(),
            visit.location()
        );
        self.delegate.visit_started(&visit);
        let has_response = visit.has_response();
        self.navigator.occupy(Navigation::Visit(visit));

        if is_same_page {
            self.change_history()?;
            if let Some(location) = self.navigator.current_visit().map(|visit| visit.location().clone()) {
                self.view.set_location(location);
            }
            self.perform_scroll(false);
            return self.complete_current_visit();
        }

        self.load_cached_snapshot()?;
        self.issue_visit_request()?;
        // Stream-accepting visits wait for the response to pick a history
        // method; a stream answer never changes history.
        if !accept_streams || has_response {
            self.change_history()?;
        }
        Ok(())
    }

    /// Pushes or replaces the history entry once per visit.
    fn change_history(&mut self) -> DriveResult<()> {
        let view_location = self.view.location().clone();
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };
        if visit.history_changed || !visit.update_history() {
            return Ok(());
        }
        visit.history_changed = true;
        if visit.action() == VisitAction::Restore {
            return Ok(());
        }

        let location = visit.redirected_to().unwrap_or(visit.location()).clone();
        let method = if visit.action() == VisitAction::Replace || location == view_location {
            HistoryMethod::Replace
        } else {
            HistoryMethod::Push
        };
        let restoration_identifier = visit.restoration_identifier().to_owned();
        self.history.update(method, location.clone(), &restoration_identifier)?;
        self.delegate.history_changed(&location, method);
        Ok(())
    }

    /// Shows a cached snapshot as a preview, or as the final render when
    /// restoring without a request.
    fn load_cached_snapshot(&mut self) -> DriveResult<()> {
        let Some(visit) = self.navigator.current_visit() else {
            return Ok(());
        };
        if visit.is_page_refresh() || !visit.will_render() {
            return Ok(());
        }
        let location = visit.location().clone();
        let action = visit.action();
        let is_preview = visit.should_issue_request();

        let Some(snapshot) = self.snapshot_cache.get(&location) else {
            return Ok(());
        };
        if let Some(anchor) = location.anchor() {
            if !snapshot.has_anchor(&anchor) {
                return Ok(());
            }
        }
        if !(snapshot.is_previewable() || action == VisitAction::Restore) {
            return Ok(());
        }
        let snapshot = snapshot.clone();

        log::debug!(
            target: "trellis::visit",
            "{} cached snapshot of {location}",
            if is_preview { "previewing" } else { "restoring" }
        );
        if let Some(visit) = self.navigator.current_visit_mut() {
            visit.pending_render = Some(PendingRender::Cached { snapshot, is_preview });
        }
        self.schedule_visit_render()
    }

    /// Snapshots the outgoing page, then queues the render for the next
    /// frame, or the next tick when the view is hidden.
    fn schedule_visit_render(&mut self) -> DriveResult<()> {
        self.cache_outgoing_snapshot()?;
        let visible = self.view.is_visible();
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };
        if visit.render_task.is_some_and(|handle| self.scheduler.is_pending(handle)) {
            return Ok(());
        }
        let task = Task::RenderVisit(visit.id().to_owned());
        let handle = if visible {
            self.scheduler.next_frame(task)
        } else {
            self.scheduler.next_tick(task)
        };
        visit.render_task = Some(handle);
        Ok(())
    }

    fn cache_outgoing_snapshot(&mut self) -> DriveResult<()> {
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };
        if !visit.should_cache_snapshot() || visit.snapshot_cached {
            return Ok(());
        }
        visit.snapshot_cached = true;

        self.delegate.before_cache(self.view.document_mut());
        let snapshot = self.view.snapshot()?;
        let location = self.view.location().clone();
        if snapshot.is_cacheable() {
            log::trace!(target: "trellis::visit", "caching snapshot of {location}");
            self.snapshot_cache.put(&location, snapshot);
        }
        Ok(())
    }

    fn issue_visit_request(&mut self) -> DriveResult<()> {
        let now = self.scheduler.now();
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };

        if let Some(response) = visit.response().cloned() {
            visit.request_started(None, now);
            self.delegate.visit_request_started(visit);
            return self.visit_response_received(response);
        }
        if !visit.should_issue_request() {
            return Ok(());
        }

        let location = visit.location().clone();
        if let Some(entry) = self.prefetch.take(&location, now) {
            log::debug!(target: "trellis::visit", "using prefetched {location}");
            visit.request_started(Some(entry.request_id), now);
            self.delegate.visit_request_started(visit);
            if let Some(response) = entry.response {
                return self.visit_completion(Ok(response));
            }
            return Ok(());
        }

        let mut request = FetchRequest::get(location, FetchPurpose::Visit);
        if visit.accepts_streams() {
            request.accept_streams()?;
        }
        let mut interceptor = DelegateInterceptor {
            delegate: self.delegate.as_mut(),
        };
        match self.transport.issue(request, &mut interceptor) {
            Dispatch::Sent(request_id) => {
                visit.request_started(Some(request_id), now);
                self.delegate.visit_request_started(visit);
                Ok(())
            }
            Dispatch::Answered(response) => {
                visit.request_started(Some(response.request_id.clone()), now);
                self.delegate.visit_request_started(visit);
                self.visit_completion(Ok(response))
            }
            Dispatch::Prevented => self.stop_navigation(),
        }
    }

    /// A response, or a transport failure, for the current visit's request.
    pub(crate) fn visit_completion(&mut self, outcome: DriveResult<FetchResponse>) -> DriveResult<()> {
        match outcome {
            Ok(response) => {
                if self.delegate.before_fetch_response(&response).is_prevented() {
                    return self.stop_navigation();
                }
                self.visit_response_received(response)
            }
            Err(error) => {
                let now = self.scheduler.now();
                let Some(visit) = self.navigator.current_visit_mut() else {
                    return Ok(());
                };
                if let Some(request_id) = visit.request_id() {
                    self.delegate.fetch_error(request_id, &error);
                }
                visit.request_finished(now);
                self.delegate.visit_request_finished(visit);
                let location = visit.location().clone();
                visit.fail(now, Some(error));
                self.delegate.visit_failed(visit);
                self.request_hard_reload(location, "request_failed");
                Ok(())
            }
        }
    }

    fn visit_response_received(&mut self, response: FetchResponse) -> DriveResult<()> {
        let now = self.scheduler.now();
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };

        if response.is_stream() && visit.accepts_streams() {
            let body = response.text();
            visit.record_response(response);
            visit.request_finished(now);
            self.delegate.visit_request_finished(visit);
            visit.complete(now);
            self.delegate.visit_completed(visit);
            let message = StreamMessage::parse(&body)?;
            for directive in message.directives() {
                self.apply_stream_directive(directive)?;
            }
            self.sync_frames()?;
            return Ok(());
        }

        if !response.is_html() {
            let location = response.location.clone();
            let error = DriveError::new(
                "visit.content_type_mismatch",
                format!(
                    "{location} answered with {}",
                    response.media_type().unwrap_or_else(|| "no content type".to_owned())
                ),
            );
            visit.request_finished(now);
            self.delegate.visit_request_finished(visit);
            visit.fail(now, Some(error));
            self.delegate.visit_failed(visit);
            self.request_hard_reload(location, "request_failed");
            return Ok(());
        }

        visit.record_response(response);
        visit.request_finished(now);
        self.delegate.visit_request_finished(visit);
        visit.pending_render = Some(PendingRender::Response);
        self.change_history()?;
        self.schedule_visit_render()
    }

    /// Runs the render a visit scheduled; stale tasks are ignored.
    pub(crate) fn render_visit(&mut self, visit_id: &str) -> DriveResult<()> {
        let Some(visit) = self.navigator.active_visit_mut(visit_id) else {
            return Ok(());
        };
        visit.render_task = None;
        match visit.pending_render.take() {
            Some(PendingRender::Cached { snapshot, is_preview }) => self.render_cached(&snapshot, is_preview),
            Some(PendingRender::Response) => self.render_response(),
            None => Ok(()),
        }
    }

    fn render_cached(&mut self, snapshot: &Snapshot, is_preview: bool) -> DriveResult<()> {
        let Some(location) = self.navigator.current_visit().map(|visit| visit.location().clone()) else {
            return Ok(());
        };
        let strategy = select_strategy(RenderTarget::Page, snapshot, RenderPolicy::default());
        match self.perform_render(strategy, snapshot, RenderTarget::Page, is_preview, &location, None)? {
            RenderOutcome::Reloading(reason) => {
                return self.fail_current_visit(Some(DriveError::new("render.reload_required", reason)));
            }
            RenderOutcome::Prevented if is_preview => return Ok(()),
            RenderOutcome::Prevented => return self.stop_navigation(),
            RenderOutcome::Rendered(_) => {}
        }

        self.view.set_location(location);
        self.after_render()?;
        self.perform_scroll(false);
        if is_preview {
            return Ok(());
        }
        self.complete_current_visit()
    }

    fn render_response(&mut self) -> DriveResult<()> {
        let Some(visit) = self.navigator.current_visit() else {
            return Ok(());
        };
        let final_location = visit.redirected_to().unwrap_or(visit.location()).clone();
        let is_page_refresh = visit.is_page_refresh();
        let Some(response) = visit.response() else {
            return Ok(());
        };
        let failed = response.failed();
        let body = response.text();

        if !visit.will_render() {
            self.view.set_location(final_location);
            return self.complete_current_visit();
        }

        let snapshot = Snapshot::from_html(&body)?;
        let policy = RenderPolicy {
            is_page_refresh,
            failed_response: failed,
            page_prefers_morph: snapshot.should_morph_page(),
            frame_prefers_morph: false,
        };
        let strategy = select_strategy(RenderTarget::Page, &snapshot, policy);
        match self.perform_render(strategy, &snapshot, RenderTarget::Page, false, &final_location, None)? {
            RenderOutcome::Reloading(reason) => {
                return self.fail_current_visit(Some(DriveError::new("render.reload_required", reason)));
            }
            RenderOutcome::Prevented => return self.stop_navigation(),
            RenderOutcome::Rendered(_) => {}
        }

        self.view.set_location(final_location);
        self.after_render()?;
        if strategy == RenderStrategy::Morph {
            self.reload_morphing_frames()?;
        }
        let preserve = is_page_refresh && snapshot.should_preserve_scroll_position();
        self.perform_scroll(preserve);

        if failed {
            self.fail_current_visit(None)
        } else {
            self.complete_current_visit()
        }
    }

    /// Completes the visit, or hands a redirect to a follow-up replace visit
    /// that corrects the recorded location without rendering again.
    fn complete_current_visit(&mut self) -> DriveResult<()> {
        let now = self.scheduler.now();
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };
        if !visit.complete(now) {
            return Ok(());
        }

        if let (Some(redirected_to), true) = (visit.redirected_to().cloned(), visit.will_render()) {
            log::debug!(target: "trellis::visit", "following redirect to {redirected_to}");
            let options = VisitOptions {
                action: VisitAction::Replace,
                response: visit.response().cloned(),
                should_cache_snapshot: false,
                will_render: false,
                ..VisitOptions::default()
            };
            return self.start_visit(redirected_to, options);
        }

        self.delegate.visit_completed(visit);
        let location = self.view.location().clone();
        self.delegate.load(&location);
        Ok(())
    }

    /// Scrolls once per visit: restored position, then anchor, then top.
    fn perform_scroll(&mut self, preserve: bool) {
        let Some(visit) = self.navigator.current_visit_mut() else {
            return;
        };
        if visit.scrolled {
            return;
        }
        visit.scrolled = true;
        if preserve {
            return;
        }

        let restored = if visit.action() == VisitAction::Restore {
            self.history
                .restoration_data(visit.restoration_identifier())
                .and_then(|data| data.scroll_position)
        } else {
            None
        };
        let anchor = visit.redirected_to().unwrap_or(visit.location()).anchor();
        match (restored, anchor) {
            (Some(position), _) => self.view.scroll_to_position(position),
            (None, Some(anchor)) if self.view.scroll_to_anchor(&anchor) => {}
            _ => self.view.scroll_to_top(),
        }
    }

    fn fail_current_visit(&mut self, error: Option<DriveError>) -> DriveResult<()> {
        let now = self.scheduler.now();
        let Some(visit) = self.navigator.current_visit_mut() else {
            return Ok(());
        };
        if let Some(request_id) = visit.request_id.as_deref() {
            self.transport.cancel(request_id);
        }
        if let Some(handle) = visit.render_task.take() {
            self.scheduler.cancel(handle);
        }
        if visit.fail(now, error) {
            self.delegate.visit_failed(visit);
        }
        Ok(())
    }

    /// Replace visit of the current location that keeps history and skips
    /// the outgoing snapshot.
    pub(crate) fn perform_refresh(&mut self) -> DriveResult<()> {
        self.refresh = None;
        if self
            .navigator
            .current_visit()
            .is_some_and(|visit| visit.state() == VisitState::Started)
        {
            log::debug!(target: "trellis::visit", "refresh skipped while a visit is running");
            return Ok(());
        }
        let location = self.view.location().clone();
        let options = VisitOptions {
            action: VisitAction::Replace,
            should_cache_snapshot: false,
            ..VisitOptions::default()
        };
        self.visit_with(location, options).map(|_| ())
    }
}
