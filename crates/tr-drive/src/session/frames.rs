//! Frame navigation: sources, requests, and rendering responses into the
//! frame they were meant for.

use super::Session;
use crate::delegate::DelegateInterceptor;
use crate::form::FormSubmission;
use crate::frame::FrameLookup;
use crate::frame::locate_frame;
use crate::render::RenderPolicy;
use crate::render::RenderTarget;
use crate::render::select_strategy;
use crate::snapshot::Snapshot;
use crate::stream::StreamMessage;
use crate::visit::VisitAction;
use crate::visit::VisitOptions;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_dom::NodeId;
use tr_net::Dispatch;
use tr_net::FetchPurpose;
use tr_net::FetchRequest;
use tr_net::FetchResponse;
use tr_net::Location;

/// How many `recurse` hops a frame load may follow.
const MAX_FRAME_RECURSION: u8 = 5;

/// Bookkeeping for one in-flight frame request.
#[derive(Debug, Clone)]
pub(crate) struct FrameFetch {
    pub(crate) frame_id: String,
    pub(crate) location: Location,
    pub(crate) depth: u8,
    pub(crate) is_refresh: bool,
    pub(crate) clears_cache: bool,
}

impl Session {
    /// Sets or clears a frame's `src`. True when a load was issued.
    ///
    /// The load finishes later, while the session is pumped. Its outcome,
    /// including a `frame.missing` failure, is read from
    /// [`FrameController::loaded`](crate::frame::FrameController::loaded) through [`Session::frame`].
    pub fn set_frame_src(&mut self, id: &str, src: Option<&str>) -> DriveResult<bool> {
        let src = src.map(|src| self.view.location().join(src)).transpose()?;
        let Some(frame) = self.frames.get_mut(id) else {
            return Err(DriveError::new("frame.unknown", format!("no connected frame #{id}")));
        };
        let load = frame.src_changed(src);
        frame.reflect(self.view.document_mut())?;
        if load {
            self.load_frame_src(id, false)?;
        }
        Ok(load)
    }

    /// Fetches the frame's `src` again even when it is complete.
    pub fn reload_frame(&mut self, id: &str) -> DriveResult<bool> {
        let Some(frame) = self.frames.get_mut(id) else {
            return Err(DriveError::new("frame.unknown", format!("no connected frame #{id}")));
        };
        if !frame.reload() {
            return Ok(false);
        }
        self.load_frame_src(id, false)?;
        Ok(true)
    }

    /// The frame became visible; lazy frames load the first time.
    pub fn frame_entered_viewport(&mut self, id: &str) -> DriveResult<bool> {
        let Some(frame) = self.frames.get_mut(id) else {
            return Err(DriveError::new("frame.unknown", format!("no connected frame #{id}")));
        };
        if !frame.appear() {
            return Ok(false);
        }
        self.load_frame_src(id, false)?;
        Ok(true)
    }

    /// Reconnects controllers to the frames now in the page.
    pub(crate) fn sync_frames(&mut self) -> DriveResult<()> {
        let sync = self.frames.sync(self.view.document(), self.view.location());
        for request_id in sync.orphaned_requests {
            self.transport.cancel(&request_id);
            self.frame_fetches.remove(&request_id);
        }
        for id in sync.to_load {
            self.load_frame_src(&id, false)?;
        }
        Ok(())
    }

    /// After a page morph, frames that opt into morphing reload their source.
    pub(crate) fn reload_morphing_frames(&mut self) -> DriveResult<()> {
        let ids: Vec<String> = self
            .frames
            .iter()
            .filter(|frame| frame.morph_on_refresh() && frame.src().is_some() && !frame.is_disabled())
            .map(|frame| frame.id().to_owned())
            .collect();
        for id in ids {
            if let Some(frame) = self.frames.get_mut(&id) {
                frame.reload();
            }
            self.load_frame_src(&id, true)?;
        }
        Ok(())
    }

    /// A link inside, or aimed at, a frame navigates only that frame.
    pub(crate) fn navigate_frame(
        &mut self,
        element: NodeId,
        location: Location,
        action: Option<VisitAction>,
    ) -> DriveResult<()> {
        let Some(frame) = self.frames.by_element_mut(element) else {
            return Ok(());
        };
        if frame.is_disabled() {
            return Ok(());
        }
        if action.is_some() {
            frame.set_pending_action(action);
        }
        let id = frame.id().to_owned();
        let load = frame.src_changed(Some(location));
        frame.reflect(self.view.document_mut())?;
        if load {
            self.load_frame_src(&id, false)?;
        }
        Ok(())
    }

    pub(crate) fn submit_to_frame(&mut self, element: NodeId, submission: FormSubmission) -> DriveResult<()> {
        let Some(frame) = self.frames.by_element_mut(element) else {
            return self.submit_form(submission);
        };
        if frame.is_disabled() {
            return Ok(());
        }
        if submission.visit_action().is_some() {
            frame.set_pending_action(submission.visit_action());
        }
        let id = frame.id().to_owned();
        let request = submission.request(FetchPurpose::Frame(id.clone()))?;
        let fetch = FrameFetch {
            frame_id: id,
            location: submission.location().clone(),
            depth: 0,
            is_refresh: false,
            clears_cache: !submission.is_safe(),
        };
        self.dispatch_frame_request(request, fetch)
    }

    fn load_frame_src(&mut self, id: &str, is_refresh: bool) -> DriveResult<()> {
        let Some(src) = self.frames.get(id).and_then(|frame| frame.src().cloned()) else {
            return Ok(());
        };
        let request = FetchRequest::get(src.clone(), FetchPurpose::Frame(id.to_owned()));
        let fetch = FrameFetch {
            frame_id: id.to_owned(),
            location: src,
            depth: 0,
            is_refresh,
            clears_cache: false,
        };
        self.dispatch_frame_request(request, fetch)
    }

    /// Claims the frame for `request`, canceling whatever it displaced.
    fn dispatch_frame_request(&mut self, request: FetchRequest, fetch: FrameFetch) -> DriveResult<()> {
        let Some(frame) = self.frames.get_mut(&fetch.frame_id) else {
            return Ok(());
        };
        if frame.is_disabled() {
            return Ok(());
        }
        if let Some(displaced) = frame.begin_request(&request.id) {
            self.transport.cancel(&displaced);
            self.frame_fetches.remove(&displaced);
        }
        frame.reflect(self.view.document_mut())?;
        log::debug!(
            target: "trellis::frame",
            "loading #{} from {} (depth {})",
            fetch.frame_id,
            fetch.location,
            fetch.depth
        );

        let request_id = request.id.clone();
        let mut interceptor = DelegateInterceptor {
            delegate: self.delegate.as_mut(),
        };
        match self.transport.issue(request, &mut interceptor) {
            Dispatch::Sent(request_id) => {
                self.frame_fetches.insert(request_id, fetch);
                Ok(())
            }
            Dispatch::Answered(response) => self.frame_completion(&request_id, fetch, Ok(response)),
            Dispatch::Prevented => {
                if let Some(frame) = self.frames.get_mut(&fetch.frame_id) {
                    frame.finish_request();
                    frame.reflect(self.view.document_mut())?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn frame_completion(
        &mut self,
        request_id: &str,
        fetch: FrameFetch,
        outcome: DriveResult<FetchResponse>,
    ) -> DriveResult<()> {
        let Some(frame) = self.frames.get_mut(&fetch.frame_id) else {
            return Ok(());
        };
        if !frame.owns_request(request_id) {
            return Ok(());
        }

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                frame.finish_request();
                frame.load_failed(error.clone());
                frame.reflect(self.view.document_mut())?;
                self.delegate.fetch_error(request_id, &error);
                return Ok(());
            }
        };
        if self.delegate.before_fetch_response(&response).is_prevented() {
            frame.finish_request();
            frame.reflect(self.view.document_mut())?;
            return Ok(());
        }
        if fetch.clears_cache {
            self.snapshot_cache.clear();
        }

        if response.is_stream() {
            frame.finish_request();
            frame.reflect(self.view.document_mut())?;
            let message = StreamMessage::parse(&response.text())?;
            for directive in message.directives() {
                self.apply_stream_directive(directive)?;
            }
            return self.sync_frames();
        }
        if !response.is_html() {
            frame.finish_request();
            frame.load_failed(DriveError::new(
                "frame.content_type_mismatch",
                format!("{} answered #{} without HTML", response.location, fetch.frame_id),
            ));
            frame.reflect(self.view.document_mut())?;
            return Ok(());
        }

        let page = Snapshot::from_html(&response.text())?;
        if !page.is_visitable() {
            frame.finish_request();
            frame.reflect(self.view.document_mut())?;
            log::debug!(
                target: "trellis::frame",
                "#{} response from {} is not visitable in place",
                fetch.frame_id,
                response.location
            );
            let options = VisitOptions {
                response: Some(response.clone()),
                ..VisitOptions::default()
            };
            return self.visit_with(response.location, options).map(|_| ());
        }

        match locate_frame(page.document(), &fetch.frame_id, &response.location) {
            FrameLookup::Found(found) => self.render_frame(&fetch, &response, &page, found),
            FrameLookup::Delegated(location) if fetch.depth < MAX_FRAME_RECURSION => {
                let request = FetchRequest::get(location.clone(), FetchPurpose::Frame(fetch.frame_id.clone()));
                let fetch = FrameFetch {
                    location,
                    depth: fetch.depth + 1,
                    ..fetch
                };
                self.dispatch_frame_request(request, fetch)
            }
            FrameLookup::Delegated(_) | FrameLookup::Missing => self.frame_missing(&fetch, &response),
        }
    }

    fn render_frame(
        &mut self,
        fetch: &FrameFetch,
        response: &FetchResponse,
        page: &Snapshot,
        found: NodeId,
    ) -> DriveResult<()> {
        let Some(frame) = self.frames.get(&fetch.frame_id) else {
            return Ok(());
        };
        let element = frame.element();
        let target = RenderTarget::Frame(element);
        let policy = RenderPolicy {
            is_page_refresh: fetch.is_refresh,
            frame_prefers_morph: frame.morph_on_refresh(),
            ..RenderPolicy::default()
        };
        let promotes = frame.pending_action().is_some();
        let snapshot = Snapshot::from_element(page.document(), found)?;
        let strategy = select_strategy(target, &snapshot, policy);

        // A frame load that becomes a visit keeps the page as it looked
        // before the frame changed.
        if promotes {
            let outgoing = self.view.snapshot()?;
            if outgoing.is_cacheable() {
                let location = self.view.location().clone();
                self.snapshot_cache.put(&location, outgoing);
            }
        }

        let outcome = self.perform_render(
            strategy,
            &snapshot,
            target,
            false,
            &response.location,
            Some(fetch.frame_id.clone()),
        )?;

        let Some(frame) = self.frames.get_mut(&fetch.frame_id) else {
            return Ok(());
        };
        frame.finish_request();
        if !outcome.rendered() {
            frame.reflect(self.view.document_mut())?;
            return Ok(());
        }
        frame.loaded_from(response.location.clone());
        frame.reflect(self.view.document_mut())?;
        let autoscroll = frame.autoscroll();
        let action = frame.take_pending_action();

        if autoscroll {
            self.view.scroll_into_view(element);
        }
        self.after_render()?;
        self.delegate.frame_load(&fetch.frame_id, &response.location);

        if let Some(action) = action {
            let options = VisitOptions {
                action,
                response: Some(response.clone()),
                should_cache_snapshot: false,
                will_render: false,
                ..VisitOptions::default()
            };
            self.visit_with(response.location.clone(), options)?;
        }
        Ok(())
    }

    /// The response lacked the frame. Unless the delegate takes over, the
    /// frame shows a marker and records the failure.
    fn frame_missing(&mut self, fetch: &FrameFetch, response: &FetchResponse) -> DriveResult<()> {
        let disposition = self.delegate.frame_missing(&fetch.frame_id, response);
        let Some(frame) = self.frames.get_mut(&fetch.frame_id) else {
            return Ok(());
        };
        frame.finish_request();
        frame.mark_complete();
        if disposition.is_prevented() {
            return frame.reflect(self.view.document_mut());
        }

        let error = DriveError::new(
            "frame.missing",
            format!(
                "response ({}) from {} did not contain the expected <turbo-frame id=\"{}\">",
                response.status.as_u16(),
                response.location,
                fetch.frame_id
            ),
        );
        log::warn!(target: "trellis::frame", "{error}");
        frame.load_failed(error);
        frame.reflect(self.view.document_mut())?;

        let element = frame.element();
        let document = self.view.document_mut();
        document.clear_children(element);
        let marker = document.create_element_with("strong", &[("class", "turbo-frame-error")]);
        let text = document.create_text("Content missing");
        document.append_child(marker, text)?;
        document.append_child(element, marker)?;
        Ok(())
    }
}
