//! User input the host forwards to the engine.

use super::Session;
use super::Task;
use crate::delegate::DelegateInterceptor;
use crate::form::FormSubmission;
use crate::history::HistoryDirection;
use crate::history::ScrollPosition;
use crate::observers::ClickInput;
use crate::observers::NavigationTarget;
use crate::observers::clicked_link;
use crate::observers::link_is_followable;
use crate::observers::link_location;
use crate::observers::link_submits;
use crate::observers::navigation_target;
use crate::observers::prefetch_eligible;
use crate::observers::visit_action;
use crate::visit::VisitAction;
use crate::visit::VisitDirection;
use crate::visit::VisitOptions;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_dom::NodeId;
use tr_dom::Selector;
use tr_net::Dispatch;
use tr_net::FetchPurpose;
use tr_net::FetchRequest;

impl Session {
    /// A plain primary click on `element`. True when the engine took it
    /// over; false means the host should follow its default behavior.
    pub fn click(&mut self, element: NodeId) -> DriveResult<bool> {
        self.click_with(element, ClickInput::default())
    }

    pub fn click_with(&mut self, element: NodeId, input: ClickInput) -> DriveResult<bool> {
        if !input.is_plain() {
            return Ok(false);
        }
        let document = self.view.document();
        let Some(link) = clicked_link(document, element) else {
            return Ok(false);
        };
        if !link_is_followable(document, link) {
            return Ok(false);
        }
        let Some(location) = link_location(document, link, self.view.location()) else {
            return Ok(false);
        };
        if !location.is_visitable(&self.view.root_location()) {
            return Ok(false);
        }

        if link_submits(document, link) {
            let submission = FormSubmission::from_link(document, link, self.view.location())?;
            self.submit_prepared(submission, link, None)?;
            return Ok(true);
        }

        let action = visit_action(document, &[link]);
        match navigation_target(document, link, None) {
            NavigationTarget::Frame(frame) => self.navigate_frame(frame, location, action)?,
            NavigationTarget::Top => {
                let options = VisitOptions::with_action(action.unwrap_or(VisitAction::Advance));
                self.visit_with(location, options)?;
            }
        }
        Ok(true)
    }

    /// Clicks the first element matching `selector`.
    pub fn click_selector(&mut self, selector: &str) -> DriveResult<bool> {
        let element = self.select_required(selector)?;
        self.click(element)
    }

    /// Submits the form matching `selector`, or the form owning the
    /// matched submit button.
    pub fn submit_selector(&mut self, selector: &str) -> DriveResult<bool> {
        let element = self.select_required(selector)?;
        let document = self.view.document();
        if document.has_tag(element, "form") {
            return self.submit(element, None);
        }
        let owner = document
            .attr(element, "form")
            .and_then(|id| document.element_by_id(id))
            .or_else(|| {
                Selector::parse("form")
                    .ok()
                    .and_then(|form| document.closest(element, &form))
            });
        match owner {
            Some(form) => self.submit(form, Some(element)),
            None => Err(DriveError::new(
                "form.missing",
                format!("`{selector}` is not inside a form"),
            )),
        }
    }

    fn select_required(&self, selector: &str) -> DriveResult<NodeId> {
        let document = self.view.document();
        document.select(document.root(), selector)?.ok_or_else(|| {
            DriveError::new("dom.node_missing", format!("nothing matches `{selector}`"))
        })
    }

    /// Pointer entered `element`; an eligible link is prefetched once the
    /// hover outlasts the configured delay. True when a prefetch was armed.
    pub fn hover(&mut self, element: NodeId) -> DriveResult<bool> {
        let document = self.view.document();
        let Some(link) = clicked_link(document, element) else {
            return Ok(false);
        };
        let Some(location) = link_location(document, link, self.view.location()) else {
            return Ok(false);
        };
        let root = self.view.root_location();
        if !prefetch_eligible(document, link, &location, self.view.location(), &root) {
            return Ok(false);
        }
        if self.prefetch.get(&location, self.scheduler.now()).is_some() {
            return Ok(false);
        }

        if let Some(stale) = self.prefetch.clear(&mut self.scheduler) {
            self.transport.cancel(&stale.request_id);
        }
        log::trace!(target: "trellis::net", "prefetch of {location} armed");
        let request = FetchRequest::get(location, FetchPurpose::Prefetch);
        self.prefetch.set_later(
            &mut self.scheduler,
            request,
            self.config.prefetch_delay,
            self.config.prefetch_ttl,
            Task::IssuePrefetch,
        );
        Ok(true)
    }

    /// Pointer left the link: the pending debounce and the prefetched slot
    /// are dropped, and a request still in flight is canceled. True when
    /// there was anything to drop.
    pub fn hover_end(&mut self) -> bool {
        let debouncing = self.prefetch.is_debouncing();
        match self.prefetch.clear(&mut self.scheduler) {
            Some(entry) => {
                self.transport.cancel(&entry.request_id);
                true
            }
            None => debouncing,
        }
    }

    pub(crate) fn issue_prefetch(&mut self) {
        let Some(request) = self.prefetch.fire(self.scheduler.now()) else {
            return;
        };
        let mut interceptor = DelegateInterceptor {
            delegate: self.delegate.as_mut(),
        };
        match self.transport.issue(request, &mut interceptor) {
            Dispatch::Sent(_) => {}
            Dispatch::Answered(response) => {
                self.prefetch.resolve(response);
            }
            Dispatch::Prevented => {
                self.prefetch.clear(&mut self.scheduler);
            }
        }
    }

    /// The page scrolled; the position is kept for the current entry.
    pub fn scroll_to(&mut self, position: ScrollPosition) {
        self.view.scroll_to_position(position);
        self.history.record_scroll(position);
    }

    /// Hidden views render on the next tick instead of the next frame.
    pub fn set_visible(&mut self, visible: bool) {
        self.view.set_visible(visible);
    }

    pub fn go_back(&mut self) -> DriveResult<bool> {
        self.traverse(-1)
    }

    pub fn go_forward(&mut self) -> DriveResult<bool> {
        self.traverse(1)
    }

    /// Moves `delta` entries through history and restores the page found
    /// there. False at either end of the stack.
    pub fn traverse(&mut self, delta: isize) -> DriveResult<bool> {
        let position = self.view.scroll_position();
        self.history.record_scroll(position);
        let Some(pop) = self.history.go(delta)? else {
            return Ok(false);
        };
        let direction = match pop.direction {
            HistoryDirection::Forward => VisitDirection::Forward,
            HistoryDirection::Back => VisitDirection::Back,
        };
        let options = VisitOptions {
            action: VisitAction::Restore,
            direction: Some(direction),
            restoration_identifier: Some(pop.restoration_identifier),
            update_history: false,
            ..VisitOptions::default()
        };
        self.start_visit(pop.location, options)?;
        Ok(true)
    }
}
