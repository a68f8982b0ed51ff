use super::Session;
use crate::delegate::DelegateInterceptor;
use crate::form::FormSubmission;
use crate::navigator::Navigation;
use crate::observers::NavigationTarget;
use crate::observers::form_is_submittable;
use crate::observers::navigation_target;
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
use tr_net::FetchResponse;

impl Session {
    /// Submits `form` as if `submitter` was pressed. False when the engine
    /// leaves the submit to the host.
    pub fn submit(&mut self, form: NodeId, submitter: Option<NodeId>) -> DriveResult<bool> {
        let document = self.view.document();
        if !form_is_submittable(document, form, submitter) {
            return Ok(false);
        }
        let submission = FormSubmission::from_form(document, form, submitter, self.view.location())?;
        let root = self.view.root_location();
        if !submission.location().is_visitable(&root) {
            return Ok(false);
        }
        self.submit_prepared(submission, form, submitter)?;
        Ok(true)
    }

    /// Asks for confirmation, then routes the submission to a frame or the
    /// page.
    pub(crate) fn submit_prepared(
        &mut self,
        submission: FormSubmission,
        element: NodeId,
        submitter: Option<NodeId>,
    ) -> DriveResult<()> {
        if let Some(message) = submission.confirm_message() {
            if !self.delegate.confirm(message) {
                log::debug!(target: "trellis::visit", "submission to {} declined", submission.location());
                return Ok(());
            }
        }
        match navigation_target(self.view.document(), element, submitter) {
            NavigationTarget::Frame(frame) => self.submit_to_frame(frame, submission),
            NavigationTarget::Top => self.submit_form(submission),
        }
    }

    pub(crate) fn submit_form(&mut self, mut submission: FormSubmission) -> DriveResult<()> {
        self.stop_navigation()?;
        let request = submission.request(FetchPurpose::FormSubmission)?;
        submission.start(Some(request.id.clone()));
        submission.reflect_busy(self.view.document_mut(), true)?;
        log::debug!(
            target: "trellis::visit",
            "{} submission to {}",
            submission.method().as_str(),
            submission.location()
        );
        self.navigator.occupy(Navigation::Submission(submission));

        let mut interceptor = DelegateInterceptor {
            delegate: self.delegate.as_mut(),
        };
        match self.transport.issue(request, &mut interceptor) {
            Dispatch::Sent(_) => Ok(()),
            Dispatch::Answered(response) => self.submission_completion(Ok(response)),
            Dispatch::Prevented => self.stop_navigation(),
        }
    }

    pub(crate) fn submission_completion(&mut self, outcome: DriveResult<FetchResponse>) -> DriveResult<()> {
        let Some(submission) = self.navigator.current_submission_mut() else {
            return Ok(());
        };
        submission.receive();
        submission.reflect_busy(self.view.document_mut(), false)?;
        let submission = submission.clone();

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                if let Some(request_id) = submission.request_id() {
                    self.delegate.fetch_error(request_id, &error);
                }
                self.delegate.submission_error(&error);
                return Ok(());
            }
        };
        if self.delegate.before_fetch_response(&response).is_prevented() {
            return Ok(());
        }

        if response.is_stream() {
            let message = StreamMessage::parse(&response.text())?;
            for directive in message.directives() {
                self.apply_stream_directive(directive)?;
            }
            self.sync_frames()?;
            return Ok(());
        }
        if !response.is_html() {
            let error = DriveError::new(
                "form.content_type_mismatch",
                format!("{} answered the submission without HTML", response.location),
            );
            self.delegate.submission_error(&error);
            return Ok(());
        }
        if response.failed() {
            return self.render_failed_submission(&response);
        }
        if !submission.is_safe() && !response.redirected {
            let error = DriveError::new(
                "form.redirect_required",
                format!(
                    "{} submission to {} must redirect",
                    submission.method().as_str(),
                    submission.location()
                ),
            );
            log::warn!(target: "trellis::visit", "{error}");
            self.delegate.submission_error(&error);
            return Ok(());
        }

        if !submission.is_safe() {
            self.snapshot_cache.clear();
        }
        let action = submission.visit_action().unwrap_or(
            if response.redirected && &response.location == self.view.location() {
                VisitAction::Replace
            } else {
                VisitAction::Advance
            },
        );
        let options = VisitOptions {
            action,
            should_cache_snapshot: submission.is_safe(),
            response: Some(response.clone()),
            ..VisitOptions::default()
        };
        self.visit_with(response.location, options).map(|_| ())
    }

    /// Renders a 4xx/5xx answer in place; history stays where it was.
    fn render_failed_submission(&mut self, response: &FetchResponse) -> DriveResult<()> {
        let snapshot = Snapshot::from_html(&response.text())?;
        let policy = RenderPolicy {
            failed_response: true,
            page_prefers_morph: self.view.meta("turbo-refresh-method").as_deref() == Some("morph"),
            ..RenderPolicy::default()
        };
        let strategy = select_strategy(RenderTarget::Page, &snapshot, policy);
        let location = self.view.location().clone();
        let outcome = self.perform_render(strategy, &snapshot, RenderTarget::Page, false, &location, None)?;
        if !outcome.rendered() {
            return Ok(());
        }
        self.after_render()?;
        if !snapshot.should_preserve_scroll_position() {
            self.view.scroll_to_top();
        }
        self.snapshot_cache.clear();
        Ok(())
    }
}
