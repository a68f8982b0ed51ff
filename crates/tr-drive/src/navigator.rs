//! Single-flight slot for top-level navigation.

use crate::form::FormSubmission;
use crate::form::FormSubmissionState;
use crate::scheduler::Scheduler;
use crate::visit::Visit;
use crate::visit::VisitState;
use tr_net::Transport;

/// Whatever currently owns top-level navigation.
#[derive(Debug, Clone)]
pub enum Navigation {
    Visit(Visit),
    Submission(FormSubmission),
}

/// Holds at most one visit or submission. Starting either stops the
/// previous occupant first.
#[derive(Debug, Default)]
pub struct Navigator {
    current: Option<Navigation>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Navigation> {
        self.current.as_ref()
    }

    pub fn current_visit(&self) -> Option<&Visit> {
        match &self.current {
            Some(Navigation::Visit(visit)) => Some(visit),
            _ => None,
        }
    }

    pub(crate) fn current_visit_mut(&mut self) -> Option<&mut Visit> {
        match &mut self.current {
            Some(Navigation::Visit(visit)) => Some(visit),
            _ => None,
        }
    }

    pub fn current_submission(&self) -> Option<&FormSubmission> {
        match &self.current {
            Some(Navigation::Submission(submission)) => Some(submission),
            _ => None,
        }
    }

    pub(crate) fn current_submission_mut(&mut self) -> Option<&mut FormSubmission> {
        match &mut self.current {
            Some(Navigation::Submission(submission)) => Some(submission),
            _ => None,
        }
    }

    /// The visit in the slot, when it is the one with `id` and still running.
    pub(crate) fn active_visit_mut(&mut self, id: &str) -> Option<&mut Visit> {
        self.current_visit_mut()
            .filter(|visit| visit.id() == id && visit.state() == VisitState::Started)
    }

    /// True while a started visit or a requesting submission holds the slot.
    pub fn is_busy(&self) -> bool {
        match &self.current {
            Some(Navigation::Visit(visit)) => visit.state() == VisitState::Started,
            Some(Navigation::Submission(submission)) => {
                submission.state() == FormSubmissionState::Requesting
            }
            None => false,
        }
    }

    pub(crate) fn occupy(&mut self, navigation: Navigation) {
        self.current = Some(navigation);
    }

    /// Empties the slot, canceling the occupant's request and pending
    /// render. Returns the occupant only when it was interrupted mid-flight.
    pub fn stop<T>(&mut self, transport: &mut Transport, scheduler: &mut Scheduler<T>) -> Option<Navigation> {
        match self.current.take()? {
            Navigation::Visit(mut visit) => {
                if visit.state() != VisitState::Started {
                    return None;
                }
                if let Some(request_id) = visit.request_id.as_deref() {
                    transport.cancel(request_id);
                }
                if let Some(handle) = visit.render_task.take() {
                    scheduler.cancel(handle);
                }
                visit.cancel(scheduler.now());
                log::debug!(target: "trellis::visit", "canceled visit to {}", visit.location());
                Some(Navigation::Visit(visit))
            }
            Navigation::Submission(mut submission) => {
                if !submission.stop() {
                    return None;
                }
                if let Some(request_id) = submission.request_id() {
                    transport.cancel(request_id);
                }
                log::debug!(
                    target: "trellis::visit",
                    "stopped {} submission to {}",
                    submission.method().as_str(),
                    submission.location()
                );
                Some(Navigation::Submission(submission))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Navigation;
    use super::Navigator;
    use crate::scheduler::ManualClock;
    use crate::scheduler::Scheduler;
    use crate::visit::Visit;
    use crate::visit::VisitOptions;
    use crate::visit::VisitState;
    use std::rc::Rc;
    use std::time::Duration;
    use tr_net::Dispatch;
    use tr_net::FetchPurpose;
    use tr_net::FetchRequest;
    use tr_net::Location;
    use tr_net::NoInterception;
    use tr_net::ScriptedBackend;
    use tr_net::Transport;

    fn location(path: &str) -> Location {
        match Location::parse(&format!("https://example.com{path}")) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn stopping_cancels_the_running_visit_and_its_request() {
        let backend = ScriptedBackend::new();
        backend.hold();
        let mut transport = Transport::new(Box::new(backend.clone()));
        let mut scheduler: Scheduler<()> = Scheduler::new(Rc::new(ManualClock::new()));
        let mut navigator = Navigator::new();

        let mut visit = Visit::new(location("/one"), VisitOptions::default(), "r1", false, false);
        assert!(visit.start(Duration::ZERO));
        let request = FetchRequest::get(location("/one"), FetchPurpose::Visit);
        let Dispatch::Sent(request_id) = transport.issue(request, &mut NoInterception) else {
            panic!("request was not sent");
        };
        visit.request_started(Some(request_id.clone()), Duration::ZERO);
        navigator.occupy(Navigation::Visit(visit));
        assert!(navigator.is_busy());

        let stopped = navigator.stop(&mut transport, &mut scheduler);
        let Some(Navigation::Visit(stopped)) = stopped else {
            panic!("expected the canceled visit back");
        };
        assert_eq!(stopped.state(), VisitState::Canceled);
        assert_eq!(backend.canceled(), vec![request_id]);
        assert!(navigator.current().is_none());
        assert!(!navigator.is_busy());
    }

    #[test]
    fn finished_visits_leave_quietly() {
        let mut transport = Transport::new(Box::new(ScriptedBackend::new()));
        let mut scheduler: Scheduler<()> = Scheduler::new(Rc::new(ManualClock::new()));
        let mut navigator = Navigator::new();

        let mut visit = Visit::new(location("/done"), VisitOptions::default(), "r1", false, false);
        visit.start(Duration::ZERO);
        visit.complete(Duration::from_millis(5));
        navigator.occupy(Navigation::Visit(visit));

        assert!(navigator.stop(&mut transport, &mut scheduler).is_none());
        assert!(navigator.current().is_none());
    }
}
