//! The engine's composition root.
//!
//! A [`Session`] owns the live view, history, caches, transport and
//! scheduler. The host feeds it input (clicks, submits, hovers, scrolls,
//! history traversal, stream messages) and pumps it with
//! [`Session::run_until_idle`]; progress is reported through the
//! [`DriveDelegate`] given at construction.

mod forms;
mod frames;
mod input;
mod visits;


use crate::cache::SnapshotCache;
use crate::config::DriveConfig;
use crate::delegate::DelegateInterceptor;
use crate::delegate::DriveDelegate;
use crate::delegate::NullDelegate;
use crate::delegate::RenderInfo;
use crate::frame::FrameController;
use crate::frame::FrameSet;
use crate::history::History;
use crate::history::HistoryMethod;
use crate::navigator::Navigation;
use crate::navigator::Navigator;
use crate::prefetch::PrefetchCache;
use crate::render::RenderGuard;
use crate::render::RenderReport;
use crate::render::RenderStrategy;
use crate::render::RenderTarget;
use crate::render::Renderer;
use crate::scheduler::Clock;
use crate::scheduler::Scheduler;
use crate::scheduler::SystemClock;
use crate::scheduler::TaskHandle;
use crate::snapshot::Snapshot;
use crate::stream;
use crate::stream::StreamDirective;
use crate::stream::StreamEffect;
use crate::stream::StreamMessage;
use crate::view::View;
use crate::visit::Visit;
use frames::FrameFetch;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tr_core::DriveResult;
use tr_core::fresh_uid;
use tr_dom::Document;
use tr_net::Completion;
use tr_net::FetchBackend;
use tr_net::HttpBackend;
use tr_net::Location;
use tr_net::Transport;

/// Deferred work the session schedules for itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Task {
    RenderVisit(String),
    IssuePrefetch,
    Refresh,
}

/// A soft navigation the engine gave up on; the host should load
/// `location` from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardReload {
    pub location: Location,
    pub reason: String,
}

/// What a render attempt came to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Rendered(RenderReport),
    /// The delegate vetoed it; the document is untouched.
    Prevented,
    /// The guard refused it and a hard reload was requested.
    Reloading(&'static str),
}

impl RenderOutcome {
    fn rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }
}

pub struct SessionBuilder {
    config: DriveConfig,
    clock: Option<Rc<dyn Clock>>,
    backend: Option<Box<dyn FetchBackend>>,
    delegate: Option<Box<dyn DriveDelegate>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: DriveConfig::default(),
            clock: None,
            backend: None,
            delegate: None,
        }
    }

    pub fn config(mut self, config: DriveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to the HTTP backend built from the configuration.
    pub fn backend(mut self, backend: impl FetchBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn delegate(mut self, delegate: impl DriveDelegate + 'static) -> Self {
        self.delegate = Some(Box::new(delegate));
        self
    }

    /// Starts a session on an already loaded page.
    pub fn build(self, location: Location, html: &str) -> DriveResult<Session> {
        self.config.validate()?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => Box::new(HttpBackend::new(self.config.client_config())?),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Rc::new(SystemClock::default()));
        let document = tr_html::parse_document(html)?;

        let mut session = Session {
            view: View::new(location.clone(), document),
            history: History::new(location)?,
            navigator: Navigator::new(),
            transport: Transport::new(backend),
            scheduler: Scheduler::new(clock),
            snapshot_cache: SnapshotCache::new(self.config.snapshot_cache_size),
            prefetch: PrefetchCache::new(),
            frames: FrameSet::new(),
            frame_fetches: HashMap::new(),
            delegate: self.delegate.unwrap_or_else(|| Box::new(NullDelegate)),
            hard_reload: None,
            refresh: None,
            stream_sources: Vec::new(),
            config: self.config,
        };
        session.page_loaded()?;
        Ok(session)
    }
}

pub struct Session {
    config: DriveConfig,
    view: View,
    history: History,
    navigator: Navigator,
    transport: Transport,
    scheduler: Scheduler<Task>,
    snapshot_cache: SnapshotCache,
    prefetch: PrefetchCache,
    frames: FrameSet,
    frame_fetches: HashMap<String, FrameFetch>,
    delegate: Box<dyn DriveDelegate>,
    hard_reload: Option<HardReload>,
    refresh: Option<TaskHandle>,
    stream_sources: Vec<Location>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn document(&self) -> &Document {
        self.view.document()
    }

    /// Location of the page as last rendered.
    pub fn location(&self) -> &Location {
        self.view.location()
    }

    pub fn title(&self) -> String {
        self.view.title()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn current_visit(&self) -> Option<&Visit> {
        self.navigator.current_visit()
    }

    pub fn snapshot_cache(&self) -> &SnapshotCache {
        &self.snapshot_cache
    }

    pub fn prefetch_cache(&self) -> &PrefetchCache {
        &self.prefetch
    }

    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }

    pub fn frame(&self, id: &str) -> Option<&FrameController> {
        self.frames.get(id)
    }

    /// `<turbo-stream-source>` locations connected in the current page.
    pub fn stream_sources(&self) -> &[Location] {
        &self.stream_sources
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    /// The pending hard reload, if the engine asked for one.
    pub fn take_hard_reload(&mut self) -> Option<HardReload> {
        self.hard_reload.take()
    }

    /// Installs a page the host loaded itself, as after a hard reload.
    pub fn load_document(&mut self, location: Location, html: &str) -> DriveResult<()> {
        let document = tr_html::parse_document(html)?;
        self.stop_navigation()?;
        for request_id in self.frames.disconnect_all() {
            self.transport.cancel(&request_id);
        }
        self.frame_fetches.clear();
        if let Some(entry) = self.prefetch.clear(&mut self.scheduler) {
            self.transport.cancel(&entry.request_id);
        }
        if let Some(handle) = self.refresh.take() {
            self.scheduler.cancel(handle);
        }
        self.snapshot_cache.clear();

        let method = if self.history.location() == Some(&location) {
            HistoryMethod::Replace
        } else {
            HistoryMethod::Push
        };
        self.history.update(method, location.clone(), &fresh_uid())?;
        self.view.replace_document(location, document);
        self.hard_reload = None;
        self.page_loaded()
    }

    /// Runs ready tasks and delivers arrived responses once. True when
    /// anything happened.
    pub fn tick(&mut self) -> DriveResult<bool> {
        let tasks = self.scheduler.take_ready();
        let mut progressed = !tasks.is_empty();
        for task in tasks {
            self.run_task(task)?;
        }

        let mut interceptor = DelegateInterceptor {
            delegate: self.delegate.as_mut(),
        };
        let completions = self.transport.poll(&mut interceptor);
        progressed |= !completions.is_empty();
        for completion in completions {
            self.complete_request(completion)?;
        }
        Ok(progressed)
    }

    /// Pumps until no task is ready and no response can arrive. Timers due
    /// later are left pending; requests held by the backend stay in flight.
    pub fn run_until_idle(&mut self) -> DriveResult<usize> {
        let mut steps = 0;
        loop {
            if self.tick()? {
                steps += 1;
                continue;
            }
            if self.transport.in_flight_count() == 0 {
                break;
            }
            let mut interceptor = DelegateInterceptor {
                delegate: self.delegate.as_mut(),
            };
            let completions = self
                .transport
                .wait(self.config.request_timeout, &mut interceptor);
            if completions.is_empty() {
                break;
            }
            steps += 1;
            for completion in completions {
                self.complete_request(completion)?;
            }
        }
        Ok(steps)
    }

    fn run_task(&mut self, task: Task) -> DriveResult<()> {
        match task {
            Task::RenderVisit(visit_id) => self.render_visit(&visit_id),
            Task::IssuePrefetch => {
                self.issue_prefetch();
                Ok(())
            }
            Task::Refresh => self.perform_refresh(),
        }
    }

    /// Routes a response to whoever owns its request.
    fn complete_request(&mut self, completion: Completion) -> DriveResult<()> {
        let Completion {
            request_id,
            outcome,
        } = completion;

        if self.prefetch.owns_request(&request_id) {
            match outcome {
                Ok(response) => {
                    self.prefetch.resolve(response);
                }
                Err(error) => {
                    log::debug!(target: "trellis::net", "prefetch {request_id} failed: {error}");
                    self.prefetch.clear(&mut self.scheduler);
                }
            }
            return Ok(());
        }
        if self
            .navigator
            .current_visit()
            .is_some_and(|visit| visit.request_id() == Some(request_id.as_str()))
        {
            return self.visit_completion(outcome);
        }
        if self
            .navigator
            .current_submission()
            .is_some_and(|submission| submission.request_id() == Some(request_id.as_str()))
        {
            return self.submission_completion(outcome);
        }
        if let Some(fetch) = self.frame_fetches.remove(&request_id) {
            return self.frame_completion(&request_id, fetch, outcome);
        }

        log::trace!(target: "trellis::net", "dropping unclaimed response for {request_id}");
        Ok(())
    }

    /// Cancels whatever holds the navigator and tells the delegate.
    pub(crate) fn stop_navigation(&mut self) -> DriveResult<()> {
        match self.navigator.stop(&mut self.transport, &mut self.scheduler) {
            Some(Navigation::Visit(visit)) => self.delegate.visit_canceled(&visit),
            Some(Navigation::Submission(submission)) => {
                submission.reflect_busy(self.view.document_mut(), false)?;
            }
            None => {}
        }
        Ok(())
    }

    pub(crate) fn request_hard_reload(&mut self, location: Location, reason: &str) {
        log::warn!(target: "trellis::visit", "hard reload of {location}: {reason}");
        self.delegate.hard_reload(&location, reason);
        self.hard_reload = Some(HardReload {
            location,
            reason: reason.to_owned(),
        });
    }

    /// Guard, delegate veto, then prepare-render-finish. Nothing touches
    /// the document unless the render goes ahead.
    pub(crate) fn perform_render(
        &mut self,
        strategy: RenderStrategy,
        snapshot: &Snapshot,
        target: RenderTarget,
        is_preview: bool,
        location: &Location,
        frame_id: Option<String>,
    ) -> DriveResult<RenderOutcome> {
        let info = RenderInfo {
            strategy,
            location: location.clone(),
            is_preview,
            frame_id,
        };

        let mut renderer = Renderer::new(strategy, self.view.document_mut(), snapshot, target, is_preview);
        if let RenderGuard::Reload(reason) = renderer.should_render() {
            drop(renderer);
            self.request_hard_reload(location.clone(), reason);
            return Ok(RenderOutcome::Reloading(reason));
        }
        if self.delegate.before_render(&info).is_prevented() {
            log::debug!(target: "trellis::render", "{} render of {location} prevented", strategy.as_str());
            return Ok(RenderOutcome::Prevented);
        }
        renderer.prepare_to_render()?;
        renderer.render()?;
        let report = renderer.finish_rendering()?;

        if report.autofocus.is_some() {
            self.view.focus(report.autofocus);
        }
        if report.activated_scripts > 0 {
            log::trace!(
                target: "trellis::render",
                "{} script(s) activated",
                report.activated_scripts
            );
        }
        self.delegate.render(&info, &report);
        Ok(RenderOutcome::Rendered(report))
    }

    /// Work every fresh page or frame render needs: inline streams, frame
    /// connections and stream sources.
    pub(crate) fn after_render(&mut self) -> DriveResult<()> {
        let directives = stream::take_page_streams(self.view.document_mut())?;
        for directive in &directives {
            self.apply_stream_directive(directive)?;
        }
        self.sync_frames()?;
        self.sync_stream_sources();
        Ok(())
    }

    fn page_loaded(&mut self) -> DriveResult<()> {
        self.after_render()?;
        let location = self.view.location().clone();
        self.delegate.load(&location);
        Ok(())
    }

    fn sync_stream_sources(&mut self) {
        let current = stream::stream_source_locations(self.view.document(), self.view.location());
        for location in current.iter().filter(|location| !self.stream_sources.contains(location)) {
            log::debug!(target: "trellis::stream", "stream source connected: {location}");
        }
        for location in self.stream_sources.iter().filter(|location| !current.contains(location)) {
            log::debug!(target: "trellis::stream", "stream source disconnected: {location}");
        }
        self.stream_sources = current;
    }

    /// Applies a pushed `<turbo-stream>` message. Returns how many
    /// directives took effect.
    pub fn receive_stream_message(&mut self, html: &str) -> DriveResult<usize> {
        let message = StreamMessage::parse(html)?;
        let mut applied = 0;
        for directive in message.directives() {
            if self.apply_stream_directive(directive)? {
                applied += 1;
            }
        }
        self.sync_frames()?;
        self.sync_stream_sources();
        Ok(applied)
    }

    fn apply_stream_directive(&mut self, directive: &StreamDirective) -> DriveResult<bool> {
        if self.delegate.before_stream_render(directive).is_prevented() {
            return Ok(false);
        }
        match stream::apply(self.view.document_mut(), directive)? {
            StreamEffect::Applied { targets } => {
                log::debug!(
                    target: "trellis::stream",
                    "{} applied to {targets} target(s)",
                    directive.action.as_str()
                );
                Ok(true)
            }
            StreamEffect::Refresh { request_id } => {
                self.schedule_refresh(request_id.as_deref());
                Ok(true)
            }
            StreamEffect::NoTarget => {
                log::debug!(
                    target: "trellis::stream",
                    "{} matched no target",
                    directive.action.as_str()
                );
                Ok(false)
            }
        }
    }

    /// Debounces page refreshes; a refresh caused by one of this page's own
    /// requests is ignored.
    fn schedule_refresh(&mut self, request_id: Option<&str>) {
        if let Some(request_id) = request_id {
            if self.transport.issued_recently(request_id) {
                log::debug!(
                    target: "trellis::stream",
                    "ignoring refresh caused by request {request_id}"
                );
                return;
            }
        }
        if let Some(handle) = self.refresh.take() {
            self.scheduler.cancel(handle);
        }
        self.refresh = Some(self.scheduler.after(self.config.refresh_debounce, Task::Refresh));
    }
}
