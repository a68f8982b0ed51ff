//! `<turbo-frame>` controllers.
//!
//! A controller mirrors one connected frame element: where it loads from,
//! whether that load already happened, and which request currently owns
//! it. The session drives the fetches; the controller only keeps the
//! bookkeeping honest and reflects it back into attributes.

use crate::visit::VisitAction;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_net::Location;

pub const FRAME_TAG: &str = "turbo-frame";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStyle {
    Eager,
    Lazy,
}

impl LoadingStyle {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("lazy") => Self::Lazy,
            _ => Self::Eager,
        }
    }
}

/// Where a frame response keeps the frame it was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLookup {
    Found(NodeId),
    /// Another frame declares `recurse` for the id; its `src` has the
    /// content.
    Delegated(Location),
    Missing,
}

/// Finds `<turbo-frame id=…>` in a response document.
pub fn locate_frame(document: &Document, id: &str, base: &Location) -> FrameLookup {
    let frames: Vec<NodeId> = document
        .descendants(document.root())
        .into_iter()
        .filter(|node| document.has_tag(*node, FRAME_TAG))
        .collect();

    if let Some(found) = frames
        .iter()
        .copied()
        .find(|frame| document.element_id(*frame) == Some(id))
    {
        return FrameLookup::Found(found);
    }

    frames
        .iter()
        .copied()
        .filter(|frame| {
            document
                .attr(*frame, "recurse")
                .is_some_and(|recurse| recurse.split_ascii_whitespace().any(|token| token == id))
        })
        .find_map(|frame| document.attr(frame, "src"))
        .and_then(|src| base.join(src).ok())
        .map_or(FrameLookup::Missing, FrameLookup::Delegated)
}

#[derive(Debug, Clone)]
pub struct FrameController {
    id: String,
    element: NodeId,
    src: Option<Location>,
    loading: LoadingStyle,
    disabled: bool,
    complete: bool,
    busy: bool,
    appeared: bool,
    autoscroll: bool,
    morph_on_refresh: bool,
    target: Option<String>,
    pending_action: Option<VisitAction>,
    request_id: Option<String>,
    loaded: Option<DriveResult<Location>>,
}

impl FrameController {
    /// Reads the frame element's attributes. Frames without an id are not
    /// addressable and get no controller.
    pub fn connect(document: &Document, element: NodeId, base: &Location) -> Option<Self> {
        let id = document.element_id(element)?.to_owned();
        let mut controller = Self {
            id,
            element,
            src: None,
            loading: LoadingStyle::Eager,
            disabled: false,
            complete: document.has_attr(element, "complete"),
            busy: false,
            appeared: false,
            autoscroll: false,
            morph_on_refresh: false,
            target: None,
            pending_action: None,
            request_id: None,
            loaded: None,
        };
        controller.src = document
            .attr(element, "src")
            .and_then(|src| base.join(src).ok());
        controller.refresh_attributes(document);
        Some(controller)
    }

    /// Re-reads everything except `src`, which only changes through
    /// [`FrameController::src_changed`].
    pub fn refresh_attributes(&mut self, document: &Document) {
        let element = self.element;
        self.loading = LoadingStyle::parse(document.attr(element, "loading"));
        self.disabled = document.has_attr(element, "disabled");
        self.autoscroll = document.attr(element, "autoscroll").is_some_and(|value| value != "false");
        self.morph_on_refresh = document.attr(element, "refresh") == Some("morph");
        self.target = document
            .attr(element, "target")
            .filter(|target| !target.is_empty())
            .map(str::to_owned);
        if self.pending_action.is_none() {
            self.pending_action = document
                .attr(element, "data-turbo-action")
                .and_then(VisitAction::parse);
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn element(&self) -> NodeId {
        self.element
    }

    pub fn src(&self) -> Option<&Location> {
        self.src.as_ref()
    }

    pub fn loading_style(&self) -> LoadingStyle {
        self.loading
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn has_appeared(&self) -> bool {
        self.appeared
    }

    pub fn autoscroll(&self) -> bool {
        self.autoscroll
    }

    pub fn morph_on_refresh(&self) -> bool {
        self.morph_on_refresh
    }

    /// `target` attribute: `_top` or another frame's id.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn pending_action(&self) -> Option<VisitAction> {
        self.pending_action
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Outcome of the last load: the response location, or why it failed.
    ///
    /// Frame failures stay with the frame. A response without the matching
    /// `<turbo-frame>` shows up here as `Err` with code `frame.missing`;
    /// the session calls that started the load still return `Ok`.
    pub fn loaded(&self) -> Option<&DriveResult<Location>> {
        self.loaded.as_ref()
    }

    /// Eager frames load as soon as they connect.
    pub fn should_load_on_connect(&self) -> bool {
        self.loading == LoadingStyle::Eager && self.can_load()
    }

    fn can_load(&self) -> bool {
        !self.disabled && !self.complete && self.src.is_some()
    }

    /// Applies a new `src`; true when the frame should fetch it now.
    ///
    /// A complete frame asked for the location it already shows does not
    /// fetch again. Clearing `src` forgets completion.
    pub fn src_changed(&mut self, src: Option<Location>) -> bool {
        let Some(src) = src else {
            self.src = None;
            self.complete = false;
            return false;
        };
        let unchanged = self.src.as_ref() == Some(&src);
        if self.complete && unchanged {
            return false;
        }
        self.src = Some(src);
        self.complete = false;
        !self.disabled && (self.loading == LoadingStyle::Eager || self.appeared)
    }

    /// The frame scrolled into the viewport; lazy frames load now.
    pub fn appear(&mut self) -> bool {
        let first = !self.appeared;
        self.appeared = true;
        first && self.loading == LoadingStyle::Lazy && self.can_load()
    }

    pub fn reload(&mut self) -> bool {
        self.complete = false;
        self.can_load()
    }

    pub fn set_pending_action(&mut self, action: Option<VisitAction>) {
        self.pending_action = action;
    }

    pub(crate) fn take_pending_action(&mut self) -> Option<VisitAction> {
        self.pending_action.take()
    }

    /// Claims the frame for `request_id`. Returns the request it displaced,
    /// which the caller must cancel.
    pub(crate) fn begin_request(&mut self, request_id: &str) -> Option<String> {
        self.busy = true;
        self.request_id.replace(request_id.to_owned())
    }

    pub fn owns_request(&self, request_id: &str) -> bool {
        self.request_id.as_deref() == Some(request_id)
    }

    pub(crate) fn finish_request(&mut self) {
        self.busy = false;
        self.request_id = None;
    }

    pub(crate) fn loaded_from(&mut self, location: Location) {
        self.src = Some(location.clone());
        self.complete = true;
        self.loaded = Some(Ok(location));
    }

    pub(crate) fn load_failed(&mut self, error: DriveError) {
        self.loaded = Some(Err(error));
    }

    /// A prevented frame-missing still counts as a finished load.
    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Writes `busy`, `aria-busy`, `complete` and `src` back to the element.
    pub fn reflect(&self, document: &mut Document) -> DriveResult<()> {
        if !document.is_alive(self.element) {
            return Ok(());
        }
        document.toggle_attr(self.element, "busy", self.busy)?;
        if self.busy {
            document.set_attr(self.element, "aria-busy", "true")?;
        } else {
            document.remove_attr(self.element, "aria-busy");
        }
        document.toggle_attr(self.element, "complete", self.complete)?;
        match &self.src {
            Some(src) => document.set_attr(self.element, "src", src.as_str())?,
            None => {
                document.remove_attr(self.element, "src");
            }
        }
        Ok(())
    }
}

/// Controllers for every connected frame of the live page.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    controllers: Vec<FrameController>,
}

/// What [`FrameSet::sync`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSync {
    /// Frames that connected and want to load now.
    pub to_load: Vec<String>,
    /// Requests owned by frames that disconnected.
    pub orphaned_requests: Vec<String>,
}

impl FrameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches controllers to the frame elements now in `document`.
    ///
    /// Elements that kept their identity across a render keep their
    /// controller; new elements connect fresh.
    pub fn sync(&mut self, document: &Document, base: &Location) -> FrameSync {
        let mut sync = FrameSync::default();

        let (kept, gone): (Vec<FrameController>, Vec<FrameController>) =
            std::mem::take(&mut self.controllers)
                .into_iter()
                .partition(|controller| {
                    document.is_connected(controller.element)
                        && document.element_id(controller.element) == Some(controller.id.as_str())
                });
        for controller in gone {
            log::trace!(target: "trellis::frame", "frame #{} disconnected", controller.id);
            sync.orphaned_requests.extend(controller.request_id);
        }
        self.controllers = kept;

        let elements: Vec<NodeId> = document
            .descendants(document.root())
            .into_iter()
            .filter(|node| document.has_tag(*node, FRAME_TAG))
            .collect();
        for element in elements {
            if let Some(controller) = self.by_element_mut(element) {
                controller.refresh_attributes(document);
                continue;
            }
            let Some(controller) = FrameController::connect(document, element, base) else {
                continue;
            };
            log::trace!(target: "trellis::frame", "frame #{} connected", controller.id);
            if controller.should_load_on_connect() {
                sync.to_load.push(controller.id.clone());
            }
            self.controllers.push(controller);
        }
        sync
    }

    pub fn get(&self, id: &str) -> Option<&FrameController> {
        self.controllers.iter().find(|controller| controller.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut FrameController> {
        self.controllers.iter_mut().find(|controller| controller.id == id)
    }

    pub fn by_element(&self, element: NodeId) -> Option<&FrameController> {
        self.controllers
            .iter()
            .find(|controller| controller.element == element)
    }

    pub fn by_element_mut(&mut self, element: NodeId) -> Option<&mut FrameController> {
        self.controllers
            .iter_mut()
            .find(|controller| controller.element == element)
    }

    pub fn by_request(&self, request_id: &str) -> Option<&FrameController> {
        self.controllers
            .iter()
            .find(|controller| controller.owns_request(request_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameController> {
        self.controllers.iter()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Drops every controller, returning the requests they owned.
    pub fn disconnect_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.controllers)
            .into_iter()
            .filter_map(|controller| controller.request_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::FrameLookup;
    use super::FrameSet;
    use super::LoadingStyle;
    use super::locate_frame;
    use tr_dom::Document;
    use tr_net::Location;

    fn document(html: &str) -> Document {
        match tr_html::parse_document(html) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        }
    }

    fn location(path: &str) -> Location {
        match Location::parse(&format!("https://example.com{path}")) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn locates_frames_directly_or_through_recurse() {
        let response = document(
            "<body><turbo-frame id=\"outer\" src=\"/outer\" recurse=\"inner other\"></turbo-frame>\
             <turbo-frame id=\"side\"></turbo-frame></body>",
        );
        assert!(matches!(locate_frame(&response, "side", &location("/")), FrameLookup::Found(_)));
        assert_eq!(
            locate_frame(&response, "inner", &location("/")),
            FrameLookup::Delegated(location("/outer"))
        );
        assert_eq!(locate_frame(&response, "nope", &location("/")), FrameLookup::Missing);
    }

    #[test]
    fn complete_frames_ignore_their_own_src() {
        let page = document("<body><turbo-frame id=\"f\" src=\"/a\"></turbo-frame></body>");
        let mut frames = FrameSet::new();
        let sync = frames.sync(&page, &location("/"));
        assert_eq!(sync.to_load, vec!["f".to_owned()]);

        let Some(frame) = frames.get_mut("f") else {
            panic!("frame controller missing");
        };
        frame.begin_request("r1");
        frame.finish_request();
        frame.loaded_from(location("/a"));
        assert!(frame.is_complete());

        assert!(!frame.src_changed(Some(location("/a"))));
        assert!(frame.src_changed(Some(location("/b"))));
        assert!(!frame.src_changed(None));
        assert!(!frame.is_complete());
        assert!(frame.src_changed(Some(location("/a"))));
    }

    #[test]
    fn lazy_frames_wait_until_they_appear() {
        let page = document("<body><turbo-frame id=\"f\" src=\"/a\" loading=\"lazy\"></turbo-frame></body>");
        let mut frames = FrameSet::new();
        assert!(frames.sync(&page, &location("/")).to_load.is_empty());

        let Some(frame) = frames.get_mut("f") else {
            panic!("frame controller missing");
        };
        assert_eq!(frame.loading_style(), LoadingStyle::Lazy);
        assert!(frame.appear());
        assert!(!frame.appear());
    }

    #[test]
    fn displaced_requests_are_returned_for_cancellation() {
        let page = document("<body><turbo-frame id=\"f\" src=\"/a\"></turbo-frame></body>");
        let mut frames = FrameSet::new();
        frames.sync(&page, &location("/"));
        let Some(frame) = frames.get_mut("f") else {
            panic!("frame controller missing");
        };
        assert_eq!(frame.begin_request("r1"), None);
        assert_eq!(frame.begin_request("r2"), Some("r1".to_owned()));
        assert!(frames.by_request("r2").is_some());
        assert!(frames.by_request("r1").is_none());
    }

    #[test]
    fn disconnected_frames_surrender_their_requests() {
        let mut page = document("<body><turbo-frame id=\"f\" src=\"/a\"></turbo-frame></body>");
        let mut frames = FrameSet::new();
        frames.sync(&page, &location("/"));
        if let Some(frame) = frames.get_mut("f") {
            frame.begin_request("r1");
        }
        let Some(element) = page.element_by_id("f") else {
            panic!("frame element missing");
        };
        page.dispose(element);

        let sync = frames.sync(&page, &location("/"));
        assert_eq!(sync.orphaned_requests, vec!["r1".to_owned()]);
        assert!(frames.is_empty());
    }
}
